//! Caller identity passed into scheduling decisions.

use serde::{Deserialize, Serialize};

/// Who is asking. Only admins may pin a workload to a specific host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub account: String,
    pub is_admin: bool,
}

impl RequestContext {
    pub fn tenant(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            is_admin: false,
        }
    }

    pub fn admin(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            is_admin: true,
        }
    }
}
