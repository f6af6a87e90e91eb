//! Scheduler policies: decide the order in which hosts are tried.
//!
//! A policy only orders hosts. [`candidates`] then drops hosts that are
//! down or would exceed the memory ceiling, preserving that order. The
//! scheduler tries candidates front to back.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

use crate::scorer::{HostAggregate, PlacementRequest, rank_by_committed_memory};

/// Orders hosts for placement.
pub trait SchedulerPolicy: Send + Sync {
    fn kind(&self) -> PolicyKind;

    /// Hosts in the order they should be tried.
    fn order<'a>(&self, hosts: &'a [HostAggregate]) -> Vec<&'a HostAggregate>;
}

/// Least committed memory first; ties keep listing order.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastLoaded;

impl SchedulerPolicy for LeastLoaded {
    fn kind(&self) -> PolicyKind {
        PolicyKind::LeastLoaded
    }

    fn order<'a>(&self, hosts: &'a [HostAggregate]) -> Vec<&'a HostAggregate> {
        rank_by_committed_memory(hosts)
    }
}

/// Host listing order, no ranking.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstFit;

impl SchedulerPolicy for FirstFit {
    fn kind(&self) -> PolicyKind {
        PolicyKind::FirstFit
    }

    fn order<'a>(&self, hosts: &'a [HostAggregate]) -> Vec<&'a HostAggregate> {
        hosts.iter().collect()
    }
}

/// The closed set of available policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    LeastLoaded,
    FirstFit,
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyKind::LeastLoaded => f.write_str("least_loaded"),
            PolicyKind::FirstFit => f.write_str("first_fit"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown scheduler policy {0:?} (expected \"least_loaded\" or \"first_fit\")")]
pub struct UnknownPolicy(pub String);

impl FromStr for PolicyKind {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "least_loaded" => Ok(PolicyKind::LeastLoaded),
            "first_fit" => Ok(PolicyKind::FirstFit),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

/// Build a policy from its configured name.
pub fn build_policy(name: &str) -> Result<Box<dyn SchedulerPolicy>, UnknownPolicy> {
    Ok(match name.parse::<PolicyKind>()? {
        PolicyKind::LeastLoaded => Box::new(LeastLoaded),
        PolicyKind::FirstFit => Box::new(FirstFit),
    })
}

/// Up hosts that can fit `req`, in policy order.
pub fn candidates<'a>(
    policy: &dyn SchedulerPolicy,
    hosts: &'a [HostAggregate],
    req: &PlacementRequest,
) -> Vec<&'a HostAggregate> {
    policy
        .order(hosts)
        .into_iter()
        .filter(|h| {
            if !h.is_up {
                debug!(host = %h.host, "skipping host: not up");
                return false;
            }
            if !req.fits(h) {
                debug!(
                    host = %h.host,
                    committed_mb = h.committed_memory_mb,
                    requested_mb = req.memory_mb,
                    ceiling_mb = req.ceiling_mb,
                    "skipping host: over memory ceiling"
                );
                return false;
            }
            true
        })
        .collect()
}
