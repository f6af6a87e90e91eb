//! dbgridd: the dbgrid control plane daemon.
//!
//! Single binary that assembles the control plane:
//! - State store (redb)
//! - Host registry + local heartbeat
//! - Capacity scheduler
//! - Provisioning orchestrator over the configured drivers
//! - Orphan reaper
//!
//! # Usage
//!
//! ```text
//! dbgridd standalone --data-dir /var/lib/dbgrid --config /etc/dbgrid/dbgrid.toml
//! dbgridd provision --memory-mb 512 --volume-gb 10 --data-dir /var/lib/dbgrid
//! dbgridd delete --workload-id 7 --data-dir /var/lib/dbgrid
//! dbgridd config --config /etc/dbgrid/dbgrid.toml
//! ```

mod control_plane;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};

use dbgrid_core::GridConfig;
use dbgrid_drivers::DatabaseSpecs;
use dbgrid_scheduler::RequestContext;
use dbgrid_state::WorkloadDraft;

use crate::control_plane::{ControlPlane, open_store};

#[derive(Parser)]
#[command(name = "dbgridd", about = "dbgrid database control plane daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Common {
    /// Data directory for persistent state.
    #[arg(long, default_value = "/var/lib/dbgrid")]
    data_dir: PathBuf,

    /// Path to dbgrid.toml; built-in defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane on this node until Ctrl-C.
    Standalone {
        #[command(flatten)]
        common: Common,

        /// Compute host name this node registers as.
        #[arg(long, default_value = "standalone")]
        host: String,

        /// Availability zone of this node.
        #[arg(long, default_value = "nova")]
        zone: String,
    },

    /// Create and provision one workload, then print it as JSON.
    Provision {
        #[command(flatten)]
        common: Common,

        #[arg(long)]
        memory_mb: u64,

        /// Data volume size; no volume when omitted.
        #[arg(long)]
        volume_gb: Option<u32>,

        #[arg(long, default_value = "1")]
        vcpus: u32,

        #[arg(long, default_value = "db")]
        name: String,

        #[arg(long, default_value = "admin")]
        account: String,

        /// `zone` or `zone:host`.
        #[arg(long)]
        availability_zone: Option<String>,

        /// Databases to create, comma separated.
        #[arg(long, value_delimiter = ',')]
        databases: Vec<String>,

        /// Register this host before scheduling.
        #[arg(long, default_value = "standalone")]
        host: String,
    },

    /// Delete a workload and its volumes.
    Delete {
        #[command(flatten)]
        common: Common,

        #[arg(long)]
        workload_id: u64,
    },

    /// Print the effective configuration as TOML.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,dbgridd=debug,dbgrid=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Standalone { common, host, zone } => run_standalone(common, host, zone).await,
        Command::Provision {
            common,
            memory_mb,
            volume_gb,
            vcpus,
            name,
            account,
            availability_zone,
            databases,
            host,
        } => {
            let draft = WorkloadDraft {
                account,
                name,
                memory_mb,
                vcpus,
                availability_zone,
                volume_size_gb: volume_gb,
            };
            run_provision(common, draft, databases, host).await
        }
        Command::Delete {
            common,
            workload_id,
        } => run_delete(common, workload_id).await,
        Command::Config { config } => {
            let config = GridConfig::load(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn assemble(common: &Common) -> anyhow::Result<ControlPlane> {
    let config = GridConfig::load(common.config.as_deref())?;
    let state = open_store(&common.data_dir)?;
    ControlPlane::assemble(config, state)
}

async fn run_standalone(common: Common, host: String, zone: String) -> anyhow::Result<()> {
    info!("dbgrid daemon starting in standalone mode");
    let control_plane = assemble(&common)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(control_plane.run(host, zone, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    handle.await??;
    info!("dbgrid daemon stopped");
    Ok(())
}

async fn run_provision(
    common: Common,
    draft: WorkloadDraft,
    databases: Vec<String>,
    host: String,
) -> anyhow::Result<()> {
    let control_plane = assemble(&common)?;
    control_plane.registry.register(&host, "nova")?;

    let ctx = RequestContext::admin(draft.account.clone());
    let specs = DatabaseSpecs {
        databases,
        users: Vec::new(),
    };

    let workload = control_plane.provisioner.create_workload(&draft).await?;
    let outcome = control_plane
        .provisioner
        .provision(&ctx, workload.id, &specs)
        .await;

    let workload = control_plane
        .state
        .get_workload(workload.id)?
        .unwrap_or(workload);
    let guest = control_plane.provisioner.guests().get(workload.id)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "workload": workload,
            "guest_status": guest,
        }))?
    );

    if let Err(e) = outcome {
        error!(workload_id = workload.id, error = %e, "provisioning failed");
        return Err(e.into());
    }
    Ok(())
}

async fn run_delete(common: Common, workload_id: u64) -> anyhow::Result<()> {
    let control_plane = assemble(&common)?;
    control_plane.provisioner.delete_workload(workload_id).await?;
    info!(workload_id, "workload deleted");
    Ok(())
}
