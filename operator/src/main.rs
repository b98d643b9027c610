//! Operator is a long lived process that reconciles LocustLoadTest resources.
#![deny(missing_docs)]
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use locust_operator::{loadtest, loadtest::deployment::WorkerImageConfig, utils::OperatorConfig};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, env = "LOCUST_OPERATOR_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,
}

/// Available Subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the daemon
    Daemon(DaemonOpts),
}

/// Options for the daemon
#[derive(clap::Args, Debug)]
pub struct DaemonOpts {
    /// Image for worker containers when a load test does not set one.
    #[arg(
        long,
        env = "LOCUST_OPERATOR_WORKER_IMAGE",
        default_value = "locustio/locust:latest"
    )]
    worker_image: String,

    /// Pull policy for the worker image.
    #[arg(
        long,
        env = "LOCUST_OPERATOR_WORKER_IMAGE_PULL_POLICY",
        default_value = "IfNotPresent"
    )]
    worker_image_pull_policy: String,

    /// Seconds between checks of a load test that is already in sync.
    #[arg(long, env = "LOCUST_OPERATOR_RESYNC_SECONDS", default_value_t = 300)]
    resync_seconds: u64,
}

impl From<DaemonOpts> for OperatorConfig {
    fn from(opts: DaemonOpts) -> Self {
        Self {
            worker_image: WorkerImageConfig {
                image: opts.worker_image,
                image_pull_policy: opts.worker_image_pull_policy,
            },
            resync: Duration::from_secs(opts.resync_seconds),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    locust_common::telemetry::init(args.otlp_endpoint.clone())?;

    info!(?args.command, ?args.otlp_endpoint, "starting operator");
    match args.command {
        Command::Daemon(opts) => loadtest::run(opts.into()).await?,
    };

    // Flush traces before shutdown
    locust_common::telemetry::shutdown();
    Ok(())
}
