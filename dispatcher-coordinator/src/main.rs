use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dispatcher_coordinator::config::CoordinatorSettings;
use dispatcher_coordinator::{server, Coordinator};

/// Resumable, ordered batch-work coordinator.
#[derive(Debug, Parser)]
#[command(name = "dispatcher-server", version, about)]
struct Cli {
    /// Input JSONL file, one record per line.
    #[arg(long)]
    infile: PathBuf,

    /// Output file results are appended to, in input order.
    #[arg(long)]
    outfile: PathBuf,

    /// Checkpoint file path.
    #[arg(long)]
    checkpoint: PathBuf,

    /// Optional TOML config file overlaying the built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind to.
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Seconds a lease may stay outstanding before it is reissued.
    #[arg(long)]
    work_timeout_secs: Option<u64>,

    /// Seconds between checkpoint writes.
    #[arg(long)]
    checkpoint_interval_secs: Option<u64>,

    /// Seconds a client should wait before retrying a `retry` response.
    #[arg(long)]
    retry: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dispatcher_common::tracing_init::init_tracing_with_default_env_filter("info");

    let mut settings: CoordinatorSettings =
        dispatcher_common::config::load(cli.config.as_deref(), "DISPATCHER_COORDINATOR_")?;
    if let Some(secs) = cli.work_timeout_secs {
        settings.work_timeout = std::time::Duration::from_secs(secs);
    }
    if let Some(secs) = cli.checkpoint_interval_secs {
        settings.checkpoint_interval = std::time::Duration::from_secs(secs);
    }
    if let Some(secs) = cli.retry {
        settings.retry_interval_secs = secs;
    }

    let coordinator = Arc::new(Coordinator::new(
        cli.infile,
        cli.outfile,
        cli.checkpoint,
        settings.work_timeout,
        settings.checkpoint_interval,
    )?);

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(server::serve(
        addr,
        coordinator,
        settings.retry_interval_secs,
        settings.completion_poll_interval,
    ))?;

    Ok(())
}
