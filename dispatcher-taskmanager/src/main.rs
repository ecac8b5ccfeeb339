use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use dispatcher_taskmanager::backend::{BackendManager, HttpBackend, MockBackend};
use dispatcher_taskmanager::config::RunnerSettings;
use dispatcher_taskmanager::tasks::{compare_two_responses, echo};
use dispatcher_taskmanager::{DispatcherTaskSource, FileTaskSource, TaskFactory, TaskManager, TaskManagerConfig};

/// Runs a registered task against a task source until it is exhausted.
///
/// Rust cannot dynamically import an arbitrary module path at runtime the
/// way the original's `--task pkg.mod.Class` does, so `--task` selects
/// among a small compile-time registry instead: production deployments add
/// their own `Task`/`GeneratorFlow` implementation to this registry (or
/// build a dedicated binary linking `dispatcher-taskmanager` directly).
#[derive(Debug, Parser)]
#[command(name = "dispatcher-run", version, about)]
struct Cli {
    /// Registered task to run (see `--list-tasks`).
    #[arg(long, default_value = "echo")]
    task: String,

    /// Print the names of registered tasks and exit.
    #[arg(long, default_value_t = false)]
    list_tasks: bool,

    /// Input JSONL file (file-mode task source).
    #[arg(long, conflicts_with = "dispatcher")]
    input: Option<PathBuf>,

    /// Output JSONL file (file-mode task source).
    #[arg(long, requires = "input")]
    output: Option<PathBuf>,

    /// Coordinator address, `host:port` (dispatcher-mode task source).
    #[arg(long)]
    dispatcher: Option<String>,

    /// Optional TOML config file overlaying the built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of backend requests allowed in flight at once.
    #[arg(long)]
    workers: Option<usize>,

    /// Tasks pulled per `get_next_tasks` call.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Which backend implementation to use.
    #[arg(long, value_enum, default_value_t = BackendKind::Mock)]
    backend: BackendKind,

    /// Base URL for the HTTP backend (only used with `--backend http`).
    #[arg(long)]
    backend_url: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendKind {
    Mock,
    Http,
}

fn registry(name: &str) -> Option<TaskFactory> {
    match name {
        "echo" => Some(echo::new_echo_task),
        "compare-two-responses" => Some(compare_two_responses::new_compare_two_responses_task),
        _ => None,
    }
}

const REGISTERED_TASKS: &[&str] = &["echo", "compare-two-responses"];

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dispatcher_common::tracing_init::init_tracing_with_default_env_filter("info");

    if cli.list_tasks {
        for name in REGISTERED_TASKS {
            println!("{name}");
        }
        return Ok(());
    }

    let factory = registry(&cli.task)
        .ok_or_else(|| anyhow::anyhow!("unknown task '{}'; pass --list-tasks to see options", cli.task))?;

    let mut settings: RunnerSettings =
        dispatcher_common::config::load(cli.config.as_deref(), "DISPATCHER_RUN_")?;
    if let Some(workers) = cli.workers {
        settings.workers = workers;
    }
    if let Some(batch_size) = cli.batch_size {
        settings.batch_size = batch_size;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli, factory, settings))
}

async fn run(
    cli: Cli,
    factory: TaskFactory,
    settings: RunnerSettings,
) -> anyhow::Result<()> {
    let backend: Arc<dyn BackendManager> = match cli.backend {
        BackendKind::Mock => Arc::new(MockBackend::new()),
        BackendKind::Http => {
            let url = cli
                .backend_url
                .ok_or_else(|| anyhow::anyhow!("--backend-url is required with --backend http"))?;
            Arc::new(HttpBackend::new(url, settings.request_timeout))
        }
    };

    let manager = TaskManager::new(TaskManagerConfig {
        workers: settings.workers,
        max_active_tasks: settings.max_active_tasks,
    });

    if let Some(dispatcher) = cli.dispatcher {
        let source = DispatcherTaskSource::new(dispatcher, factory, settings.batch_size);
        manager.run(source, backend).await;
    } else {
        let input = cli
            .input
            .ok_or_else(|| anyhow::anyhow!("--input (with --output) or --dispatcher is required"))?;
        let output = cli
            .output
            .ok_or_else(|| anyhow::anyhow!("--output is required in file mode"))?;
        let source = FileTaskSource::open(&input, &output, factory, settings.batch_size)?;
        manager.run(source, backend).await;
    }

    tracing::info!("all tasks completed");
    Ok(())
}
