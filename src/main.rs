use anyhow::Context;
use clap::{Parser, Subcommand};
use pg_watermark_sync::orchestrator::select_tables;
use pg_watermark_sync::postgres::PostgresSource;
use pg_watermark_sync::sink::open_sink;
use pg_watermark_sync::store::open_store;
use pg_watermark_sync::{Config, Error, RunStatus, SyncOrchestrator};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "pg-watermark-sync")]
#[command(about = "Incremental PostgreSQL table replication", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml", global = true)]
    config: PathBuf,

    #[arg(short, long, help = "Enable JSON output for logs", global = true)]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync every configured table once (default)
    Run {
        /// Only sync these tables
        #[arg(short, long = "table", value_name = "NAME")]
        tables: Vec<String>,

        /// Exit with status 2 when some tables failed
        #[arg(long)]
        strict: bool,
    },
    /// Show the stored watermark of every configured table
    Status,
    /// Forget a table's watermark so the next run starts from its floor
    Reset {
        table: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    match run_cli(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run_cli(args: Args) -> anyhow::Result<ExitCode> {
    info!("Loading configuration from {:?}", args.config);

    let config = Config::from_file(&args.config)
        .map_err(|e| Error::Config(e.to_string()))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    config.validate()?;

    info!(
        tables = config.tables.len(),
        concurrency = config.sync.concurrency,
        default_floor = %config.sync.default_floor,
        "Configuration loaded"
    );

    match args.command.unwrap_or(Command::Run {
        tables: Vec::new(),
        strict: false,
    }) {
        Command::Run { tables, strict } => run_sync(&config, &tables, strict).await,
        Command::Status => show_status(&config).await,
        Command::Reset { table } => reset_table(&config, &table).await,
    }
}

async fn run_sync(config: &Config, only: &[String], strict: bool) -> anyhow::Result<ExitCode> {
    let tables = select_tables(&config.table_specs(), only)?;
    let store = open_store(config).await.context("failed to open watermark store")?;
    let sink = open_sink(config).context("failed to open sink")?;
    let source = Arc::new(PostgresSource::new(config.postgres_config()?));

    let orchestrator = SyncOrchestrator::new(source, sink, store, tables, config.sync_settings());

    let cancel = CancellationToken::new();
    register_shutdown_handlers(cancel.clone());

    let report = orchestrator.run(cancel).await;
    println!("{}", report);

    let code = match report.status {
        RunStatus::Succeeded => ExitCode::SUCCESS,
        RunStatus::PartiallyFailed if strict => ExitCode::from(2),
        RunStatus::PartiallyFailed => {
            warn!("Some tables failed; they will retry from their last watermark on the next run");
            ExitCode::SUCCESS
        }
        RunStatus::Failed => ExitCode::from(1),
        RunStatus::Cancelled => ExitCode::from(130),
    };
    Ok(code)
}

async fn show_status(config: &Config) -> anyhow::Result<ExitCode> {
    let store = open_store(config).await.context("failed to open watermark store")?;
    let floor = config.default_floor();

    for table in config.table_specs() {
        match store.get(&table.key()).await? {
            Some(watermark) => println!(
                "{:<32} {:<16} {:<32} updated {}",
                table.name,
                table.cursor_column,
                watermark.value.to_string(),
                watermark.updated_at.to_rfc3339()
            ),
            None => println!(
                "{:<32} {:<16} {:<32} never synced",
                table.name,
                table.cursor_column,
                format!("(floor {})", table.floor(&floor))
            ),
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn reset_table(config: &Config, name: &str) -> anyhow::Result<ExitCode> {
    let tables = select_tables(&config.table_specs(), &[name.to_string()])?;
    let store = open_store(config).await.context("failed to open watermark store")?;

    for table in tables {
        if store.delete(&table.key()).await? {
            info!(table = %table.name, cursor_column = %table.cursor_column, "Watermark reset");
        } else {
            info!(table = %table.name, "No watermark stored; nothing to reset");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn register_shutdown_handlers(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for SIGINT: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!("Failed to listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT; abandoning in-flight tables without commit"),
            _ = terminate => info!("Received SIGTERM; abandoning in-flight tables without commit"),
        }

        cancel.cancel();
    });
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("pg_watermark_sync=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("pg_watermark_sync=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
