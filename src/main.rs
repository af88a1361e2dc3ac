use hark::{config::Config, server::HarkServer, LogSink};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking;

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

#[derive(Parser)]
#[command(name = "hark")]
#[command(about = "TCP listener that reports its lifecycle and nothing else")]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Bind address, overrides the configuration file
    #[arg(short, long)]
    bind: Option<String>,
}

fn init_logging() {
    let (non_blocking_writer, guard) = non_blocking(std::io::stderr());
    // Keep guard alive for the program lifetime to avoid log loss
    let _ = LOG_GUARD.set(guard);

    let fmt = tracing_subscriber::fmt()
        .with_writer(non_blocking_writer)
        .with_ansi(true)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_level(true)
        .compact();

    let level = match std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    let _ = fmt.with_max_level(level).try_init();
}

async fn load_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => Config::from_yaml_file(path).await?,
        None => Config::default(),
    };
    match &args.bind {
        Some(bind) => Ok(config.with_bind(bind.clone())?),
        None => Ok(config),
    }
}

/// Run the listener until `shutdown` resolves.
///
/// A failed bind is reported and the process keeps waiting for shutdown.
async fn run_with_config_and_shutdown(
    config: Config,
    shutdown: impl std::future::Future<Output = ()> + Send,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut server = HarkServer::new(&config, Arc::new(LogSink));
    let handle = match server.start() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Listener not started ({}), waiting for shutdown", e);
            None
        }
    };

    shutdown.await;
    info!("Shutdown signal received");

    if let Some(handle) = handle {
        handle.close().await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let args = Args::parse();
    info!("Starting hark");
    let config = load_config(&args).await?;
    run_with_config_and_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;
    info!("hark stopped");
    Ok(())
}
