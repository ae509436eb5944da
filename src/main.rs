//! deej - slider hardware to per-application volume

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use deej::config::ConfigWatcher;
use deej::link::{serial, SerialConnector};
use deej::notify::LogNotifier;
use deej::paths::AppPaths;
use deej::session::pulse::{PactlCommand, PulseSessionFinder};
use deej::session::TargetResolver;
use deej::{App, Backends, ConfigLoader};

/// deej - control per-application volume with physical sliders
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults to the detected config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the app-managed mapping file
    #[arg(long)]
    internal_config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Shorthand for --log-level debug
    #[arg(short, long, env = "DEEJ_DEBUG")]
    verbose: bool,

    /// Also write logs to a daily rolling file in the logs directory
    #[arg(long)]
    log_file: bool,

    /// List available serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let paths = AppPaths::detect();

    let level = if args.verbose { "debug" } else { args.log_level.as_str() };
    let _log_guard = init_logging(level, args.log_file.then_some(&paths.logs_dir))?;

    if args.list_ports {
        list_ports()?;
        return Ok(());
    }

    info!("Starting deej...");
    paths.ensure_directories()?;

    let config_path = args.config.unwrap_or_else(|| paths.config.clone());
    let internal_path = args.internal_config.unwrap_or_else(|| paths.internal_config.clone());
    info!("Configuration file: {}", config_path.display());

    let loader = ConfigLoader::new(config_path, Some(internal_path));
    let (config_watcher, initial_config) = ConfigWatcher::new(loader).await?;
    info!("Configuration loaded with hot-reload enabled: {}", initial_config.slider_mapping);

    let finder = PulseSessionFinder::connect(Arc::new(PactlCommand::default())).await?;
    let backends = Backends {
        finder: Arc::new(finder),
        connector: Arc::new(SerialConnector),
        resolver: TargetResolver::default(),
        notifier: Arc::new(LogNotifier),
    };

    let app = App::start(initial_config, backends).await?;

    run_app(app, config_watcher, shutdown_signal()).await?;

    info!("deej shutdown complete");
    Ok(())
}

async fn run_app(
    app: App,
    mut config_watcher: ConfigWatcher,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    info!("🎚️ Ready, listening for slider moves");

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(new_config) = config_watcher.next_config() => {
                info!("📝 Configuration file changed, applying");
                app.apply_config(new_config).await;
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping");
                break;
            }
        }
    }

    info!("Shutting down...");
    app.shutdown().await
}

fn list_ports() -> Result<()> {
    let ports = serial::list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for (name, kind) in ports {
        println!("{:<24} {}", name, kind);
    }
    Ok(())
}

fn init_logging(level: &str, log_dir: Option<&PathBuf>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let (file, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "deej.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
}
