//! Easy Mock Server - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use easy_mock_server::proxy::HttpUpstream;
use easy_mock_server::{server, Dispatcher, MockServerConfig, RouteRegistry, TemplateEngine};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "easy-mock-server",
    about = "Filesystem-routed HTTP mock server with randomized JSON templates",
    version
)]
struct Args {
    /// Path to configuration file [default: mock-server.yaml, then config.json]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Resources directory (overrides the configuration file)
    #[arg(short, long)]
    resources: Option<PathBuf>,

    /// Port to listen on (overrides the configuration file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Reload routes when the resources directory changes
    #[arg(long)]
    watch: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        print!("{}", serde_yaml::to_string(&MockServerConfig::default())?);
        return Ok(());
    }

    // Load configuration
    let config_path = MockServerConfig::locate(args.config.as_deref(), Path::new("."));
    let mut config = match config_path {
        Some(path) if path.exists() => {
            info!(path = ?path, "Loading configuration");
            MockServerConfig::from_file(&path)?
        }
        Some(path) if args.validate => {
            anyhow::bail!("Configuration file not found: {:?}", path);
        }
        _ => {
            info!("Using default configuration");
            MockServerConfig::default()
        }
    };
    if let Some(resources) = args.resources {
        config.resources_path = resources;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.watch {
        config.settings.watch = true;
    }
    config.validate()?;

    let routes = Arc::new(RouteRegistry::load(&config.resources_path)?);

    if args.validate {
        println!(
            "Configuration is valid ({} routes under {})",
            routes.table().len(),
            config.resources_path.display()
        );
        return Ok(());
    }

    let upstream = HttpUpstream::new(Duration::from_millis(config.proxy.timeout_ms))?;
    let dispatcher = Dispatcher::new(
        routes,
        TemplateEngine::new(),
        Arc::new(upstream),
        config.settings.clone(),
    );

    info!(
        port = config.port,
        resources = %config.resources_path.display(),
        "Starting mock server"
    );
    server::serve(&config, Arc::new(dispatcher)).await
}
