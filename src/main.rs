use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use grabber::browser::chromium::ChromiumBrowser;
use grabber::config::Settings;
use grabber::execution::{print_help, ExecutionEngine};
use grabber::logger::Logger;
use grabber::{loader, server, ActionRegistry};

#[derive(Parser, Debug)]
#[command(
    name = "grabber",
    version,
    about = "Run declarative web automation recipes",
    disable_help_flag = true
)]
struct Cli {
    /// Grab to run; all grabs run when omitted
    grab: Option<String>,
    /// List grabs with their description instead of running them
    #[arg(long)]
    help: bool,
    /// Start the HTTP service
    #[arg(long)]
    server: bool,
    /// Verbose logs
    #[arg(short, long)]
    verbose: bool,
    /// Directory holding the recipes
    #[arg(long, env = "GRABS_DIR")]
    grabs_dir: Option<PathBuf>,
    /// Root directory for files produced by grabs
    #[arg(long, env = "RESOURCES_DIR")]
    resources_dir: Option<PathBuf>,
    /// Show the browser window
    #[arg(long)]
    headful: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("LOG_LEVEL").unwrap_or_else(|_| filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut settings = Settings::from_env();
    if let Some(dir) = cli.grabs_dir.clone() {
        settings.grabs_dir = dir;
    }
    if let Some(dir) = cli.resources_dir.clone() {
        settings.resources_dir = dir;
    }
    settings.headless = !cli.headful;

    let registry = ActionRegistry::with_builtins().context("Failed to register actions")?;
    let logger = Logger::new();

    if cli.server {
        let engine = start_engine(registry, settings, logger).await?;
        return server::serve(engine).await;
    }

    let grabs = match loader::load_grabs(&settings.grabs_dir, &registry)
        .await
        .and_then(|grabs| loader::select(grabs, cli.grab.as_deref()))
    {
        Ok(grabs) => grabs,
        Err(e) => {
            logger.error(None, &e.to_string());
            std::process::exit(1);
        }
    };
    logger.banner("Grab configs loaded");

    if cli.help {
        print_help(&logger, &grabs, None);
        return Ok(());
    }

    let engine = start_engine(registry, settings, logger).await?;
    let outcome = engine.run(&grabs, None, None).await;
    engine
        .browser()
        .close()
        .await
        .context("Failed to close the browser")?;
    engine.logger().banner("Grabber closed");

    if outcome.is_err() {
        std::process::exit(1);
    }
    Ok(())
}

async fn start_engine(registry: ActionRegistry, settings: Settings, logger: Logger) -> Result<Arc<ExecutionEngine>> {
    let browser = ChromiumBrowser::launch(&settings)
        .await
        .context("Failed to start the browser")?;
    let engine = ExecutionEngine::new(registry, Arc::new(browser), settings).with_logger(logger);
    engine.logger().banner("Grabber initialized");
    Ok(Arc::new(engine))
}
