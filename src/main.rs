//! Azure AI chat backend entry point.

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use azureai_chat::config::Config;
use azureai_chat::identity::CredentialSelection;
use azureai_chat::metrics;
use azureai_chat::prompt::PromptTemplate;
use azureai_chat::{AppError, Application};

/// Chat-completion backend for an Azure AI Foundry project.
#[derive(Parser, Debug)]
#[command(name = "azureai-chat")]
#[command(about = "Chat-completion HTTP backend for an Azure AI Foundry project")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,

    /// Address to bind (overrides HOST).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides PORT).
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP server (default).
    Serve {
        /// Address to bind (overrides HOST).
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides PORT).
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check configuration validity.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration first so RUST_LOG from .env applies
    let config = Config::load();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("azureai_chat=debug,info")
    } else {
        let directives = config.as_ref().map(Config::log_filter).unwrap_or("info");
        EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match args.command {
        Some(Command::CheckConfig) => cmd_check_config(config),
        Some(Command::Serve { host, port }) => cmd_serve(config, host, port).await,
        None => cmd_serve(config, args.host, args.port).await,
    }
}

/// Check configuration validity.
fn cmd_check_config(config: Result<Config, AppError>) -> anyhow::Result<()> {
    println!("======================================================================");
    println!("AZURE AI CHAT BACKEND - CONFIGURATION CHECK");
    println!("======================================================================");

    // Load configuration
    print!("Loading configuration... ");
    let config = match config {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    // Check prompt template
    print!("Loading prompt template... ");
    match PromptTemplate::load_default() {
        Ok(template) => {
            println!("OK");
            if let Some(name) = &template.metadata().name {
                println!("  Template: {}", name);
            }
            match template.source() {
                Some(path) => println!("  Source: {}", path.display()),
                None => println!("  Source: bundled"),
            }
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Prompt template invalid"));
        }
    }

    // Show configuration summary
    let connection = config.connection_string()?;
    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!(
        "  Mode: {}",
        if config.is_production() { "production" } else { "development" }
    );
    println!("  Credential: {}", CredentialSelection::from_config(&config));
    println!("  Project: {}", connection.project_name);
    println!("  Project Host: {}", connection.endpoint);
    println!("  Chat Model: {}", config.chat_model());
    println!("  Listen: {}", config.bind_address());
    println!("  Static Dir: {}", config.static_dir.display());
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Start the session and serve HTTP until shutdown.
async fn cmd_serve(
    config: Result<Config, AppError>,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let mut config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    // Override with CLI args if provided
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    info!("Configuration loaded successfully");
    info!("Mode: {}", if config.is_production() { "PRODUCTION" } else { "DEVELOPMENT" });
    info!("Chat model: {}", config.chat_model());

    // Initialize metrics
    let metrics_handle = match metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Prometheus recorder unavailable: {}", e);
            None
        }
    };

    let app = Application::build(&config, metrics_handle).await.map_err(|e| {
        error!("Startup failed: {}", e);
        e
    })?;

    app.run().await?;
    info!("Server stopped");

    Ok(())
}
