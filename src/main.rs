//! trae-proxy - OpenAI-compatible proxy for the Trae IDE chat backend
//!
//! Accepts OpenAI chat completion requests, forwards them to the vendor
//! chat API, and answers in OpenAI format, streamed or buffered.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trae_proxy::config::Config;

#[derive(Parser)]
#[command(name = "trae-proxy")]
#[command(about = "OpenAI-compatible proxy for the Trae IDE chat backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("trae_proxy={},tower_http=info", level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Loaded before tracing is up so the configured level applies.
    let mut config = match &cli.command {
        Commands::Serve { config, .. } => Config::load(config)?,
        Commands::Check { config } => Config::from_file(config)?,
    };
    init_tracing(&config.logging.level);

    match cli.command {
        Commands::Serve { config: path, listen } => {
            tracing::info!(config = %path, "Loaded configuration");

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                config.server.listen = addr;
            }

            trae_proxy::proxy::run_server(config).await
        }

        Commands::Check { config: path } => {
            println!("Configuration OK: {}", path);
            println!("  listen:   {}", config.server.listen);
            println!("  upstream: {}", config.upstream.base_url);
            println!("  locale:   {}", config.chat.locale);
            Ok(())
        }
    }
}
