use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use tracing::info;

use telemetry_intake::codec;
use telemetry_intake::config::Config;
use telemetry_intake::logging;
use telemetry_intake::observability;
use telemetry_intake::server::{self, AppState};

#[derive(Parser)]
#[command(name = "telemetry_intake")]
#[command(about = "Client telemetry intake service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP intake server (default)
    Serve {
        /// Port to listen on; overrides PORT
        #[arg(long)]
        port: Option<u16>,
    },
    /// Obfuscate text into a token (reads stdin when TEXT is omitted)
    Encode {
        #[arg(long)]
        key: String,
        text: Option<String>,
    },
    /// Recover the text behind a token
    Decode {
        /// Omit for plain base64 tokens
        #[arg(long)]
        key: Option<String>,
        token: String,
    },
}

async fn serve(port: Option<u16>) -> Result<()> {
    let _guard = logging::init_logging();

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(port) = port {
        config.port = port;
    }
    info!(
        port = config.port,
        rate_limit_max = config.rate_limit_max,
        store = ?config.store,
        "Starting telemetry intake"
    );

    observability::init(config.metrics_port);
    let state = AppState::from_config(&config).context("Failed to build application state")?;
    server::start_server(state, config.port).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => serve(port).await?,
        Commands::Encode { key, text } => {
            let text = match text {
                Some(text) => text,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("Failed to read stdin")?;
                    buf.trim_end_matches(&['\r', '\n'][..]).to_string()
                }
            };
            println!("{}", codec::encode(&text, &key));
        }
        Commands::Decode { key, token } => {
            let text = codec::decode(&token, key.as_deref()).context("Failed to decode token")?;
            println!("{text}");
        }
    }
    Ok(())
}
