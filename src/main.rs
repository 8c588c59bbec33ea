use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use proposalgate::config::{Config, LogFormat};
use proposalgate::effects::{Effects, HttpLlmGateway, HttpRetrievalGateway};
use proposalgate::progress::ProgressHub;
use proposalgate::server;

#[derive(Parser)]
#[command(name = "proposalgate")]
#[command(version, about = "Multi-stage LLM proposal review orchestrator")]
pub struct Cli {
    /// Directory holding the job database and other durable state.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP/WS server.
    Serve {
        #[arg(long)]
        port: Option<u16>,
        /// Base URL of the LLM completion endpoint.
        #[arg(long, env = "PROPOSALGATE_LLM_ENDPOINT")]
        llm_endpoint: String,
        /// Base URL of the retrieval endpoint.
        #[arg(long, env = "PROPOSALGATE_RETRIEVAL_ENDPOINT")]
        retrieval_endpoint: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    let config = Config::new(data_dir).context("failed to load configuration")?;
    init_tracing(config.log_format);

    match cli.command {
        Commands::Serve {
            port,
            llm_endpoint,
            retrieval_endpoint,
        } => {
            let mut config = config;
            if let Some(port) = port {
                config.port = port;
            }
            let effects = Effects {
                llm: Arc::new(HttpLlmGateway::new(
                    llm_endpoint,
                    Duration::from_secs(config.llm_timeout_secs),
                )),
                retrieval: Arc::new(HttpRetrievalGateway::new(
                    retrieval_endpoint,
                    Duration::from_secs(config.retrieval_timeout_secs),
                )),
                progress: Arc::new(ProgressHub::new()),
            };
            server::start_server(config, effects).await?;
        }
    }

    Ok(())
}

fn default_data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join("proposalgate"))
        .context("could not determine a default data directory")
}

fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => fmt().json().with_env_filter(filter).init(),
        LogFormat::Pretty => fmt().with_env_filter(filter).init(),
    }
}
