//! Runtime configuration for the review orchestrator.
//!
//! Resolved once at startup from (in ascending precedence) built-in
//! defaults, an optional config file, and environment variable overrides.

use anyhow::{Context, Result};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub listen_addr: String,
    pub port: u16,
    pub llm_timeout_secs: u64,
    pub retrieval_timeout_secs: u64,
    pub feedback_timeout_secs: u64,
    pub retrieval_k: usize,
    pub prompt_truncate_chars: usize,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    /// Build configuration from defaults overridden by environment variables.
    ///
    /// `data_dir` anchors the database file; it is created if missing.
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        let data_dir = if data_dir.exists() {
            data_dir.canonicalize().context("failed to resolve data directory")?
        } else {
            std::fs::create_dir_all(&data_dir).context("failed to create data directory")?;
            data_dir.canonicalize().context("failed to resolve data directory")?
        };

        let db_path = std::env::var("PROPOSALGATE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("jobs.db"));

        let port = std::env::var("PROPOSALGATE_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let log_format = match std::env::var("PROPOSALGATE_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            data_dir,
            db_path,
            listen_addr: std::env::var("PROPOSALGATE_LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            llm_timeout_secs: env_u64("PROPOSALGATE_LLM_TIMEOUT_SECS", 60),
            retrieval_timeout_secs: env_u64("PROPOSALGATE_RETRIEVAL_TIMEOUT_SECS", 15),
            feedback_timeout_secs: env_u64("PROPOSALGATE_FEEDBACK_TIMEOUT_SECS", 30 * 60),
            retrieval_k: env_u64("PROPOSALGATE_RETRIEVAL_K", 5) as usize,
            prompt_truncate_chars: env_u64("PROPOSALGATE_PROMPT_TRUNCATE_CHARS", 800) as usize,
            log_format,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir).context("failed to create data directory")?;
        Ok(())
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
