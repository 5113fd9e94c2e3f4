use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub db_pool_size: u32,
    pub api_host: String,
    pub api_port: u16,
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub request_timeout_seconds: u64,
    pub sse_keep_alive_seconds: u64,
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./data/chatline.db"),
            db_pool_size: 8,
            api_host: "127.0.0.1".into(),
            api_port: 8000,
            llm_base_url: "http://127.0.0.1:8081".into(),
            llm_api_key: None,
            llm_model: "gpt-4o-mini".into(),
            request_timeout_seconds: 600,
            sse_keep_alive_seconds: 15,
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Loads `.env` if present, then reads the process environment
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset keys take their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let text = |key: &str, default: String| -> String {
            lookup(key).filter(|v| !v.trim().is_empty()).unwrap_or(default)
        };

        Ok(Self {
            database_path: PathBuf::from(text(
                "DATABASE_PATH",
                defaults.database_path.display().to_string(),
            )),
            db_pool_size: parse_var(&lookup, "DB_POOL_SIZE", defaults.db_pool_size)?,
            api_host: text("API_HOST", defaults.api_host),
            api_port: parse_var(&lookup, "API_PORT", defaults.api_port)?,
            llm_base_url: text("LLM_BASE_URL", defaults.llm_base_url),
            llm_api_key: lookup("LLM_API_KEY").filter(|v| !v.trim().is_empty()),
            llm_model: text("LLM_MODEL", defaults.llm_model),
            request_timeout_seconds: parse_positive(
                &lookup,
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            )?,
            sse_keep_alive_seconds: parse_positive(
                &lookup,
                "SSE_KEEP_ALIVE_SECONDS",
                defaults.sse_keep_alive_seconds,
            )?,
            max_body_bytes: parse_var(&lookup, "MAX_BODY_BYTES", defaults.max_body_bytes)?,
        })
    }

    /// Resolves `API_HOST`, which may be an IP address or a host name
    pub async fn api_addr(&self) -> Result<SocketAddr> {
        tokio::net::lookup_host((self.api_host.as_str(), self.api_port))
            .await
            .with_context(|| format!("Invalid API address {}:{}", self.api_host, self.api_port))?
            .next()
            .with_context(|| format!("API host {} resolved to no address", self.api_host))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn sse_keep_alive(&self) -> Duration {
        Duration::from_secs(self.sse_keep_alive_seconds)
    }

    pub fn print_config(&self) {
        info!("Configuration:");
        info!("  Database: {} (pool size {})", self.database_path.display(), self.db_pool_size);
        info!("  API: {}:{}", self.api_host, self.api_port);
        info!("  LLM backend: {} (model {})", self.llm_base_url, self.llm_model);
        info!(
            "  LLM API key: {}",
            if self.llm_api_key.is_some() { "********" } else { "<none>" }
        );
        info!(
            "  Request timeout: {}s, SSE keep-alive: {}s, body limit: {} bytes",
            self.request_timeout_seconds, self.sse_keep_alive_seconds, self.max_body_bytes
        );
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: '{}'", key, raw)),
        _ => Ok(default),
    }
}

fn parse_positive<F>(lookup: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse_var(lookup, key, default)?;
    if value == 0 {
        anyhow::bail!("{} must be greater than zero", key);
    }
    Ok(value)
}
