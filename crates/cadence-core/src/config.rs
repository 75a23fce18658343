use anyhow::{Context, Result};
use chrono_tz::Tz;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Port the task status server listens on.
    pub http_port: u16,
    /// Time zone the scheduler computes firing times in.
    pub timezone: Tz,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            http_port: std::env::var("HTTP_PORT")
                .unwrap_or_else(|_| "8081".to_string())
                .parse()
                .context("HTTP_PORT must be a valid port number")?,
            timezone: std::env::var("CADENCE_TZ")
                .unwrap_or_else(|_| "UTC".to_string())
                .parse()
                .map_err(|e| anyhow::anyhow!("CADENCE_TZ must be an IANA timezone: {}", e))?,
        })
    }
}
