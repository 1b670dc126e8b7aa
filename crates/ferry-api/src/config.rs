//! Server configuration.

use clap::Parser;
use std::net::SocketAddr;

#[derive(Debug, Clone, Parser)]
#[command(name = "ferry-server", about = "ferry CI scheduler", long_about = None)]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "FERRY_LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Keep all state in memory instead of PostgreSQL; takes precedence over
    /// `--database-url`
    #[arg(long, env = "FERRY_IN_MEMORY")]
    pub in_memory: bool,

    /// Base URL used in commit status links
    #[arg(long, env = "FERRY_PUBLIC_URL", default_value = "http://localhost:3000")]
    pub public_url: String,

    /// GitHub REST API endpoint
    #[arg(long, env = "FERRY_GITHUB_API", default_value = "https://api.github.com")]
    pub github_api: url::Url,

    /// Seconds before a code-host request is abandoned
    #[arg(long, env = "FERRY_GITHUB_TIMEOUT", default_value_t = 30)]
    pub github_timeout: u64,

    /// Status notifications held before new ones are dropped
    #[arg(long, env = "FERRY_STATUS_BUFFER", default_value_t = 1024)]
    pub status_buffer: usize,

    /// Log as JSON
    #[arg(long, env = "FERRY_LOG_JSON")]
    pub log_json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::parse_from(["ferry-server", "--in-memory"]);
        assert!(config.in_memory);
        assert_eq!(config.listen.port(), 3000);
        assert_eq!(config.status_buffer, 1024);
        assert_eq!(config.github_timeout, 30);
        assert_eq!(config.github_api.as_str(), "https://api.github.com/");
    }
}
