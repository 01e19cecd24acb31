//! Process configuration: CLI flags with `MCP_`-prefixed environment
//! fallbacks, mirroring the field set and defaults of the original daemon's
//! settings module.

use crate::error::AgentError;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "MCP server for CI/CD deployment automation", long_about = None)]
pub struct Config {
    /// Name advertised to MCP clients during initialize
    #[arg(long, default_value = "mcp-cicd-agent", env = "MCP_SERVER_NAME")]
    pub server_name: String,

    /// Root directory repositories are cloned into
    #[arg(long, default_value = "./workspace", env = "MCP_WORKSPACE_DIR")]
    pub workspace_dir: PathBuf,

    /// Root directory deployment records are persisted under
    #[arg(long, default_value = "./deployments", env = "MCP_DEPLOYMENT_DIR")]
    pub deployment_dir: PathBuf,

    /// Root directory build logs are written under
    #[arg(long, default_value = "./logs", env = "MCP_LOG_DIR")]
    pub log_dir: PathBuf,

    /// Log verbosity: trace, debug, info, warn, error
    #[arg(long, default_value = "info", env = "MCP_LOG_LEVEL")]
    pub log_level: String,

    /// Emit logs as JSON lines instead of compact text
    #[arg(long, default_value_t = true, env = "MCP_LOG_JSON")]
    pub log_json: bool,

    /// MCP transport to serve over; only `stdio` is supported
    #[arg(long, default_value = "stdio", env = "MCP_TRANSPORT")]
    pub transport: String,

    /// Lowest host port this agent is allowed to allocate
    #[arg(long, default_value_t = 8000, env = "MCP_PORT_RANGE_START")]
    pub port_range_start: u16,

    /// Highest host port this agent is allowed to allocate
    #[arg(long, default_value_t = 9000, env = "MCP_PORT_RANGE_END")]
    pub port_range_end: u16,

    /// Default container memory limit, Docker-style suffix (e.g. 512m)
    #[arg(long, default_value = "512m", env = "MCP_CONTAINER_MEMORY_LIMIT")]
    pub container_memory_limit: String,

    /// Health check overall deadline, in seconds
    #[arg(long, default_value_t = 30, env = "MCP_HEALTH_CHECK_TIMEOUT")]
    pub health_check_timeout: u64,

    /// Comma-separated allowlist of Git hostnames; empty disables the check
    #[arg(
        long,
        default_value = "github.com,gitlab.com",
        env = "MCP_ALLOWED_GIT_HOSTS",
        value_delimiter = ','
    )]
    pub allowed_git_hosts: Vec<String>,

    /// Personal access token for authenticated Git operations
    #[arg(long, env = "MCP_GITHUB_TOKEN")]
    pub github_token: Option<String>,
}

impl Config {
    /// Fail fast on values that parsed syntactically but aren't valid:
    /// log level, and port range ordering/bounds.
    pub fn validate(&self) -> Result<(), AgentError> {
        const VALID_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
        if !VALID_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(AgentError::configuration_error(
                format!("Invalid log level: {}", self.log_level),
                serde_json::json!({ "log_level": self.log_level, "valid": VALID_LEVELS }),
            ));
        }

        if self.transport != "stdio" {
            return Err(AgentError::configuration_error(
                format!("Unsupported MCP transport: {}", self.transport),
                serde_json::json!({ "transport": self.transport, "valid": ["stdio"] }),
            ));
        }

        if !(1024..=65535).contains(&self.port_range_start) || !(1024..=65535).contains(&self.port_range_end) {
            return Err(AgentError::configuration_error(
                "Port range must fall within 1024-65535",
                serde_json::json!({
                    "port_range_start": self.port_range_start,
                    "port_range_end": self.port_range_end,
                }),
            ));
        }

        if self.port_range_start > self.port_range_end {
            return Err(AgentError::configuration_error(
                "port_range_start must not exceed port_range_end",
                serde_json::json!({
                    "port_range_start": self.port_range_start,
                    "port_range_end": self.port_range_end,
                }),
            ));
        }

        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<(), AgentError> {
        for dir in [&self.workspace_dir, &self.deployment_dir, &self.log_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Memory limit converted to bytes-equivalent megabytes for the Docker
    /// driver, understanding the `k`/`m`/`g` suffixes Docker itself accepts.
    pub fn memory_limit_mb(&self) -> u64 {
        let s = self.container_memory_limit.to_lowercase();
        let (digits, suffix) = s.split_at(s.len().saturating_sub(1));
        match digits.parse::<u64>() {
            Ok(n) => match suffix {
                "g" => n * 1024,
                "k" => n / 1024,
                "m" => n,
                _ => s.parse().unwrap_or(512),
            },
            Err(_) => 512,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            server_name: "mcp-cicd-agent".into(),
            workspace_dir: "./workspace".into(),
            deployment_dir: "./deployments".into(),
            log_dir: "./logs".into(),
            log_level: "info".into(),
            log_json: true,
            transport: "stdio".into(),
            port_range_start: 8000,
            port_range_end: 9000,
            container_memory_limit: "512m".into(),
            health_check_timeout: 30,
            allowed_git_hosts: vec!["github.com".into()],
            github_token: None,
        }
    }

    #[test]
    fn rejects_invalid_log_level() {
        let mut config = base_config();
        config.log_level = "verbose".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unsupported_transport() {
        let mut config = base_config();
        config.transport = "sse".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_port_range() {
        let mut config = base_config();
        config.port_range_start = 9000;
        config.port_range_end = 8000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_memory_limit_suffixes() {
        let mut config = base_config();
        config.container_memory_limit = "1g".into();
        assert_eq!(config.memory_limit_mb(), 1024);
        config.container_memory_limit = "256m".into();
        assert_eq!(config.memory_limit_mb(), 256);
    }
}
