//! CI/CD deployment agent — single entrypoint.
//!
//! Parses configuration, wires the orchestrator, and serves the MCP tool
//! surface over stdio. All logging goes to stderr: stdout carries the
//! JSON-RPC protocol framing.

use clap::Parser;
use mcp_cicd_agent::config::Config;
use mcp_cicd_agent::mcp_server::McpAgent;
use mcp_cicd_agent::orchestrator::Orchestrator;
use rmcp::transport::stdio;
use rmcp::ServiceExt;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, Layer};

fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    config.validate()?;
    config.ensure_directories()?;

    init_logging(&config.log_level, config.log_json);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(config))
}

async fn run(config: Config) -> anyhow::Result<()> {
    let orchestrator = Arc::new(Orchestrator::new(config)?);
    let agent = McpAgent::new(orchestrator);

    let service = agent.serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}

fn init_logging(level: &str, json: bool) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .expect("invalid RUST_LOG environment variable")
    } else {
        tracing_subscriber::EnvFilter::new(format!(
            "mcp_cicd_agent={level},reqwest=warn,h2=warn,hyper=warn,tower=warn",
            level = level.to_lowercase()
        ))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .boxed()
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
        .expect("failed to set global default subscriber");
}
