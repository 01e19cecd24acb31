//! MCP tool-router wiring: exposes the orchestrator's eight operations as
//! named tools over the stdio JSON-RPC protocol.

use crate::orchestrator::{DeployContainerArgs, Orchestrator};
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo};
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct McpAgent {
    orchestrator: Arc<Orchestrator>,
    tool_router: ToolRouter<McpAgent>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PrepareRepoArgs {
    /// Git repository URL (https://, http://, or git@host:path)
    pub repo_url: String,
    /// Branch, tag, or commit SHA to checkout
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DetectProjectTypeArgs {
    /// Filesystem path to the cloned repository
    pub repo_path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BuildImageArgs {
    /// Build context path (directory containing the Dockerfile)
    pub path: String,
    /// Image tag in `name:version` form
    pub image_tag: String,
    /// Dockerfile name, relative to `path`
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,
    /// Optional build arguments
    pub build_args: Option<std::collections::HashMap<String, String>>,
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct HealthcheckArgs {
    /// URL to poll
    pub url: String,
    /// Overall deadline, in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Initial interval between attempts, in seconds
    #[serde(default = "default_interval")]
    pub interval: f64,
    /// Multiplier applied to the interval after each attempt
    #[serde(default = "default_backoff")]
    pub backoff: f64,
    /// HTTP status code considered healthy
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
}

fn default_timeout() -> u64 {
    30
}
fn default_interval() -> f64 {
    2.0
}
fn default_backoff() -> f64 {
    1.5
}
fn default_expected_status() -> u16 {
    200
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetLogsArgs {
    /// Container to fetch logs from
    pub container_name: String,
    /// Number of log lines to retrieve (clamped to [1, 1000])
    #[serde(default = "default_tail")]
    pub tail: u32,
}

fn default_tail() -> u32 {
    100
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StopDeploymentArgs {
    /// Container to stop and remove
    pub container_name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RollbackArgs {
    /// ID of the failed deployment to roll back from
    pub deployment_id: Option<String>,
    /// Repository URL, as an alternative to `deployment_id`
    pub repo_url: Option<String>,
}

fn json_result<T: serde::Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error("failed to serialize tool result", Some(json!({ "error": e.to_string() }))))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn agent_error_to_mcp(e: crate::error::AgentError) -> McpError {
    McpError::internal_error(e.to_string(), Some(e.context()))
}

#[tool_router]
impl McpAgent {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator, tool_router: Self::tool_router() }
    }

    #[tool(description = "Clone or update a Git repository and check out the requested ref")]
    async fn prepare_repo(
        &self,
        Parameters(args): Parameters<PrepareRepoArgs>,
    ) -> Result<CallToolResult, McpError> {
        let result = self
            .orchestrator
            .prepare_repo(&args.repo_url, &args.branch)
            .await
            .map_err(agent_error_to_mcp)?;
        json_result(&result)
    }

    #[tool(description = "Detect project/build type from marker files in a working tree")]
    async fn detect_project_type(
        &self,
        Parameters(args): Parameters<DetectProjectTypeArgs>,
    ) -> Result<CallToolResult, McpError> {
        let result = self
            .orchestrator
            .detect_project_type(&args.repo_path)
            .map_err(agent_error_to_mcp)?;
        json_result(&result)
    }

    #[tool(description = "Build a Docker image from a build context, capturing build logs")]
    async fn build_image(
        &self,
        Parameters(args): Parameters<BuildImageArgs>,
    ) -> Result<CallToolResult, McpError> {
        let result = self
            .orchestrator
            .build_image(&args.path, &args.image_tag, &args.dockerfile, args.build_args)
            .await
            .map_err(agent_error_to_mcp)?;
        json_result(&result)
    }

    #[tool(description = "Deploy a container from an image with port-conflict resolution and security hardening")]
    async fn deploy_container(
        &self,
        Parameters(args): Parameters<DeployContainerArgs>,
    ) -> Result<CallToolResult, McpError> {
        let result = self
            .orchestrator
            .deploy_container(args)
            .await
            .map_err(agent_error_to_mcp)?;
        json_result(&result)
    }

    #[tool(description = "Poll an HTTP endpoint with bounded exponential backoff until it reports healthy")]
    async fn healthcheck(
        &self,
        Parameters(args): Parameters<HealthcheckArgs>,
    ) -> Result<CallToolResult, McpError> {
        let result = self
            .orchestrator
            .healthcheck(&args.url, args.timeout, args.interval, args.backoff, args.expected_status)
            .await
            .map_err(agent_error_to_mcp)?;
        json_result(&result)
    }

    #[tool(description = "Retrieve the most recent log lines from a container")]
    async fn get_logs(
        &self,
        Parameters(args): Parameters<GetLogsArgs>,
    ) -> Result<CallToolResult, McpError> {
        let result = self
            .orchestrator
            .get_logs(&args.container_name, args.tail)
            .await
            .map_err(agent_error_to_mcp)?;
        json_result(&result)
    }

    #[tool(description = "Gracefully stop and remove a running deployment container")]
    async fn stop_deployment(
        &self,
        Parameters(args): Parameters<StopDeploymentArgs>,
    ) -> Result<CallToolResult, McpError> {
        let result = self
            .orchestrator
            .stop_deployment(&args.container_name)
            .await
            .map_err(agent_error_to_mcp)?;
        json_result(&result)
    }

    #[tool(description = "Roll back to the previous successful deployment, preserving audit history")]
    async fn rollback(
        &self,
        Parameters(args): Parameters<RollbackArgs>,
    ) -> Result<CallToolResult, McpError> {
        let result = self
            .orchestrator
            .rollback(args.deployment_id.as_deref(), args.repo_url.as_deref())
            .await
            .map_err(agent_error_to_mcp)?;
        json_result(&result)
    }
}

#[tool_handler]
impl ServerHandler for McpAgent {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "mcp-cicd-agent".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("CI/CD Deployment Agent".to_string()),
                website_url: None,
                icons: None,
            },
            instructions: Some(
                "Deploys a Git repository to a local Docker container: prepare_repo, \
                 detect_project_type, build_image, deploy_container, healthcheck, get_logs, \
                 stop_deployment, rollback."
                    .to_string(),
            ),
        }
    }
}
