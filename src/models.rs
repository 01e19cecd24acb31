//! Data shapes shared across the pipeline: the persisted `DeploymentRecord`
//! and the transient values that flow between subsystems.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type UtcDateTime = DateTime<Utc>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Cloning,
    Building,
    Deploying,
    Running,
    Failed,
    Stopped,
    RolledBack,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Cloning => "cloning",
            Self::Building => "building",
            Self::Deploying => "deploying",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
            Self::RolledBack => "rolled_back",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

/// One audited step of the deployment pipeline (clone, detect, build, deploy, healthcheck).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    pub name: String,
    pub status: StepStatus,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_code: Option<u16>,
    pub retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The central persisted entity: one deployment attempt, append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployment_id: String,

    pub repo_url: String,
    pub branch: String,
    pub commit_sha: String,

    pub project_type: String,

    pub image_name: String,
    pub image_tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,

    pub container_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    pub host_port: u16,
    pub container_port: u16,

    pub status: DeploymentStatus,

    pub created_at: UtcDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<UtcDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<UtcDateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_logs_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_from: Option<String>,

    #[serde(default)]
    pub steps: Vec<PipelineStep>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthCheckResult>,
}

/// One entry of `index.json`; mirrors a `DeploymentRecord` loosely enough to
/// answer "latest successful for repo" without loading every record file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub deployment_id: String,
    pub status: DeploymentStatus,
    pub repo_url: String,
    pub updated_at: UtcDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeploymentIndex {
    pub deployments: Vec<IndexEntry>,
}

/// Transient commit metadata extracted right after checkout; never persisted
/// on its own (it is folded into a `DeploymentRecord` by the orchestrator).
#[derive(Debug, Clone)]
pub struct CommitMetadata {
    pub full_sha: String,
    pub short_sha: String,
    pub branch: String,
    pub author: String,
    pub message: String,
    pub timestamp: UtcDateTime,
}
