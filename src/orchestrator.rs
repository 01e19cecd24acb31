//! Tool surface: the eight operations a caller invokes, each validating its
//! own arguments and wiring the lower-level subsystems together.

use crate::config::Config;
use crate::container_driver::{BuildRequest, DeployRequest, DockerDriver};
use crate::detector::{self, DetectionResult};
use crate::error::{AgentError, AgentResult};
use crate::git_driver::{self, WorkspaceManager};
use crate::health;
use crate::models::{
    DeploymentRecord, DeploymentStatus, HealthCheckResult, HealthStatus, IndexEntry,
};
use crate::port_allocator;
use crate::state_store::StateStore;
use crate::validation;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

pub struct Orchestrator {
    config: Config,
    workspace: WorkspaceManager,
    docker: DockerDriver,
    state: Arc<StateStore>,
}

#[derive(Debug, Serialize)]
pub struct PrepareRepoResult {
    pub workspace_path: String,
    pub commit_sha: String,
    pub short_sha: String,
    pub branch: String,
    pub author: String,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct BuildImageResult {
    pub image_id: String,
    pub image_tag: String,
    pub build_time_seconds: f64,
    pub build_logs: Vec<String>,
    pub size_bytes: u64,
    pub size_mb: f64,
}

#[derive(Debug, Clone, Deserialize, Default, schemars::JsonSchema)]
pub struct DeployContainerArgs {
    /// Docker image to deploy, e.g. `myapp:v1.0`
    pub image_tag: String,
    /// Unique container name (alphanumeric, hyphens, underscores)
    pub container_name: String,
    /// Host port to bind to; auto-assigned from the configured range if omitted
    pub host_port: Option<u16>,
    /// Container-internal port (default 8000)
    pub container_port: Option<u16>,
    /// Optional environment variables
    pub env_vars: Option<HashMap<String, String>>,
    /// Git repository URL, used for state tracking and rollback
    pub repo_url: Option<String>,
    /// Git branch or ref that was deployed
    pub branch: Option<String>,
    /// Full commit SHA of the deployed code
    pub commit_sha: Option<String>,
    /// Detected project type
    pub project_type: Option<String>,
    /// Optional caller-supplied deployment ID; auto-generated otherwise
    pub deployment_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeployContainerResult {
    pub deployment_id: String,
    pub container_id: String,
    pub container_name: String,
    pub host_port: u16,
    pub container_port: u16,
    pub url: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct GetLogsResult {
    pub container_name: String,
    pub logs: String,
    pub lines_returned: usize,
}

#[derive(Debug, Serialize)]
pub struct StopDeploymentResult {
    pub container_name: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct RollbackResult {
    pub rollback_deployment_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_deployment_id: Option<String>,
    pub previous_deployment_id: String,
    pub container_name: String,
    pub container_id: String,
    pub host_port: u16,
    pub url: String,
    pub commit_sha: String,
    pub short_sha: String,
    pub message: String,
}

impl Orchestrator {
    pub fn new(config: Config) -> AgentResult<Self> {
        let workspace = WorkspaceManager::new(&config.workspace_dir)?;
        let docker = DockerDriver::connect()?;
        let state = Arc::new(StateStore::new(&config.deployment_dir)?);
        Ok(Self { config, workspace, docker, state })
    }

    pub async fn prepare_repo(
        &self,
        repo_url: &str,
        branch: &str,
    ) -> AgentResult<PrepareRepoResult> {
        info!(repo_url, branch, "prepare_repo started");

        let result = git_driver::prepare_repository(
            repo_url,
            &self.workspace,
            branch,
            &self.config.allowed_git_hosts,
        )
        .await;

        match result {
            Ok((path, meta)) => {
                info!(workspace = %path.display(), commit = %meta.short_sha, "prepare_repo completed");
                Ok(PrepareRepoResult {
                    workspace_path: path.display().to_string(),
                    commit_sha: meta.full_sha,
                    short_sha: meta.short_sha,
                    branch: meta.branch,
                    author: meta.author,
                    message: meta.message,
                    timestamp: meta.timestamp.to_rfc3339(),
                })
            }
            Err(e) => {
                error!(repo_url, error = %e, context = %e.context(), "prepare_repo failed");
                Err(e)
            }
        }
    }

    pub fn detect_project_type(&self, repo_path: &str) -> AgentResult<DetectionResult> {
        info!(repo_path, "detect_project_type started");
        let result = detector::detect_project_type(std::path::Path::new(repo_path));
        match &result {
            Ok(r) => info!(project_type = %r.project_type, repo_path, "detect_project_type completed"),
            Err(e) => error!(repo_path, error = %e, "detect_project_type failed"),
        }
        result
    }

    pub async fn build_image(
        &self,
        path: &str,
        image_tag: &str,
        dockerfile: &str,
        build_args: Option<HashMap<String, String>>,
    ) -> AgentResult<BuildImageResult> {
        info!(image_tag, path, dockerfile, "build_image started");

        let validated_tag = validation::validate_image_tag(image_tag)?;
        let build_path = std::path::Path::new(path);
        if !build_path.exists() {
            return Err(AgentError::validation(
                format!("Build path does not exist: {path}"),
                serde_json::json!({ "path": path }),
            ));
        }
        let dockerfile_abs = validation::validate_dockerfile_path(dockerfile, build_path)?;
        let dockerfile_relative = dockerfile_abs
            .strip_prefix(build_path.canonicalize()?)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| dockerfile.to_string());

        let log_path = self
            .config
            .log_dir
            .join(format!("{}.log", validated_tag.replace([':', '/'], "_")));

        let start = std::time::Instant::now();
        let result = self
            .docker
            .build_image(BuildRequest {
                context_path: build_path.to_path_buf(),
                dockerfile_relative,
                image_tag: validated_tag.clone(),
                build_args: build_args.unwrap_or_default(),
                log_path,
            })
            .await;

        match result {
            Ok(built) => {
                info!(image_id = %built.image_id, tag = %validated_tag, "build_image completed");
                Ok(BuildImageResult {
                    image_id: built.image_id,
                    image_tag: built.image_tag,
                    build_time_seconds: start.elapsed().as_secs_f64(),
                    build_logs: built.build_logs,
                    size_bytes: built.size_bytes,
                    size_mb: built.size_bytes as f64 / (1024.0 * 1024.0),
                })
            }
            Err(e) => {
                error!(image_tag, path, error = %e, "build_image failed");
                Err(e)
            }
        }
    }

    pub async fn deploy_container(
        &self,
        args: DeployContainerArgs,
    ) -> AgentResult<DeployContainerResult> {
        info!(
            image_tag = %args.image_tag,
            container_name = %args.container_name,
            host_port = ?args.host_port,
            "deploy_container started"
        );

        let result = self.deploy_container_inner(args.clone()).await;
        match &result {
            Ok(r) => info!(
                deployment_id = %r.deployment_id,
                container_id = %r.container_id,
                "deploy_container completed"
            ),
            Err(e) => error!(
                image_tag = %args.image_tag,
                container_name = %args.container_name,
                error = %e,
                "deploy_container failed"
            ),
        }
        result
    }

    async fn deploy_container_inner(
        &self,
        args: DeployContainerArgs,
    ) -> AgentResult<DeployContainerResult> {
        let validated_tag = validation::validate_image_tag(&args.image_tag)?;
        let validated_name = validation::validate_container_name(&args.container_name)?;
        let container_port =
            validation::validate_port(args.container_port.unwrap_or(8000) as u32, 1, 65535)?;

        let host_port = match args.host_port {
            None => {
                let port = port_allocator::find_available_port(
                    self.config.port_range_start,
                    self.config.port_range_end,
                )?;
                info!(port, "auto_assigned_port");
                port
            }
            Some(p) => {
                let p = validation::validate_port(p as u32, 1024, 65535)?;
                if !port_allocator::is_port_available(p) {
                    return Err(AgentError::port_conflict(
                        format!("Port {p} is already in use"),
                        serde_json::json!({ "port": p }),
                    ));
                }
                p
            }
        };

        let env_vars = match args.env_vars {
            Some(env) => validation::sanitize_environment_variables(&env)?,
            None => HashMap::new(),
        };

        let deploy_result = self
            .docker
            .deploy_container(DeployRequest {
                container_name: validated_name.clone(),
                image_tag: validated_tag.clone(),
                host_port,
                container_port,
                env_vars,
                memory_limit_mb: self.config.memory_limit_mb(),
            })
            .await?;

        let now = Utc::now();
        let dep_id = args.deployment_id.unwrap_or_else(|| {
            format!("dep-{}-{}", now.format("%Y%m%d%H%M%S"), validated_name)
        });
        let image_name = validated_tag.split(':').next().unwrap_or(&validated_tag).to_string();

        let record = DeploymentRecord {
            deployment_id: dep_id.clone(),
            repo_url: args.repo_url.unwrap_or_else(|| "unknown".to_string()),
            branch: args.branch.unwrap_or_else(|| "unknown".to_string()),
            commit_sha: args.commit_sha.unwrap_or_else(|| "unknown".to_string()),
            project_type: args.project_type.unwrap_or_else(|| "docker".to_string()),
            image_name,
            image_tag: validated_tag,
            image_id: None,
            container_name: validated_name.clone(),
            container_id: Some(deploy_result.container_id.clone()),
            host_port,
            container_port,
            status: DeploymentStatus::Running,
            created_at: now,
            started_at: Some(now),
            completed_at: Some(now),
            build_logs_path: None,
            error: None,
            rollback_from: None,
            steps: Vec::new(),
            healthcheck: None,
        };
        self.state.save(&record)?;

        Ok(DeployContainerResult {
            deployment_id: dep_id,
            container_id: deploy_result.container_id,
            container_name: validated_name,
            host_port,
            container_port,
            url: format!("http://localhost:{host_port}"),
            status: "running".to_string(),
        })
    }

    pub async fn healthcheck(
        &self,
        url: &str,
        timeout_s: u64,
        interval_s: f64,
        backoff: f64,
        expected_status: u16,
    ) -> AgentResult<HealthCheckResult> {
        info!(url, "healthcheck started");
        let result = health::healthcheck(
            url,
            std::time::Duration::from_secs(timeout_s),
            std::time::Duration::from_secs_f64(interval_s),
            backoff,
            expected_status,
        )
        .await;
        match result.status {
            HealthStatus::Healthy => {
                info!(url, "healthcheck completed");
                Ok(result)
            }
            HealthStatus::Unhealthy => {
                error!(url, error = ?result.error, "healthcheck failed");
                let last_error = result.error.clone().unwrap_or_else(|| "timeout reached".to_string());
                Err(AgentError::health_check_error(
                    format!("Health check for {url} did not succeed: {last_error}"),
                    serde_json::json!({
                        "url": url,
                        "attempts": result.retries + 1,
                        "elapsed_seconds": timeout_s,
                        "last_error": last_error,
                    }),
                ))
            }
        }
    }

    pub async fn get_logs(&self, container_name: &str, tail: u32) -> AgentResult<GetLogsResult> {
        info!(container_name, tail, "get_logs started");
        let validated_name = validation::validate_container_name(container_name)?;
        let logs = self.docker.get_logs(&validated_name, tail).await;
        match logs {
            Ok(logs) => {
                let lines_returned = logs.lines().count();
                info!(container_name = %validated_name, lines_returned, "get_logs completed");
                Ok(GetLogsResult { container_name: validated_name, logs, lines_returned })
            }
            Err(e) => {
                error!(container_name, error = %e, "get_logs failed");
                Err(e)
            }
        }
    }

    pub async fn stop_deployment(&self, container_name: &str) -> AgentResult<StopDeploymentResult> {
        info!(container_name, "stop_deployment started");
        let validated_name = validation::validate_container_name(container_name)?;

        let result = async {
            self.docker.stop_container(&validated_name).await?;
            self.docker.remove_container(&validated_name).await
        }
        .await;

        match result {
            Ok(()) => {
                info!(container_name = %validated_name, "stop_deployment completed");
                Ok(StopDeploymentResult {
                    container_name: validated_name.clone(),
                    status: "stopped".to_string(),
                    message: format!("Container {validated_name} stopped and removed successfully"),
                })
            }
            Err(e) => {
                error!(container_name, error = %e, "stop_deployment failed");
                Err(e)
            }
        }
    }

    /// See SPEC_FULL.md §9 decision (a) for the exact `host_port` branch:
    /// the failed deployment's port when `deployment_id` drove the lookup,
    /// the previous deployment's port otherwise.
    pub async fn rollback(
        &self,
        deployment_id: Option<&str>,
        repo_url: Option<&str>,
    ) -> AgentResult<RollbackResult> {
        info!(?deployment_id, ?repo_url, "rollback started");

        let result = self.rollback_inner(deployment_id, repo_url).await;
        match &result {
            Ok(r) => info!(
                rollback_deployment_id = %r.rollback_deployment_id,
                previous_deployment_id = %r.previous_deployment_id,
                "rollback completed"
            ),
            Err(e) => error!(?deployment_id, ?repo_url, error = %e, "rollback failed"),
        }
        result
    }

    async fn rollback_inner(
        &self,
        deployment_id: Option<&str>,
        repo_url: Option<&str>,
    ) -> AgentResult<RollbackResult> {
        if deployment_id.is_none() && repo_url.is_none() {
            return Err(AgentError::validation(
                "Must provide either deployment_id or repo_url",
                serde_json::json!({}),
            ));
        }

        let failed_deployment = match deployment_id {
            Some(id) => {
                let validated_id = validation::validate_deployment_id(id)?;
                let record = self.state.load(&validated_id)?.ok_or_else(|| {
                    AgentError::rollback_error(
                        format!("Deployment {validated_id} not found"),
                        serde_json::json!({ "deployment_id": validated_id }),
                    )
                })?;
                Some(record)
            }
            None => None,
        };

        let target_repo_url = failed_deployment
            .as_ref()
            .map(|r| r.repo_url.clone())
            .unwrap_or_else(|| repo_url.unwrap().to_string());
        let exclude_id = failed_deployment.as_ref().map(|r| r.deployment_id.clone());

        let previous = self
            .state
            .find_latest_successful(&target_repo_url, exclude_id.as_deref())?
            .ok_or_else(|| {
                AgentError::rollback_error(
                    format!("No previous successful deployment found for {target_repo_url}"),
                    serde_json::json!({ "repo_url": target_repo_url }),
                )
            })?;

        if let Some(failed) = &failed_deployment {
            if let Err(e) = async {
                self.docker.stop_container(&failed.container_name).await?;
                self.docker.remove_container(&failed.container_name).await
            }
            .await
            {
                tracing::warn!(container = %failed.container_name, error = %e, "failed to stop container during rollback");
            }
        }

        let plan = plan_rollback(
            &previous.commit_sha,
            &previous.image_name,
            previous.host_port,
            failed_deployment.as_ref().map(|f| f.host_port),
            Utc::now(),
        );
        let RollbackPlan { rollback_id, short_sha: prev_short_sha, host_port: rollback_host_port, container_name: rollback_container_name } = plan;

        let deploy_result = self
            .docker
            .deploy_container(DeployRequest {
                container_name: rollback_container_name.clone(),
                image_tag: previous.image_tag.clone(),
                host_port: rollback_host_port,
                container_port: previous.container_port,
                env_vars: HashMap::new(),
                memory_limit_mb: self.config.memory_limit_mb(),
            })
            .await?;

        let now = Utc::now();
        let rollback_record = DeploymentRecord {
            deployment_id: rollback_id.clone(),
            repo_url: target_repo_url,
            branch: previous.branch.clone(),
            commit_sha: previous.commit_sha.clone(),
            project_type: previous.project_type.clone(),
            image_name: previous.image_name.clone(),
            image_tag: previous.image_tag.clone(),
            image_id: None,
            container_name: rollback_container_name.clone(),
            container_id: Some(deploy_result.container_id.clone()),
            host_port: rollback_host_port,
            container_port: previous.container_port,
            status: DeploymentStatus::Running,
            created_at: now,
            started_at: Some(now),
            completed_at: Some(now),
            build_logs_path: None,
            error: None,
            rollback_from: deployment_id.map(|s| s.to_string()),
            steps: Vec::new(),
            healthcheck: None,
        };
        self.state.save(&rollback_record)?;

        Ok(RollbackResult {
            rollback_deployment_id: rollback_id,
            original_deployment_id: deployment_id.map(|s| s.to_string()),
            previous_deployment_id: previous.deployment_id,
            container_name: rollback_container_name,
            container_id: deploy_result.container_id,
            host_port: rollback_host_port,
            url: format!("http://localhost:{rollback_host_port}"),
            commit_sha: previous.commit_sha.clone(),
            short_sha: prev_short_sha,
            message: format!(
                "Rolled back to deployment {} (commit {})",
                previous.deployment_id,
                &previous.commit_sha[..previous.commit_sha.len().min(7)]
            ),
        })
    }

    pub fn list_deployments(&self) -> AgentResult<Vec<IndexEntry>> {
        self.state.list_all()
    }
}

struct RollbackPlan {
    rollback_id: String,
    short_sha: String,
    host_port: u16,
    container_name: String,
}

/// Compute the rollback id, container name, and port per SPEC_FULL.md §9
/// decision (a): the failed deployment's port wins when a `deployment_id`
/// drove the lookup, otherwise the previous deployment's port.
fn plan_rollback(
    previous_commit_sha: &str,
    previous_image_name: &str,
    previous_host_port: u16,
    failed_host_port: Option<u16>,
    now: chrono::DateTime<Utc>,
) -> RollbackPlan {
    let short_sha: String = previous_commit_sha.chars().take(7).collect();
    let rollback_id = format!("dep-{}-rollback-{short_sha}", now.format("%Y%m%d"));
    let host_port = failed_host_port.unwrap_or(previous_host_port);
    let container_name = format!("{previous_image_name}-rollback-{short_sha}-p{host_port}");
    RollbackPlan { rollback_id, short_sha, host_port, container_name }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_plan_uses_failed_deployments_port_when_deployment_id_drove_lookup() {
        let now = "2026-07-30T00:00:00Z".parse::<chrono::DateTime<Utc>>().unwrap();
        let plan = plan_rollback("abcdef1234567", "myapp", 9000, Some(8500), now);
        assert_eq!(plan.host_port, 8500);
        assert_eq!(plan.short_sha, "abcdef1");
        assert_eq!(plan.rollback_id, "dep-20260730-rollback-abcdef1");
        assert_eq!(plan.container_name, "myapp-rollback-abcdef1-p8500");
    }

    #[test]
    fn rollback_plan_falls_back_to_previous_deployments_port_when_only_repo_url_given() {
        let now = "2026-07-30T00:00:00Z".parse::<chrono::DateTime<Utc>>().unwrap();
        let plan = plan_rollback("abcdef1234567", "myapp", 9000, None, now);
        assert_eq!(plan.host_port, 9000);
        assert_eq!(plan.container_name, "myapp-rollback-abcdef1-p9000");
    }

    #[test]
    fn rollback_plan_id_matches_the_data_models_documented_shape() {
        let now = "2026-12-01T00:00:00Z".parse::<chrono::DateTime<Utc>>().unwrap();
        let plan = plan_rollback("0123456789ab", "svc", 8080, None, now);
        assert!(validation::validate_deployment_id(&plan.rollback_id).is_ok());
        assert_eq!(plan.rollback_id, "dep-20261201-rollback-0123456");
    }
}
