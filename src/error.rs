//! Typed error taxonomy for the deployment pipeline.
//!
//! Every variant carries enough structured data to rebuild the `context`
//! payload the tool surface attaches to a failed call.

use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("validation failed: {message}")]
    Validation { message: String, context: Value },

    #[error("git clone failed: {message}")]
    CloneError { message: String, context: Value },

    #[error("git checkout failed: {message}")]
    CheckoutError { message: String, context: Value },

    #[error("docker build failed: {message}")]
    BuildError { message: String, context: Value },

    #[error("container failed to start: {message}")]
    ContainerStartError { message: String, context: Value },

    #[error("port conflict: {message}")]
    PortConflictError { message: String, context: Value },

    #[error("health check failed: {message}")]
    HealthCheckError { message: String, context: Value },

    #[error("docker operation failed: {message}")]
    DockerOperationError { message: String, context: Value },

    #[error("rollback failed: {message}")]
    RollbackError { message: String, context: Value },

    #[error("configuration error: {message}")]
    ConfigurationError { message: String, context: Value },
}

impl AgentError {
    pub fn validation(message: impl Into<String>, context: Value) -> Self {
        Self::Validation { message: message.into(), context }
    }

    pub fn clone_error(message: impl Into<String>, context: Value) -> Self {
        Self::CloneError { message: message.into(), context }
    }

    pub fn checkout_error(message: impl Into<String>, context: Value) -> Self {
        Self::CheckoutError { message: message.into(), context }
    }

    pub fn build_error(message: impl Into<String>, context: Value) -> Self {
        Self::BuildError { message: message.into(), context }
    }

    pub fn container_start_error(message: impl Into<String>, context: Value) -> Self {
        Self::ContainerStartError { message: message.into(), context }
    }

    pub fn port_conflict(message: impl Into<String>, context: Value) -> Self {
        Self::PortConflictError { message: message.into(), context }
    }

    pub fn health_check_error(message: impl Into<String>, context: Value) -> Self {
        Self::HealthCheckError { message: message.into(), context }
    }

    pub fn docker_operation_error(message: impl Into<String>, context: Value) -> Self {
        Self::DockerOperationError { message: message.into(), context }
    }

    pub fn rollback_error(message: impl Into<String>, context: Value) -> Self {
        Self::RollbackError { message: message.into(), context }
    }

    pub fn configuration_error(message: impl Into<String>, context: Value) -> Self {
        Self::ConfigurationError { message: message.into(), context }
    }

    /// The structured context payload that accompanies this error across the
    /// tool-surface boundary.
    pub fn context(&self) -> Value {
        match self {
            Self::Validation { context, .. }
            | Self::CloneError { context, .. }
            | Self::CheckoutError { context, .. }
            | Self::BuildError { context, .. }
            | Self::ContainerStartError { context, .. }
            | Self::PortConflictError { context, .. }
            | Self::HealthCheckError { context, .. }
            | Self::DockerOperationError { context, .. }
            | Self::RollbackError { context, .. }
            | Self::ConfigurationError { context, .. } => context.clone(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "ValidationError",
            Self::CloneError { .. } => "CloneError",
            Self::CheckoutError { .. } => "CheckoutError",
            Self::BuildError { .. } => "BuildError",
            Self::ContainerStartError { .. } => "ContainerStartError",
            Self::PortConflictError { .. } => "PortConflictError",
            Self::HealthCheckError { .. } => "HealthCheckError",
            Self::DockerOperationError { .. } => "DockerOperationError",
            Self::RollbackError { .. } => "RollbackError",
            Self::ConfigurationError { .. } => "ConfigurationError",
        }
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        Self::configuration_error(err.to_string(), json!({ "error": err.to_string() }))
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
