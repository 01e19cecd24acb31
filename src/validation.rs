//! Input validation and sanitization.
//!
//! Pure functions, no I/O. Each returns the canonicalized input on success or
//! fails with `AgentError::Validation`. These are the trust boundary: every
//! externally supplied value must pass through here before it reaches a
//! filesystem path or a container-engine call.

use crate::error::AgentError;
use regex::Regex;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn branch_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9._\-/]+$").unwrap())
}

fn container_name_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_\-]+$").unwrap())
}

fn image_name_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9._\-/]*$").unwrap())
}

fn image_version_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9._\-]+$").unwrap())
}

fn env_key_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z_][A-Z0-9_]*$").unwrap())
}

fn deployment_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^dep-\d{8}-(rollback-)?[a-z0-9]+$").unwrap())
}

/// Validate a Git branch/tag/ref name.
pub fn validate_branch_name(branch: &str) -> Result<String, AgentError> {
    if !branch_pattern().is_match(branch) {
        return Err(AgentError::validation(
            format!("Invalid branch name: {branch}"),
            json!({ "branch": branch }),
        ));
    }
    if branch.contains("..") {
        return Err(AgentError::validation(
            "Branch name cannot contain '..'",
            json!({ "branch": branch }),
        ));
    }
    Ok(branch.to_string())
}

/// Validate a Docker container name.
pub fn validate_container_name(name: &str) -> Result<String, AgentError> {
    if !container_name_pattern().is_match(name) {
        return Err(AgentError::validation(
            format!("Invalid container name: {name}"),
            json!({ "name": name }),
        ));
    }
    if name.len() > 63 {
        return Err(AgentError::validation(
            "Container name too long (max 63 characters)",
            json!({ "name": name, "length": name.len() }),
        ));
    }
    Ok(name.to_string())
}

/// Validate and canonicalize a Docker image tag (`name[:version]`).
pub fn validate_image_tag(tag: &str) -> Result<String, AgentError> {
    let (name, version) = match tag.split_once(':') {
        Some((name, version)) => (name, version),
        None => (tag, "latest"),
    };

    if !image_name_pattern().is_match(name) {
        return Err(AgentError::validation(
            format!("Invalid image name: {name}"),
            json!({ "name": name }),
        ));
    }
    if !image_version_pattern().is_match(version) {
        return Err(AgentError::validation(
            format!("Invalid image version: {version}"),
            json!({ "version": version }),
        ));
    }

    Ok(format!("{name}:{version}"))
}

/// Validate a port number falls within `[min_port, max_port]`.
pub fn validate_port(port: u32, min_port: u32, max_port: u32) -> Result<u16, AgentError> {
    if !(min_port..=max_port).contains(&port) {
        return Err(AgentError::validation(
            format!("Port must be between {min_port} and {max_port}"),
            json!({ "port": port, "min": min_port, "max": max_port }),
        ));
    }
    Ok(port as u16)
}

/// Resolve a Dockerfile path relative to `base_dir`, rejecting traversal
/// outside `base_dir` and requiring the resolved path to exist as a file.
pub fn validate_dockerfile_path(path: &str, base_dir: &Path) -> Result<PathBuf, AgentError> {
    let base_dir = base_dir
        .canonicalize()
        .map_err(|e| AgentError::validation(
            format!("Build path does not exist: {e}"),
            json!({ "base_dir": base_dir.display().to_string() }),
        ))?;

    let joined = base_dir.join(path);
    let resolved = dunce_canonicalize(&joined).unwrap_or(joined);

    if !resolved.starts_with(&base_dir) {
        return Err(AgentError::validation(
            "Dockerfile path is outside repository directory",
            json!({ "path": path, "base_dir": base_dir.display().to_string() }),
        ));
    }

    if !resolved.exists() {
        return Err(AgentError::validation(
            "Dockerfile not found",
            json!({ "path": resolved.display().to_string() }),
        ));
    }

    if !resolved.is_file() {
        return Err(AgentError::validation(
            "Dockerfile path is not a file",
            json!({ "path": resolved.display().to_string() }),
        ));
    }

    Ok(resolved)
}

// `Path::canonicalize` requires the full path to exist; Dockerfile paths
// always do by the time this is called, but resolve lexically first so a
// missing file produces our own "not found" error rather than an io::Error.
fn dunce_canonicalize(path: &Path) -> std::io::Result<PathBuf> {
    path.canonicalize()
}

/// Validate env var keys and reject values containing shell metacharacters,
/// command substitution, or backtick-wrapped runs.
pub fn sanitize_environment_variables(
    env_vars: &std::collections::HashMap<String, String>,
) -> Result<std::collections::HashMap<String, String>, AgentError> {
    let dangerous = [
        Regex::new(r"[;&|`$]").unwrap(),
        Regex::new(r"\$\(.*\)").unwrap(),
        Regex::new(r"`.*`").unwrap(),
    ];

    let mut sanitized = std::collections::HashMap::new();
    for (key, value) in env_vars {
        if !env_key_pattern().is_match(key) {
            return Err(AgentError::validation(
                format!("Invalid environment variable name: {key}"),
                json!({ "key": key }),
            ));
        }
        if dangerous.iter().any(|re| re.is_match(value)) {
            return Err(AgentError::validation(
                format!("Environment variable contains dangerous characters: {key}"),
                json!({ "key": key }),
            ));
        }
        sanitized.insert(key.clone(), value.clone());
    }
    Ok(sanitized)
}

/// Validate a deployment ID (`dep-YYYYMMDD-<alphanumeric>`, optionally
/// `dep-YYYYMMDD-rollback-<alphanumeric>`).
pub fn validate_deployment_id(deployment_id: &str) -> Result<String, AgentError> {
    if !deployment_id_pattern().is_match(deployment_id) {
        return Err(AgentError::validation(
            format!("Invalid deployment ID format: {deployment_id}"),
            json!({ "deployment_id": deployment_id, "expected_format": "dep-YYYYMMDD-XXXXXX" }),
        ));
    }
    Ok(deployment_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_names() {
        assert!(validate_branch_name("main").is_ok());
        assert!(validate_branch_name("feature/my-fix_1.0").is_ok());
        assert!(validate_branch_name("../etc/passwd").is_err());
        assert!(validate_branch_name("bad name").is_err());
    }

    #[test]
    fn container_names() {
        assert!(validate_container_name("hello-demo").is_ok());
        assert!(validate_container_name("a").is_err()); // pattern requires >= 2 chars
        assert!(validate_container_name(&"a".repeat(64)).is_err());
        assert!(validate_container_name("-bad").is_err());
    }

    #[test]
    fn image_tags() {
        assert_eq!(validate_image_tag("hello").unwrap(), "hello:latest");
        assert_eq!(validate_image_tag("hello:v1").unwrap(), "hello:v1");
        assert!(validate_image_tag("Hello:v1").is_err());
        assert!(validate_image_tag("hello:bad tag").is_err());
    }

    #[test]
    fn image_tag_idempotent() {
        let tag = validate_image_tag("myapp:1.2.3").unwrap();
        assert!(tag.contains(':'));
        assert_eq!(validate_image_tag(&tag).unwrap(), tag);
    }

    #[test]
    fn ports() {
        assert_eq!(validate_port(8080, 1024, 65535).unwrap(), 8080);
        assert!(validate_port(80, 1024, 65535).is_err());
        assert!(validate_port(70000, 1024, 65535).is_err());
        assert_eq!(validate_port(1, 1, 65535).unwrap(), 1);
    }

    #[test]
    fn deployment_ids() {
        assert!(validate_deployment_id("dep-20260730-ab12cd").is_ok());
        assert!(validate_deployment_id("dep-20260730-rollback-ab12cd").is_ok());
        assert!(validate_deployment_id("dep-2026-ab12cd").is_err());
        assert!(validate_deployment_id("DEP-20260730-AB12CD").is_err());
    }

    #[test]
    fn env_sanitization_rejects_shell_metacharacters() {
        let mut env = std::collections::HashMap::new();
        env.insert("FOO".to_string(), "bar; rm -rf /".to_string());
        assert!(sanitize_environment_variables(&env).is_err());

        let mut env = std::collections::HashMap::new();
        env.insert("FOO".to_string(), "$(whoami)".to_string());
        assert!(sanitize_environment_variables(&env).is_err());

        let mut env = std::collections::HashMap::new();
        env.insert("foo".to_string(), "bar".to_string());
        assert!(sanitize_environment_variables(&env).is_err());

        let mut env = std::collections::HashMap::new();
        env.insert("FOO".to_string(), "bar".to_string());
        assert!(sanitize_environment_variables(&env).is_ok());
    }

    #[test]
    fn dockerfile_path_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch").unwrap();
        assert!(validate_dockerfile_path("Dockerfile", dir.path()).is_ok());
        assert!(validate_dockerfile_path("../../etc/passwd", dir.path()).is_err());
    }
}
