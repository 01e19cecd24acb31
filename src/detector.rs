//! Project-type detection from repository file markers.

use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDetails {
    pub has_docker: bool,
    pub has_compose: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub project_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dockerfile_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose_file: Option<String>,
    pub exposed_ports: Vec<u16>,
    pub details: ProjectDetails,
}

const COMPOSE_MARKERS: &[&str] = &["docker-compose.yml", "docker-compose.yaml", "compose.yml"];
const DOCKER_MARKER: &str = "Dockerfile";
const NODE_MARKER: &str = "package.json";
const PYTHON_MARKERS: &[&str] = &["requirements.txt", "pyproject.toml", "setup.py"];
const GO_MARKER: &str = "go.mod";
const RUST_MARKER: &str = "Cargo.toml";

/// Walk the detection rules in priority order: docker-compose, Dockerfile,
/// package.json, Python markers, go.mod, Cargo.toml.
pub fn detect_project_type(repo_path: &Path) -> Result<DetectionResult, AgentError> {
    if !repo_path.exists() {
        return Err(AgentError::validation(
            format!("Repository path does not exist: {}", repo_path.display()),
            json!({ "path": repo_path.display().to_string() }),
        ));
    }

    let mut project_type = "unknown".to_string();
    let mut dockerfile_path = None;
    let mut compose_file = None;
    let mut exposed_ports = Vec::new();

    'rules: for marker in COMPOSE_MARKERS {
        if repo_path.join(marker).exists() {
            project_type = "docker-compose".to_string();
            compose_file = Some(marker.to_string());
            break 'rules;
        }
    }

    if project_type == "unknown" && repo_path.join(DOCKER_MARKER).exists() {
        project_type = "docker".to_string();
        dockerfile_path = Some(DOCKER_MARKER.to_string());
        exposed_ports = parse_dockerfile_ports(&repo_path.join(DOCKER_MARKER));
    }

    if project_type == "unknown" && repo_path.join(NODE_MARKER).exists() {
        project_type = "nodejs".to_string();
    }

    if project_type == "unknown" {
        for marker in PYTHON_MARKERS {
            if repo_path.join(marker).exists() {
                project_type = "python".to_string();
                break;
            }
        }
    }

    if project_type == "unknown" && repo_path.join(GO_MARKER).exists() {
        project_type = "go".to_string();
    }

    if project_type == "unknown" && repo_path.join(RUST_MARKER).exists() {
        project_type = "rust".to_string();
    }

    Ok(DetectionResult {
        project_type,
        dockerfile_path,
        compose_file,
        exposed_ports,
        details: ProjectDetails {
            has_docker: repo_path.join(DOCKER_MARKER).exists(),
            has_compose: COMPOSE_MARKERS.iter().any(|m| repo_path.join(m).exists()),
        },
    })
}

/// Parse `EXPOSE` lines from a Dockerfile, handling multiple ports per line
/// and the `port/protocol` suffix form. Malformed lines are skipped, a
/// missing or unreadable file yields an empty list rather than an error.
fn parse_dockerfile_ports(dockerfile_path: &Path) -> Vec<u16> {
    let content = match std::fs::read_to_string(dockerfile_path) {
        Ok(c) => c,
        Err(e) => {
            warn!(dockerfile = %dockerfile_path.display(), error = %e, "failed to parse Dockerfile ports");
            return Vec::new();
        }
    };

    let mut ports = Vec::new();
    for line in content.lines() {
        let upper = line.trim().to_uppercase();
        if let Some(rest) = upper.strip_prefix("EXPOSE") {
            for part in rest.split_whitespace() {
                let port_str = part.split('/').next().unwrap_or(part);
                if let Ok(port) = port_str.parse::<u16>() {
                    ports.push(port);
                }
            }
        }
    }
    ports
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn detects_docker_compose_before_dockerfile() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM scratch").unwrap();
        fs::write(dir.path().join("docker-compose.yml"), "version: '3'").unwrap();

        let result = detect_project_type(dir.path()).unwrap();
        assert_eq!(result.project_type, "docker-compose");
        assert_eq!(result.compose_file.as_deref(), Some("docker-compose.yml"));
    }

    #[test]
    fn parses_multi_port_expose_lines() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("Dockerfile"),
            "FROM node:18\nEXPOSE 3000 8080/tcp\nEXPOSE 9090\n",
        )
        .unwrap();

        let result = detect_project_type(dir.path()).unwrap();
        assert_eq!(result.project_type, "docker");
        assert_eq!(result.exposed_ports, vec![3000, 8080, 9090]);
    }

    #[test]
    fn falls_back_through_markers_in_priority_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("go.mod"), "module example.com/foo").unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"x\"").unwrap();

        let result = detect_project_type(dir.path()).unwrap();
        assert_eq!(result.project_type, "go");
    }

    #[test]
    fn unknown_when_no_markers_present() {
        let dir = tempfile::tempdir().unwrap();
        let result = detect_project_type(dir.path()).unwrap();
        assert_eq!(result.project_type, "unknown");
        assert!(!result.details.has_docker);
    }

    #[test]
    fn errors_on_missing_path() {
        let err = detect_project_type(Path::new("/nonexistent/path/xyz")).unwrap_err();
        assert!(matches!(err, AgentError::Validation { .. }));
    }
}
