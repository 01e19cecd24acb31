//! Repository preparation: clone/fetch, checkout, commit metadata, workspace
//! layout. `git2` is synchronous, so every call that touches the repository
//! is dispatched through `spawn_blocking`.

use crate::error::AgentError;
use crate::models::CommitMetadata;
use chrono::{TimeZone, Utc};
use git2::{FetchOptions, Repository};
use regex::Regex;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::task;

/// Owns the root directory workspaces are created under and computes the
/// per-repository, per-commit path a clone ultimately lives at.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    base_dir: PathBuf,
}

impl WorkspaceManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Extract the last URL segment, strip a trailing `.git`, lowercase, and
    /// replace any run of characters outside `[a-z0-9-]` with a single `-`.
    pub fn sanitize_repo_name(&self, repo_url: &str) -> String {
        static NON_SLUG: OnceLock<Regex> = OnceLock::new();
        let re = NON_SLUG.get_or_init(|| Regex::new(r"[^a-z0-9-]+").unwrap());

        let trimmed = repo_url.trim_end_matches('/');
        let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
        let without_git = last.strip_suffix(".git").unwrap_or(last);
        re.replace_all(&without_git.to_lowercase(), "-").to_string()
    }

    pub fn final_path(&self, repo_url: &str, commit_sha: &str) -> PathBuf {
        let repo_name = self.sanitize_repo_name(repo_url);
        let sha_short: String = commit_sha.chars().take(12).collect();
        self.base_dir.join(repo_name).join(sha_short)
    }

    pub fn create_final(&self, repo_url: &str, commit_sha: &str) -> std::io::Result<PathBuf> {
        let path = self.final_path(repo_url, commit_sha);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }
}

/// Validate a Git URL against an allowlist of hosts. Accepts `https://`,
/// `http://`, and `git@host:path` forms; rejects shell metacharacters
/// outright regardless of host.
pub fn validate_git_url(url: &str, allowed_hosts: &[String]) -> Result<(), AgentError> {
    if !(url.starts_with("https://") || url.starts_with("http://") || url.starts_with("git@")) {
        return Err(AgentError::clone_error(
            "Git URL must start with https://, http://, or git@",
            json!({ "url": url }),
        ));
    }

    const DANGEROUS: [char; 5] = [';', '|', '&', '`', '$'];
    if url.chars().any(|c| DANGEROUS.contains(&c)) {
        return Err(AgentError::clone_error(
            "Git URL contains dangerous characters",
            json!({ "url": url }),
        ));
    }

    static SSH_HOST: OnceLock<Regex> = OnceLock::new();
    static HTTP_HOST: OnceLock<Regex> = OnceLock::new();

    let host = if let Some(url) = url.strip_prefix("git@") {
        let re = SSH_HOST.get_or_init(|| Regex::new(r"^([^:]+):").unwrap());
        re.captures(url).map(|c| c[1].to_string())
    } else {
        let re = HTTP_HOST.get_or_init(|| Regex::new(r"^https?://([^/]+)/").unwrap());
        re.captures(url).map(|c| c[1].to_string())
    };

    let host = host.ok_or_else(|| {
        AgentError::clone_error(
            "Could not extract hostname from Git URL",
            json!({ "url": url }),
        )
    })?;

    if !allowed_hosts.iter().any(|h| h == &host) {
        return Err(AgentError::clone_error(
            format!("Git host {host} not in allowed list"),
            json!({ "hostname": host, "allowed": allowed_hosts }),
        ));
    }

    Ok(())
}

/// Clone into `target` (shallow, depth 1) or fetch if a working tree already
/// exists there.
pub async fn clone_or_update_repo(
    repo_url: &str,
    target: &Path,
    branch: &str,
) -> Result<(), AgentError> {
    let repo_url = repo_url.to_string();
    let target = target.to_path_buf();
    let branch = branch.to_string();

    task::spawn_blocking(move || {
        if target.join(".git").exists() {
            let repo = Repository::open(&target).map_err(|e| {
                AgentError::clone_error(
                    format!("Invalid git repository: {e}"),
                    json!({ "path": target.display().to_string(), "error": e.to_string() }),
                )
            })?;
            let mut remote = repo.find_remote("origin").map_err(|e| {
                AgentError::clone_error(e.to_string(), json!({ "path": target.display().to_string() }))
            })?;
            remote
                .fetch::<&str>(&[], Some(&mut FetchOptions::new()), None)
                .map_err(|e| {
                    AgentError::clone_error(
                        format!("Failed to clone repository: {e}"),
                        json!({ "url": repo_url, "path": target.display().to_string(), "error": e.to_string() }),
                    )
                })?;
            Ok(())
        } else {
            let mut fetch_options = FetchOptions::new();
            fetch_options.depth(1);
            let mut builder = git2::build::RepoBuilder::new();
            builder.fetch_options(fetch_options).branch(&branch);
            builder.clone(&repo_url, &target).map_err(|e| {
                AgentError::clone_error(
                    format!("Failed to clone repository: {e}"),
                    json!({ "url": repo_url, "path": target.display().to_string(), "error": e.to_string() }),
                )
            })?;
            Ok(())
        }
    })
    .await
    .map_err(|e| AgentError::clone_error(e.to_string(), json!({})))?
}

/// Switch the working tree to `ref_name` (branch, tag, or commit SHA).
pub async fn checkout_ref(target: &Path, ref_name: &str) -> Result<(), AgentError> {
    let target = target.to_path_buf();
    let ref_name = ref_name.to_string();

    task::spawn_blocking(move || {
        let repo = Repository::open(&target).map_err(|e| {
            AgentError::checkout_error(e.to_string(), json!({ "ref": ref_name, "error": e.to_string() }))
        })?;

        let (object, reference) = repo.revparse_ext(&ref_name).map_err(|e| {
            AgentError::checkout_error(
                format!("Failed to checkout {ref_name}: {e}"),
                json!({ "ref": ref_name, "error": e.to_string() }),
            )
        })?;

        repo.checkout_tree(&object, None).map_err(|e| {
            AgentError::checkout_error(
                format!("Failed to checkout {ref_name}: {e}"),
                json!({ "ref": ref_name, "error": e.to_string() }),
            )
        })?;

        match reference {
            Some(r) if r.is_branch() => {
                repo.set_head(r.name().unwrap_or("HEAD")).ok();
            }
            _ => {
                repo.set_head_detached(object.id()).ok();
            }
        }

        Ok(())
    })
    .await
    .map_err(|e| AgentError::checkout_error(e.to_string(), json!({})))?
}

/// Read `HEAD`'s commit metadata; a detached HEAD is reported as branch
/// `"detached"`.
pub async fn extract_commit_metadata(target: &Path) -> Result<CommitMetadata, AgentError> {
    let target = target.to_path_buf();

    task::spawn_blocking(move || {
        let repo = Repository::open(&target)
            .map_err(|e| AgentError::clone_error(e.to_string(), json!({})))?;

        let head = repo
            .head()
            .map_err(|e| AgentError::clone_error(e.to_string(), json!({})))?;
        let commit = head
            .peel_to_commit()
            .map_err(|e| AgentError::clone_error(e.to_string(), json!({})))?;

        let branch = if head.is_branch() {
            head.shorthand().unwrap_or("detached").to_string()
        } else {
            "detached".to_string()
        };

        let full_sha = commit.id().to_string();
        let short_sha = full_sha.chars().take(7).collect();
        let author = commit.author().name().unwrap_or("unknown").to_string();
        let message = commit.message().unwrap_or("").trim().to_string();
        let timestamp = Utc
            .timestamp_opt(commit.time().seconds(), 0)
            .single()
            .unwrap_or_else(Utc::now);

        Ok(CommitMetadata {
            full_sha,
            short_sha,
            branch,
            author,
            message,
            timestamp,
        })
    })
    .await
    .map_err(|e| AgentError::clone_error(e.to_string(), json!({})))?
}

/// Complete repository preparation: validate → clone into a per-call unique
/// temp directory → checkout ref → extract metadata → rename into the final
/// SHA-scoped workspace path.
///
/// Cloning into a per-call temp directory (rather than one shared
/// `temp_clone` path) keeps concurrent `prepare_repo` calls from clobbering
/// each other's in-flight checkout.
pub async fn prepare_repository(
    repo_url: &str,
    workspace: &WorkspaceManager,
    branch: &str,
    allowed_hosts: &[String],
) -> Result<(PathBuf, CommitMetadata), AgentError> {
    if !allowed_hosts.is_empty() {
        validate_git_url(repo_url, allowed_hosts)?;
    }

    let temp_dir = tempfile::Builder::new()
        .prefix("clone-")
        .tempdir_in(workspace.base_dir())
        .map_err(|e| AgentError::clone_error(e.to_string(), json!({})))?;
    let temp_path = temp_dir.path().to_path_buf();

    clone_or_update_repo(repo_url, &temp_path, branch).await?;

    if branch != "main" {
        checkout_ref(&temp_path, branch).await?;
    }

    let metadata = extract_commit_metadata(&temp_path).await?;

    let final_path = workspace.final_path(repo_url, &metadata.full_sha);
    if final_path.exists() {
        std::fs::remove_dir_all(&final_path)
            .map_err(|e| AgentError::clone_error(e.to_string(), json!({})))?;
    }
    if let Some(parent) = final_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| AgentError::clone_error(e.to_string(), json!({})))?;
    }
    std::fs::rename(&temp_path, &final_path)
        .map_err(|e| AgentError::clone_error(e.to_string(), json!({})))?;
    // temp_dir's directory no longer exists on disk; forget it rather than
    // let its Drop impl try to remove an already-moved path.
    std::mem::forget(temp_dir);

    Ok((final_path, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_repo_names() {
        let ws = WorkspaceManager {
            base_dir: PathBuf::from("/tmp/unused"),
        };
        assert_eq!(
            ws.sanitize_repo_name("https://github.com/user/My_Repo.git"),
            "my-repo"
        );
        assert_eq!(ws.sanitize_repo_name("git@github.com:user/repo.git"), "repo");
    }

    #[test]
    fn rejects_dangerous_urls_regardless_of_host() {
        let hosts = vec!["github.com".to_string()];
        for url in [
            "https://github.com/u/r.git;rm -rf /",
            "https://github.com/u/r.git|cat",
            "https://github.com/u/r.git&ls",
            "https://github.com/u/r.git$(whoami)",
            "https://github.com/u/r.git`whoami`",
        ] {
            assert!(validate_git_url(url, &hosts).is_err(), "expected rejection for {url}");
        }
    }

    #[test]
    fn rejects_hosts_outside_allowlist() {
        let hosts = vec!["github.com".to_string()];
        assert!(validate_git_url("https://evil.example.com/u/r.git", &hosts).is_err());
        assert!(validate_git_url("https://github.com/u/r.git", &hosts).is_ok());
    }

    #[test]
    fn rejects_unsupported_schemes() {
        let hosts = vec!["github.com".to_string()];
        assert!(validate_git_url("ftp://github.com/u/r.git", &hosts).is_err());
    }

    #[test]
    fn final_path_uses_first_12_of_sha() {
        let ws = WorkspaceManager {
            base_dir: PathBuf::from("/tmp/workspace"),
        };
        let path = ws.final_path("https://github.com/user/repo.git", "abcdef0123456789");
        assert_eq!(path, PathBuf::from("/tmp/workspace/repo/abcdef012345"));
    }
}
