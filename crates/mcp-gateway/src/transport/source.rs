//! Source-repository backends: clone, install, run over stdio.
//!
//! Backends are named `github/<owner>/<repo>`. The clone lives under
//! `<clone_root>/<owner>/<repo>` and is removed again if any later stage
//! fails. The install step, if any, travels in the reserved
//! `INSTALL_COMMAND` env entry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use super::{ClientIdentity, McpClientSession};
use crate::catalog::{BackendSpec, INSTALL_COMMAND_ENV};
use crate::error::TransportError;

/// Key prefix marking source-repository backends in user configuration.
pub const SOURCE_PREFIX: &str = "github/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRepo {
    pub owner: String,
    pub repo: String,
}

impl SourceRepo {
    pub fn parse(backend: &str) -> Option<Self> {
        let mut parts = backend.strip_prefix(SOURCE_PREFIX)?.split('/');
        let owner = parts.next().filter(|s| !s.is_empty())?;
        let repo = parts.next().filter(|s| !s.is_empty())?;
        Some(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    pub fn url(&self) -> String {
        format!("https://github.com/{}/{}.git", self.owner, self.repo)
    }

    pub fn clone_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.owner).join(&self.repo)
    }
}

/// Removes the clone directory on drop unless disarmed.
struct CloneGuard {
    path: PathBuf,
    armed: bool,
}

impl CloneGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CloneGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!("removing clone {}", self.path.display());
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                tracing::warn!("failed to remove {}: {}", self.path.display(), e);
            }
        }
    }
}

async fn run_checked(mut cmd: Command) -> Result<(), String> {
    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| e.to_string())?;
    if output.status.success() {
        return Ok(());
    }
    let mut reason = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if reason.is_empty() {
        reason = format!("exited with {}", output.status);
    }
    Err(reason)
}

/// Env passed to the launched command: non-empty descriptor entries minus the
/// install step.
fn launch_env(spec: &BackendSpec) -> HashMap<String, String> {
    spec.env
        .iter()
        .filter(|e| e.name != INSTALL_COMMAND_ENV && !e.value.is_empty())
        .map(|e| (e.name.clone(), e.value.clone()))
        .collect()
}

/// `sh -c 'cd "$0" && exec "$@"' <dir> <command...>` so the server runs
/// inside the clone.
fn launch_args(dir: &Path, command: &[String]) -> Vec<String> {
    let mut args = vec![
        "-c".to_string(),
        r#"cd "$0" && exec "$@""#.to_string(),
        dir.display().to_string(),
    ];
    args.extend(
        command
            .iter()
            .flat_map(|part| part.split_whitespace())
            .map(String::from),
    );
    args
}

pub async fn create_session(
    clone_root: &Path,
    identity: &ClientIdentity,
    spec: &BackendSpec,
    backend: &str,
) -> Result<McpClientSession, TransportError> {
    let repo = SourceRepo::parse(backend).ok_or_else(|| TransportError::InvalidDescriptor {
        server: backend.to_string(),
        reason: "expected github/<owner>/<repo>".to_string(),
    })?;
    if spec.command.iter().all(|c| c.trim().is_empty()) {
        return Err(TransportError::InvalidDescriptor {
            server: backend.to_string(),
            reason: "empty run command".to_string(),
        });
    }

    let dir = repo.clone_dir(clone_root);
    if let Err(e) = tokio::fs::remove_dir_all(&dir).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!("failed to clean {}: {}", dir.display(), e);
    }
    if let Some(parent) = dir.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| TransportError::Clone {
                repo: repo.url(),
                reason: format!("create {}: {e}", parent.display()),
            })?;
    }

    let guard = CloneGuard {
        path: dir.clone(),
        armed: true,
    };

    tracing::info!("cloning {} into {}", repo.url(), dir.display());
    let mut clone = Command::new("git");
    clone.arg("clone").arg(repo.url()).arg(&dir);
    run_checked(clone).await.map_err(|reason| TransportError::Clone {
        repo: repo.url(),
        reason,
    })?;

    if let Some(install) = spec.env_value(INSTALL_COMMAND_ENV).filter(|c| !c.trim().is_empty()) {
        tracing::info!("running install command in {}: {}", dir.display(), install);
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(install).current_dir(&dir);
        run_checked(cmd).await.map_err(|reason| TransportError::Install {
            repo: repo.url(),
            reason,
        })?;
    }

    let args = launch_args(&dir, &spec.command);
    tracing::info!("starting {} in {}", spec.command.join(" "), dir.display());
    let session =
        McpClientSession::launch_stdio(backend, identity, "sh", args, Some(launch_env(spec))).await?;
    guard.disarm();
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::EnvVar;

    #[test]
    fn parses_owner_and_repo() {
        let repo = SourceRepo::parse("github/acme/weather-mcp").expect("valid");
        assert_eq!(repo.owner, "acme");
        assert_eq!(repo.repo, "weather-mcp");
        assert_eq!(repo.url(), "https://github.com/acme/weather-mcp.git");
        assert_eq!(
            repo.clone_dir(Path::new("/var/lib/mcp-gateway/github")),
            PathBuf::from("/var/lib/mcp-gateway/github/acme/weather-mcp")
        );
        assert_eq!(SourceRepo::parse("github/acme"), None);
        assert_eq!(SourceRepo::parse("gitlab/acme/x"), None);
    }

    #[test]
    fn launch_runs_inside_clone_with_split_command() {
        let args = launch_args(Path::new("/clones/a/b"), &["uv run server.py".to_string()]);
        assert_eq!(
            args,
            vec!["-c", r#"cd "$0" && exec "$@""#, "/clones/a/b", "uv", "run", "server.py"]
        );
    }

    #[test]
    fn install_command_is_not_passed_to_the_server() {
        let spec = BackendSpec {
            env: vec![
                EnvVar::new(INSTALL_COMMAND_ENV, "npm ci"),
                EnvVar::new("API_KEY", "k"),
                EnvVar::new("UNSET", ""),
            ],
            ..BackendSpec::default()
        };
        let env = launch_env(&spec);
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("API_KEY").map(String::as_str), Some("k"));
    }

    #[test]
    fn guard_removes_clone_unless_disarmed() {
        let root = tempfile::tempdir().expect("tempdir");
        let kept = root.path().join("kept");
        let dropped = root.path().join("dropped");
        std::fs::create_dir_all(&kept).expect("mkdir");
        std::fs::create_dir_all(&dropped).expect("mkdir");

        CloneGuard { path: kept.clone(), armed: true }.disarm();
        drop(CloneGuard { path: dropped.clone(), armed: true });

        assert!(kept.exists());
        assert!(!dropped.exists());
    }

    #[tokio::test]
    async fn malformed_name_is_rejected_before_cloning() {
        let root = tempfile::tempdir().expect("tempdir");
        let spec = BackendSpec {
            command: vec!["node index.js".into()],
            ..BackendSpec::default()
        };
        let err = create_session(root.path(), &ClientIdentity::default(), &spec, "acme/x")
            .await
            .err()
            .expect("invalid");
        assert!(matches!(err, TransportError::InvalidDescriptor { .. }));
        assert_eq!(std::fs::read_dir(root.path()).expect("read").count(), 0);
    }
}
