//! Containerized stdio backends run through the docker CLI.

use std::process::Stdio;

use tokio::process::Command;

use super::{ClientIdentity, McpClientSession};
use crate::catalog::BackendSpec;
use crate::error::TransportError;

/// `docker pull <image>`.
pub async fn pull_image(image: &str) -> Result<(), TransportError> {
    if image.is_empty() {
        return Err(TransportError::Pull {
            image: String::new(),
            reason: "no image configured".to_string(),
        });
    }
    tracing::info!("pulling image {}", image);
    let output = Command::new("docker")
        .args(["pull", image])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| TransportError::Pull {
            image: image.to_string(),
            reason: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(TransportError::Pull {
            image: image.to_string(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// Arguments for `docker run` of one backend.
pub fn docker_args(spec: &BackendSpec, backend: &str) -> Vec<String> {
    let mut args: Vec<String> = [
        "run",
        "--rm",
        "-i",
        "--init",
        "--security-opt",
        "no-new-privileges",
        "--cpus",
        "1",
        "--memory",
        "1g",
        "--pull",
        "never",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    for label in [
        "docker-mcp=true".to_string(),
        "docker-mcp-tool-type=mcp".to_string(),
        format!("docker-mcp-name={backend}"),
        "docker-mcp-transport=stdio".to_string(),
    ] {
        args.push("-l".to_string());
        args.push(label);
    }

    if spec.disable_network {
        args.extend(["--network".to_string(), "none".to_string()]);
    }
    for volume in spec.volumes.iter().filter(|v| !v.is_empty()) {
        args.extend(["-v".to_string(), volume.clone()]);
    }
    if !spec.user.is_empty() {
        args.extend(["-u".to_string(), spec.user.clone()]);
    }
    for env in spec
        .env
        .iter()
        .filter(|e| !e.name.is_empty() && !e.value.is_empty())
    {
        args.extend(["-e".to_string(), format!("{}={}", env.name, env.value)]);
    }

    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

pub async fn create_session(
    identity: &ClientIdentity,
    spec: &BackendSpec,
    backend: &str,
) -> Result<McpClientSession, TransportError> {
    pull_image(&spec.image).await?;
    let args = docker_args(spec, backend);
    tracing::debug!("docker {}", args.join(" "));
    McpClientSession::launch_stdio(backend, identity, "docker", args, None).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::EnvVar;

    #[test]
    fn minimal_descriptor_gets_hardened_defaults() {
        let spec = BackendSpec {
            image: "mcp/time".into(),
            ..BackendSpec::default()
        };
        let args = docker_args(&spec, "time");
        assert_eq!(
            args,
            vec![
                "run",
                "--rm",
                "-i",
                "--init",
                "--security-opt",
                "no-new-privileges",
                "--cpus",
                "1",
                "--memory",
                "1g",
                "--pull",
                "never",
                "-l",
                "docker-mcp=true",
                "-l",
                "docker-mcp-tool-type=mcp",
                "-l",
                "docker-mcp-name=time",
                "-l",
                "docker-mcp-transport=stdio",
                "mcp/time",
            ]
        );
    }

    #[test]
    fn optional_flags_follow_labels_in_order() {
        let spec = BackendSpec {
            image: "mcp/github".into(),
            command: vec!["stdio".into(), "--read-only".into()],
            disable_network: true,
            volumes: vec!["/data:/data".into(), String::new()],
            user: "1000:1000".into(),
            env: vec![
                EnvVar::new("GITHUB_TOKEN", "abc"),
                EnvVar::new("EMPTY", ""),
            ],
            ..BackendSpec::default()
        };
        let args = docker_args(&spec, "github");
        let tail: Vec<&str> = args.iter().skip(20).map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "--network",
                "none",
                "-v",
                "/data:/data",
                "-u",
                "1000:1000",
                "-e",
                "GITHUB_TOKEN=abc",
                "mcp/github",
                "stdio",
                "--read-only",
            ]
        );
    }

    #[tokio::test]
    async fn pull_without_image_fails_at_pull_stage() {
        let err = pull_image("").await.expect_err("no image");
        assert!(matches!(err, TransportError::Pull { .. }));
    }
}
