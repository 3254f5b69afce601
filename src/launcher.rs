//! [`Launcher`] that spawns applications as detached child processes.

use crate::environ::{ENV_APP_ID, ENV_APP_NAME, ENV_PROJECT_NAME};
use crate::traits::{LaunchRequest, Launcher};
use async_trait::async_trait;
use log::{debug, info};
use std::process::Stdio;
use tokio::process::Command;

/// Spawns the requested command with the identity overrides in its
/// environment.  The child is not waited on; the compositor reports its
/// window once it maps one.
#[derive(Debug, Default, Clone)]
pub struct ProcessLauncher;

/// Errors that can occur when launching an application.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("no command configured for {0}")]
    EmptyCommand(String),
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

/// Build the child command for `request` without spawning it.
fn build_command(request: &LaunchRequest) -> Result<Command, LaunchError> {
    let (program, args) = request
        .command
        .split_first()
        .ok_or_else(|| LaunchError::EmptyCommand(request.app_name.clone()))?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .env(ENV_APP_ID, &request.app_id)
        .env(ENV_APP_NAME, &request.app_name)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(false);
    match &request.project {
        Some(project) => {
            cmd.env(ENV_PROJECT_NAME, project);
        }
        None => {
            cmd.env_remove(ENV_PROJECT_NAME);
        }
    }
    if let Some(dir) = request.directory.as_ref().filter(|d| d.is_dir()) {
        cmd.current_dir(dir);
    }
    Ok(cmd)
}

#[async_trait]
impl Launcher for ProcessLauncher {
    type Error = LaunchError;

    async fn launch(&self, request: &LaunchRequest) -> Result<(), Self::Error> {
        let mut cmd = build_command(request)?;
        debug!("launching {:?} as {}", request.command, request.app_id);
        let child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            program: request.command.first().cloned().unwrap_or_default(),
            source,
        })?;
        info!(
            "launched {} (pid {:?}) as {}",
            request.app_name,
            child.id(),
            request.app_id
        );
        Ok(())
    }
}
