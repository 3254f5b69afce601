//! [`Compositor`] implementation backed by i3-ipc.
//!
//! No connection is kept open: each call opens a short-lived connection,
//! sends one message and reads its reply.  Window commands are scoped with
//! `[con_id=N]` criteria.

use super::ipc::{self, msg, Connection, SwayError};
use super::tree::parse_tree;
use crate::model::{Rect, Tree, WorkspaceTarget};
use crate::traits::Compositor;
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use std::path::PathBuf;

/// Sway (or i3) command client.
#[derive(Debug, Clone)]
pub struct SwayCompositor {
    socket: PathBuf,
}

/// One entry of a `RUN_COMMAND` reply.
#[derive(Debug, Deserialize)]
struct CommandOutcome {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SwayCompositor {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    /// Use the socket named by `SWAYSOCK` / `I3SOCK`.
    pub fn from_env() -> Result<Self, SwayError> {
        ipc::socket_path().map(Self::new)
    }

    pub fn socket(&self) -> &PathBuf {
        &self.socket
    }

    async fn request(&self, msg_type: u32, payload: &[u8]) -> Result<Vec<u8>, SwayError> {
        let mut conn = Connection::connect(&self.socket).await?;
        conn.request(msg_type, payload).await
    }

    /// Run a command and check that every part of it succeeded.
    pub async fn run_command(&self, command: &str) -> Result<(), SwayError> {
        debug!("run: {}", command);
        let reply = self.request(msg::RUN_COMMAND, command.as_bytes()).await?;
        check_outcomes(&reply)
    }
}

fn check_outcomes(reply: &[u8]) -> Result<(), SwayError> {
    let outcomes: Vec<CommandOutcome> = serde_json::from_slice(reply)?;
    let errors: Vec<String> = outcomes
        .into_iter()
        .filter(|o| !o.success)
        .map(|o| o.error.unwrap_or_else(|| "unknown error".into()))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(SwayError::Command(errors.join("; ")))
    }
}

/// Quote a string argument for the command parser.
pub fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn criteria(id: i64) -> String {
    format!("[con_id={}]", id)
}

pub fn focus_workspace_command(target: &WorkspaceTarget) -> String {
    format!("workspace {}", target)
}

pub fn move_focused_command(target: &WorkspaceTarget) -> String {
    format!("move container to workspace {t}; workspace {t}", t = target)
}

pub fn hide_command(id: i64) -> String {
    format!("{} move scratchpad", criteria(id))
}

pub fn show_command(id: i64, workspace: &str, floating: bool) -> String {
    format!(
        "{} move container to workspace {}, floating {}",
        criteria(id),
        quote(workspace),
        if floating { "enable" } else { "disable" }
    )
}

pub fn move_window_command(id: i64, target: &WorkspaceTarget) -> String {
    format!("{} move container to workspace {}", criteria(id), target)
}

pub fn floating_command(id: i64, floating: bool) -> String {
    format!(
        "{} floating {}",
        criteria(id),
        if floating { "enable" } else { "disable" }
    )
}

pub fn geometry_command(id: i64, g: Rect) -> String {
    format!(
        "{} resize set width {} px height {} px, move position {} px {} px",
        criteria(id),
        g.width,
        g.height,
        g.x,
        g.y
    )
}

pub fn add_mark_command(id: i64, mark: &str) -> String {
    format!("{} mark --add {}", criteria(id), quote(mark))
}

pub fn remove_mark_command(id: i64, mark: &str) -> String {
    format!("{} unmark {}", criteria(id), quote(mark))
}

#[async_trait]
impl Compositor for SwayCompositor {
    type Error = SwayError;

    async fn tree(&self) -> Result<Tree, SwayError> {
        let reply = self.request(msg::GET_TREE, b"").await?;
        Ok(parse_tree(&reply)?)
    }

    async fn focus_workspace(&self, target: &WorkspaceTarget) -> Result<(), SwayError> {
        self.run_command(&focus_workspace_command(target)).await
    }

    async fn move_focused_to_workspace(&self, target: &WorkspaceTarget) -> Result<(), SwayError> {
        self.run_command(&move_focused_command(target)).await
    }

    async fn hide_window(&self, id: i64) -> Result<(), SwayError> {
        self.run_command(&hide_command(id)).await
    }

    async fn show_window(&self, id: i64, workspace: &str, floating: bool) -> Result<(), SwayError> {
        self.run_command(&show_command(id, workspace, floating)).await
    }

    async fn move_window_to_workspace(&self, id: i64, target: &WorkspaceTarget) -> Result<(), SwayError> {
        self.run_command(&move_window_command(id, target)).await
    }

    async fn set_floating(&self, id: i64, floating: bool) -> Result<(), SwayError> {
        self.run_command(&floating_command(id, floating)).await
    }

    async fn set_geometry(&self, id: i64, geometry: Rect) -> Result<(), SwayError> {
        self.run_command(&geometry_command(id, geometry)).await
    }

    async fn add_mark(&self, id: i64, mark: &str) -> Result<(), SwayError> {
        self.run_command(&add_mark_command(id, mark)).await
    }

    async fn remove_mark(&self, id: i64, mark: &str) -> Result<(), SwayError> {
        self.run_command(&remove_mark_command(id, mark)).await
    }
}
