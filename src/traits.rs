//! Core traits that decouple i3pm from any specific compositor, process
//! table, or launcher.
//!
//! Every concrete backend (Sway IPC, `/proc`, child processes, a test
//! harness, …) implements one of these traits.  The project filter, the
//! workspace mode and the layout engine only depend on these abstractions.

use crate::model::{CompositorEvent, Rect, Tree, WorkspaceTarget};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Abstraction over a compositor that can report its window tree and run
/// window / workspace commands.
///
/// Commands are fire-and-report: the resulting state change arrives later
/// as a [`CompositorEvent`] through an [`EventSource`], never by mutating
/// local state directly.
#[async_trait]
pub trait Compositor: Send + Sync {
    /// The error type produced by this compositor.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Query the complete outputs → workspaces → windows tree.
    async fn tree(&self) -> Result<Tree, Self::Error>;

    /// Focus a workspace.
    async fn focus_workspace(&self, target: &WorkspaceTarget) -> Result<(), Self::Error>;

    /// Move the focused window to a workspace **and** follow it.
    async fn move_focused_to_workspace(&self, target: &WorkspaceTarget)
        -> Result<(), Self::Error>;

    /// Park a window without destroying it.
    async fn hide_window(&self, id: i64) -> Result<(), Self::Error>;

    /// Bring a parked window back onto `workspace`, restoring its floating
    /// state.
    async fn show_window(&self, id: i64, workspace: &str, floating: bool)
        -> Result<(), Self::Error>;

    /// Move a window to a workspace without following it.
    async fn move_window_to_workspace(
        &self,
        id: i64,
        target: &WorkspaceTarget,
    ) -> Result<(), Self::Error>;

    async fn set_floating(&self, id: i64, floating: bool) -> Result<(), Self::Error>;

    /// Resize and position a (floating) window.
    async fn set_geometry(&self, id: i64, geometry: Rect) -> Result<(), Self::Error>;

    async fn add_mark(&self, id: i64, mark: &str) -> Result<(), Self::Error>;

    async fn remove_mark(&self, id: i64, mark: &str) -> Result<(), Self::Error>;
}

/// A source of [`CompositorEvent`]s.
///
/// # Contract
///
/// * [`run`](EventSource::run) sends a [`CompositorEvent::Connected`] with a
///   full tree first, then every subsequent diff in delivery order.
/// * It returns `Ok(())` when the sink is closed and `Err` when the
///   connection is lost; the caller decides whether to reconnect.
#[async_trait]
pub trait EventSource: Send {
    /// The error type produced by this source.
    type Error: std::error::Error + Send + Sync + 'static;

    async fn run(&mut self, sink: mpsc::Sender<CompositorEvent>) -> Result<(), Self::Error>;
}

/// Reads identity information out of another process.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// The environment `pid` was started with.
    async fn environment(&self, pid: u32) -> Result<HashMap<String, String>, Self::Error>;

    /// The argv `pid` was started with.
    async fn command_line(&self, pid: u32) -> Result<Vec<String>, Self::Error>;
}

/// Everything needed to relaunch one application with a forced identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub app_name: String,
    /// Identity the new process must re-register (`I3PM_APP_ID`).
    pub app_id: String,
    pub project: Option<String>,
    /// Working directory, usually the project directory.
    pub directory: Option<PathBuf>,
    /// argv; the first element is the program.
    pub command: Vec<String>,
}

/// Starts applications on behalf of the layout engine.
#[async_trait]
pub trait Launcher: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Start the application.  Returns once the process has been spawned;
    /// waiting for its window is the caller's job.
    async fn launch(&self, request: &LaunchRequest) -> Result<(), Self::Error>;
}
