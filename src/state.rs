//! In-memory mirror of the compositor's outputs, workspaces and windows.
//!
//! The [`StateStore`] is written only by [`StateStore::apply`], which replays
//! [`CompositorEvent`]s in delivery order.  Readers take an immutable
//! [`Arc<Tree>`] snapshot; later events never change a snapshot already
//! handed out.

use crate::model::{CompositorEvent, Tree, Window, Workspace};
use log::{debug, warn};
use std::sync::Arc;

/// The read model of the compositor.
#[derive(Debug, Default)]
pub struct StateStore {
    tree: Arc<Tree>,
    available: bool,
    /// Number of events applied since startup.
    generation: u64,
    /// An event referenced something the mirror does not know about.
    stale: bool,
}

impl StateStore {
    /// An empty, unavailable store.  It becomes available with the first
    /// [`CompositorEvent::Connected`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Immutable snapshot of the current tree.
    pub fn tree(&self) -> Arc<Tree> {
        Arc::clone(&self.tree)
    }

    /// Whether the compositor connection is up and the mirror is valid.
    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether an event could not be applied because the mirror is missing
    /// its workspace or output.  Cleared by the next full tree.
    pub fn needs_resync(&self) -> bool {
        self.stale
    }

    /// Apply one event.  Returns `false` if it was ignored because the
    /// store is unavailable (diffs are meaningless until the next full
    /// resync).
    pub fn apply(&mut self, event: &CompositorEvent) -> bool {
        match event {
            CompositorEvent::Connected(tree) | CompositorEvent::TreeReplaced(tree) => {
                self.tree = Arc::new(tree.clone());
                self.available = true;
                self.stale = false;
            }
            CompositorEvent::Disconnected => {
                self.tree = Arc::new(Tree::default());
                self.available = false;
                self.stale = false;
            }
            _ if !self.available => {
                debug!("store unavailable, ignoring {:?}", event);
                return false;
            }
            CompositorEvent::WindowUpsert(window) => {
                if !upsert_window(Arc::make_mut(&mut self.tree), window) {
                    self.stale = true;
                }
            }
            CompositorEvent::WindowClosed { id } => {
                remove_window(Arc::make_mut(&mut self.tree), *id);
            }
            CompositorEvent::WindowFocused { id } => {
                for w in windows_mut(Arc::make_mut(&mut self.tree)) {
                    w.focused = w.id == *id;
                }
            }
            CompositorEvent::WorkspaceUpsert(workspace) => {
                if !upsert_workspace(Arc::make_mut(&mut self.tree), workspace) {
                    self.stale = true;
                }
            }
            CompositorEvent::WorkspaceRemoved { name } => {
                for output in &mut Arc::make_mut(&mut self.tree).outputs {
                    output.workspaces.retain(|w| &w.name != name);
                }
            }
            CompositorEvent::WorkspaceFocused { name } => {
                focus_workspace(Arc::make_mut(&mut self.tree), name)
            }
        }
        self.generation += 1;
        true
    }
}

fn windows_mut(tree: &mut Tree) -> impl Iterator<Item = &mut Window> {
    tree.outputs
        .iter_mut()
        .flat_map(|o| o.workspaces.iter_mut())
        .flat_map(|w| w.windows.iter_mut())
}

fn workspace_mut<'a>(tree: &'a mut Tree, name: &str) -> Option<&'a mut Workspace> {
    tree.outputs
        .iter_mut()
        .flat_map(|o| o.workspaces.iter_mut())
        .find(|w| w.name == name)
}

fn remove_window(tree: &mut Tree, id: i64) -> Option<Window> {
    for ws in tree.outputs.iter_mut().flat_map(|o| o.workspaces.iter_mut()) {
        if let Some(pos) = ws.windows.iter().position(|w| w.id == id) {
            return Some(ws.windows.remove(pos));
        }
    }
    None
}

/// Returns `false` if the window's workspace is unknown.
fn upsert_window(tree: &mut Tree, window: &Window) -> bool {
    if window.focused {
        for w in windows_mut(tree) {
            w.focused = false;
        }
    }

    // Replace in place when the window stays on its workspace so its
    // position in the container order is kept.
    if let Some(ws) = workspace_mut(tree, &window.workspace) {
        if let Some(existing) = ws.windows.iter_mut().find(|w| w.id == window.id) {
            *existing = window.clone();
            return true;
        }
    }

    remove_window(tree, window.id);
    match workspace_mut(tree, &window.workspace) {
        Some(ws) => {
            ws.windows.push(window.clone());
            true
        }
        None => {
            warn!(
                "window {} references unknown workspace {:?}; mirror needs a resync",
                window.id, window.workspace
            );
            false
        }
    }
}

/// Returns `false` if the workspace's output is unknown.
fn upsert_workspace(tree: &mut Tree, workspace: &Workspace) -> bool {
    if workspace.focused {
        for ws in tree.outputs.iter_mut().flat_map(|o| o.workspaces.iter_mut()) {
            ws.focused = false;
        }
    }

    // Carry the windows over; the event payload never describes them.
    let mut existing_windows = Vec::new();
    for output in &mut tree.outputs {
        if let Some(pos) = output.workspaces.iter().position(|w| w.name == workspace.name) {
            if output.name == workspace.output {
                let ws = &mut output.workspaces[pos];
                ws.num = workspace.num;
                ws.focused = workspace.focused;
                ws.visible = workspace.visible;
                return true;
            }
            existing_windows = output.workspaces.remove(pos).windows;
            break;
        }
    }

    let Some(output) = tree.outputs.iter_mut().find(|o| o.name == workspace.output) else {
        warn!(
            "workspace {:?} references unknown output {:?}; mirror needs a resync",
            workspace.name, workspace.output
        );
        return false;
    };
    let mut ws = workspace.clone();
    ws.windows = existing_windows;
    let key = ws.num.unwrap_or(i32::MAX);
    let pos = output
        .workspaces
        .iter()
        .position(|w| w.num.unwrap_or(i32::MAX) > key)
        .unwrap_or(output.workspaces.len());
    output.workspaces.insert(pos, ws);
    true
}

fn focus_workspace(tree: &mut Tree, name: &str) {
    let output_name = tree
        .workspaces()
        .find(|w| w.name == name)
        .map(|w| w.output.clone());
    let Some(output_name) = output_name else {
        warn!("focus on unknown workspace {:?}", name);
        return;
    };
    for output in &mut tree.outputs {
        for ws in &mut output.workspaces {
            ws.focused = ws.name == name;
            if output.name == output_name {
                ws.visible = ws.name == name;
            }
        }
    }
}
