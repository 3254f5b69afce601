//! [`EventSource`] implementation over an i3-ipc event subscription.
//!
//! i3-ipc events describe *what* changed but not always *where*: a window
//! event carries the container, not its workspace.  Events that cannot be
//! expressed as a diff on their own are resolved against a fresh tree
//! query made over a second connection.

use super::ipc::{event, msg, Connection, SwayError};
use super::wm::SwayCompositor;
use crate::model::{CompositorEvent, Tree};
use crate::traits::{Compositor, EventSource};
use async_trait::async_trait;
use log::{debug, info, trace};
use serde::Deserialize;
use tokio::sync::mpsc;

/// Event classes i3pm subscribes to.
pub const SUBSCRIPTIONS: &[&str] = &["window", "workspace", "output", "shutdown"];

#[derive(Debug, Deserialize)]
struct SubscribeReply {
    success: bool,
}

#[derive(Debug, Deserialize)]
struct ContainerRef {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct WindowEventJson {
    change: String,
    container: ContainerRef,
}

#[derive(Debug, Deserialize)]
struct WorkspaceRef {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkspaceEventJson {
    change: String,
    #[serde(default)]
    current: Option<WorkspaceRef>,
}

/// What a raw event turns into.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Ready(CompositorEvent),
    /// Needs a tree query to become an event.
    WithTree(TreeLookup),
    Shutdown,
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TreeLookup {
    Window(i64),
    Workspace(String),
    Replace,
}

impl TreeLookup {
    /// Turn the lookup into an event.  `None` if the subject already
    /// vanished from the tree.
    pub fn resolve(self, tree: Tree) -> Option<CompositorEvent> {
        match self {
            TreeLookup::Window(id) => tree.window(id).cloned().map(CompositorEvent::WindowUpsert),
            TreeLookup::Workspace(name) => tree
                .workspace(&name)
                .cloned()
                .map(CompositorEvent::WorkspaceUpsert),
            TreeLookup::Replace => Some(CompositorEvent::TreeReplaced(tree)),
        }
    }
}

/// Decode one event message.
pub fn decode_event(msg_type: u32, payload: &[u8]) -> Result<Decoded, SwayError> {
    match msg_type {
        event::WINDOW => {
            let ev: WindowEventJson = serde_json::from_slice(payload)?;
            let id = ev.container.id;
            Ok(match ev.change.as_str() {
                "close" => Decoded::Ready(CompositorEvent::WindowClosed { id }),
                "focus" => Decoded::Ready(CompositorEvent::WindowFocused { id }),
                "new" | "move" | "floating" | "mark" | "title" | "fullscreen_mode" | "urgent" => {
                    Decoded::WithTree(TreeLookup::Window(id))
                }
                other => {
                    trace!("ignoring window change {}", other);
                    Decoded::Ignored
                }
            })
        }
        event::WORKSPACE => {
            let ev: WorkspaceEventJson = serde_json::from_slice(payload)?;
            let name = ev.current.and_then(|c| c.name);
            Ok(match (ev.change.as_str(), name) {
                ("focus", Some(name)) => Decoded::Ready(CompositorEvent::WorkspaceFocused { name }),
                ("empty", Some(name)) => Decoded::Ready(CompositorEvent::WorkspaceRemoved { name }),
                ("init", Some(name)) | ("urgent", Some(name)) => {
                    Decoded::WithTree(TreeLookup::Workspace(name))
                }
                // Renames and moves between outputs are broad enough to
                // warrant a full refresh.
                ("rename" | "move" | "reload" | "restored", _) => Decoded::WithTree(TreeLookup::Replace),
                (other, _) => {
                    trace!("ignoring workspace change {}", other);
                    Decoded::Ignored
                }
            })
        }
        event::OUTPUT => Ok(Decoded::WithTree(TreeLookup::Replace)),
        event::SHUTDOWN => Ok(Decoded::Shutdown),
        other => {
            trace!("ignoring message type {:#x}", other);
            Ok(Decoded::Ignored)
        }
    }
}

/// Subscribes to compositor events and forwards them as
/// [`CompositorEvent`]s.
pub struct SwayEventSource {
    compositor: SwayCompositor,
}

impl SwayEventSource {
    pub fn new(compositor: SwayCompositor) -> Self {
        Self { compositor }
    }

    async fn subscribe(&self) -> Result<Connection, SwayError> {
        let mut conn = Connection::connect(self.compositor.socket()).await?;
        let payload = serde_json::to_vec(SUBSCRIPTIONS)?;
        let reply = conn.request(msg::SUBSCRIBE, &payload).await?;
        let reply: SubscribeReply = serde_json::from_slice(&reply)?;
        if !reply.success {
            return Err(SwayError::SubscribeRefused);
        }
        Ok(conn)
    }
}

#[async_trait]
impl EventSource for SwayEventSource {
    type Error = SwayError;

    async fn run(&mut self, sink: mpsc::Sender<CompositorEvent>) -> Result<(), SwayError> {
        let mut conn = self.subscribe().await?;
        // Subscribe first so nothing between the query and the
        // subscription is lost.
        let tree = self.compositor.tree().await?;
        info!("connected to compositor at {}", self.compositor.socket().display());
        if sink.send(CompositorEvent::Connected(tree)).await.is_err() {
            return Ok(());
        }

        loop {
            let (msg_type, payload) = conn.next_message().await?;
            let decoded = match decode_event(msg_type, &payload) {
                Ok(d) => d,
                Err(e) => {
                    debug!("undecodable event {:#x}: {}", msg_type, e);
                    continue;
                }
            };
            let event = match decoded {
                Decoded::Ready(event) => Some(event),
                Decoded::WithTree(lookup) => lookup.resolve(self.compositor.tree().await?),
                Decoded::Shutdown => {
                    info!("compositor is shutting down");
                    return Err(SwayError::Shutdown);
                }
                Decoded::Ignored => None,
            };
            if let Some(event) = event {
                if sink.send(event).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
}
