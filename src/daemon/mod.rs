//! The composition root.
//!
//! [`Daemon`] owns every state container and runs the single loop that
//! processes compositor events and IPC requests one at a time.  Events take
//! priority so that a request always sees a store that reflects every event
//! delivered before it.
//!
//! Layout restores are the exception: waiting for relaunched windows can
//! take seconds, so that phase runs on its own task and reports back to the
//! loop, which answers the client and publishes the result.

mod handlers;
pub mod supervisor;

use handlers::RestoreDone;

pub use supervisor::{supervise, Backoff};

use crate::classify::Classifier;
use crate::config::Config;
use crate::environ::ENV_PROJECT_NAME;
use crate::filter::{in_target_set, VisibilityFilter};
use crate::ipc::bus::EventBus;
use crate::ipc::protocol::{Event, EventKind};
use crate::ipc::server::Incoming;
use crate::layout::LayoutStore;
use crate::model::{project_mark, CompositorEvent, Window};
use crate::persist::StoreError;
use crate::project::{ActiveProjectState, ProjectStore};
use crate::state::StateStore;
use crate::traits::{Compositor, IdentityResolver, Launcher};
use crate::workspace_mode::WorkspaceMode;
use log::{debug, info, warn};
use serde_json::json;
use std::any::Any;
use std::collections::HashSet;
use std::time::Instant;
use tokio::sync::{mpsc, watch};

/// The daemon and all of its state.
pub struct Daemon<C, R, L> {
    config: Config,
    compositor: C,
    resolver: R,
    launcher: L,
    store: StateStore,
    classifier: Classifier,
    projects: ProjectStore,
    active: ActiveProjectState,
    filter: VisibilityFilter,
    mode: WorkspaceMode,
    layouts: LayoutStore,
    bus: EventBus,
    started: Instant,
    /// `(project, layout)` pairs with a restore in flight.
    restoring: HashSet<(String, String)>,
    restores_tx: mpsc::UnboundedSender<RestoreDone>,
    restores_rx: mpsc::UnboundedReceiver<RestoreDone>,
}

/// The message of a caught panic, if it carried one.
fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown cause")
}

impl<C, R, L> Daemon<C, R, L>
where
    C: Compositor + Clone + 'static,
    R: IdentityResolver + Clone + 'static,
    L: Launcher + Clone + 'static,
{
    /// Assemble a daemon from already-opened stores.
    pub fn new(
        config: Config,
        compositor: C,
        resolver: R,
        launcher: L,
        projects: ProjectStore,
        mut active: ActiveProjectState,
        layouts: LayoutStore,
    ) -> Self {
        if let Some(name) = active.get().map(str::to_string) {
            if !projects.contains(&name) {
                warn!("active project {} no longer exists, starting in global mode", name);
                active.set(None);
            }
        }
        let classifier = Classifier::from_sources(&config.rules, projects.list());
        let mode = WorkspaceMode::new(config.workspace_mode.max_workspace);
        let (restores_tx, restores_rx) = mpsc::unbounded_channel();
        Self {
            config,
            compositor,
            resolver,
            launcher,
            store: StateStore::new(),
            classifier,
            projects,
            active,
            filter: VisibilityFilter::new(),
            mode,
            layouts,
            bus: EventBus::new(),
            started: Instant::now(),
            restoring: HashSet::new(),
            restores_tx,
            restores_rx,
        }
    }

    /// Open the stores under the configured data directory.
    pub fn open(config: Config, compositor: C, resolver: R, launcher: L) -> Result<Self, StoreError> {
        let data_dir = config.data_dir();
        let projects = ProjectStore::open(data_dir.join("projects"))?;
        let active = ActiveProjectState::load(data_dir.join("active-project.json"))?;
        let layouts = LayoutStore::new(data_dir.join("layouts"));
        info!("data directory: {}", data_dir.display());
        Ok(Self::new(
            config, compositor, resolver, launcher, projects, active, layouts,
        ))
    }

    /// Process events and requests until `shutdown` flips or both channels
    /// close and no restore is left running.
    pub async fn run(
        &mut self,
        mut events: mpsc::Receiver<CompositorEvent>,
        mut incoming: mpsc::Receiver<Incoming>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;
                Some(event) = events.recv() => self.handle_event(event).await,
                Some(done) = self.restores_rx.recv(), if !self.restoring.is_empty() => {
                    self.finish_restore(done)
                }
                Some(msg) = incoming.recv() => self.handle_incoming(msg).await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                else => break,
            }
        }
        info!("daemon loop stopped");
    }

    /// Answer one message from a connection task.
    pub async fn handle_incoming(&mut self, msg: Incoming) {
        match msg {
            Incoming::Request { request, reply } => self.handle_request(request, reply).await,
            Incoming::Subscribe {
                request,
                events,
                reply,
            } => {
                let response = self.handle_subscribe(request, events);
                let _ = reply.send(response);
            }
        }
    }

    fn publish(&mut self, kind: EventKind, payload: serde_json::Value) {
        self.bus.publish(Event::new(kind, payload));
    }

    /// Apply a compositor event and react to it.
    pub async fn handle_event(&mut self, event: CompositorEvent) {
        let was_available = self.store.is_available();
        let existed = match &event {
            CompositorEvent::WindowUpsert(w) => self.store.tree().window(w.id).is_some(),
            _ => false,
        };
        if !self.store.apply(&event) {
            return;
        }
        if self.store.needs_resync() {
            self.resync().await;
        }
        let tree = self.store.tree();
        self.filter.reconcile(&tree);

        match event {
            CompositorEvent::Connected(_) => {
                info!("compositor connected");
                self.publish(EventKind::Daemon, json!({ "event_type": "compositor_connected" }));
                self.adopt_all().await;
            }
            CompositorEvent::TreeReplaced(_) => {}
            CompositorEvent::Disconnected => {
                if was_available {
                    warn!("compositor disconnected");
                    self.publish(EventKind::Daemon, json!({ "event_type": "compositor_disconnected" }));
                }
            }
            CompositorEvent::WindowUpsert(window) => {
                self.publish(
                    EventKind::Window,
                    json!({
                        "event_type": if existed { "changed" } else { "new" },
                        "id": window.id,
                        "class": window.class,
                        "workspace": window.workspace,
                        "project": window.owner(),
                    }),
                );
                if !existed {
                    self.adopt(&window).await;
                }
            }
            CompositorEvent::WindowClosed { id } => {
                self.publish(EventKind::Window, json!({ "event_type": "closed", "id": id }));
            }
            CompositorEvent::WindowFocused { id } => {
                self.publish(EventKind::Window, json!({ "event_type": "focused", "id": id }));
            }
            CompositorEvent::WorkspaceUpsert(ws) => {
                self.publish(
                    EventKind::Workspace,
                    json!({ "event_type": "changed", "name": ws.name, "num": ws.num, "output": ws.output }),
                );
            }
            CompositorEvent::WorkspaceRemoved { name } => {
                self.publish(EventKind::Workspace, json!({ "event_type": "removed", "name": name }));
            }
            CompositorEvent::WorkspaceFocused { name } => {
                self.publish(EventKind::Workspace, json!({ "event_type": "focused", "name": name }));
            }
        }
    }

    /// Replace the mirror with a fresh tree query.  On failure the store
    /// stays stale and the next event tries again.
    async fn resync(&mut self) {
        match self.compositor.tree().await {
            Ok(tree) => {
                debug!("resynced tree after an out-of-order event");
                self.store.apply(&CompositorEvent::TreeReplaced(tree));
            }
            Err(e) => warn!("resync failed: {}", e),
        }
    }

    async fn adopt_all(&mut self) {
        let tree = self.store.tree();
        for window in tree.windows() {
            self.adopt(window).await;
        }
    }

    /// Mark a new scoped window for its project: the one named in its
    /// environment, else the active one.  In global mode windows without a
    /// project in their environment stay unmarked.
    ///
    /// Runs for windows the store sees for the first time and for every
    /// window after a resync.
    async fn adopt(&mut self, window: &Window) {
        if window.owner().is_some()
            || window.is_hidden()
            || !self.classifier.is_scoped(&window.class, &window.instance)
        {
            return;
        }

        let from_env = match window.pid {
            Some(pid) => match self.resolver.environment(pid).await {
                Ok(env) => env.get(ENV_PROJECT_NAME).filter(|p| !p.is_empty()).cloned(),
                Err(e) => {
                    debug!("no environment for window {}: {}", window.id, e);
                    None
                }
            },
            None => None,
        };
        let project = from_env
            .filter(|p| self.projects.contains(p))
            .or_else(|| self.active.get().map(str::to_string));
        let Some(project) = project else { return };

        let mark = project_mark(&project, window.id);
        if let Err(e) = self.compositor.add_mark(window.id, &mark).await {
            warn!("failed to mark window {}: {}", window.id, e);
            return;
        }
        debug!("window {} ({}) adopted by {}", window.id, window.class, project);

        let mut marked = window.clone();
        marked.marks.push(mark);
        if !in_target_set(&marked, &self.classifier, self.active.get()) {
            if let Err(e) = self.filter.hide(&self.compositor, &marked).await {
                warn!("failed to hide window {}: {}", window.id, e);
            }
        }
    }
}
