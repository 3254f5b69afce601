//! Project visibility filter.
//!
//! On a project switch the filter computes the *target set* (scoped windows
//! owned by the new project plus every global window), hides every visible
//! window outside it and shows every parked window inside it.  Hidden
//! windows are moved to the scratchpad, never closed.
//!
//! The filter remembers where it parked each window so it can put it back
//! on the same workspace with the same floating state.  Because commands
//! are only reflected in the [`StateStore`](crate::state::StateStore) once
//! the compositor echoes them back as events, the filter also tracks its own
//! in-flight hides and shows; a second switch issued before the echo arrives
//! does not repeat them.

use crate::classify::Classifier;
use crate::model::{project_mark, Tree, Window};
use crate::project::ActiveProjectState;
use crate::traits::Compositor;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;

/// Workspace used to show a window when nothing better is known.
const FALLBACK_WORKSPACE: &str = "1";

/// Where a window lived before it was parked.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Placement {
    workspace: String,
    floating: bool,
}

#[derive(Debug, Clone)]
struct Parked {
    placement: Placement,
    /// Set once the store has seen the window in the scratchpad.
    confirmed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterAction {
    Hide,
    Show,
}

/// A compositor command that failed during a switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedCommand {
    pub window_id: i64,
    pub action: FilterAction,
    pub error: String,
}

/// Result of [`VisibilityFilter::switch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwitchReport {
    pub previous: Option<String>,
    pub new: Option<String>,
    pub windows_hidden: usize,
    pub windows_shown: usize,
    pub failed: Vec<FailedCommand>,
}

/// Hides and shows windows on project switches.
#[derive(Debug, Default)]
pub struct VisibilityFilter {
    parked: HashMap<i64, Parked>,
    /// Shows issued but not yet reflected in the store.
    showing: HashMap<i64, Placement>,
}

/// Whether `window` belongs in the target set of `target`.
///
/// Unmarked windows and windows the classifier calls global are always in
/// the set; a marked scoped window only for its own project.
pub fn in_target_set(window: &Window, classifier: &Classifier, target: Option<&str>) -> bool {
    match window.owner() {
        None => true,
        Some(owner) => {
            !classifier.is_scoped(&window.class, &window.instance) || target == Some(owner)
        }
    }
}

impl VisibilityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of windows currently parked by the filter.
    pub fn parked_count(&self) -> usize {
        self.parked.len()
    }

    /// Whether the window should be treated as hidden, taking in-flight
    /// commands into account.
    fn effectively_hidden(&self, window: &Window) -> bool {
        if self.showing.contains_key(&window.id) {
            false
        } else if self.parked.contains_key(&window.id) {
            true
        } else {
            window.is_hidden()
        }
    }

    /// Switch to `target` (`None` = global mode) and update `active`.
    ///
    /// The caller validates that `target` exists.  Individual command
    /// failures are logged, recorded in the report and skipped.
    pub async fn switch<C: Compositor>(
        &mut self,
        compositor: &C,
        tree: &Tree,
        classifier: &Classifier,
        active: &mut ActiveProjectState,
        target: Option<&str>,
    ) -> SwitchReport {
        let fallback = tree
            .focused_workspace()
            .filter(|w| !w.is_scratchpad())
            .map(|w| w.name.clone())
            .unwrap_or_else(|| FALLBACK_WORKSPACE.to_string());

        let mut to_hide = Vec::new();
        let mut to_show = Vec::new();
        for window in tree.windows() {
            let wanted = in_target_set(window, classifier, target);
            let hidden = self.effectively_hidden(window);
            if !wanted && !hidden {
                to_hide.push(window);
            } else if wanted
                && hidden
                && (self.parked.contains_key(&window.id) || window.owner().is_some())
            {
                to_show.push(window);
            }
        }
        debug!(
            "switch to {:?}: {} to hide, {} to show",
            target,
            to_hide.len(),
            to_show.len()
        );

        let mut report = SwitchReport {
            previous: None,
            new: target.map(str::to_string),
            windows_hidden: 0,
            windows_shown: 0,
            failed: Vec::new(),
        };

        for window in to_hide {
            match self.hide(compositor, window).await {
                Ok(()) => report.windows_hidden += 1,
                Err(e) => {
                    warn!("failed to hide window {}: {}", window.id, e);
                    report.failed.push(FailedCommand {
                        window_id: window.id,
                        action: FilterAction::Hide,
                        error: e.to_string(),
                    });
                }
            }
        }

        for window in to_show {
            let placement = self
                .parked
                .get(&window.id)
                .map(|p| p.placement.clone())
                .unwrap_or_else(|| Placement {
                    workspace: fallback.clone(),
                    floating: false,
                });
            match compositor
                .show_window(window.id, &placement.workspace, placement.floating)
                .await
            {
                Ok(()) => {
                    self.parked.remove(&window.id);
                    self.showing.insert(window.id, placement);
                    report.windows_shown += 1;
                }
                Err(e) => {
                    warn!("failed to show window {}: {}", window.id, e);
                    report.failed.push(FailedCommand {
                        window_id: window.id,
                        action: FilterAction::Show,
                        error: e.to_string(),
                    });
                }
            }
        }

        report.previous = active.set(target.map(str::to_string));
        info!(
            "switched {:?} -> {:?}: {} hidden, {} shown, {} failed",
            report.previous,
            report.new,
            report.windows_hidden,
            report.windows_shown,
            report.failed.len()
        );
        report
    }

    /// Park one window, remembering its placement.
    pub async fn hide<C: Compositor>(&mut self, compositor: &C, window: &Window) -> Result<(), C::Error> {
        let placement = self.showing.remove(&window.id).unwrap_or_else(|| Placement {
            workspace: window.workspace.clone(),
            floating: window.floating,
        });
        compositor.hide_window(window.id).await?;
        self.parked.insert(
            window.id,
            Parked {
                placement,
                confirmed: false,
            },
        );
        Ok(())
    }

    /// Reconcile in-flight bookkeeping with a fresh snapshot.  Called after
    /// every store update.
    pub fn reconcile(&mut self, tree: &Tree) {
        self.parked.retain(|id, parked| match tree.window(*id) {
            None => false,
            Some(w) if w.is_hidden() => {
                parked.confirmed = true;
                true
            }
            // Pulled out of the scratchpad by someone else.
            Some(_) => !parked.confirmed,
        });
        self.showing
            .retain(|id, _| tree.window(*id).is_some_and(|w| w.is_hidden()));
    }

    /// Drop every trace of `project`'s ownership: unmark its windows and
    /// bring back the ones parked for it.  Returns how many were shown.
    pub async fn release_project<C: Compositor>(
        &mut self,
        compositor: &C,
        tree: &Tree,
        project: &str,
    ) -> usize {
        let fallback = tree
            .focused_workspace()
            .filter(|w| !w.is_scratchpad())
            .map(|w| w.name.clone())
            .unwrap_or_else(|| FALLBACK_WORKSPACE.to_string());
        let mut shown = 0;
        for window in tree.windows().filter(|w| w.owner() == Some(project)) {
            if let Some(mark) = window.owner_mark() {
                if let Err(e) = compositor.remove_mark(window.id, mark).await {
                    warn!("failed to unmark window {}: {}", window.id, e);
                }
            }
            if self.effectively_hidden(window) {
                let placement = self
                    .parked
                    .remove(&window.id)
                    .map(|p| p.placement)
                    .unwrap_or_else(|| Placement {
                        workspace: fallback.clone(),
                        floating: false,
                    });
                match compositor
                    .show_window(window.id, &placement.workspace, placement.floating)
                    .await
                {
                    Ok(()) => {
                        self.showing.insert(window.id, placement);
                        shown += 1;
                    }
                    Err(e) => warn!("failed to show window {}: {}", window.id, e),
                }
            }
        }
        shown
    }

    /// Re-mark `old`'s windows for `new`.  Returns how many were re-marked.
    pub async fn rename_project<C: Compositor>(
        &self,
        compositor: &C,
        tree: &Tree,
        old: &str,
        new: &str,
    ) -> usize {
        let mut renamed = 0;
        for window in tree.windows().filter(|w| w.owner() == Some(old)) {
            let Some(mark) = window.owner_mark() else { continue };
            let result = async {
                compositor.remove_mark(window.id, mark).await?;
                compositor
                    .add_mark(window.id, &project_mark(new, window.id))
                    .await
            }
            .await;
            match result {
                Ok(()) => renamed += 1,
                Err(e) => warn!("failed to re-mark window {}: {}", window.id, e),
            }
        }
        renamed
    }
}
