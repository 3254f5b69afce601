//! Quick-jump workspace mode.
//!
//! ```text
//! Inactive --enter(mode)--> Active(mode, "")
//! Active   --add_digit-->   Active(mode, digits)
//! Active   --cancel-->      Inactive
//! Active   --execute-->     Inactive   (focus / move to the typed workspace)
//! ```
//!
//! Navigation and delete intents do not touch local state: the overlay that
//! renders workspace mode owns the highlighted entry, and the daemon only
//! broadcasts the intent.  [`SelectionCursor`] is the reference model such a
//! subscriber follows.
//!
//! Every call broadcasts on the [`EventBus`] and is expected to finish well
//! within [`CALL_BUDGET`], since it gates on-screen feedback.

use crate::error::DaemonError;
use crate::ipc::bus::EventBus;
use crate::ipc::protocol::{Event, EventKind};
use crate::model::{parse_mode_type, parse_nav_direction, ModeType, NavDirection, WorkspaceTarget};
use crate::traits::Compositor;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Soft latency budget for one workspace-mode call.
pub const CALL_BUDGET: Duration = Duration::from_millis(50);

/// Snapshot of the mode, as returned by `workspace_mode.state`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkspaceModeState {
    pub active: bool,
    pub mode_type: Option<ModeType>,
    pub digits: String,
    pub entered_at: Option<DateTime<Utc>>,
}

/// Payload of `workspace_mode` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ModeEvent {
    Enter { mode_type: ModeType },
    Digit { mode_type: ModeType, digits: String },
    Nav { mode_type: ModeType, direction: NavDirection },
    Delete { mode_type: ModeType },
    Cancel { mode_type: ModeType },
    Execute { mode_type: ModeType, target: Option<i32> },
}

/// Result of [`WorkspaceMode::execute`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecuteOutcome {
    pub mode_type: ModeType,
    /// `None` when no digits were typed; the overlay resolves its own
    /// selection in that case.
    pub workspace: Option<i32>,
}

/// The workspace-mode state container.
#[derive(Debug)]
pub struct WorkspaceMode {
    state: WorkspaceModeState,
    max_workspace: u32,
}

/// Logs a warning when dropped after [`CALL_BUDGET`].
struct CallTimer {
    op: &'static str,
    started: Instant,
}

impl CallTimer {
    fn start(op: &'static str) -> Self {
        Self {
            op,
            started: Instant::now(),
        }
    }
}

impl Drop for CallTimer {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        if elapsed > CALL_BUDGET {
            warn!("workspace_mode.{} took {:?}", self.op, elapsed);
        }
    }
}

impl WorkspaceMode {
    pub fn new(max_workspace: u32) -> Self {
        Self {
            state: WorkspaceModeState::default(),
            max_workspace: max_workspace.max(1),
        }
    }

    pub fn state(&self) -> &WorkspaceModeState {
        &self.state
    }

    fn active_mode(&self, op: &str) -> Result<ModeType, DaemonError> {
        match (self.state.active, self.state.mode_type) {
            (true, Some(mode)) => Ok(mode),
            _ => Err(DaemonError::StateConflict(format!(
                "workspace mode is not active ({})",
                op
            ))),
        }
    }

    fn broadcast(bus: &mut EventBus, event: ModeEvent) {
        let delivered = bus.publish(Event::new(EventKind::WorkspaceMode, &event));
        debug!("workspace mode {:?} delivered to {}", event, delivered);
    }

    /// Enter the mode.  `mode` is `goto` or `move`.
    pub fn enter(&mut self, mode: &str, bus: &mut EventBus) -> Result<&WorkspaceModeState, DaemonError> {
        let _timer = CallTimer::start("enter");
        let mode_type = parse_mode_type(mode)
            .ok_or_else(|| DaemonError::Validation(format!("unknown mode type {:?}", mode)))?;
        if self.state.active {
            return Err(DaemonError::StateConflict(
                "workspace mode is already active".into(),
            ));
        }
        self.state = WorkspaceModeState {
            active: true,
            mode_type: Some(mode_type),
            digits: String::new(),
            entered_at: Some(Utc::now()),
        };
        Self::broadcast(bus, ModeEvent::Enter { mode_type });
        Ok(&self.state)
    }

    /// Type one digit.
    ///
    /// Digits append while the number stays within `1..=max_workspace`;
    /// otherwise the new digit starts a fresh number.  A number cannot
    /// start with `0`, so such a digit is ignored.
    pub fn add_digit(&mut self, digit: &str, bus: &mut EventBus) -> Result<&WorkspaceModeState, DaemonError> {
        let _timer = CallTimer::start("add_digit");
        let mut chars = digit.chars();
        let d = match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_digit() => c,
            _ => {
                return Err(DaemonError::Validation(format!(
                    "expected a single digit, got {:?}",
                    digit
                )))
            }
        };
        let mode_type = self.active_mode("add_digit")?;

        let mut appended = self.state.digits.clone();
        appended.push(d);
        let in_range = appended
            .parse::<u32>()
            .is_ok_and(|n| (1..=self.max_workspace).contains(&n));
        if in_range && !appended.starts_with('0') {
            self.state.digits = appended;
        } else if d != '0' {
            self.state.digits = d.to_string();
        } else {
            debug!("ignoring leading zero");
            return Ok(&self.state);
        }

        Self::broadcast(
            bus,
            ModeEvent::Digit {
                mode_type,
                digits: self.state.digits.clone(),
            },
        );
        Ok(&self.state)
    }

    /// Broadcast a navigation intent.
    pub fn nav(&mut self, direction: &str, bus: &mut EventBus) -> Result<NavDirection, DaemonError> {
        let _timer = CallTimer::start("nav");
        let direction = parse_nav_direction(direction)
            .ok_or_else(|| DaemonError::Validation(format!("unknown direction {:?}", direction)))?;
        let mode_type = self.active_mode("nav")?;
        Self::broadcast(bus, ModeEvent::Nav { mode_type, direction });
        Ok(direction)
    }

    /// Broadcast a delete-selected-entry intent.
    pub fn delete(&mut self, bus: &mut EventBus) -> Result<(), DaemonError> {
        let _timer = CallTimer::start("delete");
        let mode_type = self.active_mode("delete")?;
        Self::broadcast(bus, ModeEvent::Delete { mode_type });
        Ok(())
    }

    /// Leave the mode without touching the compositor.
    pub fn cancel(&mut self, bus: &mut EventBus) -> Result<(), DaemonError> {
        let _timer = CallTimer::start("cancel");
        let mode_type = self.active_mode("cancel")?;
        self.state = WorkspaceModeState::default();
        Self::broadcast(bus, ModeEvent::Cancel { mode_type });
        Ok(())
    }

    /// Leave the mode and jump to (or move the focused window to) the typed
    /// workspace.
    ///
    /// The mode is inactive and the event broadcast before the compositor
    /// command is issued; a failing command is reported as a transport
    /// error.
    pub async fn execute<C: Compositor>(
        &mut self,
        compositor: &C,
        bus: &mut EventBus,
    ) -> Result<ExecuteOutcome, DaemonError> {
        let _timer = CallTimer::start("execute");
        let mode_type = self.active_mode("execute")?;
        let workspace = self.state.digits.parse::<i32>().ok();
        self.state = WorkspaceModeState::default();
        Self::broadcast(
            bus,
            ModeEvent::Execute {
                mode_type,
                target: workspace,
            },
        );

        if let Some(n) = workspace {
            let target = WorkspaceTarget::Number(n);
            let result = match mode_type {
                ModeType::Goto => compositor.focus_workspace(&target).await,
                ModeType::Move => compositor.move_focused_to_workspace(&target).await,
            };
            result.map_err(DaemonError::transport)?;
            info!("workspace mode {} -> {}", mode_type, n);
        }
        Ok(ExecuteOutcome {
            mode_type,
            workspace,
        })
    }
}

/// Selection model for subscribers that own the highlighted entry.
///
/// Up/left move back, down/right move forward, both wrapping around;
/// home/end jump to the first/last entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionCursor {
    len: usize,
    index: usize,
}

impl SelectionCursor {
    /// Cursor over `len` entries, on the first one.
    pub fn new(len: usize) -> Self {
        Self { len, index: 0 }
    }

    /// The selected entry, `None` if there are no entries.
    pub fn index(&self) -> Option<usize> {
        (self.len > 0).then_some(self.index)
    }

    pub fn apply(&mut self, direction: NavDirection) -> Option<usize> {
        if self.len == 0 {
            return None;
        }
        self.index = match direction {
            NavDirection::Up | NavDirection::Left => (self.index + self.len - 1) % self.len,
            NavDirection::Down | NavDirection::Right => (self.index + 1) % self.len,
            NavDirection::Home => 0,
            NavDirection::End => self.len - 1,
        };
        Some(self.index)
    }
}
