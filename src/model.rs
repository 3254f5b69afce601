//! Types shared by every component of i3pm.
//!
//! [`Tree`] mirrors the compositor's `outputs → workspaces → windows`
//! hierarchy, [`CompositorEvent`] describes the diffs that keep a mirror of it
//! current, and [`ModeType`] / [`NavDirection`] are the workspace-mode
//! vocabulary.
//!
//! Keybindings forward raw strings; the daemon parses mode types ("goto",
//! "move") and directions ("up", "Home", …) case-insensitively.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Name of the workspace that holds scratchpad (parked) windows.
pub const SCRATCHPAD_WORKSPACE: &str = "__i3_scratch";

/// Name of the pseudo output that owns the scratchpad workspace.
pub const SCRATCHPAD_OUTPUT: &str = "__i3";

/// Prefix of the mark that records which project owns a window.
pub const MARK_PREFIX: &str = "project:";

/// Geometry of an output or window in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// A leaf window as reported by the compositor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// Compositor container id (`con_id`).
    pub id: i64,
    pub pid: Option<u32>,
    /// Wayland `app_id`, or the X11 class for XWayland windows.
    pub class: String,
    pub instance: String,
    pub title: String,
    #[serde(default)]
    pub marks: Vec<String>,
    /// Name of the workspace the window lives on.
    pub workspace: String,
    pub focused: bool,
    pub floating: bool,
    pub fullscreen: bool,
    pub geometry: Rect,
}

impl Window {
    /// Name of the project whose ownership mark this window carries.
    pub fn owner(&self) -> Option<&str> {
        self.marks.iter().find_map(|m| parse_project_mark(m))
    }

    /// The full ownership mark, if any.
    pub fn owner_mark(&self) -> Option<&str> {
        self.marks
            .iter()
            .find(|m| parse_project_mark(m).is_some())
            .map(String::as_str)
    }

    /// Whether the window is parked in the scratchpad.
    pub fn is_hidden(&self) -> bool {
        self.workspace == SCRATCHPAD_WORKSPACE
    }
}

/// Build the ownership mark for `window_id` in `project`.
///
/// i3 and Sway allow a mark on only one window at a time, so the window id
/// is part of the mark.
pub fn project_mark(project: &str, window_id: i64) -> String {
    format!("{}{}:{}", MARK_PREFIX, project, window_id)
}

/// Extract the project name from a `project:<name>:<id>` mark.
pub fn parse_project_mark(mark: &str) -> Option<&str> {
    let rest = mark.strip_prefix(MARK_PREFIX)?;
    let (name, id) = rest.rsplit_once(':')?;
    if name.is_empty() || id.parse::<i64>().is_err() {
        return None;
    }
    Some(name)
}

/// A workspace and the windows on it, in compositor order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    /// Workspace number; `None` for purely named workspaces.
    pub num: Option<i32>,
    pub name: String,
    pub focused: bool,
    pub visible: bool,
    /// Name of the owning output.
    pub output: String,
    #[serde(default)]
    pub windows: Vec<Window>,
}

impl Workspace {
    pub fn is_scratchpad(&self) -> bool {
        self.name == SCRATCHPAD_WORKSPACE
    }
}

/// A monitor and its workspaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    /// Name the compositor uses for this output (e.g. `"DP-1"`).
    pub name: String,
    pub active: bool,
    pub primary: bool,
    pub geometry: Rect,
    /// `primary`, `secondary`, `tertiary`, … derived from output order.
    pub role: String,
    #[serde(default)]
    pub workspaces: Vec<Workspace>,
}

/// The complete compositor state: outputs → workspaces → windows.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tree {
    pub outputs: Vec<Output>,
}

impl Tree {
    pub fn new(outputs: Vec<Output>) -> Self {
        let mut tree = Self { outputs };
        tree.assign_roles();
        tree
    }

    /// Every workspace, scratchpad included.
    pub fn workspaces(&self) -> impl Iterator<Item = &Workspace> {
        self.outputs.iter().flat_map(|o| o.workspaces.iter())
    }

    /// Every window, scratchpad included.
    pub fn windows(&self) -> impl Iterator<Item = &Window> {
        self.workspaces().flat_map(|w| w.windows.iter())
    }

    pub fn window(&self, id: i64) -> Option<&Window> {
        self.windows().find(|w| w.id == id)
    }

    pub fn workspace(&self, name: &str) -> Option<&Workspace> {
        self.workspaces().find(|w| w.name == name)
    }

    pub fn focused_workspace(&self) -> Option<&Workspace> {
        self.workspaces().find(|w| w.focused)
    }

    pub fn focused_window(&self) -> Option<&Window> {
        self.windows().find(|w| w.focused)
    }

    /// Workspaces that hold at least one window, ordered by number.
    pub fn populated_workspaces(&self) -> Vec<&Workspace> {
        let mut populated: Vec<&Workspace> = self
            .workspaces()
            .filter(|w| !w.is_scratchpad() && !w.windows.is_empty())
            .collect();
        populated.sort_by_key(|w| w.num.unwrap_or(i32::MAX));
        populated
    }

    /// Assign output roles by position: the primary output first, then the
    /// remaining active outputs in compositor order.
    pub fn assign_roles(&mut self) {
        let mut order: Vec<usize> = self
            .outputs
            .iter()
            .enumerate()
            .filter(|(_, o)| o.name != SCRATCHPAD_OUTPUT)
            .map(|(i, _)| i)
            .collect();
        order.sort_by_key(|&i| (!self.outputs[i].primary, !self.outputs[i].active));
        for (rank, idx) in order.into_iter().enumerate() {
            self.outputs[idx].role = role_name(rank);
        }
        for output in &mut self.outputs {
            if output.name == SCRATCHPAD_OUTPUT {
                output.role = "scratchpad".into();
            }
        }
    }
}

fn role_name(rank: usize) -> String {
    match rank {
        0 => "primary".into(),
        1 => "secondary".into(),
        2 => "tertiary".into(),
        n => format!("output-{}", n + 1),
    }
}

/// A diff delivered by the compositor connection, applied in delivery order
/// by the [`StateStore`](crate::state::StateStore).
#[derive(Debug, Clone, PartialEq)]
pub enum CompositorEvent {
    /// The connection was (re-)established; carries a full tree query.
    Connected(Tree),
    /// The connection was lost.  The mirror must be invalidated.
    Disconnected,
    /// Output layout changed (or a change too broad to diff); full tree.
    TreeReplaced(Tree),
    /// A window was created or any of its properties changed.
    WindowUpsert(Window),
    WindowClosed { id: i64 },
    WindowFocused { id: i64 },
    /// A workspace was created or its metadata changed.  The `windows` field
    /// of the payload is ignored; windows travel in their own events.
    WorkspaceUpsert(Workspace),
    WorkspaceRemoved { name: String },
    WorkspaceFocused { name: String },
}

/// Target of a workspace command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceTarget {
    Number(i32),
    Name(String),
}

impl fmt::Display for WorkspaceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkspaceTarget::Number(n) => write!(f, "number {}", n),
            WorkspaceTarget::Name(name) => write!(f, "\"{}\"", name.replace('"', "\\\"")),
        }
    }
}

/// What `execute` does with the accumulated workspace number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeType {
    /// Focus the workspace.
    Goto,
    /// Move the focused window to the workspace and follow it.
    Move,
}

impl fmt::Display for ModeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModeType::Goto => write!(f, "goto"),
            ModeType::Move => write!(f, "move"),
        }
    }
}

/// Parse a mode type string (case-insensitive).
pub fn parse_mode_type(s: &str) -> Option<ModeType> {
    match s.trim().to_lowercase().as_str() {
        "goto" => Some(ModeType::Goto),
        "move" => Some(ModeType::Move),
        _ => None,
    }
}

impl<'de> Deserialize<'de> for ModeType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_mode_type(&s).ok_or_else(|| DeError::custom(format!("invalid mode type: {:?}", s)))
    }
}

/// Direction of a navigation intent in workspace mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NavDirection {
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
}

impl fmt::Display for NavDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NavDirection::Up => write!(f, "up"),
            NavDirection::Down => write!(f, "down"),
            NavDirection::Left => write!(f, "left"),
            NavDirection::Right => write!(f, "right"),
            NavDirection::Home => write!(f, "home"),
            NavDirection::End => write!(f, "end"),
        }
    }
}

/// Parse a navigation direction (case-insensitive; surrounding whitespace
/// is ignored).
pub fn parse_nav_direction(s: &str) -> Option<NavDirection> {
    match s.trim().to_lowercase().as_str() {
        "up" => Some(NavDirection::Up),
        "down" => Some(NavDirection::Down),
        "left" => Some(NavDirection::Left),
        "right" => Some(NavDirection::Right),
        "home" => Some(NavDirection::Home),
        "end" => Some(NavDirection::End),
        _ => None,
    }
}

impl<'de> Deserialize<'de> for NavDirection {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_nav_direction(&s)
            .ok_or_else(|| DeError::custom(format!("invalid direction: {:?}", s)))
    }
}
