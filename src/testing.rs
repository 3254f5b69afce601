//! Test doubles shared by the unit tests.
//!
//! [`FakeDesktop`] plays compositor, process table and launcher at once: it
//! owns a [`Tree`], applies commands to it the way Sway would, records every
//! command and can be told to fail specific windows or launches.

use crate::environ::{ENV_APP_ID, ENV_APP_NAME, ENV_PROJECT_NAME};
use crate::model::{
    Output, Rect, Tree, Window, Workspace, WorkspaceTarget, SCRATCHPAD_OUTPUT,
    SCRATCHPAD_WORKSPACE,
};
use crate::traits::{Compositor, IdentityResolver, LaunchRequest, Launcher};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

pub const TEST_OUTPUT: &str = "DP-1";

pub fn window(id: i64, class: &str, workspace: &str) -> Window {
    Window {
        id,
        pid: Some(1000 + id as u32),
        class: class.into(),
        instance: class.to_lowercase(),
        title: format!("{} window", class),
        marks: vec![],
        workspace: workspace.into(),
        focused: false,
        floating: false,
        fullscreen: false,
        geometry: Rect {
            x: 0,
            y: 0,
            width: 800,
            height: 600,
        },
    }
}

/// Workspace `num` on [`TEST_OUTPUT`].  The windows' `workspace` field is
/// rewritten to match.
pub fn workspace(num: i32, windows: Vec<Window>) -> Workspace {
    let name = num.to_string();
    Workspace {
        num: Some(num),
        name: name.clone(),
        focused: false,
        visible: false,
        output: TEST_OUTPUT.into(),
        windows: windows
            .into_iter()
            .map(|mut w| {
                w.workspace = name.clone();
                w
            })
            .collect(),
    }
}

/// A tree with the scratchpad output first and [`TEST_OUTPUT`] holding
/// `workspaces`.
pub fn tree(workspaces: Vec<Workspace>) -> Tree {
    let scratch = Output {
        name: SCRATCHPAD_OUTPUT.into(),
        active: false,
        primary: false,
        geometry: Rect::default(),
        role: String::new(),
        workspaces: vec![Workspace {
            num: None,
            name: SCRATCHPAD_WORKSPACE.into(),
            focused: false,
            visible: false,
            output: SCRATCHPAD_OUTPUT.into(),
            windows: vec![],
        }],
    };
    let main = Output {
        name: TEST_OUTPUT.into(),
        active: true,
        primary: true,
        geometry: Rect {
            x: 0,
            y: 0,
            width: 2560,
            height: 1440,
        },
        role: String::new(),
        workspaces,
    };
    Tree::new(vec![scratch, main])
}

/// One command received by the fake compositor.
#[derive(Debug, Clone, PartialEq)]
pub enum FakeCommand {
    FocusWorkspace(WorkspaceTarget),
    MoveFocused(WorkspaceTarget),
    Hide(i64),
    Show { id: i64, workspace: String, floating: bool },
    MoveWindow(i64, WorkspaceTarget),
    SetFloating(i64, bool),
    SetGeometry(i64, Rect),
    AddMark(i64, String),
    RemoveMark(i64, String),
}

#[derive(Debug, thiserror::Error)]
#[error("fake desktop: {0}")]
pub struct FakeError(pub String);

#[derive(Debug, Default)]
struct Inner {
    tree: Tree,
    envs: HashMap<u32, HashMap<String, String>>,
    cmdlines: HashMap<u32, Vec<String>>,
    commands: Vec<FakeCommand>,
    launches: Vec<LaunchRequest>,
    fail_windows: HashSet<i64>,
    fail_launches: HashSet<String>,
    never_appear: HashSet<String>,
    panic_on_tree: bool,
    next_id: i64,
}

#[derive(Debug, Default)]
pub struct FakeDesktop {
    inner: Mutex<Inner>,
}

impl FakeDesktop {
    pub fn new(tree: Tree) -> Arc<Self> {
        let next_id = tree.windows().map(|w| w.id).max().unwrap_or(0) + 100;
        Arc::new(Self {
            inner: Mutex::new(Inner {
                tree,
                next_id,
                ..Default::default()
            }),
        })
    }

    /// Current compositor truth.
    pub fn snapshot(&self) -> Tree {
        self.inner.lock().unwrap().tree.clone()
    }

    pub fn commands(&self) -> Vec<FakeCommand> {
        self.inner.lock().unwrap().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.inner.lock().unwrap().commands.clear();
    }

    pub fn launches(&self) -> Vec<LaunchRequest> {
        self.inner.lock().unwrap().launches.clone()
    }

    /// Give window `pid` an injected identity.
    pub fn set_identity(&self, pid: u32, app_id: &str, app_name: &str, project: Option<&str>) {
        let mut env = HashMap::new();
        env.insert(ENV_APP_ID.to_string(), app_id.to_string());
        env.insert(ENV_APP_NAME.to_string(), app_name.to_string());
        if let Some(p) = project {
            env.insert(ENV_PROJECT_NAME.to_string(), p.to_string());
        }
        self.inner.lock().unwrap().envs.insert(pid, env);
    }

    pub fn set_cmdline(&self, pid: u32, argv: &[&str]) {
        self.inner
            .lock()
            .unwrap()
            .cmdlines
            .insert(pid, argv.iter().map(|s| s.to_string()).collect());
    }

    /// Commands targeting `id` fail.
    pub fn fail_window(&self, id: i64) {
        self.inner.lock().unwrap().fail_windows.insert(id);
    }

    /// Launching `app_name` fails outright.
    pub fn fail_launch(&self, app_name: &str) {
        self.inner.lock().unwrap().fail_launches.insert(app_name.into());
    }

    /// Swap the compositor truth without telling anyone.
    pub fn replace_tree(&self, tree: Tree) {
        self.inner.lock().unwrap().tree = tree;
    }

    /// Tree queries panic from now on.
    pub fn panic_on_tree(&self) {
        self.inner.lock().unwrap().panic_on_tree = true;
    }

    /// Launching `app_name` succeeds but no window ever shows up.
    pub fn never_appear(&self, app_name: &str) {
        self.inner.lock().unwrap().never_appear.insert(app_name.into());
    }

    fn check(&self, inner: &Inner, id: i64) -> Result<(), FakeError> {
        if inner.fail_windows.contains(&id) {
            return Err(FakeError(format!("no window with id {}", id)));
        }
        if inner.tree.window(id).is_none() {
            return Err(FakeError(format!("unknown window {}", id)));
        }
        Ok(())
    }
}

fn target_name(target: &WorkspaceTarget) -> String {
    match target {
        WorkspaceTarget::Number(n) => n.to_string(),
        WorkspaceTarget::Name(name) => name.clone(),
    }
}

fn take_window(tree: &mut Tree, id: i64) -> Option<Window> {
    for ws in tree.outputs.iter_mut().flat_map(|o| o.workspaces.iter_mut()) {
        if let Some(pos) = ws.windows.iter().position(|w| w.id == id) {
            return Some(ws.windows.remove(pos));
        }
    }
    None
}

fn place_window(tree: &mut Tree, mut window: Window, workspace: &str) {
    window.workspace = workspace.to_string();
    if tree.workspace(workspace).is_none() {
        let num = workspace.parse().ok();
        let output = tree
            .outputs
            .iter_mut()
            .find(|o| o.name == TEST_OUTPUT)
            .expect("test output");
        output.workspaces.push(Workspace {
            num,
            name: workspace.to_string(),
            focused: false,
            visible: false,
            output: TEST_OUTPUT.into(),
            windows: vec![],
        });
    }
    for ws in tree.outputs.iter_mut().flat_map(|o| o.workspaces.iter_mut()) {
        if ws.name == workspace {
            ws.windows.push(window);
            return;
        }
    }
}

fn window_mut(tree: &mut Tree, id: i64) -> Option<&mut Window> {
    tree.outputs
        .iter_mut()
        .flat_map(|o| o.workspaces.iter_mut())
        .flat_map(|w| w.windows.iter_mut())
        .find(|w| w.id == id)
}

#[async_trait]
impl Compositor for Arc<FakeDesktop> {
    type Error = FakeError;

    async fn tree(&self) -> Result<Tree, FakeError> {
        // Checked without holding the lock so a panic does not poison it.
        let panics = self.inner.lock().unwrap().panic_on_tree;
        if panics {
            panic!("fake desktop tree query exploded");
        }
        Ok(self.snapshot())
    }

    async fn focus_workspace(&self, target: &WorkspaceTarget) -> Result<(), FakeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.commands.push(FakeCommand::FocusWorkspace(target.clone()));
        let name = target_name(target);
        for ws in inner.tree.outputs.iter_mut().flat_map(|o| o.workspaces.iter_mut()) {
            ws.focused = ws.name == name;
        }
        Ok(())
    }

    async fn move_focused_to_workspace(&self, target: &WorkspaceTarget) -> Result<(), FakeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.commands.push(FakeCommand::MoveFocused(target.clone()));
        let name = target_name(target);
        if let Some(id) = inner.tree.focused_window().map(|w| w.id) {
            if let Some(w) = take_window(&mut inner.tree, id) {
                place_window(&mut inner.tree, w, &name);
            }
        }
        Ok(())
    }

    async fn hide_window(&self, id: i64) -> Result<(), FakeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.commands.push(FakeCommand::Hide(id));
        self.check(&inner, id)?;
        if let Some(mut w) = take_window(&mut inner.tree, id) {
            w.floating = true;
            place_window(&mut inner.tree, w, SCRATCHPAD_WORKSPACE);
        }
        Ok(())
    }

    async fn show_window(&self, id: i64, workspace: &str, floating: bool) -> Result<(), FakeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.commands.push(FakeCommand::Show {
            id,
            workspace: workspace.to_string(),
            floating,
        });
        self.check(&inner, id)?;
        if let Some(mut w) = take_window(&mut inner.tree, id) {
            w.floating = floating;
            place_window(&mut inner.tree, w, workspace);
        }
        Ok(())
    }

    async fn move_window_to_workspace(&self, id: i64, target: &WorkspaceTarget) -> Result<(), FakeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.commands.push(FakeCommand::MoveWindow(id, target.clone()));
        self.check(&inner, id)?;
        if let Some(w) = take_window(&mut inner.tree, id) {
            place_window(&mut inner.tree, w, &target_name(target));
        }
        Ok(())
    }

    async fn set_floating(&self, id: i64, floating: bool) -> Result<(), FakeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.commands.push(FakeCommand::SetFloating(id, floating));
        self.check(&inner, id)?;
        if let Some(w) = window_mut(&mut inner.tree, id) {
            w.floating = floating;
        }
        Ok(())
    }

    async fn set_geometry(&self, id: i64, geometry: Rect) -> Result<(), FakeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.commands.push(FakeCommand::SetGeometry(id, geometry));
        self.check(&inner, id)?;
        if let Some(w) = window_mut(&mut inner.tree, id) {
            w.geometry = geometry;
        }
        Ok(())
    }

    async fn add_mark(&self, id: i64, mark: &str) -> Result<(), FakeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.commands.push(FakeCommand::AddMark(id, mark.to_string()));
        self.check(&inner, id)?;
        if let Some(w) = window_mut(&mut inner.tree, id) {
            if !w.marks.iter().any(|m| m == mark) {
                w.marks.push(mark.to_string());
            }
        }
        Ok(())
    }

    async fn remove_mark(&self, id: i64, mark: &str) -> Result<(), FakeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.commands.push(FakeCommand::RemoveMark(id, mark.to_string()));
        self.check(&inner, id)?;
        if let Some(w) = window_mut(&mut inner.tree, id) {
            w.marks.retain(|m| m != mark);
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityResolver for Arc<FakeDesktop> {
    type Error = FakeError;

    async fn environment(&self, pid: u32) -> Result<HashMap<String, String>, FakeError> {
        self.inner
            .lock()
            .unwrap()
            .envs
            .get(&pid)
            .cloned()
            .ok_or_else(|| FakeError(format!("no such process {}", pid)))
    }

    async fn command_line(&self, pid: u32) -> Result<Vec<String>, FakeError> {
        self.inner
            .lock()
            .unwrap()
            .cmdlines
            .get(&pid)
            .cloned()
            .ok_or_else(|| FakeError(format!("no such process {}", pid)))
    }
}

#[async_trait]
impl Launcher for Arc<FakeDesktop> {
    type Error = FakeError;

    /// Spawns a window with the requested identity on the focused
    /// workspace (or `1`).
    async fn launch(&self, request: &LaunchRequest) -> Result<(), FakeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.launches.push(request.clone());
        if inner.fail_launches.contains(&request.app_name) {
            return Err(FakeError(format!("cannot launch {}", request.app_name)));
        }
        if inner.never_appear.contains(&request.app_name) {
            return Ok(());
        }
        inner.next_id += 1;
        let id = inner.next_id;
        let mut w = window(id, &request.app_name, "1");
        let pid = 1000 + id as u32;
        w.pid = Some(pid);
        let ws = inner
            .tree
            .focused_workspace()
            .map(|w| w.name.clone())
            .unwrap_or_else(|| "1".into());
        place_window(&mut inner.tree, w, &ws);

        let mut env = HashMap::new();
        env.insert(ENV_APP_ID.to_string(), request.app_id.clone());
        env.insert(ENV_APP_NAME.to_string(), request.app_name.clone());
        if let Some(p) = &request.project {
            env.insert(ENV_PROJECT_NAME.to_string(), p.clone());
        }
        inner.envs.insert(pid, env);
        inner.cmdlines.insert(pid, request.command.clone());
        Ok(())
    }
}
