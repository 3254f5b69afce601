//! Layout restore.
//!
//! Each snapshot window is matched by app id against the windows already
//! open; missing applications are relaunched with the same identity forced
//! into their environment and waited for (bounded by a timeout) before every
//! matched window is moved into place.  Failures are collected, never
//! raised: the report lists what could not be restored.

use super::schema::{LayoutSnapshot, WindowSnapshot};
use crate::config::LayoutConfig;
use crate::environ::AppIdentity;
use crate::error::DaemonError;
use crate::model::{Tree, WorkspaceTarget};
use crate::traits::{Compositor, IdentityResolver, LaunchRequest, Launcher};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

/// Knobs for [`restore`].
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// How long to wait for relaunched windows to appear.
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// `app name -> argv`; preferred over the captured command line.
    pub apps: BTreeMap<String, Vec<String>>,
    /// Working directory for relaunched applications.
    pub directory: Option<PathBuf>,
}

impl RestoreOptions {
    pub fn from_config(config: &LayoutConfig, directory: Option<PathBuf>) -> Self {
        Self {
            timeout: config.restore_timeout(),
            poll_interval: config.poll_interval(),
            apps: config.apps.clone(),
            directory,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// A window with the app id is already open.
    Reuse,
    /// The application has to be relaunched.
    Launch,
}

/// What restore intends to do for one snapshot window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreAction {
    pub app_id: String,
    pub app_name: String,
    pub workspace: i32,
    pub action: ActionKind,
}

/// Result of [`restore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub dry_run: bool,
    /// Relaunched windows that appeared in time.
    pub launched: usize,
    /// Windows moved into place.
    pub positioned: usize,
    /// App names that could not be restored.
    pub failed: Vec<String>,
    pub actions: Vec<RestoreAction>,
}

/// Resolves and remembers `pid -> app id`; a process keeps its
/// environment for its whole life.  Failed reads are retried on the next
/// lookup: a freshly spawned process may not be readable yet.
struct IdentityCache<'a, R> {
    resolver: &'a R,
    by_pid: HashMap<u32, Option<String>>,
}

impl<'a, R: IdentityResolver> IdentityCache<'a, R> {
    fn new(resolver: &'a R) -> Self {
        Self {
            resolver,
            by_pid: HashMap::new(),
        }
    }

    async fn app_id(&mut self, pid: u32) -> Option<String> {
        if let Some(cached) = self.by_pid.get(&pid) {
            return cached.clone();
        }
        match self.resolver.environment(pid).await {
            Ok(env) => {
                let app_id = AppIdentity::from_env(&env).map(|id| id.app_id);
                self.by_pid.insert(pid, app_id.clone());
                app_id
            }
            Err(e) => {
                debug!("no environment for pid {}: {}", pid, e);
                None
            }
        }
    }
}

/// Restore `snapshot`.  With `dry_run` only the intended actions are
/// reported; nothing is launched or moved.
pub async fn restore<C, R, L>(
    compositor: &C,
    resolver: &R,
    launcher: &L,
    snapshot: &LayoutSnapshot,
    options: &RestoreOptions,
    dry_run: bool,
) -> Result<RestoreReport, DaemonError>
where
    C: Compositor,
    R: IdentityResolver,
    L: Launcher,
{
    snapshot.validate()?;
    let tree = compositor.tree().await.map_err(DaemonError::transport)?;
    let mut cache = IdentityCache::new(resolver);

    let mut open: HashMap<String, i64> = HashMap::new();
    for (id, pid) in with_pids(&tree) {
        if let Some(app_id) = cache.app_id(pid).await {
            open.entry(app_id).or_insert(id);
        }
    }

    let mut report = RestoreReport {
        dry_run,
        actions: snapshot
            .windows
            .iter()
            .map(|w| RestoreAction {
                app_id: w.app_id.clone(),
                app_name: w.app_name.clone(),
                workspace: w.workspace,
                action: if open.contains_key(&w.app_id) {
                    ActionKind::Reuse
                } else {
                    ActionKind::Launch
                },
            })
            .collect(),
        ..Default::default()
    };
    if dry_run {
        return Ok(report);
    }

    let mut matched: Vec<(&WindowSnapshot, i64)> = Vec::new();
    let mut claimed: HashSet<i64> = HashSet::new();
    let mut pending: Vec<&WindowSnapshot> = Vec::new();

    for w in &snapshot.windows {
        if let Some(&id) = open.get(&w.app_id) {
            claimed.insert(id);
            matched.push((w, id));
            continue;
        }
        let command = options
            .apps
            .get(&w.app_name)
            .filter(|c| !c.is_empty())
            .cloned()
            .unwrap_or_else(|| w.command.clone());
        if command.is_empty() {
            warn!("no command to relaunch {} ({})", w.app_name, w.app_id);
            report.failed.push(w.app_name.clone());
            continue;
        }
        let request = LaunchRequest {
            app_name: w.app_name.clone(),
            app_id: w.app_id.clone(),
            project: Some(snapshot.project.clone()),
            directory: options.directory.clone(),
            command,
        };
        match launcher.launch(&request).await {
            Ok(()) => pending.push(w),
            Err(e) => {
                warn!("failed to launch {}: {}", w.app_name, e);
                report.failed.push(w.app_name.clone());
            }
        }
    }

    let reused = matched.len();
    if !pending.is_empty() {
        let wait = wait_for_windows(
            compositor,
            &mut cache,
            &mut pending,
            &mut claimed,
            &mut matched,
            options.poll_interval,
        );
        if tokio::time::timeout(options.timeout, wait).await.is_err() {
            for w in &pending {
                warn!(
                    "{} ({}) did not appear within {:?}",
                    w.app_name, w.app_id, options.timeout
                );
                report.failed.push(w.app_name.clone());
            }
        }
    }
    report.launched = matched.len() - reused;

    let mut focus = None;
    for (w, id) in &matched {
        match position(compositor, *id, w).await {
            Ok(()) => {
                report.positioned += 1;
                if w.focused {
                    focus = Some(w.workspace);
                }
            }
            Err(e) => {
                warn!("failed to position {} (window {}): {}", w.app_name, id, e);
                report.failed.push(w.app_name.clone());
            }
        }
    }
    if let Some(ws) = focus {
        if let Err(e) = compositor.focus_workspace(&WorkspaceTarget::Number(ws)).await {
            warn!("failed to focus workspace {}: {}", ws, e);
        }
    }

    info!(
        "restored {}/{}: {} launched, {} positioned, {} failed",
        snapshot.project,
        snapshot.name,
        report.launched,
        report.positioned,
        report.failed.len()
    );
    Ok(report)
}

/// Poll the tree until every pending snapshot window has a match.  Runs
/// under a timeout; whatever is left in `pending` afterwards never showed
/// up.
async fn wait_for_windows<'s, C, R>(
    compositor: &C,
    cache: &mut IdentityCache<'_, R>,
    pending: &mut Vec<&'s WindowSnapshot>,
    claimed: &mut HashSet<i64>,
    matched: &mut Vec<(&'s WindowSnapshot, i64)>,
    poll_interval: Duration,
) where
    C: Compositor,
    R: IdentityResolver,
{
    loop {
        match compositor.tree().await {
            Ok(tree) => {
                for (id, pid) in with_pids(&tree) {
                    if claimed.contains(&id) {
                        continue;
                    }
                    let Some(app_id) = cache.app_id(pid).await else { continue };
                    if let Some(pos) = pending.iter().position(|w| w.app_id == app_id) {
                        let w = pending.remove(pos);
                        debug!("{} appeared as window {}", w.app_id, id);
                        claimed.insert(id);
                        matched.push((w, id));
                    }
                }
            }
            Err(e) => debug!("tree query failed while waiting: {}", e),
        }
        if pending.is_empty() {
            return;
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// `(window id, pid)` for every window that has a process.
fn with_pids(tree: &Tree) -> Vec<(i64, u32)> {
    tree.windows()
        .filter_map(|w| w.pid.map(|pid| (w.id, pid)))
        .collect()
}

async fn position<C: Compositor>(compositor: &C, id: i64, w: &WindowSnapshot) -> Result<(), C::Error> {
    compositor
        .move_window_to_workspace(id, &WorkspaceTarget::Number(w.workspace))
        .await?;
    compositor.set_floating(id, w.floating).await?;
    if w.floating {
        compositor.set_geometry(id, w.geometry).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::capture::capture;
    use crate::layout::schema::CURRENT_SCHEMA_VERSION;
    use crate::model::Rect;
    use crate::testing::{tree, window, workspace, FakeCommand, FakeDesktop};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    fn options() -> RestoreOptions {
        RestoreOptions {
            timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(50),
            apps: BTreeMap::new(),
            directory: Some(PathBuf::from("/home/u/alpha")),
        }
    }

    fn snap_window(app: &str, workspace: i32) -> WindowSnapshot {
        WindowSnapshot {
            app_id: format!("{}-alpha-{}", app, workspace),
            app_name: app.into(),
            workspace,
            output: "DP-1".into(),
            geometry: Rect::default(),
            floating: false,
            focused: false,
            window_class: app.into(),
            command: vec![app.into()],
        }
    }

    fn snapshot(windows: Vec<WindowSnapshot>) -> LayoutSnapshot {
        LayoutSnapshot {
            schema_version: CURRENT_SCHEMA_VERSION,
            project: "alpha".into(),
            name: "main".into(),
            captured_at: Utc::now(),
            windows,
        }
    }

    #[tokio::test]
    async fn capture_then_dry_run_launches_nothing() {
        let fake = FakeDesktop::new(tree(vec![
            workspace(1, vec![window(1, "code", "1")]),
            workspace(2, vec![window(2, "foot", "2")]),
        ]));
        fake.set_identity(1001, "code-alpha-0", "code", Some("alpha"));
        fake.set_identity(1002, "foot-alpha-1", "foot", Some("alpha"));

        let outcome = capture(&fake, &fake, "alpha", "main").await.unwrap();
        let report = restore(&fake, &fake, &fake, &outcome.snapshot, &options(), true)
            .await
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.actions.len(), 2);
        assert!(report.actions.iter().all(|a| a.action == ActionKind::Reuse));
        assert_eq!(report.launched, 0);
        assert!(fake.launches().is_empty());
        assert!(fake.commands().is_empty());
    }

    #[tokio::test]
    async fn dry_run_reports_launch_for_missing_windows() {
        let fake = FakeDesktop::new(tree(vec![workspace(1, vec![])]));
        let report = restore(
            &fake,
            &fake,
            &fake,
            &snapshot(vec![snap_window("code", 1)]),
            &options(),
            true,
        )
        .await
        .unwrap();
        assert_eq!(report.actions[0].action, ActionKind::Launch);
        assert!(fake.launches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn one_of_three_never_appears() {
        let fake = FakeDesktop::new(tree(vec![workspace(1, vec![])]));
        fake.never_appear("slack");
        let snap = snapshot(vec![
            snap_window("code", 1),
            snap_window("slack", 2),
            snap_window("foot", 3),
        ]);

        let report = restore(&fake, &fake, &fake, &snap, &options(), false)
            .await
            .unwrap();

        assert_eq!(report.launched, 2);
        assert_eq!(report.positioned, 2);
        assert_eq!(report.failed, vec!["slack".to_string()]);
        assert_eq!(fake.launches().len(), 3);
        let launch = &fake.launches()[0];
        assert_eq!(launch.app_id, "code-alpha-1");
        assert_eq!(launch.project.as_deref(), Some("alpha"));

        let after = fake.snapshot();
        let foot = after.windows().find(|w| w.class == "foot").unwrap();
        assert_eq!(foot.workspace, "3");
    }

    #[tokio::test]
    async fn reuses_open_windows_and_restores_floating_geometry() {
        let fake = FakeDesktop::new(tree(vec![workspace(1, vec![window(1, "mpv", "1")])]));
        fake.set_identity(1001, "mpv-alpha-4", "mpv", Some("alpha"));
        let mut w = snap_window("mpv", 4);
        w.floating = true;
        w.focused = true;
        w.geometry = Rect {
            x: 100,
            y: 50,
            width: 640,
            height: 360,
        };

        let report = restore(&fake, &fake, &fake, &snapshot(vec![w.clone()]), &options(), false)
            .await
            .unwrap();

        assert_eq!(report.launched, 0);
        assert_eq!(report.positioned, 1);
        assert!(fake.launches().is_empty());
        assert_eq!(
            fake.commands(),
            vec![
                FakeCommand::MoveWindow(1, WorkspaceTarget::Number(4)),
                FakeCommand::SetFloating(1, true),
                FakeCommand::SetGeometry(1, w.geometry),
                FakeCommand::FocusWorkspace(WorkspaceTarget::Number(4)),
            ]
        );
    }

    #[tokio::test]
    async fn configured_command_wins_and_empty_command_fails() {
        let fake = FakeDesktop::new(tree(vec![workspace(1, vec![])]));
        let mut opts = options();
        opts.apps
            .insert("code".into(), vec!["code".into(), "--new-window".into()]);
        let mut no_cmd = snap_window("mystery", 2);
        no_cmd.command.clear();

        let report = restore(
            &fake,
            &fake,
            &fake,
            &snapshot(vec![snap_window("code", 1), no_cmd]),
            &opts,
            false,
        )
        .await
        .unwrap();

        assert_eq!(report.failed, vec!["mystery".to_string()]);
        assert_eq!(fake.launches()[0].command, vec!["code", "--new-window"]);
        assert_eq!(report.launched, 1);
    }

    /// Fails the first `failures` environment reads, then answers with
    /// `app_id`.
    struct SlowEnviron {
        failures: Mutex<usize>,
        app_id: String,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("no such process")]
    struct NoProcess;

    #[async_trait]
    impl IdentityResolver for SlowEnviron {
        type Error = NoProcess;

        async fn environment(&self, _pid: u32) -> Result<HashMap<String, String>, NoProcess> {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(NoProcess);
            }
            Ok(HashMap::from([
                (crate::environ::ENV_APP_ID.to_string(), self.app_id.clone()),
                (crate::environ::ENV_APP_NAME.to_string(), "code".to_string()),
            ]))
        }

        async fn command_line(&self, _pid: u32) -> Result<Vec<String>, NoProcess> {
            Err(NoProcess)
        }
    }

    #[tokio::test]
    async fn unreadable_environment_is_retried() {
        let resolver = SlowEnviron {
            failures: Mutex::new(1),
            app_id: "code-alpha-1".into(),
        };
        let mut cache = IdentityCache::new(&resolver);
        assert_eq!(cache.app_id(42).await, None);
        assert_eq!(cache.app_id(42).await.as_deref(), Some("code-alpha-1"));

        *resolver.failures.lock().unwrap() = 5;
        // Successful reads stick.
        assert_eq!(cache.app_id(42).await.as_deref(), Some("code-alpha-1"));
    }

    #[tokio::test]
    async fn launch_errors_are_recorded() {
        let fake = FakeDesktop::new(tree(vec![workspace(1, vec![])]));
        fake.fail_launch("code");
        let report = restore(
            &fake,
            &fake,
            &fake,
            &snapshot(vec![snap_window("code", 1)]),
            &options(),
            false,
        )
        .await
        .unwrap();
        assert_eq!(report.failed, vec!["code".to_string()]);
        assert_eq!(report.launched, 0);
    }
}
