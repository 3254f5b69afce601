//! Layout capture.
//!
//! Windows are identified by the app id injected into their process
//! environment at launch, not by class or title (which change freely).

use super::schema::{LayoutSnapshot, WindowSnapshot, CURRENT_SCHEMA_VERSION};
use crate::environ::AppIdentity;
use crate::error::DaemonError;
use crate::traits::{Compositor, IdentityResolver};
use chrono::Utc;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashSet;

/// Result of [`capture`].
#[derive(Debug, Clone, Serialize)]
pub struct CaptureOutcome {
    pub snapshot: LayoutSnapshot,
    /// One entry per skipped window.
    pub warnings: Vec<String>,
}

/// Snapshot every visible window that carries an app identity.
///
/// Skipped (with a warning): parked windows, windows without a pid or an
/// app id, windows on named workspaces, and further windows of an app id
/// already captured.  Fails only when no window qualifies.
pub async fn capture<C, R>(
    compositor: &C,
    resolver: &R,
    project: &str,
    name: &str,
) -> Result<CaptureOutcome, DaemonError>
where
    C: Compositor,
    R: IdentityResolver,
{
    let tree = compositor.tree().await.map_err(DaemonError::transport)?;
    let mut windows = Vec::new();
    let mut warnings = Vec::new();
    let mut seen = HashSet::new();

    for window in tree.windows() {
        let label = format!("window {} ({})", window.id, window.class);
        if window.is_hidden() {
            debug!("{} is parked, not captured", label);
            continue;
        }
        let Some(pid) = window.pid else {
            warnings.push(format!("{}: no process id", label));
            continue;
        };
        let env = match resolver.environment(pid).await {
            Ok(env) => env,
            Err(e) => {
                warnings.push(format!("{}: cannot read environment: {}", label, e));
                continue;
            }
        };
        let Some(identity) = AppIdentity::from_env(&env) else {
            warnings.push(format!("{}: no app id in environment", label));
            continue;
        };
        let Some(workspace) = tree.workspace(&window.workspace) else {
            warnings.push(format!("{}: unknown workspace {:?}", label, window.workspace));
            continue;
        };
        let Some(num) = workspace.num else {
            warnings.push(format!("{}: named workspace {:?} is not captured", label, workspace.name));
            continue;
        };
        if !seen.insert(identity.app_id.clone()) {
            warnings.push(format!("{}: app id {} already captured", label, identity.app_id));
            continue;
        }
        let command = resolver.command_line(pid).await.unwrap_or_default();

        windows.push(WindowSnapshot {
            app_id: identity.app_id,
            app_name: identity.app_name,
            workspace: num,
            output: workspace.output.clone(),
            geometry: window.geometry,
            floating: window.floating,
            focused: window.focused,
            window_class: window.class.clone(),
            command,
        });
    }

    for w in &warnings {
        warn!("capture {}/{}: {}", project, name, w);
    }
    if windows.is_empty() {
        return Err(DaemonError::Validation(
            "no window with an app identity to capture".into(),
        ));
    }
    info!(
        "captured {} window(s) for {}/{} ({} skipped)",
        windows.len(),
        project,
        name,
        warnings.len()
    );

    Ok(CaptureOutcome {
        snapshot: LayoutSnapshot {
            schema_version: CURRENT_SCHEMA_VERSION,
            project: project.to_string(),
            name: name.to_string(),
            captured_at: Utc::now(),
            windows,
        },
        warnings,
    })
}
