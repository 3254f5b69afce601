//! Layout document schema and its migrations.
//!
//! Documents carry an explicit `schema_version`.  Older documents are
//! upgraded by a chain of pure `migrate_vN_to_vN+1` functions applied until
//! the version matches [`CURRENT_SCHEMA_VERSION`]; they are never rejected
//! for being old.
//!
//! Version history:
//!
//! * **v0**: no `schema_version`; windows identified only by
//!   `window_class`; timestamp stored as `created_at`.
//! * **v1**: every window has a unique `app_id`; `captured_at`.

use crate::error::DaemonError;
use crate::model::Rect;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;

pub const CURRENT_SCHEMA_VERSION: u64 = 1;

/// One window of a layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    /// Deterministic identity the relaunched process must carry.
    pub app_id: String,
    pub app_name: String,
    /// Target workspace number.
    pub workspace: i32,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub geometry: Rect,
    #[serde(default)]
    pub floating: bool,
    #[serde(default)]
    pub focused: bool,
    /// Window class at capture time; informational only.
    #[serde(default)]
    pub window_class: String,
    /// argv captured from the process, used when no launcher command is
    /// configured for `app_name`.
    #[serde(default)]
    pub command: Vec<String>,
}

/// A saved window arrangement for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutSnapshot {
    pub schema_version: u64,
    pub project: String,
    pub name: String,
    pub captured_at: DateTime<Utc>,
    pub windows: Vec<WindowSnapshot>,
}

impl LayoutSnapshot {
    /// Check the structural invariants: non-empty and unique app ids.
    pub fn validate(&self) -> Result<(), DaemonError> {
        let mut seen = HashSet::new();
        for (i, w) in self.windows.iter().enumerate() {
            if w.app_id.is_empty() {
                return Err(DaemonError::Validation(format!("window {} has an empty app_id", i)));
            }
            if !seen.insert(w.app_id.as_str()) {
                return Err(DaemonError::Validation(format!(
                    "duplicate app_id {:?} in layout {}",
                    w.app_id, self.name
                )));
            }
        }
        Ok(())
    }
}

/// A field synthesized while upgrading an old document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationWarning {
    pub from_version: u64,
    pub window_index: usize,
    pub message: String,
}

type Migration = fn(Value) -> (Value, Vec<MigrationWarning>);

/// `MIGRATIONS[n]` upgrades a version-`n` document to version `n + 1`.
const MIGRATIONS: &[Migration] = &[migrate_v0_to_v1];

/// Version of a raw document; documents without one are v0.
pub fn document_version(doc: &Value) -> u64 {
    doc.get("schema_version").and_then(Value::as_u64).unwrap_or(0)
}

/// Upgrade `doc` to the current version and parse it.
///
/// Returns the snapshot, the warnings of every applied migration and
/// whether any migration ran.
pub fn migrate(mut doc: Value) -> Result<(LayoutSnapshot, Vec<MigrationWarning>, bool), DaemonError> {
    let mut version = document_version(&doc);
    if version > CURRENT_SCHEMA_VERSION {
        return Err(DaemonError::Validation(format!(
            "layout schema version {} is newer than supported version {}",
            version, CURRENT_SCHEMA_VERSION
        )));
    }

    let migrated = version < CURRENT_SCHEMA_VERSION;
    let mut warnings = Vec::new();
    while version < CURRENT_SCHEMA_VERSION {
        let step = MIGRATIONS
            .get(version as usize)
            .ok_or_else(|| DaemonError::Validation(format!("no migration from v{}", version)))?;
        let (next, mut w) = step(doc);
        for warning in &w {
            warn!("layout migration v{}: {}", warning.from_version, warning.message);
        }
        warnings.append(&mut w);
        doc = next;
        version += 1;
    }

    let snapshot: LayoutSnapshot = serde_json::from_value(doc)
        .map_err(|e| DaemonError::Validation(format!("malformed layout document: {}", e)))?;
    snapshot.validate()?;
    Ok((snapshot, warnings, migrated))
}

/// v0 → v1: stamp the version, rename `created_at`, fill in a missing
/// `app_name` from the window class, and synthesize a unique `app_id`
/// (`<app_name>-<project>-<index>`) for every window lacking one.
pub fn migrate_v0_to_v1(mut doc: Value) -> (Value, Vec<MigrationWarning>) {
    let mut warnings = Vec::new();
    let project = doc
        .get("project")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    if let Some(obj) = doc.as_object_mut() {
        obj.insert("schema_version".into(), json!(1));
        if !obj.contains_key("captured_at") {
            let captured_at = obj
                .remove("created_at")
                .filter(Value::is_string)
                .unwrap_or_else(|| json!("1970-01-01T00:00:00Z"));
            obj.insert("captured_at".into(), captured_at);
        }
        if let Some(windows) = obj
            .entry("windows")
            .or_insert_with(|| json!([]))
            .as_array_mut()
        {
            synthesize_app_ids(windows, &project, &mut warnings);
        }
    }
    (doc, warnings)
}

fn synthesize_app_ids(windows: &mut [Value], project: &str, warnings: &mut Vec<MigrationWarning>) {
    let mut used: HashSet<String> = windows
        .iter()
        .filter_map(|w| w.get("app_id").and_then(Value::as_str).map(str::to_string))
        .collect();

    for (index, window) in windows.iter_mut().enumerate() {
        let Some(w) = window.as_object_mut() else { continue };
        let named = w
            .get("app_name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let app_name = named.clone().unwrap_or_else(|| {
            w.get("window_class")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or("unknown")
                .to_lowercase()
        });
        w.insert("app_name".into(), json!(app_name));

        if w.get("app_id").and_then(Value::as_str).is_some_and(|s| !s.is_empty()) {
            if named.is_none() {
                warnings.push(MigrationWarning {
                    from_version: 0,
                    window_index: index,
                    message: format!("synthesized app_name {:?} for window {}", app_name, index),
                });
            }
            continue;
        }

        let base = format!("{}-{}-{}", app_name.to_lowercase(), project, index);
        let mut app_id = base.clone();
        let mut n = 1;
        while used.contains(&app_id) {
            app_id = format!("{}-{}", base, n);
            n += 1;
        }
        used.insert(app_id.clone());
        w.insert("app_id".into(), json!(app_id));
        warnings.push(MigrationWarning {
            from_version: 0,
            window_index: index,
            message: format!("synthesized app_id {:?} for window {}", app_id, index),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v0_document() -> Value {
        json!({
            "project": "alpha",
            "name": "main",
            "created_at": "2024-05-01T12:00:00Z",
            "windows": [
                { "window_class": "Code", "workspace": 1, "output": "DP-1" },
                { "window_class": "Code", "workspace": 2 },
                { "app_name": "terminal", "workspace": 3, "floating": true,
                  "geometry": { "x": 10, "y": 20, "width": 640, "height": 480 } }
            ]
        })
    }

    #[test]
    fn v0_gains_unique_ids_and_one_warning_per_window() {
        let (snapshot, warnings, migrated) = migrate(v0_document()).unwrap();
        assert!(migrated);
        assert_eq!(snapshot.schema_version, CURRENT_SCHEMA_VERSION);
        let ids: Vec<&str> = snapshot.windows.iter().map(|w| w.app_id.as_str()).collect();
        assert_eq!(ids, vec!["code-alpha-0", "code-alpha-1", "terminal-alpha-2"]);
        assert_eq!(warnings.len(), 3);
        assert_eq!(warnings[2].window_index, 2);
        assert_eq!(snapshot.captured_at.to_rfc3339(), "2024-05-01T12:00:00+00:00");
        assert!(snapshot.windows[2].floating);
        assert_eq!(snapshot.windows[2].geometry.width, 640);
    }

    #[test]
    fn partially_identified_v0_only_warns_for_missing_ids() {
        let mut doc = v0_document();
        doc["windows"][0]["app_id"] = json!("code-alpha-1");
        doc["windows"][0]["app_name"] = json!("code");
        let (snapshot, warnings, _) = migrate(doc).unwrap();
        assert_eq!(warnings.len(), 2);
        // The synthesized id must not collide with the existing one.
        assert_eq!(snapshot.windows[1].app_id, "code-alpha-1-1");
        snapshot.validate().unwrap();
    }

    #[test]
    fn identified_window_without_a_name_is_kept() {
        let doc = json!({
            "project": "alpha",
            "name": "n",
            "windows": [
                { "app_id": "x", "workspace": 1 },
                { "app_id": "y", "window_class": "Foot", "workspace": 2 }
            ]
        });
        let (snapshot, warnings, migrated) = migrate(doc).unwrap();
        assert!(migrated);
        assert_eq!(snapshot.windows[0].app_id, "x");
        assert_eq!(snapshot.windows[0].app_name, "unknown");
        assert_eq!(snapshot.windows[1].app_name, "foot");
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].message.contains("app_name"));
    }

    #[test]
    fn missing_timestamp_defaults_to_epoch() {
        let doc = json!({ "project": "p", "name": "n", "windows": [] });
        let (snapshot, warnings, _) = migrate(doc).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(snapshot.captured_at.timestamp(), 0);
    }

    #[test]
    fn current_documents_pass_through() {
        let doc = json!({
            "schema_version": 1,
            "project": "alpha",
            "name": "main",
            "captured_at": "2024-05-01T12:00:00Z",
            "windows": [{ "app_id": "a", "app_name": "a", "workspace": 1 }]
        });
        let (_, warnings, migrated) = migrate(doc).unwrap();
        assert!(!migrated);
        assert!(warnings.is_empty());
    }

    #[test]
    fn future_versions_are_rejected() {
        let doc = json!({ "schema_version": 99, "project": "p", "name": "n" });
        assert!(matches!(migrate(doc), Err(DaemonError::Validation(_))));
    }

    #[test]
    fn duplicate_ids_fail_validation() {
        let doc = json!({
            "schema_version": 1,
            "project": "alpha",
            "name": "main",
            "captured_at": "2024-05-01T12:00:00Z",
            "windows": [
                { "app_id": "a", "app_name": "a", "workspace": 1 },
                { "app_id": "a", "app_name": "a", "workspace": 2 }
            ]
        });
        assert!(matches!(migrate(doc), Err(DaemonError::Validation(_))));
    }
}
