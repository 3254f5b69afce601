//! Layout persistence: `layouts/<project>/<name>.json`.

use super::schema::{migrate, LayoutSnapshot, MigrationWarning};
use crate::error::DaemonError;
use crate::persist;
use crate::project::validate_name;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;

/// Layout name used when a request does not give one.
pub const DEFAULT_LAYOUT_NAME: &str = "default";

/// Entry of [`LayoutStore::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayoutSummary {
    pub name: String,
    pub captured_at: DateTime<Utc>,
    pub window_count: usize,
}

/// A loaded layout and what upgrading it produced.
#[derive(Debug, Clone)]
pub struct LoadedLayout {
    pub snapshot: LayoutSnapshot,
    pub warnings: Vec<MigrationWarning>,
    /// The document was upgraded (and rewritten) on load.
    pub migrated: bool,
}

#[derive(Debug)]
pub struct LayoutStore {
    dir: PathBuf,
}

impl LayoutStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn project_dir(&self, project: &str) -> PathBuf {
        self.dir.join(project)
    }

    fn path_for(&self, project: &str, name: &str) -> PathBuf {
        self.project_dir(project).join(format!("{}.json", name))
    }

    pub fn exists(&self, project: &str, name: &str) -> bool {
        self.path_for(project, name).is_file()
    }

    /// Persist `snapshot`, replacing any layout of the same name.
    pub fn save(&self, snapshot: &LayoutSnapshot) -> Result<PathBuf, DaemonError> {
        validate_name("project", &snapshot.project)?;
        validate_name("layout", &snapshot.name)?;
        snapshot.validate()?;
        let path = self.path_for(&snapshot.project, &snapshot.name);
        persist::write_json_atomic(&path, snapshot)?;
        info!(
            "saved layout {}/{} ({} windows)",
            snapshot.project,
            snapshot.name,
            snapshot.windows.len()
        );
        Ok(path)
    }

    /// Load a layout, upgrading old documents in place.
    pub fn load(&self, project: &str, name: &str) -> Result<LoadedLayout, DaemonError> {
        validate_name("layout", name)?;
        let path = self.path_for(project, name);
        let mut doc: Value = persist::read_json(&path)?.ok_or_else(|| DaemonError::LayoutNotFound {
            project: project.to_string(),
            name: name.to_string(),
        })?;

        // Documents written by hand sometimes omit their own coordinates.
        if let Some(obj) = doc.as_object_mut() {
            obj.entry("project").or_insert_with(|| Value::from(project));
            obj.entry("name").or_insert_with(|| Value::from(name));
        }

        let (snapshot, warnings, migrated) = migrate(doc)?;
        if migrated {
            match persist::write_json_atomic(&path, &snapshot) {
                Ok(()) => info!("upgraded layout {}/{} to the current schema", project, name),
                Err(e) => warn!("could not rewrite upgraded layout {}/{}: {}", project, name, e),
            }
        }
        Ok(LoadedLayout {
            snapshot,
            warnings,
            migrated,
        })
    }

    /// Every layout of `project`, by name.  Unreadable documents are
    /// skipped.
    pub fn list(&self, project: &str) -> Result<Vec<LayoutSummary>, DaemonError> {
        let mut summaries = Vec::new();
        for path in persist::list_json(&self.project_dir(project))? {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load(project, name) {
                Ok(loaded) => summaries.push(LayoutSummary {
                    name: loaded.snapshot.name,
                    captured_at: loaded.snapshot.captured_at,
                    window_count: loaded.snapshot.windows.len(),
                }),
                Err(e) => warn!("skipping layout {}: {}", path.display(), e),
            }
        }
        Ok(summaries)
    }

    pub fn delete(&self, project: &str, name: &str) -> Result<(), DaemonError> {
        validate_name("layout", name)?;
        if !persist::remove(&self.path_for(project, name))? {
            return Err(DaemonError::LayoutNotFound {
                project: project.to_string(),
                name: name.to_string(),
            });
        }
        info!("deleted layout {}/{}", project, name);
        Ok(())
    }

    /// Move every layout of `old` to `new`, rewriting their `project`
    /// field.
    pub fn rename_project(&self, old: &str, new: &str) -> Result<usize, DaemonError> {
        let mut moved = 0;
        for path in persist::list_json(&self.project_dir(old))? {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let mut loaded = match self.load(old, name) {
                Ok(l) => l,
                Err(e) => {
                    warn!("leaving unreadable layout {} behind: {}", path.display(), e);
                    continue;
                }
            };
            loaded.snapshot.project = new.to_string();
            persist::write_json_atomic(&self.path_for(new, name), &loaded.snapshot)?;
            persist::remove(&path)?;
            moved += 1;
        }
        let _ = fs::remove_dir(self.project_dir(old));
        Ok(moved)
    }

    /// Remove every layout of `project`.
    pub fn delete_project(&self, project: &str) -> Result<usize, DaemonError> {
        let mut removed = 0;
        for path in persist::list_json(&self.project_dir(project))? {
            if persist::remove(&path)? {
                removed += 1;
            }
        }
        let _ = fs::remove_dir(self.project_dir(project));
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::schema::{WindowSnapshot, CURRENT_SCHEMA_VERSION};
    use crate::model::Rect;
    use serde_json::json;

    fn snapshot(name: &str) -> LayoutSnapshot {
        LayoutSnapshot {
            schema_version: CURRENT_SCHEMA_VERSION,
            project: "alpha".into(),
            name: name.into(),
            captured_at: Utc::now(),
            windows: vec![WindowSnapshot {
                app_id: "code-alpha-0".into(),
                app_name: "code".into(),
                workspace: 1,
                output: "DP-1".into(),
                geometry: Rect::default(),
                floating: false,
                focused: true,
                window_class: "Code".into(),
                command: vec!["code".into()],
            }],
        }
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = LayoutStore::new(dir.path());
        let snap = snapshot("main");
        store.save(&snap).unwrap();
        assert!(store.exists("alpha", "main"));

        let loaded = store.load("alpha", "main").unwrap();
        assert_eq!(loaded.snapshot, snap);
        assert!(!loaded.migrated);
        assert!(loaded.warnings.is_empty());
    }

    #[test]
    fn missing_layout_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LayoutStore::new(dir.path());
        assert!(matches!(
            store.load("alpha", "nope"),
            Err(DaemonError::LayoutNotFound { .. })
        ));
        assert!(matches!(
            store.delete("alpha", "nope"),
            Err(DaemonError::LayoutNotFound { .. })
        ));
    }

    #[test]
    fn bad_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LayoutStore::new(dir.path());
        assert!(matches!(store.save(&snapshot("../escape")), Err(DaemonError::Validation(_))));
        assert!(matches!(store.load("alpha", "a/b"), Err(DaemonError::Validation(_))));
    }

    #[test]
    fn v0_documents_are_upgraded_and_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = LayoutStore::new(dir.path());
        let path = dir.path().join("alpha/old.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            json!({
                "created_at": "2024-05-01T12:00:00Z",
                "windows": [{ "window_class": "Firefox", "workspace": 2 }]
            })
            .to_string(),
        )
        .unwrap();

        let loaded = store.load("alpha", "old").unwrap();
        assert!(loaded.migrated);
        assert_eq!(loaded.warnings.len(), 1);
        assert_eq!(loaded.snapshot.windows[0].app_id, "firefox-alpha-0");

        let on_disk: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["schema_version"], 1);
        assert_eq!(on_disk["windows"][0]["app_id"], "firefox-alpha-0");
        assert!(!store.load("alpha", "old").unwrap().migrated);
    }

    #[test]
    fn list_rename_and_delete_project() {
        let dir = tempfile::tempdir().unwrap();
        let store = LayoutStore::new(dir.path());
        store.save(&snapshot("b")).unwrap();
        store.save(&snapshot("a")).unwrap();
        fs::write(dir.path().join("alpha/broken.json"), "{").unwrap();

        let names: Vec<String> = store.list("alpha").unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(store.list("nobody").unwrap().is_empty());

        assert_eq!(store.rename_project("alpha", "beta").unwrap(), 2);
        assert_eq!(store.load("beta", "a").unwrap().snapshot.project, "beta");
        assert!(!store.exists("alpha", "a"));

        assert_eq!(store.delete_project("beta").unwrap(), 2);
        assert!(store.list("beta").unwrap().is_empty());
    }
}
