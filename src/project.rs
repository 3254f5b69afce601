//! Projects and the active-project singleton.
//!
//! Each [`Project`] is persisted as `projects/<name>.json`; the active
//! project lives in its own `active-project.json` document.  The
//! [`ProjectStore`] keeps an in-memory copy and writes through on every
//! mutation.

use crate::error::DaemonError;
use crate::persist::{self, StoreError};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Longest accepted project (and layout) name.
pub const MAX_NAME_LEN: usize = 64;

/// A work context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Unique key; `[A-Za-z0-9_-]+`.
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub icon: String,
    /// Absolute path of the project's working directory.
    pub directory: PathBuf,
    /// Window classes that are always scoped to a project.
    #[serde(default)]
    pub scoped_classes: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Project {
    /// A project with defaults: display name = name, no icon, no classes.
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            icon: String::new(),
            directory: directory.into(),
            scoped_classes: BTreeSet::new(),
            created_at: Utc::now(),
            last_used_at: None,
        }
    }
}

/// Fields accepted by `project.create`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    pub directory: PathBuf,
    #[serde(default)]
    pub scoped_classes: BTreeSet<String>,
}

/// Fields accepted by `project.update`; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectUpdate {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub scoped_classes: Option<BTreeSet<String>>,
}

/// Check a project or layout name.
pub fn validate_name(kind: &str, name: &str) -> Result<(), DaemonError> {
    if name.is_empty() {
        return Err(DaemonError::Validation(format!("{} name must not be empty", kind)));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(DaemonError::Validation(format!(
            "{} name longer than {} characters",
            kind, MAX_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(DaemonError::Validation(format!(
            "{} name {:?} may only contain letters, digits, '-' and '_'",
            kind, name
        )));
    }
    Ok(())
}

fn validate_directory(dir: &Path) -> Result<(), DaemonError> {
    if !dir.is_absolute() {
        return Err(DaemonError::Validation(format!(
            "project directory must be absolute: {}",
            dir.display()
        )));
    }
    Ok(())
}

/// Persistent project collection.
#[derive(Debug)]
pub struct ProjectStore {
    dir: PathBuf,
    projects: BTreeMap<String, Project>,
}

impl ProjectStore {
    /// Load every project document in `dir`.  Unreadable documents are
    /// skipped with a warning so one corrupt file does not take the daemon
    /// down.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        let mut projects = BTreeMap::new();
        for path in persist::list_json(&dir)? {
            match persist::read_json::<Project>(&path) {
                Ok(Some(project)) => {
                    projects.insert(project.name.clone(), project);
                }
                Ok(None) => {}
                Err(e) => warn!("skipping project document: {}", e),
            }
        }
        info!("loaded {} project(s) from {}", projects.len(), dir.display());
        Ok(Self { dir, projects })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    pub fn list(&self) -> impl Iterator<Item = &Project> {
        self.projects.values()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.projects.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<&Project, DaemonError> {
        self.projects
            .get(name)
            .ok_or_else(|| DaemonError::ProjectNotFound(name.to_string()))
    }

    pub fn create(&mut self, new: NewProject) -> Result<&Project, DaemonError> {
        validate_name("project", &new.name)?;
        validate_directory(&new.directory)?;
        if self.projects.contains_key(&new.name) {
            return Err(DaemonError::AlreadyExists {
                kind: "project",
                name: new.name,
            });
        }
        let project = Project {
            display_name: new.display_name.unwrap_or_else(|| new.name.clone()),
            icon: new.icon.unwrap_or_default(),
            scoped_classes: new.scoped_classes,
            ..Project::new(new.name, new.directory)
        };
        persist::write_json_atomic(&self.path_for(&project.name), &project)?;
        info!("created project {}", project.name);
        let name = project.name.clone();
        Ok(self.projects.entry(name).or_insert(project))
    }

    pub fn update(&mut self, name: &str, update: ProjectUpdate) -> Result<&Project, DaemonError> {
        if let Some(dir) = &update.directory {
            validate_directory(dir)?;
        }
        let mut project = self.get(name)?.clone();
        if let Some(display_name) = update.display_name {
            project.display_name = display_name;
        }
        if let Some(icon) = update.icon {
            project.icon = icon;
        }
        if let Some(directory) = update.directory {
            project.directory = directory;
        }
        if let Some(classes) = update.scoped_classes {
            project.scoped_classes = classes;
        }
        self.put(project)
    }

    /// Record that the project was switched to.
    pub fn touch(&mut self, name: &str) -> Result<(), DaemonError> {
        let mut project = self.get(name)?.clone();
        project.last_used_at = Some(Utc::now());
        self.put(project).map(|_| ())
    }

    pub fn rename(&mut self, name: &str, new_name: &str) -> Result<&Project, DaemonError> {
        validate_name("project", new_name)?;
        if self.projects.contains_key(new_name) {
            return Err(DaemonError::AlreadyExists {
                kind: "project",
                name: new_name.to_string(),
            });
        }
        let mut project = self.get(name)?.clone();
        project.name = new_name.to_string();
        persist::write_json_atomic(&self.path_for(new_name), &project)?;
        persist::remove(&self.path_for(name))?;
        self.projects.remove(name);
        info!("renamed project {} -> {}", name, new_name);
        Ok(self.projects.entry(new_name.to_string()).or_insert(project))
    }

    pub fn delete(&mut self, name: &str) -> Result<Project, DaemonError> {
        self.get(name)?;
        persist::remove(&self.path_for(name))?;
        info!("deleted project {}", name);
        self.projects
            .remove(name)
            .ok_or_else(|| DaemonError::ProjectNotFound(name.to_string()))
    }

    fn put(&mut self, project: Project) -> Result<&Project, DaemonError> {
        persist::write_json_atomic(&self.path_for(&project.name), &project)?;
        let name = project.name.clone();
        self.projects.insert(name.clone(), project);
        self.get(&name)
    }
}

/// On-disk shape of the active-project document.
#[derive(Debug, Serialize, Deserialize)]
struct ActiveProjectDoc {
    project_name: Option<String>,
    updated_at: DateTime<Utc>,
}

/// The single active project, or global mode when `None`.
///
/// Only the visibility filter writes it (once per switch); the daemon
/// persists it afterwards.
#[derive(Debug, Default)]
pub struct ActiveProjectState {
    name: Option<String>,
    path: Option<PathBuf>,
}

impl ActiveProjectState {
    /// In-memory only; used by tests.
    pub fn new(name: Option<String>) -> Self {
        Self { name, path: None }
    }

    /// Load from `path`, starting in global mode if the document is absent.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let doc: Option<ActiveProjectDoc> = persist::read_json(&path)?;
        Ok(Self {
            name: doc.and_then(|d| d.project_name),
            path: Some(path),
        })
    }

    pub fn get(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Replace the active project and return the previous one.
    pub fn set(&mut self, name: Option<String>) -> Option<String> {
        std::mem::replace(&mut self.name, name)
    }

    /// Write the current value to disk (no-op for in-memory state).
    pub fn persist(&self) -> Result<(), StoreError> {
        if let Some(path) = &self.path {
            let doc = ActiveProjectDoc {
                project_name: self.name.clone(),
                updated_at: Utc::now(),
            };
            persist::write_json_atomic(path, &doc)?;
        }
        Ok(())
    }
}
