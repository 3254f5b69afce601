//! [`IdentityResolver`] backed by the `/proc` filesystem.
//!
//! Applications started by the launcher carry an injected identity in their
//! environment (`I3PM_APP_ID`, `I3PM_APP_NAME`, `I3PM_PROJECT_NAME`).  The
//! environment of a running process is readable from `/proc/<pid>/environ`
//! as NUL-separated `KEY=VALUE` pairs; its argv sits in `/proc/<pid>/cmdline`
//! in the same encoding.

use crate::traits::IdentityResolver;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;

/// Deterministic application id assigned at launch.
pub const ENV_APP_ID: &str = "I3PM_APP_ID";
/// Human-readable application name (`code`, `terminal`, …).
pub const ENV_APP_NAME: &str = "I3PM_APP_NAME";
/// Project the application was launched for.
pub const ENV_PROJECT_NAME: &str = "I3PM_PROJECT_NAME";

/// Reads process identity from a procfs mount.
#[derive(Debug, Clone)]
pub struct ProcEnvironResolver {
    proc_root: PathBuf,
}

/// Errors from reading `/proc`.
#[derive(Debug, thiserror::Error)]
#[error("cannot read {path}: {source}")]
pub struct EnvironError {
    path: PathBuf,
    source: std::io::Error,
}

impl Default for ProcEnvironResolver {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcEnvironResolver {
    /// Resolver rooted at `proc_root` (normally `/proc`).
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    async fn read(&self, pid: u32, file: &str) -> Result<Vec<u8>, EnvironError> {
        let path = self.proc_root.join(pid.to_string()).join(file);
        tokio::fs::read(&path)
            .await
            .map_err(|source| EnvironError { path, source })
    }
}

#[async_trait]
impl IdentityResolver for ProcEnvironResolver {
    type Error = EnvironError;

    async fn environment(&self, pid: u32) -> Result<HashMap<String, String>, Self::Error> {
        Ok(parse_environ(&self.read(pid, "environ").await?))
    }

    async fn command_line(&self, pid: u32) -> Result<Vec<String>, Self::Error> {
        Ok(split_nul(&self.read(pid, "cmdline").await?))
    }
}

/// Split a NUL-separated buffer into its non-empty fields.
pub fn split_nul(raw: &[u8]) -> Vec<String> {
    raw.split(|&b| b == 0)
        .filter(|field| !field.is_empty())
        .map(|field| String::from_utf8_lossy(field).into_owned())
        .collect()
}

/// Parse the contents of an `environ` file.  Entries without `=` are
/// ignored.
pub fn parse_environ(raw: &[u8]) -> HashMap<String, String> {
    split_nul(raw)
        .into_iter()
        .filter_map(|entry| {
            let (key, value) = entry.split_once('=')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// The identity injected into a launched application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppIdentity {
    pub app_id: String,
    /// Falls back to the app id when `I3PM_APP_NAME` is absent.
    pub app_name: String,
    pub project: Option<String>,
}

impl AppIdentity {
    /// Extract the identity from a process environment.  `None` if no
    /// (non-empty) app id is present.
    pub fn from_env(env: &HashMap<String, String>) -> Option<Self> {
        let app_id = env.get(ENV_APP_ID).filter(|v| !v.is_empty())?.clone();
        let app_name = env
            .get(ENV_APP_NAME)
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| app_id.clone());
        let project = env.get(ENV_PROJECT_NAME).filter(|v| !v.is_empty()).cloned();
        Some(Self {
            app_id,
            app_name,
            project,
        })
    }
}
