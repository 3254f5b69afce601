//! JSON-RPC method handlers.
//!
//! A panic inside a handler, or inside a collaborator it calls, fails only
//! that request with an internal error.

use super::{panic_message, Daemon};
use crate::classify::Classifier;
use crate::error::DaemonError;
use crate::filter::SwitchReport;
use crate::ipc::bus::EventLine;
use crate::ipc::protocol::{parse_params, EventKind, Request, Response};
use crate::layout::{self, LayoutSnapshot, MigrationWarning, RestoreOptions, RestoreReport, DEFAULT_LAYOUT_NAME};
use crate::persist::StoreError;
use crate::project::{NewProject, ProjectUpdate};
use crate::traits::{Compositor, IdentityResolver, Launcher};
use futures_util::FutureExt;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Deserialize)]
struct NameParams {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SwitchParams {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateParams {
    name: String,
    #[serde(flatten)]
    update: ProjectUpdate,
}

#[derive(Debug, Deserialize)]
struct RenameParams {
    name: String,
    new_name: String,
}

#[derive(Debug, Deserialize)]
struct LayoutParams {
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RestoreParams {
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    dry_run: bool,
}

#[derive(Debug, Deserialize)]
struct LayoutListParams {
    #[serde(default)]
    project: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnterParams {
    mode: String,
}

#[derive(Debug, Deserialize)]
struct DigitParams {
    digit: Value,
}

#[derive(Debug, Deserialize)]
struct NavParams {
    direction: String,
}

#[derive(Debug, Deserialize)]
struct ClassifyParams {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    class: Option<String>,
    #[serde(default)]
    instance: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscribeParams {
    #[serde(default)]
    types: Option<Vec<EventKind>>,
}

#[derive(Debug, Serialize)]
struct RestoreResult {
    project: String,
    name: String,
    #[serde(flatten)]
    report: RestoreReport,
    migrated: bool,
    migration_warnings: Vec<MigrationWarning>,
}

#[derive(Debug, Serialize)]
struct SwitchResult {
    #[serde(flatten)]
    report: SwitchReport,
    /// Set when the switch happened but could not be saved.
    #[serde(skip_serializing_if = "Option::is_none")]
    persist_error: Option<String>,
}

fn to_value<T: Serialize>(value: T) -> Result<Value, DaemonError> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialize(e).into())
}

fn log_failure(method: &str, e: &DaemonError) {
    match e {
        DaemonError::Transport(_) | DaemonError::Storage(_) | DaemonError::Internal(_) => {
            warn!("{} failed: {}", method, e)
        }
        _ => debug!("{} rejected: {}", method, e),
    }
}

/// What a handler produced.
enum Handled {
    Done(Value),
    /// Answered later, when the background restore reports back.
    Restore(RestoreJob),
}

/// A layout restore handed to a background task.
pub(super) struct RestoreJob {
    project: String,
    name: String,
    snapshot: LayoutSnapshot,
    options: RestoreOptions,
    migrated: bool,
    warnings: Vec<MigrationWarning>,
}

/// Sent back to the loop when a background restore ends.
pub(super) struct RestoreDone {
    job: RestoreJob,
    result: Result<RestoreReport, DaemonError>,
    id: Value,
    reply: oneshot::Sender<Response>,
}

impl<C, R, L> Daemon<C, R, L>
where
    C: Compositor + Clone + 'static,
    R: IdentityResolver + Clone + 'static,
    L: Launcher + Clone + 'static,
{
    /// Answer one request on `reply`.  Never fails: handler errors and
    /// panics become JSON-RPC error responses.  A restore replies once it
    /// has finished in the background.
    pub async fn handle_request(&mut self, request: Request, reply: oneshot::Sender<Response>) {
        let Request { id, method, params } = request;
        let id = id.unwrap_or(Value::Null);
        debug!("request {}", method);
        let result = match AssertUnwindSafe(self.dispatch(&method, params))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(&*panic).to_string();
                error!("{} panicked: {}", method, message);
                Err(DaemonError::Internal(message))
            }
        };
        let result = match result {
            Ok(Handled::Done(value)) => Ok(value),
            Ok(Handled::Restore(job)) => {
                self.spawn_restore(job, id, reply);
                return;
            }
            Err(e) => {
                log_failure(&method, &e);
                Err(e)
            }
        };
        let _ = reply.send(Response::from_result(id, result));
    }

    /// Register `events` as a subscriber queue.
    pub fn handle_subscribe(&mut self, request: Request, events: mpsc::Sender<EventLine>) -> Response {
        let id = request.id.unwrap_or(Value::Null);
        let result = parse_params::<SubscribeParams>(request.params).map(|params| {
            let kinds = params
                .types
                .as_ref()
                .map(|types| types.iter().copied().collect::<HashSet<_>>());
            let subscriber = self.bus.subscribe(kinds, events);
            info!("subscriber {} registered", subscriber);
            json!({
                "subscribed": true,
                "subscriber_id": subscriber,
                "types": params.types,
            })
        });
        Response::from_result(id, result)
    }

    async fn dispatch(&mut self, method: &str, params: Value) -> Result<Handled, DaemonError> {
        if method == "layout.restore" {
            return self.layout_restore(parse_params(params)?).await;
        }
        self.call(method, params).await.map(Handled::Done)
    }

    async fn call(&mut self, method: &str, params: Value) -> Result<Value, DaemonError> {
        match method {
            "daemon.ping" => Ok(json!({ "pong": true })),
            "daemon.status" => Ok(self.status()),

            "project.switch" => self.project_switch(parse_params(params)?).await,
            "project.create" => self.project_create(parse_params(params)?),
            "project.list" => Ok(json!({
                "projects": self.projects.list().collect::<Vec<_>>(),
                "active": self.active.get(),
            })),
            "project.get" => {
                let p: NameParams = parse_params(params)?;
                to_value(self.projects.get(&p.name)?)
            }
            "project.update" => self.project_update(parse_params(params)?),
            "project.delete" => self.project_delete(parse_params(params)?).await,
            "project.rename" => self.project_rename(parse_params(params)?).await,
            "project.current" => {
                let project = match self.active.get() {
                    Some(name) => Some(self.projects.get(name)?),
                    None => None,
                };
                Ok(json!({ "name": self.active.get(), "project": project }))
            }

            "layout.save" => self.layout_save(parse_params(params)?).await,
            "layout.list" => {
                let p: LayoutListParams = parse_params(params)?;
                let project = self.layout_project(p.project)?;
                let layouts = self.layouts.list(&project)?;
                Ok(json!({ "project": project, "layouts": layouts }))
            }
            "layout.get" => {
                let p: LayoutParams = parse_params(params)?;
                let (project, name) = self.layout_target(p.project, p.name)?;
                let loaded = self.layouts.load(&project, &name)?;
                Ok(json!({
                    "layout": loaded.snapshot,
                    "migrated": loaded.migrated,
                    "migration_warnings": loaded.warnings,
                }))
            }
            "layout.delete" => {
                let p: LayoutParams = parse_params(params)?;
                let (project, name) = self.layout_target(p.project, p.name)?;
                self.layouts.delete(&project, &name)?;
                info!("layout {}/{} deleted", project, name);
                self.publish(
                    EventKind::Layout,
                    json!({ "event_type": "deleted", "project": project, "name": name }),
                );
                Ok(json!({ "deleted": true, "project": project, "name": name }))
            }

            "workspace_mode.enter" => {
                let p: EnterParams = parse_params(params)?;
                to_value(self.mode.enter(&p.mode, &mut self.bus)?)
            }
            "workspace_mode.add_digit" => {
                let p: DigitParams = parse_params(params)?;
                let digit = match p.digit {
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    other => {
                        return Err(DaemonError::Validation(format!("invalid digit {}", other)));
                    }
                };
                to_value(self.mode.add_digit(&digit, &mut self.bus)?)
            }
            "workspace_mode.nav" => {
                let p: NavParams = parse_params(params)?;
                let direction = self.mode.nav(&p.direction, &mut self.bus)?;
                Ok(json!({ "direction": direction }))
            }
            "workspace_mode.delete" => {
                self.mode.delete(&mut self.bus)?;
                Ok(json!({ "ok": true }))
            }
            "workspace_mode.cancel" => {
                self.mode.cancel(&mut self.bus)?;
                Ok(json!({ "ok": true }))
            }
            "workspace_mode.execute" => {
                let outcome = self.mode.execute(&self.compositor, &mut self.bus).await?;
                to_value(outcome)
            }
            "workspace_mode.state" => to_value(self.mode.state()),

            "windows.tree" => Ok(json!({
                "available": self.store.is_available(),
                "tree": &*self.store.tree(),
            })),
            "windows.classify" => self.classify(parse_params(params)?),

            crate::ipc::server::SUBSCRIBE_METHOD => Err(DaemonError::StateConflict(
                "subscriptions are only accepted on a connection".into(),
            )),
            other => Err(DaemonError::MethodNotFound(other.to_string())),
        }
    }

    fn status(&self) -> Value {
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "connected": self.store.is_available(),
            "active_project": self.active.get(),
            "projects": self.projects.list().count(),
            "windows": self.store.tree().windows().count(),
            "parked": self.filter.parked_count(),
            "subscribers": self.bus.subscriber_count(),
            "events_dropped": self.bus.dropped(),
            "events_applied": self.store.generation(),
            "workspace_mode_active": self.mode.state().active,
            "uptime_seconds": self.started.elapsed().as_secs(),
        })
    }

    fn require_compositor(&self) -> Result<(), DaemonError> {
        if self.store.is_available() {
            Ok(())
        } else {
            Err(DaemonError::Transport("compositor unavailable".into()))
        }
    }

    fn rebuild_classifier(&mut self) {
        self.classifier = Classifier::from_sources(&self.config.rules, self.projects.list());
        debug!("classifier rebuilt with {} rules", self.classifier.rules().len());
    }

    async fn project_switch(&mut self, params: SwitchParams) -> Result<Value, DaemonError> {
        if let Some(name) = &params.name {
            self.projects.get(name)?;
        }
        self.require_compositor()?;

        let tree = self.store.tree();
        let report = self
            .filter
            .switch(
                &self.compositor,
                &tree,
                &self.classifier,
                &mut self.active,
                params.name.as_deref(),
            )
            .await;
        // The switch already happened: saving it is best effort.
        let mut persist_errors = Vec::new();
        if let Some(name) = &params.name {
            if let Err(e) = self.projects.touch(name) {
                warn!("switched to {} but could not record it: {}", name, e);
                persist_errors.push(e.to_string());
            }
        }
        if let Err(e) = self.active.persist() {
            warn!("switched but could not save the active project: {}", e);
            persist_errors.push(e.to_string());
        }
        info!(
            "switched {:?} -> {:?} ({} hidden, {} shown, {} failed)",
            report.previous,
            report.new,
            report.windows_hidden,
            report.windows_shown,
            report.failed.len()
        );
        self.publish(
            EventKind::Project,
            json!({ "event_type": "switched", "previous": report.previous, "new": report.new }),
        );
        to_value(SwitchResult {
            report,
            persist_error: (!persist_errors.is_empty()).then(|| persist_errors.join("; ")),
        })
    }

    fn project_create(&mut self, params: NewProject) -> Result<Value, DaemonError> {
        let project = self.projects.create(params)?.clone();
        self.rebuild_classifier();
        info!("project {} created", project.name);
        self.publish(
            EventKind::Project,
            json!({ "event_type": "created", "name": project.name }),
        );
        to_value(project)
    }

    fn project_update(&mut self, params: UpdateParams) -> Result<Value, DaemonError> {
        let project = self.projects.update(&params.name, params.update)?.clone();
        self.rebuild_classifier();
        self.publish(
            EventKind::Project,
            json!({ "event_type": "updated", "name": project.name }),
        );
        to_value(project)
    }

    async fn project_delete(&mut self, params: NameParams) -> Result<Value, DaemonError> {
        let project = self.projects.delete(&params.name)?;
        let tree = self.store.tree();
        let windows_released = self
            .filter
            .release_project(&self.compositor, &tree, &project.name)
            .await;
        let layouts_deleted = self.layouts.delete_project(&project.name)?;
        let was_active = self.active.get() == Some(project.name.as_str());
        if was_active {
            self.active.set(None);
            self.active.persist()?;
        }
        self.rebuild_classifier();
        info!(
            "project {} deleted ({} windows released, {} layouts removed)",
            project.name, windows_released, layouts_deleted
        );
        self.publish(
            EventKind::Project,
            json!({ "event_type": "deleted", "name": project.name }),
        );
        Ok(json!({
            "deleted": project.name,
            "was_active": was_active,
            "windows_released": windows_released,
            "layouts_deleted": layouts_deleted,
        }))
    }

    async fn project_rename(&mut self, params: RenameParams) -> Result<Value, DaemonError> {
        let project = self.projects.rename(&params.name, &params.new_name)?.clone();
        let tree = self.store.tree();
        let windows_renamed = self
            .filter
            .rename_project(&self.compositor, &tree, &params.name, &project.name)
            .await;
        let layouts_moved = self.layouts.rename_project(&params.name, &project.name)?;
        if self.active.get() == Some(params.name.as_str()) {
            self.active.set(Some(project.name.clone()));
            self.active.persist()?;
        }
        self.rebuild_classifier();
        info!("project {} renamed to {}", params.name, project.name);
        self.publish(
            EventKind::Project,
            json!({ "event_type": "renamed", "old_name": params.name, "name": project.name }),
        );
        Ok(json!({
            "project": project,
            "windows_renamed": windows_renamed,
            "layouts_moved": layouts_moved,
        }))
    }

    /// The project a layout call addresses: the named one, else the active
    /// one.
    fn layout_project(&self, project: Option<String>) -> Result<String, DaemonError> {
        let project = match project.or_else(|| self.active.get().map(str::to_string)) {
            Some(p) => p,
            None => {
                return Err(DaemonError::Validation(
                    "no project given and no project is active".into(),
                ))
            }
        };
        self.projects.get(&project)?;
        Ok(project)
    }

    fn layout_target(
        &self,
        project: Option<String>,
        name: Option<String>,
    ) -> Result<(String, String), DaemonError> {
        let project = self.layout_project(project)?;
        Ok((project, name.unwrap_or_else(|| DEFAULT_LAYOUT_NAME.to_string())))
    }

    async fn layout_save(&mut self, params: LayoutParams) -> Result<Value, DaemonError> {
        let (project, name) = self.layout_target(params.project, params.name)?;
        self.require_compositor()?;
        let outcome = layout::capture(&self.compositor, &self.resolver, &project, &name).await?;
        let path = self.layouts.save(&outcome.snapshot)?;
        let windows = outcome.snapshot.windows.len();
        info!("layout {}/{} saved with {} windows", project, name, windows);
        self.publish(
            EventKind::Layout,
            json!({ "event_type": "saved", "project": project, "name": name, "windows": windows }),
        );
        Ok(json!({
            "project": project,
            "name": name,
            "path": path,
            "windows": windows,
            "warnings": outcome.warnings,
        }))
    }

    /// Dry runs answer at once.  A real restore is checked and loaded here,
    /// then handed to [`Self::spawn_restore`].
    async fn layout_restore(&mut self, params: RestoreParams) -> Result<Handled, DaemonError> {
        let (project, name) = self.layout_target(params.project, params.name)?;
        let loaded = self.layouts.load(&project, &name)?;
        self.require_compositor()?;
        let directory = self.projects.get(&project)?.directory.clone();
        let options = RestoreOptions::from_config(&self.config.layout, Some(directory));

        if params.dry_run {
            let report = layout::restore(
                &self.compositor,
                &self.resolver,
                &self.launcher,
                &loaded.snapshot,
                &options,
                true,
            )
            .await?;
            return to_value(RestoreResult {
                project,
                name,
                report,
                migrated: loaded.migrated,
                migration_warnings: loaded.warnings,
            })
            .map(Handled::Done);
        }

        if !self.restoring.insert((project.clone(), name.clone())) {
            return Err(DaemonError::StateConflict(format!(
                "layout {}/{} is already being restored",
                project, name
            )));
        }
        info!("restoring layout {}/{}", project, name);
        Ok(Handled::Restore(RestoreJob {
            project,
            name,
            snapshot: loaded.snapshot,
            options,
            migrated: loaded.migrated,
            warnings: loaded.warnings,
        }))
    }

    fn spawn_restore(&self, job: RestoreJob, id: Value, reply: oneshot::Sender<Response>) {
        let compositor = self.compositor.clone();
        let resolver = self.resolver.clone();
        let launcher = self.launcher.clone();
        let done = self.restores_tx.clone();
        tokio::spawn(async move {
            let run = layout::restore(
                &compositor,
                &resolver,
                &launcher,
                &job.snapshot,
                &job.options,
                false,
            );
            let result = match AssertUnwindSafe(run).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(&*panic).to_string();
                    error!("restore of {}/{} panicked: {}", job.project, job.name, message);
                    Err(DaemonError::Internal(message))
                }
            };
            let _ = done.send(RestoreDone {
                job,
                result,
                id,
                reply,
            });
        });
    }

    /// Answer the client of a finished restore and announce it.
    pub(super) fn finish_restore(&mut self, done: RestoreDone) {
        let RestoreDone {
            job,
            result,
            id,
            reply,
        } = done;
        self.restoring.remove(&(job.project.clone(), job.name.clone()));

        let result = match result {
            Ok(report) => {
                info!(
                    "layout {}/{} restored: {} launched, {} positioned, {} failed",
                    job.project,
                    job.name,
                    report.launched,
                    report.positioned,
                    report.failed.len()
                );
                self.publish(
                    EventKind::Layout,
                    json!({
                        "event_type": "restored",
                        "project": job.project,
                        "name": job.name,
                        "launched": report.launched,
                        "positioned": report.positioned,
                        "failed": report.failed,
                    }),
                );
                to_value(RestoreResult {
                    project: job.project,
                    name: job.name,
                    report,
                    migrated: job.migrated,
                    migration_warnings: job.warnings,
                })
            }
            Err(e) => {
                log_failure("layout.restore", &e);
                Err(e)
            }
        };
        if reply.send(Response::from_result(id, result)).is_err() {
            debug!("restore finished after its client went away");
        }
    }

    fn classify(&self, params: ClassifyParams) -> Result<Value, DaemonError> {
        let (class, instance, owner) = match params.id {
            Some(id) => {
                let tree = self.store.tree();
                let window = tree
                    .window(id)
                    .ok_or_else(|| DaemonError::Validation(format!("unknown window {}", id)))?;
                (
                    window.class.clone(),
                    window.instance.clone(),
                    window.owner().map(str::to_string),
                )
            }
            None => match params.class {
                Some(class) => (class, params.instance.unwrap_or_default(), None),
                None => {
                    return Err(DaemonError::InvalidParams(
                        "either id or class is required".into(),
                    ))
                }
            },
        };
        let classification = self.classifier.classify(&class, &instance);
        Ok(json!({
            "class": class,
            "instance": instance,
            "scope": classification.scope,
            "matched_rule": classification.matched_rule,
            "project": owner,
        }))
    }
}
