//! Window layouts: capture, persistence with schema migration, restore.
//!
//! A layout records, per window, the *app id* injected into the owning
//! process's environment when it was launched.  Restore matches windows by
//! that identity, relaunching whatever is missing.

pub mod capture;
pub mod restore;
pub mod schema;
pub mod store;

pub use capture::{capture, CaptureOutcome};
pub use restore::{restore, ActionKind, RestoreAction, RestoreOptions, RestoreReport};
pub use schema::{LayoutSnapshot, MigrationWarning, WindowSnapshot, CURRENT_SCHEMA_VERSION};
pub use store::{LayoutStore, LayoutSummary, LoadedLayout, DEFAULT_LAYOUT_NAME};
