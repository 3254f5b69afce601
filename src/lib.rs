//! **i3pm**: a project-aware window daemon for i3-ipc compositors.
//!
//! The daemon mirrors the compositor's outputs, workspaces and windows,
//! ties windows to user-defined *projects*, hides and shows windows when the
//! active project changes, drives a quick-jump workspace mode for keybindings,
//! and captures / restores window layouts.
//!
//! # Architecture
//!
//! The crate is organised around the collaborator traits in [`traits`]:
//!
//! * [`traits::Compositor`]: queries the window tree and issues commands,
//!   so the project and layout logic is not coupled to one compositor.
//! * [`traits::EventSource`]: delivers the compositor's event stream as
//!   [`model::CompositorEvent`]s into the daemon loop.
//! * [`traits::IdentityResolver`]: reads another process's environment to
//!   recover the identity injected at launch time.
//! * [`traits::Launcher`]: relaunches applications during layout restore.
//!
//! Concrete implementations live in [`sway`] (i3-ipc), [`environ`]
//! (`/proc`) and [`launcher`] (child processes).  The [`daemon`] module is
//! the composition root that owns every state container and serves the
//! JSON-RPC protocol from [`ipc`].

pub mod classify;
pub mod config;
pub mod daemon;
pub mod environ;
pub mod error;
pub mod filter;
pub mod ipc;
pub mod launcher;
pub mod layout;
pub mod model;
pub mod persist;
pub mod project;
pub mod state;
pub mod sway;
pub mod traits;
pub mod workspace_mode;

#[cfg(test)]
pub(crate) mod testing;
