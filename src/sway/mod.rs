//! i3-ipc implementations (Sway and i3).
//!
//! This module provides concrete backends for the
//! [`Compositor`](crate::traits::Compositor) and
//! [`EventSource`](crate::traits::EventSource) traits, speaking the i3-ipc
//! protocol over the socket named by `SWAYSOCK` or `I3SOCK`.
//!
//! Nothing outside this module should reference the wire protocol directly.

pub mod events;
pub mod ipc;
pub mod tree;
pub mod wm;

pub use events::SwayEventSource;
pub use ipc::SwayError;
pub use wm::SwayCompositor;
