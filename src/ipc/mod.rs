//! JSON-RPC over a Unix socket.
//!
//! External tools (the thin CLI, key-bind helpers, the overlay widget)
//! connect to the socket and exchange newline-delimited JSON-RPC 2.0
//! messages.  Subscribers additionally receive event notifications.

pub mod bus;
pub mod protocol;
pub mod server;

pub use bus::{EventBus, EventLine, SubscriberId};
pub use protocol::{Event, EventKind, Request, Response, RpcError};
pub use server::{Incoming, IpcServer};
