//! In-memory multi-table storage engine.
//!
//! ## Architecture Overview
//!
//! Each table is owned by exactly one sequential actor ([`table::Table`])
//! consuming a bounded request queue, which gives linearizable per-table
//! semantics without any locking inside the storage or index code. The
//! [`dispatcher::Dispatcher`] owns the table-name → actor map and creates
//! actors lazily on first reference.
//!
//! ## Key Components
//!
//! - **request / response**: the closed sets of parsed commands and wire
//!   replies, including pagination and event merging
//! - **column / record**: the row store; column 0 is the synthetic `id`
//! - **index**: arena-backed Key/Tag indexes with slide removal
//! - **pubsub**: subscription groups, the per-connection mailbox handle,
//!   and the by-connection registry
//! - **table**: the actor tying storage, indexing and notification
//!   together
//! - **dispatcher**: routing and lazy table creation

pub mod column;
pub mod dispatcher;
pub mod index;
pub mod pubsub;
pub mod record;
pub mod request;
pub mod response;
pub mod table;

pub use dispatcher::Dispatcher;
pub use pubsub::ResponseSender;
pub use request::{Request, Statement};
pub use response::{Body, Response};
pub use table::Table;

/// A routed request: the wire request id, the parsed statement pieces and
/// the mailbox of the connection that sent it.
pub struct RequestItem {
    pub request_id: u32,
    pub streaming: bool,
    pub request: request::Request,
    pub sender: pubsub::ResponseSender,
}
