//! # rust_pubsub_db - An In-Memory Pub/Sub Table Store in Rust
//!
//! An embeddable, volatile, multi-table data store that speaks a small
//! SQL-ish command language over a length-framed TCP protocol and pushes
//! live query notifications to subscribers whenever a mutation touches
//! rows in their scope:
//! - **Multi-table row store**: schema grows lazily, column 0 of every
//!   table is a synthetic auto-incrementing `id`
//! - **Key/Tag indexes**: unique and non-unique value indexes with O(1)
//!   removal via arena-backed intrusive lists
//! - **Live subscriptions**: table-, value- and record-scoped
//!   publish/subscribe fed by insert/update/delete diffs
//! - **Actor concurrency**: one sequential worker per table, no locks in
//!   the data path
//! - **Framed TCP**: 4-byte length + 4-byte request id + JSON body, with
//!   pagination and event merging on the way out
//!
//! ## Architecture Overview
//!
//! The crate consists of three main layers:
//!
//! 1. **Server Layer** (`server`, `net` modules): TCP connections, wire
//!    framing, request routing, the control loop
//! 2. **Engine Layer** (`engine` module): table actors, indexes, pub/sub
//!    groups, the dispatcher
//! 3. **SQL Layer** (`sql` module): hand-written lexer and parser for the
//!    command language
//!
//! ## Usage Example
//!
//! ```bash
//! # Start the server
//! cargo run -- --listen 127.0.0.1:7777
//!
//! # Commands, one per frame:
//! #   insert into stocks (ticker, bid) values (IBM, 123)
//! #   key stocks ticker
//! #   subscribe * from stocks where ticker = IBM
//! #   update stocks set bid = 140 where ticker = IBM
//! ```

/// Engine and network tunables.
pub mod config;

/// Table actors, indexes, pub/sub groups, dispatcher, request/response
/// model.
pub mod engine;

/// Wire framing for the TCP protocol.
pub mod net;

/// TCP server and client connection handling.
pub mod server;

/// Cooperative shutdown coordinator shared by every worker.
pub mod shutdown;

/// Command-language lexer and parser.
pub mod sql;
