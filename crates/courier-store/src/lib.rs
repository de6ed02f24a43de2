//! # courier-store
//!
//! Persistent state of the message dispatcher: in-flight segment
//! reassembly, completion tombstones, per-recipient delivery confirmations,
//! raw-message resend bookkeeping and the hash-ratchet wait queue.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every table.
//! Multi-step state transitions run inside a single transaction.

pub mod confirmations;
pub mod database;
pub mod migrations;
pub mod models;
pub mod ratchet_queue;
pub mod raw_messages;
pub mod segments;

mod error;
mod rows;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
