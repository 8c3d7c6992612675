//! bank_ledger - Double-entry ledger core
//!
//! Moves money between accounts atomically and without deadlocks under
//! concurrent load.
//!
//! # Modules
//!
//! - [`models`] - Account, Entry and Transfer rows
//! - [`error`] - Error taxonomy (validation / not found / conflict / storage)
//! - [`store`] - Record store traits, `run_atomic`, PostgreSQL and in-memory stores
//! - [`transfer`] - Transfer coordinator
//! - [`db`] - Connection pool and schema bootstrap
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod store;
pub mod transfer;

// Convenient re-exports at crate root
pub use error::{ErrorKind, LedgerError, TransferStep};
pub use models::{Account, Entry, Transfer};
pub use store::{MemoryStore, PgStore, Session, Store, run_atomic, run_atomic_until};
pub use transfer::{TransferCoordinator, TransferParams, TransferResult};
