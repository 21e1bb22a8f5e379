#![forbid(unsafe_code)]

//! Durable lifecycle supervision for long-running child processes.
//!
//! Each instance is identified by a directory path that is both the
//! process's working directory and its key in a [`RecordStore`]. The
//! [`Controller`] starts, stops, and reports on instances, keeping the
//! stored record consistent with the observable state of the OS process.

pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod persistence;

pub use config::{ControllerConfig, GlobalConfig, PathMode};
pub use errors::{AppError, Result, StoreError};
pub use models::instance::{InstanceRecord, InstanceState};
pub use orchestrator::Controller;
pub use persistence::{MemoryStore, RecordStore, SqliteStore};
