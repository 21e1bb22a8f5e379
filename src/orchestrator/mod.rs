//! Instance supervision modules.
//!
//! Covers liveness probing, process spawning, per-instance exit watching,
//! and the controller that ties them to the record store.

pub mod controller;
pub mod liveness;
pub mod spawner;
pub mod watcher;

pub use controller::Controller;
