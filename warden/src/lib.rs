//! Supervision of the panel's local backend process.
//!
//! The client depends on one local backend whose exact port is not known in
//! advance. This crate owns everything around that dependency: scanning a
//! fixed port range for an instance that is already up, launching one when
//! none is found, confirming liveness through the health endpoint, watching
//! the connection on an interval, and recovering when it drops, with a
//! single anti-reentrancy guard so concurrent triggers (startup, the monitor,
//! user actions) never race each other into duplicate backends.

pub mod config;
pub mod controller;
pub mod endpoint;
pub mod error;
pub mod launcher;
pub mod monitor;
pub mod probe;
pub mod scan;
pub mod state;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::Config;
pub use endpoint::ServiceEndpoint;
pub use error::{SpawnError, StartError};
pub use state::{ConnectionStatus, StateSnapshot};
pub use supervisor::{KillScope, Supervisor};
