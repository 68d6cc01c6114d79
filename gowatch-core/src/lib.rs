//! Core functionality for gowatch
//!
//! This crate contains the watch/build/run loop: it watches a source tree,
//! rebuilds on relevant changes and restarts the built application.

pub mod config;
pub mod cycle;
pub mod error;
pub mod monitor;
pub mod paths;
pub mod process;
pub mod session;

pub use config::{BuildMode, FileConfig, WatchBackend, WatchConfig, WatchConfigBuilder};
pub use cycle::{CycleOutcome, CycleState, Orchestrator, Supervisors};
pub use error::{Result, WatchError};
pub use monitor::{ChangeEvent, ChangeKind, ChangeQueue};
pub use process::{ManagedProcess, OutputSink, StartOutcome, Supervisor};
pub use session::WatchSession;
