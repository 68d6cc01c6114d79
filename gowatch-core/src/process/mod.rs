//! Supervision of externally spawned processes
//!
//! Every command the watch loop runs (build, clean, tidy, prebuild and the
//! application itself) is owned by a [`Supervisor`]. The orchestrator only
//! talks to this trait, which keeps the cycle logic independent of real
//! process handles.

pub mod child;
pub mod output;

pub use child::{DEFAULT_GRACE_PERIOD, ManagedProcess};
pub use output::OutputSink;

use crate::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;

/// Result of [`Supervisor::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The process ran to completion. `code` is `None` when it was killed by a signal.
    Exited { code: Option<i32> },
    /// The process was spawned and left running.
    Detached,
    /// A live process already existed, nothing was spawned.
    AlreadyRunning,
}

impl StartOutcome {
    pub fn succeeded(&self) -> bool {
        match self {
            Self::Exited { code } => *code == Some(0),
            Self::Detached | Self::AlreadyRunning => true,
        }
    }
}

#[async_trait]
pub trait Supervisor: Send {
    /// Starts the process unless a live one exists.
    ///
    /// A stale process (its program file changed since it started) is
    /// terminated first. With `wait` the call resolves once the process has
    /// exited and its output has been forwarded.
    async fn start(&mut self, wait: bool) -> Result<StartOutcome>;

    /// Interrupts the live process, escalating to a kill after the grace period.
    async fn terminate(&mut self) -> Result<()>;

    /// True only when a handle exists and its exit status is known.
    fn has_exited(&mut self) -> bool;

    fn set_working_dir(&mut self, dir: PathBuf);

    /// Human readable command line.
    fn command_line(&self) -> String;
}
