//! End-to-end watch session
//!
//! Wires the configuration into a running loop: resolves the build artifact,
//! creates the supervisors, starts the watcher and the rebuild trigger, and
//! queues the initial build.

use crate::config::{BuildMode, WatchConfig};
use crate::cycle::{Orchestrator, Supervisors, spawn_rebuild_trigger};
use crate::error::Result;
use crate::monitor::{ChangeEvent, ChangeQueue, FileWatcher, PathFilter, WatcherHandle};
use crate::process::OutputSink;
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct WatchSession {
    orchestrator: Orchestrator,
    queue: ChangeQueue,
    watcher: WatcherHandle,
    output: PathBuf,
    trigger: Option<JoinHandle<()>>,
}

impl WatchSession {
    /// Starts watching with process output on stdout and rebuild requests read from stdin.
    pub async fn start(config: WatchConfig) -> Result<Self> {
        Self::start_with(config, OutputSink::Stdout, tokio::io::stdin()).await
    }

    /// Starts watching with the given output sink and rebuild input.
    pub async fn start_with<R>(config: WatchConfig, sink: OutputSink, input: R) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let output = config.resolve_output().await?;
        info!("Building into {}", output.display());

        let supervisors = Supervisors::from_config(&config, &output, sink);
        let orchestrator = Orchestrator::from_config(&config, supervisors);

        let queue = ChangeQueue::default();
        let filter = PathFilter::new(config.directory(), config.extensions(), config.ignore_dirs())
            .exclude(&output);
        let watcher = FileWatcher::new(filter).with_backend(config.backend()).start(queue.clone())?;
        info!("Watching {} files", watcher.watched_files());

        let trigger = config.rebuild_key().map(|key| {
            let action = match config.mode() {
                BuildMode::Build => "to rebuild",
                BuildMode::Test => "to retest",
            };
            info!("Enter {} {}", key as char, action);
            spawn_rebuild_trigger(input, key, queue.clone())
        });

        queue.push(ChangeEvent::synthetic());

        Ok(Self { orchestrator, queue, watcher, output, trigger })
    }

    /// Handle that stops the session when closed.
    pub fn shutdown_handle(&self) -> ChangeQueue {
        self.queue.clone()
    }

    /// Absolute path of the build artifact.
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Runs build cycles until shut down or the watcher fails.
    pub async fn run(mut self) -> Result<()> {
        let result = self.orchestrator.run(&self.queue, self.watcher.errors()).await;
        if let Some(trigger) = self.trigger.take() {
            trigger.abort();
        }
        debug!("Change queue: {:?}", self.queue.stats());
        result
    }
}
