//! Main orchestration logic for the watch/build/run loop

use super::state_machine::{CycleState, CycleStateMachine};
use crate::config::{BuildMode, MANIFEST_SUFFIX, WatchConfig};
use crate::error::{Result, WatchError};
use crate::monitor::{ChangeEvent, ChangeKind, ChangeQueue, modified_time};
use crate::paths::display_path;
use crate::process::{ManagedProcess, OutputSink, StartOutcome, Supervisor};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// The processes a cycle drives.
pub struct Supervisors {
    pub app: Box<dyn Supervisor>,
    pub build: Box<dyn Supervisor>,
    pub tidy: Box<dyn Supervisor>,
    /// Present when the cache is cleaned before every build.
    pub clean: Option<Box<dyn Supervisor>>,
    pub prebuild: Option<Box<dyn Supervisor>>,
}

impl Supervisors {
    /// Creates the real process supervisors for `config`, building into `output`.
    pub fn from_config(config: &WatchConfig, output: &Path, sink: OutputSink) -> Self {
        let working_dir = config.working_dir().map(Path::to_path_buf);
        let tool = config.build_tool();
        let supervise = |program: &Path, args: Vec<String>| -> Box<dyn Supervisor> {
            Box::new(
                ManagedProcess::new(program, args)
                    .with_working_dir(working_dir.clone())
                    .with_sink(sink.clone()),
            )
        };

        let build_args: Vec<String> = match config.mode() {
            BuildMode::Test => std::iter::once("test".to_string())
                .chain(config.build_args().iter().cloned())
                .collect(),
            BuildMode::Build => {
                ["build".to_string(), "-o".to_string(), output.display().to_string()]
                    .into_iter()
                    .chain(config.build_args().iter().cloned())
                    .collect()
            }
        };
        let clean_flag = match config.mode() {
            BuildMode::Test => "-testcache",
            BuildMode::Build => "-cache",
        };

        Self {
            app: supervise(output, config.app_args().to_vec()),
            build: supervise(Path::new(tool), build_args),
            // Tidy runs next to the manifest that changed.
            tidy: Box::new(
                ManagedProcess::new(tool, ["mod", "tidy"]).with_sink(sink.clone()),
            ),
            clean: config
                .clean_first()
                .then(|| supervise(Path::new(tool), vec!["clean".into(), clean_flag.into()])),
            prebuild: config
                .prebuild()
                .split_first()
                .map(|(program, args)| supervise(Path::new(program), args.to_vec())),
        }
    }
}

/// What a single cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The change predates the last prebuild and was caused by it.
    Suppressed,
    /// A manifest event whose file is unchanged or gone; nothing ran.
    ManifestUnchanged,
    /// Build or test failed, the application was not started.
    Failed { elapsed: Duration },
    Succeeded { elapsed: Duration, launched: bool },
}

/// Runs one build cycle per queued change, strictly one at a time.
pub struct Orchestrator {
    supervisors: Supervisors,
    mode: BuildMode,
    no_run: bool,
    state: CycleStateMachine,
    manifest_times: HashMap<PathBuf, SystemTime>,
    last_prebuild_at: Option<SystemTime>,
    display_base: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(supervisors: Supervisors) -> Self {
        Self {
            supervisors,
            mode: BuildMode::Build,
            no_run: false,
            state: CycleStateMachine::new(),
            manifest_times: HashMap::new(),
            last_prebuild_at: None,
            display_base: std::env::current_dir().ok(),
        }
    }

    pub fn from_config(config: &WatchConfig, supervisors: Supervisors) -> Self {
        Self::new(supervisors).with_mode(config.mode()).with_no_run(config.no_run())
    }

    pub fn with_mode(mut self, mode: BuildMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_no_run(mut self, no_run: bool) -> Self {
        self.no_run = no_run;
        self
    }

    pub fn state(&self) -> CycleState {
        self.state.current_state()
    }

    pub fn state_machine(&self) -> &CycleStateMachine {
        &self.state
    }

    /// Main run loop.
    ///
    /// Returns `Ok` once `queue` is closed, after terminating the application,
    /// and an error as soon as the watcher reports one.
    pub async fn run(
        &mut self,
        queue: &ChangeQueue,
        errors: &mut mpsc::UnboundedReceiver<notify::Error>,
    ) -> Result<()> {
        if self.state().is_terminal() {
            return Err(WatchError::StateTransition(format!("loop already {}", self.state())));
        }

        loop {
            tokio::select! {
                event = queue.recv() => match event {
                    Some(event) if queue.is_closed() => {
                        debug!("Dropping pending change on shutdown: {:?}", event.path);
                    }
                    Some(event) => {
                        self.run_cycle(event).await?;
                    }
                    None => return self.close().await,
                },
                Some(err) = errors.recv() => {
                    self.state.transition_to(CycleState::Failed)?;
                    return Err(WatchError::Watcher(err));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        info!("Shutting down");
        if let Err(e) = self.supervisors.app.terminate().await {
            warn!("{}", e);
        }
        self.state.transition_to(CycleState::Closed)
    }

    /// Handles one change: tidy, prebuild, clean, build and relaunch.
    pub async fn run_cycle(&mut self, event: ChangeEvent) -> Result<CycleOutcome> {
        // The first change after a prebuild is skipped if the prebuild caused it.
        if let Some(prebuilt_at) = self.last_prebuild_at.take() {
            if event.mod_time.is_some_and(|t| t < prebuilt_at) {
                debug!("Skipping change made by prebuild: {:?}", event.path);
                return Ok(CycleOutcome::Suppressed);
            }
        }

        self.log_change(&event);
        let resting = self.state.current_state();

        if let Some(manifest) = event.path.as_deref().filter(|p| is_manifest(p)) {
            if !self.tidy(manifest, resting).await? {
                return Ok(CycleOutcome::ManifestUnchanged);
            }
        }

        if let Err(e) = self.supervisors.app.terminate().await {
            warn!("{}", e);
        }

        if let Some(prebuild) = self.supervisors.prebuild.as_mut() {
            self.state.transition_to(CycleState::PreBuild)?;
            info!("Running: {}", prebuild.command_line());
            report("Prebuild", prebuild.start(true).await);
            self.last_prebuild_at = Some(SystemTime::now());
        }

        if let Some(clean) = self.supervisors.clean.as_mut() {
            self.state.transition_to(CycleState::Cleaning)?;
            info!("Cleaning...");
            report("Clean", clean.start(true).await);
        }

        self.state.transition_to(CycleState::Building)?;
        let action = match self.mode {
            BuildMode::Build => "Build",
            BuildMode::Test => "Test",
        };
        info!("{}", if self.mode == BuildMode::Test { "Testing..." } else { "Building..." });

        let begin = Instant::now();
        let built = self.supervisors.build.start(true).await.is_ok_and(|o| o.succeeded());
        let elapsed = begin.elapsed();

        if !built {
            warn!("{} failed ({:?})", action, truncate_millis(elapsed));
            self.state.transition_to(CycleState::Idle)?;
            return Ok(CycleOutcome::Failed { elapsed });
        }
        info!("{} finished ({:?})", action, truncate_millis(elapsed));

        let launched = self.mode == BuildMode::Build
            && !self.no_run
            && self.supervisors.app.start(false).await.is_ok_and(|o| o.succeeded());
        if launched {
            debug!("Started {}", self.supervisors.app.command_line());
        }

        self.state.transition_to(if launched { CycleState::Running } else { CycleState::Idle })?;
        Ok(CycleOutcome::Succeeded { elapsed, launched })
    }

    /// Tidies the module when the manifest changed. False when the cycle should stop.
    async fn tidy(&mut self, manifest: &Path, resting: CycleState) -> Result<bool> {
        let Some(before) = modified_time(manifest) else {
            debug!("Cannot stat {}", manifest.display());
            return Ok(false);
        };
        if self.manifest_times.get(manifest) == Some(&before) {
            debug!("{} unchanged since last tidy", manifest.display());
            return Ok(false);
        }

        self.state.transition_to(CycleState::Tidying)?;
        let tidy = &mut self.supervisors.tidy;
        info!("Running {}...", tidy.command_line());
        if let Some(dir) = manifest.parent() {
            tidy.set_working_dir(dir.to_path_buf());
        }
        report("Tidy", tidy.start(true).await);

        match modified_time(manifest) {
            Some(after) => {
                self.manifest_times.insert(manifest.to_path_buf(), after);
                Ok(true)
            }
            None => {
                self.state.transition_to(resting)?;
                Ok(false)
            }
        }
    }

    fn log_change(&self, event: &ChangeEvent) {
        let Some(path) = &event.path else {
            return;
        };
        let shown = |p: &Path| match &self.display_base {
            Some(base) => display_path(p, base),
            None => p.to_path_buf(),
        };

        match (&event.old_path, event.kind) {
            (Some(old), ChangeKind::Renamed | ChangeKind::Moved) => info!(
                "File {} {} to {}",
                shown(old).display(),
                event.kind,
                shown(path).display()
            ),
            _ => info!("File {} {}", shown(path).display(), event.kind),
        }
    }
}

fn is_manifest(path: &Path) -> bool {
    path.to_string_lossy().ends_with(MANIFEST_SUFFIX)
}

fn truncate_millis(elapsed: Duration) -> Duration {
    Duration::from_millis(elapsed.as_millis() as u64)
}

/// Logs a step that does not affect the rest of the cycle.
fn report(step: &str, result: Result<StartOutcome>) {
    match result {
        Ok(outcome) if outcome.succeeded() => {}
        Ok(outcome) => warn!("{} did not succeed: {:?}", step, outcome),
        Err(e) => debug!("{} failed to start: {}", step, e),
    }
}
