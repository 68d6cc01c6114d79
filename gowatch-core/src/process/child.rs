//! Tokio-backed process supervisor
//!
//! A [`ManagedProcess`] owns at most one child at a time. Termination is
//! graceful on unix (SIGINT, then a kill once the grace period runs out) and a
//! plain kill elsewhere.

use super::{OutputSink, StartOutcome, Supervisor};
use crate::error::{Result, WatchError};
use crate::paths::binary_modified_since;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, SystemTime};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// How long an interrupted process gets before it is killed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Upper bound on waiting for output forwarding after a waited process exits.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Set once the child is reaped. The inner code is `None` when a signal ended it.
type ExitSlot = Option<Option<i32>>;

/// A process left running in the background.
///
/// A reaper task owns the [`Child`] and collects it as soon as it exits.
#[derive(Debug)]
struct Detached {
    pid: Option<u32>,
    kill: Option<oneshot::Sender<()>>,
    exit: watch::Receiver<ExitSlot>,
}

impl Detached {
    fn spawn(mut child: Child) -> Self {
        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel(None);

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                // A dropped sender means the supervisor is gone.
                _ = kill_rx => {
                    if let Err(e) = child.start_kill() {
                        warn!("Failed to kill pid {:?}: {}", pid, e);
                    }
                    child.wait().await
                }
            };
            let code = match status {
                Ok(status) => {
                    debug!("pid {:?} exited with {}", pid, status);
                    status.code()
                }
                Err(e) => {
                    warn!("Failed waiting for pid {:?}: {}", pid, e);
                    None
                }
            };
            let _ = exit_tx.send(Some(code));
        });

        Self { pid, kill: Some(kill_tx), exit: exit_rx }
    }

    fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// Resolves once the reaper has collected the process.
    async fn exited(&mut self) {
        // An error means the reaper is gone, and the child with it.
        let _ = self.exit.wait_for(Option::is_some).await;
    }

    /// Kills the process. False if it is still around after `timeout`.
    async fn kill(&mut self, timeout: Duration) -> bool {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
        tokio::time::timeout(timeout, self.exited()).await.is_ok()
    }
}

#[derive(Debug)]
enum Handle {
    Exited { code: Option<i32> },
    Detached(Detached),
}

impl Handle {
    fn has_exited(&self) -> bool {
        match self {
            Self::Exited { .. } => true,
            Self::Detached(detached) => detached.has_exited(),
        }
    }
}

#[derive(Debug)]
pub struct ManagedProcess {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    sink: OutputSink,
    handle: Option<Handle>,
    started_at: SystemTime,
    grace_period: Duration,
}

impl ManagedProcess {
    /// Creates a supervisor. Output is discarded until a sink is set.
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
            sink: OutputSink::Null,
            handle: None,
            started_at: SystemTime::now(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn with_sink(mut self, sink: OutputSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// OS id of the live detached process, if any.
    pub fn id(&self) -> Option<u32> {
        match &self.handle {
            Some(Handle::Detached(detached)) if !detached.has_exited() => detached.pid,
            _ => None,
        }
    }

    fn is_stale(&self) -> bool {
        binary_modified_since(&self.program, self.started_at)
    }

    async fn spawn(&mut self, wait: bool) -> Result<StartOutcome> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|source| WatchError::Spawn { program: self.command_line(), source })?;
        self.started_at = SystemTime::now();
        debug!("Started {} (pid {:?})", self.command_line(), child.id());

        let copies: Vec<JoinHandle<()>> = [
            child.stdout.take().map(|out| tokio::spawn(self.sink.clone().forward(out))),
            child.stderr.take().map(|err| tokio::spawn(self.sink.clone().forward(err))),
        ]
        .into_iter()
        .flatten()
        .collect();

        if !wait {
            self.handle = Some(Handle::Detached(Detached::spawn(child)));
            return Ok(StartOutcome::Detached);
        }

        let status = child.wait().await.map_err(|e| WatchError::io(&self.program, e))?;
        // A grandchild holding the pipes open must not stall the cycle.
        let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, async {
            for copy in copies {
                let _ = copy.await;
            }
        })
        .await;
        self.handle = Some(Handle::Exited { code: status.code() });

        debug!("{} exited with {}", self.command_line(), status);
        Ok(StartOutcome::Exited { code: status.code() })
    }
}

#[async_trait]
impl Supervisor for ManagedProcess {
    async fn start(&mut self, wait: bool) -> Result<StartOutcome> {
        if self.is_stale() {
            debug!("{} changed on disk since it started", self.program.display());
            if let Err(e) = self.terminate().await {
                warn!("{}", e);
            }
        }

        if self.handle.as_ref().is_some_and(|handle| !handle.has_exited()) {
            return Ok(StartOutcome::AlreadyRunning);
        }

        self.handle = None;
        self.spawn(wait).await.inspect_err(|e| error!("Error running: {}", e))
    }

    async fn terminate(&mut self) -> Result<()> {
        let Some(Handle::Detached(mut detached)) = self.handle.take() else {
            return Ok(());
        };
        if detached.has_exited() {
            return Ok(());
        }

        #[cfg(unix)]
        if let Some(pid) = detached.pid {
            debug!("Sending SIGINT to {} (pid {})", self.program.display(), pid);
            // SAFETY: plain signal delivery to a pid we spawned and the reaper has not collected.
            if unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) } == -1 {
                warn!("Failed to interrupt pid {}: {}", pid, std::io::Error::last_os_error());
            } else if tokio::time::timeout(self.grace_period, detached.exited()).await.is_ok() {
                return Ok(());
            } else {
                debug!("pid {} still running after {:?}, killing", pid, self.grace_period);
            }
        }

        if detached.kill(self.grace_period).await {
            return Ok(());
        }
        Err(WatchError::Terminate {
            program: self.program.display().to_string(),
            reason: format!("still running {:?} after kill", self.grace_period),
        })
    }

    fn has_exited(&mut self) -> bool {
        self.handle.as_ref().is_some_and(Handle::has_exited)
    }

    fn set_working_dir(&mut self, dir: PathBuf) {
        self.working_dir = Some(dir);
    }

    fn command_line(&self) -> String {
        let program = self.program.to_string_lossy();
        let args = self.args.iter().map(String::as_str);
        shell_words::join(std::iter::once(program.as_ref()).chain(args))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::TempDir;

    fn sh(script: &str) -> ManagedProcess {
        ManagedProcess::new("sh", ["-c", script])
    }

    #[tokio::test]
    async fn test_waited_run_reports_exit_code() {
        let mut ok = sh("exit 0");
        let mut failing = sh("exit 3");

        assert_eq!(ok.start(true).await.unwrap(), StartOutcome::Exited { code: Some(0) });
        assert_eq!(failing.start(true).await.unwrap(), StartOutcome::Exited { code: Some(3) });
        assert!(failing.has_exited());
        assert!(!StartOutcome::Exited { code: Some(3) }.succeeded());
    }

    #[tokio::test]
    async fn test_output_is_forwarded_to_sink() {
        let sink = OutputSink::capture();
        let mut proc = sh("echo out; echo err >&2").with_sink(sink.clone());

        proc.start(true).await.unwrap();

        let captured = sink.captured();
        assert!(captured.contains("out\n"));
        assert!(captured.contains("err\n"));
    }

    #[tokio::test]
    async fn test_working_dir_is_applied() {
        let temp = TempDir::new().unwrap();
        let sink = OutputSink::capture();
        let mut proc = sh("pwd").with_sink(sink.clone());
        proc.set_working_dir(temp.path().to_path_buf());

        proc.start(true).await.unwrap();

        let expected = temp.path().canonicalize().unwrap();
        assert_eq!(PathBuf::from(sink.captured().trim()).canonicalize().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_returned() {
        let mut proc =
            ManagedProcess::new("/nonexistent/gowatch-test-binary", Vec::<String>::new());

        let err = proc.start(true).await.unwrap_err();
        assert!(matches!(err, WatchError::Spawn { .. }));
        assert!(!proc.has_exited());
    }

    #[tokio::test]
    async fn test_detached_start_is_not_duplicated() {
        let mut proc = sh("sleep 30");

        assert_eq!(proc.start(false).await.unwrap(), StartOutcome::Detached);
        let pid = proc.id();
        assert_eq!(proc.start(false).await.unwrap(), StartOutcome::AlreadyRunning);
        assert_eq!(proc.id(), pid);
        assert!(!proc.has_exited());

        proc.terminate().await.unwrap();
        assert!(proc.id().is_none());
    }

    #[tokio::test]
    async fn test_exited_process_is_restarted() {
        let mut proc = sh("exit 0");

        proc.start(false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(proc.has_exited());

        assert_eq!(proc.start(false).await.unwrap(), StartOutcome::Detached);
    }

    #[tokio::test]
    async fn test_terminate_interrupts_gracefully() {
        let mut proc = sh("exec sleep 30");
        proc.start(false).await.unwrap();

        let begin = Instant::now();
        proc.terminate().await.unwrap();

        assert!(begin.elapsed() < DEFAULT_GRACE_PERIOD);
        assert!(!proc.has_exited());
    }

    #[tokio::test]
    async fn test_terminate_escalates_to_kill() {
        let mut proc =
            sh("trap '' INT; exec sleep 30").with_grace_period(Duration::from_millis(200));
        proc.start(false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let begin = Instant::now();
        proc.terminate().await.unwrap();

        let elapsed = begin.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_detached_exit_is_reaped_without_polling() {
        let mut proc = sh("sleep 0.3");
        proc.start(false).await.unwrap();
        let pid = proc.id().unwrap() as libc::pid_t;

        // A zombie still answers signal 0, a reaped pid does not.
        let mut reaped = false;
        for _ in 0..250 {
            if unsafe { libc::kill(pid, 0) } == -1 {
                reaped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(reaped);
        assert!(proc.has_exited());
        assert!(proc.id().is_none());
    }

    #[tokio::test]
    async fn test_terminate_without_process_is_noop() {
        let mut proc = sh("true");
        proc.terminate().await.unwrap();
        assert!(!proc.has_exited());
    }

    #[test]
    fn test_command_line_quotes_arguments() {
        let proc = ManagedProcess::new("go", ["build", "-o", "/tmp/my app"]);
        assert_eq!(proc.command_line(), "go build -o '/tmp/my app'");
    }
}
