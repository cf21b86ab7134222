use std::process::{Child, Command, ExitStatus};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use project::RunId;
use util::Timer;

use super::run_cmd::{spawn_streaming, terminate};
use super::{Error, OutputSink, RunRecord};

/// How long to wait for output readers after the child exits, in case a
/// grandchild inherited its pipes and keeps them open.
const READER_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    #[default]
    Idle,
    Starting,
    Running,
    /// The tool exited successfully.
    Finished,
    /// The tool exited abnormally.
    Failed,
}

/// Wraps one invocation of the verification tool for one run id.
///
/// The runner is polled from the control thread; output is forwarded to the
/// sink by reader threads as it arrives.
pub struct TaskRunner {
    run: RunId,
    state: RunnerState,
    child: Option<Child>,
    readers: Vec<JoinHandle<()>>,
    exit: Option<(ExitStatus, Instant)>,
    timer: Timer,
}

impl TaskRunner {
    pub fn new(run: RunId) -> Self {
        Self {
            run,
            state: RunnerState::Idle,
            child: None,
            readers: Vec::with_capacity(0),
            exit: None,
            timer: Timer::now(),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// True while the tool is starting or running.
    pub fn is_active(&self) -> bool {
        matches!(self.state, RunnerState::Starting | RunnerState::Running)
    }

    /// Launch `cmd`. Does nothing unless the runner is idle.
    ///
    /// If the tool cannot be launched the runner goes straight back to idle
    /// and the launch error is returned.
    pub fn start(&mut self, mut cmd: Command, sink: &OutputSink) -> Result<(), Error> {
        if self.state != RunnerState::Idle {
            log::warn!("{} is already in progress", self.run);
            return Ok(());
        }

        self.state = RunnerState::Starting;
        log::debug!(
            "starting {:?} {:?} in {:?}",
            cmd.get_program(),
            cmd.get_args().collect::<Vec<_>>(),
            cmd.get_current_dir(),
        );

        match spawn_streaming(&mut cmd, &self.run, sink) {
            Ok(spawned) => {
                self.child = Some(spawned.child);
                self.readers = spawned.readers;
                self.exit = None;
                self.timer.reset();
                self.state = RunnerState::Running;
                Ok(())
            }
            Err(source) => {
                self.state = RunnerState::Idle;
                Err(Error::Launch {
                    program: cmd.get_program().to_string_lossy().into_owned(),
                    run: self.run.clone(),
                    source,
                })
            }
        }
    }

    /// Check on the child without blocking.
    ///
    /// Returns the outcome once, when the child has exited and its output has
    /// been forwarded.
    pub fn poll(&mut self) -> Option<RunRecord> {
        if self.state != RunnerState::Running {
            return None;
        }

        if self.exit.is_none() {
            let child = self.child.as_mut()?;
            match child.try_wait() {
                Ok(Some(status)) => self.exit = Some((status, Instant::now())),
                Ok(None) => return None,
                Err(e) => {
                    log::error!("unable to check on {}: {e}", self.run);
                    kill_and_wait(&self.run, child);
                    return Some(self.finish(None));
                }
            }
        }

        let (status, exited_at) = self.exit?;
        let readers_done = self.readers.iter().all(|r| r.is_finished());
        if !readers_done && exited_at.elapsed() < READER_GRACE {
            return None;
        }
        if !readers_done {
            log::debug!("output of {} still open after exit; detaching", self.run);
        }
        Some(self.finish(Some(status)))
    }

    /// Ask a running tool to terminate. The outcome is still reported by `poll`.
    pub fn stop(&mut self) {
        if self.state != RunnerState::Running || self.exit.is_some() {
            return;
        }
        if let Some(child) = self.child.as_mut() {
            log::info!("stopping {}", self.run);
            if let Err(e) = terminate(child) {
                log::warn!("unable to stop {}: {e}", self.run);
            }
        }
    }

    /// Forget a completed run, so the runner can be started again.
    pub fn reset(&mut self) {
        if !self.is_active() {
            self.state = RunnerState::Idle;
        }
    }

    fn finish(&mut self, status: Option<ExitStatus>) -> RunRecord {
        for reader in self.readers.drain(..) {
            if reader.is_finished() {
                let _ = reader.join();
            }
        }
        self.child = None;
        self.exit = None;

        let success = status.is_some_and(|s| s.success());
        self.state = if success {
            RunnerState::Finished
        } else {
            RunnerState::Failed
        };

        RunRecord {
            run: self.run.clone(),
            success,
            code: status.and_then(|s| s.code()),
            elapsed: self.timer.elapsed(),
        }
    }
}

impl Drop for TaskRunner {
    /// Teardown: kill the child outright, and don't report anything.
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Ok(None) = child.try_wait() {
                log::debug!("killing {}", self.run);
                kill_and_wait(&self.run, &mut child);
            } else {
                let _ = child.wait();
            }
        }
    }
}

/// Kill the child and reap it, so it doesn't linger as a zombie.
fn kill_and_wait(run: &RunId, child: &mut Child) {
    if let Err(e) = child.kill() {
        log::warn!("unable to kill {run}: {e}");
    }
    if let Err(e) = child.wait() {
        log::warn!("unable to reap {run}: {e}");
    }
}

#[cfg(all(test, unix))]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread::sleep;

    fn quiet() -> OutputSink {
        Arc::new(|_: &RunId, _: &str| {})
    }

    fn wait_for(runner: &mut TaskRunner) -> RunRecord {
        loop {
            if let Some(record) = runner.poll() {
                return record;
            }
            sleep(Duration::from_millis(10));
        }
    }

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn test_finish_and_fail() -> anyhow::Result<()> {
        let mut runner = TaskRunner::new(RunId::file("a.sby"));
        runner.start(sh("exit 0"), &quiet())?;
        assert!(runner.is_active());
        let record = wait_for(&mut runner);
        assert!(record.success);
        assert_eq!(runner.state(), RunnerState::Finished);

        // not idle, so this is ignored:
        runner.start(sh("exit 3"), &quiet())?;
        assert_eq!(runner.state(), RunnerState::Finished);

        runner.reset();
        runner.start(sh("exit 3"), &quiet())?;
        let record = wait_for(&mut runner);
        assert!(!record.success);
        assert_eq!(record.code, Some(3));
        assert_eq!(runner.state(), RunnerState::Failed);
        Ok(())
    }

    #[test]
    fn test_launch_failure() {
        let mut runner = TaskRunner::new(RunId::file("a.sby"));
        let result = runner.start(Command::new("/nonexistent/tool"), &quiet());
        assert!(matches!(result, Err(Error::Launch { .. })));
        assert_eq!(runner.state(), RunnerState::Idle);
    }

    #[test]
    fn test_stop() -> anyhow::Result<()> {
        let mut runner = TaskRunner::new(RunId::file("a.sby"));
        runner.start(sh("exec sleep 30"), &quiet())?;
        runner.stop();
        let record = wait_for(&mut runner);
        assert!(!record.success);
        assert_eq!(record.code, None);
        assert!(record.elapsed < Duration::from_secs(30));
        Ok(())
    }

    #[test]
    fn test_kill_and_wait_reaps() -> anyhow::Result<()> {
        let mut child = Command::new("sleep").arg("30").spawn()?;
        kill_and_wait(&RunId::file("a.sby"), &mut child);
        // the exit status was collected, so nothing is left to reap:
        let status = child.try_wait()?;
        assert!(status.is_some_and(|s| !s.success()));
        Ok(())
    }
}
