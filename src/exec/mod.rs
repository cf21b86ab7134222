use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use project::{Item, RunId};

/// Run a subprocess, streaming its output
mod run_cmd;

/// One invocation of the verification tool
mod task_runner;
pub use task_runner::{RunnerState, TaskRunner};

/// Queue of requested runs
mod orchestrator;
pub use orchestrator::Orchestrator;

/// Synchronous `--dumptasks` / `--dumpcfg` queries
mod tool_query;
pub use tool_query::{dump_cfg, dump_tasks};

/// Tells python-based tools not to buffer their output.
const UNBUFFERED_VAR: &str = "PYTHONUNBUFFERED";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unable to launch \"{program}\" for {run}")]
    Launch {
        program: String,
        run: RunId,
        source: std::io::Error,
    },
    #[error("Cannot run {0}: {1}")]
    UnknownRun(RunId, String),
    #[error("\"{program}\" exited with {status} while querying {file}")]
    QueryFailed {
        program: String,
        file: String,
        status: std::process::ExitStatus,
    },
}

/// Receives output lines of a run as they arrive, from any thread.
pub type OutputSink = Arc<dyn Fn(&RunId, &str) + Send + Sync>;

/// How the verification tool is invoked.
#[derive(Debug, Clone)]
pub struct Tool {
    pub program: String,
    /// Extra environment for the child, on top of our own
    pub env: Vec<(String, String)>,
}

impl Tool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            env: Vec::with_capacity(0),
        }
    }

    /// A command for the tool, run in `work_folder` with the run environment.
    pub fn command(&self, work_folder: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.current_dir(work_folder)
            .env(UNBUFFERED_VAR, "1")
            .envs(self.env.iter().map(|(k, v)| (k, v)));
        cmd
    }

    /// `<tool> -f <file.sby> [<task>]`
    pub fn run_command(&self, item: &Item) -> Command {
        let mut cmd = self.command(item.work_folder());
        cmd.arg("-f").arg(item.file_name());
        if !item.task_name().is_empty() {
            cmd.arg(item.task_name());
        }
        cmd
    }
}

/// Something the orchestrator did, reported back to the control thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Queued(RunId),
    AlreadyQueued(RunId),
    Started(RunId),
    /// The tool could not be started at all.
    LaunchFailed { run: RunId, reason: String },
    /// The run id no longer refers to anything in the project.
    Skipped { run: RunId, reason: String },
    Dequeued(RunId),
    Stopping(RunId),
    Finished(RunRecord),
}

/// Outcome of one completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub run: RunId,
    pub success: bool,
    /// Exit code, if the tool exited normally
    pub code: Option<i32>,
    pub elapsed: Duration,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_command_env() {
        let mut tool = Tool::new("sby");
        tool.env.push(("YOSYS_NOVERIFIC".to_owned(), "1".to_owned()));
        let cmd = tool.command(Path::new("/tmp"));
        let envs: Vec<_> = cmd
            .get_envs()
            .map(|(k, v)| (k.to_owned(), v.map(|v| v.to_owned())))
            .collect();
        assert_eq!(envs.len(), 2);
        assert!(envs.iter().any(|(k, v)| k == UNBUFFERED_VAR && v.as_deref() == Some(std::ffi::OsStr::new("1"))));
        assert_eq!(cmd.get_current_dir(), Some(Path::new("/tmp")));
    }
}
