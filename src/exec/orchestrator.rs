use std::collections::VecDeque;

use project::{describe, Project, RunId};
use util::HashMap;

use super::{Error, Notice, OutputSink, RunnerState, TaskRunner, Tool};

/// Owns the queue of requested runs, and makes sure at most one of them
/// is executing at a time.
///
/// The front of the queue is the run in flight (if any); it is popped once
/// its runner reports an outcome, and the next run is started.
pub struct Orchestrator {
    tool: Tool,
    sink: OutputSink,
    queue: VecDeque<RunId>,
    runners: HashMap<RunId, TaskRunner>,
}

impl Orchestrator {
    pub fn new(tool: Tool, sink: OutputSink) -> Self {
        Self {
            tool,
            sink,
            queue: VecDeque::with_capacity(16),
            runners: HashMap::default(),
        }
    }

    pub fn tool(&self) -> &Tool {
        &self.tool
    }

    /// Queued runs, in order; the first one is in flight.
    pub fn queued(&self) -> impl Iterator<Item = &RunId> + '_ {
        self.queue.iter()
    }

    /// The run currently executing.
    pub fn active(&self) -> Option<&RunId> {
        self.queue.front().filter(|run| self.is_in_flight(run))
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    /// Whether a new run would start right away.
    pub fn can_play(&self) -> bool {
        self.active().is_none()
    }

    /// Whether there is a run to stop.
    pub fn can_stop(&self) -> bool {
        self.active().is_some()
    }

    pub fn is_in_flight(&self, run: &RunId) -> bool {
        self.runners.get(run).is_some_and(|r| r.is_active())
    }

    pub fn runner_state(&self, run: &RunId) -> RunnerState {
        self.runners.get(run).map(|r| r.state()).unwrap_or_default()
    }

    /// Queue a run, and start it if nothing else is queued.
    /// A run that is already queued is not queued again.
    pub fn request_run(&mut self, project: &mut Project, run: RunId) -> Vec<Notice> {
        let mut notices = Vec::with_capacity(2);
        if self.queue.contains(&run) {
            log::debug!("{run} is already queued");
            notices.push(Notice::AlreadyQueued(run));
            return notices;
        }

        self.queue.push_back(run.clone());
        notices.push(Notice::Queued(run));
        if self.queue.len() == 1 {
            self.start_front(project, &mut notices);
        }
        notices
    }

    /// Queue every run the project has, in file order then task order.
    pub fn request_all(&mut self, project: &mut Project) -> Vec<Notice> {
        let mut notices = Vec::with_capacity(16);
        for run in project.run_everything() {
            notices.extend(self.request_run(project, run));
        }
        notices
    }

    /// Check on the run in flight. When it has finished, update the project
    /// with its results and start the next queued run.
    pub fn poll(&mut self, project: &mut Project) -> Vec<Notice> {
        let mut notices = Vec::with_capacity(0);
        let Some(front) = self.queue.front() else {
            return notices;
        };
        let Some(record) = self.runners.get_mut(front).and_then(|r| r.poll()) else {
            return notices;
        };

        if let Err(e) = project.update(&record.run) {
            log::debug!("not updating status of {}: {e}", record.run);
        }
        notices.push(Notice::Finished(record));
        self.on_task_finished(project, &mut notices);
        notices
    }

    /// Drop every queued run except the one in flight, which finishes normally.
    pub fn cancel_all(&mut self) -> Vec<Notice> {
        let keep = usize::from(!self.queue.is_empty());
        self.queue.drain(keep..).map(Notice::Dequeued).collect()
    }

    /// Stop a run: terminate it if it is in flight, or take it off the queue.
    pub fn stop(&mut self, run: &RunId) -> Vec<Notice> {
        if self.queue.front() == Some(run) {
            if let Some(runner) = self.runners.get_mut(run) {
                runner.stop();
                return vec![Notice::Stopping(run.clone())];
            }
        }
        let before = self.queue.len();
        self.queue.retain(|queued| queued != run);
        if self.queue.len() < before {
            vec![Notice::Dequeued(run.clone())]
        } else {
            Vec::with_capacity(0)
        }
    }

    /// Forget the runners of runs that left the project, once they are done.
    pub fn prune(&mut self, project: &Project) {
        let before = self.runners.len();
        self.runners
            .retain(|run, runner| runner.is_active() || project.item(run).is_ok());
        if self.runners.len() < before {
            log::trace!("pruned {} runners", before - self.runners.len());
        }
    }

    /// Kill anything in flight and forget the queue, without touching the project.
    pub fn shutdown(&mut self) {
        self.queue.clear();
        // dropping a runner kills its child:
        self.runners.clear();
    }

    fn on_task_finished(&mut self, project: &mut Project, notices: &mut Vec<Notice>) {
        self.queue.pop_front();
        self.start_front(project, notices);
    }

    /// Start the front of the queue. Runs that can't be started are reported
    /// and popped, so the queue keeps moving.
    fn start_front(&mut self, project: &mut Project, notices: &mut Vec<Notice>) {
        while let Some(run) = self.queue.front().cloned() {
            match self.launch(project, &run) {
                Ok(()) => {
                    notices.push(Notice::Started(run));
                    return;
                }
                Err(Error::UnknownRun(run, reason)) => {
                    notices.push(Notice::Skipped { run, reason });
                }
                Err(e) => {
                    let reason = describe(&e);
                    log::error!("{reason}");
                    notices.push(Notice::LaunchFailed { run, reason });
                }
            }
            self.queue.pop_front();
        }
    }

    fn launch(&mut self, project: &Project, run: &RunId) -> Result<(), Error> {
        let item = project
            .item(run)
            .map_err(|e| Error::UnknownRun(run.clone(), e.to_string()))?;
        let cmd = self.tool.run_command(&item);
        let runner = self
            .runners
            .entry(run.clone())
            .or_insert_with(|| TaskRunner::new(run.clone()));
        runner.reset();
        runner.start(cmd, &self.sink)
    }
}
