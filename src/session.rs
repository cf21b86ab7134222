use std::collections::VecDeque;
use std::io::BufRead;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use project::{DirectorySync, Project, RunId, SyncEvent};
use util::HashSet;

use crate::exec::{Notice, Orchestrator, OutputSink, RunRecord, Tool};
use crate::ui::Ui;

/// How long the control thread waits for an event before polling the runner.
const TICK: Duration = Duration::from_millis(50);

/// Debounce window: changes to project files are synced once they settle.
const DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Unknown command \"{0}\" (expected 'run ID|all', 'stop ID|all', 'status' or 'quit')")]
    UnknownCommand(String),
}

/// Anything the control thread reacts to.
/// Events from other threads are marshalled onto the control thread through a channel.
#[derive(Debug)]
pub enum Event {
    /// A line of output from a run
    Output(RunId, String),
    /// A project file in the folder was created, modified or removed
    Changed(PathBuf),
    Request(Request),
    /// No more requests will arrive
    InputClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    One(RunId),
}

impl FromStr for Target {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Target::All),
            _ => Ok(Target::One(s.parse()?)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Run(Target),
    Stop(Target),
    Status,
    Quit,
}

impl FromStr for Request {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        match (words.next(), words.next(), words.next()) {
            (Some("run"), Some(target), None) => Ok(Request::Run(target.parse()?)),
            (Some("stop"), Some(target), None) => Ok(Request::Stop(target.parse()?)),
            (Some("status"), None, None) => Ok(Request::Status),
            (Some("quit" | "exit" | "q"), None, None) => Ok(Request::Quit),
            _ => Err(Error::UnknownCommand(s.trim().to_owned()).into()),
        }
    }
}

/// Single control thread that owns the project and the orchestrator.
/// Every model mutation happens here.
pub struct Session<'a> {
    project: Project,
    orchestrator: Orchestrator,
    sync: DirectorySync,
    ui: &'a Ui,
    tx: Sender<Event>,
    rx: Receiver<Event>,
    /// Events received while draining output, handled before anything newer
    pending: VecDeque<Event>,
    /// Names of project files changed since the last sync
    changed: HashSet<String>,
    settle_at: Option<Instant>,
    /// Stop once idle, instead of waiting for more requests
    closing: bool,
    records: Vec<RunRecord>,
    launch_failures: usize,
}

impl<'a> Session<'a> {
    pub fn new(project: Project, tool: Tool, ui: &'a Ui) -> Self {
        let (tx, rx) = mpsc::channel();
        let out = tx.clone();
        let sink: OutputSink = Arc::new(move |run: &RunId, line: &str| {
            let _ = out.send(Event::Output(run.clone(), line.to_owned()));
        });
        Self {
            project,
            orchestrator: Orchestrator::new(tool, sink),
            sync: DirectorySync,
            ui,
            tx,
            rx,
            pending: VecDeque::with_capacity(4),
            changed: HashSet::default(),
            settle_at: None,
            closing: false,
            records: Vec::with_capacity(16),
            launch_failures: 0,
        }
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Outcomes of the runs completed so far.
    pub fn records(&self) -> &[RunRecord] {
        &self.records
    }

    /// Number of runs the tool could not be launched for.
    pub fn launch_failures(&self) -> usize {
        self.launch_failures
    }

    /// For handing events to the session from other threads.
    pub fn sender(&self) -> Sender<Event> {
        self.tx.clone()
    }

    /// Scan the folder and load every project file in it.
    pub fn load(&mut self) -> Result<()> {
        let orch = &self.orchestrator;
        let in_flight = |run: &RunId| orch.is_in_flight(run);
        let events = self
            .sync
            .sync_folder(&mut self.project, &in_flight)
            .context("while loading project")?;
        for event in &events {
            if let SyncEvent::FileRejected { .. } = event {
                self.ui.sync_event(event);
            }
        }
        log::info!("loaded {} project files", self.project.file_names().len());
        Ok(())
    }

    /// Handle one request. Returns false if the session should end.
    pub fn request(&mut self, request: Request) -> bool {
        let notices = match request {
            Request::Run(Target::All) => self.orchestrator.request_all(&mut self.project),
            Request::Run(Target::One(run)) => self.orchestrator.request_run(&mut self.project, run),
            Request::Stop(Target::All) => self.orchestrator.cancel_all(),
            Request::Stop(Target::One(run)) => self.orchestrator.stop(&run),
            Request::Status => {
                let orch = &self.orchestrator;
                self.ui.print_status(&self.project, &|run: &RunId| orch.is_in_flight(run));
                Vec::with_capacity(0)
            }
            Request::Quit => return false,
        };
        self.report(notices);
        true
    }

    /// Drive queued runs until the queue drains.
    pub fn run_until_idle(&mut self) -> Result<()> {
        while !self.orchestrator.is_idle() || !self.pending.is_empty() {
            if !self.step() {
                break;
            }
        }
        self.drain();
        Ok(())
    }

    /// Watch the folder and take requests from stdin until told to quit.
    pub fn run_interactive(&mut self) -> Result<()> {
        let _watcher = self.watch()?;
        self.read_requests()?;

        while self.step() {
            if self.closing && self.orchestrator.is_idle() {
                break;
            }
        }
        self.orchestrator.shutdown();
        Ok(())
    }

    /// Wait briefly for an event, then check on the runner and pending changes.
    /// Returns false if the session should end.
    fn step(&mut self) -> bool {
        let event = match self.pending.pop_front() {
            Some(event) => Some(event),
            None => match self.rx.recv_timeout(TICK) {
                Ok(event) => Some(event),
                Err(RecvTimeoutError::Timeout) => None,
                // we hold a sender ourselves, so this can't happen
                Err(RecvTimeoutError::Disconnected) => return false,
            },
        };
        if let Some(event) = event {
            if !self.handle(event) {
                return false;
            }
        }

        let notices = self.orchestrator.poll(&mut self.project);
        if !notices.is_empty() {
            // show the tail of the finished run's output before its outcome:
            self.drain();
            self.report(notices);
            self.reap();
        }

        if self.settle_at.is_some_and(|t| Instant::now() >= t) {
            self.sync_changes();
        }
        true
    }

    fn handle(&mut self, event: Event) -> bool {
        match event {
            Event::Output(run, line) => self.ui.append_log(&run, &line),
            Event::Changed(path) => {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    self.changed.insert(name.to_owned());
                    self.settle_at = Some(Instant::now() + DEBOUNCE);
                }
            }
            Event::Request(request) => return self.request(request),
            Event::InputClosed => self.closing = true,
        }
        true
    }

    /// Show output that is already waiting. Other events keep their order
    /// and are handled by the following steps.
    fn drain(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            match event {
                Event::Output(run, line) => self.ui.append_log(&run, &line),
                other => self.pending.push_back(other),
            }
        }
    }

    fn report(&mut self, notices: Vec<Notice>) {
        for notice in notices {
            self.ui.notice(&notice);
            match notice {
                Notice::Finished(record) => self.records.push(record),
                Notice::LaunchFailed { .. } => self.launch_failures += 1,
                _ => {}
            }
        }
    }

    /// Reconcile the project with the folder, then re-read changed files.
    fn sync_changes(&mut self) {
        self.settle_at = None;
        let changed = std::mem::take(&mut self.changed);

        let orch = &self.orchestrator;
        let in_flight = |run: &RunId| orch.is_in_flight(run);
        let mut events = match self.sync.sync_folder(&mut self.project, &in_flight) {
            Ok(events) => events,
            Err(e) => {
                log::error!("{}", project::describe(&e));
                Vec::with_capacity(0)
            }
        };
        for name in &changed {
            let added = events
                .iter()
                .any(|e| matches!(e, SyncEvent::FileAdded(n) if n == name));
            if !added {
                events.extend(self.sync.sync_file(&mut self.project, name, &in_flight));
            }
        }

        for event in &events {
            self.ui.sync_event(event);
        }
        self.reap();
    }

    fn reap(&mut self) {
        let orch = &self.orchestrator;
        for run in self.project.reap_retired(&|run: &RunId| orch.is_in_flight(run)) {
            log::debug!("dropped {run} after its run finished");
        }
        self.orchestrator.prune(&self.project);
    }

    /// Watch the project folder for changes to project files.
    fn watch(&self) -> Result<RecommendedWatcher> {
        let tx = self.tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("watch error: {e}");
                    return;
                }
            };
            if let EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_) = event.kind {
                for path in event.paths {
                    if Project::is_project_file(&path) {
                        let _ = tx.send(Event::Changed(path));
                    }
                }
            }
        })
        .context("while creating folder watcher")?;

        watcher
            .watch(self.project.folder(), RecursiveMode::NonRecursive)
            .with_context(|| format!("while watching {:?}", self.project.folder()))?;
        log::info!("watching {:?}", self.project.folder());
        Ok(watcher)
    }

    /// Read requests from stdin on a separate thread.
    fn read_requests(&self) -> Result<()> {
        let tx = self.tx.clone();
        thread::Builder::new()
            .name("stdin".to_owned())
            .spawn(move || {
                for line in std::io::stdin().lock().lines() {
                    let Ok(line) = line else {
                        break;
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match line.parse::<Request>() {
                        Ok(request) => {
                            if tx.send(Event::Request(request)).is_err() {
                                return;
                            }
                        }
                        Err(e) => eprintln!("{e}"),
                    }
                }
                let _ = tx.send(Event::InputClosed);
            })
            .context("while starting input thread")?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    #[cfg(unix)]
    use clap::Parser;

    #[cfg(unix)]
    use crate::{args::Args, settings::Settings};

    #[test]
    fn test_parse_request() -> Result<()> {
        assert_eq!("run all".parse::<Request>()?, Request::Run(Target::All));
        assert_eq!(
            " stop  demo.sby#prf ".parse::<Request>()?,
            Request::Stop(Target::One(RunId::task("demo.sby", "prf")))
        );
        assert_eq!("status".parse::<Request>()?, Request::Status);
        assert_eq!("q".parse::<Request>()?, Request::Quit);
        assert!("run".parse::<Request>().is_err());
        assert!("run a.sby b.sby".parse::<Request>().is_err());
        assert!("jump".parse::<Request>().is_err());
        Ok(())
    }

    /// A project folder with one three-task file, and settings for a fake tool
    /// running `script`.
    #[cfg(unix)]
    fn fixture(script: &str) -> Result<(tempfile::TempDir, Settings)> {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir()?;
        let folder = dir.path().join("project");
        fs::create_dir(&folder)?;
        fs::write(folder.join("a.sby"), "[tasks]\nx\ny\nz\n")?;
        let tool = dir.path().join("fake-sby");
        fs::write(&tool, format!("#!/bin/sh\n{script}\n"))?;
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755))?;

        let tool = tool.to_string_lossy().into_owned();
        let folder = folder.to_string_lossy().into_owned();
        let args = Args::try_parse_from(["sbyr", "-y", "--tool", tool.as_str(), "open", folder.as_str()])?;
        let settings: Settings = args.try_into()?;
        Ok((dir, settings))
    }

    #[cfg(unix)]
    fn finished_runs(session: &Session) -> Vec<RunId> {
        session.records().iter().map(|r| r.run.clone()).collect()
    }

    #[cfg(unix)]
    #[test]
    fn test_requests_keep_their_order() -> Result<()> {
        let (_dir, settings) = fixture("exit 0")?;
        let ui = Ui::new(&settings);
        let mut session = Session::new(Project::open(&settings.path)?, settings.tool.clone(), &ui);
        session.load()?;

        let y = RunId::task("a.sby", "y");
        let z = RunId::task("a.sby", "z");
        let tx = session.sender();
        tx.send(Event::Request(Request::Run(Target::One(y.clone()))))?;
        tx.send(Event::Request(Request::Run(Target::One(z.clone()))))?;
        // requests arriving while output is drained are not overtaken:
        session.drain();

        for _ in 0..200 {
            if session.records().len() == 2 {
                break;
            }
            session.step();
        }
        assert_eq!(finished_runs(&session), [y, z]);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_all_lets_active_run_finish() -> Result<()> {
        let (_dir, settings) = fixture("sleep 1; exit 0")?;
        let ui = Ui::new(&settings);
        let mut session = Session::new(Project::open(&settings.path)?, settings.tool.clone(), &ui);
        session.load()?;

        session.request(Request::Run(Target::All));
        session.request(Request::Stop(Target::All));
        let x = RunId::task("a.sby", "x");
        assert_eq!(session.orchestrator().queued().collect::<Vec<_>>(), [&x]);
        assert!(session.orchestrator().is_in_flight(&x));

        session.run_until_idle()?;
        assert_eq!(finished_runs(&session), [x]);
        assert!(session.records()[0].success);
        Ok(())
    }
}
