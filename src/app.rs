use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

use project::{DirectorySync, Project, RunId, SyncEvent};
use syntax::SbyConfig;

use crate::clean::Cleaner;
use crate::exec::{dump_cfg, dump_tasks};
use crate::fs::Fs;
use crate::session::{Request, Session, Target};
use crate::settings::{Action, Settings};
use crate::ui::Ui;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Nothing to run: no project files found in {0}")]
    NothingToRun(String),
    #[error("{0} of {1} runs did not complete successfully")]
    RunsFailed(usize, usize),
    #[error("No log recorded for {0}")]
    NoLog(RunId),
}

/// This struct actually runs the command-line app.
pub struct App {
    /// Interpreted command line settings
    settings: Settings,
    /// User interface
    ui: Ui,
}

impl App {
    /// Create a new `App`.
    pub fn new(settings: Settings) -> Self {
        let ui = Ui::new(&settings);
        Self { settings, ui }
    }

    /// Run the app, using settings to determine what to do.
    pub fn run(self) -> Result<()> {
        log::debug!("{:?} on {:?}", self.settings.action, self.settings.path);
        match self.settings.action.clone() {
            Action::Status => self.status(),
            Action::Tasks { external } => self.tasks(external),
            Action::Cfg { task, external } => self.cfg(&task, external),
            Action::Files { task } => self.files(&task),
            Action::Log(run) => self.log(&run),
            Action::Run(targets) => self.run_targets(targets),
            Action::Open => self.open(),
            Action::Clean(targets) => self.clean(&targets),
        }
    }
}

// QUERIES //////////////////
impl App {
    fn status(&self) -> Result<()> {
        let project = self.load_project()?;
        self.ui.print_status(&project, &|_: &RunId| false);
        Ok(())
    }

    fn tasks(&self, external: bool) -> Result<()> {
        let tasks = if external {
            dump_tasks(&self.settings.tool, &self.settings.path)?
        } else {
            self.read_config()?.tasks().to_vec()
        };
        for task in tasks {
            println!("{task}");
        }
        Ok(())
    }

    fn cfg(&self, task: &str, external: bool) -> Result<()> {
        let content = if external {
            dump_cfg(&self.settings.tool, &self.settings.path, task)?
        } else {
            self.read_config()?
                .config_content(task)
                .with_context(|| format!("while resolving {:?}", self.settings.path))?
        };
        print!("{content}");
        Ok(())
    }

    fn files(&self, task: &str) -> Result<()> {
        let files = self
            .read_config()?
            .config_files(task)
            .with_context(|| format!("while resolving {:?}", self.settings.path))?;
        for file in files {
            println!("{file}");
        }
        Ok(())
    }

    fn log(&self, run: &RunId) -> Result<()> {
        let project = self.load_project()?;
        let item = project.item(run)?;
        match &item.status().previous_log {
            Some(log) => {
                print!("{log}");
                if !log.ends_with('\n') {
                    println!();
                }
                Ok(())
            }
            None => Err(Error::NoLog(run.clone()).into()),
        }
    }
}

// RUNNING //////////////////
impl App {
    fn run_targets(&self, targets: Vec<RunId>) -> Result<()> {
        let mut session = self.session()?;
        if session.project().is_empty() {
            return Err(Error::NothingToRun(self.settings.folder().display().to_string()).into());
        }

        if targets.is_empty() {
            session.request(Request::Run(Target::All));
        } else {
            for run in targets {
                session.request(Request::Run(Target::One(run)));
            }
        }
        session.run_until_idle().context("while running tasks")?;

        let records = session.records();
        self.ui.summary(records, session.project());
        let launch_failures = session.launch_failures();
        let failed = records.iter().filter(|r| !r.success).count() + launch_failures;
        if failed > 0 {
            return Err(Error::RunsFailed(failed, records.len() + launch_failures).into());
        }
        Ok(())
    }

    fn open(&self) -> Result<()> {
        let mut session = self.session()?;
        self.ui.print_status(session.project(), &|_: &RunId| false);
        eprintln!(
            "{} {:?}. Commands: run ID|all, stop ID|all, status, quit.",
            "Watching".magenta(),
            session.project().folder(),
        );
        session.run_interactive()
    }

    fn clean(&self, targets: &[RunId]) -> Result<()> {
        let mut project = self.load_project()?;
        let fs = Fs::new(self.settings.folder(), self.settings.dry_run)?;
        let cleaner = Cleaner::new(&self.settings, &self.ui, &fs);
        let deleted = cleaner.clean(&mut project, targets)?;
        if deleted > 0 {
            eprintln!("{} {deleted} result directories.", "Deleted".green());
        }
        Ok(())
    }

    fn session(&self) -> Result<Session<'_>> {
        let project = Project::open(&self.settings.path)?;
        let mut session = Session::new(project, self.settings.tool.clone(), &self.ui);
        self.ui.verbose_progress("Loading project");
        session.load()?;
        self.ui.done();
        Ok(session)
    }
}

// LOADING //////////////////
impl App {
    fn load_project(&self) -> Result<Project> {
        let mut project = Project::open(&self.settings.path)?;
        self.ui.verbose_progress("Loading project");
        let events = DirectorySync
            .sync_folder(&mut project, &|_: &RunId| false)
            .context("while loading project")?;
        self.ui.done();
        for event in &events {
            if let SyncEvent::FileRejected { .. } = event {
                self.ui.sync_event(event);
            }
        }
        Ok(project)
    }

    fn read_config(&self) -> Result<SbyConfig> {
        let path: &Path = &self.settings.path;
        self.ui.verbose_progress_debug("Reading project file", path);
        let text = fs::read_to_string(path)
            .with_context(|| format!("while reading project file {path:?}"))?;
        self.ui.done();
        Ok(SbyConfig::parse(&text))
    }
}
