use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use project::{Project, RunId};

use crate::args::{Args, Cmd};
use crate::exec::Tool;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid env flag '{0}' (should be formatted 'KEY=VALUE')")]
    InvalidEnvFlag(String),
    #[error("No such file or directory: {0}")]
    NotFound(String),
    #[error("Not a project file: {0}")]
    NotAProjectFile(String),
    #[error("Not a project file or folder: {0}")]
    NotAProject(String),
}

/// What the user asked us to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Status,
    Tasks { external: bool },
    Cfg { task: String, external: bool },
    Files { task: String },
    Log(RunId),
    Run(Vec<RunId>),
    Open,
    Clean(Vec<RunId>),
}

/// Settings are like Args, except all the logic has
/// been applied so e.g. defaults are added in.
#[derive(Debug)]
pub struct Settings {
    /// Canonicalized project folder, or single project file
    pub path: PathBuf,
    pub tool: Tool,
    pub yes: bool,
    pub verbose: u8,
    pub dry_run: bool,
    pub action: Action,
}

impl Settings {
    /// Folder the project lives in.
    pub fn folder(&self) -> &Path {
        if self.path.is_dir() {
            &self.path
        } else {
            self.path.parent().unwrap_or(&self.path)
        }
    }
}

impl TryFrom<Args> for Settings {
    type Error = anyhow::Error;
    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let mut tool = Tool::new(args.tool);
        for flag in args.env {
            let (k, v) = flag
                .split_once('=')
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| Error::InvalidEnvFlag(flag.clone()))?;
            tool.env.push((k.to_owned(), v.to_owned()));
        }

        let (path, action) = match args.command {
            Cmd::Status { path } => (project_path(&path)?, Action::Status),
            Cmd::Tasks { file, external } => (project_file(&file)?, Action::Tasks { external }),
            Cmd::Cfg {
                file,
                task,
                external,
            } => (
                project_file(&file)?,
                Action::Cfg {
                    task: task.unwrap_or_default(),
                    external,
                },
            ),
            Cmd::Files { file, task } => (
                project_file(&file)?,
                Action::Files {
                    task: task.unwrap_or_default(),
                },
            ),
            Cmd::Log { run, path } => (project_path(&path)?, Action::Log(run.parse()?)),
            Cmd::Run { path, targets } => (project_path(&path)?, Action::Run(run_ids(&targets)?)),
            Cmd::Open { path } => (project_path(&path)?, Action::Open),
            Cmd::Clean { path, targets } => {
                (project_path(&path)?, Action::Clean(run_ids(&targets)?))
            }
        };

        Ok(Self {
            path,
            tool,
            yes: args.yes,
            verbose: args.verbose,
            dry_run: args.dry_run,
            action,
        })
    }
}

/// Canonicalize a path that must be a folder or a project file.
fn project_path(path: &str) -> Result<PathBuf> {
    let path = canonical(path)?;
    if path.is_dir() || Project::is_project_file(&path) {
        Ok(path)
    } else {
        Err(Error::NotAProject(path.display().to_string()).into())
    }
}

/// Canonicalize a path that must be a project file.
fn project_file(path: &str) -> Result<PathBuf> {
    let path = canonical(path)?;
    if path.is_file() && Project::is_project_file(&path) {
        Ok(path)
    } else {
        Err(Error::NotAProjectFile(path.display().to_string()).into())
    }
}

fn canonical(path: &str) -> Result<PathBuf> {
    let buf = PathBuf::from(path);
    if !buf.exists() {
        return Err(Error::NotFound(path.to_owned()).into());
    }
    buf.canonicalize()
        .with_context(|| format!("while resolving path \"{path}\""))
}

fn run_ids(targets: &[String]) -> Result<Vec<RunId>> {
    let mut runs = Vec::with_capacity(targets.len());
    for target in targets {
        runs.push(target.parse()?);
    }
    Ok(runs)
}
