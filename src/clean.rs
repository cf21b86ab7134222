use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;

use project::{Project, RunId};

use crate::fs::Fs;
use crate::settings::Settings;
use crate::ui::Ui;

/// Logic for deleting the results of previous runs.
pub struct Cleaner<'a> {
    fs: &'a Fs,
    ui: &'a Ui,
    settings: &'a Settings,
}

impl<'a> Cleaner<'a> {
    /// Create a new `Cleaner`.
    pub fn new(settings: &'a Settings, ui: &'a Ui, fs: &'a Fs) -> Self {
        Self { settings, ui, fs }
    }
}

impl Cleaner<'_> {
    /// Delete the result directories of `targets` (of everything, if empty),
    /// then recompute status. Returns the number of directories deleted.
    pub fn clean(&self, project: &mut Project, targets: &[RunId]) -> Result<usize> {
        let dirs = self.result_dirs(project, targets)?;
        if dirs.is_empty() {
            eprintln!("No results to delete.");
            return Ok(0);
        }

        for dir in &dirs {
            eprintln!("{} {dir:?}", "Deleting".red());
        }
        if self.settings.dry_run {
            eprintln!("Dry run; not deleting.");
            return Ok(0);
        }
        if !self.ui.confirm("Proceed?")? {
            return Ok(0);
        }

        for dir in &dirs {
            self.fs
                .delete_dir(dir)
                .with_context(|| format!("while deleting results in {dir:?}"))?;
        }
        project.update_all();
        Ok(dirs.len())
    }

    /// Existing result directories of the given runs. A project file with
    /// tasks stands for all of its tasks.
    fn result_dirs(&self, project: &Project, targets: &[RunId]) -> Result<Vec<PathBuf>> {
        let runs = if targets.is_empty() {
            project.run_everything()
        } else {
            let mut runs = Vec::with_capacity(targets.len());
            for run in targets {
                runs.extend(expand(project, run)?);
            }
            runs
        };

        let mut dirs = Vec::with_capacity(runs.len());
        for run in &runs {
            let dir = project.result_paths(run)?.dir;
            if self.fs.exists(&dir) && !dirs.contains(&dir) {
                dirs.push(dir);
            } else if self.ui.verbose {
                eprintln!("No results for {run}; not deleting.");
            }
        }
        Ok(dirs)
    }
}

fn expand(project: &Project, run: &RunId) -> Result<Vec<RunId>> {
    let item = project.item(run)?;
    if run.task_name().is_some() {
        return Ok(vec![run.clone()]);
    }
    let id = project
        .file_id(item.file_name())
        .ok_or_else(|| project::Error::UnknownFile(run.to_string()))?;
    let tasks: Vec<RunId> = project
        .tasks_of(id)
        .map(|(_, t)| RunId::task(item.file_name(), t.name()))
        .collect();
    if tasks.is_empty() {
        Ok(vec![run.clone()])
    } else {
        Ok(tasks)
    }
}
