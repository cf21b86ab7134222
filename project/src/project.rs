use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use syntax::{ResolvedConfig, SbyConfig};
use util::{Arena, HashMap, HashSet, Hasher};

use crate::status::aggregate;
use crate::sync::diff;
use crate::{
    Error, File, FileId, Item, ResultPaths, ResultReader, RunId, Status, Task, TaskId,
};

/// Extension of project files.
pub const PROJECT_EXT: &str = "sby";

/// Answers whether a run is currently executing.
pub type InFlight<'a> = &'a dyn Fn(&RunId) -> bool;

/// How a removal request was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Dropped from the model.
    Removed,
    /// Hidden from the model, but kept until its run finishes.
    Retired,
}

/// Task membership changes made by a refresh.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TaskChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub retired: Vec<String>,
}

/// A config that parsed and resolved for every declared task.
struct Parsed {
    tasks: Vec<(String, ResolvedConfig)>,
    files: Vec<String>,
}

/// The project files of one folder and their tasks.
///
/// Files and tasks live in arenas and refer to each other by id, so removing
/// an entity never leaves a dangling reference behind.
#[derive(Debug)]
pub struct Project {
    folder: PathBuf,
    /// When set, only this file of the folder is part of the project.
    scope: Option<String>,
    files: Arena<FileId, File>,
    tasks: Arena<TaskId, Task>,
    /// Registered files, in name order
    by_name: BTreeMap<String, FileId>,
    retired_files: Vec<FileId>,
    retired_tasks: Vec<TaskId>,
    reader: ResultReader,
}

impl Project {
    /// Create an empty project for `folder`.
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            scope: None,
            files: Arena::with_capacity(16),
            tasks: Arena::with_capacity(64),
            by_name: BTreeMap::new(),
            retired_files: Vec::with_capacity(0),
            retired_tasks: Vec::with_capacity(0),
            reader: ResultReader,
        }
    }

    /// Create an empty project for a folder, or for a single project file.
    pub fn open(path: &Path) -> Result<Self, Error> {
        if path.is_dir() {
            return Ok(Self::new(path));
        }
        if path.is_file() && Self::is_project_file(path) {
            if let (Some(folder), Some(name)) = (path.parent(), path.file_name()) {
                let mut project = Self::new(folder);
                project.scope = Some(name.to_string_lossy().into_owned());
                return Ok(project);
            }
        }
        Err(Error::NotAProject(path.display().to_string()))
    }

    pub fn is_project_file(path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == PROJECT_EXT)
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn file_id(&self, name: &str) -> Option<FileId> {
        self.by_name.get(name).copied()
    }

    pub fn file(&self, id: FileId) -> Option<&File> {
        self.files.get(id)
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Registered files, in name order.
    pub fn files(&self) -> impl Iterator<Item = (FileId, &File)> + '_ {
        self.by_name
            .values()
            .filter_map(|id| self.files.get(*id).map(|f| (*id, f)))
    }

    /// Live tasks of a file, in declaration order.
    pub fn tasks_of(&self, id: FileId) -> impl Iterator<Item = (TaskId, &Task)> + '_ {
        self.files
            .get(id)
            .map(|f| f.tasks.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|tid| self.tasks.get(*tid).map(|t| (*tid, t)))
    }

    /// Every file followed by its tasks.
    pub fn items(&self) -> Vec<Item<'_>> {
        let mut items = Vec::with_capacity(self.files.len() + self.tasks.len());
        for (id, file) in self.files() {
            items.push(Item::File(file));
            items.extend(self.tasks_of(id).map(|(_, t)| Item::Task(t)));
        }
        items
    }

    pub fn item(&self, run: &RunId) -> Result<Item<'_>, Error> {
        let id = self
            .file_id(run.file_name())
            .ok_or_else(|| Error::UnknownFile(run.file_name().to_owned()))?;
        let file = self
            .files
            .get(id)
            .ok_or_else(|| Error::UnknownFile(run.file_name().to_owned()))?;
        match run.task_name() {
            None => Ok(Item::File(file)),
            Some(task) => self
                .tasks_of(id)
                .find(|(_, t)| t.name == task)
                .map(|(_, t)| Item::Task(t))
                .ok_or_else(|| Error::UnknownTask(file.name.clone(), task.to_owned())),
        }
    }

    /// Names of registered files.
    pub fn file_names(&self) -> HashSet<String> {
        self.by_name.keys().cloned().collect()
    }

    /// Names of a file's live tasks.
    pub fn task_names(&self, id: FileId) -> HashSet<String> {
        self.tasks_of(id).map(|(_, t)| t.name.clone()).collect()
    }

    /// Where the results for `run` are written.
    pub fn result_paths(&self, run: &RunId) -> Result<ResultPaths, Error> {
        let item = self.item(run)?;
        let task = run.task_name();
        Ok(ResultPaths::new(item.path(), task))
    }

    /// Everything there is to run: each task of files that declare tasks,
    /// and files that don't. Files in name order, tasks in declaration order.
    pub fn run_everything(&self) -> Vec<RunId> {
        let mut runs = Vec::with_capacity(self.tasks.len() + self.files.len());
        for (id, file) in self.files() {
            if file.have_tasks() {
                runs.extend(self.tasks_of(id).map(|(_, t)| RunId::task(&file.name, &t.name)));
            } else {
                runs.push(file.run_id());
            }
        }
        runs
    }
}

// STRUCTURE ////////////////////
impl Project {
    /// Parse, update and register the project file `name` in this project's folder.
    pub fn add_file(&mut self, name: &str) -> Result<FileId, Error> {
        if let Some(id) = self.file_id(name) {
            return Ok(id);
        }
        let path = self.folder.join(name);
        let parsed = parse(name, load(&path)?)?;

        let id = self.files.push(File::new(name.to_owned(), path.clone()));
        let mut task_ids = Vec::with_capacity(parsed.tasks.len());
        for (task_name, resolved) in parsed.tasks {
            task_ids.push(self.new_task(id, &path, task_name, resolved));
        }
        if let Some(file) = self.files.get_mut(id) {
            file.tasks = task_ids;
            file.files = parsed.files;
        }
        self.by_name.insert(name.to_owned(), id);
        self.update_file(id);

        log::debug!("added project file {name}");
        Ok(id)
    }

    /// Unregister a file and its tasks.
    /// A file with a run in flight is retired instead, and dropped by `reap_retired`.
    pub fn remove_file(&mut self, id: FileId, in_flight: InFlight) -> Option<Removal> {
        let busy = self.file_busy(id, in_flight)?;
        let name = self.files.get(id)?.name.clone();
        self.by_name.remove(&name);
        if busy {
            log::debug!("retiring project file {name} until its run finishes");
            self.retired_files.push(id);
            Some(Removal::Retired)
        } else {
            log::debug!("removed project file {name}");
            self.drop_file(id);
            Some(Removal::Removed)
        }
    }

    /// Re-read a file and reconcile its tasks with the new config.
    ///
    /// Tasks that are still declared keep their identity (and are re-resolved);
    /// new tasks are appended; vanished tasks are removed, or retired while their
    /// run is in flight. On a parse error the model is left untouched.
    pub fn refresh_file(&mut self, id: FileId, in_flight: InFlight) -> Result<TaskChanges, Error> {
        let (name, path) = match self.files.get(id) {
            Some(f) => (f.name.clone(), f.path.clone()),
            None => return Err(Error::UnknownFile(format!("{id:?}"))),
        };
        let parsed = parse(&name, load(&path)?)?;

        let current = self.task_names(id);
        let new: HashSet<String> = parsed.tasks.iter().map(|(n, _)| n.clone()).collect();
        let delta = diff(&current, &new);

        let mut changes = TaskChanges::default();
        let mut kept: HashMap<String, TaskId> =
            HashMap::with_capacity_and_hasher(current.len(), Hasher::default());
        let old_ids: Vec<TaskId> = self.tasks_of(id).map(|(tid, _)| tid).collect();
        for tid in old_ids {
            let Some(task) = self.tasks.get(tid) else {
                continue;
            };
            let task_name = task.name.clone();
            if !delta.removed.contains(&task_name) {
                kept.insert(task_name, tid);
            } else if in_flight(&RunId::task(&name, &task_name)) {
                self.retired_tasks.push(tid);
                changes.retired.push(task_name);
            } else {
                self.tasks.remove(tid);
                changes.removed.push(task_name);
            }
        }

        let mut ordered = Vec::with_capacity(parsed.tasks.len());
        for (task_name, resolved) in parsed.tasks {
            match kept.get(&task_name) {
                Some(&tid) => {
                    if let Some(task) = self.tasks.get_mut(tid) {
                        task.content = resolved.content();
                        task.files = resolved.files;
                    }
                    ordered.push(tid);
                }
                None => {
                    changes.added.push(task_name.clone());
                    ordered.push(self.new_task(id, &path, task_name, resolved));
                }
            }
        }

        if let Some(file) = self.files.get_mut(id) {
            file.tasks = ordered;
            file.files = parsed.files;
        }
        self.update_file(id);

        log::debug!(
            "refreshed {name}: {} added, {} removed, {} retired",
            changes.added.len(),
            changes.removed.len(),
            changes.retired.len()
        );
        Ok(changes)
    }

    /// Drop retired files and tasks whose runs are no longer in flight.
    /// Returns the run ids that were dropped.
    pub fn reap_retired(&mut self, in_flight: InFlight) -> Vec<RunId> {
        let mut reaped = Vec::with_capacity(0);

        for tid in std::mem::take(&mut self.retired_tasks) {
            let Some(run) = self.tasks.get(tid).map(|t| Item::Task(t).run_id()) else {
                continue;
            };
            if in_flight(&run) {
                self.retired_tasks.push(tid);
            } else {
                self.tasks.remove(tid);
                reaped.push(run);
            }
        }

        for id in std::mem::take(&mut self.retired_files) {
            match self.file_busy(id, in_flight) {
                Some(true) => self.retired_files.push(id),
                Some(false) => {
                    if let Some(file) = self.files.get(id) {
                        reaped.push(file.run_id());
                    }
                    self.drop_file(id);
                }
                None => {}
            }
        }

        reaped
    }

    fn new_task(&mut self, file: FileId, path: &Path, name: String, resolved: ResolvedConfig) -> TaskId {
        let mut task = Task::new(name, path.to_path_buf(), file);
        task.content = resolved.content();
        task.files = resolved.files;
        self.tasks.push(task)
    }

    /// Whether the file itself or any of its tasks has a run in flight.
    fn file_busy(&self, id: FileId, in_flight: InFlight) -> Option<bool> {
        let file = self.files.get(id)?;
        let busy = in_flight(&file.run_id())
            || file
                .tasks
                .iter()
                .filter_map(|tid| self.tasks.get(*tid))
                .any(|t| in_flight(&RunId::task(&file.name, &t.name)));
        Some(busy)
    }

    fn drop_file(&mut self, id: FileId) {
        if let Some(file) = self.files.remove(id) {
            for tid in file.tasks {
                self.tasks.remove(tid);
            }
        }
    }
}

// STATUS ////////////////////
impl Project {
    /// Recompute the status of whatever `run` refers to.
    /// A task's status is always recomputed together with its file's.
    pub fn update(&mut self, run: &RunId) -> Result<(), Error> {
        // make sure the run still refers to something:
        self.item(run)?;
        if let Some(id) = self.file_id(run.file_name()) {
            self.update_file(id);
        }
        Ok(())
    }

    /// Recompute every file's status.
    pub fn update_all(&mut self) {
        let ids: Vec<FileId> = self.by_name.values().copied().collect();
        for id in ids {
            self.update_file(id);
        }
    }

    /// Recompute a file's status from disk, or from its tasks if it has any.
    pub fn update_file(&mut self, id: FileId) {
        let Some(file) = self.files.get(id) else {
            return;
        };

        if !file.have_tasks() {
            let snapshot = self.reader.read(&ResultPaths::new(&file.path, None));
            if let Some(file) = self.files.get_mut(id) {
                file.status = snapshot.status;
                file.vcd_files = snapshot.vcd_files;
            }
            return;
        }

        let task_ids = file.tasks.clone();
        let mut colors = Vec::with_capacity(task_ids.len());
        for tid in task_ids {
            self.update_task(tid);
            if let Some(task) = self.tasks.get(tid) {
                colors.push(task.status.color);
            }
        }

        let (color, percentage) = aggregate(&colors);
        if let Some(file) = self.files.get_mut(id) {
            file.status = Status {
                color,
                percentage,
                ..Status::default()
            };
            file.vcd_files.clear();
        }
    }

    fn update_task(&mut self, id: TaskId) {
        let Some(task) = self.tasks.get_mut(id) else {
            return;
        };
        let snapshot = self.reader.read(&ResultPaths::new(&task.path, Some(&task.name)));
        task.status = snapshot.status;
        task.vcd_files = snapshot.vcd_files;
    }
}

fn load(path: &Path) -> Result<SbyConfig, Error> {
    let text = fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.display().to_string(),
        source,
    })?;
    Ok(SbyConfig::parse(&text))
}

/// Resolve every declared task of `config` (or the task-less config).
fn parse(name: &str, config: SbyConfig) -> Result<Parsed, Error> {
    let config_error = |source| Error::Config {
        file: name.to_owned(),
        source,
    };

    let mut tasks = Vec::with_capacity(config.tasks().len());
    let mut seen: HashSet<&str> = HashSet::default();
    for task in config.tasks() {
        if !seen.insert(task.as_str()) {
            log::warn!("{name}: task \"{task}\" is declared more than once");
            continue;
        }
        let resolved = config.resolve_task(task).map_err(config_error)?;
        tasks.push((task.clone(), resolved));
    }

    let files = if config.has_tasks() {
        Vec::with_capacity(0)
    } else {
        config.config_files("").map_err(config_error)?
    };

    Ok(Parsed { tasks, files })
}
