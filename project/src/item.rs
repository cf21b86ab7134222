use std::path::{Path, PathBuf};

use crate::{FileId, RunId, Status, TaskId};

/// A `.sby` project file.
#[derive(Debug)]
pub struct File {
    /// File name within the project folder
    pub(crate) name: String,
    pub(crate) path: PathBuf,
    pub(crate) status: Status,
    /// Live tasks in declaration order
    pub(crate) tasks: Vec<TaskId>,
    /// Declared input files; only meaningful when there are no tasks
    pub(crate) files: Vec<String>,
    pub(crate) vcd_files: Vec<PathBuf>,
}

impl File {
    pub(crate) fn new(name: String, path: PathBuf) -> Self {
        Self {
            name,
            path,
            status: Status::default(),
            tasks: Vec::with_capacity(0),
            files: Vec::with_capacity(0),
            vcd_files: Vec::with_capacity(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn have_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    pub fn task_ids(&self) -> &[TaskId] {
        &self.tasks
    }

    pub fn run_id(&self) -> RunId {
        RunId::file(&self.name)
    }
}

/// One task of a project file.
#[derive(Debug)]
pub struct Task {
    pub(crate) name: String,
    /// Path of the owning project file
    pub(crate) path: PathBuf,
    pub(crate) file: FileId,
    pub(crate) status: Status,
    /// Resolved config text
    pub(crate) content: String,
    pub(crate) files: Vec<String>,
    pub(crate) vcd_files: Vec<PathBuf>,
}

impl Task {
    pub(crate) fn new(name: String, path: PathBuf, file: FileId) -> Self {
        Self {
            name,
            path,
            file,
            status: Status::default(),
            content: String::new(),
            files: Vec::with_capacity(0),
            vcd_files: Vec::with_capacity(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_id(&self) -> FileId {
        self.file
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Either kind of runnable entity, with the accessors they share.
#[derive(Debug, Clone, Copy)]
pub enum Item<'a> {
    File(&'a File),
    Task(&'a Task),
}

impl<'a> Item<'a> {
    /// Display name: the file name for a file, the task name for a task.
    pub fn name(&self) -> &'a str {
        match self {
            Item::File(f) => &f.name,
            Item::Task(t) => &t.name,
        }
    }

    /// Path of the project file this item belongs to.
    pub fn path(&self) -> &'a Path {
        match self {
            Item::File(f) => &f.path,
            Item::Task(t) => &t.path,
        }
    }

    /// Name of the project file this item belongs to.
    pub fn file_name(&self) -> &'a str {
        self.path()
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// Folder the tool runs in.
    pub fn work_folder(&self) -> &'a Path {
        self.path().parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn is_top(&self) -> bool {
        matches!(self, Item::File(_))
    }

    /// Task name, or "" for a project file.
    pub fn task_name(&self) -> &'a str {
        match self {
            Item::File(_) => "",
            Item::Task(t) => &t.name,
        }
    }

    /// Resolved config text of a task; empty for a project file.
    pub fn contents(&self) -> &'a str {
        match self {
            Item::File(_) => "",
            Item::Task(t) => &t.content,
        }
    }

    pub fn status(&self) -> &'a Status {
        match self {
            Item::File(f) => &f.status,
            Item::Task(t) => &t.status,
        }
    }

    /// Declared input files.
    pub fn files(&self) -> &'a [String] {
        match self {
            Item::File(f) => &f.files,
            Item::Task(t) => &t.files,
        }
    }

    /// Waveforms produced by the most recent run.
    pub fn vcd_files(&self) -> &'a [PathBuf] {
        match self {
            Item::File(f) => &f.vcd_files,
            Item::Task(t) => &t.vcd_files,
        }
    }

    pub fn run_id(&self) -> RunId {
        match self {
            Item::File(f) => f.run_id(),
            Item::Task(t) => RunId::task(self.file_name(), &t.name),
        }
    }
}
