use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Separates a project file name from a task name, e.g. "demo.sby#prf".
pub const RUN_ID_DELIM: char = '#';

/// Identifies something that can be run: a whole project file without tasks,
/// or one task of a project file.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct RunId {
    file: String,
    task: Option<String>,
}

impl RunId {
    /// Run a project file that declares no tasks.
    pub fn file(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            task: None,
        }
    }

    /// Run one task of a project file.
    pub fn task(file: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            task: Some(task.into()),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file
    }

    pub fn task_name(&self) -> Option<&str> {
        self.task.as_deref()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.task {
            Some(task) => write!(f, "{}{}{}", self.file, RUN_ID_DELIM, task),
            None => f.write_str(&self.file),
        }
    }
}

impl FromStr for RunId {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (file, task) = match s.split_once(RUN_ID_DELIM) {
            Some((file, "")) => (file, None),
            Some((file, task)) => (file, Some(task)),
            None => (s, None),
        };
        if file.is_empty() || task.is_some_and(|t| t.contains(RUN_ID_DELIM)) {
            return Err(Error::InvalidRunId(s.to_owned()));
        }
        Ok(Self {
            file: file.to_owned(),
            task: task.map(str::to_owned),
        })
    }
}
