//! The project model: project files found in a folder, the tasks they declare,
//! and the status of each, as derived from result artifacts on disk.

mod id;
pub use id::{FileId, TaskId};

mod item;
pub use item::{File, Item, Task};

mod project;
pub use project::{InFlight, Project, Removal, TaskChanges, PROJECT_EXT};

mod results;
pub use results::{ResultPaths, ResultReader, ResultSnapshot};

mod run_id;
pub use run_id::{RunId, RUN_ID_DELIM};

mod status;
pub use status::{aggregate, Status, StatusColor};

mod sync;
pub use sync::{describe, diff, Delta, DirectorySync, SyncEvent};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not a project file or folder: {0}")]
    NotAProject(String),
    #[error("Unable to read project file {path}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Unable to scan project folder {path}")]
    Scan {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid config in {file}")]
    Config {
        file: String,
        source: syntax::Error,
    },
    #[error("Unknown project file: {0}")]
    UnknownFile(String),
    #[error("Project file {0} has no task named \"{1}\"")]
    UnknownTask(String, String),
    #[error("Invalid run id: \"{0}\"")]
    InvalidRunId(String),
}
