//! Keep a [`Project`] in step with the project files on disk.

use std::fs;
use std::hash::Hash;

use util::HashSet;

use crate::project::{InFlight, Removal};
use crate::{Error, Project, RunId};

/// Elements that appeared and disappeared between two sets, sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta<T> {
    pub added: Vec<T>,
    pub removed: Vec<T>,
}

impl<T> Delta<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub fn diff<T: Clone + Ord + Hash + Eq>(previous: &HashSet<T>, current: &HashSet<T>) -> Delta<T> {
    let mut added: Vec<T> = current.difference(previous).cloned().collect();
    let mut removed: Vec<T> = previous.difference(current).cloned().collect();
    added.sort();
    removed.sort();
    Delta { added, removed }
}

/// A change made to the project model by a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    FileAdded(String),
    FileRemoved(String),
    /// Removed from the model while one of its runs is still in flight.
    FileRetired(String),
    /// Present on disk, but could not be read or parsed.
    FileRejected { name: String, reason: String },
    TaskAdded(RunId),
    TaskRemoved(RunId),
    TaskRetired(RunId),
}

/// Reconciles a project with its folder.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectorySync;

impl DirectorySync {
    /// Names of the project files currently in the project's folder,
    /// restricted to the project's scope if it has one.
    pub fn scan(&self, project: &Project) -> Result<HashSet<String>, Error> {
        let folder = project.folder();
        let scan_error = |source| Error::Scan {
            path: folder.display().to_string(),
            source,
        };

        let mut names = HashSet::default();
        for entry in fs::read_dir(folder).map_err(scan_error)? {
            let path = entry.map_err(scan_error)?.path();
            if !path.is_file() || !Project::is_project_file(&path) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                log::warn!("skipping project file with non-UTF-8 name: {path:?}");
                continue;
            };
            if project.scope().is_some_and(|scope| scope != name) {
                continue;
            }
            names.insert(name.to_owned());
        }
        Ok(names)
    }

    /// Add project files that appeared in the folder, and remove those that vanished.
    pub fn sync_folder(&self, project: &mut Project, in_flight: InFlight) -> Result<Vec<SyncEvent>, Error> {
        let on_disk = self.scan(project)?;
        let delta = diff(&project.file_names(), &on_disk);
        let mut events = Vec::with_capacity(delta.added.len() + delta.removed.len());

        for name in delta.removed {
            let Some(id) = project.file_id(&name) else {
                continue;
            };
            match project.remove_file(id, in_flight) {
                Some(Removal::Removed) => events.push(SyncEvent::FileRemoved(name)),
                Some(Removal::Retired) => events.push(SyncEvent::FileRetired(name)),
                None => {}
            }
        }

        for name in delta.added {
            match project.add_file(&name) {
                Ok(_) => events.push(SyncEvent::FileAdded(name)),
                Err(e) => {
                    let reason = describe(&e);
                    log::warn!("{reason}");
                    events.push(SyncEvent::FileRejected { name, reason });
                }
            }
        }

        Ok(events)
    }

    /// Re-read a registered project file after it changed on disk.
    ///
    /// A file that no longer exists, or that isn't registered, is left for
    /// `sync_folder` to handle. A file that fails to parse keeps its previous model.
    pub fn sync_file(&self, project: &mut Project, name: &str, in_flight: InFlight) -> Vec<SyncEvent> {
        let Some(id) = project.file_id(name) else {
            return Vec::with_capacity(0);
        };
        if !project.folder().join(name).is_file() {
            return Vec::with_capacity(0);
        }

        let changes = match project.refresh_file(id, in_flight) {
            Ok(changes) => changes,
            Err(e) => {
                let reason = describe(&e);
                log::warn!("keeping previous contents of {name}: {reason}");
                return vec![SyncEvent::FileRejected {
                    name: name.to_owned(),
                    reason,
                }];
            }
        };

        let run = |task: String| RunId::task(name, task);
        let mut events = Vec::with_capacity(
            changes.added.len() + changes.removed.len() + changes.retired.len(),
        );
        events.extend(changes.removed.into_iter().map(run).map(SyncEvent::TaskRemoved));
        events.extend(changes.retired.into_iter().map(run).map(SyncEvent::TaskRetired));
        events.extend(changes.added.into_iter().map(run).map(SyncEvent::TaskAdded));
        events
    }
}

/// Error message followed by its chain of causes.
pub fn describe(e: &dyn std::error::Error) -> String {
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    fn not_running(_: &RunId) -> bool {
        false
    }

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_diff() {
        let delta = diff(&set(&["a", "b", "c"]), &set(&["d", "c", "a", "e"]));
        assert_eq!(delta.added, ["d", "e"]);
        assert_eq!(delta.removed, ["b"]);
        assert!(diff(&set(&["a"]), &set(&["a"])).is_empty());
    }

    #[test]
    fn test_sync_folder() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("a.sby"), "[options]\nmode bmc\n")?;
        fs::write(dir.path().join("b.sby"), "[tasks]\nx\n[options]\ny: mode bmc\n")?;
        fs::write(dir.path().join("readme.md"), "")?;
        fs::create_dir(dir.path().join("dir.sby"))?;

        let mut project = Project::new(dir.path());
        let sync = DirectorySync;
        let events = sync.sync_folder(&mut project, &not_running)?;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], SyncEvent::FileAdded("a.sby".to_owned()));
        assert!(matches!(&events[1], SyncEvent::FileRejected { name, .. } if name == "b.sby"));
        assert_eq!(project.file_names(), set(&["a.sby"]));

        fs::remove_file(dir.path().join("a.sby"))?;
        fs::write(dir.path().join("c.sby"), "")?;
        let events = sync.sync_folder(&mut project, &not_running)?;
        assert!(events.contains(&SyncEvent::FileRemoved("a.sby".to_owned())));
        assert!(events.contains(&SyncEvent::FileAdded("c.sby".to_owned())));
        assert_eq!(project.file_names(), set(&["c.sby"]));
        Ok(())
    }

    #[test]
    fn test_scope() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("a.sby"), "")?;
        fs::write(dir.path().join("b.sby"), "")?;

        let mut project = Project::open(&dir.path().join("b.sby"))?;
        DirectorySync.sync_folder(&mut project, &not_running)?;
        assert_eq!(project.file_names(), set(&["b.sby"]));
        Ok(())
    }

    #[test]
    fn test_sync_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("a.sby");
        fs::write(&path, "[tasks]\nx\ny\n")?;
        let mut project = Project::new(dir.path());
        let sync = DirectorySync;
        sync.sync_folder(&mut project, &not_running)?;

        fs::write(&path, "[tasks]\ny\nz\n")?;
        let events = sync.sync_file(&mut project, "a.sby", &not_running);
        assert_eq!(
            events,
            vec![
                SyncEvent::TaskRemoved(RunId::task("a.sby", "x")),
                SyncEvent::TaskAdded(RunId::task("a.sby", "z")),
            ]
        );

        assert!(sync.sync_file(&mut project, "other.sby", &not_running).is_empty());
        Ok(())
    }
}
