use std::fs;
use std::path::{Path, PathBuf};

use syntax::junit::ResultDocument;

use crate::{Status, StatusColor};

/// Name of the engine subdirectory that holds waveform artifacts.
const ENGINE_DIR: &str = "engine_0";
/// Extension of value-change-dump waveforms.
const WAVEFORM_EXT: &str = "vcd";
/// Legacy marker files, one of which the tool leaves in a finished result directory.
const MARKERS: [&str; 5] = ["PASS", "FAIL", "ERROR", "TIMEOUT", "UNKNOWN"];

/// Locations of the artifacts the tool writes for one project file or task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultPaths {
    /// `<folder>/<stem>[_<task>]`
    pub dir: PathBuf,
    /// `<dir>/<stem>[_<task>].xml`
    pub document: PathBuf,
    /// `<dir>/engine_0`
    pub engine_dir: PathBuf,
    /// `<dir>/<stem>[_<task>]`, where older tool versions leave marker files
    pub marker_dir: PathBuf,
}

impl ResultPaths {
    /// Paths for `project_file`, or for one of its tasks.
    pub fn new(project_file: &Path, task: Option<&str>) -> Self {
        let folder = project_file.parent().unwrap_or_else(|| Path::new(""));
        let mut base = project_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(task) = task {
            base.push('_');
            base.push_str(task);
        }
        let dir = folder.join(&base);
        let document = dir.join(format!("{base}.xml"));
        let engine_dir = dir.join(ENGINE_DIR);
        let marker_dir = dir.join(&base);
        Self {
            dir,
            document,
            engine_dir,
            marker_dir,
        }
    }
}

/// What the result artifacts of one item say about its last run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResultSnapshot {
    pub status: Status,
    pub vcd_files: Vec<PathBuf>,
}

/// Derives item status from result artifacts on disk.
///
/// Artifacts are written by an external tool that may still be running, so
/// anything missing or unreadable just means "no result yet".
#[derive(Debug, Default, Clone, Copy)]
pub struct ResultReader;

impl ResultReader {
    pub fn read(&self, paths: &ResultPaths) -> ResultSnapshot {
        if !paths.dir.is_dir() {
            return ResultSnapshot::default();
        }

        let status = if paths.document.exists() {
            self.read_document(&paths.document)
        } else {
            self.read_markers(&[paths.marker_dir.as_path(), paths.dir.as_path()])
        };

        ResultSnapshot {
            status,
            vcd_files: self.list_waveforms(&paths.engine_dir),
        }
    }

    fn read_document(&self, path: &Path) -> Status {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                log::debug!("unable to read {path:?}: {e}");
                return Status::default();
            }
        };
        let doc = match ResultDocument::parse(&text) {
            Ok(doc) => doc,
            Err(e) => {
                log::debug!("ignoring result document {path:?}: {e}");
                return Status::default();
            }
        };

        let mut status = Status {
            previous_log: doc.system_out,
            ..Status::default()
        };
        if let Some(testcase) = doc.testcase {
            status.time_spent = testcase.time;
            if let Some(label) = testcase.status {
                status.percentage = 100;
                status.color = if doc.errors == 0 && doc.failures == 0 {
                    StatusColor::Pass
                } else {
                    StatusColor::Fail
                };
                status.label = Some(label);
            }
        }
        status
    }

    /// The first marker found, looking in `dirs` in order.
    fn read_markers(&self, dirs: &[&Path]) -> Status {
        let found = dirs
            .iter()
            .find_map(|dir| MARKERS.iter().find(|m| dir.join(m).is_file()).map(|m| (m, dir)));
        let Some((marker, dir)) = found else {
            return Status::default();
        };
        log::trace!("using legacy marker {marker} in {dir:?}");
        Status {
            color: if *marker == "PASS" {
                StatusColor::Pass
            } else {
                StatusColor::Fail
            },
            label: Some((*marker).to_owned()),
            percentage: 100,
            ..Status::default()
        }
    }

    fn list_waveforms(&self, engine_dir: &Path) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(engine_dir) else {
            return Vec::with_capacity(0);
        };
        let mut vcd_files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(WAVEFORM_EXT))
            })
            .collect();
        vcd_files.sort();
        vcd_files
    }
}
