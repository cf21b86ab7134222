use std::path::Path;

use anyhow::{Context, Result};

use super::{Error, Tool};

/// Ask the tool for the task names a project file declares.
/// An empty list means the file has no tasks.
pub fn dump_tasks(tool: &Tool, file: &Path) -> Result<Vec<String>> {
    let text = query(tool, file, &["--dumptasks"], None)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect())
}

/// Ask the tool for the resolved config of `task` ("" for a file without tasks).
pub fn dump_cfg(tool: &Tool, file: &Path, task: &str) -> Result<String> {
    let task = Some(task).filter(|t| !t.is_empty());
    query(tool, file, &["--dumpcfg"], task)
}

fn query(tool: &Tool, file: &Path, flags: &[&str], task: Option<&str>) -> Result<String> {
    let folder = file.parent().unwrap_or_else(|| Path::new("."));
    let name = file.file_name().unwrap_or(file.as_os_str());

    let mut cmd = tool.command(folder);
    cmd.args(flags).arg(name);
    if let Some(task) = task {
        cmd.arg(task);
    }
    log::debug!("querying {:?} {:?}", cmd.get_program(), cmd.get_args().collect::<Vec<_>>());

    let output = cmd
        .output()
        .with_context(|| format!("while running \"{}\"", tool.program))?;
    if !output.status.success() {
        return Err(Error::QueryFailed {
            program: tool.program.clone(),
            file: file.display().to_string(),
            status: output.status,
        }
        .into());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
