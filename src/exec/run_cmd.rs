use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};

use project::RunId;

use super::OutputSink;

/// A running child process, plus the threads forwarding its output.
pub struct Spawned {
    pub child: Child,
    pub readers: Vec<JoinHandle<()>>,
}

/// Spawn `cmd`, forwarding stdout and stderr line by line to `sink` as they arrive.
/// Both streams go to the same sink, so the caller sees one merged log.
/// Based on:
/// <https://stackoverflow.com/questions/66060139/how-to-tee-stdout-stderr-from-a-subprocess-in-rust>
pub fn spawn_streaming(cmd: &mut Command, run: &RunId, sink: &OutputSink) -> io::Result<Spawned> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut readers = Vec::with_capacity(2);
    if let Some(out) = child.stdout.take() {
        readers.push(forward(out, run.clone(), sink.clone())?);
    }
    if let Some(err) = child.stderr.take() {
        readers.push(forward(err, run.clone(), sink.clone())?);
    }

    Ok(Spawned { child, readers })
}

/// Ask the child to terminate.
#[cfg(unix)]
pub fn terminate(child: &mut Child) -> io::Result<()> {
    let pid = child.id() as libc::pid_t;
    // SAFETY: sending a signal to a pid we spawned and have not yet reaped.
    if unsafe { libc::kill(pid, libc::SIGTERM) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Ask the child to terminate.
#[cfg(not(unix))]
pub fn terminate(child: &mut Child) -> io::Result<()> {
    child.kill()
}

fn forward<R: Read + Send + 'static>(
    stream: R,
    run: RunId,
    sink: OutputSink,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("output {run}"))
        .spawn(move || {
            if let Err(e) = communicate(stream, &run, &sink) {
                log::debug!("stopped reading output of {run}: {e}");
            }
        })
}

fn communicate<R: Read>(stream: R, run: &RunId, sink: &OutputSink) -> io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        let num_read = reader.read_until(b'\n', &mut buf)?;
        if num_read == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        sink(run, line.trim_end_matches(['\r', '\n']));
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod test {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_merged_output() -> anyhow::Result<()> {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let collected = lines.clone();
        let sink: OutputSink = Arc::new(move |_: &RunId, line: &str| {
            if let Ok(mut lines) = collected.lock() {
                lines.push(line.to_owned());
            }
        });

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo out; echo err 1>&2");
        let mut spawned = spawn_streaming(&mut cmd, &RunId::file("x.sby"), &sink)?;
        let status = spawned.child.wait()?;
        for reader in spawned.readers {
            reader.join().map_err(|_| anyhow::anyhow!("reader panicked"))?;
        }

        assert!(status.success());
        let mut lines = lines.lock().map_err(|_| anyhow::anyhow!("poisoned"))?.clone();
        lines.sort();
        assert_eq!(lines, ["err", "out"]);
        Ok(())
    }
}
