#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use project::{DirectorySync, Project, RunId, StatusColor};
use sby_runner::{App, Args, Event, Request, Session, Settings, Target, Ui};
use tempfile::{tempdir, TempDir};

const DEMO: &str = "\
[tasks]
prf
cvr

[options]
prf: mode prove
cvr: mode cover

[files]
top.v
";

const OTHER: &str = "[options]\nmode bmc\n[files]\nother.v\n";

/// Stands in for the verification tool: writes a result document and a
/// waveform for the requested run. Task "cvr" fails; everything else passes.
const FAKE_TOOL: &str = r#"#!/bin/sh
file="$2"
task="$3"
base="${file%.sby}"
if [ -n "$task" ]; then dir="${base}_${task}"; else dir="$base"; fi
sleep "${FAKE_DELAY:-0}"
mkdir -p "$dir/engine_0"
echo "running $dir"
echo "warning from $dir" 1>&2
if [ "$task" = "cvr" ]; then fail=1; st=FAIL; else fail=0; st=PASS; fi
printf '<?xml version="1.0"?>\n<testsuites><testsuite errors="0" failures="%s"><testcase time="2" status="%s"/><system-out>log of %s</system-out></testsuite></testsuites>\n' "$fail" "$st" "$dir" > "$dir/$dir.xml"
touch "$dir/engine_0/trace.vcd"
[ "$fail" = 0 ]
"#;

struct Fixture {
    dir: TempDir,
    tool: PathBuf,
}

impl Fixture {
    fn new() -> Result<Self> {
        let dir = tempdir()?;
        let project = dir.path().join("project");
        fs::create_dir(&project)?;
        fs::write(project.join("demo.sby"), DEMO)?;
        fs::write(project.join("other.sby"), OTHER)?;

        // the tool lives outside the project folder, so it isn't watched:
        let tool = dir.path().join("fake-sby");
        fs::write(&tool, FAKE_TOOL)?;
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755))?;
        Ok(Self { dir, tool })
    }

    fn folder(&self) -> PathBuf {
        self.dir.path().join("project")
    }

    fn settings(&self, args: &[&str]) -> Result<Settings> {
        let tool = path_str(&self.tool);
        let mut argv: Vec<&str> = vec!["sbyr", "-y", "--tool", tool.as_str()];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv)?.try_into()
    }

    fn app(&self, args: &[&str]) -> Result<()> {
        App::new(self.settings(args)?).run()
    }

    fn load(&self) -> Result<Project> {
        let mut project = Project::open(&self.folder())?;
        DirectorySync.sync_folder(&mut project, &|_: &RunId| false)?;
        Ok(project)
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[test]
fn test_run_everything() -> Result<()> {
    let fx = Fixture::new()?;
    let folder = path_str(&fx.folder());

    // "cvr" fails, so the run as a whole reports failure:
    assert!(fx.app(&["run", &folder]).is_err());

    let project = fx.load()?;
    let prf = project.item(&RunId::task("demo.sby", "prf"))?;
    assert_eq!(prf.status().color, StatusColor::Pass);
    assert_eq!(prf.status().percentage, 100);
    assert_eq!(prf.status().time_spent, Some(2));
    assert_eq!(prf.status().previous_log.as_deref(), Some("log of demo_prf"));
    assert_eq!(prf.vcd_files().len(), 1);

    let cvr = project.item(&RunId::task("demo.sby", "cvr"))?;
    assert_eq!(cvr.status().color, StatusColor::Fail);
    assert_eq!(cvr.status().label.as_deref(), Some("FAIL"));

    // mixed results roll up to unknown:
    let demo = project.item(&RunId::file("demo.sby"))?;
    assert_eq!(demo.status().color, StatusColor::Unknown);
    assert_eq!(demo.status().percentage, 100);

    let other = project.item(&RunId::file("other.sby"))?;
    assert_eq!(other.status().color, StatusColor::Pass);
    assert!(fx.folder().join("other").join("other.xml").exists());
    Ok(())
}

#[test]
fn test_run_single_target() -> Result<()> {
    let fx = Fixture::new()?;
    let folder = path_str(&fx.folder());
    fx.app(&["run", &folder, "-t", "demo.sby#prf"])?;

    assert!(fx.folder().join("demo_prf").exists());
    assert!(!fx.folder().join("demo_cvr").exists());
    assert!(!fx.folder().join("other").exists());

    fx.app(&["log", "demo.sby#prf", &folder])?;
    assert!(fx.app(&["log", "demo.sby#cvr", &folder]).is_err());
    Ok(())
}

#[test]
fn test_session_order_and_records() -> Result<()> {
    let fx = Fixture::new()?;
    let settings = fx.settings(&["open", &path_str(&fx.folder())])?;
    let ui = Ui::new(&settings);
    let project = Project::open(&settings.path)?;
    let mut session = Session::new(project, settings.tool.clone(), &ui);
    session.load()?;

    let prf = RunId::task("demo.sby", "prf");
    let other = RunId::file("other.sby");
    session.request(Request::Run(Target::One(other.clone())));
    session.request(Request::Run(Target::One(prf.clone())));
    session.request(Request::Run(Target::One(other.clone())));
    session.run_until_idle()?;

    let runs: Vec<&RunId> = session.records().iter().map(|r| &r.run).collect();
    assert_eq!(runs, [&other, &prf]);
    assert!(session.records().iter().all(|r| r.success));
    assert!(!session.orchestrator().is_in_flight(&prf));
    Ok(())
}

#[test]
fn test_removed_task_survives_its_run() -> Result<()> {
    let fx = Fixture::new()?;
    let settings = fx.settings(&["open", &path_str(&fx.folder())])?;
    let ui = Ui::new(&settings);
    let mut tool = settings.tool.clone();
    tool.env.push(("FAKE_DELAY".to_owned(), "2".to_owned()));

    let mut session = Session::new(Project::open(&settings.path)?, tool, &ui);
    session.load()?;

    let prf = RunId::task("demo.sby", "prf");
    session.request(Request::Run(Target::One(prf.clone())));
    assert!(session.orchestrator().is_in_flight(&prf));

    // drop "prf" from the file while it runs:
    let path = fx.folder().join("demo.sby");
    fs::write(&path, "[tasks]\ncvr\n[options]\ncvr: mode cover\n")?;
    session.sender().send(Event::Changed(path))?;
    session.run_until_idle()?;

    assert_eq!(session.records().len(), 1);
    assert!(session.records()[0].success);
    assert!(session.project().item(&prf).is_err());
    assert!(session.project().item(&RunId::task("demo.sby", "cvr")).is_ok());
    Ok(())
}

#[test]
fn test_launch_failure() -> Result<()> {
    let fx = Fixture::new()?;
    let folder = path_str(&fx.folder());
    let args = Args::try_parse_from(["sbyr", "-y", "--tool", "/nonexistent/sby", "run", folder.as_str()])?;
    let settings: Settings = args.try_into()?;
    assert!(App::new(settings).run().is_err());

    let project = fx.load()?;
    assert_eq!(
        project.item(&RunId::file("other.sby"))?.status().color,
        StatusColor::Unknown
    );
    assert!(!fx.folder().join("other").exists());
    Ok(())
}

#[test]
fn test_clean() -> Result<()> {
    let fx = Fixture::new()?;
    let folder = path_str(&fx.folder());
    let _ = fx.app(&["run", &folder]);
    assert!(fx.folder().join("demo_prf").exists());

    // dry run deletes nothing:
    fx.app(&["-n", "clean", &folder])?;
    assert!(fx.folder().join("demo_prf").exists());

    fx.app(&["clean", &folder, "-t", "demo.sby"])?;
    assert!(!fx.folder().join("demo_prf").exists());
    assert!(!fx.folder().join("demo_cvr").exists());
    assert!(fx.folder().join("other").exists());
    assert!(fx.folder().join("demo.sby").exists());

    fx.app(&["clean", &folder])?;
    assert!(!fx.folder().join("other").exists());
    assert_eq!(
        fx.load()?.item(&RunId::file("other.sby"))?.status().color,
        StatusColor::Unknown
    );
    Ok(())
}

#[test]
fn test_queries() -> Result<()> {
    let fx = Fixture::new()?;
    let demo = path_str(&fx.folder().join("demo.sby"));
    fx.app(&["tasks", &demo])?;
    fx.app(&["cfg", &demo, "prf"])?;
    fx.app(&["files", &demo, "cvr"])?;
    fx.app(&["status", &demo])?;
    assert!(fx.app(&["tasks", &path_str(&fx.folder())]).is_err());
    Ok(())
}
