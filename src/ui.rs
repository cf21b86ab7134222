use std::cell::RefCell;
use std::io::Write;

use anyhow::Result;
use colored::{ColoredString, Colorize};

use project::{Item, Project, RunId, Status, StatusColor, SyncEvent};

use crate::exec::{Notice, RunRecord};
use crate::settings::Settings;

/// Progress shown while a run is in flight.
const IN_PROGRESS_PERCENTAGE: u8 = 50;

/// All interactions with the text UI should go through this struct.
pub struct Ui {
    /// -v setting, displays extra text info to user
    pub verbose: bool,
    /// -y setting, ignores all points where the user is prompted to enter 'y'
    override_confirmation: bool,
    /// buffer to hold strings internally when getting input
    strbuf: RefCell<String>,
}

impl Ui {
    pub fn new(settings: &Settings) -> Self {
        Self {
            verbose: settings.verbose > 0,
            override_confirmation: settings.yes,
            // Refcell so we can call confirm() w/o needing a unique reference:
            strbuf: RefCell::new(String::with_capacity(16)),
        }
    }

    pub fn confirm(&self, prompt: &str) -> Result<bool> {
        if self.override_confirmation {
            return Ok(true);
        }
        eprintln!("{} (y/N)", prompt);

        let mut strbuf = self.strbuf.borrow_mut();

        strbuf.clear();
        std::io::stdin().read_line(&mut strbuf)?;
        match strbuf.chars().next() {
            Some('y') => Ok(true),
            _ => Ok(false),
        }
    }

    pub fn verbose_progress(&self, msg: &str) {
        if self.verbose {
            eprint!("{}... ", msg.magenta());
        }
    }

    pub fn verbose_progress_debug<T: std::fmt::Debug>(&self, msg: &str, arg: T) {
        if self.verbose {
            eprint!("{} {:?}... ", msg.magenta(), arg);
        }
    }

    pub fn done(&self) {
        if self.verbose {
            eprintln!("{}.", "done".green());
        }
    }
}

// STATUS ///////////////////
impl Ui {
    /// Print every file and task with its status.
    /// Items for which `in_flight` is true are shown as in progress.
    pub fn print_status(&self, project: &Project, in_flight: &dyn Fn(&RunId) -> bool) {
        if project.is_empty() {
            eprintln!("{}", "No project files found.".yellow());
            return;
        }
        let out = std::io::stdout();
        let mut out = out.lock();
        for item in project.items() {
            let _ = writeln!(out, "{}", status_line(&item, in_flight(&item.run_id())));
        }
    }

    /// Append one line of a run's output to the log.
    pub fn append_log(&self, run: &RunId, line: &str) {
        println!("{} {line}", format!("[{run}]").dimmed());
    }

    pub fn notice(&self, notice: &Notice) {
        match notice {
            Notice::Queued(run) => {
                if self.verbose {
                    eprintln!("{} {run}", "QUEUED".magenta());
                }
            }
            Notice::AlreadyQueued(run) => eprintln!("{run} is already queued."),
            Notice::Started(run) => eprintln!("{} {run}", "RUN".blue()),
            Notice::LaunchFailed { run, reason } => {
                eprintln!("{} {run}: {reason}", "LAUNCH FAILED".red())
            }
            Notice::Skipped { run, reason } => eprintln!("{} {run}: {reason}", "SKIPPED".yellow()),
            Notice::Dequeued(run) => eprintln!("{} {run}", "DEQUEUED".yellow()),
            Notice::Stopping(run) => eprintln!("{} {run}", "STOPPING".yellow()),
            Notice::Finished(record) => {
                if record.success {
                    eprintln!("{} {} in {:.1?}", "COMPLETED".green(), record.run, record.elapsed);
                } else {
                    self.append_log(&record.run, "---TASK STOPPED---");
                    eprintln!("{} {} ({})", "STOPPED".red(), record.run, exit_text(record));
                }
            }
        }
    }

    pub fn sync_event(&self, event: &SyncEvent) {
        match event {
            SyncEvent::FileAdded(name) => eprintln!("{} {name}", "ADDED".green()),
            SyncEvent::FileRemoved(name) => eprintln!("{} {name}", "REMOVED".yellow()),
            SyncEvent::FileRetired(name) => {
                eprintln!("{} {name} (after its run finishes)", "REMOVING".yellow())
            }
            SyncEvent::FileRejected { name, reason } => {
                eprintln!("{} {name}: {reason}", "INVALID".red())
            }
            SyncEvent::TaskAdded(run) => eprintln!("{} {run}", "ADDED".green()),
            SyncEvent::TaskRemoved(run) => eprintln!("{} {run}", "REMOVED".yellow()),
            SyncEvent::TaskRetired(run) => {
                eprintln!("{} {run} (after its run finishes)", "REMOVING".yellow())
            }
        }
    }

    /// Print the outcome of every run of a session.
    pub fn summary(&self, records: &[RunRecord], project: &Project) {
        if records.is_empty() {
            eprintln!("{}", "Nothing was run.".yellow());
            return;
        }
        eprintln!("\n{}", "Summary:".magenta());
        for record in records {
            let status = match project.item(&record.run) {
                Ok(item) => status_cell(item.status(), false),
                Err(_) => "gone".dimmed(),
            };
            let exit = if record.success {
                String::new()
            } else {
                format!(" ({})", exit_text(record))
            };
            eprintln!("  {:<32} {status} {:.1?}{exit}", record.run.to_string(), record.elapsed);
        }
    }
}

fn exit_text(record: &RunRecord) -> String {
    match record.code {
        Some(code) => format!("exit code {code}"),
        None => "terminated".to_owned(),
    }
}

fn status_line(item: &Item, in_flight: bool) -> String {
    let name = if item.is_top() {
        format!("{:<32}", item.name()).bold()
    } else {
        format!("  {:<30}", item.name()).normal()
    };
    let status = item.status();
    let mut line = format!("{name} {}", status_cell(status, in_flight));
    if !in_flight {
        if let Some(secs) = status.time_spent {
            line.push_str(&format!("  {secs}s"));
        }
        let vcd = item.vcd_files().len();
        if vcd > 0 {
            line.push_str(&format!("  {vcd} vcd"));
        }
    }
    line
}

fn status_cell(status: &Status, in_flight: bool) -> ColoredString {
    if in_flight {
        return format!("{:<8} {:>3}%", "RUNNING", IN_PROGRESS_PERCENTAGE).blue();
    }
    let label = status.label.as_deref().unwrap_or(match status.color {
        StatusColor::Pass => "PASS",
        StatusColor::Fail => "FAIL",
        StatusColor::Unknown => "-",
    });
    let text = format!("{:<8} {:>3}%", label, status.percentage);
    match status.color {
        StatusColor::Pass => text.green(),
        StatusColor::Fail => text.red(),
        StatusColor::Unknown => text.yellow(),
    }
}
