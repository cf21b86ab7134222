use clap::{Parser, Subcommand};

const CMD_NAME: &str = "sbyr";
const DEFAULT_TOOL: &str = "sby";
const DEFAULT_PATH: &str = ".";

/// Stores our command-line args format.
#[derive(Parser)]
#[command(name = CMD_NAME, version, about = None, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Cmd,

    /// Verification tool executable
    #[arg(long, value_name = "PROG", default_value = DEFAULT_TOOL, global = true)]
    #[arg(env = "SBY_RUNNER_TOOL")]
    pub tool: String,

    /// Extra environment for the verification tool
    #[arg(short, long = "env", value_name = "KEY=VALUE", global = true)]
    pub env: Vec<String>,

    /// Bypass user confirmation
    #[arg(short, long, global = true)]
    pub yes: bool,

    /// Print additional debugging info (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Dry run; print info but don't modify anything.
    #[arg(short = 'n', long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Print the status of every project file and task
    Status {
        /// Project folder or .sby file
        #[arg(default_value = DEFAULT_PATH)]
        path: String,
    },
    /// Print the tasks a project file declares
    Tasks {
        /// Project file
        file: String,
        /// Ask the verification tool instead
        #[arg(long)]
        external: bool,
    },
    /// Print the resolved config of a task
    Cfg {
        /// Project file
        file: String,
        /// Task name; omit for a file without tasks
        task: Option<String>,
        /// Ask the verification tool instead
        #[arg(long)]
        external: bool,
    },
    /// Print the input files a task declares
    Files {
        /// Project file
        file: String,
        /// Task name; omit for a file without tasks
        task: Option<String>,
    },
    /// Print the log of the most recent completed run
    Log {
        /// "file.sby" or "file.sby#task"
        run: String,
        /// Project folder
        #[arg(default_value = DEFAULT_PATH)]
        path: String,
    },
    /// Run tasks and wait for them to finish
    Run {
        /// Project folder or .sby file
        #[arg(default_value = DEFAULT_PATH)]
        path: String,
        /// Runs to queue ("file.sby" or "file.sby#task"); everything if none given
        #[arg(short, long = "target", value_name = "RUN_ID")]
        targets: Vec<String>,
    },
    /// Watch a project and run tasks on request
    Open {
        /// Project folder or .sby file
        #[arg(default_value = DEFAULT_PATH)]
        path: String,
    },
    /// Delete result directories
    Clean {
        /// Project folder or .sby file
        #[arg(default_value = DEFAULT_PATH)]
        path: String,
        /// Runs whose results to delete; everything if none given
        #[arg(short, long = "target", value_name = "RUN_ID")]
        targets: Vec<String>,
    },
}
