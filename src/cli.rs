#![allow(missing_docs)]
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::{get_version, list, topology::ExecutionMode, validate};

#[derive(Parser, Debug)]
#[command(rename_all = "kebab-case", version = get_version())]
pub struct Opts {
    #[command(flatten)]
    pub root: RootOpts,

    #[command(subcommand)]
    pub sub_command: SubCommand,
}

impl Opts {
    pub fn get_matches() -> Result<Self, clap::Error> {
        Self::try_parse()
    }

    pub const fn log_level(&self) -> &'static str {
        let (quiet_level, verbose_level) = match self.sub_command {
            SubCommand::Validate(_) | SubCommand::List(_) => {
                if self.root.verbose == 0 {
                    (self.root.quiet + 1, self.root.verbose)
                } else {
                    (self.root.quiet, self.root.verbose - 1)
                }
            }
            SubCommand::Run(_) => (self.root.quiet, self.root.verbose),
        };
        match quiet_level {
            0 => match verbose_level {
                0 => "info",
                1 => "debug",
                2..=255 => "trace",
            },
            1 => "warn",
            2 => "error",
            3..=255 => "off",
        }
    }
}

#[derive(Parser, Debug)]
#[command(rename_all = "kebab-case")]
pub struct RootOpts {
    /// Enable more detailed internal logging. Repeat to increase level. Overridden by `--quiet`.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Reduce detail of internal logging. Repeat to reduce further. Overrides `--verbose`.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub quiet: u8,

    /// Set the logging format
    #[arg(long, default_value = "text", env = "ROWFLOW_LOG_FORMAT", global = true)]
    pub log_format: LogFormat,

    /// Control when ANSI terminal formatting is used.
    #[arg(long, default_value = "auto", env = "ROWFLOW_COLOR", global = true)]
    pub color: Color,
}

#[derive(Parser, Debug)]
#[command(rename_all = "kebab-case")]
pub struct RunOpts {
    /// Transformation to run. The format is detected from the file extension.
    #[arg(short, long, env = "ROWFLOW_CONFIG")]
    pub config: PathBuf,

    /// Drive every step copy from one thread instead of one thread per copy.
    #[arg(long)]
    pub single_threaded: bool,

    /// Overrides the capacity of every row set.
    #[arg(long)]
    pub rowset_size: Option<usize>,

    /// Checks every written row against the step's first row layout.
    #[arg(long)]
    pub safe_mode: bool,

    /// Prints the run result as JSON on stdout.
    #[arg(long)]
    pub json: bool,
}

impl RunOpts {
    pub const fn mode(&self) -> ExecutionMode {
        if self.single_threaded {
            ExecutionMode::SingleThreaded
        } else {
            ExecutionMode::Threaded
        }
    }
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum SubCommand {
    /// Run a transformation until every step has finished.
    Run(RunOpts),

    /// Validate the target config, then exit.
    Validate(validate::Opts),

    /// List available step types, then exit.
    List(list::Opts),
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Auto,
    Always,
    Never,
}

impl Color {
    pub fn use_color(self) -> bool {
        match self {
            Color::Auto => std::io::IsTerminal::is_terminal(&std::io::stdout()),
            Color::Always => true,
            Color::Never => false,
        }
    }
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

pub fn handle_config_errors(errors: Vec<String>) -> exitcode::ExitCode {
    for error in errors {
        error!(message = "Configuration error.", %error);
    }

    exitcode::CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Opts {
        Opts::try_parse_from(std::iter::once("rowflow").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn run_defaults() {
        let opts = parse(&["run", "-c", "t.toml"]);
        let SubCommand::Run(run) = &opts.sub_command else {
            panic!("expected the run command");
        };
        assert_eq!(run.config, PathBuf::from("t.toml"));
        assert_eq!(run.mode(), ExecutionMode::Threaded);
        assert!(!run.safe_mode);
        assert!(!run.json);
        assert_eq!(opts.log_level(), "info");
    }

    #[test]
    fn verbosity_flags() {
        assert_eq!(parse(&["-vv", "run", "-c", "t.toml"]).log_level(), "trace");
        assert_eq!(parse(&["run", "-q", "--config", "t.toml"]).log_level(), "warn");
        assert_eq!(parse(&["list"]).log_level(), "warn");
        assert_eq!(parse(&["-v", "list"]).log_level(), "info");
    }

    #[test]
    fn single_threaded_run() {
        let opts = parse(&["run", "--single-threaded", "--json", "-c", "t.json"]);
        let SubCommand::Run(run) = opts.sub_command else {
            panic!("expected the run command");
        };
        assert_eq!(run.mode(), ExecutionMode::SingleThreaded);
        assert!(run.json);
    }
}
