#![allow(missing_docs)]
use clap::Parser;
use serde::Serialize;

use crate::step::StepRegistry;

#[derive(Parser, Debug)]
#[command(rename_all = "kebab-case")]
pub struct Opts {
    /// Format the list in an encoding scheme.
    #[arg(long, default_value = "text")]
    format: Format,
}

#[derive(clap::ValueEnum, Debug, Clone, PartialEq)]
enum Format {
    Text,
    Json,
}

#[derive(Serialize)]
pub struct EncodedList<'a> {
    steps: Vec<&'a str>,
}

pub fn cmd(opts: &Opts) -> exitcode::ExitCode {
    let registry = StepRegistry::with_builtins();
    let steps = registry.step_types().collect::<Vec<_>>();

    #[allow(clippy::print_stdout)]
    match opts.format {
        Format::Text => {
            println!("Steps:");
            for name in steps {
                println!("- {name}");
            }
        }
        Format::Json => match serde_json::to_string(&EncodedList { steps }) {
            Ok(list) => println!("{list}"),
            Err(error) => {
                error!(message = "Could not encode the step list.", %error);
                return exitcode::SOFTWARE;
            }
        },
    }

    exitcode::OK
}
