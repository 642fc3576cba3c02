#![allow(missing_docs)]
use std::path::PathBuf;

use clap::Parser;

use crate::{
    config::{self, TransformationConfig},
    step::StepRegistry,
};

#[derive(Parser, Debug)]
#[command(rename_all = "kebab-case")]
pub struct Opts {
    /// Fail validation on warnings.
    #[arg(short, long)]
    pub deny_warnings: bool,

    /// Configuration files to validate. The format is detected from the file extension.
    #[arg(short = 'c', long = "config", required = true, value_delimiter = ',')]
    pub paths: Vec<PathBuf>,
}

/// Outcome of validating one file.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Report {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl Report {
    pub fn is_valid(&self, deny_warnings: bool) -> bool {
        self.errors.is_empty() && !(deny_warnings && !self.warnings.is_empty())
    }
}

/// Checks a loaded transformation: graph shape, step types, roles and partitioning.
pub fn check_config(config: &TransformationConfig, registry: &StepRegistry) -> Report {
    let mut report = Report::default();
    match config::check(config) {
        Ok(warnings) => report.warnings = warnings,
        Err(errors) => {
            report.errors = errors;
            return report;
        }
    }

    for (name, step) in &config.steps {
        if !registry.contains(&step.step_type) {
            report.errors.push(format!(
                "Step {name:?} has unknown type {:?}.",
                step.step_type
            ));
        }
    }
    if let Err(errors) = config.resolve() {
        report.errors.extend(errors);
    }
    report
}

pub fn validate(opts: &Opts) -> exitcode::ExitCode {
    let registry = StepRegistry::with_builtins();
    let mut valid = true;

    for path in &opts.paths {
        let report = match config::load_from_path(path) {
            Ok(config) => check_config(&config, &registry),
            Err(error) => Report {
                errors: vec![error.to_string()],
                ..Report::default()
            },
        };

        for warning in &report.warnings {
            warn!(message = "Configuration warning.", path = %path.display(), %warning);
        }
        for error in &report.errors {
            error!(message = "Configuration error.", path = %path.display(), %error);
        }
        if report.is_valid(opts.deny_warnings) {
            info!(message = "Validated.", path = %path.display());
        } else {
            valid = false;
        }
    }

    if valid {
        exitcode::OK
    } else {
        exitcode::CONFIG
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_from_str, Format};

    #[test]
    fn unknown_step_type_is_an_error() {
        let config = load_from_str(
            r#"
            [steps.gen]
            type = "row_generator"

            [steps.out]
            type = "teleport"
            inputs = ["gen"]
            "#,
            Format::Toml,
        )
        .unwrap();

        let report = check_config(&config, &StepRegistry::with_builtins());
        assert_eq!(
            report.errors,
            vec!["Step \"out\" has unknown type \"teleport\".".to_owned()]
        );
        assert!(!report.is_valid(false));
    }

    #[test]
    fn valid_chain() {
        let config = load_from_str(
            r#"
            [steps.gen]
            type = "row_generator"
            options = { limit = 3 }

            [steps.log]
            type = "write_to_log"
            inputs = ["gen"]
            "#,
            Format::Toml,
        )
        .unwrap();

        let report = check_config(&config, &StepRegistry::with_builtins());
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert!(report.is_valid(false));
    }
}
