#![allow(missing_docs)]
use std::sync::Arc;

use tokio::runtime::{self, Runtime};

use crate::{
    cli::{handle_config_errors, LogFormat, Opts, RunOpts, SubCommand},
    config::{self, TransformationConfig},
    context::TransContext,
    list,
    step::StepRegistry,
    topology::{ExecutionMode, RunResult, SingleThreadedExecutor, TransState, Transformation},
    trace, validate,
};

pub struct Application {
    opts: Opts,
    pub runtime: Runtime,
}

impl Application {
    pub fn prepare() -> Result<Self, exitcode::ExitCode> {
        let opts = Opts::get_matches().map_err(|error| {
            let _ = error.print();
            if error.use_stderr() {
                exitcode::USAGE
            } else {
                exitcode::OK
            }
        })?;
        Self::prepare_from_opts(opts)
    }

    pub fn prepare_from_opts(opts: Opts) -> Result<Self, exitcode::ExitCode> {
        let level = std::env::var("LOG")
            .unwrap_or_else(|_| trace::level_directives(opts.log_level()));
        let json = opts.root.log_format == LogFormat::Json;
        trace::init(opts.root.color.use_color(), json, &level);

        let runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("rowflow-worker")
            .worker_threads(2)
            .build()
            .map_err(|error| {
                error!(message = "Unable to create async runtime.", %error);
                exitcode::OSERR
            })?;

        Ok(Self { opts, runtime })
    }

    pub fn run(self) -> exitcode::ExitCode {
        let Self { opts, runtime } = self;
        match opts.sub_command {
            SubCommand::Validate(validate) => validate::validate(&validate),
            SubCommand::List(list) => list::cmd(&list),
            SubCommand::Run(run) => runtime.block_on(run_transformation(run)),
        }
    }
}

fn load(opts: &RunOpts) -> Result<TransformationConfig, exitcode::ExitCode> {
    let mut config = config::load_from_path(&opts.config).map_err(|error| {
        error!(message = "Failed to load configuration.", %error);
        exitcode::CONFIG
    })?;
    if let Some(rowset_size) = opts.rowset_size {
        config.options.rowset_size = rowset_size;
    }
    config.options.safe_mode |= opts.safe_mode;

    let warnings = config::check(&config).map_err(handle_config_errors)?;
    for warning in warnings {
        warn!(message = "Configuration warning.", %warning);
    }
    Ok(config)
}

async fn run_transformation(opts: RunOpts) -> exitcode::ExitCode {
    let config = match load(&opts) {
        Ok(config) => config,
        Err(code) => return code,
    };
    let mode = opts.mode();
    let context = TransContext::for_config(&config, Arc::new(StepRegistry::with_builtins()));

    info!(
        message = "Starting transformation.",
        name = %config.name,
        steps = config.steps.len(),
        ?mode,
    );

    let worker = {
        let context = context.clone();
        tokio::task::spawn_blocking(move || match mode {
            ExecutionMode::Threaded => Transformation::execute(&config, context),
            ExecutionMode::SingleThreaded => SingleThreadedExecutor::execute(&config, context),
        })
    };
    tokio::pin!(worker);

    let joined = tokio::select! {
        joined = &mut worker => joined,
        _ = tokio::signal::ctrl_c() => {
            info!(message = "Signal received, stopping the transformation.");
            context.stop();
            worker.await
        }
    };

    match joined {
        Ok(Ok(result)) => report(&result, opts.json),
        Ok(Err(error)) => {
            error!(message = "Transformation could not start.", %error);
            exitcode::CONFIG
        }
        Err(error) => {
            error!(message = "Transformation worker panicked.", %error);
            exitcode::SOFTWARE
        }
    }
}

fn report(result: &RunResult, json: bool) -> exitcode::ExitCode {
    if json {
        match serde_json::to_string_pretty(result) {
            #[allow(clippy::print_stdout)]
            Ok(encoded) => println!("{encoded}"),
            Err(error) => error!(message = "Could not encode the run result.", %error),
        }
    }

    match result.state {
        TransState::Finished if result.errors == 0 => exitcode::OK,
        TransState::Stopped => exitcode::TEMPFAIL,
        _ => exitcode::SOFTWARE,
    }
}
