use tracing_subscriber::{util::SubscriberInitExt, EnvFilter, FmtSubscriber};

/// Installs the global subscriber. Safe to call more than once; later calls
/// keep the first subscriber.
pub fn init(color: bool, json: bool, levels: &str) {
    let filter = EnvFilter::try_new(levels).unwrap_or_else(|error| {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("Invalid log filter {levels:?}, falling back to \"info\": {error}");
        }
        EnvFilter::new("info")
    });

    // `try_init` also routes `log` records through the subscriber.
    let _ = if json {
        FmtSubscriber::builder()
            .with_env_filter(filter)
            .json()
            .flatten_event(true)
            .finish()
            .try_init()
    } else {
        FmtSubscriber::builder()
            .with_ansi(color)
            .with_env_filter(filter)
            .with_thread_names(true)
            .finish()
            .try_init()
    };
}

/// Filter directives for the given level, scoped to the crates of this workspace.
pub fn level_directives(level: &str) -> String {
    match level {
        "off" => "off".to_owned(),
        level => [format!("rowflow={level}"), format!("rowflow_core={level}")].join(","),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_cover_both_crates() {
        assert_eq!(level_directives("debug"), "rowflow=debug,rowflow_core=debug");
        assert_eq!(level_directives("off"), "off");
    }
}
