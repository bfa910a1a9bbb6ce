//! Tracing initialisation for the launcher binary.
//!
//! Call [`init_tracing`] once at program start; later calls are ignored.
//! Log lines go to stderr: stdout carries the simulator's own output, the
//! log dump and the run summary.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Crates whose events follow the requested level; everything else is
/// held at `warn`.
const LAUNCHER_TARGETS: &[&str] = &["simrig_ci", "launch_tests"];

/// Filter used when `RUST_LOG` is not set.
pub fn default_directives(level: Level) -> String {
    let mut directives = vec![Level::WARN.as_str().to_lowercase()];
    let level = level.as_str().to_lowercase();
    for target in LAUNCHER_TARGETS {
        directives.push(format!("{target}={level}"));
    }
    directives.join(",")
}

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON log lines instead of text.
/// * `level`: launcher verbosity when `RUST_LOG` is not set.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let output = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let output: Box<dyn Layer<Registry> + Send + Sync> = if json {
        output.json().boxed()
    } else {
        output.boxed()
    };

    tracing_subscriber::registry()
        .with(output)
        .with(env_filter)
        .try_init()
        .ok();
}
