//! The `annolab` binary's configuration and startup helpers.
//!
//! The binary wires a search backend, the document stores and the workflow
//! services together, runs the object expansion worker and waits for ctrl-c.

pub mod config;

pub use config::{BackendKind, ServerConfig};

/// Initializes `tracing` with an env filter.
///
/// `RUST_LOG` takes precedence; otherwise the workspace crates log at `level`.
///
/// # Arguments
///
/// * `level` - The log level (error, warn, info, debug, trace)
pub fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "annolab={level},annolab_persistence={level},annolab_workflow={level},annolab_server={level}"
        ))
    });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}
