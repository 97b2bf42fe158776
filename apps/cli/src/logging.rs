//! Logger setup.

use anyhow::{Context, Result};
use clap_verbosity_flag::Verbosity;
use tracing_subscriber::EnvFilter;

/// Initializes the global logger, honoring `-v`/`-q` verbosity flags and the
/// `RUST_LOG` environment variable (`RUST_LOG` wins when both are given).
pub fn init(verbose: &Verbosity) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(verbose.tracing_level_filter().into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))
        .context("error installing logger")
}
