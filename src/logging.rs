use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Environment variable holding an `EnvFilter` directive string.
pub const LOG_ENV: &str = "PIPELEDGER_LOG";

/// Filter used when `PIPELEDGER_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "pipeledger=debug"
    } else {
        "pipeledger=info"
    }
}

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays machine-readable.
pub fn init(verbose: bool) -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))
}
