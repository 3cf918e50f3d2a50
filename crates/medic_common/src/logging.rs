//! Logging setup shared by medic binaries
//!
//! Filter precedence: `RUST_LOG`, then `debug` when verbose, else `warn`.
//! Output goes to stderr so stdout stays parseable.

use tracing_subscriber::EnvFilter;

fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "warn"
    }
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert_eq!(default_filter(true), "debug");
        assert_eq!(default_filter(false), "warn");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(false);
        init(true);
        tracing::debug!("still alive");
    }
}
