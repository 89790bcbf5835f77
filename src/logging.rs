// src/logging.rs
//! Tracing subscriber setup for embedders and tests.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::time::FormatTime;

/// A timer that outputs nothing but still enables span timing calculation
struct NoTimestamp;

impl FormatTime for NoTimestamp {
    fn format_time(
        &self,
        _w: &mut tracing_subscriber::fmt::format::Writer<'_>,
    ) -> std::fmt::Result {
        Ok(())
    }
}

/// Install a stderr subscriber if `OFFLOAD_LOG` is set.
///
/// `OFFLOAD_LOG` takes an `EnvFilter` directive (`offload=debug`,
/// `offload_jit=trace`, ...). `OFFLOAD_LOG_STYLE` selects `compact` (default,
/// no timestamps) or `full`. Span close events carry the time spent in the
/// marshal, execute and unmarshal phases.
///
/// Returns whether a subscriber was installed by this call.
pub fn init_from_env() -> bool {
    init_from_lookup(|key| std::env::var(key).ok())
}

/// [`init_from_env`] reading variables through `lookup`.
pub fn init_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> bool {
    let Some(directive) = lookup("OFFLOAD_LOG") else {
        return false;
    };
    let Ok(filter) = EnvFilter::try_new(&directive) else {
        return false;
    };
    let style = lookup("OFFLOAD_LOG_STYLE").unwrap_or_default();
    let installed = if style == "full" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_writer(std::io::stderr)
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_timer(NoTimestamp)
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(std::io::stderr)
            .try_init()
            .is_ok()
    };
    if installed {
        tracing::debug!(style = %style, %directive, "tracing initialized");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn installs_once_when_configured() {
        assert!(!init_from_lookup(|_| None));
        assert!(!init_from_lookup(|key| {
            (key == "OFFLOAD_LOG").then(|| "offload=[".to_string())
        }));

        let configured = |key: &str| match key {
            "OFFLOAD_LOG" => Some("offload=debug".to_string()),
            "OFFLOAD_LOG_STYLE" => Some("compact".to_string()),
            _ => None,
        };
        assert!(init_from_lookup(configured));
        assert!(!init_from_lookup(configured));
    }
}
