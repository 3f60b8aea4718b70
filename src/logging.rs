#![forbid(unsafe_code)]

//! Tracing subscriber setup for the binaries.

use std::env;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_FILTER: &str = "fetchtube=info,tower_http=info";

/// Installs the global subscriber. `RUST_LOG` overrides the default filter
/// and `FETCHTUBE_LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    let use_json = env::var("FETCHTUBE_LOG_FORMAT")
        .map(|value| value.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    // try_init: a second call (tests, embedding) keeps the first subscriber.
    let result = if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
