//! Tracing setup for the sidecar.
//!
//! stdout carries the IPC responses, so every log line goes to stderr.
//! `LOG_LEVEL` holds the filter directives and `LOG_FORMAT=json` switches to
//! structured JSON lines.

use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new("info,ericad=info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_ansi(false);

    // try_init: a second init (e.g. in tests) must not panic.
    let _ = match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => builder.json().try_init(),
        _ => builder.try_init(),
    };
}
