use tracing_subscriber::{
    EnvFilter,
    fmt::{format, time::ChronoLocal},
};

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
pub fn init_log() {
    let format = format::format()
        .with_level(true)
        .with_target(false)
        .with_timer(ChronoLocal::new("[%m-%d %H:%M:%S%.3f]".to_string()))
        .compact();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // A second call (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(format)
        .try_init();
}
