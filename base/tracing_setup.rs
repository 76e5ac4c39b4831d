// This file is part of the NVR core recording pipeline.
// Adapted from Moonfire NVR's `base::tracing_setup`.

//! Sets up a `tracing` subscriber according to this program's preferences.

use tracing::error;
use tracing_subscriber::{
    fmt::time::FormatTime, layer::SubscriberExt, util::SubscriberInitExt,
};

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", jiff::Timestamp::now())
    }
}

/// Custom panic hook that logs through `tracing` instead of writing straight
/// to stderr, so panics end up timestamped and attributed to a thread name
/// like every other log line.
fn panic_hook(p: &std::panic::PanicHookInfo) {
    let payload: Option<&str> = p
        .payload()
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| p.payload().downcast_ref::<String>().map(String::as_str));
    error!(
        location = p.location().map(tracing::field::display),
        payload = payload.map(tracing::field::display),
        "panic",
    );
}

/// Installs the global `tracing` subscriber. Call once from `main`.
///
/// `NVR_LOG` sets the filter (default `info`); `NVR_FORMAT=json` switches to
/// structured JSON output suitable for log shipping.
pub fn install() {
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .with_env_var("NVR_LOG")
        .from_env_lossy();
    tracing_log::LogTracer::init().ok();

    let registry = tracing_subscriber::registry();
    match std::env::var("NVR_FORMAT").as_deref() {
        Ok("json") => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_thread_names(true)
                    .json(),
            )
            .with(filter)
            .init(),
        _ => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_timer(LocalTimer)
                    .with_thread_names(true),
            )
            .with(filter)
            .init(),
    }

    std::panic::set_hook(Box::new(panic_hook));
}
