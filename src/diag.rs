//! The two named diagnostic channels described by the spec.
//!
//! Both are plain `tracing` targets; whether anything surfaces depends on the
//! embedding binary's subscriber filter (e.g. `RUST_LOG=netmock::matcher=
//! trace`), same as every other crate in the example pack. We don't gate
//! these with our own env flag on top of `tracing`'s own filtering — that
//! would just be a second, redundant on/off switch.

/// Connection lifecycle, matches, delays, writes, swallowed transport faults.
pub const SERVER_TARGET: &str = "netmock::server";

/// Why the comparator accepted or rejected a given mock for a given request.
pub const MATCHER_TARGET: &str = "netmock::matcher";

macro_rules! server_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: $crate::diag::SERVER_TARGET, $($arg)*)
    };
}

macro_rules! server_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: $crate::diag::SERVER_TARGET, $($arg)*)
    };
}

macro_rules! matcher_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: $crate::diag::MATCHER_TARGET, $($arg)*)
    };
}

pub(crate) use matcher_trace;
pub(crate) use server_debug;
pub(crate) use server_warn;

/// Installs a process-wide subscriber once so the diagnostic channels above
/// actually emit somewhere during a test run (filtered by `RUST_LOG`, same as
/// any embedding binary). Call from any test that wants to eyeball the
/// `netmock::server`/`netmock::matcher` output; harmless to call more than
/// once or from multiple test threads.
#[cfg(test)]
pub(crate) fn init_test_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}
