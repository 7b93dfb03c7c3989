//! Logging macros and subscriber setup.
//!
//! Call sites use `log_info!` and friends so the backend stays swappable.
//! The library never installs a subscriber; binaries call [`init`].

pub fn log_info_impl(msg: &str) {
    tracing::info!("{}", msg);
}

pub fn log_error_impl(msg: &str) {
    tracing::error!("{}", msg);
}

pub fn log_warn_impl(msg: &str) {
    tracing::warn!("{}", msg);
}

pub fn log_debug_impl(msg: &str) {
    tracing::debug!("{}", msg);
}

/// Install a `tracing` subscriber honouring `RUST_LOG`.
pub fn init(default_filter: &str) {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log_info_impl(&format!($($arg)*))
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log_error_impl(&format!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::log_warn_impl(&format!($($arg)*))
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log_debug_impl(&format!($($arg)*))
    };
}
