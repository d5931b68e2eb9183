//! Logging utilities and structured logging support

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system
pub fn init() {
    env_logger::init();
}

/// Initialize logging, ignoring a logger that is already installed (tests)
pub fn try_init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Emit a `warn!` only for the first `$count` times this call site fires.
///
/// Capacity warnings can fire every frame.
#[macro_export]
macro_rules! warn_n_times {
    ($count:expr, $($arg:tt)+) => {{
        static FIRED: ::std::sync::atomic::AtomicUsize = ::std::sync::atomic::AtomicUsize::new(0);
        if FIRED.fetch_add(1, ::std::sync::atomic::Ordering::Relaxed) < $count {
            ::log::warn!($($arg)+);
        }
    }};
}
