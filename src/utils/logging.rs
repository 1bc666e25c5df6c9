//! Switchable, tagged logging macros.
//!
//! A module opts in by declaring two constants next to its imports:
//! ```rust,ignore
//! const ENABLE_LOGS: bool = true;
//! const LOG_TAG: &str = "channel";
//!
//! use crate::{log_info, log_warn};
//!
//! log_info!("connected after {} attempts", attempts);
//! // => "[channel] connected after 2 attempts"
//! ```
//! Flipping `ENABLE_LOGS` to `false` silences the module without touching `RUST_LOG`.

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!("[{}] {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!("[{}] {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!("[{}] {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}

/// Debug-level output; used for stale completions and per-event detail.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!("[{}] {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}
