// src/macros.rs

//
// Crate-internal logging.
//
// With `logging`: every level is a `tracing` event under the `sock_rpc`
// target. Without it: errors go to stderr with a level prefix, every other
// level compiles to nothing.
//
// Values used only in log lines are bound with a leading underscore
// (`_err`, `_reason`) so builds without the feature stay warning free.
//

#![allow(unused_macros)]

#[cfg(feature = "logging")]
macro_rules! log_event {
    (error, $($arg:tt)*) => { tracing::error!(target: "sock_rpc", $($arg)*) };
    (warn, $($arg:tt)*) => { tracing::warn!(target: "sock_rpc", $($arg)*) };
    (info, $($arg:tt)*) => { tracing::info!(target: "sock_rpc", $($arg)*) };
    (debug, $($arg:tt)*) => { tracing::debug!(target: "sock_rpc", $($arg)*) };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_event {
    (error, $($arg:tt)*) => { eprintln!("sock_rpc ERROR {}", format_args!($($arg)*)) };
    (warn, $($arg:tt)*) => { () };
    (info, $($arg:tt)*) => { () };
    (debug, $($arg:tt)*) => { () };
}

macro_rules! log_error {
    ($($arg:tt)*) => { $crate::macros::log_event!(error, $($arg)*) };
}

macro_rules! log_warn {
    ($($arg:tt)*) => { $crate::macros::log_event!(warn, $($arg)*) };
}

macro_rules! log_info {
    ($($arg:tt)*) => { $crate::macros::log_event!(info, $($arg)*) };
}

macro_rules! log_debug {
    ($($arg:tt)*) => { $crate::macros::log_event!(debug, $($arg)*) };
}

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_event;
pub(crate) use log_info;
pub(crate) use log_warn;
