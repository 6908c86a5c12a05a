/// Centralized logging macros for the device link
///
/// All link components log through these so records share one target
/// (`device_link`) and one formatting style, whichever logger the binary
/// installs. They expand to the `log` crate, re-exported by this crate, so
/// callers need no direct `log` dependency.
///
/// Log target used by every macro in this module
pub const LOG_TARGET: &str = "device_link";

/// Log debug-level message
///
/// Use for loop lifecycle and per-frame tracing
///
/// # Example
/// ```
/// use link_runtime::link_debug;
/// link_debug!("receiver: {} bytes pending", 12);
/// ```
#[macro_export]
macro_rules! link_debug {
    ($($arg:tt)*) => {
        $crate::__log::debug!(target: $crate::logging::LOG_TARGET, $($arg)*)
    };
}

/// Log info-level message
///
/// Use for connection state changes
#[macro_export]
macro_rules! link_info {
    ($($arg:tt)*) => {
        $crate::__log::info!(target: $crate::logging::LOG_TARGET, $($arg)*)
    };
}

/// Log warning-level message
///
/// Use for recoverable errors: dropped commands, malformed frames, lost port
#[macro_export]
macro_rules! link_warn {
    ($($arg:tt)*) => {
        $crate::__log::warn!(target: $crate::logging::LOG_TARGET, $($arg)*)
    };
}

/// Log error-level message
///
/// Use for failed connection attempts and I/O errors
#[macro_export]
macro_rules! link_error {
    ($($arg:tt)*) => {
        $crate::__log::error!(target: $crate::logging::LOG_TARGET, $($arg)*)
    };
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    #[test]
    fn test_logging_macros_compile() {
        // Just verify macros compile
        link_debug!("test debug");
        link_info!("test info");
        link_warn!("test warn");
        link_error!("test error");
    }

    #[test]
    fn test_logging_with_format_args() {
        link_debug!("state: {} → {}", "Connected", "Disconnected");
        link_info!("Port opened at {} baud", 9600);
        link_warn!("Retry attempt {}/{}", 1, 3);
        link_error!("Failed to open port: {}", "Access denied");
    }
}
