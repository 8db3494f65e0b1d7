// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging macros for convenient logging

/// Log a message with critical severity
///
/// # Examples
/// ```ignore
/// log_critical!(logger, Facility::Supervisor, "Store lock poisoned");
/// ```
#[macro_export]
macro_rules! log_critical {
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.critical($facility, $msg)
    };
}

/// Log a message with error severity
///
/// # Examples
/// ```ignore
/// log_error!(logger, Facility::Connection, "Failed to receive from peer");
/// ```
#[macro_export]
macro_rules! log_error {
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.error($facility, $msg)
    };
}

/// Log a message with warning severity
#[macro_export]
macro_rules! log_warning {
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.warning($facility, $msg)
    };
}

/// Log a message with notice severity
#[macro_export]
macro_rules! log_notice {
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.notice($facility, $msg)
    };
}

/// Log a message with info severity
#[macro_export]
macro_rules! log_info {
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.info($facility, $msg)
    };
}

/// Log a message with debug severity
#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.debug($facility, $msg)
    };
}
