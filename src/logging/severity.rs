// SPDX-License-Identifier: Apache-2.0 OR MIT
// Severity levels for logging (RFC 5424 syslog-style)

use serde::{Deserialize, Serialize};

/// Log severity levels (0-7, lower is more severe)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// System unusable
    Emergency = 0,
    /// Immediate action required
    Alert = 1,
    /// Critical conditions (lock poisoned, listener lost)
    Critical = 2,
    /// Error conditions (receive/send failure, store I/O failure)
    Error = 3,
    /// Warning conditions (reap backlog, slow drain)
    Warning = 4,
    /// Significant normal condition (connection opened/closed, eviction)
    Notice = 5,
    /// Informational (command appended, dump served)
    Info = 6,
    /// Debug-level messages (assembler state, seek resolution)
    Debug = 7,
}

impl Severity {
    /// Get severity level as u8 (0-7)
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Get severity name as static string
    pub const fn as_str(self) -> &'static str {
        match self {
            Severity::Emergency => "EMERGENCY",
            Severity::Alert => "ALERT",
            Severity::Critical => "CRITICAL",
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Notice => "NOTICE",
            Severity::Info => "INFO",
            Severity::Debug => "DEBUG",
        }
    }

    /// Create from u8 value (returns None if invalid)
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Severity::Emergency),
            1 => Some(Severity::Alert),
            2 => Some(Severity::Critical),
            3 => Some(Severity::Error),
            4 => Some(Severity::Warning),
            5 => Some(Severity::Notice),
            6 => Some(Severity::Info),
            7 => Some(Severity::Debug),
            _ => None,
        }
    }
}
