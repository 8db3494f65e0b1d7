// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging facilities (component identifiers)

use serde::{Deserialize, Serialize};

/// Logging facility - identifies which component generated the log message
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Facility {
    /// Accept loop, worker registry, shutdown coordination
    Supervisor = 0,
    /// Per-connection workers: receive, assemble, drain
    Connection = 1,
    /// Shared log store (ring or device)
    Store = 2,
    /// Periodic timestamp task
    Timer = 3,
    /// Test harness and fixtures
    Test = 4,

    /// Fallback for uncategorized messages
    Unknown = 255,
}

impl Facility {
    /// Get facility name as static string
    pub const fn as_str(self) -> &'static str {
        match self {
            Facility::Supervisor => "Supervisor",
            Facility::Connection => "Connection",
            Facility::Store => "Store",
            Facility::Timer => "Timer",
            Facility::Test => "Test",
            Facility::Unknown => "Unknown",
        }
    }
}
