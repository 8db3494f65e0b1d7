// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logger handle and log entry type

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};
use crossbeam_channel::Sender;

use super::{Facility, Severity};

/// One formatted log record on its way to the consumer.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub severity: Severity,
    pub facility: Facility,
    pub message: String,
}

/// Logger handle for writing log entries.
///
/// This is a lightweight handle that can be cloned and passed around; all
/// clones feed the same consumer thread and share the same minimum level.
#[derive(Debug, Clone)]
pub struct Logger {
    tx: Sender<LogEntry>,
    /// Global minimum log level (default: Notice)
    min_level: Arc<AtomicU8>,
}

impl Logger {
    pub(super) fn new(tx: Sender<LogEntry>, min_level: Severity) -> Self {
        Self {
            tx,
            min_level: Arc::new(AtomicU8::new(min_level.as_u8())),
        }
    }

    /// A logger whose output goes nowhere. Used by tests that exercise
    /// components without caring about their log output.
    pub fn discard() -> Self {
        let (tx, _rx) = crossbeam_channel::bounded(0);
        Self {
            tx,
            min_level: Arc::new(AtomicU8::new(Severity::Emergency.as_u8())),
        }
    }

    /// Raise or lower the minimum severity for all clones of this logger.
    pub fn set_min_level(&self, level: Severity) {
        self.min_level.store(level.as_u8(), Ordering::Relaxed);
    }

    #[inline]
    fn should_log(&self, severity: Severity) -> bool {
        severity.as_u8() <= self.min_level.load(Ordering::Relaxed)
    }

    /// Write a log entry
    #[inline]
    pub fn log(&self, severity: Severity, facility: Facility, message: &str) {
        if !self.should_log(severity) {
            return;
        }
        // A disconnected consumer (e.g. after teardown in tests) just drops
        // the entry; logging never brings a worker down.
        let _ = self.tx.send(LogEntry {
            timestamp: Local::now(),
            severity,
            facility,
            message: message.to_string(),
        });
    }

    pub fn critical(&self, facility: Facility, message: &str) {
        self.log(Severity::Critical, facility, message);
    }

    pub fn error(&self, facility: Facility, message: &str) {
        self.log(Severity::Error, facility, message);
    }

    pub fn warning(&self, facility: Facility, message: &str) {
        self.log(Severity::Warning, facility, message);
    }

    pub fn notice(&self, facility: Facility, message: &str) {
        self.log(Severity::Notice, facility, message);
    }

    pub fn info(&self, facility: Facility, message: &str) {
        self.log(Severity::Info, facility, message);
    }

    pub fn debug(&self, facility: Facility, message: &str) {
        self.log(Severity::Debug, facility, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_level_filters_entries() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let logger = Logger::new(tx, Severity::Notice);

        logger.debug(Facility::Test, "filtered out");
        logger.error(Facility::Test, "kept");

        let entry = rx.try_recv().unwrap();
        assert_eq!(entry.severity, Severity::Error);
        assert_eq!(entry.message, "kept");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_set_min_level_applies_to_clones() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let logger = Logger::new(tx, Severity::Notice);
        let clone = logger.clone();

        logger.set_min_level(Severity::Debug);
        clone.debug(Facility::Test, "now visible");
        assert_eq!(rx.try_recv().unwrap().message, "now visible");
    }

    #[test]
    fn test_discard_logger_never_blocks() {
        let logger = Logger::discard();
        logger.error(Facility::Test, "vanishes");
    }
}
