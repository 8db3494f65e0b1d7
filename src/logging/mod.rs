// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Structured logging for ringlogd.
//!
//! A cloneable [`Logger`] handle filters entries by severity and hands them
//! to a dedicated consumer thread over a channel; the consumer drains into a
//! pluggable [`LogSink`] (stderr in the foreground, the syslog datagram
//! socket when daemonized). Log emission never blocks a connection worker on
//! sink I/O.

mod consumer;
mod facility;
mod logger;
#[macro_use]
mod macros;
mod severity;

pub use consumer::{ConsumerHandle, LogSink, StderrSink, SyslogSink};
pub use facility::Facility;
pub use logger::{LogEntry, Logger};
pub use severity::Severity;

/// Start the logging subsystem: returns the root logger handle and the
/// consumer handle to join at shutdown (after all logger clones are gone).
pub fn init(sink: Box<dyn LogSink>, min_level: Severity) -> (Logger, ConsumerHandle) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let logger = Logger::new(tx, min_level);
    let handle = consumer::spawn(rx, sink);
    (logger, handle)
}
