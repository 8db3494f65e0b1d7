// SPDX-License-Identifier: Apache-2.0 OR MIT
// Log consumer thread - drains the channel and writes entries to a sink

use std::io::Write;
use std::os::unix::net::UnixDatagram;
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;

use super::LogEntry;

/// Output sink for log entries
pub trait LogSink: Send {
    /// Write a log entry to the sink
    fn write_entry(&mut self, entry: &LogEntry);

    /// Flush any buffered output
    fn flush(&mut self);
}

/// Standard error sink (foreground operation)
pub struct StderrSink {
    stderr: std::io::Stderr,
}

impl StderrSink {
    pub fn new() -> Self {
        Self {
            stderr: std::io::stderr(),
        }
    }
}

impl Default for StderrSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for StderrSink {
    fn write_entry(&mut self, entry: &LogEntry) {
        // Format: timestamp [SEVERITY] [Facility] message
        let _ = writeln!(
            self.stderr,
            "{} [{}] [{}] {}",
            entry.timestamp.format("%Y-%m-%dT%H:%M:%S%.3f"),
            entry.severity.as_str(),
            entry.facility.as_str(),
            entry.message
        );
    }

    fn flush(&mut self) {
        let _ = self.stderr.flush();
    }
}

/// Syslog sink: RFC 3164 datagrams to `/dev/log` (daemon operation).
pub struct SyslogSink {
    socket: Option<UnixDatagram>,
    tag: String,
    pid: u32,
}

const SYSLOG_PATH: &str = "/dev/log";
/// RFC 3164 "user-level messages" facility code.
const SYSLOG_FACILITY_USER: u8 = 1;

impl SyslogSink {
    pub fn new(tag: &str) -> Self {
        // An absent syslog socket silences the sink rather than failing the
        // daemon; there is no stderr left to complain to once detached.
        let socket = UnixDatagram::unbound().ok();
        Self {
            socket,
            tag: tag.to_string(),
            pid: std::process::id(),
        }
    }
}

impl LogSink for SyslogSink {
    fn write_entry(&mut self, entry: &LogEntry) {
        let Some(socket) = &self.socket else {
            return;
        };
        let pri = SYSLOG_FACILITY_USER * 8 + entry.severity.as_u8();
        let datagram = format!(
            "<{pri}>{} {}[{}]: [{}] {}",
            entry.timestamp.format("%b %e %H:%M:%S"),
            self.tag,
            self.pid,
            entry.facility.as_str(),
            entry.message
        );
        let _ = socket.send_to(datagram.as_bytes(), SYSLOG_PATH);
    }

    fn flush(&mut self) {}
}

/// Handle to the consumer thread. Join after every [`super::Logger`] clone
/// has been dropped; the thread exits once the channel disconnects.
pub struct ConsumerHandle {
    handle: JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn join(self) {
        let _ = self.handle.join();
    }
}

pub(super) fn spawn(rx: Receiver<LogEntry>, mut sink: Box<dyn LogSink>) -> ConsumerHandle {
    let handle = std::thread::Builder::new()
        .name("log-consumer".to_string())
        .spawn(move || {
            while let Ok(entry) = rx.recv() {
                sink.write_entry(&entry);
            }
            sink.flush();
        })
        .unwrap_or_else(|e| panic!("failed to spawn log consumer: {e}"));
    ConsumerHandle { handle }
}
