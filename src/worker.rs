// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-connection worker: receive, assemble, append; on half-close, dump.
//!
//! Each accepted connection gets one OS thread running the
//! `Receiving → Draining → {Completed, Failed}` state machine. The worker
//! owns its [`ConnectionState`] exclusively; the supervisor only observes the
//! shared completion flags when reaping. The store lock is taken once per
//! completed command and once for the drain, and is never held across a
//! blocking socket call.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::assembler::CommandAssembler;
use crate::logging::{Facility, Logger};
use crate::store::{command_end, LogStore, SharedStore, StoreError};
use crate::{log_debug, log_error, log_notice};

/// Receive buffer size per read call.
const RECV_BUFFER_SIZE: usize = 1024;
/// Read timeout; bounds how long a cancellation can go unnoticed.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Seek target captured from a connection's first line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekTarget {
    pub command: u32,
    pub offset: u32,
}

/// Parse the seek control line: exactly `SEEKTO:<command_index>,<intra_offset>`
/// with unsigned decimal integers. Anything else - including a malformed
/// attempt at the grammar - is ordinary data and returns `None`.
pub fn parse_seek_directive(line: &[u8]) -> Option<SeekTarget> {
    let text = std::str::from_utf8(line).ok()?;
    let text = text.strip_suffix('\n').unwrap_or(text);
    let rest = text.strip_prefix("SEEKTO:")?;
    let (command, offset) = rest.split_once(',')?;
    // u32::parse accepts a leading '+'; the directive grammar does not.
    if command.is_empty()
        || offset.is_empty()
        || !command.bytes().all(|b| b.is_ascii_digit())
        || !offset.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    Some(SeekTarget {
        command: command.parse().ok()?,
        offset: offset.parse().ok()?,
    })
}

/// Completion flags observed by the supervisor when reaping.
#[derive(Debug, Default)]
pub struct WorkerShared {
    pub done: AtomicBool,
    pub failed: AtomicBool,
}

/// Registry entry for one spawned worker; join-before-remove on reap.
pub struct WorkerHandle {
    pub peer: SocketAddr,
    pub handle: JoinHandle<()>,
    pub shared: Arc<WorkerShared>,
}

/// Per-connection state, mutated only by the owning worker thread.
struct ConnectionState {
    stream: TcpStream,
    peer: SocketAddr,
    assembler: CommandAssembler,
    /// Seek target captured from a first-line directive, if any.
    seek: Option<SeekTarget>,
    first_line_seen: bool,
}

/// Spawn a worker thread for an accepted connection.
pub fn spawn(
    stream: TcpStream,
    peer: SocketAddr,
    store: SharedStore,
    cancel: Arc<AtomicBool>,
    logger: Logger,
) -> Result<WorkerHandle> {
    let shared = Arc::new(WorkerShared::default());
    let thread_shared = Arc::clone(&shared);
    let handle = std::thread::Builder::new()
        .name(format!("conn-{peer}"))
        .spawn(move || {
            let state = ConnectionState {
                stream,
                peer,
                assembler: CommandAssembler::new(),
                seek: None,
                first_line_seen: false,
            };
            run(state, store, cancel, thread_shared, logger);
        })
        .context("failed to spawn connection worker thread")?;
    Ok(WorkerHandle {
        peer,
        handle,
        shared,
    })
}

/// Marks the worker's shared flags when dropped, so the supervisor can reap
/// the thread even if it unwinds. An unwind counts as a failure.
struct CompletionGuard(Arc<WorkerShared>);

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.failed.store(true, Ordering::Release);
        }
        self.0.done.store(true, Ordering::Release);
    }
}

/// Worker entry point: drives the state machine and records the outcome.
/// The socket is closed on every exit path exactly once, by dropping the
/// stream after the shutdown call.
fn run(
    mut state: ConnectionState,
    store: SharedStore,
    cancel: Arc<AtomicBool>,
    shared: Arc<WorkerShared>,
    logger: Logger,
) {
    let _completion = CompletionGuard(Arc::clone(&shared));
    let peer = state.peer;
    match serve(&mut state, &store, &cancel, &logger) {
        Ok(()) => {
            log_notice!(
                logger,
                Facility::Connection,
                &format!("Closed connection from {peer}")
            );
        }
        Err(e) => {
            shared.failed.store(true, Ordering::Release);
            log_error!(
                logger,
                Facility::Connection,
                &format!("Connection from {peer} failed: {e:#}")
            );
        }
    }
    let _ = state.stream.shutdown(Shutdown::Both);
}

/// Receiving: read chunks, feed the assembler, append completed commands.
/// Draining (on half-close): build the reply under one lock acquisition and
/// send it outside the lock.
fn serve(
    state: &mut ConnectionState,
    store: &SharedStore,
    cancel: &AtomicBool,
    logger: &Logger,
) -> Result<()> {
    state
        .stream
        .set_read_timeout(Some(CANCEL_POLL_INTERVAL))
        .context("failed to set receive timeout")?;

    let mut buf = [0u8; RECV_BUFFER_SIZE];
    loop {
        // Cancellation safe point: top of the receive loop.
        if cancel.load(Ordering::Relaxed) {
            log_debug!(
                logger,
                Facility::Connection,
                &format!("Cancelled connection from {}", state.peer)
            );
            return Ok(());
        }

        match state.stream.read(&mut buf) {
            Ok(0) => break, // peer half-closed its send side
            Ok(n) => {
                for command in state.assembler.feed(&buf[..n]) {
                    commit_command(state, store, logger, command)?;
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) => return Err(anyhow!(e).context("receive failed")),
        }
    }

    let reply = {
        let mut guard = store
            .lock()
            .map_err(|_| anyhow!("store lock poisoned"))?;
        build_reply(state.seek, guard.as_mut(), logger, state.peer)?
    };
    if !reply.is_empty() {
        state
            .stream
            .write_all(&reply)
            .context("send of log dump failed")?;
    }
    Ok(())
}

/// Append one completed command, or capture the first-line seek directive.
fn commit_command(
    state: &mut ConnectionState,
    store: &SharedStore,
    logger: &Logger,
    command: Vec<u8>,
) -> Result<()> {
    if !state.first_line_seen {
        state.first_line_seen = true;
        if let Some(target) = parse_seek_directive(&command) {
            // The directive itself is not appended to the log.
            state.seek = Some(target);
            log_debug!(
                logger,
                Facility::Connection,
                &format!(
                    "Connection from {} entered seek mode: command {}, offset {}",
                    state.peer, target.command, target.offset
                )
            );
            return Ok(());
        }
    }

    let evicted = {
        let mut guard = store
            .lock()
            .map_err(|_| anyhow!("store lock poisoned"))?;
        guard.append(command)?
    };
    if let Some(old) = evicted {
        log_debug!(
            logger,
            Facility::Store,
            &format!("Evicted oldest entry ({} bytes)", old.len())
        );
    }
    Ok(())
}

/// Build the reply bytes under an already-held store lock.
///
/// Ordinary mode streams the whole log oldest-first. Seek mode streams only
/// the selected command's bytes from the resolved offset to the entry's end;
/// an out-of-range target is a normal outcome and yields an empty reply.
fn build_reply(
    seek: Option<SeekTarget>,
    store: &mut dyn LogStore,
    logger: &Logger,
    peer: SocketAddr,
) -> Result<Vec<u8>> {
    let reply = match seek {
        None => {
            let total = store.total_length()?;
            store.read_range(0, total as usize)?
        }
        Some(target) => match store.seek_to_command(target.command, target.offset) {
            Ok(start) => {
                // A store reporting a start at or past the command's end
                // yields nothing, never a neighboring command's bytes.
                let end = command_end(store, target.command)?;
                store.read_range(start, end.saturating_sub(start) as usize)?
            }
            Err(StoreError::OutOfRange) => {
                log_notice!(
                    logger,
                    Facility::Connection,
                    &format!(
                        "Seek out of range for {peer}: command {}, offset {}",
                        target.command, target.offset
                    )
                );
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        },
    };
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RingStore;

    #[test]
    fn test_parse_seek_directive_valid() {
        assert_eq!(
            parse_seek_directive(b"SEEKTO:1,1\n"),
            Some(SeekTarget {
                command: 1,
                offset: 1
            })
        );
        assert_eq!(
            parse_seek_directive(b"SEEKTO:0,0\n"),
            Some(SeekTarget {
                command: 0,
                offset: 0
            })
        );
        // Directive without the trailing newline still parses; the caller
        // only feeds complete lines anyway.
        assert_eq!(
            parse_seek_directive(b"SEEKTO:12,345"),
            Some(SeekTarget {
                command: 12,
                offset: 345
            })
        );
    }

    #[test]
    fn test_parse_seek_directive_malformed_is_data() {
        for line in [
            b"SEEKTO:1\n".as_slice(),
            b"SEEKTO:,1\n",
            b"SEEKTO:1,\n",
            b"SEEKTO:a,b\n",
            b"SEEKTO:-1,0\n",
            b"SEEKTO:+1,0\n",
            b"SEEKTO:1,2x\n",
            b"SEEKTO:1, 2\n",
            b"seekto:1,2\n",
            b"SEEKTO1,2\n",
            b"hello\n",
            b"\n",
        ] {
            assert_eq!(parse_seek_directive(line), None, "line {line:?}");
        }
    }

    #[test]
    fn test_completion_flags_survive_a_worker_panic() {
        let shared = Arc::new(WorkerShared::default());
        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::spawn(move || {
            let _completion = CompletionGuard(thread_shared);
            panic!("worker unwound");
        });
        assert!(handle.join().is_err());
        // The supervisor reaps on `done`; a panicked worker must still set it.
        assert!(shared.done.load(Ordering::Acquire));
        assert!(shared.failed.load(Ordering::Acquire));
    }

    #[test]
    fn test_completion_flags_on_normal_exit() {
        let shared = Arc::new(WorkerShared::default());
        drop(CompletionGuard(Arc::clone(&shared)));
        assert!(shared.done.load(Ordering::Acquire));
        assert!(!shared.failed.load(Ordering::Acquire));
    }

    fn ring_with(entries: &[&str]) -> RingStore {
        let mut store = RingStore::new(10);
        for text in entries {
            let _ = crate::store::LogStore::append(&mut store, text.as_bytes().to_vec()).unwrap();
        }
        store
    }

    #[test]
    fn test_build_reply_ordinary_dumps_everything() {
        let mut store = ring_with(&["aa\n", "bbb\n", "c\n"]);
        let reply = build_reply(
            None,
            &mut store,
            &Logger::discard(),
            "127.0.0.1:9000".parse().unwrap(),
        )
        .unwrap();
        assert_eq!(reply, b"aa\nbbb\nc\n");
    }

    #[test]
    fn test_build_reply_seek_selects_one_command() {
        let mut store = ring_with(&["aa\n", "bbb\n", "c\n"]);
        let reply = build_reply(
            Some(SeekTarget {
                command: 1,
                offset: 1,
            }),
            &mut store,
            &Logger::discard(),
            "127.0.0.1:9000".parse().unwrap(),
        )
        .unwrap();
        assert_eq!(reply, b"bb\n");
    }

    #[test]
    fn test_build_reply_seek_newest_command_reads_to_extent() {
        let mut store = ring_with(&["aa\n", "bbb\n", "c\n"]);
        let reply = build_reply(
            Some(SeekTarget {
                command: 2,
                offset: 0,
            }),
            &mut store,
            &Logger::discard(),
            "127.0.0.1:9000".parse().unwrap(),
        )
        .unwrap();
        assert_eq!(reply, b"c\n");
    }

    #[test]
    fn test_build_reply_offset_past_command_end_is_empty() {
        // Offset 5 is inside the log extent but past the end of command 0
        // ("aa\n"); the reply must be empty, not bytes of a later command.
        let mut store = ring_with(&["aa\n", "bbb\n", "c\n"]);
        let reply = build_reply(
            Some(SeekTarget {
                command: 0,
                offset: 5,
            }),
            &mut store,
            &Logger::discard(),
            "127.0.0.1:9000".parse().unwrap(),
        )
        .unwrap();
        assert!(reply.is_empty());
    }

    #[test]
    fn test_build_reply_out_of_range_is_empty_not_error() {
        let mut store = ring_with(&["aa\n"]);
        let reply = build_reply(
            Some(SeekTarget {
                command: 7,
                offset: 0,
            }),
            &mut store,
            &Logger::discard(),
            "127.0.0.1:9000".parse().unwrap(),
        )
        .unwrap();
        assert!(reply.is_empty());
    }

    #[test]
    fn test_build_reply_empty_log_is_empty() {
        let mut store = RingStore::new(4);
        let reply = build_reply(
            None,
            &mut store,
            &Logger::discard(),
            "127.0.0.1:9000".parse().unwrap(),
        )
        .unwrap();
        assert!(reply.is_empty());
    }
}
