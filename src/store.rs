// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Backing-store contract shared by the in-process ring log and the external
//! log device.
//!
//! Connection workers and the timestamp task only ever talk to a
//! [`LogStore`] behind the single store lock, so the two variants are
//! interchangeable at the call sites. Byte-offset positioning rides on
//! `std::io::{Read, Seek}`; the log-specific operations (append with
//! eviction hand-off, seek-by-command) are trait methods.

use std::io::{Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::index;
use crate::ringlog::{Entry, RingLog};

/// Errors surfaced by a log store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Seek target beyond the currently valid log extent. A normal,
    /// reportable outcome for remote seek requests, never a system fault.
    #[error("seek target out of range")]
    OutOfRange,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The single shared store instance plus its exclusive-access lock.
///
/// Process-wide: created at startup, referenced (not duplicated) by every
/// worker and the timestamp task, dropped when the supervisor exits.
pub type SharedStore = Arc<Mutex<Box<dyn LogStore>>>;

/// Wrap a concrete store in the process-wide shared lock.
pub fn shared(store: impl LogStore + 'static) -> SharedStore {
    Arc::new(Mutex::new(Box::new(store) as Box<dyn LogStore>))
}

/// Contract satisfied by either the in-process [`RingStore`] or an external
/// log device ([`crate::device::DeviceStore`]).
pub trait LogStore: Read + Seek + Send {
    /// Append one complete command.
    ///
    /// Returns the entry evicted to make room exactly when the store was at
    /// capacity; the caller releases it by dropping it. The external device
    /// evicts internally and always returns `None`.
    fn append(&mut self, bytes: Vec<u8>) -> Result<Option<Entry>, StoreError>;

    /// Translate a command index plus intra-command offset into an absolute
    /// byte offset, or fail with [`StoreError::OutOfRange`].
    ///
    /// Must be called under the same lock acquisition as the read that uses
    /// the returned offset; an intervening eviction invalidates it.
    fn seek_to_command(&mut self, index: u32, intra_offset: u32) -> Result<u64, StoreError>;

    /// Current byte extent of the log.
    fn total_length(&mut self) -> Result<u64, StoreError> {
        let current = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(current))?;
        Ok(end)
    }

    /// Read up to `max_len` bytes starting at absolute offset `start`.
    ///
    /// Short reads only happen at the end of the log.
    fn read_range(&mut self, start: u64, max_len: usize) -> Result<Vec<u8>, StoreError> {
        self.seek(SeekFrom::Start(start))?;
        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        while out.len() < max_len {
            let want = (max_len - out.len()).min(buf.len());
            let n = self.read(&mut buf[..want])?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }
}

/// Absolute end of the command selected by `(index, intra_offset)`: the
/// start of the following command, or the log extent for the newest one.
///
/// Derived purely at contract level so it works identically for both store
/// variants. Call under the same lock acquisition as the resolution itself.
pub fn command_end(store: &mut dyn LogStore, index: u32) -> Result<u64, StoreError> {
    match store.seek_to_command(index + 1, 0) {
        Ok(offset) => Ok(offset),
        Err(StoreError::OutOfRange) => store.total_length(),
        Err(e) => Err(e),
    }
}

/// In-process store: a [`RingLog`] plus a read cursor giving it file-like
/// positioning semantics.
#[derive(Debug)]
pub struct RingStore {
    log: RingLog,
    cursor: u64,
}

impl RingStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            log: RingLog::new(capacity),
            cursor: 0,
        }
    }

    pub fn log(&self) -> &RingLog {
        &self.log
    }
}

impl Read for RingStore {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            let Some((entry, local)) = self.log.find_offset(self.cursor as usize) else {
                break; // cursor at or past the end of the log
            };
            let n = (entry.len() - local).min(buf.len() - written);
            buf[written..written + n].copy_from_slice(&entry.as_bytes()[local..local + n]);
            written += n;
            self.cursor += n as u64;
        }
        Ok(written)
    }
}

impl Seek for RingStore {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let total = self.log.total_bytes() as u64;
        self.cursor = index::position(self.cursor, total, pos)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        Ok(self.cursor)
    }
}

impl LogStore for RingStore {
    fn append(&mut self, bytes: Vec<u8>) -> Result<Option<Entry>, StoreError> {
        Ok(self.log.add_entry(Entry::from(bytes)))
    }

    fn seek_to_command(&mut self, index: u32, intra_offset: u32) -> Result<u64, StoreError> {
        index::resolve(&self.log, index, intra_offset)
    }

    fn total_length(&mut self) -> Result<u64, StoreError> {
        Ok(self.log.total_bytes() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(entries: &[&str]) -> RingStore {
        let mut store = RingStore::new(10);
        for text in entries {
            let _ = store.append(text.as_bytes().to_vec()).unwrap();
        }
        store
    }

    #[test]
    fn test_read_range_spans_entries() {
        let mut store = store_with(&["aa\n", "bbb\n", "c\n"]);
        assert_eq!(store.read_range(0, 1024).unwrap(), b"aa\nbbb\nc\n");
        assert_eq!(store.read_range(4, 3).unwrap(), b"bb\n");
        assert_eq!(store.read_range(8, 10).unwrap(), b"\n");
    }

    #[test]
    fn test_read_range_past_end_is_empty() {
        let mut store = store_with(&["aa\n"]);
        assert!(store.read_range(3, 10).unwrap().is_empty());
        assert!(store.read_range(100, 10).unwrap().is_empty());
    }

    #[test]
    fn test_total_length() {
        let mut store = store_with(&["aa\n", "bbb\n"]);
        assert_eq!(store.total_length().unwrap(), 7);
    }

    #[test]
    fn test_seek_to_command() {
        let mut store = store_with(&["aa\n", "bbb\n", "c\n"]);
        assert_eq!(store.seek_to_command(1, 1).unwrap(), 4);
        assert!(matches!(
            store.seek_to_command(3, 0),
            Err(StoreError::OutOfRange)
        ));
    }

    #[test]
    fn test_command_end_uses_next_command_or_extent() {
        let mut store = store_with(&["aa\n", "bbb\n", "c\n"]);
        assert_eq!(command_end(&mut store, 0).unwrap(), 3);
        assert_eq!(command_end(&mut store, 1).unwrap(), 7);
        // Newest command: falls back to the log extent.
        assert_eq!(command_end(&mut store, 2).unwrap(), 9);
    }

    #[test]
    fn test_seek_past_end_reads_nothing() {
        let mut store = store_with(&["aa\n"]);
        let pos = store.seek(SeekFrom::End(10)).unwrap();
        assert_eq!(pos, 13);
        let mut buf = [0u8; 8];
        assert_eq!(store.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_seek_before_start_is_invalid_input() {
        let mut store = store_with(&["aa\n"]);
        let err = store.seek(SeekFrom::End(-10)).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_append_hands_back_evicted_entry() {
        let mut store = RingStore::new(2);
        assert!(store.append(b"a\n".to_vec()).unwrap().is_none());
        assert!(store.append(b"b\n".to_vec()).unwrap().is_none());
        let evicted = store.append(b"c\n".to_vec()).unwrap();
        assert_eq!(evicted.unwrap().as_bytes(), b"a\n");
    }

    #[test]
    fn test_concurrent_appends_serialize_under_lock() {
        use std::sync::Arc;
        use std::thread;

        const WORKERS: usize = 8;
        const COMMANDS: usize = 25;

        let store = shared(RingStore::new(WORKERS * COMMANDS));
        let mut handles = Vec::new();
        for worker in 0..WORKERS {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for i in 0..COMMANDS {
                    let line = format!("w{worker}-{i}\n").into_bytes();
                    let mut guard = store.lock().unwrap();
                    let _ = guard.append(line).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let mut guard = store.lock().unwrap();
        let total = guard.total_length().unwrap();
        let dump = guard.read_range(0, total as usize).unwrap();
        let lines: Vec<&[u8]> = dump.split_inclusive(|&b| b == b'\n').collect();
        assert_eq!(lines.len(), WORKERS * COMMANDS);
        // Every appended command survives intact, in some serialized order.
        for worker in 0..WORKERS {
            for i in 0..COMMANDS {
                let expected = format!("w{worker}-{i}\n");
                assert!(
                    lines.contains(&expected.as_bytes()),
                    "missing command {expected:?}"
                );
            }
        }
    }
}
