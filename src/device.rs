// SPDX-License-Identifier: Apache-2.0 OR MIT

//! External-device store variant.
//!
//! Instead of the in-process ring log, the accumulated commands live in a
//! log-capable character device that performs its own eviction and offset
//! translation. Appends are plain writes, dumps are plain seek/read, and
//! seek-by-command goes through the device's seek ioctl. The device keeps
//! its own temporal bookkeeping, so the timestamp task is disabled for this
//! variant.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use crate::ringlog::Entry;
use crate::store::{LogStore, StoreError};

/// Seek request understood by the device: a zero-based command index plus a
/// byte offset within that command. Layout fixed by the device ABI.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SeekToCommand {
    pub command: u32,
    pub offset: u32,
}

const LOGDEV_IOC_MAGIC: u8 = 0x16;

// _IOWR(0x16, 1, struct { u32; u32 }) per the device ABI.
nix::ioctl_readwrite!(logdev_seek_to_command, LOGDEV_IOC_MAGIC, 1, SeekToCommand);

/// Store backed by an opened log device node.
#[derive(Debug)]
pub struct DeviceStore {
    file: File,
    path: PathBuf,
}

impl DeviceStore {
    /// Open the device node at `path` for reading and appending.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let file = OpenOptions::new().read(true).append(true).open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Read for DeviceStore {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for DeviceStore {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.file.seek(pos)
    }
}

impl LogStore for DeviceStore {
    fn append(&mut self, bytes: Vec<u8>) -> Result<Option<Entry>, StoreError> {
        use std::io::Write;
        self.file.write_all(&bytes)?;
        // The device evicts internally; there is never storage to hand back.
        Ok(None)
    }

    fn seek_to_command(&mut self, index: u32, intra_offset: u32) -> Result<u64, StoreError> {
        let mut request = SeekToCommand {
            command: index,
            offset: intra_offset,
        };
        // SAFETY: the fd is owned by `self.file` and stays open for the whole
        // call; the request struct matches the ioctl's expected layout.
        let result = unsafe { logdev_seek_to_command(self.file.as_raw_fd(), &mut request) };
        match result {
            Ok(_) => Ok(self.file.stream_position()?),
            // The device reports an unreachable target as EINVAL.
            Err(nix::errno::Errno::EINVAL) => Err(StoreError::OutOfRange),
            Err(errno) => Err(StoreError::Io(std::io::Error::from_raw_os_error(
                errno as i32,
            ))),
        }
    }
}
