// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Addressing by command index and intra-command offset.
//!
//! A command index is the zero-based logical position of an entry among the
//! currently valid entries (0 = oldest). Indices shift after eviction, so a
//! resolution is only meaningful under the same lock acquisition as the read
//! that follows it.

use std::io::SeekFrom;

use crate::ringlog::RingLog;
use crate::store::StoreError;

/// Translate `(command_index, intra_offset)` into a global byte offset.
///
/// Sums the sizes of all valid entries with logical index less than
/// `command_index`, then adds `intra_offset`. Fails with
/// [`StoreError::OutOfRange`] when `command_index` names no currently valid
/// entry or `intra_offset` is at or past that entry's end; an offset inside
/// the log extent but beyond the selected entry never resolves into a
/// neighboring entry.
pub fn resolve(log: &RingLog, command_index: u32, intra_offset: u32) -> Result<u64, StoreError> {
    let command_index = command_index as usize;
    let intra_offset = intra_offset as usize;

    let mut base = 0usize;
    for (logical, entry) in log.iter() {
        if logical == command_index {
            if intra_offset >= entry.len() {
                return Err(StoreError::OutOfRange);
            }
            return Ok((base + intra_offset) as u64);
        }
        base += entry.len();
    }
    Err(StoreError::OutOfRange)
}

/// Standard start/current/end-relative positioning, with `total` (the log's
/// current byte extent) as the logical end.
///
/// Negative targets fail with [`StoreError::OutOfRange`]. Targets past the
/// end are permitted; reads there simply return no bytes, matching ordinary
/// file seek semantics.
pub fn position(current: u64, total: u64, pos: SeekFrom) -> Result<u64, StoreError> {
    let target = match pos {
        SeekFrom::Start(offset) => Some(offset),
        SeekFrom::Current(delta) => current.checked_add_signed(delta),
        SeekFrom::End(delta) => total.checked_add_signed(delta),
    };
    target.ok_or(StoreError::OutOfRange)
}
