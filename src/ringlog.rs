// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bounded circular log of variable-length entries.
//!
//! The log holds at most `capacity` entries. Once full, adding a new entry
//! evicts the oldest one and hands its storage back to the caller. All
//! addressing is either by global byte offset (over the oldest-first
//! concatenation of valid entries) or by logical entry index (0 = oldest).
//!
//! The log itself is not synchronized; concurrent access is coordinated by
//! the store lock in [`crate::store`].

/// One committed command: an owned, immutable byte sequence.
///
/// Created when the assembler completes a line, owned by the slot that holds
/// it, and returned to the caller on eviction so release is enforced by the
/// type system rather than by a manual free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    bytes: Box<[u8]>,
}

impl Entry {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Size of the entry in bytes. Empty entries are valid.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<Vec<u8>> for Entry {
    fn from(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into_boxed_slice(),
        }
    }
}

/// Fixed-capacity circular collection of entries with overwrite-oldest
/// eviction. Never resizes.
#[derive(Debug)]
pub struct RingLog {
    slots: Vec<Option<Entry>>,
    /// Write cursor: next slot to fill.
    in_off: usize,
    /// Read cursor: oldest valid entry when non-empty.
    out_off: usize,
    full: bool,
}

impl RingLog {
    /// Create an empty log with room for `capacity` entries.
    ///
    /// # Panics
    /// Panics if `capacity` is zero. Capacity comes from validated config.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring log capacity must be positive");
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            in_off: 0,
            out_off: 0,
            full: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of currently valid entries.
    pub fn len(&self) -> usize {
        if self.full {
            self.slots.len()
        } else {
            (self.in_off + self.slots.len() - self.out_off) % self.slots.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.full && self.in_off == self.out_off
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Insert `entry` at the write cursor, wrapping.
    ///
    /// Returns the previous oldest entry exactly when the log was full before
    /// the call; the caller owns the returned entry and releases it by
    /// dropping it.
    pub fn add_entry(&mut self, entry: Entry) -> Option<Entry> {
        let capacity = self.slots.len();
        let evicted = if self.full {
            // Write cursor sits on the oldest entry; take it before
            // overwriting and move the read cursor past it.
            let old = self.slots[self.in_off].take();
            self.out_off = (self.out_off + 1) % capacity;
            old
        } else {
            None
        };

        self.slots[self.in_off] = Some(entry);
        self.in_off = (self.in_off + 1) % capacity;
        self.full = self.in_off == self.out_off;

        evicted
    }

    /// Locate the entry covering `global_offset` together with the local
    /// offset within that entry.
    ///
    /// Scans valid entries oldest-first accumulating sizes; O(len). Returns
    /// `None` when `global_offset >= total_bytes()`.
    pub fn find_offset(&self, global_offset: usize) -> Option<(&Entry, usize)> {
        let mut remaining = global_offset;
        for (_, entry) in self.iter() {
            if remaining < entry.len() {
                return Some((entry, remaining));
            }
            remaining -= entry.len();
        }
        None
    }

    /// Iterate valid entries oldest-first as `(logical_index, entry)`.
    ///
    /// A fresh call always starts from the current oldest entry. Callers must
    /// hold the store lock for the whole iteration; mutation during an
    /// in-progress iteration is not supported.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Entry)> {
        let capacity = self.slots.len();
        let len = self.len();
        let out_off = self.out_off;
        (0..len).map(move |logical| {
            let slot = (out_off + logical) % capacity;
            let entry = self.slots[slot]
                .as_ref()
                .unwrap_or_else(|| unreachable!("valid slot {slot} is empty"));
            (logical, entry)
        })
    }

    /// Sum of all valid entries' sizes.
    pub fn total_bytes(&self) -> usize {
        self.iter().map(|(_, e)| e.len()).sum()
    }
}
