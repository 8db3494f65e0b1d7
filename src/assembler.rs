// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Command assembly from an arbitrarily chunked byte stream.
//!
//! This module provides a stateful parser for the newline-delimited command
//! stream received from clients. It handles partial reads and buffers data
//! until complete commands are available.

/// Helper for reassembling newline-terminated commands from a stream.
///
/// Each command consists of any previously buffered partial bytes plus chunk
/// bytes up to and including the `\n` separator. Bytes after the last
/// separator are retained across calls; there is no upper bound on a pending
/// partial line, the buffer grows as needed.
///
/// Invariant: concatenating all emitted commands plus the pending partial
/// buffer reproduces exactly the bytes fed, in order, regardless of how the
/// stream was chunked.
#[derive(Debug)]
pub struct CommandAssembler {
    partial: Vec<u8>,
}

impl CommandAssembler {
    pub fn new() -> Self {
        Self {
            partial: Vec::with_capacity(1024),
        }
    }

    /// Process newly received bytes and return any completed commands.
    ///
    /// A chunk with no separator emits nothing and extends the partial
    /// buffer. A zero-length receive is a half-close signal interpreted by
    /// the caller and must not be fed here.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        debug_assert!(!chunk.is_empty(), "half-close must not be fed");

        let mut commands = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let mut command = std::mem::take(&mut self.partial);
            command.extend_from_slice(&rest[..=pos]);
            commands.push(command);
            rest = &rest[pos + 1..];
        }
        self.partial.extend_from_slice(rest);
        commands
    }

    /// Bytes buffered for an as-yet unterminated line.
    pub fn pending(&self) -> &[u8] {
        &self.partial
    }
}

impl Default for CommandAssembler {
    fn default() -> Self {
        Self::new()
    }
}
