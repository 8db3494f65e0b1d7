// SPDX-License-Identifier: Apache-2.0 OR MIT

//! ringlogd: a bounded append-only log of newline-terminated commands,
//! served over TCP.
//!
//! Clients append commands by writing lines; when a client half-closes
//! its sending side, the accumulated log (or a selected slice of it) is
//! streamed back. The log lives either in process memory as a circular
//! buffer of whole commands ([`ringlog::RingLog`]) or in an external
//! character device driven through the same [`store::LogStore`] contract.

pub mod assembler;
pub mod config;
pub mod device;
pub mod index;
pub mod logging;
pub mod ringlog;
pub mod signals;
pub mod store;
pub mod supervisor;
pub mod timestamp;
pub mod worker;
