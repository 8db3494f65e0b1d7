// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Periodic timestamp appender (in-process variant only).
//!
//! The external-device variant manages its own temporal bookkeeping, so the
//! supervisor never spawns this task for it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Local;

use crate::logging::{Facility, Logger};
use crate::store::SharedStore;
use crate::{log_debug, log_error};

/// Format one timestamp command: year, month, day, hour (24h), minute,
/// second, newline-terminated like every other log entry.
fn format_timestamp() -> Vec<u8> {
    Local::now()
        .format("timestamp:%Y, %m, %d, %H, %M, %S\n")
        .to_string()
        .into_bytes()
}

/// Spawn the timestamp thread: appends one timestamp command to the shared
/// store every `period`, checking the shutdown flag at least once per second
/// so cancellation is never delayed by a full period.
pub fn spawn(
    store: SharedStore,
    shutdown: Arc<AtomicBool>,
    period: Duration,
    logger: Logger,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("timestamp".to_string())
        .spawn(move || run(store, shutdown, period, logger))
        .context("failed to spawn timestamp thread")
}

fn run(store: SharedStore, shutdown: Arc<AtomicBool>, period: Duration, logger: Logger) {
    let slice = Duration::from_secs(1).min(period);
    loop {
        // Sleep the period in slices; each slice boundary is a safe point.
        let mut slept = Duration::ZERO;
        while slept < period {
            if shutdown.load(Ordering::Relaxed) {
                log_debug!(logger, Facility::Timer, "Timestamp task cancelled");
                return;
            }
            let nap = slice.min(period - slept);
            std::thread::sleep(nap);
            slept += nap;
        }

        if let Err(e) = tick(&store) {
            // One failed tick terminates the task but never the server.
            log_error!(
                logger,
                Facility::Timer,
                &format!("Timestamp append failed: {e:#}")
            );
            return;
        }
        log_debug!(logger, Facility::Timer, "Appended timestamp entry");
    }
}

fn tick(store: &SharedStore) -> Result<()> {
    let mut guard = store.lock().map_err(|_| anyhow!("store lock poisoned"))?;
    let evicted = guard.append(format_timestamp())?;
    drop(evicted); // eviction release, same contract as the workers
    Ok(())
}
