// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SIGINT/SIGTERM bridge.
//!
//! Signal handlers can only touch a process-level flag; everything else
//! about shutdown flows through the supervisor's explicit token. The
//! supervisor polls [`termination_requested`] in its accept loop and turns
//! it into the cooperative broadcast the workers and the timestamp task see.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

static TERMINATION_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_termination(_signum: libc::c_int) {
    TERMINATION_REQUESTED.store(true, Ordering::Relaxed);
}

/// Install handlers for SIGINT and SIGTERM.
///
/// Deliberately without `SA_RESTART`: an in-flight blocking call returns
/// `EINTR` so the polling loops notice the flag immediately.
pub fn install_termination_handlers() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(handle_termination),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only performs an atomic store, which is
        // async-signal-safe.
        unsafe { sigaction(signal, &action) }
            .with_context(|| format!("failed to install {signal} handler"))?;
    }
    Ok(())
}

/// True once SIGINT or SIGTERM has been delivered.
pub fn termination_requested() -> bool {
    TERMINATION_REQUESTED.load(Ordering::Relaxed)
}
