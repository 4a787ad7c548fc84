// src/interrupt.rs
//! SIGINT/SIGTERM forwarding to the running job
//!
//! Children run in their own session or process group, so a Ctrl-C aimed
//! at buildterm never reaches them. The handler passes it on instead.

use anyhow::Result;
use buildterm::ProcessManager;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

/// Signal count at which buildterm exits without waiting for its child
const GIVE_UP_AFTER: usize = 3;

/// Stops the forwarding thread when dropped
pub struct InterruptHandler {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

/// Forward SIGINT and SIGTERM to `manager`
///
/// The first signal interrupts the running job (or cancels a replay); the
/// second kills its process group. The thread holds only a weak reference,
/// so dropping the manager still kills and reaps whatever is left.
pub fn install(manager: Weak<ProcessManager>) -> Result<InterruptHandler> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let handle = signals.handle();

    let thread = thread::Builder::new()
        .name("signal-forwarder".into())
        .spawn(move || {
            for (count, signal) in signals.forever().enumerate() {
                if count + 1 >= GIVE_UP_AFTER {
                    warn!("Signal {} received {} times, exiting", signal, count + 1);
                    std::process::exit(128 + signal);
                }
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                match manager.kill_active() {
                    Ok(outcome) => info!("Signal {}: {:?}", signal, outcome),
                    Err(e) => warn!("Signal {} not forwarded: {}", signal, e),
                }
            }
        })?;

    Ok(InterruptHandler {
        handle,
        thread: Some(thread),
    })
}

impl Drop for InterruptHandler {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Signal forwarding thread panicked");
            }
        }
    }
}
