//! SIGINT/SIGTERM turn into a flag the workflow polls between steps and
//! while waiting on external commands. The handler only stores the flag;
//! cleanup always runs from the normal error path.

use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Covers SIGTERM as well through the `termination` feature.
pub fn install_handler() -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst))
}

pub fn requested() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Clears the flag so cleanup commands run to completion. A second signal
/// sets it again.
pub fn acknowledge() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}
