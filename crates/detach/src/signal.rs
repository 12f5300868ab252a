//! Process-wide SIGCHLD policy: save, ignore, restore.
//!
//! A forked child that exits is not reaped unless the parent waits on it or
//! SIGCHLD is set to `SIG_IGN`, in which case the kernel reaps it
//! automatically and no zombie ever exists. Launches engage the ignore
//! disposition for their lifetime and reinstate whatever was there before
//! once the last in-flight launch settles.
//!
//! The disposition is process-wide mutable state, so engage/disengage is
//! depth-counted behind a mutex: the first engage captures the ambient
//! `sigaction` and installs `SIG_IGN`, nested engages only bump the count,
//! and the last disengage reinstates the capture. Uses `sigaction` (not
//! `signal`) for well-defined, non-resetting behavior across platforms.

use std::io;
use std::sync::{Mutex, PoisonError};

/// SIGCHLD disposition captured before the override, opaque to callers.
///
/// Handed to the forked child so it can reinstate the ambient disposition
/// in itself without touching [`POLICY`] — the mutex may be held by another
/// parent thread at fork time and must not be locked in the child.
#[derive(Clone, Copy)]
pub(crate) struct SavedDisposition(libc::sigaction);

struct Policy {
    depth: usize,
    prior: Option<SavedDisposition>,
}

static POLICY: Mutex<Policy> = Mutex::new(Policy {
    depth: 0,
    prior: None,
});

fn ignore_action() -> libc::sigaction {
    // SAFETY: zeroed sigaction is valid; we fill sa_sigaction and sa_flags.
    let mut sa: libc::sigaction = unsafe { std::mem::zeroed() };
    sa.sa_sigaction = libc::SIG_IGN;
    sa.sa_flags = libc::SA_RESTART;
    sa
}

/// Install `SIG_IGN` for SIGCHLD, capturing the prior disposition on the
/// first engage. Returns the ambient (pre-override) disposition.
fn push_ignore() -> io::Result<SavedDisposition> {
    let mut policy = POLICY.lock().unwrap_or_else(PoisonError::into_inner);
    if policy.prior.is_none() {
        let ignore = ignore_action();
        // SAFETY: zeroed sigaction is a valid out-parameter; SIGCHLD is a
        // valid signal number; `ignore` is fully initialized above.
        let mut old: libc::sigaction = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::sigaction(libc::SIGCHLD, &ignore, &mut old) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        policy.prior = Some(SavedDisposition(old));
    }
    policy.depth += 1;
    policy
        .prior
        .ok_or_else(|| io::Error::other("SIGCHLD disposition missing after capture"))
}

/// Undo one engage; the last one reinstates the captured disposition.
fn pop_restore() {
    let mut policy = POLICY.lock().unwrap_or_else(PoisonError::into_inner);
    policy.depth = policy.depth.saturating_sub(1);
    if policy.depth == 0
        && let Some(SavedDisposition(prior)) = policy.prior.take()
    {
        // SAFETY: `prior` was captured by a successful sigaction call;
        // reinstating it cannot fail for a valid signal number.
        unsafe {
            libc::sigaction(libc::SIGCHLD, &prior, std::ptr::null_mut());
        }
    }
}

/// Reinstate a captured disposition directly. Called in the forked child,
/// which must not lock [`POLICY`].
pub(crate) fn reinstate(saved: SavedDisposition) {
    let SavedDisposition(sa) = saved;
    // SAFETY: `sa` was captured by a successful sigaction call.
    unsafe {
        libc::sigaction(libc::SIGCHLD, &sa, std::ptr::null_mut());
    }
}

/// RAII engage of the ignore policy; disengages on drop.
///
/// Owned by the collector task, so the disposition is reinstated whenever a
/// launch settles, on every settlement path.
pub(crate) struct SigchldGuard {
    ambient: SavedDisposition,
}

impl SigchldGuard {
    pub(crate) fn engage() -> io::Result<Self> {
        push_ignore().map(|ambient| Self { ambient })
    }

    /// The pre-override disposition, for the forked child to reinstate.
    pub(crate) fn ambient(&self) -> SavedDisposition {
        self.ambient
    }
}

impl Drop for SigchldGuard {
    fn drop(&mut self) {
        pop_restore();
    }
}

/// Tests that alter the SIGCHLD disposition must not interleave with tests
/// that wait on spawned processes: while the ignore disposition is active
/// the kernel auto-reaps, and a concurrent `waitpid` comes back ECHILD.
#[cfg(test)]
pub(crate) static SIGCHLD_TEST_LOCK: Mutex<()> = Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;

    fn current_handler() -> libc::sighandler_t {
        let mut cur: libc::sigaction = unsafe { std::mem::zeroed() };
        unsafe {
            libc::sigaction(libc::SIGCHLD, std::ptr::null(), &mut cur);
        }
        cur.sa_sigaction
    }

    // One test covering the whole engage/nest/disengage sequence: these
    // assertions read process-wide state and must not interleave.
    #[test]
    fn nested_engage_restores_only_after_last_drop() {
        let _serial = SIGCHLD_TEST_LOCK
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = current_handler();
        assert_ne!(before, libc::SIG_IGN);

        let outer = SigchldGuard::engage().unwrap();
        assert_eq!(current_handler(), libc::SIG_IGN);

        let inner = SigchldGuard::engage().unwrap();
        assert_eq!(current_handler(), libc::SIG_IGN);

        drop(inner);
        assert_eq!(current_handler(), libc::SIG_IGN);

        drop(outer);
        assert_eq!(current_handler(), before);
    }
}
