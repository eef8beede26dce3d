//! [`ControlHub`] – operator signals shared with the mission worker.
//!
//! The control surface (REPL, HTTP handlers, Ctrl-C) only ever flips flags
//! here; the mission worker samples them at its suspension points.  Every
//! flag change wakes all pending waits through a [`Notify`], so a `quit`
//! issued during a 30-second poll takes effect immediately instead of at the
//! end of the poll.
//!
//! | Flag | Lifetime |
//! |---|---|
//! | `paused` | cooperative, resumable |
//! | `stopped` | ends the current run |
//! | `quit` | terminal for the session; implies `stopped` |
//! | `emergency` | pending diversion; cleared when the diversion ends |

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tokio::time::Instant;
use tracing::info;
use waypost_types::{Interrupt, PatrolError};

/// Which signals may cut a wait short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOn {
    /// Only `quit`.  Used by the charging and obstacle waits.
    Quit,
    /// `stopped` or `quit`.
    StopOrQuit,
}

// ────────────────────────────────────────────────────────────────────────────
// ControlHub
// ────────────────────────────────────────────────────────────────────────────

/// Cross-task control flags with change notification.
///
/// # Example
///
/// ```
/// use waypost_kernel::control::{CancelOn, ControlHub};
///
/// let hub = ControlHub::new();
/// assert!(hub.pause());
/// assert!(!hub.pause());
/// assert!(hub.resume());
/// assert!(hub.check(CancelOn::StopOrQuit).is_ok());
/// ```
#[derive(Debug, Default)]
pub struct ControlHub {
    paused: AtomicBool,
    stopped: AtomicBool,
    quit: AtomicBool,
    emergency: AtomicBool,
    diverting: AtomicBool,
    changed: Notify,
}

impl ControlHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `paused`.  Returns `false` if it was already set.
    pub fn pause(&self) -> bool {
        let newly = !self.paused.swap(true, Ordering::SeqCst);
        if newly {
            info!("pause requested");
            self.changed.notify_waiters();
        }
        newly
    }

    /// Clear `paused`.  Returns `false` (and does nothing) if it was not set.
    pub fn resume(&self) -> bool {
        let was_paused = self.paused.swap(false, Ordering::SeqCst);
        if was_paused {
            info!("resume requested");
            self.changed.notify_waiters();
        }
        was_paused
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        info!("stop requested");
        self.changed.notify_waiters();
    }

    /// Terminal signal: sets `stopped`, releases any pause, and drops a
    /// pending emergency request.
    pub fn quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        self.emergency.store(false, Ordering::SeqCst);
        info!("quit requested");
        self.changed.notify_waiters();
    }

    /// Ask for a diversion to the safe leg.  Refused while one is running.
    pub fn request_emergency(&self) -> bool {
        if self.diverting.load(Ordering::SeqCst) || self.quit.load(Ordering::SeqCst) {
            return false;
        }
        self.emergency.store(true, Ordering::SeqCst);
        info!("emergency exit requested");
        self.changed.notify_waiters();
        true
    }

    /// Clear every flag, ready for a new run.
    pub fn reset(&self) {
        for flag in [&self.paused, &self.stopped, &self.quit, &self.emergency, &self.diverting] {
            flag.store(false, Ordering::SeqCst);
        }
        self.changed.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_quit(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    pub fn emergency_requested(&self) -> bool {
        self.emergency.load(Ordering::SeqCst)
    }

    pub fn is_diverting(&self) -> bool {
        self.diverting.load(Ordering::SeqCst)
    }

    /// `Err(Interrupted)` if a signal selected by `cancel` is raised.
    pub fn check(&self, cancel: CancelOn) -> Result<(), PatrolError> {
        if self.is_quit() {
            return Err(PatrolError::Interrupted(Interrupt::Quit));
        }
        if cancel == CancelOn::StopOrQuit && self.is_stopped() {
            return Err(PatrolError::Interrupted(Interrupt::Stopped));
        }
        Ok(())
    }

    /// Future resolving on the next flag change.
    ///
    /// Call [`Notified::enable`] on the pinned future *before* re-checking
    /// flags, otherwise a change between the check and the await is missed.
    pub fn notified(&self) -> Notified<'_> {
        self.changed.notified()
    }

    /// Sleep for `duration`, returning early with `Err(Interrupted)` as soon
    /// as a signal selected by `cancel` is raised.
    pub async fn sleep(&self, duration: Duration, cancel: CancelOn) -> Result<(), PatrolError> {
        let deadline = Instant::now() + duration;
        loop {
            let notified = self.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            self.check(cancel)?;
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return Ok(()),
                _ = &mut notified => {}
            }
        }
    }

    /// Block while `paused` is set.  Returns whether any waiting happened.
    pub async fn wait_while_paused(&self, cancel: CancelOn) -> Result<bool, PatrolError> {
        let mut waited = false;
        loop {
            let notified = self.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            self.check(cancel)?;
            if !self.is_paused() {
                return Ok(waited);
            }
            waited = true;
            notified.await;
        }
    }

    /// Mark a diversion as running.
    ///
    /// Returns `None` when one is already in progress.  Dropping the guard
    /// clears both the in-progress mark and the emergency request, whatever
    /// the diversion's outcome.
    pub fn begin_diversion(&self) -> Option<DiversionGuard<'_>> {
        if self.diverting.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(DiversionGuard { hub: self })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Diversion guard
// ────────────────────────────────────────────────────────────────────────────

/// RAII marker for a running diversion.  See [`ControlHub::begin_diversion`].
#[derive(Debug)]
pub struct DiversionGuard<'a> {
    hub: &'a ControlHub,
}

impl Drop for DiversionGuard<'_> {
    fn drop(&mut self) {
        self.hub.emergency.store(false, Ordering::SeqCst);
        self.hub.diverting.store(false, Ordering::SeqCst);
        self.hub.changed.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn pause_is_idempotent() {
        let hub = ControlHub::new();
        assert!(hub.pause());
        assert!(!hub.pause());
        assert!(hub.is_paused());
        assert!(hub.resume());
        assert!(!hub.is_paused());
    }

    #[test]
    fn resume_without_pause_is_noop() {
        let hub = ControlHub::new();
        assert!(!hub.resume());
        assert!(!hub.is_paused());
    }

    #[test]
    fn quit_implies_stop_and_clears_pause_and_emergency() {
        let hub = ControlHub::new();
        hub.pause();
        assert!(hub.request_emergency());
        hub.quit();
        assert!(hub.is_quit());
        assert!(hub.is_stopped());
        assert!(!hub.is_paused());
        assert!(!hub.emergency_requested());
    }

    #[test]
    fn check_respects_cancel_mode() {
        let hub = ControlHub::new();
        hub.stop();
        assert!(hub.check(CancelOn::Quit).is_ok());
        assert_eq!(
            hub.check(CancelOn::StopOrQuit),
            Err(PatrolError::Interrupted(Interrupt::Stopped))
        );
        hub.quit();
        assert_eq!(hub.check(CancelOn::Quit), Err(PatrolError::Interrupted(Interrupt::Quit)));
    }

    #[test]
    fn reset_clears_everything() {
        let hub = ControlHub::new();
        hub.pause();
        hub.quit();
        hub.reset();
        assert!(!hub.is_paused() && !hub.is_stopped() && !hub.is_quit());
        assert!(hub.check(CancelOn::StopOrQuit).is_ok());
    }

    #[test]
    fn diversion_guard_is_exclusive_and_clears_request() {
        let hub = ControlHub::new();
        assert!(hub.request_emergency());
        let guard = hub.begin_diversion().expect("first diversion");
        assert!(hub.begin_diversion().is_none());
        assert!(!hub.request_emergency(), "no new request while diverting");
        drop(guard);
        assert!(!hub.emergency_requested());
        assert!(!hub.is_diverting());
        assert!(hub.request_emergency());
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_runs_to_deadline_without_signals() {
        let hub = ControlHub::new();
        let start = Instant::now();
        hub.sleep(Duration::from_secs(10), CancelOn::StopOrQuit).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn quit_cuts_sleep_short() {
        let hub = Arc::new(ControlHub::new());
        let remote = Arc::clone(&hub);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            remote.quit();
        });
        let start = Instant::now();
        let result = hub.sleep(Duration::from_secs(3600), CancelOn::Quit).await;
        assert_eq!(result, Err(PatrolError::Interrupted(Interrupt::Quit)));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_does_not_cut_quit_only_sleep() {
        let hub = Arc::new(ControlHub::new());
        let remote = Arc::clone(&hub);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            remote.stop();
        });
        let start = Instant::now();
        hub.sleep(Duration::from_secs(5), CancelOn::Quit).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_while_paused_returns_on_resume() {
        let hub = Arc::new(ControlHub::new());
        hub.pause();
        let remote = Arc::clone(&hub);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            remote.resume();
        });
        let start = Instant::now();
        assert!(hub.wait_while_paused(CancelOn::StopOrQuit).await.unwrap());
        assert_eq!(start.elapsed(), Duration::from_secs(7));
        assert!(!hub.wait_while_paused(CancelOn::StopOrQuit).await.unwrap());
    }
}
