//! [`RobotLink`] – one cycle's connection, made cancellable.
//!
//! Pairs the raw [`RobotTransport`] with the [`ControlHub`] so every receive
//! is a deadline-bounded wait that wakes as soon as a cancelling signal is
//! raised.  All protocol primitives (waypoints, relocation, navigation,
//! charging) are written against this type, never against a socket.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace, warn};
use waypost_kernel::{CancelOn, ControlHub, StatusBoard};
use waypost_middleware::{Command, EventBus, Inbound, RobotTransport, Topic};
use waypost_types::{EventPayload, PatrolError};

use crate::config::{MissionConfig, ms};

/// Upper bound on messages discarded by one [`RobotLink::drain`], so a
/// chatty robot cannot keep the worker draining forever.
const DRAIN_LIMIT: usize = 64;

// ────────────────────────────────────────────────────────────────────────────
// Worker context
// ────────────────────────────────────────────────────────────────────────────

/// Everything the mission worker shares with the control surface.
#[derive(Clone)]
pub struct WorkerContext {
    pub hub: Arc<ControlHub>,
    pub board: Arc<StatusBoard>,
    pub bus: EventBus,
    pub config: Arc<MissionConfig>,
}

impl WorkerContext {
    pub fn new(config: MissionConfig) -> Self {
        Self {
            hub: Arc::new(ControlHub::new()),
            board: Arc::new(StatusBoard::new()),
            bus: EventBus::default(),
            config: Arc::new(config),
        }
    }

    /// Best-effort announcement on the event bus.
    pub fn announce(&self, topic: Topic, source: &str, payload: EventPayload) {
        self.bus.announce(topic, source, payload);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RobotLink
// ────────────────────────────────────────────────────────────────────────────

/// A connected robot plus the signals that may interrupt waiting on it.
pub struct RobotLink {
    transport: Box<dyn RobotTransport>,
    ctx: WorkerContext,
}

impl RobotLink {
    pub fn new(transport: Box<dyn RobotTransport>, ctx: WorkerContext) -> Self {
        Self { transport, ctx }
    }

    pub fn ctx(&self) -> &WorkerContext {
        &self.ctx
    }

    pub fn hub(&self) -> &ControlHub {
        &self.ctx.hub
    }

    pub fn config(&self) -> &MissionConfig {
        &self.ctx.config
    }

    pub async fn send(&mut self, command: &Command) -> Result<(), PatrolError> {
        debug!(cmd = command.name(), "send");
        self.transport.send(command).await
    }

    /// Wait up to `timeout` for the next message.
    ///
    /// `Ok(None)` on timeout.  Returns `Err(Interrupted)` as soon as a signal
    /// selected by `cancel` is raised, even mid-wait.
    ///
    /// # Errors
    ///
    /// [`PatrolError::Transport`] when the connection is lost.
    pub async fn receive(
        &mut self,
        timeout: Duration,
        cancel: CancelOn,
    ) -> Result<Option<Inbound>, PatrolError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.ctx.hub.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            self.ctx.hub.check(cancel)?;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            tokio::select! {
                received = self.transport.receive(remaining) => return received,
                _ = &mut notified => {}
            }
        }
    }

    /// Discard messages until `matcher` accepts one or `timeout` elapses.
    pub async fn wait_for<T, F>(
        &mut self,
        timeout: Duration,
        cancel: CancelOn,
        mut matcher: F,
    ) -> Result<Option<T>, PatrolError>
    where
        F: FnMut(&Inbound) -> Option<T>,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match self.receive(remaining, cancel).await? {
                Some(msg) => match matcher(&msg) {
                    Some(found) => return Ok(Some(found)),
                    None => trace!(?msg, "discarded"),
                },
                None => return Ok(None),
            }
        }
    }

    /// Throw away whatever is already buffered.
    pub async fn drain(&mut self, cancel: CancelOn) -> Result<usize, PatrolError> {
        let poll = ms(self.ctx.config.timings.drain_poll_ms);
        let mut dropped = 0;
        while dropped < DRAIN_LIMIT {
            match self.receive(poll, cancel).await? {
                Some(_) => dropped += 1,
                None => break,
            }
        }
        if dropped > 0 {
            debug!(dropped, "drained stale messages");
        }
        Ok(dropped)
    }

    pub async fn sleep(&mut self, duration: Duration, cancel: CancelOn) -> Result<(), PatrolError> {
        self.ctx.hub.sleep(duration, cancel).await
    }

    /// Stop any motion in progress, settle, and clear the inbox.
    pub async fn cancel_navigation(&mut self, cancel: CancelOn) -> Result<(), PatrolError> {
        self.send(&Command::StopNavigation).await?;
        self.sleep(ms(self.ctx.config.timings.cancel_settle_ms), cancel).await?;
        self.drain(cancel).await?;
        Ok(())
    }

    /// Repeated stop commands at short intervals, for a precise halt.
    pub async fn stop_burst(&mut self, interval: Duration, cancel: CancelOn) -> Result<(), PatrolError> {
        let count = self.ctx.config.stop_burst;
        for i in 0..count {
            self.send(&Command::StopNavigation).await?;
            if i + 1 < count {
                self.sleep(interval, cancel).await?;
            }
        }
        Ok(())
    }

    /// Release the connection.  Failures are logged, never raised.
    pub async fn close(mut self) {
        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "closing robot link");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypost_middleware::protocol::codes;
    use waypost_middleware::sim::SimHandle;
    use waypost_types::{Interrupt, Point};

    fn link(sim: &SimHandle) -> RobotLink {
        RobotLink::new(Box::new(sim.transport()), WorkerContext::new(MissionConfig::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn receive_times_out_with_none() {
        let sim = SimHandle::new();
        let mut link = link(&sim);
        let start = Instant::now();
        let got = link.receive(Duration::from_secs(5), CancelOn::Quit).await.unwrap();
        assert!(got.is_none());
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn quit_wakes_pending_receive() {
        let sim = SimHandle::new();
        let mut link = link(&sim);
        let hub = Arc::clone(&link.ctx().hub);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            hub.quit();
        });
        let start = Instant::now();
        let got = link.receive(Duration::from_secs(600), CancelOn::Quit).await;
        assert_eq!(got, Err(PatrolError::Interrupted(Interrupt::Quit)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_does_not_cut_receive_short() {
        let sim = SimHandle::new();
        let mut link = link(&sim);
        let hub = Arc::clone(&link.ctx().hub);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            hub.pause();
        });
        let start = Instant::now();
        let got = link.receive(Duration::from_secs(4), CancelOn::StopOrQuit).await.unwrap();
        assert!(got.is_none());
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_skips_unrelated_messages() {
        let sim = SimHandle::new();
        let mut link = link(&sim);
        link.send(&Command::navigate(Point::new(1.0, 0.0, 0.0), 0.5)).await.unwrap();
        let code = link
            .wait_for(Duration::from_secs(5), CancelOn::Quit, |m| {
                (m.code() == Some(codes::HB_COMPLETE)).then_some(codes::HB_COMPLETE)
            })
            .await
            .unwrap();
        assert_eq!(code, Some(codes::HB_COMPLETE));
    }

    #[tokio::test(start_paused = true)]
    async fn drain_empties_inbox() {
        let sim = SimHandle::new();
        let mut link = link(&sim);
        link.send(&Command::navigate(Point::new(1.0, 0.0, 0.0), 0.5)).await.unwrap();
        assert_eq!(link.drain(CancelOn::Quit).await.unwrap(), 3);
        assert!(link.receive(Duration::from_millis(50), CancelOn::Quit).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_burst_sends_configured_count() {
        let sim = SimHandle::new();
        let mut link = link(&sim);
        link.stop_burst(Duration::from_millis(200), CancelOn::Quit).await.unwrap();
        assert_eq!(sim.count("request_stop_navigation"), 3);
    }
}
