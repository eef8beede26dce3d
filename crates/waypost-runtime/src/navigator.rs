//! [`LegNavigator`] – one directed hop over one leg, with bounded retries.
//!
//! # Attempt sequence
//!
//! 1. Cancel outstanding motion (stop, settle, drain).
//! 2. Activate the leg's location and fetch its points.
//! 3. Relocate to the hop's start pose, then settle.
//! 4. Poll readiness, send the goal, and monitor until completion.
//!
//! A completion heartbeat only counts once this attempt has seen the goal
//! accepted *and* the robot running; anything earlier is a stale report from
//! a previous goal.  Every failed attempt, including one whose location or
//! waypoints could not be loaded, is retried after a delay.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use waypost_kernel::CancelOn;
use waypost_middleware::protocol::codes;
use waypost_middleware::{Command, HeartbeatStatus, Inbound};
use waypost_types::{Leg, PatrolError, Point};

use crate::config::{MissionConfig, ms};
use crate::link::RobotLink;
use crate::obstacle::ObstacleAvoider;
use crate::relocation::relocate_with_retry;
use crate::waypoints::{activate_location, get_points, resolve};

/// Hops always yield to `stop` and `quit`.
const CANCEL: CancelOn = CancelOn::StopOrQuit;

/// How a hop is driven.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HopOptions {
    /// Travel destination → anchor instead of anchor → destination.
    pub reverse: bool,
    /// Reduced speed and a precision stop on arrival.
    pub emergency: bool,
    pub max_attempts: u32,
}

impl HopOptions {
    pub fn route(reverse: bool, config: &MissionConfig) -> Self {
        Self {
            reverse,
            emergency: false,
            max_attempts: config.hop_attempts,
        }
    }

    pub fn diversion(reverse: bool, config: &MissionConfig) -> Self {
        Self {
            reverse,
            emergency: true,
            max_attempts: config.emergency_hop_attempts,
        }
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq)]
enum Attempt {
    Arrived,
    /// Worth another attempt after `delay`.
    Retry { reason: &'static str, delay: Duration },
}

/// Per-attempt monitoring state.
#[derive(Debug, Default)]
struct Progress {
    started: bool,
    running: bool,
    pauses: u32,
}

impl Progress {
    fn restart(&mut self) {
        self.started = false;
        self.running = false;
    }
}

/// Drives hops over a borrowed link.
pub struct LegNavigator<'a> {
    link: &'a mut RobotLink,
}

impl<'a> LegNavigator<'a> {
    pub fn new(link: &'a mut RobotLink) -> Self {
        Self { link }
    }

    /// Run one hop over `leg`.
    ///
    /// `Ok(true)` on arrival, `Ok(false)` when the hop ran out of attempts or
    /// yielded to a pending emergency.
    ///
    /// # Errors
    ///
    /// `Interrupted` on `stop`/`quit` (a best-effort stop command is sent
    /// first), `Transport` on connection loss.
    #[instrument(skip(self, leg), fields(leg = %leg.location_id, reverse = opts.reverse, emergency = opts.emergency))]
    pub async fn execute_leg(&mut self, leg: &Leg, opts: HopOptions) -> Result<bool, PatrolError> {
        let result = self.attempts(leg, opts).await;
        if let Err(PatrolError::Interrupted(signal)) = &result {
            info!(%signal, "hop interrupted; halting robot");
            let _ = self.link.send(&Command::StopNavigation).await;
        }
        result
    }

    async fn attempts(&mut self, leg: &Leg, opts: HopOptions) -> Result<bool, PatrolError> {
        for attempt in 1..=opts.max_attempts {
            self.link.hub().check(CANCEL)?;
            info!(attempt, max = opts.max_attempts, "hop attempt");

            let delay = match self.attempt(leg, opts).await? {
                Attempt::Arrived => {
                    info!(attempt, "hop complete");
                    return Ok(true);
                }
                Attempt::Retry { reason, delay } => {
                    warn!(attempt, reason, "hop attempt failed");
                    delay
                }
            };

            if attempt == opts.max_attempts {
                break;
            }
            if !opts.emergency && self.link.hub().emergency_requested() {
                info!("emergency pending; abandoning hop");
                return Ok(false);
            }
            self.link.sleep(delay, CANCEL).await?;
        }
        warn!(attempts = opts.max_attempts, "hop attempts exhausted");
        Ok(false)
    }

    async fn attempt(&mut self, leg: &Leg, opts: HopOptions) -> Result<Attempt, PatrolError> {
        let timings = self.link.config().timings.clone();
        let location = leg.location_id.as_str();

        self.link.cancel_navigation(CANCEL).await?;

        let unusable = |reason| Attempt::Retry {
            reason,
            delay: ms(timings.hop_retry_delay_ms),
        };

        if !activate_location(self.link, location, CANCEL).await? {
            return Ok(unusable("location activation failed"));
        }
        let points = get_points(self.link, location, CANCEL).await?;
        if points.is_empty() {
            return Ok(unusable("no waypoints"));
        }
        let poses = match resolve(location, &points) {
            Ok(poses) => poses,
            Err(e) => {
                warn!(error = %e, "unusable waypoints");
                return Ok(unusable("missing waypoint"));
            }
        };
        let (start, end) = poses.hop(opts.reverse);

        let retries = self.link.config().relocate_retries;
        if !relocate_with_retry(self.link, start, retries, CANCEL).await? {
            return Ok(Attempt::Retry {
                reason: "relocation failed",
                delay: ms(timings.relocate_retry_delay_ms),
            });
        }
        self.link.sleep(ms(timings.post_relocate_settle_ms), CANCEL).await?;

        self.navigate_and_wait(location, end, opts).await
    }

    /// Cancel, then poll robot status until it reports idle.
    ///
    /// Never fails the hop: a robot that stays silent is assumed ready.
    async fn ensure_ready(&mut self) -> Result<bool, PatrolError> {
        let timings = self.link.config().timings.clone();
        self.link.cancel_navigation(CANCEL).await?;

        let deadline = Instant::now() + ms(timings.readiness_timeout_ms);
        while Instant::now() < deadline {
            self.link.send(&Command::RobotStatus).await?;
            let window = deadline
                .saturating_duration_since(Instant::now())
                .min(ms(timings.readiness_poll_ms));
            let ready = self
                .link
                .wait_for(window, CANCEL, |m| match m {
                    Inbound::RobotStatus { code: Some(c) }
                        if *c == codes::HB_COMPLETE || *c == codes::ROBOT_IDLE =>
                    {
                        Some(())
                    }
                    _ => None,
                })
                .await?;
            if ready.is_some() {
                debug!("robot ready");
                return Ok(true);
            }
        }
        warn!("robot readiness not confirmed; continuing");
        Ok(false)
    }

    async fn navigate_and_wait(
        &mut self,
        location: &str,
        end: Point,
        opts: HopOptions,
    ) -> Result<Attempt, PatrolError> {
        let config = self.link.config().clone();
        let timings = &config.timings;
        let speed = if opts.emergency { config.emergency_speed } else { config.cruise_speed };
        let goal = Command::navigate(end, speed);

        self.ensure_ready().await?;
        info!(%end, speed, "navigating");
        self.link.send(&goal).await?;

        let mut progress = Progress::default();
        let mut avoider = ObstacleAvoider::new();
        let mut deadline = Instant::now() + ms(timings.navigation_timeout_ms);

        loop {
            if self.link.hub().is_paused() {
                self.hold_for_pause(&mut progress).await?;
                self.link.send(&goal).await?;
                progress.restart();
                deadline = Instant::now() + ms(timings.navigation_timeout_ms);
                info!("navigation resumed");
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Attempt::Retry {
                    reason: "navigation timed out",
                    delay: ms(timings.hop_retry_delay_ms),
                });
            }
            let Some(msg) = self
                .link
                .receive(remaining.min(ms(timings.navigation_poll_ms)), CANCEL)
                .await?
            else {
                continue;
            };

            if msg.is_navigation_accepted() {
                debug!("goal accepted");
                progress.started = true;
                continue;
            }
            match msg.heartbeat() {
                Some(HeartbeatStatus::Running) => {
                    if !progress.running {
                        debug!("robot running");
                    }
                    progress.running = true;
                }
                Some(HeartbeatStatus::Complete) if progress.started && progress.running => {
                    if opts.emergency {
                        self.precision_stop().await?;
                    }
                    return Ok(Attempt::Arrived);
                }
                Some(HeartbeatStatus::Complete) => {
                    debug!(started = progress.started, running = progress.running, "stale completion discarded");
                }
                Some(HeartbeatStatus::Obstacle) => {
                    if !avoider.handle(self.link, location).await? {
                        return Ok(Attempt::Retry {
                            reason: "obstacle avoidance exhausted",
                            delay: ms(timings.hop_retry_delay_ms),
                        });
                    }
                }
                Some(HeartbeatStatus::EmergencyStop) => {
                    return Ok(Attempt::Retry {
                        reason: "robot emergency stop",
                        delay: ms(timings.hop_retry_delay_ms),
                    });
                }
                _ => {}
            }
        }
    }

    /// Halt, wait out the pause, and prepare to re-send the goal.
    async fn hold_for_pause(&mut self, progress: &mut Progress) -> Result<(), PatrolError> {
        let timings = self.link.config().timings.clone();
        progress.pauses += 1;
        info!(pauses = progress.pauses, "navigation paused");

        self.link.send(&Command::StopNavigation).await?;
        self.link.sleep(ms(timings.cancel_settle_ms), CANCEL).await?;
        self.link.drain(CANCEL).await?;
        self.link.hub().wait_while_paused(CANCEL).await?;

        if progress.pauses > 1 {
            self.ensure_ready().await?;
            self.link.sleep(ms(timings.resume_settle_ms * 2), CANCEL).await?;
        } else {
            self.link.sleep(ms(timings.resume_settle_ms), CANCEL).await?;
        }
        Ok(())
    }

    /// Stop burst at the goal, then read back robot status for the log.
    async fn precision_stop(&mut self) -> Result<(), PatrolError> {
        let timings = self.link.config().timings.clone();
        self.link.stop_burst(ms(timings.stop_burst_interval_ms), CANCEL).await?;
        self.link.sleep(ms(timings.cancel_settle_ms), CANCEL).await?;
        self.link.send(&Command::RobotStatus).await?;
        let status = self
            .link
            .wait_for(ms(timings.status_readback_timeout_ms), CANCEL, |m| match m {
                Inbound::RobotStatus { code } => Some(*code),
                _ => None,
            })
            .await?;
        info!(?status, "precision stop complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::WorkerContext;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use waypost_middleware::sim::{NavScript, SimHandle};
    use waypost_types::Interrupt;

    fn sim() -> SimHandle {
        SimHandle::new().with_location("map-a", Point::new(0.0, 0.0, 0.0), Point::new(8.0, 0.0, 0.0))
    }

    fn link(sim: &SimHandle) -> RobotLink {
        RobotLink::new(Box::new(sim.transport()), WorkerContext::new(MissionConfig::default()))
    }

    fn leg() -> Leg {
        Leg { location_id: "map-a".into(), sequence_index: 0 }
    }

    fn goals(sim: &SimHandle) -> Vec<Command> {
        sim.sent().into_iter().filter(|c| matches!(c, Command::StartNavigation { .. })).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn forward_hop_relocates_to_anchor_and_drives_to_destination() {
        let sim = sim();
        let mut link = link(&sim);
        let opts = HopOptions::route(false, link.config());
        assert!(LegNavigator::new(&mut link).execute_leg(&leg(), opts).await.unwrap());

        let relocs: Vec<_> = sim
            .sent()
            .into_iter()
            .filter(|c| matches!(c, Command::ForceRelocate { .. }))
            .collect();
        assert!(matches!(relocs[0], Command::ForceRelocate { x, mode: 2, .. } if x == 0.0));
        assert!(matches!(goals(&sim)[0], Command::StartNavigation { x, speed, .. } if x == 8.0 && speed == 0.5));
    }

    #[tokio::test(start_paused = true)]
    async fn reverse_emergency_hop_uses_slow_speed_and_stop_burst() {
        let sim = sim();
        let mut link = link(&sim);
        let opts = HopOptions::diversion(true, link.config());
        assert!(LegNavigator::new(&mut link).execute_leg(&leg(), opts).await.unwrap());

        assert!(matches!(
            sim.sent().iter().find(|c| matches!(c, Command::ForceRelocate { .. })),
            Some(Command::ForceRelocate { x, .. }) if *x == 8.0
        ));
        assert!(matches!(goals(&sim)[0], Command::StartNavigation { x, speed, .. } if x == 0.0 && speed == 0.15));

        let sent = sim.sent();
        let goal_at = sent.iter().position(|c| matches!(c, Command::StartNavigation { .. })).unwrap();
        let stops_after = sent[goal_at..].iter().filter(|c| **c == Command::StopNavigation).count();
        assert_eq!(stops_after, 3);
        assert_eq!(sent.last(), Some(&Command::RobotStatus));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_completion_is_not_success() {
        let sim = sim();
        sim.push_nav(NavScript::StaleCompletion);
        let mut link = link(&sim);
        let opts = HopOptions::route(false, link.config());
        assert!(LegNavigator::new(&mut link).execute_leg(&leg(), opts).await.unwrap());
        assert_eq!(goals(&sim).len(), 2, "stale 2006 must force a second attempt");
    }

    #[tokio::test(start_paused = true)]
    async fn robot_emergency_stop_fails_attempt() {
        let sim = sim();
        sim.set_default_nav(NavScript::EmergencyStop);
        let mut link = link(&sim);
        let opts = HopOptions { max_attempts: 2, ..HopOptions::route(false, link.config()) };
        assert!(!LegNavigator::new(&mut link).execute_leg(&leg(), opts).await.unwrap());
        assert_eq!(goals(&sim).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_robot_times_out_after_navigation_window() {
        let sim = sim();
        sim.set_default_nav(NavScript::Silent);
        let mut link = link(&sim);
        let opts = HopOptions { max_attempts: 1, ..HopOptions::route(false, link.config()) };
        let start = Instant::now();
        assert!(!LegNavigator::new(&mut link).execute_leg(&leg(), opts).await.unwrap());
        assert!(start.elapsed() >= Duration::from_secs(180));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_location_is_retried_every_attempt() {
        let sim = SimHandle::new().with_empty_location("map-a");
        let mut link = link(&sim);
        let opts = HopOptions { max_attempts: 3, ..HopOptions::route(false, link.config()) };
        let start = Instant::now();
        assert!(!LegNavigator::new(&mut link).execute_leg(&leg(), opts).await.unwrap());
        assert_eq!(sim.count("request_set_map"), 3);
        assert_eq!(sim.count("request_point_list"), 3);
        assert_eq!(sim.count("request_force_relocate"), 0);
        assert!(start.elapsed() >= Duration::from_millis(2 * link.config().timings.hop_retry_delay_ms));
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_activation_is_retried_every_attempt() {
        let sim = sim();
        sim.set_unresponsive_location("map-a");
        let mut link = link(&sim);
        let opts = HopOptions { max_attempts: 3, ..HopOptions::route(false, link.config()) };
        assert!(!LegNavigator::new(&mut link).execute_leg(&leg(), opts).await.unwrap());
        assert_eq!(sim.count("request_set_map"), 3);
        assert_eq!(sim.count("request_point_list"), 0);
        assert!(goals(&sim).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn obstacle_cleared_then_completes() {
        let sim = sim();
        sim.push_nav(NavScript::Obstacle);
        sim.set_path_clear(true);
        let mut link = link(&sim);
        let opts = HopOptions::route(false, link.config());
        assert!(LegNavigator::new(&mut link).execute_leg(&leg(), opts).await.unwrap());
        assert_eq!(sim.count("request_check_path"), 1);
        assert_eq!(goals(&sim).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_mid_hop_resends_goal_on_resume() {
        let sim = sim();
        sim.push_nav(NavScript::Silent);
        let mut link = link(&sim);
        let hub = Arc::clone(&link.ctx().hub);
        let pauser = Arc::clone(&hub);
        let armed = Arc::new(AtomicBool::new(true));
        sim.on_command(move |c| {
            if matches!(c, Command::StartNavigation { .. }) && armed.swap(false, Ordering::SeqCst) {
                pauser.pause();
            }
        });
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            hub.resume();
        });

        let opts = HopOptions::route(false, link.config());
        let ok = LegNavigator::new(&mut link).execute_leg(&leg(), opts).await.unwrap();
        assert!(ok);
        assert_eq!(goals(&sim).len(), 2, "goal must be re-sent after resume");
    }

    #[tokio::test(start_paused = true)]
    async fn second_pause_polls_readiness_before_resending_goal() {
        let sim = sim();
        sim.push_nav(NavScript::Silent);
        sim.push_nav(NavScript::Silent);
        let mut link = link(&sim);
        let hub = Arc::clone(&link.ctx().hub);
        let pauser = Arc::clone(&hub);
        let pauses_left = Arc::new(AtomicU32::new(2));
        sim.on_command(move |c| {
            if matches!(c, Command::StartNavigation { .. })
                && pauses_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                pauser.pause();
            }
        });
        tokio::spawn(async move {
            for _ in 0..2 {
                tokio::time::sleep(Duration::from_secs(30)).await;
                hub.resume();
            }
        });

        let opts = HopOptions::route(false, link.config());
        assert!(LegNavigator::new(&mut link).execute_leg(&leg(), opts).await.unwrap());

        let sent = sim.sent();
        let at: Vec<usize> = sent
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, Command::StartNavigation { .. }))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(at.len(), 3);
        let status_polls =
            |from: usize, to: usize| sent[from..to].iter().filter(|c| **c == Command::RobotStatus).count();
        assert_eq!(status_polls(0, at[0]), 1);
        assert_eq!(status_polls(at[0], at[1]), 0, "first resume goes straight back to the goal");
        assert!(status_polls(at[1], at[2]) >= 1, "second resume must confirm readiness");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_hop_and_halts_robot() {
        let sim = sim();
        sim.set_default_nav(NavScript::Silent);
        let mut link = link(&sim);
        let hub = Arc::clone(&link.ctx().hub);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            hub.stop();
        });
        let opts = HopOptions::route(false, link.config());
        let result = LegNavigator::new(&mut link).execute_leg(&leg(), opts).await;
        assert_eq!(result, Err(PatrolError::Interrupted(Interrupt::Stopped)));
        assert_eq!(sim.sent().last(), Some(&Command::StopNavigation));
    }

    #[tokio::test(start_paused = true)]
    async fn pending_emergency_abandons_route_hop_between_attempts() {
        let sim = sim();
        sim.set_default_nav(NavScript::EmergencyStop);
        let mut link = link(&sim);
        link.ctx().hub.request_emergency();
        let opts = HopOptions::route(false, link.config());
        assert!(!LegNavigator::new(&mut link).execute_leg(&leg(), opts).await.unwrap());
        assert_eq!(goals(&sim).len(), 1);
    }
}
