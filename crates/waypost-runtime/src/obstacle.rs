//! Obstacle recovery during a hop.
//!
//! Strategies run in fixed order until one succeeds:
//!
//! | # | Strategy | Success |
//! |---|---|---|
//! | 1 | wait for clearance | path-clear heartbeat within the window |
//! | 2 | alternative path | assumed after a settle |
//! | 3 | reduce speed | always |
//!
//! Only `quit` may cut the waits short.

use tracing::{info, warn};
use waypost_kernel::CancelOn;
use waypost_middleware::{Command, HeartbeatStatus, Topic};
use waypost_types::{EventPayload, PatrolError};

use crate::config::ms;
use crate::link::RobotLink;

const SOURCE: &str = "waypost-runtime::obstacle";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObstacleState {
    #[default]
    Clear,
    Detected,
    Avoiding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    WaitForClearance,
    AlternativePath,
    ReduceSpeed,
}

impl Strategy {
    pub const ORDER: [Strategy; 3] =
        [Strategy::WaitForClearance, Strategy::AlternativePath, Strategy::ReduceSpeed];
}

/// Tracks one hop's obstacle recovery.
#[derive(Debug, Default)]
pub struct ObstacleAvoider {
    state: ObstacleState,
    handled: u32,
}

impl ObstacleAvoider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ObstacleState {
        self.state
    }

    /// Obstacles handled so far on this hop.
    pub fn handled(&self) -> u32 {
        self.handled
    }

    /// Run the strategies in order.  `Ok(false)` when all of them fail.
    ///
    /// The state is back to [`ObstacleState::Clear`] on every return.
    pub async fn handle(&mut self, link: &mut RobotLink, location_id: &str) -> Result<bool, PatrolError> {
        self.state = ObstacleState::Detected;
        self.handled += 1;
        warn!(location_id, count = self.handled, "obstacle detected");
        link.ctx().announce(
            Topic::Alerts,
            SOURCE,
            EventPayload::Obstacle { location_id: location_id.to_string(), cleared: false },
        );

        self.state = ObstacleState::Avoiding;
        let outcome = self.run_strategies(link).await;
        self.state = ObstacleState::Clear;

        let cleared = outcome?;
        if cleared {
            link.ctx().announce(
                Topic::Alerts,
                SOURCE,
                EventPayload::Obstacle { location_id: location_id.to_string(), cleared: true },
            );
        } else {
            warn!(location_id, "obstacle avoidance exhausted");
        }
        Ok(cleared)
    }

    async fn run_strategies(&self, link: &mut RobotLink) -> Result<bool, PatrolError> {
        for strategy in Strategy::ORDER {
            let ok = match strategy {
                Strategy::WaitForClearance => wait_for_clearance(link).await?,
                Strategy::AlternativePath => alternative_path(link).await?,
                Strategy::ReduceSpeed => true,
            };
            if ok {
                info!(?strategy, "obstacle resolved");
                return Ok(true);
            }
            info!(?strategy, "strategy did not clear the obstacle");
        }
        Ok(false)
    }
}

async fn wait_for_clearance(link: &mut RobotLink) -> Result<bool, PatrolError> {
    let timings = link.config().timings.clone();
    let deadline = tokio::time::Instant::now() + ms(timings.obstacle_wait_ms);
    while tokio::time::Instant::now() < deadline {
        link.send(&Command::CheckPath).await?;
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let window = remaining.min(ms(timings.obstacle_poll_ms));
        let clear = link
            .wait_for(window, CancelOn::Quit, |m| {
                (m.heartbeat() == Some(HeartbeatStatus::PathClear)).then_some(())
            })
            .await?;
        if clear.is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn alternative_path(link: &mut RobotLink) -> Result<bool, PatrolError> {
    link.send(&Command::AlternativePath).await?;
    let settle = ms(link.config().timings.alternative_path_settle_ms);
    link.sleep(settle, CancelOn::Quit).await?;
    Ok(true)
}
