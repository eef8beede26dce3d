//! Emergency diversion to the safe leg.
//!
//! Route planning is a pure function of the robot's position and the safe
//! leg's index:
//!
//! | Position | Plan |
//! |---|---|
//! | at safe | nothing, just stop |
//! | before safe | forward hops `position+1 ..= safe` |
//! | after safe | reverse `position`, reverse `position-1 ..= safe+1`, forward `safe` |
//!
//! The session's phase is not consulted: a reverse-phase robot at `position`
//! gets the same plan as a forward-phase one.
//!
//! Every hop runs in emergency mode; the first failure aborts the diversion.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use waypost_kernel::{CancelOn, MissionSession};
use waypost_middleware::Topic;
use waypost_types::{EventPayload, MissionState, PatrolError, Phase};

use crate::config::ms;
use crate::link::RobotLink;
use crate::navigator::{HopOptions, LegNavigator};

const SOURCE: &str = "waypost-runtime::emergency";

/// One hop of a diversion route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedHop {
    pub leg_index: usize,
    pub reverse: bool,
}

impl PlannedHop {
    fn forward(leg_index: usize) -> Self {
        Self { leg_index, reverse: false }
    }

    fn reverse(leg_index: usize) -> Self {
        Self { leg_index, reverse: true }
    }
}

/// Hops that take the robot from `position` to the safe leg's destination.
///
/// Only `position` decides the plan; callers pass no phase.
pub fn plan_route(position: usize, safe: usize) -> Vec<PlannedHop> {
    if position == safe {
        return Vec::new();
    }
    if position < safe {
        return (position + 1..=safe).map(PlannedHop::forward).collect();
    }
    let mut plan = vec![PlannedHop::reverse(position)];
    plan.extend((safe + 1..position).rev().map(PlannedHop::reverse));
    plan.push(PlannedHop::forward(safe));
    plan
}

/// Drive to the safe leg and halt there.
///
/// `session.position` follows each completed hop.  The emergency request is
/// cleared when this returns, whatever the outcome.
///
/// # Errors
///
/// [`PatrolError::EmergencyFailed`] when a diversion is already running, the
/// safe location is unset or off the route, or a hop fails.  `Interrupted`
/// and `Transport` pass through.
#[instrument(skip(link, session), fields(position = session.position))]
pub async fn divert(
    link: &mut RobotLink,
    session: &mut MissionSession,
    safe_location: Option<&str>,
) -> Result<(), PatrolError> {
    let hub = Arc::clone(&link.ctx().hub);
    let Some(_guard) = hub.begin_diversion() else {
        return Err(PatrolError::EmergencyFailed("a diversion is already running".into()));
    };

    let ctx = link.ctx().clone();
    let safe_location = safe_location
        .ok_or_else(|| PatrolError::EmergencyFailed("no safe location configured".into()))?;
    let safe = session.index_of(safe_location).ok_or_else(|| {
        PatrolError::EmergencyFailed(format!("safe location {safe_location} is not on the route"))
    })?;

    ctx.board.update(|s| s.state = MissionState::Diverting);
    let cycle = ctx.board.snapshot().cycle;
    ctx.announce(
        Topic::Mission,
        SOURCE,
        EventPayload::StateChanged { state: MissionState::Diverting, cycle },
    );

    let plan = plan_route(session.position, safe);
    info!(safe, hops = plan.len(), "diverting to safe leg");

    for hop in plan {
        let leg = session.legs[hop.leg_index].clone();
        let opts = HopOptions::diversion(hop.reverse, &ctx.config);
        if !LegNavigator::new(link).execute_leg(&leg, opts).await? {
            warn!(leg = %leg.location_id, reverse = hop.reverse, "diversion hop failed");
            return Err(PatrolError::EmergencyFailed(format!(
                "hop over {} failed",
                leg.location_id
            )));
        }
        let phase = if hop.reverse { Phase::Reverse } else { Phase::Forward };
        let outcome = session.record(hop.leg_index, phase, true);
        ctx.board.update(|s| {
            s.position = outcome.leg_index;
            s.outcomes.push(outcome.clone());
        });
        ctx.announce(Topic::Mission, SOURCE, EventPayload::HopFinished(outcome));
    }

    link.cancel_navigation(CancelOn::StopOrQuit).await?;
    link.stop_burst(ms(ctx.config.timings.safe_stop_interval_ms), CancelOn::StopOrQuit)
        .await?;
    info!(safe_location, "halted at safe leg");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MissionConfig;
    use crate::link::WorkerContext;
    use waypost_middleware::Command;
    use waypost_middleware::sim::{NavScript, SimHandle};
    use waypost_types::{Leg, Point};

    const IDS: [&str; 4] = ["A", "B", "C", "D"];

    fn sim() -> SimHandle {
        IDS.iter().enumerate().fold(SimHandle::new(), |sim, (i, id)| {
            let x = i as f64 * 10.0;
            sim.with_location(id, Point::new(x, 0.0, 0.0), Point::new(x + 5.0, 0.0, 0.0))
        })
    }

    fn link(sim: &SimHandle) -> RobotLink {
        RobotLink::new(Box::new(sim.transport()), WorkerContext::new(MissionConfig::default()))
    }

    fn session(position: usize) -> MissionSession {
        let mut s = MissionSession::new(Leg::sequence(IDS), "dock");
        s.position = position;
        s
    }

    /// `(location, goal x)` of every navigation goal sent, in order.
    fn goals(sim: &SimHandle) -> Vec<(String, f64)> {
        let mut current = String::new();
        let mut out = Vec::new();
        for c in sim.sent() {
            match c {
                Command::SetMap { map_id } => current = map_id,
                Command::StartNavigation { x, speed, .. } => {
                    assert_eq!(speed, 0.15);
                    out.push((current.clone(), x));
                }
                _ => {}
            }
        }
        out
    }

    #[test]
    fn plan_at_safe_is_empty() {
        assert!(plan_route(1, 1).is_empty());
    }

    #[test]
    fn plan_before_safe_goes_forward() {
        assert_eq!(plan_route(0, 1), vec![PlannedHop::forward(1)]);
        assert_eq!(
            plan_route(0, 3),
            vec![PlannedHop::forward(1), PlannedHop::forward(2), PlannedHop::forward(3)]
        );
    }

    #[test]
    fn plan_after_safe_backs_out_then_enters_safe_forward() {
        assert_eq!(
            plan_route(3, 1),
            vec![PlannedHop::reverse(3), PlannedHop::reverse(2), PlannedHop::forward(1)]
        );
        assert_eq!(plan_route(1, 0), vec![PlannedHop::reverse(1), PlannedHop::forward(0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn at_safe_only_stops() {
        let sim = sim();
        let mut link = link(&sim);
        link.ctx().hub.request_emergency();
        let mut s = session(1);
        divert(&mut link, &mut s, Some("B")).await.unwrap();

        assert_eq!(sim.count("request_force_relocate"), 0);
        assert_eq!(sim.count("request_start_navigation"), 0);
        assert_eq!(sim.count("request_stop_navigation"), 4);
        assert!(!link.ctx().hub.emergency_requested());
    }

    #[tokio::test(start_paused = true)]
    async fn before_safe_runs_one_forward_hop() {
        let sim = sim();
        let mut link = link(&sim);
        let mut s = session(0);
        divert(&mut link, &mut s, Some("B")).await.unwrap();

        assert_eq!(goals(&sim), vec![("B".to_string(), 15.0)]);
        assert_eq!(s.position, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn after_safe_reverses_back_then_enters_forward() {
        let sim = sim();
        let mut link = link(&sim);
        let mut s = session(3);
        divert(&mut link, &mut s, Some("B")).await.unwrap();

        assert_eq!(
            goals(&sim),
            vec![("D".to_string(), 30.0), ("C".to_string(), 20.0), ("B".to_string(), 15.0)]
        );
        assert_eq!(s.position, 1);
        assert_eq!(s.outcomes.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn reverse_phase_diverts_on_position_alone() {
        let sim = sim();
        let mut link = link(&sim);
        let mut s = session(3);
        s.phase = Phase::Reverse;
        divert(&mut link, &mut s, Some("B")).await.unwrap();

        assert_eq!(
            goals(&sim),
            vec![("D".to_string(), 30.0), ("C".to_string(), 20.0), ("B".to_string(), 15.0)]
        );
        assert_eq!(s.position, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_hop_aborts_and_clears_request() {
        let sim = sim();
        sim.set_default_nav(NavScript::EmergencyStop);
        let mut link = link(&sim);
        link.ctx().hub.request_emergency();
        let mut s = session(0);
        let err = divert(&mut link, &mut s, Some("B")).await.unwrap_err();

        assert!(matches!(err, PatrolError::EmergencyFailed(_)));
        assert_eq!(sim.count("request_start_navigation"), 3);
        assert_eq!(s.position, 0);
        assert!(!link.ctx().hub.emergency_requested());
        assert!(!link.ctx().hub.is_diverting());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_safe_location_fails() {
        let sim = sim();
        let mut link = link(&sim);
        let mut s = session(0);
        let err = divert(&mut link, &mut s, Some("Z")).await.unwrap_err();
        assert!(matches!(err, PatrolError::EmergencyFailed(_)));
        assert!(sim.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_safe_location_fails_and_clears_request() {
        let sim = sim();
        let mut link = link(&sim);
        link.ctx().hub.request_emergency();
        let mut s = session(2);
        assert!(divert(&mut link, &mut s, None).await.is_err());
        assert!(!link.ctx().hub.emergency_requested());
    }
}
