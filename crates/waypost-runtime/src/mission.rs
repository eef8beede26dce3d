//! [`Orchestrator`] – the mission worker's cycle loop.
//!
//! ```text
//!  ┌──────┐   ┌───────────┐   ┌─────────┐   ┌─────────┐   ┌────────────┐
//!  │ Idle │──▶│ PreCharge │──▶│ Forward │──▶│ Reverse │──▶│ PostCharge │──┐
//!  └──────┘   └───────────┘   └─────────┘   └─────────┘   └────────────┘  │
//!     ▲                            │ emergency    │                        │
//!     │                            ▼              ▼                        │
//!     │                         Diverting ──▶ run ends                     │
//!     └────────────────────── inter-cycle delay ◀──────────────────────────┘
//! ```
//!
//! Each cycle opens a fresh connection and closes it unconditionally.  A
//! transport failure or a failed pre-cycle charge costs a cooldown, never the
//! worker.  The run ends only on `stop`, `quit`, or a diversion.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};
use waypost_kernel::{CancelOn, MissionSession};
use waypost_middleware::{Connector, Topic};
use waypost_types::{
    ControlResponse, EventPayload, Interrupt, Leg, MissionState, PatrolError, Phase,
};

use crate::charging::ensure_battery_above;
use crate::config::ms;
use crate::emergency::divert;
use crate::link::{RobotLink, WorkerContext};
use crate::names::LocationNames;
use crate::navigator::{HopOptions, LegNavigator};
use crate::waypoints::{ChargeStation, activate_location, get_points, resolve_charge_station};

const SOURCE: &str = "waypost-runtime::mission";

/// Legs shown as "upcoming" on the status board.
const UPCOMING_SHOWN: usize = 2;

/// What the operator asked the mission to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionPlan {
    pub legs: Vec<Leg>,
    pub charge_location: String,
    pub safe_location: Option<String>,
}

/// How a cycle ended early, when it did.
#[derive(Debug, Clone, PartialEq)]
enum CycleEnd {
    Completed,
    Diverted(ControlResponse),
}

/// Owns the session and drives cycles until told to stop.
pub struct Orchestrator {
    ctx: WorkerContext,
    connector: Arc<dyn Connector>,
    names: Arc<dyn LocationNames>,
    session: MissionSession,
    safe_location: Option<String>,
    cycle: u64,
}

impl Orchestrator {
    pub fn new(
        ctx: WorkerContext,
        connector: Arc<dyn Connector>,
        names: Arc<dyn LocationNames>,
        plan: MissionPlan,
    ) -> Self {
        Self {
            ctx,
            connector,
            names,
            session: MissionSession::new(plan.legs, plan.charge_location),
            safe_location: plan.safe_location,
            cycle: 0,
        }
    }

    /// Run until `stop`, `quit`, or a diversion, and report how it ended.
    pub async fn run(mut self) -> ControlResponse {
        info!(legs = self.session.legs.len(), "mission started");
        let response = match self.cycles().await {
            Ok(response) => response,
            Err(PatrolError::Interrupted(Interrupt::Stopped)) => {
                self.set_state(MissionState::Idle);
                ControlResponse::ok("Navigation stopped")
            }
            Err(PatrolError::Interrupted(Interrupt::Quit)) => {
                self.set_state(MissionState::Quitting);
                ControlResponse::ok("Navigation quit requested")
            }
            Err(e) => {
                error!(error = %e, "mission worker failed");
                self.set_state(MissionState::Idle);
                ControlResponse::failed(e.to_string())
            }
        };
        info!(success = response.success, message = %response.message, "mission ended");
        response
    }

    async fn cycles(&mut self) -> Result<ControlResponse, PatrolError> {
        let hub = Arc::clone(&self.ctx.hub);
        let timings = self.ctx.config.timings.clone();
        loop {
            hub.wait_while_paused(CancelOn::StopOrQuit).await?;
            hub.check(CancelOn::StopOrQuit)?;
            self.cycle += 1;

            let transport = match self.connector.connect().await {
                Ok(t) => t,
                Err(e) => {
                    warn!(cycle = self.cycle, error = %e, "connect failed; backing off");
                    hub.sleep(ms(timings.reconnect_backoff_ms), CancelOn::StopOrQuit).await?;
                    continue;
                }
            };
            let mut link = RobotLink::new(transport, self.ctx.clone());
            let outcome = self.run_cycle(&mut link).await;
            link.close().await;

            match outcome {
                Ok(CycleEnd::Completed) => info!(cycle = self.cycle, "cycle complete"),
                Ok(CycleEnd::Diverted(response)) => {
                    self.set_state(MissionState::Idle);
                    return Ok(response);
                }
                Err(e @ PatrolError::Interrupted(_)) => return Err(e),
                Err(e) => {
                    warn!(cycle = self.cycle, error = %e, "cycle aborted; cooling down");
                    self.set_state(MissionState::Idle);
                    hub.sleep(ms(timings.reconnect_backoff_ms), CancelOn::StopOrQuit).await?;
                    continue;
                }
            }

            self.set_state(MissionState::Idle);
            hub.sleep(ms(timings.inter_cycle_delay_ms), CancelOn::StopOrQuit).await?;
        }
    }

    #[instrument(skip(self, link), fields(cycle = self.cycle))]
    async fn run_cycle(&mut self, link: &mut RobotLink) -> Result<CycleEnd, PatrolError> {
        self.session.begin_cycle();
        let cycle = self.cycle;
        self.ctx.board.update(|s| {
            s.cycle = cycle;
            s.phase = Phase::Forward;
            s.position = 0;
            s.outcomes.clear();
        });

        self.set_state(MissionState::PreCharge);
        let station = self.charge_station(link).await?;
        let min = self.ctx.config.min_battery_percent;
        let charge_location = self.session.charge_location.clone();
        ensure_battery_above(link, min, &charge_location, &station).await?;

        let count = self.session.legs.len();
        self.set_state(MissionState::ForwardTraversal);
        for index in 0..count {
            if let Some(end) = self.traverse(link, index, Phase::Forward, index + 1 == count).await? {
                return Ok(end);
            }
        }

        self.session.phase = Phase::Reverse;
        self.set_state(MissionState::ReverseTraversal);
        for index in (0..count).rev() {
            if let Some(end) = self.traverse(link, index, Phase::Reverse, index == 0).await? {
                return Ok(end);
            }
        }

        self.set_state(MissionState::PostCharge);
        match ensure_battery_above(link, min, &charge_location, &station).await {
            Ok(()) => {}
            Err(e @ PatrolError::Interrupted(_)) => return Err(e),
            Err(e) => warn!(error = %e, "post-cycle charging failed"),
        }
        Ok(CycleEnd::Completed)
    }

    /// Resolve the charging location's anchor and pile for this cycle.
    async fn charge_station(&self, link: &mut RobotLink) -> Result<ChargeStation, PatrolError> {
        let id = self.session.charge_location.as_str();
        if !activate_location(link, id, CancelOn::Quit).await? {
            return Err(PatrolError::ChargingFailed(format!("charge location {id} not activated")));
        }
        let points = get_points(link, id, CancelOn::Quit).await?;
        resolve_charge_station(id, &points)
    }

    /// One hop of the route with the boundary checks around it.
    async fn traverse(
        &mut self,
        link: &mut RobotLink,
        index: usize,
        phase: Phase,
        last: bool,
    ) -> Result<Option<CycleEnd>, PatrolError> {
        if let Some(end) = self.emergency_check(link).await? {
            return Ok(Some(end));
        }
        self.ctx.hub.wait_while_paused(CancelOn::StopOrQuit).await?;
        self.show_progress(index, phase);

        let leg = self.session.legs[index].clone();
        let opts = HopOptions::route(phase == Phase::Reverse, &self.ctx.config);
        let success = LegNavigator::new(link).execute_leg(&leg, opts).await?;

        let outcome = self.session.record(index, phase, success);
        if !success {
            warn!(leg = %leg.location_id, ?phase, "leg failed; continuing route");
        }
        self.ctx.board.update(|s| {
            s.position = outcome.leg_index;
            s.outcomes.push(outcome.clone());
        });
        self.ctx.announce(Topic::Mission, SOURCE, EventPayload::HopFinished(outcome));

        if let Some(end) = self.emergency_check(link).await? {
            return Ok(Some(end));
        }
        if !last {
            let delay = ms(self.ctx.config.timings.inter_leg_delay_ms);
            self.ctx.hub.sleep(delay, CancelOn::StopOrQuit).await?;
        }
        Ok(None)
    }

    /// Divert if an emergency is pending.  Only called between hops.
    async fn emergency_check(&mut self, link: &mut RobotLink) -> Result<Option<CycleEnd>, PatrolError> {
        if !self.ctx.hub.emergency_requested() {
            return Ok(None);
        }
        warn!(position = self.session.position, "emergency exit requested");
        let response = match divert(link, &mut self.session, self.safe_location.as_deref()).await {
            Ok(()) => ControlResponse::ok("Emergency exit completed"),
            Err(e @ PatrolError::Interrupted(_)) => return Err(e),
            Err(e) => {
                error!(error = %e, "emergency exit failed");
                ControlResponse::failed(format!("Emergency exit failed: {e}"))
            }
        };
        self.ctx.announce(
            Topic::Alerts,
            SOURCE,
            EventPayload::Emergency { success: response.success, message: response.message.clone() },
        );
        Ok(Some(CycleEnd::Diverted(response)))
    }

    fn show_progress(&self, index: usize, phase: Phase) {
        let current = self.names.display_name(&self.session.legs[index].location_id);
        let upcoming: Vec<String> = self
            .session
            .upcoming(index, phase, UPCOMING_SHOWN)
            .into_iter()
            .map(|leg| self.names.display_name(&leg.location_id))
            .collect();
        info!(leg = %current, ?phase, "starting leg");
        self.ctx.board.update(|s| {
            s.phase = phase;
            s.current_leg = Some(current);
            s.upcoming_legs = upcoming;
        });
    }

    fn set_state(&self, state: MissionState) {
        let cycle = self.cycle;
        self.ctx.board.update(|s| s.state = state);
        self.ctx.announce(Topic::Mission, SOURCE, EventPayload::StateChanged { state, cycle });
    }
}
