//! [`MissionController`] – the control surface callers hold.
//!
//! Owns at most one mission worker.  Every operation returns a
//! [`ControlResponse`]; status queries read the [`StatusBoard`] snapshot and
//! never touch the robot connection.
//!
//! [`StatusBoard`]: waypost_kernel::StatusBoard

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use waypost_kernel::StatusSnapshot;
use waypost_middleware::{Connector, Topic, TopicReceiver};
use waypost_types::{BatteryReading, ControlResponse, Leg};

use crate::config::MissionConfig;
use crate::link::WorkerContext;
use crate::mission::{MissionPlan, Orchestrator};
use crate::names::NameCache;

pub struct MissionController {
    ctx: WorkerContext,
    connector: Arc<dyn Connector>,
    names: Arc<NameCache>,
    safe_location: Option<String>,
    runtime: Handle,
    worker: Mutex<Option<JoinHandle<ControlResponse>>>,
}

impl MissionController {
    /// `runtime` is where the mission worker is spawned; callers may sit on
    /// a plain thread outside it.
    pub fn new(
        config: MissionConfig,
        connector: Arc<dyn Connector>,
        names: Arc<NameCache>,
        safe_location: Option<String>,
        runtime: Handle,
    ) -> Self {
        Self {
            ctx: WorkerContext::new(config),
            connector,
            names,
            safe_location,
            runtime,
            worker: Mutex::new(None),
        }
    }

    fn worker(&self) -> MutexGuard<'_, Option<JoinHandle<ControlResponse>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.worker().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Launch the mission worker over `location_ids`, charging at
    /// `charge_location` around each cycle.
    pub fn start_mission<I, S>(&self, location_ids: I, charge_location: &str) -> ControlResponse
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut worker = self.worker();
        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            return ControlResponse::failed("Mission already running");
        }
        let legs = Leg::sequence(location_ids);
        if legs.is_empty() {
            return ControlResponse::failed("No locations given");
        }
        if charge_location.trim().is_empty() {
            return ControlResponse::failed("No charging location given");
        }

        self.ctx.hub.reset();
        self.ctx.board.reset();
        let count = legs.len();
        let plan = MissionPlan {
            legs,
            charge_location: charge_location.to_string(),
            safe_location: self.safe_location.clone(),
        };
        let orchestrator = Orchestrator::new(
            self.ctx.clone(),
            Arc::clone(&self.connector),
            self.names.clone(),
            plan,
        );
        let board = Arc::clone(&self.ctx.board);
        *worker = Some(self.runtime.spawn(async move {
            let response = orchestrator.run().await;
            board.update(|s| s.last_result = Some(response.clone()));
            response
        }));
        info!(legs = count, "mission worker spawned");
        ControlResponse::ok(format!("Mission started over {count} locations"))
    }

    /// Idempotent: pausing twice is the same as pausing once.
    pub fn pause(&self) -> ControlResponse {
        if !self.is_running() {
            return ControlResponse::failed("No mission running");
        }
        if self.ctx.hub.pause() {
            ControlResponse::ok("Navigation paused")
        } else {
            ControlResponse::ok("Navigation already paused")
        }
    }

    pub fn resume(&self) -> ControlResponse {
        if self.ctx.hub.resume() {
            ControlResponse::ok("Navigation resumed")
        } else {
            ControlResponse::ok("Navigation was not paused")
        }
    }

    pub fn stop(&self) -> ControlResponse {
        if !self.is_running() {
            return ControlResponse::failed("No mission running");
        }
        self.ctx.hub.stop();
        ControlResponse::ok("Stop requested")
    }

    /// Works with or without a running mission.
    pub fn quit(&self) -> ControlResponse {
        self.ctx.hub.quit();
        ControlResponse::ok("Quit requested")
    }

    pub fn trigger_emergency(&self) -> ControlResponse {
        if !self.is_running() {
            return ControlResponse::failed("No mission running");
        }
        if self.ctx.hub.request_emergency() {
            ControlResponse::ok("Emergency exit triggered!")
        } else {
            warn!("emergency exit refused");
            ControlResponse::failed("Emergency exit already in progress")
        }
    }

    pub fn status(&self) -> Arc<StatusSnapshot> {
        self.ctx.board.snapshot()
    }

    pub fn battery(&self) -> Option<BatteryReading> {
        self.ctx.board.snapshot().battery
    }

    pub fn subscribe(&self, topic: Topic) -> TopicReceiver {
        self.ctx.bus.subscribe_to(topic)
    }

    /// Swap the display-name table used for progress reporting.
    pub fn refresh_names<I, K, V>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.names.replace(entries);
    }

    pub fn names(&self) -> Vec<(String, String)> {
        self.names.entries()
    }

    /// Wait for the current worker to finish; `None` if none was started.
    pub async fn join(&self) -> Option<ControlResponse> {
        let handle = self.worker().take()?;
        Some(match handle.await {
            Ok(response) => response,
            Err(e) => ControlResponse::failed(format!("mission worker aborted: {e}")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypost_middleware::sim::{NavScript, SimHandle};
    use waypost_types::{EventPayload, MissionState, Point};

    fn sim() -> SimHandle {
        SimHandle::new()
            .with_location("A", Point::new(0.0, 0.0, 0.0), Point::new(5.0, 0.0, 0.0))
            .with_location("B", Point::new(10.0, 0.0, 0.0), Point::new(15.0, 0.0, 0.0))
            .with_charge_station("dock", Point::new(-5.0, 0.0, 0.0), Point::new(-6.0, 0.0, 0.0))
    }

    fn controller(sim: &SimHandle, safe: Option<&str>) -> MissionController {
        MissionController::new(
            MissionConfig::default(),
            Arc::new(sim.connector()),
            Arc::new(NameCache::new()),
            safe.map(str::to_string),
            Handle::current(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn start_then_stop_records_last_result() {
        let sim = sim();
        let ctl = controller(&sim, None);
        assert!(ctl.start_mission(["A", "B"], "dock").success);
        assert!(ctl.stop().success);

        let result = ctl.join().await.unwrap();
        assert_eq!(result, ControlResponse::ok("Navigation stopped"));
        assert!(!ctl.is_running());
        assert_eq!(ctl.status().last_result, Some(result));
        assert_eq!(ctl.status().state, MissionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_refused_while_running() {
        let sim = sim();
        sim.set_default_nav(NavScript::Silent);
        let ctl = controller(&sim, None);
        assert!(ctl.start_mission(["A"], "dock").success);
        let again = ctl.start_mission(["B"], "dock");
        assert!(!again.success);
        ctl.quit();
        assert_eq!(ctl.join().await.unwrap().message, "Navigation quit requested");
    }

    #[tokio::test(start_paused = true)]
    async fn empty_route_is_refused() {
        let ctl = controller(&sim(), None);
        assert!(!ctl.start_mission(Vec::<String>::new(), "dock").success);
        assert!(!ctl.start_mission(["A"], " ").success);
        assert!(ctl.join().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_is_idempotent_and_resume_without_pause_is_noop() {
        let sim = sim();
        sim.set_default_nav(NavScript::Silent);
        let ctl = controller(&sim, None);
        assert_eq!(ctl.resume(), ControlResponse::ok("Navigation was not paused"));
        ctl.start_mission(["A", "B"], "dock");

        assert!(ctl.pause().success);
        assert!(ctl.pause().success);
        assert!(ctl.resume().success);
        assert_eq!(ctl.resume(), ControlResponse::ok("Navigation was not paused"));
        ctl.quit();
        ctl.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn controls_without_a_mission_are_refused() {
        let ctl = controller(&sim(), Some("A"));
        assert!(!ctl.pause().success);
        assert!(!ctl.stop().success);
        assert!(!ctl.trigger_emergency().success);
        assert!(ctl.quit().success);
    }

    #[tokio::test(start_paused = true)]
    async fn emergency_at_first_leg_ends_run_and_alerts() {
        let sim = sim();
        let ctl = controller(&sim, Some("A"));
        let mut alerts = ctl.subscribe(Topic::Alerts);
        ctl.start_mission(["A", "B"], "dock");
        assert_eq!(ctl.trigger_emergency(), ControlResponse::ok("Emergency exit triggered!"));

        let result = ctl.join().await.unwrap();
        assert_eq!(result, ControlResponse::ok("Emergency exit completed"));
        assert_eq!(sim.count("request_start_navigation"), 0);

        let event = alerts.recv().await.unwrap();
        assert!(matches!(event.payload, EventPayload::Emergency { success: true, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn battery_is_readable_after_precharge() {
        let sim = sim();
        sim.set_default_nav(NavScript::Silent);
        let ctl = controller(&sim, None);
        assert!(ctl.battery().is_none());
        ctl.start_mission(["A"], "dock");
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert_eq!(ctl.battery(), Some(BatteryReading::assumed_full()));
        ctl.quit();
        ctl.join().await;
    }

    #[test]
    fn name_table_refresh_is_visible() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let ctl = MissionController::new(
            MissionConfig::default(),
            Arc::new(SimHandle::new().connector()),
            Arc::new(NameCache::new()),
            None,
            rt.handle().clone(),
        );
        ctl.refresh_names([("A", "Lobby")]);
        assert_eq!(ctl.names(), vec![("A".to_string(), "Lobby".to_string())]);
    }
}
