//! In-process simulated robot for headless tests.
//!
//! [`SimHandle`] owns a scripted firmware model.  Every connection obtained
//! from its [`SimConnector`] is a [`SimRobot`] transport that answers
//! commands synchronously by queueing JSON frames, which are decoded through
//! the same [`Inbound::decode`] path the WebSocket link uses.  When nothing
//! is queued, `receive` sleeps for the full timeout, so tests run under
//! Tokio's paused clock and multi-minute protocol timeouts elapse instantly.
//!
//! # Example
//!
//! ```rust
//! use waypost_middleware::sim::{NavScript, SimHandle};
//! use waypost_types::Point;
//!
//! let sim = SimHandle::new()
//!     .with_location("map-a", Point::new(0.0, 0.0, 0.0), Point::new(5.0, 0.0, 0.0));
//! sim.push_nav(NavScript::StaleCompletion);
//! assert_eq!(sim.count("request_start_navigation"), 0);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use waypost_types::{BatteryReading, ChargingStatus, PatrolError, Point};

use crate::protocol::{Command, GOAL_OUT_OF_COSTMAP_MSG, Inbound, codes};
use crate::transport::{Connector, RobotTransport};

/// How the firmware answers one `request_start_navigation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavScript {
    /// Accept, report running, then report completion.
    Complete,
    /// Report completion without ever accepting the goal, then go quiet.
    StaleCompletion,
    /// Accept and run, then report an obstacle.  Completion follows once the
    /// path is reported clear or an alternative path is requested.
    Obstacle,
    /// Accept and run, then report an emergency stop.
    EmergencyStop,
    /// No reply at all.
    Silent,
}

/// How the firmware confirms localization after a forced relocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Localization {
    /// Explicit "localized" heartbeat code.
    Explicit,
    /// No explicit code, only a heartbeat that already carries a pose.
    PositionOnly,
    Never,
}

/// How the firmware answers one `request_dock_charge`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockScript {
    Docked,
    NoPile,
    OutOfCostmap,
    Silent,
}

type CommandHook = Arc<dyn Fn(&Command) + Send + Sync>;

struct SimState {
    locations: HashMap<String, Vec<Value>>,
    unresponsive_locations: HashSet<String>,
    nav_scripts: VecDeque<NavScript>,
    default_nav: NavScript,
    battery_script: VecDeque<BatteryReading>,
    /// `None` makes battery requests go unanswered.
    default_battery: Option<BatteryReading>,
    dock_scripts: VecDeque<DockScript>,
    relocate_code: i64,
    localization: Localization,
    path_clear: bool,
    completion_pending: bool,
    sent: Vec<Command>,
    connects: usize,
    failing_connects: usize,
    closes: usize,
    hook: Option<CommandHook>,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            locations: HashMap::new(),
            unresponsive_locations: HashSet::new(),
            nav_scripts: VecDeque::new(),
            default_nav: NavScript::Complete,
            battery_script: VecDeque::new(),
            default_battery: Some(BatteryReading::assumed_full()),
            dock_scripts: VecDeque::new(),
            relocate_code: 4000,
            localization: Localization::Explicit,
            path_clear: false,
            completion_pending: false,
            sent: Vec::new(),
            connects: 0,
            failing_connects: 0,
            closes: 0,
            hook: None,
        }
    }
}

impl SimState {
    /// Frames the firmware emits in answer to `command`.
    fn respond(&mut self, command: &Command) -> Vec<Value> {
        match command {
            Command::SetMap { map_id } => {
                if self.unresponsive_locations.contains(map_id) {
                    vec![]
                } else {
                    vec![json!({"cmd": "response_set_map", "code": codes::SET_MAP_OK})]
                }
            }
            Command::PointList { map_id } => match self.locations.get(map_id) {
                Some(points) => vec![json!({
                    "cmd": "response_point_list",
                    "code": codes::POINT_LIST_OK,
                    "data": {"points": points},
                })],
                None => vec![],
            },
            Command::ForceRelocate { x, y, .. } => {
                let mut out = vec![json!({
                    "cmd": "response_relocate_position",
                    "code": self.relocate_code,
                })];
                match self.localization {
                    Localization::Explicit => out.push(heartbeat(codes::HB_LOCALIZED)),
                    Localization::PositionOnly => out.push(json!({
                        "cmd": "notify_heart_beat",
                        "data": {"x": x, "y": y},
                    })),
                    Localization::Never => {}
                }
                out
            }
            Command::StartNavigation { .. } => {
                let script = self.nav_scripts.pop_front().unwrap_or(self.default_nav);
                let accepted = json!({"cmd": "response_start_navigation", "code": codes::NAVIGATION_ACCEPTED});
                match script {
                    NavScript::Complete => vec![
                        accepted,
                        heartbeat(codes::HB_RUNNING),
                        heartbeat(codes::HB_COMPLETE),
                    ],
                    NavScript::StaleCompletion => vec![heartbeat(codes::HB_COMPLETE)],
                    NavScript::Obstacle => {
                        self.completion_pending = true;
                        vec![accepted, heartbeat(codes::HB_RUNNING), heartbeat(codes::HB_OBSTACLE)]
                    }
                    NavScript::EmergencyStop => vec![
                        accepted,
                        heartbeat(codes::HB_RUNNING),
                        heartbeat(codes::HB_EMERGENCY_STOP),
                    ],
                    NavScript::Silent => vec![],
                }
            }
            Command::CheckPath => {
                if !self.path_clear {
                    return vec![];
                }
                let mut out = vec![heartbeat(codes::HB_PATH_CLEAR)];
                if std::mem::take(&mut self.completion_pending) {
                    out.push(heartbeat(codes::HB_COMPLETE));
                }
                out
            }
            Command::AlternativePath => {
                if std::mem::take(&mut self.completion_pending) {
                    vec![heartbeat(codes::HB_RUNNING), heartbeat(codes::HB_COMPLETE)]
                } else {
                    vec![]
                }
            }
            Command::RobotStatus => {
                vec![json!({"cmd": "response_robot_status", "code": codes::HB_COMPLETE})]
            }
            Command::BatteryInfo => {
                match self.battery_script.pop_front().or(self.default_battery) {
                    Some(r) => vec![json!({
                        "cmd": "notify_battery_info",
                        "data": {"battery": r.level_percent, "status": status_code(r.charging_status)},
                    })],
                    None => vec![],
                }
            }
            Command::DockCharge { .. } => {
                match self.dock_scripts.pop_front().unwrap_or(DockScript::Docked) {
                    DockScript::Docked => {
                        vec![json!({"cmd": "response_dock_ctrl", "code": codes::DOCKED})]
                    }
                    DockScript::NoPile => {
                        vec![json!({"cmd": "response_dock_ctrl", "code": codes::NO_PILE})]
                    }
                    DockScript::OutOfCostmap => vec![json!({
                        "cmd": "notify_heart_beat",
                        "code": codes::HB_RUNNING,
                        "msg": GOAL_OUT_OF_COSTMAP_MSG,
                    })],
                    DockScript::Silent => vec![],
                }
            }
            Command::ResetMap
            | Command::StopNavigation
            | Command::RobotPosition
            | Command::DockChargeOff
            | Command::CancelCharge => vec![],
        }
    }
}

fn heartbeat(code: i64) -> Value {
    json!({"cmd": "notify_heart_beat", "code": code})
}

fn status_code(status: ChargingStatus) -> i64 {
    match status {
        ChargingStatus::Idle => 0,
        ChargingStatus::Charging => 1,
        ChargingStatus::Fault => 2,
    }
}

fn point_json(kind: &str, p: Point) -> Value {
    json!({"type": kind, "x": p.x, "y": p.y, "theta": p.theta})
}

// ────────────────────────────────────────────────────────────────────────────
// Handle
// ────────────────────────────────────────────────────────────────────────────

/// Shared control surface of the simulated firmware.  Clones share state.
#[derive(Clone, Default)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a route location with its anchor and destination.
    pub fn with_location(self, location_id: &str, anchor: Point, destination: Point) -> Self {
        self.state().locations.insert(
            location_id.to_string(),
            vec![point_json("anchor_point", anchor), point_json("destination", destination)],
        );
        self
    }

    /// Register a charging location with its anchor and pile.
    pub fn with_charge_station(self, location_id: &str, anchor: Point, pile: Point) -> Self {
        self.state().locations.insert(
            location_id.to_string(),
            vec![point_json("anchor_point", anchor), point_json("charge", pile)],
        );
        self
    }

    /// Register a location that reports no usable waypoints.
    pub fn with_empty_location(self, location_id: &str) -> Self {
        self.state().locations.insert(location_id.to_string(), Vec::new());
        self
    }

    /// Never confirm activation of `location_id`.
    pub fn set_unresponsive_location(&self, location_id: &str) {
        self.state().unresponsive_locations.insert(location_id.to_string());
    }

    pub fn push_nav(&self, script: NavScript) {
        self.state().nav_scripts.push_back(script);
    }

    pub fn set_default_nav(&self, script: NavScript) {
        self.state().default_nav = script;
    }

    pub fn push_battery(&self, reading: BatteryReading) {
        self.state().battery_script.push_back(reading);
    }

    /// Reading returned once the battery script is exhausted; `None` goes
    /// silent.
    pub fn set_default_battery(&self, reading: Option<BatteryReading>) {
        self.state().default_battery = reading;
    }

    pub fn push_dock(&self, script: DockScript) {
        self.state().dock_scripts.push_back(script);
    }

    pub fn set_relocate_code(&self, code: i64) {
        self.state().relocate_code = code;
    }

    pub fn set_localization(&self, localization: Localization) {
        self.state().localization = localization;
    }

    pub fn set_path_clear(&self, clear: bool) {
        self.state().path_clear = clear;
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.state().failing_connects = n;
    }

    /// Run `hook` on every command, after it is recorded and before the
    /// firmware answers.
    pub fn on_command<F>(&self, hook: F)
    where
        F: Fn(&Command) + Send + Sync + 'static,
    {
        self.state().hook = Some(Arc::new(hook));
    }

    /// Every command sent so far, across all connections.
    pub fn sent(&self) -> Vec<Command> {
        self.state().sent.clone()
    }

    /// Number of commands sent with the given wire name.
    pub fn count(&self, name: &str) -> usize {
        self.state().sent.iter().filter(|c| c.name() == name).count()
    }

    pub fn connects(&self) -> usize {
        self.state().connects
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }

    /// Open a transport directly, bypassing connect accounting.
    pub fn transport(&self) -> SimRobot {
        SimRobot {
            state: Arc::clone(&self.state),
            inbox: VecDeque::new(),
        }
    }

    pub fn connector(&self) -> SimConnector {
        SimConnector(self.clone())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transport
// ────────────────────────────────────────────────────────────────────────────

/// One simulated connection.
pub struct SimRobot {
    state: Arc<Mutex<SimState>>,
    inbox: VecDeque<String>,
}

#[async_trait]
impl RobotTransport for SimRobot {
    async fn send(&mut self, command: &Command) -> Result<(), PatrolError> {
        let (frames, hook) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.sent.push(command.clone());
            (state.respond(command), state.hook.clone())
        };
        if let Some(hook) = hook {
            hook(command);
        }
        self.inbox.extend(frames.into_iter().map(|f| f.to_string()));
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Option<Inbound>, PatrolError> {
        match self.inbox.pop_front() {
            Some(frame) => Inbound::decode(&frame).map(Some),
            None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> Result<(), PatrolError> {
        self.inbox.clear();
        self.state.lock().unwrap_or_else(PoisonError::into_inner).closes += 1;
        Ok(())
    }
}

/// Hands out [`SimRobot`] connections sharing one [`SimHandle`].
#[derive(Clone)]
pub struct SimConnector(SimHandle);

#[async_trait]
impl Connector for SimConnector {
    async fn connect(&self) -> Result<Box<dyn RobotTransport>, PatrolError> {
        {
            let mut state = self.0.state();
            state.connects += 1;
            if state.failing_connects > 0 {
                state.failing_connects -= 1;
                return Err(PatrolError::Transport("simulated connection refused".into()));
            }
        }
        Ok(Box::new(self.0.transport()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::HeartbeatStatus;

    async fn drain(robot: &mut SimRobot) -> Vec<Inbound> {
        let mut out = Vec::new();
        while let Some(msg) = robot.receive(Duration::from_millis(10)).await.unwrap() {
            out.push(msg);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn complete_script_acks_runs_and_completes() {
        let sim = SimHandle::new();
        let mut robot = sim.transport();
        robot.send(&Command::navigate(Point::new(1.0, 1.0, 0.0), 0.5)).await.unwrap();

        let msgs = drain(&mut robot).await;
        assert!(msgs[0].is_navigation_accepted());
        assert_eq!(msgs[1].heartbeat(), Some(HeartbeatStatus::Running));
        assert_eq!(msgs[2].heartbeat(), Some(HeartbeatStatus::Complete));
    }

    #[tokio::test(start_paused = true)]
    async fn point_list_reflects_registered_location() {
        let sim = SimHandle::new().with_location(
            "map-a",
            Point::new(0.0, 0.0, 0.0),
            Point::new(3.0, 0.0, 0.0),
        );
        let mut robot = sim.transport();
        robot.send(&Command::PointList { map_id: "map-a".into() }).await.unwrap();
        match robot.receive(Duration::from_secs(1)).await.unwrap() {
            Some(Inbound::PointList { points, .. }) => assert_eq!(points.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_inbox_sleeps_for_timeout() {
        let sim = SimHandle::new();
        let mut robot = sim.transport();
        let start = tokio::time::Instant::now();
        assert!(robot.receive(Duration::from_secs(30)).await.unwrap().is_none());
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn hook_sees_every_command() {
        let sim = SimHandle::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_ref = Arc::clone(&seen);
        sim.on_command(move |c| seen_ref.lock().unwrap().push(c.name()));

        let mut robot = sim.transport();
        robot.send(&Command::StopNavigation).await.unwrap();
        robot.send(&Command::BatteryInfo).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["request_stop_navigation", "request_battery_info"]);
        assert_eq!(sim.count("request_battery_info"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connector_fails_requested_number_of_times() {
        let sim = SimHandle::new();
        sim.fail_next_connects(1);
        let connector = sim.connector();
        assert!(connector.connect().await.is_err());
        assert!(connector.connect().await.is_ok());
        assert_eq!(sim.connects(), 2);
    }
}
