//! Typed JSON wire protocol spoken with the robot firmware.
//!
//! Outbound traffic is a closed [`Command`] enum serialised as
//! `{"cmd": "...", "data": {...}}`.  Inbound traffic is decoded once, at the
//! transport boundary, into [`Inbound`]; anything the supervisor does not act
//! on becomes [`Inbound::Ignored`] instead of an untyped map.
//!
//! | Inbound `cmd` | Variant |
//! |---|---|
//! | `response_set_map` | [`Inbound::SetMap`] |
//! | `response_point_list` | [`Inbound::PointList`] |
//! | `response_relocate_position` | [`Inbound::RelocatePosition`] |
//! | `response_start_navigation` | [`Inbound::StartNavigation`] |
//! | `response_dock_ctrl` | [`Inbound::DockCtrl`] |
//! | `response_robot_status` | [`Inbound::RobotStatus`] |
//! | `notify_heart_beat` | [`Inbound::HeartBeat`] |
//! | `notify_battery_info` | [`Inbound::BatteryInfo`] |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use waypost_types::{BatteryReading, ChargingStatus, NamedPoint, PatrolError, Point};

/// Numeric codes carried by responses and heartbeats.
pub mod codes {
    pub const SET_MAP_OK: i64 = 1000;
    pub const POINT_LIST_OK: i64 = 0;
    pub const NAVIGATION_ACCEPTED: i64 = 1001;
    pub const DOCKED: i64 = 0;
    pub const NO_PILE: i64 = 6016;
    pub const ROBOT_IDLE: i64 = 0;

    pub const HB_RUNNING: i64 = 6100;
    pub const HB_RUNNING_ALT: i64 = 2007;
    pub const HB_COMPLETE: i64 = 2006;
    pub const HB_LOCALIZED: i64 = 2005;
    pub const HB_OBSTACLE: i64 = 3001;
    pub const HB_PATH_CLEAR: i64 = 3002;
    pub const HB_EMERGENCY_STOP: i64 = 4001;
}

/// Message text some firmware sends in place of the acceptance code.
pub const NAVIGATION_SUCCESS_MSG: &str = "navigation success";
/// Heartbeat message that means the dock target cannot be reached.
pub const GOAL_OUT_OF_COSTMAP_MSG: &str = "navigation goal out costmap";

// ────────────────────────────────────────────────────────────────────────────
// Outbound
// ────────────────────────────────────────────────────────────────────────────

/// Every command the supervisor sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "data")]
pub enum Command {
    #[serde(rename = "request_set_map")]
    SetMap {
        #[serde(rename = "mapId")]
        map_id: String,
    },
    #[serde(rename = "request_point_list")]
    PointList {
        #[serde(rename = "mapId")]
        map_id: String,
    },
    #[serde(rename = "request_reset_map")]
    ResetMap,
    #[serde(rename = "request_force_relocate")]
    ForceRelocate { x: f64, y: f64, theta: f64, mode: u8 },
    #[serde(rename = "request_start_navigation")]
    StartNavigation { x: f64, y: f64, theta: f64, speed: f64 },
    #[serde(rename = "request_stop_navigation")]
    StopNavigation,
    #[serde(rename = "request_robot_status")]
    RobotStatus,
    #[serde(rename = "request_robot_position")]
    RobotPosition,
    #[serde(rename = "request_battery_info")]
    BatteryInfo,
    #[serde(rename = "request_dock_charge")]
    DockCharge {
        #[serde(rename = "mapId")]
        map_id: String,
        x: f64,
        y: f64,
        theta: f64,
    },
    #[serde(rename = "request_dock_charge_off")]
    DockChargeOff,
    #[serde(rename = "request_check_path")]
    CheckPath,
    #[serde(rename = "request_alternative_path")]
    AlternativePath,
    #[serde(rename = "request_cancel_charge")]
    CancelCharge,
}

impl Command {
    pub fn relocate(point: Point, mode: u8) -> Self {
        Command::ForceRelocate {
            x: point.x,
            y: point.y,
            theta: point.theta,
            mode,
        }
    }

    pub fn navigate(point: Point, speed: f64) -> Self {
        Command::StartNavigation {
            x: point.x,
            y: point.y,
            theta: point.theta,
            speed,
        }
    }

    pub fn dock(map_id: impl Into<String>, pile: Point) -> Self {
        Command::DockCharge {
            map_id: map_id.into(),
            x: pile.x,
            y: pile.y,
            theta: pile.theta,
        }
    }

    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetMap { .. } => "request_set_map",
            Command::PointList { .. } => "request_point_list",
            Command::ResetMap => "request_reset_map",
            Command::ForceRelocate { .. } => "request_force_relocate",
            Command::StartNavigation { .. } => "request_start_navigation",
            Command::StopNavigation => "request_stop_navigation",
            Command::RobotStatus => "request_robot_status",
            Command::RobotPosition => "request_robot_position",
            Command::BatteryInfo => "request_battery_info",
            Command::DockCharge { .. } => "request_dock_charge",
            Command::DockChargeOff => "request_dock_charge_off",
            Command::CheckPath => "request_check_path",
            Command::AlternativePath => "request_alternative_path",
            Command::CancelCharge => "request_cancel_charge",
        }
    }

    pub fn to_json(&self) -> Result<String, PatrolError> {
        serde_json::to_string(self).map_err(|e| PatrolError::Serialization(e.to_string()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Inbound
// ────────────────────────────────────────────────────────────────────────────

/// Heartbeat status codes the supervisor reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStatus {
    Running,
    Complete,
    Localized,
    Obstacle,
    PathClear,
    EmergencyStop,
}

impl HeartbeatStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            codes::HB_RUNNING | codes::HB_RUNNING_ALT => Some(Self::Running),
            codes::HB_COMPLETE => Some(Self::Complete),
            codes::HB_LOCALIZED => Some(Self::Localized),
            codes::HB_OBSTACLE => Some(Self::Obstacle),
            codes::HB_PATH_CLEAR => Some(Self::PathClear),
            codes::HB_EMERGENCY_STOP => Some(Self::EmergencyStop),
            _ => None,
        }
    }
}

/// A decoded message from the robot.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    SetMap { code: Option<i64> },
    PointList { code: Option<i64>, points: Vec<NamedPoint> },
    RelocatePosition { code: Option<i64> },
    StartNavigation { code: Option<i64>, msg: String },
    DockCtrl { code: Option<i64> },
    RobotStatus { code: Option<i64> },
    HeartBeat {
        code: Option<i64>,
        msg: String,
        /// The heartbeat data already carries a pose.
        has_position: bool,
    },
    BatteryInfo(BatteryReading),
    Ignored { cmd: String },
}

/// Loose envelope every inbound frame shares.
#[derive(Debug, Deserialize)]
struct Envelope {
    cmd: String,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    msg: Option<String>,
}

impl Inbound {
    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`PatrolError::Serialization`] when the frame is not a JSON
    /// object with a `cmd` field, and [`PatrolError::Protocol`] when a
    /// recognised message carries a payload of the wrong shape.
    pub fn decode(text: &str) -> Result<Self, PatrolError> {
        let env: Envelope = serde_json::from_str(text)
            .map_err(|e| PatrolError::Serialization(format!("inbound frame: {e}")))?;
        let msg = env.msg.unwrap_or_default();
        let code = env.code;

        Ok(match env.cmd.as_str() {
            "response_set_map" => Inbound::SetMap { code },
            "response_point_list" => {
                let points = match env.data.get("points") {
                    Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| {
                        PatrolError::Protocol(format!("point list: {e}"))
                    })?,
                    None => Vec::new(),
                };
                Inbound::PointList { code, points }
            }
            "response_relocate_position" => Inbound::RelocatePosition { code },
            "response_start_navigation" => Inbound::StartNavigation { code, msg },
            "response_dock_ctrl" => Inbound::DockCtrl { code },
            "response_robot_status" => Inbound::RobotStatus { code },
            "notify_heart_beat" => Inbound::HeartBeat {
                code,
                msg,
                has_position: env.data.get("x").is_some(),
            },
            "notify_battery_info" => {
                let level = env.data.get("battery").and_then(Value::as_f64).unwrap_or(0.0);
                let status = env.data.get("status").and_then(Value::as_i64).unwrap_or(0);
                Inbound::BatteryInfo(BatteryReading {
                    level_percent: level.round().clamp(0.0, 100.0) as u8,
                    charging_status: ChargingStatus::from_code(status),
                })
            }
            _ => Inbound::Ignored { cmd: env.cmd },
        })
    }

    /// The message's status code, if any.
    pub fn code(&self) -> Option<i64> {
        match self {
            Inbound::SetMap { code }
            | Inbound::PointList { code, .. }
            | Inbound::RelocatePosition { code }
            | Inbound::StartNavigation { code, .. }
            | Inbound::DockCtrl { code }
            | Inbound::RobotStatus { code }
            | Inbound::HeartBeat { code, .. } => *code,
            Inbound::BatteryInfo(_) | Inbound::Ignored { .. } => None,
        }
    }

    /// Classify a heartbeat; `None` for every other message.
    pub fn heartbeat(&self) -> Option<HeartbeatStatus> {
        match self {
            Inbound::HeartBeat { code: Some(c), .. } => HeartbeatStatus::from_code(*c),
            _ => None,
        }
    }

    /// True for a start-navigation response that accepts the goal.
    pub fn is_navigation_accepted(&self) -> bool {
        matches!(
            self,
            Inbound::StartNavigation { code, msg }
                if *code == Some(codes::NAVIGATION_ACCEPTED) || msg == NAVIGATION_SUCCESS_MSG
        )
    }
}
