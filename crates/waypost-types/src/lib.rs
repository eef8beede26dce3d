use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A robot pose on a location's map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

impl Point {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self { x, y, theta }
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.theta)
    }
}

/// Role of a named point in a location's point list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointKind {
    AnchorPoint,
    Destination,
    Charge,
    /// Any point type the supervisor does not use.
    #[serde(other)]
    Other,
}

/// One entry of a location's point list as reported by the robot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NamedPoint {
    #[serde(rename = "type")]
    pub kind: PointKind,
    #[serde(flatten)]
    pub point: Point,
}

/// The points of one location, held for the life of one activation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Waypoints {
    pub anchor: Option<Point>,
    pub destination: Option<Point>,
    pub charge_pile: Option<Point>,
}

impl Waypoints {
    /// Pick the first point of each known kind; later duplicates are ignored.
    pub fn collect(points: &[NamedPoint]) -> Self {
        let first = |kind: PointKind| points.iter().find(|p| p.kind == kind).map(|p| p.point);
        Self {
            anchor: first(PointKind::AnchorPoint),
            destination: first(PointKind::Destination),
            charge_pile: first(PointKind::Charge),
        }
    }
}

/// One named location of the route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leg {
    pub location_id: String,
    pub sequence_index: usize,
}

impl Leg {
    /// Build the ordered leg list from location identifiers.
    pub fn sequence<I, S>(location_ids: I) -> Vec<Leg>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        location_ids
            .into_iter()
            .enumerate()
            .map(|(sequence_index, id)| Leg {
                location_id: id.into(),
                sequence_index,
            })
            .collect()
    }
}

/// Traversal direction of the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Forward,
    Reverse,
}

/// Charging state reported alongside the battery level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargingStatus {
    #[default]
    Idle,
    Charging,
    /// Docked on a pile that reports a fault; the pile is still present.
    Fault,
}

impl ChargingStatus {
    /// Map the firmware's numeric status. Unknown values read as idle.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Charging,
            2 => Self::Fault,
            _ => Self::Idle,
        }
    }
}

/// A single battery telemetry sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryReading {
    pub level_percent: u8,
    pub charging_status: ChargingStatus,
}

impl BatteryReading {
    /// The reading assumed when telemetry does not arrive in time.
    pub fn assumed_full() -> Self {
        Self {
            level_percent: 100,
            charging_status: ChargingStatus::Idle,
        }
    }

    /// True when the robot sits on a pile, charging or reporting a pile fault.
    pub fn on_pile(&self) -> bool {
        matches!(
            self.charging_status,
            ChargingStatus::Charging | ChargingStatus::Fault
        )
    }
}

/// Terminal outcome of one hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegOutcome {
    pub leg_index: usize,
    pub location_id: String,
    pub phase: Phase,
    pub success: bool,
}

/// Result returned by every public mission control operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    pub message: String,
}

impl ControlResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Coarse state of the mission worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionState {
    #[default]
    Idle,
    PreCharge,
    ForwardTraversal,
    ReverseTraversal,
    PostCharge,
    Diverting,
    Quitting,
}

/// Operator signal that ended a wait early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interrupt {
    Stopped,
    Quit,
}

impl std::fmt::Display for Interrupt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interrupt::Stopped => write!(f, "stop"),
            Interrupt::Quit => write!(f, "quit"),
        }
    }
}

/// Unified event wrapper for the mission event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "waypost-runtime::mission"
    pub source: String,
    pub payload: EventPayload,
}

/// Variants of data routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    StateChanged {
        state: MissionState,
        cycle: u64,
    },
    HopFinished(LegOutcome),
    Battery(BatteryReading),
    Obstacle {
        location_id: String,
        cleared: bool,
    },
    Emergency {
        success: bool,
        message: String,
    },
}

/// Error type spanning transport failures, protocol mismatches, and
/// operator-directed early exits.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PatrolError {
    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Protocol Mismatch: {0}")]
    Protocol(String),

    #[error("Missing {kind:?} waypoint on location {location_id}")]
    MissingWaypoint { location_id: String, kind: PointKind },

    #[error("Interrupted by {0}")]
    Interrupted(Interrupt),

    #[error("Charging Failed: {0}")]
    ChargingFailed(String),

    #[error("Emergency Exit Failed: {0}")]
    EmergencyFailed(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Channel Error: {0}")]
    Channel(String),
}

impl PatrolError {
    /// The operator signal behind this error, if it is an early exit.
    pub fn interrupt(&self) -> Option<Interrupt> {
        match self {
            PatrolError::Interrupted(i) => Some(*i),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PatrolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_point_decodes_wire_shape() {
        let raw = r#"{"type":"anchor_point","x":1.5,"y":-2.0,"theta":0.25,"name":"dock"}"#;
        let p: NamedPoint = serde_json::from_str(raw).unwrap();
        assert_eq!(p.kind, PointKind::AnchorPoint);
        assert_eq!(p.point, Point::new(1.5, -2.0, 0.25));
    }

    #[test]
    fn unknown_point_type_is_other() {
        let raw = r#"{"type":"waiting_area","x":0.0,"y":0.0,"theta":0.0}"#;
        let p: NamedPoint = serde_json::from_str(raw).unwrap();
        assert_eq!(p.kind, PointKind::Other);
    }

    #[test]
    fn waypoints_collect_takes_first_of_each_kind() {
        let points = [
            NamedPoint { kind: PointKind::Destination, point: Point::new(5.0, 5.0, 0.0) },
            NamedPoint { kind: PointKind::AnchorPoint, point: Point::new(0.0, 0.0, 0.0) },
            NamedPoint { kind: PointKind::Destination, point: Point::new(9.0, 9.0, 0.0) },
        ];
        let wp = Waypoints::collect(&points);
        assert_eq!(wp.anchor, Some(Point::new(0.0, 0.0, 0.0)));
        assert_eq!(wp.destination, Some(Point::new(5.0, 5.0, 0.0)));
        assert!(wp.charge_pile.is_none());
    }

    #[test]
    fn leg_sequence_assigns_indices() {
        let legs = Leg::sequence(["a", "b", "c"]);
        assert_eq!(legs.len(), 3);
        assert_eq!(legs[2].location_id, "c");
        assert_eq!(legs[2].sequence_index, 2);
    }

    #[test]
    fn charging_status_from_code() {
        assert_eq!(ChargingStatus::from_code(0), ChargingStatus::Idle);
        assert_eq!(ChargingStatus::from_code(1), ChargingStatus::Charging);
        assert_eq!(ChargingStatus::from_code(2), ChargingStatus::Fault);
        assert_eq!(ChargingStatus::from_code(7), ChargingStatus::Idle);
    }

    #[test]
    fn battery_on_pile_excludes_idle() {
        assert!(!BatteryReading::assumed_full().on_pile());
        let fault = BatteryReading { level_percent: 40, charging_status: ChargingStatus::Fault };
        assert!(fault.on_pile());
    }

    #[test]
    fn event_roundtrip() {
        let event = Event {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: "waypost-runtime::mission".to_string(),
            payload: EventPayload::Battery(BatteryReading {
                level_percent: 80,
                charging_status: ChargingStatus::Charging,
            }),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert_eq!(event.source, back.source);
    }

    #[test]
    fn patrol_error_display() {
        let err = PatrolError::MissingWaypoint {
            location_id: "map-7".to_string(),
            kind: PointKind::AnchorPoint,
        };
        assert!(err.to_string().contains("map-7"));
        assert_eq!(
            PatrolError::Interrupted(Interrupt::Quit).interrupt(),
            Some(Interrupt::Quit)
        );
        assert!(PatrolError::Transport("eof".into()).interrupt().is_none());
    }
}
