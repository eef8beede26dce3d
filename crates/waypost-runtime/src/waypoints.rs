//! Location activation and waypoint lookup.

use tracing::{info, instrument, warn};
use waypost_kernel::CancelOn;
use waypost_middleware::protocol::codes;
use waypost_middleware::{Command, Inbound};
use waypost_types::{NamedPoint, PatrolError, Point, PointKind, Waypoints};

use crate::config::ms;
use crate::link::RobotLink;

/// Anchor and destination of one route leg.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegPoses {
    pub anchor: Point,
    pub destination: Point,
}

impl LegPoses {
    /// `(start, end)` of a hop over this leg.
    pub fn hop(&self, reverse: bool) -> (Point, Point) {
        if reverse {
            (self.destination, self.anchor)
        } else {
            (self.anchor, self.destination)
        }
    }
}

/// Anchor and pile of the charging location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChargeStation {
    pub anchor: Point,
    pub pile: Point,
}

/// Make `location_id` the robot's active map.
///
/// `Ok(false)` when the robot does not confirm in time.
#[instrument(skip(link, cancel))]
pub async fn activate_location(
    link: &mut RobotLink,
    location_id: &str,
    cancel: CancelOn,
) -> Result<bool, PatrolError> {
    link.send(&Command::SetMap { map_id: location_id.to_string() }).await?;
    let timeout = ms(link.config().timings.set_map_timeout_ms);
    let confirmed = link
        .wait_for(timeout, cancel, |m| {
            matches!(m, Inbound::SetMap { code: Some(codes::SET_MAP_OK) }).then_some(())
        })
        .await?
        .is_some();
    if confirmed {
        info!("location active");
    } else {
        warn!("location activation not confirmed");
    }
    Ok(confirmed)
}

/// Fetch the point list of `location_id`.  Empty on timeout.
#[instrument(skip(link, cancel))]
pub async fn get_points(
    link: &mut RobotLink,
    location_id: &str,
    cancel: CancelOn,
) -> Result<Vec<NamedPoint>, PatrolError> {
    link.send(&Command::PointList { map_id: location_id.to_string() }).await?;
    let timeout = ms(link.config().timings.point_list_timeout_ms);
    let points = link
        .wait_for(timeout, cancel, |m| match m {
            Inbound::PointList { code: Some(codes::POINT_LIST_OK), points } => Some(points.clone()),
            _ => None,
        })
        .await?
        .unwrap_or_default();
    info!(count = points.len(), "points received");
    Ok(points)
}

/// Pick the poses of a route leg.
///
/// # Errors
///
/// [`PatrolError::MissingWaypoint`] when the anchor or destination is absent.
pub fn resolve(location_id: &str, points: &[NamedPoint]) -> Result<LegPoses, PatrolError> {
    let wp = Waypoints::collect(points);
    Ok(LegPoses {
        anchor: require(location_id, wp.anchor, PointKind::AnchorPoint)?,
        destination: require(location_id, wp.destination, PointKind::Destination)?,
    })
}

/// Pick the poses of the charging location.
///
/// # Errors
///
/// [`PatrolError::MissingWaypoint`] when the anchor or pile is absent.
pub fn resolve_charge_station(
    location_id: &str,
    points: &[NamedPoint],
) -> Result<ChargeStation, PatrolError> {
    let wp = Waypoints::collect(points);
    Ok(ChargeStation {
        anchor: require(location_id, wp.anchor, PointKind::AnchorPoint)?,
        pile: require(location_id, wp.charge_pile, PointKind::Charge)?,
    })
}

fn require(location_id: &str, point: Option<Point>, kind: PointKind) -> Result<Point, PatrolError> {
    point.ok_or_else(|| PatrolError::MissingWaypoint {
        location_id: location_id.to_string(),
        kind,
    })
}
