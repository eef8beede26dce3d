//! Battery telemetry and the dock-and-charge procedure.
//!
//! Charging is a long wait (up to an hour of monitoring), so only `quit` may
//! interrupt it; `stop` takes effect once the robot is off the pile.

use tokio::time::Instant;
use tracing::{info, instrument, warn};
use waypost_kernel::CancelOn;
use waypost_middleware::protocol::{GOAL_OUT_OF_COSTMAP_MSG, codes};
use waypost_middleware::{Command, Inbound, Topic};
use waypost_types::{BatteryReading, ChargingStatus, EventPayload, PatrolError, Point};

use crate::config::ms;
use crate::link::RobotLink;
use crate::relocation::relocate_with_retry;
use crate::waypoints::{ChargeStation, activate_location};

const CANCEL: CancelOn = CancelOn::Quit;
const SOURCE: &str = "waypost-runtime::charging";

/// How the robot answered a dock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DockReply {
    Docked,
    NoPile,
    OutOfCostmap,
    NoAnswer,
}

/// How a charge-monitoring session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Monitor {
    Reached(u8),
    ChargingStopped(u8),
    Ceiling,
}

/// Read the battery.  Falls back to [`BatteryReading::assumed_full`] when
/// telemetry does not arrive in time.
///
/// Every reading is published to the status board and the telemetry topic.
pub async fn get_battery_status(link: &mut RobotLink) -> Result<BatteryReading, PatrolError> {
    link.send(&Command::BatteryInfo).await?;
    let timeout = ms(link.config().timings.battery_timeout_ms);
    let reading = match link
        .wait_for(timeout, CANCEL, |m| match m {
            Inbound::BatteryInfo(r) => Some(*r),
            _ => None,
        })
        .await?
    {
        Some(r) => r,
        None => {
            warn!("battery telemetry timed out; assuming full");
            BatteryReading::assumed_full()
        }
    };
    info!(level_percent = reading.level_percent, status = ?reading.charging_status, "battery");

    let ctx = link.ctx();
    ctx.board.update(|s| s.battery = Some(reading));
    ctx.announce(Topic::Telemetry, SOURCE, EventPayload::Battery(reading));
    Ok(reading)
}

/// Dock on `pile` and charge to `target_percent`.
///
/// Each attempt docks, confirms charging, then monitors.  A dock refusal is
/// retried after a delay; docking without charging, or charging that stops
/// before the target, is undocked first.  Returns `Ok(false)` when all
/// attempts fail or the monitoring ceiling elapses.
#[instrument(skip(link, pile), fields(%pile))]
pub async fn dock_charge(
    link: &mut RobotLink,
    location_id: &str,
    pile: Point,
    target_percent: u8,
    max_attempts: u32,
) -> Result<bool, PatrolError> {
    let timings = link.config().timings.clone();

    for attempt in 1..=max_attempts {
        link.hub().check(CANCEL)?;
        info!(attempt, max_attempts, "dock attempt");

        let reply = request_dock(link, location_id, pile).await?;
        let undock = if reply != DockReply::Docked {
            warn!(attempt, ?reply, "docking failed");
            false
        } else {
            link.sleep(ms(timings.dock_settle_ms), CANCEL).await?;
            if !confirm_charging(link).await? {
                warn!(attempt, "docked but not charging");
                true
            } else {
                match monitor(link, target_percent).await? {
                    Monitor::Reached(level) => {
                        info!(level_percent = level, "charge target reached");
                        return Ok(true);
                    }
                    Monitor::Ceiling => {
                        warn!("charge ceiling elapsed before target");
                        return Ok(false);
                    }
                    Monitor::ChargingStopped(level) => {
                        warn!(attempt, level_percent = level, "charging stopped before target");
                        true
                    }
                }
            }
        };

        if attempt == max_attempts {
            break;
        }
        if undock {
            link.send(&Command::DockChargeOff).await?;
        }
        link.sleep(ms(timings.dock_retry_delay_ms), CANCEL).await?;
    }
    warn!(max_attempts, "all dock attempts failed");
    Ok(false)
}

async fn request_dock(link: &mut RobotLink, location_id: &str, pile: Point) -> Result<DockReply, PatrolError> {
    link.send(&Command::dock(location_id, pile)).await?;
    let timeout = ms(link.config().timings.dock_timeout_ms);
    let reply = link
        .wait_for(timeout, CANCEL, |m| match m {
            Inbound::DockCtrl { code: Some(codes::DOCKED) } => Some(DockReply::Docked),
            Inbound::DockCtrl { code: Some(codes::NO_PILE) } => Some(DockReply::NoPile),
            Inbound::HeartBeat { msg, .. } if msg.contains(GOAL_OUT_OF_COSTMAP_MSG) => {
                Some(DockReply::OutOfCostmap)
            }
            _ => None,
        })
        .await?;
    Ok(reply.unwrap_or(DockReply::NoAnswer))
}

/// Poll the battery until it reports a pile.
async fn confirm_charging(link: &mut RobotLink) -> Result<bool, PatrolError> {
    const CHECKS: u32 = 3;
    let interval = ms(link.config().timings.charge_confirm_interval_ms);
    for check in 1..=CHECKS {
        let reading = get_battery_status(link).await?;
        if reading.on_pile() {
            info!(check, "charging confirmed");
            return Ok(true);
        }
        if check < CHECKS {
            link.sleep(interval, CANCEL).await?;
        }
    }
    Ok(false)
}

async fn monitor(link: &mut RobotLink, target_percent: u8) -> Result<Monitor, PatrolError> {
    let timings = link.config().timings.clone();
    let ceiling = Instant::now() + ms(timings.charge_ceiling_ms);
    loop {
        let reading = get_battery_status(link).await?;
        if reading.level_percent >= target_percent {
            return Ok(Monitor::Reached(reading.level_percent));
        }
        if reading.charging_status == ChargingStatus::Idle {
            return Ok(Monitor::ChargingStopped(reading.level_percent));
        }
        if Instant::now() >= ceiling {
            return Ok(Monitor::Ceiling);
        }
        link.sleep(ms(timings.charge_monitor_interval_ms), CANCEL).await?;
    }
}

/// Charge at `station` if the battery is below `threshold`.
///
/// # Errors
///
/// [`PatrolError::ChargingFailed`] when charging was needed and did not
/// complete; `Interrupted` on `quit`.
#[instrument(skip(link, station))]
pub async fn ensure_battery_above(
    link: &mut RobotLink,
    threshold: u8,
    location_id: &str,
    station: &ChargeStation,
) -> Result<(), PatrolError> {
    let reading = get_battery_status(link).await?;
    if reading.level_percent >= threshold {
        info!(level_percent = reading.level_percent, "battery sufficient");
        return Ok(());
    }
    info!(level_percent = reading.level_percent, "charging required");

    let config = link.config().clone();
    if !activate_location(link, location_id, CANCEL).await? {
        return Err(PatrolError::ChargingFailed(format!("charge location {location_id} not activated")));
    }
    if !relocate_with_retry(link, station.anchor, config.relocate_retries, CANCEL).await? {
        return Err(PatrolError::ChargingFailed("relocation to charge anchor failed".into()));
    }
    link.sleep(ms(config.timings.post_relocate_settle_ms), CANCEL).await?;

    if !dock_charge(link, location_id, station.pile, config.target_battery_percent, config.dock_attempts).await? {
        return Err(PatrolError::ChargingFailed("dock and charge failed".into()));
    }

    info!("undocking");
    link.send(&Command::DockChargeOff).await?;
    link.sleep(ms(config.timings.undock_settle_ms), CANCEL).await?;
    Ok(())
}
