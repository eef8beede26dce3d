//! Forced relocation and localization confirmation.

use std::time::Duration;

use tracing::{info, instrument, warn};
use waypost_kernel::CancelOn;
use waypost_middleware::{Command, HeartbeatStatus, Inbound};
use waypost_types::{PatrolError, Point};

use crate::config::ms;
use crate::link::RobotLink;

/// Tell the robot where it is.  `Ok(true)` once an accepted code arrives.
#[instrument(skip(link, cancel), fields(%point))]
pub async fn relocate(link: &mut RobotLink, point: Point, cancel: CancelOn) -> Result<bool, PatrolError> {
    let mode = link.config().relocate_mode;
    link.send(&Command::relocate(point, mode)).await?;

    let accepted = link.config().relocate_ack_codes.clone();
    let timeout = ms(link.config().timings.relocate_timeout_ms);
    let ack = link
        .wait_for(timeout, cancel, |m| match m {
            Inbound::RelocatePosition { code } => Some(*code),
            _ => None,
        })
        .await?;

    match ack {
        Some(Some(code)) if accepted.contains(&code) => {
            info!(code, "relocation acknowledged");
            Ok(true)
        }
        Some(code) => {
            warn!(?code, "relocation rejected");
            Ok(false)
        }
        None => {
            warn!("relocation not acknowledged");
            Ok(false)
        }
    }
}

/// Wait for a localized heartbeat, or any heartbeat that carries a pose.
pub async fn wait_for_localization(
    link: &mut RobotLink,
    timeout: Duration,
    cancel: CancelOn,
) -> Result<bool, PatrolError> {
    let localized = link
        .wait_for(timeout, cancel, |m| match m {
            Inbound::HeartBeat { has_position: true, .. } => Some(()),
            other if other.heartbeat() == Some(HeartbeatStatus::Localized) => Some(()),
            _ => None,
        })
        .await?
        .is_some();
    if !localized {
        warn!("localization timed out");
    }
    Ok(localized)
}

/// Reset, relocate, and confirm localization, up to `retries` times.
#[instrument(skip(link, cancel), fields(%point))]
pub async fn relocate_with_retry(
    link: &mut RobotLink,
    point: Point,
    retries: u32,
    cancel: CancelOn,
) -> Result<bool, PatrolError> {
    let timings = link.config().timings.clone();
    for attempt in 1..=retries {
        link.hub().check(cancel)?;
        link.send(&Command::ResetMap).await?;
        link.sleep(ms(timings.reset_map_settle_ms), cancel).await?;

        if relocate(link, point, cancel).await?
            && wait_for_localization(link, ms(timings.localization_timeout_ms), cancel).await?
        {
            info!(attempt, "relocated and localized");
            return Ok(true);
        }

        if attempt < retries {
            warn!(attempt, retries, "relocation attempt failed; retrying");
            link.sleep(ms(timings.relocate_retry_delay_ms), cancel).await?;
        }
    }
    warn!(retries, "relocation failed after all attempts");
    Ok(false)
}
