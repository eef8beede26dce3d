//! Tuning knobs of the mission worker.
//!
//! Every field has a serde default so a config file only needs to name what
//! it changes.  Durations are stored in milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use waypost_types::PatrolError;

/// Thresholds, speeds, and attempt bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionConfig {
    /// Charge before a cycle (and after it) when the battery is below this.
    #[serde(default = "default_min_battery")]
    pub min_battery_percent: u8,

    /// Stop charging once the battery reaches this level.
    #[serde(default = "default_target_battery")]
    pub target_battery_percent: u8,

    #[serde(default = "default_cruise_speed")]
    pub cruise_speed: f64,

    /// Reduced speed used on diversion hops to avoid overshooting.
    #[serde(default = "default_emergency_speed")]
    pub emergency_speed: f64,

    #[serde(default = "default_hop_attempts")]
    pub hop_attempts: u32,

    #[serde(default = "default_emergency_hop_attempts")]
    pub emergency_hop_attempts: u32,

    #[serde(default = "default_relocate_retries")]
    pub relocate_retries: u32,

    /// `mode` field of `request_force_relocate`.
    #[serde(default = "default_relocate_mode")]
    pub relocate_mode: u8,

    /// Codes of `response_relocate_position` that count as accepted.
    /// Firmware versions disagree, so this is configurable.
    #[serde(default = "default_relocate_ack_codes")]
    pub relocate_ack_codes: Vec<i64>,

    #[serde(default = "default_dock_attempts")]
    pub dock_attempts: u32,

    /// Number of stop commands in a precision-stop burst.
    #[serde(default = "default_stop_burst")]
    pub stop_burst: u32,

    #[serde(default)]
    pub timings: Timings,
}

fn default_min_battery() -> u8 {
    20
}
fn default_target_battery() -> u8 {
    95
}
fn default_cruise_speed() -> f64 {
    0.5
}
fn default_emergency_speed() -> f64 {
    0.15
}
fn default_hop_attempts() -> u32 {
    9999
}
fn default_emergency_hop_attempts() -> u32 {
    3
}
fn default_relocate_retries() -> u32 {
    3
}
fn default_relocate_mode() -> u8 {
    2
}
fn default_relocate_ack_codes() -> Vec<i64> {
    vec![0, 4000]
}
fn default_dock_attempts() -> u32 {
    3
}
fn default_stop_burst() -> u32 {
    3
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            min_battery_percent: default_min_battery(),
            target_battery_percent: default_target_battery(),
            cruise_speed: default_cruise_speed(),
            emergency_speed: default_emergency_speed(),
            hop_attempts: default_hop_attempts(),
            emergency_hop_attempts: default_emergency_hop_attempts(),
            relocate_retries: default_relocate_retries(),
            relocate_mode: default_relocate_mode(),
            relocate_ack_codes: default_relocate_ack_codes(),
            dock_attempts: default_dock_attempts(),
            stop_burst: default_stop_burst(),
            timings: Timings::default(),
        }
    }
}

impl MissionConfig {
    /// Reject combinations the worker cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`PatrolError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<(), PatrolError> {
        if self.min_battery_percent > self.target_battery_percent {
            return Err(PatrolError::Config(format!(
                "min_battery_percent ({}) exceeds target_battery_percent ({})",
                self.min_battery_percent, self.target_battery_percent
            )));
        }
        if self.target_battery_percent > 100 {
            return Err(PatrolError::Config(
                "target_battery_percent must be at most 100".to_string(),
            ));
        }
        if self.hop_attempts == 0 || self.emergency_hop_attempts == 0 {
            return Err(PatrolError::Config("hop attempt bounds must be at least 1".to_string()));
        }
        if self.relocate_retries == 0 || self.dock_attempts == 0 {
            return Err(PatrolError::Config(
                "relocate_retries and dock_attempts must be at least 1".to_string(),
            ));
        }
        if self.relocate_ack_codes.is_empty() {
            return Err(PatrolError::Config("relocate_ack_codes must not be empty".to_string()));
        }
        if !(self.cruise_speed > 0.0 && self.emergency_speed > 0.0) {
            return Err(PatrolError::Config("speeds must be positive".to_string()));
        }
        Ok(())
    }
}

/// Every timeout and settle delay, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub set_map_timeout_ms: u64,
    pub point_list_timeout_ms: u64,
    pub reset_map_settle_ms: u64,
    pub relocate_timeout_ms: u64,
    pub localization_timeout_ms: u64,
    pub relocate_retry_delay_ms: u64,
    pub post_relocate_settle_ms: u64,
    pub cancel_settle_ms: u64,
    pub drain_poll_ms: u64,
    pub readiness_timeout_ms: u64,
    pub readiness_poll_ms: u64,
    pub navigation_timeout_ms: u64,
    pub navigation_poll_ms: u64,
    pub resume_settle_ms: u64,
    pub hop_retry_delay_ms: u64,
    pub stop_burst_interval_ms: u64,
    /// Interval of the stop burst issued on reaching the safe leg.
    pub safe_stop_interval_ms: u64,
    pub status_readback_timeout_ms: u64,
    pub obstacle_wait_ms: u64,
    pub obstacle_poll_ms: u64,
    pub alternative_path_settle_ms: u64,
    pub battery_timeout_ms: u64,
    pub dock_timeout_ms: u64,
    pub dock_settle_ms: u64,
    pub charge_confirm_interval_ms: u64,
    pub dock_retry_delay_ms: u64,
    pub charge_monitor_interval_ms: u64,
    pub charge_ceiling_ms: u64,
    pub undock_settle_ms: u64,
    pub inter_leg_delay_ms: u64,
    pub inter_cycle_delay_ms: u64,
    pub reconnect_backoff_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            set_map_timeout_ms: 10_000,
            point_list_timeout_ms: 5_000,
            reset_map_settle_ms: 2_000,
            relocate_timeout_ms: 10_000,
            localization_timeout_ms: 15_000,
            relocate_retry_delay_ms: 5_000,
            post_relocate_settle_ms: 2_000,
            cancel_settle_ms: 1_000,
            drain_poll_ms: 100,
            readiness_timeout_ms: 10_000,
            readiness_poll_ms: 1_000,
            navigation_timeout_ms: 180_000,
            navigation_poll_ms: 1_000,
            resume_settle_ms: 1_000,
            hop_retry_delay_ms: 10_000,
            stop_burst_interval_ms: 200,
            safe_stop_interval_ms: 500,
            status_readback_timeout_ms: 2_000,
            obstacle_wait_ms: 30_000,
            obstacle_poll_ms: 2_000,
            alternative_path_settle_ms: 3_000,
            battery_timeout_ms: 10_000,
            dock_timeout_ms: 120_000,
            dock_settle_ms: 5_000,
            charge_confirm_interval_ms: 5_000,
            dock_retry_delay_ms: 5_000,
            charge_monitor_interval_ms: 30_000,
            charge_ceiling_ms: 3_600_000,
            undock_settle_ms: 5_000,
            inter_leg_delay_ms: 3_000,
            inter_cycle_delay_ms: 10_000,
            reconnect_backoff_ms: 30_000,
        }
    }
}

/// Shorthand for turning a millisecond field into a [`Duration`].
pub(crate) fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}
