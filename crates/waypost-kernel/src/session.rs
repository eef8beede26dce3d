//! Mission session state and the read-only status board.
//!
//! [`MissionSession`] is owned by the mission worker alone; only it mutates
//! `position` and `phase`.  Everyone else reads the [`StatusBoard`], whose
//! snapshot is rebuilt and swapped wholesale on each update so readers never
//! observe a half-written status.

use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use waypost_types::{BatteryReading, ControlResponse, Leg, LegOutcome, MissionState, Phase};

// ────────────────────────────────────────────────────────────────────────────
// Session
// ────────────────────────────────────────────────────────────────────────────

/// Where the robot is in the round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionSession {
    pub legs: Vec<Leg>,
    pub charge_location: String,
    pub phase: Phase,
    /// Index of the leg currently occupied or most recently finished.
    pub position: usize,
    pub outcomes: Vec<LegOutcome>,
}

impl MissionSession {
    pub fn new(legs: Vec<Leg>, charge_location: impl Into<String>) -> Self {
        Self {
            legs,
            charge_location: charge_location.into(),
            phase: Phase::Forward,
            position: 0,
            outcomes: Vec::new(),
        }
    }

    /// Rewind to the start of a fresh cycle.
    pub fn begin_cycle(&mut self) {
        self.phase = Phase::Forward;
        self.position = 0;
        self.outcomes.clear();
    }

    /// Record a hop's terminal outcome and move `position` onto its leg.
    pub fn record(&mut self, leg_index: usize, phase: Phase, success: bool) -> LegOutcome {
        self.position = leg_index;
        let outcome = LegOutcome {
            leg_index,
            location_id: self.legs[leg_index].location_id.clone(),
            phase,
            success,
        };
        self.outcomes.push(outcome.clone());
        outcome
    }

    /// Index of `location_id` within the route.
    pub fn index_of(&self, location_id: &str) -> Option<usize> {
        self.legs.iter().position(|l| l.location_id == location_id)
    }

    /// Up to `count` legs that follow `index` in the direction of `phase`.
    pub fn upcoming(&self, index: usize, phase: Phase, count: usize) -> Vec<&Leg> {
        match phase {
            Phase::Forward => self.legs.iter().skip(index + 1).take(count).collect(),
            Phase::Reverse => self.legs[..index.min(self.legs.len())]
                .iter()
                .rev()
                .take(count)
                .collect(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Status board
// ────────────────────────────────────────────────────────────────────────────

/// Everything a status query reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub state: MissionState,
    pub cycle: u64,
    pub position: usize,
    pub phase: Phase,
    pub outcomes: Vec<LegOutcome>,
    pub battery: Option<BatteryReading>,
    /// Display name of the leg being worked on.
    pub current_leg: Option<String>,
    /// Display names of the next legs in travel direction.
    pub upcoming_legs: Vec<String>,
    /// Result of the last finished mission run.
    pub last_result: Option<ControlResponse>,
}

/// Shared, read-mostly mission status.
#[derive(Debug, Default)]
pub struct StatusBoard {
    snapshot: RwLock<Arc<StatusSnapshot>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot.  Cheap; never blocks on the writer for long.
    pub fn snapshot(&self) -> Arc<StatusSnapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Build the next snapshot from a copy of the current one and publish it.
    pub fn update(&self, edit: impl FnOnce(&mut StatusSnapshot)) {
        let mut next = (*self.snapshot()).clone();
        edit(&mut next);
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }

    /// Start over for a new run, keeping the last battery reading.
    pub fn reset(&self) {
        let battery = self.snapshot().battery;
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(StatusSnapshot {
            battery,
            ..StatusSnapshot::default()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(ids: &[&str]) -> MissionSession {
        MissionSession::new(Leg::sequence(ids.iter().copied()), "charge")
    }

    fn ids(legs: Vec<&Leg>) -> Vec<&str> {
        legs.into_iter().map(|l| l.location_id.as_str()).collect()
    }

    #[test]
    fn record_moves_position_and_logs_outcome() {
        let mut s = session(&["a", "b", "c"]);
        s.record(1, Phase::Forward, true);
        assert_eq!(s.position, 1);
        assert_eq!(s.outcomes.len(), 1);
        assert_eq!(s.outcomes[0].location_id, "b");
    }

    #[test]
    fn begin_cycle_rewinds() {
        let mut s = session(&["a", "b"]);
        s.phase = Phase::Reverse;
        s.record(1, Phase::Reverse, false);
        s.begin_cycle();
        assert_eq!(s.phase, Phase::Forward);
        assert_eq!(s.position, 0);
        assert!(s.outcomes.is_empty());
    }

    #[test]
    fn upcoming_is_direction_aware() {
        let s = session(&["a", "b", "c", "d"]);
        assert_eq!(ids(s.upcoming(1, Phase::Forward, 2)), vec!["c", "d"]);
        assert_eq!(ids(s.upcoming(3, Phase::Forward, 2)), Vec::<&str>::new());
        assert_eq!(ids(s.upcoming(2, Phase::Reverse, 2)), vec!["b", "a"]);
        assert_eq!(ids(s.upcoming(0, Phase::Reverse, 2)), Vec::<&str>::new());
    }

    #[test]
    fn index_of_finds_location() {
        let s = session(&["a", "b"]);
        assert_eq!(s.index_of("b"), Some(1));
        assert_eq!(s.index_of("zz"), None);
    }

    #[test]
    fn board_update_replaces_snapshot() {
        let board = StatusBoard::new();
        let before = board.snapshot();
        board.update(|s| {
            s.cycle = 3;
            s.state = MissionState::ForwardTraversal;
        });
        let after = board.snapshot();
        assert_eq!(before.cycle, 0, "old snapshot is untouched");
        assert_eq!(after.cycle, 3);
        assert_eq!(after.state, MissionState::ForwardTraversal);
    }

    #[test]
    fn board_reset_keeps_battery() {
        let board = StatusBoard::new();
        board.update(|s| {
            s.cycle = 9;
            s.battery = Some(BatteryReading::assumed_full());
        });
        board.reset();
        let snap = board.snapshot();
        assert_eq!(snap.cycle, 0);
        assert_eq!(snap.battery, Some(BatteryReading::assumed_full()));
    }
}
