//! `waypost-kernel` – Signals & Shared State
//!
//! The coordination layer between the operator-facing control surface and
//! the single mission worker.  It does not navigate; it holds the flags and
//! status that both sides agree on.
//!
//! # Modules
//!
//! - [`control`] – [`ControlHub`][control::ControlHub]: pause, stop, quit,
//!   and emergency flags with change notification, cancellable sleeps, and
//!   the diversion re-entrancy guard.
//! - [`session`] – [`MissionSession`][session::MissionSession] (route,
//!   position, phase) and the wholesale-replaced
//!   [`StatusBoard`][session::StatusBoard] read by status queries.

pub mod control;
pub mod session;

pub use control::{CancelOn, ControlHub, DiversionGuard};
pub use session::{MissionSession, StatusBoard, StatusSnapshot};
