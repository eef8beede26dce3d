//! `waypost-runtime` – the mission worker and everything it drives.
//!
//! # Modules
//!
//! - [`controller`] – [`MissionController`]: the control surface.  Starts
//!   one mission worker and relays pause, resume, stop, quit, and emergency
//!   requests to it through the [`ControlHub`][waypost_kernel::ControlHub].
//! - [`mission`] – [`Orchestrator`]: the cycle loop.  Pre-charge, forward
//!   traversal, reverse traversal, post-charge, then repeat.
//! - [`navigator`] – [`LegNavigator`]: one directed hop with bounded retries,
//!   pause handling, and obstacle recovery.
//! - [`emergency`] – route planning and diversion to the safe leg.
//! - [`charging`] – battery reads, docking, and the charge monitor.
//! - [`relocation`], [`waypoints`], [`obstacle`] – protocol primitives the
//!   navigator and charger are built from.
//! - [`link`] – [`RobotLink`]: a cycle's connection with cancellable receives.
//! - [`names`] – display names for location identifiers.
//! - [`config`] – [`MissionConfig`]: thresholds, attempt bounds, and timings.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: the global
//!   subscriber, with an optional OTLP span exporter.

pub mod charging;
pub mod config;
pub mod controller;
pub mod emergency;
pub mod link;
pub mod mission;
pub mod names;
pub mod navigator;
pub mod obstacle;
pub mod relocation;
pub mod telemetry;
pub mod waypoints;

pub use config::{MissionConfig, Timings};
pub use controller::MissionController;
pub use link::{RobotLink, WorkerContext};
pub use mission::{MissionPlan, Orchestrator};
pub use names::{LocationNames, NameCache};
pub use navigator::{HopOptions, LegNavigator};
