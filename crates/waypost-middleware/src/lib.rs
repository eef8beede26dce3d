//! `waypost-middleware` – The Robot Link
//!
//! Moves typed messages between the mission worker and the robot firmware
//! without caring what the mission does with them.
//!
//! # Modules
//!
//! - [`protocol`] – the closed set of outbound [`Command`]s and decoded
//!   [`Inbound`] messages, plus the firmware's status codes.
//! - [`transport`] – the [`RobotTransport`] / [`Connector`] seam the mission
//!   worker is written against.
//! - [`ws`] – JSON-over-WebSocket implementation built on `tokio-tungstenite`.
//! - [`discovery`] – [`EndpointProvider`] seam supplying the robot address.
//! - [`bus`] – topic-based broadcast bus for mission announcements.
//! - [`sim`] – scripted in-process robot for headless tests.

pub mod bus;
pub mod discovery;
pub mod protocol;
pub mod sim;
pub mod transport;
pub mod ws;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use discovery::{Endpoint, EndpointProvider, StaticEndpoint};
pub use protocol::{Command, HeartbeatStatus, Inbound};
pub use transport::{Connector, RobotTransport};
pub use ws::{WsConnector, WsTransport};
