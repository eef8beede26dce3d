//! The transport seam.
//!
//! The mission worker never speaks to a socket directly.  It holds a
//! [`RobotTransport`] for the duration of one cycle and obtains a fresh one
//! from a [`Connector`] at the start of every cycle.
//!
//! - [`WsTransport`][crate::ws::WsTransport] / [`WsConnector`][crate::ws::WsConnector]
//!   – the JSON WebSocket link to real firmware.
//! - [`SimRobot`][crate::sim::SimRobot] / [`SimConnector`][crate::sim::SimConnector]
//!   – a scripted in-process robot for headless tests.

use std::time::Duration;

use async_trait::async_trait;
use waypost_types::PatrolError;

use crate::protocol::{Command, Inbound};

/// One open connection to the robot.
///
/// # Contract
///
/// * `send` – transmit one command.  Fails only on connection loss.
/// * `receive` – wait up to `timeout` for the next decoded message.  A
///   timeout is `Ok(None)`, never an error; connection loss is
///   [`PatrolError::Transport`].
/// * `close` – release the connection.  Safe to call on a broken link.
#[async_trait]
pub trait RobotTransport: Send {
    async fn send(&mut self, command: &Command) -> Result<(), PatrolError>;

    async fn receive(&mut self, timeout: Duration) -> Result<Option<Inbound>, PatrolError>;

    async fn close(&mut self) -> Result<(), PatrolError>;
}

/// Opens a new [`RobotTransport`] per mission cycle.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RobotTransport>, PatrolError>;
}
