//! Where the robot can be reached.
//!
//! Discovery itself (network scans, mDNS, a fleet registry) lives outside the
//! supervisor.  The mission only asks an [`EndpointProvider`] for the current
//! address at the start of every cycle, so a robot that changes address
//! between cycles is picked up on reconnect.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use waypost_types::PatrolError;

/// Address of the robot's WebSocket endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

/// Supplies the current robot endpoint.
#[async_trait]
pub trait EndpointProvider: Send + Sync {
    async fn resolve(&self) -> Result<Endpoint, PatrolError>;
}

/// A fixed endpoint, typically read from the config file.
#[derive(Debug, Clone)]
pub struct StaticEndpoint(pub Endpoint);

#[async_trait]
impl EndpointProvider for StaticEndpoint {
    async fn resolve(&self) -> Result<Endpoint, PatrolError> {
        if self.0.host.trim().is_empty() {
            return Err(PatrolError::Config("robot host is empty".to_string()));
        }
        Ok(self.0.clone())
    }
}
