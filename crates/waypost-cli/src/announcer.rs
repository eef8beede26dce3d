//! Prints bus events to the terminal as the mission progresses.

use std::sync::Arc;

use colored::Colorize;
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use waypost_middleware::TopicReceiver;
use waypost_runtime::{LocationNames, NameCache};
use waypost_types::{ChargingStatus, EventPayload, MissionState, Phase};

/// One task per topic; each ends when the bus is dropped.
pub fn spawn(runtime: &Handle, receivers: Vec<TopicReceiver>, names: Arc<NameCache>) {
    for mut rx in receivers {
        let names = Arc::clone(&names);
        runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Some(line) = describe(&event.payload, names.as_ref()) {
                            println!("  {line}");
                        }
                    }
                    Err(RecvError::Lagged(n)) => debug!(topic = ?rx.topic(), n, "announcer lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }
}

/// Operator-facing line for an event, or `None` when it is not worth saying.
pub fn describe(payload: &EventPayload, names: &dyn LocationNames) -> Option<String> {
    let line = match payload {
        EventPayload::StateChanged { state, cycle } => {
            let label = match state {
                MissionState::Idle => return None,
                MissionState::PreCharge => format!("cycle {cycle}: checking battery"),
                MissionState::ForwardTraversal => format!("cycle {cycle}: outbound"),
                MissionState::ReverseTraversal => format!("cycle {cycle}: returning"),
                MissionState::PostCharge => format!("cycle {cycle}: topping up"),
                MissionState::Diverting => "diverting to safe location".to_string(),
                MissionState::Quitting => "mission quit".to_string(),
            };
            format!("{} {}", "▶".cyan(), label)
        }
        EventPayload::HopFinished(outcome) => {
            let name = names.display_name(&outcome.location_id);
            let dir = match outcome.phase {
                Phase::Forward => "→",
                Phase::Reverse => "←",
            };
            if outcome.success {
                format!("{} {dir} {}", "✓".green(), name.bold())
            } else {
                format!("{} {dir} {} {}", "✗".red(), name.bold(), "(leg failed)".red())
            }
        }
        EventPayload::Battery(reading) => {
            let status = match reading.charging_status {
                ChargingStatus::Idle => "idle",
                ChargingStatus::Charging => "charging",
                ChargingStatus::Fault => "pile fault",
            };
            format!("{} battery {}% ({status})", "⚡".yellow(), reading.level_percent)
        }
        EventPayload::Obstacle { location_id, cleared } => {
            let name = names.display_name(location_id);
            if *cleared {
                format!("{} obstacle at {name} resolved", "✓".green())
            } else {
                format!("{} obstacle at {name} not resolved", "⚠".yellow().bold())
            }
        }
        EventPayload::Emergency { success, message } => {
            if *success {
                format!("{} {message}", "⛑".green().bold())
            } else {
                format!("{} {}", "⛑".red().bold(), message.red())
            }
        }
    };
    Some(line)
}
