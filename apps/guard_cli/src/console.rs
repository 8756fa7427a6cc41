use anyhow::{anyhow, bail, Result};
use guard_core::{GuardEvent, GuardSnapshot, OrchestratorPhase};

pub const HELP: &str = "\
commands:
  arm | disarm          toggle security mode
  <distance>            feed a proximity reading in mm, e.g. `30`
  trigger               test alarm (only without a proximity sensor)
  stop                  silence the local alarm
  stop-remote           ask the server to stop its alarm
  ping                  check the server connection
  server <url>          switch alarm server
  status                print the current state
  help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Arm,
    Disarm,
    Reading(f64),
    Trigger,
    StopLocal,
    StopRemote,
    Ping,
    Server(String),
    Status,
    Help,
    Quit,
}

/// Blank lines parse to `None`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let command = match head.to_ascii_lowercase().as_str() {
        "arm" => ConsoleCommand::Arm,
        "disarm" => ConsoleCommand::Disarm,
        "trigger" | "test" => ConsoleCommand::Trigger,
        "stop" => ConsoleCommand::StopLocal,
        "stop-remote" => ConsoleCommand::StopRemote,
        "ping" => ConsoleCommand::Ping,
        "status" => ConsoleCommand::Status,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        "server" => match rest.as_slice() {
            [url] => ConsoleCommand::Server((*url).to_string()),
            _ => bail!("usage: server <url>"),
        },
        other => {
            let distance: f64 = other
                .parse()
                .map_err(|_| anyhow!("unknown command '{other}'; type `help`"))?;
            if !distance.is_finite() || distance < 0.0 {
                bail!("distance must be a non-negative number of millimetres");
            }
            ConsoleCommand::Reading(distance)
        }
    };
    Ok(Some(command))
}

pub fn render_snapshot(snapshot: &GuardSnapshot) -> String {
    let mut lines = vec![format!(
        "security: {} | sensor: {} | phase: {}",
        if snapshot.arm_state.is_armed() {
            "armed"
        } else {
            "disarmed"
        },
        if snapshot.sensor_available {
            "available"
        } else {
            "unavailable"
        },
        match snapshot.phase {
            OrchestratorPhase::Idle => "idle",
            OrchestratorPhase::Triggering => "triggering",
            OrchestratorPhase::Settling => "settling",
        }
    )];

    let remote = match snapshot.remote_alarm {
        Some(state) if state.active => "server alarm ACTIVE",
        Some(_) => "server alarm off",
        None => "server alarm unknown",
    };
    lines.push(format!(
        "server: {} | {remote} | local alarm: {}",
        snapshot.connection.label(),
        if snapshot.local_alarm_active { "on" } else { "off" }
    ));

    if let Some(reading) = snapshot.last_reading {
        lines.push(format!("last reading: {:.1} mm", reading.distance_mm));
    }
    if snapshot.manual_trigger_enabled {
        lines.push("test alarm available".to_string());
    }
    if let Some(error) = &snapshot.last_error {
        lines.push(format!("last error: {error}"));
    }
    lines.push(format!("episodes completed: {}", snapshot.completed_episodes));
    lines.join("\n")
}

pub fn describe_event(event: &GuardEvent) -> Option<String> {
    let text = match event {
        GuardEvent::Armed { .. } | GuardEvent::Disarmed => return None,
        GuardEvent::EpisodeStarted { episode_id, manual } => {
            let source = if *manual { "test alarm" } else { "proximity" };
            format!("!! intruder alarm triggered ({source}) episode={episode_id}")
        }
        GuardEvent::TriggerDropped { distance_mm } => {
            format!("alarm already running; ignored reading {distance_mm:.1} mm")
        }
        GuardEvent::EpisodeSettling { .. } => "alarm actions settled".to_string(),
        GuardEvent::EpisodeCompleted(episode) => {
            format!("episode finished: {}", episode.summary())
        }
        GuardEvent::RemoteAlarmChanged(state) => format!(
            "server alarm is now {}",
            if state.active { "ACTIVE" } else { "off" }
        ),
        GuardEvent::Notice(message) => message.clone(),
        GuardEvent::CriticalFailure(message) => format!("ERROR: {message}"),
    };
    Some(text)
}

#[cfg(test)]
#[path = "tests/console_tests.rs"]
mod tests;
