use guard_core::TriggerEpisode;
use shared::domain::{ArmState, ConnectionStatus, ProximityReading, RemoteAlarmState};

use super::*;

#[test]
fn parses_commands_and_readings() {
    assert_eq!(parse_line("  ").expect("blank"), None);
    assert_eq!(parse_line("ARM").expect("arm"), Some(ConsoleCommand::Arm));
    assert_eq!(
        parse_line("30").expect("reading"),
        Some(ConsoleCommand::Reading(30.0))
    );
    assert_eq!(
        parse_line("server http://10.0.0.2:5000").expect("server"),
        Some(ConsoleCommand::Server("http://10.0.0.2:5000".to_string()))
    );
    assert_eq!(
        parse_line("stop-remote").expect("stop remote"),
        Some(ConsoleCommand::StopRemote)
    );
}

#[test]
fn rejects_unknown_input() {
    assert!(parse_line("explode").is_err());
    assert!(parse_line("server").is_err());
    assert!(parse_line("-5").is_err());
    assert!(parse_line("NaN").is_err());
}

#[test]
fn renders_armed_snapshot() {
    let snapshot = GuardSnapshot {
        arm_state: ArmState::Armed,
        sensor_available: true,
        phase: OrchestratorPhase::Triggering,
        local_alarm_active: true,
        connection: ConnectionStatus::Error,
        last_error: Some("connection refused".to_string()),
        remote_alarm: Some(RemoteAlarmState::observed_now(true)),
        last_reading: Some(ProximityReading::new(12.0, 1.0)),
        ..GuardSnapshot::default()
    };

    let rendered = render_snapshot(&snapshot);
    assert!(rendered.contains("security: armed | sensor: available | phase: triggering"));
    assert!(rendered.contains("server: Connection Error | server alarm ACTIVE | local alarm: on"));
    assert!(rendered.contains("last reading: 12.0 mm"));
    assert!(rendered.contains("last error: connection refused"));
    assert!(!rendered.contains("test alarm available"));
}

#[test]
fn describes_completed_episode() {
    let episode = TriggerEpisode::new(None);
    let text = describe_event(&GuardEvent::EpisodeCompleted(Box::new(episode)))
        .expect("described");
    assert_eq!(text, "episode finished: alert=skipped photo=none upload=skipped");
    assert_eq!(describe_event(&GuardEvent::Disarmed), None);
}
