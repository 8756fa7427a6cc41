use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    SensorUnavailable,
    CaptureFailure,
    ConnectionError,
    AlertSendError,
    PhotoSendError,
    StopAlarmError,
    AlarmPlaybackError,
    UnexpectedOrchestratorError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::SensorUnavailable => "sensor_unavailable",
            ErrorCode::CaptureFailure => "capture_failure",
            ErrorCode::ConnectionError => "connection_error",
            ErrorCode::AlertSendError => "alert_send_error",
            ErrorCode::PhotoSendError => "photo_send_error",
            ErrorCode::StopAlarmError => "stop_alarm_error",
            ErrorCode::AlarmPlaybackError => "alarm_playback_error",
            ErrorCode::UnexpectedOrchestratorError => "unexpected_orchestrator_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct GuardError {
    pub code: ErrorCode,
    pub message: String,
}

impl GuardError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn sensor_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SensorUnavailable, message)
    }

    pub fn capture(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CaptureFailure, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConnectionError, message)
    }

    pub fn alert_send(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AlertSendError, message)
    }

    pub fn photo_send(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PhotoSendError, message)
    }

    pub fn stop_alarm(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StopAlarmError, message)
    }

    pub fn playback(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AlarmPlaybackError, message)
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnexpectedOrchestratorError, message)
    }

    /// Only an orchestrator that could not settle normally warrants a dialog.
    pub fn is_blocking(&self) -> bool {
        self.code == ErrorCode::UnexpectedOrchestratorError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unexpected_errors_block() {
        assert!(GuardError::unexpected("boom").is_blocking());
        assert!(!GuardError::alert_send("timeout").is_blocking());
        assert!(!GuardError::capture("camera not ready").is_blocking());
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = GuardError::photo_send("413 payload too large");
        assert_eq!(err.to_string(), "photo_send_error: 413 payload too large");
    }

    #[test]
    fn error_code_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorCode::StopAlarmError).expect("serialize");
        assert_eq!(json, "\"stop_alarm_error\"");
    }
}
