use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{
    domain::{EpisodeId, PhotoRef, ProximityReading},
    error::GuardError,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerEpisode {
    pub episode_id: EpisodeId,
    pub started_at: DateTime<Utc>,
    /// `None` for a manual trigger.
    pub source_reading: Option<ProximityReading>,
    pub local_alarm_active: bool,
    pub sound_error: Option<GuardError>,
    pub photo: Option<PhotoRef>,
    pub capture_error: Option<GuardError>,
    pub alert_sent: bool,
    pub alert_error: Option<GuardError>,
    pub photo_sent: bool,
    pub photo_send_error: Option<GuardError>,
    pub critical_error: Option<GuardError>,
    pub cancelled: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TriggerEpisode {
    pub fn new(source_reading: Option<ProximityReading>) -> Self {
        Self {
            episode_id: EpisodeId::new(),
            started_at: Utc::now(),
            source_reading,
            local_alarm_active: false,
            sound_error: None,
            photo: None,
            capture_error: None,
            alert_sent: false,
            alert_error: None,
            photo_sent: false,
            photo_send_error: None,
            critical_error: None,
            cancelled: false,
            completed_at: None,
        }
    }

    pub fn is_manual(&self) -> bool {
        self.source_reading.is_none()
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn summary(&self) -> String {
        let mut parts = vec![
            format!("alert={}", outcome(self.alert_sent, self.alert_error.as_ref())),
            format!(
                "photo={}",
                match (&self.photo, &self.capture_error) {
                    (Some(_), _) => "captured",
                    (None, Some(_)) => "failed",
                    (None, None) => "none",
                }
            ),
            format!(
                "upload={}",
                outcome(self.photo_sent, self.photo_send_error.as_ref())
            ),
        ];
        if self.critical_error.is_some() {
            parts.push("critical".to_string());
        }
        if self.cancelled {
            parts.push("cancelled".to_string());
        }
        parts.join(" ")
    }
}

fn outcome(sent: bool, error: Option<&GuardError>) -> &'static str {
    match (sent, error) {
        (true, _) => "sent",
        (false, Some(_)) => "failed",
        (false, None) => "skipped",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_episode_has_no_source_reading() {
        let episode = TriggerEpisode::new(None);
        assert!(episode.is_manual());
        assert!(!episode.is_completed());
    }

    #[test]
    fn summary_reports_partial_failure() {
        let mut episode = TriggerEpisode::new(Some(ProximityReading::new(30.0, 1.0)));
        episode.alert_error = Some(GuardError::alert_send("500"));
        episode.photo = Some(PhotoRef {
            path: "intruder_1.jpg".into(),
            captured_at: Utc::now(),
        });
        episode.photo_sent = true;

        assert_eq!(episode.summary(), "alert=failed photo=captured upload=sent");
    }
}
