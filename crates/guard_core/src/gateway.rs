use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{
    multipart::{Form, Part},
    Client, Response,
};
use shared::{
    domain::{PhotoRef, RemoteAlarmState},
    error::GuardError,
    protocol::{
        iso_timestamp, AlarmStatusResponse, AlertRequest, PingResponse, ServerAck,
        PHOTO_MIME_TYPE,
    },
};
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

/// The remote alarm server. Every call is bounded by a timeout and reports
/// failure as a typed error; no call retries.
#[async_trait]
pub trait ServerGateway: Send + Sync {
    async fn ping(&self) -> std::result::Result<(), GuardError>;
    async fn send_alert(&self, payload: &AlertRequest) -> std::result::Result<ServerAck, GuardError>;
    async fn send_photo(&self, photo: &PhotoRef) -> std::result::Result<ServerAck, GuardError>;
    /// `None` means unknown; polling failures never surface as errors.
    async fn get_remote_alarm_state(&self) -> Option<RemoteAlarmState>;
    async fn stop_remote_alarm(&self) -> std::result::Result<ServerAck, GuardError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayTimeouts {
    pub ping: Duration,
    pub alert: Duration,
    pub photo: Duration,
}

impl Default for GatewayTimeouts {
    fn default() -> Self {
        Self {
            ping: Duration::from_secs(5),
            alert: Duration::from_secs(10),
            photo: Duration::from_secs(30),
        }
    }
}

pub struct HttpServerGateway {
    http: Client,
    base_url: RwLock<Url>,
    timeouts: GatewayTimeouts,
}

impl HttpServerGateway {
    pub fn new(base_url: &str, timeouts: GatewayTimeouts) -> std::result::Result<Self, GuardError> {
        Ok(Self {
            http: Client::new(),
            base_url: RwLock::new(parse_base_url(base_url)?),
            timeouts,
        })
    }

    pub async fn base_url(&self) -> String {
        self.base_url.read().await.to_string()
    }

    pub async fn set_base_url(&self, base_url: &str) -> std::result::Result<(), GuardError> {
        let parsed = parse_base_url(base_url)?;
        info!(server_url = %parsed, "alarm server changed");
        *self.base_url.write().await = parsed;
        Ok(())
    }

    async fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.read().await;
        format!("{}/{path}", base.as_str().trim_end_matches('/'))
    }

    async fn ping_impl(&self) -> Result<()> {
        let body: PingResponse = self
            .http
            .get(self.endpoint("ping").await)
            .timeout(self.timeouts.ping)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("unexpected ping body")?;
        if !body.is_ok() {
            bail!("server reported status '{}'", body.status);
        }
        Ok(())
    }

    async fn send_alert_impl(&self, payload: &AlertRequest) -> Result<ServerAck> {
        let response = self
            .http
            .post(self.endpoint("alert").await)
            .timeout(self.timeouts.alert)
            .json(payload)
            .send()
            .await?
            .error_for_status()?;
        read_ack(response).await
    }

    async fn send_photo_impl(&self, photo: &PhotoRef) -> Result<ServerAck> {
        let bytes = tokio::fs::read(&photo.path)
            .await
            .with_context(|| format!("failed to read photo '{}'", photo.path.display()))?;
        let part = Part::bytes(bytes)
            .file_name(photo.file_name())
            .mime_str(PHOTO_MIME_TYPE)?;
        let form = Form::new()
            .part("photo", part)
            .text("timestamp", iso_timestamp(photo.captured_at));

        let response = self
            .http
            .post(self.endpoint("upload-photo").await)
            .timeout(self.timeouts.photo)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        read_ack(response).await
    }

    async fn alarm_status_impl(&self) -> Result<AlarmStatusResponse> {
        Ok(self
            .http
            .get(self.endpoint("get-alarm-status").await)
            .timeout(self.timeouts.ping)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn stop_remote_alarm_impl(&self) -> Result<ServerAck> {
        let response = self
            .http
            .post(self.endpoint("stop-alarm").await)
            .timeout(self.timeouts.alert)
            .send()
            .await?
            .error_for_status()?;
        read_ack(response).await
    }
}

#[async_trait]
impl ServerGateway for HttpServerGateway {
    async fn ping(&self) -> std::result::Result<(), GuardError> {
        self.ping_impl()
            .await
            .map_err(|err| GuardError::connection(format!("{err:#}")))
    }

    async fn send_alert(&self, payload: &AlertRequest) -> std::result::Result<ServerAck, GuardError> {
        self.send_alert_impl(payload)
            .await
            .map_err(|err| GuardError::alert_send(format!("{err:#}")))
    }

    async fn send_photo(&self, photo: &PhotoRef) -> std::result::Result<ServerAck, GuardError> {
        self.send_photo_impl(photo)
            .await
            .map_err(|err| GuardError::photo_send(format!("{err:#}")))
    }

    async fn get_remote_alarm_state(&self) -> Option<RemoteAlarmState> {
        // Stamped when the request leaves so late answers compare as older.
        let requested_at = Utc::now();
        match self.alarm_status_impl().await {
            Ok(status) => Some(RemoteAlarmState {
                active: status.alarm_active,
                observed_at: requested_at,
            }),
            Err(err) => {
                debug!(error = %format!("{err:#}"), "remote alarm status unavailable");
                None
            }
        }
    }

    async fn stop_remote_alarm(&self) -> std::result::Result<ServerAck, GuardError> {
        self.stop_remote_alarm_impl()
            .await
            .map_err(|err| GuardError::stop_alarm(format!("{err:#}")))
    }
}

fn parse_base_url(raw: &str) -> std::result::Result<Url, GuardError> {
    let parsed = Url::parse(raw.trim())
        .map_err(|err| GuardError::connection(format!("invalid server url '{raw}': {err}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(GuardError::connection(format!(
            "unsupported server url scheme '{other}'"
        ))),
    }
}

/// Servers sometimes answer with an empty body; that still counts as an ack.
async fn read_ack(response: Response) -> Result<ServerAck> {
    let body = response.bytes().await?;
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ServerAck::empty());
    }
    serde_json::from_slice(&body).map_err(|err| anyhow!("malformed server ack: {err}"))
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
