use std::{
    fs, io,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::{gateway::GatewayTimeouts, orchestrator::TriggerPolicy};

pub const DEFAULT_CONFIG_FILE: &str = "guard.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server_url: String,
    pub close_range_threshold_mm: f64,
    pub settle_delay_ms: u64,
    pub grace_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub manual_trigger_allowed: bool,
    pub photo_dir: PathBuf,
    pub ping_timeout_ms: u64,
    pub alert_timeout_ms: u64,
    pub photo_timeout_ms: u64,
    pub device_name: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".into(),
            close_range_threshold_mm: 50.0,
            settle_delay_ms: 500,
            grace_delay_ms: 1000,
            poll_interval_ms: 3000,
            manual_trigger_allowed: false,
            photo_dir: PathBuf::from("./data/security"),
            ping_timeout_ms: 5000,
            alert_timeout_ms: 10_000,
            photo_timeout_ms: 30_000,
            device_name: None,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.server_url)
            .with_context(|| format!("invalid server_url '{}'", self.server_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("server_url must use http or https, got '{}'", url.scheme());
        }
        if !self.close_range_threshold_mm.is_finite() || self.close_range_threshold_mm <= 0.0 {
            bail!(
                "close_range_threshold_mm must be positive, got {}",
                self.close_range_threshold_mm
            );
        }
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be positive");
        }
        for (key, value) in [
            ("ping_timeout_ms", self.ping_timeout_ms),
            ("alert_timeout_ms", self.alert_timeout_ms),
            ("photo_timeout_ms", self.photo_timeout_ms),
        ] {
            if value == 0 {
                bail!("{key} must be positive");
            }
        }
        if self.photo_timeout_ms <= self.alert_timeout_ms {
            bail!(
                "photo_timeout_ms ({}) must exceed alert_timeout_ms ({})",
                self.photo_timeout_ms,
                self.alert_timeout_ms
            );
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn gateway_timeouts(&self) -> GatewayTimeouts {
        GatewayTimeouts {
            ping: Duration::from_millis(self.ping_timeout_ms),
            alert: Duration::from_millis(self.alert_timeout_ms),
            photo: Duration::from_millis(self.photo_timeout_ms),
        }
    }

    pub fn trigger_policy(&self) -> TriggerPolicy {
        TriggerPolicy {
            close_range_threshold_mm: self.close_range_threshold_mm,
            settle_delay: self.settle_delay(),
            grace_delay: self.grace_delay(),
            manual_trigger_allowed: self.manual_trigger_allowed,
            device_name: self.device_name.clone(),
        }
    }
}

pub fn load_settings() -> Result<Settings> {
    load_settings_from(Path::new(DEFAULT_CONFIG_FILE))
}

pub fn load_settings_from(path: &Path) -> Result<Settings> {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => toml::from_str::<Settings>(&raw)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => Settings::default(),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read config file '{}'", path.display()))
        }
    };

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings.validate()?;
    Ok(settings)
}

fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = lookup("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = parsed(&lookup, "APP__CLOSE_RANGE_THRESHOLD_MM") {
        settings.close_range_threshold_mm = v;
    }
    if let Some(v) = parsed(&lookup, "APP__SETTLE_DELAY_MS") {
        settings.settle_delay_ms = v;
    }
    if let Some(v) = parsed(&lookup, "APP__GRACE_DELAY_MS") {
        settings.grace_delay_ms = v;
    }
    if let Some(v) = parsed(&lookup, "APP__POLL_INTERVAL_MS") {
        settings.poll_interval_ms = v;
    }
    if let Some(v) = lookup("APP__MANUAL_TRIGGER_ALLOWED")
        .and_then(|raw| parse_flag("APP__MANUAL_TRIGGER_ALLOWED", &raw))
    {
        settings.manual_trigger_allowed = v;
    }

    if let Some(v) = lookup("APP__PHOTO_DIR") {
        settings.photo_dir = PathBuf::from(v);
    }
    if let Some(v) = lookup("APP__DEVICE_NAME") {
        settings.device_name = Some(v);
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable configuration override");
            None
        }
    }
}

fn parse_flag(key: &str, raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!(key, value = %raw, "ignoring unparseable configuration flag");
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
