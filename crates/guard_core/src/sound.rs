use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::error::GuardError;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const ALARM_VOLUME: f32 = 1.0;

#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Loads the alarm clip as a looping sound at `volume` and starts it.
    async fn play_looping(&self, volume: f32) -> Result<Box<dyn SoundHandle>>;
}

#[async_trait]
pub trait SoundHandle: Send + Sync {
    fn is_playing(&self) -> bool;
    async fn stop(&mut self) -> Result<()>;
    async fn unload(&mut self) -> Result<()>;
}

pub struct MissingAudioBackend;

#[async_trait]
impl AudioBackend for MissingAudioBackend {
    async fn play_looping(&self, _volume: f32) -> Result<Box<dyn SoundHandle>> {
        Err(anyhow!("audio playback is unavailable"))
    }
}

pub struct AlarmSoundController {
    backend: Arc<dyn AudioBackend>,
    active: Mutex<Option<Box<dyn SoundHandle>>>,
}

impl AlarmSoundController {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            backend,
            active: Mutex::new(None),
        }
    }

    /// No-op while already playing. A stale resource that stopped on its own
    /// is released before a new one is loaded.
    pub async fn start(&self) -> std::result::Result<(), GuardError> {
        let mut active = self.active.lock().await;
        if active.as_ref().is_some_and(|sound| sound.is_playing()) {
            return Ok(());
        }
        if let Some(stale) = active.take() {
            release(stale).await;
        }

        let sound = self
            .backend
            .play_looping(ALARM_VOLUME)
            .await
            .map_err(|err| GuardError::playback(format!("failed to play alarm: {err:#}")))?;
        *active = Some(sound);
        info!("local alarm started");
        Ok(())
    }

    pub async fn stop(&self) {
        let Some(sound) = self.active.lock().await.take() else {
            return;
        };
        release(sound).await;
        info!("local alarm stopped");
    }

    pub async fn is_active(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|sound| sound.is_playing())
    }
}

async fn release(mut sound: Box<dyn SoundHandle>) {
    if let Err(err) = sound.stop().await {
        warn!(error = %format!("{err:#}"), "failed to stop alarm sound");
    }
    if let Err(err) = sound.unload().await {
        warn!(error = %format!("{err:#}"), "failed to unload alarm sound");
    }
}

#[cfg(test)]
#[path = "tests/sound_tests.rs"]
mod tests;
