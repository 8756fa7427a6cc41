//! Terminal stand-ins for the phone hardware.

use std::{
    io::Write,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::{stream::BoxStream, StreamExt};
use guard_core::{AudioBackend, CameraDevice, ProximityDriver, SoundHandle};
use shared::domain::ProximityReading;
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

const BELL_PERIOD: Duration = Duration::from_secs(1);

pub struct ConsoleProximityDriver {
    readings: broadcast::Sender<ProximityReading>,
}

impl ConsoleProximityDriver {
    pub fn new() -> Self {
        let (readings, _) = broadcast::channel(32);
        Self { readings }
    }

    /// Returns false when nothing is listening, i.e. the system is disarmed.
    pub fn push(&self, distance_mm: f64) -> bool {
        self.readings
            .send(ProximityReading::new(distance_mm, 1.0))
            .is_ok()
    }
}

impl Default for ConsoleProximityDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProximityDriver for ConsoleProximityDriver {
    async fn is_available(&self) -> bool {
        true
    }

    async fn open_stream(&self) -> Result<BoxStream<'static, ProximityReading>> {
        Ok(BroadcastStream::new(self.readings.subscribe())
            .filter_map(|reading| async move {
                if let Err(err) = &reading {
                    warn!(error = %err, "console readings lagged");
                }
                reading.ok()
            })
            .boxed())
    }
}

/// "Takes" a picture by copying a still image from disk.
pub struct StillImageCamera {
    source: PathBuf,
    scratch: PathBuf,
}

impl StillImageCamera {
    pub fn new(source: PathBuf) -> Self {
        Self {
            source,
            scratch: std::env::temp_dir().join("guard_cli"),
        }
    }
}

#[async_trait]
impl CameraDevice for StillImageCamera {
    fn is_ready(&self) -> bool {
        self.source.is_file()
    }

    async fn take_picture(&self) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.scratch).await?;
        let target = self
            .scratch
            .join(format!("shot_{}.jpg", Utc::now().timestamp_millis()));
        tokio::fs::copy(&self.source, &target)
            .await
            .with_context(|| format!("failed to read still image '{}'", self.source.display()))?;
        Ok(target)
    }
}

pub struct TerminalBell;

#[async_trait]
impl AudioBackend for TerminalBell {
    async fn play_looping(&self, volume: f32) -> Result<Box<dyn SoundHandle>> {
        let playing = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&playing);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(BELL_PERIOD);
            while flag.load(Ordering::SeqCst) {
                ticker.tick().await;
                print!("\x07");
                let _ = std::io::stdout().flush();
            }
        });
        info!(volume, "alarm bell ringing");
        Ok(Box::new(BellHandle {
            playing,
            task: Some(task),
        }))
    }
}

struct BellHandle {
    playing: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl SoundHandle for BellHandle {
    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    async fn stop(&mut self) -> Result<()> {
        self.playing.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    async fn unload(&mut self) -> Result<()> {
        Ok(())
    }
}
