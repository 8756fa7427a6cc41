//! In-process stand-ins for the device drivers and the alarm server.

use std::{
    collections::VecDeque,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use shared::{
    domain::{PhotoRef, ProximityReading, RemoteAlarmState},
    error::GuardError,
    protocol::{AlertRequest, ServerAck},
};
use tempfile::TempDir;
use tokio::sync::{broadcast, Notify};
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    capture::{CameraDevice, CaptureAdapter},
    gateway::ServerGateway,
    orchestrator::{GuardDependencies, GuardHandle, GuardSnapshot, TriggerPolicy},
    sensor::{ProximityDriver, SensorAdapter},
    sound::{AlarmSoundController, AudioBackend, SoundHandle},
};

pub(crate) struct ChannelDriver {
    available: bool,
    sender: broadcast::Sender<ProximityReading>,
    opened: AtomicUsize,
}

impl ChannelDriver {
    pub(crate) fn new(available: bool) -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            available,
            sender,
            opened: AtomicUsize::new(0),
        }
    }

    pub(crate) fn push(&self, distance_mm: f64) {
        let _ = self.sender.send(ProximityReading::new(distance_mm, 1.0));
    }

    pub(crate) fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProximityDriver for ChannelDriver {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn open_stream(&self) -> Result<BoxStream<'static, ProximityReading>> {
        if !self.available {
            return Err(anyhow!("no proximity hardware"));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(BroadcastStream::new(self.sender.subscribe())
            .filter_map(|reading| async move { reading.ok() })
            .boxed())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CameraMode {
    Works,
    NotReady,
    Fails,
    Panics,
}

pub(crate) struct FakeCamera {
    mode: CameraMode,
    scratch: TempDir,
    shots: AtomicUsize,
}

impl FakeCamera {
    pub(crate) fn new(mode: CameraMode) -> Self {
        Self {
            mode,
            scratch: TempDir::new().expect("scratch dir"),
            shots: AtomicUsize::new(0),
        }
    }

    pub(crate) fn shots(&self) -> usize {
        self.shots.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CameraDevice for FakeCamera {
    fn is_ready(&self) -> bool {
        self.mode != CameraMode::NotReady
    }

    async fn take_picture(&self) -> Result<PathBuf> {
        let shot = self.shots.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            CameraMode::Fails => Err(anyhow!("shutter jammed")),
            CameraMode::Panics => panic!("camera driver crashed"),
            CameraMode::Works | CameraMode::NotReady => {
                let path = self.scratch.path().join(format!("shot_{shot}.jpg"));
                tokio::fs::write(&path, b"\xFF\xD8\xFFfake-jpeg").await?;
                Ok(path)
            }
        }
    }
}

#[derive(Default)]
pub(crate) struct FakeAudio {
    pub(crate) fail: bool,
    pub(crate) loads: AtomicUsize,
    pub(crate) stops: Arc<AtomicUsize>,
    pub(crate) unloads: Arc<AtomicUsize>,
    /// Shared with the most recently loaded sound.
    pub(crate) playing: Arc<AtomicBool>,
}

impl FakeAudio {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub(crate) fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

struct FakeSound {
    playing: Arc<AtomicBool>,
    stops: Arc<AtomicUsize>,
    unloads: Arc<AtomicUsize>,
}

#[async_trait]
impl SoundHandle for FakeSound {
    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    async fn stop(&mut self) -> Result<()> {
        self.playing.store(false, Ordering::SeqCst);
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unload(&mut self) -> Result<()> {
        self.unloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl AudioBackend for FakeAudio {
    async fn play_looping(&self, _volume: f32) -> Result<Box<dyn SoundHandle>> {
        if self.fail {
            return Err(anyhow!("audio focus denied"));
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.playing.store(true, Ordering::SeqCst);
        Ok(Box::new(FakeSound {
            playing: Arc::clone(&self.playing),
            stops: Arc::clone(&self.stops),
            unloads: Arc::clone(&self.unloads),
        }))
    }
}

pub(crate) struct FakeGateway {
    pub(crate) ping_result: Result<(), GuardError>,
    pub(crate) alert_result: Result<ServerAck, GuardError>,
    pub(crate) photo_result: Result<ServerAck, GuardError>,
    pub(crate) stop_result: Result<ServerAck, GuardError>,
    /// Each poll pops one entry; an empty queue means the server is unreachable.
    pub(crate) alarm_states: Mutex<VecDeque<Option<bool>>>,
    pub(crate) alert_gate: Option<Arc<Notify>>,
    pub(crate) alert_panics: bool,
    pub(crate) photo_panics: bool,
    pub(crate) alerts: Mutex<Vec<AlertRequest>>,
    pub(crate) photos: Mutex<Vec<PhotoRef>>,
    pub(crate) status_polls: AtomicUsize,
}

impl FakeGateway {
    pub(crate) fn healthy() -> Self {
        let ack = || Ok(ServerAck(serde_json::json!({ "status": "ok" })));
        Self {
            ping_result: Ok(()),
            alert_result: ack(),
            photo_result: ack(),
            stop_result: ack(),
            alarm_states: Mutex::new(VecDeque::new()),
            alert_gate: None,
            alert_panics: false,
            photo_panics: false,
            alerts: Mutex::new(Vec::new()),
            photos: Mutex::new(Vec::new()),
            status_polls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_alarm_states(self, states: impl IntoIterator<Item = Option<bool>>) -> Self {
        *self.alarm_states.lock().expect("alarm states") = states.into_iter().collect();
        self
    }

    pub(crate) fn alerts_sent(&self) -> Vec<AlertRequest> {
        self.alerts.lock().expect("alerts").clone()
    }

    pub(crate) fn photos_sent(&self) -> Vec<PhotoRef> {
        self.photos.lock().expect("photos").clone()
    }

    pub(crate) fn status_polls(&self) -> usize {
        self.status_polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServerGateway for FakeGateway {
    async fn ping(&self) -> Result<(), GuardError> {
        self.ping_result.clone()
    }

    async fn send_alert(&self, payload: &AlertRequest) -> Result<ServerAck, GuardError> {
        if let Some(gate) = &self.alert_gate {
            gate.notified().await;
        }
        if self.alert_panics {
            panic!("alert client blew up");
        }
        self.alerts.lock().expect("alerts").push(payload.clone());
        self.alert_result.clone()
    }

    async fn send_photo(&self, photo: &PhotoRef) -> Result<ServerAck, GuardError> {
        if self.photo_panics {
            panic!("upload client blew up");
        }
        self.photos.lock().expect("photos").push(photo.clone());
        self.photo_result.clone()
    }

    async fn get_remote_alarm_state(&self) -> Option<RemoteAlarmState> {
        self.status_polls.fetch_add(1, Ordering::SeqCst);
        self.alarm_states
            .lock()
            .expect("alarm states")
            .pop_front()
            .flatten()
            .map(RemoteAlarmState::observed_now)
    }

    async fn stop_remote_alarm(&self) -> Result<ServerAck, GuardError> {
        self.stop_result.clone()
    }
}

pub(crate) struct HarnessOptions {
    pub(crate) sensor_available: bool,
    pub(crate) camera: CameraMode,
    pub(crate) audio: FakeAudio,
    pub(crate) gateway: FakeGateway,
    pub(crate) policy: TriggerPolicy,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            sensor_available: true,
            camera: CameraMode::Works,
            audio: FakeAudio::default(),
            gateway: FakeGateway::healthy(),
            policy: TriggerPolicy::default(),
        }
    }
}

pub(crate) struct Harness {
    pub(crate) guard: GuardHandle,
    pub(crate) driver: Arc<ChannelDriver>,
    pub(crate) camera: Arc<FakeCamera>,
    pub(crate) audio: Arc<FakeAudio>,
    pub(crate) gateway: Arc<FakeGateway>,
    _photos: TempDir,
}

pub(crate) async fn harness(options: HarnessOptions) -> Harness {
    let photos = TempDir::new().expect("photo dir");
    let driver = Arc::new(ChannelDriver::new(options.sensor_available));
    let camera = Arc::new(FakeCamera::new(options.camera));
    let audio = Arc::new(options.audio);
    let gateway = Arc::new(options.gateway);

    let deps = GuardDependencies {
        sensor: Arc::new(SensorAdapter::new(driver.clone())),
        capture: Arc::new(CaptureAdapter::new(camera.clone(), photos.path().join("security"))),
        sound: Arc::new(AlarmSoundController::new(audio.clone())),
        gateway: gateway.clone(),
    };
    let guard = GuardHandle::spawn(options.policy, deps).await;

    Harness {
        guard,
        driver,
        camera,
        audio,
        gateway,
        _photos: photos,
    }
}

/// Waits for the published snapshot to satisfy `predicate`. Under a paused
/// clock the timeout only fires once every task is idle.
pub(crate) async fn wait_until(
    guard: &GuardHandle,
    predicate: impl FnMut(&GuardSnapshot) -> bool,
) -> GuardSnapshot {
    let mut state = guard.subscribe_state();
    let snapshot = tokio::time::timeout(Duration::from_secs(120), state.wait_for(predicate))
        .await
        .expect("condition not reached in time")
        .expect("orchestrator closed")
        .clone();
    snapshot
}
