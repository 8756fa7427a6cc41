use std::{future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use serde::Serialize;
use shared::{
    domain::{
        ArmState, ConnectionStatus, EpisodeId, PhotoRef, ProximityReading, RemoteAlarmState,
    },
    error::GuardError,
    protocol::{AlertRequest, DeviceInfo, ServerAck},
};
use thiserror::Error;
use tokio::{
    sync::{
        broadcast,
        mpsc::{self, error::TrySendError},
        oneshot, watch,
    },
    task::JoinError,
};
use tracing::{debug, error, info, warn};

use crate::{
    capture::CaptureAdapter, episode::TriggerEpisode, gateway::ServerGateway,
    sensor::{SensorAdapter, SubscriptionHandle},
    sound::AlarmSoundController,
};

const COMMAND_QUEUE_DEPTH: usize = 256;
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerPolicy {
    pub close_range_threshold_mm: f64,
    pub settle_delay: Duration,
    pub grace_delay: Duration,
    pub manual_trigger_allowed: bool,
    pub device_name: Option<String>,
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self {
            close_range_threshold_mm: 50.0,
            settle_delay: Duration::from_millis(500),
            grace_delay: Duration::from_millis(1000),
            manual_trigger_allowed: false,
            device_name: None,
        }
    }
}

#[derive(Clone)]
pub struct GuardDependencies {
    pub sensor: Arc<SensorAdapter>,
    pub capture: Arc<CaptureAdapter>,
    pub sound: Arc<AlarmSoundController>,
    pub gateway: Arc<dyn ServerGateway>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorPhase {
    #[default]
    Idle,
    Triggering,
    Settling,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GuardSnapshot {
    pub arm_state: ArmState,
    pub phase: OrchestratorPhase,
    pub sensor_available: bool,
    pub manual_trigger_enabled: bool,
    pub camera_active: bool,
    pub local_alarm_active: bool,
    pub connection: ConnectionStatus,
    pub last_error: Option<String>,
    pub remote_alarm: Option<RemoteAlarmState>,
    pub last_reading: Option<ProximityReading>,
    pub last_ack: Option<ServerAck>,
    pub episode: Option<TriggerEpisode>,
    pub completed_episodes: u64,
    pub critical_notice: Option<String>,
}

#[derive(Debug, Clone)]
pub enum GuardEvent {
    Armed { sensor_available: bool },
    Disarmed,
    EpisodeStarted { episode_id: EpisodeId, manual: bool },
    TriggerDropped { distance_mm: f64 },
    EpisodeSettling { episode_id: EpisodeId },
    EpisodeCompleted(Box<TriggerEpisode>),
    RemoteAlarmChanged(RemoteAlarmState),
    Notice(String),
    /// At most one per episode.
    CriticalFailure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("orchestrator has shut down")]
pub struct OrchestratorClosed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TriggerRejection {
    #[error("security mode is not armed")]
    Disarmed,
    #[error("an alarm episode is already in progress")]
    Busy,
    #[error("manual trigger is only available when the proximity sensor is unavailable")]
    SensorAvailable,
    #[error("orchestrator has shut down")]
    Closed,
}

enum Command {
    Arm,
    Disarm,
    Reading(ProximityReading),
    ManualTrigger {
        reply: oneshot::Sender<Result<EpisodeId, TriggerRejection>>,
    },
    StopLocalAlarm,
    StopRemoteAlarm {
        reply: oneshot::Sender<Result<ServerAck, GuardError>>,
    },
    CheckConnection {
        reply: oneshot::Sender<ConnectionStatus>,
    },
    RemoteStateObserved(RemoteAlarmState),
    DismissCriticalNotice,
    SoundChanged {
        episode_id: Option<EpisodeId>,
        result: Result<bool, GuardError>,
    },
    AlertSettled {
        episode_id: EpisodeId,
        outcome: SendOutcome,
    },
    CaptureDue {
        episode_id: EpisodeId,
    },
    CaptureSettled {
        episode_id: EpisodeId,
        outcome: CaptureOutcome,
    },
    PhotoSendSettled {
        episode_id: EpisodeId,
        outcome: SendOutcome,
    },
    GraceElapsed {
        episode_id: EpisodeId,
    },
    PingSettled {
        result: Result<(), GuardError>,
        reply: oneshot::Sender<ConnectionStatus>,
    },
    RemoteStopSettled {
        result: Result<ServerAck, GuardError>,
        reply: oneshot::Sender<Result<ServerAck, GuardError>>,
    },
    Shutdown,
}

enum CaptureOutcome {
    Captured(PhotoRef),
    Failed(GuardError),
    Crashed(String),
}

enum SendOutcome {
    Acked(ServerAck),
    Failed(GuardError),
    Crashed(String),
}

impl SendOutcome {
    fn from_join(joined: Result<Result<ServerAck, GuardError>, JoinError>, what: &str) -> Self {
        match joined {
            Ok(Ok(ack)) => SendOutcome::Acked(ack),
            Ok(Err(err)) => SendOutcome::Failed(err),
            Err(join_err) => SendOutcome::Crashed(describe_join_error(join_err, what)),
        }
    }
}

enum SoundOp {
    Start { episode_id: EpisodeId },
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhotoBranch {
    Waiting,
    Capturing,
    Uploading,
    Settled,
}

struct EpisodeRun {
    episode: TriggerEpisode,
    alert_settled: bool,
    photo_branch: PhotoBranch,
}

#[derive(Clone)]
pub struct GuardHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<GuardSnapshot>,
    events: broadcast::Sender<GuardEvent>,
}

impl GuardHandle {
    pub async fn spawn(policy: TriggerPolicy, deps: GuardDependencies) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let sensor_available = deps.sensor.is_available().await;
        let snapshot = GuardSnapshot {
            sensor_available,
            manual_trigger_enabled: !sensor_available || policy.manual_trigger_allowed,
            ..GuardSnapshot::default()
        };
        let (state_tx, state_rx) = watch::channel(snapshot.clone());

        let weak = commands.downgrade();
        let sound_ops = spawn_sound_worker(Arc::clone(&deps.sound), weak.clone());
        let orchestrator = Orchestrator {
            policy,
            deps,
            commands: weak,
            state: state_tx,
            events: events.clone(),
            sound_ops,
            snapshot,
            sensor_subscription: None,
            current: None,
        };
        tokio::spawn(orchestrator.run(command_rx));

        Self {
            commands,
            state: state_rx,
            events,
        }
    }

    async fn send(&self, command: Command) -> Result<(), OrchestratorClosed> {
        self.commands
            .send(command)
            .await
            .map_err(|_| OrchestratorClosed)
    }

    pub async fn arm(&self) -> Result<(), OrchestratorClosed> {
        self.send(Command::Arm).await
    }

    pub async fn disarm(&self) -> Result<(), OrchestratorClosed> {
        self.send(Command::Disarm).await
    }

    pub async fn set_armed(&self, armed: bool) -> Result<(), OrchestratorClosed> {
        if armed {
            self.arm().await
        } else {
            self.disarm().await
        }
    }

    pub async fn manual_trigger(&self) -> Result<EpisodeId, TriggerRejection> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ManualTrigger { reply })
            .await
            .map_err(|_| TriggerRejection::Closed)?;
        rx.await.map_err(|_| TriggerRejection::Closed)?
    }

    /// Silences the local alarm without touching the episode state machine.
    pub async fn stop_local_alarm(&self) -> Result<(), OrchestratorClosed> {
        self.send(Command::StopLocalAlarm).await
    }

    pub async fn stop_remote_alarm(&self) -> Result<ServerAck, GuardError> {
        let closed = || GuardError::stop_alarm(OrchestratorClosed.to_string());
        let (reply, rx) = oneshot::channel();
        self.send(Command::StopRemoteAlarm { reply })
            .await
            .map_err(|_| closed())?;
        rx.await.map_err(|_| closed())?
    }

    pub async fn check_connection(&self) -> Result<ConnectionStatus, OrchestratorClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CheckConnection { reply }).await?;
        rx.await.map_err(|_| OrchestratorClosed)
    }

    pub async fn publish_remote_state(
        &self,
        state: RemoteAlarmState,
    ) -> Result<(), OrchestratorClosed> {
        self.send(Command::RemoteStateObserved(state)).await
    }

    pub async fn dismiss_critical_notice(&self) -> Result<(), OrchestratorClosed> {
        self.send(Command::DismissCriticalNotice).await
    }

    pub fn snapshot(&self) -> GuardSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<GuardSnapshot> {
        self.state.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<GuardEvent> {
        self.events.subscribe()
    }

    pub async fn shutdown(&self) {
        let _ = self.send(Command::Shutdown).await;
    }
}

struct Orchestrator {
    policy: TriggerPolicy,
    deps: GuardDependencies,
    commands: mpsc::WeakSender<Command>,
    state: watch::Sender<GuardSnapshot>,
    events: broadcast::Sender<GuardEvent>,
    sound_ops: mpsc::UnboundedSender<SoundOp>,
    snapshot: GuardSnapshot,
    sensor_subscription: Option<SubscriptionHandle>,
    current: Option<EpisodeRun>,
}

impl Orchestrator {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            if let Command::Shutdown = command {
                self.shutdown().await;
                break;
            }
            self.handle(command).await;
        }
        debug!("orchestrator command loop exited");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Arm => self.arm().await,
            Command::Disarm => self.disarm().await,
            Command::Reading(reading) => self.on_reading(reading),
            Command::ManualTrigger { reply } => {
                let outcome = self.manual_trigger();
                let _ = reply.send(outcome);
            }
            Command::StopLocalAlarm => self.stop_sound(),
            Command::StopRemoteAlarm { reply } => self.stop_remote_alarm(reply),
            Command::CheckConnection { reply } => self.check_connection(reply),
            Command::RemoteStateObserved(state) => {
                self.record_success(None);
                if self.is_stale(&state) {
                    debug!(
                        active = state.active,
                        "ignoring remote alarm state older than the cached one"
                    );
                } else {
                    self.set_remote_state(state);
                }
                self.publish();
            }
            Command::DismissCriticalNotice => {
                self.snapshot.critical_notice = None;
                self.publish();
            }
            Command::SoundChanged { episode_id, result } => {
                self.on_sound_changed(episode_id, result)
            }
            Command::AlertSettled {
                episode_id,
                outcome,
            } => self.on_alert_settled(episode_id, outcome),
            Command::CaptureDue { episode_id } => self.on_capture_due(episode_id),
            Command::CaptureSettled {
                episode_id,
                outcome,
            } => self.on_capture_settled(episode_id, outcome),
            Command::PhotoSendSettled {
                episode_id,
                outcome,
            } => self.on_photo_send_settled(episode_id, outcome),
            Command::GraceElapsed { episode_id } => self.finish_episode(episode_id),
            Command::PingSettled { result, reply } => self.on_ping_settled(result, reply),
            Command::RemoteStopSettled { result, reply } => {
                self.on_remote_stop_settled(result, reply)
            }
            Command::Shutdown => {}
        }
    }

    async fn arm(&mut self) {
        if self.snapshot.arm_state.is_armed() {
            return;
        }
        self.snapshot.arm_state = ArmState::Armed;

        let mut sensor_available = self.deps.sensor.is_available().await;
        if sensor_available {
            let commands = self.commands.clone();
            self.sensor_subscription = self
                .deps
                .sensor
                .subscribe(move |reading| forward_reading(&commands, reading))
                .await;
            sensor_available = self.sensor_subscription.is_some();
        }
        self.snapshot.sensor_available = sensor_available;
        self.snapshot.manual_trigger_enabled =
            !sensor_available || self.policy.manual_trigger_allowed;

        if sensor_available {
            info!("security mode armed; watching proximity sensor");
            self.notice(
                "Security mode activated. The system will detect intruders and trigger an alarm.",
            );
        } else {
            let unavailable = GuardError::sensor_unavailable("no proximity sensor subscription");
            warn!(error = %unavailable, "security mode armed without sensor; manual trigger enabled");
            self.notice(
                "Proximity sensor is not available on this device. Use the test alarm to simulate a detection.",
            );
        }
        self.emit(GuardEvent::Armed { sensor_available });
        self.publish();
    }

    async fn disarm(&mut self) {
        let was_armed = self.snapshot.arm_state.is_armed();
        self.snapshot.arm_state = ArmState::Disarmed;
        if let Some(handle) = self.sensor_subscription.take() {
            self.deps.sensor.unsubscribe(handle).await;
        }
        self.stop_sound();

        if let Some(run) = self.current.as_mut() {
            if !run.episode.cancelled {
                run.episode.cancelled = true;
                info!(
                    episode_id = %run.episode.episode_id,
                    "disarmed mid-episode; pending outcomes will be discarded"
                );
            }
        }
        if was_armed {
            info!("security mode disarmed");
            self.emit(GuardEvent::Disarmed);
        }
        self.publish();
    }

    fn on_reading(&mut self, reading: ProximityReading) {
        self.snapshot.last_reading = Some(reading);
        if !self.snapshot.arm_state.is_armed()
            || reading.distance_mm >= self.policy.close_range_threshold_mm
        {
            self.publish();
            return;
        }

        if self.snapshot.phase != OrchestratorPhase::Idle {
            debug!(
                distance_mm = reading.distance_mm,
                "episode in flight; dropping proximity trigger"
            );
            self.emit(GuardEvent::TriggerDropped {
                distance_mm: reading.distance_mm,
            });
            self.publish();
            return;
        }

        info!(
            distance_mm = reading.distance_mm,
            threshold_mm = self.policy.close_range_threshold_mm,
            "close-range object detected"
        );
        self.begin_episode(Some(reading));
    }

    fn manual_trigger(&mut self) -> Result<EpisodeId, TriggerRejection> {
        let rejection = if !self.snapshot.arm_state.is_armed() {
            Some(TriggerRejection::Disarmed)
        } else if self.snapshot.phase != OrchestratorPhase::Idle {
            Some(TriggerRejection::Busy)
        } else if self.snapshot.sensor_available && !self.policy.manual_trigger_allowed {
            Some(TriggerRejection::SensorAvailable)
        } else {
            None
        };

        if let Some(rejection) = rejection {
            info!(reason = %rejection, "manual trigger rejected");
            return Err(rejection);
        }
        Ok(self.begin_episode(None))
    }

    fn begin_episode(&mut self, reading: Option<ProximityReading>) -> EpisodeId {
        let episode = TriggerEpisode::new(reading);
        let episode_id = episode.episode_id;
        let manual = episode.is_manual();
        let payload = AlertRequest::proximity(
            episode.started_at,
            reading.as_ref(),
            Some(DeviceInfo::current(self.policy.device_name.clone())),
        );
        info!(%episode_id, manual, "starting alarm episode");

        self.current = Some(EpisodeRun {
            episode,
            alert_settled: false,
            photo_branch: PhotoBranch::Waiting,
        });
        self.snapshot.phase = OrchestratorPhase::Triggering;
        self.snapshot.camera_active = true;
        self.snapshot.critical_notice = None;
        self.emit(GuardEvent::EpisodeStarted { episode_id, manual });

        if self.sound_ops.send(SoundOp::Start { episode_id }).is_err() {
            warn!(%episode_id, "alarm sound worker has stopped");
        }

        let gateway = Arc::clone(&self.deps.gateway);
        self.spawn_completion(async move {
            let attempt = tokio::spawn(async move { gateway.send_alert(&payload).await });
            Command::AlertSettled {
                episode_id,
                outcome: SendOutcome::from_join(attempt.await, "alert send"),
            }
        });

        let settle_delay = self.policy.settle_delay;
        self.spawn_completion(async move {
            tokio::time::sleep(settle_delay).await;
            Command::CaptureDue { episode_id }
        });

        self.publish();
        episode_id
    }

    fn on_sound_changed(&mut self, episode_id: Option<EpisodeId>, result: Result<bool, GuardError>) {
        let applies_to_current = self.current.as_ref().is_some_and(|run| {
            episode_id.map_or(true, |id| id == run.episode.episode_id)
        });

        match result {
            Ok(active) => {
                self.snapshot.local_alarm_active = active;
                if applies_to_current {
                    if let Some(run) = self.current.as_mut() {
                        run.episode.local_alarm_active = active;
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "local alarm failed to start");
                if applies_to_current {
                    if let Some(run) = self.current.as_mut() {
                        run.episode.sound_error = Some(err);
                    }
                }
            }
        }
        self.publish();
    }

    fn on_alert_settled(&mut self, episode_id: EpisodeId, outcome: SendOutcome) {
        let Some(run) = self.run_for(episode_id) else {
            return;
        };
        run.alert_settled = true;
        let cancelled = run.episode.cancelled;

        match outcome {
            SendOutcome::Crashed(message) => {
                error!(%episode_id, error = %message, "unexpected failure while sending alert");
                run.episode
                    .critical_error
                    .get_or_insert_with(|| GuardError::unexpected(message));
            }
            _ if cancelled => {
                debug!(%episode_id, "discarding alert outcome for cancelled episode");
            }
            SendOutcome::Acked(ack) => {
                run.episode.alert_sent = true;
                info!(%episode_id, "alert delivered to alarm server");
                self.record_success(Some(ack));
                self.refresh_remote_state();
            }
            SendOutcome::Failed(err) => {
                run.episode.alert_error = Some(err.clone());
                warn!(%episode_id, error = %err, "alert send failed");
                self.record_failure(&err);
            }
        }
        self.maybe_settle();
        self.publish();
    }

    fn on_capture_due(&mut self, episode_id: EpisodeId) {
        let Some(run) = self.run_for(episode_id) else {
            return;
        };
        if run.episode.cancelled {
            run.photo_branch = PhotoBranch::Settled;
            debug!(%episode_id, "episode cancelled before capture; skipping photo");
        } else {
            run.photo_branch = PhotoBranch::Capturing;
            let capture = Arc::clone(&self.deps.capture);
            self.spawn_completion(async move {
                let attempt = tokio::spawn(async move { capture.capture_photo().await });
                let outcome = match attempt.await {
                    Ok(Ok(photo)) => CaptureOutcome::Captured(photo),
                    Ok(Err(err)) => CaptureOutcome::Failed(err),
                    Err(join_err) => {
                        CaptureOutcome::Crashed(describe_join_error(join_err, "photo capture"))
                    }
                };
                Command::CaptureSettled {
                    episode_id,
                    outcome,
                }
            });
        }
        self.maybe_settle();
        self.publish();
    }

    fn on_capture_settled(&mut self, episode_id: EpisodeId, outcome: CaptureOutcome) {
        let Some(run) = self.run_for(episode_id) else {
            return;
        };

        let mut upload = None;
        match outcome {
            CaptureOutcome::Captured(photo) => {
                run.episode.photo = Some(photo.clone());
                if run.episode.cancelled {
                    run.photo_branch = PhotoBranch::Settled;
                } else {
                    run.photo_branch = PhotoBranch::Uploading;
                    upload = Some(photo);
                }
            }
            CaptureOutcome::Failed(err) => {
                warn!(%episode_id, error = %err, "photo capture failed; continuing without photo");
                run.episode.capture_error = Some(err);
                run.photo_branch = PhotoBranch::Settled;
            }
            CaptureOutcome::Crashed(message) => {
                error!(%episode_id, error = %message, "unexpected failure during photo capture");
                run.episode
                    .critical_error
                    .get_or_insert_with(|| GuardError::unexpected(message));
                run.photo_branch = PhotoBranch::Settled;
            }
        }

        if let Some(photo) = upload {
            let gateway = Arc::clone(&self.deps.gateway);
            self.spawn_completion(async move {
                let attempt = tokio::spawn(async move { gateway.send_photo(&photo).await });
                Command::PhotoSendSettled {
                    episode_id,
                    outcome: SendOutcome::from_join(attempt.await, "photo upload"),
                }
            });
        }
        self.maybe_settle();
        self.publish();
    }

    fn on_photo_send_settled(&mut self, episode_id: EpisodeId, outcome: SendOutcome) {
        let Some(run) = self.run_for(episode_id) else {
            return;
        };
        run.photo_branch = PhotoBranch::Settled;
        let cancelled = run.episode.cancelled;

        match outcome {
            SendOutcome::Crashed(message) => {
                error!(%episode_id, error = %message, "unexpected failure during photo upload");
                run.episode
                    .critical_error
                    .get_or_insert_with(|| GuardError::unexpected(message));
            }
            _ if cancelled => {
                debug!(%episode_id, "discarding photo upload outcome for cancelled episode");
            }
            SendOutcome::Acked(ack) => {
                run.episode.photo_sent = true;
                info!(%episode_id, "photo uploaded to alarm server");
                self.record_success(Some(ack));
            }
            SendOutcome::Failed(err) => {
                run.episode.photo_send_error = Some(err.clone());
                warn!(%episode_id, error = %err, "photo upload failed");
                self.record_failure(&err);
            }
        }
        self.maybe_settle();
        self.publish();
    }

    fn maybe_settle(&mut self) {
        let Some(run) = self.current.as_ref() else {
            return;
        };
        if self.snapshot.phase != OrchestratorPhase::Triggering
            || !run.alert_settled
            || run.photo_branch != PhotoBranch::Settled
        {
            return;
        }

        let episode_id = run.episode.episode_id;
        self.snapshot.phase = OrchestratorPhase::Settling;
        info!(%episode_id, "alarm actions settled; holding camera view");
        self.emit(GuardEvent::EpisodeSettling { episode_id });

        let grace_delay = self.policy.grace_delay;
        self.spawn_completion(async move {
            tokio::time::sleep(grace_delay).await;
            Command::GraceElapsed { episode_id }
        });
    }

    fn finish_episode(&mut self, episode_id: EpisodeId) {
        if self.run_for(episode_id).is_none() {
            return;
        }
        let Some(mut run) = self.current.take() else {
            return;
        };
        run.episode.completed_at = Some(Utc::now());

        self.snapshot.phase = OrchestratorPhase::Idle;
        self.snapshot.camera_active = false;
        self.snapshot.completed_episodes += 1;
        info!(%episode_id, summary = %run.episode.summary(), "alarm episode completed");

        if let Some(err) = &run.episode.critical_error {
            let message = format!(
                "An error occurred while triggering the alarm: {}",
                err.message
            );
            self.snapshot.critical_notice = Some(message.clone());
            self.emit(GuardEvent::CriticalFailure(message));
        }
        self.emit(GuardEvent::EpisodeCompleted(Box::new(run.episode)));
        self.publish();
    }

    fn stop_remote_alarm(&mut self, reply: oneshot::Sender<Result<ServerAck, GuardError>>) {
        info!("requesting server alarm stop");
        let gateway = Arc::clone(&self.deps.gateway);
        self.spawn_completion(async move {
            let result = gateway.stop_remote_alarm().await;
            Command::RemoteStopSettled { result, reply }
        });
    }

    fn on_remote_stop_settled(
        &mut self,
        result: Result<ServerAck, GuardError>,
        reply: oneshot::Sender<Result<ServerAck, GuardError>>,
    ) {
        match &result {
            Ok(ack) => {
                info!("server alarm stopped");
                self.record_success(Some(ack.clone()));
                self.set_remote_state(RemoteAlarmState::observed_now(false));
                self.notice("Server alarm was switched off.");
            }
            Err(err) => {
                error!(error = %err, "failed to stop server alarm");
                self.record_failure(err);
            }
        }
        self.publish();
        let _ = reply.send(result);
    }

    fn check_connection(&mut self, reply: oneshot::Sender<ConnectionStatus>) {
        self.snapshot.connection = ConnectionStatus::Connecting;
        self.publish();
        let gateway = Arc::clone(&self.deps.gateway);
        self.spawn_completion(async move {
            let result = gateway.ping().await;
            Command::PingSettled { result, reply }
        });
    }

    fn on_ping_settled(
        &mut self,
        result: Result<(), GuardError>,
        reply: oneshot::Sender<ConnectionStatus>,
    ) {
        match result {
            Ok(()) => {
                info!("alarm server reachable");
                self.record_success(None);
            }
            Err(err) => {
                warn!(error = %err, "alarm server unreachable");
                self.record_failure(&err);
            }
        }
        self.publish();
        let _ = reply.send(self.snapshot.connection);
    }

    fn refresh_remote_state(&self) {
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        let gateway = Arc::clone(&self.deps.gateway);
        tokio::spawn(async move {
            if let Some(state) = gateway.get_remote_alarm_state().await {
                let _ = commands.send(Command::RemoteStateObserved(state)).await;
            }
        });
    }

    /// A poll issued before the last stop ack must not resurrect the alarm.
    fn is_stale(&self, state: &RemoteAlarmState) -> bool {
        self.snapshot
            .remote_alarm
            .is_some_and(|cached| state.observed_at < cached.observed_at)
    }

    fn set_remote_state(&mut self, state: RemoteAlarmState) {
        let changed = self.snapshot.remote_alarm.map(|previous| previous.active) != Some(state.active);
        self.snapshot.remote_alarm = Some(state);
        if changed {
            info!(active = state.active, "server alarm state changed");
            self.emit(GuardEvent::RemoteAlarmChanged(state));
        }
    }

    fn record_success(&mut self, ack: Option<ServerAck>) {
        self.snapshot.connection = ConnectionStatus::Connected;
        self.snapshot.last_error = None;
        if let Some(ack) = ack {
            self.snapshot.last_ack = Some(ack);
        }
    }

    fn record_failure(&mut self, err: &GuardError) {
        self.snapshot.connection = ConnectionStatus::Error;
        self.snapshot.last_error = Some(err.message.clone());
    }

    fn stop_sound(&self) {
        if self.sound_ops.send(SoundOp::Stop).is_err() {
            warn!("alarm sound worker has stopped");
        }
    }

    async fn shutdown(&mut self) {
        if let Some(handle) = self.sensor_subscription.take() {
            self.deps.sensor.unsubscribe(handle).await;
        }
        self.stop_sound();
        info!("orchestrator stopped");
    }

    fn run_for(&mut self, episode_id: EpisodeId) -> Option<&mut EpisodeRun> {
        match self.current.as_mut() {
            Some(run) if run.episode.episode_id == episode_id => Some(run),
            _ => {
                debug!(%episode_id, "ignoring completion for a finished episode");
                None
            }
        }
    }

    fn spawn_completion<F>(&self, work: F)
    where
        F: Future<Output = Command> + Send + 'static,
    {
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let command = work.await;
            let _ = commands.send(command).await;
        });
    }

    fn notice(&self, message: &str) {
        self.emit(GuardEvent::Notice(message.to_string()));
    }

    fn emit(&self, event: GuardEvent) {
        let _ = self.events.send(event);
    }

    fn publish(&mut self) {
        self.snapshot.episode = self.current.as_ref().map(|run| run.episode.clone());
        self.state.send_replace(self.snapshot.clone());
    }
}

fn forward_reading(commands: &mpsc::WeakSender<Command>, reading: ProximityReading) {
    let Some(commands) = commands.upgrade() else {
        return;
    };
    if let Err(TrySendError::Full(_)) = commands.try_send(Command::Reading(reading)) {
        warn!("orchestrator queue full; dropping proximity reading");
    }
}

/// Audio start/stop run in FIFO order so a stop never overtakes a start.
fn spawn_sound_worker(
    sound: Arc<AlarmSoundController>,
    commands: mpsc::WeakSender<Command>,
) -> mpsc::UnboundedSender<SoundOp> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(op) = rx.recv().await {
            let (episode_id, result) = match op {
                SoundOp::Start { episode_id } => {
                    (Some(episode_id), sound.start().await.map(|()| true))
                }
                SoundOp::Stop => {
                    sound.stop().await;
                    (None, Ok(false))
                }
            };
            let Some(commands) = commands.upgrade() else {
                break;
            };
            let _ = commands
                .send(Command::SoundChanged { episode_id, result })
                .await;
        }
    });
    tx
}

fn describe_join_error(err: JoinError, what: &str) -> String {
    if !err.is_panic() {
        return format!("{what} was cancelled");
    }
    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        format!("{what} panicked")
    }
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
