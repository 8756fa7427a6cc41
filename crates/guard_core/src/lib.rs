pub mod capture;
pub mod config;
pub mod episode;
pub mod gateway;
pub mod orchestrator;
pub mod poller;
pub mod sensor;
pub mod sound;

pub use capture::{CameraDevice, CaptureAdapter, MissingCamera};
pub use config::{load_settings, load_settings_from, Settings};
pub use episode::TriggerEpisode;
pub use gateway::{GatewayTimeouts, HttpServerGateway, ServerGateway};
pub use orchestrator::{
    GuardDependencies, GuardEvent, GuardHandle, GuardSnapshot, OrchestratorClosed,
    OrchestratorPhase, TriggerPolicy, TriggerRejection,
};
pub use poller::RemoteStatePoller;
pub use sensor::{MissingProximityDriver, ProximityDriver, SensorAdapter, SubscriptionHandle};
pub use sound::{AlarmSoundController, AudioBackend, MissingAudioBackend, SoundHandle};

#[cfg(test)]
#[path = "tests/fakes.rs"]
mod test_fakes;
