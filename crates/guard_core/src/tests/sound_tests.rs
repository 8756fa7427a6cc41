use std::sync::atomic::Ordering;

use shared::error::ErrorCode;

use super::*;
use crate::test_fakes::FakeAudio;

#[tokio::test]
async fn start_is_idempotent_while_playing() {
    let audio = Arc::new(FakeAudio::default());
    let controller = AlarmSoundController::new(audio.clone());

    controller.start().await.expect("first start");
    controller.start().await.expect("second start");

    assert_eq!(audio.loads(), 1);
    assert!(controller.is_active().await);
}

#[tokio::test]
async fn stop_releases_the_sound_once() {
    let audio = Arc::new(FakeAudio::default());
    let controller = AlarmSoundController::new(audio.clone());

    controller.start().await.expect("start");
    controller.stop().await;
    controller.stop().await;

    assert_eq!(audio.stops(), 1);
    assert_eq!(audio.unloads.load(Ordering::SeqCst), 1);
    assert!(!controller.is_active().await);
}

#[tokio::test]
async fn stop_without_start_is_a_no_op() {
    let audio = Arc::new(FakeAudio::default());
    let controller = AlarmSoundController::new(audio.clone());

    controller.stop().await;
    assert_eq!(audio.stops(), 0);
}

#[tokio::test]
async fn sound_that_ended_on_its_own_is_replaced() {
    let audio = Arc::new(FakeAudio::default());
    let controller = AlarmSoundController::new(audio.clone());

    controller.start().await.expect("start");
    audio.playing.store(false, Ordering::SeqCst);
    assert!(!controller.is_active().await);

    controller.start().await.expect("restart");
    assert_eq!(audio.loads(), 2);
    assert_eq!(audio.unloads.load(Ordering::SeqCst), 1);
    assert!(controller.is_active().await);
}

#[tokio::test]
async fn playback_failure_maps_to_typed_error() {
    let controller = AlarmSoundController::new(Arc::new(FakeAudio::failing()));

    let err = controller.start().await.expect_err("backend fails");
    assert_eq!(err.code, ErrorCode::AlarmPlaybackError);
    assert!(err.message.contains("audio focus denied"));
    assert!(!controller.is_active().await);
}

#[tokio::test]
async fn missing_backend_reports_playback_error() {
    let controller = AlarmSoundController::new(Arc::new(MissingAudioBackend));
    let err = controller.start().await.expect_err("no audio");
    assert_eq!(err.code, ErrorCode::AlarmPlaybackError);
}
