//! End-to-end experiment runs against the simulated tomograph
//!
//! Each test wires a [`Tomograph`], a [`PatternEncoder`] and a
//! [`MockStorageSink`] behind an [`ExperimentService`], starts a run and
//! inspects what storage received.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tomo_core::document::{StorageEvent, TerminalKind, EMERGENCY_STOP_MSG, SUCCESSFUL_STOP_MSG};
use tomo_core::error::STORAGE_ERROR;
use tomo_core::{TomoError, TomographConfig};
use tomo_driver_mock::{Caller, DeviceStatus, ErrorConfig, ErrorScenario, Tomograph};
use tomo_experiment::{ExperimentService, MockStorageSink, PatternEncoder, StoredFrame};

fn document(dark: u64, empty: u64, steps: u64, per_step: u64, delay: f64) -> String {
    json!({
        "exp_id": "exp-1",
        "advanced": false,
        "DARK": {"count": dark, "exposure": 1.0},
        "EMPTY": {"count": empty, "exposure": 1.0},
        "DATA": {
            "step count": steps,
            "exposure": 1.0,
            "angle step": 0.0,
            "count per step": per_step,
            "delay": delay
        }
    })
    .to_string()
}

fn setup(sink: MockStorageSink) -> (ExperimentService, Arc<MockStorageSink>) {
    let config = TomographConfig::instant();
    let sink = Arc::new(sink);
    let service = ExperimentService::new(
        Tomograph::new(&config),
        Arc::new(PatternEncoder::new()),
        sink.clone(),
        config,
    );
    (service, sink)
}

/// Frames sorted by sequence number (storage may receive them out of order).
fn by_number(mut frames: Vec<StoredFrame>) -> Vec<StoredFrame> {
    frames.sort_by(|a, b| a.number().cmp(&b.number()));
    frames
}

#[tokio::test]
async fn test_end_to_end_minimal_run() {
    let (service, sink) = setup(MockStorageSink::new());
    let run = service
        .start_experiment(&document(1, 1, 1, 1, 0.0))
        .await
        .unwrap();
    let event = run.handle.await.unwrap();

    assert_eq!(event.kind, TerminalKind::Success);
    assert_eq!(event.message, SUCCESSFUL_STOP_MSG);
    assert_eq!(sink.frame_count(), 3);

    let device = service.device();
    assert_eq!(device.state(), DeviceStatus::Ready);
    assert_eq!(device.source_on(Caller::External), Ok(false));
    assert_eq!(device.shutter_open(Caller::External), Ok(false));
    assert_eq!(device.object_present(Caller::External), Ok(true));
}

#[tokio::test]
async fn test_frame_numbering_across_phases() {
    let (service, sink) = setup(MockStorageSink::new());
    let run = service
        .start_experiment(&document(2, 1, 2, 2, 0.0))
        .await
        .unwrap();
    run.handle.await.unwrap();

    let frames = by_number(sink.frames());
    let numbers: Vec<_> = frames.iter().filter_map(|f| f.number()).collect();
    assert_eq!(numbers, vec!["0", "1", "2", "3", "4", "5", "6"]);

    let modes: Vec<_> = frames.iter().filter_map(|f| f.mode()).collect();
    assert_eq!(
        modes,
        vec!["dark", "dark", "empty", "data", "data", "data", "data"]
    );

    // Dark frames are taken with the shutter closed, the rest with it open
    for frame in &frames {
        let open = frame.metadata["frame"]["shutter"]["open"].as_bool();
        assert_eq!(open, Some(frame.mode() != Some("dark")));
    }

    // Default decimation sends frames 0 and 5 to the live preview
    let previews: Vec<_> = frames
        .iter()
        .filter(|f| f.live_preview)
        .filter_map(|f| f.number())
        .collect();
    assert_eq!(previews, vec!["0", "5"]);
}

#[tokio::test]
async fn test_frame_numbers_are_padded() {
    let (service, sink) = setup(MockStorageSink::new());
    let run = service
        .start_experiment(&document(6, 2, 1, 3, 0.0))
        .await
        .unwrap();
    run.handle.await.unwrap();

    let frames = by_number(sink.frames());
    assert_eq!(frames.len(), 11);
    assert_eq!(frames[0].number(), Some("00"));
    assert_eq!(frames[10].number(), Some("10"));
}

#[tokio::test]
async fn test_dispatch_failure_emergency_stops_run() {
    let sink = MockStorageSink::new().with_errors(ErrorConfig::scenario(ErrorScenario::FailOnce {
        operation: "post_frame",
        index: 1,
    }));
    let (service, sink) = setup(sink);
    let run = service
        .start_experiment(&document(3, 2, 4, 2, 0.0))
        .await
        .unwrap();
    let event = run.handle.await.unwrap();

    assert_eq!(event.kind, TerminalKind::EmergencyStop);
    assert_eq!(event.message, EMERGENCY_STOP_MSG);
    assert_eq!(event.error.as_deref(), Some(STORAGE_ERROR));
    assert!(event
        .detail
        .as_deref()
        .unwrap_or_default()
        .contains("Injected failure on call 1 of 'post_frame'"));

    // The aborted run leaves the device safe and free
    let device = service.device();
    assert_eq!(device.state(), DeviceStatus::Ready);
    assert_eq!(device.source_on(Caller::External), Ok(false));
    assert_eq!(device.shutter_open(Caller::External), Ok(false));

    // Exactly one terminal event was reported
    let finished: Vec<_> = sink
        .events()
        .into_iter()
        .filter(|e| matches!(e, StorageEvent::Finished(_)))
        .collect();
    assert_eq!(finished.len(), 1);
}

#[tokio::test]
async fn test_rejected_storage_reply_emergency_stops_run() {
    let (service, sink) = setup(MockStorageSink::new());
    sink.set_frame_reply(r#"{"result": "disk full"}"#);
    let run = service
        .start_experiment(&document(1, 0, 1, 1, 0.0))
        .await
        .unwrap();
    let event = run.handle.await.unwrap();

    assert_eq!(event.kind, TerminalKind::EmergencyStop);
    assert_eq!(event.detail.as_deref(), Some("Storage's response:  disk full"));
}

#[tokio::test]
async fn test_encoder_failure_emergency_stops_run() {
    let config = TomographConfig::instant();
    let sink = Arc::new(MockStorageSink::new());
    let encoder = PatternEncoder::new().with_max_pixels(8);
    let service = ExperimentService::new(
        Tomograph::new(&config),
        Arc::new(encoder),
        sink.clone(),
        config,
    );
    let run = service
        .start_experiment(&document(1, 1, 1, 1, 0.0))
        .await
        .unwrap();
    let event = run.handle.await.unwrap();

    assert_eq!(event.kind, TerminalKind::EmergencyStop);
    assert_eq!(event.error.as_deref(), Some("Could not encode frame"));
    assert_eq!(sink.frame_count(), 0);
}

#[tokio::test]
async fn test_device_busy_until_run_terminates() {
    let (service, _sink) = setup(MockStorageSink::new());
    let run = service
        .start_experiment(&document(0, 0, 1, 3, 0.05))
        .await
        .unwrap();

    let device = service.device();
    assert_eq!(
        device.state(),
        DeviceStatus::Experiment {
            run_id: "exp-1".to_string()
        }
    );
    assert_eq!(
        device.set_voltage(Caller::External, 30.0),
        Err(TomoError::DeviceBusy)
    );
    let second = service.start_experiment(&document(1, 0, 0, 0, 0.0)).await;
    assert_eq!(second.unwrap_err(), TomoError::DeviceBusy);

    let event = run.handle.await.unwrap();
    assert_eq!(event.kind, TerminalKind::Success);

    assert_eq!(device.set_voltage(Caller::External, 30.0), Ok(()));
    let again = service
        .start_experiment(&document(1, 0, 0, 0, 0.0))
        .await
        .unwrap();
    assert_eq!(again.handle.await.unwrap().kind, TerminalKind::Success);
}

#[tokio::test]
async fn test_storage_refuses_start() {
    let (service, sink) = setup(MockStorageSink::new());
    sink.set_event_reply(r#"{"status": "down"}"#);

    let err = service
        .start_experiment(&document(1, 1, 1, 1, 0.0))
        .await
        .unwrap_err();
    assert_eq!(
        err.detail(),
        "Storage's response has incorrect format (no 'result' key)"
    );
    assert_eq!(service.device().state(), DeviceStatus::Ready);
    assert_eq!(sink.frame_count(), 0);
}

#[tokio::test]
async fn test_invalid_parameters_rejected_without_side_effects() {
    let (service, sink) = setup(MockStorageSink::new());
    let mut doc: serde_json::Value = serde_json::from_str(&document(1, 1, 1, 1, 0.0)).unwrap();
    doc["DATA"]["exposure"] = json!(0.01);

    let err = service
        .start_experiment(&doc.to_string())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        TomoError::Validation("Bad parameters in 'DATA' parameters".to_string())
    );
    assert!(sink.events().is_empty());
    assert_eq!(service.device().state(), DeviceStatus::Ready);
}

#[tokio::test]
async fn test_terminal_event_delivery_failure_still_releases_device() {
    let sink = MockStorageSink::new().with_errors(ErrorConfig::scenario(ErrorScenario::FailOnce {
        operation: "post_event",
        index: 1,
    }));
    let (service, sink) = setup(sink);
    let run = service
        .start_experiment(&document(1, 0, 0, 0, 0.0))
        .await
        .unwrap();
    let event = run.handle.await.unwrap();

    assert_eq!(event.kind, TerminalKind::Success);
    assert_eq!(service.device().state(), DeviceStatus::Ready);
    // Only the start notification made it
    assert_eq!(sink.events().len(), 1);
}

#[tokio::test]
async fn test_slow_storage_receives_every_frame() {
    let (service, sink) = setup(MockStorageSink::new().with_latency(Duration::from_millis(5)));
    let run = service
        .start_experiment(&document(2, 2, 3, 2, 0.0))
        .await
        .unwrap();
    let event = run.handle.await.unwrap();

    assert_eq!(event.kind, TerminalKind::Success);
    assert_eq!(sink.frame_count(), 10);
}

#[tokio::test]
async fn test_data_angles_follow_baseline() {
    let config = TomographConfig::instant();
    let sink = Arc::new(MockStorageSink::new());
    let device = Tomograph::new(&config);
    device.set_angle(Caller::External, 350.0).unwrap();
    let service = ExperimentService::new(
        device,
        Arc::new(PatternEncoder::new()),
        sink.clone(),
        config,
    );

    let mut doc: serde_json::Value = serde_json::from_str(&document(0, 0, 3, 1, 0.0)).unwrap();
    doc["DATA"]["angle step"] = json!(7.5);
    let run = service.start_experiment(&doc.to_string()).await.unwrap();
    run.handle.await.unwrap();

    let angles: Vec<f64> = by_number(sink.frames())
        .iter()
        .filter_map(|f| f.metadata["frame"]["object"]["angle"].as_f64())
        .collect();
    assert_eq!(angles, vec![350.0, 357.5, 5.0]);
}

#[tokio::test]
async fn test_early_dispatch_failure_skips_remaining_frames() {
    let sink = MockStorageSink::new().with_errors(ErrorConfig::scenario(ErrorScenario::FailOnce {
        operation: "post_frame",
        index: 0,
    }));
    let (service, sink) = setup(sink);
    let run = service
        .start_experiment(&document(1000, 500, 500, 1, 0.0))
        .await
        .unwrap();
    let event = run.handle.await.unwrap();

    assert_eq!(event.kind, TerminalKind::EmergencyStop);
    let frames = sink.frames();
    assert!(
        frames.len() < 100,
        "run kept capturing after the failure: {} of 2000 frames stored",
        frames.len()
    );
    assert!(frames.iter().all(|f| f.mode() == Some("dark")));

    let device = service.device();
    assert_eq!(device.state(), DeviceStatus::Ready);
    assert_eq!(device.source_on(Caller::External), Ok(false));
    assert_eq!(device.shutter_open(Caller::External), Ok(false));
}

#[tokio::test]
async fn test_unusable_data_section_rejected_at_admission() {
    let (service, sink) = setup(MockStorageSink::new());

    let mut huge_delay: serde_json::Value =
        serde_json::from_str(&document(1, 1, 1, 1, 0.0)).unwrap();
    huge_delay["DATA"]["delay"] = json!(1e20);

    let mut overflow: serde_json::Value =
        serde_json::from_str(&document(1, 1, 1, 1, 0.0)).unwrap();
    overflow["DATA"]["step count"] = json!(u64::MAX / 2);
    overflow["DATA"]["count per step"] = json!(3);

    for doc in [huge_delay, overflow] {
        let err = service
            .start_experiment(&doc.to_string())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TomoError::Validation("Bad parameters in 'DATA' parameters".to_string())
        );
    }
    assert!(sink.events().is_empty());
    assert_eq!(service.device().state(), DeviceStatus::Ready);
}
