//! Configuration file handling and full runs through [`Simulator`].

use std::io::Write;

use tempfile::NamedTempFile;
use tomo_sim::prelude::*;
use tomo_sim::Simulator;

fn params(exp_id: &str) -> String {
    serde_json::json!({
        "exp_id": exp_id,
        "advanced": false,
        "DARK": {"count": 2, "exposure": 1.0},
        "EMPTY": {"count": 1, "exposure": 1.0},
        "DATA": {"step count": 3, "exposure": 1.0, "angle step": 1.5,
                 "count per step": 1, "delay": 0}
    })
    .to_string()
}

#[test]
fn test_config_file_overrides_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
log_level = "debug"

[device]
detector_width = 8
detector_height = 8

[sequencer]
dark_settle = "0s"
source_recovery_settle = "0s"
frame_send_every_n = 2

[dispatch]
max_in_flight = 3
"#
    )
    .unwrap();

    let config = TomographConfig::load_from(Some(file.path())).unwrap();
    config.validate().unwrap();
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.device.detector_width, 8);
    assert_eq!(config.sequencer.frame_send_every_n, 2);
    assert_eq!(config.dispatch.max_in_flight, 3);
}

#[test]
fn test_invalid_config_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[dispatch]\nmax_in_flight = 0").unwrap();

    let config = TomographConfig::load_from(Some(file.path())).unwrap();
    assert!(matches!(
        config.validate(),
        Err(TomoError::Configuration(_))
    ));
}

#[tokio::test]
async fn test_preview_decimation_follows_config() {
    let mut config = TomographConfig::instant();
    config.sequencer.frame_send_every_n = 2;
    let sim = Simulator::new(&config);

    let run = sim.service.start_experiment(&params("dec-1")).await.unwrap();
    let event = run.handle.await.unwrap();
    assert_eq!(event.kind, TerminalKind::Success);

    let mut previews: Vec<String> = sim
        .storage
        .frames()
        .into_iter()
        .filter(|f| f.live_preview)
        .filter_map(|f| f.number().map(str::to_string))
        .collect();
    previews.sort();
    assert_eq!(previews, vec!["0", "2", "4"]);
}

#[tokio::test]
async fn test_back_to_back_runs_on_one_device() {
    let sim = Simulator::new(&TomographConfig::instant());

    for id in ["a", "b"] {
        let run = sim.service.start_experiment(&params(id)).await.unwrap();
        let event = run.handle.await.unwrap();
        assert_eq!(event.experiment_id, id);
        assert_eq!(event.kind, TerminalKind::Success);
    }
    assert_eq!(sim.storage.frame_count(), 12);
    assert_eq!(sim.device().state(), DeviceStatus::Ready);
}
