use serde::Serialize;
use segtrain::{ExperimentDir, ExperimentSettings, TrainingError};

#[derive(Serialize)]
struct RunConfig {
    lr: f64,
    epochs: usize,
    backbone: &'static str,
}

#[test]
fn create_lays_out_subdirectories() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = ExperimentDir::create(tmp.path().join("exp")).unwrap();
    assert!(dir.checkpoints_dir().is_dir());
    assert!(dir.logs_dir().is_dir());
    assert!(dir.results_dir().is_dir());
}

#[test]
fn config_is_written_with_four_space_indent() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = ExperimentDir::create(tmp.path()).unwrap();
    let path = dir
        .save_config(&RunConfig {
            lr: 0.001,
            epochs: 2,
            backbone: "unet",
        })
        .unwrap();

    let written = std::fs::read_to_string(path).unwrap();
    assert_eq!(
        written,
        "{\n    \"lr\": 0.001,\n    \"epochs\": 2,\n    \"backbone\": \"unet\"\n}"
    );
}

#[test]
fn saving_config_again_overwrites() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = ExperimentDir::new(tmp.path());
    dir.save_config(&serde_json::json!({ "lr": 1 })).unwrap();
    dir.save_config(&serde_json::json!({ "lr": 2 })).unwrap();
    let written = std::fs::read_to_string(dir.config_path()).unwrap();
    assert_eq!(written, "{\n    \"lr\": 2\n}");
}

#[test]
fn metrics_are_appended_one_line_per_call() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = ExperimentDir::create(tmp.path()).unwrap();
    dir.log_metrics(1, 0.5, 0.75).unwrap();
    dir.log_metrics(2, 0.123456, 0.1).unwrap();

    let log = std::fs::read_to_string(dir.log_path()).unwrap();
    assert_eq!(
        log,
        "Epoch 1: Train Loss = 0.5000, Val Loss = 0.7500\n\
         Epoch 2: Train Loss = 0.1235, Val Loss = 0.1000\n"
    );
}

#[test]
fn logging_without_logs_directory_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = ExperimentDir::new(tmp.path().join("never-created"));
    let err = dir.log_metrics(1, 0.0, 0.0).unwrap_err();
    assert!(matches!(err, TrainingError::Io { .. }), "{err}");
}

#[test]
fn settings_resolve_experiments_under_the_root() {
    let settings = ExperimentSettings {
        experiments_root: "runs".into(),
        ..ExperimentSettings::default()
    };
    let dir = settings.experiment("baseline");
    assert_eq!(dir.root(), std::path::Path::new("runs/baseline"));
}

#[test]
fn settings_file_is_read_from_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("segtrain.toml");
    std::fs::write(
        &path,
        "experiments_root = \"out\"\n[snapshots]\nlimit = 3\n",
    )
    .unwrap();
    let settings = ExperimentSettings::from_path(&path).unwrap();
    assert_eq!(settings.experiments_root, std::path::PathBuf::from("out"));
    assert_eq!(settings.snapshot_limit, 3);

    std::fs::write(&path, "bogus = 1\n").unwrap();
    let err = ExperimentSettings::from_path(&path).unwrap_err();
    assert!(matches!(err, TrainingError::Config { .. }), "{err}");
}
