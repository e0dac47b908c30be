use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::checkpoint::CheckpointStore;
use crate::error::{TrainingError, TrainingResult};
use crate::experiment::ExperimentDir;

const DEFAULT_CONFIG_NAME: &str = "segtrain.toml";
const CONFIG_ENV: &str = "SEGTRAIN_CONFIG";
const DEFAULT_SNAPSHOT_LIMIT: usize = 5;

/// Where experiments live and how helpers write into them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentSettings {
    pub experiments_root: PathBuf,
    /// Maximum samples rendered per `save_predictions` call.
    pub snapshot_limit: usize,
    pub atomic_checkpoints: bool,
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self {
            experiments_root: PathBuf::from("experiments"),
            snapshot_limit: DEFAULT_SNAPSHOT_LIMIT,
            atomic_checkpoints: true,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    experiments_root: Option<String>,
    snapshots: Option<SnapshotSection>,
    checkpoints: Option<CheckpointSection>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SnapshotSection {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CheckpointSection {
    atomic: Option<bool>,
}

impl ExperimentSettings {
    /// Load from `$SEGTRAIN_CONFIG`, else `./segtrain.toml`, else defaults.
    ///
    /// An unreadable or invalid file is reported and replaced by defaults.
    pub fn load() -> Self {
        Self::load_from_env(CONFIG_ENV)
    }

    fn load_from_env(var: &str) -> Self {
        let path = std::env::var(var)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_NAME));
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no settings file; using defaults");
            return Self::default();
        }
        let settings = Self::from_path(&path).unwrap_or_else(|e| {
            tracing::warn!("{e}; using default settings");
            Self::default()
        });
        settings.warn_if_invalid();
        settings
    }

    pub fn from_path(path: &Path) -> TrainingResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| TrainingError::io(path, e))?;
        Self::from_toml_str(&raw).map_err(|msg| TrainingError::Config {
            path: path.to_path_buf(),
            msg,
        })
    }

    fn from_toml_str(raw: &str) -> Result<Self, String> {
        let file: SettingsFile = toml::from_str(raw).map_err(|e| e.to_string())?;
        let defaults = Self::default();
        Ok(Self {
            experiments_root: file
                .experiments_root
                .map(|v| expand_path(&v))
                .unwrap_or(defaults.experiments_root),
            snapshot_limit: file
                .snapshots
                .and_then(|s| s.limit)
                .unwrap_or(defaults.snapshot_limit),
            atomic_checkpoints: file
                .checkpoints
                .and_then(|c| c.atomic)
                .unwrap_or(defaults.atomic_checkpoints),
        })
    }

    fn warn_if_invalid(&self) {
        if self.experiments_root.as_os_str().is_empty() {
            tracing::warn!("experiments_root is empty; experiments resolve relative to the working directory");
        }
        if self.snapshot_limit == 0 {
            tracing::warn!("snapshots.limit is 0; save_predictions will write nothing");
        }
    }

    pub fn experiment(&self, name: &str) -> ExperimentDir {
        ExperimentDir::new(self.experiments_root.join(name))
    }

    pub fn checkpoint_store(&self) -> CheckpointStore {
        CheckpointStore::new().with_atomic_writes(self.atomic_checkpoints)
    }
}

/// Expand a leading `~` and `${VAR}` references; unknown variables are left verbatim.
fn expand_path(raw: &str) -> PathBuf {
    let home_expanded = match (raw.strip_prefix('~'), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{home}{rest}"),
        _ => raw.to_string(),
    };
    PathBuf::from(expand_env(&home_expanded))
}

fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match std::env::var(key) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => out.push_str(&rest[start..start + 3 + end]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let cfg = ExperimentSettings::from_toml_str("experiments_root = \"runs\"\n").unwrap();
        assert_eq!(cfg.experiments_root, PathBuf::from("runs"));
        assert_eq!(cfg.snapshot_limit, 5);
        assert!(cfg.atomic_checkpoints);
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = ExperimentSettings::from_toml_str(
            "[snapshots]\nlimit = 2\n[checkpoints]\natomic = false\n",
        )
        .unwrap();
        assert_eq!(cfg.snapshot_limit, 2);
        assert!(!cfg.atomic_checkpoints);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(ExperimentSettings::from_toml_str("snapshot_limit = 3\n").is_err());
    }

    #[test]
    fn env_expansion_keeps_unknown_variables() {
        assert_eq!(
            expand_env("a/${SEGTRAIN_SURELY_UNSET_VAR}/b"),
            "a/${SEGTRAIN_SURELY_UNSET_VAR}/b"
        );
        assert_eq!(expand_env("plain/${unterminated"), "plain/${unterminated");
    }

    #[test]
    fn env_var_selects_the_settings_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("custom.toml");
        std::fs::write(&path, "experiments_root = \"elsewhere\"\n[snapshots]\nlimit = 9\n").unwrap();
        std::env::set_var("SEGTRAIN_CONFIG_SELECTS_FILE", &path);

        let cfg = ExperimentSettings::load_from_env("SEGTRAIN_CONFIG_SELECTS_FILE");
        assert_eq!(cfg.experiments_root, PathBuf::from("elsewhere"));
        assert_eq!(cfg.snapshot_limit, 9);
        assert!(cfg.atomic_checkpoints);
    }

    #[test]
    fn missing_settings_file_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        std::env::set_var("SEGTRAIN_CONFIG_MISSING_FILE", tmp.path().join("absent.toml"));
        assert_eq!(
            ExperimentSettings::load_from_env("SEGTRAIN_CONFIG_MISSING_FILE"),
            ExperimentSettings::default()
        );
    }

    #[test]
    fn invalid_settings_file_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("broken.toml");
        std::fs::write(&path, "[snapshots]\nlimit = \"many\"\n").unwrap();
        std::env::set_var("SEGTRAIN_CONFIG_INVALID_FILE", &path);
        assert_eq!(
            ExperimentSettings::load_from_env("SEGTRAIN_CONFIG_INVALID_FILE"),
            ExperimentSettings::default()
        );
    }

    #[test]
    fn unset_env_var_without_local_file_uses_defaults() {
        assert!(!Path::new(DEFAULT_CONFIG_NAME).exists());
        assert_eq!(
            ExperimentSettings::load_from_env("SEGTRAIN_CONFIG_NEVER_SET"),
            ExperimentSettings::default()
        );
    }
}
