//! Daemon configuration and on-disk locations.
//!
//! Everything lives under `~/.tracker/`. The config file is optional; a
//! missing file yields defaults matching the stock recorder preferences
//! (2 s / 10 m sampling on the gps and network providers).

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, TrackerError};

const TRACKER_DIR: &str = ".tracker";
const CONFIG_FILE: &str = "tracker.toml";
const SOCKET_FILE: &str = "trackerd.sock";
const DB_FILE: &str = "tracks.db";
const JOURNAL_FILE: &str = "recording.json";
const STATUS_FILE: &str = "status.json";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SamplingConfig {
    /// Minimum seconds between two accepted fixes of one provider.
    #[serde(default = "default_min_time_secs")]
    pub min_time_secs: u64,
    /// Minimum metres between two accepted fixes of one provider.
    #[serde(default = "default_min_distance_m")]
    pub min_distance_m: f64,
    #[serde(default = "default_providers")]
    pub providers: Vec<String>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            min_time_secs: default_min_time_secs(),
            min_distance_m: default_min_distance_m(),
            providers: default_providers(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TrackerConfig {
    #[serde(default)]
    pub sampling: SamplingConfig,
    /// Extra or overriding surfaces: identifier -> launch argv.
    #[serde(default)]
    pub surfaces: BTreeMap<String, Vec<String>>,
    /// Resume a recording interrupted by a crash as soon as the daemon starts.
    #[serde(default = "default_resume_on_launch")]
    pub resume_on_launch: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            sampling: SamplingConfig::default(),
            surfaces: BTreeMap::new(),
            resume_on_launch: default_resume_on_launch(),
        }
    }
}

fn default_min_time_secs() -> u64 {
    2
}

fn default_min_distance_m() -> f64 {
    10.0
}

fn default_providers() -> Vec<String> {
    vec!["gps".to_string(), "network".to_string()]
}

fn default_resume_on_launch() -> bool {
    true
}

pub fn tracker_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(TrackerError::HomeDirNotFound)?;
    Ok(home.join(TRACKER_DIR))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(tracker_dir()?.join(CONFIG_FILE))
}

pub fn socket_path() -> Result<PathBuf> {
    Ok(tracker_dir()?.join(SOCKET_FILE))
}

pub fn db_path() -> Result<PathBuf> {
    Ok(tracker_dir()?.join(DB_FILE))
}

pub fn journal_path() -> Result<PathBuf> {
    Ok(tracker_dir()?.join(JOURNAL_FILE))
}

pub fn status_path() -> Result<PathBuf> {
    Ok(tracker_dir()?.join(STATUS_FILE))
}

pub fn load_config(path: Option<PathBuf>) -> Result<TrackerConfig> {
    let config_path = match path {
        Some(path) => path,
        None => config_path()?,
    };

    if !config_path.exists() {
        return Ok(TrackerConfig::default());
    }

    let content = fs_err::read_to_string(&config_path)
        .map_err(TrackerError::io(format!("read {}", config_path.display())))?;
    parse_config(&config_path, &content)
}

fn parse_config(path: &Path, content: &str) -> Result<TrackerConfig> {
    let config =
        toml::from_str::<TrackerConfig>(content).map_err(|err| TrackerError::ConfigMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })?;

    if !config.sampling.min_distance_m.is_finite() || config.sampling.min_distance_m < 0.0 {
        return Err(TrackerError::ConfigMalformed {
            path: path.to_path_buf(),
            details: "sampling.min_distance_m must be a non-negative number".to_string(),
        });
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let config = load_config(Some(temp_dir.path().join("missing.toml"))).expect("load");
        assert_eq!(config, TrackerConfig::default());
        assert_eq!(config.sampling.min_time_secs, 2);
        assert_eq!(config.sampling.min_distance_m, 10.0);
        assert_eq!(config.sampling.providers, vec!["gps", "network"]);
        assert!(config.resume_on_launch);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("tracker.toml");
        fs_err::write(
            &path,
            r#"
resume_on_launch = false

[sampling]
min_time_secs = 5

[surfaces]
tracks = ["trackctl", "tracks", "list"]
"#,
        )
        .expect("write config");

        let config = load_config(Some(path)).expect("load");
        assert_eq!(config.sampling.min_time_secs, 5);
        assert_eq!(config.sampling.min_distance_m, 10.0);
        assert!(!config.resume_on_launch);
        assert_eq!(
            config.surfaces.get("tracks"),
            Some(&vec![
                "trackctl".to_string(),
                "tracks".to_string(),
                "list".to_string()
            ])
        );
    }

    #[test]
    fn rejects_malformed_toml() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("tracker.toml");
        fs_err::write(&path, "[sampling\nmin_time_secs = ").expect("write config");

        let err = load_config(Some(path)).expect_err("malformed");
        assert!(matches!(err, TrackerError::ConfigMalformed { .. }));
    }

    #[test]
    fn rejects_negative_distance() {
        let err = parse_config(Path::new("tracker.toml"), "[sampling]\nmin_distance_m = -1.0")
            .expect_err("negative distance");
        assert_eq!(err.code(), "config_error");
    }
}
