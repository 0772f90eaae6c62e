use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    if let Some(path) = option_env!("FACEMATCH_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    ProjectDirs::from("", "", "facematch")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("/usr/local/etc/facematch/config.toml"))
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cosine-distance rejection threshold; distances above it report
    /// no-match. 0.68 is the ArcFace-family calibration.
    pub threshold: f32,
    /// Detector score threshold. Deliberately permissive so blurry or
    /// partial faces still produce an embedding.
    pub detection_score: f32,
    /// IoU threshold for detection NMS.
    pub nms: f32,
    /// Directory holding the ONNX model files. Overridden by the
    /// FACEMATCH_MODEL_DIR environment variable.
    pub model_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold: 0.68,
            detection_score: 0.35,
            nms: 0.3,
            model_dir: None,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

/// Where the ONNX models live: env var, then config, then the platform
/// data directory.
pub fn model_dir(cfg: &Config) -> PathBuf {
    if let Ok(dir) = std::env::var("FACEMATCH_MODEL_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(dir) = &cfg.model_dir {
        return dir.clone();
    }
    ProjectDirs::from("", "", "facematch")
        .map(|dirs| dirs.data_dir().join("models"))
        .unwrap_or_else(|| PathBuf::from("/usr/local/share/facematch/models"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.threshold, 0.68);
        assert_eq!(cfg.detection_score, 0.35);
        assert!(cfg.model_dir.is_none());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let cfg: Config = toml::from_str("threshold = 0.5").unwrap();
        assert_eq!(cfg.threshold, 0.5);
        assert_eq!(cfg.nms, 0.3);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(cfg.threshold, 0.68);
    }
}
