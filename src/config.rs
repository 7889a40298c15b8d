use anyhow::{Context, Result};
use facefind_vision::model::{DETECTOR_MODEL_FILE, RECOGNIZER_MODEL_FILE};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEFIND_CONFIG_PATH").unwrap_or("/usr/local/etc/facefind/config.toml"))
});

pub static MODEL_PREFIX: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEFIND_MODEL_PREFIX").unwrap_or("/usr/local/share/facefind"))
});

/// Each ONNX session already spreads one inference over every core, so a
/// couple of sessions is enough to overlap requests.
pub const DEFAULT_WORKERS: usize = 2;

/// What to do when an image holds more than one face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiFacePolicy {
    /// Use the most confident face and log a warning.
    #[default]
    First,
    /// Refuse the image.
    Reject,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Exclusive upper bound on the L2 distance of a match.
    pub threshold: f32,
    /// Embedding length produced by the recognizer.
    pub dimension: usize,
    pub multi_face: MultiFacePolicy,
    pub detection_score: f32,
    pub nms_threshold: f32,
    pub detector_model: PathBuf,
    pub recognizer_model: PathBuf,
    /// Number of independent model sessions serving extraction.
    pub workers: usize,
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            dimension: 128,
            multi_face: MultiFacePolicy::First,
            detection_score: 0.6,
            nms_threshold: 0.3,
            detector_model: MODEL_PREFIX.join(DETECTOR_MODEL_FILE),
            recognizer_model: MODEL_PREFIX.join(RECOGNIZER_MODEL_FILE),
            workers: std::thread::available_parallelism()
                .map(|n| n.get().min(DEFAULT_WORKERS))
                .unwrap_or(1),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            anyhow::bail!("threshold must be a positive number, got {}", self.threshold);
        }
        if self.dimension == 0 {
            anyhow::bail!("dimension must be greater than zero");
        }
        if self.workers == 0 {
            anyhow::bail!("workers must be greater than zero");
        }
        if self.max_body_bytes == 0 {
            anyhow::bail!("max_body_bytes must be greater than zero");
        }
        Ok(())
    }
}

/// Load the configuration at `path` (or the default location). A missing
/// file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let cfg = load_config(Some(Path::new("/nonexistent/facefind.toml"))).unwrap();
        assert_eq!(cfg.threshold, 0.6);
        assert_eq!(cfg.dimension, 128);
        assert_eq!(cfg.multi_face, MultiFacePolicy::First);
        assert!(cfg.workers >= 1 && cfg.workers <= DEFAULT_WORKERS);
    }

    #[test]
    fn partial_file_overrides_some_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "threshold = 0.45\nmulti_face = \"reject\"\n").unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.threshold, 0.45);
        assert_eq!(cfg.multi_face, MultiFacePolicy::Reject);
        assert_eq!(cfg.dimension, 128);
    }

    #[test]
    fn rejects_non_positive_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "threshold = 0.0\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn rejects_unknown_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "multi_face = \"average\"\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
