use facefeed_core::catalog::{DEFAULT_CATALOG_KEY, DEFAULT_PEOPLE_PREFIX};
use facefeed_core::{BestMatch, FirstMatch, Matcher, StoreLocation, DEFAULT_THRESHOLD};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// How a probe embedding is resolved against the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    /// First reference in catalog order that reaches the threshold.
    First,
    /// Most similar reference overall, if it reaches the threshold.
    Best,
}

impl MatchPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "first" => Some(Self::First),
            "best" => Some(Self::Best),
            _ => None,
        }
    }

    pub fn matcher(self) -> Arc<dyn Matcher> {
        match self {
            Self::First => Arc::new(FirstMatch),
            Self::Best => Arc::new(BestMatch),
        }
    }
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Local cache of the embedding catalog.
    pub cache_path: PathBuf,
    pub store: StoreLocation,
    /// Bearer token for the GCS JSON API.
    pub store_token: Option<String>,
    pub catalog_key: String,
    pub people_prefix: String,
    /// Cosine similarity needed for a positive match, in [0, 1].
    pub threshold: f32,
    pub match_policy: MatchPolicy,
    pub bind: String,
    pub port: u16,
    /// Target processed frames per second.
    pub frame_rate: f32,
    /// Resize factor applied before detection.
    pub downscale: f32,
    /// Padding added around each detected box, in detection-frame pixels.
    pub box_padding: u32,
    pub workers: usize,
    /// Per-frame deadline for face jobs; `None` waits indefinitely.
    pub face_timeout: Option<Duration>,
    pub status_interval: Duration,
    pub jpeg_quality: u8,
    /// Number of ONNX session pairs shared by the workers.
    pub sessions: usize,
}

impl Config {
    /// Load configuration from `FACEFEED_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("FACEFEED_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let cache_path = std::env::var("FACEFEED_CACHE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("known_embeddings.json"));

        let store = match std::env::var("FACEFEED_STORE") {
            Ok(value) => StoreLocation::parse(&value).unwrap_or_else(|| {
                tracing::warn!(value = %value, "invalid FACEFEED_STORE, using local store");
                StoreLocation::Fs(data_dir.join("store"))
            }),
            Err(_) => StoreLocation::Fs(data_dir.join("store")),
        };

        let face_timeout = match env_u64("FACEFEED_FACE_TIMEOUT_MS", 0) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        Self {
            camera_device: std::env::var("FACEFEED_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            model_dir: std::env::var("FACEFEED_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("models")),
            cache_path,
            store,
            store_token: std::env::var("FACEFEED_STORE_TOKEN").ok().filter(|t| !t.is_empty()),
            catalog_key: std::env::var("FACEFEED_CATALOG_KEY")
                .unwrap_or_else(|_| DEFAULT_CATALOG_KEY.to_string()),
            people_prefix: std::env::var("FACEFEED_PEOPLE_PREFIX")
                .unwrap_or_else(|_| DEFAULT_PEOPLE_PREFIX.to_string()),
            threshold: checked_threshold(env_f32("RECOGNITION_THRESHOLD", DEFAULT_THRESHOLD)),
            match_policy: std::env::var("FACEFEED_MATCH_POLICY")
                .ok()
                .and_then(|v| MatchPolicy::parse(&v))
                .unwrap_or(MatchPolicy::First),
            bind: std::env::var("FACEFEED_BIND").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_u64("PORT", 5000).try_into().unwrap_or(5000),
            frame_rate: positive(env_f32("FACEFEED_FRAME_RATE", 30.0), 30.0),
            downscale: positive(env_f32("FACEFEED_DOWNSCALE", 0.25), 0.25).min(1.0),
            box_padding: env_u64("FACEFEED_BOX_PADDING", 20).try_into().unwrap_or(20),
            workers: env_usize("FACEFEED_WORKERS", 4).max(1),
            face_timeout,
            status_interval: Duration::from_millis(env_u64("FACEFEED_STATUS_INTERVAL_MS", 100).max(1)),
            jpeg_quality: env_u64("FACEFEED_JPEG_QUALITY", 80).clamp(1, 100) as u8,
            sessions: env_usize("FACEFEED_SESSIONS", 2).max(1),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join("w600k_r50.onnx")
    }

    /// Minimum spacing between processed frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.frame_rate))
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facefeed")
}

fn checked_threshold(value: f32) -> f32 {
    if !value.is_finite() {
        tracing::warn!(value, "non-finite RECOGNITION_THRESHOLD, using default");
        return DEFAULT_THRESHOLD;
    }
    let clamped = value.clamp(0.0, 1.0);
    if clamped != value {
        tracing::warn!(value, clamped, "RECOGNITION_THRESHOLD out of range, clamping");
    }
    clamped
}

fn positive(value: f32, default: f32) -> f32 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        default
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_policy_parse() {
        assert_eq!(MatchPolicy::parse("first"), Some(MatchPolicy::First));
        assert_eq!(MatchPolicy::parse("BEST"), Some(MatchPolicy::Best));
        assert_eq!(MatchPolicy::parse("random"), None);
    }

    #[test]
    fn test_threshold_is_clamped() {
        assert_eq!(checked_threshold(0.6), 0.6);
        assert_eq!(checked_threshold(1.7), 1.0);
        assert_eq!(checked_threshold(-0.2), 0.0);
        assert_eq!(checked_threshold(f32::NAN), DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_positive_rejects_zero_and_nan() {
        assert_eq!(positive(0.0, 30.0), 30.0);
        assert_eq!(positive(f32::NAN, 30.0), 30.0);
        assert_eq!(positive(15.0, 30.0), 15.0);
    }

    #[test]
    fn test_model_paths() {
        let mut config = Config::from_env();
        config.model_dir = PathBuf::from("/opt/models");
        assert_eq!(config.scrfd_model_path(), PathBuf::from("/opt/models/det_10g.onnx"));
        assert_eq!(config.arcface_model_path(), PathBuf::from("/opt/models/w600k_r50.onnx"));
    }

    #[test]
    fn test_frame_interval() {
        let mut config = Config::from_env();
        config.frame_rate = 20.0;
        assert_eq!(config.frame_interval(), Duration::from_millis(50));
    }
}
