use crate::reconnect::ReconnectPolicy;
use rollcall_core::{CourseId, FrameSize, TrackerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Client configuration.
///
/// Layered as defaults, then an optional TOML file named by `ROLLCALL_CONFIG`,
/// then `ROLLCALL_*` environment variables. The auth token is not part of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Recognition server base URL (ws:// or wss://).
    pub server_url: String,
    /// REST API base URL for rosters and reports.
    pub api_url: String,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Interval between transmitted frames.
    pub send_interval_ms: u64,
    /// Reconnect attempts before the session is given up.
    pub reconnect_attempts: u32,
    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay_ms: u64,
    /// Longest wait for the server to accept a connection.
    pub connect_timeout_ms: u64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub jpeg_quality: u8,
    /// Consecutive responses naming a student before they count as present.
    pub confirmation_threshold: u32,
    pub min_candidate_confidence: f32,
    pub overlap_iou: f32,
    /// Upper bound on the capture thread's frame rate.
    pub capture_fps: u32,
    pub http_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8000".to_string(),
            api_url: "http://127.0.0.1:8000/api".to_string(),
            camera_device: "/dev/video0".to_string(),
            send_interval_ms: 500,
            reconnect_attempts: 5,
            reconnect_delay_ms: 3000,
            connect_timeout_ms: 10_000,
            frame_width: FrameSize::TRANSMITTED.width,
            frame_height: FrameSize::TRANSMITTED.height,
            jpeg_quality: 80,
            confirmation_threshold: 2,
            min_candidate_confidence: 0.0,
            overlap_iou: 0.5,
            capture_fps: 10,
            http_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from the optional file and `ROLLCALL_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Overlay environment variables. Unparseable values keep the current setting.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);
        env.string("ROLLCALL_SERVER_URL", &mut self.server_url);
        env.string("ROLLCALL_API_URL", &mut self.api_url);
        env.string("ROLLCALL_CAMERA_DEVICE", &mut self.camera_device);
        env.parse("ROLLCALL_SEND_INTERVAL_MS", &mut self.send_interval_ms);
        env.parse("ROLLCALL_RECONNECT_ATTEMPTS", &mut self.reconnect_attempts);
        env.parse("ROLLCALL_RECONNECT_DELAY_MS", &mut self.reconnect_delay_ms);
        env.parse("ROLLCALL_CONNECT_TIMEOUT_MS", &mut self.connect_timeout_ms);
        env.parse("ROLLCALL_FRAME_WIDTH", &mut self.frame_width);
        env.parse("ROLLCALL_FRAME_HEIGHT", &mut self.frame_height);
        env.parse("ROLLCALL_JPEG_QUALITY", &mut self.jpeg_quality);
        env.parse("ROLLCALL_CONFIRMATION_THRESHOLD", &mut self.confirmation_threshold);
        env.parse("ROLLCALL_MIN_CONFIDENCE", &mut self.min_candidate_confidence);
        env.parse("ROLLCALL_OVERLAP_IOU", &mut self.overlap_iou);
        env.parse("ROLLCALL_CAPTURE_FPS", &mut self.capture_fps);
        env.parse("ROLLCALL_HTTP_TIMEOUT_SECS", &mut self.http_timeout_secs);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.send_interval_ms == 0 {
            return Err(invalid("send_interval_ms", "must be greater than zero"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(invalid("connect_timeout_ms", "must be greater than zero"));
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(invalid("frame_width/frame_height", "must be non-zero"));
        }
        if self.confirmation_threshold == 0 {
            return Err(invalid("confirmation_threshold", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.overlap_iou) {
            return Err(invalid("overlap_iou", "must be within 0.0..=1.0"));
        }
        let server = Url::parse(&self.server_url)?;
        if !matches!(server.scheme(), "ws" | "wss") {
            return Err(invalid("server_url", "scheme must be ws or wss"));
        }
        Url::parse(&self.api_url)?;
        Ok(())
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn frame_size(&self) -> FrameSize {
        FrameSize::new(self.frame_width, self.frame_height)
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            confirmation_threshold: self.confirmation_threshold,
            min_candidate_confidence: self.min_candidate_confidence,
            overlap_iou: self.overlap_iou,
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect_attempts,
            delay: Duration::from_millis(self.reconnect_delay_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Attendance channel URL: `{server_url}/ws/attendance/{course}/?token={token}`.
    pub fn channel_url(&self, course_id: CourseId, token: &str) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.server_url)?;
        let path = format!(
            "{}/ws/attendance/{course_id}/",
            url.path().trim_end_matches('/')
        );
        url.set_path(&path);
        url.query_pairs_mut().clear().append_pair("token", token);
        Ok(url)
    }
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.to_string(),
    }
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn string(&self, key: &str, slot: &mut String) {
        if let Some(v) = (self.0)(key) {
            *slot = v;
        }
    }

    fn parse<T: FromStr>(&self, key: &str, slot: &mut T) {
        let Some(raw) = (self.0)(key) else {
            return;
        };
        match raw.trim().parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable environment value"),
        }
    }
}
