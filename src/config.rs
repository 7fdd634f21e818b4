//! Session configuration.
//!
//! All values have defaults matching the reference rig: joint telemetry on
//! port 8080, current telemetry on port 8081, two point clouds anchored to
//! the `base_frameA_link` / `base_frameB_link` frames.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;
use crate::orientation::UpAxis;

pub const DEFAULT_JOINT_URL: &str = "ws://localhost:8080/ws";
pub const DEFAULT_CURRENT_URL: &str = "ws://localhost:8081/ws";
pub const DEFAULT_MODEL_PATH: &str = "urdf/myRobot/urdf/robot.urdf";
pub const DEFAULT_FRAME_A: &str = "base_frameA_link";
pub const DEFAULT_FRAME_B: &str = "base_frameB_link";

/// Reconnection backoff parameters, in milliseconds.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub factor: f64,
    pub ceiling_ms: u64,
}

impl BackoffConfig {
    pub fn with_ceiling(ceiling_ms: u64) -> Self {
        Self {
            ceiling_ms,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.base_ms == 0 {
            return Err(ConfigError::InvalidBackoff("base delay must be non-zero".into()));
        }
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(ConfigError::InvalidBackoff(format!(
                "growth factor {} must be >= 1",
                self.factor
            )));
        }
        if self.base_ms > self.ceiling_ms {
            return Err(ConfigError::InvalidBackoff(format!(
                "base {}ms exceeds ceiling {}ms",
                self.base_ms, self.ceiling_ms
            )));
        }
        Ok(())
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 1000,
            factor: 1.5,
            ceiling_ms: 30_000,
        }
    }
}

/// One streaming endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct EndpointConfig {
    pub url: String,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl EndpointConfig {
    pub fn new(url: &str, ceiling_ms: u64) -> Self {
        Self {
            url: url.to_string(),
            backoff: BackoffConfig::with_ceiling(ceiling_ms),
        }
    }

    /// Parse and check the URL. Only WebSocket schemes are accepted.
    pub fn parsed_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.url).map_err(|source| ConfigError::InvalidUrl {
            url: self.url.clone(),
            source,
        })?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            _ => Err(ConfigError::UnsupportedScheme(self.url.clone())),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.parsed_url()?;
        self.backoff.validate()
    }
}

/// A point-cloud source file and the frame it is anchored to.
#[derive(Clone, Debug, Deserialize)]
pub struct CloudConfig {
    pub path: Option<PathBuf>,
    pub frame: String,
}

impl CloudConfig {
    pub fn new(frame: &str) -> Self {
        Self {
            path: None,
            frame: frame.to_string(),
        }
    }
}

/// Full configuration of a synchronization session.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub joint: EndpointConfig,
    pub current: EndpointConfig,
    pub model_path: PathBuf,
    /// Directory meshes are resolved against. Defaults to the model's directory.
    pub mesh_dir: Option<PathBuf>,
    pub cloud_a: CloudConfig,
    pub cloud_b: CloudConfig,
    pub up_axis: UpAxis,
    pub frame_interval_ms: u64,
    pub event_capacity: usize,
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.joint.validate()?;
        self.current.validate()?;
        if self.frame_interval_ms == 0 {
            return Err(ConfigError::InvalidSession(
                "frame interval must be non-zero".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::InvalidSession(
                "event capacity must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            joint: EndpointConfig::new(DEFAULT_JOINT_URL, 30_000),
            current: EndpointConfig::new(DEFAULT_CURRENT_URL, 10_000),
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            mesh_dir: None,
            cloud_a: CloudConfig::new(DEFAULT_FRAME_A),
            cloud_b: CloudConfig::new(DEFAULT_FRAME_B),
            up_axis: UpAxis::PosY,
            frame_interval_ms: 16,
            event_capacity: 64,
        }
    }
}
