//! armview - live data-to-scene synchronization for a dual-arm robot.
//!
//! Two reconnecting WebSocket subscribers feed joint angles and motor
//! currents into a loaded robot hierarchy. Static point clouds are anchored
//! to named frames of that hierarchy so they move with the arms, and the
//! whole model is re-oriented for a chosen up axis.
//!
//! # Example
//!
//! ```no_run
//! use armview::{CameraView, FrameRegistry, FrameSink, Session, SyncConfig};
//!
//! struct Log;
//!
//! impl FrameSink for Log {
//!     fn draw(&mut self, registry: &FrameRegistry, _camera: &CameraView) {
//!         println!("{} joints", registry.joints().count());
//!     }
//! }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut session = Session::with_defaults(SyncConfig::default())?;
//! session.load_configured();
//! session.run(Log).await?;
//! # Ok(())
//! # }
//! ```

pub mod anchor;
pub mod backoff;
pub mod config;
pub mod error;
pub mod joints;
pub mod mesh;
pub mod model;
pub mod orientation;
pub mod pointcloud;
pub mod scene;
pub mod session;
pub mod stream_client;
pub mod telemetry;
pub mod transport;

pub use anchor::{AssetAnchor, Attachment};
pub use backoff::BackoffSchedule;
pub use config::{BackoffConfig, CloudConfig, EndpointConfig, SyncConfig};
pub use error::{ConfigError, FrameError, LoadError};
pub use joints::{derive_joint_infos, JointInfo, PoseApplier};
pub use model::{FrameRegistry, ModelLoader, ModelRequest, UrdfLoader};
pub use orientation::{CameraView, OrientationNormalizer, UpAxis};
pub use pointcloud::PointCloudDataset;
pub use session::{
    CloudSlot, DisplayStores, FrameSink, ModelStatus, Session, SessionEvent, SessionHandle,
};
pub use stream_client::{ConnectionState, StreamingClient};
pub use telemetry::{CurrentSample, JointReading, TelemetryFrame};
pub use transport::{Transport, WsTransport};
