//! armview - headless synchronization daemon.
//!
//! Loads the robot description and point clouds, subscribes to joint and
//! current telemetry, and keeps the hierarchy posed. Instead of rendering it
//! logs a summary of the scene once per second.
//!
//! Examples:
//!   armview                                          # defaults, localhost:8080/8081
//!   armview --model urdf/arm/robot.urdf --up-axis +Z
//!   armview --cloud-a pointcloud/a.txt --cloud-b pointcloud/b.txt
//!   armview --config session.json --joint-url ws://robot:8080/ws

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use armview::{
    CameraView, ConnectionState, DisplayStores, FrameRegistry, FrameSink, ModelStatus, Session,
    SyncConfig, UpAxis,
};

/// Keep a dual-arm robot model in sync with live telemetry.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON session configuration. Flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Joint-angle WebSocket endpoint.
    #[arg(long)]
    joint_url: Option<String>,

    /// Motor-current WebSocket endpoint.
    #[arg(long)]
    current_url: Option<String>,

    /// Robot description (URDF).
    #[arg(long)]
    model: Option<PathBuf>,

    /// Directory to resolve mesh files against.
    #[arg(long)]
    mesh_dir: Option<PathBuf>,

    /// Point cloud anchored to the first arm's base frame.
    #[arg(long)]
    cloud_a: Option<PathBuf>,

    /// Point cloud anchored to the second arm's base frame.
    #[arg(long)]
    cloud_b: Option<PathBuf>,

    /// Model axis that should point up (+X, -X, +Y, -Y, +Z, -Z).
    #[arg(long, allow_hyphen_values = true)]
    up_axis: Option<UpAxis>,

    /// Seconds between scene summaries.
    #[arg(long, default_value_t = 1.0)]
    report_secs: f64,
}

impl Args {
    fn into_config(self) -> Result<SyncConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
            }
            None => SyncConfig::default(),
        };

        if let Some(url) = self.joint_url {
            config.joint.url = url;
        }
        if let Some(url) = self.current_url {
            config.current.url = url;
        }
        if let Some(model) = self.model {
            config.model_path = model;
        }
        if self.mesh_dir.is_some() {
            config.mesh_dir = self.mesh_dir;
        }
        if self.cloud_a.is_some() {
            config.cloud_a.path = self.cloud_a;
        }
        if self.cloud_b.is_some() {
            config.cloud_b.path = self.cloud_b;
        }
        if let Some(axis) = self.up_axis {
            config.up_axis = axis;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Stands in for a renderer: logs the posed scene at a fixed rate.
struct LogSink {
    every: Duration,
    last: Option<Instant>,
    frames: u64,
}

impl LogSink {
    fn new(every: Duration) -> Self {
        Self {
            every,
            last: None,
            frames: 0,
        }
    }
}

impl FrameSink for LogSink {
    fn draw(&mut self, registry: &FrameRegistry, camera: &CameraView) {
        self.frames += 1;
        if self.last.is_some_and(|t| t.elapsed() < self.every) {
            return;
        }
        self.last = Some(Instant::now());

        let graph = registry.graph();
        let bounds = graph.world_bounds(registry.root());
        tracing::info!(
            "frame {}: '{}' {} nodes, bounds size {:?}, camera at {:?}",
            self.frames,
            registry.name(),
            graph.len(),
            bounds.size(),
            camera.eye
        );
        for joint in registry.joints() {
            tracing::debug!("  {} = {:.1} deg", joint.name(), joint.value().to_degrees());
        }
    }
}

/// Log changes of the display stores until cancelled.
async fn watch_stores(mut stores: DisplayStores, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = stores.model_status.changed() => {
                if changed.is_err() {
                    break;
                }
                match &*stores.model_status.borrow_and_update() {
                    ModelStatus::Failed(e) => tracing::error!("Model failed to load: {}", e),
                    status => tracing::info!("Model status: {:?}", status),
                }
            }
            changed = stores.joint_connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *stores.joint_connection.borrow_and_update();
                log_connection("joint", state);
            }
            changed = stores.current_connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *stores.current_connection.borrow_and_update();
                log_connection("current", state);
            }
            changed = stores.current.changed() => {
                if changed.is_err() {
                    break;
                }
                let sample = stores.current.borrow_and_update().clone();
                tracing::debug!("Currents: A {:?}, B {:?}", sample.arm_a, sample.arm_b);
            }
        }
    }
}

fn log_connection(name: &str, state: ConnectionState) {
    match state {
        ConnectionState::Open => tracing::info!("[{}] telemetry live", name),
        ConnectionState::ClosedRetrying => tracing::warn!("[{}] telemetry lost, retrying", name),
        other => tracing::debug!("[{}] {:?}", name, other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("armview=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .init();

    let args = Args::parse();
    let report = Duration::try_from_secs_f64(args.report_secs.max(0.01))
        .with_context(|| format!("invalid --report-secs {}", args.report_secs))?;
    let config = args.into_config()?;

    println!();
    println!("========================================");
    println!("armview");
    println!("========================================");
    println!("Joints:   {}", config.joint.url);
    println!("Current:  {}", config.current.url);
    println!("Model:    {}", config.model_path.display());
    for (label, cloud) in [("Cloud A", &config.cloud_a), ("Cloud B", &config.cloud_b)] {
        match &cloud.path {
            Some(path) => println!("{}:  {} -> {}", label, path.display(), cloud.frame),
            None => println!("{}:  none", label),
        }
    }
    println!("Up axis:  {}", config.up_axis);
    println!("========================================");
    println!();

    let mut session = Session::with_defaults(config)?;
    let cancel = session.cancel_token();

    tokio::spawn(watch_stores(session.stores(), cancel.clone()));

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Ctrl+C received, stopping...");
        cancel_clone.cancel();
    });

    session.load_configured();
    session.run(LogSink::new(report)).await
}
