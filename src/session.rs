//! The synchronization session.
//!
//! A [`Session`] is a single task that owns the loaded robot, the two
//! anchored point clouds, both telemetry clients and the display stores.
//! Everything that mutates the hierarchy arrives as a [`SessionEvent`] on one
//! channel and is handled in order, so the renderer (a [`FrameSink`] called
//! on every tick from the same task) never observes a half-applied update.
//!
//! Model and cloud loads run off-task and report back with the generation
//! they were started for. A result whose generation is no longer current is
//! dropped, so a slow load can never land on a newer model.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use glam::Vec3;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::anchor::{AssetAnchor, Attachment};
use crate::config::SyncConfig;
use crate::error::{ConfigError, LoadError};
use crate::joints::{self, JointInfo, PoseApplier};
use crate::model::{FrameRegistry, ModelLoader, ModelRequest, UrdfLoader};
use crate::orientation::{CameraView, OrientationNormalizer, UpAxis};
use crate::pointcloud::{PointCloudDataset, DISPLAY_SCALE};
use crate::stream_client::{ConnectionState, StreamingClient};
use crate::telemetry::{CurrentSample, JointReading};
use crate::transport::{Transport, WsTransport};

/// One of the two point-cloud slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloudSlot {
    A,
    B,
}

impl CloudSlot {
    pub const ALL: [CloudSlot; 2] = [CloudSlot::A, CloudSlot::B];

    fn index(self) -> usize {
        match self {
            CloudSlot::A => 0,
            CloudSlot::B => 1,
        }
    }

    fn label(self) -> &'static str {
        match self {
            CloudSlot::A => "cloud_a",
            CloudSlot::B => "cloud_b",
        }
    }
}

/// Progress of the most recent model load.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelStatus {
    Idle,
    Loading(PathBuf),
    Loaded { name: String, joints: usize },
    Failed(String),
}

/// Inputs to the session task.
#[derive(Debug)]
pub enum SessionEvent {
    LoadModel(ModelRequest),
    ModelLoaded {
        generation: u64,
        result: Result<FrameRegistry, LoadError>,
    },
    UnloadModel,
    LoadPointCloud {
        slot: CloudSlot,
        path: PathBuf,
    },
    PointCloudLoaded {
        slot: CloudSlot,
        generation: u64,
        result: Result<PointCloudDataset, LoadError>,
    },
    JointUpdate(Vec<JointReading>),
    SelectUpAxis(UpAxis),
    Shutdown,
}

/// Receives the live hierarchy once per render tick.
pub trait FrameSink: Send {
    fn draw(&mut self, registry: &FrameRegistry, camera: &CameraView);
}

/// Cloneable sender side of a session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionEvent>,
}

impl SessionHandle {
    pub async fn send(&self, event: SessionEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| anyhow::anyhow!("session is no longer running"))
    }

    pub async fn load_model(&self, request: ModelRequest) -> Result<()> {
        self.send(SessionEvent::LoadModel(request)).await
    }

    pub async fn unload_model(&self) -> Result<()> {
        self.send(SessionEvent::UnloadModel).await
    }

    pub async fn load_point_cloud(&self, slot: CloudSlot, path: impl Into<PathBuf>) -> Result<()> {
        self.send(SessionEvent::LoadPointCloud {
            slot,
            path: path.into(),
        })
        .await
    }

    pub async fn select_up_axis(&self, axis: UpAxis) -> Result<()> {
        self.send(SessionEvent::SelectUpAxis(axis)).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(SessionEvent::Shutdown).await
    }
}

/// Read side of the values the session publishes for display.
#[derive(Clone, Debug)]
pub struct DisplayStores {
    pub joint_infos: watch::Receiver<Vec<JointInfo>>,
    pub current: watch::Receiver<CurrentSample>,
    pub model_status: watch::Receiver<ModelStatus>,
    pub joint_connection: watch::Receiver<ConnectionState>,
    pub current_connection: watch::Receiver<ConnectionState>,
}

struct LoadedModel {
    registry: FrameRegistry,
    normalizer: OrientationNormalizer,
}

struct CloudState {
    anchor: AssetAnchor,
    generation: u64,
    dataset: Option<Arc<PointCloudDataset>>,
    attachment: Option<Attachment>,
}

impl CloudState {
    fn new(slot: CloudSlot, frame: &str) -> Self {
        Self {
            anchor: AssetAnchor::new(slot.label(), frame),
            generation: 0,
            dataset: None,
            attachment: None,
        }
    }

    /// Attach the ready dataset to the model, replacing any earlier node.
    fn attach(&mut self, registry: &mut FrameRegistry) {
        let Some(dataset) = self.dataset.clone() else {
            return;
        };
        if let Some(previous) = self.attachment.take() {
            self.anchor.detach(&previous, registry);
        }
        self.attachment = Some(self.anchor.attach(dataset, registry));
    }
}

pub struct Session<T: Transport + Clone = WsTransport> {
    config: SyncConfig,
    loader: Arc<dyn ModelLoader>,
    tx: mpsc::Sender<SessionEvent>,
    rx: mpsc::Receiver<SessionEvent>,
    cancel: CancellationToken,

    generation: u64,
    model: Option<LoadedModel>,
    clouds: [CloudState; 2],
    applier: PoseApplier,

    joint_client: StreamingClient<T>,
    current_client: StreamingClient<T>,

    joint_infos: watch::Sender<Vec<JointInfo>>,
    status: watch::Sender<ModelStatus>,
    current: watch::Receiver<CurrentSample>,
}

impl Session<WsTransport> {
    /// A session over WebSockets, loading URDF files from disk.
    pub fn with_defaults(config: SyncConfig) -> Result<Self, ConfigError> {
        Self::new(config, WsTransport, Arc::new(UrdfLoader))
    }
}

impl<T: Transport + Clone> Session<T> {
    pub fn new(
        config: SyncConfig,
        transport: T,
        loader: Arc<dyn ModelLoader>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (tx, rx) = mpsc::channel(config.event_capacity);

        let joint_tx = tx.clone();
        let joint_client =
            StreamingClient::joint(&config.joint, transport.clone(), move |readings| {
                match joint_tx.try_send(SessionEvent::JointUpdate(readings)) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!("Joint update dropped, session busy");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        tracing::debug!("Joint update dropped, session closed");
                    }
                }
            })?;

        let (current_tx, current) = watch::channel(CurrentSample::default());
        let current_client = StreamingClient::current(&config.current, transport, move |sample| {
            current_tx.send_replace(sample);
        })?;

        let clouds = [
            CloudState::new(CloudSlot::A, &config.cloud_a.frame),
            CloudState::new(CloudSlot::B, &config.cloud_b.frame),
        ];

        Ok(Self {
            config,
            loader,
            tx,
            rx,
            cancel: CancellationToken::new(),
            generation: 0,
            model: None,
            clouds,
            applier: PoseApplier::new(),
            joint_client,
            current_client,
            joint_infos: watch::channel(Vec::new()).0,
            status: watch::channel(ModelStatus::Idle).0,
            current,
        })
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            tx: self.tx.clone(),
        }
    }

    /// Token that stops [`Session::run`] when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stores(&self) -> DisplayStores {
        DisplayStores {
            joint_infos: self.joint_infos.subscribe(),
            current: self.current.clone(),
            model_status: self.status.subscribe(),
            joint_connection: self.joint_client.subscribe_state(),
            current_connection: self.current_client.subscribe_state(),
        }
    }

    pub fn registry(&self) -> Option<&FrameRegistry> {
        self.model.as_ref().map(|m| &m.registry)
    }

    pub fn camera(&self) -> Option<&CameraView> {
        self.model.as_ref().map(|m| m.normalizer.camera())
    }

    /// Queue the configured model and any configured clouds.
    pub fn load_configured(&mut self) {
        let mut request = ModelRequest::new(self.config.model_path.clone());
        request.mesh_dir = self.config.mesh_dir.clone();
        self.handle_event(SessionEvent::LoadModel(request));

        for slot in CloudSlot::ALL {
            let cloud = match slot {
                CloudSlot::A => &self.config.cloud_a,
                CloudSlot::B => &self.config.cloud_b,
            };
            if let Some(path) = cloud.path.clone() {
                self.handle_event(SessionEvent::LoadPointCloud { slot, path });
            }
        }
    }

    /// Connect both telemetry clients.
    pub fn start_streams(&mut self) {
        self.joint_client.start();
        self.current_client.start();
    }

    pub fn stop_streams(&mut self) {
        self.joint_client.stop();
        self.current_client.stop();
    }

    /// Drive the session until shutdown: handle events in arrival order and
    /// draw one frame per tick.
    pub async fn run(mut self, mut sink: impl FrameSink) -> Result<()> {
        self.start_streams();

        let mut tick = tokio::time::interval(self.config.frame_interval());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::info!("Session cancelled");
                    break;
                }
                event = self.rx.recv() => {
                    let Some(event) = event else { break };
                    if !self.handle_event(event) {
                        break;
                    }
                }
                _ = tick.tick() => {
                    if let Some(model) = &self.model {
                        sink.draw(&model.registry, model.normalizer.camera());
                    }
                }
            }
        }

        self.stop_streams();
        tracing::info!("Session stopped");
        Ok(())
    }

    /// Apply one event. Returns false when the session should stop.
    pub fn handle_event(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::LoadModel(request) => self.begin_model_load(request),
            SessionEvent::ModelLoaded { generation, result } => {
                if generation != self.generation {
                    tracing::debug!(
                        "Discarding model load {} (current is {})",
                        generation,
                        self.generation
                    );
                    return true;
                }
                match result {
                    Ok(registry) => self.on_model_loaded(registry),
                    Err(e) => {
                        tracing::error!("Model load failed: {}", e);
                        self.status.send_replace(ModelStatus::Failed(e.to_string()));
                    }
                }
            }
            SessionEvent::UnloadModel => {
                self.unload_model();
                self.generation += 1;
                self.status.send_replace(ModelStatus::Idle);
            }
            SessionEvent::LoadPointCloud { slot, path } => self.begin_cloud_load(slot, path),
            SessionEvent::PointCloudLoaded {
                slot,
                generation,
                result,
            } => self.on_cloud_loaded(slot, generation, result),
            SessionEvent::JointUpdate(readings) => self.on_joint_update(&readings),
            SessionEvent::SelectUpAxis(axis) => match &mut self.model {
                Some(model) => {
                    model.normalizer.select(axis, &mut model.registry);
                }
                None => tracing::debug!("Up axis {} ignored, no model loaded", axis),
            },
            SessionEvent::Shutdown => return false,
        }
        true
    }

    fn unload_model(&mut self) {
        if let Some(model) = self.model.take() {
            tracing::info!("Unloading robot '{}'", model.registry.name());
        }
        // Attachments point into the dropped hierarchy.
        for cloud in &mut self.clouds {
            cloud.attachment = None;
        }
        self.applier.reset();
        self.joint_infos.send_replace(Vec::new());
    }

    fn begin_model_load(&mut self, request: ModelRequest) {
        self.unload_model();
        self.generation += 1;
        let generation = self.generation;
        self.status
            .send_replace(ModelStatus::Loading(request.description.clone()));

        let loader = self.loader.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = match tokio::task::spawn_blocking(move || loader.load(&request)).await {
                Ok(result) => result,
                Err(e) => Err(LoadError::Task(e.to_string())),
            };
            if tx
                .send(SessionEvent::ModelLoaded { generation, result })
                .await
                .is_err()
            {
                tracing::debug!("Session gone before model load {} finished", generation);
            }
        });
    }

    fn on_model_loaded(&mut self, mut registry: FrameRegistry) {
        let infos = joints::derive_joint_infos(&registry);
        let joint_count = infos.len();
        self.joint_infos.send_replace(infos);

        let root = registry.root();
        if let Some(node) = registry.graph_mut().get_mut(root) {
            node.transform.scale = Vec3::splat(1.0 / DISPLAY_SCALE);
        }

        let mut normalizer = OrientationNormalizer::new();
        normalizer.select(self.config.up_axis, &mut registry);

        for cloud in &mut self.clouds {
            cloud.attach(&mut registry);
        }

        tracing::info!(
            "Robot '{}' ready with {} controllable joints",
            registry.name(),
            joint_count
        );
        self.status.send_replace(ModelStatus::Loaded {
            name: registry.name().to_string(),
            joints: joint_count,
        });
        self.model = Some(LoadedModel {
            registry,
            normalizer,
        });
    }

    fn begin_cloud_load(&mut self, slot: CloudSlot, path: PathBuf) {
        let cloud = &mut self.clouds[slot.index()];
        cloud.generation += 1;
        let generation = cloud.generation;
        tracing::info!("[{}] loading {}", slot.label(), path.display());

        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = PointCloudDataset::load(&path).await;
            let event = SessionEvent::PointCloudLoaded {
                slot,
                generation,
                result,
            };
            if tx.send(event).await.is_err() {
                tracing::debug!("Session gone before {} finished loading", slot.label());
            }
        });
    }

    fn on_cloud_loaded(
        &mut self,
        slot: CloudSlot,
        generation: u64,
        result: Result<PointCloudDataset, LoadError>,
    ) {
        let cloud = &mut self.clouds[slot.index()];
        if generation != cloud.generation {
            tracing::debug!("[{}] discarding stale load {}", slot.label(), generation);
            return;
        }

        let dataset = match result {
            Ok(dataset) => dataset,
            Err(e) => {
                tracing::error!("[{}] point cloud load failed: {}", slot.label(), e);
                return;
            }
        };
        if dataset.is_empty() {
            tracing::warn!("[{}] point cloud has no points after decimation", slot.label());
        }
        cloud.dataset = Some(Arc::new(dataset));

        if let Some(model) = &mut self.model {
            cloud.attach(&mut model.registry);
        }
    }

    fn on_joint_update(&mut self, readings: &[JointReading]) {
        let registry = self.model.as_mut().map(|m| &mut m.registry);
        if registry.is_none() {
            return;
        }
        self.applier.apply(registry, readings);
        self.joint_infos
            .send_if_modified(|infos| joints::apply_readings(infos, readings) > 0);
    }
}
