//! Anchoring static point clouds to named frames of the robot.

use std::sync::Arc;

use glam::Vec3;

use crate::model::FrameRegistry;
use crate::pointcloud::{PointCloudDataset, DISPLAY_SCALE};
use crate::scene::{NodeContent, NodeId, Transform};

/// Length of the axes marker added at each anchor frame, in meters.
pub const AXES_MARKER_LENGTH: f32 = 0.5;

/// Nodes created by one attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attachment {
    /// The frame the cloud ended up under.
    pub frame: NodeId,
    pub cloud: NodeId,
    pub marker: NodeId,
    /// True when the requested frame was missing and the root was used.
    pub fell_back: bool,
}

/// Attaches a dataset under a named frame so it follows that frame's pose.
#[derive(Clone, Debug)]
pub struct AssetAnchor {
    label: String,
    frame_name: String,
}

impl AssetAnchor {
    pub fn new(label: impl Into<String>, frame_name: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            frame_name: frame_name.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn frame_name(&self) -> &str {
        &self.frame_name
    }

    /// Attach the dataset and an axes marker to the anchor frame.
    ///
    /// A missing frame is not an error: the cloud goes under the root.
    pub fn attach(
        &self,
        dataset: Arc<PointCloudDataset>,
        registry: &mut FrameRegistry,
    ) -> Attachment {
        let (frame, fell_back) = match registry.frame(&self.frame_name) {
            Some(id) => (id, false),
            None => {
                tracing::warn!(
                    "[{}] frame '{}' not found in '{}', attaching to root",
                    self.label,
                    self.frame_name,
                    registry.name()
                );
                (registry.root(), true)
            }
        };

        let points = dataset.len();
        let graph = registry.graph_mut();
        let marker = graph
            .add_child(
                frame,
                format!("{}_axes", self.label),
                Transform::IDENTITY,
                NodeContent::Axes {
                    length: AXES_MARKER_LENGTH,
                },
            )
            .unwrap_or(frame);

        let transform = Transform {
            scale: Vec3::splat(DISPLAY_SCALE),
            ..Transform::IDENTITY
        };
        let cloud = graph
            .add_child(
                frame,
                format!("{}_cloud", self.label),
                transform,
                NodeContent::PointCloud(dataset),
            )
            .unwrap_or(frame);

        tracing::info!(
            "[{}] attached {} points to '{}'",
            self.label,
            points,
            graph.get(frame).map(|n| n.name.as_str()).unwrap_or("?")
        );

        Attachment {
            frame,
            cloud,
            marker,
            fell_back,
        }
    }

    /// Remove a previous attachment's nodes.
    pub fn detach(&self, attachment: &Attachment, registry: &mut FrameRegistry) {
        let graph = registry.graph_mut();
        for id in [attachment.cloud, attachment.marker] {
            if id != attachment.frame {
                graph.remove_subtree(id);
            }
        }
        tracing::debug!("[{}] detached", self.label);
    }
}
