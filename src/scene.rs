//! Minimal scene graph for the loaded robot hierarchy.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Each node carries
//! a local [`Transform`]; world transforms are composed on demand from the
//! parent chain. The renderer walks this graph every frame; the core only
//! mutates local transforms and attaches children.

use std::sync::Arc;

use glam::{Affine3A, Quat, Vec3};

use crate::pointcloud::PointCloudDataset;

/// Handle to a node in a [`SceneGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Local translation, rotation and scale of a node relative to its parent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn from_translation_rotation(translation: Vec3, rotation: Quat) -> Self {
        Self {
            translation,
            rotation,
            scale: Vec3::ONE,
        }
    }

    pub fn to_affine(&self) -> Affine3A {
        Affine3A::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn from_center_half_extents(center: Vec3, half: Vec3) -> Self {
        Self {
            min: center - half,
            max: center + half,
        }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vec3>) -> Self {
        let mut aabb = Self::EMPTY;
        for p in points {
            aabb.extend_point(*p);
        }
        aabb
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn extend_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn union(&mut self, other: &Aabb) {
        if other.is_empty() {
            return;
        }
        self.extend_point(other.min);
        self.extend_point(other.max);
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        if self.is_empty() {
            Vec3::ZERO
        } else {
            self.max - self.min
        }
    }

    /// Box enclosing this one after an affine transform.
    pub fn transformed(&self, affine: &Affine3A) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        let mut out = Aabb::EMPTY;
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.extend_point(affine.transform_point3(corner));
        }
        out
    }
}

/// What a node holds.
#[derive(Clone, Debug)]
pub enum NodeContent {
    /// A named reference frame (robot link) with no geometry of its own.
    Frame,
    /// Joint frame between a parent and a child link.
    Joint,
    /// Renderable geometry with optional local bounds.
    Visual { label: String, bounds: Option<Aabb> },
    /// Point cloud renderable.
    PointCloud(Arc<PointCloudDataset>),
    /// Axes marker of the given length.
    Axes { length: f32 },
}

/// A node in the graph.
#[derive(Clone, Debug)]
pub struct Node {
    pub name: String,
    pub transform: Transform,
    pub content: NodeContent,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// Arena-backed node hierarchy with a single root.
///
/// Slots freed by [`SceneGraph::remove_subtree`] are reused, so a removed
/// node's id may later name a different node.
#[derive(Clone, Debug)]
pub struct SceneGraph {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    root: NodeId,
}

impl SceneGraph {
    pub fn new(root_name: impl Into<String>, content: NodeContent) -> Self {
        let root = Node {
            name: root_name.into(),
            transform: Transform::IDENTITY,
            content,
            parent: None,
            children: Vec::new(),
        };
        Self {
            nodes: vec![Some(root)],
            free: Vec::new(),
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a child under `parent`. Returns `None` if `parent` is gone.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        transform: Transform,
        content: NodeContent,
    ) -> Option<NodeId> {
        self.get(parent)?;
        let node = Node {
            name: name.into(),
            transform,
            content,
            parent: Some(parent),
            children: Vec::new(),
        };
        let id = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                NodeId(slot)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        };
        if let Some(p) = self.get_mut(parent) {
            p.children.push(id);
        }
        Some(id)
    }

    /// Remove a node and everything below it. The root cannot be removed.
    pub fn remove_subtree(&mut self, id: NodeId) -> bool {
        if id == self.root {
            return false;
        }
        let Some(node) = self.get(id) else {
            return false;
        };
        if let Some(parent) = node.parent {
            if let Some(p) = self.get_mut(parent) {
                p.children.retain(|c| *c != id);
            }
        }
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(next.0).and_then(Option::take) {
                self.free.push(next.0);
                stack.extend(node.children);
            }
        }
        true
    }

    /// First node with this name in depth-first order from the root.
    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.descendants(self.root)
            .find(|id| self.get(*id).is_some_and(|n| n.name == name))
    }

    /// Depth-first pre-order traversal starting at (and including) `start`.
    pub fn descendants(&self, start: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut stack = if self.get(start).is_some() {
            vec![start]
        } else {
            Vec::new()
        };
        std::iter::from_fn(move || {
            let id = stack.pop()?;
            if let Some(node) = self.get(id) {
                stack.extend(node.children.iter().rev().copied());
            }
            Some(id)
        })
    }

    /// Compose local transforms from the root down to `id`.
    pub fn world_transform(&self, id: NodeId) -> Option<Affine3A> {
        let mut affine = self.get(id)?.transform.to_affine();
        let mut cursor = self.get(id)?.parent;
        while let Some(parent) = cursor {
            let node = self.get(parent)?;
            affine = node.transform.to_affine() * affine;
            cursor = node.parent;
        }
        Some(affine)
    }

    /// World-space bounds of all geometry under `start`.
    pub fn world_bounds(&self, start: NodeId) -> Aabb {
        let mut aabb = Aabb::EMPTY;
        for id in self.descendants(start) {
            let Some(node) = self.get(id) else { continue };
            let local = match &node.content {
                NodeContent::Visual {
                    bounds: Some(bounds),
                    ..
                } => *bounds,
                NodeContent::PointCloud(dataset) => dataset.bounds(),
                _ => continue,
            };
            if let Some(world) = self.world_transform(id) {
                aabb.union(&local.transformed(&world));
            }
        }
        aabb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn visual(half: f32) -> NodeContent {
        NodeContent::Visual {
            label: "box".into(),
            bounds: Some(Aabb::from_center_half_extents(Vec3::ZERO, Vec3::splat(half))),
        }
    }

    #[test]
    fn test_world_transform_composes_parents() {
        let mut graph = SceneGraph::new("root", NodeContent::Frame);
        let a = graph
            .add_child(
                graph.root(),
                "a",
                Transform::from_translation_rotation(Vec3::X, Quat::from_rotation_z(FRAC_PI_2)),
                NodeContent::Frame,
            )
            .unwrap();
        let b = graph
            .add_child(
                a,
                "b",
                Transform::from_translation_rotation(Vec3::X, Quat::IDENTITY),
                NodeContent::Frame,
            )
            .unwrap();

        let world = graph.world_transform(b).unwrap();
        let origin = world.transform_point3(Vec3::ZERO);
        assert!((origin - Vec3::new(1.0, 1.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_find_by_name_and_remove_subtree() {
        let mut graph = SceneGraph::new("root", NodeContent::Frame);
        let a = graph
            .add_child(graph.root(), "a", Transform::IDENTITY, NodeContent::Frame)
            .unwrap();
        let b = graph
            .add_child(a, "b", Transform::IDENTITY, NodeContent::Frame)
            .unwrap();
        assert_eq!(graph.find_by_name("b"), Some(b));
        assert_eq!(graph.len(), 3);

        assert!(graph.remove_subtree(a));
        assert_eq!(graph.find_by_name("a"), None);
        assert_eq!(graph.find_by_name("b"), None);
        assert_eq!(graph.len(), 1);
        assert!(graph.get(graph.root()).unwrap().children().is_empty());
        assert!(!graph.remove_subtree(graph.root()));
    }

    #[test]
    fn test_removed_slots_are_reused() {
        let mut graph = SceneGraph::new("root", NodeContent::Frame);
        let base = graph
            .add_child(graph.root(), "base", Transform::IDENTITY, NodeContent::Frame)
            .unwrap();

        for _ in 0..10 {
            let axes = graph
                .add_child(base, "axes", Transform::IDENTITY, NodeContent::Axes { length: 0.5 })
                .unwrap();
            graph
                .add_child(axes, "cloud", Transform::IDENTITY, NodeContent::Frame)
                .unwrap();
            assert!(graph.remove_subtree(axes));
        }

        assert_eq!(graph.nodes.len(), 4);
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.find_by_name("axes"), None);
        assert_eq!(graph.get(base).unwrap().children().len(), 0);
    }

    #[test]
    fn test_world_bounds_includes_scaled_geometry() {
        let mut graph = SceneGraph::new("root", NodeContent::Frame);
        graph.get_mut(graph.root()).unwrap().transform.scale = Vec3::splat(2.0);
        graph
            .add_child(
                graph.root(),
                "geom",
                Transform::from_translation_rotation(Vec3::new(0.0, 1.0, 0.0), Quat::IDENTITY),
                visual(0.5),
            )
            .unwrap();

        let bounds = graph.world_bounds(graph.root());
        assert!((bounds.min - Vec3::new(-1.0, 1.0, -1.0)).length() < 1e-5);
        assert!((bounds.max - Vec3::new(1.0, 3.0, 1.0)).length() < 1e-5);
    }

    #[test]
    fn test_empty_bounds() {
        let graph = SceneGraph::new("root", NodeContent::Frame);
        let bounds = graph.world_bounds(graph.root());
        assert!(bounds.is_empty());
        assert_eq!(bounds.size(), Vec3::ZERO);
    }
}
