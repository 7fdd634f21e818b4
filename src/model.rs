//! Robot model: the [`FrameRegistry`] built from a URDF description.
//!
//! The hierarchy mirrors the description: every link is a frame node, every
//! joint sits between its parent link and its child link, and visuals hang
//! under their link with their origin offsets.
//!
//! ```text
//! root_link
//!   ├── visual
//!   └── joint_1
//!         └── link_1
//!               └── joint_2
//!                     └── link_2
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use glam::{EulerRot, Quat, Vec3};

use crate::error::LoadError;
use crate::mesh::{self, MeshFormat};
use crate::scene::{Aabb, NodeContent, NodeId, SceneGraph, Transform};

/// How a joint moves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JointKind {
    Revolute,
    Continuous,
    Prismatic,
    Fixed,
    /// Floating, planar and spherical joints. Not actuated.
    Other,
}

impl From<&urdf_rs::JointType> for JointKind {
    fn from(joint_type: &urdf_rs::JointType) -> Self {
        match joint_type {
            urdf_rs::JointType::Revolute => JointKind::Revolute,
            urdf_rs::JointType::Continuous => JointKind::Continuous,
            urdf_rs::JointType::Prismatic => JointKind::Prismatic,
            urdf_rs::JointType::Fixed => JointKind::Fixed,
            _ => JointKind::Other,
        }
    }
}

/// Writable handle to one joint of the loaded model.
#[derive(Clone, Debug)]
pub struct JointActuator {
    name: String,
    node: NodeId,
    kind: JointKind,
    axis: Vec3,
    origin: Transform,
    lower: f64,
    upper: f64,
    value: f64,
}

impl JointActuator {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn kind(&self) -> JointKind {
        self.kind
    }

    /// Declared limits in the model's native unit (radians for rotary joints).
    /// Both are zero when the description declares none.
    pub fn limits(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }

    /// Current value in the native unit.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Local transform of the joint node at the current value.
    fn pose(&self) -> Transform {
        match self.kind {
            JointKind::Revolute | JointKind::Continuous => Transform::from_translation_rotation(
                self.origin.translation,
                self.origin.rotation * Quat::from_axis_angle(self.axis, self.value as f32),
            ),
            JointKind::Prismatic => Transform::from_translation_rotation(
                self.origin.translation + self.origin.rotation * (self.axis * self.value as f32),
                self.origin.rotation,
            ),
            JointKind::Fixed | JointKind::Other => self.origin,
        }
    }
}

/// The loaded robot's named hierarchy of frames and joints.
///
/// Structure is fixed once built; only joint values and attached assets
/// change until the next load replaces the whole registry.
#[derive(Clone, Debug)]
pub struct FrameRegistry {
    name: String,
    graph: SceneGraph,
    frames: HashMap<String, NodeId>,
    joints: Vec<JointActuator>,
    joint_index: HashMap<String, usize>,
}

impl FrameRegistry {
    /// Robot name from the description.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> NodeId {
        self.graph.root()
    }

    pub fn graph(&self) -> &SceneGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut SceneGraph {
        &mut self.graph
    }

    /// Look up a named frame (link or joint), falling back to any node name.
    pub fn frame(&self, name: &str) -> Option<NodeId> {
        self.frames
            .get(name)
            .copied()
            .or_else(|| self.graph.find_by_name(name))
    }

    /// Joints in declaration order.
    pub fn joints(&self) -> impl Iterator<Item = &JointActuator> {
        self.joints.iter()
    }

    pub fn joint(&self, name: &str) -> Option<&JointActuator> {
        self.joint_index.get(name).map(|&i| &self.joints[i])
    }

    /// Write a joint value in its native unit. Returns false for unknown names.
    pub fn set_joint_value(&mut self, name: &str, value: f64) -> bool {
        let Some(&index) = self.joint_index.get(name) else {
            return false;
        };
        let joint = &mut self.joints[index];
        joint.value = value;
        let pose = joint.pose();
        if let Some(node) = self.graph.get_mut(joint.node) {
            node.transform = pose;
        }
        true
    }

    /// Parse a description from text. Meshes resolve against `meshes`.
    pub fn from_urdf_str(xml: &str, meshes: &MeshSource) -> Result<Self, LoadError> {
        let robot = urdf_rs::read_from_string(xml)?;
        Self::from_urdf(&robot, meshes)
    }

    pub fn from_urdf(robot: &urdf_rs::Robot, meshes: &MeshSource) -> Result<Self, LoadError> {
        let links: HashMap<&str, &urdf_rs::Link> =
            robot.links.iter().map(|l| (l.name.as_str(), l)).collect();

        let mut children_of: HashMap<&str, Vec<(usize, &urdf_rs::Joint)>> = HashMap::new();
        let mut child_links = HashSet::new();
        for (order, joint) in robot.joints.iter().enumerate() {
            for link in [&joint.parent.link, &joint.child.link] {
                if !links.contains_key(link.as_str()) {
                    return Err(LoadError::UnknownLink {
                        joint: joint.name.clone(),
                        link: link.clone(),
                    });
                }
            }
            children_of
                .entry(joint.parent.link.as_str())
                .or_default()
                .push((order, joint));
            child_links.insert(joint.child.link.as_str());
        }

        let roots: Vec<&urdf_rs::Link> = robot
            .links
            .iter()
            .filter(|l| !child_links.contains(l.name.as_str()))
            .collect();
        let root_link = *roots.first().ok_or(LoadError::NoRootLink)?;
        if roots.len() > 1 {
            tracing::warn!(
                "Robot '{}' has {} root links, using '{}'",
                robot.name,
                roots.len(),
                root_link.name
            );
        }

        let mut graph = SceneGraph::new(root_link.name.clone(), NodeContent::Frame);
        let root = graph.root();
        let mut frames = HashMap::new();
        frames.insert(root_link.name.clone(), root);
        add_visuals(&mut graph, root, root_link, meshes)?;

        let mut joints: Vec<(usize, JointActuator)> = Vec::new();
        let mut visited = HashSet::from([root_link.name.as_str()]);
        let mut queue = VecDeque::from([(root_link.name.as_str(), root)]);

        while let Some((link_name, link_node)) = queue.pop_front() {
            let Some(children) = children_of.get(link_name) else {
                continue;
            };
            for &(order, joint) in children {
                let child_name = joint.child.link.as_str();
                if !visited.insert(child_name) {
                    tracing::warn!("Joint '{}' closes a loop at '{}', skipping", joint.name, child_name);
                    continue;
                }

                let origin = pose_transform(&joint.origin);
                let joint_node = graph
                    .add_child(link_node, joint.name.clone(), origin, NodeContent::Joint)
                    .ok_or(LoadError::NoRootLink)?;
                let child_node = graph
                    .add_child(joint_node, child_name, Transform::IDENTITY, NodeContent::Frame)
                    .ok_or(LoadError::NoRootLink)?;
                frames.insert(joint.name.clone(), joint_node);
                frames.insert(child_name.to_string(), child_node);
                add_visuals(&mut graph, child_node, links[child_name], meshes)?;

                let mut axis = vec3(&joint.axis.xyz);
                if axis.length_squared() < f32::EPSILON {
                    tracing::warn!("Joint '{}' has a zero axis, using +X", joint.name);
                    axis = Vec3::X;
                }

                joints.push((
                    order,
                    JointActuator {
                        name: joint.name.clone(),
                        node: joint_node,
                        kind: JointKind::from(&joint.joint_type),
                        axis: axis.normalize(),
                        origin,
                        lower: joint.limit.lower,
                        upper: joint.limit.upper,
                        value: 0.0,
                    },
                ));
                queue.push_back((child_name, child_node));
            }
        }

        let unreachable = robot.links.len() - visited.len();
        if unreachable > 0 {
            tracing::warn!(
                "Robot '{}': {} link(s) not reachable from '{}'",
                robot.name,
                unreachable,
                root_link.name
            );
        }

        joints.sort_by_key(|(order, _)| *order);
        let joints: Vec<JointActuator> = joints.into_iter().map(|(_, j)| j).collect();
        let joint_index = joints
            .iter()
            .enumerate()
            .map(|(i, j)| (j.name.clone(), i))
            .collect();

        tracing::info!(
            "Built robot '{}': {} nodes, {} joints",
            robot.name,
            graph.len(),
            joints.len()
        );

        Ok(Self {
            name: robot.name.clone(),
            graph,
            frames,
            joints,
            joint_index,
        })
    }
}

fn vec3(v: &urdf_rs::Vec3) -> Vec3 {
    Vec3::new(v[0] as f32, v[1] as f32, v[2] as f32)
}

/// URDF roll-pitch-yaw is extrinsic X, Y, Z.
fn quat_from_rpy(rpy: &urdf_rs::Vec3) -> Quat {
    Quat::from_euler(EulerRot::ZYX, rpy[2] as f32, rpy[1] as f32, rpy[0] as f32)
}

fn pose_transform(pose: &urdf_rs::Pose) -> Transform {
    Transform::from_translation_rotation(vec3(&pose.xyz), quat_from_rpy(&pose.rpy))
}

fn add_visuals(
    graph: &mut SceneGraph,
    link_node: NodeId,
    link: &urdf_rs::Link,
    meshes: &MeshSource,
) -> Result<(), LoadError> {
    for (i, visual) in link.visual.iter().enumerate() {
        let mut transform = pose_transform(&visual.origin);
        let (label, bounds) = match &visual.geometry {
            urdf_rs::Geometry::Box { size } => (
                "box".to_string(),
                Some(Aabb::from_center_half_extents(Vec3::ZERO, vec3(size) * 0.5)),
            ),
            urdf_rs::Geometry::Cylinder { radius, length } => {
                let r = *radius as f32;
                (
                    "cylinder".to_string(),
                    Some(Aabb::from_center_half_extents(
                        Vec3::ZERO,
                        Vec3::new(r, r, *length as f32 * 0.5),
                    )),
                )
            }
            urdf_rs::Geometry::Sphere { radius } => (
                "sphere".to_string(),
                Some(Aabb::from_center_half_extents(
                    Vec3::ZERO,
                    Vec3::splat(*radius as f32),
                )),
            ),
            urdf_rs::Geometry::Mesh { filename, scale } => {
                if let Some(scale) = scale {
                    transform.scale = vec3(scale);
                }
                let (file_name, _) = mesh::file_name_and_extension(filename);
                (file_name, meshes.bounds(filename)?)
            }
            #[allow(unreachable_patterns)]
            _ => ("geometry".to_string(), None),
        };

        let name = visual
            .name
            .clone()
            .unwrap_or_else(|| format!("{}_visual_{}", link.name, i));
        graph.add_child(link_node, name, transform, NodeContent::Visual { label, bounds });
    }
    Ok(())
}

/// Where mesh files referenced by the description come from.
#[derive(Clone, Debug)]
pub enum MeshSource {
    /// Resolve against a directory on disk.
    Directory(PathBuf),
    /// User-supplied files keyed by file name.
    Uploaded(HashMap<String, Vec<u8>>),
    /// Do not resolve meshes; formats are still checked.
    Unresolved,
}

impl MeshSource {
    /// Check the mesh format and read its bounds if the file can be found.
    ///
    /// An unsupported extension fails the load; a missing file only loses
    /// the mesh's bounds.
    fn bounds(&self, path: &str) -> Result<Option<Aabb>, LoadError> {
        let format = MeshFormat::from_path(path)?;
        let (file_name, _) = mesh::file_name_and_extension(path);

        let bytes = match self {
            MeshSource::Unresolved => return Ok(None),
            MeshSource::Uploaded(files) => match files.get(&file_name) {
                Some(bytes) => bytes.clone(),
                None => {
                    tracing::warn!("Mesh '{}' was not among the uploaded files", file_name);
                    return Ok(None);
                }
            },
            MeshSource::Directory(dir) => match resolve_mesh_path(dir, path) {
                Some(full) => std::fs::read(&full).map_err(|e| LoadError::io(full, e))?,
                None => {
                    tracing::warn!("Mesh '{}' not found under {}", path, dir.display());
                    return Ok(None);
                }
            },
        };

        Ok(match format {
            MeshFormat::Stl => match mesh::stl_bounds(&bytes) {
                Ok(bounds) if !bounds.is_empty() => Some(bounds),
                Ok(_) => {
                    tracing::warn!("Mesh '{}' has no triangles", file_name);
                    None
                }
                Err(e) => {
                    tracing::warn!("Could not read bounds of '{}': {}", file_name, e);
                    None
                }
            },
            MeshFormat::Dae => None,
        })
    }
}

/// Map `package://pkg/rest`, `file://path` or a relative path onto `dir`.
fn resolve_mesh_path(dir: &Path, path: &str) -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(rest) = path.strip_prefix("package://") {
        candidates.push(dir.join(rest));
        if let Some((_package, inner)) = rest.split_once('/') {
            candidates.push(dir.join(inner));
            // Descriptions usually live in `<pkg>/urdf/`, meshes in `<pkg>/meshes/`
            if let Some(parent) = dir.parent() {
                candidates.push(parent.join(inner));
            }
        }
    } else if let Some(rest) = path.strip_prefix("file://") {
        candidates.push(PathBuf::from(rest));
    } else {
        candidates.push(dir.join(path));
    }
    let (file_name, _) = mesh::file_name_and_extension(path);
    candidates.push(dir.join(file_name));

    candidates.into_iter().find(|p| p.is_file())
}

/// A request to load a robot model.
#[derive(Clone, Debug)]
pub struct ModelRequest {
    pub description: PathBuf,
    pub mesh_dir: Option<PathBuf>,
    /// User-uploaded mesh overrides keyed by file name.
    pub uploads: Option<HashMap<String, Vec<u8>>>,
}

impl ModelRequest {
    pub fn new(description: impl Into<PathBuf>) -> Self {
        Self {
            description: description.into(),
            mesh_dir: None,
            uploads: None,
        }
    }

    pub fn mesh_source(&self) -> MeshSource {
        if let Some(uploads) = &self.uploads {
            return MeshSource::Uploaded(uploads.clone());
        }
        let dir = self.mesh_dir.clone().unwrap_or_else(|| {
            self.description
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default()
        });
        MeshSource::Directory(dir)
    }
}

/// Turns a description reference into a [`FrameRegistry`].
///
/// Called on a blocking thread; implementations may do file I/O freely.
pub trait ModelLoader: Send + Sync + 'static {
    fn load(&self, request: &ModelRequest) -> Result<FrameRegistry, LoadError>;
}

/// Loads URDF descriptions from disk.
#[derive(Clone, Copy, Debug, Default)]
pub struct UrdfLoader;

impl ModelLoader for UrdfLoader {
    fn load(&self, request: &ModelRequest) -> Result<FrameRegistry, LoadError> {
        tracing::info!("Loading robot description {}", request.description.display());
        let xml = std::fs::read_to_string(&request.description)
            .map_err(|e| LoadError::io(&request.description, e))?;
        FrameRegistry::from_urdf_str(&xml, &request.mesh_source())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    pub(crate) const DUAL_ARM: &str = r#"
<robot name="dual_arm">
  <link name="world_base">
    <visual><geometry><box size="0.4 0.4 0.1"/></geometry></visual>
  </link>
  <link name="base_frameA_link"/>
  <link name="base_frameB_link"/>
  <link name="upper_arm">
    <visual>
      <origin xyz="0 0 0.15" rpy="0 0 0"/>
      <geometry><cylinder radius="0.05" length="0.3"/></geometry>
    </visual>
  </link>
  <link name="forearm"/>
  <link name="gripper"/>
  <joint name="base_jointA" type="fixed">
    <parent link="world_base"/><child link="base_frameA_link"/>
    <origin xyz="0 0.3 0" rpy="0 0 0"/>
  </joint>
  <joint name="base_jointB" type="fixed">
    <parent link="world_base"/><child link="base_frameB_link"/>
    <origin xyz="0 -0.3 0" rpy="0 0 0"/>
  </joint>
  <joint name="shoulder" type="continuous">
    <parent link="base_frameA_link"/><child link="upper_arm"/>
    <origin xyz="0 0 0.1" rpy="0 0 0"/>
    <axis xyz="0 0 1"/>
  </joint>
  <joint name="elbow" type="revolute">
    <parent link="upper_arm"/><child link="forearm"/>
    <origin xyz="0 0 0.3" rpy="0 0 0"/>
    <axis xyz="0 1 0"/>
    <limit lower="-1.5708" upper="2.0944" effort="10" velocity="1"/>
  </joint>
  <joint name="slide" type="prismatic">
    <parent link="forearm"/><child link="gripper"/>
    <origin xyz="0 0 0.2" rpy="0 0 0"/>
    <axis xyz="1 0 0"/>
    <limit lower="0" upper="0.05" effort="10" velocity="1"/>
  </joint>
</robot>
"#;

    pub(crate) fn dual_arm() -> FrameRegistry {
        FrameRegistry::from_urdf_str(DUAL_ARM, &MeshSource::Unresolved).unwrap()
    }

    fn origin_of(registry: &FrameRegistry, name: &str) -> Vec3 {
        let node = registry.frame(name).unwrap();
        registry
            .graph()
            .world_transform(node)
            .unwrap()
            .transform_point3(Vec3::ZERO)
    }

    #[test]
    fn test_hierarchy_from_urdf() {
        let registry = dual_arm();
        assert_eq!(registry.name(), "dual_arm");
        assert_eq!(registry.graph().get(registry.root()).unwrap().name, "world_base");

        let names: Vec<&str> = registry.joints().map(|j| j.name()).collect();
        assert_eq!(
            names,
            vec!["base_jointA", "base_jointB", "shoulder", "elbow", "slide"]
        );

        let forearm = origin_of(&registry, "forearm");
        assert!((forearm - Vec3::new(0.0, 0.3, 0.4)).length() < 1e-5);
        assert!(registry.frame("base_frameB_link").is_some());
        assert!(registry.frame("missing_link").is_none());
    }

    #[test]
    fn test_limits_are_native_units() {
        let registry = dual_arm();
        let (lower, upper) = registry.joint("elbow").unwrap().limits();
        assert!((lower + 1.5708).abs() < 1e-9);
        assert!((upper - 2.0944).abs() < 1e-9);
        assert_eq!(registry.joint("shoulder").unwrap().limits(), (0.0, 0.0));
    }

    #[test]
    fn test_revolute_joint_rotates_children() {
        let mut registry = dual_arm();
        assert!(registry.set_joint_value("elbow", FRAC_PI_2 as f64));
        assert!((registry.joint("elbow").unwrap().value() - FRAC_PI_2 as f64).abs() < 1e-9);

        // Gripper sits 0.2 up the forearm; a quarter turn about Y swings it along +X
        let gripper = origin_of(&registry, "gripper");
        assert!((gripper - Vec3::new(0.2, 0.3, 0.4)).length() < 1e-4);
    }

    #[test]
    fn test_prismatic_joint_translates() {
        let mut registry = dual_arm();
        assert!(registry.set_joint_value("slide", 0.05));
        let gripper = origin_of(&registry, "gripper");
        assert!((gripper - Vec3::new(0.05, 0.3, 0.6)).length() < 1e-5);
    }

    #[test]
    fn test_unknown_joint_is_rejected() {
        let mut registry = dual_arm();
        assert!(!registry.set_joint_value("wrist", 1.0));
    }

    #[test]
    fn test_unsupported_mesh_fails_load() {
        let xml = r#"
<robot name="r">
  <link name="base">
    <visual><geometry><mesh filename="package://r/meshes/base.obj"/></geometry></visual>
  </link>
</robot>"#;
        let err = FrameRegistry::from_urdf_str(xml, &MeshSource::Unresolved).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedMeshFormat { .. }));
    }

    #[test]
    fn test_uploaded_mesh_bounds() {
        let xml = r#"
<robot name="r">
  <link name="base">
    <visual><geometry><mesh filename="package://r/meshes/base.stl"/></geometry></visual>
  </link>
</robot>"#;
        let stl = "solid s\nvertex 0 0 0\nvertex 1 2 3\nvertex 0 1 0\nendsolid s\n";
        let uploads = HashMap::from([("base.stl".to_string(), stl.as_bytes().to_vec())]);
        let registry = FrameRegistry::from_urdf_str(xml, &MeshSource::Uploaded(uploads)).unwrap();

        let bounds = registry.graph().world_bounds(registry.root());
        assert_eq!(bounds.max, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_missing_upload_is_not_fatal() {
        let xml = r#"
<robot name="r">
  <link name="base">
    <visual><geometry><mesh filename="meshes/base.dae"/></geometry></visual>
  </link>
</robot>"#;
        let registry =
            FrameRegistry::from_urdf_str(xml, &MeshSource::Uploaded(HashMap::new())).unwrap();
        assert_eq!(registry.graph().len(), 2);
    }

    #[test]
    fn test_unknown_link_is_an_error() {
        let xml = r#"
<robot name="r">
  <link name="base"/>
  <joint name="j" type="fixed">
    <parent link="base"/><child link="ghost"/>
  </joint>
</robot>"#;
        let err = FrameRegistry::from_urdf_str(xml, &MeshSource::Unresolved).unwrap_err();
        assert!(matches!(err, LoadError::UnknownLink { .. }));
    }

    #[test]
    fn test_mesh_source_prefers_uploads() {
        let mut request = ModelRequest::new("robots/arm/urdf/robot.urdf");
        assert!(matches!(
            request.mesh_source(),
            MeshSource::Directory(ref dir) if dir == Path::new("robots/arm/urdf")
        ));
        request.uploads = Some(HashMap::new());
        assert!(matches!(request.mesh_source(), MeshSource::Uploaded(_)));
    }
}
