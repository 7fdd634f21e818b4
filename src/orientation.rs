//! Up-axis normalization and one-shot camera framing.
//!
//! The renderer's vertical axis is +Y. Robot descriptions commonly use +Z
//! (ROS) or another convention, so the whole hierarchy is rotated at its
//! root until the selected axis points up.

use std::f32::consts::{FRAC_PI_2, PI};
use std::fmt;
use std::str::FromStr;

use glam::{Quat, Vec3};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::model::FrameRegistry;
use crate::scene::Aabb;

/// Which model axis should point up in the rendered view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum UpAxis {
    PosX,
    NegX,
    /// The renderer's native convention.
    #[default]
    PosY,
    NegY,
    PosZ,
    NegZ,
}

impl UpAxis {
    pub const ALL: [UpAxis; 6] = [
        UpAxis::PosX,
        UpAxis::NegX,
        UpAxis::PosY,
        UpAxis::NegY,
        UpAxis::PosZ,
        UpAxis::NegZ,
    ];

    /// Root rotation that maps this axis onto +Y.
    pub fn rotation(self) -> Quat {
        match self {
            UpAxis::PosX => Quat::from_rotation_z(FRAC_PI_2),
            UpAxis::NegX => Quat::from_rotation_z(-FRAC_PI_2),
            UpAxis::PosY => Quat::IDENTITY,
            UpAxis::NegY => Quat::from_rotation_x(PI),
            UpAxis::PosZ => Quat::from_rotation_x(-FRAC_PI_2),
            UpAxis::NegZ => Quat::from_rotation_x(FRAC_PI_2),
        }
    }

    /// Unit vector of this axis in model coordinates.
    pub fn direction(self) -> Vec3 {
        match self {
            UpAxis::PosX => Vec3::X,
            UpAxis::NegX => Vec3::NEG_X,
            UpAxis::PosY => Vec3::Y,
            UpAxis::NegY => Vec3::NEG_Y,
            UpAxis::PosZ => Vec3::Z,
            UpAxis::NegZ => Vec3::NEG_Z,
        }
    }
}

impl fmt::Display for UpAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpAxis::PosX => "+X",
            UpAxis::NegX => "-X",
            UpAxis::PosY => "+Y",
            UpAxis::NegY => "-Y",
            UpAxis::PosZ => "+Z",
            UpAxis::NegZ => "-Z",
        };
        f.write_str(s)
    }
}

impl FromStr for UpAxis {
    type Err = ConfigError;

    /// Accepts `+X`, `x`, `-z`, `−Y` (unicode minus) and so on.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (negative, axis) = if let Some(rest) = trimmed.strip_prefix('-') {
            (true, rest)
        } else if let Some(rest) = trimmed.strip_prefix('\u{2212}') {
            (true, rest)
        } else {
            (false, trimmed.strip_prefix('+').unwrap_or(trimmed))
        };

        match (negative, axis.to_ascii_uppercase().as_str()) {
            (false, "X") => Ok(UpAxis::PosX),
            (true, "X") => Ok(UpAxis::NegX),
            (false, "Y") => Ok(UpAxis::PosY),
            (true, "Y") => Ok(UpAxis::NegY),
            (false, "Z") => Ok(UpAxis::PosZ),
            (true, "Z") => Ok(UpAxis::NegZ),
            _ => Err(ConfigError::UnknownUpAxis(s.to_string())),
        }
    }
}

impl TryFrom<String> for UpAxis {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Where the external renderer should place its camera.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraView {
    pub eye: Vec3,
    pub target: Vec3,
    pub fov_deg: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraView {
    fn default() -> Self {
        Self {
            eye: Vec3::splat(2.0),
            target: Vec3::ZERO,
            fov_deg: 45.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl CameraView {
    /// Move the camera so a box of the given diagonal, centered at `center`,
    /// fills the view. The horizontal viewing direction is kept.
    pub fn frame(&mut self, center: Vec3, diagonal: f32) {
        let fit = diagonal * 0.5;
        let half_fov = (self.fov_deg * 0.5).to_radians();
        let distance = (fit * 0.5) / half_fov.tan();

        let mut direction = (self.eye - center) * Vec3::new(1.0, 0.0, 1.0);
        if direction.length_squared() < f32::EPSILON {
            direction = Vec3::Z;
        }

        self.eye = center + direction.normalize() * distance;
        self.target = center;
        self.near = diagonal / 100.0;
        self.far = diagonal * 100.0;
    }
}

/// Whether an up axis has been applied to the current model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NormalizerState {
    Unset,
    Applied(UpAxis),
}

/// Rotates the hierarchy root for the selected up axis and frames the
/// camera on the first selection after each load.
#[derive(Clone, Debug)]
pub struct OrientationNormalizer {
    state: NormalizerState,
    framed_bounds: Option<Aabb>,
    camera: CameraView,
}

impl Default for OrientationNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl OrientationNormalizer {
    pub fn new() -> Self {
        Self {
            state: NormalizerState::Unset,
            framed_bounds: None,
            camera: CameraView::default(),
        }
    }

    pub fn state(&self) -> NormalizerState {
        self.state
    }

    pub fn camera(&self) -> &CameraView {
        &self.camera
    }

    /// Bounds captured when the camera was framed, if it has been.
    pub fn framed_bounds(&self) -> Option<&Aabb> {
        self.framed_bounds.as_ref()
    }

    /// Forget the applied axis and framing. The camera stays where it is.
    pub fn reset(&mut self) {
        self.state = NormalizerState::Unset;
        self.framed_bounds = None;
    }

    /// Rotate the registry root so `axis` points up.
    ///
    /// Returns true if this call framed the camera.
    pub fn select(&mut self, axis: UpAxis, registry: &mut FrameRegistry) -> bool {
        let root = registry.root();
        if let Some(node) = registry.graph_mut().get_mut(root) {
            node.transform.rotation = axis.rotation();
        }
        self.state = NormalizerState::Applied(axis);
        tracing::debug!("Up axis set to {} for '{}'", axis, registry.name());

        if self.framed_bounds.is_some() {
            return false;
        }

        let bounds = registry.graph().world_bounds(root);
        if bounds.is_empty() {
            tracing::warn!(
                "Robot '{}' has no geometry to frame, keeping camera",
                registry.name()
            );
        } else {
            let diagonal = bounds.size().length();
            self.camera.frame(bounds.center(), diagonal);
            tracing::info!(
                "Framed camera on '{}': center {:?}, diagonal {:.3}",
                registry.name(),
                bounds.center(),
                diagonal
            );
        }
        self.framed_bounds = Some(bounds);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::dual_arm;

    #[test]
    fn test_every_axis_maps_to_up() {
        for axis in UpAxis::ALL {
            let up = axis.rotation() * axis.direction();
            assert!((up - Vec3::Y).length() < 1e-5, "{axis} maps to {up:?}");
        }
    }

    #[test]
    fn test_parse_and_display() {
        for axis in UpAxis::ALL {
            assert_eq!(axis.to_string().parse::<UpAxis>().unwrap(), axis);
        }
        assert_eq!("z".parse::<UpAxis>().unwrap(), UpAxis::PosZ);
        assert_eq!(" -x ".parse::<UpAxis>().unwrap(), UpAxis::NegX);
        assert_eq!("\u{2212}Y".parse::<UpAxis>().unwrap(), UpAxis::NegY);
        assert!(matches!(
            "W".parse::<UpAxis>(),
            Err(ConfigError::UnknownUpAxis(_))
        ));
        assert!("+-Z".parse::<UpAxis>().is_err());
    }

    #[test]
    fn test_deserialize_rejects_unknown_axis() {
        let ok: UpAxis = serde_json::from_str("\"-Z\"").unwrap();
        assert_eq!(ok, UpAxis::NegZ);
        assert!(serde_json::from_str::<UpAxis>("\"up\"").is_err());
    }

    #[test]
    fn test_first_selection_frames_once() {
        let mut registry = dual_arm();
        let mut normalizer = OrientationNormalizer::new();
        assert_eq!(normalizer.state(), NormalizerState::Unset);

        assert!(normalizer.select(UpAxis::PosZ, &mut registry));
        assert_eq!(normalizer.state(), NormalizerState::Applied(UpAxis::PosZ));
        let framed = *normalizer.camera();
        let bounds = *normalizer.framed_bounds().unwrap();
        assert_eq!(framed.target, bounds.center());
        assert!((framed.near - bounds.size().length() / 100.0).abs() < 1e-6);

        assert!(!normalizer.select(UpAxis::NegX, &mut registry));
        assert_eq!(normalizer.state(), NormalizerState::Applied(UpAxis::NegX));
        assert_eq!(*normalizer.camera(), framed);
        assert_eq!(*normalizer.framed_bounds().unwrap(), bounds);

        let root = registry.graph().get(registry.root()).unwrap();
        assert_eq!(root.transform.rotation, UpAxis::NegX.rotation());
    }

    #[test]
    fn test_rotation_keeps_root_scale() {
        let mut registry = dual_arm();
        let root = registry.root();
        registry.graph_mut().get_mut(root).unwrap().transform.scale = Vec3::splat(0.5);

        let mut normalizer = OrientationNormalizer::new();
        normalizer.select(UpAxis::PosZ, &mut registry);

        let node = registry.graph().get(root).unwrap();
        assert_eq!(node.transform.scale, Vec3::splat(0.5));

        // +Z in the model now points up in the world
        let world = registry.graph().world_transform(root).unwrap();
        let up = world.transform_vector3(Vec3::Z).normalize();
        assert!((up - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn test_reset_allows_reframing() {
        let mut registry = dual_arm();
        let mut normalizer = OrientationNormalizer::new();
        normalizer.select(UpAxis::PosY, &mut registry);
        normalizer.reset();
        assert_eq!(normalizer.state(), NormalizerState::Unset);
        assert!(normalizer.framed_bounds().is_none());
        assert!(normalizer.select(UpAxis::PosY, &mut registry));
    }

    #[test]
    fn test_frame_keeps_horizontal_direction() {
        let mut camera = CameraView::default();
        camera.frame(Vec3::new(0.0, 1.0, 0.0), 2.0);

        let offset = camera.eye - camera.target;
        assert!(offset.y.abs() < 1e-6);
        assert!((offset.x - offset.z).abs() < 1e-5);
        let expected = 0.5 / (22.5f32).to_radians().tan();
        assert!((offset.length() - expected).abs() < 1e-4);
        assert!((camera.far - 200.0).abs() < 1e-4);
    }
}
