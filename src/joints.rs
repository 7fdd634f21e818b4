//! Joint-info derivation and pose application.

use std::collections::HashSet;

use serde::Serialize;

use crate::model::FrameRegistry;
use crate::telemetry::JointReading;

/// Joints that bind the two arm assemblies to the shared base. They are not
/// user-facing and never appear in the joint-info collection.
pub const RESERVED_JOINTS: [&str; 2] = ["base_jointA", "base_jointB"];

/// Display state of one joint, in degrees.
///
/// `lower` and `upper` are infinite when the model declares no limit.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JointInfo {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
    pub degree: f64,
}

impl JointInfo {
    pub fn is_limited(&self) -> bool {
        self.lower.is_finite() && self.upper.is_finite()
    }
}

pub fn is_reserved(name: &str) -> bool {
    RESERVED_JOINTS.contains(&name)
}

/// Build the joint-info collection for a freshly loaded model.
///
/// Limits are converted to whole degrees. A joint whose rounded limits are
/// both zero is reported as unconstrained.
pub fn derive_joint_infos(registry: &FrameRegistry) -> Vec<JointInfo> {
    registry
        .joints()
        .filter(|joint| !is_reserved(joint.name()))
        .map(|joint| {
            let (lower, upper) = joint.limits();
            let mut lower = lower.to_degrees().round();
            let mut upper = upper.to_degrees().round();

            if lower == 0.0 && upper == 0.0 {
                lower = f64::NEG_INFINITY;
                upper = f64::INFINITY;
            } else if lower > upper {
                tracing::warn!(
                    "Joint '{}' declares lower limit above upper, swapping",
                    joint.name()
                );
                std::mem::swap(&mut lower, &mut upper);
            }

            JointInfo {
                name: joint.name().to_string(),
                lower,
                upper,
                degree: 0.0,
            }
        })
        .collect()
}

/// Copy telemetry degrees into matching entries. Names not in the
/// collection are left for [`PoseApplier`] to report.
pub fn apply_readings(infos: &mut [JointInfo], readings: &[JointReading]) -> usize {
    let mut updated = 0;
    for reading in readings {
        if let Some(info) = infos.iter_mut().find(|info| info.name == reading.name) {
            info.degree = reading.degree;
            updated += 1;
        }
    }
    updated
}

/// Writes telemetry angles into the loaded model's joint actuators.
#[derive(Debug, Default)]
pub struct PoseApplier {
    warned: HashSet<String>,
}

impl PoseApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget which unknown names were already reported. Call on every
    /// model load.
    pub fn reset(&mut self) {
        self.warned.clear();
    }

    /// Apply readings to the registry. Without a loaded model this does
    /// nothing. Unknown names are reported and skipped.
    ///
    /// Returns the number of joints written.
    pub fn apply(
        &mut self,
        registry: Option<&mut FrameRegistry>,
        readings: &[JointReading],
    ) -> usize {
        let Some(registry) = registry else {
            return 0;
        };

        let mut applied = 0;
        for reading in readings {
            if registry.set_joint_value(&reading.name, reading.degree.to_radians()) {
                applied += 1;
            } else if self.warned.insert(reading.name.clone()) {
                tracing::warn!("Joint '{}' not found in model", reading.name);
            } else {
                tracing::trace!("Joint '{}' not found in model", reading.name);
            }
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::dual_arm;
    use crate::model::MeshSource;

    #[test]
    fn test_reserved_joints_are_excluded() {
        let infos = derive_joint_infos(&dual_arm());
        let names: Vec<&str> = infos.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["shoulder", "elbow", "slide"]);
        for reserved in RESERVED_JOINTS {
            assert!(!names.contains(&reserved));
        }
    }

    #[test]
    fn test_limits_in_whole_degrees() {
        let infos = derive_joint_infos(&dual_arm());
        let elbow = infos.iter().find(|i| i.name == "elbow").unwrap();
        assert_eq!(elbow.lower, -90.0);
        assert_eq!(elbow.upper, 120.0);
        assert_eq!(elbow.degree, 0.0);
        assert!(elbow.is_limited());

        for info in &infos {
            if info.is_limited() {
                assert!(info.lower <= info.upper);
            }
        }
    }

    #[test]
    fn test_unlimited_joint_reports_infinity() {
        let infos = derive_joint_infos(&dual_arm());
        let shoulder = infos.iter().find(|i| i.name == "shoulder").unwrap();
        assert_eq!(shoulder.lower, f64::NEG_INFINITY);
        assert_eq!(shoulder.upper, f64::INFINITY);
    }

    #[test]
    fn test_prismatic_limits_use_same_conversion() {
        let infos = derive_joint_infos(&dual_arm());
        let slide = infos.iter().find(|i| i.name == "slide").unwrap();
        assert_eq!(slide.lower, 0.0);
        assert_eq!(slide.upper, 3.0);
    }

    #[test]
    fn test_limits_rounding_to_zero_are_unconstrained() {
        let xml = r#"
<robot name="r">
  <link name="a"/><link name="b"/>
  <joint name="j" type="revolute">
    <parent link="a"/><child link="b"/>
    <limit lower="-0.005" upper="0.005" effort="1" velocity="1"/>
  </joint>
</robot>"#;
        let registry = FrameRegistry::from_urdf_str(xml, &MeshSource::Unresolved).unwrap();
        let infos = derive_joint_infos(&registry);
        assert!(!infos[0].is_limited());
    }

    #[test]
    fn test_inverted_limits_are_swapped() {
        let xml = r#"
<robot name="r">
  <link name="a"/><link name="b"/>
  <joint name="j" type="revolute">
    <parent link="a"/><child link="b"/>
    <limit lower="1.0" upper="-1.0" effort="1" velocity="1"/>
  </joint>
</robot>"#;
        let registry = FrameRegistry::from_urdf_str(xml, &MeshSource::Unresolved).unwrap();
        let infos = derive_joint_infos(&registry);
        assert_eq!(infos[0].lower, -57.0);
        assert_eq!(infos[0].upper, 57.0);
    }

    #[test]
    fn test_apply_without_model_is_noop() {
        let mut applier = PoseApplier::new();
        let readings = vec![JointReading::new("shoulder", 45.0)];
        assert_eq!(applier.apply(None, &readings), 0);
    }

    #[test]
    fn test_apply_skips_unknown_names() {
        let mut registry = dual_arm();
        let mut applier = PoseApplier::new();
        let readings = vec![
            JointReading::new("ghost", 10.0),
            JointReading::new("shoulder", 90.0),
            JointReading::new("ghost", 20.0),
            JointReading::new("elbow", -45.0),
        ];

        assert_eq!(applier.apply(Some(&mut registry), &readings), 2);
        let shoulder = registry.joint("shoulder").unwrap().value();
        let elbow = registry.joint("elbow").unwrap().value();
        assert!((shoulder - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert!((elbow + std::f64::consts::FRAC_PI_4).abs() < 1e-12);
    }

    #[test]
    fn test_apply_readings_only_touches_matches() {
        let mut infos = derive_joint_infos(&dual_arm());
        let before = infos.clone();
        let updated = apply_readings(
            &mut infos,
            &[JointReading::new("shoulder", 45.0), JointReading::new("ghost", 3.0)],
        );

        assert_eq!(updated, 1);
        let shoulder = infos.iter().find(|i| i.name == "shoulder").unwrap();
        assert_eq!(shoulder.degree, 45.0);
        assert_eq!(shoulder.lower, f64::NEG_INFINITY);
        assert_eq!(shoulder.upper, f64::INFINITY);
        assert_eq!(infos[1..], before[1..]);
    }
}
