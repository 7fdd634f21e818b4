//! Mesh references from the robot description.
//!
//! Meshes are only resolved, not rendered: the renderer owns the geometry.
//! STL files are scanned for their bounds so camera framing covers them.

use glam::Vec3;

use crate::error::LoadError;
use crate::scene::Aabb;

/// Mesh formats the loader accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeshFormat {
    Stl,
    Dae,
}

/// File name and lowercase extension of a mesh path.
///
/// Handles `package://`, `file://` and plain paths; only the last path
/// segment matters.
pub fn file_name_and_extension(path: &str) -> (String, String) {
    let file_name = path.rsplit(['/', '\\']).next().unwrap_or(path).to_string();
    let extension = match file_name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => String::new(),
    };
    (file_name, extension)
}

impl MeshFormat {
    pub fn from_path(path: &str) -> Result<Self, LoadError> {
        let (file, extension) = file_name_and_extension(path);
        match extension.as_str() {
            "stl" => Ok(MeshFormat::Stl),
            "dae" => Ok(MeshFormat::Dae),
            _ => Err(LoadError::UnsupportedMeshFormat { file, extension }),
        }
    }
}

/// Bounds of an STL mesh, binary or ASCII. Empty if it has no triangles.
pub fn stl_bounds(bytes: &[u8]) -> std::io::Result<Aabb> {
    let mut cursor = std::io::Cursor::new(bytes);
    let reader = stl_io::create_stl_reader(&mut cursor)?;

    let mut aabb = Aabb::EMPTY;
    for triangle in reader {
        for vertex in triangle?.vertices {
            aabb.extend_point(Vec3::from_array(vertex.0));
        }
    }
    Ok(aabb)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary_stl(triangles: &[[[f32; 3]; 3]]) -> Vec<u8> {
        let mut data = vec![0u8; 80];
        data.extend_from_slice(&(triangles.len() as u32).to_le_bytes());
        for tri in triangles {
            data.extend_from_slice(&[0u8; 12]);
            for v in tri {
                for c in v {
                    data.extend_from_slice(&c.to_le_bytes());
                }
            }
            data.extend_from_slice(&[0u8; 2]);
        }
        data
    }

    #[test]
    fn test_file_name_and_extension() {
        assert_eq!(
            file_name_and_extension("package://robot/meshes/Link1.STL"),
            ("Link1.STL".to_string(), "stl".to_string())
        );
        assert_eq!(
            file_name_and_extension("meshes\\base.dae"),
            ("base.dae".to_string(), "dae".to_string())
        );
        assert_eq!(
            file_name_and_extension("noext"),
            ("noext".to_string(), String::new())
        );
    }

    #[test]
    fn test_unsupported_format() {
        assert_eq!(MeshFormat::from_path("a/b.stl").unwrap(), MeshFormat::Stl);
        assert_eq!(MeshFormat::from_path("a/b.DAE").unwrap(), MeshFormat::Dae);
        let err = MeshFormat::from_path("a/b.obj").unwrap_err();
        assert!(matches!(
            err,
            LoadError::UnsupportedMeshFormat { ref extension, .. } if extension == "obj"
        ));
    }

    #[test]
    fn test_binary_stl_bounds() {
        let data = binary_stl(&[
            [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 2.0, 0.0]],
            [[0.0, 0.0, -1.0], [1.0, 0.0, 3.0], [0.0, 2.0, 0.0]],
        ]);
        let bounds = stl_bounds(&data).unwrap();
        assert_eq!(bounds.min, Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(bounds.max, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_ascii_stl_bounds() {
        let text = "solid part\n facet normal 0 0 1\n  outer loop\n   vertex -1 0 0\n   vertex 1 0 0\n   vertex 0 4 0.5\n  endloop\n endfacet\nendsolid part\n";
        let bounds = stl_bounds(text.as_bytes()).unwrap();
        assert_eq!(bounds.min, Vec3::new(-1.0, 0.0, 0.0));
        assert_eq!(bounds.max, Vec3::new(1.0, 4.0, 0.5));
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(stl_bounds(b"definitely not a mesh").is_err());
    }
}
