//! Static point-cloud datasets.
//!
//! Source files are newline-separated `x,y,z[,...]` records in millimeters.
//! Only every 50th valid record is kept, converted to meters.

use std::path::{Path, PathBuf};

use glam::Vec3;

use crate::error::LoadError;
use crate::scene::Aabb;

/// Keep one valid record out of this many.
pub const DECIMATION_STRIDE: usize = 50;

/// Source units per model unit (millimeters to meters).
pub const SOURCE_UNITS_PER_METER: f32 = 1000.0;

/// Uniform display scale applied to attached clouds. The robot root is
/// scaled by the inverse so clouds stay metric relative to their anchor.
pub const DISPLAY_SCALE: f32 = 1.45;

/// An immutable, decimated point cloud in model units.
#[derive(Clone, Debug, PartialEq)]
pub struct PointCloudDataset {
    points: Vec<Vec3>,
    source: Option<PathBuf>,
}

impl PointCloudDataset {
    pub fn from_points(points: Vec<Vec3>) -> Self {
        Self {
            points,
            source: None,
        }
    }

    /// Parse and decimate source text.
    ///
    /// Lines without at least three comma-separated numeric fields are
    /// skipped and do not count towards the stride.
    pub fn parse(text: &str) -> Self {
        let points = text
            .lines()
            .filter_map(parse_record)
            .enumerate()
            .filter(|(i, _)| (i + 1) % DECIMATION_STRIDE == 0)
            .map(|(_, p)| p / SOURCE_UNITS_PER_METER)
            .collect();
        Self::from_points(points)
    }

    /// Read and parse a source file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| LoadError::io(path, e))?;
        let mut dataset = Self::parse(&text);
        dataset.source = Some(path.to_path_buf());
        tracing::debug!(
            "Parsed {} points from {}",
            dataset.len(),
            path.display()
        );
        Ok(dataset)
    }

    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Bounds in the cloud's own coordinates.
    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(&self.points)
    }
}

fn parse_record(line: &str) -> Option<Vec3> {
    let mut fields = line.trim().split(',');
    let mut coord = || -> Option<f32> {
        let value: f32 = fields.next()?.trim().parse().ok()?;
        value.is_finite().then_some(value)
    };
    Some(Vec3::new(coord()?, coord()?, coord()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(n: usize) -> String {
        (1..=n)
            .map(|i| format!("{},{},{}\n", i * 1000, 0, -(i as i64) * 2000))
            .collect()
    }

    #[test]
    fn test_keeps_every_fiftieth_valid_line() {
        let dataset = PointCloudDataset::parse(&lines(150));
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.points()[0], Vec3::new(50.0, 0.0, -100.0));
        assert_eq!(dataset.points()[1], Vec3::new(100.0, 0.0, -200.0));
        assert_eq!(dataset.points()[2], Vec3::new(150.0, 0.0, -300.0));
    }

    #[test]
    fn test_invalid_lines_do_not_count() {
        let mut text = String::new();
        for i in 1..=100 {
            text.push_str("header,without,numbers\n");
            text.push_str("1,2\n");
            text.push('\n');
            text.push_str(&format!(" {}, 0 ,0,255,255,255\n", i));
        }
        let dataset = PointCloudDataset::parse(&text);
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.points()[0], Vec3::new(0.05, 0.0, 0.0));
        assert_eq!(dataset.points()[1], Vec3::new(0.1, 0.0, 0.0));
    }

    #[test]
    fn test_fewer_than_stride_is_empty() {
        let dataset = PointCloudDataset::parse(&lines(49));
        assert!(dataset.is_empty());
        assert!(dataset.bounds().is_empty());
    }

    #[test]
    fn test_crlf_and_nan_fields() {
        let mut text = String::new();
        for _ in 0..50 {
            text.push_str("NaN,1,1\r\n");
        }
        for _ in 0..50 {
            text.push_str("1000,2000,3000\r\n");
        }
        let dataset = PointCloudDataset::parse(&text);
        assert_eq!(dataset.points(), &[Vec3::new(1.0, 2.0, 3.0)]);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = PointCloudDataset::load("/nonexistent/cloud.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("armview_cloud_{}.txt", std::process::id()));
        tokio::fs::write(&path, lines(100)).await.unwrap();

        let dataset = PointCloudDataset::load(&path).await.unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.source(), Some(path.as_path()));

        let _ = tokio::fs::remove_file(&path).await;
    }
}
