//! Axis-aligned bounding boxes

use glam::{Mat4, Vec3};

/// Axis-aligned box stored as center and half extents
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    pub center: Vec3,
    pub half_size: Vec3,
}

impl BoundingBox {
    pub fn new(center: Vec3, half_size: Vec3) -> Self {
        Self { center, half_size }
    }

    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        Self {
            center: (min + max) * 0.5,
            half_size: (max - min) * 0.5,
        }
    }

    /// Smallest box containing every point; a zero box at the origin when empty
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut iter = points.into_iter();
        let Some(first) = iter.next() else {
            return Self::default();
        };
        let (min, max) = iter.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
        Self::from_min_max(min, max)
    }

    pub fn min(&self) -> Vec3 {
        self.center - self.half_size
    }

    pub fn max(&self) -> Vec3 {
        self.center + self.half_size
    }

    /// Box enclosing this box after an affine transform
    pub fn transformed(&self, matrix: &Mat4) -> Self {
        let center = matrix.transform_point3(self.center);
        let half_size = matrix.x_axis.truncate().abs() * self.half_size.x
            + matrix.y_axis.truncate().abs() * self.half_size.y
            + matrix.z_axis.truncate().abs() * self.half_size.z;
        Self { center, half_size }
    }
}
