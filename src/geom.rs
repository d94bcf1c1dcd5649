//! Axis-aligned bounding boxes over f64 vector math.

use glam::{DMat4, DVec3};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box.
///
/// The empty box has min = +inf / max = -inf so that merging is a plain
/// component min/max with no special cases. An empty box is not `valid()`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    pub const EMPTY: Aabb = Aabb {
        min: DVec3::splat(f64::INFINITY),
        max: DVec3::splat(f64::NEG_INFINITY),
    };

    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// True if the box contains at least one point.
    pub fn valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    pub fn merge_point(&mut self, p: DVec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn merge(&mut self, other: &Aabb) {
        if other.valid() {
            self.merge_point(other.min);
            self.merge_point(other.max);
        }
    }

    /// Bounding box of this box under an affine transform. All eight
    /// corners are transformed, since a rotation can move any of them to
    /// an extreme.
    pub fn transformed(&self, m: &DMat4) -> Aabb {
        if !self.valid() {
            return *self;
        }
        let mut out = Aabb::EMPTY;
        for i in 0..8 {
            let corner = DVec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.merge_point(m.transform_point3(corner));
        }
        out
    }

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    pub fn diagonal(&self) -> f64 {
        if !self.valid() {
            return 0.0;
        }
        (self.max - self.min).length()
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Aabb::EMPTY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_merge() {
        let mut bb = Aabb::EMPTY;
        assert!(!bb.valid());
        bb.merge_point(DVec3::new(1.0, 2.0, 3.0));
        assert!(bb.valid());
        assert_eq!(bb.min, bb.max);

        bb.merge_point(DVec3::new(-1.0, 0.0, 5.0));
        assert_eq!(bb.min, DVec3::new(-1.0, 0.0, 3.0));
        assert_eq!(bb.max, DVec3::new(1.0, 2.0, 5.0));
    }

    #[test]
    fn test_merge_empty_is_noop() {
        let mut bb = Aabb::new(DVec3::ZERO, DVec3::ONE);
        let before = bb;
        bb.merge(&Aabb::EMPTY);
        assert_eq!(bb, before);
    }

    #[test]
    fn test_transformed_translation() {
        let bb = Aabb::new(DVec3::ZERO, DVec3::ONE);
        let m = DMat4::from_translation(DVec3::new(10.0, 0.0, 0.0));
        let tb = bb.transformed(&m);
        assert_eq!(tb.min, DVec3::new(10.0, 0.0, 0.0));
        assert_eq!(tb.max, DVec3::new(11.0, 1.0, 1.0));
    }

    #[test]
    fn test_transformed_rotation_covers_corners() {
        let bb = Aabb::new(DVec3::ZERO, DVec3::new(2.0, 1.0, 1.0));
        let m = DMat4::from_rotation_z(std::f64::consts::FRAC_PI_2);
        let tb = bb.transformed(&m);
        // x extent becomes y extent under a 90 degree z rotation
        assert!((tb.max.y - 2.0).abs() < 1e-12);
        assert!((tb.min.x - -1.0).abs() < 1e-12);
    }
}
