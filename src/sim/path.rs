//! Parametric race path
//!
//! A path is an ordered list of 3D control points. Progress `t` in [0, 1] maps
//! onto it with piecewise Catmull-Rom interpolation, and a racer's world
//! position maps back to progress with a golden-section closest-point search.
//!
//! The search assumes distance-to-t has a single minimum. On looping or
//! self-intersecting courses it can settle on the wrong stretch, so control
//! points must be dense enough that each segment stays locally convex with
//! respect to where racers actually are.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::consts::SEARCH_TOLERANCE;
use crate::error::RaceError;

/// 1/φ, the golden-section step ratio
const INV_PHI: f32 = 0.618_034;

/// Immutable Catmull-Rom path through a set of control points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathCurve {
    points: Vec<Vec3>,
}

impl PathCurve {
    /// Build a path. Fewer than 2 points is a configuration error.
    pub fn new(points: Vec<Vec3>) -> Result<Self, RaceError> {
        if points.len() < 2 {
            return Err(RaceError::DegenerateCurve {
                points: points.len(),
            });
        }
        Ok(Self { points })
    }

    pub fn control_points(&self) -> &[Vec3] {
        &self.points
    }

    /// Number of control points (always >= 2)
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always `false`: [`PathCurve::new`] rejects curves with fewer than 2 points
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn start(&self) -> Vec3 {
        self.points[0]
    }

    pub fn finish(&self) -> Vec3 {
        self.points[self.points.len() - 1]
    }

    /// Progress value at which the path passes through control point `index`
    pub fn control_point_progress(&self, index: usize) -> f32 {
        let segments = (self.points.len() - 1) as f32;
        (index.min(self.points.len() - 1) as f32 / segments).clamp(0.0, 1.0)
    }

    /// Point on the path at normalized progress `t` (clamped to [0, 1])
    pub fn interpolate(&self, t: f32) -> Vec3 {
        let last = self.points.len() - 1;
        let scaled = t.clamp(0.0, 1.0) * last as f32;
        let i = (scaled.floor() as usize).min(last - 1);
        let u = scaled - i as f32;

        // Boundary points are duplicated instead of indexing past the ends
        let p0 = self.points[i.saturating_sub(1)];
        let p1 = self.points[i];
        let p2 = self.points[i + 1];
        let p3 = self.points[(i + 2).min(last)];

        catmull_rom(p0, p1, p2, p3, u)
    }

    /// Progress value whose path point is closest to `target`
    pub fn closest_progress(&self, target: Vec3) -> f32 {
        self.closest_progress_with_tolerance(target, SEARCH_TOLERANCE)
    }

    /// Golden-section search over [0, 1], stopping once the bracket is
    /// narrower than `tolerance`. Squared distances avoid a sqrt per probe.
    pub fn closest_progress_with_tolerance(&self, target: Vec3, tolerance: f32) -> f32 {
        let dist_sq = |t: f32| self.interpolate(t).distance_squared(target);

        let (mut a, mut b) = (0.0_f32, 1.0_f32);
        let mut c = b - INV_PHI * (b - a);
        let mut d = a + INV_PHI * (b - a);
        let mut fc = dist_sq(c);
        let mut fd = dist_sq(d);

        while b - a > tolerance {
            if fc < fd {
                b = d;
                d = c;
                fd = fc;
                c = b - INV_PHI * (b - a);
                fc = dist_sq(c);
            } else {
                a = c;
                c = d;
                fc = fd;
                d = a + INV_PHI * (b - a);
                fd = dist_sq(d);
            }
        }

        ((a + b) * 0.5).clamp(0.0, 1.0)
    }

    /// Evenly spaced points along the path (for debugging or drawing)
    pub fn sample(&self, num_points: usize) -> Vec<Vec3> {
        (0..num_points)
            .map(|i| {
                let t = i as f32 / (num_points - 1).max(1) as f32;
                self.interpolate(t)
            })
            .collect()
    }
}

/// Uniform Catmull-Rom between `p1` and `p2`
#[inline]
fn catmull_rom(p0: Vec3, p1: Vec3, p2: Vec3, p3: Vec3, u: f32) -> Vec3 {
    let u2 = u * u;
    let u3 = u2 * u;
    0.5 * ((2.0 * p1)
        + (p2 - p0) * u
        + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * u2
        + (3.0 * p1 - p0 - 3.0 * p2 + p3) * u3)
}
