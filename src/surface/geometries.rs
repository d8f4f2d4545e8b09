use super::{Axis, SurfaceGeometry};
use crate::constants::{FP_COINCIDENT, INFTY};
use crate::position::{dot, normalize, sub, Direction, Position};

/// A plane perpendicular to one of the coordinate axes.
///
/// The positive side is the side with the larger coordinate.
#[derive(Debug)]
pub struct AxisPlaneGeometry {
    pub axis: Axis,
    pub offset: f64,
}

impl AxisPlaneGeometry {
    pub fn new(axis: Axis, offset: f64) -> Self {
        Self { axis, offset }
    }
}

impl SurfaceGeometry for AxisPlaneGeometry {
    fn evaluate(&self, r: &Position) -> f64 {
        r[self.axis.index()] - self.offset
    }

    fn distance(&self, r: &Position, u: &Direction, coincident: bool) -> f64 {
        let i = self.axis.index();
        let f = self.offset - r[i];
        if coincident || f.abs() < FP_COINCIDENT || u[i] == 0.0 {
            return INFTY;
        }
        let d = f / u[i];
        if d < 0.0 { INFTY } else { d }
    }

    fn normal(&self, _r: &Position) -> Direction {
        let mut n = [0.0; 3];
        n[self.axis.index()] = 1.0;
        n
    }

    fn axis_plane(&self) -> Option<(Axis, f64)> {
        Some((self.axis, self.offset))
    }
}

/// A general plane `a*x + b*y + c*z = d`.
///
/// The positive side is the one the normal `(a, b, c)` points into.
#[derive(Debug)]
pub struct PlaneGeometry {
    pub normal: [f64; 3],
    pub d: f64,
}

impl PlaneGeometry {
    pub fn new(a: f64, b: f64, c: f64, d: f64) -> Self {
        Self { normal: [a, b, c], d }
    }

    /// Plane through `point` with the given normal.
    pub fn from_point_normal(point: [f64; 3], normal: [f64; 3]) -> Self {
        let n = normalize(normal);
        Self { normal: n, d: dot(&n, &point) }
    }
}

impl SurfaceGeometry for PlaneGeometry {
    fn evaluate(&self, r: &Position) -> f64 {
        dot(&self.normal, r) - self.d
    }

    fn distance(&self, r: &Position, u: &Direction, coincident: bool) -> f64 {
        let f = self.evaluate(r);
        let projection = dot(&self.normal, u);
        if coincident || f.abs() < FP_COINCIDENT || projection == 0.0 {
            return INFTY;
        }
        let d = -f / projection;
        if d < 0.0 { INFTY } else { d }
    }

    fn normal(&self, _r: &Position) -> Direction {
        self.normal
    }
}

/// A sphere; the positive side is outside.
#[derive(Debug)]
pub struct SphereGeometry {
    pub center: [f64; 3],
    pub radius: f64,
}

impl SphereGeometry {
    pub fn new(center: [f64; 3], radius: f64) -> Self {
        Self { center, radius }
    }
}

impl SurfaceGeometry for SphereGeometry {
    fn evaluate(&self, r: &Position) -> f64 {
        let x = sub(r, &self.center);
        dot(&x, &x) - self.radius * self.radius
    }

    fn distance(&self, r: &Position, u: &Direction, coincident: bool) -> f64 {
        let x = sub(r, &self.center);
        let k = dot(&x, u);
        let c = dot(&x, &x) - self.radius * self.radius;
        quadric_distance(1.0, k, c, coincident)
    }

    fn normal(&self, r: &Position) -> Direction {
        let x = sub(r, &self.center);
        [2.0 * x[0], 2.0 * x[1], 2.0 * x[2]]
    }
}

/// An infinite circular cylinder parallel to a coordinate axis; the positive side is outside.
///
/// Only the components of `center` perpendicular to `axis` are used.
#[derive(Debug)]
pub struct CylinderGeometry {
    pub axis: Axis,
    pub center: [f64; 3],
    pub radius: f64,
}

impl CylinderGeometry {
    pub fn new(axis: Axis, center: [f64; 3], radius: f64) -> Self {
        Self { axis, center, radius }
    }

    #[inline]
    fn perpendicular(&self) -> (usize, usize) {
        match self.axis {
            Axis::X => (1, 2),
            Axis::Y => (0, 2),
            Axis::Z => (0, 1),
        }
    }
}

impl SurfaceGeometry for CylinderGeometry {
    fn evaluate(&self, r: &Position) -> f64 {
        let (j, k) = self.perpendicular();
        let a = r[j] - self.center[j];
        let b = r[k] - self.center[k];
        a * a + b * b - self.radius * self.radius
    }

    fn distance(&self, r: &Position, u: &Direction, coincident: bool) -> f64 {
        let (j, k) = self.perpendicular();
        let a = 1.0 - u[self.axis.index()] * u[self.axis.index()];
        if a == 0.0 {
            return INFTY;
        }
        let r1 = r[j] - self.center[j];
        let r2 = r[k] - self.center[k];
        let kk = r1 * u[j] + r2 * u[k];
        let c = r1 * r1 + r2 * r2 - self.radius * self.radius;
        quadric_distance(a, kk, c, coincident)
    }

    fn normal(&self, r: &Position) -> Direction {
        let (j, k) = self.perpendicular();
        let mut n = [0.0; 3];
        n[j] = 2.0 * (r[j] - self.center[j]);
        n[k] = 2.0 * (r[k] - self.center[k]);
        n
    }
}

/// Smallest positive root of `a*d^2 + 2*k*d + c = 0` for a closed quadric whose
/// inside is `c < 0`.
fn quadric_distance(a: f64, k: f64, c: f64, coincident: bool) -> f64 {
    let quad = k * k - a * c;
    if quad < 0.0 {
        // No intersection with the surface.
        INFTY
    } else if coincident || c.abs() < FP_COINCIDENT {
        // On the surface: only the far crossing counts, and only when heading inward.
        if k >= 0.0 { INFTY } else { (-k + quad.sqrt()) / a }
    } else if c < 0.0 {
        // Inside: exactly one positive root.
        (-k + quad.sqrt()) / a
    } else {
        // Outside: the near root, if it lies ahead.
        let d = (-k - quad.sqrt()) / a;
        if d < 0.0 { INFTY } else { d }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::Surface;

    #[test]
    fn test_axis_plane_distance() {
        let plane = AxisPlaneGeometry::new(Axis::Z, 2.0);
        assert!((plane.distance(&[0.0, 0.0, 0.0], &[0.0, 0.0, 1.0], false) - 2.0).abs() < 1e-12);
        assert_eq!(plane.distance(&[0.0, 0.0, 0.0], &[0.0, 0.0, -1.0], false), INFTY);
        assert_eq!(plane.distance(&[0.0, 0.0, 0.0], &[1.0, 0.0, 0.0], false), INFTY);
        assert_eq!(plane.distance(&[0.0, 0.0, 2.0], &[0.0, 0.0, 1.0], true), INFTY);
    }

    #[test]
    fn test_sphere_distance_inside_and_outside() {
        let sphere = SphereGeometry::new([0.0, 0.0, 0.0], 1.0);
        let d_in = sphere.distance(&[0.0, 0.0, 0.0], &[1.0, 0.0, 0.0], false);
        assert!((d_in - 1.0).abs() < 1e-12);
        let d_out = sphere.distance(&[-3.0, 0.0, 0.0], &[1.0, 0.0, 0.0], false);
        assert!((d_out - 2.0).abs() < 1e-12);
        // Leaving the surface outward never hits it again.
        assert_eq!(sphere.distance(&[1.0, 0.0, 0.0], &[1.0, 0.0, 0.0], true), INFTY);
        // Entering from the surface crosses the full diameter.
        let d_chord = sphere.distance(&[1.0, 0.0, 0.0], &[-1.0, 0.0, 0.0], true);
        assert!((d_chord - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_cylinder_ignores_axial_motion() {
        let cyl = CylinderGeometry::new(Axis::Z, [0.0, 0.0, 0.0], 2.0);
        assert_eq!(cyl.distance(&[0.0, 0.0, 0.0], &[0.0, 0.0, 1.0], false), INFTY);
        let u = normalize([1.0, 0.0, 1.0]);
        let d = cyl.distance(&[0.0, 0.0, 0.0], &u, false);
        assert!((d - 2.0 * 2.0f64.sqrt()).abs() < 1e-12, "got {}", d);
    }

    #[test]
    fn test_sense_tie_break_uses_direction() {
        let surf = Surface::new(1, Box::new(AxisPlaneGeometry::new(Axis::X, 0.0)));
        assert!(surf.sense(&[0.0, 0.0, 0.0], &[1.0, 0.0, 0.0]));
        assert!(!surf.sense(&[0.0, 0.0, 0.0], &[-1.0, 0.0, 0.0]));
        assert!(surf.sense(&[0.5, 0.0, 0.0], &[-1.0, 0.0, 0.0]));
    }

    #[test]
    fn test_general_plane_matches_axis_plane() {
        let general = PlaneGeometry::from_point_normal([0.0, 0.0, 1.5], [0.0, 0.0, 2.0]);
        let axis = AxisPlaneGeometry::new(Axis::Z, 1.5);
        let r = [0.3, -0.2, -0.7];
        let u = normalize([0.1, 0.2, 0.9]);
        let d1 = general.distance(&r, &u, false);
        let d2 = axis.distance(&r, &u, false);
        assert!((d1 - d2).abs() < 1e-12);
        assert!(general.evaluate(&r) < 0.0 && axis.evaluate(&r) < 0.0);
    }
}
