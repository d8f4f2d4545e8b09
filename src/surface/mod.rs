pub mod geometries;

use crate::constants::FP_COINCIDENT;
use crate::position::{dot, Direction, Position};

/// Cartesian axis, used by axis-aligned surfaces and the universe partitioner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// A surface in the geometry.
///
/// A `Surface` is a container for a `SurfaceGeometry` implementation, giving it the
/// user-facing integer ID. Regions refer to surfaces by their 1-based position in the
/// geometry's surface list, signed by the half-space they select.
pub struct Surface {
    id: i32,
    inner: Box<dyn SurfaceGeometry>,
}

impl Surface {
    /// Creates a new `Surface` from a Rust struct that implements the `SurfaceGeometry` trait.
    pub fn new(id: i32, geometry: Box<dyn SurfaceGeometry>) -> Self {
        Self { id, inner: geometry }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn geometry(&self) -> &dyn SurfaceGeometry {
        self.inner.as_ref()
    }

    /// Which side of the surface the point is on; `true` for the positive side.
    ///
    /// Points lying on the surface are assigned the side the direction points into.
    #[inline]
    pub fn sense(&self, r: &Position, u: &Direction) -> bool {
        let f = self.inner.evaluate(r);
        if f.abs() < FP_COINCIDENT {
            return dot(&self.inner.normal(r), u) > 0.0;
        }
        f > 0.0
    }

    /// Distance along `u` to the next intersection with the surface, `INFTY` if none.
    #[inline]
    pub fn distance(&self, r: &Position, u: &Direction, coincident: bool) -> f64 {
        self.inner.distance(r, u, coincident)
    }

    pub fn axis_plane(&self) -> Option<(Axis, f64)> {
        self.inner.axis_plane()
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface").field("id", &self.id).field("geometry", &self.inner).finish()
    }
}

/// Trait defining the geometry of a surface.
/// Must be Send + Sync so that a geometry can be queried from many tracking threads.
pub trait SurfaceGeometry: Send + Sync + std::fmt::Debug {
    /// Evaluates the surface function; positive values lie on the positive side.
    fn evaluate(&self, r: &Position) -> f64;

    /// Distance along `u` from `r` to the surface, or `INFTY` when the ray misses it.
    ///
    /// `coincident` tells the surface that `r` is known to lie on it, so the crossing
    /// at zero distance must be skipped.
    fn distance(&self, r: &Position, u: &Direction, coincident: bool) -> f64;

    /// Outward (positive side) normal at `r`; need not be normalized.
    fn normal(&self, r: &Position) -> Direction;

    /// Position of the surface along an axis, for planes perpendicular to that axis.
    fn axis_plane(&self) -> Option<(Axis, f64)> {
        None
    }
}
