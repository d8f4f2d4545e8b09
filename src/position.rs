/// A point in 3D Cartesian space.
pub type Position = [f64; 3];

/// A unit direction vector.
pub type Direction = [f64; 3];

#[inline]
pub fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Moves `r` a distance `d` along `u`.
#[inline]
pub fn advance(r: &Position, u: &Direction, d: f64) -> Position {
    [r[0] + d * u[0], r[1] + d * u[1], r[2] + d * u[2]]
}

#[inline]
pub fn sub(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub fn normalize(v: [f64; 3]) -> [f64; 3] {
    let len = dot(&v, &v).sqrt();
    if len == 0.0 { v } else { [v[0] / len, v[1] / len, v[2] / len] }
}

/// Rotation applied to the coordinate frame of a filled universe or lattice.
///
/// Stored as a row-major 3x3 matrix. When built from angles, the angles are kept
/// so that the authored form can be written back out.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rotation {
    angles: Option<[f64; 3]>,
    matrix: [[f64; 3]; 3],
}

impl Rotation {
    /// Builds the rotation from angles in degrees about the x, y and z axes.
    ///
    /// The matrix rotates the filled universe by the given angles, which means
    /// coordinates are transformed by the inverse rotation when entering it.
    pub fn from_angles(angles: [f64; 3]) -> Self {
        let phi = -angles[0].to_radians();
        let theta = -angles[1].to_radians();
        let psi = -angles[2].to_radians();

        let (sp, cp) = phi.sin_cos();
        let (st, ct) = theta.sin_cos();
        let (ss, cs) = psi.sin_cos();

        let matrix = [
            [ct * cs, -cp * ss + sp * st * cs, sp * ss + cp * st * cs],
            [ct * ss, cp * cs + sp * st * ss, -sp * cs + cp * st * ss],
            [-st, sp * ct, cp * ct],
        ];
        Self { angles: Some(angles), matrix }
    }

    pub fn from_matrix(matrix: [[f64; 3]; 3]) -> Self {
        Self { angles: None, matrix }
    }

    pub fn angles(&self) -> Option<[f64; 3]> {
        self.angles
    }

    pub fn matrix(&self) -> &[[f64; 3]; 3] {
        &self.matrix
    }

    /// Whether `R * R^T` is the identity to within `tolerance` in every entry.
    pub fn is_orthonormal(&self, tolerance: f64) -> bool {
        let m = &self.matrix;
        (0..3).all(|i| (0..3).all(|j| (dot(&m[i], &m[j]) - if i == j { 1.0 } else { 0.0 }).abs() <= tolerance))
    }

    #[inline]
    pub fn apply(&self, v: &[f64; 3]) -> [f64; 3] {
        let m = &self.matrix;
        [dot(&m[0], v), dot(&m[1], v), dot(&m[2], v)]
    }
}
