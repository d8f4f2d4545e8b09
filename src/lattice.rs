use crate::constants::{FP_COINCIDENT, FP_PRECISION, INFTY};
use crate::error::{GeometryError, Result};
use crate::position::{Direction, Position};

/// A regular rectangular array of universes, in two or three dimensions.
///
/// Tiles are stored with x varying fastest, then y, then z. Points outside the array
/// fall into the optional outer universe.
#[derive(Debug)]
pub struct RectLattice {
    pub(crate) id: i32,
    pub(crate) lower_left: [f64; 3],
    pub(crate) pitch: [f64; 3],
    pub(crate) shape: [usize; 3],
    pub(crate) is_3d: bool,
    pub(crate) universes: Vec<usize>,
    pub(crate) outer: Option<usize>,
    /// Per distribcell map, the number of target instances in the tiles preceding each
    /// tile. The outer universe sits after the last tile.
    pub(crate) offsets: Vec<Vec<usize>>,
}

impl RectLattice {
    /// Creates a lattice from its corner, pitch and shape given for 2 or 3 dimensions.
    pub fn new(
        id: i32,
        lower_left: &[f64],
        pitch: &[f64],
        shape: &[usize],
        universes: Vec<usize>,
        outer: Option<usize>,
    ) -> Result<Self> {
        let invalid = |reason: String| GeometryError::InvalidLattice { lattice_id: id, reason };

        let dims = shape.len();
        if !(dims == 2 || dims == 3) {
            return Err(invalid(format!("shape must have 2 or 3 entries, got {}", dims)));
        }
        if lower_left.len() != dims || pitch.len() != dims {
            return Err(invalid(format!(
                "lower_left and pitch must have {} entries like the shape, got {} and {}",
                dims,
                lower_left.len(),
                pitch.len()
            )));
        }
        if shape.iter().any(|&n| n == 0) {
            return Err(invalid("shape entries must be positive".to_string()));
        }
        if pitch.iter().any(|&p| !(p.is_finite() && p > 0.0)) {
            return Err(invalid(format!("pitch {:?} must be positive", pitch)));
        }

        let mut ll = [0.0; 3];
        let mut p = [1.0; 3];
        let mut n = [1usize; 3];
        ll[..dims].copy_from_slice(lower_left);
        p[..dims].copy_from_slice(pitch);
        n[..dims].copy_from_slice(shape);

        let n_tiles = n[0] * n[1] * n[2];
        if universes.len() != n_tiles {
            return Err(invalid(format!("{} universes given for {} tiles", universes.len(), n_tiles)));
        }

        Ok(Self {
            id,
            lower_left: ll,
            pitch: p,
            shape: n,
            is_3d: dims == 3,
            universes,
            outer,
            offsets: Vec::new(),
        })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn is_3d(&self) -> bool {
        self.is_3d
    }

    pub fn outer(&self) -> Option<usize> {
        self.outer
    }

    pub fn n_tiles(&self) -> usize {
        self.universes.len()
    }

    /// Universe indices of the tiles.
    pub fn universes(&self) -> &[usize] {
        &self.universes
    }

    /// Tile containing the point. A point on a tile edge belongs to the tile `u` points into.
    pub fn get_indices(&self, r: &Position, u: &Direction) -> [i32; 3] {
        let mut idx = [0i32; 3];
        let dims = if self.is_3d { 3 } else { 2 };
        for i in 0..dims {
            let x = (r[i] - self.lower_left[i]) / self.pitch[i];
            let close = x.round();
            idx[i] = if (x - close).abs() < FP_COINCIDENT {
                if u[i] > 0.0 { close as i32 } else { close as i32 - 1 }
            } else {
                x.floor() as i32
            };
        }
        idx
    }

    /// Position relative to the center of a tile.
    pub fn local_position(&self, r: &Position, idx: [i32; 3]) -> Position {
        let mut local = *r;
        let dims = if self.is_3d { 3 } else { 2 };
        for i in 0..dims {
            local[i] -= self.lower_left[i] + (idx[i] as f64 + 0.5) * self.pitch[i];
        }
        local
    }

    pub fn is_valid_index(&self, idx: [i32; 3]) -> bool {
        (0..3).all(|i| idx[i] >= 0 && (idx[i] as usize) < self.shape[i])
    }

    /// Linear tile number of an index, with the outer universe at `n_tiles()`.
    pub fn tile(&self, idx: [i32; 3]) -> usize {
        if self.is_valid_index(idx) {
            let [x, y, z] = idx.map(|i| i as usize);
            x + self.shape[0] * (y + self.shape[1] * z)
        } else {
            self.n_tiles()
        }
    }

    /// Universe filling a tile: the tile's own inside the array, the outer one elsewhere.
    pub fn universe_at(&self, idx: [i32; 3]) -> Option<usize> {
        if self.is_valid_index(idx) {
            Some(self.universes[self.tile(idx)])
        } else {
            self.outer
        }
    }

    /// Distance from a tile-local position to the tile's edge along `u`, and the index
    /// step taken when that edge is crossed.
    pub fn distance(&self, r: &Position, u: &Direction) -> (f64, [i32; 3]) {
        let mut d = INFTY;
        let mut translation = [0i32; 3];
        let dims = if self.is_3d { 3 } else { 2 };
        for i in 0..dims {
            let edge = (0.5 * self.pitch[i]).copysign(u[i]);
            if (r[i] - edge).abs() > FP_PRECISION && u[i] != 0.0 {
                let this_d = (edge - r[i]) / u[i];
                if this_d < d {
                    d = this_d;
                    translation = [0; 3];
                    translation[i] = if u[i] > 0.0 { 1 } else { -1 };
                }
            }
        }
        (d, translation)
    }

    /// Universes nested directly in the lattice, once per tile, then the outer universe.
    pub(crate) fn children(&self) -> impl Iterator<Item = usize> + '_ {
        self.universes.iter().copied().chain(self.outer)
    }

    /// Number of target instances preceding a tile in the given distribcell map.
    pub(crate) fn tile_offset(&self, map: usize, idx: [i32; 3]) -> usize {
        self.offsets[map][self.tile(idx)]
    }
}
