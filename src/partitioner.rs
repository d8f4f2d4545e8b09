use std::collections::HashMap;

use crate::cell::{Cell, CellShape};
use crate::constants::FP_COINCIDENT;
use crate::position::{Direction, Position};
use crate::surface::{Axis, Surface};
use rayon::prelude::*;

/// Bins the cells of a universe between the axis-aligned planes they are bounded by.
///
/// The planes of one axis are sorted by coordinate, cutting space into `n + 1` slabs. Each
/// slab lists every cell that may overlap it, so a point only needs to be tested against
/// the cells of its own slab. Cells that cannot be bounded this way are listed in every slab.
#[derive(Debug)]
pub struct UniversePartitioner {
    axis: Axis,
    /// Representative surface of each plane, sorted by coordinate.
    surfs: Vec<usize>,
    /// Slab position of every surface that bounds a slab, keyed by surface index.
    positions: HashMap<usize, usize>,
    /// `surfs.len() + 1` slabs of cell indices.
    partitions: Vec<Vec<usize>>,
}

impl UniversePartitioner {
    /// Builds a partitioner for the given cells, or returns `None` if none of them
    /// is bounded by an axis-aligned plane.
    pub fn build(surfaces: &[Surface], cells: &[Cell], members: &[usize]) -> Option<Self> {
        let axis = choose_axis(surfaces, cells, members)?;

        let mut planes: Vec<(f64, usize)> = Vec::new();
        for &c in members {
            let Some(region) = cells[c].region() else { continue };
            for &s in region.surfaces() {
                if let Some((a, offset)) = surfaces[s].axis_plane() {
                    if a == axis && !planes.iter().any(|&(_, t)| t == s) {
                        planes.push((offset, s));
                    }
                }
            }
        }
        planes.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        // Planes sharing a coordinate would make the slab search ambiguous; only the first
        // one bounds slabs. Cells referencing the others are simply binned more widely.
        planes.dedup_by(|b, a| (b.0 - a.0).abs() < FP_COINCIDENT);

        let surfs: Vec<usize> = planes.iter().map(|&(_, s)| s).collect();
        let positions: HashMap<usize, usize> = surfs.iter().enumerate().map(|(i, &s)| (s, i)).collect();
        let n_bins = surfs.len() + 1;

        let ranges: Vec<(usize, usize)> = members
            .par_iter()
            .map(|&c| bin_range(&cells[c], &positions, n_bins))
            .collect();

        let mut partitions = vec![Vec::new(); n_bins];
        for (&c, &(first, last)) in members.iter().zip(ranges.iter()) {
            for bin in &mut partitions[first..=last] {
                bin.push(c);
            }
        }

        Some(Self { axis, surfs, positions, partitions })
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// Number of slabs.
    pub fn n_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Cells that may contain the point, found by a binary search over the sorted planes.
    ///
    /// The sense of a plane named by `on_surface` is taken from it, as during containment.
    pub fn get_cells(&self, surfaces: &[Surface], r: &Position, u: &Direction, on_surface: i32) -> &[usize] {
        let on_plane = if on_surface != 0 {
            self.positions.get(&((on_surface.unsigned_abs() - 1) as usize)).map(|&pos| self.surfs[pos])
        } else {
            None
        };
        let bin = self.surfs.partition_point(|&s| {
            if Some(s) == on_plane {
                on_surface > 0
            } else {
                surfaces[s].sense(r, u)
            }
        });
        &self.partitions[bin]
    }
}

/// The axis carrying the most distinct planes among the cells; ties prefer z, then y, then x.
fn choose_axis(surfaces: &[Surface], cells: &[Cell], members: &[usize]) -> Option<Axis> {
    let mut coords: [Vec<f64>; 3] = Default::default();
    for &c in members {
        let Some(region) = cells[c].region() else { continue };
        for &s in region.surfaces() {
            if let Some((axis, offset)) = surfaces[s].axis_plane() {
                let list = &mut coords[axis.index()];
                if !list.iter().any(|&x| (x - offset).abs() < FP_COINCIDENT) {
                    list.push(offset);
                }
            }
        }
    }

    let mut best: Option<(Axis, usize)> = None;
    for axis in [Axis::Z, Axis::Y, Axis::X] {
        let n = coords[axis.index()].len();
        if n > 0 && best.is_none_or(|(_, m)| n > m) {
            best = Some((axis, n));
        }
    }
    best.map(|(axis, _)| axis)
}

/// First and last slab a cell may overlap.
fn bin_range(cell: &Cell, positions: &HashMap<usize, usize>, n_bins: usize) -> (usize, usize) {
    let all = (0, n_bins - 1);
    let region = match &cell.shape {
        CellShape::Csg(region) if region.is_simple() => region,
        _ => return all,
    };

    let (mut first, mut last) = all;
    for h in region.halfspaces() {
        let Some(&pos) = positions.get(&((h.unsigned_abs() - 1) as usize)) else { continue };
        if h > 0 {
            // Above plane `pos`: slabs `pos + 1` and up.
            first = first.max(pos + 1);
        } else {
            last = last.min(pos);
        }
    }
    if first > last { all } else { (first, last) }
}
