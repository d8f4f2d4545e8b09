//! Serializable snapshots of the built geometry, for whatever persists or reports it.

use serde::{Deserialize, Serialize};

use crate::cell::{CellShape, Fill};
use crate::config::FillSpec;
use crate::geometry::Geometry;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub id: i32,
    pub name: String,
    pub universe: i32,
    /// Region in its authored textual form; empty for external cells.
    pub region: String,
    /// Backend name of an external cell.
    pub external: Option<String>,
    pub fill: FillSpec,
    pub n_instances: usize,
    pub distribcell_index: Option<usize>,
    /// Temperatures in K, one shared or one per instance.
    pub temperature: Vec<f64>,
    pub translation: [f64; 3],
    /// The authored angles when available, otherwise the row-major matrix.
    pub rotation: Option<Vec<f64>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UniverseRecord {
    pub id: i32,
    pub cells: Vec<i32>,
    pub partitioned: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatticeRecord {
    pub id: i32,
    pub lower_left: Vec<f64>,
    pub pitch: Vec<f64>,
    pub shape: Vec<usize>,
    pub universes: Vec<i32>,
    pub outer: Option<i32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeometryRecord {
    pub root: i32,
    pub cells: Vec<CellRecord>,
    pub universes: Vec<UniverseRecord>,
    pub lattices: Vec<LatticeRecord>,
}

impl Geometry {
    pub fn cell_record(&self, index: usize) -> CellRecord {
        let cell = self.cell(index);
        let surfaces = self.surfaces();
        let universe_id = |u: usize| self.universes()[u].id();

        let (region, external) = match cell.shape() {
            CellShape::Csg(region) => (region.format_with(|s| surfaces[s].id()), None),
            CellShape::External(backend) => (String::new(), Some(backend.backend().to_string())),
        };
        let fill = match cell.fill() {
            Fill::Material => FillSpec::Material(cell.materials().to_vec()),
            Fill::Universe(u) => FillSpec::Universe(universe_id(u)),
            Fill::Lattice(l) => FillSpec::Lattice(self.lattices()[l].id()),
        };
        let rotation = cell.rotation().map(|rot| match rot.angles() {
            Some(angles) => angles.to_vec(),
            None => rot.matrix().iter().flatten().copied().collect(),
        });

        CellRecord {
            id: cell.id(),
            name: cell.name().to_string(),
            universe: universe_id(cell.universe()),
            region,
            external,
            fill,
            n_instances: cell.n_instances(),
            distribcell_index: cell.distribcell_index(),
            temperature: cell.temperatures(),
            translation: *cell.translation(),
            rotation,
        }
    }

    pub fn universe_record(&self, index: usize) -> UniverseRecord {
        let universe = &self.universes()[index];
        UniverseRecord {
            id: universe.id(),
            cells: universe.cells().iter().map(|&c| self.cell(c).id()).collect(),
            partitioned: universe.partitioner().is_some(),
        }
    }

    pub fn lattice_record(&self, index: usize) -> LatticeRecord {
        let lattice = &self.lattices()[index];
        let dims = if lattice.is_3d() { 3 } else { 2 };
        let universe_id = |u: usize| self.universes()[u].id();
        LatticeRecord {
            id: lattice.id(),
            lower_left: lattice.lower_left[..dims].to_vec(),
            pitch: lattice.pitch[..dims].to_vec(),
            shape: lattice.shape()[..dims].to_vec(),
            universes: lattice.universes().iter().map(|&u| universe_id(u)).collect(),
            outer: lattice.outer().map(universe_id),
        }
    }

    pub fn record(&self) -> GeometryRecord {
        GeometryRecord {
            root: self.universes()[self.root()].id(),
            cells: (0..self.cells().len()).map(|i| self.cell_record(i)).collect(),
            universes: (0..self.universes().len()).map(|i| self.universe_record(i)).collect(),
            lattices: (0..self.lattices().len()).map(|i| self.lattice_record(i)).collect(),
        }
    }
}
