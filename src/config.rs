//! Structured description of a geometry, as handed over by an input reader.
//!
//! Everything here is plain data with `serde` derives; [`GeometryConfig::build`] turns it
//! into a [`Geometry`]. Surfaces, cells and lattices reference each other by their
//! user-facing IDs.

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_TEMPERATURE;
use crate::error::Result;
use crate::geometry::{Geometry, GeometryBuilder};
use crate::surface::geometries::{AxisPlaneGeometry, CylinderGeometry, PlaneGeometry, SphereGeometry};
use crate::surface::{Axis, Surface};

/// Shape of a surface and its coefficients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SurfaceKind {
    XPlane { x0: f64 },
    YPlane { y0: f64 },
    ZPlane { z0: f64 },
    Plane { a: f64, b: f64, c: f64, d: f64 },
    Sphere { x0: f64, y0: f64, z0: f64, r: f64 },
    XCylinder { y0: f64, z0: f64, r: f64 },
    YCylinder { x0: f64, z0: f64, r: f64 },
    ZCylinder { x0: f64, y0: f64, r: f64 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurfaceSpec {
    pub id: i32,
    #[serde(flatten)]
    pub kind: SurfaceKind,
}

impl SurfaceSpec {
    pub fn new(id: i32, kind: SurfaceKind) -> Self {
        Self { id, kind }
    }

    pub fn to_surface(&self) -> Surface {
        let geometry: Box<dyn crate::surface::SurfaceGeometry> = match self.kind {
            SurfaceKind::XPlane { x0 } => Box::new(AxisPlaneGeometry::new(Axis::X, x0)),
            SurfaceKind::YPlane { y0 } => Box::new(AxisPlaneGeometry::new(Axis::Y, y0)),
            SurfaceKind::ZPlane { z0 } => Box::new(AxisPlaneGeometry::new(Axis::Z, z0)),
            SurfaceKind::Plane { a, b, c, d } => Box::new(PlaneGeometry::new(a, b, c, d)),
            SurfaceKind::Sphere { x0, y0, z0, r } => Box::new(SphereGeometry::new([x0, y0, z0], r)),
            SurfaceKind::XCylinder { y0, z0, r } => Box::new(CylinderGeometry::new(Axis::X, [0.0, y0, z0], r)),
            SurfaceKind::YCylinder { x0, z0, r } => Box::new(CylinderGeometry::new(Axis::Y, [x0, 0.0, z0], r)),
            SurfaceKind::ZCylinder { x0, y0, r } => Box::new(CylinderGeometry::new(Axis::Z, [x0, y0, 0.0], r)),
        };
        Surface::new(self.id, geometry)
    }
}

/// Content of a cell.
///
/// Material indices are per instance; a single entry applies to every instance and
/// `None` stands for void.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillSpec {
    Material(Vec<Option<usize>>),
    Universe(i32),
    Lattice(i32),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellSpec {
    pub id: i32,
    #[serde(default)]
    pub name: String,
    /// ID of the universe the cell belongs to.
    #[serde(default)]
    pub universe: i32,
    /// Region in textual form, e.g. `"-1 2 | ~(3 -4)"`. Empty means all of space.
    #[serde(default)]
    pub region: String,
    pub fill: FillSpec,
    /// Temperatures in K, one shared or one per instance.
    #[serde(default)]
    pub temperature: Vec<f64>,
    #[serde(default)]
    pub translation: Option<[f64; 3]>,
    /// Three angles in degrees about x, y and z, or a row-major 3x3 matrix.
    #[serde(default)]
    pub rotation: Option<Vec<f64>>,
}

impl CellSpec {
    pub fn new(id: i32, region: &str, fill: FillSpec) -> Self {
        Self {
            id,
            name: String::new(),
            universe: 0,
            region: region.to_string(),
            fill,
            temperature: Vec::new(),
            translation: None,
            rotation: None,
        }
    }

    /// A cell filled with a single material, `None` for void.
    pub fn material(id: i32, region: &str, material: Option<usize>) -> Self {
        Self::new(id, region, FillSpec::Material(vec![material]))
    }

    pub fn in_universe(mut self, universe: i32) -> Self {
        self.universe = universe;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: Vec<f64>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_translation(mut self, translation: [f64; 3]) -> Self {
        self.translation = Some(translation);
        self
    }

    pub fn with_rotation(mut self, rotation: Vec<f64>) -> Self {
        self.rotation = Some(rotation);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatticeSpec {
    pub id: i32,
    pub lower_left: Vec<f64>,
    pub pitch: Vec<f64>,
    pub shape: Vec<usize>,
    /// Universe IDs of the tiles, x varying fastest, then y, then z.
    pub universes: Vec<i32>,
    #[serde(default)]
    pub outer: Option<i32>,
}

/// Tunables of the cell search and of temperature handling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometrySettings {
    /// Universes with fewer cells are searched linearly.
    pub partitioner_min_cells: usize,
    /// Remember which cells were found across each cell's boundary.
    pub neighbor_lists: bool,
    /// Allowed temperature interval in K, inclusive.
    pub temperature_range: Option<[f64; 2]>,
    /// Temperature in K of material cells that specify none.
    pub default_temperature: f64,
}

impl Default for GeometrySettings {
    fn default() -> Self {
        Self {
            partitioner_min_cells: 2,
            neighbor_lists: true,
            temperature_range: None,
            default_temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/// A complete geometry definition.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GeometryConfig {
    #[serde(default)]
    pub surfaces: Vec<SurfaceSpec>,
    #[serde(default)]
    pub cells: Vec<CellSpec>,
    #[serde(default)]
    pub lattices: Vec<LatticeSpec>,
    /// ID of the root universe; when absent, the only universe no cell or lattice uses.
    #[serde(default)]
    pub root: Option<i32>,
    #[serde(default)]
    pub settings: GeometrySettings,
}

impl GeometryConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn into_builder(self) -> GeometryBuilder {
        let mut builder = GeometryBuilder::new().settings(self.settings);
        for surface in &self.surfaces {
            builder = builder.surface(surface.to_surface());
        }
        for cell in self.cells {
            builder = builder.cell(cell);
        }
        for lattice in self.lattices {
            builder = builder.lattice(lattice);
        }
        if let Some(root) = self.root {
            builder = builder.root(root);
        }
        builder
    }

    pub fn build(self) -> Result<Geometry> {
        self.into_builder().build()
    }
}
