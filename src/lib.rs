//! # csgtrack
//!
//! `csgtrack` is the spatial-query core of a Monte Carlo particle-transport code, usable
//! from Rust as well as compiled to WebAssembly (WASM). Given a point and a direction it
//! finds the cell containing the point and the distance to the next cell boundary.
//!
//! ## Features
//!
//! - **CSG regions**: Cells are boolean combinations (intersection, union, complement) of
//!   surface half-spaces, evaluated from a reverse Polish form. Pure intersections take a
//!   short-circuit path.
//! - **Nested geometry**: Cells can be filled with universes or rectangular lattices, with
//!   translations and rotations. Each occurrence of a cell gets its own instance number,
//!   material and temperature.
//! - **Fast cell search**: Per-cell neighbor lists learned during tracking and per-universe
//!   partitioners that bin cells between axis-aligned planes.
//! - **Thread-safe queries**: A built [`Geometry`] is `Send + Sync`; neighbor lists grow
//!   lock-free from any number of tracking threads.
//! - **External cells**: Cells whose shape comes from another backend plug in through the
//!   [`ExternalCell`] trait.
//!
//! ## Main Interface
//!
//! A [`Geometry`] is built from a [`GeometryConfig`] or a [`GeometryBuilder`]. Tracking
//! calls [`Geometry::find_cell`] and [`Geometry::next_boundary`].

mod constants;
mod neighbor;
pub mod cell;
pub mod config;
pub mod error;
pub mod geometry;
pub mod lattice;
pub mod partitioner;
pub mod position;
pub mod record;
pub mod region;
pub mod surface;
pub mod universe;
pub mod wasm;

pub use cell::{Cell, CellShape, ExternalCell, Fill};
pub use config::{CellSpec, FillSpec, GeometryConfig, GeometrySettings, LatticeSpec, SurfaceKind, SurfaceSpec};
pub use constants::{DEFAULT_TEMPERATURE, FP_COINCIDENT, FP_PRECISION, FP_REL_PRECISION, INFTY, K_BOLTZMANN, SURFACE_NONE};
pub use error::{GeometryError, Result};
pub use geometry::{Boundary, Geometry, GeometryBuilder, LatticeTile, Level, Location};
pub use lattice::RectLattice;
pub use neighbor::{NeighborIter, NeighborList};
pub use partitioner::UniversePartitioner;
pub use position::{Direction, Position, Rotation};
pub use record::{CellRecord, GeometryRecord, LatticeRecord, UniverseRecord};
pub use region::{tokenize, Region, Token};
pub use surface::geometries::{AxisPlaneGeometry, CylinderGeometry, PlaneGeometry, SphereGeometry};
pub use surface::{Axis, Surface, SurfaceGeometry};
pub use universe::Universe;
