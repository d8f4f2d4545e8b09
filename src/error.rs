use crate::position::{Direction, Position};

/// Errors raised while building a geometry or answering a query against it.
///
/// Everything except [`GeometryError::LostParticle`] and the instance accessors is
/// a construction-time failure: the geometry is rejected before any tracking starts.
#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    /// A region expression has unbalanced parentheses or an operator without operands.
    #[error("Malformed region in cell {cell_id}: {reason}")]
    MalformedRegion { cell_id: i32, reason: String },

    #[error("Cell {cell_id} references unknown surface {surface_id}")]
    UnknownSurface { cell_id: i32, surface_id: i32 },

    #[error("Unknown universe {universe_id}")]
    UnknownUniverse { universe_id: i32 },

    #[error("Cell {cell_id} is filled with unknown lattice {lattice_id}")]
    UnknownLattice { cell_id: i32, lattice_id: i32 },

    #[error("Duplicate {kind} id {id}")]
    DuplicateId { kind: &'static str, id: i32 },

    #[error("Could not determine the root universe: {reason}")]
    NoRootUniverse { reason: String },

    #[error("Universe {universe_id} is contained within itself")]
    RecursiveFill { universe_id: i32 },

    #[error("Cell {cell_id}: {reason}")]
    InvalidTransform { cell_id: i32, reason: String },

    #[error("Lattice {lattice_id}: {reason}")]
    InvalidLattice { lattice_id: i32, reason: String },

    /// A per-instance material or temperature list has neither one entry nor one per instance.
    #[error("Cell {cell_id} has {given} {what} values but {n_instances} instances")]
    InstanceCountMismatch { cell_id: i32, what: &'static str, given: usize, n_instances: usize },

    #[error("Instance {instance} is out of range for cell {cell_id} with {n_instances} instances")]
    InstanceOutOfRange { cell_id: i32, instance: usize, n_instances: usize },

    #[error("Cell {cell_id} has no temperature")]
    TemperatureUnset { cell_id: i32 },

    #[error("Invalid temperature {temperature} K for cell {cell_id}")]
    InvalidTemperature { cell_id: i32, temperature: f64 },

    /// No cell of the searched universe contains the point.
    #[error("Lost particle at {position:?} moving along {direction:?}: no cell of universe {universe_id} contains it")]
    LostParticle { position: Position, direction: Direction, universe_id: i32 },

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GeometryError>;
