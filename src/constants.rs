/// Distance reported when a ray never reaches a boundary.
pub const INFTY: f64 = f64::MAX;

/// Signed surface reference meaning "not on any surface".
pub const SURFACE_NONE: i32 = 0;

/// Two values closer than this are considered coincident. Points whose surface
/// function evaluates below this magnitude are treated as lying on the surface.
pub const FP_COINCIDENT: f64 = 1e-12;

/// Relative tolerance used when comparing two candidate boundary distances.
pub const FP_PRECISION: f64 = 1e-14;

/// Relative tolerance used when comparing cell and lattice distances across levels.
pub const FP_REL_PRECISION: f64 = 1e-5;

/// Boltzmann constant in eV/K.
pub const K_BOLTZMANN: f64 = 8.617333262e-5;

/// Temperature assigned to material cells that do not specify one, in K.
pub const DEFAULT_TEMPERATURE: f64 = 293.6;
