use crate::constants::K_BOLTZMANN;
use crate::error::{GeometryError, Result};
use crate::neighbor::NeighborList;
use crate::position::{sub, Direction, Position, Rotation};
use crate::region::Region;
use crate::surface::Surface;

/// What fills a cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fill {
    /// The cell holds its per-instance materials directly.
    Material,
    /// The cell is filled with another universe, by index.
    Universe(usize),
    /// The cell is filled with a lattice, by index.
    Lattice(usize),
}

/// A cell whose shape is answered by an external backend, e.g. a tessellated mesh.
///
/// Implementations must honor the same contract as CSG regions: `on_surface` takes
/// precedence over computed senses and distances are measured along `u`.
pub trait ExternalCell: Send + Sync + std::fmt::Debug {
    fn contains(&self, r: &Position, u: &Direction, on_surface: i32) -> bool;

    fn distance(&self, r: &Position, u: &Direction, on_surface: i32) -> (f64, i32);

    /// Short identifier of the backend, written out in place of a region.
    fn backend(&self) -> &str;
}

/// The two ways a cell's extent can be defined.
#[derive(Debug)]
pub enum CellShape {
    Csg(Region),
    External(Box<dyn ExternalCell>),
}

/// A region of space together with what fills it.
///
/// Cells are owned by the [`Geometry`](crate::Geometry) and referred to by index.
/// Temperatures are stored as `sqrt(k_B * T)` in `sqrt(eV)`, the form consumed by
/// cross-section lookups; [`Cell::temperature`] converts back to kelvin.
#[derive(Debug)]
pub struct Cell {
    pub(crate) id: i32,
    pub(crate) name: String,
    pub(crate) universe: usize,
    pub(crate) fill: Fill,
    pub(crate) materials: Vec<Option<usize>>,
    pub(crate) sqrt_kt: Vec<f64>,
    pub(crate) translation: Position,
    pub(crate) rotation: Option<Rotation>,
    pub(crate) n_instances: usize,
    /// Index of this cell among the cells with more than one instance.
    pub(crate) distribcell_index: Option<usize>,
    /// Per distribcell map, the number of target instances in the cells preceding this
    /// one in its universe. Only filled for universe and lattice fills.
    pub(crate) offsets: Vec<usize>,
    pub(crate) shape: CellShape,
    pub(crate) neighbors: NeighborList,
}

impl Cell {
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index of the universe this cell belongs to.
    pub fn universe(&self) -> usize {
        self.universe
    }

    pub fn fill(&self) -> Fill {
        self.fill
    }

    pub fn shape(&self) -> &CellShape {
        &self.shape
    }

    /// The CSG region of the cell, if it has one.
    pub fn region(&self) -> Option<&Region> {
        match &self.shape {
            CellShape::Csg(region) => Some(region),
            CellShape::External(_) => None,
        }
    }

    pub fn translation(&self) -> &Position {
        &self.translation
    }

    pub fn rotation(&self) -> Option<&Rotation> {
        self.rotation.as_ref()
    }

    /// Number of occurrences of this cell in the geometry tree.
    pub fn n_instances(&self) -> usize {
        self.n_instances
    }

    pub fn distribcell_index(&self) -> Option<usize> {
        self.distribcell_index
    }

    pub fn neighbors(&self) -> &NeighborList {
        &self.neighbors
    }

    /// Determines if the cell contains the point. See [`Region::contains`].
    #[inline]
    pub fn contains(&self, surfaces: &[Surface], r: &Position, u: &Direction, on_surface: i32) -> bool {
        match &self.shape {
            CellShape::Csg(region) => region.contains(surfaces, r, u, on_surface),
            CellShape::External(ext) => ext.contains(r, u, on_surface),
        }
    }

    /// Finds the oncoming boundary of the cell. See [`Region::distance`].
    #[inline]
    pub fn distance(&self, surfaces: &[Surface], r: &Position, u: &Direction, on_surface: i32) -> (f64, i32) {
        match &self.shape {
            CellShape::Csg(region) => region.distance(surfaces, r, u, on_surface),
            CellShape::External(ext) => ext.distance(r, u, on_surface),
        }
    }

    /// Transforms coordinates into the frame of the universe or lattice filling this cell.
    #[inline]
    pub fn to_fill_frame(&self, r: &Position, u: &Direction) -> (Position, Direction) {
        let local = sub(r, &self.translation);
        match &self.rotation {
            Some(rot) => (rot.apply(&local), rot.apply(u)),
            None => (local, *u),
        }
    }

    fn check_instance(&self, instance: usize) -> Result<()> {
        let n = self.n_instances.max(1);
        if instance >= n {
            return Err(GeometryError::InstanceOutOfRange { cell_id: self.id, instance, n_instances: n });
        }
        Ok(())
    }

    /// `sqrt(k_B * T)` of an instance, in `sqrt(eV)`.
    ///
    /// `None` selects the first instance, for cells known to be instanced once.
    pub fn sqrt_kt(&self, instance: Option<usize>) -> Result<f64> {
        if self.sqrt_kt.is_empty() {
            return Err(GeometryError::TemperatureUnset { cell_id: self.id });
        }
        match instance {
            None => Ok(self.sqrt_kt[0]),
            Some(i) => {
                self.check_instance(i)?;
                Ok(if self.sqrt_kt.len() == 1 { self.sqrt_kt[0] } else { self.sqrt_kt[i] })
            }
        }
    }

    /// Temperature of an instance in K. `None` selects the first instance.
    pub fn temperature(&self, instance: Option<usize>) -> Result<f64> {
        let sqrt_kt = self.sqrt_kt(instance)?;
        Ok(sqrt_kt * sqrt_kt / K_BOLTZMANN)
    }

    /// Sets the temperature in K of one instance, or of all instances when `instance` is `None`.
    ///
    /// A cell sharing one temperature across its instances gets a value per instance the
    /// first time a single instance is changed.
    pub fn set_temperature(&mut self, temperature: f64, instance: Option<usize>) -> Result<()> {
        if !temperature.is_finite() || temperature < 0.0 {
            return Err(GeometryError::InvalidTemperature { cell_id: self.id, temperature });
        }
        let value = (K_BOLTZMANN * temperature).sqrt();
        match instance {
            None => {
                if self.sqrt_kt.is_empty() {
                    self.sqrt_kt.push(value);
                } else {
                    self.sqrt_kt.iter_mut().for_each(|t| *t = value);
                }
            }
            Some(i) => {
                self.check_instance(i)?;
                if self.sqrt_kt.len() != self.n_instances.max(1) {
                    let shared = self.sqrt_kt.first().copied().unwrap_or(value);
                    self.sqrt_kt = vec![shared; self.n_instances.max(1)];
                }
                self.sqrt_kt[i] = value;
            }
        }
        Ok(())
    }

    /// Material index of an instance, `None` for void. `None` selects the first instance.
    pub fn material(&self, instance: Option<usize>) -> Result<Option<usize>> {
        if self.materials.is_empty() {
            return Ok(None);
        }
        match instance {
            None => Ok(self.materials[0]),
            Some(i) => {
                self.check_instance(i)?;
                Ok(if self.materials.len() == 1 { self.materials[0] } else { self.materials[i] })
            }
        }
    }

    /// Sets the material of one instance, or of all instances when `instance` is `None`.
    pub fn set_material(&mut self, material: Option<usize>, instance: Option<usize>) -> Result<()> {
        match instance {
            None => {
                if self.materials.is_empty() {
                    self.materials.push(material);
                } else {
                    self.materials.iter_mut().for_each(|m| *m = material);
                }
            }
            Some(i) => {
                self.check_instance(i)?;
                if self.materials.len() != self.n_instances.max(1) {
                    let shared = self.materials.first().copied().flatten();
                    self.materials = vec![shared; self.n_instances.max(1)];
                }
                self.materials[i] = material;
            }
        }
        Ok(())
    }

    /// Per-instance materials as stored: one shared entry or one per instance.
    pub fn materials(&self) -> &[Option<usize>] {
        &self.materials
    }

    /// Per-instance temperatures in K as stored: one shared entry or one per instance.
    pub fn temperatures(&self) -> Vec<f64> {
        self.sqrt_kt.iter().map(|s| s * s / K_BOLTZMANN).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{tokenize, Region};

    fn material_cell(n_instances: usize) -> Cell {
        Cell {
            id: 10,
            name: "fuel".to_string(),
            universe: 0,
            fill: Fill::Material,
            materials: vec![Some(1)],
            sqrt_kt: vec![(K_BOLTZMANN * 600.0).sqrt()],
            translation: [0.0; 3],
            rotation: None,
            n_instances,
            distribcell_index: None,
            offsets: Vec::new(),
            shape: CellShape::Csg(Region::new(10, tokenize(10, "-1").unwrap()).unwrap()),
            neighbors: NeighborList::new(),
        }
    }

    #[test]
    fn test_temperature_round_trip() {
        let cell = material_cell(1);
        assert!((cell.temperature(None).unwrap() - 600.0).abs() < 1e-9);
        assert!((cell.temperature(Some(0)).unwrap() - 600.0).abs() < 1e-9);
    }

    #[test]
    fn test_set_single_instance_expands_storage() {
        let mut cell = material_cell(3);
        cell.set_temperature(900.0, Some(1)).unwrap();
        assert_eq!(cell.sqrt_kt.len(), 3);
        assert!((cell.temperature(Some(0)).unwrap() - 600.0).abs() < 1e-9);
        assert!((cell.temperature(Some(1)).unwrap() - 900.0).abs() < 1e-9);
        assert!((cell.temperature(Some(2)).unwrap() - 600.0).abs() < 1e-9);

        cell.set_temperature(300.0, None).unwrap();
        for i in 0..3 {
            assert!((cell.temperature(Some(i)).unwrap() - 300.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_instance_out_of_range() {
        let mut cell = material_cell(2);
        assert!(matches!(
            cell.temperature(Some(2)),
            Err(GeometryError::InstanceOutOfRange { cell_id: 10, instance: 2, n_instances: 2 })
        ));
        assert!(cell.set_temperature(500.0, Some(5)).is_err());
        assert!(cell.set_material(None, Some(2)).is_err());
    }

    #[test]
    fn test_rejects_negative_temperature() {
        let mut cell = material_cell(1);
        assert!(matches!(
            cell.set_temperature(-1.0, None),
            Err(GeometryError::InvalidTemperature { .. })
        ));
    }

    #[test]
    fn test_per_instance_material() {
        let mut cell = material_cell(2);
        cell.set_material(None, Some(1)).unwrap();
        assert_eq!(cell.material(Some(0)).unwrap(), Some(1));
        assert_eq!(cell.material(Some(1)).unwrap(), None);
    }

    #[test]
    fn test_fill_frame_transform() {
        let mut cell = material_cell(1);
        cell.translation = [1.0, 2.0, 3.0];
        cell.rotation = Some(Rotation::from_angles([0.0, 0.0, 90.0]));
        let (r, u) = cell.to_fill_frame(&[1.0, 3.0, 3.0], &[0.0, 1.0, 0.0]);
        assert!((r[0] - 1.0).abs() < 1e-12 && r[1].abs() < 1e-12 && r[2].abs() < 1e-12, "{:?}", r);
        assert!((u[0] - 1.0).abs() < 1e-12, "{:?}", u);
    }
}
