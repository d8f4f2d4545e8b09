use std::collections::HashMap;

use rayon::prelude::*;
use smallvec::SmallVec;

use crate::cell::{Cell, CellShape, ExternalCell, Fill};
use crate::config::{CellSpec, FillSpec, GeometrySettings, LatticeSpec};
use crate::constants::{FP_COINCIDENT, FP_REL_PRECISION, INFTY, K_BOLTZMANN, SURFACE_NONE};
use crate::error::{GeometryError, Result};
use crate::lattice::RectLattice;
use crate::neighbor::NeighborList;
use crate::partitioner::UniversePartitioner;
use crate::position::{Direction, Position, Rotation};
use crate::region::{tokenize, Region, Token};
use crate::surface::Surface;
use crate::universe::Universe;

/// Tile of a lattice a search descended through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LatticeTile {
    pub lattice: usize,
    pub index: [i32; 3],
}

/// One level of a nested location: the cell found in a universe, in that universe's frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Level {
    pub universe: usize,
    pub cell: usize,
    pub r: Position,
    pub u: Direction,
    /// Set when the universe of this level fills a lattice tile.
    pub lattice: Option<LatticeTile>,
}

/// Result of a cell search: the path from the root universe down to a material cell.
#[derive(Clone, Debug, PartialEq)]
pub struct Location {
    pub levels: SmallVec<[Level; 4]>,
    /// Index of the material cell at the bottom of the path.
    pub cell: usize,
    /// Which occurrence of `cell` in the geometry tree the path leads to.
    pub instance: usize,
}

impl Location {
    pub fn depth(&self) -> usize {
        self.levels.len()
    }
}

/// Nearest boundary along a ray through a nested location.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Boundary {
    pub distance: f64,
    /// Signed reference of the surface crossed, signed by the side entered;
    /// `SURFACE_NONE` for a lattice tile edge or when nothing is hit.
    pub surface: i32,
    /// Index step into the neighboring lattice tile, zero unless a tile edge is crossed.
    pub lattice_translation: [i32; 3],
    /// Level whose cell or lattice tile is left. Levels above it are unchanged by the crossing.
    pub level: usize,
}

/// A constructive solid geometry ready for particle tracking.
///
/// The geometry owns all surfaces, cells, universes and lattices and refers to them by
/// index. It is immutable during tracking apart from the neighbor lists, which fill up
/// through shared references, so a single `Geometry` can be queried from many threads.
pub struct Geometry {
    surfaces: Vec<Surface>,
    cells: Vec<Cell>,
    universes: Vec<Universe>,
    lattices: Vec<RectLattice>,
    surface_map: HashMap<i32, usize>,
    cell_map: HashMap<i32, usize>,
    universe_map: HashMap<i32, usize>,
    lattice_map: HashMap<i32, usize>,
    root: usize,
    n_distribcell_maps: usize,
    settings: GeometrySettings,
}

impl Geometry {
    pub fn builder() -> GeometryBuilder {
        GeometryBuilder::new()
    }

    pub fn surfaces(&self) -> &[Surface] {
        &self.surfaces
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cell(&self, index: usize) -> &Cell {
        &self.cells[index]
    }

    pub fn universes(&self) -> &[Universe] {
        &self.universes
    }

    pub fn lattices(&self) -> &[RectLattice] {
        &self.lattices
    }

    /// Index of the root universe.
    pub fn root(&self) -> usize {
        self.root
    }

    pub fn settings(&self) -> &GeometrySettings {
        &self.settings
    }

    /// Number of cells with more than one instance.
    pub fn n_distribcell_maps(&self) -> usize {
        self.n_distribcell_maps
    }

    pub fn surface_index(&self, id: i32) -> Option<usize> {
        self.surface_map.get(&id).copied()
    }

    pub fn cell_index(&self, id: i32) -> Option<usize> {
        self.cell_map.get(&id).copied()
    }

    pub fn universe_index(&self, id: i32) -> Option<usize> {
        self.universe_map.get(&id).copied()
    }

    pub fn lattice_index(&self, id: i32) -> Option<usize> {
        self.lattice_map.get(&id).copied()
    }

    /// Finds the material cell containing a point, descending from the root universe.
    ///
    /// `on_surface` is the signed reference of the surface the particle was just moved
    /// onto, `SURFACE_NONE` otherwise. `previous` is the particle's last location; at each
    /// level where it was in the same universe, the neighbors of its cell there are tried
    /// first.
    pub fn find_cell(
        &self,
        r: &Position,
        u: &Direction,
        on_surface: i32,
        previous: Option<&Location>,
    ) -> Result<Location> {
        let mut levels: SmallVec<[Level; 4]> = SmallVec::new();
        let mut universe = self.root;
        let mut r = *r;
        let mut u = *u;
        let mut lattice = None;

        loop {
            let previous_cell = previous
                .and_then(|p| p.levels.get(levels.len()))
                .filter(|level| level.universe == universe)
                .map(|level| level.cell);
            let cell = self.find_cell_in_universe(universe, &r, &u, on_surface, previous_cell)?;
            levels.push(Level { universe, cell, r, u, lattice });

            match self.cells[cell].fill {
                Fill::Material => break,
                Fill::Universe(next) => {
                    (r, u) = self.cells[cell].to_fill_frame(&r, &u);
                    universe = next;
                    lattice = None;
                }
                Fill::Lattice(l) => {
                    let (r_lat, u_lat) = self.cells[cell].to_fill_frame(&r, &u);
                    let lat = &self.lattices[l];
                    let index = lat.get_indices(&r_lat, &u_lat);
                    let Some(next) = lat.universe_at(index) else {
                        log::debug!(
                            "Particle at {:?} left lattice {} at tile {:?}, which has no outer universe",
                            r_lat,
                            lat.id,
                            index
                        );
                        return Err(GeometryError::LostParticle {
                            position: r_lat,
                            direction: u_lat,
                            universe_id: self.universes[universe].id,
                        });
                    };
                    r = lat.local_position(&r_lat, index);
                    u = u_lat;
                    universe = next;
                    lattice = Some(LatticeTile { lattice: l, index });
                }
            }
        }

        let cell = levels[levels.len() - 1].cell;
        let instance = self.instance_of(&levels);
        Ok(Location { levels, cell, instance })
    }

    /// Finds the cell of one universe containing a point given in that universe's frame.
    ///
    /// Candidates are tried in order: the neighbors of `previous`, the partitioner's cells
    /// for the point, then every cell of the universe. A hit is remembered as a neighbor
    /// of `previous`.
    pub fn find_cell_in_universe(
        &self,
        universe: usize,
        r: &Position,
        u: &Direction,
        on_surface: i32,
        previous: Option<usize>,
    ) -> Result<usize> {
        match self.search_universe(universe, r, u, on_surface, previous) {
            Some(cell) => {
                if let Some(prev) = previous {
                    if self.settings.neighbor_lists && prev != cell {
                        self.cells[prev].neighbors.push(cell);
                    }
                }
                Ok(cell)
            }
            None => {
                let universe_id = self.universes[universe].id;
                log::debug!("No cell of universe {} contains {:?} moving along {:?}", universe_id, r, u);
                Err(GeometryError::LostParticle { position: *r, direction: *u, universe_id })
            }
        }
    }

    fn search_universe(
        &self,
        universe: usize,
        r: &Position,
        u: &Direction,
        on_surface: i32,
        previous: Option<usize>,
    ) -> Option<usize> {
        let contains = |c: usize| self.cells[c].contains(&self.surfaces, r, u, on_surface);

        if self.settings.neighbor_lists {
            if let Some(prev) = previous {
                let hit = self.cells[prev]
                    .neighbors
                    .iter()
                    .find(|&c| self.cells[c].universe == universe && contains(c));
                if hit.is_some() {
                    return hit;
                }
            }
        }

        let univ = &self.universes[universe];
        if let Some(partitioner) = &univ.partitioner {
            let candidates = partitioner.get_cells(&self.surfaces, r, u, on_surface);
            if let Some(&c) = candidates.iter().find(|&&c| contains(c)) {
                return Some(c);
            }
        }
        univ.cells.iter().copied().find(|&c| contains(c))
    }

    /// Distribcell instance of the last cell of a path: the sum of the offsets stored in
    /// the fill cells and lattice tiles along it.
    fn instance_of(&self, levels: &[Level]) -> usize {
        let Some((last, parents)) = levels.split_last() else { return 0 };
        let Some(map) = self.cells[last.cell].distribcell_index else { return 0 };

        let cells: usize = parents.iter().map(|level| self.cells[level.cell].offsets[map]).sum();
        let tiles: usize = levels
            .iter()
            .filter_map(|level| level.lattice)
            .map(|tile| self.lattices[tile.lattice].tile_offset(map, tile.index))
            .sum();
        cells + tiles
    }

    /// Distance to the boundary of a single cell, in the frame of its universe.
    pub fn distance_to_boundary(&self, cell: usize, r: &Position, u: &Direction, on_surface: i32) -> (f64, i32) {
        self.cells[cell].distance(&self.surfaces, r, u, on_surface)
    }

    /// Nearest boundary over every level of a location.
    ///
    /// When boundaries of several levels coincide within tolerance, the highest level wins,
    /// since crossing it also ends the lower cells.
    pub fn next_boundary(&self, location: &Location, on_surface: i32) -> Result<Boundary> {
        let mut boundary = Boundary {
            distance: INFTY,
            surface: SURFACE_NONE,
            lattice_translation: [0; 3],
            level: 0,
        };

        for (i, level) in location.levels.iter().enumerate() {
            let (d_surf, surface) = self.cells[level.cell].distance(&self.surfaces, &level.r, &level.u, on_surface);

            let (d_lat, translation) = match level.lattice {
                Some(tile) => {
                    let (d, translation) = self.lattices[tile.lattice].distance(&level.r, &level.u);
                    if d < 0.0 {
                        log::debug!("Particle at {:?} is outside its tile {:?}", level.r, tile.index);
                        return Err(GeometryError::LostParticle {
                            position: level.r,
                            direction: level.u,
                            universe_id: self.universes[level.universe].id,
                        });
                    }
                    (d, translation)
                }
                None => (INFTY, [0; 3]),
            };

            let d = boundary.distance;
            if d_surf < d_lat - FP_COINCIDENT {
                if d == INFTY || (d - d_surf) / d >= FP_REL_PRECISION {
                    boundary = Boundary { distance: d_surf, surface, lattice_translation: [0; 3], level: i };
                }
            } else if d == INFTY || (d - d_lat) / d >= FP_REL_PRECISION {
                boundary = Boundary {
                    distance: d_lat,
                    surface: SURFACE_NONE,
                    lattice_translation: translation,
                    level: i,
                };
            }
        }
        Ok(boundary)
    }

    /// Temperature in K of a cell instance. `None` selects the first instance.
    pub fn temperature(&self, cell: usize, instance: Option<usize>) -> Result<f64> {
        self.cells[cell].temperature(instance)
    }

    /// `sqrt(k_B * T)` of a cell instance, in `sqrt(eV)`.
    pub fn sqrt_kt(&self, cell: usize, instance: Option<usize>) -> Result<f64> {
        self.cells[cell].sqrt_kt(instance)
    }

    /// Sets the temperature of one instance of a cell, or of all of them for `None`.
    pub fn set_temperature(&mut self, cell: usize, temperature: f64, instance: Option<usize>) -> Result<()> {
        check_temperature(self.cells[cell].id, temperature, &self.settings)?;
        self.cells[cell].set_temperature(temperature, instance)
    }

    pub fn material(&self, cell: usize, instance: Option<usize>) -> Result<Option<usize>> {
        self.cells[cell].material(instance)
    }

    pub fn set_material(&mut self, cell: usize, material: Option<usize>, instance: Option<usize>) -> Result<()> {
        self.cells[cell].set_material(material, instance)
    }
}

/// Largest deviation of `R * R^T` from the identity accepted for a rotation matrix.
const ROTATION_TOLERANCE: f64 = 1e-10;

fn check_temperature(cell_id: i32, temperature: f64, settings: &GeometrySettings) -> Result<()> {
    let in_range = match settings.temperature_range {
        Some([min, max]) => temperature >= min && temperature <= max,
        None => true,
    };
    if !temperature.is_finite() || temperature < 0.0 || !in_range {
        return Err(GeometryError::InvalidTemperature { cell_id, temperature });
    }
    Ok(())
}

/// Collects surfaces, cells and lattices and links them into a [`Geometry`].
#[derive(Default)]
pub struct GeometryBuilder {
    surfaces: Vec<Surface>,
    cells: Vec<(CellSpec, Option<Box<dyn ExternalCell>>)>,
    lattices: Vec<LatticeSpec>,
    root: Option<i32>,
    settings: GeometrySettings,
}

impl GeometryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn surface(mut self, surface: Surface) -> Self {
        self.surfaces.push(surface);
        self
    }

    pub fn cell(mut self, cell: CellSpec) -> Self {
        self.cells.push((cell, None));
        self
    }

    /// Adds a cell whose extent is answered by `shape`; the region of `cell` is ignored.
    pub fn external_cell(mut self, cell: CellSpec, shape: Box<dyn ExternalCell>) -> Self {
        self.cells.push((cell, Some(shape)));
        self
    }

    pub fn lattice(mut self, lattice: LatticeSpec) -> Self {
        self.lattices.push(lattice);
        self
    }

    pub fn root(mut self, universe_id: i32) -> Self {
        self.root = Some(universe_id);
        self
    }

    pub fn settings(mut self, settings: GeometrySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Resolves all references and prepares the search structures.
    pub fn build(self) -> Result<Geometry> {
        let GeometryBuilder { surfaces, cells: cell_specs, lattices: lattice_specs, root, settings } = self;

        let surface_map = index_ids("surface", surfaces.iter().map(|s| s.id()))?;
        let cell_map = index_ids("cell", cell_specs.iter().map(|(c, _)| c.id))?;
        let lattice_map = index_ids("lattice", lattice_specs.iter().map(|l| l.id))?;

        // Universes exist by virtue of having cells, numbered in order of first appearance.
        let mut universes: Vec<Universe> = Vec::new();
        let mut universe_map: HashMap<i32, usize> = HashMap::new();
        for (i, (spec, _)) in cell_specs.iter().enumerate() {
            let index = *universe_map.entry(spec.universe).or_insert_with(|| {
                universes.push(Universe::new(spec.universe));
                universes.len() - 1
            });
            universes[index].cells.push(i);
        }
        let universe_index = |id: i32| {
            universe_map.get(&id).copied().ok_or(GeometryError::UnknownUniverse { universe_id: id })
        };

        let mut lattices = Vec::with_capacity(lattice_specs.len());
        for spec in &lattice_specs {
            let tiles = spec.universes.iter().map(|&id| universe_index(id)).collect::<Result<Vec<_>>>()?;
            let outer = spec.outer.map(universe_index).transpose()?;
            lattices.push(RectLattice::new(spec.id, &spec.lower_left, &spec.pitch, &spec.shape, tiles, outer)?);
        }

        let mut cells = Vec::with_capacity(cell_specs.len());
        let mut temperatures = Vec::with_capacity(cell_specs.len());
        for (spec, external) in cell_specs {
            let universe = universe_index(spec.universe)?;
            temperatures.push(spec.temperature.clone());
            cells.push(make_cell(spec, external, universe, &surface_map, &universe_map, &lattice_map)?);
        }

        let root = match root {
            Some(id) => universe_index(id)?,
            None => find_root(&universes, &cells, &lattices)?,
        };

        let order = postorder(&universes, &cells, &lattices)?;
        count_instances(root, &order, &universes, &mut cells, &lattices);
        let n_distribcell_maps = assign_offsets(&order, &universes, &mut cells, &mut lattices);

        for (cell, mut temps) in cells.iter_mut().zip(temperatures) {
            let n = cell.n_instances.max(1);
            if cell.fill == Fill::Material && !(cell.materials.len() == 1 || cell.materials.len() == n) {
                return Err(GeometryError::InstanceCountMismatch {
                    cell_id: cell.id,
                    what: "material",
                    given: cell.materials.len(),
                    n_instances: n,
                });
            }
            if !(temps.is_empty() || temps.len() == 1 || temps.len() == n) {
                return Err(GeometryError::InstanceCountMismatch {
                    cell_id: cell.id,
                    what: "temperature",
                    given: temps.len(),
                    n_instances: n,
                });
            }
            for &t in &temps {
                check_temperature(cell.id, t, &settings)?;
            }
            if temps.is_empty() && cell.fill == Fill::Material {
                check_temperature(cell.id, settings.default_temperature, &settings)?;
                temps.push(settings.default_temperature);
            }
            cell.sqrt_kt = temps.iter().map(|t| (K_BOLTZMANN * t).sqrt()).collect();
        }

        let partitioners: Vec<Option<UniversePartitioner>> = universes
            .par_iter()
            .map(|univ| {
                if univ.cells.len() >= settings.partitioner_min_cells {
                    UniversePartitioner::build(&surfaces, &cells, &univ.cells)
                } else {
                    None
                }
            })
            .collect();
        for (univ, partitioner) in universes.iter_mut().zip(partitioners) {
            if let Some(p) = &partitioner {
                log::debug!(
                    "Universe {}: {} cells in {} partitions along {:?}",
                    univ.id,
                    univ.cells.len(),
                    p.n_partitions(),
                    p.axis()
                );
            }
            univ.partitioner = partitioner;
        }

        log::info!(
            "Built geometry with {} surfaces, {} cells, {} universes, {} lattices; root universe {}; {} distributed cells",
            surfaces.len(),
            cells.len(),
            universes.len(),
            lattices.len(),
            universes[root].id,
            n_distribcell_maps
        );

        Ok(Geometry {
            surfaces,
            cells,
            universes,
            lattices,
            surface_map,
            cell_map,
            universe_map,
            lattice_map,
            root,
            n_distribcell_maps,
            settings,
        })
    }
}

fn index_ids(kind: &'static str, ids: impl Iterator<Item = i32>) -> Result<HashMap<i32, usize>> {
    let mut map = HashMap::new();
    for (index, id) in ids.enumerate() {
        if map.insert(id, index).is_some() {
            return Err(GeometryError::DuplicateId { kind, id });
        }
    }
    Ok(map)
}

fn make_cell(
    spec: CellSpec,
    external: Option<Box<dyn ExternalCell>>,
    universe: usize,
    surface_map: &HashMap<i32, usize>,
    universe_map: &HashMap<i32, usize>,
    lattice_map: &HashMap<i32, usize>,
) -> Result<Cell> {
    let id = spec.id;

    let shape = match external {
        Some(backend) => CellShape::External(backend),
        None => {
            // Surface IDs become 1-based indices into the surface list.
            let tokens = tokenize(id, &spec.region)?
                .into_iter()
                .map(|token| match token {
                    Token::Halfspace(h) => {
                        let index = surface_map
                            .get(&h.abs())
                            .ok_or(GeometryError::UnknownSurface { cell_id: id, surface_id: h.abs() })?;
                        let reference = *index as i32 + 1;
                        Ok(Token::Halfspace(if h > 0 { reference } else { -reference }))
                    }
                    other => Ok(other),
                })
                .collect::<Result<Vec<_>>>()?;
            CellShape::Csg(Region::new(id, tokens)?)
        }
    };

    let (fill, materials) = match spec.fill {
        FillSpec::Material(materials) => (Fill::Material, materials),
        FillSpec::Universe(u) => {
            let index = universe_map.get(&u).ok_or(GeometryError::UnknownUniverse { universe_id: u })?;
            (Fill::Universe(*index), Vec::new())
        }
        FillSpec::Lattice(l) => {
            let index = lattice_map.get(&l).ok_or(GeometryError::UnknownLattice { cell_id: id, lattice_id: l })?;
            (Fill::Lattice(*index), Vec::new())
        }
    };

    let rotation = match spec.rotation.as_deref() {
        None => None,
        Some(&[phi, theta, psi]) => Some(Rotation::from_angles([phi, theta, psi])),
        Some(m) if m.len() == 9 => {
            let rotation = Rotation::from_matrix([[m[0], m[1], m[2]], [m[3], m[4], m[5]], [m[6], m[7], m[8]]]);
            if !rotation.is_orthonormal(ROTATION_TOLERANCE) {
                return Err(GeometryError::InvalidTransform {
                    cell_id: id,
                    reason: "rotation matrix is not orthonormal".to_string(),
                });
            }
            Some(rotation)
        }
        Some(other) => {
            return Err(GeometryError::InvalidTransform {
                cell_id: id,
                reason: format!("rotation takes 3 angles or 9 matrix entries, got {} values", other.len()),
            });
        }
    };
    if fill == Fill::Material && (rotation.is_some() || spec.translation.is_some()) {
        return Err(GeometryError::InvalidTransform {
            cell_id: id,
            reason: "only cells filled with a universe or lattice can be translated or rotated".to_string(),
        });
    }

    Ok(Cell {
        id,
        name: spec.name,
        universe,
        fill,
        materials,
        sqrt_kt: Vec::new(),
        translation: spec.translation.unwrap_or([0.0; 3]),
        rotation,
        n_instances: 0,
        distribcell_index: None,
        offsets: Vec::new(),
        shape,
        neighbors: NeighborList::new(),
    })
}

/// Universes placed directly inside a cell, with repetitions.
fn fill_children(cell: &Cell, lattices: &[RectLattice]) -> Vec<usize> {
    match cell.fill {
        Fill::Material => Vec::new(),
        Fill::Universe(u) => vec![u],
        Fill::Lattice(l) => lattices[l].children().collect(),
    }
}

/// The universe that nothing fills.
fn find_root(universes: &[Universe], cells: &[Cell], lattices: &[RectLattice]) -> Result<usize> {
    let mut used = vec![false; universes.len()];
    for cell in cells {
        for u in fill_children(cell, lattices) {
            used[u] = true;
        }
    }
    for lattice in lattices {
        for u in lattice.children() {
            used[u] = true;
        }
    }

    let candidates: Vec<usize> = (0..universes.len()).filter(|&u| !used[u]).collect();
    match candidates.as_slice() {
        [root] => Ok(*root),
        [] if universes.is_empty() => Err(GeometryError::NoRootUniverse { reason: "no cells were defined".to_string() }),
        [] => Err(GeometryError::NoRootUniverse {
            reason: "every universe fills a cell or lattice".to_string(),
        }),
        _ => Err(GeometryError::NoRootUniverse {
            reason: format!(
                "universes {:?} are all unused, name one of them as root",
                candidates.iter().map(|&u| universes[u].id).collect::<Vec<_>>()
            ),
        }),
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    New,
    Active,
    Done,
}

/// Universes ordered so that every universe comes after all universes nested in it.
fn postorder(universes: &[Universe], cells: &[Cell], lattices: &[RectLattice]) -> Result<Vec<usize>> {
    fn visit(
        u: usize,
        marks: &mut [Mark],
        order: &mut Vec<usize>,
        universes: &[Universe],
        cells: &[Cell],
        lattices: &[RectLattice],
    ) -> Result<()> {
        match marks[u] {
            Mark::Done => return Ok(()),
            Mark::Active => return Err(GeometryError::RecursiveFill { universe_id: universes[u].id }),
            Mark::New => {}
        }
        marks[u] = Mark::Active;
        for &c in &universes[u].cells {
            for child in fill_children(&cells[c], lattices) {
                visit(child, marks, order, universes, cells, lattices)?;
            }
        }
        marks[u] = Mark::Done;
        order.push(u);
        Ok(())
    }

    let mut marks = vec![Mark::New; universes.len()];
    let mut order = Vec::with_capacity(universes.len());
    for u in 0..universes.len() {
        visit(u, &mut marks, &mut order, universes, cells, lattices)?;
    }
    Ok(order)
}

/// Sets the number of occurrences of every cell below the root universe.
fn count_instances(root: usize, order: &[usize], universes: &[Universe], cells: &mut [Cell], lattices: &[RectLattice]) {
    let mut count = vec![0usize; universes.len()];
    count[root] = 1;
    // Parents before children.
    for &u in order.iter().rev() {
        let n = count[u];
        if n == 0 {
            continue;
        }
        for &c in &universes[u].cells {
            cells[c].n_instances = n;
            for child in fill_children(&cells[c], lattices) {
                count[child] += n;
            }
        }
    }
}

/// Gives every cell with several instances a distribcell map and fills the offset tables
/// of fill cells and lattices. Returns the number of maps.
fn assign_offsets(order: &[usize], universes: &[Universe], cells: &mut [Cell], lattices: &mut [RectLattice]) -> usize {
    let targets: Vec<usize> = (0..cells.len()).filter(|&c| cells[c].n_instances > 1).collect();
    let n_maps = targets.len();

    for (map, &t) in targets.iter().enumerate() {
        cells[t].distribcell_index = Some(map);
    }
    for cell in cells.iter_mut() {
        if cell.fill != Fill::Material {
            cell.offsets = vec![0; n_maps];
        }
    }
    for lattice in lattices.iter_mut() {
        lattice.offsets = vec![vec![0; lattice.n_tiles() + 1]; n_maps];
    }

    for (map, &target) in targets.iter().enumerate() {
        // Occurrences of the target inside each universe, children before parents.
        let mut within = vec![0usize; universes.len()];
        for &u in order {
            let mut running = 0;
            for &c in &universes[u].cells {
                let own = usize::from(c == target);
                let nested = match cells[c].fill {
                    Fill::Material => 0,
                    Fill::Universe(v) => {
                        cells[c].offsets[map] = running;
                        within[v]
                    }
                    Fill::Lattice(l) => {
                        cells[c].offsets[map] = running;
                        let totals: Vec<usize> = lattices[l].children().map(|v| within[v]).collect();
                        let offsets = &mut lattices[l].offsets[map];
                        let mut acc = 0;
                        for (tile, n) in totals.into_iter().enumerate() {
                            offsets[tile] = acc;
                            acc += n;
                        }
                        acc
                    }
                };
                running += own + nested;
            }
            within[u] = running;
        }
    }
    n_maps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SurfaceKind, SurfaceSpec};

    fn plane(id: i32, z0: f64) -> Surface {
        SurfaceSpec::new(id, SurfaceKind::ZPlane { z0 }).to_surface()
    }

    #[test]
    fn test_geometry_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Geometry>();
    }

    #[test]
    fn test_duplicate_ids() {
        let err = Geometry::builder().surface(plane(1, 0.0)).surface(plane(1, 1.0)).build();
        assert!(matches!(err, Err(GeometryError::DuplicateId { kind: "surface", id: 1 })));

        let err = Geometry::builder()
            .surface(plane(1, 0.0))
            .cell(CellSpec::material(5, "-1", None))
            .cell(CellSpec::material(5, "1", None))
            .build();
        assert!(matches!(err, Err(GeometryError::DuplicateId { kind: "cell", id: 5 })));
    }

    #[test]
    fn test_unknown_references() {
        let err = Geometry::builder()
            .surface(plane(1, 0.0))
            .cell(CellSpec::material(1, "-1 2", None))
            .build();
        assert!(matches!(err, Err(GeometryError::UnknownSurface { cell_id: 1, surface_id: 2 })));

        let err = Geometry::builder()
            .cell(CellSpec::new(1, "", FillSpec::Universe(7)))
            .build();
        assert!(matches!(err, Err(GeometryError::UnknownUniverse { universe_id: 7 })));

        let err = Geometry::builder()
            .cell(CellSpec::new(1, "", FillSpec::Lattice(3)))
            .build();
        assert!(matches!(err, Err(GeometryError::UnknownLattice { cell_id: 1, lattice_id: 3 })));
    }

    #[test]
    fn test_recursive_fill() {
        let err = Geometry::builder()
            .cell(CellSpec::new(1, "", FillSpec::Universe(1)))
            .cell(CellSpec::new(2, "", FillSpec::Universe(2)).in_universe(1))
            .cell(CellSpec::new(3, "", FillSpec::Universe(1)).in_universe(2))
            .root(0)
            .build();
        assert!(matches!(err, Err(GeometryError::RecursiveFill { .. })));
    }

    #[test]
    fn test_root_detection() {
        let err = Geometry::builder().build();
        assert!(matches!(err, Err(GeometryError::NoRootUniverse { .. })));

        let err = Geometry::builder()
            .cell(CellSpec::material(1, "", None))
            .cell(CellSpec::material(2, "", None).in_universe(4))
            .build();
        assert!(matches!(err, Err(GeometryError::NoRootUniverse { .. })));

        let geometry = Geometry::builder()
            .cell(CellSpec::material(1, "", None))
            .cell(CellSpec::material(2, "", None).in_universe(4))
            .root(4)
            .build()
            .unwrap();
        assert_eq!(geometry.universes()[geometry.root()].id(), 4);
        // The other universe is never reached.
        assert_eq!(geometry.cell(0).n_instances(), 0);
    }

    #[test]
    fn test_transform_only_on_fill_cells() {
        let err = Geometry::builder()
            .cell(CellSpec::material(1, "", None).with_translation([1.0, 0.0, 0.0]))
            .build();
        assert!(matches!(err, Err(GeometryError::InvalidTransform { cell_id: 1, .. })));

        let err = Geometry::builder()
            .cell(CellSpec::new(1, "", FillSpec::Universe(2)).with_rotation(vec![0.0, 90.0]))
            .cell(CellSpec::material(2, "", None).in_universe(2))
            .build();
        assert!(matches!(err, Err(GeometryError::InvalidTransform { cell_id: 1, .. })));
    }

    #[test]
    fn test_temperature_validation() {
        let err = Geometry::builder()
            .cell(CellSpec::material(1, "", None).with_temperature(vec![300.0, 400.0]))
            .build();
        assert!(matches!(
            err,
            Err(GeometryError::InstanceCountMismatch { cell_id: 1, what: "temperature", given: 2, n_instances: 1 })
        ));

        let settings = GeometrySettings { temperature_range: Some([250.0, 2500.0]), ..Default::default() };
        let err = Geometry::builder()
            .settings(settings.clone())
            .cell(CellSpec::material(1, "", None).with_temperature(vec![3000.0]))
            .build();
        assert!(matches!(err, Err(GeometryError::InvalidTemperature { cell_id: 1, .. })));

        let mut geometry = Geometry::builder()
            .settings(settings)
            .cell(CellSpec::material(1, "", Some(0)))
            .build()
            .unwrap();
        assert!((geometry.temperature(0, None).unwrap() - 293.6).abs() < 1e-9);
        assert!(geometry.set_temperature(0, 100.0, None).is_err());
        geometry.set_temperature(0, 900.0, None).unwrap();
        assert!((geometry.temperature(0, Some(0)).unwrap() - 900.0).abs() < 1e-9);
    }

    #[test]
    fn test_default_temperature_must_be_in_range() {
        let settings = GeometrySettings { temperature_range: Some([500.0, 2500.0]), ..Default::default() };
        let err = Geometry::builder()
            .settings(settings.clone())
            .cell(CellSpec::material(1, "", Some(0)))
            .build();
        assert!(matches!(err, Err(GeometryError::InvalidTemperature { cell_id: 1, .. })), "{:?}", err.err());

        // Cells with their own temperature do not fall back on the default.
        let geometry = Geometry::builder()
            .settings(GeometrySettings { default_temperature: 600.0, ..settings })
            .cell(CellSpec::material(1, "", Some(0)))
            .cell(CellSpec::material(2, "", Some(0)).in_universe(3).with_temperature(vec![900.0]))
            .root(0)
            .build()
            .unwrap();
        assert!((geometry.temperature(0, None).unwrap() - 600.0).abs() < 1e-9);
    }

    #[test]
    fn test_rotation_matrix_must_be_orthonormal() {
        let fill = |rotation: Vec<f64>| {
            Geometry::builder()
                .cell(CellSpec::new(1, "", FillSpec::Universe(2)).with_rotation(rotation))
                .cell(CellSpec::material(2, "", None).in_universe(2))
                .build()
        };
        let err = fill(vec![2.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        assert!(matches!(err, Err(GeometryError::InvalidTransform { cell_id: 1, .. })));
        let err = fill(vec![1.0, 0.2, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        assert!(matches!(err, Err(GeometryError::InvalidTransform { cell_id: 1, .. })));
        assert!(fill(vec![0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0]).is_ok());
    }

    #[test]
    fn test_empty_material_list_is_rejected() {
        let err = Geometry::builder()
            .cell(CellSpec::new(1, "", FillSpec::Material(Vec::new())))
            .build();
        assert!(matches!(err, Err(GeometryError::InstanceCountMismatch { what: "material", given: 0, .. })));
    }

    #[test]
    fn test_universe_fill_applies_translation() {
        // Root: everything below z = 0 holds universe 1 shifted up by 10.
        let geometry = Geometry::builder()
            .surface(plane(1, 0.0))
            .surface(plane(2, 5.0))
            .cell(CellSpec::new(1, "-1", FillSpec::Universe(1)).with_translation([0.0, 0.0, -10.0]))
            .cell(CellSpec::material(2, "1", Some(0)))
            .cell(CellSpec::material(3, "-2", Some(1)).in_universe(1))
            .cell(CellSpec::material(4, "2", Some(2)).in_universe(1))
            .build()
            .unwrap();

        let u = [0.0, 0.0, 1.0];
        // z = -6 is z = 4 in the filling universe, below its plane at 5.
        let loc = geometry.find_cell(&[0.0, 0.0, -6.0], &u, 0, None).unwrap();
        assert_eq!(geometry.cell(loc.cell).id(), 3);
        assert_eq!(loc.depth(), 2);
        assert!((loc.levels[1].r[2] - 4.0).abs() < 1e-12);

        let loc = geometry.find_cell(&[0.0, 0.0, -4.0], &u, 0, None).unwrap();
        assert_eq!(geometry.cell(loc.cell).id(), 4);
    }
}
