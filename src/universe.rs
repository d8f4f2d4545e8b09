use crate::partitioner::UniversePartitioner;

/// An ordered collection of cells that together fill space.
///
/// Cells are searched in the order they were declared. Universes with enough cells carry
/// a [`UniversePartitioner`] restricting the search to the cells near a point.
#[derive(Debug)]
pub struct Universe {
    pub(crate) id: i32,
    pub(crate) cells: Vec<usize>,
    pub(crate) partitioner: Option<UniversePartitioner>,
}

impl Universe {
    pub(crate) fn new(id: i32) -> Self {
        Self { id, cells: Vec::new(), partitioner: None }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// Indices of the member cells.
    pub fn cells(&self) -> &[usize] {
        &self.cells
    }

    pub fn partitioner(&self) -> Option<&UniversePartitioner> {
        self.partitioner.as_ref()
    }
}
