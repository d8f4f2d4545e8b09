use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

const CHUNK_SIZE: usize = 8;

/// Slot value meaning "claimed but not yet written" or "never claimed".
const EMPTY: usize = 0;

/// A fixed block of slots; further blocks are chained on demand.
struct Chunk {
    slots: [AtomicUsize; CHUNK_SIZE],
    claimed: AtomicUsize,
    next: OnceLock<Box<Chunk>>,
}

impl Chunk {
    fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| AtomicUsize::new(EMPTY)),
            claimed: AtomicUsize::new(0),
            next: OnceLock::new(),
        }
    }
}

/// Cells found on the other side of a cell's boundary during earlier searches.
///
/// The list is append-only and may be appended to from many tracking threads while
/// others read it. Order is irrelevant and duplicates are tolerated, so every operation
/// uses relaxed atomics: a reader may miss an entry that is being written concurrently,
/// which only costs it a slower search. The list never shrinks and never moves its
/// existing entries, so readers are never blocked.
pub struct NeighborList {
    head: Chunk,
}

impl NeighborList {
    pub fn new() -> Self {
        Self { head: Chunk::new() }
    }

    /// Adds a cell index unless it is already visible in the list.
    pub fn push(&self, cell: usize) {
        if self.contains(cell) {
            return;
        }
        // Stored shifted by one so that zero marks an empty slot.
        let value = cell + 1;
        let mut chunk = &self.head;
        loop {
            let slot = chunk.claimed.fetch_add(1, Ordering::Relaxed);
            if slot < CHUNK_SIZE {
                chunk.slots[slot].store(value, Ordering::Relaxed);
                return;
            }
            chunk = chunk.next.get_or_init(|| Box::new(Chunk::new()));
        }
    }

    pub fn contains(&self, cell: usize) -> bool {
        self.iter().any(|c| c == cell)
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Number of entries currently visible, duplicates included.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn iter(&self) -> NeighborIter<'_> {
        NeighborIter { chunk: Some(&self.head), slot: 0 }
    }
}

impl Default for NeighborList {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NeighborList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Iterator over the cell indices of a [`NeighborList`].
pub struct NeighborIter<'a> {
    chunk: Option<&'a Chunk>,
    slot: usize,
}

impl Iterator for NeighborIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while let Some(chunk) = self.chunk {
            let filled = chunk.claimed.load(Ordering::Relaxed).min(CHUNK_SIZE);
            while self.slot < filled {
                let value = chunk.slots[self.slot].load(Ordering::Relaxed);
                self.slot += 1;
                if value != EMPTY {
                    return Some(value - 1);
                }
            }
            if filled < CHUNK_SIZE {
                return None;
            }
            self.chunk = chunk.next.get().map(|c| c.as_ref());
            self.slot = 0;
        }
        None
    }
}
