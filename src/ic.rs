//! Pure-data inline caches.
//!
//! Each cacheable instruction of an [`Executable`](crate::code::Executable)
//! owns one entry remembering where the property it touched last time was
//! found: the receiver's shape and the slot offset, plus the holder for hits
//! on the receiver's direct prototype. An entry is only trusted after the
//! receiver's current shape compares equal to the cached one; since handles
//! carry a generation, a shape that died and whose block was reused never
//! compares equal.
//!
//! The VM fills entries on misses and probes them on the fast path; this
//! module only stores them.

use std::cell::Cell;

use crate::code::Op;
use crate::gc::CellRef;
use crate::prelude::FxHashMap;

/// Cached location of a named data property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheEntry {
    #[default]
    Empty,
    /// Own data property of an object with `shape`
    Own { shape: CellRef, offset: u32 },
    /// Data property of the receiver's prototype `holder`
    Proto {
        shape: CellRef,
        holder: CellRef,
        holder_shape: CellRef,
        offset: u32,
    },
}

/// Hit/miss counters of one executable's caches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub sites: usize,
    pub hits: u64,
    pub misses: u64,
}

impl std::ops::AddAssign for CacheStats {
    fn add_assign(&mut self, rhs: CacheStats) {
        self.sites += rhs.sites;
        self.hits += rhs.hits;
        self.misses += rhs.misses;
    }
}

#[derive(Debug, Default)]
pub struct InlineCache {
    /// Instruction offset to entry index
    sites: FxHashMap<u32, u32>,
    entries: Box<[Cell<CacheEntry>]>,
    hits: Cell<u64>,
    misses: Cell<u64>,
}

impl InlineCache {
    /// One entry per cacheable instruction in `code`
    pub fn for_instructions(instructions: impl Iterator<Item = (usize, Op)>) -> Self {
        let mut sites = FxHashMap::default();
        for (offset, op) in instructions {
            if op.is_cacheable() {
                let index = sites.len() as u32;
                sites.insert(offset as u32, index);
            }
        }
        let entries = (0..sites.len()).map(|_| Cell::new(CacheEntry::Empty)).collect();
        Self {
            sites,
            entries,
            hits: Cell::new(0),
            misses: Cell::new(0),
        }
    }

    #[inline]
    pub fn site(&self, pc: usize) -> Option<usize> {
        self.sites.get(&(pc as u32)).map(|i| *i as usize)
    }

    #[inline]
    pub fn get(&self, site: usize) -> CacheEntry {
        self.entries.get(site).map(Cell::get).unwrap_or_default()
    }

    pub fn set(&self, site: usize, entry: CacheEntry) {
        if let Some(cell) = self.entries.get(site) {
            cell.set(entry);
        }
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.set(self.hits.get() + 1);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.set(self.misses.get() + 1);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget every entry
    pub fn clear(&self) {
        for entry in self.entries.iter() {
            entry.set(CacheEntry::Empty);
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            sites: self.entries.len(),
            hits: self.hits.get(),
            misses: self.misses.get(),
        }
    }
}
