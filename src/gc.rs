//! Mark-and-sweep heap with size-classed arenas.
//!
//! Every heap cell (string, object, shape, environment, for-in iterator)
//! lives in a block of a fixed-size arena. Blocks are grouped by size class:
//! a request is rounded up to the next power of two and served from that
//! class's free list, which is refilled by committing a whole arena at once.
//!
//! Cells are addressed through [`CellRef`] handles (size class, block index
//! and generation), never raw pointers. The generation is bumped whenever a
//! block is swept, so a handle that outlived its cell fails validation
//! instead of aliasing whatever reuses the block. Collection never moves
//! cells, so handles on the VM stack stay valid across a collection.
//!
//! Roots come from three places:
//! - temp roots: every freshly allocated cell and every value popped off the
//!   VM stack, released at instruction boundaries;
//! - persistent roots registered by the host;
//! - whatever the caller of [`Heap::collect`] traces (VM stack, frames, realm).

use std::mem;

use crate::env::Environment;
use crate::error::JsError;
use crate::object::{JsObject, NameIterator};
use crate::shape::Shape;
use crate::value::{JsString, Value};

// ============================================================================
// Constants
// ============================================================================

/// Blocks per arena (hardcoded for bitmask marking: 4 × 64 bits)
pub const BLOCKS_PER_ARENA: usize = 256;

/// Smallest block size in bytes; class `k` serves blocks of `MIN_BLOCK_SIZE << k`
pub const MIN_BLOCK_SIZE: usize = 16;

/// Number of size classes (16 bytes up to 2 KiB)
pub const SIZE_CLASS_COUNT: usize = 8;

/// Default threshold: collect after this many allocations
pub const DEFAULT_GC_THRESHOLD: usize = 256;

// ============================================================================
// ArenaBitmask - 256-bit mark bitmap for one arena
// ============================================================================

/// 256-bit bitmask for marking blocks within an arena.
/// Each bit corresponds to a block index (0-255).
#[derive(Clone, Copy, Default)]
struct ArenaBitmask {
    /// 4 × u64 = 256 bits
    bits: [u64; 4],
}

impl ArenaBitmask {
    #[inline]
    fn set(&mut self, index: usize) {
        if let Some(word) = self.bits.get_mut(index >> 6) {
            *word |= 1 << (index & 63);
        }
    }

    #[inline]
    fn get(&self, index: usize) -> bool {
        self.bits
            .get(index >> 6)
            .is_some_and(|word| word & (1 << (index & 63)) != 0)
    }

    #[inline]
    fn clear(&mut self) {
        self.bits = [0; 4];
    }

    /// Iterate over unmarked indices (bits that are 0)
    fn iter_unmarked(&self) -> UnmarkedIter<'_> {
        UnmarkedIter {
            bitmask: self,
            current_word: 0,
            current_bits: !self.bits[0],
        }
    }
}

/// Iterator over unmarked (zero) bits in an ArenaBitmask
struct UnmarkedIter<'a> {
    bitmask: &'a ArenaBitmask,
    current_word: usize,
    /// Inverted bits of the current word (1 = unmarked)
    current_bits: u64,
}

impl Iterator for UnmarkedIter<'_> {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        loop {
            if self.current_bits != 0 {
                let bit_pos = self.current_bits.trailing_zeros() as usize;
                self.current_bits &= self.current_bits - 1;
                return Some((self.current_word << 6) + bit_pos);
            }
            self.current_word += 1;
            let word = self.bitmask.bits.get(self.current_word)?;
            self.current_bits = !word;
        }
    }
}

// ============================================================================
// Handles
// ============================================================================

/// Type tag carried by every cell and every handle to it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    String,
    Object,
    Shape,
    Environment,
    Iterator,
}

/// Non-owning handle to a heap cell.
///
/// Copyable and comparable; two handles are equal only if they name the same
/// block in the same generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRef {
    kind: CellKind,
    class: u8,
    index: u32,
    generation: u32,
}

impl CellRef {
    #[inline]
    pub fn kind(self) -> CellKind {
        self.kind
    }

    /// Size class the cell was allocated from
    #[inline]
    pub fn size_class(self) -> usize {
        self.class as usize
    }

    #[inline]
    fn arena(self) -> usize {
        self.index as usize / BLOCKS_PER_ARENA
    }

    #[inline]
    fn block(self) -> usize {
        self.index as usize % BLOCKS_PER_ARENA
    }
}

/// Identifier of a persistent root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootId(usize);

/// Level of the temp-root stack, restored by [`Heap::release_temps`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct TempMark(usize);

// ============================================================================
// Cells and tracing
// ============================================================================

/// Payload of a heap block
pub enum HeapCell {
    String(JsString),
    Object(JsObject),
    Shape(Shape),
    Environment(Environment),
    Iterator(NameIterator),
}

impl HeapCell {
    pub fn kind(&self) -> CellKind {
        match self {
            HeapCell::String(_) => CellKind::String,
            HeapCell::Object(_) => CellKind::Object,
            HeapCell::Shape(_) => CellKind::Shape,
            HeapCell::Environment(_) => CellKind::Environment,
            HeapCell::Iterator(_) => CellKind::Iterator,
        }
    }

    /// Inline footprint of the payload, used to pick a size class
    pub fn footprint(&self) -> usize {
        match self {
            HeapCell::String(_) => mem::size_of::<JsString>(),
            HeapCell::Object(_) => mem::size_of::<JsObject>(),
            HeapCell::Shape(_) => mem::size_of::<Shape>(),
            HeapCell::Environment(_) => mem::size_of::<Environment>(),
            HeapCell::Iterator(_) => mem::size_of::<NameIterator>(),
        }
    }

    pub(crate) fn trace(&self, tracer: &mut Tracer) {
        match self {
            HeapCell::String(_) => {}
            HeapCell::Object(o) => o.trace(tracer),
            HeapCell::Shape(s) => s.trace(tracer),
            HeapCell::Environment(e) => e.trace(tracer),
            HeapCell::Iterator(it) => it.trace(tracer),
        }
    }
}

/// Size class serving a request of `bytes`
pub fn size_class_for(bytes: usize) -> usize {
    let rounded = bytes.max(MIN_BLOCK_SIZE).next_power_of_two();
    let class = (rounded.trailing_zeros() - MIN_BLOCK_SIZE.trailing_zeros()) as usize;
    class.min(SIZE_CLASS_COUNT - 1)
}

/// Trait for cells that hold references to other cells.
///
/// Implementations report every strong edge to the tracer. Edges that should
/// not keep their target alive (shape transition caches) are left out.
pub trait Trace {
    fn trace(&self, tracer: &mut Tracer);
}

/// Worklist of cells discovered during marking
pub struct Tracer {
    worklist: Vec<CellRef>,
}

impl Tracer {
    #[inline]
    pub fn edge(&mut self, cell: CellRef) {
        self.worklist.push(cell);
    }

    #[inline]
    pub fn value(&mut self, value: Value) {
        if let Value::Cell(cell) = value {
            self.worklist.push(cell);
        }
    }

    pub fn values<'a>(&mut self, values: impl IntoIterator<Item = &'a Value>) {
        for value in values {
            self.value(*value);
        }
    }
}

// ============================================================================
// Arenas and size classes
// ============================================================================

struct Block {
    generation: u32,
    cell: Option<HeapCell>,
}

/// A fixed run of blocks committed at once
struct Arena {
    blocks: Vec<Block>,
    marks: ArenaBitmask,
}

impl Arena {
    fn commit() -> Self {
        let mut blocks = Vec::with_capacity(BLOCKS_PER_ARENA);
        blocks.resize_with(BLOCKS_PER_ARENA, || Block {
            generation: 0,
            cell: None,
        });
        Self {
            blocks,
            marks: ArenaBitmask::default(),
        }
    }
}

struct SizeClass {
    block_size: usize,
    arenas: Vec<Arena>,
    /// Free block indices (arena * BLOCKS_PER_ARENA + block), popped from the end
    free: Vec<u32>,
    live: usize,
}

impl SizeClass {
    fn new(class: usize) -> Self {
        Self {
            block_size: MIN_BLOCK_SIZE << class,
            arenas: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    fn commit_arena(&mut self) {
        let arena_index = self.arenas.len();
        self.arenas.push(Arena::commit());
        let base = (arena_index * BLOCKS_PER_ARENA) as u32;
        // Reverse so the lowest block is handed out first
        self.free
            .extend((0..BLOCKS_PER_ARENA as u32).rev().map(|i| base + i));
        tracing::trace!(
            block_size = self.block_size,
            arenas = self.arenas.len(),
            "committed arena"
        );
    }

    fn block(&self, cell: CellRef) -> Option<&Block> {
        self.arenas.get(cell.arena())?.blocks.get(cell.block())
    }

    fn block_mut(&mut self, cell: CellRef) -> Option<&mut Block> {
        self.arenas
            .get_mut(cell.arena())?
            .blocks
            .get_mut(cell.block())
    }
}

// ============================================================================
// Heap
// ============================================================================

/// Statistics for one size class
#[derive(Debug, Clone)]
pub struct ClassStats {
    pub block_size: usize,
    pub arenas: usize,
    pub live: usize,
}

/// Statistics about the garbage collector
#[derive(Debug, Clone)]
pub struct GcStats {
    /// Cells currently allocated
    pub live_cells: usize,
    /// Committed blocks not holding a cell
    pub free_blocks: usize,
    /// Committed arenas across all classes
    pub arenas: usize,
    /// Completed collection cycles
    pub collections: u64,
    /// Cells reclaimed over the heap's lifetime
    pub total_freed: u64,
    pub classes: Vec<ClassStats>,
}

/// The cell store and its collector
pub struct Heap {
    classes: Vec<SizeClass>,
    /// Roots that live until the enclosing instruction (or host call) ends
    temp_roots: Vec<Value>,
    /// Host-registered roots; `None` marks a released slot
    persistent: Vec<Option<Value>>,
    persistent_free: Vec<usize>,
    /// Persistent mark worklist, reused between cycles to keep its capacity
    mark_stack: Vec<CellRef>,
    allocs_since_gc: usize,
    /// Threshold for triggering collection (0 = never auto-collect)
    gc_threshold: usize,
    collections: u64,
    total_freed: u64,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            classes: (0..SIZE_CLASS_COUNT).map(SizeClass::new).collect(),
            temp_roots: Vec::new(),
            persistent: Vec::new(),
            persistent_free: Vec::new(),
            mark_stack: Vec::new(),
            allocs_since_gc: 0,
            gc_threshold: DEFAULT_GC_THRESHOLD,
            collections: 0,
            total_freed: 0,
        }
    }

    // ------------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------------

    /// Store `cell` in a block of its size class and return a handle to it.
    ///
    /// Never collects; the new cell is pinned as a temp root. Callers that
    /// want threshold-driven collection check [`Heap::wants_collection`] first.
    pub fn allocate(&mut self, cell: HeapCell) -> Result<CellRef, JsError> {
        let kind = cell.kind();
        let class_index = size_class_for(cell.footprint());
        let class = self
            .classes
            .get_mut(class_index)
            .ok_or_else(|| JsError::internal_error("size class out of range"))?;
        if class.free.is_empty() {
            class.commit_arena();
        }
        let index = class
            .free
            .pop()
            .ok_or_else(|| JsError::internal_error("arena commit produced no blocks"))?;
        let probe = CellRef {
            kind,
            class: class_index as u8,
            index,
            generation: 0,
        };
        let block = class
            .block_mut(probe)
            .ok_or_else(|| JsError::internal_error("free list names a missing block"))?;
        block.cell = Some(cell);
        let handle = CellRef {
            generation: block.generation,
            ..probe
        };
        class.live += 1;
        self.allocs_since_gc += 1;
        self.temp_roots.push(Value::Cell(handle));
        Ok(handle)
    }

    /// Whether the allocation count since the last cycle reached the threshold
    #[inline]
    pub fn wants_collection(&self) -> bool {
        self.gc_threshold > 0 && self.allocs_since_gc >= self.gc_threshold
    }

    /// Set the GC threshold (0 = disable automatic collection)
    pub fn set_gc_threshold(&mut self, threshold: usize) {
        self.gc_threshold = threshold;
    }

    pub fn gc_threshold(&self) -> usize {
        self.gc_threshold
    }

    // ------------------------------------------------------------------------
    // Access
    // ------------------------------------------------------------------------

    fn block(&self, cell: CellRef) -> Option<&Block> {
        let block = self.classes.get(cell.size_class())?.block(cell)?;
        if block.generation == cell.generation {
            Some(block)
        } else {
            None
        }
    }

    /// Whether the handle still names a live cell
    pub fn is_live(&self, cell: CellRef) -> bool {
        self.block(cell).is_some_and(|b| b.cell.is_some())
    }

    pub fn get(&self, cell: CellRef) -> Result<&HeapCell, JsError> {
        self.block(cell)
            .and_then(|b| b.cell.as_ref())
            .ok_or_else(|| stale(cell))
    }

    pub fn get_mut(&mut self, cell: CellRef) -> Result<&mut HeapCell, JsError> {
        let block = self
            .classes
            .get_mut(cell.size_class())
            .and_then(|class| class.block_mut(cell))
            .filter(|b| b.generation == cell.generation);
        block.and_then(|b| b.cell.as_mut()).ok_or_else(|| stale(cell))
    }

    pub fn string(&self, cell: CellRef) -> Result<&JsString, JsError> {
        match self.get(cell)? {
            HeapCell::String(s) => Ok(s),
            _ => Err(wrong_kind(cell, "string")),
        }
    }

    pub fn object(&self, cell: CellRef) -> Result<&JsObject, JsError> {
        match self.get(cell)? {
            HeapCell::Object(o) => Ok(o),
            _ => Err(wrong_kind(cell, "object")),
        }
    }

    pub fn object_mut(&mut self, cell: CellRef) -> Result<&mut JsObject, JsError> {
        match self.get_mut(cell)? {
            HeapCell::Object(o) => Ok(o),
            _ => Err(wrong_kind(cell, "object")),
        }
    }

    pub fn shape(&self, cell: CellRef) -> Result<&Shape, JsError> {
        match self.get(cell)? {
            HeapCell::Shape(s) => Ok(s),
            _ => Err(wrong_kind(cell, "shape")),
        }
    }

    pub fn shape_mut(&mut self, cell: CellRef) -> Result<&mut Shape, JsError> {
        match self.get_mut(cell)? {
            HeapCell::Shape(s) => Ok(s),
            _ => Err(wrong_kind(cell, "shape")),
        }
    }

    pub fn env(&self, cell: CellRef) -> Result<&Environment, JsError> {
        match self.get(cell)? {
            HeapCell::Environment(e) => Ok(e),
            _ => Err(wrong_kind(cell, "environment")),
        }
    }

    pub fn env_mut(&mut self, cell: CellRef) -> Result<&mut Environment, JsError> {
        match self.get_mut(cell)? {
            HeapCell::Environment(e) => Ok(e),
            _ => Err(wrong_kind(cell, "environment")),
        }
    }

    pub fn iterator_mut(&mut self, cell: CellRef) -> Result<&mut NameIterator, JsError> {
        match self.get_mut(cell)? {
            HeapCell::Iterator(it) => Ok(it),
            _ => Err(wrong_kind(cell, "iterator")),
        }
    }

    // ------------------------------------------------------------------------
    // Roots
    // ------------------------------------------------------------------------

    /// Current level of the temp-root stack
    #[inline]
    pub fn temp_mark(&self) -> TempMark {
        TempMark(self.temp_roots.len())
    }

    /// Drop temp roots pushed since `mark`
    #[inline]
    pub fn release_temps(&mut self, mark: TempMark) {
        self.temp_roots.truncate(mark.0);
    }

    /// Keep `value` alive until the current temp level is released
    #[inline]
    pub fn pin(&mut self, value: Value) {
        if let Value::Cell(_) = value {
            self.temp_roots.push(value);
        }
    }

    /// Drop every temp root, used when the VM is reset to empty
    pub fn release_all_temps(&mut self) {
        self.temp_roots.clear();
    }

    pub fn temp_root_count(&self) -> usize {
        self.temp_roots.len()
    }

    /// Register a root that survives until [`Heap::remove_root`]
    pub fn add_root(&mut self, value: Value) -> RootId {
        if let Some(slot) = self.persistent_free.pop() {
            if let Some(entry) = self.persistent.get_mut(slot) {
                *entry = Some(value);
                return RootId(slot);
            }
        }
        self.persistent.push(Some(value));
        RootId(self.persistent.len() - 1)
    }

    pub fn set_root(&mut self, id: RootId, value: Value) {
        if let Some(entry) = self.persistent.get_mut(id.0) {
            *entry = Some(value);
        }
    }

    pub fn root_value(&self, id: RootId) -> Option<Value> {
        self.persistent.get(id.0).copied().flatten()
    }

    pub fn remove_root(&mut self, id: RootId) {
        if let Some(entry) = self.persistent.get_mut(id.0) {
            if entry.take().is_some() {
                self.persistent_free.push(id.0);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Collection
    // ------------------------------------------------------------------------

    /// Run a full mark-and-sweep cycle.
    ///
    /// `trace_roots` reports the roots the heap cannot see on its own. Returns
    /// the number of cells reclaimed.
    pub fn collect<F: FnOnce(&mut Tracer)>(&mut self, trace_roots: F) -> usize {
        let live_before: usize = self.classes.iter().map(|c| c.live).sum();
        self.mark(trace_roots);
        self.clear_dead_transitions();
        let freed = self.sweep();
        self.allocs_since_gc = 0;
        self.collections += 1;
        self.total_freed += freed as u64;
        tracing::debug!(
            cycle = self.collections,
            live_before,
            freed,
            live_after = live_before - freed,
            "gc cycle"
        );
        freed
    }

    /// Mark phase: trace from roots with an explicit worklist
    fn mark<F: FnOnce(&mut Tracer)>(&mut self, trace_roots: F) {
        for class in &mut self.classes {
            for arena in &mut class.arenas {
                arena.marks.clear();
            }
        }

        // Take the persistent worklist to keep its capacity between cycles
        let mut tracer = Tracer {
            worklist: mem::take(&mut self.mark_stack),
        };
        tracer.worklist.clear();
        tracer.values(&self.temp_roots);
        tracer.values(self.persistent.iter().flatten());
        trace_roots(&mut tracer);

        while let Some(cell) = tracer.worklist.pop() {
            let Some(class) = self.classes.get_mut(cell.size_class()) else {
                continue;
            };
            let Some(arena) = class.arenas.get_mut(cell.arena()) else {
                continue;
            };
            let index = cell.block();
            if arena.marks.get(index) {
                continue;
            }
            let Some(block) = arena.blocks.get(index) else {
                continue;
            };
            // Stale handles mark nothing
            if block.generation != cell.generation {
                continue;
            }
            let Some(data) = block.cell.as_ref() else {
                continue;
            };
            data.trace(&mut tracer);
            arena.marks.set(index);
        }

        self.mark_stack = tracer.worklist;
    }

    fn is_marked(&self, cell: CellRef) -> bool {
        let Some(arena) = self
            .classes
            .get(cell.size_class())
            .and_then(|c| c.arenas.get(cell.arena()))
        else {
            return false;
        };
        arena.marks.get(cell.block())
            && arena
                .blocks
                .get(cell.block())
                .is_some_and(|b| b.generation == cell.generation)
    }

    /// Transition caches hold their children weakly; forget the dead ones.
    fn clear_dead_transitions(&mut self) {
        let mut dead = Vec::new();
        for (class_index, class) in self.classes.iter().enumerate() {
            for (arena_index, arena) in class.arenas.iter().enumerate() {
                for (index, block) in arena.blocks.iter().enumerate() {
                    if !arena.marks.get(index) {
                        continue;
                    }
                    if let Some(HeapCell::Shape(shape)) = &block.cell {
                        for (key, target) in shape.transitions() {
                            if !self.is_marked(target) {
                                dead.push((class_index, arena_index, index, key));
                            }
                        }
                    }
                }
            }
        }
        // Second pass: mutate now that the immutable scan is over
        for (class_index, arena_index, index, key) in dead {
            let block = self
                .classes
                .get_mut(class_index)
                .and_then(|c| c.arenas.get_mut(arena_index))
                .and_then(|a| a.blocks.get_mut(index));
            if let Some(Block {
                cell: Some(HeapCell::Shape(shape)),
                ..
            }) = block
            {
                shape.forget_transition(key);
            }
        }
    }

    /// Sweep phase: reclaim unmarked blocks. Returns number of cells freed.
    fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for class in &mut self.classes {
            for (arena_index, arena) in class.arenas.iter_mut().enumerate() {
                let marks = arena.marks;
                for index in marks.iter_unmarked() {
                    let Some(block) = arena.blocks.get_mut(index) else {
                        continue;
                    };
                    if block.cell.take().is_some() {
                        block.generation = block.generation.wrapping_add(1);
                        class
                            .free
                            .push((arena_index * BLOCKS_PER_ARENA + index) as u32);
                        class.live -= 1;
                        freed += 1;
                    }
                }
            }
        }
        freed
    }

    /// Get statistics
    pub fn stats(&self) -> GcStats {
        let classes: Vec<ClassStats> = self
            .classes
            .iter()
            .map(|c| ClassStats {
                block_size: c.block_size,
                arenas: c.arenas.len(),
                live: c.live,
            })
            .collect();
        GcStats {
            live_cells: classes.iter().map(|c| c.live).sum(),
            free_blocks: self.classes.iter().map(|c| c.free.len()).sum(),
            arenas: classes.iter().map(|c| c.arenas).sum(),
            collections: self.collections,
            total_freed: self.total_freed,
            classes,
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

fn stale(cell: CellRef) -> JsError {
    JsError::internal_error(format!("stale {:?} handle", cell.kind()))
}

fn wrong_kind(cell: CellRef, expected: &str) -> JsError {
    JsError::internal_error(format!("expected {} cell, found {:?}", expected, cell.kind()))
}

// ============================================================================
// Tests
// ============================================================================
