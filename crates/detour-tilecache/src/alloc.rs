//! Pluggable memory accounting for the tile cache builders
//!
//! Every buffer a builder creates is charged to a [`TileCacheAlloc`] before it
//! is reserved. This lets callers cap per-tile memory with an arena
//! ([`LinearAllocator`]) and discard a failed build with a single `reset`.

use std::mem::size_of;
use tilecache_common::{Result, Status};

/// Allocator capability passed into every builder entry point.
pub trait TileCacheAlloc {
    /// Charges `size` bytes. Returning an error reports out-of-memory.
    fn alloc(&mut self, size: usize) -> Result<()>;

    /// Returns `size` bytes previously charged with [`TileCacheAlloc::alloc`].
    fn free(&mut self, size: usize);

    /// Releases everything at once.
    fn reset(&mut self) {}
}

/// Default allocator backed by the process heap.
///
/// It never refuses a request itself but tracks live and peak usage.
#[derive(Debug, Default, Clone)]
pub struct HeapAllocator {
    live: usize,
    peak: usize,
}

impl HeapAllocator {
    /// Creates a new heap allocator
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently charged
    pub fn live_bytes(&self) -> usize {
        self.live
    }

    /// Largest number of bytes charged at once
    pub fn peak_bytes(&self) -> usize {
        self.peak
    }
}

impl TileCacheAlloc for HeapAllocator {
    fn alloc(&mut self, size: usize) -> Result<()> {
        self.live = self.live.checked_add(size).ok_or(Status::OutOfMemory)?;
        self.peak = self.peak.max(self.live);
        Ok(())
    }

    fn free(&mut self, size: usize) {
        self.live = self.live.saturating_sub(size);
    }

    fn reset(&mut self) {
        self.live = 0;
    }
}

/// Fixed-capacity arena allocator.
///
/// Individual frees are ignored; memory only comes back through
/// [`TileCacheAlloc::reset`], typically once per tile.
#[derive(Debug, Clone)]
pub struct LinearAllocator {
    capacity: usize,
    top: usize,
    high: usize,
}

impl LinearAllocator {
    /// Creates an arena that accepts up to `capacity` bytes between resets
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            top: 0,
            high: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes handed out since the last reset
    pub fn used(&self) -> usize {
        self.top
    }

    /// Highest usage observed over the arena's lifetime
    pub fn high_water_mark(&self) -> usize {
        self.high
    }
}

impl TileCacheAlloc for LinearAllocator {
    fn alloc(&mut self, size: usize) -> Result<()> {
        let top = self.top.checked_add(size).ok_or(Status::OutOfMemory)?;
        if top > self.capacity {
            log::debug!(
                "Linear allocator exhausted: {} + {} > {} bytes",
                self.top,
                size,
                self.capacity
            );
            return Err(Status::OutOfMemory);
        }
        self.top = top;
        self.high = self.high.max(top);
        Ok(())
    }

    fn free(&mut self, _size: usize) {}

    fn reset(&mut self) {
        self.top = 0;
    }
}

/// Number of bytes a buffer of `len` elements of `T` is charged
#[inline]
pub(crate) fn byte_size<T>(len: usize) -> usize {
    len.saturating_mul(size_of::<T>())
}

/// Creates a buffer of `len` copies of `value`, charged to `alloc`.
pub fn alloc_buffer<T: Clone>(
    alloc: &mut dyn TileCacheAlloc,
    len: usize,
    value: T,
) -> Result<Vec<T>> {
    alloc.alloc(byte_size::<T>(len))?;
    let mut buf = Vec::new();
    if let Err(err) = buf.try_reserve_exact(len) {
        alloc.free(byte_size::<T>(len));
        return Err(err.into());
    }
    buf.resize(len, value);
    Ok(buf)
}

/// Creates an empty buffer with room for `capacity` elements, charged to `alloc`.
pub fn alloc_with_capacity<T>(alloc: &mut dyn TileCacheAlloc, capacity: usize) -> Result<Vec<T>> {
    alloc.alloc(byte_size::<T>(capacity))?;
    let mut buf = Vec::new();
    if let Err(err) = buf.try_reserve_exact(capacity) {
        alloc.free(byte_size::<T>(capacity));
        return Err(err.into());
    }
    Ok(buf)
}

/// Makes room for `additional` more elements, growing in steps of `step`
/// elements and charging each growth to `alloc`.
pub(crate) fn grow_buffer<T>(
    alloc: &mut dyn TileCacheAlloc,
    buf: &mut Vec<T>,
    additional: usize,
    step: usize,
) -> Result<()> {
    let needed = buf.len() + additional;
    let old_cap = buf.capacity();
    if needed <= old_cap {
        return Ok(());
    }
    let mut new_cap = old_cap;
    while new_cap < needed {
        new_cap += step.max(1);
    }
    alloc.alloc(byte_size::<T>(new_cap - old_cap))?;
    if let Err(err) = buf.try_reserve_exact(new_cap - buf.len()) {
        alloc.free(byte_size::<T>(new_cap - old_cap));
        return Err(err.into());
    }
    Ok(())
}

/// Returns a buffer's bytes to `alloc` and drops it.
pub fn free_buffer<T>(alloc: &mut dyn TileCacheAlloc, buf: Vec<T>) {
    alloc.free(byte_size::<T>(buf.capacity()));
}
