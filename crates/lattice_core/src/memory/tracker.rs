//! # Tagged Allocation Tracking
//!
//! Chunk blocks are large, long-lived and allocated in bulk, so they bypass
//! the global allocator's bookkeeping and go through a [`MemoryTracker`].
//! Every allocation carries a [`MemoryTag`] so profiling can attribute bytes
//! to the subsystem that asked for them.

// SAFETY: Raw allocation and deallocation of chunk blocks.
#![allow(unsafe_code)]

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Subsystem an allocation is attributed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum MemoryTag {
    /// Component data blocks owned by chunks.
    Chunk = 0,
}

impl MemoryTag {
    const COUNT: usize = 1;

    /// All tags, in index order.
    pub const ALL: [Self; Self::COUNT] = [Self::Chunk];

    #[inline]
    const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Default)]
struct TagCounters {
    live_bytes: AtomicUsize,
    peak_bytes: AtomicUsize,
    allocations: AtomicUsize,
    deallocations: AtomicUsize,
}

/// Snapshot of the counters for one tag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Bytes currently allocated.
    pub live_bytes: usize,
    /// Highest value `live_bytes` has reached.
    pub peak_bytes: usize,
    /// Number of allocations made.
    pub allocations: usize,
    /// Number of deallocations made.
    pub deallocations: usize,
}

impl MemoryStats {
    /// Allocations not yet returned.
    #[inline]
    #[must_use]
    pub const fn outstanding(&self) -> usize {
        self.allocations - self.deallocations
    }
}

/// Per-tag allocation counters.
///
/// Counters use relaxed atomics: the tracker is shared between every chunk
/// of a manager and may be read from other threads for profiling.
#[derive(Default)]
pub struct MemoryTracker {
    tags: [TagCounters; MemoryTag::COUNT],
}

impl MemoryTracker {
    /// Creates a tracker with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a block for `layout`, attributed to `tag`.
    ///
    /// Allocation failure is not recoverable and aborts through
    /// [`handle_alloc_error`].
    ///
    /// # Panics
    ///
    /// Panics if `layout` has zero size.
    pub fn allocate(&self, layout: Layout, tag: MemoryTag) -> NonNull<u8> {
        assert!(layout.size() > 0, "zero-sized tagged allocation");

        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            handle_alloc_error(layout);
        };

        let counters = &self.tags[tag.index()];
        let live = counters.live_bytes.fetch_add(layout.size(), Ordering::Relaxed) + layout.size();
        counters.peak_bytes.fetch_max(live, Ordering::Relaxed);
        counters.allocations.fetch_add(1, Ordering::Relaxed);

        tracing::trace!(?tag, bytes = layout.size(), "tagged allocation");
        ptr
    }

    /// Returns a block obtained from [`allocate`](Self::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this tracker with the same
    /// `layout` and `tag`, and must not be used afterwards.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout, tag: MemoryTag) {
        dealloc(ptr.as_ptr(), layout);

        let counters = &self.tags[tag.index()];
        counters.live_bytes.fetch_sub(layout.size(), Ordering::Relaxed);
        counters.deallocations.fetch_add(1, Ordering::Relaxed);

        tracing::trace!(?tag, bytes = layout.size(), "tagged deallocation");
    }

    /// Reads the counters for `tag`.
    #[must_use]
    pub fn stats(&self, tag: MemoryTag) -> MemoryStats {
        let counters = &self.tags[tag.index()];
        MemoryStats {
            live_bytes: counters.live_bytes.load(Ordering::Relaxed),
            peak_bytes: counters.peak_bytes.load(Ordering::Relaxed),
            allocations: counters.allocations.load(Ordering::Relaxed),
            deallocations: counters.deallocations.load(Ordering::Relaxed),
        }
    }

    /// Total live bytes across all tags.
    #[must_use]
    pub fn total_live_bytes(&self) -> usize {
        MemoryTag::ALL
            .iter()
            .map(|&tag| self.stats(tag).live_bytes)
            .sum()
    }
}
