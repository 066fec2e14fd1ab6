//! Bounded recycling pool for method slots.
//!
//! Methods are created on nearly every attribute access through an instance, so
//! their arena slots are recycled through a dedicated free list instead of the
//! general one. The pool keeps at most `capacity` slots; anything beyond that
//! is handed back to the arena.

use crate::heap::HeapId;

/// Number of destroyed method slots kept for reuse when not configured otherwise.
pub const DEFAULT_METHOD_FREE_LIST_CAPACITY: usize = 100;

/// A bounded LIFO of arena slots previously occupied by destroyed methods.
///
/// Populated lazily on the first method destruction and never drained; slots
/// still pooled when the heap is dropped are released with it.
#[derive(Debug)]
pub(crate) struct MethodFreeList {
    slots: Vec<HeapId>,
    capacity: usize,
}

impl MethodFreeList {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            capacity,
        }
    }

    /// Pops the most recently released slot, if any.
    pub fn acquire(&mut self) -> Option<HeapId> {
        let slot = self.slots.pop();
        if let Some(id) = slot {
            tracing::trace!(slot = id.index(), pooled = self.slots.len(), "reusing method slot");
        }
        slot
    }

    /// Keeps `id` for reuse if the pool is below capacity.
    ///
    /// Returns the slot back to the caller when the pool is full, in which case
    /// the caller must give it to the general arena free list.
    pub fn release(&mut self, id: HeapId) -> Option<HeapId> {
        if self.slots.len() < self.capacity {
            self.slots.push(id);
            tracing::trace!(slot = id.index(), pooled = self.slots.len(), "pooled method slot");
            None
        } else {
            Some(id)
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_is_bounded_by_capacity() {
        let mut pool = MethodFreeList::new(DEFAULT_METHOD_FREE_LIST_CAPACITY);
        let mut overflow = Vec::new();
        for index in 0..=DEFAULT_METHOD_FREE_LIST_CAPACITY {
            if let Some(id) = pool.release(HeapId::new(index)) {
                overflow.push(id);
            }
        }
        assert_eq!(pool.len(), DEFAULT_METHOD_FREE_LIST_CAPACITY);
        assert_eq!(overflow, vec![HeapId::new(DEFAULT_METHOD_FREE_LIST_CAPACITY)]);
    }

    #[test]
    fn acquire_is_lifo() {
        let mut pool = MethodFreeList::new(4);
        assert_eq!(pool.acquire(), None);
        pool.release(HeapId::new(3));
        pool.release(HeapId::new(7));
        assert_eq!(pool.acquire(), Some(HeapId::new(7)));
        assert_eq!(pool.acquire(), Some(HeapId::new(3)));
        assert_eq!(pool.acquire(), None);
    }

    #[test]
    fn zero_capacity_pools_nothing() {
        let mut pool = MethodFreeList::new(0);
        assert_eq!(pool.release(HeapId::new(1)), Some(HeapId::new(1)));
        assert_eq!(pool.len(), 0);
    }
}
