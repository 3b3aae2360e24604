//! Generational entity handles
//!
//! A slot indexes every component buffer directly. The generation stored per
//! slot is bumped whenever the slot is freed, so a handle that outlives its
//! entity is detected instead of silently addressing the slot's next tenant.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable reference to one entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityHandle {
    pub slot: u32,
    pub generation: u32,
}

impl EntityHandle {
    #[inline]
    pub fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.slot as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("entity capacity {0} exhausted")]
    Full(usize),
}

/// Fixed-capacity slot allocator with a reuse stack
#[derive(Debug, Clone)]
pub struct EntityAllocator {
    generations: Box<[u32]>,
    /// Freed slots, most recently freed on top
    free: Vec<u32>,
    /// Lowest slot never handed out
    next_unused: u32,
    live: Box<[bool]>,
    live_count: usize,
}

impl EntityAllocator {
    pub fn new(capacity: usize) -> Self {
        Self {
            generations: vec![0; capacity].into_boxed_slice(),
            free: Vec::with_capacity(capacity),
            next_unused: 0,
            live: vec![false; capacity].into_boxed_slice(),
            live_count: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.generations.len()
    }

    #[inline]
    pub fn live_count(&self) -> usize {
        self.live_count
    }

    /// Hand out a slot, preferring the most recently freed one
    pub fn allocate(&mut self) -> Result<EntityHandle, AllocError> {
        let slot = if let Some(slot) = self.free.pop() {
            slot
        } else if (self.next_unused as usize) < self.capacity() {
            let slot = self.next_unused;
            self.next_unused += 1;
            slot
        } else {
            return Err(AllocError::Full(self.capacity()));
        };

        let idx = slot as usize;
        self.live[idx] = true;
        self.live_count += 1;
        Ok(EntityHandle::new(slot, self.generations[idx]))
    }

    /// Invalidate a handle and return its slot to the reuse stack.
    /// Returns false (and does nothing) for stale or out-of-range handles.
    pub fn free(&mut self, handle: EntityHandle) -> bool {
        if !self.is_valid(handle) {
            return false;
        }
        let idx = handle.index();
        // Wrap is acceptable: a full 2^32 cycle on one slot within a session
        // would be needed for a stale handle to validate again
        self.generations[idx] = self.generations[idx].wrapping_add(1);
        self.live[idx] = false;
        self.live_count -= 1;
        self.free.push(handle.slot);
        true
    }

    #[inline]
    pub fn is_valid(&self, handle: EntityHandle) -> bool {
        let idx = handle.index();
        idx < self.capacity() && self.live[idx] && self.generations[idx] == handle.generation
    }

    #[inline]
    pub fn generation_of(&self, slot: u32) -> Option<u32> {
        self.generations.get(slot as usize).copied()
    }

    /// Handle for a live slot
    pub fn handle_of(&self, slot: u32) -> Option<EntityHandle> {
        let idx = slot as usize;
        if idx < self.capacity() && self.live[idx] {
            Some(EntityHandle::new(slot, self.generations[idx]))
        } else {
            None
        }
    }

    /// Take a specific (slot, generation), as dictated by a remote authority.
    ///
    /// Any local tenant of the slot is evicted first. Returns false if the
    /// slot is out of range.
    pub fn claim(&mut self, handle: EntityHandle) -> bool {
        let idx = handle.index();
        if idx >= self.capacity() {
            return false;
        }

        if self.live[idx] {
            self.live_count -= 1;
        } else if let Some(pos) = self.free.iter().position(|&s| s == handle.slot) {
            self.free.swap_remove(pos);
        } else {
            // Slot was never handed out; everything between next_unused and
            // the claimed slot becomes reusable
            while self.next_unused < handle.slot {
                self.free.push(self.next_unused);
                self.next_unused += 1;
            }
            if self.next_unused == handle.slot {
                self.next_unused += 1;
            }
        }

        self.generations[idx] = handle.generation;
        self.live[idx] = true;
        self.live_count += 1;
        true
    }

    /// Overwrite this allocator with another's state without reallocating
    pub fn copy_from(&mut self, other: &EntityAllocator) {
        self.generations.copy_from_slice(&other.generations);
        self.live.copy_from_slice(&other.live);
        self.free.clone_from(&other.free);
        self.next_unused = other.next_unused;
        self.live_count = other.live_count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_sequential_slots() {
        let mut alloc = EntityAllocator::new(4);
        let a = alloc.allocate().unwrap();
        let b = alloc.allocate().unwrap();
        assert_eq!(a.slot, 0);
        assert_eq!(b.slot, 1);
        assert_eq!(alloc.live_count(), 2);
    }

    #[test]
    fn test_allocate_full() {
        let mut alloc = EntityAllocator::new(2);
        alloc.allocate().unwrap();
        alloc.allocate().unwrap();
        assert_eq!(alloc.allocate(), Err(AllocError::Full(2)));
    }

    #[test]
    fn test_free_invalidates_handle() {
        let mut alloc = EntityAllocator::new(4);
        let h = alloc.allocate().unwrap();
        assert!(alloc.is_valid(h));
        assert!(alloc.free(h));
        assert!(!alloc.is_valid(h));
    }

    #[test]
    fn test_stale_free_is_noop() {
        let mut alloc = EntityAllocator::new(4);
        let h = alloc.allocate().unwrap();
        assert!(alloc.free(h));
        assert!(!alloc.free(h));
        assert_eq!(alloc.live_count(), 0);
    }

    #[test]
    fn test_reuse_has_greater_generation() {
        let mut alloc = EntityAllocator::new(4);
        for _ in 0..4 {
            alloc.allocate().unwrap();
        }
        let victim = EntityHandle::new(2, 0);
        assert!(alloc.free(victim));

        let reused = alloc.allocate().unwrap();
        assert_eq!(reused.slot, 2);
        assert!(reused.generation > victim.generation);
        assert!(!alloc.is_valid(victim));
        assert!(alloc.is_valid(reused));
    }

    #[test]
    fn test_prefers_reuse_over_fresh_slots() {
        let mut alloc = EntityAllocator::new(8);
        let a = alloc.allocate().unwrap();
        alloc.allocate().unwrap();
        alloc.free(a);
        assert_eq!(alloc.allocate().unwrap().slot, 0);
    }

    #[test]
    fn test_generation_wraps() {
        let mut alloc = EntityAllocator::new(1);
        assert!(alloc.claim(EntityHandle::new(0, u32::MAX)));
        assert!(alloc.free(EntityHandle::new(0, u32::MAX)));
        assert_eq!(alloc.generation_of(0), Some(0));
    }

    #[test]
    fn test_out_of_range() {
        let alloc = EntityAllocator::new(2);
        assert!(!alloc.is_valid(EntityHandle::new(5, 0)));
        assert_eq!(alloc.generation_of(5), None);
    }

    #[test]
    fn test_claim_unused_slot_keeps_lower_slots_allocatable() {
        let mut alloc = EntityAllocator::new(4);
        assert!(alloc.claim(EntityHandle::new(2, 7)));
        assert!(alloc.is_valid(EntityHandle::new(2, 7)));

        let mut slots: Vec<u32> = (0..3).map(|_| alloc.allocate().unwrap().slot).collect();
        slots.sort_unstable();
        assert_eq!(slots, vec![0, 1, 3]);
        assert!(alloc.allocate().is_err());
    }

    #[test]
    fn test_copy_from() {
        let mut a = EntityAllocator::new(4);
        let h = a.allocate().unwrap();
        a.allocate().unwrap();
        a.free(h);

        let mut b = EntityAllocator::new(4);
        b.copy_from(&a);
        assert_eq!(b.live_count(), 1);
        assert_eq!(b.generation_of(0), Some(1));
        assert_eq!(b.allocate().unwrap().slot, 0);
    }
}
