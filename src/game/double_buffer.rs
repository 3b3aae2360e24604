//! Two World instances: one published for readers, one advanced by the
//! simulation thread.
//!
//! The render index is the only shared mutable word. Readers lock the
//! published instance for reading; the simulation locks the other one for
//! writing. Since the two never index the same instance between swaps the
//! locks are uncontended, and a reader that still holds the old render guard
//! across a swap only delays the simulation's next write lock instead of
//! observing a torn tick.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

use crate::game::world::{World, WorldError};

pub struct DoubleBufferedWorld {
    worlds: [RwLock<World>; 2],
    render_index: AtomicUsize,
    swaps: AtomicU64,
}

impl DoubleBufferedWorld {
    /// Two empty worlds of identical capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            worlds: [RwLock::new(World::new(capacity)), RwLock::new(World::new(capacity))],
            render_index: AtomicUsize::new(0),
            swaps: AtomicU64::new(0),
        }
    }

    /// Wrap a pre-populated world; the other instance starts as its copy
    pub fn from_world(world: World) -> Result<Self, WorldError> {
        let mut sim = World::new(world.capacity());
        sim.copy_from(&world)?;
        Ok(Self {
            worlds: [RwLock::new(world), RwLock::new(sim)],
            render_index: AtomicUsize::new(0),
            swaps: AtomicU64::new(0),
        })
    }

    #[inline]
    pub fn render_index(&self) -> usize {
        self.render_index.load(Ordering::Acquire)
    }

    #[inline]
    fn simulation_index(&self) -> usize {
        self.render_index() ^ 1
    }

    /// Stable, fully-published state for readers.
    ///
    /// Sample once per frame and drop the guard before the next tick ends.
    /// A guard held across a swap pins what is then the simulation instance,
    /// and the following `simulation_state()` or `sync()` blocks until it is
    /// released.
    pub fn render_state(&self) -> RwLockReadGuard<'_, World> {
        self.worlds[self.render_index()].read()
    }

    /// The instance the simulation thread mutates. Only the simulation
    /// thread may call this.
    pub fn simulation_state(&self) -> RwLockWriteGuard<'_, World> {
        self.worlds[self.simulation_index()].write()
    }

    /// Like `simulation_state`, but `None` while a reader still holds a
    /// guard from before the last swap
    pub fn try_simulation_state(&self) -> Option<RwLockWriteGuard<'_, World>> {
        self.worlds[self.simulation_index()].try_write()
    }

    /// Overwrite the simulation instance with the published one
    pub fn sync(&self) -> Result<(), WorldError> {
        let render_idx = self.render_index();
        let src = self.worlds[render_idx].read();
        let mut dst = self.worlds[render_idx ^ 1].write();
        dst.copy_from(&src)
    }

    /// Publish the simulation instance. Call only after every write for the
    /// tick is done and the write guard has been dropped.
    pub fn swap(&self) {
        let prev = self.render_index.fetch_xor(1, Ordering::AcqRel);
        let n = self.swaps.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(render = prev ^ 1, swaps = n, "World buffers swapped");
    }

    pub fn swap_count(&self) -> u64 {
        self.swaps.load(Ordering::Relaxed)
    }
}
