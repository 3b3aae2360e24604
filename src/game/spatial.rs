//! Spatial hash grid broad-phase
//!
//! Uniform grid over the world built from flat arrays: one head per cell and
//! a singly-linked `next` pointer per entity slot. Insert and remove never
//! allocate; radius queries write into a caller-owned buffer.
//!
//! Corrupted state (self-linked chains, runaway traversals, out-of-range
//! slots or cells) aborts only the current operation and is reported through
//! a rate-limited warning.

use crate::game::constants::spatial::{MAX_QUERY_ITERATIONS, MAX_QUERY_RESULTS};
use crate::game::world::World;
use crate::util::diag::RateLimitedWarn;
use bitvec::prelude::*;

const EMPTY: i32 = -1;

/// Position -> cell mapping, kept separate so it can be used while the
/// grid's arrays are mutably borrowed
#[derive(Debug, Clone, Copy)]
struct Layout {
    min_x: f32,
    min_y: f32,
    inv_cell_size: f32,
    cells_per_axis: usize,
}

impl Layout {
    #[inline]
    fn axis_cell(&self, coord: f32, min: f32) -> usize {
        let c = ((coord - min) * self.inv_cell_size).floor();
        if c <= 0.0 {
            0
        } else {
            (c as usize).min(self.cells_per_axis - 1)
        }
    }

    #[inline]
    fn hash(&self, x: f32, y: f32) -> Option<usize> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        let cx = self.axis_cell(x, self.min_x);
        let cy = self.axis_cell(y, self.min_y);
        Some(cy * self.cells_per_axis + cx)
    }
}

#[inline]
fn link(cell_head: &mut [i32], next: &mut [i32], entity_cell: &mut [i32], slot: usize, cell: usize) {
    next[slot] = cell_head[cell];
    cell_head[cell] = slot as i32;
    entity_cell[slot] = cell as i32;
}

pub struct SpatialHashGrid {
    layout: Layout,
    cell_size: f32,
    cell_head: Box<[i32]>,
    next_entity: Box<[i32]>,
    entity_cell: Box<[i32]>,
    /// Last query epoch that visited each slot
    visit_epoch: Box<[u32]>,
    epoch: u32,
    static_set: BitVec,
    max_iterations: usize,
    max_results: usize,
    diag: RateLimitedWarn,
}

impl SpatialHashGrid {
    /// Grid covering the square `[min, min + size)` on both axes
    pub fn new(capacity: usize, min: f32, size: f32, cell_size: f32) -> Self {
        let cell_size = if cell_size > 0.0 { cell_size } else { 1.0 };
        let cells_per_axis = ((size / cell_size).ceil() as usize).max(1);
        Self {
            layout: Layout {
                min_x: min,
                min_y: min,
                inv_cell_size: 1.0 / cell_size,
                cells_per_axis,
            },
            cell_size,
            cell_head: vec![EMPTY; cells_per_axis * cells_per_axis].into_boxed_slice(),
            next_entity: vec![EMPTY; capacity].into_boxed_slice(),
            entity_cell: vec![EMPTY; capacity].into_boxed_slice(),
            visit_epoch: vec![0; capacity].into_boxed_slice(),
            epoch: 0,
            static_set: bitvec![0; capacity],
            max_iterations: MAX_QUERY_ITERATIONS,
            max_results: MAX_QUERY_RESULTS,
            diag: RateLimitedWarn::new("spatial"),
        }
    }

    pub fn with_limits(mut self, max_iterations: usize, max_results: usize) -> Self {
        self.max_iterations = max_iterations;
        self.max_results = max_results;
        self
    }

    #[inline]
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    #[inline]
    pub fn cells_per_axis(&self) -> usize {
        self.layout.cells_per_axis
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.next_entity.len()
    }

    /// Cell index for a position, clamped to the grid. `None` for non-finite input.
    #[inline]
    pub fn hash_position(&self, x: f32, y: f32) -> Option<usize> {
        self.layout.hash(x, y)
    }

    pub fn cell_of(&self, slot: u32) -> Option<usize> {
        match self.entity_cell.get(slot as usize) {
            Some(&c) if c != EMPTY => Some(c as usize),
            _ => None,
        }
    }

    #[inline]
    pub fn contains(&self, slot: u32) -> bool {
        self.cell_of(slot).is_some()
    }

    pub fn is_static(&self, slot: u32) -> bool {
        self.static_set.get(slot as usize).is_some_and(|b| *b)
    }

    /// Insert `slot` at its current transform position, unlinking it from
    /// any previous cell first. Returns false if the insert was skipped.
    pub fn add(&mut self, world: &World, slot: u32, is_static: bool) -> bool {
        let i = slot as usize;
        if i >= self.capacity() {
            self.diag
                .warn(format_args!("add: slot {} outside capacity {}", slot, self.capacity()));
            return false;
        }
        let Some(t) = world.transform(slot) else {
            self.diag.warn(format_args!("add: slot {} outside world", slot));
            return false;
        };
        let Some(cell) = self.layout.hash(t.x, t.y) else {
            self.diag
                .warn(format_args!("add: slot {} has non-finite position", slot));
            return false;
        };

        if self.entity_cell[i] != EMPTY {
            self.remove(slot);
        }
        link(
            &mut self.cell_head,
            &mut self.next_entity,
            &mut self.entity_cell,
            i,
            cell,
        );
        self.static_set.set(i, is_static);
        true
    }

    /// Unlink `slot` from its cell. Returns false if it was not tracked or
    /// the chain was corrupt.
    pub fn remove(&mut self, slot: u32) -> bool {
        let i = slot as usize;
        let Some(cell) = self.cell_of(slot) else {
            return false;
        };
        if cell >= self.cell_head.len() {
            self.diag.warn(format_args!("remove: cell {} out of range", cell));
            self.entity_cell[i] = EMPTY;
            return false;
        }

        let mut prev = EMPTY;
        let mut cur = self.cell_head[cell];
        let mut steps = 0;
        while cur != EMPTY {
            if steps >= self.max_iterations || cur as usize >= self.capacity() {
                self.diag
                    .warn(format_args!("remove: corrupt chain in cell {}", cell));
                return false;
            }
            let next = self.next_entity[cur as usize];
            if cur as usize == i {
                if prev == EMPTY {
                    self.cell_head[cell] = next;
                } else {
                    self.next_entity[prev as usize] = next;
                }
                self.next_entity[i] = EMPTY;
                self.entity_cell[i] = EMPTY;
                self.static_set.set(i, false);
                return true;
            }
            if next == cur {
                self.diag
                    .warn(format_args!("remove: self-linked slot {} in cell {}", cur, cell));
                return false;
            }
            prev = cur;
            cur = next;
            steps += 1;
        }
        false
    }

    /// Collect every tracked entity whose circle overlaps the query circle.
    ///
    /// `out` is cleared first. Returns the number of hits.
    pub fn query_radius_into(
        &mut self,
        world: &World,
        x: f32,
        y: f32,
        radius: f32,
        out: &mut Vec<u32>,
    ) -> usize {
        out.clear();
        if !x.is_finite() || !y.is_finite() || !radius.is_finite() || radius < 0.0 {
            self.diag
                .warn(format_args!("query: non-finite input ({}, {}, r={})", x, y, radius));
            return 0;
        }

        self.epoch = self.epoch.wrapping_add(1);
        if self.epoch == 0 {
            self.visit_epoch.fill(0);
            self.epoch = 1;
        }
        let epoch = self.epoch;

        let l = self.layout;
        let x0 = l.axis_cell(x - radius, l.min_x);
        let x1 = l.axis_cell(x + radius, l.min_x);
        let y0 = l.axis_cell(y - radius, l.min_y);
        let y1 = l.axis_cell(y + radius, l.min_y);

        let mut iterations = 0usize;
        'cells: for cy in y0..=y1 {
            for cx in x0..=x1 {
                let cell = cy * l.cells_per_axis + cx;
                let mut cur = self.cell_head[cell];
                while cur != EMPTY {
                    iterations += 1;
                    if iterations > self.max_iterations {
                        self.diag
                            .warn(format_args!("query: iteration cap {} hit", self.max_iterations));
                        break 'cells;
                    }
                    let s = cur as usize;
                    if s >= self.capacity() {
                        self.diag.warn(format_args!("query: slot {} out of range", s));
                        break;
                    }
                    let next = self.next_entity[s];
                    if next == cur {
                        self.diag.warn(format_args!("query: self-linked slot {}", s));
                        // Still consider this entity, but stop walking the chain
                    }

                    if self.visit_epoch[s] != epoch {
                        self.visit_epoch[s] = epoch;
                        if let (Some(t), Some(p)) = (world.transform(cur as u32), world.physics(cur as u32)) {
                            let dx = t.x - x;
                            let dy = t.y - y;
                            let reach = radius + p.radius;
                            if dx * dx + dy * dy <= reach * reach {
                                if out.len() >= self.max_results {
                                    self.diag.warn(format_args!(
                                        "query: result cap {} hit",
                                        self.max_results
                                    ));
                                    break 'cells;
                                }
                                out.push(cur as u32);
                            }
                        }
                    }

                    if next == cur {
                        break;
                    }
                    cur = next;
                }
            }
        }
        out.len()
    }

    /// Empty every cell and forget the static set
    pub fn clear(&mut self) {
        self.cell_head.fill(EMPTY);
        self.next_entity.fill(EMPTY);
        self.entity_cell.fill(EMPTY);
        self.static_set.fill(false);
    }

    /// Empty every cell, then re-insert the tracked static entities that are
    /// still alive. Dynamic entities are expected to be re-added by the caller.
    pub fn clear_dynamic(&mut self, world: &World) {
        self.cell_head.fill(EMPTY);
        self.next_entity.fill(EMPTY);
        self.entity_cell.fill(EMPTY);

        let layout = self.layout;
        let mut dropped = 0usize;
        for i in self.static_set.iter_ones() {
            let slot = i as u32;
            let cell = if world.is_alive(slot) {
                world.transform(slot).and_then(|t| layout.hash(t.x, t.y))
            } else {
                None
            };
            match cell {
                Some(cell) => link(
                    &mut self.cell_head,
                    &mut self.next_entity,
                    &mut self.entity_cell,
                    i,
                    cell,
                ),
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            // Second pass only when something died; keeps the common path branch-free
            for i in 0..self.capacity() {
                if self.static_set[i] && self.entity_cell[i] == EMPTY {
                    self.static_set.set(i, false);
                }
            }
        }
    }

    /// Occupancy summary for diagnostics
    pub fn stats(&self) -> SpatialGridStats {
        let mut non_empty_cells = 0;
        let mut total_entities = 0;
        let mut max_per_cell = 0;
        for &head in self.cell_head.iter() {
            if head == EMPTY {
                continue;
            }
            non_empty_cells += 1;
            let mut n = 0;
            let mut cur = head;
            while cur != EMPTY && (cur as usize) < self.capacity() && n < self.max_iterations {
                n += 1;
                let next = self.next_entity[cur as usize];
                if next == cur {
                    break;
                }
                cur = next;
            }
            total_entities += n;
            max_per_cell = max_per_cell.max(n);
        }
        SpatialGridStats {
            non_empty_cells,
            total_entities,
            max_per_cell,
        }
    }
}

/// Statistics about the spatial grid
#[derive(Debug, Clone, Default)]
pub struct SpatialGridStats {
    pub non_empty_cells: usize,
    pub total_entities: usize,
    pub max_per_cell: usize,
}
