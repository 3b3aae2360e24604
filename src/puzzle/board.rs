use bitvec::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

use super::cycle::{CycleTracker, AVATAR_CHAIN};
use super::element::{self, EARTH, EMPTY, FIRE, METAL, STONE, WATER, WOOD};

pub const MIN_SIDE: usize = 3;
/// Event packing stores coordinates in one byte each
pub const MAX_SIDE: usize = 255;

/// Settle ticks a swap preview may run
const PREVIEW_SETTLE_TICKS: u32 = 64;

/// Effect codes paired with cell indices in `preview_swap` output
pub mod preview {
    pub const MATCH: u32 = 0;
    pub const DESTRUCTION: u32 = 1;
    pub const GENERATION: u32 = 2;
}

/// Board event type ids (high byte of a packed event)
pub mod event {
    pub const DESTRUCTION: u8 = 21;
    pub const GEN_WATER: u8 = 31;
    pub const GEN_FIRE: u8 = 32;
    pub const GEN_WOOD: u8 = 33;
    pub const CYCLE_HIT: u8 = 50;
    pub const AVATAR: u8 = 55;
    /// Intensity used for plain clears (type is the cleared element)
    pub const CLEAR_INTENSITY: u8 = 50;

    /// `type << 24 | x << 16 | y << 8 | intensity`
    #[inline]
    pub fn pack(kind: u8, x: u8, y: u8, intensity: u8) -> u32 {
        (kind as u32) << 24 | (x as u32) << 16 | (y as u32) << 8 | intensity as u32
    }

    #[inline]
    pub fn unpack(e: u32) -> (u8, u8, u8, u8) {
        ((e >> 24) as u8, (e >> 16) as u8, (e >> 8) as u8, e as u8)
    }
}

const DESTRUCTION_BONUS: u32 = 300;
const GENERATION_BONUS: u32 = 200;
const BASE_MATCH_SCORE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    #[error("board dimensions {width}x{height} outside {MIN_SIDE}..={MAX_SIDE}")]
    InvalidDimensions { width: usize, height: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub element: u8,
    pub flags: u8,
}

impl Cell {
    pub const EMPTY: Cell = Cell {
        element: EMPTY,
        flags: 0,
    };

    pub fn new(element: u8) -> Self {
        Self { element, flags: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPattern {
    Line3,
    Line4,
    Line5,
    /// Horizontal and vertical runs joined (T, L, +)
    Cross,
}

/// One connected group of matched cells of a single element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchCluster {
    pub pattern: MatchPattern,
    pub element: u8,
    /// Cell indices in BFS order from the lowest index
    pub cells: SmallVec<[usize; 8]>,
    /// Midpoint of the bounding box
    pub center: usize,
}

type Cells = SmallVec<[usize; 16]>;

enum Interaction {
    None,
    Destruction(Cells),
    Generation(Cells),
}

/// Seeded match-3 board
#[derive(Debug, Clone)]
pub struct Board {
    width: usize,
    height: usize,
    cells: Vec<Cell>,
    events: Vec<u32>,
    score: u32,
    stable: bool,
    pub auto_refill: bool,
    rng: ChaCha8Rng,
    cycle: CycleTracker,
    // scratch
    run_marks: Vec<u8>,
    visited: BitVec,
    queue: Vec<usize>,
    clear: BitVec,
}

impl Board {
    /// Board filled from `seed` with no initial matches
    pub fn new(width: usize, height: usize, seed: u64) -> Result<Self, BoardError> {
        let mut board = Self::new_empty(width, height, seed)?;
        board.randomize();
        Ok(board)
    }

    /// Board with every cell empty; the RNG is still seeded for refills
    pub fn new_empty(width: usize, height: usize, seed: u64) -> Result<Self, BoardError> {
        let valid = MIN_SIDE..=MAX_SIDE;
        if !valid.contains(&width) || !valid.contains(&height) {
            return Err(BoardError::InvalidDimensions { width, height });
        }
        let n = width * height;
        Ok(Self {
            width,
            height,
            cells: vec![Cell::EMPTY; n],
            events: Vec::with_capacity(128),
            score: 0,
            stable: true,
            auto_refill: true,
            rng: ChaCha8Rng::seed_from_u64(seed),
            cycle: CycleTracker::new(),
            run_marks: vec![0; n],
            visited: bitvec![0; n],
            queue: Vec::with_capacity(n),
            clear: bitvec![0; n],
        })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn score(&self) -> u32 {
        self.score
    }

    #[inline]
    pub fn is_stable(&self) -> bool {
        self.stable
    }

    pub fn cycle(&self) -> &CycleTracker {
        &self.cycle
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cell(&self, idx: usize) -> Option<Cell> {
        self.cells.get(idx).copied()
    }

    #[inline]
    pub fn index_of(&self, x: usize, y: usize) -> Option<usize> {
        (x < self.width && y < self.height).then(|| y * self.width + x)
    }

    /// Overwrite a cell; marks the board unstable
    pub fn set_cell(&mut self, idx: usize, cell: Cell) -> bool {
        match self.cells.get_mut(idx) {
            Some(c) => {
                *c = cell;
                self.stable = false;
                true
            }
            None => false,
        }
    }

    /// Packed presentation events queued since the last drain
    pub fn events(&self) -> &[u32] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Adler-32 style sum over (element, flags) of every cell
    pub fn checksum(&self) -> u32 {
        const MOD: u32 = 65521;
        let mut a: u32 = 1;
        let mut b: u32 = 0;
        for c in &self.cells {
            a = (a + c.element as u32) % MOD;
            b = (b + a) % MOD;
            a = (a + c.flags as u32) % MOD;
            b = (b + a) % MOD;
        }
        (b << 16) | a
    }

    /// Swap two cells, keeping the swap only if it forms a match at either.
    pub fn try_swap(&mut self, a: usize, b: usize) -> bool {
        let n = self.cells.len();
        if a >= n || b >= n || a == b {
            return false;
        }
        if self.cells[a].element == STONE || self.cells[b].element == STONE {
            return false;
        }

        self.cells.swap(a, b);
        if self.has_match_at(a) || self.has_match_at(b) {
            self.stable = false;
            true
        } else {
            self.cells.swap(a, b);
            false
        }
    }

    /// Advance one step: gravity and refill, or match resolution when
    /// nothing moved. Returns true if the board changed.
    pub fn tick(&mut self) -> bool {
        if self.apply_gravity() {
            self.stable = false;
            return true;
        }

        let clusters = self.find_all_matches();
        if clusters.is_empty() {
            self.stable = true;
            return false;
        }
        self.resolve(&clusters);
        self.stable = false;
        true
    }

    /// Tick until stable or `max_ticks` elapse. Returns ticks run.
    pub fn run_until_stable(&mut self, max_ticks: u32) -> u32 {
        let mut ticks = 0;
        while !self.stable && ticks < max_ticks {
            self.tick();
            ticks += 1;
        }
        ticks
    }

    /// Fill row-major, re-rolling each cell that would complete a run with
    /// the two cells to its left or above. At most two elements are ever
    /// excluded, so five candidates always leave one.
    fn randomize(&mut self) {
        for idx in 0..self.cells.len() {
            let mut e = self.rng.gen_range(1..=5u8);
            for _ in 0..5 {
                if !self.completes_run(idx, e) {
                    break;
                }
                e = (e % 5) + 1;
            }
            self.cells[idx] = Cell::new(e);
        }
        self.stable = true;
    }

    /// Would `e` at `idx` form a run of three with already-filled cells
    fn completes_run(&self, idx: usize, e: u8) -> bool {
        let w = self.width;
        let (x, y) = (idx % w, idx / w);
        let left = x >= 2 && self.cells[idx - 1].element == e && self.cells[idx - 2].element == e;
        let up = y >= 2 && self.cells[idx - w].element == e && self.cells[idx - 2 * w].element == e;
        left || up
    }

    /// Effects the swap of `a` and `b` would trigger, as `(cell, code)`
    /// pairs flattened into one vector (codes in [`preview`]). The board is
    /// left untouched; invalid or non-matching swaps preview as empty.
    pub fn preview_swap(&self, a: usize, b: usize) -> Vec<u32> {
        let mut trial = self.clone();
        trial.events.clear();
        if !trial.try_swap(a, b) {
            return Vec::new();
        }

        let mut out = Vec::new();
        for m in trial.find_all_matches() {
            let (cells, code) = match trial.analyze(&m) {
                Interaction::Destruction(hit) => (hit, preview::DESTRUCTION),
                Interaction::Generation(hit) => (hit, preview::GENERATION),
                Interaction::None => (m.cells.iter().copied().collect(), preview::MATCH),
            };
            for idx in cells {
                out.push(idx as u32);
                out.push(code);
            }
        }
        out
    }

    /// `preview_swap` against each orthogonal neighbour of (x, y)
    pub fn preview_neighbours(&self, x: usize, y: usize) -> Vec<u32> {
        let Some(idx) = self.index_of(x, y) else {
            return Vec::new();
        };
        self.neighbours(idx)
            .into_iter()
            .flatten()
            .flat_map(|n| self.preview_swap(idx, n))
            .collect()
    }

    /// Presentation events the swap would produce once the board settles
    pub fn preview_events(&self, a: usize, b: usize) -> Vec<u32> {
        let mut trial = self.clone();
        trial.events.clear();
        if !trial.try_swap(a, b) {
            return Vec::new();
        }
        trial.run_until_stable(PREVIEW_SETTLE_TICKS);
        trial.events
    }

    fn apply_gravity(&mut self) -> bool {
        let (w, h) = (self.width, self.height);
        let mut moved = false;
        for x in 0..w {
            // Next free row from the bottom of the current segment
            let mut write = h as isize - 1;
            for y in (0..h).rev() {
                let idx = y * w + x;
                let cell = self.cells[idx];
                if cell.element == STONE {
                    write = y as isize - 1;
                    continue;
                }
                if cell.element != EMPTY {
                    if y as isize != write {
                        self.cells[write as usize * w + x] = cell;
                        self.cells[idx] = Cell::EMPTY;
                        moved = true;
                    }
                    write -= 1;
                }
            }
            if self.auto_refill && write >= 0 {
                for y in 0..=write as usize {
                    let idx = y * w + x;
                    if self.cells[idx].element == EMPTY {
                        self.cells[idx] = Cell::new(self.rng.gen_range(1..=5u8));
                        moved = true;
                    }
                }
            }
        }
        moved
    }

    fn has_match_at(&self, idx: usize) -> bool {
        let (w, h) = (self.width, self.height);
        let e = self.cells[idx].element;
        if !element::is_basic(e) {
            return false;
        }
        let (x, y) = (idx % w, idx / w);

        let mut run = 1;
        let mut i = x;
        while i > 0 && self.cells[y * w + i - 1].element == e {
            run += 1;
            i -= 1;
        }
        let mut i = x;
        while i + 1 < w && self.cells[y * w + i + 1].element == e {
            run += 1;
            i += 1;
        }
        if run >= 3 {
            return true;
        }

        let mut run = 1;
        let mut j = y;
        while j > 0 && self.cells[(j - 1) * w + x].element == e {
            run += 1;
            j -= 1;
        }
        let mut j = y;
        while j + 1 < h && self.cells[(j + 1) * w + x].element == e {
            run += 1;
            j += 1;
        }
        run >= 3
    }

    /// Every matched cluster, ordered by lowest member index
    pub fn find_all_matches(&mut self) -> Vec<MatchCluster> {
        const H: u8 = 1;
        const V: u8 = 2;
        let (w, h) = (self.width, self.height);
        self.run_marks.fill(0);

        let mut any = false;
        for y in 0..h {
            let mut x = 0;
            while x < w {
                let e = self.cells[y * w + x].element;
                let mut k = x + 1;
                while k < w && self.cells[y * w + k].element == e {
                    k += 1;
                }
                if element::is_basic(e) && k - x >= 3 {
                    for i in x..k {
                        self.run_marks[y * w + i] |= H;
                    }
                    any = true;
                }
                x = k;
            }
        }
        for x in 0..w {
            let mut y = 0;
            while y < h {
                let e = self.cells[y * w + x].element;
                let mut k = y + 1;
                while k < h && self.cells[k * w + x].element == e {
                    k += 1;
                }
                if element::is_basic(e) && k - y >= 3 {
                    for j in y..k {
                        self.run_marks[j * w + x] |= V;
                    }
                    any = true;
                }
                y = k;
            }
        }

        let mut clusters = Vec::new();
        if !any {
            return clusters;
        }

        self.visited.fill(false);
        for start in 0..self.cells.len() {
            if self.run_marks[start] == 0 || self.visited[start] {
                continue;
            }
            let e = self.cells[start].element;
            self.queue.clear();
            self.queue.push(start);
            self.visited.set(start, true);

            let (mut min_x, mut max_x) = (start % w, start % w);
            let (mut min_y, mut max_y) = (start / w, start / w);
            let (mut has_h, mut has_v) = (false, false);
            let mut cells = SmallVec::new();

            let mut head = 0;
            while head < self.queue.len() {
                let cur = self.queue[head];
                head += 1;
                cells.push(cur);

                let (cx, cy) = (cur % w, cur / w);
                min_x = min_x.min(cx);
                max_x = max_x.max(cx);
                min_y = min_y.min(cy);
                max_y = max_y.max(cy);
                has_h |= self.run_marks[cur] & H != 0;
                has_v |= self.run_marks[cur] & V != 0;

                for n in self.neighbours(cur).into_iter().flatten() {
                    if self.run_marks[n] != 0 && !self.visited[n] && self.cells[n].element == e {
                        self.visited.set(n, true);
                        self.queue.push(n);
                    }
                }
            }

            let span = (max_x - min_x + 1).max(max_y - min_y + 1);
            let pattern = if has_h && has_v {
                MatchPattern::Cross
            } else if span >= 5 {
                MatchPattern::Line5
            } else if span >= 4 {
                MatchPattern::Line4
            } else {
                MatchPattern::Line3
            };
            let center = ((min_y + max_y) / 2) * w + (min_x + max_x) / 2;

            clusters.push(MatchCluster {
                pattern,
                element: e,
                cells,
                center,
            });
        }
        clusters
    }

    /// Up, down, left, right
    #[inline]
    fn neighbours(&self, idx: usize) -> [Option<usize>; 4] {
        let (w, h) = (self.width, self.height);
        let (x, y) = (idx % w, idx / w);
        [
            (y > 0).then(|| idx - w),
            (y + 1 < h).then(|| idx + w),
            (x > 0).then(|| idx - 1),
            (x + 1 < w).then(|| idx + 1),
        ]
    }

    fn resolve(&mut self, clusters: &[MatchCluster]) {
        let w = self.width;
        self.clear.fill(false);
        let mut bonus = 0;

        for m in clusters {
            for &idx in &m.cells {
                self.clear.set(idx, true);
            }

            match self.analyze(m) {
                Interaction::Destruction(targets) => {
                    for &t in &targets {
                        self.clear.set(t, true);
                        self.push_event(event::DESTRUCTION, t, 200);
                    }
                    bonus += DESTRUCTION_BONUS;
                }
                Interaction::Generation(targets) => {
                    for &t in &targets {
                        match m.element {
                            WOOD => {
                                self.clear.set(t, false);
                                self.cells[t].element = FIRE;
                                self.push_event(event::GEN_FIRE, t, 200);
                            }
                            METAL => {
                                self.cells[t].element = WATER;
                                self.push_event(event::GEN_WATER, t, 200);
                            }
                            WATER => {
                                self.clear.set(t, false);
                                self.cells[t].element = WOOD;
                                self.cells[t].flags |= super::cell_flags::FROZEN;
                                self.push_event(event::GEN_WOOD, t, 200);
                            }
                            _ => {}
                        }
                    }
                    bonus += GENERATION_BONUS;
                }
                Interaction::None => {}
            }

            let outcome = self.cycle.process(m.element);
            self.score = self
                .score
                .saturating_add(BASE_MATCH_SCORE.saturating_mul(outcome.multiplier));
            if outcome.hit {
                let chain = self.cycle.chain.min(255) as u8;
                self.push_event(event::CYCLE_HIT, m.center, chain);
                if self.cycle.chain == AVATAR_CHAIN {
                    self.push_event(event::AVATAR, m.center, 255);
                }
            }
        }
        self.score = self.score.saturating_add(bonus);

        for idx in 0..self.cells.len() {
            if !self.clear[idx] || self.cells[idx].element == EMPTY {
                continue;
            }
            let e = self.cells[idx].element;
            self.events.push(event::pack(
                e,
                (idx % w) as u8,
                (idx / w) as u8,
                event::CLEAR_INTENSITY,
            ));
            self.cells[idx] = Cell::EMPTY;
        }
    }

    fn analyze(&self, m: &MatchCluster) -> Interaction {
        let w = self.width;
        let mut around: Cells = SmallVec::new();
        for &c in &m.cells {
            for n in self.neighbours(c).into_iter().flatten() {
                let e = self.cells[n].element;
                if !m.cells.contains(&n) && e != EMPTY && e != STONE {
                    around.push(n);
                }
            }
        }
        around.sort_unstable();
        around.dedup();

        let touches = |el: u8| around.iter().any(|&n| self.cells[n].element == el);
        let (cx, cy) = (m.center % w, m.center / w);
        let mut hit: Cells = SmallVec::new();

        match m.element {
            METAL if touches(WOOD) => {
                hit.extend((0..w).map(|x| cy * w + x));
                hit.extend((0..self.height).map(|y| y * w + cx));
                Interaction::Destruction(hit)
            }
            WOOD if touches(EARTH) => {
                hit.extend((0..w).map(|x| cy * w + x));
                Interaction::Destruction(hit)
            }
            WATER if touches(FIRE) => {
                for y in cy.saturating_sub(1)..=(cy + 1).min(self.height - 1) {
                    for x in cx.saturating_sub(1)..=(cx + 1).min(w - 1) {
                        hit.push(y * w + x);
                    }
                }
                Interaction::Destruction(hit)
            }
            FIRE if touches(METAL) => {
                hit.extend(around.iter().copied().filter(|&n| self.cells[n].element == METAL));
                Interaction::Destruction(hit)
            }
            EARTH if touches(WATER) => {
                hit.extend(around.iter().copied().filter(|&n| self.cells[n].element == WATER));
                Interaction::Destruction(hit)
            }
            WOOD if touches(FIRE) => {
                hit.extend(m.cells.iter().copied());
                Interaction::Generation(hit)
            }
            METAL if touches(WATER) => {
                hit.extend(
                    around
                        .iter()
                        .copied()
                        .filter(|&n| self.cells[n].element != WATER && element::is_basic(self.cells[n].element)),
                );
                Interaction::Generation(hit)
            }
            WATER if touches(WOOD) => {
                hit.push(m.center);
                Interaction::Generation(hit)
            }
            _ => Interaction::None,
        }
    }

    fn push_event(&mut self, kind: u8, idx: usize, intensity: u8) {
        let (x, y) = (idx % self.width, idx / self.width);
        self.events.push(event::pack(kind, x as u8, y as u8, intensity));
    }
}
