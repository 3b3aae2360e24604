//! Deterministic seeded grid simulation
//!
//! Runs identically on client and server from the same seed and move list,
//! which is what the replay validator relies on.

pub mod board;
pub mod cycle;

pub use board::{Board, BoardError, Cell, MatchCluster, MatchPattern};
pub use cycle::{CycleOutcome, CycleTracker};

/// Cell element ids
pub mod element {
    pub const EMPTY: u8 = 0;
    pub const METAL: u8 = 1;
    pub const WOOD: u8 = 2;
    pub const WATER: u8 = 3;
    pub const FIRE: u8 = 4;
    pub const EARTH: u8 = 5;
    /// Immovable blocker; never swaps or matches
    pub const STONE: u8 = 10;

    #[inline]
    pub fn is_basic(e: u8) -> bool {
        (METAL..=EARTH).contains(&e)
    }
}

/// Cell flag bits
pub mod cell_flags {
    pub const FROZEN: u8 = 1;
    pub const BURNING: u8 = 2;
    pub const LOCKED: u8 = 4;
    pub const WET: u8 = 8;
}
