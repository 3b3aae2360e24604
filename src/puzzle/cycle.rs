use super::element::{EARTH, FIRE, METAL, WATER, WOOD};
use serde::{Deserialize, Serialize};

/// Chain length that enters the boosted state
pub const AVATAR_CHAIN: u32 = 5;

/// Result of feeding one match into the cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    pub hit: bool,
    /// Score multiplier for this match
    pub multiplier: u32,
}

/// Element cycle Water -> Wood -> Fire -> Earth -> Metal -> Water
///
/// Matching the current target extends the chain and raises the multiplier;
/// anything else resets it. A full chain enters the boosted state, in which
/// every match counts as a hit at double multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleTracker {
    pub target: u8,
    pub chain: u32,
    pub multiplier: u32,
    pub boosted: bool,
}

impl CycleTracker {
    pub fn new() -> Self {
        Self {
            target: WATER,
            chain: 0,
            multiplier: 1,
            boosted: false,
        }
    }

    pub fn next_target(element: u8) -> u8 {
        match element {
            WATER => WOOD,
            WOOD => FIRE,
            FIRE => EARTH,
            EARTH => METAL,
            METAL => WATER,
            _ => WATER,
        }
    }

    pub fn process(&mut self, element: u8) -> CycleOutcome {
        if self.boosted {
            self.multiplier = self.multiplier.saturating_add(1);
            return CycleOutcome {
                hit: true,
                multiplier: self.multiplier.saturating_mul(2),
            };
        }

        if element != self.target {
            self.reset();
            return CycleOutcome {
                hit: false,
                multiplier: 1,
            };
        }

        self.chain += 1;
        self.multiplier = self.multiplier.saturating_add(1);
        if self.chain >= AVATAR_CHAIN {
            self.boosted = true;
        }
        self.target = Self::next_target(self.target);
        CycleOutcome {
            hit: true,
            multiplier: self.multiplier,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for CycleTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_water() {
        let c = CycleTracker::new();
        assert_eq!(c.target, WATER);
        assert_eq!(c.multiplier, 1);
    }

    #[test]
    fn test_hit_advances_target() {
        let mut c = CycleTracker::new();
        let out = c.process(WATER);
        assert!(out.hit);
        assert_eq!(out.multiplier, 2);
        assert_eq!(c.target, WOOD);
        assert_eq!(c.chain, 1);
    }

    #[test]
    fn test_miss_resets() {
        let mut c = CycleTracker::new();
        c.process(WATER);
        let out = c.process(METAL);
        assert!(!out.hit);
        assert_eq!(out.multiplier, 1);
        assert_eq!(c, CycleTracker::new());
    }

    #[test]
    fn test_full_cycle_boosts() {
        let mut c = CycleTracker::new();
        for e in [WATER, WOOD, FIRE, EARTH, METAL] {
            assert!(c.process(e).hit);
        }
        assert!(c.boosted);
        assert_eq!(c.target, WATER);
        // Boosted: any element hits at double multiplier
        let out = c.process(FIRE);
        assert!(out.hit);
        assert_eq!(out.multiplier, 7 * 2);
    }

    #[test]
    fn test_boosted_multiplier_saturates() {
        let mut c = CycleTracker::new();
        c.boosted = true;
        c.multiplier = u32::MAX - 1;
        assert_eq!(c.process(WOOD).multiplier, u32::MAX);
        assert_eq!(c.process(WOOD).multiplier, u32::MAX);
        assert_eq!(c.multiplier, u32::MAX);
    }
}
