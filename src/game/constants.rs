/// Simulation timing
pub mod sim {
    /// Fixed simulation rate in Hz
    pub const TICK_RATE: u32 = 60;
    /// Delta time per tick in seconds
    pub const DT: f32 = 1.0 / 60.0;
    /// Tick duration in milliseconds
    pub const TICK_DURATION_MS: u64 = 1000 / TICK_RATE as u64;
    /// Frame time clamp for the accumulator (spiral-of-death guard)
    pub const MAX_FRAME_TIME: f32 = 0.25;
}

/// World storage and bounds
pub mod world {
    /// Default entity capacity of one World instance
    pub const MAX_ENTITIES: usize = 4096;
    /// Side length of the square world in units (origin at 0,0)
    pub const SIZE: f32 = 4000.0;
    /// Spatial grid cell size in units
    pub const GRID_CELL_SIZE: f32 = 100.0;
}

/// Spatial grid safety caps
pub mod spatial {
    /// Maximum chain nodes visited by one radius query
    pub const MAX_QUERY_ITERATIONS: usize = 16_384;
    /// Maximum hits returned by one radius query
    pub const MAX_QUERY_RESULTS: usize = 512;
}

/// Agent (player/bot) defaults
pub mod agent {
    pub const MAX_HP: f32 = 100.0;
    pub const RADIUS: f32 = 20.0;
    pub const MASS: f32 = 1.0;
    /// Base top speed in units/second
    pub const MAX_SPEED: f32 = 220.0;
    /// Extra pickup reach beyond the body radius
    pub const MAGNET_RADIUS: f32 = 30.0;
    /// Steering responsiveness (fraction of velocity error removed per second)
    pub const STEER_RATE: f32 = 10.0;
    /// Distance under which the agent stops steering toward its target
    pub const ARRIVE_RADIUS: f32 = 4.0;
    /// Speed multiplier while BOOST is held
    pub const BOOST_MULTIPLIER: f32 = 1.6;
}

/// Food (pickup) defaults
pub mod food {
    pub const RADIUS: f32 = 6.0;
    /// Score awarded per pickup
    pub const SCORE: f32 = 10.0;
    /// Fraction of the distance toward the food colour blended per pickup
    pub const PIGMENT_BLEND: f32 = 0.1;
}

/// Projectile skill
pub mod projectile {
    pub const SPEED: f32 = 600.0;
    pub const RADIUS: f32 = 4.0;
    pub const DAMAGE: f32 = 15.0;
    /// Lifetime in seconds
    pub const LIFETIME: f32 = 1.5;
    /// Skill cooldown in seconds
    pub const COOLDOWN: f32 = 0.5;
    /// Score awarded to the owner for a kill
    pub const KILL_SCORE: f32 = 50.0;
    /// Skill id stored in the Skill component
    pub const SKILL_ID: u32 = 1;
}

/// Networking
pub mod net {
    /// Maximum datagram (unreliable) size
    pub const MAX_DATAGRAM_SIZE: usize = 1200;
    /// Pooled scratch buffers per packer
    pub const POOL_BUFFERS: usize = 4;
    /// Bytes per pooled scratch buffer
    pub const POOL_BUFFER_SIZE: usize = 16 * 1024;
    /// Snapshots kept for interpolation
    pub const SNAPSHOT_CAPACITY: usize = 32;
    /// Render delay behind the newest snapshot, in seconds
    pub const INTERPOLATION_DELAY: f32 = 0.1;
    /// Pending local inputs kept for reconciliation
    pub const INPUT_HISTORY: usize = 128;
    /// Divergence (units) above which reconciliation snaps instead of blending
    pub const SNAP_THRESHOLD: f32 = 64.0;
    /// Fraction of the visual correction offset removed per second
    pub const CORRECTION_DECAY: f32 = 10.0;
}

/// Replay validation
pub mod replay {
    /// Accepted excess of claimed over server score (fraction)
    pub const SCORE_TOLERANCE: f32 = 0.10;
    /// Ticks allowed for the board to settle after each move
    pub const MAX_SETTLE_TICKS: u32 = 1000;
    /// Confidence at or above which an anomaly fails validation
    pub const HIGH_CONFIDENCE: f32 = 0.9;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_rate() {
        assert_eq!(sim::TICK_RATE, 60);
        assert!((sim::DT - 1.0 / 60.0).abs() < 0.0001);
        assert!(sim::MAX_FRAME_TIME > sim::DT);
    }

    #[test]
    fn test_grid_covers_world() {
        let cells = (world::SIZE / world::GRID_CELL_SIZE).ceil() as usize;
        assert!(cells > 1);
        assert!(cells * cells < 1 << 20);
    }

    #[test]
    fn test_projectile_outlives_one_tick() {
        assert!(projectile::LIFETIME > sim::DT);
        assert!(projectile::COOLDOWN > sim::DT);
    }

    #[test]
    fn test_pool_buffer_fits_datagram() {
        assert!(net::POOL_BUFFER_SIZE >= net::MAX_DATAGRAM_SIZE);
    }
}
