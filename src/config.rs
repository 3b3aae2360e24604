use std::str::FromStr;

use crate::game::constants::{net, replay, sim, world};

/// Simulation room configuration
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Entity capacity of each World instance
    pub max_entities: usize,
    /// Fixed simulation rate in Hz
    pub tick_rate: u32,
    /// Side length of the square world
    pub world_size: f32,
    pub grid_cell_size: f32,
    pub pool_buffers: usize,
    pub pool_buffer_size: usize,
    /// Divergence above which client reconciliation snaps instead of blending
    pub snap_threshold: f32,
    /// Accepted excess of a claimed replay score over the server score
    pub score_tolerance: f32,
    pub bot_count: usize,
    pub food_count: usize,
    pub metrics_port: u16,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            max_entities: world::MAX_ENTITIES,
            tick_rate: sim::TICK_RATE,
            world_size: world::SIZE,
            grid_cell_size: world::GRID_CELL_SIZE,
            pool_buffers: net::POOL_BUFFERS,
            pool_buffer_size: net::POOL_BUFFER_SIZE,
            snap_threshold: net::SNAP_THRESHOLD,
            score_tolerance: replay::SCORE_TOLERANCE,
            bot_count: 32,
            food_count: 400,
            metrics_port: 9090,
        }
    }
}

/// Parse `key` into `slot` if set, valid and accepted by `accept`
fn load_var<T: FromStr + Copy>(key: &str, slot: &mut T, accept: impl Fn(T) -> bool, expect: &str) {
    let Ok(raw) = std::env::var(key) else {
        return;
    };
    match raw.parse::<T>() {
        Ok(v) if accept(v) => *slot = v,
        Ok(_) => tracing::warn!("{} must be {}, using default", key, expect),
        Err(_) => tracing::warn!("Invalid {} '{}', using default", key, raw),
    }
}

impl SimConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut c = Self::default();

        load_var("MAX_ENTITIES", &mut c.max_entities, |v| (16..=1 << 20).contains(&v), "16-1048576");
        load_var("TICK_RATE", &mut c.tick_rate, |v| (1..=240).contains(&v), "1-240");
        load_var("WORLD_SIZE", &mut c.world_size, |v: f32| v.is_finite() && v > 0.0, "> 0");
        load_var("GRID_CELL_SIZE", &mut c.grid_cell_size, |v: f32| v.is_finite() && v > 0.0, "> 0");
        load_var("POOL_BUFFERS", &mut c.pool_buffers, |v| (1..=64).contains(&v), "1-64");
        load_var("POOL_BUFFER_SIZE", &mut c.pool_buffer_size, |v| v >= net::MAX_DATAGRAM_SIZE, "at least one datagram");
        load_var("SNAP_THRESHOLD", &mut c.snap_threshold, |v: f32| v.is_finite() && v >= 0.0, ">= 0");
        load_var("SCORE_TOLERANCE", &mut c.score_tolerance, |v: f32| (0.0..=10.0).contains(&v), "0-10");
        load_var("BOT_COUNT", &mut c.bot_count, |_| true, "");
        load_var("FOOD_COUNT", &mut c.food_count, |_| true, "");
        load_var("METRICS_PORT", &mut c.metrics_port, |v| v > 0, "> 0");

        c
    }

    #[inline]
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_rate == 0 {
            return Err("tick_rate must be at least 1".to_string());
        }
        if self.grid_cell_size <= 0.0 || self.grid_cell_size > self.world_size {
            return Err("grid_cell_size must be in (0, world_size]".to_string());
        }
        if self.bot_count + self.food_count >= self.max_entities {
            return Err(format!(
                "bot_count + food_count ({}) must leave room below max_entities ({})",
                self.bot_count + self.food_count,
                self.max_entities
            ));
        }
        if self.pool_buffer_size < net::MAX_DATAGRAM_SIZE {
            return Err("pool_buffer_size smaller than one datagram".to_string());
        }
        Ok(())
    }
}
