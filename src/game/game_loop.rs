//! Fixed-timestep driver for one simulation room
//!
//! Per tick: drain inputs, advance the simulation instance through the
//! systems, compact the dead, then publish it with a buffer swap.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use hashbrown::HashMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rustc_hash::FxBuildHasher;
use tracing::{debug, info};

#[cfg(feature = "anticheat")]
use crate::anticheat::validator::InputValidator;
use crate::config::SimConfig;
use crate::game::constants::sim::MAX_FRAME_TIME;
use crate::game::double_buffer::DoubleBufferedWorld;
use crate::game::entity::EntityHandle;
use crate::game::input_buffer::{InputBuffer, InputMessage, InputSender};
use crate::game::performance::PerformanceMonitor;
use crate::game::schema::flags;
use crate::game::spatial::SpatialHashGrid;
use crate::game::spawn::{spawn_food, Colour};
use crate::game::systems::collision::{CollisionStats, CollisionSystem};
use crate::game::systems::skills::SkillStats;
use crate::game::systems::{movement, skills};
use crate::game::world::{World, WorldError};
use crate::metrics::Metrics;
use crate::net::protocol::ServerMessage;
use crate::util::diag::RateLimitedWarn;
use crate::util::vec2::Vec2;

/// Food spawned per tick while below target
const FOOD_PER_TICK: usize = 8;
/// Seconds between heartbeat log lines
const HEARTBEAT_SECS: u64 = 30;

/// Accumulator that converts variable frame time into whole fixed steps
#[derive(Debug, Clone)]
pub struct FixedStep {
    accumulator: f32,
    dt: f32,
    max_frame: f32,
}

impl FixedStep {
    pub fn new(dt: f32) -> Self {
        Self {
            accumulator: 0.0,
            dt,
            max_frame: MAX_FRAME_TIME,
        }
    }

    #[inline]
    pub fn dt(&self) -> f32 {
        self.dt
    }

    /// Add one frame of wall time. Returns the number of steps to run and
    /// the render alpha (fraction of a step left over).
    pub fn advance(&mut self, frame_dt: f32) -> (u32, f32) {
        // Clamp so a stall doesn't trigger a burst of catch-up steps
        let frame_dt = if frame_dt.is_finite() {
            frame_dt.clamp(0.0, self.max_frame)
        } else {
            0.0
        };
        self.accumulator += frame_dt;

        let mut steps = 0;
        while self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            steps += 1;
        }
        (steps, self.alpha())
    }

    #[inline]
    pub fn alpha(&self) -> f32 {
        (self.accumulator / self.dt).clamp(0.0, 1.0)
    }
}

/// How the simulation instance is prepared before a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickMode {
    /// Copy the published state in first. Required whenever a tick does not
    /// rewrite every published field, since the instance handed back by the
    /// swap is one tick stale.
    CopyThenAdvance,
    /// Advance whatever the simulation instance holds
    AdvanceInPlace,
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default)]
pub struct TickReport {
    pub tick: u64,
    pub inputs_applied: usize,
    pub inputs_rejected: usize,
    pub skills: SkillStats,
    pub collision: CollisionStats,
    pub spawned: usize,
    pub removed: usize,
}

pub struct GameLoop {
    buffers: Arc<DoubleBufferedWorld>,
    grid: SpatialHashGrid,
    collision: CollisionSystem,
    inputs: InputBuffer,
    step: FixedStep,
    mode: TickMode,
    world_size: f32,
    tick: u64,
    heartbeat_ticks: u64,

    // Reused every tick
    pending: Vec<InputMessage>,
    spawned: Vec<EntityHandle>,
    removed: Vec<EntityHandle>,

    /// Highest input sequence applied per controlled entity
    acked: HashMap<EntityHandle, u32, FxBuildHasher>,
    #[cfg(feature = "anticheat")]
    validator: InputValidator,
    reject_diag: RateLimitedWarn,

    food_target: usize,
    rng: ChaCha8Rng,

    performance: PerformanceMonitor,
    metrics: Arc<Metrics>,
}

impl GameLoop {
    pub fn new(config: &SimConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            buffers: Arc::new(DoubleBufferedWorld::new(config.max_entities)),
            grid: SpatialHashGrid::new(
                config.max_entities,
                0.0,
                config.world_size,
                config.grid_cell_size,
            ),
            collision: CollisionSystem::new(),
            inputs: InputBuffer::default(),
            step: FixedStep::new(config.dt()),
            mode: TickMode::CopyThenAdvance,
            world_size: config.world_size,
            tick: 0,
            heartbeat_ticks: (config.tick_rate.max(1) as u64) * HEARTBEAT_SECS,
            pending: Vec::with_capacity(256),
            spawned: Vec::with_capacity(64),
            removed: Vec::with_capacity(64),
            acked: HashMap::with_hasher(FxBuildHasher),
            #[cfg(feature = "anticheat")]
            validator: InputValidator::new(crate::anticheat::validator::ValidationConfig {
                world_size: config.world_size,
                ..Default::default()
            }),
            reject_diag: RateLimitedWarn::new("game_loop.input_rejected"),
            food_target: 0,
            rng: ChaCha8Rng::seed_from_u64(0x5eed),
            performance: PerformanceMonitor::new(config.tick_rate),
            metrics,
        }
    }

    pub fn with_mode(mut self, mode: TickMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    /// Keep roughly `count` food entities alive while performance allows
    pub fn set_food_target(&mut self, count: usize) {
        self.food_target = count;
    }

    /// Shared handle for readers (render, observers, packers)
    pub fn buffers(&self) -> &Arc<DoubleBufferedWorld> {
        &self.buffers
    }

    pub fn input_sender(&self) -> InputSender {
        self.inputs.sender()
    }

    pub fn inputs(&self) -> &InputBuffer {
        &self.inputs
    }

    #[inline]
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn mode(&self) -> TickMode {
        self.mode
    }

    pub fn performance(&self) -> &PerformanceMonitor {
        &self.performance
    }

    /// Handles created during the last tick (projectiles, food)
    pub fn spawned(&self) -> &[EntityHandle] {
        &self.spawned
    }

    /// Handles destroyed during the last tick
    pub fn removed(&self) -> &[EntityHandle] {
        &self.removed
    }

    pub fn last_acked(&self, entity: EntityHandle) -> Option<u32> {
        self.acked.get(&entity).copied()
    }

    /// Authoritative ack for `entity` from the published state
    pub fn input_ack(&self, entity: EntityHandle) -> Option<ServerMessage> {
        let sequence = self.last_acked(entity)?;
        let world = self.buffers.render_state();
        if !world.is_valid(entity) {
            return None;
        }
        let s = entity.slot;
        Some(ServerMessage::InputAck {
            sequence,
            tick: self.tick,
            position: Vec2::new(world.x(s), world.y(s)),
            velocity: Vec2::new(world.vx(s), world.vy(s)),
        })
    }

    /// Mutate the world outside a tick and publish the result immediately
    pub fn edit<R>(&mut self, f: impl FnOnce(&mut World) -> R) -> Result<R, WorldError> {
        if self.mode == TickMode::CopyThenAdvance {
            self.buffers.sync()?;
        }
        let out = {
            let mut sim = self.buffers.simulation_state();
            f(&mut sim)
        };
        self.buffers.swap();
        Ok(out)
    }

    /// Feed one frame of wall time; runs zero or more ticks and returns
    /// the render alpha.
    pub fn run_frame(&mut self, frame_dt: f32) -> Result<f32, WorldError> {
        let (steps, alpha) = self.step.advance(frame_dt);
        for _ in 0..steps {
            self.tick()?;
        }
        Ok(alpha)
    }

    /// Run exactly one fixed tick
    pub fn tick(&mut self) -> Result<TickReport, WorldError> {
        self.performance.tick_start();
        let dt = self.step.dt();

        if self.mode == TickMode::CopyThenAdvance {
            self.buffers.sync()?;
        }

        self.inputs.drain_into(&mut self.pending);
        self.spawned.clear();
        self.removed.clear();

        let buffers = self.buffers.clone();
        let mut report = TickReport {
            tick: self.tick + 1,
            ..Default::default()
        };
        let (active, agents, food, projectiles) = {
            let mut world = buffers.simulation_state();

            let (applied, rejected) = self.apply_inputs(&mut world);
            report.inputs_applied = applied;
            report.inputs_rejected = rejected;

            report.skills = skills::update(&mut world, dt, &mut self.spawned);
            movement::update(&mut world, dt, self.world_size);
            report.collision = self.collision.run(&mut world, &mut self.grid);
            world.compact_dead(&mut self.removed);
            for h in &self.removed {
                self.acked.remove(h);
            }

            self.top_up_food(&mut world);

            report.spawned = self.spawned.len();
            report.removed = self.removed.len();
            count_kinds(&world)
        };
        buffers.swap();
        self.tick += 1;

        if let Some(elapsed) = self.performance.tick_end(active) {
            self.metrics.record_tick_time(elapsed);
        }
        self.metrics.record_entities(active, agents, food, projectiles);
        self.metrics
            .record_systems(&report.collision, &report.skills, report.inputs_applied);
        self.metrics
            .buffer_swaps
            .store(buffers.swap_count(), Ordering::Relaxed);
        self.metrics.performance_status.store(
            self.performance.status().code(),
            Ordering::Relaxed,
        );
        self.metrics.budget_usage_percent.store(
            self.performance.budget_usage_percent() as u64,
            Ordering::Relaxed,
        );

        if report.collision.kills > 0 {
            debug!(tick = self.tick, kills = report.collision.kills, "Agents killed");
        }
        if self.tick % self.heartbeat_ticks == 0 {
            info!(
                tick = self.tick,
                entities = active,
                status = %self.performance.status_message(),
                "Simulation heartbeat"
            );
        }

        Ok(report)
    }

    fn apply_inputs(&mut self, world: &mut World) -> (usize, usize) {
        let (mut applied, mut rejected) = (0, 0);
        for msg in &self.pending {
            let (entity, cmd) = (msg.entity, msg.command);
            if !world.is_valid(entity) || world.flags(entity.slot) & flags::AGENT == 0 {
                rejected += 1;
                continue;
            }

            #[cfg(feature = "anticheat")]
            {
                let prev = self.acked.get(&entity).copied();
                let verdict = self
                    .validator
                    .validate_input(&cmd)
                    .and_then(|_| self.validator.validate_timing(cmd.tick, self.tick, 0))
                    .and_then(|_| match prev {
                        Some(p) => self.validator.validate_sequence(p, cmd.sequence),
                        None => Ok(()),
                    });
                if let Err(violation) = verdict {
                    rejected += 1;
                    self.reject_diag.warn(format_args!(
                        "input from slot {} rejected: {}",
                        entity.slot, violation
                    ));
                    continue;
                }
            }

            let s = entity.slot;
            world.set_target_x(s, cmd.target.x);
            world.set_target_y(s, cmd.target.y);
            world.set_actions(s, cmd.actions);
            let seq = self.acked.entry(entity).or_insert(cmd.sequence);
            *seq = (*seq).max(cmd.sequence);
            applied += 1;
        }

        if rejected > 0 {
            self.metrics
                .inputs_rejected
                .fetch_add(rejected as u64, Ordering::Relaxed);
        }
        (applied, rejected)
    }

    fn top_up_food(&mut self, world: &mut World) {
        if self.food_target == 0 || !self.performance.status().can_spawn() {
            return;
        }
        let food = world
            .active_entities()
            .iter()
            .filter(|&&s| world.has_flag(s, flags::FOOD))
            .count();
        let missing = self.food_target.saturating_sub(food).min(FOOD_PER_TICK);
        for _ in 0..missing {
            let pos = Vec2::new(
                self.rng.gen_range(0.0..self.world_size),
                self.rng.gen_range(0.0..self.world_size),
            );
            let colour: Colour = [self.rng.gen(), self.rng.gen(), self.rng.gen()];
            match spawn_food(world, pos, colour) {
                Ok(h) => self.spawned.push(h),
                Err(_) => break,
            }
        }
    }
}

/// (active, agents, food, projectiles)
fn count_kinds(world: &World) -> (usize, usize, usize, usize) {
    let (mut agents, mut food, mut projectiles) = (0, 0, 0);
    for &s in world.active_entities() {
        let f = world.flags(s);
        if f & flags::AGENT != 0 {
            agents += 1;
        } else if f & flags::FOOD != 0 {
            food += 1;
        } else if f & flags::PROJECTILE != 0 {
            projectiles += 1;
        }
    }
    (world.active_count(), agents, food, projectiles)
}
