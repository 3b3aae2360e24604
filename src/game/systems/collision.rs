//! Agent vs passive-entity interaction
//!
//! Passive entities (food, projectiles) are inserted into the grid, then every
//! agent queries its reach. All (agent, candidate) contacts of the tick are
//! then resolved nearest-first, ties broken by agent slot and then candidate
//! slot, so a contested pickup goes to the closest agent and the outcome does
//! not depend on grid chain or active-set order. Consumed entities are only
//! flagged dead here; the end-of-tick compaction removes them.

use crate::game::constants::{food, projectile::KILL_SCORE};
use crate::game::schema::{flags, status};
use crate::game::spatial::SpatialHashGrid;
use crate::game::world::World;

/// Per-tick collision counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollisionStats {
    pub queries: u32,
    pub pickups: u32,
    pub hits: u32,
    /// Hits absorbed by a shield
    pub blocked: u32,
    pub kills: u32,
}

/// Owns the scratch buffers so a tick never allocates once warmed up
pub struct CollisionSystem {
    candidates: Vec<u32>,
    /// (distance squared, agent, candidate) for every contact this tick
    contacts: Vec<(f32, u32, u32)>,
}

impl CollisionSystem {
    pub fn new() -> Self {
        Self {
            candidates: Vec::with_capacity(256),
            contacts: Vec::with_capacity(256),
        }
    }

    /// Rebuild the grid from the world's passive entities
    pub fn rebuild_grid(&self, world: &World, grid: &mut SpatialHashGrid) {
        grid.clear_dynamic(world);
        for &slot in world.active_entities() {
            if !world.is_alive(slot) {
                continue;
            }
            let f = world.flags(slot);
            if f & flags::PASSIVE != 0 {
                grid.add(world, slot, false);
            } else if f & flags::STATIC != 0 && !grid.contains(slot) {
                grid.add(world, slot, true);
            }
        }
    }

    pub fn run(&mut self, world: &mut World, grid: &mut SpatialHashGrid) -> CollisionStats {
        let mut stats = CollisionStats::default();
        self.rebuild_grid(world, grid);

        self.contacts.clear();
        for i in 0..world.active_count() {
            let agent = world.active_entities()[i];
            if !world.is_alive(agent) || world.flags(agent) & flags::AGENT == 0 {
                continue;
            }
            let (ax, ay) = (world.x(agent), world.y(agent));
            let reach = world.radius(agent) + world.magnet_radius(agent);

            grid.query_radius_into(world, ax, ay, reach, &mut self.candidates);
            stats.queries += 1;

            for &c in &self.candidates {
                if c == agent {
                    continue;
                }
                let dx = world.x(c) - ax;
                let dy = world.y(c) - ay;
                self.contacts.push((dx * dx + dy * dy, agent, c));
            }
        }
        self.contacts.sort_unstable_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        for k in 0..self.contacts.len() {
            let (dist_sq, agent, other) = self.contacts[k];
            if !world.is_alive(agent) || !world.is_alive(other) {
                continue;
            }
            let f = world.flags(other);
            if f & flags::FOOD != 0 {
                consume_food(world, agent, other);
                stats.pickups += 1;
            } else if f & flags::PROJECTILE != 0 {
                let touch = world.radius(agent) + world.radius(other);
                if dist_sq > touch * touch {
                    continue;
                }
                match projectile_hit(world, agent, other) {
                    HitOutcome::Ignored => {}
                    HitOutcome::Blocked => stats.blocked += 1,
                    HitOutcome::Damaged => stats.hits += 1,
                    HitOutcome::Killed => {
                        stats.hits += 1;
                        stats.kills += 1;
                    }
                }
            }
        }
        stats
    }
}

impl Default for CollisionSystem {
    fn default() -> Self {
        Self::new()
    }
}

fn consume_food(world: &mut World, agent: u32, food_slot: u32) {
    let worth = match world.score(food_slot) {
        s if s > 0.0 => s,
        _ => food::SCORE,
    };
    let score = world.score(agent) + worth;
    world.set_score(agent, score);

    let colour = world
        .pigment(food_slot)
        .map(|p| (p.r, p.g, p.b))
        .unwrap_or_default();
    if let Some(p) = world.pigment_mut(agent) {
        let rate = if p.mix_rate > 0.0 { p.mix_rate } else { food::PIGMENT_BLEND };
        p.r += (colour.0 - p.r) * rate;
        p.g += (colour.1 - p.g) * rate;
        p.b += (colour.2 - p.b) * rate;
        let pct = p.match_percent();
        world.set_match_percent(agent, pct);
    }
    world.mark_dead(food_slot);
}

enum HitOutcome {
    Ignored,
    Blocked,
    Damaged,
    Killed,
}

fn projectile_hit(world: &mut World, agent: u32, proj: u32) -> HitOutcome {
    let Some(p) = world.projectile(proj).copied() else {
        return HitOutcome::Ignored;
    };
    let Some(agent_handle) = world.handle_of(agent) else {
        return HitOutcome::Ignored;
    };
    if p.owner_slot == agent_handle.slot && p.owner_generation == agent_handle.generation {
        return HitOutcome::Ignored;
    }

    world.mark_dead(proj);
    if world.status(agent).is_some_and(|s| s.has(status::SHIELDED)) {
        return HitOutcome::Blocked;
    }

    let reduction = world.defense(agent).clamp(0.0, 0.9);
    let hp = world.hp(agent) - p.damage * (1.0 - reduction);
    world.set_hp(agent, hp);
    if hp > 0.0 {
        return HitOutcome::Damaged;
    }

    world.mark_dead(agent);
    let owner_alive = world
        .handle_of(p.owner_slot)
        .is_some_and(|h| h.generation == p.owner_generation && world.is_alive(p.owner_slot));
    if owner_alive {
        let score = world.score(p.owner_slot) + KILL_SCORE;
        world.set_score(p.owner_slot, score);
    }
    HitOutcome::Killed
}
