use crate::game::constants::projectile::{COOLDOWN, DAMAGE, RADIUS as PROJECTILE_RADIUS, SPEED};
use crate::game::entity::EntityHandle;
use crate::game::schema::{actions, flags, status};
use crate::game::spawn::spawn_projectile;
use crate::game::world::World;
use crate::util::vec2::Vec2;

/// Per-tick skill counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkillStats {
    pub fired: u32,
    /// Shots lost because the world was full
    pub dropped: u32,
}

/// Tick status timers and cooldowns, then fire projectiles for agents
/// holding FIRE with the skill ready. Spawned projectile handles are
/// appended to `spawned`.
pub fn update(world: &mut World, dt: f32, spawned: &mut Vec<EntityHandle>) -> SkillStats {
    let mut stats = SkillStats::default();

    // Projectiles spawned this tick land past `count` and are not visited
    let count = world.active_count();
    for i in 0..count {
        let slot = world.active_entities()[i];
        if !world.is_alive(slot) {
            continue;
        }
        tick_status(world, slot, dt);

        if world.flags(slot) & flags::AGENT == 0 {
            continue;
        }
        let cooldown = (world.skill_cooldown(slot) - dt).max(0.0);
        world.set_skill_cooldown(slot, cooldown);

        let stunned = world.status(slot).is_some_and(|s| s.has(status::STUNNED));
        if world.actions(slot) & actions::FIRE == 0 || cooldown > 0.0 || stunned {
            continue;
        }

        match fire(world, slot) {
            Some(h) => {
                spawned.push(h);
                stats.fired += 1;
                let max = world.skill_cooldown_max(slot);
                world.set_skill_cooldown(slot, if max > 0.0 { max } else { COOLDOWN });
            }
            None => stats.dropped += 1,
        }
    }
    stats
}

fn tick_status(world: &mut World, slot: u32, dt: f32) {
    let Some(st) = world.status_mut(slot) else {
        return;
    };
    for (i, &effect) in status::TIMED.iter().enumerate() {
        if st.flags[effect] == 0 {
            continue;
        }
        st.timers[i] -= dt;
        if st.timers[i] <= 0.0 {
            st.timers[i] = 0.0;
            st.flags[effect] = 0;
        }
    }
}

fn fire(world: &mut World, slot: u32) -> Option<EntityHandle> {
    let owner = world.handle_of(slot)?;
    let origin = Vec2::new(world.x(slot), world.y(slot));
    let target = Vec2::new(world.target_x(slot), world.target_y(slot));

    let mut dir = (target - origin).normalize();
    if dir == Vec2::ZERO {
        let r = world.rotation(slot);
        dir = Vec2::new(r.cos(), r.sin());
    }
    let offset = world.radius(slot) + PROJECTILE_RADIUS + 1.0;
    let damage = DAMAGE * world.damage_multiplier(slot);

    spawn_projectile(world, owner, origin + dir * offset, dir * SPEED, damage).ok()
}
