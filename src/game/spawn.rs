//! Kind-specific entity initialisation on top of `World::create_entity`

use crate::game::constants::{agent, food, projectile};
use crate::game::entity::EntityHandle;
use crate::game::schema::{EntityKind, Pigment};
use crate::game::world::{World, WorldError};
use crate::util::vec2::Vec2;

/// RGB triple in 0..1
pub type Colour = [f32; 3];

/// Spawn a player or bot at `position`, aiming for `target_colour`
pub fn spawn_agent(
    world: &mut World,
    kind: EntityKind,
    position: Vec2,
    target_colour: Colour,
) -> Result<EntityHandle, WorldError> {
    let h = world.create_entity(kind)?;
    let s = h.slot;
    world.set_x(s, position.x);
    world.set_y(s, position.y);
    world.set_prev_x(s, position.x);
    world.set_prev_y(s, position.y);
    world.set_target_x(s, position.x);
    world.set_target_y(s, position.y);
    world.set_radius(s, agent::RADIUS);
    world.set_hp(s, agent::MAX_HP);
    world.set_max_hp(s, agent::MAX_HP);
    world.set_max_speed(s, agent::MAX_SPEED);
    world.set_magnet_radius(s, agent::MAGNET_RADIUS);
    world.set_skill_id(s, projectile::SKILL_ID);
    world.set_skill_cooldown_max(s, projectile::COOLDOWN);
    if let Some(p) = world.pigment_mut(s) {
        *p = Pigment {
            r: 0.5,
            g: 0.5,
            b: 0.5,
            target_r: target_colour[0],
            target_g: target_colour[1],
            target_b: target_colour[2],
            mix_rate: food::PIGMENT_BLEND,
            _pad: 0.0,
        };
        let pct = p.match_percent();
        world.set_match_percent(s, pct);
    }
    Ok(h)
}

/// Spawn a food pickup carrying `colour`
pub fn spawn_food(
    world: &mut World,
    position: Vec2,
    colour: Colour,
) -> Result<EntityHandle, WorldError> {
    let h = world.create_entity(EntityKind::Food)?;
    let s = h.slot;
    world.set_x(s, position.x);
    world.set_y(s, position.y);
    world.set_prev_x(s, position.x);
    world.set_prev_y(s, position.y);
    world.set_radius(s, food::RADIUS);
    world.set_score(s, food::SCORE);
    world.set_pigment_r(s, colour[0]);
    world.set_pigment_g(s, colour[1]);
    world.set_pigment_b(s, colour[2]);
    Ok(h)
}

/// Spawn a projectile owned by `owner`
pub fn spawn_projectile(
    world: &mut World,
    owner: EntityHandle,
    position: Vec2,
    velocity: Vec2,
    damage: f32,
) -> Result<EntityHandle, WorldError> {
    let h = world.create_entity(EntityKind::Projectile)?;
    let s = h.slot;
    world.set_x(s, position.x);
    world.set_y(s, position.y);
    world.set_prev_x(s, position.x);
    world.set_prev_y(s, position.y);
    world.set_vx(s, velocity.x);
    world.set_vy(s, velocity.y);
    world.set_rotation(s, velocity.angle());
    world.set_radius(s, projectile::RADIUS);
    world.set_projectile_owner_slot(s, owner.slot);
    world.set_projectile_owner_generation(s, owner.generation);
    world.set_projectile_damage(s, damage);
    world.set_projectile_lifetime(s, projectile::LIFETIME);
    Ok(h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::schema::flags;

    #[test]
    fn test_spawn_agent_defaults() {
        let mut world = World::new(4);
        let h = spawn_agent(&mut world, EntityKind::Bot, Vec2::new(10.0, 20.0), [1.0, 0.0, 0.0]).unwrap();
        assert!(world.has_flag(h.slot, flags::BOT));
        assert_eq!(world.hp(h.slot), agent::MAX_HP);
        assert_eq!(world.radius(h.slot), agent::RADIUS);
        assert_eq!(world.target_x(h.slot), 10.0);
        assert!(world.match_percent(h.slot) > 0.0);
    }

    #[test]
    fn test_spawn_projectile_records_owner() {
        let mut world = World::new(4);
        let owner = spawn_agent(&mut world, EntityKind::Player, Vec2::ZERO, [0.0; 3]).unwrap();
        let p = spawn_projectile(&mut world, owner, Vec2::new(1.0, 1.0), Vec2::new(10.0, 0.0), 5.0).unwrap();
        assert_eq!(world.projectile_owner_slot(p.slot), owner.slot);
        assert_eq!(world.projectile_owner_generation(p.slot), owner.generation);
        assert_eq!(world.projectile_damage(p.slot), 5.0);
    }

    #[test]
    fn test_spawn_fails_when_full() {
        let mut world = World::new(1);
        spawn_food(&mut world, Vec2::ZERO, [0.0; 3]).unwrap();
        assert!(spawn_food(&mut world, Vec2::ZERO, [0.0; 3]).is_err());
    }
}
