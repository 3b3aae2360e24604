use crate::game::constants::agent::{ARRIVE_RADIUS, BOOST_MULTIPLIER, STEER_RATE};
use crate::game::schema::{actions, flags, status};
use crate::game::world::World;
use crate::util::vec2::Vec2;

/// Position + velocity of one moving body
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Kinematics {
    pub position: Vec2,
    pub velocity: Vec2,
}

/// Everything besides the input that shapes one steering step
#[derive(Debug, Clone, Copy)]
pub struct SteerParams {
    pub max_speed: f32,
    pub speed_multiplier: f32,
    pub stunned: bool,
    pub boosted: bool,
    pub world_size: f32,
}

/// Advance one agent toward `target` for one tick.
///
/// Shared by the server tick and client-side prediction so that replayed
/// inputs reproduce the authoritative result.
pub fn steer(k: Kinematics, target: Vec2, action_bits: u32, p: &SteerParams, dt: f32) -> Kinematics {
    let mut speed = p.max_speed * p.speed_multiplier;
    if action_bits & actions::BOOST != 0 || p.boosted {
        speed *= BOOST_MULTIPLIER;
    }

    let to_target = target - k.position;
    let dist = to_target.length();
    let desired = if p.stunned || dist < ARRIVE_RADIUS || !target.is_finite() {
        Vec2::ZERO
    } else {
        // Never ask for more than would reach the target this tick
        to_target.normalize() * speed.min(dist / dt)
    };

    let blend = (STEER_RATE * dt).min(1.0);
    let mut velocity = k.velocity + (desired - k.velocity) * blend;
    let mut position = k.position + velocity * dt;

    if position.x < 0.0 || position.x > p.world_size {
        position.x = position.x.clamp(0.0, p.world_size);
        velocity.x = 0.0;
    }
    if position.y < 0.0 || position.y > p.world_size {
        position.y = position.y.clamp(0.0, p.world_size);
        velocity.y = 0.0;
    }

    Kinematics { position, velocity }
}

/// Integrate every live agent and projectile for one tick
pub fn update(world: &mut World, dt: f32, world_size: f32) {
    for i in 0..world.active_count() {
        let slot = world.active_entities()[i];
        if !world.is_alive(slot) {
            continue;
        }
        let f = world.flags(slot);

        if let Some(t) = world.transform_mut(slot) {
            t.prev_x = t.x;
            t.prev_y = t.y;
            t.prev_rotation = t.rotation;
        }

        if f & flags::AGENT != 0 {
            update_agent(world, slot, dt, world_size);
        } else if f & flags::PROJECTILE != 0 {
            update_projectile(world, slot, dt, world_size);
        }
    }
}

fn update_agent(world: &mut World, slot: u32, dt: f32, world_size: f32) {
    let (Some(t), Some(ph), Some(input), Some(cfg), Some(st)) = (
        world.transform(slot),
        world.physics(slot),
        world.input(slot),
        world.move_config(slot),
        world.status(slot),
    ) else {
        return;
    };

    let params = SteerParams {
        max_speed: cfg.max_speed,
        speed_multiplier: cfg.speed_multiplier,
        stunned: st.has(status::STUNNED),
        boosted: st.has(status::BOOSTED),
        world_size,
    };
    let before = Kinematics {
        position: Vec2::new(t.x, t.y),
        velocity: Vec2::new(ph.vx, ph.vy),
    };
    let after = steer(
        before,
        Vec2::new(input.target_x, input.target_y),
        input.actions,
        &params,
        dt,
    );

    if let Some(t) = world.transform_mut(slot) {
        t.x = after.position.x;
        t.y = after.position.y;
        if after.velocity.length_sq() > 1e-6 {
            t.rotation = after.velocity.angle();
        }
    }
    if let Some(ph) = world.physics_mut(slot) {
        ph.vx = after.velocity.x;
        ph.vy = after.velocity.y;
    }
}

fn update_projectile(world: &mut World, slot: u32, dt: f32, world_size: f32) {
    let (Some(t), Some(ph)) = (world.transform(slot), world.physics(slot)) else {
        return;
    };
    let x = t.x + ph.vx * dt;
    let y = t.y + ph.vy * dt;
    world.set_x(slot, x);
    world.set_y(slot, y);

    let lifetime = world.projectile_lifetime(slot) - dt;
    world.set_projectile_lifetime(slot, lifetime);

    let outside = x < 0.0 || y < 0.0 || x > world_size || y > world_size;
    if lifetime <= 0.0 || outside {
        world.mark_dead(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::schema::EntityKind;

    const DT: f32 = 1.0 / 60.0;

    fn params() -> SteerParams {
        SteerParams {
            max_speed: 200.0,
            speed_multiplier: 1.0,
            stunned: false,
            boosted: false,
            world_size: 1000.0,
        }
    }

    #[test]
    fn test_steer_moves_toward_target() {
        let k = Kinematics {
            position: Vec2::new(100.0, 100.0),
            velocity: Vec2::ZERO,
        };
        let target = Vec2::new(500.0, 100.0);
        let mut cur = k;
        for _ in 0..30 {
            cur = steer(cur, target, 0, &params(), DT);
        }
        assert!(cur.position.x > 150.0);
        assert!((cur.position.y - 100.0).abs() < 1e-3);
        assert!(cur.velocity.length() <= 200.0 + 1e-3);
    }

    #[test]
    fn test_steer_is_deterministic() {
        let k = Kinematics {
            position: Vec2::new(10.0, 20.0),
            velocity: Vec2::new(5.0, -3.0),
        };
        let a = steer(k, Vec2::new(300.0, 400.0), actions::BOOST, &params(), DT);
        let b = steer(k, Vec2::new(300.0, 400.0), actions::BOOST, &params(), DT);
        assert_eq!(a, b);
    }

    #[test]
    fn test_boost_is_faster() {
        let k = Kinematics {
            position: Vec2::new(100.0, 100.0),
            velocity: Vec2::ZERO,
        };
        let target = Vec2::new(900.0, 100.0);
        let (mut plain, mut boosted) = (k, k);
        for _ in 0..60 {
            plain = steer(plain, target, 0, &params(), DT);
            boosted = steer(boosted, target, actions::BOOST, &params(), DT);
        }
        assert!(boosted.position.x > plain.position.x);
    }

    #[test]
    fn test_stunned_agent_decelerates() {
        let k = Kinematics {
            position: Vec2::new(100.0, 100.0),
            velocity: Vec2::new(100.0, 0.0),
        };
        let p = SteerParams {
            stunned: true,
            ..params()
        };
        let next = steer(k, Vec2::new(900.0, 100.0), 0, &p, DT);
        assert!(next.velocity.x < 100.0);
    }

    #[test]
    fn test_clamped_to_world() {
        let k = Kinematics {
            position: Vec2::new(999.0, 500.0),
            velocity: Vec2::new(500.0, 0.0),
        };
        let next = steer(k, Vec2::new(2000.0, 500.0), 0, &params(), DT);
        assert_eq!(next.position.x, 1000.0);
        assert_eq!(next.velocity.x, 0.0);
    }

    #[test]
    fn test_update_records_previous_position() {
        let mut world = World::new(4);
        let h = world.create_entity(EntityKind::Player).unwrap();
        world.set_x(h.slot, 100.0);
        world.set_y(h.slot, 100.0);
        world.set_max_speed(h.slot, 200.0);
        world.set_target_x(h.slot, 400.0);
        world.set_target_y(h.slot, 100.0);

        update(&mut world, DT, 1000.0);
        assert_eq!(world.prev_x(h.slot), 100.0);
        assert!(world.x(h.slot) > 100.0);
    }

    #[test]
    fn test_projectile_expires() {
        let mut world = World::new(4);
        let h = world.create_entity(EntityKind::Projectile).unwrap();
        world.set_x(h.slot, 500.0);
        world.set_y(h.slot, 500.0);
        world.set_vx(h.slot, 60.0);
        world.set_projectile_lifetime(h.slot, DT * 1.5);

        update(&mut world, DT, 1000.0);
        assert!(world.is_alive(h.slot));
        assert!((world.x(h.slot) - 501.0).abs() < 1e-3);

        update(&mut world, DT, 1000.0);
        assert!(!world.is_alive(h.slot));
    }

    #[test]
    fn test_projectile_leaving_world_dies() {
        let mut world = World::new(4);
        let h = world.create_entity(EntityKind::Projectile).unwrap();
        world.set_x(h.slot, 999.0);
        world.set_vx(h.slot, 600.0);
        world.set_projectile_lifetime(h.slot, 5.0);
        update(&mut world, DT, 1000.0);
        assert!(!world.is_alive(h.slot));
    }
}
