//! Fixed-capacity component store
//!
//! Every component lives in its own pre-sized buffer indexed by entity slot.
//! Nothing here allocates after construction; out-of-range access is a
//! no-op with a rate-limited warning.

use super::entity::{AllocError, EntityAllocator, EntityHandle};
use super::schema::{
    field_accessors, flags, ComponentKind, EntityKind, Input, MoveConfig, Physics, Pigment,
    Projectile, Skill, Stats, Status, Transform,
};
use crate::game::constants::agent;
use crate::util::diag::RateLimitedWarn;
use thiserror::Error;

const NOT_PRESENT: u32 = u32::MAX;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorldError {
    #[error("world is full ({0} entities)")]
    Full(usize),
    #[error("capacity mismatch: {expected} vs {actual}")]
    CapacityMismatch { expected: usize, actual: usize },
    #[error("stale or out-of-range handle {0:?}")]
    StaleHandle(EntityHandle),
}

impl From<AllocError> for WorldError {
    fn from(err: AllocError) -> Self {
        match err {
            AllocError::Full(n) => WorldError::Full(n),
        }
    }
}

#[derive(Debug)]
pub struct World {
    allocator: EntityAllocator,
    transforms: Box<[Transform]>,
    physics: Box<[Physics]>,
    stats: Box<[Stats]>,
    inputs: Box<[Input]>,
    move_configs: Box<[MoveConfig]>,
    skills: Box<[Skill]>,
    projectiles: Box<[Projectile]>,
    statuses: Box<[Status]>,
    pigments: Box<[Pigment]>,
    flags: Box<[u32]>,
    /// Dense active slots; `[0..active_count)` is meaningful
    dense: Box<[u32]>,
    /// slot -> position in `dense`, or NOT_PRESENT
    sparse: Box<[u32]>,
    active_count: usize,
    bounds_diag: RateLimitedWarn,
}

fn buffer<T: Copy + Default>(capacity: usize) -> Box<[T]> {
    vec![T::default(); capacity].into_boxed_slice()
}

impl World {
    pub fn new(capacity: usize) -> Self {
        Self {
            allocator: EntityAllocator::new(capacity),
            transforms: buffer(capacity),
            physics: buffer(capacity),
            stats: buffer(capacity),
            inputs: buffer(capacity),
            move_configs: buffer(capacity),
            skills: buffer(capacity),
            projectiles: buffer(capacity),
            statuses: buffer(capacity),
            pigments: buffer(capacity),
            flags: buffer(capacity),
            dense: buffer(capacity),
            sparse: vec![NOT_PRESENT; capacity].into_boxed_slice(),
            active_count: 0,
            bounds_diag: RateLimitedWarn::new("world.bounds"),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.flags.len()
    }

    #[inline]
    pub fn active_count(&self) -> usize {
        self.active_count
    }

    /// Live slots, densely packed
    #[inline]
    pub fn active_entities(&self) -> &[u32] {
        &self.dense[..self.active_count]
    }

    pub fn allocator(&self) -> &EntityAllocator {
        &self.allocator
    }

    #[cold]
    pub(crate) fn out_of_bounds(&self, slot: u32) {
        self.bounds_diag
            .warn(format_args!("slot {} outside capacity {}", slot, self.capacity()));
    }

    // ---- lifecycle ----

    /// Allocate a slot and initialise it with the defaults for `kind`
    pub fn create_entity(&mut self, kind: EntityKind) -> Result<EntityHandle, WorldError> {
        let handle = self.allocator.allocate()?;
        self.init_slot(handle.slot, kind);
        Ok(handle)
    }

    /// Adopt a remote authority's exact handle for a spawned entity
    pub fn spawn_mirrored(
        &mut self,
        handle: EntityHandle,
        kind: EntityKind,
    ) -> Result<(), WorldError> {
        if !self.allocator.claim(handle) {
            return Err(WorldError::StaleHandle(handle));
        }
        self.init_slot(handle.slot, kind);
        Ok(())
    }

    fn init_slot(&mut self, slot: u32, kind: EntityKind) {
        let i = slot as usize;
        self.transforms[i] = Transform {
            scale: 1.0,
            ..Default::default()
        };
        self.physics[i] = Physics {
            mass: agent::MASS,
            ..Default::default()
        };
        self.stats[i] = Stats {
            damage_multiplier: 1.0,
            ..Default::default()
        };
        self.inputs[i] = Input::default();
        self.move_configs[i] = MoveConfig {
            speed_multiplier: 1.0,
            ..Default::default()
        };
        self.skills[i] = Skill::default();
        self.projectiles[i] = Projectile::default();
        self.statuses[i] = Status::default();
        self.pigments[i] = Pigment::default();
        self.flags[i] = flags::ACTIVE | kind.flag();

        if self.sparse[i] == NOT_PRESENT {
            self.dense[self.active_count] = slot;
            self.sparse[i] = self.active_count as u32;
            self.active_count += 1;
        }
    }

    /// Remove an entity immediately. Returns false for stale handles.
    ///
    /// Systems should prefer `mark_dead` while iterating and let
    /// `compact_dead` do the removal at the end of the tick.
    pub fn destroy_entity(&mut self, handle: EntityHandle) -> bool {
        if !self.allocator.is_valid(handle) {
            return false;
        }
        let i = handle.index();
        self.flags[i] = 0;
        self.physics[i].vx = 0.0;
        self.physics[i].vy = 0.0;
        self.physics[i].v_rotation = 0.0;
        self.inputs[i] = Input::default();

        if self.sparse[i] != NOT_PRESENT {
            let pos = self.sparse[i] as usize;
            let last = self.active_count - 1;
            let moved = self.dense[last];
            self.dense[pos] = moved;
            self.sparse[moved as usize] = pos as u32;
            self.sparse[i] = NOT_PRESENT;
            self.active_count = last;
        }

        self.allocator.free(handle)
    }

    /// Flag an entity for removal at the end of the tick
    pub fn mark_dead(&mut self, slot: u32) {
        match self.flags.get_mut(slot as usize) {
            Some(f) if *f & flags::ACTIVE != 0 => *f |= flags::DEAD,
            Some(_) => {}
            None => self.out_of_bounds(slot),
        }
    }

    /// Destroy every entity flagged DEAD, appending their handles to `removed`.
    pub fn compact_dead(&mut self, removed: &mut Vec<EntityHandle>) -> usize {
        let mut count = 0;
        // Backwards so swap-remove never skips an unvisited slot
        let mut pos = self.active_count;
        while pos > 0 {
            pos -= 1;
            let slot = self.dense[pos];
            if self.flags[slot as usize] & flags::DEAD == 0 {
                continue;
            }
            if let Some(handle) = self.allocator.handle_of(slot) {
                if self.destroy_entity(handle) {
                    removed.push(handle);
                    count += 1;
                }
            }
        }
        count
    }

    // ---- queries ----

    #[inline]
    pub fn flags(&self, slot: u32) -> u32 {
        match self.flags.get(slot as usize) {
            Some(&f) => f,
            None => {
                self.out_of_bounds(slot);
                0
            }
        }
    }

    #[inline]
    pub fn has_flag(&self, slot: u32, flag: u32) -> bool {
        self.flags(slot) & flag != 0
    }

    /// Active and not waiting for compaction
    #[inline]
    pub fn is_alive(&self, slot: u32) -> bool {
        let f = self.flags(slot);
        f & flags::ACTIVE != 0 && f & flags::DEAD == 0
    }

    pub fn kind(&self, slot: u32) -> Option<EntityKind> {
        EntityKind::from_flags(self.flags(slot))
    }

    #[inline]
    pub fn is_valid(&self, handle: EntityHandle) -> bool {
        self.allocator.is_valid(handle)
    }

    pub fn handle_of(&self, slot: u32) -> Option<EntityHandle> {
        self.allocator.handle_of(slot)
    }

    // ---- whole-record access ----

    pub fn transform(&self, slot: u32) -> Option<&Transform> {
        self.transforms.get(slot as usize)
    }
    pub fn transform_mut(&mut self, slot: u32) -> Option<&mut Transform> {
        self.transforms.get_mut(slot as usize)
    }
    pub fn physics(&self, slot: u32) -> Option<&Physics> {
        self.physics.get(slot as usize)
    }
    pub fn physics_mut(&mut self, slot: u32) -> Option<&mut Physics> {
        self.physics.get_mut(slot as usize)
    }
    pub fn stats(&self, slot: u32) -> Option<&Stats> {
        self.stats.get(slot as usize)
    }
    pub fn stats_mut(&mut self, slot: u32) -> Option<&mut Stats> {
        self.stats.get_mut(slot as usize)
    }
    pub fn input(&self, slot: u32) -> Option<&Input> {
        self.inputs.get(slot as usize)
    }
    pub fn input_mut(&mut self, slot: u32) -> Option<&mut Input> {
        self.inputs.get_mut(slot as usize)
    }
    pub fn move_config(&self, slot: u32) -> Option<&MoveConfig> {
        self.move_configs.get(slot as usize)
    }
    pub fn move_config_mut(&mut self, slot: u32) -> Option<&mut MoveConfig> {
        self.move_configs.get_mut(slot as usize)
    }
    pub fn skill(&self, slot: u32) -> Option<&Skill> {
        self.skills.get(slot as usize)
    }
    pub fn skill_mut(&mut self, slot: u32) -> Option<&mut Skill> {
        self.skills.get_mut(slot as usize)
    }
    pub fn projectile(&self, slot: u32) -> Option<&Projectile> {
        self.projectiles.get(slot as usize)
    }
    pub fn projectile_mut(&mut self, slot: u32) -> Option<&mut Projectile> {
        self.projectiles.get_mut(slot as usize)
    }
    pub fn status(&self, slot: u32) -> Option<&Status> {
        self.statuses.get(slot as usize)
    }
    pub fn status_mut(&mut self, slot: u32) -> Option<&mut Status> {
        self.statuses.get_mut(slot as usize)
    }
    pub fn pigment(&self, slot: u32) -> Option<&Pigment> {
        self.pigments.get(slot as usize)
    }
    pub fn pigment_mut(&mut self, slot: u32) -> Option<&mut Pigment> {
        self.pigments.get_mut(slot as usize)
    }

    // ---- per-field access ----

    field_accessors!(transforms {
        x: f32 => x, set_x;
        y: f32 => y, set_y;
        rotation: f32 => rotation, set_rotation;
        scale: f32 => scale, set_scale;
        prev_x: f32 => prev_x, set_prev_x;
        prev_y: f32 => prev_y, set_prev_y;
        prev_rotation: f32 => prev_rotation, set_prev_rotation;
    });

    field_accessors!(physics {
        vx: f32 => vx, set_vx;
        vy: f32 => vy, set_vy;
        v_rotation: f32 => v_rotation, set_v_rotation;
        mass: f32 => mass, set_mass;
        radius: f32 => radius, set_radius;
        restitution: f32 => restitution, set_restitution;
        friction: f32 => friction, set_friction;
    });

    field_accessors!(stats {
        hp: f32 => hp, set_hp;
        max_hp: f32 => max_hp, set_max_hp;
        score: f32 => score, set_score;
        match_percent: f32 => match_percent, set_match_percent;
        defense: f32 => defense, set_defense;
        damage_multiplier: f32 => damage_multiplier, set_damage_multiplier;
    });

    field_accessors!(inputs {
        target_x: f32 => target_x, set_target_x;
        target_y: f32 => target_y, set_target_y;
        actions: u32 => actions, set_actions;
    });

    field_accessors!(move_configs {
        max_speed: f32 => max_speed, set_max_speed;
        speed_multiplier: f32 => speed_multiplier, set_speed_multiplier;
        magnet_radius: f32 => magnet_radius, set_magnet_radius;
    });

    field_accessors!(skills {
        cooldown: f32 => skill_cooldown, set_skill_cooldown;
        cooldown_max: f32 => skill_cooldown_max, set_skill_cooldown_max;
        active_timer: f32 => skill_active_timer, set_skill_active_timer;
        skill_id: u32 => skill_id, set_skill_id;
    });

    field_accessors!(projectiles {
        owner_slot: u32 => projectile_owner_slot, set_projectile_owner_slot;
        damage: f32 => projectile_damage, set_projectile_damage;
        lifetime: f32 => projectile_lifetime, set_projectile_lifetime;
        owner_generation: u32 => projectile_owner_generation, set_projectile_owner_generation;
    });

    field_accessors!(pigments {
        r: f32 => pigment_r, set_pigment_r;
        g: f32 => pigment_g, set_pigment_g;
        b: f32 => pigment_b, set_pigment_b;
        target_r: f32 => pigment_target_r, set_pigment_target_r;
        target_g: f32 => pigment_target_g, set_pigment_target_g;
        target_b: f32 => pigment_target_b, set_pigment_target_b;
        mix_rate: f32 => pigment_mix_rate, set_pigment_mix_rate;
    });

    // ---- raw buffers ----

    /// Whole component buffer as bytes (`capacity * stride`)
    pub fn component_bytes(&self, kind: ComponentKind) -> &[u8] {
        match kind {
            ComponentKind::Transform => bytemuck::cast_slice(&self.transforms),
            ComponentKind::Physics => bytemuck::cast_slice(&self.physics),
            ComponentKind::Stats => bytemuck::cast_slice(&self.stats),
            ComponentKind::Input => bytemuck::cast_slice(&self.inputs),
            ComponentKind::MoveConfig => bytemuck::cast_slice(&self.move_configs),
            ComponentKind::Skill => bytemuck::cast_slice(&self.skills),
            ComponentKind::Projectile => bytemuck::cast_slice(&self.projectiles),
            ComponentKind::Status => bytemuck::cast_slice(&self.statuses),
            ComponentKind::Pigment => bytemuck::cast_slice(&self.pigments),
        }
    }

    fn component_bytes_mut(&mut self, kind: ComponentKind) -> &mut [u8] {
        match kind {
            ComponentKind::Transform => bytemuck::cast_slice_mut(&mut self.transforms),
            ComponentKind::Physics => bytemuck::cast_slice_mut(&mut self.physics),
            ComponentKind::Stats => bytemuck::cast_slice_mut(&mut self.stats),
            ComponentKind::Input => bytemuck::cast_slice_mut(&mut self.inputs),
            ComponentKind::MoveConfig => bytemuck::cast_slice_mut(&mut self.move_configs),
            ComponentKind::Skill => bytemuck::cast_slice_mut(&mut self.skills),
            ComponentKind::Projectile => bytemuck::cast_slice_mut(&mut self.projectiles),
            ComponentKind::Status => bytemuck::cast_slice_mut(&mut self.statuses),
            ComponentKind::Pigment => bytemuck::cast_slice_mut(&mut self.pigments),
        }
    }

    /// One slot's record as bytes
    pub fn record_bytes(&self, kind: ComponentKind, slot: u32) -> Option<&[u8]> {
        let stride = kind.stride();
        let start = (slot as usize).checked_mul(stride)?;
        self.component_bytes(kind).get(start..start + stride)
    }

    /// Overwrite one slot's record from raw bytes. `bytes` must be exactly one stride.
    pub fn write_record_bytes(&mut self, kind: ComponentKind, slot: u32, bytes: &[u8]) -> bool {
        let stride = kind.stride();
        if bytes.len() != stride || slot as usize >= self.capacity() {
            self.out_of_bounds(slot);
            return false;
        }
        let start = slot as usize * stride;
        self.component_bytes_mut(kind)[start..start + stride].copy_from_slice(bytes);
        true
    }

    /// Make this world an exact copy of `other` using linear buffer copies
    pub fn copy_from(&mut self, other: &World) -> Result<(), WorldError> {
        if self.capacity() != other.capacity() {
            return Err(WorldError::CapacityMismatch {
                expected: self.capacity(),
                actual: other.capacity(),
            });
        }
        self.transforms.copy_from_slice(&other.transforms);
        self.physics.copy_from_slice(&other.physics);
        self.stats.copy_from_slice(&other.stats);
        self.inputs.copy_from_slice(&other.inputs);
        self.move_configs.copy_from_slice(&other.move_configs);
        self.skills.copy_from_slice(&other.skills);
        self.projectiles.copy_from_slice(&other.projectiles);
        self.statuses.copy_from_slice(&other.statuses);
        self.pigments.copy_from_slice(&other.pigments);
        self.flags.copy_from_slice(&other.flags);
        self.dense.copy_from_slice(&other.dense);
        self.sparse.copy_from_slice(&other.sparse);
        self.active_count = other.active_count;
        self.allocator.copy_from(&other.allocator);
        Ok(())
    }

    /// FNV-1a over flags and the transform/physics/stats records of every
    /// active slot, in dense order
    pub fn checksum(&self) -> u64 {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0100_0000_01b3;

        let mut hash = OFFSET;
        let mut feed = |bytes: &[u8]| {
            for &b in bytes {
                hash ^= b as u64;
                hash = hash.wrapping_mul(PRIME);
            }
        };
        for &slot in self.active_entities() {
            let i = slot as usize;
            feed(&slot.to_le_bytes());
            feed(&self.flags[i].to_le_bytes());
            feed(bytemuck::bytes_of(&self.transforms[i]));
            feed(bytemuck::bytes_of(&self.physics[i]));
            feed(bytemuck::bytes_of(&self.stats[i]));
        }
        hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_set_is_consistent(world: &World) -> bool {
        let mut seen = vec![false; world.capacity()];
        for &slot in world.active_entities() {
            if seen[slot as usize] || !world.has_flag(slot, flags::ACTIVE) {
                return false;
            }
            seen[slot as usize] = true;
        }
        (0..world.capacity() as u32)
            .filter(|&s| world.has_flag(s, flags::ACTIVE))
            .all(|s| seen[s as usize])
    }

    #[test]
    fn test_create_sets_flags_and_defaults() {
        let mut world = World::new(8);
        let h = world.create_entity(EntityKind::Bot).unwrap();
        assert!(world.has_flag(h.slot, flags::ACTIVE));
        assert!(world.has_flag(h.slot, flags::BOT));
        assert_eq!(world.scale(h.slot), 1.0);
        assert_eq!(world.speed_multiplier(h.slot), 1.0);
        assert_eq!(world.kind(h.slot), Some(EntityKind::Bot));
        assert_eq!(world.active_entities(), &[h.slot]);
    }

    #[test]
    fn test_world_full() {
        let mut world = World::new(2);
        world.create_entity(EntityKind::Food).unwrap();
        world.create_entity(EntityKind::Food).unwrap();
        assert_eq!(
            world.create_entity(EntityKind::Food),
            Err(WorldError::Full(2))
        );
    }

    #[test]
    fn test_field_roundtrip() {
        let mut world = World::new(4);
        let h = world.create_entity(EntityKind::Player).unwrap();
        world.set_x(h.slot, 12.5);
        world.set_actions(h.slot, 3);
        world.set_projectile_owner_generation(h.slot, 9);
        assert_eq!(world.x(h.slot), 12.5);
        assert_eq!(world.actions(h.slot), 3);
        assert_eq!(world.projectile_owner_generation(h.slot), 9);
    }

    #[test]
    fn test_out_of_bounds_is_noop() {
        let mut world = World::new(4);
        world.set_x(100, 5.0);
        assert_eq!(world.x(100), 0.0);
        assert_eq!(world.flags(100), 0);
        world.mark_dead(100);
        assert!(world.transform(100).is_none());
    }

    #[test]
    fn test_destroy_swap_removes() {
        let mut world = World::new(8);
        let handles: Vec<_> = (0..5)
            .map(|_| world.create_entity(EntityKind::Food).unwrap())
            .collect();
        assert!(world.destroy_entity(handles[1]));
        assert_eq!(world.active_count(), 4);
        assert!(!world.active_entities().contains(&handles[1].slot));
        assert!(active_set_is_consistent(&world));
        assert!(!world.destroy_entity(handles[1]));
    }

    #[test]
    fn test_mark_dead_then_compact() {
        let mut world = World::new(16);
        let handles: Vec<_> = (0..10)
            .map(|_| world.create_entity(EntityKind::Food).unwrap())
            .collect();
        for h in handles.iter().step_by(3) {
            world.mark_dead(h.slot);
        }
        // Still active until compaction
        assert_eq!(world.active_count(), 10);
        assert!(!world.is_alive(handles[0].slot));

        let mut removed = Vec::new();
        assert_eq!(world.compact_dead(&mut removed), 4);
        assert_eq!(world.active_count(), 6);
        assert_eq!(removed.len(), 4);
        for h in &removed {
            assert!(!world.is_valid(*h));
        }
        assert!(active_set_is_consistent(&world));
    }

    #[test]
    fn test_active_set_density_under_churn() {
        let mut world = World::new(64);
        let mut live = Vec::new();
        for round in 0..20 {
            for _ in 0..3 {
                if let Ok(h) = world.create_entity(EntityKind::Bot) {
                    live.push(h);
                }
            }
            if round % 2 == 0 && !live.is_empty() {
                let h = live.swap_remove(round % live.len());
                assert!(world.destroy_entity(h));
            }
            assert!(active_set_is_consistent(&world));
            assert_eq!(world.active_count(), live.len());
        }
    }

    #[test]
    fn test_copy_from() {
        let mut a = World::new(8);
        let h = a.create_entity(EntityKind::Player).unwrap();
        a.set_x(h.slot, 3.0);
        a.set_score(h.slot, 42.0);

        let mut b = World::new(8);
        b.copy_from(&a).unwrap();
        assert_eq!(b.x(h.slot), 3.0);
        assert_eq!(b.score(h.slot), 42.0);
        assert_eq!(b.active_entities(), a.active_entities());
        assert!(b.is_valid(h));
        assert_eq!(a.checksum(), b.checksum());

        let mut small = World::new(4);
        assert!(matches!(
            small.copy_from(&a),
            Err(WorldError::CapacityMismatch { .. })
        ));
    }

    #[test]
    fn test_record_bytes() {
        let mut world = World::new(4);
        let h = world.create_entity(EntityKind::Player).unwrap();
        world.set_vx(h.slot, 7.0);

        let bytes = world.record_bytes(ComponentKind::Physics, h.slot).unwrap().to_vec();
        assert_eq!(bytes.len(), 32);

        let mut other = World::new(4);
        assert!(other.write_record_bytes(ComponentKind::Physics, h.slot, &bytes));
        assert_eq!(other.vx(h.slot), 7.0);
        assert!(!other.write_record_bytes(ComponentKind::Physics, h.slot, &bytes[..8]));
        assert!(!other.write_record_bytes(ComponentKind::Physics, 9, &bytes));
    }

    #[test]
    fn test_spawn_mirrored() {
        let mut world = World::new(8);
        let h = EntityHandle::new(5, 3);
        world.spawn_mirrored(h, EntityKind::Bot).unwrap();
        assert!(world.is_valid(h));
        assert_eq!(world.active_entities(), &[5]);

        // Re-spawning the same slot with a newer generation does not duplicate it
        let newer = EntityHandle::new(5, 4);
        world.spawn_mirrored(newer, EntityKind::Food).unwrap();
        assert_eq!(world.active_count(), 1);
        assert!(!world.is_valid(h));
        assert_eq!(world.kind(5), Some(EntityKind::Food));

        assert!(world.spawn_mirrored(EntityHandle::new(99, 0), EntityKind::Food).is_err());
    }
}
