//! Component layout shared by every World instance
//!
//! Each component is a `#[repr(C)]` plain-old-data record of 32-bit fields so
//! that a whole buffer can be viewed as bytes, bulk-copied between worlds, and
//! shipped over the wire with its stride unchanged.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Entity state flag bits
pub mod flags {
    pub const ACTIVE: u32 = 1 << 0;
    pub const DEAD: u32 = 1 << 1;
    pub const PLAYER: u32 = 1 << 2;
    pub const BOT: u32 = 1 << 3;
    pub const FOOD: u32 = 1 << 4;
    pub const PROJECTILE: u32 = 1 << 5;
    pub const STATIC: u32 = 1 << 6;

    /// Entities that steer, collect and take damage
    pub const AGENT: u32 = PLAYER | BOT;
    /// Entities inserted into the grid and resolved against agents
    pub const PASSIVE: u32 = FOOD | PROJECTILE;
    pub const KIND_MASK: u32 = PLAYER | BOT | FOOD | PROJECTILE | STATIC;
}

/// Input action bits (native integer, not a float-encoded mask)
pub mod actions {
    pub const BOOST: u32 = 1 << 0;
    pub const FIRE: u32 = 1 << 1;
    pub const ALL: u32 = BOOST | FIRE;
}

/// Indices into `Status::flags` and `Status::timers`
pub mod status {
    pub const STUNNED: usize = 0;
    pub const SHIELDED: usize = 1;
    pub const BOOSTED: usize = 2;
    pub const INVISIBLE: usize = 3;
    /// Timed effects (invisible is toggled, not timed)
    pub const TIMED: [usize; 3] = [STUNNED, SHIELDED, BOOSTED];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntityKind {
    Player = 0,
    Bot = 1,
    Food = 2,
    Projectile = 3,
    Static = 4,
}

impl EntityKind {
    pub fn flag(self) -> u32 {
        match self {
            EntityKind::Player => flags::PLAYER,
            EntityKind::Bot => flags::BOT,
            EntityKind::Food => flags::FOOD,
            EntityKind::Projectile => flags::PROJECTILE,
            EntityKind::Static => flags::STATIC,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(EntityKind::Player),
            1 => Some(EntityKind::Bot),
            2 => Some(EntityKind::Food),
            3 => Some(EntityKind::Projectile),
            4 => Some(EntityKind::Static),
            _ => None,
        }
    }

    /// Kind encoded in a flags word (first matching bit wins)
    pub fn from_flags(bits: u32) -> Option<Self> {
        [
            EntityKind::Player,
            EntityKind::Bot,
            EntityKind::Food,
            EntityKind::Projectile,
            EntityKind::Static,
        ]
        .into_iter()
        .find(|k| bits & k.flag() != 0)
    }

    #[inline]
    pub fn is_agent(self) -> bool {
        matches!(self, EntityKind::Player | EntityKind::Bot)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Transform {
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub scale: f32,
    pub prev_x: f32,
    pub prev_y: f32,
    pub prev_rotation: f32,
    pub _pad: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Physics {
    pub vx: f32,
    pub vy: f32,
    pub v_rotation: f32,
    pub mass: f32,
    pub radius: f32,
    pub restitution: f32,
    pub friction: f32,
    pub _pad: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Stats {
    pub hp: f32,
    pub max_hp: f32,
    pub score: f32,
    pub match_percent: f32,
    pub defense: f32,
    pub damage_multiplier: f32,
    pub _pad: [f32; 2],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Input {
    pub target_x: f32,
    pub target_y: f32,
    pub actions: u32,
    pub _pad: u32,
}

/// Per-entity movement tuning
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct MoveConfig {
    pub max_speed: f32,
    pub speed_multiplier: f32,
    pub magnet_radius: f32,
    pub _pad: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Skill {
    pub cooldown: f32,
    pub cooldown_max: f32,
    pub active_timer: f32,
    pub skill_id: u32,
}

/// Owner is stored as a full handle so self-hit checks survive slot reuse
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Projectile {
    pub owner_slot: u32,
    pub damage: f32,
    pub lifetime: f32,
    pub owner_generation: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Status {
    pub flags: [u8; 4],
    pub timers: [f32; 3],
    pub _pad: f32,
}

impl Status {
    #[inline]
    pub fn has(&self, effect: usize) -> bool {
        self.flags.get(effect).is_some_and(|&f| f != 0)
    }

    /// Set a timed effect; `seconds` replaces any shorter remaining time
    pub fn apply(&mut self, effect: usize, seconds: f32) {
        if let Some(i) = status::TIMED.iter().position(|&e| e == effect) {
            self.flags[effect] = 1;
            self.timers[i] = self.timers[i].max(seconds);
        } else if let Some(f) = self.flags.get_mut(effect) {
            *f = 1;
        }
    }
}

/// Pigment colour (0..1 per channel) and the colour the agent is aiming for
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Pigment {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub target_r: f32,
    pub target_g: f32,
    pub target_b: f32,
    pub mix_rate: f32,
    pub _pad: f32,
}

impl Pigment {
    /// Similarity to the target colour as a percentage (100 = exact)
    pub fn match_percent(&self) -> f32 {
        let dr = self.r - self.target_r;
        let dg = self.g - self.target_g;
        let db = self.b - self.target_b;
        // Largest possible distance inside the unit cube is sqrt(3)
        let dist = (dr * dr + dg * dg + db * db).sqrt() / 3f32.sqrt();
        ((1.0 - dist) * 100.0).clamp(0.0, 100.0)
    }
}

/// Component buffer identifiers, also used as the wire component-kind id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ComponentKind {
    Transform = 0,
    Physics = 1,
    Stats = 2,
    Input = 3,
    MoveConfig = 4,
    Skill = 5,
    Projectile = 6,
    Status = 7,
    Pigment = 8,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 9] = [
        ComponentKind::Transform,
        ComponentKind::Physics,
        ComponentKind::Stats,
        ComponentKind::Input,
        ComponentKind::MoveConfig,
        ComponentKind::Skill,
        ComponentKind::Projectile,
        ComponentKind::Status,
        ComponentKind::Pigment,
    ];

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }

    /// Bytes per entity slot
    pub const fn stride(self) -> usize {
        match self {
            ComponentKind::Transform => std::mem::size_of::<Transform>(),
            ComponentKind::Physics => std::mem::size_of::<Physics>(),
            ComponentKind::Stats => std::mem::size_of::<Stats>(),
            ComponentKind::Input => std::mem::size_of::<Input>(),
            ComponentKind::MoveConfig => std::mem::size_of::<MoveConfig>(),
            ComponentKind::Skill => std::mem::size_of::<Skill>(),
            ComponentKind::Projectile => std::mem::size_of::<Projectile>(),
            ComponentKind::Status => std::mem::size_of::<Status>(),
            ComponentKind::Pigment => std::mem::size_of::<Pigment>(),
        }
    }
}

/// Generates bounds-checked per-field getters and setters on `World`.
///
/// Out-of-range slots read as the field's default and ignore writes, with a
/// rate-limited warning.
macro_rules! field_accessors {
    ($buffer:ident { $($field:ident : $ty:ty => $get:ident, $set:ident;)* }) => {
        $(
            #[inline]
            pub fn $get(&self, slot: u32) -> $ty {
                match self.$buffer.get(slot as usize) {
                    Some(c) => c.$field,
                    None => {
                        self.out_of_bounds(slot);
                        <$ty>::default()
                    }
                }
            }

            #[inline]
            pub fn $set(&mut self, slot: u32, value: $ty) {
                match self.$buffer.get_mut(slot as usize) {
                    Some(c) => c.$field = value,
                    None => self.out_of_bounds(slot),
                }
            }
        )*
    };
}

pub(crate) use field_accessors;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strides_match_wire_table() {
        assert_eq!(ComponentKind::Transform.stride(), 32);
        assert_eq!(ComponentKind::Physics.stride(), 32);
        assert_eq!(ComponentKind::Stats.stride(), 32);
        assert_eq!(ComponentKind::Input.stride(), 16);
        assert_eq!(ComponentKind::MoveConfig.stride(), 16);
        assert_eq!(ComponentKind::Skill.stride(), 16);
        assert_eq!(ComponentKind::Projectile.stride(), 16);
        assert_eq!(ComponentKind::Status.stride(), 20);
        assert_eq!(ComponentKind::Pigment.stride(), 32);
    }

    #[test]
    fn test_transform_field_offsets() {
        let t = Transform {
            x: 1.0,
            y: 2.0,
            prev_x: 5.0,
            ..Default::default()
        };
        let bytes = bytemuck::bytes_of(&t);
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[4..8], &2.0f32.to_le_bytes());
        assert_eq!(&bytes[16..20], &5.0f32.to_le_bytes());
    }

    #[test]
    fn test_component_kind_ids() {
        for (i, kind) in ComponentKind::ALL.iter().enumerate() {
            assert_eq!(*kind as u8 as usize, i);
            assert_eq!(ComponentKind::from_u8(i as u8), Some(*kind));
        }
        assert_eq!(ComponentKind::from_u8(9), None);
    }

    #[test]
    fn test_entity_kind_flags() {
        assert_eq!(EntityKind::from_flags(flags::ACTIVE | flags::BOT), Some(EntityKind::Bot));
        assert_eq!(EntityKind::from_flags(flags::ACTIVE), None);
        assert!(EntityKind::Player.is_agent());
        assert!(!EntityKind::Food.is_agent());
        assert_eq!(EntityKind::from_u8(3), Some(EntityKind::Projectile));
    }

    #[test]
    fn test_status_apply_keeps_longer_timer() {
        let mut s = Status::default();
        s.apply(status::SHIELDED, 2.0);
        s.apply(status::SHIELDED, 1.0);
        assert!(s.has(status::SHIELDED));
        assert_eq!(s.timers[1], 2.0);

        s.apply(status::INVISIBLE, 0.0);
        assert!(s.has(status::INVISIBLE));
    }

    #[test]
    fn test_match_percent() {
        let mut p = Pigment {
            r: 1.0,
            g: 0.0,
            b: 0.0,
            target_r: 1.0,
            target_g: 0.0,
            target_b: 0.0,
            ..Default::default()
        };
        assert!((p.match_percent() - 100.0).abs() < 1e-4);

        p.target_r = 0.0;
        p.target_g = 1.0;
        p.target_b = 1.0;
        assert!(p.match_percent() < 1e-3);
    }
}
