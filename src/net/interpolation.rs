//! Remote-entity interpolation
//!
//! Keeps the last few authoritative snapshots and renders remote entities
//! slightly in the past, between the two snapshots bracketing the render
//! time. Past the newest snapshot the newest position is held; nothing is
//! extrapolated.

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;

use crate::game::constants::net::{INTERPOLATION_DELAY, SNAPSHOT_CAPACITY};
use crate::game::world::World;
use crate::net::packets::read_transforms_indexed;
use crate::util::vec2::Vec2;

/// Positions of every entity in one authoritative update
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub timestamp: f32,
    positions: HashMap<u32, Vec2, FxBuildHasher>,
}

impl Snapshot {
    fn new() -> Self {
        Self {
            timestamp: 0.0,
            positions: HashMap::with_capacity_and_hasher(64, FxBuildHasher),
        }
    }

    pub fn insert(&mut self, entity: u32, position: Vec2) {
        self.positions.insert(entity, position);
    }

    pub fn get(&self, entity: u32) -> Option<Vec2> {
        self.positions.get(&entity).copied()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// How much history exists for one entity
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleState {
    NoData,
    /// Only one snapshot holds the entity; it is shown as-is
    One(Vec2),
    /// Bracketing pair found (or clamped to the oldest/newest)
    Two(Vec2),
}

impl SampleState {
    pub fn position(&self) -> Option<Vec2> {
        match *self {
            SampleState::NoData => None,
            SampleState::One(p) | SampleState::Two(p) => Some(p),
        }
    }
}

/// Ring of recent snapshots; slots are recycled so steady-state pushes do
/// not allocate
pub struct SnapshotBuffer {
    slots: Vec<Snapshot>,
    /// Index of the oldest snapshot
    head: usize,
    len: usize,
    delay: f32,
}

impl SnapshotBuffer {
    pub fn new(capacity: usize, delay: f32) -> Self {
        let capacity = capacity.max(2);
        Self {
            slots: (0..capacity).map(|_| Snapshot::new()).collect(),
            head: 0,
            len: 0,
            delay,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn delay(&self) -> f32 {
        self.delay
    }

    /// Newest snapshot timestamp
    pub fn latest_timestamp(&self) -> Option<f32> {
        self.nth(self.len.checked_sub(1)?).map(|s| s.timestamp)
    }

    /// Newest timestamp minus the interpolation delay
    pub fn render_time(&self) -> Option<f32> {
        self.latest_timestamp().map(|t| t - self.delay)
    }

    /// Snapshot `k` in age order (0 = oldest)
    fn nth(&self, k: usize) -> Option<&Snapshot> {
        (k < self.len).then(|| &self.slots[(self.head + k) % self.slots.len()])
    }

    /// Start a new snapshot at `timestamp`. Returns `None` if it is not newer
    /// than the latest one (late or duplicate packet).
    pub fn begin(&mut self, timestamp: f32) -> Option<&mut Snapshot> {
        if !timestamp.is_finite() {
            return None;
        }
        if let Some(latest) = self.latest_timestamp() {
            if timestamp <= latest {
                return None;
            }
        }

        let cap = self.slots.len();
        let idx = if self.len == cap {
            // Recycle the oldest
            let idx = self.head;
            self.head = (self.head + 1) % cap;
            idx
        } else {
            self.len += 1;
            (self.head + self.len - 1) % cap
        };

        let snap = &mut self.slots[idx];
        snap.timestamp = timestamp;
        snap.positions.clear();
        Some(snap)
    }

    /// Record an indexed transform packet as a snapshot. Returns the number
    /// of entities stored, `None` for malformed packets, `Some(0)` for
    /// superseded ones.
    pub fn push_packet(&mut self, data: &[u8]) -> Option<usize> {
        // Validate before claiming a ring slot
        let (timestamp, _) = read_transforms_indexed(data, |_, _| {})?;
        let Some(snap) = self.begin(timestamp) else {
            return Some(0);
        };
        read_transforms_indexed(data, |index, rec| {
            snap.insert(index as u32, Vec2::new(rec.x, rec.y));
        })?;
        Some(snap.len())
    }

    /// Position of `entity` at `render_time`
    pub fn sample(&self, entity: u32, render_time: f32) -> SampleState {
        let mut newer: Option<(f32, Vec2)> = None;
        let mut found = 0usize;

        for k in (0..self.len).rev() {
            let Some(snap) = self.nth(k) else {
                break;
            };
            let Some(pos) = snap.get(entity) else {
                continue;
            };
            found += 1;

            if snap.timestamp <= render_time {
                return match newer {
                    // Render time is past the newest sample: hold it
                    None if self.has_older(k, entity) => SampleState::Two(pos),
                    None => SampleState::One(pos),
                    Some((t1, p1)) => {
                        let span = t1 - snap.timestamp;
                        let alpha = if span > 0.0 {
                            ((render_time - snap.timestamp) / span).clamp(0.0, 1.0)
                        } else {
                            1.0
                        };
                        SampleState::Two(pos.lerp(p1, alpha))
                    }
                };
            }
            newer = Some((snap.timestamp, pos));
        }

        // Render time precedes every sample: show the oldest we have
        match (newer, found) {
            (None, _) => SampleState::NoData,
            (Some((_, p)), 1) => SampleState::One(p),
            (Some((_, p)), _) => SampleState::Two(p),
        }
    }

    /// `sample` at the buffer's own render time
    pub fn sample_delayed(&self, entity: u32) -> SampleState {
        match self.render_time() {
            Some(t) => self.sample(entity, t),
            None => SampleState::NoData,
        }
    }

    fn has_older(&self, k: usize, entity: u32) -> bool {
        (0..k).any(|j| self.nth(j).is_some_and(|s| s.get(entity).is_some()))
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

impl Default for SnapshotBuffer {
    fn default() -> Self {
        Self::new(SNAPSHOT_CAPACITY, INTERPOLATION_DELAY)
    }
}

/// Position of `slot` between its last two simulation steps.
/// `alpha` is the fraction of a tick elapsed since the latest step.
pub fn render_position(world: &World, slot: u32, alpha: f32) -> Vec2 {
    let prev = Vec2::new(world.prev_x(slot), world.prev_y(slot));
    let curr = Vec2::new(world.x(slot), world.y(slot));
    prev + (curr - prev) * alpha.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::schema::EntityKind;
    use crate::net::packets::write_transforms_indexed;

    fn buffer_with(samples: &[(f32, Vec2)]) -> SnapshotBuffer {
        let mut buf = SnapshotBuffer::new(8, 0.1);
        for &(t, p) in samples {
            buf.begin(t).unwrap().insert(1, p);
        }
        buf
    }

    #[test]
    fn test_no_data() {
        let buf = SnapshotBuffer::default();
        assert_eq!(buf.sample(1, 0.0), SampleState::NoData);
        assert_eq!(buf.sample_delayed(1), SampleState::NoData);
        assert!(buf.render_time().is_none());
    }

    #[test]
    fn test_single_snapshot_applied_as_is() {
        let buf = buffer_with(&[(1.0, Vec2::new(5.0, 5.0))]);
        assert_eq!(buf.sample(1, 0.5), SampleState::One(Vec2::new(5.0, 5.0)));
        assert_eq!(buf.sample(1, 9.0), SampleState::One(Vec2::new(5.0, 5.0)));
        assert_eq!(buf.sample(2, 1.0), SampleState::NoData);
    }

    #[test]
    fn test_interpolates_on_segment() {
        let p0 = Vec2::new(0.0, 0.0);
        let p1 = Vec2::new(10.0, 20.0);
        let buf = buffer_with(&[(1.0, p0), (2.0, p1)]);

        for i in 0..=10 {
            let t = 1.0 + i as f32 / 10.0;
            let pos = buf.sample(1, t).position().unwrap();
            let expected = p0.lerp(p1, t - 1.0);
            assert!((pos - expected).length() < 1e-4, "t={t}");
            // On the segment: y is always twice x
            assert!((pos.y - 2.0 * pos.x).abs() < 1e-3);
        }
    }

    #[test]
    fn test_holds_latest_past_end() {
        let buf = buffer_with(&[(1.0, Vec2::new(0.0, 0.0)), (2.0, Vec2::new(4.0, 4.0))]);
        assert_eq!(buf.sample(1, 5.0), SampleState::Two(Vec2::new(4.0, 4.0)));
    }

    #[test]
    fn test_picks_bracketing_pair() {
        let buf = buffer_with(&[
            (1.0, Vec2::new(0.0, 0.0)),
            (2.0, Vec2::new(10.0, 0.0)),
            (3.0, Vec2::new(10.0, 10.0)),
        ]);
        let p = buf.sample(1, 2.5).position().unwrap();
        assert!((p - Vec2::new(10.0, 5.0)).length() < 1e-4);
        let p = buf.sample(1, 0.0).position().unwrap();
        assert_eq!(p, Vec2::new(0.0, 0.0));
    }

    #[test]
    fn test_late_snapshot_superseded() {
        let mut buf = buffer_with(&[(2.0, Vec2::new(1.0, 1.0))]);
        assert!(buf.begin(1.5).is_none());
        assert!(buf.begin(2.0).is_none());
        assert!(buf.begin(f32::NAN).is_none());
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_ring_recycles_oldest() {
        let mut buf = SnapshotBuffer::new(3, 0.0);
        for i in 0..5 {
            buf.begin(i as f32).unwrap().insert(1, Vec2::new(i as f32, 0.0));
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.latest_timestamp(), Some(4.0));
        // Oldest retained is t=2
        assert_eq!(buf.sample(1, 0.0).position(), Some(Vec2::new(2.0, 0.0)));
    }

    #[test]
    fn test_push_packet() {
        let mut world = World::new(16);
        let h = world.create_entity(EntityKind::Bot).unwrap();
        world.set_x(h.slot, 3.0);
        let mut bytes = [0u8; 128];
        let (len, _) = write_transforms_indexed(&mut bytes, 1.0, &world, &[h.slot]);

        let mut buf = SnapshotBuffer::default();
        assert_eq!(buf.push_packet(&bytes[..len]), Some(1));
        assert_eq!(buf.push_packet(&bytes[..len]), Some(0));
        assert_eq!(buf.push_packet(&bytes[..len - 1]), None);
        assert_eq!(buf.sample_delayed(h.slot), SampleState::One(Vec2::new(3.0, 0.0)));
    }

    #[test]
    fn test_render_position() {
        let mut world = World::new(4);
        let h = world.create_entity(EntityKind::Bot).unwrap();
        world.set_prev_x(h.slot, 0.0);
        world.set_x(h.slot, 10.0);
        assert_eq!(render_position(&world, h.slot, 0.25).x, 2.5);
        assert_eq!(render_position(&world, h.slot, 2.0).x, 10.0);
    }
}
