//! Per-tick state packets
//!
//! Fast lane: fixed-field transform/physics batches, addressed by string id
//! or by 2-byte slot index. Smart lane: a generic component delta carrying
//! raw records of any `ComponentKind`. Spawn/despawn batches carry full
//! handles so a client world can mirror the server's slots.
//!
//! Writers truncate batches that do not fit. Readers return `None` for a
//! wrong type byte or a truncated buffer and touch nothing in that case.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::game::entity::EntityHandle;
use crate::game::schema::{ComponentKind, EntityKind};
use crate::game::world::World;
use crate::metrics::Metrics;
use crate::net::codec::{ByteReader, ByteWriter};
use crate::net::pool::BufferPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Transform = 1,
    TransformIndexed = 2,
    Physics = 3,
    PhysicsIndexed = 4,
    ComponentDelta = 5,
    Spawn = 6,
    Despawn = 7,
}

impl PacketType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(PacketType::Transform),
            2 => Some(PacketType::TransformIndexed),
            3 => Some(PacketType::Physics),
            4 => Some(PacketType::PhysicsIndexed),
            5 => Some(PacketType::ComponentDelta),
            6 => Some(PacketType::Spawn),
            7 => Some(PacketType::Despawn),
            _ => None,
        }
    }

    /// Type of a raw packet
    pub fn of(data: &[u8]) -> Option<Self> {
        data.first().copied().and_then(Self::from_u8)
    }
}

/// type + timestamp + count
pub const FAST_HEADER_SIZE: usize = 1 + 4 + 2;
/// type + count
pub const EVENT_HEADER_SIZE: usize = 1 + 2;
/// type + kind + count
pub const DELTA_HEADER_SIZE: usize = 1 + 1 + 2;

pub const TRANSFORM_PAYLOAD: usize = 16;
pub const PHYSICS_PAYLOAD: usize = 12;
pub const TRANSFORM_INDEXED_RECORD: usize = 2 + TRANSFORM_PAYLOAD;
pub const PHYSICS_INDEXED_RECORD: usize = 2 + PHYSICS_PAYLOAD;
pub const SPAWN_RECORD: usize = 2 + 4 + 1 + 8;
pub const DESPAWN_RECORD: usize = 2 + 4;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransformRecord {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
}

impl TransformRecord {
    pub fn from_world(world: &World, slot: u32) -> Self {
        Self {
            x: world.x(slot),
            y: world.y(slot),
            vx: world.vx(slot),
            vy: world.vy(slot),
        }
    }

    fn write(&self, w: &mut ByteWriter<'_>) -> Option<()> {
        w.write_f32(self.x)?;
        w.write_f32(self.y)?;
        w.write_f32(self.vx)?;
        w.write_f32(self.vy)
    }

    fn read(r: &mut ByteReader<'_>) -> Option<Self> {
        Some(Self {
            x: r.read_f32()?,
            y: r.read_f32()?,
            vx: r.read_f32()?,
            vy: r.read_f32()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhysicsRecord {
    pub vx: f32,
    pub vy: f32,
    pub radius: f32,
}

impl PhysicsRecord {
    pub fn from_world(world: &World, slot: u32) -> Self {
        Self {
            vx: world.vx(slot),
            vy: world.vy(slot),
            radius: world.radius(slot),
        }
    }

    fn write(&self, w: &mut ByteWriter<'_>) -> Option<()> {
        w.write_f32(self.vx)?;
        w.write_f32(self.vy)?;
        w.write_f32(self.radius)
    }

    fn read(r: &mut ByteReader<'_>) -> Option<Self> {
        Some(Self {
            vx: r.read_f32()?,
            vy: r.read_f32()?,
            radius: r.read_f32()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnRecord {
    pub handle: EntityHandle,
    pub kind: EntityKind,
    pub x: f32,
    pub y: f32,
}

/// How many fixed-size records fit after `header` bytes
#[inline]
fn max_records(buf_len: usize, header: usize, record: usize) -> usize {
    (buf_len.saturating_sub(header) / record).min(u16::MAX as usize)
}

#[inline]
fn wire_index(slot: u32) -> Option<u16> {
    u16::try_from(slot).ok()
}

/// Read a fast-lane header, checking the type and that `count` records of
/// `record` bytes follow
fn fast_header<'a>(data: &'a [u8], expected: PacketType, record: usize) -> Option<(ByteReader<'a>, f32, u16)> {
    let mut r = ByteReader::new(data);
    if r.read_u8()? != expected as u8 {
        return None;
    }
    let timestamp = r.read_f32()?;
    let count = r.read_u16()?;
    if r.remaining() < count as usize * record {
        return None;
    }
    Some((r, timestamp, count))
}

fn event_header<'a>(data: &'a [u8], expected: PacketType, record: usize) -> Option<(ByteReader<'a>, u16)> {
    let mut r = ByteReader::new(data);
    if r.read_u8()? != expected as u8 {
        return None;
    }
    let count = r.read_u16()?;
    if r.remaining() < count as usize * record {
        return None;
    }
    Some((r, count))
}

// ---- transform ----

/// Id-addressed transforms. Ids longer than 255 bytes are skipped.
/// Returns (bytes written, records written).
pub fn write_transforms(buf: &mut [u8], timestamp: f32, records: &[(&str, TransformRecord)]) -> (usize, usize) {
    let mut w = ByteWriter::new(buf);
    if write_fast_header(&mut w, PacketType::Transform, timestamp).is_none() {
        return (0, 0);
    }
    let mut count = 0usize;
    for (id, rec) in records {
        if count == u16::MAX as usize {
            break;
        }
        let Ok(len) = u8::try_from(id.len()) else {
            continue;
        };
        if !w.fits(1 + id.len() + TRANSFORM_PAYLOAD) {
            break;
        }
        let _ = w.write_u8(len).and_then(|_| w.write(id.as_bytes())).and_then(|_| rec.write(&mut w));
        count += 1;
    }
    let _ = w.patch_u16(5, count as u16);
    (w.position(), count)
}

/// Invoke `f` for every id-addressed transform. Returns (timestamp, count),
/// or `None` without calling `f` if the packet is malformed.
pub fn read_transforms(data: &[u8], mut f: impl FnMut(&str, TransformRecord)) -> Option<(f32, u16)> {
    let mut r = ByteReader::new(data);
    if r.read_u8()? != PacketType::Transform as u8 {
        return None;
    }
    let timestamp = r.read_f32()?;
    let count = r.read_u16()?;

    // Validate the whole batch before delivering any record
    let body = r.position();
    for _ in 0..count {
        let len = r.read_u8()? as usize;
        std::str::from_utf8(r.read(len)?).ok()?;
        r.read(TRANSFORM_PAYLOAD)?;
    }

    let mut r = ByteReader::new(&data[body..]);
    for _ in 0..count {
        let len = r.read_u8()? as usize;
        let id = std::str::from_utf8(r.read(len)?).ok()?;
        f(id, TransformRecord::read(&mut r)?);
    }
    Some((timestamp, count))
}

/// Slot-indexed transforms read from `world`. Slots that are not alive or do
/// not fit in 16 bits are skipped.
pub fn write_transforms_indexed(buf: &mut [u8], timestamp: f32, world: &World, slots: &[u32]) -> (usize, usize) {
    let mut w = ByteWriter::new(buf);
    if write_fast_header(&mut w, PacketType::TransformIndexed, timestamp).is_none() {
        return (0, 0);
    }
    let max = max_records(w.capacity(), FAST_HEADER_SIZE, TRANSFORM_INDEXED_RECORD);
    let mut count = 0;
    for &slot in slots {
        if count == max {
            break;
        }
        let Some(index) = wire_index(slot).filter(|_| world.is_alive(slot)) else {
            continue;
        };
        let _ = w.write_u16(index).and_then(|_| TransformRecord::from_world(world, slot).write(&mut w));
        count += 1;
    }
    let _ = w.patch_u16(5, count as u16);
    (w.position(), count)
}

pub fn read_transforms_indexed(data: &[u8], mut f: impl FnMut(u16, TransformRecord)) -> Option<(f32, u16)> {
    let (mut r, timestamp, count) = fast_header(data, PacketType::TransformIndexed, TRANSFORM_INDEXED_RECORD)?;
    for _ in 0..count {
        let index = r.read_u16()?;
        f(index, TransformRecord::read(&mut r)?);
    }
    Some((timestamp, count))
}

/// Write indexed transforms straight into `world`. The previous position is
/// kept in `prev_x/prev_y` for render interpolation. Records for slots that
/// are not alive in `world` are skipped. Returns the number applied.
pub fn apply_transforms_indexed(data: &[u8], world: &mut World) -> Option<usize> {
    let mut applied = 0;
    read_transforms_indexed(data, |index, rec| {
        let slot = index as u32;
        if !world.is_alive(slot) {
            return;
        }
        if let Some(t) = world.transform_mut(slot) {
            t.prev_x = t.x;
            t.prev_y = t.y;
            t.x = rec.x;
            t.y = rec.y;
        }
        world.set_vx(slot, rec.vx);
        world.set_vy(slot, rec.vy);
        applied += 1;
    })?;
    Some(applied)
}

// ---- physics ----

pub fn write_physics(buf: &mut [u8], timestamp: f32, records: &[(&str, PhysicsRecord)]) -> (usize, usize) {
    let mut w = ByteWriter::new(buf);
    if write_fast_header(&mut w, PacketType::Physics, timestamp).is_none() {
        return (0, 0);
    }
    let mut count = 0usize;
    for (id, rec) in records {
        if count == u16::MAX as usize {
            break;
        }
        let Ok(len) = u8::try_from(id.len()) else {
            continue;
        };
        if !w.fits(1 + id.len() + PHYSICS_PAYLOAD) {
            break;
        }
        let _ = w.write_u8(len).and_then(|_| w.write(id.as_bytes())).and_then(|_| rec.write(&mut w));
        count += 1;
    }
    let _ = w.patch_u16(5, count as u16);
    (w.position(), count)
}

pub fn read_physics(data: &[u8], mut f: impl FnMut(&str, PhysicsRecord)) -> Option<(f32, u16)> {
    let mut r = ByteReader::new(data);
    if r.read_u8()? != PacketType::Physics as u8 {
        return None;
    }
    let timestamp = r.read_f32()?;
    let count = r.read_u16()?;

    let body = r.position();
    for _ in 0..count {
        let len = r.read_u8()? as usize;
        std::str::from_utf8(r.read(len)?).ok()?;
        r.read(PHYSICS_PAYLOAD)?;
    }

    let mut r = ByteReader::new(&data[body..]);
    for _ in 0..count {
        let len = r.read_u8()? as usize;
        let id = std::str::from_utf8(r.read(len)?).ok()?;
        f(id, PhysicsRecord::read(&mut r)?);
    }
    Some((timestamp, count))
}

pub fn write_physics_indexed(buf: &mut [u8], timestamp: f32, world: &World, slots: &[u32]) -> (usize, usize) {
    let mut w = ByteWriter::new(buf);
    if write_fast_header(&mut w, PacketType::PhysicsIndexed, timestamp).is_none() {
        return (0, 0);
    }
    let max = max_records(w.capacity(), FAST_HEADER_SIZE, PHYSICS_INDEXED_RECORD);
    let mut count = 0;
    for &slot in slots {
        if count == max {
            break;
        }
        let Some(index) = wire_index(slot).filter(|_| world.is_alive(slot)) else {
            continue;
        };
        let _ = w.write_u16(index).and_then(|_| PhysicsRecord::from_world(world, slot).write(&mut w));
        count += 1;
    }
    let _ = w.patch_u16(5, count as u16);
    (w.position(), count)
}

pub fn read_physics_indexed(data: &[u8], mut f: impl FnMut(u16, PhysicsRecord)) -> Option<(f32, u16)> {
    let (mut r, timestamp, count) = fast_header(data, PacketType::PhysicsIndexed, PHYSICS_INDEXED_RECORD)?;
    for _ in 0..count {
        let index = r.read_u16()?;
        f(index, PhysicsRecord::read(&mut r)?);
    }
    Some((timestamp, count))
}

pub fn apply_physics_indexed(data: &[u8], world: &mut World) -> Option<usize> {
    let mut applied = 0;
    read_physics_indexed(data, |index, rec| {
        let slot = index as u32;
        if !world.is_alive(slot) {
            return;
        }
        world.set_vx(slot, rec.vx);
        world.set_vy(slot, rec.vy);
        world.set_radius(slot, rec.radius);
        applied += 1;
    })?;
    Some(applied)
}

// ---- component delta ----

/// Raw `kind` records for `slots`
pub fn write_component_delta(buf: &mut [u8], world: &World, kind: ComponentKind, slots: &[u32]) -> (usize, usize) {
    let record = 2 + kind.stride();
    let mut w = ByteWriter::new(buf);
    if w.write_u8(PacketType::ComponentDelta as u8)
        .and_then(|_| w.write_u8(kind as u8))
        .and_then(|_| w.write_u16(0))
        .is_none()
    {
        return (0, 0);
    }
    let max = max_records(w.capacity(), DELTA_HEADER_SIZE, record);
    let mut count = 0;
    for &slot in slots {
        if count == max {
            break;
        }
        let (Some(index), Some(bytes)) = (wire_index(slot), world.record_bytes(kind, slot)) else {
            continue;
        };
        if !world.is_alive(slot) {
            continue;
        }
        let _ = w.write_u16(index).and_then(|_| w.write(bytes));
        count += 1;
    }
    let _ = w.patch_u16(2, count as u16);
    (w.position(), count)
}

/// Invoke `f(kind, index, record_bytes)` per record
pub fn read_component_delta(data: &[u8], mut f: impl FnMut(ComponentKind, u16, &[u8])) -> Option<u16> {
    let mut r = ByteReader::new(data);
    if r.read_u8()? != PacketType::ComponentDelta as u8 {
        return None;
    }
    let kind = ComponentKind::from_u8(r.read_u8()?)?;
    let count = r.read_u16()?;
    let stride = kind.stride();
    if r.remaining() < count as usize * (2 + stride) {
        return None;
    }
    for _ in 0..count {
        let index = r.read_u16()?;
        f(kind, index, r.read(stride)?);
    }
    Some(count)
}

pub fn apply_component_delta(data: &[u8], world: &mut World) -> Option<usize> {
    let mut applied = 0;
    read_component_delta(data, |kind, index, bytes| {
        let slot = index as u32;
        if world.is_alive(slot) && world.write_record_bytes(kind, slot, bytes) {
            applied += 1;
        }
    })?;
    Some(applied)
}

// ---- spawn / despawn ----

pub fn write_spawns(buf: &mut [u8], world: &World, handles: &[EntityHandle]) -> (usize, usize) {
    let mut w = ByteWriter::new(buf);
    if w.write_u8(PacketType::Spawn as u8).and_then(|_| w.write_u16(0)).is_none() {
        return (0, 0);
    }
    let max = max_records(w.capacity(), EVENT_HEADER_SIZE, SPAWN_RECORD);
    let mut count = 0;
    for &h in handles {
        if count == max {
            break;
        }
        let (Some(index), Some(kind)) = (wire_index(h.slot), world.kind(h.slot)) else {
            continue;
        };
        if !world.is_valid(h) {
            continue;
        }
        let _ = w
            .write_u16(index)
            .and_then(|_| w.write_u32(h.generation))
            .and_then(|_| w.write_u8(kind as u8))
            .and_then(|_| w.write_f32(world.x(h.slot)))
            .and_then(|_| w.write_f32(world.y(h.slot)));
        count += 1;
    }
    let _ = w.patch_u16(1, count as u16);
    (w.position(), count)
}

pub fn read_spawns(data: &[u8], mut f: impl FnMut(SpawnRecord)) -> Option<u16> {
    let (mut r, count) = event_header(data, PacketType::Spawn, SPAWN_RECORD)?;
    for _ in 0..count {
        let slot = r.read_u16()? as u32;
        let generation = r.read_u32()?;
        let kind = r.read_u8()?;
        let (x, y) = (r.read_f32()?, r.read_f32()?);
        // Unknown kinds are skipped, not fatal
        if let Some(kind) = EntityKind::from_u8(kind) {
            f(SpawnRecord {
                handle: EntityHandle::new(slot, generation),
                kind,
                x,
                y,
            });
        }
    }
    Some(count)
}

/// Mirror spawned entities into `world` at the sender's exact handles
pub fn apply_spawns(data: &[u8], world: &mut World) -> Option<usize> {
    let mut applied = 0;
    read_spawns(data, |rec| {
        if world.spawn_mirrored(rec.handle, rec.kind).is_err() {
            return;
        }
        let s = rec.handle.slot;
        world.set_x(s, rec.x);
        world.set_y(s, rec.y);
        world.set_prev_x(s, rec.x);
        world.set_prev_y(s, rec.y);
        applied += 1;
    })?;
    Some(applied)
}

pub fn write_despawns(buf: &mut [u8], handles: &[EntityHandle]) -> (usize, usize) {
    let mut w = ByteWriter::new(buf);
    if w.write_u8(PacketType::Despawn as u8).and_then(|_| w.write_u16(0)).is_none() {
        return (0, 0);
    }
    let max = max_records(w.capacity(), EVENT_HEADER_SIZE, DESPAWN_RECORD);
    let mut count = 0;
    for &h in handles {
        if count == max {
            break;
        }
        let Some(index) = wire_index(h.slot) else {
            continue;
        };
        let _ = w.write_u16(index).and_then(|_| w.write_u32(h.generation));
        count += 1;
    }
    let _ = w.patch_u16(1, count as u16);
    (w.position(), count)
}

pub fn read_despawns(data: &[u8], mut f: impl FnMut(EntityHandle)) -> Option<u16> {
    let (mut r, count) = event_header(data, PacketType::Despawn, DESPAWN_RECORD)?;
    for _ in 0..count {
        let slot = r.read_u16()? as u32;
        f(EntityHandle::new(slot, r.read_u32()?));
    }
    Some(count)
}

/// Destroy despawned entities; stale handles are ignored
pub fn apply_despawns(data: &[u8], world: &mut World) -> Option<usize> {
    let mut applied = 0;
    read_despawns(data, |h| {
        if world.destroy_entity(h) {
            applied += 1;
        }
    })?;
    Some(applied)
}

fn write_fast_header(w: &mut ByteWriter<'_>, kind: PacketType, timestamp: f32) -> Option<()> {
    w.write_u8(kind as u8)?;
    w.write_f32(timestamp)?;
    w.write_u16(0)
}

/// Packs into pooled scratch buffers and hands back trimmed copies
pub struct Packer {
    pool: BufferPool,
    max_packet: usize,
    metrics: Option<Arc<Metrics>>,
}

impl Packer {
    pub fn new(buffers: usize, buffer_size: usize) -> Self {
        Self {
            pool: BufferPool::new(buffers, buffer_size),
            max_packet: buffer_size,
            metrics: None,
        }
    }

    /// Cap every packet at `size` bytes (e.g. one datagram)
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet = size.min(self.pool.buffer_size());
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    fn pack(&self, write: impl FnOnce(&mut [u8]) -> (usize, usize)) -> Vec<u8> {
        let limit = self.max_packet;
        let packet = self.pool.with_buffer(|buf| {
            let cap = limit.min(buf.len());
            let (len, _) = write(&mut buf[..cap]);
            buf[..len].to_vec()
        });
        if let Some(m) = &self.metrics {
            m.record_packet(packet.len());
            m.pool_fallbacks
                .store(self.pool.fallback_count(), Ordering::Relaxed);
        }
        packet
    }

    pub fn pack_transforms(&self, timestamp: f32, records: &[(&str, TransformRecord)]) -> Vec<u8> {
        self.pack(|buf| write_transforms(buf, timestamp, records))
    }

    pub fn pack_transforms_indexed(&self, world: &World, timestamp: f32, slots: &[u32]) -> Vec<u8> {
        self.pack(|buf| write_transforms_indexed(buf, timestamp, world, slots))
    }

    pub fn pack_physics(&self, timestamp: f32, records: &[(&str, PhysicsRecord)]) -> Vec<u8> {
        self.pack(|buf| write_physics(buf, timestamp, records))
    }

    pub fn pack_physics_indexed(&self, world: &World, timestamp: f32, slots: &[u32]) -> Vec<u8> {
        self.pack(|buf| write_physics_indexed(buf, timestamp, world, slots))
    }

    pub fn pack_component_delta(&self, world: &World, kind: ComponentKind, slots: &[u32]) -> Vec<u8> {
        self.pack(|buf| write_component_delta(buf, world, kind, slots))
    }

    pub fn pack_spawns(&self, world: &World, handles: &[EntityHandle]) -> Vec<u8> {
        self.pack(|buf| write_spawns(buf, world, handles))
    }

    pub fn pack_despawns(&self, handles: &[EntityHandle]) -> Vec<u8> {
        self.pack(|buf| write_despawns(buf, handles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::net::MAX_DATAGRAM_SIZE;
    use crate::game::schema::Stats;

    fn world_with(n: usize) -> (World, Vec<u32>) {
        let mut world = World::new(1024);
        let mut slots = Vec::new();
        for i in 0..n {
            let h = world.create_entity(EntityKind::Bot).unwrap();
            world.set_x(h.slot, i as f32 * 1.5);
            world.set_y(h.slot, -(i as f32));
            world.set_vx(h.slot, 3.0);
            world.set_vy(h.slot, 0.25 * i as f32);
            world.set_radius(h.slot, 20.0);
            slots.push(h.slot);
        }
        (world, slots)
    }

    #[test]
    fn test_packet_type() {
        assert_eq!(PacketType::of(&[2, 0]), Some(PacketType::TransformIndexed));
        assert_eq!(PacketType::of(&[99]), None);
        assert_eq!(PacketType::of(&[]), None);
    }

    #[test]
    fn test_transform_indexed_roundtrip() {
        let (world, slots) = world_with(10);
        let mut buf = [0u8; 512];
        let (len, count) = write_transforms_indexed(&mut buf, 1.25, &world, &slots);
        assert_eq!(count, 10);
        assert_eq!(len, FAST_HEADER_SIZE + 10 * TRANSFORM_INDEXED_RECORD);

        let mut seen = Vec::new();
        let (ts, n) = read_transforms_indexed(&buf[..len], |i, rec| seen.push((i, rec))).unwrap();
        assert_eq!(ts, 1.25);
        assert_eq!(n, 10);
        for (i, rec) in seen {
            assert_eq!(rec, TransformRecord::from_world(&world, i as u32));
        }
    }

    #[test]
    fn test_empty_batch() {
        let (world, _) = world_with(0);
        let mut buf = [0u8; 64];
        let (len, count) = write_transforms_indexed(&mut buf, 0.0, &world, &[]);
        assert_eq!((len, count), (FAST_HEADER_SIZE, 0));
        assert_eq!(read_transforms_indexed(&buf[..len], |_, _| panic!()), Some((0.0, 0)));
    }

    #[test]
    fn test_truncates_to_capacity() {
        let (world, slots) = world_with(100);
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let (len, count) = write_transforms_indexed(&mut buf, 0.0, &world, &slots);
        let expected = (MAX_DATAGRAM_SIZE - FAST_HEADER_SIZE) / TRANSFORM_INDEXED_RECORD;
        assert_eq!(count, expected);
        assert!(len <= MAX_DATAGRAM_SIZE);

        let mut n = 0;
        read_transforms_indexed(&buf[..len], |i, _| {
            assert_eq!(i as usize, n);
            n += 1;
        })
        .unwrap();
        assert_eq!(n, expected);
    }

    #[test]
    fn test_buffer_smaller_than_header() {
        let (world, slots) = world_with(3);
        let mut buf = [0u8; 4];
        assert_eq!(write_transforms_indexed(&mut buf, 0.0, &world, &slots), (0, 0));
    }

    #[test]
    fn test_wrong_type_and_truncated() {
        let (world, slots) = world_with(4);
        let mut buf = [0u8; 256];
        let (len, _) = write_transforms_indexed(&mut buf, 0.0, &world, &slots);

        assert!(read_physics_indexed(&buf[..len], |_, _| {}).is_none());
        let mut calls = 0;
        assert!(read_transforms_indexed(&buf[..len - 1], |_, _| calls += 1).is_none());
        assert_eq!(calls, 0);
        assert!(read_transforms_indexed(&[], |_, _| {}).is_none());
    }

    #[test]
    fn test_id_transforms() {
        let records = [
            ("alpha", TransformRecord { x: 1.0, y: 2.0, vx: 3.0, vy: 4.0 }),
            ("", TransformRecord::default()),
            ("bot-17", TransformRecord { x: -5.0, y: 0.5, vx: 0.0, vy: 9.0 }),
        ];
        let mut buf = [0u8; 128];
        let (len, count) = write_transforms(&mut buf, 2.0, &records);
        assert_eq!(count, 3);

        let mut out = Vec::new();
        read_transforms(&buf[..len], |id, rec| out.push((id.to_string(), rec))).unwrap();
        assert_eq!(out.len(), 3);
        for ((id, rec), (oid, orec)) in records.iter().zip(&out) {
            assert_eq!(id, oid);
            assert_eq!(rec, orec);
        }

        // A cut in the last record delivers nothing
        let mut calls = 0;
        assert!(read_transforms(&buf[..len - 2], |_, _| calls += 1).is_none());
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_id_transforms_truncate() {
        let records: Vec<_> = (0..10)
            .map(|_| ("entity", TransformRecord::default()))
            .collect();
        let per = 1 + 6 + TRANSFORM_PAYLOAD;
        let mut buf = vec![0u8; FAST_HEADER_SIZE + 3 * per + 5];
        let (len, count) = write_transforms(&mut buf, 0.0, &records);
        assert_eq!(count, 3);
        assert_eq!(len, FAST_HEADER_SIZE + 3 * per);
        assert_eq!(read_transforms(&buf[..len], |_, _| {}), Some((0.0, 3)));
    }

    #[test]
    fn test_physics_roundtrips() {
        let (world, slots) = world_with(5);
        let mut buf = [0u8; 256];
        let (len, _) = write_physics_indexed(&mut buf, 0.5, &world, &slots);
        let mut client = World::new(1024);
        for _ in 0..5 {
            client.create_entity(EntityKind::Bot).unwrap();
        }
        assert_eq!(apply_physics_indexed(&buf[..len], &mut client), Some(5));
        assert_eq!(client.vy(4), 1.0);
        assert_eq!(client.radius(2), 20.0);

        let recs = [("p", PhysicsRecord { vx: 1.0, vy: -1.0, radius: 7.0 })];
        let (len, _) = write_physics(&mut buf, 0.0, &recs);
        let mut got = None;
        read_physics(&buf[..len], |id, r| got = Some((id.to_string(), r))).unwrap();
        assert_eq!(got, Some(("p".to_string(), recs[0].1)));
    }

    #[test]
    fn test_apply_transforms_skips_dead_slots() {
        let (world, slots) = world_with(3);
        let mut buf = [0u8; 256];
        let (len, _) = write_transforms_indexed(&mut buf, 0.0, &world, &slots);

        let mut client = World::new(1024);
        let h = client.create_entity(EntityKind::Bot).unwrap();
        client.set_x(h.slot, 100.0);
        assert_eq!(apply_transforms_indexed(&buf[..len], &mut client), Some(1));
        assert_eq!(client.prev_x(0), 100.0);
        assert_eq!(client.x(0), 0.0);
        assert_eq!(client.active_count(), 1);
    }

    #[test]
    fn test_component_delta() {
        let (mut world, slots) = world_with(4);
        if let Some(s) = world.stats_mut(slots[2]) {
            *s = Stats {
                hp: 42.0,
                score: 7.0,
                ..*s
            };
        }
        let mut buf = [0u8; 512];
        let (len, count) = write_component_delta(&mut buf, &world, ComponentKind::Stats, &slots);
        assert_eq!(count, 4);
        assert_eq!(len, DELTA_HEADER_SIZE + 4 * (2 + ComponentKind::Stats.stride()));

        let mut client = World::new(1024);
        for _ in 0..4 {
            client.create_entity(EntityKind::Bot).unwrap();
        }
        assert_eq!(apply_component_delta(&buf[..len], &mut client), Some(4));
        assert_eq!(client.hp(slots[2]), 42.0);
        assert_eq!(client.score(slots[2]), 7.0);

        // Unknown component kind
        buf[1] = 200;
        assert!(read_component_delta(&buf[..len], |_, _, _| {}).is_none());
    }

    #[test]
    fn test_spawn_despawn_mirroring() {
        let mut server = World::new(64);
        let a = server.create_entity(EntityKind::Bot).unwrap();
        let b = server.create_entity(EntityKind::Food).unwrap();
        server.destroy_entity(a);
        let c = server.create_entity(EntityKind::Player).unwrap();
        server.set_x(c.slot, 12.0);
        assert_eq!(c.slot, a.slot);
        assert_ne!(c.generation, a.generation);

        let mut buf = [0u8; 256];
        let (len, count) = write_spawns(&mut buf, &server, &[b, c, a]);
        // `a` is stale
        assert_eq!(count, 2);

        let mut client = World::new(64);
        assert_eq!(apply_spawns(&buf[..len], &mut client), Some(2));
        assert!(client.is_valid(b));
        assert!(client.is_valid(c));
        assert_eq!(client.x(c.slot), 12.0);
        assert_eq!(client.kind(c.slot), Some(EntityKind::Player));

        let (len, _) = write_despawns(&mut buf, &[c, a]);
        assert_eq!(apply_despawns(&buf[..len], &mut client), Some(1));
        assert!(!client.is_valid(c));
        assert!(client.is_valid(b));
    }

    #[test]
    fn test_packer_trims_and_counts() {
        let (world, slots) = world_with(200);
        let metrics = Arc::new(Metrics::new());
        let packer = Packer::new(2, 16 * 1024)
            .with_max_packet_size(MAX_DATAGRAM_SIZE)
            .with_metrics(metrics.clone());
        let packet = packer.pack_transforms_indexed(&world, 3.0, &slots);
        assert!(packet.len() <= MAX_DATAGRAM_SIZE);
        assert_eq!(
            read_transforms_indexed(&packet, |_, _| {}).map(|(_, n)| n as usize),
            Some((MAX_DATAGRAM_SIZE - FAST_HEADER_SIZE) / TRANSFORM_INDEXED_RECORD)
        );
        assert_eq!(metrics.packets_packed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.bytes_packed.load(Ordering::Relaxed), packet.len() as u64);
    }

    #[test]
    fn test_packer_limit_above_buffer_size_uses_buffer() {
        let (world, slots) = world_with(200);
        let packer = Packer::new(1, 256).with_max_packet_size(4096);
        let packet = packer.pack_transforms_indexed(&world, 0.5, &slots);
        assert!(packet.len() <= 256);
        assert_eq!(
            read_transforms_indexed(&packet, |_, _| {}).map(|(_, n)| n as usize),
            Some((256 - FAST_HEADER_SIZE) / TRANSFORM_INDEXED_RECORD)
        );
    }
}
