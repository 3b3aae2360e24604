//! Tick cost benchmarks for the arena simulation core
//!
//! Measures the grid, collision and packing paths at various entity counts.
//!
//! Run with: cargo bench --bench tick

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use arena_core::config::SimConfig;
use arena_core::game::constants::net::MAX_DATAGRAM_SIZE;
use arena_core::game::constants::sim::DT;
use arena_core::game::constants::world::{GRID_CELL_SIZE, SIZE};
use arena_core::game::game_loop::GameLoop;
use arena_core::game::schema::EntityKind;
use arena_core::game::spatial::SpatialHashGrid;
use arena_core::game::spawn::{spawn_agent, spawn_food};
use arena_core::game::systems::collision::CollisionSystem;
use arena_core::game::systems::movement;
use arena_core::game::world::World;
use arena_core::metrics::Metrics;
use arena_core::net::packets::Packer;
use arena_core::util::vec2::Vec2;

const COUNTS: [usize; 4] = [250, 500, 1000, 2000];

/// A world with one agent per ten entities, the rest food
fn populated_world(count: usize) -> World {
    let mut world = World::new(count + 64);
    let mut rng = ChaCha8Rng::seed_from_u64(count as u64);
    for i in 0..count {
        let pos = Vec2::new(rng.gen_range(0.0..SIZE), rng.gen_range(0.0..SIZE));
        let colour = [rng.gen(), rng.gen(), rng.gen()];
        let spawned = if i % 10 == 0 {
            spawn_agent(&mut world, EntityKind::Bot, pos, colour)
        } else {
            spawn_food(&mut world, pos, colour)
        };
        if spawned.is_err() {
            break;
        }
    }
    world
}

fn snapshot(world: &World) -> World {
    let mut copy = World::new(world.capacity());
    // Same capacity, cannot fail
    let _ = copy.copy_from(world);
    copy
}

fn bench_grid(c: &mut Criterion) {
    let mut group = c.benchmark_group("spatial_grid");
    group.sample_size(50);

    for count in COUNTS {
        let world = populated_world(count);
        let mut grid = SpatialHashGrid::new(world.capacity(), 0.0, SIZE, GRID_CELL_SIZE);
        let mut out = Vec::new();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("rebuild", count), &count, |b, _| {
            b.iter(|| {
                grid.clear();
                for &slot in world.active_entities() {
                    grid.add(&world, slot, false);
                }
                black_box(grid.stats())
            })
        });
        group.bench_with_input(BenchmarkId::new("query", count), &count, |b, _| {
            b.iter(|| black_box(grid.query_radius_into(&world, SIZE / 2.0, SIZE / 2.0, 200.0, &mut out)))
        });
    }
    group.finish();
}

fn bench_collision(c: &mut Criterion) {
    let mut group = c.benchmark_group("collision");
    group.sample_size(50);

    for count in COUNTS {
        let world = populated_world(count);
        let mut grid = SpatialHashGrid::new(world.capacity(), 0.0, SIZE, GRID_CELL_SIZE);
        let mut system = CollisionSystem::new();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("resolve", count), &count, |b, _| {
            b.iter_batched(
                || snapshot(&world),
                |mut w| {
                    movement::update(&mut w, DT, SIZE);
                    black_box(system.run(&mut w, &mut grid))
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

fn bench_packing(c: &mut Criterion) {
    let mut group = c.benchmark_group("packing");
    group.sample_size(50);
    let packer = Packer::new(4, 64 * 1024);
    let datagram = Packer::new(4, 64 * 1024).with_max_packet_size(MAX_DATAGRAM_SIZE);

    for count in COUNTS {
        let world = populated_world(count);
        let slots = world.active_entities().to_vec();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("transforms_indexed", count), &count, |b, _| {
            b.iter(|| black_box(packer.pack_transforms_indexed(&world, 1.0, &slots)))
        });
        group.bench_with_input(BenchmarkId::new("datagram_truncated", count), &count, |b, _| {
            b.iter(|| black_box(datagram.pack_transforms_indexed(&world, 1.0, &slots)))
        });
    }
    group.finish();
}

/// Full tick including sync and swap
fn bench_full_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_tick");
    group.sample_size(30);

    for count in COUNTS {
        let config = SimConfig {
            max_entities: count + 256,
            food_count: 0,
            bot_count: 0,
            ..SimConfig::default()
        };
        let mut game = GameLoop::new(&config, Arc::new(Metrics::new()));
        let seed = populated_world(count);
        let _ = game.edit(|w| {
            let mut rng = ChaCha8Rng::seed_from_u64(7);
            for &slot in seed.active_entities() {
                let pos = Vec2::new(seed.x(slot), seed.y(slot));
                let colour = [rng.gen(), rng.gen(), rng.gen()];
                let _ = match seed.kind(slot) {
                    Some(EntityKind::Bot) => spawn_agent(w, EntityKind::Bot, pos, colour),
                    _ => spawn_food(w, pos, colour),
                };
            }
        });

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("copy_then_advance", count), &count, |b, _| {
            b.iter(|| black_box(game.tick().map(|r| r.tick)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_grid, bench_collision, bench_packing, bench_full_tick);

criterion_main!(benches);
