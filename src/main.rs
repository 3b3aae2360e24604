use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use arena_core::config::SimConfig;
use arena_core::game::constants::net::MAX_DATAGRAM_SIZE;
use arena_core::game::entity::EntityHandle;
use arena_core::game::game_loop::GameLoop;
use arena_core::game::schema::EntityKind;
use arena_core::game::spawn::spawn_agent;
use arena_core::metrics::{self, Metrics};
use arena_core::net::packets::Packer;
use arena_core::net::protocol::InputCommand;
use arena_core::util::vec2::Vec2;

/// Ticks between bot retargets
const BOT_RETARGET_TICKS: u64 = 90;
/// Snapshot broadcast rate for the observer
const OBSERVER_HZ: u64 = 20;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Arena Core v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = SimConfig::load_or_default();
    if let Err(e) = config.validate() {
        anyhow::bail!("Invalid configuration: {}", e);
    }
    info!(
        "Configuration loaded: {} entities, {} Hz, world {}",
        config.max_entities, config.tick_rate, config.world_size
    );

    // Initialize metrics
    let metrics = Arc::new(Metrics::new());
    let metrics_clone = metrics.clone();
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Populate the room
    let mut game = GameLoop::new(&config, metrics.clone());
    game.set_food_target(config.food_count);
    let bots = spawn_bots(&mut game, &config)?;
    info!("Spawned {} bots", bots.len());

    let buffers = game.buffers().clone();
    let shutdown = Arc::new(AtomicBool::new(false));

    // Simulation thread: owns the GameLoop, publishes through the buffers
    let sim_shutdown = shutdown.clone();
    let world_size = config.world_size;
    let tick_duration = Duration::from_secs_f32(config.dt());
    let sim = std::thread::Builder::new()
        .name("arena-sim".to_string())
        .spawn(move || run_simulation(game, bots, world_size, tick_duration, sim_shutdown))?;

    // Observer: packs the published state the way a broadcaster would
    let packer = Packer::new(config.pool_buffers, config.pool_buffer_size)
        .with_max_packet_size(MAX_DATAGRAM_SIZE)
        .with_metrics(metrics.clone());
    let observer_metrics = metrics.clone();
    let observer = async move {
        let start = Instant::now();
        let mut interval = tokio::time::interval(Duration::from_millis(1000 / OBSERVER_HZ));
        let mut slots = Vec::new();
        loop {
            interval.tick().await;
            let packet = {
                let world = buffers.render_state();
                slots.clear();
                slots.extend_from_slice(world.active_entities());
                packer.pack_transforms_indexed(&world, start.elapsed().as_secs_f32(), &slots)
            };
            debug!(
                "Snapshot {} bytes, {} swaps",
                packet.len(),
                observer_metrics.buffer_swaps.load(Ordering::Relaxed)
            );
        }
    };

    // Shutdown signal handler
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Shutdown signal received");
    };

    tokio::select! {
        _ = observer => {}
        _ = ctrl_c => {
            info!("Shutting down...");
        }
    }

    shutdown.store(true, Ordering::Release);
    match sim.join() {
        Ok(()) => {}
        Err(_) => error!("Simulation thread panicked"),
    }

    info!("Stopped after {} ticks", metrics.tick_count.load(Ordering::Relaxed));
    Ok(())
}

fn spawn_bots(game: &mut GameLoop, config: &SimConfig) -> anyhow::Result<Vec<EntityHandle>> {
    let mut rng = ChaCha8Rng::seed_from_u64(0xB075);
    let size = config.world_size;
    let count = config.bot_count;
    let bots = game.edit(|world| {
        let mut bots = Vec::with_capacity(count);
        for _ in 0..count {
            let pos = Vec2::new(rng.gen_range(0.0..size), rng.gen_range(0.0..size));
            let colour = [rng.gen(), rng.gen(), rng.gen()];
            match spawn_agent(world, EntityKind::Bot, pos, colour) {
                Ok(h) => bots.push(h),
                Err(e) => {
                    warn!("Bot spawn stopped early: {}", e);
                    break;
                }
            }
        }
        bots
    })?;
    Ok(bots)
}

fn run_simulation(
    mut game: GameLoop,
    mut bots: Vec<EntityHandle>,
    world_size: f32,
    tick_duration: Duration,
    shutdown: Arc<AtomicBool>,
) {
    let sender = game.input_sender();
    let mut rng = ChaCha8Rng::seed_from_u64(0x5EED);
    let mut sequence = 0u32;
    let mut last = Instant::now();

    while !shutdown.load(Ordering::Acquire) {
        let now = Instant::now();
        let frame_dt = now.duration_since(last).as_secs_f32();
        last = now;

        if game.tick_count() % BOT_RETARGET_TICKS == 0 {
            sequence = sequence.wrapping_add(1);
            {
                let buffers = game.buffers();
                let world = buffers.render_state();
                bots.retain(|h| world.is_valid(*h));
            }
            for &bot in &bots {
                let target = Vec2::new(rng.gen_range(0.0..world_size), rng.gen_range(0.0..world_size));
                let cmd = InputCommand::new(sequence, game.tick_count(), target, 0);
                if sender.try_send(bot, cmd).is_err() {
                    break;
                }
            }
        }

        if let Err(e) = game.run_frame(frame_dt) {
            error!("Tick failed: {}", e);
            break;
        }
        std::thread::sleep(tick_duration.saturating_sub(now.elapsed()));
    }

    info!("Simulation stopped at tick {}", game.tick_count());
}
