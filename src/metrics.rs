//! Prometheus-compatible metrics endpoint
//!
//! Exposes simulation metrics in Prometheus format.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::game::systems::collision::CollisionStats;
use crate::game::systems::skills::SkillStats;

const TICK_HISTORY: usize = 1000;

/// Metrics registry for one simulation room
#[derive(Debug)]
pub struct Metrics {
    // Entity counts
    pub entities_active: AtomicU64,
    pub agents_alive: AtomicU64,
    pub food_count: AtomicU64,
    pub projectile_count: AtomicU64,

    // Tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_avg_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,

    // Performance status (0=Excellent, 1=Good, 2=Warning, 3=Critical, 4=Catastrophic)
    pub performance_status: AtomicU64,
    pub budget_usage_percent: AtomicU64,

    pub tick_count: AtomicU64,
    pub buffer_swaps: AtomicU64,

    // Per-system counters (metrics_extended)
    pub inputs_applied: AtomicU64,
    pub inputs_rejected: AtomicU64,
    pub pickups_total: AtomicU64,
    pub hits_total: AtomicU64,
    pub kills_total: AtomicU64,
    pub projectiles_fired: AtomicU64,
    pub grid_queries: AtomicU64,

    // Wire
    pub packets_packed: AtomicU64,
    pub bytes_packed: AtomicU64,
    pub pool_fallbacks: AtomicU64,

    // Replay audit
    replays_validated: AtomicU64,
    replays_flagged: AtomicU64,

    start_time: Instant,

    // Rolling tick times for percentile calculation
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            entities_active: AtomicU64::new(0),
            agents_alive: AtomicU64::new(0),
            food_count: AtomicU64::new(0),
            projectile_count: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_avg_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            performance_status: AtomicU64::new(0),
            budget_usage_percent: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            buffer_swaps: AtomicU64::new(0),
            inputs_applied: AtomicU64::new(0),
            inputs_rejected: AtomicU64::new(0),
            pickups_total: AtomicU64::new(0),
            hits_total: AtomicU64::new(0),
            kills_total: AtomicU64::new(0),
            projectiles_fired: AtomicU64::new(0),
            grid_queries: AtomicU64::new(0),
            packets_packed: AtomicU64::new(0),
            bytes_packed: AtomicU64::new(0),
            pool_fallbacks: AtomicU64::new(0),
            replays_validated: AtomicU64::new(0),
            replays_flagged: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(TICK_HISTORY)),
        }
    }

    /// Record a tick time and update avg/p95/max
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > TICK_HISTORY {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let sum: u64 = sorted.iter().sum();
            self.tick_time_avg_us
                .store(sum / sorted.len() as u64, Ordering::Relaxed);
            self.tick_time_p95_us
                .store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us
                .store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    pub fn record_entities(&self, active: usize, agents: usize, food: usize, projectiles: usize) {
        self.entities_active.store(active as u64, Ordering::Relaxed);
        self.agents_alive.store(agents as u64, Ordering::Relaxed);
        self.food_count.store(food as u64, Ordering::Relaxed);
        self.projectile_count
            .store(projectiles as u64, Ordering::Relaxed);
    }

    /// Per-system counters; compiled out without `metrics_extended`
    #[allow(unused_variables)]
    pub fn record_systems(&self, collision: &CollisionStats, skills: &SkillStats, inputs: usize) {
        #[cfg(feature = "metrics_extended")]
        {
            self.pickups_total
                .fetch_add(collision.pickups as u64, Ordering::Relaxed);
            self.hits_total
                .fetch_add(collision.hits as u64, Ordering::Relaxed);
            self.kills_total
                .fetch_add(collision.kills as u64, Ordering::Relaxed);
            self.grid_queries
                .fetch_add(collision.queries as u64, Ordering::Relaxed);
            self.projectiles_fired
                .fetch_add(skills.fired as u64, Ordering::Relaxed);
            self.inputs_applied
                .fetch_add(inputs as u64, Ordering::Relaxed);
        }
    }

    pub fn record_packet(&self, bytes: usize) {
        self.packets_packed.fetch_add(1, Ordering::Relaxed);
        self.bytes_packed.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn inc_replays_validated(&self) {
        self.replays_validated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_replays_flagged(&self) {
        self.replays_flagged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn replays_validated(&self) -> u64 {
        self.replays_validated.load(Ordering::Relaxed)
    }

    pub fn replays_flagged(&self) -> u64 {
        self.replays_flagged.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn status_name(&self) -> &'static str {
        match self.performance_status.load(Ordering::Relaxed) {
            0 => "excellent",
            1 => "good",
            2 => "warning",
            3 => "critical",
            _ => "catastrophic",
        }
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("arena_entities_active", "Active entities in the render world", "gauge",
            self.entities_active.load(Ordering::Relaxed));
        metric!("arena_agents_alive", "Live players and bots", "gauge",
            self.agents_alive.load(Ordering::Relaxed));
        metric!("arena_food", "Food entities", "gauge",
            self.food_count.load(Ordering::Relaxed));
        metric!("arena_projectiles", "Active projectiles", "gauge",
            self.projectile_count.load(Ordering::Relaxed));

        metric!("arena_tick_time_microseconds", "Last tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("arena_tick_time_avg_microseconds", "Average tick time", "gauge",
            self.tick_time_avg_us.load(Ordering::Relaxed));
        metric!("arena_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("arena_tick_time_max_microseconds", "Maximum tick time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("arena_tick_count", "Total ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));
        metric!("arena_buffer_swaps_total", "World buffer swaps", "counter",
            self.buffer_swaps.load(Ordering::Relaxed));

        metric!("arena_performance_status", "Performance status (0=Excellent, 4=Catastrophic)", "gauge",
            self.performance_status.load(Ordering::Relaxed));
        metric!("arena_budget_usage_percent", "Tick budget usage percentage", "gauge",
            self.budget_usage_percent.load(Ordering::Relaxed));
        output.push_str(&format!(
            "# HELP arena_performance_state Human-readable performance state\n# TYPE arena_performance_state gauge\narena_performance_state{{state=\"{}\"}} 1\n",
            self.status_name()
        ));

        #[cfg(feature = "metrics_extended")]
        {
            metric!("arena_inputs_applied_total", "Inputs applied to the simulation", "counter",
                self.inputs_applied.load(Ordering::Relaxed));
            metric!("arena_inputs_rejected_total", "Inputs rejected by validation", "counter",
                self.inputs_rejected.load(Ordering::Relaxed));
            metric!("arena_pickups_total", "Food pickups", "counter",
                self.pickups_total.load(Ordering::Relaxed));
            metric!("arena_hits_total", "Projectile hits", "counter",
                self.hits_total.load(Ordering::Relaxed));
            metric!("arena_kills_total", "Agents killed", "counter",
                self.kills_total.load(Ordering::Relaxed));
            metric!("arena_projectiles_fired_total", "Projectiles fired", "counter",
                self.projectiles_fired.load(Ordering::Relaxed));
            metric!("arena_grid_queries_total", "Spatial grid radius queries", "counter",
                self.grid_queries.load(Ordering::Relaxed));
        }

        metric!("arena_packets_packed_total", "Fast-lane packets packed", "counter",
            self.packets_packed.load(Ordering::Relaxed));
        metric!("arena_bytes_packed_total", "Fast-lane bytes packed", "counter",
            self.bytes_packed.load(Ordering::Relaxed));
        metric!("arena_pool_fallbacks_total", "Pack calls that fell back to a temporary buffer", "counter",
            self.pool_fallbacks.load(Ordering::Relaxed));

        metric!("arena_replays_validated_total", "Replay submissions validated", "counter",
            self.replays_validated.load(Ordering::Relaxed));
        metric!("arena_replays_flagged_total", "Replay submissions failing validation", "counter",
            self.replays_flagged.load(Ordering::Relaxed));

        metric!("arena_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// Generate JSON format metrics
    pub fn to_json(&self) -> String {
        let value = serde_json::json!({
            "entities": {
                "active": self.entities_active.load(Ordering::Relaxed),
                "agents": self.agents_alive.load(Ordering::Relaxed),
                "food": self.food_count.load(Ordering::Relaxed),
                "projectiles": self.projectile_count.load(Ordering::Relaxed),
            },
            "performance": {
                "tick_time_us": self.tick_time_us.load(Ordering::Relaxed),
                "tick_time_avg_us": self.tick_time_avg_us.load(Ordering::Relaxed),
                "tick_time_p95_us": self.tick_time_p95_us.load(Ordering::Relaxed),
                "tick_time_max_us": self.tick_time_max_us.load(Ordering::Relaxed),
                "tick_count": self.tick_count.load(Ordering::Relaxed),
                "status": self.performance_status.load(Ordering::Relaxed),
                "status_name": self.status_name(),
                "budget_percent": self.budget_usage_percent.load(Ordering::Relaxed),
            },
            "systems": {
                "inputs_applied": self.inputs_applied.load(Ordering::Relaxed),
                "inputs_rejected": self.inputs_rejected.load(Ordering::Relaxed),
                "pickups": self.pickups_total.load(Ordering::Relaxed),
                "hits": self.hits_total.load(Ordering::Relaxed),
                "kills": self.kills_total.load(Ordering::Relaxed),
                "projectiles_fired": self.projectiles_fired.load(Ordering::Relaxed),
            },
            "network": {
                "packets_packed": self.packets_packed.load(Ordering::Relaxed),
                "bytes_packed": self.bytes_packed.load(Ordering::Relaxed),
                "pool_fallbacks": self.pool_fallbacks.load(Ordering::Relaxed),
            },
            "replay": {
                "validated": self.replays_validated(),
                "flagged": self.replays_flagged(),
            },
            "uptime_seconds": self.uptime_seconds(),
        });
        serde_json::to_string_pretty(&value).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);
                    let response = route(&metrics, &request);
                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

fn route(metrics: &Metrics, request: &str) -> String {
    let (content_type, body) = if request.starts_with("GET /metrics/json")
        || request.starts_with("GET /json")
    {
        ("application/json", metrics.to_json())
    } else if request.starts_with("GET /metrics") {
        ("text/plain; version=0.0.4", metrics.to_prometheus())
    } else if request.starts_with("GET /health") || request.starts_with("GET / ") {
        ("text/plain", "OK".to_string())
    } else {
        return "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            .to_string();
    };
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        content_type,
        body.len(),
        body
    )
}
