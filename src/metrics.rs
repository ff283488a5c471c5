//! Prometheus-compatible metrics registry.
//!
//! Atomic gauges updated from the tick loop, rendered as Prometheus text
//! and JSON by the admin HTTP server (`sponsor::admin`).

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Window of recent tick times for percentile estimates
const TICK_WINDOW: usize = 1024;

#[derive(Debug)]
pub struct Metrics {
    // Population
    pub human_players: AtomicU64,
    pub bot_players: AtomicU64,
    pub connections_active: AtomicU64,

    // World
    pub projectiles_in_flight: AtomicU64,
    pub clusters_owned_rust: AtomicU64,
    pub clusters_owned_cobalt: AtomicU64,
    pub clusters_owned_viridian: AtomicU64,

    // Tick timing (microseconds)
    pub tick_count: AtomicU64,
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,

    // Network
    pub messages_sent: AtomicU64,
    pub broadcast_bytes: AtomicU64,
    pub dropped_frames: AtomicU64,
    pub inputs_rejected: AtomicU64,

    // Bot worker
    pub worker_missed_ticks: AtomicU64,
    pub worker_restarts: AtomicU64,

    start_time: Instant,
    tick_window: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            human_players: AtomicU64::new(0),
            bot_players: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            projectiles_in_flight: AtomicU64::new(0),
            clusters_owned_rust: AtomicU64::new(0),
            clusters_owned_cobalt: AtomicU64::new(0),
            clusters_owned_viridian: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            broadcast_bytes: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
            inputs_rejected: AtomicU64::new(0),
            worker_missed_ticks: AtomicU64::new(0),
            worker_restarts: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_window: RwLock::new(VecDeque::with_capacity(TICK_WINDOW)),
        }
    }

    pub fn record_tick_time(&self, elapsed: Duration) {
        let us = elapsed.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut window = self.tick_window.write();
        if window.len() == TICK_WINDOW {
            window.pop_front();
        }
        window.push_back(us);

        let mut sorted: Vec<u64> = window.iter().copied().collect();
        sorted.sort_unstable();
        let pick = |q: f64| {
            let idx = ((sorted.len() as f64 - 1.0) * q) as usize;
            sorted[idx]
        };
        self.tick_time_p95_us.store(pick(0.95), Ordering::Relaxed);
        self.tick_time_p99_us.store(pick(0.99), Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn to_prometheus(&self) -> String {
        let g = |v: &AtomicU64| v.load(Ordering::Relaxed);
        format!(
            "# HELP adlands_players_human Connected human players\n\
             # TYPE adlands_players_human gauge\n\
             adlands_players_human {}\n\
             # HELP adlands_players_bot Simulated bots\n\
             # TYPE adlands_players_bot gauge\n\
             adlands_players_bot {}\n\
             # HELP adlands_connections_active Open transport connections\n\
             # TYPE adlands_connections_active gauge\n\
             adlands_connections_active {}\n\
             # HELP adlands_projectiles_in_flight Projectiles in flight\n\
             # TYPE adlands_projectiles_in_flight gauge\n\
             adlands_projectiles_in_flight {}\n\
             # HELP adlands_clusters_owned Clusters owned per faction\n\
             # TYPE adlands_clusters_owned gauge\n\
             adlands_clusters_owned{{faction=\"rust\"}} {}\n\
             adlands_clusters_owned{{faction=\"cobalt\"}} {}\n\
             adlands_clusters_owned{{faction=\"viridian\"}} {}\n\
             # HELP adlands_tick_count Ticks simulated\n\
             # TYPE adlands_tick_count counter\n\
             adlands_tick_count {}\n\
             # HELP adlands_tick_time_us Last tick duration in microseconds\n\
             # TYPE adlands_tick_time_us gauge\n\
             adlands_tick_time_us {}\n\
             adlands_tick_time_p95_us {}\n\
             adlands_tick_time_p99_us {}\n\
             # HELP adlands_messages_sent Messages fanned out\n\
             # TYPE adlands_messages_sent counter\n\
             adlands_messages_sent {}\n\
             # HELP adlands_broadcast_bytes Broadcast payload bytes\n\
             # TYPE adlands_broadcast_bytes counter\n\
             adlands_broadcast_bytes {}\n\
             # HELP adlands_dropped_frames Frames dropped on backpressure\n\
             # TYPE adlands_dropped_frames counter\n\
             adlands_dropped_frames {}\n\
             # HELP adlands_inputs_rejected Inputs rejected as protocol misuse\n\
             # TYPE adlands_inputs_rejected counter\n\
             adlands_inputs_rejected {}\n\
             # HELP adlands_worker_missed_ticks Bot worker outputs missed\n\
             # TYPE adlands_worker_missed_ticks counter\n\
             adlands_worker_missed_ticks {}\n\
             # HELP adlands_worker_restarts Bot worker restarts\n\
             # TYPE adlands_worker_restarts counter\n\
             adlands_worker_restarts {}\n\
             # HELP adlands_uptime_seconds Server uptime\n\
             # TYPE adlands_uptime_seconds counter\n\
             adlands_uptime_seconds {}\n",
            g(&self.human_players),
            g(&self.bot_players),
            g(&self.connections_active),
            g(&self.projectiles_in_flight),
            g(&self.clusters_owned_rust),
            g(&self.clusters_owned_cobalt),
            g(&self.clusters_owned_viridian),
            g(&self.tick_count),
            g(&self.tick_time_us),
            g(&self.tick_time_p95_us),
            g(&self.tick_time_p99_us),
            g(&self.messages_sent),
            g(&self.broadcast_bytes),
            g(&self.dropped_frames),
            g(&self.inputs_rejected),
            g(&self.worker_missed_ticks),
            g(&self.worker_restarts),
            self.uptime_seconds(),
        )
    }

    pub fn to_json(&self) -> String {
        #[derive(Serialize)]
        struct Snapshot {
            players: Players,
            world: World,
            ticks: Ticks,
            network: Network,
            worker: Worker,
            uptime_seconds: u64,
        }
        #[derive(Serialize)]
        struct Players {
            human: u64,
            bot: u64,
            connections: u64,
        }
        #[derive(Serialize)]
        struct World {
            projectiles: u64,
            clusters_owned: [u64; 3],
        }
        #[derive(Serialize)]
        struct Ticks {
            count: u64,
            last_us: u64,
            p95_us: u64,
            p99_us: u64,
        }
        #[derive(Serialize)]
        struct Network {
            messages_sent: u64,
            broadcast_bytes: u64,
            dropped_frames: u64,
            inputs_rejected: u64,
        }
        #[derive(Serialize)]
        struct Worker {
            missed_ticks: u64,
            restarts: u64,
        }

        let g = |v: &AtomicU64| v.load(Ordering::Relaxed);
        let snapshot = Snapshot {
            players: Players {
                human: g(&self.human_players),
                bot: g(&self.bot_players),
                connections: g(&self.connections_active),
            },
            world: World {
                projectiles: g(&self.projectiles_in_flight),
                clusters_owned: [
                    g(&self.clusters_owned_rust),
                    g(&self.clusters_owned_cobalt),
                    g(&self.clusters_owned_viridian),
                ],
            },
            ticks: Ticks {
                count: g(&self.tick_count),
                last_us: g(&self.tick_time_us),
                p95_us: g(&self.tick_time_p95_us),
                p99_us: g(&self.tick_time_p99_us),
            },
            network: Network {
                messages_sent: g(&self.messages_sent),
                broadcast_bytes: g(&self.broadcast_bytes),
                dropped_frames: g(&self.dropped_frames),
                inputs_rejected: g(&self.inputs_rejected),
            },
            worker: Worker {
                missed_ticks: g(&self.worker_missed_ticks),
                restarts: g(&self.worker_restarts),
            },
            uptime_seconds: self.uptime_seconds(),
        };
        serde_json::to_string_pretty(&snapshot).unwrap_or_else(|_| "{}".into())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
