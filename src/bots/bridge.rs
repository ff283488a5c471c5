//! Bridge between the room tick loop and the bot worker thread.
//!
//! The exchange is pipelined: each tick the room consumes the worker's
//! previous output (if it has arrived) and dispatches the current input
//! without waiting. A missed output never blocks the tick; the counter is
//! logged every hundred misses. If the worker thread dies the bridge
//! respawns it with the same seed, and the game stays playable with zero
//! bots during the restart window.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};

use crate::bots::worker::{
    self, BridgeInput, CaptureDelta, CaptureView, WorkerConfig, WorkerTickInput, WorkerTickOutput,
};
use crate::game::constants::bots::MISSED_TICK_LOG_INTERVAL;
use crate::game::state::{ActorId, BotId, Faction};
use crate::worldgen::GeneratedWorld;

/// Channel depth; a pipeline one tick deep only ever holds a couple of
/// messages
const CHANNEL_CAPACITY: usize = 32;

pub struct BotBridge {
    config: WorkerConfig,
    to_worker: Sender<BridgeInput>,
    from_worker: Receiver<WorkerTickOutput>,
    handle: Option<thread::JoinHandle<()>>,
    missed_ticks: u64,
    restarts: u64,
    /// Set after a restart until the room pushes a fresh capture snapshot
    needs_snapshot: bool,
}

impl BotBridge {
    pub fn new(seed: u64, world: Arc<GeneratedWorld>, initial_bots: usize) -> Self {
        let config = WorkerConfig {
            seed,
            world,
            initial_bots,
        };
        let (to_worker, from_worker, handle) = Self::start(&config);
        Self {
            config,
            to_worker,
            from_worker,
            handle,
            missed_ticks: 0,
            restarts: 0,
            needs_snapshot: true,
        }
    }

    fn start(
        config: &WorkerConfig,
    ) -> (
        Sender<BridgeInput>,
        Receiver<WorkerTickOutput>,
        Option<thread::JoinHandle<()>>,
    ) {
        let (in_tx, in_rx) = bounded(CHANNEL_CAPACITY);
        let (out_tx, out_rx) = bounded(CHANNEL_CAPACITY);
        let handle = match worker::spawn(config.clone(), in_rx, out_tx) {
            Ok(h) => Some(h),
            Err(e) => {
                error!("failed to spawn bot worker: {}", e);
                None
            }
        };
        (in_tx, out_rx, handle)
    }

    /// Restart the worker with the same seed if the thread has died
    pub fn ensure_alive(&mut self) {
        let dead = match &self.handle {
            Some(h) => h.is_finished(),
            None => true,
        };
        if !dead {
            return;
        }
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
        self.restarts += 1;
        warn!(
            "bot worker down, restarting with seed {} (restart #{})",
            self.config.seed, self.restarts
        );
        let (tx, rx, handle) = Self::start(&self.config);
        self.to_worker = tx;
        self.from_worker = rx;
        self.handle = handle;
        self.needs_snapshot = true;
    }

    /// Non-blocking dispatch of this tick's input
    pub fn dispatch(&mut self, input: WorkerTickInput) {
        match self.to_worker.try_send(BridgeInput::Tick(input)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("bot worker input channel full, dropping tick input");
            }
            Err(TrySendError::Disconnected(_)) => {
                // Watchdog picks this up next tick
            }
        }
    }

    /// Consume everything the worker produced since last tick. Multiple
    /// queued outputs (a stalled worker catching up) are merged: events and
    /// projectiles concatenate in order, positions take the latest, and the
    /// projectile id boundary takes the max so ids never repeat.
    pub fn collect_output(&mut self) -> Option<WorkerTickOutput> {
        let mut merged: Option<WorkerTickOutput> = None;
        while let Ok(output) = self.from_worker.try_recv() {
            merged = Some(match merged {
                None => output,
                Some(mut acc) => {
                    acc.tick = output.tick;
                    acc.bot_ids = output.bot_ids;
                    acc.positions = output.positions;
                    acc.bot_states = output.bot_states;
                    acc.next_projectile_id = acc.next_projectile_id.max(output.next_projectile_id);
                    acc.new_projectiles.extend(output.new_projectiles);
                    acc.events.extend(output.events);
                    acc
                }
            });
        }

        if merged.is_none() {
            self.missed_ticks += 1;
            if self.missed_ticks % MISSED_TICK_LOG_INTERVAL == 0 {
                warn!("bot worker behind: {} missed outputs", self.missed_ticks);
            }
        }
        merged
    }

    pub fn send_capture_snapshot(&mut self, view: CaptureView) {
        if self.to_worker.try_send(BridgeInput::CaptureSnapshot(view)).is_ok() {
            self.needs_snapshot = false;
        }
    }

    pub fn send_capture_deltas(&self, deltas: Vec<CaptureDelta>) {
        if deltas.is_empty() {
            return;
        }
        let _ = self.to_worker.try_send(BridgeInput::CaptureDeltas(deltas));
    }

    /// Forward damage from a human projectile; the worker owns bot HP
    pub fn apply_damage(&self, bot: BotId, amount: i32, attacker: ActorId) {
        let _ = self.to_worker.try_send(BridgeInput::ApplyDamage {
            bot,
            amount,
            attacker,
        });
    }

    /// A human joined: despawn one bot, preferring the joiner's faction
    pub fn on_human_joined(&self, faction: Faction) {
        let _ = self
            .to_worker
            .try_send(BridgeInput::DespawnBot {
                prefer: Some(faction),
            });
    }

    /// A human left: refill with a bot of their faction
    pub fn on_human_left(&self, faction: Faction) {
        let _ = self.to_worker.try_send(BridgeInput::SpawnBot { faction });
    }

    pub fn missed_ticks(&self) -> u64 {
        self.missed_ticks
    }

    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    /// True right after (re)start until the room sends a capture snapshot
    pub fn needs_snapshot(&self) -> bool {
        self.needs_snapshot
    }

    pub fn shutdown(mut self) {
        let _ = self.to_worker.try_send(BridgeInput::Shutdown);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
        info!("bot worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::Ownership;
    use crate::worldgen::WorldParams;
    use std::time::{Duration, Instant};

    fn test_world() -> Arc<GeneratedWorld> {
        Arc::new(
            GeneratedWorld::generate(WorldParams {
                world_seed: 5,
                terrain_seed: 5,
                subdivision: 2,
            })
            .unwrap(),
        )
    }

    fn tick_input(tick: u64) -> WorkerTickInput {
        WorkerTickInput {
            dt: 0.05,
            planet_rotation: 0.0,
            tick,
            next_projectile_id: 0,
            humans: Vec::new(),
        }
    }

    /// Poll the bridge until an output arrives or the deadline passes
    fn wait_for_output(bridge: &mut BotBridge, deadline: Duration) -> Option<WorkerTickOutput> {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if let Some(out) = bridge.collect_output() {
                return Some(out);
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        None
    }

    #[test]
    fn test_pipelined_roundtrip() {
        let mut bridge = BotBridge::new(1, test_world(), 4);
        bridge.dispatch(tick_input(1));
        let out = wait_for_output(&mut bridge, Duration::from_secs(2)).expect("worker output");
        assert_eq!(out.tick, 1);
        assert_eq!(out.bot_ids.len(), 4);
        bridge.shutdown();
    }

    #[test]
    fn test_missed_tick_counter() {
        let mut bridge = BotBridge::new(2, test_world(), 2);
        // No dispatch yet: collecting counts a miss
        assert!(bridge.collect_output().is_none());
        assert_eq!(bridge.missed_ticks(), 1);
        bridge.shutdown();
    }

    #[test]
    fn test_merged_outputs_keep_monotone_projectile_ids() {
        let mut bridge = BotBridge::new(3, test_world(), 3);
        // Queue two ticks before collecting: outputs merge
        bridge.dispatch(tick_input(1));
        bridge.dispatch(tick_input(2));
        std::thread::sleep(Duration::from_millis(150));
        let out = wait_for_output(&mut bridge, Duration::from_secs(2)).expect("worker output");
        assert_eq!(out.tick, 2, "merged output reports the latest tick");
        // No duplicate projectile ids across the merge
        let mut ids: Vec<u64> = out.new_projectiles.iter().map(|p| p.id).collect();
        let before = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), before);
        bridge.shutdown();
    }

    #[test]
    fn test_snapshot_flag_lifecycle() {
        let mut bridge = BotBridge::new(4, test_world(), 1);
        assert!(bridge.needs_snapshot());
        bridge.send_capture_snapshot(CaptureView {
            owners: vec![Ownership::Unowned],
        });
        assert!(!bridge.needs_snapshot());
        bridge.shutdown();
    }

    #[test]
    fn test_quota_messages_accepted() {
        let mut bridge = BotBridge::new(5, test_world(), 3);
        bridge.on_human_joined(Faction::Rust);
        bridge.on_human_left(Faction::Rust);
        bridge.dispatch(tick_input(1));
        let out = wait_for_output(&mut bridge, Duration::from_secs(2)).expect("worker output");
        // Despawn then respawn keeps the fleet size stable
        assert_eq!(out.bot_ids.len(), 3);
        bridge.shutdown();
    }
}
