//! The bot simulation thread.
//!
//! Owns every bot exclusively. The main loop and this worker share nothing
//! mutable: they exchange only the message shapes below over channels. Each
//! tick-input produces one tick-output carrying a packed position buffer
//! (stride 6 floats per bot) so the room can rebuild its spatial hash
//! without materializing per-bot objects.
//!
//! Panics never cross the boundary: the step is wrapped and converted into
//! an error event, after which the thread exits and the bridge watchdog
//! restarts it with the same seed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use tracing::{info, warn};

use crate::bots::ai::{self, BotBrain, BotMode, ClusterView};
use crate::game::constants::world::RADIUS;
use crate::game::constants::{bots, tank};
use crate::game::state::{ActorId, BotId, ClusterId, Faction, HumanView, Ownership};
use crate::net::protocol::PlayerWire;
use crate::util::sphere::{self, SurfacePos};
use crate::worldgen::GeneratedWorld;

/// Flag bits inside the packed position buffer
pub mod flags {
    pub const DEAD: u32 = 1;
    pub const DEPLOYING: u32 = 1 << 1;
    /// Faction index occupies bits 4-5
    pub const FACTION_SHIFT: u32 = 4;

    pub fn pack(dead: bool, deploying: bool, faction_index: usize) -> f32 {
        let mut bits = 0u32;
        if dead {
            bits |= DEAD;
        }
        if deploying {
            bits |= DEPLOYING;
        }
        bits |= (faction_index as u32) << FACTION_SHIFT;
        bits as f32
    }

    pub fn is_dead(raw: f32) -> bool {
        (raw as u32) & DEAD != 0
    }

    pub fn is_deploying(raw: f32) -> bool {
        (raw as u32) & DEPLOYING != 0
    }

    pub fn faction_index(raw: f32) -> usize {
        (((raw as u32) >> FACTION_SHIFT) & 0b11) as usize
    }
}

/// Per-cluster ownership snapshot pushed to the worker
#[derive(Debug, Clone)]
pub struct CaptureView {
    pub owners: Vec<Ownership>,
}

/// Incremental ownership change between snapshots
#[derive(Debug, Clone, Copy)]
pub struct CaptureDelta {
    pub cluster: ClusterId,
    pub owner: Ownership,
}

/// Main -> worker messages
#[derive(Debug)]
pub enum BridgeInput {
    Tick(WorkerTickInput),
    CaptureSnapshot(CaptureView),
    CaptureDeltas(Vec<CaptureDelta>),
    ApplyDamage {
        bot: BotId,
        amount: i32,
        attacker: ActorId,
    },
    SpawnBot {
        faction: Faction,
    },
    /// Despawn one bot, preferring the given faction (human quota balance)
    DespawnBot {
        prefer: Option<Faction>,
    },
    Shutdown,
}

/// One tick of input for the worker
#[derive(Debug)]
pub struct WorkerTickInput {
    pub dt: f32,
    pub planet_rotation: f32,
    pub tick: u64,
    /// Worker allocates projectile ids at and above this boundary
    pub next_projectile_id: u64,
    pub humans: Vec<HumanView>,
}

/// A projectile fired by a bot this tick
#[derive(Debug, Clone, Copy)]
pub struct ProjectileSpawn {
    pub id: u64,
    pub owner: BotId,
    pub faction: Faction,
    pub pos: SurfacePos,
    pub heading: f32,
    pub power: f32,
}

/// Worker -> main events
#[derive(Debug, Clone)]
pub enum BotEvent {
    Damaged {
        bot: BotId,
        damage: i32,
        hp_after: i32,
        attacker: ActorId,
    },
    Died {
        bot: BotId,
        faction: Faction,
        killer: Option<ActorId>,
    },
    /// A panic or internal fault, converted at the boundary
    Error {
        message: String,
    },
}

/// One tick of output from the worker
#[derive(Debug, Default)]
pub struct WorkerTickOutput {
    pub tick: u64,
    pub bot_ids: Vec<BotId>,
    /// Packed stride-6 buffer: theta, phi, heading, speed, flags, cluster
    pub positions: Vec<f32>,
    pub next_projectile_id: u64,
    pub new_projectiles: Vec<ProjectileSpawn>,
    pub events: Vec<BotEvent>,
    /// Broadcast-shaped states keyed by bot id
    pub bot_states: Vec<(BotId, PlayerWire)>,
}

/// Worker spawn parameters; kept by the bridge so a restart reproduces the
/// same fleet
#[derive(Clone)]
pub struct WorkerConfig {
    pub seed: u64,
    pub world: Arc<GeneratedWorld>,
    pub initial_bots: usize,
}

/// Spawn the worker thread
pub fn spawn(
    config: WorkerConfig,
    rx: Receiver<BridgeInput>,
    tx: Sender<WorkerTickOutput>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("bot-worker".into())
        .spawn(move || run(config, rx, tx))
}

fn run(config: WorkerConfig, rx: Receiver<BridgeInput>, tx: Sender<WorkerTickOutput>) {
    let mut sim = BotSim::new(config);
    info!("bot worker up: {} bots", sim.bots.len());

    while let Ok(msg) = rx.recv() {
        match msg {
            BridgeInput::Tick(input) => {
                let tick = input.tick;
                let result = catch_unwind(AssertUnwindSafe(|| sim.step(input)));
                let output = match result {
                    Ok(output) => output,
                    Err(panic) => {
                        let message = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "bot step panicked".into());
                        warn!("bot worker fault at tick {}: {}", tick, message);
                        let mut out = WorkerTickOutput {
                            tick,
                            ..Default::default()
                        };
                        out.events.push(BotEvent::Error { message });
                        let _ = tx.send(out);
                        // State may be torn; exit and let the bridge
                        // restart us from the seed
                        return;
                    }
                };
                if tx.send(output).is_err() {
                    return;
                }
            }
            BridgeInput::CaptureSnapshot(view) => sim.owners = view.owners,
            BridgeInput::CaptureDeltas(deltas) => {
                for d in deltas {
                    if let Some(slot) = sim.owners.get_mut(d.cluster as usize) {
                        *slot = d.owner;
                    }
                }
            }
            BridgeInput::ApplyDamage {
                bot,
                amount,
                attacker,
            } => sim.apply_damage(bot, amount, attacker),
            BridgeInput::SpawnBot { faction } => {
                sim.spawn_bot(Some(faction));
            }
            BridgeInput::DespawnBot { prefer } => sim.despawn_bot(prefer),
            BridgeInput::Shutdown => return,
        }
    }
}

struct Bot {
    id: BotId,
    faction: Faction,
    pos: SurfacePos,
    heading: f32,
    speed: f32,
    hp: i32,
    alive: bool,
    deploy_timer: f32,
    respawn_timer: f32,
    current_cluster: ClusterId,
    brain: BotBrain,
    /// Who dealt the killing blow, reported in the death event
    last_attacker: Option<ActorId>,
    pending_death: bool,
}

struct BotSim {
    world: Arc<GeneratedWorld>,
    bots: Vec<Bot>,
    owners: Vec<Ownership>,
    centroids: Vec<SurfacePos>,
    rng: StdRng,
    next_bot_id: BotId,
    pending_events: Vec<BotEvent>,
}

impl BotSim {
    fn new(config: WorkerConfig) -> Self {
        let centroids = config
            .world
            .clusters
            .iter()
            .map(|c| {
                let mut acc = [0.0f32; 3];
                for &t in &c.tiles {
                    let u = config.world.tiles[t as usize].unit;
                    acc[0] += u[0];
                    acc[1] += u[1];
                    acc[2] += u[2];
                }
                let n = c.tiles.len() as f32;
                SurfacePos::from_unit([acc[0] / n, acc[1] / n, acc[2] / n])
            })
            .collect();

        // Real ownership arrives with the first capture snapshot right
        // after spawn
        let owners = vec![Ownership::Unowned; config.world.clusters.len()];

        let mut sim = Self {
            world: config.world,
            bots: Vec::with_capacity(config.initial_bots),
            owners,
            centroids,
            rng: StdRng::seed_from_u64(config.seed),
            next_bot_id: 0,
            pending_events: Vec::new(),
        };
        for _ in 0..config.initial_bots {
            sim.spawn_bot(None);
        }
        sim
    }

    fn spawn_bot(&mut self, faction: Option<Faction>) -> BotId {
        let id = self.next_bot_id;
        self.next_bot_id += 1;

        let faction = faction.unwrap_or_else(|| {
            Faction::from_index(id as usize % 3).expect("index < 3 is always a faction")
        });
        let portal = self.world.portals[self.rng.gen_range(0..self.world.portals.len())];
        let pos = self.world.tile_pos(portal);
        let heading = self.rng.gen_range(0.0..std::f32::consts::TAU);

        self.bots.push(Bot {
            id,
            faction,
            pos,
            heading,
            speed: 0.0,
            hp: tank::MAX_HP,
            alive: true,
            deploy_timer: tank::DEPLOY_DURATION,
            respawn_timer: 0.0,
            current_cluster: self.world.cluster_at(pos),
            brain: BotBrain::new(&mut self.rng),
            last_attacker: None,
            pending_death: false,
        });
        id
    }

    fn despawn_bot(&mut self, prefer: Option<Faction>) {
        let idx = prefer
            .and_then(|f| self.bots.iter().position(|b| b.faction == f))
            .or_else(|| (!self.bots.is_empty()).then_some(0));
        if let Some(idx) = idx {
            self.bots.swap_remove(idx);
        }
    }

    fn apply_damage(&mut self, bot: BotId, amount: i32, attacker: ActorId) {
        if let Some(b) = self.bots.iter_mut().find(|b| b.id == bot) {
            if !b.alive {
                return;
            }
            b.hp -= amount;
            b.last_attacker = Some(attacker);
            if b.hp <= 0 {
                b.hp = 0;
                // Death is reported from the next step so the hit always
                // precedes the kill
                b.pending_death = true;
            }
            self.pending_events.push(BotEvent::Damaged {
                bot,
                damage: amount,
                hp_after: b.hp,
                attacker,
            });
        }
    }

    fn step(&mut self, input: WorkerTickInput) -> WorkerTickOutput {
        let dt = input.dt;
        let mut events = std::mem::take(&mut self.pending_events);
        let mut new_projectiles = Vec::new();
        let mut next_projectile_id = input.next_projectile_id;

        for i in 0..self.bots.len() {
            let bot = &mut self.bots[i];

            if bot.pending_death {
                bot.pending_death = false;
                bot.alive = false;
                bot.speed = 0.0;
                bot.respawn_timer = bots::RESPAWN_DELAY;
                bot.brain.mode = BotMode::Dead;
                events.push(BotEvent::Died {
                    bot: bot.id,
                    faction: bot.faction,
                    killer: bot.last_attacker,
                });
                continue;
            }

            if !bot.alive {
                bot.respawn_timer -= dt;
                if bot.respawn_timer <= 0.0 {
                    let portal =
                        self.world.portals[self.rng.gen_range(0..self.world.portals.len())];
                    bot.pos = self.world.tile_pos(portal);
                    bot.heading = self.rng.gen_range(0.0..std::f32::consts::TAU);
                    bot.hp = tank::MAX_HP;
                    bot.alive = true;
                    bot.deploy_timer = tank::DEPLOY_DURATION;
                    bot.last_attacker = None;
                    bot.brain.mode = BotMode::Deploying;
                }
                continue;
            }

            if bot.deploy_timer > 0.0 {
                bot.deploy_timer -= dt;
                continue;
            }

            let view = ClusterView {
                centroids: &self.centroids,
                owners: &self.owners,
            };
            let decision = ai::decide(
                &mut bot.brain,
                bot.pos,
                bot.heading,
                bot.faction,
                bot.current_cluster,
                &input.humans,
                &view,
                &mut self.rng,
                dt,
            );

            // Turn-rate-limited steering toward the decided heading
            let turn = sphere::wrap_angle(decision.heading - bot.heading)
                .clamp(-tank::TURN_RATE * dt, tank::TURN_RATE * dt);
            bot.heading = sphere::wrap_angle(bot.heading + turn);
            bot.speed = decision.speed;
            bot.pos = sphere::step(bot.pos, bot.heading, bot.speed * dt, RADIUS);
            bot.current_cluster = self.world.cluster_at(bot.pos);

            if let Some(power) = decision.fire {
                let id = next_projectile_id;
                next_projectile_id += 1;
                new_projectiles.push(ProjectileSpawn {
                    id,
                    owner: bot.id,
                    faction: bot.faction,
                    pos: bot.pos,
                    heading: bot.heading,
                    power,
                });
            }
        }

        self.pack_output(input.tick, next_projectile_id, new_projectiles, events)
    }

    fn pack_output(
        &self,
        tick: u64,
        next_projectile_id: u64,
        new_projectiles: Vec<ProjectileSpawn>,
        events: Vec<BotEvent>,
    ) -> WorkerTickOutput {
        let mut bot_ids = Vec::with_capacity(self.bots.len());
        let mut positions = Vec::with_capacity(self.bots.len() * bots::POSITION_STRIDE);
        let mut bot_states = Vec::with_capacity(self.bots.len());

        for bot in &self.bots {
            bot_ids.push(bot.id);
            positions.extend_from_slice(&[
                bot.pos.theta,
                bot.pos.phi,
                bot.heading,
                bot.speed,
                flags::pack(!bot.alive, bot.deploy_timer > 0.0, bot.faction.index()),
                bot.current_cluster as f32,
            ]);
            bot_states.push((
                bot.id,
                PlayerWire {
                    theta: bot.pos.theta,
                    phi: bot.pos.phi,
                    heading: bot.heading,
                    speed: bot.speed,
                    turret_angle: bot.heading,
                    hp: bot.hp,
                    d: if bot.alive { 0 } else { 1 },
                    faction: bot.faction,
                    rank: 0,
                    seq: 0,
                },
            ));
        }

        WorkerTickOutput {
            tick,
            bot_ids,
            positions,
            next_projectile_id,
            new_projectiles,
            events,
            bot_states,
        }
    }
}
