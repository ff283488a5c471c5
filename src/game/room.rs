//! The authoritative game room: one fixed-rate tick loop owns all world
//! state.
//!
//! Tick order is a contract: inputs -> human motion -> bot exchange ->
//! projectiles -> capture -> economy -> broadcast. Crypto awarded for a hit
//! lands in the same frame as the hit events, and a territory-update that
//! transfers ownership shares its frame with the tic-crypto of the final
//! tic.
//!
//! Everything mutable lives here and is touched only from `tick()`.
//! Connections talk to the room through the command queue and the input
//! buffer; both are drained at tick boundaries.

use crossbeam_channel::{unbounded, Receiver, Sender};
use hashbrown::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::bots::bridge::BotBridge;
use crate::bots::worker::{self, BotEvent, CaptureDelta, CaptureView, WorkerTickInput};
use crate::game::capture;
use crate::game::commander::CommanderRegistry;
use crate::game::constants::{bots, cannon, capture as capture_consts, chat, commander, tank, tick, world};
use crate::game::economy::{self, EconomyEngine};
use crate::game::input_buffer::{InputBuffer, InputSender};
use crate::game::projectile::{ChargeProfile, HitRecord, ProjectileEngine};
use crate::game::spatial::{SurfaceGrid, TankProxy};
use crate::game::state::{
    ActorId, Cluster, ClusterId, ClusterPresence, Faction, HumanView, LifeState, Ownership,
    Player, PlayerId, PresenceMap, WorldState,
};
use crate::metrics::Metrics;
use crate::net::broadcast::{fan_out, Outbound};
use crate::net::protocol::{
    keys, ChatMode, ClientMessage, ClusterUpdate, CommanderWire, DeployPose, InputFrame, PeerInfo,
    PlayerWire, ServerMessage, SponsorsWire, StateBroadcast, TicsWire, WelcomePacket,
};
use crate::profile::{PlayerProfile, ProfileWriter};
use crate::util::sphere::{self, SurfacePos};
use crate::worldgen::GeneratedWorld;

/// Projectile id block reserved for the worker each tick; bots can never
/// fire more than this in one tick, so ids from the two sides never collide
const WORKER_ID_BLOCK: u64 = 256;

/// Minimum clearance around a portal before a deploy is confirmed
const PORTAL_CLEARANCE: f32 = 8.0;

/// Room construction parameters
#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub dt: f32,
    /// Humans + bots population target
    pub total_tanks: usize,
    pub bot_seed: u64,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            dt: tick::DT,
            total_tanks: bots::TOTAL_TANKS,
            bot_seed: 1,
        }
    }
}

/// Commands posted to the room; all are processed at the next tick boundary
pub enum RoomCommand {
    Join {
        player_id: PlayerId,
        name: String,
        faction: Option<Faction>,
        profile: Option<PlayerProfile>,
        outbound: Outbound,
    },
    Leave {
        player_id: PlayerId,
    },
    Client {
        player_id: PlayerId,
        message: ClientMessage,
    },
    SponsorsReloaded(SponsorsWire),
}

/// Handle held by connections and the admin layer
#[derive(Clone)]
pub struct RoomHandle {
    commands: Sender<RoomCommand>,
    inputs: InputSender,
}

impl RoomHandle {
    pub fn post(&self, command: RoomCommand) {
        if self.commands.send(command).is_err() {
            warn!("room command dropped: loop stopped");
        }
    }

    pub fn submit_input(&self, player_id: PlayerId, frame: InputFrame) -> bool {
        self.inputs.try_send(player_id, frame).is_ok()
    }
}

/// Latest bot state consumed from the worker
#[derive(Default)]
struct BotView {
    ids: Vec<u32>,
    /// Stride-6 packed buffer, see `bots::worker::flags`
    positions: Vec<f32>,
    states: Vec<(u32, PlayerWire)>,
}

pub struct GameRoom {
    config: RoomConfig,
    planet: Arc<GeneratedWorld>,
    state: WorldState,
    grid: SurfaceGrid,
    projectiles: ProjectileEngine,
    economy: EconomyEngine,
    commanders: CommanderRegistry,
    bridge: BotBridge,
    inputs: InputBuffer,
    commands: Receiver<RoomCommand>,
    connections: HashMap<PlayerId, Outbound>,
    bot_view: BotView,
    sponsors: SponsorsWire,
    profiles: Option<Arc<ProfileWriter>>,
    metrics: Arc<Metrics>,
    /// Ticks since the last capture-progress push
    progress_ticks: u64,
}

impl GameRoom {
    pub fn new(
        config: RoomConfig,
        planet: Arc<GeneratedWorld>,
        cluster_sponsors: HashMap<ClusterId, String>,
        metrics: Arc<Metrics>,
        profiles: Option<Arc<ProfileWriter>>,
    ) -> (Self, RoomHandle) {
        let clusters: Vec<Cluster> = planet
            .clusters
            .iter()
            .map(|spec| {
                Cluster::new(
                    spec.id,
                    spec.tiles.clone(),
                    cluster_sponsors.get(&spec.id).cloned(),
                )
            })
            .collect();

        let bridge = BotBridge::new(config.bot_seed, planet.clone(), config.total_tanks);
        let inputs = InputBuffer::default();
        let (command_tx, command_rx) = unbounded();

        let handle = RoomHandle {
            commands: command_tx,
            inputs: inputs.sender(),
        };

        let room = Self {
            config,
            planet,
            state: WorldState::new(clusters),
            grid: SurfaceGrid::new(),
            projectiles: ProjectileEngine::new(),
            economy: EconomyEngine::new(),
            commanders: CommanderRegistry::new(),
            bridge,
            inputs,
            commands: command_rx,
            connections: HashMap::new(),
            bot_view: BotView::default(),
            sponsors: SponsorsWire::default(),
            profiles,
            metrics,
            progress_ticks: 0,
        };
        (room, handle)
    }

    pub fn state(&self) -> &WorldState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut WorldState {
        &mut self.state
    }

    pub fn bridge(&self) -> &BotBridge {
        &self.bridge
    }

    /// One fixed-rate tick. The ordering in here is load-bearing; see the
    /// module docs.
    pub fn tick(&mut self) {
        let dt = self.config.dt;
        self.state.tick += 1;
        let mut outbox: Vec<ServerMessage> = Vec::new();

        self.bridge.ensure_alive();
        self.process_commands(&mut outbox);
        self.queue_inputs();
        self.sanitize_players();
        self.integrate_humans();
        self.exchange_with_worker(&mut outbox);
        self.rebuild_grid();
        let hits = {
            let planet = self.planet.clone();
            self.projectiles
                .advance(&mut self.grid, dt, move |pos| planet.terrain_blocks(pos))
        };
        self.apply_hits(hits, &mut outbox);
        self.advance_capture(dt, &mut outbox);
        self.run_economy(&mut outbox);
        self.commander_pass(dt, &mut outbox);
        self.advance_orbits(dt);
        self.capture_progress();

        if let Err(violation) = self.state.check_invariants() {
            // Better to crash than keep broadcasting a diverged world
            error!("tick invariant violated: {}", violation);
            std::process::abort();
        }

        self.broadcast(outbox);
        self.update_metrics();
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    fn process_commands(&mut self, outbox: &mut Vec<ServerMessage>) {
        let pending: Vec<RoomCommand> = self.commands.try_iter().collect();
        for command in pending {
            match command {
                RoomCommand::Join {
                    player_id,
                    name,
                    faction,
                    profile,
                    outbound,
                } => self.handle_join(player_id, name, faction, profile, outbound, outbox),
                RoomCommand::Leave { player_id } => self.handle_leave(player_id, outbox),
                RoomCommand::Client { player_id, message } => {
                    self.handle_client(player_id, message, outbox)
                }
                RoomCommand::SponsorsReloaded(wire) => {
                    self.sponsors = wire.clone();
                    outbox.push(ServerMessage::SponsorsReloaded(wire));
                }
            }
        }
    }

    fn balance_faction(&self) -> Faction {
        Faction::ALL
            .into_iter()
            .min_by_key(|&f| self.state.players.values().filter(|p| p.faction == f).count())
            .expect("three factions")
    }

    fn handle_join(
        &mut self,
        player_id: PlayerId,
        name: String,
        faction: Option<Faction>,
        profile: Option<PlayerProfile>,
        outbound: Outbound,
        outbox: &mut Vec<ServerMessage>,
    ) {
        let faction = faction.unwrap_or_else(|| self.balance_faction());
        info!("player {} ({}) joins as {}", name, player_id, faction);

        let mut player = Player::new(player_id, name.clone(), faction, self.state.tick);
        if let Some(p) = &profile {
            player.crypto = p.crypto;
            player.total_crypto = p.total_crypto;
            player.kills = p.kills;
            player.deaths = p.deaths;
            player.rank = economy::level_for_total(p.total_crypto);
            player.badges = p.badges.clone();
            player.title = p.title.clone();
            player.profile_uid = Some(p.uid.clone());
        }
        let crypto_balance = player.crypto;
        let rank = player.rank;
        self.state.players.insert(player_id, player);
        self.connections.insert(player_id, outbound);

        // The welcome must be this connection's first message; its queue is
        // FIFO and nothing else has been addressed to it yet
        let welcome = ServerMessage::Welcome(Box::new(WelcomePacket {
            id: player_id.to_string(),
            name: name.clone(),
            faction,
            world: self.planet.description(&|id| {
                self.state
                    .clusters
                    .get(id as usize)
                    .and_then(|c| c.sponsor_id.clone())
            }),
            capture: self.state.clusters.iter().map(cluster_update).collect(),
            commanders: commander_wires(self.commanders.snapshot(&self.state)),
            players: self
                .state
                .players
                .values()
                .filter(|p| p.id != player_id)
                .map(|p| PeerInfo {
                    id: p.id.to_string(),
                    name: p.name.clone(),
                    faction: p.faction,
                    d: p.life.to_wire(),
                })
                .collect(),
            sponsors: self.sponsors.clone(),
            crypto: crypto_balance,
            rank,
        }));
        self.send_to(player_id, &welcome);

        outbox.push(ServerMessage::PlayerJoined {
            id: player_id.to_string(),
            name,
            faction,
        });
        self.bridge.on_human_joined(faction);
    }

    fn handle_leave(&mut self, player_id: PlayerId, outbox: &mut Vec<ServerMessage>) {
        let Some(player) = self.state.players.get(&player_id) else {
            self.connections.remove(&player_id);
            return;
        };
        let faction = player.faction;
        let was_alive = player.is_alive();
        let name = player.name.clone();

        // Persist before removal, on the debounced schedule
        if let (Some(writer), Some(profile)) = (&self.profiles, profile_of(player)) {
            writer.mark_dirty(profile);
        }

        if was_alive {
            outbox.push(ServerMessage::PlayerLeft {
                id: player_id.to_string(),
                name,
            });
        }

        self.state.players.remove(&player_id);
        self.connections.remove(&player_id);
        self.projectiles.remove_owner(ActorId::Human(player_id));
        self.economy.forget_player(player_id);
        self.bridge.on_human_left(faction);
    }

    fn handle_client(
        &mut self,
        player_id: PlayerId,
        message: ClientMessage,
        outbox: &mut Vec<ServerMessage>,
    ) {
        match message {
            ClientMessage::Join { .. } | ClientMessage::Input(_) => {
                // Join is handled by the transport; inputs ride the input
                // buffer
            }
            ClientMessage::Fire {
                power,
                turret_angle,
            } => self.handle_fire(player_id, power, turret_angle, outbox),
            ClientMessage::ChoosePortal { tile_index } => {
                self.handle_portal(player_id, tile_index, outbox)
            }
            ClientMessage::Profile {
                badges,
                total_crypto: _,
                title,
            } => {
                if let Some(player) = self.state.players.get_mut(&player_id) {
                    // Balance stays server-authoritative; only cosmetics are
                    // accepted from the client
                    player.badges = badges;
                    player.title = title;
                }
            }
            ClientMessage::Chat { text, mode } => self.handle_chat(player_id, text, mode, outbox),
            ClientMessage::FactionChange { faction } => {
                self.handle_faction_change(player_id, faction, outbox)
            }
            ClientMessage::CommanderPing { x, y, z, faction } => {
                if self.commanders.can_command(player_id, faction, &self.state) {
                    self.send_to_faction(
                        faction,
                        &ServerMessage::CommanderPing {
                            x,
                            y,
                            z,
                            faction,
                            from_id: player_id.to_string(),
                        },
                    );
                }
            }
            ClientMessage::CommanderDraw { mut points, done } => {
                let Some(faction) = self.state.players.get(&player_id).map(|p| p.faction) else {
                    return;
                };
                if !self.commanders.can_command(player_id, faction, &self.state) {
                    return;
                }
                points.truncate(commander::DRAW_MAX_POINTS);
                self.send_to_faction(
                    faction,
                    &ServerMessage::CommanderDrawing {
                        faction,
                        points,
                        done,
                        from_id: player_id.to_string(),
                    },
                );
            }
            ClientMessage::Tip { to_id, amount } => self.handle_tip(player_id, to_id, amount),
        }
    }

    fn handle_fire(
        &mut self,
        player_id: PlayerId,
        power: f32,
        turret_angle: f32,
        outbox: &mut Vec<ServerMessage>,
    ) {
        let Some(player) = self.state.players.get(&player_id) else {
            return;
        };
        if !player.is_alive() {
            self.send_to(
                player_id,
                &ServerMessage::FireFailed {
                    reason: "not deployed".into(),
                },
            );
            return;
        }
        let owner = ActorId::Human(player_id);
        if self.projectiles.count_for(owner) >= cannon::PER_OWNER_CAP {
            // Resource cap: drop silently, no charge
            return;
        }

        let power = power.clamp(0.0, cannon::MAX_POWER);
        let (pos, faction) = (player.pos, player.faction);

        let spend = {
            let player = self
                .state
                .players
                .get_mut(&player_id)
                .expect("player checked above");
            player.turret_angle = turret_angle;
            self.economy.try_spend_fire(player, power)
        };
        if spend.is_err() {
            self.send_to(
                player_id,
                &ServerMessage::FireFailed {
                    reason: "insufficient crypto".into(),
                },
            );
            return;
        }

        let id = self.state.reserve_projectile_ids(1);
        self.projectiles
            .spawn(id, owner, faction, pos, turret_angle, power);
        let profile = ChargeProfile::from_power(power);
        outbox.push(ServerMessage::PlayerFired {
            id: player_id.to_string(),
            t: pos.theta,
            p: pos.phi,
            h: turret_angle,
            power,
            size: profile.size,
            projectile_id: id,
        });
    }

    fn handle_portal(
        &mut self,
        player_id: PlayerId,
        tile_index: u32,
        outbox: &mut Vec<ServerMessage>,
    ) {
        if !self.planet.is_portal(tile_index) {
            self.send_to(
                player_id,
                &ServerMessage::PortalFailed {
                    reason: "no such portal".into(),
                },
            );
            return;
        }
        let Some(player) = self.state.players.get(&player_id) else {
            return;
        };
        if player.is_alive() {
            self.send_to(
                player_id,
                &ServerMessage::PortalFailed {
                    reason: "already deployed".into(),
                },
            );
            return;
        }

        let deploy_pos = self.planet.tile_pos(tile_index);
        let occupied = self
            .alive_positions()
            .any(|p| sphere::surface_distance(p, deploy_pos, world::RADIUS) < PORTAL_CLEARANCE);
        if occupied {
            self.send_to(
                player_id,
                &ServerMessage::PortalFailed {
                    reason: "portal occupied".into(),
                },
            );
            return;
        }

        // Deterministic deploy heading, varied by tick
        let heading = (self.state.tick % 628) as f32 / 100.0;
        let cluster = self.planet.cluster_at(deploy_pos);
        let player = self
            .state
            .players
            .get_mut(&player_id)
            .expect("player checked above");
        player.deploy(deploy_pos, heading);
        player.current_cluster = Some(cluster);

        let pose = DeployPose {
            t: deploy_pos.theta,
            p: deploy_pos.phi,
            h: heading,
        };
        self.send_to(player_id, &ServerMessage::PortalConfirmed(pose));
        outbox.push(ServerMessage::PlayerActivated {
            id: player_id.to_string(),
            pose,
        });
    }

    fn handle_chat(
        &mut self,
        player_id: PlayerId,
        text: String,
        mode: ChatMode,
        outbox: &mut Vec<ServerMessage>,
    ) {
        if text.is_empty() || text.len() > chat::MAX_LEN {
            return;
        }
        let Some(player) = self.state.players.get(&player_id) else {
            return;
        };
        let message = ServerMessage::ChatMessage {
            id: player_id.to_string(),
            name: player.name.clone(),
            text,
            mode,
        };
        match mode {
            ChatMode::Lobby | ChatMode::Global => outbox.push(message),
            ChatMode::Proximity => {
                let origin = player.pos;
                let nearby: Vec<PlayerId> = self
                    .state
                    .players
                    .values()
                    .filter(|p| {
                        p.is_alive()
                            && sphere::surface_distance(origin, p.pos, world::RADIUS)
                                <= chat::PROXIMITY_RADIUS
                    })
                    .map(|p| p.id)
                    .collect();
                for id in nearby {
                    self.send_to(id, &message);
                }
            }
        }
    }

    fn handle_faction_change(
        &mut self,
        player_id: PlayerId,
        faction: Faction,
        outbox: &mut Vec<ServerMessage>,
    ) {
        let Some(player) = self.state.players.get_mut(&player_id) else {
            return;
        };
        if player.faction == faction {
            self.send_to(
                player_id,
                &ServerMessage::FactionChangeFailed {
                    reason: "already in that faction".into(),
                },
            );
            return;
        }
        player.faction = faction;
        // Changing sides always costs the current tank
        if player.is_alive() {
            player.life = LifeState::WaitingForPortal;
            player.current_cluster = None;
        }
        outbox.push(ServerMessage::PlayerFactionChanged {
            id: player_id.to_string(),
            faction,
        });
    }

    fn handle_tip(&mut self, from_id: PlayerId, to_id: PlayerId, amount: i64) {
        let Some(from_faction) = self.state.players.get(&from_id).map(|p| p.faction) else {
            return;
        };
        if !self.commanders.can_command(from_id, from_faction, &self.state) {
            self.send_to(
                from_id,
                &ServerMessage::TipFailed {
                    reason: "only the commander may tip".into(),
                },
            );
            return;
        }
        let valid_target = self
            .state
            .players
            .get(&to_id)
            .is_some_and(|p| p.faction == from_faction && p.id != from_id);
        if !valid_target {
            self.send_to(
                from_id,
                &ServerMessage::TipFailed {
                    reason: "no such teammate".into(),
                },
            );
            return;
        }

        let [Some(mut from), Some(mut to)] = self.state.players.get_many_mut([&from_id, &to_id])
        else {
            return;
        };
        match self.economy.try_tip(&mut from, &mut to, amount) {
            Ok(()) => {
                let balance = from.crypto;
                self.send_to(
                    from_id,
                    &ServerMessage::TipConfirmed {
                        to_id: to_id.to_string(),
                        amount,
                        balance,
                    },
                );
                self.send_to(
                    to_id,
                    &ServerMessage::TipReceived {
                        from_id: from_id.to_string(),
                        amount,
                    },
                );
            }
            Err(e) => {
                self.send_to(
                    from_id,
                    &ServerMessage::TipFailed {
                        reason: e.to_string(),
                    },
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Inputs and motion
    // ------------------------------------------------------------------

    fn queue_inputs(&mut self) {
        let pending: Vec<_> = self.inputs.drain().collect();
        for msg in pending {
            let Some(player) = self.state.players.get_mut(&msg.player_id) else {
                continue;
            };
            if msg.frame.dt <= 0.0 || msg.frame.dt > tick::INPUT_DT_CAP {
                // Impossible dt is protocol misuse; the frame is rejected
                // and the ack stays where it was
                self.metrics.inputs_rejected.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                continue;
            }
            player.pending_inputs.push_back(msg.frame);
            while player.pending_inputs.len() > tick::PENDING_INPUT_CAP {
                player.pending_inputs.pop_front();
            }
        }
    }

    fn sanitize_players(&mut self) {
        for player in self.state.players.values_mut() {
            if !player.pos.theta.is_finite() || !player.pos.phi.is_finite() {
                warn!("reset non-finite position for {}", player.id);
                player.pos = self.planet.tile_pos(self.planet.portals[0]);
            }
            if !player.heading.is_finite() {
                player.heading = 0.0;
            }
        }
    }

    fn integrate_humans(&mut self) {
        for player in self.state.players.values_mut() {
            if player.deploy_timer > 0.0 {
                player.deploy_timer -= self.config.dt;
            }
            if !player.is_alive() {
                // Dead players do not process inputs
                player.pending_inputs.clear();
                continue;
            }

            while let Some(frame) = player.pending_inputs.pop_front() {
                let dt = frame.dt;
                if frame.keys & keys::LEFT != 0 {
                    player.heading = sphere::wrap_angle(player.heading - tank::TURN_RATE * dt);
                }
                if frame.keys & keys::RIGHT != 0 {
                    player.heading = sphere::wrap_angle(player.heading + tank::TURN_RATE * dt);
                }
                player.speed = if frame.keys & keys::FORWARD != 0 {
                    tank::MAX_SPEED
                } else if frame.keys & keys::BACK != 0 {
                    -tank::REVERSE_SPEED
                } else {
                    0.0
                };
                player.pos =
                    sphere::step(player.pos, player.heading, player.speed * dt, world::RADIUS);
                player.turret_angle = frame.turret_angle;
                player.last_input_seq = player.last_input_seq.max(frame.seq);
            }
            player.current_cluster = Some(self.planet.cluster_at(player.pos));
        }
    }

    // ------------------------------------------------------------------
    // Bot exchange
    // ------------------------------------------------------------------

    fn exchange_with_worker(&mut self, outbox: &mut Vec<ServerMessage>) {
        // Consume the previous tick's output first (pipelined by one tick)
        if let Some(output) = self.bridge.collect_output() {
            for event in &output.events {
                match event {
                    BotEvent::Damaged {
                        bot,
                        damage,
                        hp_after,
                        attacker,
                    } => {
                        outbox.push(ServerMessage::PlayerHit {
                            attacker_id: attacker.to_wire(),
                            target_id: ActorId::Bot(*bot).to_wire(),
                            damage: *damage,
                            hp_after: *hp_after,
                        });
                    }
                    BotEvent::Died { bot, faction: _, killer } => {
                        let killer_id = killer.unwrap_or(ActorId::Bot(*bot));
                        let killer_faction = match killer_id {
                            ActorId::Human(id) => {
                                self.state.players.get(&id).map(|p| p.faction)
                            }
                            ActorId::Bot(killer_bot) => self
                                .bot_view
                                .states
                                .iter()
                                .find(|(id, _)| *id == killer_bot)
                                .map(|(_, wire)| wire.faction),
                        };
                        if let ActorId::Human(id) = killer_id {
                            if let Some(p) = self.state.players.get_mut(&id) {
                                p.kills += 1;
                                self.economy.award_kill(p, false);
                            }
                        }
                        outbox.push(ServerMessage::PlayerKilled {
                            victim_id: ActorId::Bot(*bot).to_wire(),
                            killer_id: killer_id.to_wire(),
                            killer_faction: killer_faction.unwrap_or(Faction::Rust),
                        });
                    }
                    BotEvent::Error { message } => {
                        warn!("bot worker error: {}", message);
                    }
                }
            }

            // Bot-fired projectiles enter the shared engine with their
            // worker-reserved ids; the worker's high-water mark keeps the
            // room counter monotone even if a burst overran its block
            self.state.bump_projectile_ids(output.next_projectile_id);
            for spawn in &output.new_projectiles {
                self.projectiles.spawn(
                    spawn.id,
                    ActorId::Bot(spawn.owner),
                    spawn.faction,
                    spawn.pos,
                    spawn.heading,
                    spawn.power,
                );
            }

            self.bot_view = BotView {
                ids: output.bot_ids,
                positions: output.positions,
                states: output.bot_states,
            };
        }

        // Dispatch this tick's input; the worker computes while we finish
        let humans: Vec<HumanView> = self.state.players.values().map(HumanView::of).collect();
        let block_base = self.state.reserve_projectile_ids(WORKER_ID_BLOCK);
        self.bridge.dispatch(WorkerTickInput {
            dt: self.config.dt,
            planet_rotation: self.state.planet_rotation,
            tick: self.state.tick,
            next_projectile_id: block_base,
            humans,
        });

        if self.bridge.needs_snapshot()
            || self.state.tick % capture_consts::WORKER_SNAPSHOT_INTERVAL == 0
        {
            let view = CaptureView {
                owners: self.state.clusters.iter().map(|c| c.owner).collect(),
            };
            self.bridge.send_capture_snapshot(view);
        }
    }

    // ------------------------------------------------------------------
    // Combat
    // ------------------------------------------------------------------

    fn rebuild_grid(&mut self) {
        self.grid.clear();
        for player in self.state.players.values() {
            self.grid.insert(TankProxy {
                actor: ActorId::Human(player.id),
                faction: player.faction,
                pos: player.pos,
                heading: player.heading,
                targetable: player.is_present(),
            });
        }
        let stride = bots::POSITION_STRIDE;
        for (i, &bot_id) in self.bot_view.ids.iter().enumerate() {
            let base = i * stride;
            let Some(chunk) = self.bot_view.positions.get(base..base + stride) else {
                break;
            };
            let raw_flags = chunk[4];
            let faction = Faction::from_index(worker::flags::faction_index(raw_flags))
                .unwrap_or(Faction::Rust);
            self.grid.insert(TankProxy {
                actor: ActorId::Bot(bot_id),
                faction,
                pos: SurfacePos::new(chunk[0], chunk[1]),
                heading: chunk[2],
                targetable: !worker::flags::is_dead(raw_flags)
                    && !worker::flags::is_deploying(raw_flags),
            });
        }
    }

    fn apply_hits(&mut self, hits: Vec<HitRecord>, outbox: &mut Vec<ServerMessage>) {
        for hit in hits {
            match hit.target {
                ActorId::Human(target_id) => {
                    let Some(target) = self.state.players.get_mut(&target_id) else {
                        continue;
                    };
                    if !target.is_alive() {
                        continue;
                    }
                    let damage = hit.damage.round() as i32;
                    target.hp = (target.hp - damage).max(0);
                    let hp_after = target.hp;
                    let lethal = hp_after == 0;
                    if lethal {
                        target.life = LifeState::Dead;
                        target.speed = 0.0;
                        target.deaths += 1;
                        target.current_cluster = None;
                    }
                    let victim_is_commander =
                        self.commanders.is_commander(target_id, &self.state);

                    outbox.push(ServerMessage::PlayerHit {
                        attacker_id: hit.attacker.to_wire(),
                        target_id: target_id.to_string(),
                        damage,
                        hp_after,
                    });

                    if let ActorId::Human(attacker_id) = hit.attacker {
                        if let Some(attacker) = self.state.players.get_mut(&attacker_id) {
                            self.economy
                                .award_damage(attacker, damage as f32, victim_is_commander);
                            if lethal {
                                attacker.kills += 1;
                                self.economy.award_kill(attacker, victim_is_commander);
                            }
                        }
                    }

                    if lethal {
                        outbox.push(ServerMessage::PlayerKilled {
                            victim_id: target_id.to_string(),
                            killer_id: hit.attacker.to_wire(),
                            killer_faction: hit.attacker_faction,
                        });
                    }
                }
                ActorId::Bot(bot_id) => {
                    let damage = hit.damage.round() as i32;
                    // The worker owns bot HP; events come back on a later
                    // tick
                    self.bridge.apply_damage(bot_id, damage, hit.attacker);
                    if let ActorId::Human(attacker_id) = hit.attacker {
                        if let Some(attacker) = self.state.players.get_mut(&attacker_id) {
                            self.economy.award_damage(attacker, damage as f32, false);
                        }
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Capture and economy
    // ------------------------------------------------------------------

    fn compute_presence(&self) -> PresenceMap {
        let mut presence: PresenceMap = PresenceMap::new();
        for player in self.state.players.values() {
            if !player.is_present() {
                continue;
            }
            let Some(cluster) = player.current_cluster else {
                continue;
            };
            presence
                .entry(cluster)
                .or_insert_with(ClusterPresence::default)
                .add_human(player.faction, player.id);
        }

        let stride = bots::POSITION_STRIDE;
        for i in 0..self.bot_view.ids.len() {
            let base = i * stride;
            let Some(chunk) = self.bot_view.positions.get(base..base + stride) else {
                break;
            };
            let raw_flags = chunk[4];
            if worker::flags::is_dead(raw_flags) || worker::flags::is_deploying(raw_flags) {
                continue;
            }
            let Some(faction) = Faction::from_index(worker::flags::faction_index(raw_flags))
            else {
                continue;
            };
            let cluster = chunk[5] as ClusterId;
            if (cluster as usize) < self.state.clusters.len() {
                presence
                    .entry(cluster)
                    .or_insert_with(ClusterPresence::default)
                    .add_bot(faction);
            }
        }
        presence
    }

    fn advance_capture(&mut self, dt: f32, outbox: &mut Vec<ServerMessage>) {
        let presence = self.compute_presence();
        let events = capture::advance(&mut self.state.clusters, &presence, dt);

        if !events.flips.is_empty() {
            let mut changes = Vec::with_capacity(events.flips.len());
            let mut deltas = Vec::with_capacity(events.flips.len());
            for flip in &events.flips {
                let cluster = &self.state.clusters[flip.cluster as usize];
                changes.push(cluster_update(cluster));
                deltas.push(CaptureDelta {
                    cluster: flip.cluster,
                    owner: flip.owner,
                });
                outbox.push(ServerMessage::TuskChat {
                    text: match flip.owner {
                        Ownership::Faction(f) => {
                            format!("{} captured sector {}", f, flip.cluster)
                        }
                        _ => format!("sector {} is contested", flip.cluster),
                    },
                });
            }
            outbox.push(ServerMessage::TerritoryUpdate { changes });
            self.bridge.send_capture_deltas(deltas);
        }

        for award in &events.tic_awards {
            let tile_count = self.state.clusters[award.cluster as usize].tile_indices.len();
            if let Some(player) = self.state.players.get_mut(&award.player) {
                let amount = self.economy.award_tic(player, tile_count);
                outbox.push(ServerMessage::TicCrypto {
                    id: award.player.to_string(),
                    cluster: award.cluster,
                    amount,
                    balance: player.crypto,
                });
            }
        }
    }

    fn run_economy(&mut self, outbox: &mut Vec<ServerMessage>) {
        self.economy.tick(self.config.dt);

        if self.economy.holding_due() {
            let ids: Vec<PlayerId> = self.state.players.keys().copied().collect();
            for id in ids {
                let standing_in_owned = {
                    let Some(p) = self.state.players.get(&id) else { continue };
                    p.is_present()
                        && p.current_cluster
                            .and_then(|c| self.state.clusters.get(c as usize))
                            .is_some_and(|c| c.owner == Ownership::Faction(p.faction))
                };
                if standing_in_owned {
                    let player = self.state.players.get_mut(&id).expect("id from keys");
                    let amount = self.economy.award_holding(player);
                    let balance = player.crypto;
                    self.send_to(
                        id,
                        &ServerMessage::HoldingCrypto {
                            id: id.to_string(),
                            amount,
                            balance,
                        },
                    );
                }
            }
        }

        if self.economy.broadcast_due() {
            let balances = self
                .state
                .players
                .values()
                .map(|p| (p.id.to_string(), p.crypto))
                .collect();
            outbox.push(ServerMessage::CryptoUpdate { balances });
        }

        // Debounced stat persistence for everyone connected
        if let Some(writer) = &self.profiles {
            if self.state.tick % (tick::RATE as u64 * 30) == 0 {
                for player in self.state.players.values() {
                    if let Some(profile) = profile_of(player) {
                        writer.mark_dirty(profile);
                    }
                }
            }
        }
    }

    fn commander_pass(&mut self, dt: f32, outbox: &mut Vec<ServerMessage>) {
        for update in self.commanders.recompute(&self.state) {
            outbox.push(ServerMessage::CommanderUpdate(commander_wire(update)));
        }
        if self.commanders.sync_due(dt) {
            outbox.push(ServerMessage::CommanderSync {
                commanders: commander_wires(self.commanders.snapshot(&self.state)),
            });
        }
    }

    fn advance_orbits(&mut self, dt: f32) {
        self.state.planet_rotation =
            sphere::wrap_theta(self.state.planet_rotation + world::ROTATION_RATE * dt);
        for (angle, rate) in self.state.moon_angles.iter_mut().zip(world::MOON_RATES) {
            *angle = sphere::wrap_theta(*angle + rate * dt);
        }
        self.state.station.angle =
            sphere::wrap_theta(self.state.station.angle + world::STATION_RATE * dt);
    }

    fn capture_progress(&mut self) {
        self.progress_ticks += 1;
        if self.progress_ticks < capture_consts::PROGRESS_INTERVAL_TICKS {
            return;
        }
        self.progress_ticks = 0;
        let elapsed = capture_consts::PROGRESS_INTERVAL_TICKS as f32 * self.config.dt;

        let targets: Vec<(PlayerId, ClusterId)> = self
            .state
            .players
            .values()
            .filter_map(|p| p.current_cluster.map(|c| (p.id, c)))
            .collect();
        for (player_id, cluster_id) in targets {
            let Some(cluster) = self.state.clusters.get(cluster_id as usize) else {
                continue;
            };
            let momentum = capture::momentum(cluster, elapsed);
            self.send_to(
                player_id,
                &ServerMessage::CaptureProgress {
                    id: cluster_id,
                    tics: TicsWire::from_array(cluster.tics),
                    cap: cluster.capacity,
                    owner: cluster.owner.to_wire(cluster.sponsor_id.as_deref()),
                    momentum,
                },
            );
        }
        for cluster in &mut self.state.clusters {
            capture::mark_broadcast(cluster);
        }
    }

    // ------------------------------------------------------------------
    // Broadcast
    // ------------------------------------------------------------------

    fn compose_state(&mut self) -> StateBroadcast {
        // Rank is recomputed from lifetime earnings at every broadcast
        for player in self.state.players.values_mut() {
            player.rank = economy::level_for_total(player.total_crypto);
        }

        let players = self
            .state
            .players
            .values()
            .map(|p| (p.id.to_string(), PlayerWire::of(p)))
            .collect();
        let bg = self
            .bot_view
            .states
            .iter()
            .map(|(id, wire)| (ActorId::Bot(*id).to_wire(), *wire))
            .collect();

        StateBroadcast {
            players,
            bg,
            pr: self.state.planet_rotation,
            ma: self.state.moon_angles,
            sa: self.state.station,
        }
    }

    fn broadcast(&mut self, outbox: Vec<ServerMessage>) {
        let state = ServerMessage::State(self.compose_state());
        let mut sent = 0u64;
        for message in outbox.iter().chain(std::iter::once(&state)) {
            let dropped = fan_out(message, self.connections.values());
            sent += self.connections.len() as u64 - dropped;
        }
        self.metrics
            .messages_sent
            .fetch_add(sent, std::sync::atomic::Ordering::Relaxed);
    }

    fn send_to(&self, player_id: PlayerId, message: &ServerMessage) {
        if let Some(out) = self.connections.get(&player_id) {
            if !out.send(message) {
                debug!("dropped targeted message for {}", player_id);
            }
        }
    }

    fn send_to_faction(&self, faction: Faction, message: &ServerMessage) {
        for player in self.state.players.values().filter(|p| p.faction == faction) {
            self.send_to(player.id, message);
        }
    }

    fn alive_positions(&self) -> impl Iterator<Item = SurfacePos> + '_ {
        let humans = self
            .state
            .players
            .values()
            .filter(|p| p.is_alive())
            .map(|p| p.pos);
        let stride = bots::POSITION_STRIDE;
        let bots_iter = (0..self.bot_view.ids.len()).filter_map(move |i| {
            let chunk = self.bot_view.positions.get(i * stride..i * stride + stride)?;
            (!worker::flags::is_dead(chunk[4])).then(|| SurfacePos::new(chunk[0], chunk[1]))
        });
        humans.chain(bots_iter)
    }

    fn update_metrics(&self) {
        use std::sync::atomic::Ordering;
        let m = &self.metrics;
        m.human_players
            .store(self.state.players.len() as u64, Ordering::Relaxed);
        m.bot_players
            .store(self.bot_view.ids.len() as u64, Ordering::Relaxed);
        m.connections_active
            .store(self.connections.len() as u64, Ordering::Relaxed);
        m.projectiles_in_flight
            .store(self.projectiles.in_flight() as u64, Ordering::Relaxed);
        m.clusters_owned_rust
            .store(self.state.owned_clusters(Faction::Rust) as u64, Ordering::Relaxed);
        m.clusters_owned_cobalt
            .store(self.state.owned_clusters(Faction::Cobalt) as u64, Ordering::Relaxed);
        m.clusters_owned_viridian
            .store(
                self.state.owned_clusters(Faction::Viridian) as u64,
                Ordering::Relaxed,
            );
        m.worker_missed_ticks
            .store(self.bridge.missed_ticks(), Ordering::Relaxed);
        m.worker_restarts
            .store(self.bridge.restarts(), Ordering::Relaxed);
        m.dropped_frames
            .store(crate::net::broadcast::dropped_frames(), Ordering::Relaxed);
        m.broadcast_bytes
            .store(crate::net::broadcast::sent_bytes(), Ordering::Relaxed);
    }
}

fn cluster_update(cluster: &Cluster) -> ClusterUpdate {
    ClusterUpdate {
        id: cluster.id,
        owner: cluster.owner.to_wire(cluster.sponsor_id.as_deref()),
        tics: TicsWire::from_array(cluster.tics),
        cap: cluster.capacity,
    }
}

fn commander_wire(update: crate::game::commander::CommanderUpdate) -> CommanderWire {
    CommanderWire {
        faction: update.faction,
        player_id: update.player_id.map(|id| id.to_string()),
        acting: update.acting,
        since: update.since,
    }
}

fn commander_wires(updates: Vec<crate::game::commander::CommanderUpdate>) -> Vec<CommanderWire> {
    updates.into_iter().map(commander_wire).collect()
}

fn profile_of(player: &Player) -> Option<PlayerProfile> {
    let uid = player.profile_uid.clone()?;
    Some(PlayerProfile {
        uid,
        name: player.name.clone(),
        faction: Some(player.faction),
        total_crypto: player.total_crypto,
        crypto: player.crypto,
        rank: player.rank,
        kills: player.kills,
        deaths: player.deaths,
        badges: player.badges.clone(),
        title: player.title.clone(),
    })
}

/// Run the room at its fixed rate until the process exits
pub fn start_room_loop(mut room: GameRoom) {
    tokio::spawn(async move {
        let rate = (1.0 / room.config.dt).round() as u64;
        let mut ticker = interval(Duration::from_secs_f32(room.config.dt));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("room loop started at {} Hz", rate);

        loop {
            ticker.tick().await;
            let started = std::time::Instant::now();
            room.tick();
            room.metrics.record_tick_time(started.elapsed());

            if room.state.tick % (rate * 30) == 0 {
                info!(
                    "tick {}: {} humans, {} bots, {} projectiles, {} missed worker ticks",
                    room.state.tick,
                    room.state.players.len(),
                    room.bot_view.ids.len(),
                    room.projectiles.in_flight(),
                    room.bridge.missed_ticks()
                );
            }
        }
    });
}
