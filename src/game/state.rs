//! Authoritative world state: players, clusters, projectiles, commanders.
//!
//! Everything in here is owned and mutated exclusively by the room tick loop.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use uuid::Uuid;

use crate::game::constants::tank;
use crate::net::protocol::InputFrame;
use crate::util::sphere::SurfacePos;

/// Unique human player identifier
pub type PlayerId = Uuid;

/// Bot identifier; bots are fungible, the id is only a handle
pub type BotId = u32;

/// Cluster index into the generated world
pub type ClusterId = u16;

/// The three playable factions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Faction {
    Rust,
    Cobalt,
    Viridian,
}

impl Faction {
    pub const ALL: [Faction; 3] = [Faction::Rust, Faction::Cobalt, Faction::Viridian];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Faction::Rust => 0,
            Faction::Cobalt => 1,
            Faction::Viridian => 2,
        }
    }

    pub fn from_index(i: usize) -> Option<Faction> {
        Faction::ALL.get(i).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Faction::Rust => "rust",
            Faction::Cobalt => "cobalt",
            Faction::Viridian => "viridian",
        }
    }
}

impl fmt::Display for Faction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Either a human or a bot; projectiles and hits carry this
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorId {
    Human(PlayerId),
    Bot(BotId),
}

impl ActorId {
    pub fn is_bot(&self) -> bool {
        matches!(self, ActorId::Bot(_))
    }

    /// Wire form: humans are their uuid, bots are "bot-<n>"
    pub fn to_wire(&self) -> String {
        match self {
            ActorId::Human(id) => id.to_string(),
            ActorId::Bot(n) => format!("bot-{}", n),
        }
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

/// Deploy lifecycle for a connected human
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifeState {
    /// Authenticated, has not picked (or is re-picking) a portal
    WaitingForPortal,
    /// Deployed and simulating
    Alive,
    /// Dead, waiting for the client to pick a respawn portal
    Dead,
}

impl LifeState {
    /// Broadcast `d` field: 0 = alive, 1 = dead, 2 = waiting
    pub fn to_wire(self) -> u8 {
        match self {
            LifeState::Alive => 0,
            LifeState::Dead => 1,
            LifeState::WaitingForPortal => 2,
        }
    }
}

/// A connected human player
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub faction: Faction,
    pub pos: SurfacePos,
    pub heading: f32,
    pub speed: f32,
    pub turret_angle: f32,
    pub hp: i32,
    pub max_hp: i32,
    pub life: LifeState,
    /// Remaining deploy animation; excluded from capture presence while > 0
    pub deploy_timer: f32,
    /// Last input sequence applied by the server, echoed in broadcasts
    pub last_input_seq: u64,
    /// Cluster the player currently stands in, if any
    pub current_cluster: Option<ClusterId>,
    pub rank: u32,
    /// Spendable balance; may run negative down to the debt floor
    pub crypto: i64,
    /// Lifetime earnings, drives the level curve
    pub total_crypto: i64,
    pub kills: u32,
    pub deaths: u32,
    /// Tick at which the player joined (commander tenure)
    pub joined_at: u64,
    /// Server-side replay buffer of unapplied inputs
    pub pending_inputs: VecDeque<InputFrame>,
    /// External profile uid, if the client authenticated with one
    pub profile_uid: Option<String>,
    /// Client-pushed cosmetic profile fields, persisted with the profile
    pub badges: Vec<String>,
    pub title: Option<String>,
}

impl Player {
    pub fn new(id: PlayerId, name: String, faction: Faction, joined_at: u64) -> Self {
        Self {
            id,
            name,
            faction,
            pos: SurfacePos::default(),
            heading: 0.0,
            speed: 0.0,
            turret_angle: 0.0,
            hp: tank::MAX_HP,
            max_hp: tank::MAX_HP,
            life: LifeState::WaitingForPortal,
            deploy_timer: 0.0,
            last_input_seq: 0,
            current_cluster: None,
            rank: 0,
            crypto: 0,
            total_crypto: 0,
            kills: 0,
            deaths: 0,
            joined_at,
            pending_inputs: VecDeque::new(),
            profile_uid: None,
            badges: Vec::new(),
            title: None,
        }
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.life == LifeState::Alive
    }

    /// Counts toward capture presence: alive and not mid-deploy
    #[inline]
    pub fn is_present(&self) -> bool {
        self.is_alive() && self.deploy_timer <= 0.0
    }

    /// Reset combat state for a fresh deploy at the given pose
    pub fn deploy(&mut self, pos: SurfacePos, heading: f32) {
        self.pos = pos;
        self.heading = heading;
        self.speed = 0.0;
        self.hp = self.max_hp;
        self.life = LifeState::Alive;
        self.deploy_timer = tank::DEPLOY_DURATION;
        self.pending_inputs.clear();
    }
}

/// A cannon shell in flight
#[derive(Debug, Clone)]
pub struct Projectile {
    pub id: u64,
    pub owner: ActorId,
    pub owner_faction: Faction,
    pub pos: SurfacePos,
    pub heading: f32,
    pub speed: f32,
    pub damage: f32,
    pub range: f32,
    pub age: f32,
    pub traveled: f32,
}

impl Projectile {
    pub fn is_expired(&self) -> bool {
        self.age > crate::game::constants::cannon::MAX_LIFETIME || self.traveled > self.range
    }
}

/// Who holds a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Unowned,
    Faction(Faction),
    /// Sponsor-held; never flips to a faction. The sponsor id lives on the
    /// cluster.
    Sponsor,
}

impl Ownership {
    /// Wire form: null | "rust" | "cobalt" | "viridian" | "sponsor-<id>"
    pub fn to_wire(self, sponsor_id: Option<&str>) -> Option<String> {
        match self {
            Ownership::Unowned => None,
            Ownership::Faction(f) => Some(f.as_str().to_string()),
            Ownership::Sponsor => Some(format!("sponsor-{}", sponsor_id.unwrap_or("?"))),
        }
    }
}

/// Live capture state for one cluster
#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: ClusterId,
    pub tile_indices: Vec<u32>,
    /// Max total tics across all factions; equals the tile count at
    /// generation
    pub capacity: f32,
    pub owner: Ownership,
    pub sponsor_id: Option<String>,
    /// Tics per faction, indexed by Faction::index()
    pub tics: [f32; 3],
    /// Sponsor hold timer in seconds; meaningful only for sponsor-held
    /// clusters
    pub hold_timer: f32,
    /// Tics at the previous progress broadcast, for momentum derivation
    pub last_broadcast_tics: [f32; 3],
    /// Fractional-second accumulator for tic-contribution awards
    pub award_accum: f32,
    /// Human who most recently moved a tic here this second
    pub last_mover: Option<PlayerId>,
}

impl Cluster {
    pub fn new(id: ClusterId, tile_indices: Vec<u32>, sponsor_id: Option<String>) -> Self {
        let capacity = tile_indices.len() as f32;
        let owner = if sponsor_id.is_some() {
            Ownership::Sponsor
        } else {
            Ownership::Unowned
        };
        Self {
            id,
            tile_indices,
            capacity,
            owner,
            sponsor_id,
            tics: [0.0; 3],
            hold_timer: 0.0,
            last_broadcast_tics: [0.0; 3],
            award_accum: 0.0,
            last_mover: None,
        }
    }

    #[inline]
    pub fn tics_total(&self) -> f32 {
        self.tics.iter().sum()
    }

    /// Faction with positive tics, if exactly one has any
    pub fn sole_tic_holder(&self) -> Option<Faction> {
        let mut holder = None;
        for f in Faction::ALL {
            if self.tics[f.index()] > 0.0 {
                if holder.is_some() {
                    return None;
                }
                holder = Some(f);
            }
        }
        holder
    }
}

/// Per-faction commander record
#[derive(Debug, Clone)]
pub struct Commander {
    pub faction: Faction,
    pub player_id: PlayerId,
    /// Tick at which this commander took the role
    pub since: u64,
    /// Stand-in while the true commander is offline
    pub acting_player_id: Option<PlayerId>,
}

/// Derived orbital parameters broadcast for audiovisual sync
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StationParams {
    /// Orbital angle in radians
    pub angle: f32,
    /// Orbit inclination in radians
    pub inclination: f32,
}

/// The authoritative world, owned by the tick loop
#[derive(Debug, Default)]
pub struct WorldState {
    pub tick: u64,
    pub players: HashMap<PlayerId, Player>,
    pub clusters: Vec<Cluster>,
    pub planet_rotation: f32,
    pub moon_angles: [f32; 3],
    pub station: StationParams,
    next_projectile_id: u64,
}

impl WorldState {
    pub fn new(clusters: Vec<Cluster>) -> Self {
        Self {
            clusters,
            station: StationParams {
                angle: 0.0,
                inclination: crate::game::constants::world::STATION_INCLINATION,
            },
            ..Default::default()
        }
    }

    pub fn get_player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn get_player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    pub fn alive_players(&self) -> impl Iterator<Item = &Player> {
        self.players.values().filter(|p| p.is_alive())
    }

    pub fn faction_players(&self, faction: Faction) -> impl Iterator<Item = &Player> {
        self.players.values().filter(move |p| p.faction == faction)
    }

    pub fn cluster(&self, id: ClusterId) -> Option<&Cluster> {
        self.clusters.get(id as usize)
    }

    pub fn cluster_mut(&mut self, id: ClusterId) -> Option<&mut Cluster> {
        self.clusters.get_mut(id as usize)
    }

    /// Reserve `count` projectile ids and return the first. Ids are
    /// monotonically increasing across both the room and the bot worker; the
    /// worker allocates above the boundary handed to it each tick.
    pub fn reserve_projectile_ids(&mut self, count: u64) -> u64 {
        let first = self.next_projectile_id;
        self.next_projectile_id += count;
        first
    }

    pub fn next_projectile_id(&self) -> u64 {
        self.next_projectile_id
    }

    /// Raise the id boundary after the worker reports how far it allocated
    pub fn bump_projectile_ids(&mut self, next: u64) {
        if next > self.next_projectile_id {
            self.next_projectile_id = next;
        }
    }

    /// Count of clusters owned by a faction
    pub fn owned_clusters(&self, faction: Faction) -> usize {
        self.clusters
            .iter()
            .filter(|c| c.owner == Ownership::Faction(faction))
            .count()
    }

    /// Tick-boundary invariant check. Violations mean the simulation has
    /// diverged; the room aborts rather than keep broadcasting bad state.
    pub fn check_invariants(&self) -> Result<(), String> {
        for cluster in &self.clusters {
            let total = cluster.tics_total();
            if total > cluster.capacity + 1e-3 {
                return Err(format!(
                    "cluster {}: tics {} exceed capacity {}",
                    cluster.id, total, cluster.capacity
                ));
            }
            if let Ownership::Faction(owner) = cluster.owner {
                for f in Faction::ALL {
                    if f != owner && cluster.tics[f.index()] > 0.0 && cluster.tics[owner.index()] > 0.0
                    {
                        return Err(format!(
                            "cluster {}: owned by {} but {} also holds tics",
                            cluster.id, owner, f
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Lightweight human view handed to the bot worker each tick
#[derive(Debug, Clone)]
pub struct HumanView {
    pub id: PlayerId,
    pub pos: SurfacePos,
    pub heading: f32,
    pub speed: f32,
    pub faction: Faction,
    pub is_dead: bool,
}

impl HumanView {
    pub fn of(player: &Player) -> Self {
        Self {
            id: player.id,
            pos: player.pos,
            heading: player.heading,
            speed: player.speed,
            faction: player.faction,
            is_dead: !player.is_alive(),
        }
    }
}

/// Per-cluster presence snapshot produced while scanning tanks, consumed by
/// the capture engine
#[derive(Debug, Clone, Default)]
pub struct ClusterPresence {
    /// Present tanks per faction (humans + bots)
    pub counts: [u32; 3],
    /// Smallest present human id per faction, for tic-award attribution
    pub humans: [Option<PlayerId>; 3],
}

impl ClusterPresence {
    pub fn add_human(&mut self, faction: Faction, id: PlayerId) {
        let i = faction.index();
        self.counts[i] += 1;
        match self.humans[i] {
            Some(existing) if existing <= id => {}
            _ => self.humans[i] = Some(id),
        }
    }

    pub fn add_bot(&mut self, faction: Faction) {
        self.counts[faction.index()] += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.counts.iter().all(|&c| c == 0)
    }
}

/// Presence map for one tick, keyed by cluster id
pub type PresenceMap = HashMap<ClusterId, ClusterPresence>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faction_index_roundtrip() {
        for f in Faction::ALL {
            assert_eq!(Faction::from_index(f.index()), Some(f));
        }
        assert_eq!(Faction::from_index(3), None);
    }

    #[test]
    fn test_actor_id_wire() {
        let bot = ActorId::Bot(7);
        assert_eq!(bot.to_wire(), "bot-7");
        let id = Uuid::new_v4();
        assert_eq!(ActorId::Human(id).to_wire(), id.to_string());
    }

    #[test]
    fn test_player_deploy_resets_combat_state() {
        let mut p = Player::new(Uuid::new_v4(), "t".into(), Faction::Rust, 0);
        p.hp = 10;
        p.life = LifeState::Dead;
        p.deploy(SurfacePos::new(1.0, 1.0), 0.5);
        assert_eq!(p.hp, p.max_hp);
        assert!(p.is_alive());
        assert!(!p.is_present(), "deploying tanks are not present");
    }

    #[test]
    fn test_cluster_capacity_from_tiles() {
        let c = Cluster::new(0, vec![1, 2, 3, 4], None);
        assert_eq!(c.capacity, 4.0);
        assert_eq!(c.owner, Ownership::Unowned);
    }

    #[test]
    fn test_sponsor_cluster_starts_sponsor_owned() {
        let c = Cluster::new(0, vec![1, 2], Some("acme".into()));
        assert_eq!(c.owner, Ownership::Sponsor);
        assert_eq!(c.owner.to_wire(c.sponsor_id.as_deref()), Some("sponsor-acme".into()));
    }

    #[test]
    fn test_sole_tic_holder() {
        let mut c = Cluster::new(0, vec![1, 2, 3], None);
        assert_eq!(c.sole_tic_holder(), None);
        c.tics[Faction::Cobalt.index()] = 2.0;
        assert_eq!(c.sole_tic_holder(), Some(Faction::Cobalt));
        c.tics[Faction::Rust.index()] = 1.0;
        assert_eq!(c.sole_tic_holder(), None);
    }

    #[test]
    fn test_projectile_id_reservation_monotonic() {
        let mut w = WorldState::new(Vec::new());
        let a = w.reserve_projectile_ids(3);
        let b = w.reserve_projectile_ids(1);
        assert!(b >= a + 3);
        w.bump_projectile_ids(100);
        assert_eq!(w.next_projectile_id(), 100);
        // Never moves backwards
        w.bump_projectile_ids(50);
        assert_eq!(w.next_projectile_id(), 100);
    }

    #[test]
    fn test_invariant_catches_overflow() {
        let mut w = WorldState::new(vec![Cluster::new(0, vec![0, 1], None)]);
        w.clusters[0].tics = [3.0, 0.0, 0.0];
        assert!(w.check_invariants().is_err());
    }

    #[test]
    fn test_invariant_catches_contested_ownership() {
        let mut w = WorldState::new(vec![Cluster::new(0, vec![0, 1, 2, 3], None)]);
        w.clusters[0].owner = Ownership::Faction(Faction::Rust);
        w.clusters[0].tics = [2.0, 1.0, 0.0];
        assert!(w.check_invariants().is_err());
    }

    #[test]
    fn test_presence_attribution_prefers_smallest_id() {
        let mut p = ClusterPresence::default();
        let a = Uuid::from_u128(5);
        let b = Uuid::from_u128(2);
        p.add_human(Faction::Rust, a);
        p.add_human(Faction::Rust, b);
        assert_eq!(p.counts[0], 2);
        assert_eq!(p.humans[0], Some(b));
    }
}
