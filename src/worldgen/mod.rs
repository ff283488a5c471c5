//! Deterministic planet generation.
//!
//! The whole world is a pure function of (world seed, terrain seed,
//! subdivision): identical inputs produce byte-identical world
//! descriptions. Clients rebuild the same geometry from the seeds plus the
//! description packet in the welcome message.

pub mod icosphere;

use bitvec::prelude::{bitvec, BitVec};
use noise::{NoiseFn, Perlin};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::f32::consts::TAU;
use thiserror::Error;

use crate::game::constants::worldgen::*;
use crate::game::state::ClusterId;
use crate::util::sphere::SurfacePos;

/// Seeds and shape parameters for generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldParams {
    pub world_seed: u64,
    pub terrain_seed: u64,
    pub subdivision: u32,
}

impl Default for WorldParams {
    fn default() -> Self {
        Self {
            world_seed: 1,
            terrain_seed: 1,
            subdivision: crate::game::constants::world::SUBDIVISION,
        }
    }
}

/// Inconsistencies detected during generation. All of these are fatal at
/// startup: a broken world must never start serving.
#[derive(Debug, Error)]
pub enum WorldGenError {
    #[error("tile {0} was not assigned to any cluster")]
    OrphanTile(u32),
    #[error("cluster {0} is empty")]
    EmptyCluster(ClusterId),
    #[error("cluster {0} has no portal within {1} hops")]
    PortalUnreachable(ClusterId, u32),
    #[error("subdivision {0} is out of the supported range")]
    BadSubdivision(u32),
}

/// One hex (or pentagon) tile
#[derive(Debug, Clone)]
pub struct Tile {
    pub pos: SurfacePos,
    pub unit: [f32; 3],
    pub elevation: f32,
    pub neighbors: Vec<u32>,
}

/// A generated cluster before it becomes live capture state
#[derive(Debug, Clone)]
pub struct ClusterSpec {
    pub id: ClusterId,
    pub tiles: Vec<u32>,
}

/// The generated planet, shared read-only with the room and the bot worker
#[derive(Debug)]
pub struct GeneratedWorld {
    pub params: WorldParams,
    pub tiles: Vec<Tile>,
    pub clusters: Vec<ClusterSpec>,
    /// Cluster id per tile
    pub tile_cluster: Vec<ClusterId>,
    /// Portal tile indices
    pub portals: Vec<u32>,
    /// Per-tile portal membership for O(1) validation of portal choices
    portal_mask: BitVec,
    /// Nearest-tile lookup grid, LOOKUP_THETA_CELLS x LOOKUP_PHI_CELLS
    lookup: Vec<u32>,
}

impl GeneratedWorld {
    pub fn generate(params: WorldParams) -> Result<Self, WorldGenError> {
        if params.subdivision == 0 || params.subdivision > 6 {
            return Err(WorldGenError::BadSubdivision(params.subdivision));
        }

        let sphere = icosphere::build(params.subdivision);
        let perlin = Perlin::new(params.terrain_seed as u32);

        let tiles: Vec<Tile> = sphere
            .vertices
            .iter()
            .zip(&sphere.neighbors)
            .map(|(v, neighbors)| {
                let unit = [v[0] as f32, v[1] as f32, v[2] as f32];
                let sample = [
                    v[0] * ELEVATION_FREQUENCY,
                    v[1] * ELEVATION_FREQUENCY,
                    v[2] * ELEVATION_FREQUENCY,
                ];
                let elevation =
                    (perlin.get(sample) as f32 * ELEVATION_RANGE).clamp(-ELEVATION_RANGE, ELEVATION_RANGE);
                Tile {
                    pos: SurfacePos::from_unit(unit),
                    unit,
                    elevation,
                    neighbors: neighbors.clone(),
                }
            })
            .collect();

        let mut rng = StdRng::seed_from_u64(params.world_seed);
        let (clusters, tile_cluster) = cluster_tiles(&tiles, &mut rng)?;
        let portals = place_portals(&tiles, &mut rng);
        validate(&tiles, &clusters, &tile_cluster, &portals)?;

        let lookup = build_lookup(&tiles);
        let mut portal_mask = bitvec![0; tiles.len()];
        for &p in &portals {
            portal_mask.set(p as usize, true);
        }

        Ok(Self {
            params,
            tiles,
            clusters,
            tile_cluster,
            portals,
            portal_mask,
            lookup,
        })
    }

    /// Nearest tile to a surface position
    pub fn tile_at(&self, pos: SurfacePos) -> u32 {
        let ti = ((pos.theta / TAU) * LOOKUP_THETA_CELLS as f32) as usize % LOOKUP_THETA_CELLS;
        let pi = ((pos.phi / std::f32::consts::PI) * LOOKUP_PHI_CELLS as f32) as usize;
        let pi = pi.min(LOOKUP_PHI_CELLS - 1);
        let coarse = self.lookup[pi * LOOKUP_THETA_CELLS + ti];

        // Refine across the coarse tile's neighborhood; lookup cells can
        // straddle tile boundaries
        let unit = pos.to_unit();
        let mut best = coarse;
        let mut best_dot = dot(self.tiles[coarse as usize].unit, unit);
        for &n in &self.tiles[coarse as usize].neighbors {
            let d = dot(self.tiles[n as usize].unit, unit);
            if d > best_dot {
                best_dot = d;
                best = n;
            }
        }
        best
    }

    /// Cluster containing a surface position
    pub fn cluster_at(&self, pos: SurfacePos) -> ClusterId {
        self.tile_cluster[self.tile_at(pos) as usize]
    }

    pub fn tile_pos(&self, tile: u32) -> SurfacePos {
        self.tiles[tile as usize].pos
    }

    pub fn is_portal(&self, tile: u32) -> bool {
        self.portal_mask
            .get(tile as usize)
            .map(|b| *b)
            .unwrap_or(false)
    }

    /// Terrain sentinel for projectiles: high ground swallows shells
    pub fn terrain_blocks(&self, pos: SurfacePos) -> bool {
        self.tiles[self.tile_at(pos) as usize].elevation > ELEVATION_RANGE * 0.85
    }

    /// The compact world-description packet sent in welcome. Sponsors are
    /// attached by the caller from the live sponsor store.
    pub fn description(&self, sponsor_ids: &dyn Fn(ClusterId) -> Option<String>) -> WorldDescription {
        WorldDescription {
            subdivision: self.params.subdivision,
            world_seed: self.params.world_seed,
            terrain_seed: self.params.terrain_seed,
            clusters: self
                .clusters
                .iter()
                .map(|c| ClusterDescription {
                    tiles: c.tiles.clone(),
                    capacity: c.tiles.len() as u32,
                    sponsor: sponsor_ids(c.id),
                })
                .collect(),
            portals: self.portals.clone(),
        }
    }
}

#[inline]
fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Seeded flood-fill clustering into contiguous groups of bounded size
fn cluster_tiles(
    tiles: &[Tile],
    rng: &mut StdRng,
) -> Result<(Vec<ClusterSpec>, Vec<ClusterId>), WorldGenError> {
    const UNASSIGNED: ClusterId = ClusterId::MAX;
    let target = (CLUSTER_MIN_TILES + CLUSTER_MAX_TILES) / 2;
    let cluster_count = (tiles.len() / target).max(1);

    let mut seeds: Vec<u32> = (0..tiles.len() as u32).collect();
    seeds.shuffle(rng);
    seeds.truncate(cluster_count);

    let mut assignment = vec![UNASSIGNED; tiles.len()];
    let mut members: Vec<Vec<u32>> = vec![Vec::new(); cluster_count];
    let mut frontiers: Vec<VecDeque<u32>> = vec![VecDeque::new(); cluster_count];

    for (cid, &seed) in seeds.iter().enumerate() {
        assignment[seed as usize] = cid as ClusterId;
        members[cid].push(seed);
        frontiers[cid].push_back(seed);
    }

    // Round-robin BFS growth keeps clusters contiguous and similar in size
    let mut grew = true;
    while grew {
        grew = false;
        for cid in 0..cluster_count {
            if members[cid].len() >= CLUSTER_MAX_TILES {
                continue;
            }
            while let Some(tile) = frontiers[cid].pop_front() {
                let mut claimed = false;
                for &n in &tiles[tile as usize].neighbors {
                    if assignment[n as usize] == UNASSIGNED {
                        assignment[n as usize] = cid as ClusterId;
                        members[cid].push(n);
                        frontiers[cid].push_back(n);
                        claimed = true;
                        grew = true;
                        break;
                    }
                }
                if claimed {
                    // Revisit this tile later; it may have more free
                    // neighbors
                    frontiers[cid].push_front(tile);
                    break;
                }
            }
        }
    }

    // Sweep orphans (tiles walled off from every growing frontier) into an
    // adjacent cluster; repeat so orphan chains drain from their edges
    loop {
        let mut adopted_any = false;
        let mut stranded = None;
        for tile in 0..tiles.len() as u32 {
            if assignment[tile as usize] != UNASSIGNED {
                continue;
            }
            let adopter = tiles[tile as usize]
                .neighbors
                .iter()
                .map(|&n| assignment[n as usize])
                .find(|&c| c != UNASSIGNED);
            match adopter {
                Some(c) => {
                    assignment[tile as usize] = c;
                    members[c as usize].push(tile);
                    adopted_any = true;
                }
                None => stranded = Some(tile),
            }
        }
        match stranded {
            None => break,
            Some(tile) if !adopted_any => return Err(WorldGenError::OrphanTile(tile)),
            Some(_) => {}
        }
    }

    // Merge undersized clusters into their smallest neighbor
    loop {
        let Some(small) = members
            .iter()
            .position(|m| !m.is_empty() && m.len() < CLUSTER_MIN_TILES)
        else {
            break;
        };

        let mut neighbor_best: Option<ClusterId> = None;
        for &tile in &members[small] {
            for &n in &tiles[tile as usize].neighbors {
                let c = assignment[n as usize];
                if c as usize != small && !members[c as usize].is_empty() {
                    neighbor_best = match neighbor_best {
                        Some(best) if members[best as usize].len() <= members[c as usize].len() => {
                            Some(best)
                        }
                        _ => Some(c),
                    };
                }
            }
        }
        let Some(into) = neighbor_best else {
            return Err(WorldGenError::EmptyCluster(small as ClusterId));
        };

        let moved = std::mem::take(&mut members[small]);
        for &tile in &moved {
            assignment[tile as usize] = into;
        }
        members[into as usize].extend(moved);
    }

    // Compact ids, dropping merged-away clusters
    let mut clusters = Vec::new();
    let mut remap = vec![UNASSIGNED; cluster_count];
    for (old, mut tiles_of) in members.into_iter().enumerate() {
        if tiles_of.is_empty() {
            continue;
        }
        tiles_of.sort_unstable();
        let id = clusters.len() as ClusterId;
        remap[old] = id;
        clusters.push(ClusterSpec { id, tiles: tiles_of });
    }
    let tile_cluster: Vec<ClusterId> = assignment
        .into_iter()
        .map(|old| remap[old as usize])
        .collect();

    Ok((clusters, tile_cluster))
}

/// Farthest-point portal placement over the tile graph
fn place_portals(tiles: &[Tile], rng: &mut StdRng) -> Vec<u32> {
    let first = rng.gen_range(0..tiles.len()) as u32;
    let mut portals = vec![first];
    let mut dist = bfs_distances(tiles, &portals);

    while portals.len() < PORTAL_COUNT {
        let (far_tile, _) = dist
            .iter()
            .enumerate()
            .max_by_key(|&(i, &d)| (d, std::cmp::Reverse(i)))
            .expect("tile graph is never empty");
        portals.push(far_tile as u32);
        dist = bfs_distances(tiles, &portals);
    }
    portals.sort_unstable();
    portals
}

/// Multi-source BFS hop distances from a set of tiles
fn bfs_distances(tiles: &[Tile], sources: &[u32]) -> Vec<u32> {
    let mut dist = vec![u32::MAX; tiles.len()];
    let mut queue = VecDeque::new();
    for &s in sources {
        dist[s as usize] = 0;
        queue.push_back(s);
    }
    while let Some(tile) = queue.pop_front() {
        let d = dist[tile as usize];
        for &n in &tiles[tile as usize].neighbors {
            if dist[n as usize] == u32::MAX {
                dist[n as usize] = d + 1;
                queue.push_back(n);
            }
        }
    }
    dist
}

fn validate(
    tiles: &[Tile],
    clusters: &[ClusterSpec],
    tile_cluster: &[ClusterId],
    portals: &[u32],
) -> Result<(), WorldGenError> {
    for (tile, &c) in tile_cluster.iter().enumerate() {
        if c == ClusterId::MAX || c as usize >= clusters.len() {
            return Err(WorldGenError::OrphanTile(tile as u32));
        }
    }
    let portal_dist = bfs_distances(tiles, portals);
    for cluster in clusters {
        if cluster.tiles.is_empty() {
            return Err(WorldGenError::EmptyCluster(cluster.id));
        }
        let reachable = cluster
            .tiles
            .iter()
            .any(|&t| portal_dist[t as usize] <= PORTAL_MAX_HOPS);
        if !reachable {
            return Err(WorldGenError::PortalUnreachable(cluster.id, PORTAL_MAX_HOPS));
        }
    }
    Ok(())
}

fn build_lookup(tiles: &[Tile]) -> Vec<u32> {
    let mut lookup = vec![0u32; LOOKUP_THETA_CELLS * LOOKUP_PHI_CELLS];
    for pi in 0..LOOKUP_PHI_CELLS {
        let phi = (pi as f32 + 0.5) / LOOKUP_PHI_CELLS as f32 * std::f32::consts::PI;
        for ti in 0..LOOKUP_THETA_CELLS {
            let theta = (ti as f32 + 0.5) / LOOKUP_THETA_CELLS as f32 * TAU;
            let unit = SurfacePos::new(theta, phi).to_unit();
            let mut best = 0u32;
            let mut best_dot = f32::MIN;
            for (idx, tile) in tiles.iter().enumerate() {
                let d = dot(tile.unit, unit);
                if d > best_dot {
                    best_dot = d;
                    best = idx as u32;
                }
            }
            lookup[pi * LOOKUP_THETA_CELLS + ti] = best;
        }
    }
    lookup
}

/// Wire shape of the world description inside the welcome packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldDescription {
    #[serde(rename = "sub")]
    pub subdivision: u32,
    #[serde(rename = "worldSeed")]
    pub world_seed: u64,
    #[serde(rename = "terrainSeed")]
    pub terrain_seed: u64,
    pub clusters: Vec<ClusterDescription>,
    pub portals: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDescription {
    pub tiles: Vec<u32>,
    #[serde(rename = "cap")]
    pub capacity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sponsor: Option<String>,
}
