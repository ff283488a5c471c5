//! Wrap-aware spatial hash over (theta, phi) for projectile hit candidates.
//!
//! The sphere surface is divided into fixed angular cells (phi rows of pi/32,
//! theta columns of 2pi/64). Longitude wraps; colatitude clamps at the poles.
//! Tank proxies live in a flat arena that is cleared and refilled each tick,
//! so steady-state operation performs no per-tick allocation.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::f32::consts::{PI, TAU};

use crate::game::state::{ActorId, Faction};
use crate::util::sphere::SurfacePos;

/// Longitude columns
pub const THETA_CELLS: i32 = 64;
/// Colatitude rows
pub const PHI_CELLS: i32 = 32;

const THETA_CELL_SIZE: f32 = TAU / THETA_CELLS as f32;
const PHI_CELL_SIZE: f32 = PI / PHI_CELLS as f32;

/// A tank's snapshot for hit testing, valid for one tick
#[derive(Debug, Clone, Copy)]
pub struct TankProxy {
    pub actor: ActorId,
    pub faction: Faction,
    pub pos: SurfacePos,
    pub heading: f32,
    /// Alive and deployed; dead or deploying tanks cannot be hit
    pub targetable: bool,
}

/// Spatial hash grid rebuilt once per tick from humans and the bot position
/// buffer
pub struct SurfaceGrid {
    cells: FxHashMap<u32, SmallVec<[u32; 8]>>,
    proxies: Vec<TankProxy>,
    /// Generation stamps for dedup during multi-cell queries
    stamps: Vec<u32>,
    generation: u32,
}

#[inline]
fn cell_coords(pos: SurfacePos) -> (i32, i32) {
    let ti = (pos.theta / THETA_CELL_SIZE).floor() as i32;
    let pi = ((pos.phi / PHI_CELL_SIZE).floor() as i32).clamp(0, PHI_CELLS - 1);
    (ti.rem_euclid(THETA_CELLS), pi)
}

#[inline]
fn cell_key(ti: i32, pi: i32) -> u32 {
    (pi * THETA_CELLS + ti) as u32
}

impl SurfaceGrid {
    pub fn new() -> Self {
        Self {
            cells: FxHashMap::default(),
            proxies: Vec::with_capacity(64),
            stamps: Vec::with_capacity(64),
            generation: 0,
        }
    }

    /// Drop all proxies but keep allocated cell storage for reuse
    pub fn clear(&mut self) {
        for cell in self.cells.values_mut() {
            cell.clear();
        }
        self.proxies.clear();
        self.stamps.clear();
    }

    pub fn insert(&mut self, proxy: TankProxy) -> u32 {
        let idx = self.proxies.len() as u32;
        let (ti, pi) = cell_coords(proxy.pos);
        self.cells.entry(cell_key(ti, pi)).or_default().push(idx);
        self.proxies.push(proxy);
        self.stamps.push(0);
        idx
    }

    pub fn proxies(&self) -> &[TankProxy] {
        &self.proxies
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Collect candidate proxy indices from the <=9 wrap-aware cells around
    /// `pos` into `out`, deduping across calls within one query generation.
    fn gather_neighbors(&mut self, pos: SurfacePos, out: &mut SmallVec<[u32; 16]>) {
        let (ti, pi) = cell_coords(pos);
        for dp in -1..=1 {
            let row = pi + dp;
            if row < 0 || row >= PHI_CELLS {
                continue;
            }
            for dt in -1..=1 {
                let col = (ti + dt).rem_euclid(THETA_CELLS);
                if let Some(cell) = self.cells.get(&cell_key(col, row)) {
                    for &idx in cell {
                        let stamp = &mut self.stamps[idx as usize];
                        if *stamp != self.generation {
                            *stamp = self.generation;
                            out.push(idx);
                        }
                    }
                }
            }
        }
    }

    /// Candidate tanks for a projectile chord from `start` to `end`.
    /// Gathers the swept cells at both endpoints and the midpoint; a tick's
    /// chord never spans more than one extra cell at game speeds.
    pub fn query_segment(&mut self, start: SurfacePos, end: SurfacePos) -> SmallVec<[u32; 16]> {
        self.generation = self.generation.wrapping_add(1);
        if self.generation == 0 {
            self.stamps.iter_mut().for_each(|s| *s = u32::MAX);
            self.generation = 1;
        }
        let mut out = SmallVec::new();
        self.gather_neighbors(start, &mut out);
        let mid = SurfacePos::new(
            start.theta + crate::util::sphere::theta_delta(start.theta, end.theta) * 0.5,
            (start.phi + end.phi) * 0.5,
        );
        self.gather_neighbors(mid, &mut out);
        self.gather_neighbors(end, &mut out);
        out
    }
}

impl Default for SurfaceGrid {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn proxy_at(theta: f32, phi: f32) -> TankProxy {
        TankProxy {
            actor: ActorId::Human(Uuid::new_v4()),
            faction: Faction::Rust,
            pos: SurfacePos::new(theta, phi),
            heading: 0.0,
            targetable: true,
        }
    }

    #[test]
    fn test_insert_and_query_same_cell() {
        let mut grid = SurfaceGrid::new();
        let p = proxy_at(1.0, 1.5);
        grid.insert(p);
        let hits = grid.query_segment(p.pos, p.pos);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_query_finds_neighbor_cell() {
        let mut grid = SurfaceGrid::new();
        // Slightly across a cell boundary from the query point
        grid.insert(proxy_at(THETA_CELL_SIZE * 1.05, PI / 2.0));
        let hits = grid.query_segment(
            SurfacePos::new(THETA_CELL_SIZE * 0.95, PI / 2.0),
            SurfacePos::new(THETA_CELL_SIZE * 0.95, PI / 2.0),
        );
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_query_wraps_longitude_seam() {
        let mut grid = SurfaceGrid::new();
        grid.insert(proxy_at(TAU - 0.01, PI / 2.0));
        let hits = grid.query_segment(
            SurfacePos::new(0.01, PI / 2.0),
            SurfacePos::new(0.01, PI / 2.0),
        );
        assert_eq!(hits.len(), 1, "seam neighbors must be wrap-aware");
    }

    #[test]
    fn test_query_misses_far_proxy() {
        let mut grid = SurfaceGrid::new();
        grid.insert(proxy_at(PI, PI / 2.0));
        let hits = grid.query_segment(
            SurfacePos::new(0.0, PI / 2.0),
            SurfacePos::new(0.05, PI / 2.0),
        );
        assert!(hits.is_empty());
    }

    #[test]
    fn test_segment_query_dedups() {
        let mut grid = SurfaceGrid::new();
        let p = proxy_at(1.0, 1.5);
        grid.insert(p);
        // Start, mid, and end all land in the same neighborhood
        let hits = grid.query_segment(p.pos, SurfacePos::new(1.01, 1.5));
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_clear_retains_capacity() {
        let mut grid = SurfaceGrid::new();
        for i in 0..32 {
            grid.insert(proxy_at(i as f32 * 0.1, 1.0 + (i % 8) as f32 * 0.1));
        }
        assert_eq!(grid.len(), 32);
        grid.clear();
        assert!(grid.is_empty());
        let hits = grid.query_segment(
            SurfacePos::new(1.0, 1.0),
            SurfacePos::new(1.0, 1.0),
        );
        assert!(hits.is_empty());
    }
}
