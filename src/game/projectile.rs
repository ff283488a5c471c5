//! Cannon shells: charge scaling, swept collision, hit resolution.
//!
//! Hit testing sweeps the tick's chord against an oriented box in each
//! candidate tank's local tangent frame, after a cheap distance reject. The
//! candidate set comes from the wrap-aware spatial hash. Friendly fire is
//! off, owners cannot hit themselves, and dead or deploying tanks are not
//! targetable.

use rustc_hash::FxHashMap;

use crate::game::constants::cannon;
use crate::game::constants::tank::{BROAD_RADIUS, HALF_LENGTH, HALF_WIDTH};
use crate::game::constants::world::RADIUS;
use crate::game::spatial::SurfaceGrid;
use crate::game::state::{ActorId, Faction, Projectile};
use crate::util::sphere::{self, SurfacePos};
use crate::util::vec2::Vec2;

/// Derived projectile parameters for a charge power in [0, 10]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChargeProfile {
    pub speed: f32,
    pub range: f32,
    pub damage: f32,
    /// Visual size factor forwarded to clients in player-fired
    pub size: f32,
}

impl ChargeProfile {
    pub fn from_power(power: f32) -> Self {
        let t = (power / cannon::MAX_POWER).clamp(0.0, 1.0);
        Self {
            speed: cannon::BASE_SPEED * (1.0 + cannon::SPEED_GAIN * t),
            range: cannon::BASE_RANGE * (1.0 + cannon::RANGE_GAIN * t),
            damage: cannon::BASE_DAMAGE * (1.0 + cannon::DAMAGE_GAIN * t),
            size: 1.0 + t,
        }
    }
}

/// A resolved hit, produced in projectile order within a tick
#[derive(Debug, Clone, Copy)]
pub struct HitRecord {
    pub projectile_id: u64,
    pub attacker: ActorId,
    pub attacker_faction: Faction,
    pub target: ActorId,
    pub damage: f32,
}

/// Owns every projectile in flight and resolves their motion and hits
#[derive(Debug, Default)]
pub struct ProjectileEngine {
    projectiles: Vec<Projectile>,
    owner_counts: FxHashMap<ActorId, usize>,
}

impl ProjectileEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> usize {
        self.projectiles.len()
    }

    pub fn projectiles(&self) -> &[Projectile] {
        &self.projectiles
    }

    pub fn count_for(&self, owner: ActorId) -> usize {
        self.owner_counts.get(&owner).copied().unwrap_or(0)
    }

    /// Spawn a shell. Returns false when the owner is at their in-flight
    /// cap; the fire is dropped silently per the resource policy.
    pub fn spawn(
        &mut self,
        id: u64,
        owner: ActorId,
        owner_faction: Faction,
        pos: SurfacePos,
        heading: f32,
        power: f32,
    ) -> bool {
        let count = self.owner_counts.entry(owner).or_insert(0);
        if *count >= cannon::PER_OWNER_CAP {
            return false;
        }
        *count += 1;

        let profile = ChargeProfile::from_power(power);
        self.projectiles.push(Projectile {
            id,
            owner,
            owner_faction,
            pos,
            heading,
            speed: profile.speed,
            damage: profile.damage,
            range: profile.range,
            age: 0.0,
            traveled: 0.0,
        });
        true
    }

    /// Drop all projectiles owned by a departing actor
    pub fn remove_owner(&mut self, owner: ActorId) {
        self.projectiles.retain(|p| p.owner != owner);
        self.owner_counts.remove(&owner);
    }

    /// Advance every shell one tick and resolve hits against the tanks in
    /// `grid`. `blocked` is the terrain sentinel: a position where the
    /// surface swallows the shell.
    pub fn advance<F>(&mut self, grid: &mut SurfaceGrid, dt: f32, blocked: F) -> Vec<HitRecord>
    where
        F: Fn(SurfacePos) -> bool,
    {
        let mut hits = Vec::new();
        let mut i = 0;
        while i < self.projectiles.len() {
            let (start, end, chord_len) = {
                let p = &mut self.projectiles[i];
                let start = p.pos;
                let dist = p.speed * dt;
                let end = sphere::step(start, p.heading, dist, RADIUS);
                p.age += dt;
                p.traveled += dist;
                p.pos = end;
                (start, end, dist)
            };

            let hit = self.resolve_hit(i, grid, start, end, chord_len);

            let expired = {
                let p = &self.projectiles[i];
                p.is_expired() || blocked(p.pos)
            };

            if let Some(record) = hit {
                hits.push(record);
                self.discard(i);
            } else if expired {
                self.discard(i);
            } else {
                i += 1;
            }
        }
        hits
    }

    fn resolve_hit(
        &mut self,
        index: usize,
        grid: &mut SurfaceGrid,
        start: SurfacePos,
        end: SurfacePos,
        chord_len: f32,
    ) -> Option<HitRecord> {
        let (owner, owner_faction, id, damage) = {
            let p = &self.projectiles[index];
            (p.owner, p.owner_faction, p.id, p.damage)
        };

        let candidates = grid.query_segment(start, end);
        let mut best: Option<(f32, ActorId)> = None;

        for idx in candidates {
            let tank = grid.proxies()[idx as usize];
            if !tank.targetable || tank.actor == owner || tank.faction == owner_faction {
                continue;
            }

            // Quick reject in world units before the box test
            let to_tank = sphere::local_offset(start, tank.pos, RADIUS);
            let reach = chord_len + BROAD_RADIUS;
            if to_tank.length_sq() > reach * reach {
                continue;
            }

            // Segment endpoints in the tank's local frame, box axis-aligned
            // (forward = +y after rotating by the tank heading)
            let rel_start = sphere::local_offset(tank.pos, start, RADIUS).rotate(tank.heading);
            let rel_end = sphere::local_offset(tank.pos, end, RADIUS).rotate(tank.heading);

            if let Some(t) = segment_hits_box(rel_start, rel_end, HALF_WIDTH, HALF_LENGTH) {
                match best {
                    Some((best_t, _)) if best_t <= t => {}
                    _ => best = Some((t, tank.actor)),
                }
            }
        }

        best.map(|(_, target)| HitRecord {
            projectile_id: id,
            attacker: owner,
            attacker_faction: owner_faction,
            target,
            damage,
        })
    }

    fn discard(&mut self, index: usize) {
        let owner = self.projectiles[index].owner;
        self.projectiles.swap_remove(index);
        if let Some(count) = self.owner_counts.get_mut(&owner) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Slab test of a segment against an axis-aligned box centered at the
/// origin. Returns the entry parameter t in [0, 1] on hit.
fn segment_hits_box(p0: Vec2, p1: Vec2, half_w: f32, half_l: f32) -> Option<f32> {
    let d = p1 - p0;
    let mut t_min = 0.0f32;
    let mut t_max = 1.0f32;

    for (s, dir, half) in [(p0.x, d.x, half_w), (p0.y, d.y, half_l)] {
        if dir.abs() < 1e-6 {
            if s.abs() > half {
                return None;
            }
        } else {
            let inv = 1.0 / dir;
            let mut t0 = (-half - s) * inv;
            let mut t1 = (half - s) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return None;
            }
        }
    }
    Some(t_min)
}
