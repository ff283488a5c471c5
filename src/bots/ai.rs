//! Per-bot behavior: cluster selection, spherical steering, combat.
//!
//! Bots run a small state machine: deploy at a portal, roam toward a
//! cluster their faction does not hold, stand in it to capture, and switch
//! to combat when an enemy tank comes into range. All decisions draw from
//! the worker's seeded RNG so a restarted worker replays the same
//! personality mix.

use rand::rngs::StdRng;
use rand::Rng;

use crate::game::constants::bots;
use crate::game::constants::world::RADIUS;
use crate::game::state::{ClusterId, Faction, HumanView, Ownership};
use crate::util::sphere::{self, SurfacePos};

/// Bot behavior mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotMode {
    /// Deploy animation after portal entry
    Deploying,
    /// Traveling toward the target cluster
    Roam,
    /// Standing inside the target cluster accumulating tics
    Capture,
    /// Engaging a nearby enemy
    Combat,
    /// Waiting on the respawn timer
    Dead,
}

/// AI state carried by each bot between ticks
#[derive(Debug, Clone)]
pub struct BotBrain {
    pub mode: BotMode,
    pub target_cluster: Option<ClusterId>,
    pub decision_timer: f32,
    pub fire_cooldown: f32,
    /// Per-bot wander phase so squads do not move in lockstep
    pub wander_phase: f32,
}

impl BotBrain {
    pub fn new(rng: &mut StdRng) -> Self {
        Self {
            mode: BotMode::Deploying,
            target_cluster: None,
            decision_timer: rng.gen_range(0.0..bots::DECISION_INTERVAL),
            fire_cooldown: rng.gen_range(0.0..bots::FIRE_COOLDOWN),
            wander_phase: rng.gen_range(0.0..std::f32::consts::TAU),
        }
    }
}

/// What the bot wants to do this tick
#[derive(Debug, Clone, Copy)]
pub struct Decision {
    pub heading: f32,
    pub speed: f32,
    /// Charge power when firing this tick
    pub fire: Option<f32>,
}

/// Read-only cluster context the worker maintains from capture snapshots
pub struct ClusterView<'a> {
    pub centroids: &'a [SurfacePos],
    pub owners: &'a [Ownership],
}

/// Decide the next move for one bot
#[allow(clippy::too_many_arguments)]
pub fn decide(
    brain: &mut BotBrain,
    pos: SurfacePos,
    heading: f32,
    faction: Faction,
    current_cluster: ClusterId,
    humans: &[HumanView],
    clusters: &ClusterView<'_>,
    rng: &mut StdRng,
    dt: f32,
) -> Decision {
    brain.decision_timer -= dt;
    brain.fire_cooldown = (brain.fire_cooldown - dt).max(0.0);
    brain.wander_phase += dt * 0.35;

    // Combat overrides everything when an enemy is close
    if let Some((enemy_pos, dist)) = nearest_enemy(pos, faction, humans) {
        if dist <= bots::ENGAGE_RANGE {
            brain.mode = BotMode::Combat;
            let aim = sphere::heading_to(pos, enemy_pos);
            let fire = if brain.fire_cooldown <= 0.0 {
                brain.fire_cooldown = bots::FIRE_COOLDOWN;
                // Charge harder for distant targets
                Some((dist / bots::ENGAGE_RANGE * 8.0).clamp(0.0, 8.0))
            } else {
                None
            };
            // Close to box-test range: circle the target instead of ramming
            let speed = if dist < 10.0 { bots::SPEED * 0.4 } else { bots::SPEED };
            return Decision {
                heading: aim,
                speed,
                fire,
            };
        } else if brain.mode == BotMode::Combat {
            brain.mode = BotMode::Roam;
        }
    }

    // Periodic retarget
    if brain.decision_timer <= 0.0 || brain.target_cluster.is_none() {
        brain.decision_timer = bots::DECISION_INTERVAL;
        brain.target_cluster = pick_cluster(pos, faction, clusters, rng);
    }

    let Some(target) = brain.target_cluster else {
        // Nothing worth taking; idle wander
        return Decision {
            heading: heading + brain.wander_phase.sin() * 0.2,
            speed: bots::SPEED * 0.5,
            fire: None,
        };
    };

    if current_cluster == target {
        brain.mode = BotMode::Capture;
        // Loiter inside the cluster with a slow weave
        Decision {
            heading: heading + brain.wander_phase.sin() * 0.5,
            speed: bots::SPEED * 0.3,
            fire: None,
        }
    } else {
        brain.mode = BotMode::Roam;
        Decision {
            heading: sphere::heading_to(pos, clusters.centroids[target as usize]),
            speed: bots::SPEED,
            fire: None,
        }
    }
}

fn nearest_enemy(
    pos: SurfacePos,
    faction: Faction,
    humans: &[HumanView],
) -> Option<(SurfacePos, f32)> {
    humans
        .iter()
        .filter(|h| !h.is_dead && h.faction != faction)
        .map(|h| (h.pos, sphere::surface_distance(pos, h.pos, RADIUS)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

/// Prefer the nearest cluster the faction does not hold; sponsor clusters
/// are skipped (they can never flip)
fn pick_cluster(
    pos: SurfacePos,
    faction: Faction,
    clusters: &ClusterView<'_>,
    rng: &mut StdRng,
) -> Option<ClusterId> {
    let mut candidates: Vec<(ClusterId, f32)> = clusters
        .owners
        .iter()
        .enumerate()
        .filter(|&(_, owner)| match owner {
            Ownership::Sponsor => false,
            Ownership::Faction(f) => *f != faction,
            Ownership::Unowned => true,
        })
        .map(|(i, _)| {
            (
                i as ClusterId,
                sphere::surface_distance(pos, clusters.centroids[i], RADIUS),
            )
        })
        .collect();

    if candidates.is_empty() {
        return None;
    }
    candidates.sort_by(|a, b| a.1.total_cmp(&b.1));
    // A little variety: usually the closest, sometimes the runner-up
    let pick = if candidates.len() > 1 && rng.gen_bool(0.25) {
        1
    } else {
        0
    };
    Some(candidates[pick].0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::f32::consts::PI;
    use uuid::Uuid;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn human_at(pos: SurfacePos, faction: Faction, dead: bool) -> HumanView {
        HumanView {
            id: Uuid::new_v4(),
            pos,
            heading: 0.0,
            speed: 0.0,
            faction,
            is_dead: dead,
        }
    }

    fn view<'a>(centroids: &'a [SurfacePos], owners: &'a [Ownership]) -> ClusterView<'a> {
        ClusterView { centroids, owners }
    }

    #[test]
    fn test_combat_when_enemy_in_range() {
        let mut r = rng();
        let mut brain = BotBrain::new(&mut r);
        let pos = SurfacePos::new(1.0, PI / 2.0);
        let enemy = sphere::step(pos, PI / 2.0, 20.0, RADIUS);
        let humans = [human_at(enemy, Faction::Cobalt, false)];
        let centroids = [pos];
        let owners = [Ownership::Unowned];

        let d = decide(
            &mut brain,
            pos,
            0.0,
            Faction::Rust,
            0,
            &humans,
            &view(&centroids, &owners),
            &mut r,
            0.05,
        );

        assert_eq!(brain.mode, BotMode::Combat);
        // Aiming roughly east at the enemy
        assert!((d.heading - PI / 2.0).abs() < 0.1);
    }

    #[test]
    fn test_dead_enemies_ignored() {
        let mut r = rng();
        let mut brain = BotBrain::new(&mut r);
        let pos = SurfacePos::new(1.0, PI / 2.0);
        let enemy = sphere::step(pos, PI / 2.0, 20.0, RADIUS);
        let humans = [human_at(enemy, Faction::Cobalt, true)];
        let centroids = [sphere::step(pos, 0.0, 60.0, RADIUS)];
        let owners = [Ownership::Unowned];

        decide(
            &mut brain,
            pos,
            0.0,
            Faction::Rust,
            100,
            &humans,
            &view(&centroids, &owners),
            &mut r,
            0.05,
        );

        assert_ne!(brain.mode, BotMode::Combat);
    }

    #[test]
    fn test_fire_respects_cooldown() {
        let mut r = rng();
        let mut brain = BotBrain::new(&mut r);
        brain.fire_cooldown = 0.0;
        let pos = SurfacePos::new(1.0, PI / 2.0);
        let enemy = sphere::step(pos, PI / 2.0, 15.0, RADIUS);
        let humans = [human_at(enemy, Faction::Viridian, false)];
        let centroids = [pos];
        let owners = [Ownership::Unowned];
        let cv = view(&centroids, &owners);

        let first = decide(
            &mut brain, pos, 0.0, Faction::Rust, 0, &humans, &cv, &mut r, 0.05,
        );
        assert!(first.fire.is_some());

        let second = decide(
            &mut brain, pos, 0.0, Faction::Rust, 0, &humans, &cv, &mut r, 0.05,
        );
        assert!(second.fire.is_none(), "cooldown must gate the next shot");
    }

    #[test]
    fn test_roams_toward_uncaptured_cluster() {
        let mut r = rng();
        let mut brain = BotBrain::new(&mut r);
        brain.decision_timer = 0.0;
        let pos = SurfacePos::new(1.0, PI / 2.0);
        // Cluster 0 is ours, cluster 1 is open and to the east
        let centroids = [pos, sphere::step(pos, PI / 2.0, 100.0, RADIUS)];
        let owners = [Ownership::Faction(Faction::Rust), Ownership::Unowned];

        let d = decide(
            &mut brain,
            pos,
            0.0,
            Faction::Rust,
            0,
            &[],
            &view(&centroids, &owners),
            &mut r,
            0.05,
        );

        assert_eq!(brain.target_cluster, Some(1));
        assert_eq!(brain.mode, BotMode::Roam);
        assert!((d.heading - PI / 2.0).abs() < 0.2);
        assert_eq!(d.speed, bots::SPEED);
    }

    #[test]
    fn test_captures_when_inside_target() {
        let mut r = rng();
        let mut brain = BotBrain::new(&mut r);
        brain.decision_timer = 0.0;
        let pos = SurfacePos::new(1.0, PI / 2.0);
        let centroids = [pos];
        let owners = [Ownership::Unowned];

        let d = decide(
            &mut brain,
            pos,
            0.0,
            Faction::Cobalt,
            0,
            &[],
            &view(&centroids, &owners),
            &mut r,
            0.05,
        );

        assert_eq!(brain.mode, BotMode::Capture);
        assert!(d.speed < bots::SPEED);
    }

    #[test]
    fn test_sponsor_clusters_never_targeted() {
        let mut r = rng();
        let mut brain = BotBrain::new(&mut r);
        brain.decision_timer = 0.0;
        let pos = SurfacePos::new(1.0, PI / 2.0);
        let centroids = [sphere::step(pos, PI / 2.0, 50.0, RADIUS)];
        let owners = [Ownership::Sponsor];

        decide(
            &mut brain,
            pos,
            0.0,
            Faction::Rust,
            7,
            &[],
            &view(&centroids, &owners),
            &mut r,
            0.05,
        );

        assert_eq!(brain.target_cluster, None);
    }
}
