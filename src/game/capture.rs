//! Per-cluster capture tug-of-war.
//!
//! Tanks standing in a cluster accumulate tics for their faction at a rate
//! proportional to their count. A faction's gain first decays other
//! factions' tics before planting its own: attackers must neutralize the
//! defense before making progress. Ownership flips only at the two
//! transition edges (fill-to-capacity, decay-to-zero under contest).
//! Sponsor-held clusters never flip but still track tics for display and
//! extend their hold timer under sustained single-faction presence.

use rayon::prelude::*;

use crate::game::constants::capture::{
    SPONSOR_HOLD_EXTEND_RATE, SPONSOR_HOLD_MAX, TICS_PER_SECOND_PER_TANK,
};
use crate::game::state::{
    Cluster, ClusterId, ClusterPresence, Faction, Ownership, PlayerId, PresenceMap,
};

/// Comparison slack for "reached capacity" / "decayed to zero"
const TIC_EPSILON: f32 = 1e-4;

/// An ownership transition emitted during a tick
#[derive(Debug, Clone, PartialEq)]
pub struct OwnershipChange {
    pub cluster: ClusterId,
    pub owner: Ownership,
}

/// A one-second tic-contribution award, attributed to the human who moved
/// the tic (smallest id on ties)
#[derive(Debug, Clone, PartialEq)]
pub struct TicAward {
    pub cluster: ClusterId,
    pub player: PlayerId,
}

/// Everything the capture pass produced this tick
#[derive(Debug, Default)]
pub struct CaptureEvents {
    pub flips: Vec<OwnershipChange>,
    pub tic_awards: Vec<TicAward>,
}

#[derive(Debug, Default)]
struct ClusterOutcome {
    flip: Option<OwnershipChange>,
    award: Option<TicAward>,
}

/// Advance capture for every cluster. Clusters without presence keep their
/// tics untouched; there is no passive decay.
pub fn advance(clusters: &mut [Cluster], presence: &PresenceMap, dt: f32) -> CaptureEvents {
    let outcomes: Vec<ClusterOutcome> = clusters
        .par_iter_mut()
        .map(|cluster| match presence.get(&cluster.id) {
            Some(p) if !p.is_empty() => advance_cluster(cluster, p, dt),
            _ => ClusterOutcome::default(),
        })
        .collect();

    let mut events = CaptureEvents::default();
    for outcome in outcomes {
        if let Some(flip) = outcome.flip {
            events.flips.push(flip);
        }
        if let Some(award) = outcome.award {
            events.tic_awards.push(award);
        }
    }
    events
}

fn advance_cluster(cluster: &mut Cluster, presence: &ClusterPresence, dt: f32) -> ClusterOutcome {
    let rate = TICS_PER_SECOND_PER_TANK * dt;
    let gains: [f32; 3] = [
        presence.counts[0] as f32 * rate,
        presence.counts[1] as f32 * rate,
        presence.counts[2] as f32 * rate,
    ];

    // Which factions actually moved a tic this tick (for award attribution)
    let mut moved = [false; 3];

    for f in Faction::ALL {
        let fi = f.index();
        let mut remaining = gains[fi];
        if remaining <= 0.0 {
            continue;
        }

        // Decay-before-gain: consume enemy tics first
        for e in Faction::ALL {
            if e == f || remaining <= 0.0 {
                continue;
            }
            let ei = e.index();
            if cluster.tics[ei] > 0.0 {
                let d = cluster.tics[ei].min(remaining);
                cluster.tics[ei] -= d;
                remaining -= d;
                moved[fi] = true;
            }
        }

        // Leftover plants own tics up to remaining capacity
        if remaining > 0.0 {
            let headroom = (cluster.capacity - cluster.tics_total()).max(0.0);
            let add = remaining.min(headroom);
            if add > 0.0 {
                cluster.tics[fi] += add;
                moved[fi] = true;
            }
        }
    }

    // Snap fully-decayed stacks to exactly zero
    for t in cluster.tics.iter_mut() {
        if *t < TIC_EPSILON {
            *t = 0.0;
        }
    }

    let flip = apply_transitions(cluster, presence, dt);
    let award = accrue_award(cluster, presence, &moved, dt);

    ClusterOutcome { flip, award }
}

fn apply_transitions(
    cluster: &mut Cluster,
    presence: &ClusterPresence,
    dt: f32,
) -> Option<OwnershipChange> {
    match cluster.owner {
        Ownership::Unowned => {
            for f in Faction::ALL {
                if cluster.tics[f.index()] >= cluster.capacity - TIC_EPSILON {
                    cluster.tics = [0.0; 3];
                    cluster.tics[f.index()] = cluster.capacity;
                    cluster.owner = Ownership::Faction(f);
                    return Some(OwnershipChange {
                        cluster: cluster.id,
                        owner: cluster.owner,
                    });
                }
            }
            None
        }
        Ownership::Faction(owner) => {
            // Contested by standing tics or by attackers in the cluster;
            // the flip lands on the exact decay-to-zero tick either way
            let contested = Faction::ALL.iter().any(|&f| {
                f != owner && (cluster.tics[f.index()] > 0.0 || presence.counts[f.index()] > 0)
            });
            if cluster.tics[owner.index()] <= 0.0 && contested {
                cluster.owner = Ownership::Unowned;
                Some(OwnershipChange {
                    cluster: cluster.id,
                    owner: Ownership::Unowned,
                })
            } else {
                None
            }
        }
        Ownership::Sponsor => {
            // Sponsor clusters keep display tics but never change hands.
            // Sustained single-faction presence extends the hold.
            let single_faction = presence.counts.iter().filter(|&&c| c > 0).count() == 1;
            if single_faction {
                cluster.hold_timer =
                    (cluster.hold_timer + SPONSOR_HOLD_EXTEND_RATE * dt).min(SPONSOR_HOLD_MAX);
            } else {
                cluster.hold_timer = (cluster.hold_timer - dt).max(0.0);
            }
            None
        }
    }
}

fn accrue_award(
    cluster: &mut Cluster,
    presence: &ClusterPresence,
    moved: &[bool; 3],
    dt: f32,
) -> Option<TicAward> {
    // Smallest present human id among factions that moved a tic this tick.
    // Bot-only movement accrues no award.
    let mut mover: Option<PlayerId> = None;
    for f in Faction::ALL {
        if !moved[f.index()] {
            continue;
        }
        if let Some(id) = presence.humans[f.index()] {
            mover = match mover {
                Some(existing) if existing <= id => Some(existing),
                _ => Some(id),
            };
        }
    }

    let any_movement = moved.iter().any(|&m| m);
    if !any_movement {
        return None;
    }
    if let Some(id) = mover {
        cluster.last_mover = Some(id);
    }

    cluster.award_accum += dt;
    if cluster.award_accum >= 1.0 {
        cluster.award_accum -= 1.0;
        cluster.last_mover.take().map(|player| TicAward {
            cluster: cluster.id,
            player,
        })
    } else {
        None
    }
}

/// Per-faction tic velocity since the previous progress broadcast. Derived
/// only; never persisted.
pub fn momentum(cluster: &Cluster, elapsed: f32) -> [f32; 3] {
    if elapsed <= 0.0 {
        return [0.0; 3];
    }
    let mut m = [0.0; 3];
    for i in 0..3 {
        m[i] = (cluster.tics[i] - cluster.last_broadcast_tics[i]) / elapsed;
    }
    m
}

/// Record the broadcast baseline for momentum derivation
pub fn mark_broadcast(cluster: &mut Cluster) {
    cluster.last_broadcast_tics = cluster.tics;
}
