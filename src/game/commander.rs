//! Per-faction commander roles.
//!
//! At most one commander per faction. The role goes to the longest-tenured
//! connected member (earliest join tick, smallest id on ties). While the
//! true commander is offline the next-best member serves as acting
//! commander; the role reverts when the true commander reconnects.

use crate::game::constants::commander::SYNC_INTERVAL;
use crate::game::state::{Commander, Faction, PlayerId, WorldState};

/// A change to a faction's effective commander, broadcast as
/// commander-update
#[derive(Debug, Clone, PartialEq)]
pub struct CommanderUpdate {
    pub faction: Faction,
    /// Effective commander right now, if the faction has anyone
    pub player_id: Option<PlayerId>,
    /// True when the effective commander is a stand-in
    pub acting: bool,
    pub since: u64,
}

#[derive(Debug, Default)]
pub struct CommanderRegistry {
    slots: [Option<Commander>; 3],
    sync_timer: f32,
}

impl CommanderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Longest-tenured connected member of a faction
    fn candidate(world: &WorldState, faction: Faction) -> Option<PlayerId> {
        world
            .players
            .values()
            .filter(|p| p.faction == faction)
            .min_by_key(|p| (p.joined_at, p.id))
            .map(|p| p.id)
    }

    /// Reconcile commander slots against the connected player set. Returns
    /// the updates to broadcast; empty when nothing changed.
    pub fn recompute(&mut self, world: &WorldState) -> Vec<CommanderUpdate> {
        let mut updates = Vec::new();

        for faction in Faction::ALL {
            let slot = &mut self.slots[faction.index()];
            let candidate = Self::candidate(world, faction);

            let true_online = slot.as_ref().is_some_and(|c| {
                world
                    .get_player(c.player_id)
                    .is_some_and(|p| p.faction == faction)
            });

            match slot {
                None => {
                    if let Some(id) = candidate {
                        *slot = Some(Commander {
                            faction,
                            player_id: id,
                            since: world.tick,
                            acting_player_id: None,
                        });
                        updates.push(CommanderUpdate {
                            faction,
                            player_id: Some(id),
                            acting: false,
                            since: world.tick,
                        });
                    }
                }
                Some(c) if true_online => {
                    if c.acting_player_id.take().is_some() {
                        updates.push(CommanderUpdate {
                            faction,
                            player_id: Some(c.player_id),
                            acting: false,
                            since: c.since,
                        });
                    }
                }
                Some(c) => {
                    // True commander offline: install or rotate the stand-in
                    if c.acting_player_id != candidate {
                        c.acting_player_id = candidate;
                        updates.push(CommanderUpdate {
                            faction,
                            player_id: candidate,
                            acting: candidate.is_some(),
                            since: c.since,
                        });
                    }
                }
            }
        }
        updates
    }

    /// The player currently wielding the role for a faction
    pub fn effective(&self, faction: Faction, world: &WorldState) -> Option<PlayerId> {
        let c = self.slots[faction.index()].as_ref()?;
        if let Some(acting) = c.acting_player_id {
            return Some(acting);
        }
        world
            .get_player(c.player_id)
            .filter(|p| p.faction == faction)
            .map(|p| p.id)
    }

    /// True when the player may use commander abilities (ping, draw, tip)
    pub fn can_command(&self, player_id: PlayerId, faction: Faction, world: &WorldState) -> bool {
        self.effective(faction, world) == Some(player_id)
    }

    /// True when the player is a commander of any faction (for award
    /// multipliers)
    pub fn is_commander(&self, player_id: PlayerId, world: &WorldState) -> bool {
        Faction::ALL
            .iter()
            .any(|&f| self.effective(f, world) == Some(player_id))
    }

    /// Full state for commander-sync and the welcome packet
    pub fn snapshot(&self, world: &WorldState) -> Vec<CommanderUpdate> {
        Faction::ALL
            .iter()
            .map(|&faction| {
                let slot = &self.slots[faction.index()];
                CommanderUpdate {
                    faction,
                    player_id: self.effective(faction, world),
                    acting: slot
                        .as_ref()
                        .is_some_and(|c| c.acting_player_id.is_some()),
                    since: slot.as_ref().map(|c| c.since).unwrap_or(0),
                }
            })
            .collect()
    }

    /// True once per periodic commander-sync interval
    pub fn sync_due(&mut self, dt: f32) -> bool {
        self.sync_timer += dt;
        if self.sync_timer >= SYNC_INTERVAL {
            self.sync_timer -= SYNC_INTERVAL;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::Player;
    use uuid::Uuid;

    fn world_with(players: Vec<Player>) -> WorldState {
        let mut w = WorldState::new(Vec::new());
        for p in players {
            w.players.insert(p.id, p);
        }
        w
    }

    fn member(faction: Faction, joined_at: u64) -> Player {
        Player::new(Uuid::new_v4(), "m".into(), faction, joined_at)
    }

    #[test]
    fn test_longest_tenure_wins() {
        let veteran = member(Faction::Rust, 5);
        let rookie = member(Faction::Rust, 50);
        let vid = veteran.id;
        let world = world_with(vec![rookie, veteran]);

        let mut reg = CommanderRegistry::new();
        let updates = reg.recompute(&world);

        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].player_id, Some(vid));
        assert!(!updates[0].acting);
        assert!(reg.can_command(vid, Faction::Rust, &world));
    }

    #[test]
    fn test_one_commander_per_faction() {
        let r = member(Faction::Rust, 0);
        let c = member(Faction::Cobalt, 0);
        let world = world_with(vec![r, c]);

        let mut reg = CommanderRegistry::new();
        let updates = reg.recompute(&world);
        assert_eq!(updates.len(), 2);
        let factions: Vec<Faction> = updates.iter().map(|u| u.faction).collect();
        assert!(factions.contains(&Faction::Rust));
        assert!(factions.contains(&Faction::Cobalt));
    }

    #[test]
    fn test_acting_commander_while_offline() {
        let veteran = member(Faction::Rust, 5);
        let second = member(Faction::Rust, 10);
        let (vid, sid) = (veteran.id, second.id);

        let mut world = world_with(vec![veteran, second]);
        let mut reg = CommanderRegistry::new();
        reg.recompute(&world);

        // True commander disconnects
        world.players.remove(&vid);
        let updates = reg.recompute(&world);

        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].player_id, Some(sid));
        assert!(updates[0].acting);
        assert!(reg.can_command(sid, Faction::Rust, &world));
        assert!(!reg.can_command(vid, Faction::Rust, &world));
    }

    #[test]
    fn test_role_reverts_on_reconnect() {
        let veteran = member(Faction::Rust, 5);
        let second = member(Faction::Rust, 10);
        let vid = veteran.id;
        let stored = veteran.clone();

        let mut world = world_with(vec![veteran, second]);
        let mut reg = CommanderRegistry::new();
        reg.recompute(&world);

        world.players.remove(&vid);
        reg.recompute(&world);

        // Reconnect with the same id
        world.players.insert(vid, stored);
        let updates = reg.recompute(&world);

        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].player_id, Some(vid));
        assert!(!updates[0].acting);
    }

    #[test]
    fn test_no_members_no_commander() {
        let world = world_with(Vec::new());
        let mut reg = CommanderRegistry::new();
        assert!(reg.recompute(&world).is_empty());
        assert_eq!(reg.effective(Faction::Rust, &world), None);
    }

    #[test]
    fn test_recompute_idempotent_when_stable() {
        let world = world_with(vec![member(Faction::Viridian, 3)]);
        let mut reg = CommanderRegistry::new();
        assert_eq!(reg.recompute(&world).len(), 1);
        assert!(reg.recompute(&world).is_empty());
        assert!(reg.recompute(&world).is_empty());
    }

    #[test]
    fn test_snapshot_covers_all_factions() {
        let world = world_with(vec![member(Faction::Rust, 0)]);
        let mut reg = CommanderRegistry::new();
        reg.recompute(&world);
        let snap = reg.snapshot(&world);
        assert_eq!(snap.len(), 3);
        assert!(snap.iter().any(|u| u.player_id.is_some()));
    }

    #[test]
    fn test_sync_timer() {
        let mut reg = CommanderRegistry::new();
        let mut fires = 0;
        for _ in 0..(11 * 20) {
            if reg.sync_due(0.05) {
                fires += 1;
            }
        }
        assert_eq!(fires, 2);
    }
}
