//! Crypto awards, spending, and the level curve.
//!
//! The server balance is authoritative. Awards mutate the player record
//! immediately and the room reflects them to clients; spending is checked
//! against the debt floor before the action it pays for is integrated.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::game::constants::crypto;
use crate::game::state::{Player, PlayerId};

/// Spend/tip rejections surfaced to the offending client as *-failed events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EconomyError {
    #[error("insufficient crypto")]
    InsufficientFunds,
    #[error("tip exceeds the per-transfer limit")]
    TipTooLarge,
    #[error("tipping too fast")]
    TipRateLimited,
    #[error("amount must be positive")]
    NonPositiveAmount,
}

/// Periodic timers and tip rate limiting
#[derive(Debug, Default)]
pub struct EconomyEngine {
    /// Simulation clock in seconds
    clock: f32,
    holding_timer: f32,
    broadcast_timer: f32,
    /// Last tip time per commander, simulation seconds
    tip_last: FxHashMap<PlayerId, f32>,
}

impl EconomyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the engine clock one tick
    pub fn tick(&mut self, dt: f32) {
        self.clock += dt;
        self.holding_timer += dt;
        self.broadcast_timer += dt;
    }

    /// True once per holding interval; the room then runs the holding pass
    pub fn holding_due(&mut self) -> bool {
        if self.holding_timer >= crypto::HOLDING_INTERVAL {
            self.holding_timer -= crypto::HOLDING_INTERVAL;
            true
        } else {
            false
        }
    }

    /// True once per crypto broadcast interval
    pub fn broadcast_due(&mut self) -> bool {
        if self.broadcast_timer >= crypto::BROADCAST_INTERVAL {
            self.broadcast_timer -= crypto::BROADCAST_INTERVAL;
            true
        } else {
            false
        }
    }

    /// Damage award: floor(damage * value), x10 when the victim is a
    /// commander
    pub fn award_damage(&self, player: &mut Player, damage: f32, victim_is_commander: bool) -> i64 {
        let mut amount = (damage * crypto::DAMAGE_VALUE).floor() as i64;
        if victim_is_commander {
            amount *= crypto::COMMANDER_MULTIPLIER;
        }
        credit(player, amount);
        amount
    }

    /// Kill bonus on a lethal hit, x10 for commanders
    pub fn award_kill(&self, player: &mut Player, victim_is_commander: bool) -> i64 {
        let mut amount = crypto::KILL_BONUS;
        if victim_is_commander {
            amount *= crypto::COMMANDER_MULTIPLIER;
        }
        credit(player, amount);
        amount
    }

    /// Tic-contribution tier by cluster size
    pub fn tic_award_amount(tile_count: usize) -> i64 {
        if tile_count <= crypto::SMALL_MAX_TILES {
            crypto::TIC_SMALL
        } else if tile_count <= crypto::MEDIUM_MAX_TILES {
            crypto::TIC_MEDIUM
        } else {
            crypto::TIC_LARGE
        }
    }

    pub fn award_tic(&self, player: &mut Player, tile_count: usize) -> i64 {
        let amount = Self::tic_award_amount(tile_count);
        credit(player, amount);
        amount
    }

    /// Holding award for standing in a cluster owned by your faction
    pub fn award_holding(&self, player: &mut Player) -> i64 {
        credit(player, crypto::HOLDING_VALUE);
        crypto::HOLDING_VALUE
    }

    /// Cost of a cannon shot at the given charge power
    pub fn fire_cost(power: f32) -> i64 {
        let power = power.clamp(0.0, crate::game::constants::cannon::MAX_POWER);
        crypto::FIRE_BASE_COST + power.ceil() as i64
    }

    /// Deduct the fire cost, or reject if it would pierce the debt floor.
    /// Balances may run negative down to the floor ("on loan").
    pub fn try_spend_fire(&self, player: &mut Player, power: f32) -> Result<i64, EconomyError> {
        let cost = Self::fire_cost(power);
        if player.crypto - cost < crypto::DEBT_FLOOR {
            return Err(EconomyError::InsufficientFunds);
        }
        player.crypto -= cost;
        Ok(cost)
    }

    /// Commander tip transfer. The caller has already verified the sender
    /// holds the commander role.
    pub fn try_tip(
        &mut self,
        from: &mut Player,
        to: &mut Player,
        amount: i64,
    ) -> Result<(), EconomyError> {
        if amount <= 0 {
            return Err(EconomyError::NonPositiveAmount);
        }
        if amount > crypto::TIP_MAX {
            return Err(EconomyError::TipTooLarge);
        }
        if let Some(&last) = self.tip_last.get(&from.id) {
            if self.clock - last < crypto::TIP_COOLDOWN {
                return Err(EconomyError::TipRateLimited);
            }
        }
        if from.crypto - amount < crypto::DEBT_FLOOR {
            return Err(EconomyError::InsufficientFunds);
        }

        from.crypto -= amount;
        credit(to, amount);
        self.tip_last.insert(from.id, self.clock);
        Ok(())
    }

    pub fn forget_player(&mut self, id: PlayerId) {
        self.tip_last.remove(&id);
    }

    /// A player at the debt floor is "on loan"
    pub fn on_loan(player: &Player) -> bool {
        player.crypto <= crypto::DEBT_FLOOR
    }
}

fn credit(player: &mut Player, amount: i64) {
    player.crypto += amount;
    player.total_crypto += amount;
}

/// Crypto needed to reach a level: base * growth^level
pub fn crypto_for_level(level: u32) -> i64 {
    (crypto::LEVEL_BASE * crypto::LEVEL_GROWTH.powi(level as i32)).round() as i64
}

/// Level recomputed from lifetime earnings each broadcast
pub fn level_for_total(total: i64) -> u32 {
    let mut level = 0;
    while crypto_for_level(level + 1) <= total && level < 60 {
        level += 1;
    }
    level
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::Faction;
    use uuid::Uuid;

    fn player() -> Player {
        Player::new(Uuid::new_v4(), "t".into(), Faction::Rust, 0)
    }

    #[test]
    fn test_damage_award_floor() {
        let engine = EconomyEngine::new();
        let mut p = player();
        let amount = engine.award_damage(&mut p, 25.0, false);
        assert_eq!(amount, 5);
        assert_eq!(p.crypto, 5);
        assert_eq!(p.total_crypto, 5);
    }

    #[test]
    fn test_commander_damage_multiplier() {
        let engine = EconomyEngine::new();
        let mut p = player();
        let amount = engine.award_damage(&mut p, 25.0, true);
        assert_eq!(amount, 50);
    }

    #[test]
    fn test_kill_bonus() {
        let engine = EconomyEngine::new();
        let mut p = player();
        assert_eq!(engine.award_kill(&mut p, false), crypto::KILL_BONUS);
        assert_eq!(
            engine.award_kill(&mut p, true),
            crypto::KILL_BONUS * crypto::COMMANDER_MULTIPLIER
        );
    }

    #[test]
    fn test_tic_award_tiers() {
        assert_eq!(EconomyEngine::tic_award_amount(8), crypto::TIC_SMALL);
        assert_eq!(EconomyEngine::tic_award_amount(15), crypto::TIC_MEDIUM);
        assert_eq!(EconomyEngine::tic_award_amount(24), crypto::TIC_LARGE);
    }

    #[test]
    fn test_fire_cost_scales_with_power() {
        assert_eq!(EconomyEngine::fire_cost(0.0), 5);
        assert_eq!(EconomyEngine::fire_cost(0.5), 6);
        assert_eq!(EconomyEngine::fire_cost(10.0), 15);
    }

    #[test]
    fn test_fire_allowed_into_debt() {
        let engine = EconomyEngine::new();
        let mut p = player();
        p.crypto = 0;
        assert!(engine.try_spend_fire(&mut p, 0.0).is_ok());
        assert_eq!(p.crypto, -5);
    }

    #[test]
    fn test_fire_denied_at_debt_floor() {
        let engine = EconomyEngine::new();
        let mut p = player();
        p.crypto = crypto::DEBT_FLOOR + 2;
        assert_eq!(
            engine.try_spend_fire(&mut p, 0.0),
            Err(EconomyError::InsufficientFunds)
        );
        // Balance untouched on denial
        assert_eq!(p.crypto, crypto::DEBT_FLOOR + 2);
    }

    #[test]
    fn test_tip_transfers_balance() {
        let mut engine = EconomyEngine::new();
        let mut from = player();
        let mut to = player();
        from.crypto = 100;

        engine.try_tip(&mut from, &mut to, 40).unwrap();
        assert_eq!(from.crypto, 60);
        assert_eq!(to.crypto, 40);
    }

    #[test]
    fn test_tip_rate_limited() {
        let mut engine = EconomyEngine::new();
        let mut from = player();
        let mut to = player();
        from.crypto = 1000;

        engine.try_tip(&mut from, &mut to, 10).unwrap();
        assert_eq!(
            engine.try_tip(&mut from, &mut to, 10),
            Err(EconomyError::TipRateLimited)
        );

        // Advance past the cooldown
        for _ in 0..((crypto::TIP_COOLDOWN / 0.05) as usize + 1) {
            engine.tick(0.05);
        }
        assert!(engine.try_tip(&mut from, &mut to, 10).is_ok());
    }

    #[test]
    fn test_tip_limits() {
        let mut engine = EconomyEngine::new();
        let mut from = player();
        let mut to = player();
        from.crypto = 10_000;

        assert_eq!(
            engine.try_tip(&mut from, &mut to, crypto::TIP_MAX + 1),
            Err(EconomyError::TipTooLarge)
        );
        assert_eq!(
            engine.try_tip(&mut from, &mut to, 0),
            Err(EconomyError::NonPositiveAmount)
        );
    }

    #[test]
    fn test_level_curve_monotonic() {
        assert_eq!(level_for_total(0), 0);
        assert_eq!(level_for_total(crypto_for_level(1)), 1);
        let mut last = 0;
        for total in [0, 200, 500, 1000, 5000, 50_000] {
            let level = level_for_total(total);
            assert!(level >= last);
            last = level;
        }
    }

    #[test]
    fn test_ledger_awards_minus_spends_equals_balance() {
        let mut engine = EconomyEngine::new();
        let mut p = player();
        let mut awards: i64 = 0;
        let mut spends: i64 = 0;

        awards += engine.award_damage(&mut p, 60.0, false);
        awards += engine.award_kill(&mut p, false);
        awards += engine.award_tic(&mut p, 10);
        awards += engine.award_holding(&mut p);
        spends += engine.try_spend_fire(&mut p, 4.0).unwrap();
        engine.tick(crypto::TIP_COOLDOWN + 1.0);
        let mut other = player();
        engine.try_tip(&mut p, &mut other, 7).unwrap();
        spends += 7;

        assert_eq!(p.crypto, awards - spends);
        assert_eq!(p.total_crypto, awards);
    }

    #[test]
    fn test_periodic_timers() {
        let mut engine = EconomyEngine::new();
        let mut holding_fires = 0;
        let mut broadcast_fires = 0;
        // 61 simulated seconds at 20 Hz
        for _ in 0..(61 * 20) {
            engine.tick(0.05);
            if engine.holding_due() {
                holding_fires += 1;
            }
            if engine.broadcast_due() {
                broadcast_fires += 1;
            }
        }
        assert_eq!(holding_fires, 1);
        assert_eq!(broadcast_fires, 12);
    }
}
