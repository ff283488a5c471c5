/// Tick loop constants
pub mod tick {
    /// Server tick rate in Hz
    pub const RATE: u32 = 20;
    /// Delta time per tick in seconds
    pub const DT: f32 = 1.0 / RATE as f32;
    /// Tick duration in milliseconds
    pub const DURATION_MS: u64 = 1000 / RATE as u64;
    /// Maximum client-reported dt accepted per input frame (seconds).
    /// Anything larger is protocol misuse and is rejected.
    pub const INPUT_DT_CAP: f32 = 0.25;
    /// Maximum pending inputs buffered per player; oldest are dropped beyond
    /// this
    pub const PENDING_INPUT_CAP: usize = 32;
}

/// Planet and orbital-body constants
pub mod world {
    /// Planet radius in world units. All surface distances are relative to
    /// this.
    pub const RADIUS: f32 = 200.0;
    /// Icosphere subdivision count (tiles = 10 * 4^n + 2)
    pub const SUBDIVISION: u32 = 4;
    /// Planet self-rotation in radians per second (clients soft-correct to
    /// the broadcast value)
    pub const ROTATION_RATE: f32 = 0.005;
    /// Moon orbital rates in radians per second, one per moon slot
    pub const MOON_RATES: [f32; 3] = [0.020, 0.013, 0.008];
    /// Space station orbital rate in radians per second
    pub const STATION_RATE: f32 = 0.050;
    /// Space station orbit inclination in radians
    pub const STATION_INCLINATION: f32 = 0.4;
}

/// Tank constants
pub mod tank {
    /// Hit points at spawn
    pub const MAX_HP: i32 = 100;
    /// Forward speed at full throttle (world units per second)
    pub const MAX_SPEED: f32 = 14.0;
    /// Reverse speed (world units per second)
    pub const REVERSE_SPEED: f32 = 7.0;
    /// Turn rate at full deflection (radians per second)
    pub const TURN_RATE: f32 = 1.8;
    /// Oriented-box half-length for hit tests (world units)
    pub const HALF_LENGTH: f32 = 3.5;
    /// Oriented-box half-width for hit tests (world units)
    pub const HALF_WIDTH: f32 = 3.0;
    /// Quick-reject radius around a tank before the oriented-box test
    pub const BROAD_RADIUS: f32 = 6.0;
    /// Seconds a deploy animation holds a freshly-portaled tank out of
    /// capture presence
    pub const DEPLOY_DURATION: f32 = 1.5;
}

/// Cannon and projectile constants
pub mod cannon {
    /// Base damage at zero charge
    pub const BASE_DAMAGE: f32 = 25.0;
    /// Base muzzle speed (world units per second)
    pub const BASE_SPEED: f32 = 60.0;
    /// Base range (world units)
    pub const BASE_RANGE: f32 = 70.0;
    /// Charge power is reported by the client in [0, MAX_POWER]
    pub const MAX_POWER: f32 = 10.0;
    /// Full charge multiplies speed by (1 + SPEED_GAIN)
    pub const SPEED_GAIN: f32 = 1.0;
    /// Full charge multiplies range by (1 + RANGE_GAIN)
    pub const RANGE_GAIN: f32 = 2.0;
    /// Full charge multiplies damage by (1 + DAMAGE_GAIN)
    pub const DAMAGE_GAIN: f32 = 2.0;
    /// Hard projectile lifetime in seconds
    pub const MAX_LIFETIME: f32 = 6.0;
    /// In-flight projectiles allowed per owner; extra fires are dropped
    /// silently
    pub const PER_OWNER_CAP: usize = 8;
}

/// Capture tug-of-war constants
pub mod capture {
    /// Tics accumulated per second per present tank
    pub const TICS_PER_SECOND_PER_TANK: f32 = 1.0;
    /// Full capture snapshot is pushed to the bot worker every this many
    /// ticks
    pub const WORKER_SNAPSHOT_INTERVAL: u64 = 50;
    /// capture-progress messages for a player's current cluster, in ticks
    pub const PROGRESS_INTERVAL_TICKS: u64 = 10;
    /// Sponsor hold timer ceiling in seconds
    pub const SPONSOR_HOLD_MAX: f32 = 600.0;
    /// Hold seconds gained per second of sustained single-faction presence
    pub const SPONSOR_HOLD_EXTEND_RATE: f32 = 2.0;
}

/// Crypto economy constants
pub mod crypto {
    /// Crypto per point of damage dealt (awarded as floor(damage * value))
    pub const DAMAGE_VALUE: f32 = 0.2;
    /// Flat bonus on a lethal hit
    pub const KILL_BONUS: i64 = 50;
    /// Multiplier when the damaged or killed target is a commander
    pub const COMMANDER_MULTIPLIER: i64 = 10;
    /// Tic-contribution award for small clusters (tiles <= SMALL_MAX_TILES)
    pub const TIC_SMALL: i64 = 2;
    /// Tic-contribution award for medium clusters
    pub const TIC_MEDIUM: i64 = 3;
    /// Tic-contribution award for large clusters (tiles > MEDIUM_MAX_TILES)
    pub const TIC_LARGE: i64 = 5;
    pub const SMALL_MAX_TILES: usize = 12;
    pub const MEDIUM_MAX_TILES: usize = 20;
    /// Holding award per interval when standing in a cluster owned by your
    /// faction
    pub const HOLDING_VALUE: i64 = 10;
    /// Holding award interval in seconds
    pub const HOLDING_INTERVAL: f32 = 60.0;
    /// Base cost of a cannon shot; total cost is BASE + ceil(power)
    pub const FIRE_BASE_COST: i64 = 5;
    /// Largest single commander tip
    pub const TIP_MAX: i64 = 500;
    /// Seconds between tips from the same commander
    pub const TIP_COOLDOWN: f32 = 10.0;
    /// Balances may go negative down to this floor ("on loan")
    pub const DEBT_FLOOR: i64 = -500;
    /// Level curve: crypto_for_level(l) = LEVEL_BASE * LEVEL_GROWTH^l
    pub const LEVEL_BASE: f64 = 100.0;
    pub const LEVEL_GROWTH: f64 = 1.5;
    /// Compact all-player balance broadcast interval in seconds
    pub const BROADCAST_INTERVAL: f32 = 5.0;
}

/// Bot fleet constants
pub mod bots {
    /// Target humans + bots population
    pub const TOTAL_TANKS: usize = 24;
    /// Bot cruise speed (world units per second)
    pub const SPEED: f32 = 11.0;
    /// Bot fire cooldown in seconds
    pub const FIRE_COOLDOWN: f32 = 2.5;
    /// Bot engagement range (world units)
    pub const ENGAGE_RANGE: f32 = 50.0;
    /// Bot respawn delay in seconds
    pub const RESPAWN_DELAY: f32 = 5.0;
    /// Seconds between bot retarget decisions
    pub const DECISION_INTERVAL: f32 = 3.0;
    /// Missed worker outputs are logged every this many occurrences
    pub const MISSED_TICK_LOG_INTERVAL: u64 = 100;
    /// Floats per bot in the packed position buffer:
    /// theta, phi, heading, speed, flags, cluster
    pub const POSITION_STRIDE: usize = 6;
}

/// Commander constants
pub mod commander {
    /// Periodic full commander state sync interval in seconds
    pub const SYNC_INTERVAL: f32 = 5.0;
    /// Maximum points accepted in one commander drawing
    pub const DRAW_MAX_POINTS: usize = 256;
}

/// World generation constants
pub mod worldgen {
    /// Smallest cluster size in tiles
    pub const CLUSTER_MIN_TILES: usize = 8;
    /// Largest cluster size in tiles
    pub const CLUSTER_MAX_TILES: usize = 24;
    /// Number of deploy portals placed on the planet
    pub const PORTAL_COUNT: usize = 12;
    /// Every cluster must have a portal within this many tile hops
    pub const PORTAL_MAX_HOPS: u32 = 20;
    /// Elevation field is clamped to +/- this many world units
    pub const ELEVATION_RANGE: f32 = 6.0;
    /// Perlin frequency applied to unit-sphere sample points
    pub const ELEVATION_FREQUENCY: f64 = 2.4;
    /// Tile-lookup grid resolution (theta x phi)
    pub const LOOKUP_THETA_CELLS: usize = 128;
    pub const LOOKUP_PHI_CELLS: usize = 64;
}

/// Chat constants
pub mod chat {
    /// Maximum chat message length; longer messages are rejected
    pub const MAX_LEN: usize = 240;
    /// Proximity chat radius in world units
    pub const PROXIMITY_RADIUS: f32 = 40.0;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_timing_consistent() {
        assert_eq!(tick::DURATION_MS, 50);
        assert!((tick::DT - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_full_charge_damage_triples() {
        let full = cannon::BASE_DAMAGE * (1.0 + cannon::DAMAGE_GAIN);
        assert_eq!(full.round() as i32, 75);
    }

    #[test]
    fn test_cluster_size_bounds_sane() {
        assert!(worldgen::CLUSTER_MIN_TILES < worldgen::CLUSTER_MAX_TILES);
        assert!(crypto::SMALL_MAX_TILES < crypto::MEDIUM_MAX_TILES);
    }
}
