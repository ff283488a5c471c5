use std::net::IpAddr;

use crate::game::constants::{bots, tick, world};
use crate::worldgen::WorldParams;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind both the transport and the admin HTTP server to
    pub bind_address: IpAddr,
    /// WebTransport port
    pub port: u16,
    /// Admin REST + metrics HTTP port
    pub http_port: u16,
    /// Simulation tick rate in Hz
    pub tick_rate: u32,
    /// World generation seed
    pub world_seed: u64,
    /// Terrain elevation seed
    pub terrain_seed: u64,
    /// Icosphere subdivision count
    pub subdivision: u32,
    /// Humans + bots population target
    pub total_tanks: usize,
    /// Sponsor manifest path
    pub sponsors_path: String,
    /// Directory for baked sponsor textures
    pub textures_dir: String,
    /// Directory for the JSON profile store
    pub profiles_dir: String,
    /// Directory for TLS material (generated when absent)
    pub certs_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".parse().expect("static address parses"),
            port: 4433,
            http_port: 8080,
            tick_rate: tick::RATE,
            world_seed: 1,
            terrain_seed: 1,
            subdivision: world::SUBDIVISION,
            total_tanks: bots::TOTAL_TANKS,
            sponsors_path: "sponsors.json".into(),
            textures_dir: "sponsor-textures".into(),
            profiles_dir: "profiles".into(),
            certs_dir: "certs".into(),
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        fn env_parse<T: std::str::FromStr>(key: &str, into: &mut T) {
            if let Ok(raw) = std::env::var(key) {
                if let Ok(parsed) = raw.parse() {
                    *into = parsed;
                }
            }
        }

        env_parse("BIND_ADDRESS", &mut config.bind_address);
        env_parse("PORT", &mut config.port);
        env_parse("HTTP_PORT", &mut config.http_port);
        env_parse("TICK_RATE", &mut config.tick_rate);
        env_parse("WORLD_SEED", &mut config.world_seed);
        env_parse("TERRAIN_SEED", &mut config.terrain_seed);
        env_parse("SUBDIVISION", &mut config.subdivision);
        env_parse("TOTAL_TANKS", &mut config.total_tanks);
        env_parse("SPONSORS_PATH", &mut config.sponsors_path);
        env_parse("TEXTURES_DIR", &mut config.textures_dir);
        env_parse("PROFILES_DIR", &mut config.profiles_dir);
        env_parse("CERTS_DIR", &mut config.certs_dir);

        config
    }

    pub fn world_params(&self) -> WorldParams {
        WorldParams {
            world_seed: self.world_seed,
            terrain_seed: self.terrain_seed,
            subdivision: self.subdivision,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 4433);
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.tick_rate, 20);
        assert_eq!(config.subdivision, world::SUBDIVISION);
    }

    #[test]
    fn test_world_params_from_config() {
        let mut config = ServerConfig::default();
        config.world_seed = 77;
        config.terrain_seed = 9;
        let params = config.world_params();
        assert_eq!(params.world_seed, 77);
        assert_eq!(params.terrain_seed, 9);
    }

    #[test]
    fn test_load_or_default() {
        let config = ServerConfig::load_or_default();
        assert!(config.port > 0);
    }
}
