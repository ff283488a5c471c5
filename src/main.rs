use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info, Level};

use adlands_server::config::ServerConfig;
use adlands_server::game::room::{start_room_loop, GameRoom, RoomCommand, RoomConfig};
use adlands_server::metrics::Metrics;
use adlands_server::net::transport::GameServer;
use adlands_server::profile::{
    wipe_profiles, JsonProfileStore, ProfileStore, ProfileWriter, WIPE_BATCH_SIZE,
};
use adlands_server::sponsor::admin::start_admin_server;
use adlands_server::sponsor::store::SponsorStore;
use adlands_server::worldgen::GeneratedWorld;

#[derive(Parser)]
#[command(name = "adlands-server", version, about = "Authoritative AdLands game server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Delete every profile in external storage, in batches
    WipeProfiles,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load_or_default();

    if let Some(Command::WipeProfiles) = cli.command {
        return run_wipe(&config);
    }

    info!("AdLands server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "transport {}:{}, http {}:{}, seeds {}/{}",
        config.bind_address,
        config.port,
        config.bind_address,
        config.http_port,
        config.world_seed,
        config.terrain_seed
    );

    let metrics = Arc::new(Metrics::new());

    // World generation inconsistencies are fatal: a broken planet must not
    // serve
    let planet = Arc::new(GeneratedWorld::generate(config.world_params())?);
    info!(
        "planet ready: {} tiles, {} clusters, {} portals",
        planet.tiles.len(),
        planet.clusters.len(),
        planet.portals.len()
    );

    let sponsor_store = Arc::new(SponsorStore::load_or_default(
        &config.sponsors_path,
        &config.textures_dir,
    )?);

    let profile_store = Arc::new(JsonProfileStore::new(&config.profiles_dir)?);
    let profile_writer = Arc::new(ProfileWriter::new(
        profile_store.clone() as Arc<dyn ProfileStore>
    ));
    profile_writer.clone().spawn_flusher();

    let (room, handle) = GameRoom::new(
        RoomConfig {
            dt: 1.0 / config.tick_rate as f32,
            total_tanks: config.total_tanks,
            bot_seed: config.world_seed,
        },
        planet,
        sponsor_store.cluster_sponsor_ids(),
        metrics.clone(),
        Some(profile_writer),
    );

    // Admin mutations reach the room through its command queue
    {
        let hook_handle = handle.clone();
        sponsor_store.set_reload_hook(Box::new(move |wire| {
            hook_handle.post(RoomCommand::SponsorsReloaded(wire));
        }));
    }
    // Seed the room with the persisted sponsor roster
    handle.post(RoomCommand::SponsorsReloaded(sponsor_store.wire()));

    start_room_loop(room);

    {
        let store = sponsor_store.clone();
        let metrics = metrics.clone();
        let textures_dir = std::path::PathBuf::from(&config.textures_dir);
        let http_bind = std::net::SocketAddr::new(config.bind_address, config.http_port);
        tokio::spawn(async move {
            if let Err(e) = start_admin_server(store, metrics, textures_dir, http_bind).await {
                // Cannot-bind is fatal; a half-up server is worse than none
                error!("admin server error: {}", e);
                std::process::exit(1);
            }
        });
    }

    let server = GameServer::new(
        config,
        handle,
        profile_store as Arc<dyn ProfileStore>,
        metrics,
    )
    .await?;
    info!("certificate hash: {}", server.cert_hash());

    let shutdown = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
        info!("shutdown signal received");
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("server error: {}", e);
            }
        }
        _ = shutdown => {
            info!("shutting down");
        }
    }

    Ok(())
}

fn run_wipe(config: &ServerConfig) -> anyhow::Result<()> {
    let store = JsonProfileStore::new(&config.profiles_dir)?;
    match wipe_profiles(&store, WIPE_BATCH_SIZE) {
        Ok(summary) => {
            println!(
                "wiped {} profiles in {} batches",
                summary.deleted, summary.batches
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("wipe failed: {:#}", e);
            std::process::exit(1);
        }
    }
}
