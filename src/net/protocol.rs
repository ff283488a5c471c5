//! Wire protocol: JSON events exchanged with clients.
//!
//! Every message is an envelope `{"e": "<event-name>", "d": {...}}` with
//! kebab-case event names. Broadcast player fields use the one-letter keys
//! the deployed clients expect (`t,p,h,s,ta,hp,d,f,r,seq,pr,ma,sa,bg`);
//! those keys are interop surface and must not change.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::game::state::{Faction, LifeState, Player, PlayerId, StationParams};
use crate::worldgen::WorldDescription;

/// Input key bitmask
pub mod keys {
    pub const FORWARD: u8 = 1;
    pub const BACK: u8 = 1 << 1;
    pub const LEFT: u8 = 1 << 2;
    pub const RIGHT: u8 = 1 << 3;
}

/// One client input frame, replayed server-side in sequence order
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InputFrame {
    pub seq: u64,
    pub keys: u8,
    #[serde(rename = "turretAngle")]
    pub turret_angle: f32,
    pub dt: f32,
}

/// Chat routing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    Lobby,
    Proximity,
    Global,
}

/// Messages from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "e", content = "d", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Connection handshake; must be the first message on a connection
    Join {
        name: String,
        #[serde(default)]
        uid: Option<String>,
        #[serde(default)]
        faction: Option<Faction>,
    },
    Input(InputFrame),
    Fire {
        power: f32,
        #[serde(rename = "turretAngle")]
        turret_angle: f32,
    },
    ChoosePortal {
        #[serde(rename = "tileIndex")]
        tile_index: u32,
    },
    /// Client-pushed profile fields persisted on the debounced schedule
    Profile {
        #[serde(default)]
        badges: Vec<String>,
        #[serde(rename = "totalCrypto", default)]
        total_crypto: i64,
        #[serde(default)]
        title: Option<String>,
    },
    Chat {
        text: String,
        mode: ChatMode,
    },
    FactionChange {
        faction: Faction,
    },
    CommanderPing {
        x: f32,
        y: f32,
        z: f32,
        faction: Faction,
    },
    CommanderDraw {
        points: Vec<[f32; 3]>,
        done: bool,
    },
    Tip {
        #[serde(rename = "toId")]
        to_id: PlayerId,
        amount: i64,
    },
}

/// Per-tank state inside the tick broadcast, one-letter keys for interop
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerWire {
    #[serde(rename = "t")]
    pub theta: f32,
    #[serde(rename = "p")]
    pub phi: f32,
    #[serde(rename = "h")]
    pub heading: f32,
    #[serde(rename = "s")]
    pub speed: f32,
    #[serde(rename = "ta")]
    pub turret_angle: f32,
    pub hp: i32,
    /// 0 = alive, 1 = dead, 2 = waiting for portal
    pub d: u8,
    #[serde(rename = "f")]
    pub faction: Faction,
    #[serde(rename = "r")]
    pub rank: u32,
    pub seq: u64,
}

impl PlayerWire {
    pub fn of(player: &Player) -> Self {
        Self {
            theta: player.pos.theta,
            phi: player.pos.phi,
            heading: player.heading,
            speed: player.speed,
            turret_angle: player.turret_angle,
            hp: player.hp,
            d: player.life.to_wire(),
            faction: player.faction,
            rank: player.rank,
            seq: player.last_input_seq,
        }
    }
}

/// The periodic tick broadcast. The full players map is always sent; the
/// human count is small and the cost is constant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateBroadcast {
    pub players: HashMap<String, PlayerWire>,
    /// Bot states, same shape
    pub bg: HashMap<String, PlayerWire>,
    /// Planet rotation in radians
    pub pr: f32,
    /// Moon orbital angles
    pub ma: [f32; 3],
    /// Space-station orbital parameters
    pub sa: StationParams,
}

/// Tic counts keyed by faction name
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TicsWire {
    pub rust: f32,
    pub cobalt: f32,
    pub viridian: f32,
}

impl TicsWire {
    pub fn from_array(tics: [f32; 3]) -> Self {
        Self {
            rust: tics[0],
            cobalt: tics[1],
            viridian: tics[2],
        }
    }
}

/// One cluster's capture state on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterUpdate {
    pub id: u16,
    /// null | "rust" | "cobalt" | "viridian" | "sponsor-<id>"
    pub owner: Option<String>,
    pub tics: TicsWire,
    pub cap: f32,
}

/// Commander state on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommanderWire {
    pub faction: Faction,
    #[serde(rename = "playerId")]
    pub player_id: Option<String>,
    pub acting: bool,
    pub since: u64,
}

/// Minimal peer info in the welcome packet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "f")]
    pub faction: Faction,
    pub d: u8,
}

/// Deploy pose carried by portal-confirmed and player-activated
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeployPose {
    pub t: f32,
    pub p: f32,
    pub h: f32,
}

/// One sponsor as clients see it: always a baked URL, never base64
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SponsorWire {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tagline: Option<String>,
    #[serde(rename = "linkUrl", skip_serializing_if = "Option::is_none")]
    pub link_url: Option<String>,
    #[serde(rename = "patternUrl", skip_serializing_if = "Option::is_none")]
    pub pattern_url: Option<String>,
}

/// Full sponsor roster pushed on live reload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SponsorsWire {
    pub moons: HashMap<String, SponsorWire>,
    pub billboards: HashMap<String, SponsorWire>,
    pub clusters: HashMap<String, SponsorWire>,
}

/// The first message every connection receives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomePacket {
    pub id: String,
    pub name: String,
    #[serde(rename = "f")]
    pub faction: Faction,
    pub world: WorldDescription,
    pub capture: Vec<ClusterUpdate>,
    pub commanders: Vec<CommanderWire>,
    pub players: Vec<PeerInfo>,
    pub sponsors: SponsorsWire,
    pub crypto: i64,
    #[serde(rename = "r")]
    pub rank: u32,
}

/// Messages from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "e", content = "d", rename_all = "kebab-case")]
pub enum ServerMessage {
    Welcome(Box<WelcomePacket>),
    PortalConfirmed(DeployPose),
    PortalFailed {
        reason: String,
    },
    State(StateBroadcast),
    PlayerFired {
        id: String,
        t: f32,
        p: f32,
        h: f32,
        power: f32,
        size: f32,
        #[serde(rename = "projectileId")]
        projectile_id: u64,
    },
    FireFailed {
        reason: String,
    },
    PlayerHit {
        #[serde(rename = "attackerId")]
        attacker_id: String,
        #[serde(rename = "targetId")]
        target_id: String,
        damage: i32,
        hp_after: i32,
    },
    PlayerKilled {
        #[serde(rename = "victimId")]
        victim_id: String,
        #[serde(rename = "killerId")]
        killer_id: String,
        #[serde(rename = "killerFaction")]
        killer_faction: Faction,
    },
    PlayerJoined {
        id: String,
        name: String,
        #[serde(rename = "f")]
        faction: Faction,
    },
    PlayerLeft {
        id: String,
        name: String,
    },
    PlayerActivated {
        id: String,
        pose: DeployPose,
    },
    PlayerFactionChanged {
        id: String,
        faction: Faction,
    },
    FactionChangeFailed {
        reason: String,
    },
    TerritoryUpdate {
        changes: Vec<ClusterUpdate>,
    },
    CaptureProgress {
        id: u16,
        tics: TicsWire,
        cap: f32,
        owner: Option<String>,
        momentum: [f32; 3],
    },
    SponsorsReloaded(SponsorsWire),
    CommanderUpdate(CommanderWire),
    CommanderSync {
        commanders: Vec<CommanderWire>,
    },
    CommanderPing {
        x: f32,
        y: f32,
        z: f32,
        faction: Faction,
        #[serde(rename = "fromId")]
        from_id: String,
    },
    CommanderDrawing {
        faction: Faction,
        points: Vec<[f32; 3]>,
        done: bool,
        #[serde(rename = "fromId")]
        from_id: String,
    },
    TipConfirmed {
        #[serde(rename = "toId")]
        to_id: String,
        amount: i64,
        balance: i64,
    },
    TipFailed {
        reason: String,
    },
    TipReceived {
        #[serde(rename = "fromId")]
        from_id: String,
        amount: i64,
    },
    CryptoUpdate {
        balances: HashMap<String, i64>,
    },
    TicCrypto {
        id: String,
        cluster: u16,
        amount: i64,
        balance: i64,
    },
    HoldingCrypto {
        id: String,
        amount: i64,
        balance: i64,
    },
    ChatMessage {
        id: String,
        name: String,
        text: String,
        mode: ChatMode,
    },
    TuskChat {
        text: String,
    },
}

/// Encode a message for the wire
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(msg)
}

/// Decode a message from the wire
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(bytes)
}

impl LifeState {
    /// Convenience for wire tests
    pub fn from_wire(d: u8) -> Option<LifeState> {
        match d {
            0 => Some(LifeState::Alive),
            1 => Some(LifeState::Dead),
            2 => Some(LifeState::WaitingForPortal),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_envelope_event_names_are_kebab() {
        let msg = ServerMessage::PlayerKilled {
            victim_id: "b".into(),
            killer_id: "a".into(),
            killer_faction: Faction::Rust,
        };
        let json: serde_json::Value = serde_json::from_slice(&encode(&msg).unwrap()).unwrap();
        assert_eq!(json["e"], "player-killed");
        assert_eq!(json["d"]["victimId"], "b");
        assert_eq!(json["d"]["killerFaction"], "rust");
    }

    #[test]
    fn test_input_event_roundtrip() {
        let raw = br#"{"e":"input","d":{"seq":12,"keys":5,"turretAngle":1.5,"dt":0.05}}"#;
        let msg: ClientMessage = decode(raw).unwrap();
        match msg {
            ClientMessage::Input(frame) => {
                assert_eq!(frame.seq, 12);
                assert_eq!(frame.keys, keys::FORWARD | keys::LEFT);
                assert!((frame.dt - 0.05).abs() < 1e-6);
            }
            other => panic!("expected input, got {:?}", other),
        }
    }

    #[test]
    fn test_choose_portal_event_name() {
        let raw = br#"{"e":"choose-portal","d":{"tileIndex":7}}"#;
        let msg: ClientMessage = decode(raw).unwrap();
        assert!(matches!(msg, ClientMessage::ChoosePortal { tile_index: 7 }));
    }

    #[test]
    fn test_player_wire_one_letter_keys() {
        let mut player = Player::new(Uuid::new_v4(), "x".into(), Faction::Cobalt, 0);
        player.last_input_seq = 42;
        player.rank = 3;
        let wire = PlayerWire::of(&player);
        let json: serde_json::Value = serde_json::from_slice(&encode(&wire).unwrap()).unwrap();
        for key in ["t", "p", "h", "s", "ta", "hp", "d", "f", "r", "seq"] {
            assert!(json.get(key).is_some(), "missing wire key {}", key);
        }
        assert_eq!(json["seq"], 42);
        assert_eq!(json["f"], "cobalt");
        assert_eq!(json["d"], 2, "fresh players wait for a portal");
    }

    #[test]
    fn test_state_broadcast_envelope_keys() {
        let state = StateBroadcast {
            pr: 1.25,
            ma: [0.1, 0.2, 0.3],
            ..Default::default()
        };
        let json: serde_json::Value =
            serde_json::from_slice(&encode(&ServerMessage::State(state)).unwrap()).unwrap();
        assert_eq!(json["e"], "state");
        for key in ["players", "bg", "pr", "ma", "sa"] {
            assert!(json["d"].get(key).is_some(), "missing broadcast key {}", key);
        }
    }

    #[test]
    fn test_life_state_wire_values() {
        assert_eq!(LifeState::Alive.to_wire(), 0);
        assert_eq!(LifeState::Dead.to_wire(), 1);
        assert_eq!(LifeState::WaitingForPortal.to_wire(), 2);
        for d in 0..3 {
            assert_eq!(LifeState::from_wire(d).unwrap().to_wire(), d);
        }
        assert!(LifeState::from_wire(3).is_none());
    }

    #[test]
    fn test_client_message_rejects_unknown_event() {
        let raw = br#"{"e":"no-such-event","d":{}}"#;
        assert!(decode::<ClientMessage>(raw).is_err());
    }

    #[test]
    fn test_tip_uses_uuid() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"e":"tip","d":{{"toId":"{}","amount":25}}}}"#, id);
        let msg: ClientMessage = decode(raw.as_bytes()).unwrap();
        match msg {
            ClientMessage::Tip { to_id, amount } => {
                assert_eq!(to_id, id);
                assert_eq!(amount, 25);
            }
            other => panic!("expected tip, got {:?}", other),
        }
    }

    #[test]
    fn test_sponsor_wire_never_carries_base64_field() {
        let wire = SponsorWire {
            name: "acme".into(),
            tagline: None,
            link_url: None,
            pattern_url: Some("/sponsor-textures/billboard3.png".into()),
        };
        let json = String::from_utf8(encode(&wire).unwrap()).unwrap();
        assert!(json.contains("patternUrl"));
        assert!(!json.contains("patternImage"));
    }

    #[test]
    fn test_territory_update_owner_wire() {
        let update = ClusterUpdate {
            id: 4,
            owner: Some("sponsor-acme".into()),
            tics: TicsWire::from_array([1.0, 0.0, 2.0]),
            cap: 12.0,
        };
        let json: serde_json::Value = serde_json::from_slice(&encode(&update).unwrap()).unwrap();
        assert_eq!(json["owner"], "sponsor-acme");
        assert_eq!(json["tics"]["rust"], 1.0);
        assert_eq!(json["tics"]["viridian"], 2.0);
    }

    #[test]
    fn test_chat_mode_wire() {
        let raw = br#"{"e":"chat","d":{"text":"hello","mode":"proximity"}}"#;
        let msg: ClientMessage = decode(raw).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::Chat {
                mode: ChatMode::Proximity,
                ..
            }
        ));
    }
}
