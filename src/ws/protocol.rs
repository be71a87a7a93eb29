//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::game::arena::MapConfig;
use crate::game::combat::WeaponKind;
use crate::game::physics::Vec2;
use crate::game::r#match::MatchPhase;
use crate::game::tank::InputState;
use crate::game::{Command, PlayerId};

/// Client message type tags
pub const MSG_INPUT: &str = "input";
pub const MSG_FIRE: &str = "fire";
pub const MSG_SWITCH_WEAPON: &str = "switch_weapon";

/// Tagged envelope every client frame arrives in
#[derive(Debug, Deserialize)]
pub struct ClientEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SwitchWeaponPayload {
    weapon: WeaponKind,
}

/// Protocol decode errors
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("Malformed {kind} payload: {source}")]
    Payload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Missing payload for {0}")]
    MissingPayload(&'static str),
}

/// Decode one client frame.
///
/// Returns `Ok(None)` for message types the server does not handle.
pub fn decode_client_msg(text: &str) -> Result<Option<Command>, ProtocolError> {
    let envelope: ClientEnvelope = serde_json::from_str(text).map_err(ProtocolError::Envelope)?;

    let command = match envelope.kind.as_str() {
        MSG_INPUT => {
            let payload = envelope
                .payload
                .ok_or(ProtocolError::MissingPayload(MSG_INPUT))?;
            let input: InputState =
                serde_json::from_value(payload).map_err(|source| ProtocolError::Payload {
                    kind: MSG_INPUT,
                    source,
                })?;
            Command::SetInput(input)
        }
        MSG_FIRE => Command::Fire,
        MSG_SWITCH_WEAPON => {
            let payload = envelope
                .payload
                .ok_or(ProtocolError::MissingPayload(MSG_SWITCH_WEAPON))?;
            let switch: SwitchWeaponPayload =
                serde_json::from_value(payload).map_err(|source| ProtocolError::Payload {
                    kind: MSG_SWITCH_WEAPON,
                    source,
                })?;
            Command::SwitchWeapon(switch.weapon)
        }
        _ => return Ok(None),
    };

    Ok(Some(command))
}

/// Messages sent from server to client as `{type, payload}`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Connection accepted into a session
    Connected(ConnectedPayload),

    /// Session roster changed
    LobbyInfo(LobbyInfoPayload),

    /// Request rejected
    Error(ErrorPayload),
}

impl ServerMsg {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    pub player_id: PlayerId,
    pub lobby_code: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyInfoPayload {
    pub code: String,
    pub player_count: usize,
    pub max_players: usize,
    pub state: MatchPhase,
    pub players: Vec<PlayerId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Full match snapshot, sent flat as `{"type": "game_state", ...}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "game_state", rename_all = "camelCase")]
pub struct GameSnapshot {
    pub state: MatchPhase,
    pub tanks: BTreeMap<PlayerId, TankView>,
    pub bullets: Vec<BulletView>,
    pub map: MapConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<PlayerId>,
}

/// Tank state in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TankView {
    pub id: PlayerId,
    pub position: Vec2,
    pub rotation: f32,
    pub turret_angle: f32,
    pub health: u32,
    pub max_health: u32,
    pub active_weapon: WeaponKind,
    pub mortar_ammo: u32,
    pub mortar_max_ammo: u32,
}

/// Wire name of a projectile kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BulletType {
    Normal,
    Mortar,
}

/// Projectile state in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulletView {
    pub id: u64,
    pub owner_id: PlayerId,
    pub position: Vec2,
    #[serde(rename = "type")]
    pub kind: BulletType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact_pos: Option<Vec2>,
    /// 0..1, mortar shells only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flight_progress: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact_radius: Option<f32>,
}

/// Serialize any outbound message into a text frame
pub fn encode<T: Serialize>(msg: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};
    use uuid::Uuid;

    #[test]
    fn decodes_input() {
        let text = r#"{"type":"input","payload":{"up":true,"down":false,"left":false,"right":true,"mouseX":320.5,"mouseY":200,"firing":true}}"#;
        let command = assert_ok!(decode_client_msg(text)).expect("known type");
        let Command::SetInput(input) = command else {
            panic!("expected input command, got {command:?}");
        };
        assert!(input.up && input.right && input.firing);
        assert!(!input.down && !input.left);
        assert_eq!(input.mouse_x, 320.5);
        assert_eq!(input.mouse_y, 200.0);
    }

    #[test]
    fn decodes_fire_with_or_without_payload() {
        let bare = assert_ok!(decode_client_msg(r#"{"type":"fire"}"#));
        assert!(matches!(bare, Some(Command::Fire)));
        let empty = assert_ok!(decode_client_msg(r#"{"type":"fire","payload":{}}"#));
        assert!(matches!(empty, Some(Command::Fire)));
    }

    #[test]
    fn decodes_switch_weapon() {
        let text = r#"{"type":"switch_weapon","payload":{"weapon":"mortar"}}"#;
        let command = assert_ok!(decode_client_msg(text));
        assert!(matches!(
            command,
            Some(Command::SwitchWeapon(WeaponKind::Mortar))
        ));
    }

    #[test]
    fn unknown_type_is_ignored() {
        let command = assert_ok!(decode_client_msg(r#"{"type":"dance","payload":{"x":1}}"#));
        assert!(command.is_none());
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(matches!(
            decode_client_msg("not json"),
            Err(ProtocolError::Envelope(_))
        ));
        assert!(matches!(
            decode_client_msg(r#"{"type":"switch_weapon","payload":{"weapon":"laser"}}"#),
            Err(ProtocolError::Payload { .. })
        ));
        assert!(matches!(
            decode_client_msg(r#"{"type":"input","payload":{"up":"yes"}}"#),
            Err(ProtocolError::Payload { .. })
        ));
        assert_err!(decode_client_msg(r#"{"type":"input"}"#));
    }

    #[test]
    fn server_messages_use_type_and_payload() {
        let id = Uuid::new_v4();
        let msg = ServerMsg::Connected(ConnectedPayload {
            player_id: id,
            lobby_code: "AB23".to_string(),
        });
        let value: Value = serde_json::from_str(&encode(&msg).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "connected", "payload": {"playerId": id.to_string(), "lobbyCode": "AB23"}})
        );

        let value: Value = serde_json::from_str(&encode(&ServerMsg::error("Lobby is full")).unwrap()).unwrap();
        assert_eq!(value, json!({"type": "error", "payload": {"message": "Lobby is full"}}));

        let info = ServerMsg::LobbyInfo(LobbyInfoPayload {
            code: "AB23".to_string(),
            player_count: 1,
            max_players: 2,
            state: MatchPhase::Waiting,
            players: vec![id],
        });
        let value: Value = serde_json::from_str(&encode(&info).unwrap()).unwrap();
        assert_eq!(value["type"], "lobby_info");
        assert_eq!(value["payload"]["playerCount"], 1);
        assert_eq!(value["payload"]["maxPlayers"], 2);
        assert_eq!(value["payload"]["state"], "waiting");
    }

    #[test]
    fn game_state_is_flat_and_omits_empty_fields() {
        let owner = Uuid::new_v4();
        let snapshot = GameSnapshot {
            state: MatchPhase::Playing,
            tanks: BTreeMap::new(),
            bullets: vec![BulletView {
                id: 7,
                owner_id: owner,
                position: Vec2::new(1.0, 2.0),
                kind: BulletType::Normal,
                impact_pos: None,
                flight_progress: None,
                impact_radius: None,
            }],
            map: MapConfig::default(),
            winner_id: None,
        };
        let value: Value = serde_json::from_str(&encode(&snapshot).unwrap()).unwrap();
        assert_eq!(value["type"], "game_state");
        assert_eq!(value["state"], "playing");
        assert_eq!(value["map"], json!({"width": 1200.0, "height": 800.0}));
        assert!(value.get("winnerId").is_none());

        let bullet = &value["bullets"][0];
        assert_eq!(bullet["type"], "normal");
        assert_eq!(bullet["ownerId"], owner.to_string());
        assert!(bullet.get("impactPos").is_none());
        assert!(bullet.get("flightProgress").is_none());
    }
}
