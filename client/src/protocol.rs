use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::room::Participant;

/// Messages sent from the client to the room-coordination server.
///
/// Serialized as `{ "type": ..., "payload": ... }`; the `ts` field is added by
/// [`encode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    Join {
        room_id: String,
        participant: Participant,
    },
    RequestState {
        room_id: String,
    },
    Play {
        position_seconds: f64,
    },
    Pause {
        position_seconds: f64,
    },
    Seek {
        position_seconds: f64,
    },
    ProgressUpdate {
        position_seconds: f64,
    },
    Leave {
        room_id: String,
        participant_id: String,
    },
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Join { .. } => "join",
            ClientMessage::RequestState { .. } => "requestState",
            ClientMessage::Play { .. } => "play",
            ClientMessage::Pause { .. } => "pause",
            ClientMessage::Seek { .. } => "seek",
            ClientMessage::ProgressUpdate { .. } => "progressUpdate",
            ClientMessage::Leave { .. } => "leave",
        }
    }
}

/// Full room state, sent by the server after a `requestState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    #[serde(default)]
    pub current_video_id: Option<String>,
    #[serde(default)]
    pub position_seconds: f64,
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub last_updated_at: Option<u64>,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackAction {
    Play,
    Pause,
    Seek,
}

/// A play/pause/seek broadcast by the server on behalf of any participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackChange {
    pub action: PlaybackAction,
    pub position_seconds: f64,
    #[serde(default)]
    pub origin_id: Option<String>,
    #[serde(default)]
    pub video_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct ParticipantLeft {
    id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct ServerError {
    #[serde(default)]
    message: String,
}

/// Events received from the room-coordination server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    RoomStateSnapshot(RoomSnapshot),
    ParticipantJoined(Participant),
    ParticipantLeft { id: String },
    PlaybackChanged(PlaybackChange),
    Error { message: String },
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::RoomStateSnapshot(_) => "roomStateSnapshot",
            ServerEvent::ParticipantJoined(_) => "participantJoined",
            ServerEvent::ParticipantLeft { .. } => "participantLeft",
            ServerEvent::PlaybackChanged(_) => "playbackChanged",
            ServerEvent::Error { .. } => "error",
        }
    }
}

/// A decoded inbound envelope. `ts` is the server-assigned timestamp in ms.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub ts: u64,
    pub event: ServerEvent,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    ts: Option<u64>,
}

/// Serialize an outbound message with the sender's timestamp.
pub fn encode(message: &ClientMessage, ts: u64) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(message)?;
    if let Value::Object(map) = &mut value {
        map.insert("ts".to_string(), Value::from(ts));
    }
    serde_json::to_string(&value)
}

pub fn decode(text: &str) -> Result<Inbound, ProtocolError> {
    let raw: RawEnvelope = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
    let kind = raw.kind;

    let event = match kind.as_str() {
        "roomStateSnapshot" => ServerEvent::RoomStateSnapshot(payload(&kind, raw.payload)?),
        "participantJoined" => ServerEvent::ParticipantJoined(payload(&kind, raw.payload)?),
        "participantLeft" => {
            let left: ParticipantLeft = payload(&kind, raw.payload)?;
            ServerEvent::ParticipantLeft { id: left.id }
        }
        "playbackChanged" => ServerEvent::PlaybackChanged(payload(&kind, raw.payload)?),
        "error" => {
            let err: ServerError = payload(&kind, raw.payload)?;
            ServerEvent::Error {
                message: err.message,
            }
        }
        _ => return Err(ProtocolError::UnknownType(kind)),
    };

    // Ordering depends on the server clock; a playback change without one is unusable.
    let ts = match (raw.ts, &event) {
        (Some(ts), _) => ts,
        (None, ServerEvent::PlaybackChanged(_)) => {
            return Err(ProtocolError::MissingTimestamp(kind));
        }
        (None, _) => 0,
    };

    Ok(Inbound { ts, event })
}

fn payload<T: serde::de::DeserializeOwned>(kind: &str, value: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|source| ProtocolError::InvalidPayload {
        kind: kind.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_adds_timestamp_to_envelope() {
        let text = encode(
            &ClientMessage::Seek {
                position_seconds: 42.5,
            },
            1_700,
        )
        .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"type": "seek", "payload": {"positionSeconds": 42.5}, "ts": 1_700})
        );
    }

    #[test]
    fn join_uses_camel_case_fields() {
        let text = encode(
            &ClientMessage::Join {
                room_id: "r1".into(),
                participant: Participant::new("u1", "Ana"),
            },
            1,
        )
        .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "join");
        assert_eq!(value["payload"]["roomId"], "r1");
        assert_eq!(value["payload"]["participant"]["displayName"], "Ana");
    }

    #[test]
    fn decodes_snapshot() {
        let text = json!({
            "type": "roomStateSnapshot",
            "payload": {
                "currentVideoId": "m1",
                "positionSeconds": 30,
                "isPlaying": true,
                "participants": [{"id": "u1", "displayName": "Ana"}]
            },
            "ts": 99
        })
        .to_string();
        let inbound = decode(&text).unwrap();
        assert_eq!(inbound.ts, 99);
        match inbound.event {
            ServerEvent::RoomStateSnapshot(snap) => {
                assert_eq!(snap.current_video_id.as_deref(), Some("m1"));
                assert_eq!(snap.position_seconds, 30.0);
                assert!(snap.is_playing);
                assert_eq!(snap.participants[0].id, "u1");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn participant_joined_only_needs_an_id() {
        let inbound = decode(r#"{"type":"participantJoined","payload":{"id":"u1"},"ts":5}"#).unwrap();
        assert_eq!(
            inbound.event,
            ServerEvent::ParticipantJoined(Participant::new("u1", ""))
        );
    }

    #[test]
    fn decodes_playback_change() {
        let inbound = decode(
            r#"{"type":"playbackChanged","payload":{"action":"pause","positionSeconds":12.0,"originId":"u2"},"ts":10}"#,
        )
        .unwrap();
        assert_eq!(
            inbound.event,
            ServerEvent::PlaybackChanged(PlaybackChange {
                action: PlaybackAction::Pause,
                position_seconds: 12.0,
                origin_id: Some("u2".into()),
                video_id: None,
            })
        );
    }

    #[test]
    fn rejects_unknown_type() {
        let err = decode(r#"{"type":"chat","payload":{},"ts":1}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(kind) if kind == "chat"));
    }

    #[test]
    fn rejects_garbage_and_bad_payloads() {
        assert!(matches!(decode("not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(
            decode(r#"{"type":"participantLeft","payload":{},"ts":1}"#),
            Err(ProtocolError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn playback_change_requires_timestamp() {
        let err = decode(r#"{"type":"playbackChanged","payload":{"action":"play","positionSeconds":1}}"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::MissingTimestamp(_)));
    }
}
