use serde::{Deserialize, Serialize};

use crate::protocol::{PlaybackAction, PlaybackChange, RoomSnapshot};

/// A member of the room as announced by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
}

impl Participant {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar_ref: None,
        }
    }

    pub fn guest() -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let display_name = format!("Guest {}", &id[..8]);
        Self::new(id, display_name)
    }
}

/// Result of applying one inbound event to the cached room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Idempotent no-op: duplicate join, redundant leave, repeated version.
    Unchanged,
    /// Older than what we already hold. Expected under reordering, not an error.
    Stale,
    /// Arrived before the post-connect snapshot and cannot be trusted.
    Untrusted,
}

impl ApplyOutcome {
    pub fn changed(self) -> bool {
        matches!(self, ApplyOutcome::Applied)
    }
}

/// Cached copy of the server's room state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoomState {
    pub current_video_id: Option<String>,
    pub position_seconds: f64,
    pub is_playing: bool,
    pub duration_seconds: Option<f64>,
    /// Server timestamp (ms) of the last applied playback write.
    pub last_updated_at: u64,
    /// Origin of the last applied playback write, used to break timestamp ties.
    pub last_writer: Option<String>,
    pub participants: Vec<Participant>,
}

impl RoomState {
    /// Overwrite everything with a full snapshot.
    pub fn replace(&mut self, snapshot: RoomSnapshot, ts: u64) {
        *self = RoomState {
            current_video_id: snapshot.current_video_id,
            position_seconds: snapshot.position_seconds.max(0.0),
            is_playing: snapshot.is_playing,
            duration_seconds: snapshot.duration_seconds.filter(|d| *d > 0.0),
            last_updated_at: snapshot.last_updated_at.unwrap_or(ts),
            last_writer: None,
            participants: dedup_participants(snapshot.participants),
        };
    }

    pub fn add_participant(&mut self, participant: Participant) -> ApplyOutcome {
        if self.participants.iter().any(|p| p.id == participant.id) {
            return ApplyOutcome::Unchanged;
        }
        self.participants.push(participant);
        ApplyOutcome::Applied
    }

    pub fn remove_participant(&mut self, id: &str) -> ApplyOutcome {
        let before = self.participants.len();
        self.participants.retain(|p| p.id != id);
        if self.participants.len() == before {
            ApplyOutcome::Unchanged
        } else {
            ApplyOutcome::Applied
        }
    }

    /// Last-writer-wins on `(ts, origin)`. Equal timestamps fall back to the
    /// greater origin id so every client converges on the same winner.
    pub fn apply_playback(&mut self, change: &PlaybackChange, ts: u64) -> ApplyOutcome {
        let incoming = (ts, change.origin_id.as_deref().unwrap_or(""));
        let held = (
            self.last_updated_at,
            self.last_writer.as_deref().unwrap_or(""),
        );
        match incoming.cmp(&held) {
            std::cmp::Ordering::Less => return ApplyOutcome::Stale,
            std::cmp::Ordering::Equal => return ApplyOutcome::Unchanged,
            std::cmp::Ordering::Greater => {}
        }

        self.position_seconds = change.position_seconds.max(0.0);
        match change.action {
            PlaybackAction::Play => self.is_playing = true,
            PlaybackAction::Pause => self.is_playing = false,
            PlaybackAction::Seek => {}
        }
        if let Some(video_id) = &change.video_id {
            self.current_video_id = Some(video_id.clone());
        }
        self.last_updated_at = ts;
        self.last_writer = change.origin_id.clone();
        ApplyOutcome::Applied
    }

    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }
}

fn dedup_participants(participants: Vec<Participant>) -> Vec<Participant> {
    let mut roster: Vec<Participant> = Vec::with_capacity(participants.len());
    for participant in participants {
        if !roster.iter().any(|p| p.id == participant.id) {
            roster.push(participant);
        }
    }
    roster
}
