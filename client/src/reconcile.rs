//! Room reconciliation without any IO.
//!
//! The [`Reconciler`] owns the cached [`RoomState`] and the local/authoritative
//! playback pair. The session task feeds it decoded server events and local
//! intents; it answers with outbound messages and directives for the player.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::playback::{
    clamp_position, exceeds_drift, PlaybackCommand, PlaybackPoint, PlaybackTrack,
    PlayerDirective, Throttle,
};
use crate::protocol::{ClientMessage, Inbound, ServerEvent};
use crate::room::{ApplyOutcome, Participant, RoomState};

/// What the UI reads: the server's room plus the playback point to display.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomView {
    pub room: RoomState,
    pub playback: PlaybackPoint,
    /// `playback` is a local intent the server has not echoed yet.
    pub optimistic: bool,
    /// A snapshot has been applied since the last (re)connect.
    pub synced: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub outcome: ApplyOutcome,
    pub directives: Vec<PlayerDirective>,
}

impl Applied {
    fn outcome(outcome: ApplyOutcome) -> Self {
        Self {
            outcome,
            directives: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    room: RoomState,
    track: PlaybackTrack,
    awaiting_snapshot: bool,
    local_position: Option<f64>,
    local_playing: Option<bool>,
    media_duration: Option<f64>,
    drift_tolerance: f64,
    echo_timeout: Duration,
    progress: Throttle,
}

impl Reconciler {
    pub fn new(drift_tolerance: f64, progress_interval: Duration, echo_timeout: Duration) -> Self {
        Self {
            room: RoomState::default(),
            track: PlaybackTrack::default(),
            awaiting_snapshot: true,
            local_position: None,
            local_playing: None,
            media_duration: None,
            drift_tolerance,
            echo_timeout,
            progress: Throttle::new(progress_interval),
        }
    }

    /// Start of a (re)connect. Returns the join and the single full-state
    /// request; incremental events are untrusted until the snapshot lands.
    pub fn begin_resync(&mut self, room_id: &str, me: &Participant) -> [ClientMessage; 2] {
        self.awaiting_snapshot = true;
        self.progress.reset();
        [
            ClientMessage::Join {
                room_id: room_id.to_string(),
                participant: me.clone(),
            },
            ClientMessage::RequestState {
                room_id: room_id.to_string(),
            },
        ]
    }

    pub fn awaiting_snapshot(&self) -> bool {
        self.awaiting_snapshot
    }

    pub fn view(&self) -> RoomView {
        RoomView {
            room: self.room.clone(),
            playback: self.track.displayed(),
            optimistic: self.track.is_optimistic(),
            synced: !self.awaiting_snapshot,
        }
    }

    /// Duration reported by the UI or the HTTP metadata; overrides the snapshot's.
    pub fn set_media_duration(&mut self, duration: Option<f64>) {
        self.media_duration = duration.filter(|d| d.is_finite() && *d > 0.0);
    }

    pub fn media_duration(&self) -> Option<f64> {
        self.media_duration.or(self.room.duration_seconds)
    }

    pub fn apply(&mut self, inbound: Inbound) -> Applied {
        let Inbound { ts, event } = inbound;
        match event {
            ServerEvent::RoomStateSnapshot(snapshot) => {
                self.room.replace(snapshot, ts);
                self.awaiting_snapshot = false;
                let point = self.room_point();
                self.track.confirm(point);
                debug!(
                    participants = self.room.participants.len(),
                    position = point.position_seconds,
                    playing = point.is_playing,
                    "applied room snapshot"
                );
                Applied {
                    outcome: ApplyOutcome::Applied,
                    directives: self.align_player(point),
                }
            }
            ServerEvent::Error { message } => {
                warn!("room server reported an error: {message}");
                Applied::outcome(ApplyOutcome::Unchanged)
            }
            event if self.awaiting_snapshot => {
                debug!("discarding {} received before resync", event.kind());
                Applied::outcome(ApplyOutcome::Untrusted)
            }
            ServerEvent::ParticipantJoined(participant) => {
                Applied::outcome(self.room.add_participant(participant))
            }
            ServerEvent::ParticipantLeft { id } => {
                Applied::outcome(self.room.remove_participant(&id))
            }
            ServerEvent::PlaybackChanged(change) => {
                let outcome = self.room.apply_playback(&change, ts);
                if outcome != ApplyOutcome::Applied {
                    if outcome == ApplyOutcome::Stale {
                        debug!(ts, held = self.room.last_updated_at, "discarding stale playback change");
                    }
                    return Applied::outcome(outcome);
                }
                let point = self.room_point();
                self.track.confirm(point);
                Applied {
                    outcome,
                    directives: self.align_player(point),
                }
            }
        }
    }

    /// Turn a local intent into the message to emit, applying it optimistically.
    /// Returns `None` when nothing should go on the wire.
    pub fn intent(&mut self, command: PlaybackCommand, now: Instant) -> Option<ClientMessage> {
        match command {
            PlaybackCommand::Play | PlaybackCommand::Pause => {
                let is_playing = command == PlaybackCommand::Play;
                let position_seconds = self.believed_position();
                self.local_playing = Some(is_playing);
                self.track.propose(
                    PlaybackPoint {
                        position_seconds,
                        is_playing,
                    },
                    now,
                );
                Some(if is_playing {
                    ClientMessage::Play { position_seconds }
                } else {
                    ClientMessage::Pause { position_seconds }
                })
            }
            PlaybackCommand::Seek(target) => {
                let position_seconds = clamp_position(target, self.media_duration());
                self.local_position = Some(position_seconds);
                let is_playing = self.track.displayed().is_playing;
                self.track.propose(
                    PlaybackPoint {
                        position_seconds,
                        is_playing,
                    },
                    now,
                );
                Some(ClientMessage::Seek { position_seconds })
            }
            PlaybackCommand::ProgressUpdate(position) => {
                let position_seconds = clamp_position(position, self.media_duration());
                self.local_position = Some(position_seconds);
                if !self.track.displayed().is_playing || !self.progress.ready(now) {
                    return None;
                }
                Some(ClientMessage::ProgressUpdate { position_seconds })
            }
        }
    }

    /// Revert an optimistic point the server never echoed and steer the player
    /// back to the room. `None` when nothing was pending long enough.
    pub fn expire_pending(&mut self, now: Instant) -> Option<Vec<PlayerDirective>> {
        if !self.track.expire(now, self.echo_timeout) {
            return None;
        }
        debug!("optimistic playback not echoed in time; reverting to room state");
        Some(self.align_player(self.room_point()))
    }

    fn believed_position(&self) -> f64 {
        self.local_position
            .unwrap_or_else(|| self.track.displayed().position_seconds)
    }

    fn room_point(&self) -> PlaybackPoint {
        PlaybackPoint {
            position_seconds: self.room.position_seconds,
            is_playing: self.room.is_playing,
        }
    }

    fn align_player(&mut self, point: PlaybackPoint) -> Vec<PlayerDirective> {
        let mut directives = Vec::new();
        if exceeds_drift(
            self.local_position,
            point.position_seconds,
            self.drift_tolerance,
        ) {
            directives.push(PlayerDirective::SeekTo(point.position_seconds));
            self.local_position = Some(point.position_seconds);
        }
        if self.local_playing != Some(point.is_playing) {
            directives.push(if point.is_playing {
                PlayerDirective::Play
            } else {
                PlayerDirective::Pause
            });
            self.local_playing = Some(point.is_playing);
        }
        directives
    }
}
