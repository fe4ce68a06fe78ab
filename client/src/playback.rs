use std::time::{Duration, Instant};

/// Playback intent from the local user.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackCommand {
    Play,
    Pause,
    Seek(f64),
    ProgressUpdate(f64),
}

/// Instruction for the local player, produced when the room moves away from
/// what the player is doing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerDirective {
    SeekTo(f64),
    Play,
    Pause,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlaybackPoint {
    pub position_seconds: f64,
    pub is_playing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Pending {
    point: PlaybackPoint,
    issued_at: Instant,
}

/// Authoritative playback plus an optional optimistic local point waiting for
/// the server to echo it back.
#[derive(Debug, Clone, Default)]
pub struct PlaybackTrack {
    authoritative: PlaybackPoint,
    pending: Option<Pending>,
}

impl PlaybackTrack {
    pub fn displayed(&self) -> PlaybackPoint {
        self.pending
            .map(|pending| pending.point)
            .unwrap_or(self.authoritative)
    }

    pub fn is_optimistic(&self) -> bool {
        self.pending.is_some()
    }

    pub fn propose(&mut self, point: PlaybackPoint, now: Instant) {
        self.pending = Some(Pending {
            point,
            issued_at: now,
        });
    }

    /// Any authoritative update supersedes the optimistic point, echo or not.
    pub fn confirm(&mut self, point: PlaybackPoint) {
        self.authoritative = point;
        self.pending = None;
    }

    /// Drop an optimistic point the server never echoed. Returns true if one was dropped.
    pub fn expire(&mut self, now: Instant, echo_timeout: Duration) -> bool {
        match self.pending {
            Some(pending) if now.saturating_duration_since(pending.issued_at) >= echo_timeout => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }
}

/// Clamp a seek target into `[0, duration]`. Without a known duration only the
/// lower bound applies.
pub fn clamp_position(position: f64, duration: Option<f64>) -> f64 {
    if position.is_nan() {
        return 0.0;
    }
    let lower_bounded = position.max(0.0);
    match duration.filter(|d| d.is_finite() && *d > 0.0) {
        Some(duration) => lower_bounded.min(duration),
        None if lower_bounded.is_finite() => lower_bounded,
        None => 0.0,
    }
}

/// Whether the local player has drifted far enough to need a corrective seek.
/// An unknown local position always needs one.
pub fn exceeds_drift(local: Option<f64>, server: f64, tolerance: f64) -> bool {
    match local {
        Some(local) => (local - server).abs() > tolerance,
        None => true,
    }
}

/// Fixed-interval gate for progress updates.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn ready(&mut self, now: Instant) -> bool {
        let open = self
            .last
            .map(|last| now.saturating_duration_since(last) >= self.interval)
            .unwrap_or(true);
        if open {
            self.last = Some(now);
        }
        open
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_clamps_to_media_bounds() {
        assert_eq!(clamp_position(-5.0, Some(120.0)), 0.0);
        assert_eq!(clamp_position(500.0, Some(120.0)), 120.0);
        assert_eq!(clamp_position(60.0, Some(120.0)), 60.0);
    }

    #[test]
    fn seek_without_duration_only_clamps_below() {
        assert_eq!(clamp_position(-1.0, None), 0.0);
        assert_eq!(clamp_position(9_000.0, None), 9_000.0);
        assert_eq!(clamp_position(f64::NAN, Some(120.0)), 0.0);
        assert_eq!(clamp_position(f64::INFINITY, None), 0.0);
    }

    #[test]
    fn drift_tolerance() {
        assert!(!exceeds_drift(Some(30.0), 31.5, 2.0));
        assert!(exceeds_drift(Some(30.0), 32.5, 2.0));
        assert!(exceeds_drift(Some(40.0), 30.0, 2.0));
        assert!(exceeds_drift(None, 0.0, 2.0));
    }

    #[test]
    fn optimistic_point_shows_until_confirmed() {
        let now = Instant::now();
        let mut track = PlaybackTrack::default();
        track.confirm(PlaybackPoint {
            position_seconds: 10.0,
            is_playing: false,
        });

        let local = PlaybackPoint {
            position_seconds: 10.0,
            is_playing: true,
        };
        track.propose(local, now);
        assert!(track.is_optimistic());
        assert_eq!(track.displayed(), local);

        let echoed = PlaybackPoint {
            position_seconds: 10.2,
            is_playing: true,
        };
        track.confirm(echoed);
        assert!(!track.is_optimistic());
        assert_eq!(track.displayed(), echoed);
    }

    #[test]
    fn unechoed_point_expires() {
        let now = Instant::now();
        let mut track = PlaybackTrack::default();
        track.propose(
            PlaybackPoint {
                position_seconds: 50.0,
                is_playing: true,
            },
            now,
        );
        assert!(!track.expire(now + Duration::from_millis(500), Duration::from_secs(1)));
        assert!(track.expire(now + Duration::from_secs(2), Duration::from_secs(1)));
        assert_eq!(track.displayed(), PlaybackPoint::default());
    }

    #[test]
    fn throttle_opens_once_per_interval() {
        let start = Instant::now();
        let mut throttle = Throttle::new(Duration::from_secs(5));
        assert!(throttle.ready(start));
        assert!(!throttle.ready(start + Duration::from_secs(1)));
        assert!(!throttle.ready(start + Duration::from_secs(4)));
        assert!(throttle.ready(start + Duration::from_secs(5)));
        throttle.reset();
        assert!(throttle.ready(start + Duration::from_secs(6)));
    }
}
