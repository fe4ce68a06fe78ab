//! Real-time synchronization client for watch-party rooms.
//!
//! A [`WatchPartyClient`] keeps one participant's view of a shared room
//! (playback position, play state, current video, roster) consistent with the
//! room server and with the other participants, across reconnects.

pub mod api;
pub mod backoff;
pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod invite;
pub mod playback;
pub mod protocol;
pub mod reconcile;
pub mod room;
pub mod sync;
pub mod transport;
pub mod utils;

pub use config::SyncConfig;
pub use connection::ConnectivityStatus;
pub use error::{ProtocolError, Result, SyncError};
pub use playback::{PlaybackCommand, PlayerDirective};
pub use reconcile::RoomView;
pub use room::{Participant, RoomState};
pub use sync::{SyncStatsSnapshot, WatchPartyClient};
pub use transport::{Connector, Transport, WsConnector};
