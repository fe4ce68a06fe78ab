use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{interval, interval_at, sleep, timeout, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::connection::{ConnectivityStatus, Lifecycle, RetryDecision};
use crate::error::{Result, SyncError};
use crate::playback::{PlaybackCommand, PlayerDirective};
use crate::protocol::{self, ClientMessage};
use crate::reconcile::{Reconciler, RoomView};
use crate::room::Participant;
use crate::transport::{Connector, Transport};
use crate::utils::current_unix_millis;

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(1);

/// Live membership of one watch-party room.
///
/// Owns the session task that keeps the connection up, and exposes the room
/// view, the connectivity status and the playback controls to the UI layer.
/// Dropping the client tears the connection down; [`leave`](Self::leave) does
/// so gracefully.
pub struct WatchPartyClient {
    inner: Arc<SyncClientState>,
    session: Mutex<Option<Session>>,
}

struct SyncClientState {
    connector: Arc<dyn Connector>,
    config: SyncConfig,
    room_id: String,
    me: Participant,
    view: watch::Sender<RoomView>,
    status: watch::Sender<ConnectivityStatus>,
    directives: mpsc::UnboundedSender<PlayerDirective>,
    media_duration: Mutex<Option<f64>>,
    left: AtomicBool,
    stats: Mutex<SyncStats>,
}

struct Session {
    control_tx: mpsc::UnboundedSender<Control>,
    task: JoinHandle<()>,
}

#[derive(Debug)]
enum Control {
    Command(PlaybackCommand),
    SetDuration(Option<f64>),
    Leave,
}

enum SessionEnd {
    Left,
    Dropped(String),
}

#[derive(Default, Clone)]
struct SyncStats {
    bytes_out: u64,
    bytes_in: u64,
    messages_out: u64,
    messages_in: u64,
    protocol_errors: u64,
    last_message_at: Option<Instant>,
    last_rtt_ms: Option<f32>,
    last_disconnect_at: Option<Instant>,
    reconnect_attempts: u32,
    connected_since: Option<Instant>,
    endpoint_label: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SyncStatsSnapshot {
    pub bytes_out: u64,
    pub bytes_in: u64,
    pub messages_out: u64,
    pub messages_in: u64,
    pub protocol_errors: u64,
    pub last_rtt_ms: Option<f32>,
    pub last_message_age: Option<f32>,
    pub connected_duration: Option<f32>,
    pub reconnect_attempts: u32,
    pub endpoint_label: Option<String>,
    pub last_disconnect_secs: Option<f32>,
}

impl WatchPartyClient {
    /// Mount a room: start connecting and return the client plus the stream of
    /// directives the local player must follow. Must be called inside a tokio runtime.
    pub fn join<C>(
        connector: Arc<C>,
        config: SyncConfig,
        room_id: impl Into<String>,
        me: Participant,
    ) -> (Self, mpsc::UnboundedReceiver<PlayerDirective>)
    where
        C: Connector + 'static,
    {
        let connector: Arc<dyn Connector> = connector;
        let (directives, directive_rx) = mpsc::unbounded_channel();
        let (view, _) = watch::channel(RoomView::default());
        let (status, _) = watch::channel(ConnectivityStatus::Reconnecting);

        let inner = Arc::new(SyncClientState {
            connector,
            config,
            room_id: room_id.into(),
            me,
            view,
            status,
            directives,
            media_duration: Mutex::new(None),
            left: AtomicBool::new(false),
            stats: Mutex::new(SyncStats::default()),
        });

        let session = Session::spawn(Arc::clone(&inner));
        let client = Self {
            inner,
            session: Mutex::new(Some(session)),
        };
        (client, directive_rx)
    }

    pub fn room_id(&self) -> &str {
        &self.inner.room_id
    }

    pub fn participant(&self) -> &Participant {
        &self.inner.me
    }

    /// Current room view.
    pub fn view(&self) -> RoomView {
        self.inner.view.borrow().clone()
    }

    /// Reactive room view, updated after every applied change.
    pub fn subscribe(&self) -> watch::Receiver<RoomView> {
        self.inner.view.subscribe()
    }

    pub fn status(&self) -> ConnectivityStatus {
        *self.inner.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectivityStatus> {
        self.inner.status.subscribe()
    }

    pub fn play(&self) -> Result<()> {
        self.send_control(Control::Command(PlaybackCommand::Play))
    }

    pub fn pause(&self) -> Result<()> {
        self.send_control(Control::Command(PlaybackCommand::Pause))
    }

    /// Seek the room. The target is clamped to `[0, duration]`.
    pub fn seek(&self, position: f64) -> Result<()> {
        self.send_control(Control::Command(PlaybackCommand::Seek(position)))
    }

    /// Report the local player position. Call as often as convenient; emission
    /// to the room is throttled and only happens while playing.
    pub fn report_progress(&self, position: f64) -> Result<()> {
        self.send_control(Control::Command(PlaybackCommand::ProgressUpdate(position)))
    }

    /// Media duration from the player or room metadata; bounds seeks.
    pub fn set_media_duration(&self, duration: Option<f64>) {
        *self.inner.media_duration.lock() = duration;
        if let Some(session) = self.session.lock().as_ref() {
            let _ = session.control_tx.send(Control::SetDuration(duration));
        }
    }

    /// Leave the room: best-effort leave notification, then close. Terminal.
    pub async fn leave(&self) {
        self.inner.left.store(true, Ordering::Release);
        let session = self.session.lock().take();
        if let Some(Session {
            control_tx,
            mut task,
        }) = session
        {
            let _ = control_tx.send(Control::Leave);
            let grace = self.inner.config.leave_timeout * 2;
            if timeout(grace, &mut task).await.is_err() {
                warn!("Session for room {} did not stop in time; aborting", self.inner.room_id);
                task.abort();
            }
        }
        self.inner.status.send_replace(ConnectivityStatus::Disconnected);
    }

    /// Start over after the retry budget ran out. Returns false if a session is
    /// still running or the room was left.
    pub fn reconnect(&self) -> bool {
        if self.inner.left.load(Ordering::Acquire) {
            return false;
        }
        if self.status() != ConnectivityStatus::Disconnected {
            return false;
        }
        let mut session = self.session.lock();
        if let Some(previous) = session.take() {
            previous.task.abort();
        }
        info!("Manual reconnect requested for room {}", self.inner.room_id);
        self.inner.status.send_replace(ConnectivityStatus::Reconnecting);
        *session = Some(Session::spawn(Arc::clone(&self.inner)));
        true
    }

    /// Duration used to clamp seeks: the explicit one if set, else the room's.
    pub fn media_duration(&self) -> Option<f64> {
        let usable = |d: &f64| d.is_finite() && *d > 0.0;
        let explicit = *self.inner.media_duration.lock();
        explicit
            .filter(usable)
            .or_else(|| self.inner.view.borrow().room.duration_seconds.filter(usable))
    }

    pub fn stats_snapshot(&self) -> SyncStatsSnapshot {
        self.inner.snapshot()
    }

    fn send_control(&self, control: Control) -> Result<()> {
        if self.inner.left.load(Ordering::Acquire) {
            return Err(SyncError::Closed);
        }
        if !self.status().controls_enabled() {
            return Err(SyncError::Disconnected);
        }
        let session = self.session.lock();
        let session = session.as_ref().ok_or(SyncError::Disconnected)?;
        session
            .control_tx
            .send(control)
            .map_err(|_| SyncError::Disconnected)
    }
}

impl Drop for WatchPartyClient {
    fn drop(&mut self) {
        if let Some(session) = self.session.lock().take() {
            session.task.abort();
        }
    }
}

impl Session {
    fn spawn(inner: Arc<SyncClientState>) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_session(inner, control_rx));
        Self { control_tx, task }
    }
}

async fn run_session(inner: Arc<SyncClientState>, mut control_rx: mpsc::UnboundedReceiver<Control>) {
    let config = &inner.config;
    let mut lifecycle = Lifecycle::new(config.retry_budget);
    let mut reconciler = Reconciler::new(
        config.drift_tolerance_secs,
        config.progress_interval,
        config.echo_timeout,
    );
    reconciler.set_media_duration(*inner.media_duration.lock());

    lifecycle.mount();
    inner.publish_status(&lifecycle);
    inner.publish_view(&reconciler);

    loop {
        let connect = timeout(
            config.handshake_timeout,
            inner.connector.connect(&inner.room_id),
        );
        tokio::pin!(connect);
        let attempt = loop {
            tokio::select! {
                result = &mut connect => break result,
                control = control_rx.recv() => {
                    if !inner.absorb_offline(&mut reconciler, control) {
                        lifecycle.leave();
                        inner.publish_status(&lifecycle);
                        return;
                    }
                }
            }
        };

        let transport = match attempt {
            Ok(Ok(transport)) => Some(transport),
            Ok(Err(e)) => {
                warn!("Handshake with room {} failed: {}", inner.room_id, e);
                None
            }
            Err(_) => {
                warn!("Handshake with room {} timed out", inner.room_id);
                None
            }
        };

        if let Some(transport) = transport {
            lifecycle.handshake_succeeded();
            inner.mark_connected(transport.label());
            inner.publish_status(&lifecycle);

            match run_connected(&inner, transport, &mut reconciler, &mut control_rx).await {
                SessionEnd::Left => {
                    lifecycle.leave();
                    inner.publish_status(&lifecycle);
                    info!("Left room {}", inner.room_id);
                    return;
                }
                SessionEnd::Dropped(reason) if !reconciler.awaiting_snapshot() => {
                    warn!("Connection to room {} dropped: {}", inner.room_id, reason);
                    lifecycle.transport_dropped();
                    inner.mark_disconnected();
                    inner.publish_status(&lifecycle);
                    inner.publish_view(&reconciler);
                    continue;
                }
                SessionEnd::Dropped(reason) => {
                    warn!("Room {} lost before resync: {}", inner.room_id, reason);
                    inner.mark_disconnected();
                    inner.publish_view(&reconciler);
                }
            }
        }

        match lifecycle.handshake_failed() {
            RetryDecision::GiveUp => {
                warn!(
                    "Giving up on room {} after {} failed attempts",
                    inner.room_id, config.retry_budget
                );
                inner.publish_status(&lifecycle);
                return;
            }
            RetryDecision::RetryAfter { attempt } => {
                inner.publish_status(&lifecycle);
                let delay = config.backoff.next_delay(attempt);
                debug!("Retrying room {} in {:?} (attempt {})", inner.room_id, delay, attempt);
                let pause = sleep(delay);
                tokio::pin!(pause);
                loop {
                    tokio::select! {
                        _ = &mut pause => break,
                        control = control_rx.recv() => {
                            if !inner.absorb_offline(&mut reconciler, control) {
                                lifecycle.leave();
                                inner.publish_status(&lifecycle);
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}

async fn run_connected(
    inner: &SyncClientState,
    mut transport: Box<dyn Transport>,
    reconciler: &mut Reconciler,
    control_rx: &mut mpsc::UnboundedReceiver<Control>,
) -> SessionEnd {
    let config = &inner.config;

    for message in reconciler.begin_resync(&inner.room_id, &inner.me) {
        if let Err(e) = inner.emit(transport.as_mut(), &message).await {
            return SessionEnd::Dropped(e.to_string());
        }
    }
    inner.publish_view(reconciler);

    let resync_deadline = sleep(config.resync_timeout);
    tokio::pin!(resync_deadline);
    let mut housekeeping = interval(HOUSEKEEPING_INTERVAL);
    housekeeping.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut keepalive = interval_at(
        tokio::time::Instant::now() + config.keepalive_interval,
        config.keepalive_interval,
    );
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            control = control_rx.recv() => match control {
                Some(Control::Command(command)) => {
                    if let Some(message) = reconciler.intent(command, Instant::now()) {
                        match inner.emit(transport.as_mut(), &message).await {
                            Ok(()) => {}
                            Err(SyncError::Encode(e)) => warn!("Dropping {}: {}", message.kind(), e),
                            Err(e) => return SessionEnd::Dropped(e.to_string()),
                        }
                    }
                    inner.publish_view(reconciler);
                }
                Some(Control::SetDuration(duration)) => {
                    reconciler.set_media_duration(duration);
                }
                Some(Control::Leave) | None => {
                    let leave = ClientMessage::Leave {
                        room_id: inner.room_id.clone(),
                        participant_id: inner.me.id.clone(),
                    };
                    let farewell = async {
                        match inner.emit(transport.as_mut(), &leave).await {
                            Ok(()) => transport.close().await,
                            Err(e) => Err(e),
                        }
                    };
                    match timeout(config.leave_timeout, farewell).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => debug!("Leave notification not delivered: {}", e),
                        Err(_) => debug!("Leave notification timed out"),
                    }
                    return SessionEnd::Left;
                }
            },
            incoming = transport.recv() => match incoming {
                Some(Ok(text)) => {
                    inner.record_incoming(text.len() as u64);
                    match protocol::decode(&text) {
                        Ok(inbound) => {
                            let was_awaiting = reconciler.awaiting_snapshot();
                            let applied = reconciler.apply(inbound);
                            if was_awaiting && !reconciler.awaiting_snapshot() {
                                info!("Room {} resynced", inner.room_id);
                            }
                            for directive in applied.directives {
                                let _ = inner.directives.send(directive);
                            }
                            if applied.outcome.changed() {
                                inner.publish_view(reconciler);
                            }
                        }
                        Err(e) => {
                            inner.record_protocol_error();
                            warn!("Discarding room message: {}", e);
                        }
                    }
                }
                Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
                None => return SessionEnd::Dropped("server closed the connection".into()),
            },
            _ = &mut resync_deadline, if reconciler.awaiting_snapshot() => {
                return SessionEnd::Dropped("room snapshot did not arrive in time".into());
            }
            _ = housekeeping.tick() => {
                if let Some(directives) = reconciler.expire_pending(Instant::now()) {
                    for directive in directives {
                        let _ = inner.directives.send(directive);
                    }
                    inner.publish_view(reconciler);
                }
                inner.record_rtt(transport.last_rtt_ms());
            }
            _ = keepalive.tick() => {
                if let Err(e) = transport.ping().await {
                    return SessionEnd::Dropped(e.to_string());
                }
            }
        }
    }
}

impl SyncClientState {
    async fn emit(&self, transport: &mut dyn Transport, message: &ClientMessage) -> Result<()> {
        let json = protocol::encode(message, current_unix_millis())?;
        let len = json.len() as u64;
        transport.send(json).await?;
        self.record_outgoing(len);
        Ok(())
    }

    /// Controls that arrive with no live transport. Intents are dropped, not
    /// queued. Returns false when the session should end.
    fn absorb_offline(&self, reconciler: &mut Reconciler, control: Option<Control>) -> bool {
        match control {
            Some(Control::Command(command)) => {
                debug!("Dropping {:?} while reconnecting", command);
                true
            }
            Some(Control::SetDuration(duration)) => {
                reconciler.set_media_duration(duration);
                true
            }
            Some(Control::Leave) | None => false,
        }
    }

    fn publish_status(&self, lifecycle: &Lifecycle) {
        let status = lifecycle.status();
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    fn publish_view(&self, reconciler: &Reconciler) {
        self.view.send_replace(reconciler.view());
    }

    fn record_outgoing(&self, bytes: u64) {
        let mut stats = self.stats.lock();
        stats.bytes_out += bytes;
        stats.messages_out += 1;
        stats.last_message_at = Some(Instant::now());
    }

    fn record_incoming(&self, bytes: u64) {
        let mut stats = self.stats.lock();
        stats.bytes_in += bytes;
        stats.messages_in += 1;
        stats.last_message_at = Some(Instant::now());
    }

    fn record_protocol_error(&self) {
        self.stats.lock().protocol_errors += 1;
    }

    fn record_rtt(&self, rtt: Option<f32>) {
        if rtt.is_some() {
            self.stats.lock().last_rtt_ms = rtt;
        }
    }

    fn mark_connected(&self, label: &str) {
        let mut stats = self.stats.lock();
        stats.connected_since = Some(Instant::now());
        stats.endpoint_label = Some(label.to_string()).filter(|l| !l.is_empty());
    }

    fn mark_disconnected(&self) {
        let mut stats = self.stats.lock();
        stats.connected_since = None;
        stats.reconnect_attempts += 1;
        stats.last_disconnect_at = Some(Instant::now());
    }

    fn snapshot(&self) -> SyncStatsSnapshot {
        let stats = self.stats.lock();
        SyncStatsSnapshot {
            bytes_out: stats.bytes_out,
            bytes_in: stats.bytes_in,
            messages_out: stats.messages_out,
            messages_in: stats.messages_in,
            protocol_errors: stats.protocol_errors,
            last_rtt_ms: stats.last_rtt_ms,
            last_message_age: stats.last_message_at.map(|inst| inst.elapsed().as_secs_f32()),
            connected_duration: stats.connected_since.map(|inst| inst.elapsed().as_secs_f32()),
            reconnect_attempts: stats.reconnect_attempts,
            endpoint_label: stats.endpoint_label.clone(),
            last_disconnect_secs: stats
                .last_disconnect_at
                .map(|inst| inst.elapsed().as_secs_f32()),
        }
    }
}
