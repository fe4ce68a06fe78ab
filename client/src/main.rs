use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    time::{interval, Duration, Instant},
};
use uuid::Uuid;

use watchparty_client::{
    api::RoomApi,
    constants::VERSION,
    invite::{build_invite_url, looks_like_invite, parse_invite_url},
    playback::clamp_position,
    utils::format_time,
    ConnectivityStatus, Participant, PlayerDirective, SyncConfig, WatchPartyClient, WsConnector,
};

const PLAYER_TICK: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "watchparty_client=debug,info".into()),
        )
        .init();

    let args = Args::parse(std::env::args().skip(1))?;
    tracing::info!("watchparty {VERSION} joining room {}", args.room_id);

    let mut config = SyncConfig::from_env();
    if let Some(server) = &args.server {
        config = config.with_endpoint("command line", server.as_str());
    }
    if let Some(api_url) = &args.api_url {
        config.api_url = api_url.clone();
    }

    let api = RoomApi::new(config.api_url.as_str());
    if args.warm_up {
        if let Some(endpoint) = config.endpoints.first() {
            api.warm_up(&endpoint.label, &endpoint.url).await;
        }
    }
    let metadata = match api.fetch_room(&args.room_id).await {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            tracing::warn!("Room metadata unavailable: {e:#}");
            None
        }
    };

    let me = match &args.name {
        Some(name) => Participant::new(Uuid::new_v4().to_string(), name.as_str()),
        None => Participant::guest(),
    };
    let video_id = args
        .video_id
        .clone()
        .or_else(|| metadata.as_ref().and_then(|m| m.video_id.clone()));

    let connector = Arc::new(WsConnector::from_config(&config));
    let (client, mut directives) = WatchPartyClient::join(connector, config, args.room_id.as_str(), me);
    if let Some(duration) = metadata.as_ref().and_then(|m| m.duration_seconds) {
        client.set_media_duration(Some(duration));
    }

    println!(
        "Joined as {}. Invite others with {}",
        client.participant().display_name,
        build_invite_url(client.room_id(), video_id.as_deref())
    );
    println!("Commands: play | pause | seek <secs> | status | reconnect | leave");

    let mut player = SimulatedPlayer::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tick = interval(PLAYER_TICK);
    let mut status_rx = client.watch_status();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            Some(directive) = directives.recv() => {
                player.apply(directive, Instant::now());
                tracing::debug!("Player {:?} -> {}", directive, format_time(player.position(Instant::now())));
            }
            _ = tick.tick() => {
                let _ = client.report_progress(player.position(Instant::now()));
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *status_rx.borrow_and_update();
                println!("connection: {status:?}");
                if status == ConnectivityStatus::Disconnected {
                    println!("Room connection lost. Type `reconnect` to try again.");
                }
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match Command::parse(&line) {
                    Some(Command::Leave) => break,
                    Some(command) => run_command(&client, &mut player, command),
                    None if line.trim().is_empty() => {}
                    None => println!("Unknown command: {}", line.trim()),
                }
            }
            _ = &mut ctrl_c => break,
        }
    }

    client.leave().await;
    println!("Left room {}", client.room_id());
    Ok(())
}

fn run_command(client: &WatchPartyClient, player: &mut SimulatedPlayer, command: Command) {
    let now = Instant::now();
    let result = match command {
        Command::Play => client.play().map(|()| player.apply(PlayerDirective::Play, now)),
        Command::Pause => client.pause().map(|()| player.apply(PlayerDirective::Pause, now)),
        Command::Seek(target) => {
            let target = clamp_position(target, client.media_duration());
            client
                .seek(target)
                .map(|()| player.apply(PlayerDirective::SeekTo(target), now))
        }
        Command::Status => {
            print_status(client, player, now);
            Ok(())
        }
        Command::Reconnect => {
            if !client.reconnect() {
                println!("Already connected or reconnecting");
            }
            Ok(())
        }
        Command::Leave => Ok(()),
    };
    if let Err(e) = result {
        println!("Controls unavailable: {e}");
    }
}

fn print_status(client: &WatchPartyClient, player: &SimulatedPlayer, now: Instant) {
    let view = client.view();
    let stats = client.stats_snapshot();
    println!("status: {:?}", client.status());
    println!(
        "room: {} at {}{}{}",
        if view.playback.is_playing { "playing" } else { "paused" },
        format_time(view.playback.position_seconds),
        if view.optimistic { " (pending)" } else { "" },
        if view.synced { "" } else { " (resyncing)" }
    );
    println!(
        "player: {} at {}",
        if player.playing { "playing" } else { "paused" },
        format_time(player.position(now))
    );
    println!(
        "roster: {} participant(s), {}",
        view.room.participants.len(),
        if view.room.participant(&client.participant().id).is_some() {
            "you are listed"
        } else {
            "you are not listed yet"
        }
    );
    match serde_json::to_string_pretty(&view.room) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::warn!("Could not render room state: {e}"),
    }
    println!(
        "traffic: {} msgs / {} bytes out, {} msgs / {} bytes in, rtt {}, endpoint {}, reconnects {}",
        stats.messages_out,
        stats.bytes_out,
        stats.messages_in,
        stats.bytes_in,
        stats
            .last_rtt_ms
            .map(|rtt| format!("{rtt:.0}ms"))
            .unwrap_or_else(|| "-".into()),
        stats.endpoint_label.as_deref().unwrap_or("-"),
        stats.reconnect_attempts
    );
}

#[derive(Debug, Default, PartialEq)]
struct Args {
    room_id: String,
    video_id: Option<String>,
    name: Option<String>,
    server: Option<String>,
    api_url: Option<String>,
    warm_up: bool,
}

impl Args {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut parsed = Args {
            warm_up: true,
            ..Default::default()
        };
        let mut room_id = None;
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--room" => room_id = Some(args.next().context("--room needs a room id")?),
                "--name" => parsed.name = Some(args.next().context("--name needs a value")?),
                "--server" => parsed.server = Some(args.next().context("--server needs a URL")?),
                "--api" => parsed.api_url = Some(args.next().context("--api needs a URL")?),
                "--no-warmup" => parsed.warm_up = false,
                "--invite-url" => {
                    let url = args.next().context("--invite-url needs a link")?;
                    parsed.apply_invite(&url, &mut room_id)?;
                }
                other if looks_like_invite(other) => parsed.apply_invite(other, &mut room_id)?,
                other => bail!("Unrecognized argument `{other}`"),
            }
        }
        parsed.room_id = room_id.context("Pass --room <id> or an invite link")?;
        Ok(parsed)
    }

    fn apply_invite(&mut self, url: &str, room_id: &mut Option<String>) -> Result<()> {
        let link = parse_invite_url(url).with_context(|| format!("Invalid invite link `{url}`"))?;
        *room_id = Some(link.room_id);
        self.video_id = link.video_id;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Command {
    Play,
    Pause,
    Seek(f64),
    Status,
    Reconnect,
    Leave,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let command = match parts.next()? {
            "play" => Command::Play,
            "pause" => Command::Pause,
            "seek" => Command::Seek(parts.next()?.parse().ok()?),
            "status" => Command::Status,
            "reconnect" => Command::Reconnect,
            "leave" | "quit" | "exit" => Command::Leave,
            _ => return None,
        };
        Some(command)
    }
}

/// Stand-in for a video element: a clock that runs while playing.
#[derive(Debug, Default)]
struct SimulatedPlayer {
    anchor_position: f64,
    anchored_at: Option<Instant>,
    playing: bool,
}

impl SimulatedPlayer {
    fn position(&self, now: Instant) -> f64 {
        match (self.playing, self.anchored_at) {
            (true, Some(at)) => self.anchor_position + now.duration_since(at).as_secs_f64(),
            _ => self.anchor_position,
        }
    }

    fn apply(&mut self, directive: PlayerDirective, now: Instant) {
        let position = self.position(now);
        match directive {
            PlayerDirective::SeekTo(target) => self.anchor_position = target,
            PlayerDirective::Play => {
                self.anchor_position = position;
                self.playing = true;
            }
            PlayerDirective::Pause => {
                self.anchor_position = position;
                self.playing = false;
            }
        }
        self.anchored_at = Some(now);
    }
}
