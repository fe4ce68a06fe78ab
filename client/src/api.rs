use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::room::Participant;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Room metadata served by the HTTP backend at join time.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMetadata {
    #[serde(alias = "id")]
    pub room_id: String,
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

/// Thin client for the parts of the backend API the room session needs.
#[derive(Debug, Clone)]
pub struct RoomApi {
    client: Client,
    base_url: String,
}

impl RoomApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn fetch_room(&self, room_id: &str) -> Result<RoomMetadata> {
        let url = format!("{}/rooms/{}", self.base_url, urlencoding::encode(room_id));
        let response = self
            .client
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("Failed to reach room API at {url}"))?
            .error_for_status()
            .with_context(|| format!("Room API rejected lookup of room {room_id}"))?;

        response
            .json::<RoomMetadata>()
            .await
            .context("Failed to parse room metadata")
    }

    /// Wake a sleeping hosted backend before opening the socket. Failures are
    /// logged and otherwise ignored; the socket handshake is the real test.
    pub async fn warm_up(&self, label: &str, ws_url: &str) {
        let Some(health_url) = health_url_from_ws(ws_url) else {
            return;
        };
        tracing::info!("Warming up {label} backend at {health_url}");
        match self
            .client
            .get(&health_url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => tracing::info!(
                "Warmup request to {label} backend at {} returned {}",
                health_url,
                response.status()
            ),
            Err(e) => tracing::warn!(
                "Warmup request to {label} backend at {} failed: {}",
                health_url,
                e
            ),
        }
    }
}

/// `wss://host/ws` becomes `https://host/healthz`.
pub fn health_url_from_ws(ws_url: &str) -> Option<String> {
    let parsed = Url::parse(ws_url).ok()?;
    let scheme = match parsed.scheme() {
        "ws" => "http",
        "wss" => "https",
        _ => return None,
    };

    let mut http = parsed;
    http.set_scheme(scheme).ok()?;
    http.set_path("/healthz");
    http.set_query(None);
    http.set_fragment(None);
    Some(http.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_url_maps_socket_schemes() {
        assert_eq!(
            health_url_from_ws("wss://watchparty.onrender.com/ws?room=r1").as_deref(),
            Some("https://watchparty.onrender.com/healthz")
        );
        assert_eq!(
            health_url_from_ws("ws://localhost:3005/ws").as_deref(),
            Some("http://localhost:3005/healthz")
        );
        assert_eq!(health_url_from_ws("https://example.com"), None);
        assert_eq!(health_url_from_ws("::"), None);
    }

    #[test]
    fn metadata_tolerates_sparse_payloads() {
        let meta: RoomMetadata = serde_json::from_str(r#"{"id":"r1"}"#).unwrap();
        assert_eq!(meta.room_id, "r1");
        assert!(meta.video_id.is_none());
        assert!(meta.participants.is_empty());

        let meta: RoomMetadata = serde_json::from_str(
            r#"{"roomId":"r2","videoId":"m1","durationSeconds":5400.0,
                "participants":[{"id":"u1","displayName":"Ana"}]}"#,
        )
        .unwrap();
        assert_eq!(meta.duration_seconds, Some(5400.0));
        assert_eq!(meta.participants[0].display_name, "Ana");
    }

    #[test]
    fn base_url_trailing_slash_is_ignored() {
        let api = RoomApi::new("http://localhost:8080/api/");
        assert_eq!(api.base_url, "http://localhost:8080/api");
    }
}
