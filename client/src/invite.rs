use url::Url;
use urlencoding::encode;

pub const INVITE_SCHEME: &str = "watchparty";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteLink {
    pub room_id: String,
    pub video_id: Option<String>,
}

pub fn build_invite_url(room_id: &str, video_id: Option<&str>) -> String {
    let mut params = vec![format!("room={}", encode(room_id))];
    if let Some(video) = video_id.filter(|v| !v.is_empty()) {
        params.push(format!("video={}", encode(video)));
    }
    format!("{INVITE_SCHEME}://join?{}", params.join("&"))
}

/// Accepts a full `watchparty://` link, an http(s) share link carrying the same
/// query, or a bare `room=..&video=..` query string.
pub fn parse_invite_url(input: &str) -> Option<InviteLink> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let normalized = if trimmed.starts_with("watchparty://")
        || trimmed.starts_with("http://")
        || trimmed.starts_with("https://")
    {
        trimmed.to_string()
    } else {
        format!("{INVITE_SCHEME}://join?{trimmed}")
    };

    let url = Url::parse(&normalized).ok()?;
    let mut room_id = None;
    let mut video_id = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "room" => room_id = Some(value.into_owned()),
            "video" => video_id = Some(value.into_owned()),
            _ => {}
        }
    }

    let room_id = room_id.filter(|id| !id.trim().is_empty())?;
    Some(InviteLink {
        room_id,
        video_id: video_id.filter(|v| !v.is_empty()),
    })
}

pub fn looks_like_invite(arg: &str) -> bool {
    arg.starts_with("watchparty://") || arg.starts_with("http://") || arg.starts_with("https://")
}
