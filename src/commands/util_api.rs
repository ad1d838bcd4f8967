use crate::commands::Reply;
use crate::error::Result;
use crate::peer::ice::check_ice_server_availability;
use crate::peer::types::ServerConfig;
use crate::session::Session;

/// chat over the control channel
pub async fn say(session: &mut Session, text: &str) -> Result<Reply> {
    session.send_chat(text).await?;
    Ok(Reply::Silent)
}

pub fn fingerprint(session: &Session) -> Reply {
    match session.fingerprint() {
        Some(fp) => Reply::Text(format!("fingerprint {fp}")),
        None => Reply::Text("not connected yet".into()),
    }
}

pub fn status(session: &Session) -> Reply {
    let role = session
        .role()
        .map(|r| format!("{r:?}").to_lowercase())
        .unwrap_or_else(|| "-".into());
    let media = match session.local_media() {
        Some(m) => format!(
            "held (audio{} video{})",
            if m.audio_muted() { " muted" } else { "" },
            if m.video_muted() { " muted" } else { "" }
        ),
        None => "none".into(),
    };
    let since = session
        .transport_since()
        .map(|t| format!(", since {}", t.format("%H:%M:%S")))
        .unwrap_or_default();
    Reply::Text(format!(
        "transport: {} ({role}{since})\ncall: {}{}\nlocal media: {media}\nremote tracks: {}",
        session.connectivity(),
        session.call_state(),
        session
            .remote_party()
            .map(|p| format!(" with {p}"))
            .unwrap_or_default(),
        session.remote_tracks().len(),
    ))
}

/// Gathers against one server and reports whether it answered
pub async fn probe(url: &str, username: Option<String>, credential: Option<String>) -> Reply {
    let kind = if url.starts_with("turn") { "turn" } else { "stun" };
    let config = ServerConfig {
        id: "probe".into(),
        r#type: kind.into(),
        url: url.into(),
        username,
        credential,
    };
    if check_ice_server_availability(&config).await {
        Reply::Text(format!("{url}: reachable"))
    } else {
        Reply::Text(format!("{url}: no {kind} candidate"))
    }
}

/// manual disconnect
pub async fn disconnect(session: &mut Session) -> Result<Reply> {
    session.disconnect().await;
    Ok(Reply::Text("disconnected".into()))
}
