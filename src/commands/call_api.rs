use crate::commands::Reply;
use crate::error::Result;
use crate::session::Session;

pub async fn call(session: &mut Session) -> Result<Reply> {
    session.start_call().await?;
    Ok(Reply::Silent)
}

pub async fn pickup(session: &mut Session) -> Result<Reply> {
    session.accept_call().await?;
    Ok(Reply::Silent)
}

pub async fn decline(session: &mut Session) -> Result<Reply> {
    session.decline_call().await?;
    Ok(Reply::Silent)
}

pub async fn hangup(session: &mut Session) -> Result<Reply> {
    session.hang_up().await;
    Ok(Reply::Silent)
}

pub fn mute_audio(session: &mut Session) -> Reply {
    mute_reply("audio", session.toggle_audio_mute())
}

pub fn mute_video(session: &mut Session) -> Reply {
    mute_reply("video", session.toggle_video_mute())
}

fn mute_reply(kind: &str, muted: Option<bool>) -> Reply {
    match muted {
        Some(true) => Reply::Text(format!("{kind} muted")),
        Some(false) => Reply::Text(format!("{kind} unmuted")),
        None => Reply::Text("no local media".into()),
    }
}

/// Capture before a call so pickup is instant
pub async fn warmup(session: &mut Session) -> Result<Reply> {
    session.warm_up_media().await?;
    Ok(Reply::Text("local media ready".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mute_reply() {
        assert_eq!(mute_reply("audio", Some(true)), Reply::Text("audio muted".into()));
        assert_eq!(mute_reply("video", Some(false)), Reply::Text("video unmuted".into()));
        assert_eq!(mute_reply("audio", None), Reply::Text("no local media".into()));
    }
}
