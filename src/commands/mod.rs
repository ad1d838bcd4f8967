//! Line-oriented operator commands.

pub mod call_api;
pub mod negotiation_api;
pub mod util_api;

use crate::error::Result;
use crate::logger::SessionEvent;
use crate::session::Session;
use std::str::FromStr;

pub const HELP: &str = "\
commands:
  offer                 create an offer to copy to the peer
  paste <blob>          apply whatever the peer sent (offer or answer)
  accept <offer>        answer a peer's offer
  answer <answer>       apply the peer's answer to our offer
  say <text>            send a chat message
  call | pickup | decline | hangup
  mute-audio | mute-video | warmup
  fingerprint | status | disconnect
  probe <url> [user pass]
  help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Offer,
    Paste(String),
    Accept(String),
    Answer(String),
    Call,
    Pickup,
    Decline,
    Hangup,
    MuteAudio,
    MuteVideo,
    Warmup,
    Say(String),
    Fingerprint,
    Status,
    Probe {
        url: String,
        username: Option<String>,
        credential: Option<String>,
    },
    Disconnect,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),
    #[error("'{0}' needs an argument")]
    MissingArgument(&'static str),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let arg = |name: &'static str| {
            if rest.is_empty() {
                Err(CommandError::MissingArgument(name))
            } else {
                Ok(rest.to_string())
            }
        };

        let cmd = match word.to_ascii_lowercase().as_str() {
            "offer" => Command::Offer,
            "paste" => Command::Paste(arg("paste")?),
            "accept" => Command::Accept(arg("accept")?),
            "answer" => Command::Answer(arg("answer")?),
            "call" => Command::Call,
            "pickup" => Command::Pickup,
            "decline" => Command::Decline,
            "hangup" => Command::Hangup,
            "mute-audio" => Command::MuteAudio,
            "mute-video" => Command::MuteVideo,
            "warmup" => Command::Warmup,
            "say" => Command::Say(arg("say")?),
            "fingerprint" => Command::Fingerprint,
            "status" => Command::Status,
            "probe" => {
                let mut parts = arg("probe")?
                    .split_whitespace()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
                    .into_iter();
                Command::Probe {
                    url: parts.next().unwrap_or_default(),
                    username: parts.next(),
                    credential: parts.next(),
                }
            }
            "disconnect" => Command::Disconnect,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(cmd)
    }
}

/// What the front end should do after a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Silent,
    Quit,
}

pub async fn dispatch(session: &mut Session, command: Command) -> Result<Reply> {
    match command {
        Command::Offer => negotiation_api::offer(session).await,
        Command::Paste(blob) => negotiation_api::paste(session, &blob).await,
        Command::Accept(blob) => negotiation_api::accept(session, &blob).await,
        Command::Answer(blob) => negotiation_api::answer(session, &blob).await,
        Command::Call => call_api::call(session).await,
        Command::Pickup => call_api::pickup(session).await,
        Command::Decline => call_api::decline(session).await,
        Command::Hangup => call_api::hangup(session).await,
        Command::MuteAudio => Ok(call_api::mute_audio(session)),
        Command::MuteVideo => Ok(call_api::mute_video(session)),
        Command::Warmup => call_api::warmup(session).await,
        Command::Say(text) => util_api::say(session, &text).await,
        Command::Fingerprint => Ok(util_api::fingerprint(session)),
        Command::Status => Ok(util_api::status(session)),
        Command::Probe {
            url,
            username,
            credential,
        } => Ok(util_api::probe(&url, username, credential).await),
        Command::Disconnect => util_api::disconnect(session).await,
        Command::Help => Ok(Reply::Text(HELP.to_string())),
        Command::Quit => Ok(Reply::Quit),
    }
}

/// One terminal line per event
pub fn render_event(event: &SessionEvent) -> String {
    match event {
        SessionEvent::Connectivity(state) => format!("* transport {state}"),
        SessionEvent::ChannelReady { label } => format!("* channel '{label}' ready"),
        SessionEvent::ChannelClosed => "* channel closed".to_string(),
        SessionEvent::CallState { from, to } => format!("* call {from} -> {to}"),
        SessionEvent::IncomingCall { from } => {
            format!("* incoming call from {from} ('pickup' or 'decline')")
        }
        SessionEvent::Chat(message) => format!("< {message}"),
        SessionEvent::RemoteTrack {
            id,
            stream_id,
            kind,
        } => format!("* remote {kind} track {id} (stream {stream_id})"),
        SessionEvent::MediaError(err) => format!("! {}", err.user_message()),
        SessionEvent::Fingerprint(fp) => format!("* fingerprint {fp} (compare with your peer)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallState;
    use crate::media::MediaError;

    #[test]
    fn test_parse_simple_words() {
        assert_eq!("offer".parse::<Command>().unwrap(), Command::Offer);
        assert_eq!("  HANGUP ".parse::<Command>().unwrap(), Command::Hangup);
        assert_eq!("mute-video".parse::<Command>().unwrap(), Command::MuteVideo);
        assert_eq!("exit".parse::<Command>().unwrap(), Command::Quit);
    }

    #[test]
    fn test_parse_keeps_argument_text() {
        assert_eq!(
            "say hello   there".parse::<Command>().unwrap(),
            Command::Say("hello   there".into())
        );
        assert_eq!(
            r#"paste {"type":"offer","sdp":"v=0"}"#.parse::<Command>().unwrap(),
            Command::Paste(r#"{"type":"offer","sdp":"v=0"}"#.into())
        );
    }

    #[test]
    fn test_parse_probe() {
        assert_eq!(
            "probe turn:relay.example.org:3478 u p".parse::<Command>().unwrap(),
            Command::Probe {
                url: "turn:relay.example.org:3478".into(),
                username: Some("u".into()),
                credential: Some("p".into()),
            }
        );
        assert_eq!(
            "probe stun:stun.l.google.com:19302".parse::<Command>().unwrap(),
            Command::Probe {
                url: "stun:stun.l.google.com:19302".into(),
                username: None,
                credential: None,
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "say".parse::<Command>().unwrap_err(),
            CommandError::MissingArgument("say")
        );
        assert_eq!(
            "dance".parse::<Command>().unwrap_err(),
            CommandError::Unknown("dance".into())
        );
    }

    #[test]
    fn test_render_event() {
        assert_eq!(
            render_event(&SessionEvent::CallState {
                from: CallState::Idle,
                to: CallState::Calling
            }),
            "* call idle -> calling"
        );
        assert_eq!(render_event(&SessionEvent::Chat("hi".into())), "< hi");
        assert!(render_event(&SessionEvent::MediaError(MediaError::DeviceBusy)).starts_with("! "));
    }
}
