//! Serverless peer-to-peer calls and chat.
//!
//! Two peers bootstrap a WebRTC transport from session descriptions they copy
//! to each other by hand. Once the transport is up, a small call-signaling
//! protocol and chat run over its control channel.

pub mod call;
pub mod commands;
pub mod config;
pub mod error;
pub mod logger;
pub mod media;
pub mod peer;
pub mod session;
pub mod store;
mod utils;

pub use config::SessionConfig;
pub use error::{Error, Result};
pub use logger::{EventEmitter, SessionEvent};
pub use session::{Session, SessionInput};

use crate::commands::{dispatch, render_event, Command, Reply, HELP};
use crate::media::SyntheticCapture;
use crate::store::{JsonFileStore, MetadataStore};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Drive one session from stdin until `quit` or end of input
pub async fn run(config: SessionConfig) -> Result<()> {
    config.validate()?;

    let (events, mut event_rx) = EventEmitter::channel();
    let (session, mut inputs) = Session::new(
        config.clone(),
        Arc::new(SyntheticCapture::default()),
        events,
    );
    let mut session = match &config.metadata_path {
        Some(path) => {
            let store = JsonFileStore::new(path);
            match store.load() {
                Ok(Some(last)) => info!(
                    session_id = %last.session_id,
                    fingerprint = ?last.fingerprint,
                    connected_at = %last.connected_at,
                    "Last session"
                ),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), "Ignoring unreadable session metadata: {e}"),
            }
            session.with_store(Box::new(store))
        }
        None => session,
    };

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let command = match line.parse::<Command>() {
                    Ok(command) => command,
                    Err(e) => {
                        eprintln!("{e}");
                        continue;
                    }
                };
                match dispatch(&mut session, command).await {
                    Ok(Reply::Text(text)) => println!("{text}"),
                    Ok(Reply::Silent) => {}
                    Ok(Reply::Quit) => break,
                    Err(e) => eprintln!("error: {e}"),
                }
            }
            Some(input) = inputs.recv() => session.handle(input).await,
            Some(event) = event_rx.recv() => println!("{}", render_event(&event)),
        }
    }

    session.disconnect().await;
    while let Ok(event) = event_rx.try_recv() {
        println!("{}", render_event(&event));
    }
    Ok(())
}
