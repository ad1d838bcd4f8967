use crate::commands::Reply;
use crate::error::Result;
use crate::peer::codec::decode_description;
use crate::session::Session;

/// A-side: fresh offer to hand to the peer
pub async fn offer(session: &mut Session) -> Result<Reply> {
    let desc = session.create_offer().await?;
    let encoded = session.encode(&desc)?;
    Ok(Reply::Text(format!("offer (send to peer):\n{encoded}")))
}

/// Whatever the peer sent; offers are answered, answers applied
pub async fn paste(session: &mut Session, blob: &str) -> Result<Reply> {
    match session.receive_description(blob).await? {
        Some(answer) => Ok(Reply::Text(format!("answer (send back to peer):\n{answer}"))),
        None => Ok(Reply::Text("answer applied, connecting...".into())),
    }
}

/// B-side: answer the peer's offer
pub async fn accept(session: &mut Session, blob: &str) -> Result<Reply> {
    let remote = decode_description(blob)?;
    let desc = session.accept_offer_and_create_answer(&remote).await?;
    let encoded = session.encode(&desc)?;
    Ok(Reply::Text(format!("answer (send back to peer):\n{encoded}")))
}

/// A-side: apply the peer's answer
pub async fn answer(session: &mut Session, blob: &str) -> Result<Reply> {
    let remote = decode_description(blob)?;
    session.apply_answer(&remote).await?;
    Ok(Reply::Text("answer applied, connecting...".into()))
}
