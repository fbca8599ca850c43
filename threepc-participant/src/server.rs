//! The participant's TCP front door: same 1-second-timeout accept loop as
//! the coordinator, but inbound payloads are dispatched directly as JSON
//! envelopes. The participant never receives an administrative line frame,
//! only CANCOMMIT/PRECOMMIT/COMMIT/abort/QUERY_STATE messages.

use crate::{
    errors::Result,
    handler,
    node::Participant,
};
use std::{
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
    time::Duration,
};
use threepc_message::Envelope;
use tokio::{
    io::{
        AsyncReadExt,
        AsyncWriteExt,
    },
    net::TcpListener,
};

pub async fn run(participant: Participant, running: Arc<AtomicBool>) -> Result<()> {
    let listener = TcpListener::bind((participant.host.as_str(), participant.port)).await?;
    tracing::info!(host = %participant.host, port = participant.port, "participant listening");

    while running.load(Ordering::SeqCst) {
        match tokio::time::timeout(Duration::from_secs(1), listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                let participant = participant.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(&participant, stream).await {
                        tracing::warn!(%peer, %err, "connection handling failed");
                    }
                });
            }
            Ok(Err(err)) => {
                tracing::warn!(%err, "accept failed");
            }
            Err(_) => {
                // accept timed out; loop back around and re-check `running`.
            }
        }
    }

    Ok(())
}

async fn handle_connection(participant: &Participant, mut stream: tokio::net::TcpStream) -> Result<()> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    if buf.is_empty() {
        return Ok(());
    }

    let message = Envelope::decode(&buf)?;
    tracing::debug!(
        msg_type = ?message.msg_type,
        transaction_id = %message.transaction_id,
        "received message"
    );

    if let Some(reply) = handler::process_message(participant, message).await? {
        stream.write_all(&reply.encode()?).await?;
    }

    Ok(())
}
