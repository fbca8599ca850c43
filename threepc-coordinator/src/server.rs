//! The coordinator's TCP front door: a 1-second-timeout accept loop (so it
//! polls the `running` flag) spawning one short-lived task per connection.
//! Only the four administrative line frames ever arrive here.
//! CANCOMMIT/PRECOMMIT/COMMIT/QUERY_STATE are things the coordinator *sends*,
//! never receives.

use crate::{
    errors::Result,
    node::Coordinator,
    state::HistoryEntry,
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
use threepc_message::{
    AdminFrame,
    Envelope,
    MessageTag,
};
use tokio::{
    io::{
        AsyncReadExt,
        AsyncWriteExt,
    },
    net::TcpListener,
};

/// Runs the accept loop until `running` is cleared. Binds with address reuse
/// left to the platform default, same as a fresh `TcpListener::bind`.
pub async fn run(coordinator: Coordinator, running: Arc<AtomicBool>) -> Result<()> {
    let listener = TcpListener::bind((coordinator.host.as_str(), coordinator.port)).await?;
    tracing::info!(host = %coordinator.host, port = coordinator.port, "coordinator listening");

    while running.load(Ordering::SeqCst) {
        match tokio::time::timeout(Duration::from_secs(1), listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(&coordinator, stream).await {
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

async fn handle_connection(coordinator: &Coordinator, mut stream: tokio::net::TcpStream) -> Result<()> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;

    let payload = String::from_utf8_lossy(&buf);
    let frame = AdminFrame::parse(&payload)?;

    match frame {
        AdminFrame::Register {
            participant_id,
            host,
            port,
        } => {
            coordinator.register(&participant_id, host, port)?;
            tracing::info!(participant_id, "participant registered");
            stream.write_all(b"OK").await?;
        }
        AdminFrame::HistoryRequest { participant_id, .. } => {
            let history = coordinator.history_snapshot()?;
            tracing::debug!(participant_id, entries = history.len(), "serving history request");
            let reply = Envelope::new(MessageTag::HistoryResponse, "", HistoryPayload { history });
            stream.write_all(&reply.encode()?).await?;
        }
        AdminFrame::VoteResponse {
            participant_id,
            message,
        } => {
            if coordinator.is_crashed()? {
                tracing::warn!(participant_id, "coordinator crashed, dropping vote response");
            } else {
                apply_vote_response(coordinator, &participant_id, &message)?;
            }
        }
        AdminFrame::AckResponse {
            participant_id,
            message,
        } => {
            if coordinator.is_crashed()? {
                tracing::warn!(participant_id, "coordinator crashed, dropping ack response");
            } else {
                apply_ack_response(coordinator, &participant_id, &message)?;
            }
        }
    }

    Ok(())
}

#[derive(serde_derive::Serialize)]
struct HistoryPayload {
    history: Vec<HistoryEntry>,
}

fn apply_vote_response(coordinator: &Coordinator, participant_id: &str, message: &Envelope) -> Result<()> {
    let tx_id = &message.transaction_id;
    match message.msg_type {
        MessageTag::CanCommitVoteYes => coordinator.record_vote_c(tx_id, participant_id, true),
        MessageTag::CanCommitVoteNo => coordinator.record_vote_c(tx_id, participant_id, false),
        MessageTag::PreCommitVoteYes => coordinator.record_vote_p(tx_id, participant_id, true),
        MessageTag::PreCommitVoteNo => coordinator.record_vote_p(tx_id, participant_id, false),
        other => {
            tracing::warn!(participant_id, tx_id, ?other, "unexpected tag in VOTE_RESPONSE");
            Ok(())
        }
    }
}

fn apply_ack_response(coordinator: &Coordinator, participant_id: &str, message: &Envelope) -> Result<()> {
    use crate::state::AckOutcome;

    let tx_id = &message.transaction_id;
    match message.msg_type {
        MessageTag::AckCommit => coordinator.record_ack(tx_id, participant_id, AckOutcome::AckCommit),
        MessageTag::AckAbort => coordinator.record_ack(tx_id, participant_id, AckOutcome::AckAbort),
        other => {
            tracing::warn!(participant_id, tx_id, ?other, "unexpected tag in ACK_RESPONSE");
            Ok(())
        }
    }
}
