//! Outbound one-shot exchanges to the coordinator: REGISTER, the delayed
//! VOTE_RESPONSE/ACK_RESPONSE admin frames, and HISTORY_REQUEST. Each opens
//! its own socket and closes it after one reply, same discipline as
//! [`threepc_coordinator::transport`].

use crate::{
    errors::Result,
    node::Participant,
};
use std::{
    collections::BTreeMap,
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
    net::TcpStream,
    time::timeout,
};

const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);
const REPLY_BUF_SIZE: usize = 4096;
const HISTORY_BUF_SIZE: usize = 65536;

async fn one_shot(participant: &Participant, payload: &str, buf_size: usize) -> Result<Vec<u8>> {
    let mut stream = timeout(
        EXCHANGE_TIMEOUT,
        TcpStream::connect((
            participant.coordinator_host.as_str(),
            participant.coordinator_port,
        )),
    )
    .await??;

    timeout(EXCHANGE_TIMEOUT, stream.write_all(payload.as_bytes())).await??;
    stream.shutdown().await.ok();

    let mut buf = vec![0u8; buf_size];
    let read = timeout(EXCHANGE_TIMEOUT, stream.read(&mut buf)).await??;
    buf.truncate(read);
    Ok(buf)
}

/// Sends `REGISTER|<id>|<host>|<port>` and reports whether the coordinator
/// answered `OK`. Network failures are reported as `Ok(false)` rather than
/// propagated as an error.
pub async fn register(participant: &Participant) -> Result<bool> {
    let frame = AdminFrame::Register {
        participant_id: participant.id.clone(),
        host: participant.host.clone(),
        port: participant.port,
    };

    match one_shot(participant, &frame.render()?, REPLY_BUF_SIZE).await {
        Ok(reply) => Ok(reply == b"OK"),
        Err(err) => {
            tracing::warn!(%err, "registration with coordinator failed");
            Ok(false)
        }
    }
}

pub async fn send_vote_response(participant: &Participant, message: Envelope) {
    let frame = AdminFrame::VoteResponse {
        participant_id: participant.id.clone(),
        message,
    };
    deliver(participant, frame).await;
}

pub async fn send_ack_response(participant: &Participant, message: Envelope) {
    let frame = AdminFrame::AckResponse {
        participant_id: participant.id.clone(),
        message,
    };
    deliver(participant, frame).await;
}

async fn deliver(participant: &Participant, frame: AdminFrame) {
    let rendered = match frame.render() {
        Ok(rendered) => rendered,
        Err(err) => {
            tracing::warn!(%err, "failed to render admin frame");
            return;
        }
    };
    if let Err(err) = one_shot(participant, &rendered, REPLY_BUF_SIZE).await {
        tracing::warn!(%err, "delayed response delivery failed");
    }
}

/// One entry of the coordinator's transaction history, as carried inside a
/// HISTORY_RESPONSE payload.
#[derive(Debug, serde_derive::Deserialize)]
pub struct HistoryRecord {
    pub transaction_id: String,
    pub status: String,
    pub data: BTreeMap<String, String>,
    #[allow(dead_code)]
    pub timestamp: u64,
}

#[derive(Debug, serde_derive::Deserialize)]
struct HistoryPayload {
    history: Vec<HistoryRecord>,
}

/// Requests the full history and returns it in coordinator append order.
pub async fn request_history(participant: &Participant) -> Result<Vec<HistoryRecord>> {
    let mut data = BTreeMap::new();
    data.insert("participant_id".to_string(), participant.id.clone());
    let request = Envelope::new(MessageTag::RequestHistory, "HISTORY", data);

    let frame = AdminFrame::HistoryRequest {
        participant_id: participant.id.clone(),
        message: request,
    };

    let reply = one_shot(participant, &frame.render()?, HISTORY_BUF_SIZE).await?;
    if reply.is_empty() {
        return Ok(Vec::new());
    }

    let envelope = Envelope::decode(&reply)?;
    let payload: HistoryPayload = envelope.data_as()?;
    Ok(payload.history)
}
