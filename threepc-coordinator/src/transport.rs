//! The one-shot per-participant TCP exchange: connect, write the envelope,
//! read one reply, close. A socket is created per exchange; there is no
//! connection pooling.

use crate::node::Coordinator;
use std::time::Duration;
use threepc_message::Envelope;
use tokio::{
    io::{
        AsyncReadExt,
        AsyncWriteExt,
    },
    net::TcpStream,
    time::timeout,
};

const CONNECT_RECV_TIMEOUT: Duration = Duration::from_secs(5);
const REPLY_BUF_SIZE: usize = 4096;

/// Sends `message` to `participant_id` and waits (up to 5s) for a reply.
/// Returns `Ok(None)` both when the participant closes without replying
/// (it is waiting on its own operator) and when the coordinator is crashed
/// and `force` is false.
pub async fn send_message(
    coordinator: &Coordinator,
    participant_id: &str,
    message: &Envelope,
    force: bool,
) -> crate::errors::Result<Option<Envelope>> {
    if coordinator.is_crashed()? && !force {
        tracing::warn!(
            participant_id,
            "coordinator is crashed, refusing to send"
        );
        return Ok(None);
    }

    let address = match coordinator.participant_address(participant_id)? {
        Some(addr) => addr,
        None => {
            tracing::warn!(participant_id, "participant is not registered");
            return Ok(None);
        }
    };

    match exchange(&address.0, address.1, message).await {
        Ok(reply) => Ok(reply),
        Err(err) => {
            tracing::warn!(participant_id, %err, "message exchange failed");
            Ok(None)
        }
    }
}

async fn exchange(
    host: &str,
    port: u16,
    message: &Envelope,
) -> crate::errors::Result<Option<Envelope>> {
    let mut stream = timeout(CONNECT_RECV_TIMEOUT, TcpStream::connect((host, port))).await??;

    let encoded = message.encode()?;
    timeout(CONNECT_RECV_TIMEOUT, stream.write_all(&encoded)).await??;
    stream.shutdown().await.ok();

    let mut buf = vec![0u8; REPLY_BUF_SIZE];
    let read = match timeout(CONNECT_RECV_TIMEOUT, stream.read(&mut buf)).await {
        Ok(result) => result?,
        Err(_) => return Ok(None),
    };

    if read == 0 {
        return Ok(None);
    }

    Ok(Some(Envelope::decode(&buf[..read])?))
}
