//! Inbound message dispatch and the operator-facing vote/ack commands.
//! Every CANCOMMIT/PRECOMMIT/COMMIT/abort handler parks its decision in a
//! pending slot and arms a timeout task; the operator commands in this
//! module are the other way those slots get cleared.

use crate::{
    errors::Result,
    node::Participant,
    state::{
        PendingDecision,
        PendingVote,
    },
    transport,
};
use rand::Rng;
use std::{
    collections::BTreeMap,
    time::Duration,
};
use threepc_message::{
    Envelope,
    MessageTag,
};

const VOTE_TIMEOUT: Duration = Duration::from_secs(60);
const COMMIT_TIMEOUT: Duration = Duration::from_secs(60);
const ABORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Dispatches one inbound message. Returns `None` when the reply will arrive
/// later out of band (a VOTE_RESPONSE or ACK_RESPONSE admin frame).
pub async fn process_message(participant: &Participant, message: Envelope) -> Result<Option<Envelope>> {
    if participant.is_crashed()? {
        tracing::debug!(transaction_id = %message.transaction_id, "crashed, ignoring inbound message");
        return Ok(None);
    }

    let failure_rate = participant.failure_rate()?;
    if failure_rate > 0.0 && rand::thread_rng().gen::<f64>() < failure_rate {
        tracing::warn!(rate = failure_rate, msg_type = ?message.msg_type, "injected failure");
        return Ok(match message.msg_type {
            MessageTag::CanCommit => Some(Envelope::bare(MessageTag::CanCommitVoteNo, &message.transaction_id)),
            MessageTag::PreCommit => Some(Envelope::bare(MessageTag::PreCommitVoteNo, &message.transaction_id)),
            _ => None,
        });
    }

    match message.msg_type {
        MessageTag::CanCommit => handle_cancommit(participant, message).await,
        MessageTag::PreCommit => handle_precommit(participant, message).await,
        MessageTag::Commit => handle_commit(participant, message).await,
        MessageTag::CanCommitAbort | MessageTag::PreCommitAbort | MessageTag::Abort => {
            handle_abort(participant, message).await
        }
        MessageTag::QueryState => handle_query_state(participant, &message),
        _ => Ok(None),
    }
}

async fn handle_cancommit(participant: &Participant, message: Envelope) -> Result<Option<Envelope>> {
    let data: BTreeMap<String, String> = message.data_as().unwrap_or_default();
    let transaction_id = message.transaction_id.clone();

    participant.set_pending_vote(Some(PendingVote {
        transaction_id: transaction_id.clone(),
        data,
    }))?;
    tracing::info!(%transaction_id, "CANCOMMIT received, awaiting operator vote");

    arm_vote_timeout(participant.clone(), transaction_id, true);
    Ok(None)
}

async fn handle_precommit(participant: &Participant, message: Envelope) -> Result<Option<Envelope>> {
    let data: BTreeMap<String, String> = message.data_as().unwrap_or_default();
    let transaction_id = message.transaction_id.clone();

    participant.set_pending_vote(Some(PendingVote {
        transaction_id: transaction_id.clone(),
        data,
    }))?;
    tracing::info!(%transaction_id, "PRECOMMIT received, awaiting operator vote");

    arm_vote_timeout(participant.clone(), transaction_id, false);
    Ok(None)
}

fn arm_vote_timeout(participant: Participant, transaction_id: String, can_commit_phase: bool) {
    tokio::spawn(async move {
        tokio::time::sleep(VOTE_TIMEOUT).await;
        if participant.take_pending_vote_if(&transaction_id).unwrap_or(None).is_some() {
            tracing::info!(%transaction_id, "vote timed out, auto-voting NO");
            if can_commit_phase {
                send_cancommit_vote(&participant, &transaction_id, false).await;
            } else {
                send_precommit_vote(&participant, &transaction_id, false).await;
            }
        }
    });
}

async fn handle_commit(participant: &Participant, message: Envelope) -> Result<Option<Envelope>> {
    let transaction_id = message.transaction_id.clone();

    if !participant.is_prepared(&transaction_id)? {
        tracing::warn!(%transaction_id, "COMMIT for a transaction that is not prepared, refusing");
        return Ok(Some(Envelope::bare(MessageTag::AckAbort, &transaction_id)));
    }

    let data: BTreeMap<String, String> = message.data_as().unwrap_or_default();
    participant.set_pending_commit(Some(PendingDecision {
        transaction_id: transaction_id.clone(),
        data,
    }))?;
    tracing::info!(%transaction_id, "COMMIT received, awaiting operator ack");

    let participant = participant.clone();
    tokio::spawn(async move {
        tokio::time::sleep(COMMIT_TIMEOUT).await;
        if let Ok(Some(pending)) = participant.take_pending_commit_if(&transaction_id) {
            tracing::info!(%transaction_id, "commit ack timed out, auto-committing");
            let _ = participant.commit(&pending.transaction_id, pending.data);
            send_ack(&participant, &transaction_id, true).await;
        }
    });

    Ok(None)
}

async fn handle_abort(participant: &Participant, message: Envelope) -> Result<Option<Envelope>> {
    let transaction_id = message.transaction_id.clone();
    let data: BTreeMap<String, String> = message.data_as().unwrap_or_default();

    participant.set_pending_abort(Some(PendingDecision {
        transaction_id: transaction_id.clone(),
        data,
    }))?;
    tracing::info!(%transaction_id, msg_type = ?message.msg_type, "abort directive received, awaiting operator ack");

    let participant = participant.clone();
    tokio::spawn(async move {
        tokio::time::sleep(ABORT_TIMEOUT).await;
        if participant.take_pending_abort_if(&transaction_id).unwrap_or(None).is_some() {
            tracing::info!(%transaction_id, "abort ack timed out, auto-aborting");
            let _ = participant.abort(&transaction_id);
            send_ack(&participant, &transaction_id, false).await;
        }
    });

    Ok(None)
}

fn handle_query_state(participant: &Participant, message: &Envelope) -> Result<Option<Envelope>> {
    let transaction_id = &message.transaction_id;
    let status = participant.status_of(transaction_id)?;
    let data = participant.committed_data(transaction_id)?.unwrap_or_default();

    tracing::debug!(%transaction_id, status, "answering state query");
    Ok(Some(Envelope::new(
        MessageTag::StateResponse,
        transaction_id,
        StateResponsePayload {
            status: status.to_string(),
            data,
        },
    )))
}

#[derive(serde_derive::Serialize)]
struct StateResponsePayload {
    status: String,
    data: BTreeMap<String, String>,
}

/// Sends the CanCommit vote and, on YES, records `waited`. Used by both the
/// 60s auto-NO timeout and the operator's `cancommit vote` command.
pub async fn send_cancommit_vote(participant: &Participant, transaction_id: &str, yes: bool) {
    if yes {
        if let Err(err) = participant.mark_waited(transaction_id) {
            tracing::warn!(%err, "failed to record waited state");
        }
    }
    let tag = if yes {
        MessageTag::CanCommitVoteYes
    } else {
        MessageTag::CanCommitVoteNo
    };
    transport::send_vote_response(participant, Envelope::bare(tag, transaction_id)).await;
}

/// Sends the PreCommit vote and, on YES, moves `waited` → `prepared`.
pub async fn send_precommit_vote(participant: &Participant, transaction_id: &str, yes: bool) {
    if yes {
        if let Err(err) = participant.move_waited_to_prepared(transaction_id) {
            tracing::warn!(%err, "failed to record prepared state");
        }
    }
    let tag = if yes {
        MessageTag::PreCommitVoteYes
    } else {
        MessageTag::PreCommitVoteNo
    };
    transport::send_vote_response(participant, Envelope::bare(tag, transaction_id)).await;
}

pub async fn send_ack(participant: &Participant, transaction_id: &str, commit: bool) {
    let tag = if commit { MessageTag::AckCommit } else { MessageTag::AckAbort };
    transport::send_ack_response(participant, Envelope::bare(tag, transaction_id)).await;
}

/// The `cancommit vote yes|no` / `precommit vote yes|no` operator command:
/// both phases share the single `pending_vote` slot. Returns the
/// transaction id acted on, or `None` if nothing was pending.
pub async fn operator_vote(participant: &Participant, can_commit_phase: bool, yes: bool) -> Result<Option<String>> {
    let pending = match participant.take_pending_vote()? {
        Some(pending) => pending,
        None => return Ok(None),
    };

    if can_commit_phase {
        send_cancommit_vote(participant, &pending.transaction_id, yes).await;
    } else {
        send_precommit_vote(participant, &pending.transaction_id, yes).await;
    }
    Ok(Some(pending.transaction_id))
}

/// The `ack commit|abort` operator command: `ack abort` is accepted against
/// either an outstanding pending commit or pending abort, so an operator
/// can always downgrade a COMMIT offer to an abort ack.
pub async fn operator_ack(participant: &Participant, commit: bool) -> Result<Option<String>> {
    let pending = if commit {
        match participant.take_pending_commit()? {
            Some(pending) => pending,
            None => return Ok(None),
        }
    } else {
        match participant.take_pending_commit()? {
            Some(pending) => pending,
            None => match participant.take_pending_abort()? {
                Some(pending) => pending,
                None => return Ok(None),
            },
        }
    };

    if commit {
        participant.commit(&pending.transaction_id, pending.data.clone())?;
    } else {
        participant.abort(&pending.transaction_id)?;
    }
    send_ack(participant, &pending.transaction_id, commit).await;

    Ok(Some(pending.transaction_id))
}
