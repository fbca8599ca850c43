//! The per-transaction 3PC driver: CanCommit, PreCommit, DoCommit, and the
//! shared abort path. One invocation of [`execute_transaction`] runs on its
//! own task so the coordinator's command loop stays responsive.
//!
//! `complete_commit`/`complete_abort` are shared with [`crate::recovery`],
//! which re-runs the ack-collection half of this module against the
//! *current* participant registry rather than a transaction's snapshot.

use crate::{
    errors::Result,
    node::Coordinator,
    state::{
        AckOutcome,
        TransactionRecord,
        TxStatus,
    },
    transport,
};
use std::{
    collections::{
        BTreeMap,
        HashMap,
    },
    time::Duration,
};
use threepc_message::{
    Envelope,
    MessageTag,
};

const WAIT_TICKS: u32 = 60;
const TICK: Duration = Duration::from_secs(1);
const LOG_EVERY: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    CanCommit,
    PreCommit,
}

enum WaitOutcome {
    Reached,
    TimedOut,
    Crashed,
}

/// Starts a brand new transaction: allocates an id, snapshots the current
/// participant registry, and drives it through all three phases. Returns
/// `Ok(true)` only if the transaction ends COMMITTED.
pub async fn execute_transaction(
    coordinator: &Coordinator,
    data: BTreeMap<String, String>,
) -> Result<bool> {
    if coordinator.is_crashed()? {
        tracing::warn!("coordinator is crashed, refusing to start a transaction");
        return Ok(false);
    }

    let tx_id = format!("{:08x}", rand::random::<u32>());
    let participants = coordinator.registered_participant_ids()?;

    coordinator.insert_transaction(TransactionRecord::new(
        tx_id.clone(),
        data.clone(),
        participants.clone(),
    ))?;

    if participants.is_empty() {
        tracing::warn!(%tx_id, "no registered participants, failing transaction immediately");
        return Ok(false);
    }

    tracing::info!(%tx_id, participants = participants.len(), "starting transaction");

    coordinator.set_status(&tx_id, TxStatus::Waiting)?;
    for participant_id in &participants {
        if coordinator.is_crashed()? {
            tracing::warn!(%tx_id, "crashed before CanCommit sends completed");
            return Ok(false);
        }
        send_vote_request(coordinator, &tx_id, participant_id, Phase::CanCommit, &data).await?;
    }

    match wait_for_votes(coordinator, &tx_id, &participants, Phase::CanCommit).await? {
        WaitOutcome::Crashed => return Ok(false),
        WaitOutcome::Reached | WaitOutcome::TimedOut => {}
    }
    coordinator.set_status(&tx_id, TxStatus::Waited)?;

    let tx = required_transaction(coordinator, &tx_id)?;
    if !all_yes(&participants, &tx.votes_c) {
        tracing::info!(%tx_id, "CanCommit did not reach unanimous yes");
        return complete_abort(
            coordinator,
            &tx_id,
            &participants,
            MessageTag::CanCommitAbort,
            false,
        )
        .await;
    }

    coordinator.set_status(&tx_id, TxStatus::Preparing)?;
    for participant_id in &participants {
        if coordinator.is_crashed()? {
            tracing::warn!(%tx_id, "crashed before PreCommit sends completed");
            return Ok(false);
        }
        send_vote_request(coordinator, &tx_id, participant_id, Phase::PreCommit, &data).await?;
    }

    match wait_for_votes(coordinator, &tx_id, &participants, Phase::PreCommit).await? {
        WaitOutcome::Crashed => return Ok(false),
        WaitOutcome::Reached | WaitOutcome::TimedOut => {}
    }
    coordinator.set_status(&tx_id, TxStatus::Prepared)?;

    let tx = required_transaction(coordinator, &tx_id)?;
    if !all_yes(&participants, &tx.votes_p) {
        tracing::info!(%tx_id, "PreCommit did not reach unanimous yes");
        return complete_abort(
            coordinator,
            &tx_id,
            &participants,
            MessageTag::PreCommitAbort,
            false,
        )
        .await;
    }

    complete_commit(coordinator, &tx_id, &participants, &data, false).await
}

/// Sends a CANCOMMIT or PRECOMMIT request to one participant and, if the
/// participant answers synchronously with a vote (the injected-failure-rate
/// path), folds it straight into the right tally map.
async fn send_vote_request(
    coordinator: &Coordinator,
    tx_id: &str,
    participant_id: &str,
    phase: Phase,
    data: &BTreeMap<String, String>,
) -> Result<()> {
    let tag = match phase {
        Phase::CanCommit => MessageTag::CanCommit,
        Phase::PreCommit => MessageTag::PreCommit,
    };
    let message = Envelope::new(tag, tx_id, data.clone());

    if let Some(reply) = transport::send_message(coordinator, participant_id, &message, false).await? {
        if reply.msg_type.is_vote_yes() {
            record_vote(coordinator, tx_id, participant_id, phase, true)?;
        } else if reply.msg_type.is_vote_no() {
            record_vote(coordinator, tx_id, participant_id, phase, false)?;
        }
    }
    Ok(())
}

fn record_vote(
    coordinator: &Coordinator,
    tx_id: &str,
    participant_id: &str,
    phase: Phase,
    yes: bool,
) -> Result<()> {
    match phase {
        Phase::CanCommit => coordinator.record_vote_c(tx_id, participant_id, yes),
        Phase::PreCommit => coordinator.record_vote_p(tx_id, participant_id, yes),
    }
}

/// Waits up to 60s, in 1s ticks, for `votes_c`/`votes_p` to reach
/// `participants.len()`. Missing votes at timeout are recorded as NO. Checks
/// `crashed` at every tick.
async fn wait_for_votes(
    coordinator: &Coordinator,
    tx_id: &str,
    participants: &[String],
    phase: Phase,
) -> Result<WaitOutcome> {
    let target = participants.len();

    for tick in 0..WAIT_TICKS {
        if coordinator.is_crashed()? {
            return Ok(WaitOutcome::Crashed);
        }

        let count = match phase {
            Phase::CanCommit => coordinator.votes_c_count(tx_id)?,
            Phase::PreCommit => coordinator.votes_p_count(tx_id)?,
        };
        if count >= target {
            return Ok(WaitOutcome::Reached);
        }

        if tick > 0 && tick % LOG_EVERY == 0 {
            tracing::info!(%tx_id, count, target, ?phase, "waiting for votes");
        }
        tokio::time::sleep(TICK).await;
    }

    let tx = required_transaction(coordinator, tx_id)?;
    let voted: &HashMap<String, bool> = match phase {
        Phase::CanCommit => &tx.votes_c,
        Phase::PreCommit => &tx.votes_p,
    };
    let missing: Vec<String> = participants
        .iter()
        .filter(|p| !voted.contains_key(*p))
        .cloned()
        .collect();
    drop(tx);

    for participant_id in &missing {
        tracing::warn!(%tx_id, participant_id, ?phase, "vote timed out, counting as NO");
        record_vote(coordinator, tx_id, participant_id, phase, false)?;
    }

    Ok(WaitOutcome::TimedOut)
}

/// Waits up to 60s, in 1s ticks, for `acks` to reach `participants.len()`.
/// Missing acks at timeout are recorded as [`AckOutcome::Timeout`].
async fn wait_for_acks(
    coordinator: &Coordinator,
    tx_id: &str,
    participants: &[String],
) -> Result<WaitOutcome> {
    let target = participants.len();

    for tick in 0..WAIT_TICKS {
        if coordinator.is_crashed()? {
            return Ok(WaitOutcome::Crashed);
        }

        let count = coordinator.acks_count(tx_id)?;
        if count >= target {
            return Ok(WaitOutcome::Reached);
        }

        if tick > 0 && tick % LOG_EVERY == 0 {
            tracing::info!(%tx_id, count, target, "waiting for acks");
        }
        tokio::time::sleep(TICK).await;
    }

    let tx = required_transaction(coordinator, tx_id)?;
    let missing: Vec<String> = participants
        .iter()
        .filter(|p| !tx.acks.contains_key(*p))
        .cloned()
        .collect();
    drop(tx);

    for participant_id in &missing {
        tracing::warn!(%tx_id, participant_id, "ack timed out");
        coordinator.record_ack(tx_id, participant_id, AckOutcome::Timeout)?;
    }

    Ok(WaitOutcome::TimedOut)
}

/// Sends the abort tag (CANCOMMIT_ABORT / PRECOMMIT_ABORT from the live
/// driver, or plain ABORT from recovery) to every participant, collects
/// ACK_ABORT, appends an ABORTED history entry, and leaves the transaction
/// ABORTED. Shared between the driver and [`crate::recovery`].
pub(crate) async fn complete_abort(
    coordinator: &Coordinator,
    tx_id: &str,
    participants: &[String],
    abort_tag: MessageTag,
    force: bool,
) -> Result<bool> {
    coordinator.set_status(tx_id, TxStatus::Aborting)?;

    for participant_id in participants {
        if coordinator.is_crashed()? && !force {
            tracing::warn!(%tx_id, "crashed before abort sends completed");
            return Ok(false);
        }
        let message = Envelope::bare(abort_tag, tx_id);
        if let Some(reply) =
            transport::send_message(coordinator, participant_id, &message, force).await?
        {
            record_ack_reply(coordinator, tx_id, participant_id, &reply)?;
        }
    }

    if let WaitOutcome::Crashed = wait_for_acks(coordinator, tx_id, participants).await? {
        return Ok(false);
    }

    let tx = required_transaction(coordinator, tx_id)?;
    coordinator.append_history(tx_id, "ABORTED", tx.data.clone())?;
    coordinator.set_status(tx_id, TxStatus::Aborted)?;
    tracing::info!(%tx_id, "transaction aborted");
    Ok(false)
}

/// Sends COMMIT to every participant, collects ACK_COMMIT, and appends a
/// history entry. If any participant fails to ACK_COMMIT in time the history
/// is recorded ABORTED regardless: an asymmetric down-coding, since
/// participants may still locally commit via their own auto-ack timeout.
/// Shared with [`crate::recovery`].
pub(crate) async fn complete_commit(
    coordinator: &Coordinator,
    tx_id: &str,
    participants: &[String],
    data: &BTreeMap<String, String>,
    force: bool,
) -> Result<bool> {
    coordinator.set_status(tx_id, TxStatus::Committing)?;

    for participant_id in participants {
        if coordinator.is_crashed()? && !force {
            tracing::warn!(%tx_id, "crashed before commit sends completed");
            return Ok(false);
        }
        let message = Envelope::new(MessageTag::Commit, tx_id, data.clone());
        if let Some(reply) =
            transport::send_message(coordinator, participant_id, &message, force).await?
        {
            record_ack_reply(coordinator, tx_id, participant_id, &reply)?;
        }
    }

    if let WaitOutcome::Crashed = wait_for_acks(coordinator, tx_id, participants).await? {
        return Ok(false);
    }

    let tx = required_transaction(coordinator, tx_id)?;
    let all_committed = participants
        .iter()
        .all(|p| matches!(tx.acks.get(p), Some(AckOutcome::AckCommit)));

    if all_committed {
        coordinator.append_history(tx_id, "COMMITTED", tx.data.clone())?;
        coordinator.set_status(tx_id, TxStatus::Committed)?;
        tracing::info!(%tx_id, "transaction committed");
        Ok(true)
    } else {
        coordinator.append_history(tx_id, "ABORTED", tx.data.clone())?;
        coordinator.set_status(tx_id, TxStatus::Aborted)?;
        tracing::warn!(%tx_id, "ack collection incomplete at commit, recording aborted");
        Ok(false)
    }
}

fn record_ack_reply(
    coordinator: &Coordinator,
    tx_id: &str,
    participant_id: &str,
    reply: &Envelope,
) -> Result<()> {
    match reply.msg_type {
        MessageTag::AckCommit => coordinator.record_ack(tx_id, participant_id, AckOutcome::AckCommit),
        MessageTag::AckAbort => coordinator.record_ack(tx_id, participant_id, AckOutcome::AckAbort),
        _ => Ok(()),
    }
}

fn all_yes(participants: &[String], votes: &HashMap<String, bool>) -> bool {
    participants.iter().all(|p| votes.get(p).copied().unwrap_or(false))
}

fn required_transaction(coordinator: &Coordinator, tx_id: &str) -> Result<TransactionRecord> {
    coordinator
        .transaction(tx_id)?
        .ok_or_else(|| crate::errors::ErrorKind::UnknownTransaction {
            transaction_id: tx_id.to_string(),
        }.into())
}
