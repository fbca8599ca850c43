//! Coordinator recovery: clears the crash flag, then re-probes every
//! non-terminal transaction's participants and drives it to a terminal
//! state using the *current* participant registry.

use crate::{
    driver,
    errors::Result,
    node::Coordinator,
    state::TxStatus,
    transport,
};
use std::collections::HashMap;
use threepc_message::{
    Envelope,
    MessageTag,
};

/// Runs recovery to completion, returning the number of transactions it
/// drove to a terminal state.
pub async fn recover(coordinator: &Coordinator) -> Result<usize> {
    coordinator.set_crashed(false)?;

    let unfinished = coordinator.unfinished_transactions()?;
    tracing::info!(count = unfinished.len(), "recovery scanning unfinished transactions");

    let mut completed = 0;
    for tx in unfinished {
        tracing::info!(transaction_id = %tx.id, status = ?tx.status, "recovering transaction");
        recover_one(coordinator, &tx.id, tx.status).await?;
        completed += 1;
    }

    Ok(completed)
}

async fn recover_one(coordinator: &Coordinator, tx_id: &str, status: TxStatus) -> Result<()> {
    let registry = coordinator.registered_participant_ids()?;
    let snapshot = coordinator
        .transaction(tx_id)?
        .ok_or_else(|| crate::errors::ErrorKind::UnknownTransaction {
            transaction_id: tx_id.to_string(),
        })?
        .participants;
    let reachable: Vec<String> = snapshot
        .into_iter()
        .filter(|p| registry.contains(p))
        .collect();
    let reports = probe_participants(coordinator, tx_id, &reachable).await?;

    let counts = tally(&reports);
    tracing::info!(
        %tx_id,
        waited = counts.waited,
        prepared = counts.prepared,
        committed = counts.committed,
        aborted = counts.aborted,
        "recovery probe results"
    );

    match status {
        TxStatus::Waiting | TxStatus::Waited => {
            driver::complete_abort(coordinator, tx_id, &registry, MessageTag::Abort, true).await?;
        }
        TxStatus::Preparing | TxStatus::Prepared => {
            // Unlike the other branches, this decision is read from the
            // transaction's own recorded votes, not the probed counts.
            let tx = coordinator
                .transaction(tx_id)?
                .ok_or_else(|| crate::errors::ErrorKind::UnknownTransaction {
                    transaction_id: tx_id.to_string(),
                })?;
            let unanimous_yes = !tx.votes_c.is_empty()
                && tx.participants.iter().all(|p| tx.votes_c.get(p).copied().unwrap_or(false));

            if unanimous_yes {
                driver::complete_commit(coordinator, tx_id, &registry, &tx.data, true).await?;
            } else {
                driver::complete_abort(coordinator, tx_id, &registry, MessageTag::Abort, true).await?;
            }
        }
        TxStatus::Committing | TxStatus::Committed => {
            let tx = coordinator
                .transaction(tx_id)?
                .ok_or_else(|| crate::errors::ErrorKind::UnknownTransaction {
                    transaction_id: tx_id.to_string(),
                })?;
            driver::complete_commit(coordinator, tx_id, &registry, &tx.data, true).await?;
        }
        TxStatus::Aborting | TxStatus::Aborted => {
            driver::complete_abort(coordinator, tx_id, &registry, MessageTag::Abort, true).await?;
        }
    }

    Ok(())
}

#[derive(Debug, Default)]
struct ReportCounts {
    waited: usize,
    prepared: usize,
    committed: usize,
    aborted: usize,
}

/// Sends QUERY_STATE to every participant in the transaction's original
/// snapshot that is still registered, concurrently, bypassing the crash
/// gate. Unlike the strictly sequential phase sends of the live driver,
/// recovery probes have no ordering requirement. Ids no longer registered,
/// or unreachable, are simply absent from the result.
async fn probe_participants(
    coordinator: &Coordinator,
    tx_id: &str,
    reachable: &[String],
) -> Result<HashMap<String, String>> {
    let probes = reachable.iter().map(|participant_id| {
        let participant_id = participant_id.clone();
        async move {
            let message = Envelope::bare(MessageTag::QueryState, tx_id);
            let reply = transport::send_message(coordinator, &participant_id, &message, true).await?;
            Ok::<_, crate::errors::Error>((participant_id, reply))
        }
    });

    let mut reports = HashMap::new();
    for result in futures::future::join_all(probes).await {
        let (participant_id, reply) = result?;
        if let Some(reply) = reply {
            if reply.msg_type == MessageTag::StateResponse {
                if let Ok(status) = reply.data_as::<StateResponsePayload>() {
                    reports.insert(participant_id, status.status);
                }
            }
        }
    }

    Ok(reports)
}

#[derive(Debug, serde_derive::Deserialize)]
struct StateResponsePayload {
    status: String,
}

fn tally(reports: &HashMap<String, String>) -> ReportCounts {
    let mut counts = ReportCounts::default();
    for status in reports.values() {
        match status.as_str() {
            "WAITED" => counts.waited += 1,
            "PREPARED" => counts.prepared += 1,
            "COMMITTED" => counts.committed += 1,
            "ABORTED" => counts.aborted += 1,
            _ => {}
        }
    }
    counts
}
