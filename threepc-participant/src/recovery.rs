//! Participant recovery: re-register, then replay the coordinator's
//! history. The `waited` set and any pending slot are deliberately left
//! alone; the coordinator's own recovery will resend or reclassify those
//! transactions.

use crate::{
    errors::Result,
    node::Participant,
    transport,
};

/// Runs recovery to completion. Returns `true` if both re-registration and
/// history sync succeeded. If re-registration fails, `crashed` is left set
/// and the caller should let the operator retry. If only history sync
/// fails, `crashed` is still cleared: the participant is marked recovered
/// anyway.
pub async fn recover(participant: &Participant) -> Result<bool> {
    tracing::info!(participant_id = %participant.id, "starting recovery");

    if !transport::register(participant).await? {
        tracing::warn!("re-registration with coordinator failed");
        return Ok(false);
    }
    tracing::info!("re-registered with coordinator");

    match transport::request_history(participant).await {
        Ok(history) => {
            for record in &history {
                participant.apply_history_status(&record.transaction_id, &record.status, record.data.clone())?;
            }
            participant.set_crashed(false)?;
            tracing::info!(entries = history.len(), "recovery complete, history synchronized");
            Ok(true)
        }
        Err(err) => {
            tracing::warn!(%err, "history sync failed, marking recovered anyway");
            participant.set_crashed(false)?;
            Ok(false)
        }
    }
}
