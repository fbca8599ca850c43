use crate::{
    errors::Result,
    state::{
        ParticipantLocalState,
        PendingDecision,
        PendingVote,
    },
};
use std::{
    collections::{
        BTreeMap,
        HashMap,
    },
    sync::{
        Arc,
        Mutex,
    },
};

struct Inner {
    state: ParticipantLocalState,
    crashed: bool,
    failure_rate: f64,
}

/// The participant node: local transaction state, crash flag, and injected
/// failure rate behind one mutex. Cheap to clone: every connection task and
/// timeout task gets its own handle onto the same state.
#[derive(Clone)]
pub struct Participant {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub coordinator_host: String,
    pub coordinator_port: u16,
    inner: Arc<Mutex<Inner>>,
}

impl Participant {
    pub fn new(
        id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        coordinator_host: impl Into<String>,
        coordinator_port: u16,
    ) -> Participant {
        Participant {
            id: id.into(),
            host: host.into(),
            port,
            coordinator_host: coordinator_host.into(),
            coordinator_port,
            inner: Arc::new(Mutex::new(Inner {
                state: ParticipantLocalState::default(),
                crashed: false,
                failure_rate: 0.0,
            })),
        }
    }

    pub fn is_crashed(&self) -> Result<bool> {
        Ok(self.inner.lock()?.crashed)
    }

    pub fn set_crashed(&self, crashed: bool) -> Result<()> {
        self.inner.lock()?.crashed = crashed;
        Ok(())
    }

    pub fn failure_rate(&self) -> Result<f64> {
        Ok(self.inner.lock()?.failure_rate)
    }

    /// Sets the rate unconditionally; the caller validates the value is in
    /// `[0.0, 1.0]` before calling.
    pub fn set_failure_rate(&self, rate: f64) -> Result<()> {
        self.inner.lock()?.failure_rate = rate;
        Ok(())
    }

    pub fn status_of(&self, transaction_id: &str) -> Result<&'static str> {
        Ok(self.inner.lock()?.state.status_of(transaction_id))
    }

    pub fn committed_data(&self, transaction_id: &str) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self.inner.lock()?.state.committed.get(transaction_id).cloned())
    }

    pub fn committed_snapshot(&self) -> Result<HashMap<String, BTreeMap<String, String>>> {
        Ok(self.inner.lock()?.state.committed.clone())
    }

    /// `(waited, prepared, committed, aborted)` counts, for `status`.
    pub fn counts(&self) -> Result<(usize, usize, usize, usize)> {
        let inner = self.inner.lock()?;
        Ok((
            inner.state.waited.len(),
            inner.state.prepared.len(),
            inner.state.committed.len(),
            inner.state.aborted.len(),
        ))
    }

    pub fn pending_vote(&self) -> Result<Option<PendingVote>> {
        Ok(self.inner.lock()?.state.pending_vote.clone())
    }

    pub fn pending_commit(&self) -> Result<Option<PendingDecision>> {
        Ok(self.inner.lock()?.state.pending_commit.clone())
    }

    pub fn pending_abort(&self) -> Result<Option<PendingDecision>> {
        Ok(self.inner.lock()?.state.pending_abort.clone())
    }

    pub fn set_pending_vote(&self, pending: Option<PendingVote>) -> Result<()> {
        self.inner.lock()?.state.pending_vote = pending;
        Ok(())
    }

    pub fn set_pending_commit(&self, pending: Option<PendingDecision>) -> Result<()> {
        self.inner.lock()?.state.pending_commit = pending;
        Ok(())
    }

    pub fn set_pending_abort(&self, pending: Option<PendingDecision>) -> Result<()> {
        self.inner.lock()?.state.pending_abort = pending;
        Ok(())
    }

    /// Unconditional take, used by the operator-driven `cancommit vote` /
    /// `precommit vote` command.
    pub fn take_pending_vote(&self) -> Result<Option<PendingVote>> {
        Ok(self.inner.lock()?.state.pending_vote.take())
    }

    pub fn take_pending_commit(&self) -> Result<Option<PendingDecision>> {
        Ok(self.inner.lock()?.state.pending_commit.take())
    }

    pub fn take_pending_abort(&self) -> Result<Option<PendingDecision>> {
        Ok(self.inner.lock()?.state.pending_abort.take())
    }

    /// Takes the pending vote only if it still refers to `transaction_id`,
    /// used by the armed timeout task so an unrelated later transaction
    /// can't be swept up by a stale timer.
    pub fn take_pending_vote_if(&self, transaction_id: &str) -> Result<Option<PendingVote>> {
        let mut inner = self.inner.lock()?;
        if inner.state.pending_vote.as_ref().map(|p| p.transaction_id.as_str()) == Some(transaction_id) {
            Ok(inner.state.pending_vote.take())
        } else {
            Ok(None)
        }
    }

    pub fn take_pending_commit_if(&self, transaction_id: &str) -> Result<Option<PendingDecision>> {
        let mut inner = self.inner.lock()?;
        if inner.state.pending_commit.as_ref().map(|p| p.transaction_id.as_str()) == Some(transaction_id) {
            Ok(inner.state.pending_commit.take())
        } else {
            Ok(None)
        }
    }

    pub fn take_pending_abort_if(&self, transaction_id: &str) -> Result<Option<PendingDecision>> {
        let mut inner = self.inner.lock()?;
        if inner.state.pending_abort.as_ref().map(|p| p.transaction_id.as_str()) == Some(transaction_id) {
            Ok(inner.state.pending_abort.take())
        } else {
            Ok(None)
        }
    }

    pub fn is_prepared(&self, transaction_id: &str) -> Result<bool> {
        Ok(self.inner.lock()?.state.prepared.contains(transaction_id))
    }

    pub fn mark_waited(&self, transaction_id: &str) -> Result<()> {
        self.inner.lock()?.state.waited.insert(transaction_id.to_string());
        Ok(())
    }

    pub fn move_waited_to_prepared(&self, transaction_id: &str) -> Result<()> {
        let mut inner = self.inner.lock()?;
        inner.state.waited.remove(transaction_id);
        inner.state.prepared.insert(transaction_id.to_string());
        Ok(())
    }

    pub fn commit(&self, transaction_id: &str, data: BTreeMap<String, String>) -> Result<()> {
        let mut inner = self.inner.lock()?;
        inner.state.prepared.remove(transaction_id);
        inner.state.committed.insert(transaction_id.to_string(), data);
        Ok(())
    }

    pub fn abort(&self, transaction_id: &str) -> Result<()> {
        let mut inner = self.inner.lock()?;
        inner.state.prepared.remove(transaction_id);
        inner.state.aborted.insert(transaction_id.to_string());
        Ok(())
    }

    /// Applies one history entry from HISTORY_RESPONSE: the waited set and
    /// any pending slot are deliberately left untouched.
    pub fn apply_history_status(
        &self,
        transaction_id: &str,
        status: &str,
        data: BTreeMap<String, String>,
    ) -> Result<()> {
        let mut inner = self.inner.lock()?;
        match status {
            "COMMITTED" => {
                inner.state.prepared.remove(transaction_id);
                inner.state.committed.insert(transaction_id.to_string(), data);
            }
            "ABORTED" => {
                inner.state.prepared.remove(transaction_id);
                inner.state.aborted.insert(transaction_id.to_string());
            }
            _ => {}
        }
        Ok(())
    }
}
