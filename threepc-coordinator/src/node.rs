use crate::{
    errors::Result,
    state::{
        AckOutcome,
        HistoryEntry,
        ParticipantRegistration,
        TransactionRecord,
        TxStatus,
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
    participants: HashMap<String, ParticipantRegistration>,
    transactions: HashMap<String, TransactionRecord>,
    history: Vec<HistoryEntry>,
    crashed: bool,
}

/// The coordinator node: participant registry, transaction table, and
/// history behind one mutex. All entry points take `&Coordinator`; no
/// blocking I/O ever happens while the lock is held.
#[derive(Clone)]
pub struct Coordinator {
    pub host: String,
    pub port: u16,
    inner: Arc<Mutex<Inner>>,
}

impl Coordinator {
    pub fn new(host: impl Into<String>, port: u16) -> Coordinator {
        Coordinator {
            host: host.into(),
            port,
            inner: Arc::new(Mutex::new(Inner {
                participants: HashMap::new(),
                transactions: HashMap::new(),
                history: Vec::new(),
                crashed: false,
            })),
        }
    }

    /// Idempotent upsert into the participant map.
    pub fn register(&self, id: impl Into<String>, host: impl Into<String>, port: u16) -> Result<()> {
        let id = id.into();
        let mut inner = self.inner.lock()?;
        inner.participants.insert(
            id.clone(),
            ParticipantRegistration {
                id,
                host: host.into(),
                port,
            },
        );
        Ok(())
    }

    pub fn participant_address(&self, id: &str) -> Result<Option<(String, u16)>> {
        let inner = self.inner.lock()?;
        Ok(inner
            .participants
            .get(id)
            .map(|p| (p.host.clone(), p.port)))
    }

    /// Snapshot of currently registered participant ids, used by
    /// `execute_transaction` and by recovery, which intentionally re-reads
    /// the *current* registry rather than a transaction's original
    /// snapshot.
    pub fn registered_participant_ids(&self) -> Result<Vec<String>> {
        let inner = self.inner.lock()?;
        Ok(inner.participants.keys().cloned().collect())
    }

    pub fn participant_count(&self) -> Result<usize> {
        Ok(self.inner.lock()?.participants.len())
    }

    /// Snapshot of full registration records, for the operator `list` command.
    pub fn registered_participants(&self) -> Result<Vec<ParticipantRegistration>> {
        Ok(self.inner.lock()?.participants.values().cloned().collect())
    }

    pub fn is_crashed(&self) -> Result<bool> {
        Ok(self.inner.lock()?.crashed)
    }

    pub fn set_crashed(&self, crashed: bool) -> Result<()> {
        self.inner.lock()?.crashed = crashed;
        Ok(())
    }

    pub fn history_snapshot(&self) -> Result<Vec<HistoryEntry>> {
        Ok(self.inner.lock()?.history.clone())
    }

    pub fn insert_transaction(&self, tx: TransactionRecord) -> Result<()> {
        let mut inner = self.inner.lock()?;
        inner.transactions.insert(tx.id.clone(), tx);
        Ok(())
    }

    pub fn transaction(&self, tx_id: &str) -> Result<Option<TransactionRecord>> {
        Ok(self.inner.lock()?.transactions.get(tx_id).cloned())
    }

    /// Every transaction whose status is non-terminal, as scanned by recovery.
    pub fn unfinished_transactions(&self) -> Result<Vec<TransactionRecord>> {
        let inner = self.inner.lock()?;
        Ok(inner
            .transactions
            .values()
            .filter(|tx| !tx.status.is_terminal())
            .cloned()
            .collect())
    }

    pub fn set_status(&self, tx_id: &str, status: TxStatus) -> Result<()> {
        if let Some(tx) = self.inner.lock()?.transactions.get_mut(tx_id) {
            tx.status = status;
        }
        Ok(())
    }

    /// Folds a CanCommit vote into `votes_c`, whether it arrived as an
    /// immediate synchronous reply or a later `VOTE_RESPONSE` frame: there is
    /// one tally map regardless of arrival path.
    pub fn record_vote_c(&self, tx_id: &str, participant_id: &str, yes: bool) -> Result<()> {
        if let Some(tx) = self.inner.lock()?.transactions.get_mut(tx_id) {
            tx.votes_c.insert(participant_id.to_string(), yes);
        }
        Ok(())
    }

    pub fn record_vote_p(&self, tx_id: &str, participant_id: &str, yes: bool) -> Result<()> {
        if let Some(tx) = self.inner.lock()?.transactions.get_mut(tx_id) {
            tx.votes_p.insert(participant_id.to_string(), yes);
        }
        Ok(())
    }

    pub fn record_ack(&self, tx_id: &str, participant_id: &str, outcome: AckOutcome) -> Result<()> {
        if let Some(tx) = self.inner.lock()?.transactions.get_mut(tx_id) {
            tx.acks.insert(participant_id.to_string(), outcome);
        }
        Ok(())
    }

    pub fn votes_c_count(&self, tx_id: &str) -> Result<usize> {
        Ok(self
            .inner
            .lock()?
            .transactions
            .get(tx_id)
            .map(|tx| tx.votes_c.len())
            .unwrap_or(0))
    }

    pub fn votes_p_count(&self, tx_id: &str) -> Result<usize> {
        Ok(self
            .inner
            .lock()?
            .transactions
            .get(tx_id)
            .map(|tx| tx.votes_p.len())
            .unwrap_or(0))
    }

    pub fn acks_count(&self, tx_id: &str) -> Result<usize> {
        Ok(self
            .inner
            .lock()?
            .transactions
            .get(tx_id)
            .map(|tx| tx.acks.len())
            .unwrap_or(0))
    }

    pub fn append_history(
        &self,
        transaction_id: &str,
        status: &str,
        data: BTreeMap<String, String>,
    ) -> Result<()> {
        let mut inner = self.inner.lock()?;
        inner.history.push(HistoryEntry {
            transaction_id: transaction_id.to_string(),
            status: status.to_string(),
            data,
            timestamp: now_unix(),
        });
        Ok(())
    }

    pub fn list_transactions(&self) -> Result<Vec<TransactionRecord>> {
        Ok(self.inner.lock()?.transactions.values().cloned().collect())
    }
}

fn now_unix() -> u64 {
    use std::time::{
        SystemTime,
        UNIX_EPOCH,
    };

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
