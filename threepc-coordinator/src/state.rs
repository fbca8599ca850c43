use std::{
    collections::{
        BTreeMap,
        HashMap,
    },
    fmt,
};

/// A participant that has registered with this coordinator. Unique by
/// id, lives for coordinator lifetime, never garbage-collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantRegistration {
    pub id: String,
    pub host: String,
    pub port: u16,
}

/// Outcome of a DoCommit-phase ACK, or of an abort-phase ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    AckCommit,
    AckAbort,
    Timeout,
}

/// Monotone except for the crash→recovery path; COMMITTED/ABORTED are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Waiting,
    Waited,
    Preparing,
    Prepared,
    Committing,
    Aborting,
    Committed,
    Aborted,
}

impl TxStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TxStatus::Committed | TxStatus::Aborted)
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TxStatus::Waiting => "WAITING",
            TxStatus::Waited => "WAITED",
            TxStatus::Preparing => "PREPARING",
            TxStatus::Prepared => "PREPARED",
            TxStatus::Committing => "COMMITTING",
            TxStatus::Aborting => "ABORTING",
            TxStatus::Committed => "COMMITTED",
            TxStatus::Aborted => "ABORTED",
        };
        f.write_str(label)
    }
}

/// Coordinator-side bookkeeping for one transaction. Created by
/// `execute_transaction`, mutated by the driver and by the inbound handler
/// receiving delayed vote/ACK frames, never deleted.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub id: String,
    pub data: BTreeMap<String, String>,
    /// Participant ids snapshotted when the transaction started; the driver
    /// uses this list even if the registry changes later.
    pub participants: Vec<String>,
    pub votes_c: HashMap<String, bool>,
    pub votes_p: HashMap<String, bool>,
    pub acks: HashMap<String, AckOutcome>,
    pub status: TxStatus,
}

impl TransactionRecord {
    pub fn new(id: String, data: BTreeMap<String, String>, participants: Vec<String>) -> Self {
        TransactionRecord {
            id,
            data,
            participants,
            votes_c: HashMap::new(),
            votes_p: HashMap::new(),
            acks: HashMap::new(),
            status: TxStatus::Waiting,
        }
    }
}

/// One append-only entry in the coordinator's transaction history,
/// replayed to recovering participants.
#[derive(Debug, Clone, PartialEq, Eq, serde_derive::Serialize, serde_derive::Deserialize)]
pub struct HistoryEntry {
    pub transaction_id: String,
    /// Always `"COMMITTED"` or `"ABORTED"`.
    pub status: String,
    pub data: BTreeMap<String, String>,
    pub timestamp: u64,
}
