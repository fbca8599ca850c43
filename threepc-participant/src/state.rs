use std::collections::{
    BTreeMap,
    HashMap,
    HashSet,
};

/// A CanCommit or PreCommit vote parked while waiting for the operator.
/// The two phases share one slot: only one vote is ever outstanding at a
/// time.
#[derive(Debug, Clone)]
pub struct PendingVote {
    pub transaction_id: String,
    pub data: BTreeMap<String, String>,
}

/// A COMMIT or ABORT decision parked while waiting for the operator's `ack`.
#[derive(Debug, Clone)]
pub struct PendingDecision {
    pub transaction_id: String,
    pub data: BTreeMap<String, String>,
}

/// Four disjoint per-transaction sets/maps plus the two single-slot pending
/// decisions. A transaction moves waited → prepared → (committed |
/// aborted); direct jumps only happen via history replay on recovery.
#[derive(Debug, Default)]
pub struct ParticipantLocalState {
    pub waited: HashSet<String>,
    pub prepared: HashSet<String>,
    pub aborted: HashSet<String>,
    pub committed: HashMap<String, BTreeMap<String, String>>,
    pub pending_vote: Option<PendingVote>,
    pub pending_commit: Option<PendingDecision>,
    pub pending_abort: Option<PendingDecision>,
}

impl ParticipantLocalState {
    /// QUERY_STATE lookup order: committed, then prepared, then waited,
    /// then aborted, else UNKNOWN.
    pub fn status_of(&self, transaction_id: &str) -> &'static str {
        if self.committed.contains_key(transaction_id) {
            "COMMITTED"
        } else if self.prepared.contains(transaction_id) {
            "PREPARED"
        } else if self.waited.contains(transaction_id) {
            "WAITED"
        } else if self.aborted.contains(transaction_id) {
            "ABORTED"
        } else {
            "UNKNOWN"
        }
    }
}
