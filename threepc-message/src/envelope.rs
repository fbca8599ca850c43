use crate::errors::{
    ErrorKind,
    Result,
};
use serde_derive::{
    Deserialize,
    Serialize,
};
use serde_json::Value;
use std::collections::BTreeMap;

/// The tag carried by every [`Envelope`], naming which point in the 3PC
/// protocol a message belongs to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTag {
    #[serde(rename = "CANCOMMIT")]
    CanCommit,
    #[serde(rename = "CANCOMMIT_VOTE_YES")]
    CanCommitVoteYes,
    #[serde(rename = "CANCOMMIT_VOTE_NO")]
    CanCommitVoteNo,
    #[serde(rename = "CANCOMMIT_ABORT")]
    CanCommitAbort,
    #[serde(rename = "PRECOMMIT")]
    PreCommit,
    #[serde(rename = "PRECOMMIT_VOTE_YES")]
    PreCommitVoteYes,
    #[serde(rename = "PRECOMMIT_VOTE_NO")]
    PreCommitVoteNo,
    #[serde(rename = "PRECOMMIT_ABORT")]
    PreCommitAbort,
    #[serde(rename = "COMMIT")]
    Commit,
    #[serde(rename = "ABORT")]
    Abort,
    #[serde(rename = "ACK_COMMIT")]
    AckCommit,
    #[serde(rename = "ACK_ABORT")]
    AckAbort,
    #[serde(rename = "QUERY_STATE")]
    QueryState,
    #[serde(rename = "STATE_RESPONSE")]
    StateResponse,
    #[serde(rename = "REQUEST_HISTORY")]
    RequestHistory,
    #[serde(rename = "HISTORY_RESPONSE")]
    HistoryResponse,
}

impl MessageTag {
    /// True for the tags that carry a synchronous yes vote (either phase).
    pub fn is_vote_yes(self) -> bool {
        matches!(self, MessageTag::CanCommitVoteYes | MessageTag::PreCommitVoteYes)
    }

    /// True for the tags that carry a synchronous no vote (either phase).
    pub fn is_vote_no(self) -> bool {
        matches!(self, MessageTag::CanCommitVoteNo | MessageTag::PreCommitVoteNo)
    }
}

/// The wire message exchanged between coordinator and participant:
/// `{msg_type, transaction_id, data, timestamp}`, encoded as a single JSON
/// payload per socket exchange.
///
/// ```
/// use threepc_message::{Envelope, MessageTag};
/// use std::collections::BTreeMap;
///
/// let mut data = BTreeMap::new();
/// data.insert("account".to_string(), "alice".to_string());
///
/// let envelope = Envelope::new(MessageTag::CanCommit, "a1b2c3d4", data);
/// let encoded = envelope.encode().unwrap();
/// let decoded = Envelope::decode(&encoded).unwrap();
///
/// assert_eq!(decoded.msg_type, MessageTag::CanCommit);
/// assert_eq!(decoded.transaction_id, "a1b2c3d4");
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    pub msg_type: MessageTag,
    pub transaction_id: String,
    #[serde(default)]
    pub data: Value,
    pub timestamp: u64,
}

impl Envelope {
    /// Builds an envelope carrying `data` (any serializable mapping), stamped
    /// with the current time.
    pub fn new(
        msg_type: MessageTag,
        transaction_id: impl Into<String>,
        data: impl serde::Serialize,
    ) -> Envelope {
        Envelope {
            msg_type,
            transaction_id: transaction_id.into(),
            data: serde_json::to_value(data).unwrap_or(Value::Null),
            timestamp: now_unix(),
        }
    }

    /// Builds an envelope with no payload beyond the tag and transaction id,
    /// e.g. a vote or an ACK.
    pub fn bare(msg_type: MessageTag, transaction_id: impl Into<String>) -> Envelope {
        Envelope::new(msg_type, transaction_id, BTreeMap::<String, String>::new())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|_| ErrorKind::EncodeError.into())
    }

    pub fn decode(bytes: &[u8]) -> Result<Envelope> {
        serde_json::from_slice(bytes).map_err(|_| ErrorKind::DecodeError.into())
    }

    /// Deserializes `data` into a concrete type, e.g. the transaction
    /// key/value mapping or a `{history: [...]}` payload.
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone()).map_err(|_| ErrorKind::DecodeError.into())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_bare_vote() {
        let envelope = Envelope::bare(MessageTag::CanCommitVoteYes, "deadbeef");
        let encoded = envelope.encode().unwrap();
        let decoded = Envelope::decode(&encoded).unwrap();

        assert_eq!(decoded, envelope);
    }

    #[test]
    fn round_trips_transaction_data() {
        let mut data = BTreeMap::new();
        data.insert("account".to_string(), "alice".to_string());
        data.insert("amount".to_string(), "100".to_string());

        let envelope = Envelope::new(MessageTag::CanCommit, "a1b2c3d4", data.clone());
        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();

        let round_tripped: BTreeMap<String, String> = decoded.data_as().unwrap();
        assert_eq!(round_tripped, data);
    }

    #[test]
    fn rejects_garbage() {
        assert!(Envelope::decode(b"not json").is_err());
    }

    #[test]
    fn tag_renders_as_spec_string() {
        let envelope = Envelope::bare(MessageTag::PreCommitAbort, "tx1");
        let encoded = envelope.encode().unwrap();
        let as_str = String::from_utf8(encoded).unwrap();

        assert!(as_str.contains("\"PRECOMMIT_ABORT\""));
    }
}
