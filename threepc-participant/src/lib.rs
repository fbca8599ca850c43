//! Participant half of the three-phase-commit testbed: per-transaction local
//! state (`state`), the `Participant` node (`node`), inbound message
//! handling with pending-slot timeouts and failure injection (`handler`),
//! outbound exchanges with the coordinator (`transport`), the accept loop
//! (`server`), and crash recovery (`recovery`).

pub mod errors;
pub mod handler;
pub mod node;
pub mod recovery;
pub mod server;
pub mod state;
pub mod transport;

pub use node::Participant;
pub use state::{
    ParticipantLocalState,
    PendingDecision,
    PendingVote,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use threepc_message::{
        Envelope,
        MessageTag,
    };

    #[tokio::test]
    async fn cancommit_parks_a_pending_vote_and_does_not_reply_synchronously() {
        let participant = Participant::new("P1", "127.0.0.1", 0, "127.0.0.1", 0);
        let mut data = BTreeMap::new();
        data.insert("k".to_string(), "v".to_string());

        let message = Envelope::new(MessageTag::CanCommit, "tx1", data.clone());
        let reply = handler::process_message(&participant, message).await.unwrap();

        assert!(reply.is_none());
        let pending = participant.pending_vote().unwrap().unwrap();
        assert_eq!(pending.transaction_id, "tx1");
        assert_eq!(pending.data, data);
    }

    #[tokio::test]
    async fn commit_for_unprepared_transaction_is_refused_synchronously() {
        let participant = Participant::new("P1", "127.0.0.1", 0, "127.0.0.1", 0);
        let message = Envelope::bare(MessageTag::Commit, "tx1");

        let reply = handler::process_message(&participant, message).await.unwrap().unwrap();
        assert_eq!(reply.msg_type, MessageTag::AckAbort);
    }

    #[tokio::test]
    async fn query_state_reports_prepared_then_committed() {
        let participant = Participant::new("P1", "127.0.0.1", 0, "127.0.0.1", 0);
        participant.move_waited_to_prepared("tx1").unwrap();

        let message = Envelope::bare(MessageTag::QueryState, "tx1");
        let reply = handler::process_message(&participant, message).await.unwrap().unwrap();
        let payload: serde_json::Value = reply.data_as().unwrap();
        assert_eq!(payload["status"], "PREPARED");

        participant.commit("tx1", BTreeMap::new()).unwrap();
        let message = Envelope::bare(MessageTag::QueryState, "tx1");
        let reply = handler::process_message(&participant, message).await.unwrap().unwrap();
        let payload: serde_json::Value = reply.data_as().unwrap();
        assert_eq!(payload["status"], "COMMITTED");
    }

    #[tokio::test]
    async fn operator_ack_abort_accepts_a_pending_commit() {
        let participant = Participant::new("P1", "127.0.0.1", 0, "127.0.0.1", 0);
        participant.move_waited_to_prepared("tx1").unwrap();
        let message = Envelope::bare(MessageTag::Commit, "tx1");
        handler::process_message(&participant, message).await.unwrap();

        assert!(participant.pending_commit().unwrap().is_some());

        // `ack abort` against an outstanding *commit* offer downgrades it.
        let acted = handler::operator_ack(&participant, false).await.unwrap();
        assert_eq!(acted.as_deref(), Some("tx1"));
        assert!(participant.pending_commit().unwrap().is_none());
    }

    #[tokio::test]
    async fn failure_injection_auto_votes_no_without_parking_state() {
        let participant = Participant::new("P1", "127.0.0.1", 0, "127.0.0.1", 0);
        participant.set_failure_rate(1.0).unwrap();

        let message = Envelope::bare(MessageTag::CanCommit, "tx1");
        let reply = handler::process_message(&participant, message).await.unwrap().unwrap();

        assert_eq!(reply.msg_type, MessageTag::CanCommitVoteNo);
        assert!(participant.pending_vote().unwrap().is_none());
    }

    #[tokio::test]
    async fn crashed_participant_ignores_all_inbound_messages() {
        let participant = Participant::new("P1", "127.0.0.1", 0, "127.0.0.1", 0);
        participant.set_crashed(true).unwrap();

        let message = Envelope::bare(MessageTag::CanCommit, "tx1");
        let reply = handler::process_message(&participant, message).await.unwrap();

        assert!(reply.is_none());
        assert!(participant.pending_vote().unwrap().is_none());
    }

    #[tokio::test]
    async fn history_replay_moves_prepared_into_committed_or_aborted() {
        let participant = Participant::new("P1", "127.0.0.1", 0, "127.0.0.1", 0);
        participant.move_waited_to_prepared("tx1").unwrap();
        participant.move_waited_to_prepared("tx2").unwrap();

        let mut data = BTreeMap::new();
        data.insert("k".to_string(), "v".to_string());
        participant.apply_history_status("tx1", "COMMITTED", data.clone()).unwrap();
        participant.apply_history_status("tx2", "ABORTED", BTreeMap::new()).unwrap();

        assert_eq!(participant.committed_data("tx1").unwrap(), Some(data));
        assert!(!participant.is_prepared("tx1").unwrap());
        assert!(!participant.is_prepared("tx2").unwrap());
    }
}
