//! Coordinator half of the three-phase-commit testbed: the participant
//! registry and transaction table (`node`), the 3PC driver (`driver`), crash
//! recovery (`recovery`), the one-shot TCP exchange helper (`transport`),
//! and the inbound accept loop (`server`).

pub mod driver;
pub mod errors;
pub mod node;
pub mod recovery;
pub mod server;
pub mod state;
pub mod transport;

pub use node::Coordinator;
pub use state::{
    AckOutcome,
    HistoryEntry,
    ParticipantRegistration,
    TransactionRecord,
    TxStatus,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        collections::BTreeMap,
        sync::{
            atomic::{
                AtomicBool,
                Ordering,
            },
            Arc,
        },
    };
    use threepc_message::{
        AdminFrame,
        Envelope,
        MessageTag,
    };
    use tokio::{
        io::{
            AsyncReadExt,
            AsyncWriteExt,
        },
        net::{
            TcpListener,
            TcpStream,
        },
    };

    /// Spawns a fake participant on an ephemeral port that always answers
    /// CANCOMMIT/PRECOMMIT with a synchronous YES vote, and COMMIT/abort
    /// tags with an empty reply (as if it parked the decision and will ACK
    /// later out of band).
    async fn spawn_yes_participant() -> (String, u16, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    if stream.read_to_end(&mut buf).await.is_err() {
                        return;
                    }
                    if let Ok(message) = Envelope::decode(&buf) {
                        let reply = match message.msg_type {
                            MessageTag::CanCommit => {
                                Some(Envelope::bare(MessageTag::CanCommitVoteYes, &message.transaction_id))
                            }
                            MessageTag::PreCommit => {
                                Some(Envelope::bare(MessageTag::PreCommitVoteYes, &message.transaction_id))
                            }
                            _ => None,
                        };
                        if let Some(reply) = reply {
                            let _ = stream.write_all(&reply.encode().unwrap()).await;
                        }
                    }
                });
            }
        });

        ("127.0.0.1".to_string(), port, handle)
    }

    #[tokio::test]
    async fn votes_fold_in_from_synchronous_replies() {
        let coordinator = Coordinator::new("127.0.0.1", 0);
        let (host, port, _server) = spawn_yes_participant().await;
        coordinator.register("P1", host, port).unwrap();

        let mut data = BTreeMap::new();
        data.insert("k".to_string(), "v".to_string());

        let committed = driver::execute_transaction(&coordinator, data.clone())
            .await
            .unwrap();

        assert!(committed);
        let history = coordinator.history_snapshot().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, "COMMITTED");
        assert_eq!(history[0].data, data);
    }

    #[tokio::test]
    async fn empty_registry_fails_immediately_with_no_history() {
        let coordinator = Coordinator::new("127.0.0.1", 0);
        let committed = driver::execute_transaction(&coordinator, BTreeMap::new())
            .await
            .unwrap();

        assert!(!committed);
        assert!(coordinator.history_snapshot().unwrap().is_empty());
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let coordinator = Coordinator::new("127.0.0.1", 0);
        coordinator.register("P1", "localhost", 6001).unwrap();
        coordinator.register("P1", "localhost", 6001).unwrap();

        assert_eq!(coordinator.participant_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn crashed_coordinator_refuses_history_and_vote_frames_selectively() {
        let coordinator = Coordinator::new("127.0.0.1", 19173);
        coordinator.set_crashed(true).unwrap();

        let running = Arc::new(AtomicBool::new(true));
        let coordinator_for_server = coordinator.clone();
        let server_handle = tokio::spawn(async move {
            let _ = server::run(coordinator_for_server, running).await;
        });

        // give the listener a moment to bind
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut stream = TcpStream::connect((coordinator.host.as_str(), coordinator.port))
            .await
            .unwrap();
        let frame = AdminFrame::Register {
            participant_id: "P1".to_string(),
            host: "localhost".to_string(),
            port: 6001,
        };
        stream.write_all(frame.render().unwrap().as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"OK");

        server_handle.abort();
    }
}
