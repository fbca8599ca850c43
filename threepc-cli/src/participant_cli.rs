//! Participant operator REPL: `status`, `data`, `cancommit vote yes|no`,
//! `precommit vote yes|no`, `ack commit|abort`, `crash`, `recover`, `fail`,
//! `quit`.

use failure::Error;
use std::sync::{
    atomic::{
        AtomicBool,
        Ordering,
    },
    Arc,
};
use threepc_participant::{
    handler,
    recovery,
    server,
    Participant,
};
use tokio::io::{
    AsyncBufReadExt,
    BufReader,
};

pub async fn run(
    id: String,
    host: &str,
    port: u16,
    coordinator_host: &str,
    coordinator_port: u16,
) -> Result<(), Error> {
    let participant = Participant::new(id, host, port, coordinator_host, coordinator_port);
    let running = Arc::new(AtomicBool::new(true));

    let server_handle = {
        let participant = participant.clone();
        let running = running.clone();
        tokio::spawn(async move {
            if let Err(err) = server::run(participant, running).await {
                tracing::error!(%err, "participant accept loop exited");
            }
        })
    };

    if threepc_participant::transport::register(&participant).await? {
        println!("Registered with coordinator at {}:{}", participant.coordinator_host, participant.coordinator_port);
    } else {
        println!("Could not reach coordinator at {}:{}: continuing, retry with 'recover'", participant.coordinator_host, participant.coordinator_port);
    }

    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_prompt(&participant)?;
        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };
        let cmd = line.trim();
        let cmd_lower = cmd.to_lowercase();

        if cmd.is_empty() {
            continue;
        } else if cmd_lower == "quit" {
            println!("\nParticipant {} is being closed...", participant.id);
            running.store(false, Ordering::SeqCst);
            break;
        } else if cmd_lower == "status" {
            show_status(&participant)?;
        } else if cmd_lower == "data" {
            show_data(&participant)?;
        } else if let Some(vote) = cmd_lower.strip_prefix("cancommit vote ") {
            handle_vote(&participant, true, vote).await?;
        } else if let Some(vote) = cmd_lower.strip_prefix("precommit vote ") {
            handle_vote(&participant, false, vote).await?;
        } else if let Some(kind) = cmd_lower.strip_prefix("ack ") {
            handle_ack(&participant, kind).await?;
        } else if cmd_lower == "crash" {
            handle_crash(&participant)?;
        } else if cmd_lower == "recover" {
            handle_recover(&participant).await?;
        } else if cmd_lower == "fail" {
            handle_fail(&participant, &mut lines).await?;
        } else {
            println!(
                "Unknown command, please use: status, data, cancommit vote yes/no, precommit vote yes/no, ack commit/abort, crash, recover, fail, quit"
            );
        }
    }

    server_handle.abort();
    Ok(())
}

fn print_help() {
    println!("\nAvailable commands:");
    println!("  status                  - Check the status");
    println!("  data                    - View committed transaction data");
    println!("  cancommit vote yes/no   - Vote on a pending CanCommit transaction");
    println!("  precommit vote yes/no   - Vote on a pending PreCommit transaction");
    println!("  ack commit/abort        - Confirm a pending COMMIT or ABORT");
    println!("  crash                   - Simulated crash");
    println!("  recover                 - Recover from a crash");
    println!("  fail                    - Set the injected failure rate");
    println!("  quit                    - Exit");
    println!();
}

fn print_prompt(participant: &Participant) -> Result<(), Error> {
    use std::io::Write;

    let prefix = if participant.is_crashed()? { "CRASHED".to_string() } else { participant.id.clone() };
    print!("{}> ", prefix);
    std::io::stdout().flush().ok();
    Ok(())
}

async fn handle_vote(participant: &Participant, can_commit_phase: bool, vote: &str) -> Result<(), Error> {
    let yes = match vote {
        "yes" => true,
        "no" => false,
        _ => {
            let phase = if can_commit_phase { "cancommit" } else { "precommit" };
            println!("Please input: {} vote yes or {} vote no", phase, phase);
            return Ok(());
        }
    };

    match handler::operator_vote(participant, can_commit_phase, yes).await? {
        Some(transaction_id) => println!("\nVoted on transaction {}", transaction_id),
        None => println!("There is no transaction awaiting a vote"),
    }
    Ok(())
}

async fn handle_ack(participant: &Participant, kind: &str) -> Result<(), Error> {
    let commit = match kind {
        "commit" => true,
        "abort" => false,
        _ => {
            println!("Please input: ack commit or ack abort");
            return Ok(());
        }
    };

    match handler::operator_ack(participant, commit).await? {
        Some(transaction_id) => println!("\nConfirmed transaction {}", transaction_id),
        None => println!("There is no COMMIT or ABORT awaiting confirmation"),
    }
    Ok(())
}

fn handle_crash(participant: &Participant) -> Result<(), Error> {
    if participant.is_crashed()? {
        println!("It is already in a state of crash");
        return Ok(());
    }
    participant.set_crashed(true)?;
    println!("\n{} has crashed!", participant.id);
    println!("  - No more messages will be received or processed");
    println!("  - Use the 'recover' command to restore");
    Ok(())
}

async fn handle_recover(participant: &Participant) -> Result<(), Error> {
    if !participant.is_crashed()? {
        println!("It is not currently in a state of crash");
        return Ok(());
    }

    println!("\nStarting recovery of {}...", participant.id);
    if recovery::recover(participant).await? {
        println!("{} has fully recovered!", participant.id);
    } else {
        println!("Recovery did not complete cleanly, but {} is marked recovered", participant.id);
    }
    Ok(())
}

async fn handle_fail(
    participant: &Participant,
    lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>,
) -> Result<(), Error> {
    print!("Input fail rate (0.0-1.0): ");
    {
        use std::io::Write;
        std::io::stdout().flush().ok();
    }
    let rate_line = match lines.next_line().await? {
        Some(line) => line,
        None => return Ok(()),
    };

    match rate_line.trim().parse::<f64>() {
        Ok(rate) if (0.0..=1.0).contains(&rate) => {
            participant.set_failure_rate(rate)?;
            println!("The failure rate has been set to {:.0}%", rate * 100.0);
        }
        Ok(_) => println!("The failure rate must be between 0.0 and 1.0"),
        Err(_) => println!("Invalid value"),
    }
    Ok(())
}

fn show_status(participant: &Participant) -> Result<(), Error> {
    let (waited, prepared, committed, aborted) = participant.counts()?;
    println!("\nParticipant status:");
    println!("  ID: {}", participant.id);
    println!("  Address: {}:{}", participant.host, participant.port);
    println!("  Status: {}", if participant.is_crashed()? { "crashed" } else { "normal" });
    println!("  Failure rate: {:.0}%", participant.failure_rate()? * 100.0);

    if let Some(pending) = participant.pending_vote()? {
        println!("  Transaction awaiting vote: {} - {:?}", pending.transaction_id, pending.data);
    }

    println!("  Waited transactions: {}", waited);
    println!("  Prepared transactions: {}", prepared);
    println!("  Committed transactions: {}", committed);
    println!("  Aborted transactions: {}", aborted);
    Ok(())
}

fn show_data(participant: &Participant) -> Result<(), Error> {
    let committed = participant.committed_snapshot()?;
    println!("\nCommitted transaction data ({}):", committed.len());
    if committed.is_empty() {
        println!("  (none)");
    } else {
        for (tx_id, data) in committed {
            println!("  {}: {:?}", tx_id, data);
        }
    }
    Ok(())
}
