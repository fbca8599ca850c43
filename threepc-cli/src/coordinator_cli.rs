//! Coordinator operator REPL: `list`, `tx`, `crash`, `recover`, `status`,
//! `quit`. The accept loop runs as a background task so the prompt stays
//! responsive while a transaction drives in the background.

use failure::Error;
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
use threepc_coordinator::{
    driver,
    recovery,
    server,
    Coordinator,
};
use tokio::io::{
    AsyncBufReadExt,
    BufReader,
};

pub async fn run(host: &str, port: u16) -> Result<(), Error> {
    let coordinator = Coordinator::new(host, port);
    let running = Arc::new(AtomicBool::new(true));

    let server_handle = {
        let coordinator = coordinator.clone();
        let running = running.clone();
        tokio::spawn(async move {
            if let Err(err) = server::run(coordinator, running).await {
                tracing::error!(%err, "coordinator accept loop exited");
            }
        })
    };

    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_prompt(&coordinator)?;
        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };
        let cmd = line.trim();

        match cmd {
            "quit" => {
                println!("\nThe coordinator is being shut down...");
                running.store(false, Ordering::SeqCst);
                break;
            }
            "list" => list_participants(&coordinator)?,
            "tx" => start_transaction(&coordinator, &mut lines).await?,
            "crash" => handle_crash(&coordinator)?,
            "recover" => handle_recover(&coordinator).await?,
            "status" => show_status(&coordinator)?,
            "" => {}
            _ => println!("For unknown commands, please use: list, tx, crash, recover, status, quit"),
        }
    }

    server_handle.abort();
    Ok(())
}

fn print_help() {
    println!("\nAvailable commands:");
    println!("  list    - List all the participants");
    println!("  tx      - Initiate new transactions");
    println!("  crash   - Simulated crash");
    println!("  recover - Recover from the crash");
    println!("  status  - View the transaction status");
    println!("  quit    - Exit");
    println!();
}

fn print_prompt(coordinator: &Coordinator) -> Result<(), Error> {
    use std::io::Write;

    let prefix = if coordinator.is_crashed()? { "CRASHED" } else { "coordinator" };
    print!("{}> ", prefix);
    std::io::stdout().flush().ok();
    Ok(())
}

fn list_participants(coordinator: &Coordinator) -> Result<(), Error> {
    let participants = coordinator.registered_participants()?;
    println!("\nRegistered participants ({}):", participants.len());
    if participants.is_empty() {
        println!("  (none)");
    } else {
        for p in participants {
            println!("  - {} ({}:{})", p.id, p.host, p.port);
        }
    }
    Ok(())
}

async fn start_transaction(
    coordinator: &Coordinator,
    lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>,
) -> Result<(), Error> {
    println!("\nPlease enter the transaction data (Format: key=value, e.g., account=alice,amount=100):");
    print!("data> ");
    {
        use std::io::Write;
        std::io::stdout().flush().ok();
    }
    let data_line = match lines.next_line().await? {
        Some(line) => line,
        None => return Ok(()),
    };

    let data = parse_data(data_line.trim());
    if data.is_empty() {
        println!("Transaction data cannot be empty or invalid");
        return Ok(());
    }

    let coordinator = coordinator.clone();
    tokio::spawn(async move {
        match driver::execute_transaction(&coordinator, data).await {
            Ok(committed) => {
                tracing::info!(committed, "transaction finished");
            }
            Err(err) => tracing::error!(%err, "transaction failed"),
        }
    });
    println!("The transaction has been started in the background. You can enter 'crash' at any time to simulate a crash");
    Ok(())
}

fn parse_data(input: &str) -> BTreeMap<String, String> {
    let mut data = BTreeMap::new();
    for pair in input.split(',') {
        if let Some((key, value)) = pair.split_once('=') {
            let key = key.trim();
            if !key.is_empty() {
                data.insert(key.to_string(), value.trim().to_string());
            }
        }
    }
    data
}

fn handle_crash(coordinator: &Coordinator) -> Result<(), Error> {
    if coordinator.is_crashed()? {
        println!("It is already in a state of crash");
        return Ok(());
    }
    coordinator.set_crashed(true)?;
    println!("\nThe coordinator has crashed!");
    println!("  - New transactions cannot be initiated");
    println!("  - Unfinished transactions will be suspended");
    println!("  - Use the 'recover' command to restore");
    Ok(())
}

async fn handle_recover(coordinator: &Coordinator) -> Result<(), Error> {
    if !coordinator.is_crashed()? {
        println!("It is not currently in a state of crash");
        return Ok(());
    }

    println!("\nRecovering coordinator...");
    let completed = recovery::recover(coordinator).await?;
    println!("Recovery complete: {} transaction(s) driven to a terminal state", completed);
    Ok(())
}

fn show_status(coordinator: &Coordinator) -> Result<(), Error> {
    let transactions = coordinator.list_transactions()?;
    println!("\nTransaction status ({}):", transactions.len());
    if transactions.is_empty() {
        println!("  (none)");
    } else {
        for tx in transactions {
            println!("  {}: {} - {:?}", tx.id, tx.status, tx.data);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_pairs() {
        let data = parse_data("account=alice,amount=100");
        assert_eq!(data.get("account"), Some(&"alice".to_string()));
        assert_eq!(data.get("amount"), Some(&"100".to_string()));
    }

    #[test]
    fn ignores_malformed_pairs() {
        let data = parse_data("account=alice,bogus,=novalue");
        assert_eq!(data.len(), 1);
        assert_eq!(data.get("account"), Some(&"alice".to_string()));
    }

    #[test]
    fn blank_input_yields_empty_map() {
        assert!(parse_data("").is_empty());
    }
}
