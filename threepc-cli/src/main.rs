//! Process entry point for both 3PC roles. Argument parsing, console
//! formatting, and the REPL loops live here and nowhere else, kept thin on
//! top of `threepc-coordinator`/`threepc-participant`.

mod coordinator_cli;
mod participant_cli;

use failure::Error;

const COORDINATOR_DEFAULT_PORT: u16 = 5000;
const PARTICIPANT_DEFAULT_PORT: u16 = 6000;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run() {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Error> {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("coordinator") => {
            let port = match args.get(2) {
                Some(raw) => raw.parse().map_err(|_| usage_error())?,
                None => COORDINATOR_DEFAULT_PORT,
            };
            run_tokio(coordinator_cli::run("localhost", port))
        }
        Some("participant") => {
            let id = args.get(2).cloned().ok_or_else(usage_error)?;
            let port = match args.get(3) {
                Some(raw) => raw.parse().map_err(|_| usage_error())?,
                None => PARTICIPANT_DEFAULT_PORT,
            };
            let coordinator_port = match args.get(4) {
                Some(raw) => raw.parse().map_err(|_| usage_error())?,
                None => COORDINATOR_DEFAULT_PORT,
            };
            run_tokio(participant_cli::run(id, "localhost", port, "localhost", coordinator_port))
        }
        _ => {
            print_usage();
            Err(usage_error())
        }
    }
}

fn run_tokio(fut: impl std::future::Future<Output = Result<(), Error>>) -> Result<(), Error> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(fut)
}

fn usage_error() -> Error {
    failure::err_msg("invalid arguments")
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  threepc coordinator [port]");
    eprintln!("  threepc participant <id> [port] [coordinator_port]");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  threepc coordinator 5000");
    eprintln!("  threepc participant P1 6001 5000");
}
