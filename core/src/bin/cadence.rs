/// Cadence CLI
///
/// Runs scripts against a session's history log and recovers or aborts
/// runs a crash left behind.
use cadence_core::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
