use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use kvrbac_migrator::{parse_answer, Approval, Confirmer, PendingAction};
use tracing::warn;

/// Prompts on stderr and reads the answer from stdin.
pub struct ConsoleConfirmer;

#[async_trait]
impl Confirmer for ConsoleConfirmer {
    async fn confirm(&self, pending: &PendingAction) -> Approval {
        let prompt = format!("Proceed: {}? [y/N] ", pending);
        match tokio::task::spawn_blocking(move || ask(&prompt)).await {
            Ok(Ok(answer)) => parse_answer(&answer),
            Ok(Err(e)) => {
                warn!(error = %e, "Could not read confirmation; declining");
                Approval::Decline
            }
            Err(e) => {
                warn!(error = %e, "Confirmation prompt aborted; declining");
                Approval::Decline
            }
        }
    }
}

fn ask(prompt: &str) -> io::Result<String> {
    let mut err = io::stderr().lock();
    err.write_all(prompt.as_bytes())?;
    err.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}
