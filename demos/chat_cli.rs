//! Interactive chat against a streaming completion endpoint.
//!
//! Run with:
//! ```bash
//! export CHATRELAY_BASE_URL="http://localhost:3000"
//! cargo run --example chat_cli
//! ```
//!
//! Each line read from stdin is sent as a user message; the reply is printed
//! as it streams in. Ctrl-C stops the current reply.

use std::io::Write;

use chatrelay::{ChatController, ChatEvent, ClientConfig, SendOutcome};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::from_env()?;
    let controller = ChatController::from_config(&config)?;

    // Print only the part of the reply not printed yet.
    let mut events = controller.subscribe();
    tokio::spawn(async move {
        let mut printed = 0;
        while let Ok(event) = events.recv().await {
            match event {
                ChatEvent::StreamingChanged(state) if state.is_streaming => printed = 0,
                ChatEvent::MessageUpdated { content, .. } => {
                    print!("{}", content.get(printed..).unwrap_or_default());
                    printed = content.len();
                    let _ = std::io::stdout().flush();
                }
                ChatEvent::ErrorChanged(Some(error)) => eprintln!("\nerror: {error}"),
                _ => {}
            }
        }
    });

    let canceller = controller.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel_stream();
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print!("> ");
    std::io::stdout().flush()?;

    while let Some(line) = lines.next_line().await? {
        match controller.send_message(&line).await {
            SendOutcome::Completed { .. } => println!(),
            SendOutcome::Cancelled => println!("\n[cancelled]"),
            SendOutcome::Failed(_) | SendOutcome::Skipped(_) => {}
        }
        print!("> ");
        std::io::stdout().flush()?;
    }

    Ok(())
}
