use std::sync::Arc;

use clap::{Parser, Subcommand};
use inquire::{Confirm, Text};

use crate::clients::calendar::AuthSession;
use crate::events::queue::{EventBus, TurnEvent};
use crate::service::dialogue_flow::Coordinator;

const CLI_SESSION_ID: &str = "cli";

#[derive(Parser)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single typed turn against the assistant.
    Turn { text: String },
    /// Interactive session; keeps the clarification state between turns.
    Prompt {},
    /// Complete the out-of-band calendar login.
    Login {},
}

pub async fn cli(coordinator: Arc<Coordinator>, auth: Arc<dyn AuthSession>, bus: EventBus) {
    // Fine to panic here
    let cli = Cli::parse();
    match &cli.command {
        Commands::Turn { text } => {
            let reply = coordinator.run_turn(CLI_SESSION_ID, text).await;
            print_reply(&reply);
        }
        Commands::Prompt {} => {
            loop {
                let line = match Text::new("You (or 'quit'):").prompt() {
                    Ok(line) => line,
                    Err(_) => break,
                };
                if line.trim() == "quit" {
                    break;
                }
                let reply = coordinator.run_turn(CLI_SESSION_ID, &line).await;
                print_reply(&reply);
            }
        }
        Commands::Login {} => {
            let proceed = Confirm::new("Complete the calendar login now?")
                .with_default(true)
                .prompt()
                .unwrap_or(false);
            if !proceed {
                return;
            }
            match auth.begin_interactive_login().await {
                Ok(()) => {
                    bus.emit(TurnEvent::LoginCompleted).await;
                    println!("Signed in.");
                }
                Err(e) => println!("Login failed: {}", e),
            }
        }
    }
}

fn print_reply(reply: &crate::service::dialogue_flow::TurnReply) {
    println!("Assistant: {}", reply.assistant_text);
    for event in &reply.conflicting_events {
        println!("  conflicts with: {} ({})", event.title, event.interval);
    }
    if reply.requires_login {
        println!("  (run the login command, then say yes)");
    }
}
