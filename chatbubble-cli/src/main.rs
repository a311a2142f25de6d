//! chatbubble — terminal front end for a webhook-backed chat assistant
//!
//! # Subcommands
//! - `send <text>`      — send one message and print the reply
//! - `chat`             — interactive thread; replies print as they arrive
//! - `session show`     — print the stored session identifier
//! - `session reset`    — forget the identifier (next send creates a new one)
//! - `config`           — print the resolved configuration as JSON

use std::sync::Arc;

use chatbubble_core::session::SessionIdentity;
use chatbubble_core::{ChatWidget, DisplayableReply, Profile, WidgetConfig};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "chatbubble",
    version,
    about = "Chat with a webhook-backed assistant from the terminal"
)]
struct Cli {
    /// Path to the TOML config file (optional)
    #[arg(short, long, default_value = "chatbubble.toml")]
    config: String,

    /// Webhook URL (overrides the config file)
    #[arg(long, env = "CHAT_BUBBLE_WEBHOOK_URL")]
    webhook_url: Option<String>,

    /// Widget profile: v1 (local store only) or v2 (cookie + local store)
    #[arg(long)]
    profile: Option<Profile>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Send a single message and print the reply
    Send {
        /// Message text
        text: String,
    },

    /// Open an interactive chat thread
    Chat,

    /// Inspect or reset the session identifier
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Print the resolved configuration
    Config,
}

#[derive(Debug, Subcommand)]
enum SessionAction {
    /// Print the current identifier, if any
    Show,
    /// Clear the identifier from every store
    Reset,
}

// ============================================================================
// Rendering
// ============================================================================

fn print_reply(name: &str, reply: &DisplayableReply) {
    if reply.is_error() {
        println!("[!] {}", reply.text);
    } else {
        println!("{}: {}", name, reply.text);
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn do_send(config: &WidgetConfig, text: &str) -> anyhow::Result<()> {
    let widget = ChatWidget::from_config(config)?;
    match widget.submit(text).await {
        Some(reply) => {
            print_reply(&widget.appearance().assistant_name, &reply);
            if reply.is_error() {
                std::process::exit(1);
            }
        }
        None => eprintln!("chatbubble: nothing to send"),
    }
    Ok(())
}

/// Each line is submitted on its own task, so a slow reply never blocks
/// the next message.
async fn do_chat(config: &WidgetConfig) -> anyhow::Result<()> {
    let widget = Arc::new(ChatWidget::from_config(config)?);
    let name = widget.appearance().assistant_name.clone();

    println!("── {} ──", widget.header());
    for entry in widget.transcript() {
        println!("{}: {}", name, entry.text);
    }
    println!("(type a message, Ctrl+D to quit)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight = Vec::new();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let widget = widget.clone();
        let name = name.clone();
        in_flight.push(tokio::spawn(async move {
            if let Some(reply) = widget.submit(&line).await {
                print_reply(&name, &reply);
            }
        }));
        in_flight.retain(|h| !h.is_finished());
    }

    for handle in in_flight {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Send task failed");
        }
    }
    Ok(())
}

fn do_session(config: &WidgetConfig, action: SessionAction) -> anyhow::Result<()> {
    let identity = SessionIdentity::from_config(&config.session)?;
    match action {
        SessionAction::Show => match identity.current() {
            Some(id) => println!("{}", id),
            None => println!("(no session yet)"),
        },
        SessionAction::Reset => {
            identity.reset()?;
            println!("Session cleared");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let mut config = match WidgetConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", cli.config, e);
            std::process::exit(1);
        }
    };
    if let Some(url) = cli.webhook_url {
        config.webhook.url = url;
    }
    if let Some(profile) = cli.profile {
        config.session.profile = profile;
    }

    // Logs go to stderr so they never interleave with replies on stdout
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Send { text } => do_send(&config, &text).await,
        Commands::Chat => do_chat(&config).await,
        Commands::Session { action } => do_session(&config, action),
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
