/// MixChat terminal client - one direct-message conversation
use colored::*;
use mixchat_core::session_store::SledSessionStore;
use mixchat_core::{ChatContext, Config, ConversationController, ConversationEvent, Message};
use std::env;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    // Parse configuration
    let args: Vec<String> = env::args().collect();
    let config = Config::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let Some(recipient) = config.recipient.clone() else {
        print_usage(args.first().map(String::as_str).unwrap_or("mixchat"));
        return Ok(());
    };

    let store = SledSessionStore::new(&config.session_dir())
        .map_err(|e| anyhow::anyhow!("Session store error: {}", e))?;
    let ctx = ChatContext::from_config(&config, Arc::new(store))
        .map_err(|e| anyhow::anyhow!("Setup error: {}", e))?;

    let controller = Arc::new(ConversationController::new(ctx, recipient.clone()));
    let mut events = controller.subscribe();

    // Started before open so history streams through as it is merged
    let printer = {
        let recipient = recipient.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    // Sole renderer: history, inbound and own sends all arrive here once
                    Ok(ConversationEvent::MessageAppended { message }) => render(&message, &recipient),
                    Ok(ConversationEvent::HistoryFailed { error }) => {
                        println!("{}", format!("(history unavailable: {})", error).yellow());
                    }
                    Ok(ConversationEvent::ConnectionFailed { error }) => {
                        println!("{}", format!("(offline: {})", error).yellow());
                    }
                    Ok(ConversationEvent::ConnectionLost) => {
                        println!("{}", "(connection lost)".yellow());
                    }
                    Ok(ConversationEvent::SendFailed { error }) => {
                        println!("{}", format!("(not delivered: {})", error).yellow());
                    }
                    Ok(ConversationEvent::TranslationFailed { error }) => {
                        println!("{}", format!("(translation failed: {})", error).yellow());
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Display lagged {} events", n);
                    }
                    Err(_) => break,
                }
            }
        })
    };

    if let Err(e) = controller.open().await {
        printer.abort();
        // Placeholder view: nothing to show without a user or a recipient
        eprintln!("{} {}", "✗".red().bold(), e);
        eprintln!("  Sign in first: mixchat-cli login <nickname> <token>");
        return Ok(());
    }

    let me = controller
        .identity()
        .await
        .map(|i| i.nickname().to_string())
        .unwrap_or_default();
    info!("💬 Chatting with {} as {}", recipient, me);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&controller, line.trim_end()).await {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received");
                break;
            }
        }
    }

    controller.close().await;
    printer.abort();
    Ok(())
}

/// Returns false when the user asked to leave
async fn handle_line(controller: &ConversationController, line: &str) -> bool {
    if line == "/quit" {
        return false;
    }

    if let Some(text) = line.strip_prefix("/tr ") {
        controller.set_draft(text).await;
        match controller.translate_draft().await {
            Ok(Some(translated)) => {
                println!("{} {}", "translated:".bright_black(), translated.bright_black());
                println!("{}", "  /send to send it, or type something else".bright_black());
            }
            Ok(None) => {}
            Err(_) => {
                println!("{}", "  translation unavailable, /send sends the original".bright_black());
            }
        }
        return true;
    }

    if line != "/send" {
        controller.set_draft(line).await;
    }
    if let Err(e) = controller.send_draft().await {
        eprintln!("{} {}", "✗".red().bold(), e);
    }
    true
}

fn render(message: &Message, recipient: &str) {
    if message.sender() == recipient {
        println!("{} {}", format!("{}:", message.sender()).cyan().bold(), message.content());
    } else {
        println!("{:>60}", message.content().green());
    }
}

fn print_usage(bin: &str) {
    println!("{}", "💬 MixChat".bright_cyan().bold());
    println!();
    println!("{}", "Usage:".bright_white().bold());
    println!("  {} <recipient> [--api-url <url>] [--ws-url <url>] [--target-lang <code>] [--data-dir <path>] [--timeout-secs <n>] [--retries <n>]", bin.cyan());
    println!();
    println!("{}", "In the conversation:".bright_white().bold());
    println!("  {}            send a message", "<text>".cyan());
    println!("  {}       translate a draft", "/tr <text>".cyan());
    println!("  {}            send the current (translated) draft", "/send".cyan());
    println!("  {}            leave", "/quit".cyan());
}
