/// CLI for MixChat session management and one-shot requests
use colored::*;
use mixchat_core::history::{HistoryLoader, HttpHistoryLoader};
use mixchat_core::session_store::{SessionStore, SledSessionStore};
use mixchat_core::translation::{HttpTranslator, Translator};
use mixchat_core::{Config, Identity};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let bin = args.first().map(String::as_str).unwrap_or("mixchat-cli").to_string();

    if args.len() < 2 {
        print_usage(&bin);
        return Ok(());
    }

    let mut config = Config::default();
    config.apply_env();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let store = SledSessionStore::new(&config.session_dir())
        .map_err(|e| anyhow::anyhow!("Session store error: {}", e))?;

    let command = &args[1];
    match command.as_str() {
        "login" => {
            if args.len() < 4 {
                eprintln!("{}", format!("Usage: {} login <nickname> <token>", bin).yellow());
                return Ok(());
            }
            let identity = Identity::new(args[2].clone(), Some(args[3].clone()))?;
            identity.save(&store)?;
            println!("✓ Signed in as {}", identity.nickname().green());
        }
        "logout" => {
            let had_user = store.remove(mixchat_core::session_store::USER_INFO_KEY)?;
            store.remove(mixchat_core::session_store::CREDENTIAL_KEY)?;
            if had_user {
                println!("✓ Signed out");
            } else {
                println!("Not signed in");
            }
        }
        "whoami" => match Identity::load(&store) {
            Ok(identity) => {
                let token = if identity.credential().is_some() {
                    "token stored".green()
                } else {
                    "no token".yellow()
                };
                println!("{} ({})", identity.nickname().cyan().bold(), token);
            }
            Err(e) => {
                eprintln!("{} {}", "✗".red().bold(), e);
                std::process::exit(1);
            }
        },
        "history" => {
            if args.len() < 3 {
                eprintln!("{}", format!("Usage: {} history <recipient>", bin).yellow());
                return Ok(());
            }
            let loader = HttpHistoryLoader::new(reqwest::Client::new(), &config);
            let messages = loader.load_history(&args[2]).await?;
            if messages.is_empty() {
                println!("No messages");
            } else {
                println!("Messages ({}):", messages.len());
                println!("{:-<60}", "");
                for m in messages {
                    println!(
                        "  [{}] {} → {}: {}",
                        m.timestamp().bright_black(),
                        m.sender().cyan(),
                        m.recipient(),
                        m.content()
                    );
                }
            }
        }
        "translate" => {
            if args.len() < 3 {
                eprintln!("{}", format!("Usage: {} translate <text>", bin).yellow());
                return Ok(());
            }
            let text = args[2..].join(" ");
            let translator =
                HttpTranslator::new(reqwest::Client::new(), &config, Arc::new(store.clone()));
            match translator.translate(&text, &config.target_lang).await {
                Ok(translated) => println!("{}", translated),
                Err(e) => {
                    eprintln!("{} {}", "✗".red().bold(), e);
                    std::process::exit(1);
                }
            }
        }
        _ => {
            eprintln!("{} Unknown command: {}", "✗".red().bold(), command.red());
            print_usage(&bin);
        }
    }

    Ok(())
}

fn print_usage(bin: &str) {
    println!("{}", "💬 MixChat CLI".bright_cyan().bold());
    println!();
    println!("{}", "Usage:".bright_white().bold());
    println!("  {} <command> [args]", bin.cyan());
    println!();
    println!("{}", "Commands:".bright_white().bold());
    println!("  {} <nickname> <token>   Store the signed-in user", "login".cyan());
    println!("  {}                      Forget the signed-in user", "logout".cyan());
    println!("  {}                      Show the signed-in user", "whoami".cyan());
    println!("  {} <recipient>        Print the conversation history", "history".cyan());
    println!("  {} <text>           Translate text to the target language", "translate".cyan());
    println!();
    println!("Environment: MIXCHAT_API_URL, MIXCHAT_WS_URL, MIXCHAT_TARGET_LANG, MIXCHAT_DATA_DIR");
}
