mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use interpreter::{OrderInterpreter, OrderReply};
use providers::SessionOutcome;
use shared::agent_api::StreamChunk;
use shared::settings::load_settings_or_default;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use crate::utils::{format_error_message, load_catalog, load_history};

#[derive(Parser)]
#[command(name = "order-cli", version, about = "Stream natural-language orders into structured items")]
struct Cli {
    /// Settings file (defaults to settings.json in the config directory)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Print the final result as JSON instead of streaming text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interpret an order against a menu
    Order {
        /// JSON array of { id, name, price }
        #[arg(long)]
        catalog: PathBuf,
        /// JSON array of earlier messages, oldest first
        #[arg(long)]
        history: Option<PathBuf>,
        text: String,
    },
    /// Free-form chat with the assistant
    Chat {
        #[arg(long)]
        history: Option<PathBuf>,
        text: String,
    },
}

fn print_flush(text: &str) {
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

fn print_order(reply: &OrderReply) {
    if reply.items.is_empty() {
        println!("(no items recognized)");
        return;
    }
    for line in &reply.matched.matched {
        println!(
            "  {:>3} × {:<30} {:>10.2}",
            line.quantity,
            line.entry.name,
            line.entry.price * f64::from(line.quantity)
        );
    }
    for item in &reply.matched.unmatched {
        println!("  {:>3} × {:<30} {:>10}", item.quantity, item.item_name, "not on menu");
    }
    println!("  {:<36} {:>10.2}", "total", reply.matched.total());
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let (mut settings, from_file) = load_settings_or_default(cli.settings.as_deref());
    settings.apply_env_overrides();
    tracing::debug!(from_file, endpoint = %settings.stream.endpoint, "settings loaded");

    let interpreter = OrderInterpreter::from_settings(settings)?;

    match cli.command {
        Command::Order {
            catalog,
            history,
            text,
        } => {
            let catalog = load_catalog(&catalog)?;
            let history = load_history(history.as_deref())?;
            let streaming = !cli.json;

            let result = interpreter
                .parse_order_collect(&catalog, &history, &text, |delta| {
                    if streaming {
                        print_flush(delta);
                    }
                })
                .await;

            match result {
                Ok(reply) if cli.json => {
                    println!("{}", serde_json::to_string_pretty(&reply)?);
                }
                Ok(reply) => {
                    println!("\n");
                    print_order(&reply);
                }
                Err(e) => {
                    eprintln!("{}", format_error_message(&e));
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Command::Chat { history, text } => {
            let history = load_history(history.as_deref())?;
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
            let session = interpreter.chat(&history, &text, tx);

            while let Some(chunk) = rx.recv().await {
                match chunk {
                    StreamChunk::Text(delta) if !cli.json => print_flush(&delta),
                    StreamChunk::Text(_) => {}
                    StreamChunk::Done { full_text } if cli.json => {
                        println!("{}", serde_json::json!({ "text": full_text }));
                    }
                    StreamChunk::Done { .. } => println!(),
                    // reported from the session outcome below
                    StreamChunk::Error(_) => {}
                }
            }

            if let SessionOutcome::Failed(e) = session.join().await {
                eprintln!("{}", format_error_message(&e));
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
