//! ragchat - stream answers from a RAG chat endpoint
//!
//! One-shot when a question is given on the command line, otherwise an
//! interactive prompt. Ctrl-C cancels the answer being streamed.

mod answer;
mod args;

use std::io::Write;

use anyhow::{Context, Result};
use clap::Parser;
use ragchat_core::{ChatClient, ChatConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use answer::{Answer, AnswerEvent};
use args::Args;

const QUIT_COMMAND: &str = "/quit";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = load_config(&args).await?;
    let client = ChatClient::new(config);
    info!("Using chat endpoint {}", client.config().endpoint);

    match args.question.as_deref() {
        Some(question) => {
            if !ask(&client, question).await? {
                eprintln!("Nothing to ask.");
            }
        }
        None => prompt_loop(&client).await?,
    }

    Ok(())
}

/// Logs go to stderr so the answer on stdout stays clean
fn init_logging(verbose: bool) {
    let default = if verbose {
        "ragchat=debug,ragchat_core=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Defaults, config file, environment, then flags
async fn load_config(args: &Args) -> Result<ChatConfig> {
    let mut config = ChatConfig::load(args.config.as_deref())
        .await
        .context("Failed to load config")?
        .with_env()?
        .with_endpoint_override(args.endpoint.clone())?;

    if let Some(secs) = args.deadline_secs {
        config.deadline_secs = Some(secs);
    }
    Ok(config)
}

/// Read questions until EOF, `/quit`, or Ctrl-C at the prompt
async fn prompt_loop(client: &ChatClient) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        eprint!("Your question> ");
        std::io::stderr().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read question")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            eprintln!();
            break;
        };

        let question = line.trim();
        if question == QUIT_COMMAND {
            break;
        }
        // Blank input is a no-op, like a disabled send button
        ask(client, &line).await?;
    }

    Ok(())
}

/// Stream one answer to stdout. Returns false if the question was blank.
async fn ask(client: &ChatClient, question: &str) -> Result<bool> {
    let Some((handle, mut updates)) = client.start_chat_stream(question) else {
        return Ok(false);
    };

    let mut answer = Answer::loading();
    let mut stdout = std::io::stdout();
    eprint!("Thinking...");

    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(update) = update else { break };
                let Some(event) = answer.apply(update) else { continue };

                match event {
                    AnswerEvent::Opened => debug!("Answer stream opened"),
                    AnswerEvent::Delta(text) => {
                        if answer.text().len() == text.len() {
                            clear_indicator();
                        }
                        write!(stdout, "{}", text)?;
                        stdout.flush()?;
                    }
                    AnswerEvent::Finished => {
                        if answer.is_empty() {
                            clear_indicator();
                            eprintln!("(no answer)");
                        } else {
                            writeln!(stdout)?;
                        }
                    }
                    AnswerEvent::Failed(error) => {
                        clear_indicator();
                        debug!("Answer failed: {}", error);
                        eprintln!("\n{}", answer.text());
                    }
                }
            }
            _ = tokio::signal::ctrl_c(), if !handle.is_cancelled() => {
                info!("Cancelling answer");
                handle.cancel();
            }
        }
    }

    debug!("Answer finished, loading={}", answer.is_loading());
    handle.wait().await;
    Ok(true)
}

/// Erase the "Thinking..." indicator
fn clear_indicator() {
    eprint!("\r\x1b[K");
}
