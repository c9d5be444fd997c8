//! aidermux - one-shot command driver
//!
//! Resolves the session for a working directory, sends a single prompt
//! (or directive) and prints the captured response.
//!
//! Usage:
//!   aidermux "explain the failing test"
//!   aidermux --dir ~/src/repo --file src/main.rs "rename the helper"
//!   aidermux --subtree --mode ask "what does this module do?"

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::oneshot;

use aidermux_core::{Config, Mode, Op, Session, SessionRegistry};

#[derive(Parser, Debug)]
#[command(name = "aidermux")]
#[command(about = "Send one command to the assistant session for a directory")]
#[command(version)]
struct Args {
    /// The prompt or directive to send
    #[arg(required = true)]
    prompt: Vec<String>,

    /// Working directory the command belongs to (defaults to the
    /// current directory)
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Scope the session to the directory itself instead of the
    /// project root
    #[arg(long)]
    subtree: bool,

    /// The file the prompt is about; added to the session context when
    /// the command may edit files
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Chat mode to switch to before sending
    #[arg(short, long, value_parser = parse_mode)]
    mode: Option<Mode>,

    /// Config file (TOML); defaults apply when absent
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn parse_mode(name: &str) -> std::result::Result<Mode, String> {
    Mode::parse(name).ok_or_else(|| format!("unknown mode: {name}"))
}

fn log_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
}

/// Send one command and wait for its correlated response.
async fn send_and_wait(
    session: &Arc<Session>,
    text: &str,
    active_file: Option<PathBuf>,
) -> Result<String> {
    let (tx, rx) = oneshot::channel();
    session.send(
        text,
        active_file.as_deref(),
        Some(Box::new(move |response| {
            let _ = tx.send(response);
        })),
    )?;
    rx.await.context("session closed before responding")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(log_filter()).init();

    let args = Args::parse();
    let config = match args.config {
        Some(ref path) => Config::load(path)?,
        None => Config::default(),
    };

    let dir = match args.dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("cannot determine current directory")?,
    };

    let registry = SessionRegistry::new(config);
    let session = registry.session_for(&dir, args.subtree)?;

    if let Some(mode) = args.mode {
        let (tx, rx) = oneshot::channel();
        session.send_op(
            &Op::ChatMode(mode),
            Some(Box::new(move |_| {
                let _ = tx.send(());
            })),
        )?;
        rx.await.context("session closed during mode switch")?;
    }

    let prompt = args.prompt.join(" ");
    let response = send_and_wait(&session, &prompt, args.file).await?;
    print!("{response}");

    registry.shutdown();
    Ok(())
}
