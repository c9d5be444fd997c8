//! Error taxonomy for the session multiplexer
//!
//! Configuration errors are fatal to the requested operation. Transport
//! errors leave the session terminal. Caller misuse is rejected up front.
//! Listing parse problems are deliberately NOT errors; the parser yields
//! an empty or partial file list instead.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MuxError {
    /// No version-control root and no usable directory for the request.
    #[error("no scope root: {0} is not inside a project and is not a usable directory")]
    NoScopeRoot(PathBuf),

    /// The assistant process is gone. The session is terminal and must be
    /// recreated through the registry; there is no automatic respawn.
    #[error("session unavailable: assistant process for {0} is not running")]
    SessionUnavailable(PathBuf),

    /// A command is already awaiting its response on this session.
    /// Callers must serialize per-session.
    #[error("command already in flight for session {0}")]
    CommandInFlight(PathBuf),

    /// Directory add exceeded the configured candidate guard.
    #[error("refusing to add {count} files under {dir} (limit {limit})")]
    TooManyFiles {
        dir: PathBuf,
        count: usize,
        limit: usize,
    },

    /// `submit_prompt` with an id that was never begun (or already consumed).
    #[error("unknown prompt id {0}")]
    UnknownPrompt(u64),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MuxError>;
