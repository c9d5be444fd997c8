//! aidermux-core - session multiplexing for an interactive AI coding assistant
//!
//! Manages long-lived assistant processes, each bound to a project scope,
//! and mediates all command/response traffic between an editing surface
//! and those processes.
//!
//! # Components
//! - `SessionRegistry`: resolves working paths to scopes, owns sessions
//! - `Session`: one assistant process, its tracked files and in-flight command
//! - `command`: logical operations formatted into wire payloads
//! - `listing`: tracked-file listing parser
//! - `transport`: the PTY subprocess boundary and completion detection
//!
//! Callers register a callback per command and return; responses arrive
//! asynchronously from the capture task. Sessions must be driven from
//! within a tokio runtime.

pub mod command;
pub mod config;
pub mod error;
pub mod listing;
pub mod scope;
mod session;
pub mod transport;

pub use command::{Mode, Op, MULTILINE_END, MULTILINE_START};
pub use config::Config;
pub use error::{MuxError, Result};
pub use listing::{Listing, TrackedFile, IN_CHAT_LABEL, READ_ONLY_LABEL};
pub use session::{PromptId, ResponseCallback, Session, SessionRegistry};
pub use transport::{OutputGate, ProcessTransport, PromptDetector, Transport, TransportEvent};
