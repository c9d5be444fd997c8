//! Session module - session lifecycle and multiplexing
//!
//! # Components
//! - `Session`: one live assistant process bound to a scope directory
//! - `SessionRegistry`: resolves working paths to scopes and owns sessions

mod registry;
#[allow(clippy::module_inception)]
mod session;

pub use registry::SessionRegistry;
pub use session::{PromptId, ResponseCallback, Session};
