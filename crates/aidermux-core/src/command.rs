//! Command formatting
//!
//! Turns logical operations into the exact text payloads the assistant
//! expects: slash directives with uniformly quoted paths, multi-line prompt
//! framing, and the mode-dependent "may this edit files" derivation.

use crate::scope;

/// Marker lines wrapping a multi-line prompt so the transport treats the
/// block as one logical unit instead of line-buffered input.
pub const MULTILINE_START: &str = "{aider";
pub const MULTILINE_END: &str = "aider}";

/// Assistant behavior mode. Unprefixed free text edits files only in
/// `Code` and `Architect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Code,
    Ask,
    Architect,
    Help,
}

impl Mode {
    /// The name used on the wire (`/chat-mode <name>`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Code => "code",
            Mode::Ask => "ask",
            Mode::Architect => "architect",
            Mode::Help => "help",
        }
    }

    pub fn parse(name: &str) -> Option<Mode> {
        match name {
            "code" => Some(Mode::Code),
            "ask" => Some(Mode::Ask),
            "architect" => Some(Mode::Architect),
            "help" => Some(Mode::Help),
            _ => None,
        }
    }

    /// Whether unprefixed free text in this mode is interpreted as an
    /// edit request.
    pub fn edits_files(&self) -> bool {
        matches!(self, Mode::Code | Mode::Architect)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logical operation before formatting.
#[derive(Debug, Clone)]
pub enum Op {
    /// Add files to the assistant's context.
    Add(Vec<String>),
    /// Add files read-only.
    ReadOnly(Vec<String>),
    /// Drop files from the context; an empty list drops everything.
    Drop(Vec<String>),
    /// List tracked files.
    Ls,
    /// Switch assistant behavior mode.
    ChatMode(Mode),
    /// Clear the conversation.
    Clear,
    /// Reset the session (drop files and clear).
    Reset,
    /// Exit the assistant process.
    Exit,
    /// Undo the assistant's last commit.
    Undo,
    /// Rebuild the repository map.
    MapRefresh,
    /// Free-text prompt, passed through (wrapped only when multi-line).
    Prompt(String),
}

/// Format an operation into the payload written to the transport.
/// The result is always a single line or a single well-formed multi-line
/// block.
pub fn format(op: &Op) -> String {
    match op {
        Op::Add(files) => format_paths("/add", files),
        Op::ReadOnly(files) => format_paths("/read-only", files),
        Op::Drop(files) => format_paths("/drop", files),
        Op::Ls => "/ls".to_string(),
        Op::ChatMode(mode) => format!("/chat-mode {}", mode),
        Op::Clear => "/clear".to_string(),
        Op::Reset => "/reset".to_string(),
        Op::Exit => "/exit".to_string(),
        Op::Undo => "/undo".to_string(),
        Op::MapRefresh => "/map-refresh".to_string(),
        Op::Prompt(text) => wrap_multiline(text),
    }
}

/// Directive keyword plus localized, uniformly double-quoted paths joined
/// with single spaces. Empty and absent elements are filtered; an empty
/// list yields the bare directive with no trailing whitespace.
fn format_paths(directive: &str, files: &[String]) -> String {
    let quoted: Vec<String> = files
        .iter()
        .filter(|f| !f.is_empty())
        .map(|f| format!("\"{}\"", scope::localize_path(f)))
        .collect();

    if quoted.is_empty() {
        directive.to_string()
    } else {
        format!("{} {}", directive, quoted.join(" "))
    }
}

/// Wrap text between the multi-line markers when it contains an internal
/// line break. Idempotent: already-wrapped text comes back unchanged.
pub fn wrap_multiline(text: &str) -> String {
    if !text.contains('\n') {
        return text.to_string();
    }
    if is_wrapped(text) {
        return text.to_string();
    }
    format!("{}\n{}\n{}", MULTILINE_START, text, MULTILINE_END)
}

fn is_wrapped(text: &str) -> bool {
    let mut lines = text.lines();
    let first = lines.next();
    let last = text.lines().next_back();
    first == Some(MULTILINE_START) && last == Some(MULTILINE_END)
}

/// Derive whether a command may cause file edits: unprefixed free text
/// while the effective mode edits files, or an explicit edit-triggering
/// directive prefix.
pub fn may_edit_files(text: &str, mode: Option<Mode>) -> bool {
    let trimmed = text.trim_start();
    if trimmed.starts_with('/') {
        return has_directive(trimmed, "/code") || has_directive(trimmed, "/architect");
    }
    mode.unwrap_or(Mode::Code).edits_files()
}

/// Exact directive token at the head of the text: the keyword alone or
/// followed by whitespace, so `/code` does not match `/codex`.
fn has_directive(text: &str, keyword: &str) -> bool {
    match text.strip_prefix(keyword) {
        Some(rest) => rest.is_empty() || rest.starts_with(char::is_whitespace),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_with_quoted_paths() {
        let op = Op::Drop(vec!["a b.txt".to_string(), "c.txt".to_string()]);
        assert_eq!(format(&op), "/drop \"a b.txt\" \"c.txt\"");
    }

    #[test]
    fn test_empty_file_list_is_bare_directive() {
        assert_eq!(format(&Op::Drop(Vec::new())), "/drop");
        assert_eq!(format(&Op::Add(Vec::new())), "/add");
    }

    #[test]
    fn test_empty_elements_filtered() {
        let op = Op::Add(vec![String::new(), "x.rs".to_string(), String::new()]);
        assert_eq!(format(&op), "/add \"x.rs\"");
    }

    #[test]
    fn test_remote_paths_localized() {
        let op = Op::Add(vec!["/ssh:me@box:/repo/a.rs".to_string()]);
        assert_eq!(format(&op), "/add \"/repo/a.rs\"");
    }

    #[test]
    fn test_chat_mode_directive() {
        assert_eq!(format(&Op::ChatMode(Mode::Architect)), "/chat-mode architect");
    }

    #[test]
    fn test_single_line_prompt_unwrapped() {
        assert_eq!(format(&Op::Prompt("fix the bug".to_string())), "fix the bug");
    }

    #[test]
    fn test_multiline_prompt_wrapped() {
        let wrapped = wrap_multiline("first\nsecond");
        assert_eq!(wrapped, "{aider\nfirst\nsecond\naider}");
    }

    #[test]
    fn test_wrap_is_idempotent() {
        let once = wrap_multiline("first\nsecond");
        let twice = wrap_multiline(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_may_edit_depends_on_mode() {
        assert!(may_edit_files("refactor this", Some(Mode::Code)));
        assert!(may_edit_files("refactor this", Some(Mode::Architect)));
        assert!(!may_edit_files("refactor this", Some(Mode::Ask)));
        assert!(!may_edit_files("refactor this", Some(Mode::Help)));
        // Unset mode defaults to code
        assert!(may_edit_files("refactor this", None));
    }

    #[test]
    fn test_may_edit_directive_prefixes() {
        assert!(may_edit_files("/code do it", Some(Mode::Ask)));
        assert!(may_edit_files("/code", Some(Mode::Ask)));
        assert!(may_edit_files("/architect plan it", Some(Mode::Ask)));
        assert!(!may_edit_files("/ask why", Some(Mode::Code)));
        assert!(!may_edit_files("/ls", Some(Mode::Code)));
        // Exact token, not a string prefix
        assert!(!may_edit_files("/codex try this", Some(Mode::Ask)));
        assert!(!may_edit_files("/architecture notes", Some(Mode::Ask)));
    }

    #[test]
    fn test_mode_parse_round_trip() {
        for mode in [Mode::Code, Mode::Ask, Mode::Architect, Mode::Help] {
            assert_eq!(Mode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(Mode::parse("vibe"), None);
    }
}
