//! `/ls` listing parser and tracked-file refresh
//!
//! The listing protocol is textual: zero or one block headed by the literal
//! `Read-only files:` and zero or one headed by `Files in chat:`. Entry
//! lines start with leading whitespace; the first whitespace-delimited
//! token is the path, anything after it is metadata we ignore. Text that
//! matches neither label nor entry shape is skipped. A malformed listing
//! yields an empty or partial list, never an error.

use std::path::Path;

use crate::scope;

pub const READ_ONLY_LABEL: &str = "Read-only files:";
pub const IN_CHAT_LABEL: &str = "Files in chat:";

/// A file the assistant has been told is part of its context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    pub path: String,
    pub read_only: bool,
}

impl TrackedFile {
    /// Display form; read-only entries carry the conventional suffix.
    pub fn display_name(&self) -> String {
        if self.read_only {
            format!("{} (read-only)", self.path)
        } else {
            self.path.clone()
        }
    }
}

/// Raw sections of a listing response, in document order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Listing {
    pub read_only: Vec<String>,
    pub in_chat: Vec<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    None,
    ReadOnly,
    InChat,
}

/// Parse the raw listing text into its two sections.
pub fn parse_listing(text: &str) -> Listing {
    let mut listing = Listing::default();
    let mut section = Section::None;

    for line in text.lines() {
        let trimmed = line.trim_end();
        if trimmed.trim_start() == READ_ONLY_LABEL {
            section = Section::ReadOnly;
            continue;
        }
        if trimmed.trim_start() == IN_CHAT_LABEL {
            section = Section::InChat;
            continue;
        }

        // Entry lines are indented; anything flush-left ends the section.
        if !trimmed.starts_with(char::is_whitespace) {
            if !trimmed.is_empty() {
                section = Section::None;
            }
            continue;
        }
        let Some(path) = trimmed.split_whitespace().next() else {
            continue;
        };
        match section {
            Section::ReadOnly => listing.read_only.push(path.to_string()),
            Section::InChat => listing.in_chat.push(path.to_string()),
            Section::None => {}
        }
    }

    listing
}

/// Resolve a parsed listing into the authoritative tracked-file set.
///
/// Remote sessions record paths as-is with no existence checks. Local
/// sessions resolve each path against the scope root, drop paths that no
/// longer exist, and store them relative to the root. First occurrence
/// wins; the result is duplicate-free.
pub fn resolve_tracked(listing: &Listing, scope_root: &Path, remote: bool) -> Vec<TrackedFile> {
    let mut tracked: Vec<TrackedFile> = Vec::new();

    let entries = listing
        .read_only
        .iter()
        .map(|p| (p, true))
        .chain(listing.in_chat.iter().map(|p| (p, false)));

    for (raw, read_only) in entries {
        let path = if remote {
            raw.clone()
        } else {
            let candidate = if Path::new(raw).is_absolute() {
                Path::new(raw).to_path_buf()
            } else {
                scope_root.join(raw)
            };
            if !candidate.exists() {
                continue;
            }
            scope::relativize(scope_root, &candidate)
        };

        if tracked.iter().any(|t| t.path == path) {
            continue;
        }
        tracked.push(TrackedFile { path, read_only });
    }

    tracked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_both_sections() {
        let text = "Read-only files:\n  docs/spec.txt  1234 tokens\nFiles in chat:\n  src/main.go\n  src/util.go\n";
        let listing = parse_listing(text);
        assert_eq!(listing.read_only, vec!["docs/spec.txt"]);
        assert_eq!(listing.in_chat, vec!["src/main.go", "src/util.go"]);
    }

    #[test]
    fn test_parse_tolerates_garbage() {
        let listing = parse_listing("Nothing useful here.\nJust chatter.\n");
        assert!(listing.read_only.is_empty());
        assert!(listing.in_chat.is_empty());
    }

    #[test]
    fn test_unindented_line_ends_section() {
        let text = "Files in chat:\n  src/main.go\nSome closing remark.\n  not/a/path.go\n";
        let listing = parse_listing(text);
        assert_eq!(listing.in_chat, vec!["src/main.go"]);
    }

    #[test]
    fn test_remote_paths_recorded_as_is() {
        let listing = parse_listing("Read-only files:\n  lib/a.py\nFiles in chat:\n  src/b.py\n");
        let tracked = resolve_tracked(&listing, Path::new("/ignored"), true);
        assert_eq!(tracked.len(), 2);
        assert_eq!(tracked[0].display_name(), "lib/a.py (read-only)");
        assert_eq!(tracked[1].display_name(), "src/b.py");
    }

    #[test]
    fn test_local_resolution_drops_missing_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir(root.join("src")).unwrap();
        std::fs::write(root.join("src/main.go"), "package main\n").unwrap();

        let text = "Files in chat:\n  src/main.go\n  src/main.go\n  src/ghost.go\n";
        let listing = parse_listing(text);
        let tracked = resolve_tracked(&listing, root, false);

        let names: Vec<String> = tracked.iter().map(TrackedFile::display_name).collect();
        assert_eq!(names, vec!["src/main.go"]);
    }

    #[test]
    fn test_refresh_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("a.rs"), "").unwrap();
        std::fs::write(root.join("b.rs"), "").unwrap();

        let text = "Files in chat:\n  a.rs\n  b.rs\n  a.rs\n";
        let first = resolve_tracked(&parse_listing(text), root, false);
        let second = resolve_tracked(&parse_listing(text), root, false);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }
}
