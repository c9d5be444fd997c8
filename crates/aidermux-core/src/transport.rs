//! Transport - the subprocess boundary
//!
//! A transport owns one assistant process under a PTY and turns its raw
//! byte stream into broadcast events: output chunks, an end-of-response
//! signal, and process exit. Startup output up to the assistant's first
//! input prompt is swallowed, so the banner never reaches a session's
//! capture. Sessions only depend on the `Transport` trait, so tests
//! drive them with scripted doubles.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, PtySize};
use regex::Regex;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::error::{MuxError, Result};

const PTY_COLS: u16 = 120;
const PTY_ROWS: u16 = 30;

/// Events delivered asynchronously from the assistant process.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A chunk of raw output.
    Output(String),
    /// The assistant is back at its input prompt; the in-flight command
    /// has produced its full response.
    ResponseComplete,
    /// The process exited.
    Exited(i32),
}

/// The seam between sessions and the subprocess.
pub trait Transport: Send + Sync {
    /// Write one command line (a newline is appended).
    fn write_line(&self, text: &str) -> Result<()>;
    /// Whether the underlying process is still running.
    fn is_alive(&self) -> bool;
    /// Kill the process. Idempotent.
    fn terminate(&self);
    /// Subscribe to output/completion/exit events.
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}

/// Detects the assistant's input prompt at the tail of the output stream.
///
/// Pure state machine so the heuristic is testable without a process:
/// feed chunks, get back "response complete" when the last line of output
/// looks like a prompt.
pub struct PromptDetector {
    pattern: Regex,
    tail: String,
}

impl PromptDetector {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| MuxError::Config(format!("bad prompt pattern: {e}")))?;
        Ok(Self {
            pattern,
            tail: String::new(),
        })
    }

    /// Feed a chunk of raw output. Returns true when the stream is now
    /// resting at a prompt. The tail resets after each detection so one
    /// prompt yields one signal.
    pub fn feed(&mut self, chunk: &str) -> bool {
        self.tail.push_str(chunk);
        // Only the final line matters; keep the buffer bounded.
        if let Some(idx) = self.tail.rfind('\n') {
            self.tail.drain(..=idx);
        }
        if self.pattern.is_match(self.tail.trim_end_matches('\r')) {
            self.tail.clear();
            true
        } else {
            false
        }
    }
}

/// Gate between the raw stream and the event channel. Everything before
/// the assistant's first input prompt is startup noise (banner, version
/// chatter, the prompt itself) and produces no events; from then on each
/// chunk is forwarded and a prompt-shaped tail raises the completion
/// signal.
pub struct OutputGate {
    detector: PromptDetector,
    ready: bool,
}

impl OutputGate {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            detector: PromptDetector::new(pattern)?,
            ready: false,
        })
    }

    /// Whether the startup output has been consumed.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Feed a chunk of raw output, producing the events to publish.
    pub fn feed(&mut self, chunk: &str) -> Vec<TransportEvent> {
        let complete = self.detector.feed(chunk);
        if !self.ready {
            if complete {
                self.ready = true;
            }
            return Vec::new();
        }
        let mut events = vec![TransportEvent::Output(chunk.to_string())];
        if complete {
            events.push(TransportEvent::ResponseComplete);
        }
        events
    }
}

/// PTY-backed transport for the real assistant process.
pub struct ProcessTransport {
    writer: Mutex<Box<dyn Write + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    alive: Arc<AtomicBool>,
    event_tx: broadcast::Sender<TransportEvent>,
    pid: Option<u32>,
}

impl ProcessTransport {
    /// Spawn the assistant under a PTY in `cwd` and start the reader and
    /// exit-watcher threads.
    pub fn spawn(command: &str, args: &[String], cwd: &Path, prompt_pattern: &str) -> Result<Self> {
        let mut gate = OutputGate::new(prompt_pattern)?;

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: PTY_ROWS,
                cols: PTY_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| MuxError::Transport(e.to_string()))?;

        let mut cmd = CommandBuilder::new(command);
        cmd.args(args);
        cmd.cwd(cwd);
        for (key, value) in std::env::vars() {
            cmd.env(key, value);
        }
        // Plain output; the capture layer has no ANSI parser.
        cmd.env("TERM", "dumb");

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| MuxError::Transport(e.to_string()))?;
        let pid = child.process_id();
        let killer = child.clone_killer();

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| MuxError::Transport(e.to_string()))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| MuxError::Transport(e.to_string()))?;

        let (event_tx, _) = broadcast::channel(1024);
        let alive = Arc::new(AtomicBool::new(true));

        info!(command = %command, cwd = %cwd.display(), pid = ?pid, "assistant spawned");

        // Reader thread: chunk raw output into events, raise the
        // completion signal when the prompt comes back.
        let reader_tx = event_tx.clone();
        let reader_alive = Arc::clone(&alive);
        thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&buf[..n]).to_string();
                        let was_ready = gate.is_ready();
                        let events = gate.feed(&chunk);
                        if !was_ready && gate.is_ready() {
                            debug!("assistant ready; startup output consumed");
                        }
                        for event in events {
                            let _ = reader_tx.send(event);
                        }
                    }
                    Err(e) => {
                        if reader_alive.load(Ordering::SeqCst) {
                            error!(error = %e, "transport read error");
                        }
                        break;
                    }
                }
            }
        });

        // Exit watcher: reap the child and flip liveness.
        let exit_tx = event_tx.clone();
        let exit_alive = Arc::clone(&alive);
        thread::spawn(move || {
            let code = match child.wait() {
                Ok(status) => status.exit_code() as i32,
                Err(_) => -1,
            };
            exit_alive.store(false, Ordering::SeqCst);
            let _ = exit_tx.send(TransportEvent::Exited(code));
            info!(exit_code = code, "assistant exited");
        });

        Ok(Self {
            writer: Mutex::new(writer),
            killer: Mutex::new(killer),
            alive,
            event_tx,
            pid,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

impl Transport for ProcessTransport {
    fn write_line(&self, text: &str) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writer.write_all(text.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        debug!(len = text.len(), "wrote command line");
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn terminate(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let mut killer = self
            .killer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let _ = killer.kill();
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.event_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn detector() -> PromptDetector {
        PromptDetector::new(&Config::default().prompt_pattern).unwrap()
    }

    #[test]
    fn test_no_completion_mid_response() {
        let mut d = detector();
        assert!(!d.feed("Applying edits to src/main.rs\n"));
        assert!(!d.feed("Done. 2 files changed.\n"));
    }

    #[test]
    fn test_completion_on_bare_prompt() {
        let mut d = detector();
        assert!(!d.feed("some output\n"));
        assert!(d.feed("> "));
    }

    #[test]
    fn test_completion_on_mode_prompt() {
        let mut d = detector();
        assert!(d.feed("response text\nask> "));
        // Tail resets: the same prompt is not reported twice.
        assert!(!d.feed(""));
    }

    #[test]
    fn test_prompt_split_across_chunks() {
        let mut d = detector();
        assert!(!d.feed("output\narchi"));
        assert!(d.feed("tect> "));
    }

    #[test]
    fn test_prompt_like_text_inside_line_ignored() {
        let mut d = detector();
        assert!(!d.feed("the > operator is overloaded here\n"));
    }

    fn gate() -> OutputGate {
        OutputGate::new(&Config::default().prompt_pattern).unwrap()
    }

    #[test]
    fn test_gate_swallows_startup_output() {
        let mut g = gate();
        assert!(g.feed("aider v0.0 (main)\nwelcome!\n").is_empty());
        assert!(!g.is_ready());
        // The initial prompt itself is startup output too.
        assert!(g.feed("> ").is_empty());
        assert!(g.is_ready());
    }

    #[test]
    fn test_gate_forwards_first_response_not_banner() {
        let mut g = gate();
        g.feed("welcome banner\n> ");

        let events = g.feed("the real answer\n");
        assert!(
            matches!(&events[..], [TransportEvent::Output(text)] if text == "the real answer\n")
        );

        let events = g.feed("> ");
        assert!(matches!(
            events.last(),
            Some(TransportEvent::ResponseComplete)
        ));
    }

    #[test]
    fn test_gate_handles_banner_split_across_chunks() {
        let mut g = gate();
        assert!(g.feed("starting up").is_empty());
        assert!(g.feed("...\n>").is_empty());
        assert!(g.feed(" ").is_empty());
        assert!(g.is_ready());
    }
}
