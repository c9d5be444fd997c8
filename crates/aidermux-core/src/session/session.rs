//! Session - one assistant process bound to a scope
//!
//! A session owns its transport exclusively, tracks which files the
//! assistant knows about, and correlates asynchronous output with the
//! command that caused it. At most one command is in flight at a time;
//! the registered callback fires exactly once with the accumulated
//! response text.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::command::{self, Mode, Op};
use crate::config::Config;
use crate::error::{MuxError, Result};
use crate::listing::{self, TrackedFile};
use crate::scope;
use crate::transport::{ProcessTransport, Transport, TransportEvent};

/// Invoked once with the full response text of a completed command.
pub type ResponseCallback = Box<dyn FnOnce(String) + Send + 'static>;

/// Handle returned by `begin_prompt`, consumed by `submit_prompt`.
pub type PromptId = u64;

/// Output-capture state machine: `Idle -> Awaiting -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureState {
    Idle,
    Awaiting,
}

/// The in-flight command slot. One per session.
struct PendingSlot {
    state: CaptureState,
    output: String,
    callback: Option<ResponseCallback>,
    /// Completion signals still expected before the callback may fire.
    /// Greater than one when an implicit `/add` preceded the command.
    remaining: u32,
    /// Command lines whose PTY echo is stripped from the response.
    echo: Vec<String>,
}

impl PendingSlot {
    fn new() -> Self {
        Self {
            state: CaptureState::Idle,
            output: String::new(),
            callback: None,
            remaining: 0,
            echo: Vec::new(),
        }
    }

    fn disarm(&mut self) -> Option<ResponseCallback> {
        self.state = CaptureState::Idle;
        self.remaining = 0;
        self.output.clear();
        self.echo.clear();
        self.callback.take()
    }
}

/// One live conversational context bound to a scope directory.
pub struct Session {
    scope_key: PathBuf,
    subtree_only: bool,
    /// Scope uses a remote-access protocol path; file tracking records
    /// paths verbatim without existence checks.
    remote: bool,
    config: Config,
    mode: RwLock<Option<Mode>>,
    tracked_files: RwLock<Vec<TrackedFile>>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    pending: Arc<Mutex<PendingSlot>>,
    dead: Arc<AtomicBool>,
    drafts: Mutex<HashMap<PromptId, String>>,
    draft_counter: AtomicU64,
}

impl Session {
    pub(crate) fn new(scope_key: PathBuf, subtree_only: bool, config: Config) -> Self {
        let remote = scope::is_remote_path(&scope_key.to_string_lossy());
        Self {
            scope_key,
            subtree_only,
            remote,
            config,
            mode: RwLock::new(None),
            tracked_files: RwLock::new(Vec::new()),
            transport: Mutex::new(None),
            pending: Arc::new(Mutex::new(PendingSlot::new())),
            dead: Arc::new(AtomicBool::new(false)),
            drafts: Mutex::new(HashMap::new()),
            draft_counter: AtomicU64::new(0),
        }
    }

    // ========== Getters ==========

    pub fn scope_key(&self) -> &Path {
        &self.scope_key
    }

    pub fn subtree_only(&self) -> bool {
        self.subtree_only
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    /// Current assistant mode; `None` until the first `/chat-mode`.
    pub fn mode(&self) -> Option<Mode> {
        *self.mode.read().unwrap_or_else(|p| p.into_inner())
    }

    pub fn tracked_files(&self) -> Vec<TrackedFile> {
        self.tracked_files
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn is_tracked(&self, path: &str) -> bool {
        self.tracked_files
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .any(|t| t.path == path)
    }

    /// Whether the session can still accept commands.
    pub fn is_alive(&self) -> bool {
        !self.dead.load(Ordering::SeqCst)
    }

    // ========== Dispatch ==========

    /// Send free-form text to the assistant. Multi-line text is framed as
    /// one logical block. When the command may edit files and the active
    /// file is not yet tracked, an `/add` for it is written first,
    /// silently.
    ///
    /// The caller does not block for the response: the callback fires
    /// from the capture task once the transport signals completion.
    pub fn send(
        &self,
        text: &str,
        active_file: Option<&Path>,
        callback: Option<ResponseCallback>,
    ) -> Result<()> {
        let may_edit = command::may_edit_files(text, self.mode());
        let implicit_add = if may_edit {
            active_file.and_then(|f| self.implicit_add_for(f))
        } else {
            None
        };
        let payload = command::wrap_multiline(text);
        self.dispatch_lines(
            implicit_add.as_ref().map(|(_, line)| line.clone()),
            &payload,
            callback,
        )?;
        // Record the file only once the /add is on the wire; a rejected
        // send must leave the hook armed for the retry.
        if let Some((display, _)) = implicit_add {
            self.tracked_files
                .write()
                .unwrap_or_else(|p| p.into_inner())
                .push(TrackedFile {
                    path: display,
                    read_only: false,
                });
        }
        Ok(())
    }

    /// Format and send a logical operation.
    pub fn send_op(&self, op: &Op, callback: Option<ResponseCallback>) -> Result<()> {
        let payload = command::format(op);
        if let Op::ChatMode(mode) = op {
            *self.mode.write().unwrap_or_else(|p| p.into_inner()) = Some(*mode);
        }
        self.dispatch_lines(None, &payload, callback)
    }

    /// Add every file under `dir`, guarded by the configured candidate
    /// limit.
    pub fn add_directory(&self, dir: &Path, callback: Option<ResponseCallback>) -> Result<()> {
        let mut files = Vec::new();
        collect_files(dir, &mut files)?;
        if files.len() > self.config.max_dir_files {
            return Err(MuxError::TooManyFiles {
                dir: dir.to_path_buf(),
                count: files.len(),
                limit: self.config.max_dir_files,
            });
        }
        let paths: Vec<String> = files
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        self.send_op(&Op::Add(paths), callback)
    }

    /// Request the tracked-file listing (`/ls`). Pair with
    /// `apply_listing` from the callback to refresh tracking.
    pub fn list_files(&self, callback: Option<ResponseCallback>) -> Result<()> {
        self.send_op(&Op::Ls, callback)
    }

    /// Drop every file from the assistant's context.
    pub fn drop_all(&self, callback: Option<ResponseCallback>) -> Result<()> {
        self.send_op(&Op::Drop(Vec::new()), callback)
    }

    /// Replace the tracked-file set from a listing response. The listing
    /// is authoritative; the previous set is discarded, not merged.
    /// Returns the display names of the new set.
    pub fn apply_listing(&self, listing_text: &str) -> Vec<String> {
        let parsed = listing::parse_listing(listing_text);
        let tracked = listing::resolve_tracked(&parsed, &self.scope_key, self.remote);
        let names: Vec<String> = tracked.iter().map(TrackedFile::display_name).collect();
        *self
            .tracked_files
            .write()
            .unwrap_or_else(|p| p.into_inner()) = tracked;
        debug!(scope = %self.scope_key.display(), files = names.len(), "tracked files refreshed");
        names
    }

    // ========== Two-step prompt protocol ==========

    /// Open a draft prompt. The editor-facing layer presents the draft
    /// and later commits the edited text through `submit_prompt`.
    pub fn begin_prompt(&self, initial_text: &str) -> PromptId {
        let id = self.draft_counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.drafts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id, initial_text.to_string());
        id
    }

    /// Consume a draft and send its final committed text.
    pub fn submit_prompt(
        &self,
        id: PromptId,
        final_text: &str,
        active_file: Option<&Path>,
        callback: Option<ResponseCallback>,
    ) -> Result<()> {
        self.drafts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&id)
            .ok_or(MuxError::UnknownPrompt(id))?;
        self.send(final_text, active_file, callback)
    }

    /// The stored draft text, if the prompt is still open.
    pub fn draft_text(&self, id: PromptId) -> Option<String> {
        self.drafts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&id)
            .cloned()
    }

    // ========== Lifecycle ==========

    /// Unconditional exit: best-effort `/exit`, transport teardown, and
    /// any pending callback is discarded without being invoked.
    pub fn exit(&self) {
        let transport = self
            .transport
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(transport) = transport {
            let _ = transport.write_line(command::format(&Op::Exit).as_str());
            transport.terminate();
        }
        self.dead.store(true, Ordering::SeqCst);
        let dropped = self
            .pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .disarm();
        if dropped.is_some() {
            debug!(scope = %self.scope_key.display(), "pending callback discarded on exit");
        }
        info!(scope = %self.scope_key.display(), "session exited");
    }

    // ========== Internals ==========

    /// The `/add` payload for an active file not yet in the tracked set,
    /// paired with the display path to record after the line is written.
    fn implicit_add_for(&self, active_file: &Path) -> Option<(String, String)> {
        let display = if self.remote {
            active_file.to_string_lossy().into_owned()
        } else {
            scope::relativize(&self.scope_key, active_file)
        };
        if self.is_tracked(&display) {
            return None;
        }
        let raw = active_file.to_string_lossy().into_owned();
        debug!(scope = %self.scope_key.display(), file = %raw, "implicitly adding active file");
        Some((display, command::format(&Op::Add(vec![raw]))))
    }

    /// Arm the correlator and write the command line(s). Holding the slot
    /// lock across the writes keeps the capture task from observing a
    /// half-armed slot.
    fn dispatch_lines(
        &self,
        first: Option<String>,
        payload: &str,
        callback: Option<ResponseCallback>,
    ) -> Result<()> {
        if !self.is_alive() {
            return Err(MuxError::SessionUnavailable(self.scope_key.clone()));
        }
        let transport = self.ensure_transport()?;
        if !transport.is_alive() {
            self.dead.store(true, Ordering::SeqCst);
            return Err(MuxError::SessionUnavailable(self.scope_key.clone()));
        }

        let mut slot = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        if slot.state == CaptureState::Awaiting {
            return Err(MuxError::CommandInFlight(self.scope_key.clone()));
        }

        slot.state = CaptureState::Awaiting;
        slot.output.clear();
        slot.callback = callback;
        slot.remaining = 1 + u32::from(first.is_some());
        slot.echo.clear();
        if let Some(ref line) = first {
            slot.echo.extend(line.lines().map(str::to_string));
        }
        slot.echo.extend(payload.lines().map(str::to_string));

        let written = first
            .as_deref()
            .map_or(Ok(()), |line| transport.write_line(line))
            .and_then(|_| transport.write_line(payload));
        if let Err(e) = written {
            slot.disarm();
            self.dead.store(true, Ordering::SeqCst);
            return Err(e);
        }

        debug!(
            scope = %self.scope_key.display(),
            lines = slot.echo.len(),
            expected_completions = slot.remaining,
            "command dispatched"
        );
        Ok(())
    }

    /// The session's transport, created on first use.
    fn ensure_transport(&self) -> Result<Arc<dyn Transport>> {
        let mut guard = self.transport.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(ref transport) = *guard {
            return Ok(Arc::clone(transport));
        }

        let cwd_string = self.scope_key.to_string_lossy();
        let cwd = PathBuf::from(scope::localize_path(&cwd_string));
        let transport: Arc<dyn Transport> = Arc::new(ProcessTransport::spawn(
            &self.config.command,
            &self.config.args,
            &cwd,
            &self.config.prompt_pattern,
        )?);
        self.attach_transport(Arc::clone(&transport));
        *guard = Some(Arc::clone(&transport));
        Ok(transport)
    }

    /// Start the capture task for a transport. Also the injection point
    /// for scripted transports in tests.
    fn attach_transport(&self, transport: Arc<dyn Transport>) {
        let rx = transport.subscribe();
        let pending = Arc::clone(&self.pending);
        let dead = Arc::clone(&self.dead);
        let scope = self.scope_key.clone();
        tokio::spawn(capture_loop(rx, pending, dead, scope));
    }

    #[cfg(test)]
    pub(crate) fn install_transport(&self, transport: Arc<dyn Transport>) {
        self.attach_transport(Arc::clone(&transport));
        *self.transport.lock().unwrap() = Some(transport);
    }
}

/// Capture task: appends output chunks to the in-flight slot and fires
/// the callback exactly once when the last expected completion signal
/// arrives.
async fn capture_loop(
    mut rx: broadcast::Receiver<TransportEvent>,
    pending: Arc<Mutex<PendingSlot>>,
    dead: Arc<AtomicBool>,
    scope: PathBuf,
) {
    loop {
        match rx.recv().await {
            Ok(TransportEvent::Output(chunk)) => {
                let mut slot = pending.lock().unwrap_or_else(|p| p.into_inner());
                if slot.state == CaptureState::Awaiting {
                    slot.output.push_str(&chunk);
                }
            }
            Ok(TransportEvent::ResponseComplete) => {
                let fired = {
                    let mut slot = pending.lock().unwrap_or_else(|p| p.into_inner());
                    if slot.state != CaptureState::Awaiting {
                        None
                    } else if slot.remaining > 1 {
                        slot.remaining -= 1;
                        None
                    } else {
                        let output = std::mem::take(&mut slot.output);
                        let echo = std::mem::take(&mut slot.echo);
                        let callback = slot.disarm();
                        callback.map(|cb| (cb, strip_echo(&output, &echo)))
                    }
                };
                // Invoke outside the lock; the callback may re-enter the
                // session to send the next command.
                if let Some((callback, response)) = fired {
                    debug!(scope = %scope.display(), len = response.len(), "response complete");
                    callback(response);
                }
            }
            Ok(TransportEvent::Exited(code)) => {
                dead.store(true, Ordering::SeqCst);
                let dropped = pending
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .disarm();
                if dropped.is_some() {
                    warn!(scope = %scope.display(), exit_code = code, "assistant died with a command in flight");
                } else {
                    info!(scope = %scope.display(), exit_code = code, "assistant exited");
                }
                break;
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(scope = %scope.display(), skipped = n, "capture lagged; output chunks lost");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Remove the PTY echo of the command lines from the head of the
/// captured response.
fn strip_echo(output: &str, echo: &[String]) -> String {
    let mut expected = echo.iter();
    let mut next = expected.next();
    let mut kept: Vec<&str> = Vec::new();

    for line in output.lines() {
        if let Some(cmd) = next {
            if line.trim_end_matches('\r') == cmd {
                next = expected.next();
                continue;
            }
        }
        kept.push(line);
    }

    let mut result = kept.join("\n");
    if output.ends_with('\n') && !result.is_empty() {
        result.push('\n');
    }
    result
}

/// Recursively collect regular files, skipping dot-entries.
fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}
