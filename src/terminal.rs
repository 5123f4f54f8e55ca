//! Managed local terminal subprocesses.
//!
//! [`TerminalManager`] owns the terminals spawned on behalf of an agent's
//! `terminal/*` callbacks. Each terminal is a shell-interpreted child
//! process whose stdout and stderr feed one [`OutputRing`], with an exit
//! status resolved exactly once through a [`watch`] channel.
//!
//! Lookup by unknown id is a hard [`AppError::NotFound`] — never a silent
//! empty result — and [`TerminalManager::release`] makes an id permanently
//! invalid regardless of whether the OS process has exited yet.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acp::types::{
    CreateTerminalRequest, CreateTerminalResponse, TerminalExitStatus, TerminalOutputResponse,
};
use crate::{AppError, Result};

/// Default output ring-buffer limit: 1 MiB.
pub const DEFAULT_OUTPUT_BYTE_LIMIT: u64 = 1_048_576;

/// Grace period between the terminate signal and the forced kill.
pub const KILL_GRACE: Duration = Duration::from_millis(3000);

// ── Output ring ──────────────────────────────────────────────────────────────

/// Bounded chunk accumulator for terminal output.
///
/// Chunks append in arrival order; while the buffered total exceeds the byte
/// limit and more than one chunk remains, the oldest chunk is dropped. The
/// `truncated` flag is sticky: once the observed total has ever exceeded the
/// limit it stays set, even if the buffer later shrinks below it.
#[derive(Debug)]
pub struct OutputRing {
    chunks: VecDeque<Vec<u8>>,
    total: usize,
    limit: usize,
    ever_exceeded: bool,
}

impl OutputRing {
    /// Create a ring with the given byte limit.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            total: 0,
            limit,
            ever_exceeded: false,
        }
    }

    /// Append one chunk, evicting oldest chunks past the limit.
    pub fn push(&mut self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        self.total += chunk.len();
        self.chunks.push_back(chunk);
        if self.total > self.limit {
            self.ever_exceeded = true;
        }
        while self.total > self.limit && self.chunks.len() > 1 {
            if let Some(removed) = self.chunks.pop_front() {
                self.total -= removed.len();
            }
        }
    }

    /// Concatenate the buffered chunks to text (lossy UTF-8).
    #[must_use]
    pub fn text(&self) -> String {
        let mut bytes = Vec::with_capacity(self.total);
        for chunk in &self.chunks {
            bytes.extend_from_slice(chunk);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Whether output was ever dropped or over-limit.
    #[must_use]
    pub fn truncated(&self) -> bool {
        self.ever_exceeded
    }

    /// Current buffered byte total.
    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.total
    }
}

// ── Managed terminal ─────────────────────────────────────────────────────────

struct ManagedTerminal {
    ring: Arc<Mutex<OutputRing>>,
    exit_rx: watch::Receiver<Option<TerminalExitStatus>>,
    /// Tells the exit monitor to force-kill the child.
    force_kill: CancellationToken,
    pid: Option<u32>,
}

impl ManagedTerminal {
    fn exit_status(&self) -> Option<TerminalExitStatus> {
        self.exit_rx.borrow().clone()
    }
}

// ── TerminalManager ──────────────────────────────────────────────────────────

/// Owns zero or more local terminal subprocesses with bounded output buffers.
pub struct TerminalManager {
    terminals: Arc<Mutex<HashMap<String, ManagedTerminal>>>,
    counter: AtomicU64,
    default_byte_limit: u64,
    kill_grace: Duration,
}

impl Default for TerminalManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalManager {
    /// Create a manager with the default byte limit and kill grace period.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_OUTPUT_BYTE_LIMIT, KILL_GRACE)
    }

    /// Create a manager with explicit limits (used by config and tests).
    #[must_use]
    pub fn with_limits(default_byte_limit: u64, kill_grace: Duration) -> Self {
        Self {
            terminals: Arc::new(Mutex::new(HashMap::new())),
            counter: AtomicU64::new(0),
            default_byte_limit,
            kill_grace,
        }
    }

    /// Spawn a terminal process and register it.
    ///
    /// The command line is shell-interpreted; declared environment overrides
    /// are merged over the inherited environment.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Terminal`] if the process cannot be spawned or its
    /// output pipes cannot be captured.
    pub fn create(&self, params: &CreateTerminalRequest) -> Result<CreateTerminalResponse> {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let id = format!("term-{seq}-{}", chrono::Utc::now().timestamp_millis());

        let mut cmd = shell_command(&params.command, &params.args);
        if let Some(cwd) = &params.cwd {
            cmd.current_dir(cwd);
        }
        if let Some(env) = &params.env {
            for var in env {
                cmd.env(&var.name, &var.value);
            }
        }
        cmd.stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| AppError::Terminal(format!("failed to spawn terminal: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Terminal("failed to capture terminal stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Terminal("failed to capture terminal stderr".into()))?;

        let limit = usize::try_from(params.output_byte_limit.unwrap_or(self.default_byte_limit))
            .unwrap_or(usize::MAX);
        let ring = Arc::new(Mutex::new(OutputRing::new(limit)));
        let (exit_tx, exit_rx) = watch::channel(None);
        let force_kill = CancellationToken::new();
        let pid = child.id();

        tokio::spawn(pump_output(id.clone(), stdout, Arc::clone(&ring)));
        tokio::spawn(pump_output(id.clone(), stderr, Arc::clone(&ring)));
        tokio::spawn(monitor_exit(id.clone(), child, exit_tx, force_kill.clone()));

        let entry = ManagedTerminal {
            ring,
            exit_rx,
            force_kill,
            pid,
        };
        lock_map(&self.terminals)?.insert(id.clone(), entry);

        info!(terminal_id = %id, command = %params.command, "terminal created");
        Ok(CreateTerminalResponse { terminal_id: id })
    }

    /// Snapshot the buffered output, including the exit status if the
    /// process has already exited.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown or released id.
    pub fn output(&self, terminal_id: &str) -> Result<TerminalOutputResponse> {
        let map = lock_map(&self.terminals)?;
        let term = get_terminal(&map, terminal_id)?;
        let (output, truncated) = {
            let ring = term
                .ring
                .lock()
                .map_err(|_| AppError::Terminal("output ring mutex poisoned".into()))?;
            (ring.text(), ring.truncated())
        };
        Ok(TerminalOutputResponse {
            output,
            truncated,
            exit_status: term.exit_status(),
        })
    }

    /// Await the terminal's exit status. Safe to call repeatedly and
    /// concurrently — every caller observes the same status.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown or released id.
    pub async fn wait_for_exit(&self, terminal_id: &str) -> Result<TerminalExitStatus> {
        let mut exit_rx = {
            let map = lock_map(&self.terminals)?;
            get_terminal(&map, terminal_id)?.exit_rx.clone()
        };

        let waited = match exit_rx.wait_for(Option::is_some).await {
            Ok(status) => status.clone(),
            Err(_) => None,
        };
        if let Some(status) = waited {
            return Ok(status);
        }
        // Monitor ended; the final value is still readable.
        let last = exit_rx.borrow().clone();
        last.ok_or_else(|| {
            AppError::Terminal(format!("exit monitor for \"{terminal_id}\" dropped"))
        })
    }

    /// Send a graceful terminate signal; force-kill if the process is still
    /// running once the grace period elapses.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown or released id.
    pub fn kill(&self, terminal_id: &str) -> Result<()> {
        let (exit_rx, force_kill, pid) = {
            let map = lock_map(&self.terminals)?;
            let term = get_terminal(&map, terminal_id)?;
            (term.exit_rx.clone(), term.force_kill.clone(), term.pid)
        };

        if exit_rx.borrow().is_some() {
            return Ok(());
        }

        terminate_gracefully(pid, &force_kill);

        let grace = self.kill_grace;
        let id = terminal_id.to_owned();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if exit_rx.borrow().is_none() {
                debug!(terminal_id = %id, "terminal survived grace period, force-killing");
                force_kill.cancel();
            }
        });
        Ok(())
    }

    /// Force-kill if still alive, then delete the entry. The id becomes
    /// permanently invalid for all other operations.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown or already-released id.
    pub fn release(&self, terminal_id: &str) -> Result<()> {
        let term = lock_map(&self.terminals)?
            .remove(terminal_id)
            .ok_or_else(|| not_found(terminal_id))?;
        if term.exit_status().is_none() {
            term.force_kill.cancel();
        }
        debug!(terminal_id, "terminal released");
        Ok(())
    }

    /// Force-kill and forget every terminal.
    pub fn dispose_all(&self) {
        if let Ok(mut map) = lock_map(&self.terminals) {
            for (id, term) in map.drain() {
                if term.exit_status().is_none() {
                    term.force_kill.cancel();
                }
                debug!(terminal_id = %id, "terminal disposed");
            }
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────────────────

/// Read one output pipe to EOF, appending chunks to the ring.
async fn pump_output<R>(terminal_id: String, mut pipe: R, ring: Arc<Mutex<OutputRing>>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let mut buf = [0u8; 8192];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Ok(mut ring) = ring.lock() {
                    ring.push(buf[..n].to_vec());
                }
            }
            Err(e) => {
                warn!(terminal_id = %terminal_id, error = %e, "terminal output read failed");
                break;
            }
        }
    }
}

/// Await child exit, resolving the status exactly once. A fired
/// `force_kill` token kills the child first, then resolves from the
/// resulting wait.
async fn monitor_exit(
    terminal_id: String,
    mut child: Child,
    exit_tx: watch::Sender<Option<TerminalExitStatus>>,
    force_kill: CancellationToken,
) {
    let status = tokio::select! {
        result = child.wait() => result,
        () = force_kill.cancelled() => {
            let _ = child.start_kill();
            child.wait().await
        }
    };

    let status = match status {
        Ok(status) => exit_status_of(&status),
        Err(e) => {
            warn!(terminal_id = %terminal_id, error = %e, "error waiting for terminal process");
            TerminalExitStatus {
                exit_code: Some(1),
                signal: None,
            }
        }
    };

    debug!(
        terminal_id = %terminal_id,
        exit_code = ?status.exit_code,
        signal = ?status.signal,
        "terminal exited"
    );
    let _ = exit_tx.send(Some(status));
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Build a shell-interpreted command for the platform.
fn shell_command(command: &str, args: &[String]) -> Command {
    let mut line = command.to_owned();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }

    #[cfg(unix)]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(line);
        cmd
    }
    #[cfg(not(unix))]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(line);
        cmd
    }
}

/// Send the platform's graceful terminate signal.
#[cfg(unix)]
fn terminate_gracefully(pid: Option<u32>, force_kill: &CancellationToken) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match pid.and_then(|p| i32::try_from(p).ok()) {
        Some(pid) => {
            if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                debug!(pid, error = %e, "SIGTERM failed, forcing kill");
                force_kill.cancel();
            }
        }
        None => force_kill.cancel(),
    }
}

/// No graceful signal on this platform — force-kill immediately.
#[cfg(not(unix))]
fn terminate_gracefully(_pid: Option<u32>, force_kill: &CancellationToken) {
    force_kill.cancel();
}

fn exit_status_of(status: &std::process::ExitStatus) -> TerminalExitStatus {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal().map(signal_name)
    };
    #[cfg(not(unix))]
    let signal = None;

    TerminalExitStatus {
        exit_code: status.code(),
        signal,
    }
}

#[cfg(unix)]
fn signal_name(signal: i32) -> String {
    match signal {
        2 => "SIGINT".to_owned(),
        9 => "SIGKILL".to_owned(),
        15 => "SIGTERM".to_owned(),
        n => format!("SIG{n}"),
    }
}

fn lock_map(
    map: &Arc<Mutex<HashMap<String, ManagedTerminal>>>,
) -> Result<std::sync::MutexGuard<'_, HashMap<String, ManagedTerminal>>> {
    map.lock()
        .map_err(|_| AppError::Terminal("terminal map mutex poisoned".into()))
}

fn get_terminal<'a>(
    map: &'a HashMap<String, ManagedTerminal>,
    terminal_id: &str,
) -> Result<&'a ManagedTerminal> {
    map.get(terminal_id).ok_or_else(|| not_found(terminal_id))
}

fn not_found(terminal_id: &str) -> AppError {
    AppError::NotFound(format!(
        "terminal \"{terminal_id}\" not found or already released"
    ))
}
