//! Playback supervisor
//!
//! One supervisor owns one playlist and walks each entry through
//! `Resolving -> Launching -> Running -> Stopping -> Terminated`, supervising
//! the spawned player process group until its end-time or cancellation.

use crate::catalog::{Category, ClipRecord};
use crate::config::{PlayerConfig, TimingConfig, MAX_LENGTH_SECS};
use crate::layers::{LayerAllocator, LayerSlot};
use crate::player::{build_player_command, PlayerInvocation};
use crate::probe::DurationProbe;
use crate::process::{ProcessGroup, ProcessRegistry, TerminationError};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Upper bound on captured player stderr
pub const STDERR_CAPTURE_LIMIT: usize = 4096;

/// Clips handed to one supervisor, played in order
pub type Playlist = Vec<ClipRecord>;

/// Error type for player launch
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to spawn {executable}: {source}")]
    Spawn {
        executable: String,
        source: std::io::Error,
    },

    #[error("spawned player reported no pid")]
    NoPid,
}

/// Lifecycle phase of the entry currently being played
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Resolving,
    Launching,
    Running,
    Stopping,
    Terminated,
}

/// Start and length after clamping against the file duration
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEntry {
    pub category: Category,
    pub start: f64,
    pub length: f64,
}

impl ResolvedEntry {
    /// Loops without a length only end through cancellation.
    pub fn is_unbounded(&self) -> bool {
        self.category == Category::Loop && self.length <= 0.0
    }

    /// Time from launch to end-time, pulled forward by `overlap_secs`.
    ///
    /// `None` for unbounded loops and for lengths no `Duration` can hold.
    pub fn run_time(&self, overlap_secs: f64) -> Option<Duration> {
        if self.is_unbounded() {
            return None;
        }
        Duration::try_from_secs_f64((self.length - overlap_secs).max(0.0)).ok()
    }
}

/// Resolving phase: effective start and length of `clip`.
///
/// Returns `None` for disabled clips. `file_duration` is the probed duration,
/// 0 when unknown.
pub fn resolve_entry(clip: &ClipRecord, file_duration: f64) -> Option<ResolvedEntry> {
    if clip.disabled {
        return None;
    }
    let category = clip.category();
    let file_duration = if file_duration.is_finite() {
        file_duration.clamp(0.0, MAX_LENGTH_SECS)
    } else {
        0.0
    };

    let mut start = clip.start.max(0.0);
    if start >= file_duration {
        start = 0.0;
    }

    let mut length = if clip.length > 0.0 {
        clip.length.min(MAX_LENGTH_SECS)
    } else if category == Category::Loop {
        0.0
    } else {
        file_duration
    };

    if category != Category::Loop && start + length > file_duration {
        length = file_duration - start;
    }

    Some(ResolvedEntry {
        category,
        start,
        length,
    })
}

/// Why the Running phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTime,
    Cancelled,
    /// The player exited before either happened
    Exited,
}

/// What happened to one playlist entry
#[derive(Debug)]
pub enum EntryOutcome {
    /// Disabled clip; never launched
    Skipped,
    /// Cancelled before the player was launched
    Cancelled,
    LaunchFailed(String),
    Played {
        slot: LayerSlot,
        stop: StopReason,
        status: Option<ExitStatus>,
        stderr: String,
    },
}

#[derive(Debug)]
pub struct EntryReport {
    pub name: String,
    pub outcome: EntryOutcome,
}

/// Outcome of a whole playlist, in entry order
#[derive(Debug, Default)]
pub struct PlaybackReport {
    pub entries: Vec<EntryReport>,
}

/// Shared collaborators of every supervisor
pub struct PlaybackContext {
    pub player: PlayerConfig,
    pub timing: TimingConfig,
    pub allocator: Arc<LayerAllocator>,
    pub registry: Arc<ProcessRegistry>,
    pub probe: Arc<dyn DurationProbe>,
}

impl PlaybackContext {
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.timing.poll_interval_ms.max(1))
    }

    fn grace_period(&self) -> Duration {
        Duration::from_millis(self.timing.grace_period_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Deadline {
    Pending,
    At(Instant),
    Unbounded,
}

#[derive(Debug, Clone, Copy)]
struct Progress {
    state: PlaybackState,
    deadline: Deadline,
    /// Entries after the current one
    remaining: usize,
    finished: bool,
}

/// Handle to one running playlist
pub struct Supervisor {
    id: Uuid,
    cancel: CancellationToken,
    progress: watch::Receiver<Progress>,
    task: JoinHandle<PlaybackReport>,
}

impl Supervisor {
    /// Begins asynchronous playback of `playlist`.
    pub fn start(ctx: Arc<PlaybackContext>, playlist: Playlist) -> Self {
        let id = Uuid::new_v4();
        let cancel = ctx.registry.child_token();
        let (tx, rx) = watch::channel(Progress {
            state: PlaybackState::Idle,
            deadline: Deadline::Pending,
            remaining: playlist.len().saturating_sub(1),
            finished: false,
        });
        let span = info_span!("playback", id = %id);
        let task = tokio::spawn(run_playlist(ctx, playlist, cancel.clone(), tx).instrument(span));
        Self {
            id,
            cancel,
            progress: rx,
            task,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stops the running entry and abandons the rest of the playlist.
    pub fn cancel(&self) {
        debug!(id = %self.id, "cancel requested");
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn state(&self) -> PlaybackState {
        self.progress.borrow().state
    }

    /// Waits until the end-time of the last entry has passed, the playlist
    /// has finished, or cancellation was requested.
    pub async fn await_completion(&self) {
        let mut rx = self.progress.clone();
        loop {
            let progress = *rx.borrow_and_update();
            if progress.finished || self.cancel.is_cancelled() {
                return;
            }
            match progress.deadline {
                Deadline::At(end) if progress.remaining == 0 => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(end) => return,
                        _ = self.cancel.cancelled() => return,
                        changed = rx.changed() => if changed.is_err() { return },
                    }
                }
                _ => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        changed = rx.changed() => if changed.is_err() { return },
                    }
                }
            }
        }
    }

    /// Waits for every entry to be reaped.
    pub async fn join(self) -> PlaybackReport {
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                warn!(id = %self.id, error = %e, "playback task failed");
                PlaybackReport::default()
            }
        }
    }
}

async fn run_playlist(
    ctx: Arc<PlaybackContext>,
    playlist: Playlist,
    cancel: CancellationToken,
    progress: watch::Sender<Progress>,
) -> PlaybackReport {
    let mut report = PlaybackReport::default();
    let total = playlist.len();

    for (i, clip) in playlist.iter().enumerate() {
        if cancel.is_cancelled() {
            debug!(skipped = total - i, "cancelled, abandoning rest of playlist");
            break;
        }
        progress.send_modify(|p| p.remaining = total - i - 1);
        let outcome = play_entry(&ctx, clip, &cancel, &progress).await;
        report.entries.push(EntryReport {
            name: clip.name.clone(),
            outcome,
        });
    }

    progress.send_modify(|p| {
        p.state = PlaybackState::Terminated;
        p.deadline = Deadline::Pending;
        p.finished = true;
    });
    report
}

fn set_state(progress: &watch::Sender<Progress>, state: PlaybackState) {
    progress.send_modify(|p| p.state = state);
}

async fn play_entry(
    ctx: &PlaybackContext,
    clip: &ClipRecord,
    cancel: &CancellationToken,
    progress: &watch::Sender<Progress>,
) -> EntryOutcome {
    set_state(progress, PlaybackState::Resolving);
    let file_duration = match clip.file_duration {
        Some(secs) => secs,
        None => tokio::select! {
            secs = probe_duration(ctx, clip) => secs,
            _ = cancel.cancelled() => return cancelled_before_launch(clip, progress),
        },
    };
    let Some(entry) = resolve_entry(clip, file_duration) else {
        debug!(clip = %clip.name, "not played: disabled");
        set_state(progress, PlaybackState::Terminated);
        return EntryOutcome::Skipped;
    };
    debug!(
        clip = %clip.name,
        category = %entry.category,
        start = entry.start,
        end = entry.start + entry.length,
        length = entry.length,
        "resolved"
    );

    if cancel.is_cancelled() {
        return cancelled_before_launch(clip, progress);
    }
    set_state(progress, PlaybackState::Launching);
    let slot = ctx.allocator.acquire(entry.category);
    let (mut child, group) = match launch(ctx, clip, &entry, &slot) {
        Ok(launched) => launched,
        Err(e) => {
            warn!(clip = %clip.name, error = %e, "error starting player");
            set_state(progress, PlaybackState::Terminated);
            return EntryOutcome::LaunchFailed(e.to_string());
        }
    };
    ctx.registry.register(group);
    let stderr_task = child.stderr.take().map(|s| tokio::spawn(capture_stderr(s)));

    let launched_at = Instant::now();
    let deadline = entry
        .run_time(ctx.timing.overlap_secs)
        .and_then(|d| launched_at.checked_add(d));
    info!(
        clip = %clip.name,
        category = %entry.category,
        layer = slot.layer,
        instance = %slot.instance,
        pgid = %group,
        wait_secs = deadline.map(|d| d.duration_since(launched_at).as_secs_f64()),
        "playing"
    );
    progress.send_modify(|p| {
        p.state = PlaybackState::Running;
        p.deadline = deadline.map_or(Deadline::Unbounded, Deadline::At);
    });

    let (stop, exited) = wait_running(&mut child, deadline, cancel, ctx.poll_interval()).await;

    set_state(progress, PlaybackState::Stopping);
    let status = match exited {
        Some(status) => Some(status),
        None => stop_and_reap(&mut child, group, &clip.name, ctx.grace_period()).await,
    };
    ctx.registry.unregister(group);

    let stderr = match stderr_task {
        Some(task) => match timeout(ctx.grace_period(), task).await {
            Ok(Ok(text)) => text,
            _ => String::new(),
        },
        None => String::new(),
    };

    match status.and_then(|s| s.code()) {
        Some(0) | None => debug!(clip = %clip.name, ?stop, ?status, "player finished"),
        Some(code) => warn!(clip = %clip.name, code, stderr = %stderr, "player exited with error"),
    }

    progress.send_modify(|p| {
        p.state = PlaybackState::Terminated;
        p.deadline = Deadline::Pending;
    });
    EntryOutcome::Played {
        slot,
        stop,
        status,
        stderr,
    }
}

fn cancelled_before_launch(clip: &ClipRecord, progress: &watch::Sender<Progress>) -> EntryOutcome {
    debug!(clip = %clip.name, "cancelled before launch");
    set_state(progress, PlaybackState::Terminated);
    EntryOutcome::Cancelled
}

async fn probe_duration(ctx: &PlaybackContext, clip: &ClipRecord) -> f64 {
    let probe = Arc::clone(&ctx.probe);
    let path = clip.path.clone();
    tokio::task::spawn_blocking(move || probe.duration(&path))
        .await
        .ok()
        .flatten()
        .unwrap_or(0.0)
}

/// Launching phase: spawns the player as leader of a new process group.
fn launch(
    ctx: &PlaybackContext,
    clip: &ClipRecord,
    entry: &ResolvedEntry,
    slot: &LayerSlot,
) -> Result<(Child, ProcessGroup), LaunchError> {
    let invocation = PlayerInvocation {
        category: entry.category,
        slot: slot.clone(),
        start: entry.start,
        path: clip.path.clone(),
    };
    let std_cmd = build_player_command(&ctx.player, &invocation);
    debug!(cmd = ?std_cmd, "launching");

    let mut cmd = tokio::process::Command::from(std_cmd);
    cmd.process_group(0)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(false);

    let child = cmd.spawn().map_err(|source| LaunchError::Spawn {
        executable: ctx.player.executable.clone(),
        source,
    })?;
    let group = child
        .id()
        .and_then(ProcessGroup::from_leader_pid)
        .ok_or(LaunchError::NoPid)?;
    Ok((child, group))
}

/// Running phase: short bounded sleeps until end-time, cancellation or exit.
async fn wait_running(
    child: &mut Child,
    deadline: Option<Instant>,
    cancel: &CancellationToken,
    poll: Duration,
) -> (StopReason, Option<ExitStatus>) {
    loop {
        if cancel.is_cancelled() {
            return (StopReason::Cancelled, None);
        }
        let now = Instant::now();
        if deadline.is_some_and(|end| now >= end) {
            return (StopReason::EndTime, None);
        }
        match child.try_wait() {
            Ok(Some(status)) => return (StopReason::Exited, Some(status)),
            Ok(None) => {}
            Err(e) => debug!(error = %e, "could not poll player"),
        }
        let nap = deadline.map_or(poll, |end| poll.min(end - now));
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = sleep(nap) => {}
        }
    }
}

/// Stopping phase: SIGTERM the group, wait out the grace period, SIGKILL if
/// needed, then reap.
async fn stop_and_reap(
    child: &mut Child,
    group: ProcessGroup,
    name: &str,
    grace: Duration,
) -> Option<ExitStatus> {
    debug!(clip = %name, pgid = %group, "sending SIGTERM");
    match group.terminate() {
        Ok(()) => {}
        Err(e @ TerminationError::AlreadyExited(_)) => debug!(clip = %name, "{}", e),
        Err(e) => warn!(clip = %name, error = %e, "couldn't terminate player"),
    }

    match timeout(grace, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            warn!(clip = %name, error = %e, "failed to reap player");
            None
        }
        Err(_) => {
            warn!(clip = %name, pgid = %group, "player ignored SIGTERM, killing");
            if let Err(e) = group.kill() {
                debug!(clip = %name, error = %e, "kill after grace period");
            }
            child.wait().await.ok()
        }
    }
}

async fn capture_stderr(mut stderr: ChildStderr) -> String {
    let mut captured = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match stderr.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = STDERR_CAPTURE_LIMIT.saturating_sub(captured.len());
                captured.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }
    String::from_utf8_lossy(&captured).trim().to_string()
}
