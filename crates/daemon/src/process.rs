//! Process-group handles and the registry of live player groups.
//!
//! Players are spawned as leaders of their own process group so the whole
//! subtree (wrapper script plus the real player binary) can be signalled as a
//! unit. The registry exists for the abort path: the dispatcher never joins
//! its supervisors, so on operator interrupt the registry is the only place
//! that knows which groups are still alive.

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::fmt;
use std::process::{Command, Stdio};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Error type for signal delivery
#[derive(Debug, Error)]
pub enum TerminationError {
    /// The group has no members left; harmless
    #[error("process group {0} already exited")]
    AlreadyExited(ProcessGroup),

    #[error("failed to signal process group {group}: {source}")]
    Signal { group: ProcessGroup, source: Errno },
}

/// A process-group id of a spawned player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessGroup(i32);

impl ProcessGroup {
    pub fn from_raw(pgid: i32) -> Self {
        Self(pgid)
    }

    /// Group led by a child spawned with `process_group(0)`.
    pub fn from_leader_pid(pid: u32) -> Option<Self> {
        i32::try_from(pid).ok().filter(|p| *p > 0).map(Self)
    }

    pub fn as_raw(&self) -> i32 {
        self.0
    }

    fn signal(&self, signal: Option<Signal>) -> Result<(), TerminationError> {
        match killpg(Pid::from_raw(self.0), signal) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(TerminationError::AlreadyExited(*self)),
            Err(source) => Err(TerminationError::Signal {
                group: *self,
                source,
            }),
        }
    }

    /// SIGTERM to every member of the group.
    pub fn terminate(&self) -> Result<(), TerminationError> {
        self.signal(Some(Signal::SIGTERM))
    }

    /// SIGKILL to every member of the group.
    pub fn kill(&self) -> Result<(), TerminationError> {
        self.signal(Some(Signal::SIGKILL))
    }

    /// Whether any member (including unreaped zombies) remains.
    pub fn is_alive(&self) -> bool {
        self.signal(None).is_ok()
    }
}

impl fmt::Display for ProcessGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Force-kills every process with one of `names`, system-wide.
///
/// Runs `killall -9 <names>` with output discarded. Having nothing to kill is
/// not an error.
pub fn sweep_by_name(names: &[String]) {
    if names.is_empty() {
        return;
    }
    let status = Command::new("killall")
        .arg("-9")
        .args(names)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) => debug!(?names, %status, "process sweep finished"),
        Err(e) => warn!(?names, error = %e, "could not run killall"),
    }
}

/// Live player groups plus the root cancellation token of all supervisors
#[derive(Debug)]
pub struct ProcessRegistry {
    groups: Mutex<HashSet<ProcessGroup>>,
    root: CancellationToken,
    process_names: Vec<String>,
}

impl ProcessRegistry {
    /// `process_names` are swept by name after the tracked groups are killed.
    pub fn new(process_names: Vec<String>) -> Self {
        Self {
            groups: Mutex::new(HashSet::new()),
            root: CancellationToken::new(),
            process_names,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<ProcessGroup>> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Token for one supervisor; cancelled by `abort_all`.
    pub fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    pub fn is_aborted(&self) -> bool {
        self.root.is_cancelled()
    }

    pub fn register(&self, group: ProcessGroup) {
        self.lock().insert(group);
    }

    pub fn unregister(&self, group: ProcessGroup) {
        self.lock().remove(&group);
    }

    pub fn live_groups(&self) -> Vec<ProcessGroup> {
        self.lock().iter().copied().collect()
    }

    /// Process-wide abort.
    ///
    /// Cancels every supervisor, SIGKILLs every tracked group, then sweeps
    /// by process name to catch players no supervisor tracks any more.
    /// Returns the number of tracked groups that were signalled.
    pub fn abort_all(&self) -> usize {
        self.root.cancel();

        let groups: Vec<ProcessGroup> = self.lock().drain().collect();
        let mut killed = 0;
        for group in groups {
            match group.kill() {
                Ok(()) => killed += 1,
                Err(TerminationError::AlreadyExited(_)) => {
                    debug!(pgid = %group, "group already gone at abort")
                }
                Err(e) => warn!(error = %e, "abort could not kill group"),
            }
        }

        sweep_by_name(&self.process_names);
        info!(killed, "aborted all playback");
        killed
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
