//! External recording processes.
//!
//! Recording is a stream copy performed by a child process (`ffmpeg -c copy`). The
//! controller only needs spawn / terminate / wait, so tests substitute a fake
//! spawner. `ProcessLedger` tracks live pids per site so a supervisor that fails to
//! drain can have its recordings killed from outside its thread.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

const WAIT_POLL: Duration = Duration::from_millis(50);

/// What to record and where.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordCommand {
    pub source: String,
    pub destination: PathBuf,
}

/// How a recording process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitKind {
    /// Exited on its own within the grace period after `terminate`.
    Clean,
    /// Killed after the grace period ran out.
    Forced,
}

pub trait RecordingProcess: Send {
    fn id(&self) -> u32;

    /// Asks the process to finish writing and exit.
    fn terminate(&mut self) -> Result<()>;

    /// Waits up to `grace` for exit, then kills.
    fn wait(&mut self, grace: Duration) -> Result<ExitKind>;
}

pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, command: &RecordCommand) -> Result<Box<dyn RecordingProcess>>;

    /// Kills a process by id without its handle.
    fn force_kill(&self, pid: u32);
}

// ----------------------------------------------------------------------------
// ffmpeg stream-copy recorder
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct FfmpegSpawner {
    ffmpeg_path: PathBuf,
}

impl FfmpegSpawner {
    pub fn new(ffmpeg_path: impl AsRef<Path>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.as_ref().to_path_buf(),
        }
    }

    pub fn record_args(command: &RecordCommand) -> Vec<String> {
        let mut args: Vec<String> = ["-nostdin", "-hide_banner", "-loglevel", "error"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        if command.source.starts_with("rtsp://") || command.source.starts_with("rtsps://") {
            args.extend(["-rtsp_transport".to_string(), "tcp".to_string()]);
        }
        args.extend([
            "-i".to_string(),
            command.source.clone(),
            "-c".to_string(),
            "copy".to_string(),
            "-n".to_string(),
            command.destination.to_string_lossy().to_string(),
        ]);
        args
    }
}

impl Default for FfmpegSpawner {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl ProcessSpawner for FfmpegSpawner {
    fn spawn(&self, command: &RecordCommand) -> Result<Box<dyn RecordingProcess>> {
        let child = Command::new(&self.ffmpeg_path)
            .args(Self::record_args(command))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("spawn {}", self.ffmpeg_path.display()))?;
        Ok(Box::new(ChildRecording {
            child,
            reaped: false,
        }))
    }

    fn force_kill(&self, pid: u32) {
        #[cfg(unix)]
        {
            // SAFETY: kill(2) has no memory-safety preconditions.
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };
            if rc != 0 {
                log::warn!(
                    "force kill of recording pid {} failed: {}",
                    pid,
                    std::io::Error::last_os_error()
                );
            }
        }
        #[cfg(not(unix))]
        {
            log::warn!("force kill of recording pid {} is not supported here", pid);
        }
    }
}

struct ChildRecording {
    child: Child,
    reaped: bool,
}

impl RecordingProcess for ChildRecording {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn terminate(&mut self) -> Result<()> {
        if self.reaped || self.child.try_wait()?.is_some() {
            return Ok(());
        }
        // ffmpeg finalizes the container (moov atom) on SIGINT.
        #[cfg(unix)]
        {
            // SAFETY: kill(2) has no memory-safety preconditions.
            let rc = unsafe { libc::kill(self.child.id() as libc::pid_t, libc::SIGINT) };
            if rc != 0 {
                return Err(std::io::Error::last_os_error()).context("signal recording process");
            }
        }
        #[cfg(not(unix))]
        {
            self.child.kill().context("kill recording process")?;
        }
        Ok(())
    }

    fn wait(&mut self, grace: Duration) -> Result<ExitKind> {
        let deadline = Instant::now() + grace;
        loop {
            if self.child.try_wait()?.is_some() {
                self.reaped = true;
                return Ok(ExitKind::Clean);
            }
            if Instant::now() >= deadline {
                let _ = self.child.kill();
                self.child.wait().context("reap killed recording process")?;
                self.reaped = true;
                return Ok(ExitKind::Forced);
            }
            std::thread::sleep(WAIT_POLL);
        }
    }
}

impl Drop for ChildRecording {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

// ----------------------------------------------------------------------------
// ProcessLedger: live recording pids for one site
// ----------------------------------------------------------------------------

#[derive(Default)]
struct LedgerState {
    active: HashSet<u32>,
    revoked: bool,
}

#[derive(Clone)]
pub struct ProcessLedger {
    state: Arc<Mutex<LedgerState>>,
    spawner: Arc<dyn ProcessSpawner>,
}

impl ProcessLedger {
    pub fn new(spawner: Arc<dyn ProcessSpawner>) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState::default())),
            spawner,
        }
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records a live pid. Returns false once the ledger has been revoked; the
    /// caller must then stop the process itself.
    pub fn track(&self, pid: u32) -> bool {
        let mut state = self.state();
        if state.revoked {
            return false;
        }
        state.active.insert(pid);
        true
    }

    pub fn release(&self, pid: u32) {
        self.state().active.remove(&pid);
    }

    pub fn active(&self) -> usize {
        self.state().active.len()
    }

    pub fn is_revoked(&self) -> bool {
        self.state().revoked
    }

    /// Refuses further tracking and kills every tracked pid. Returns how many.
    pub fn revoke(&self) -> usize {
        let pids: Vec<u32> = {
            let mut state = self.state();
            state.revoked = true;
            state.active.drain().collect()
        };
        for pid in &pids {
            self.spawner.force_kill(*pid);
        }
        pids.len()
    }
}
