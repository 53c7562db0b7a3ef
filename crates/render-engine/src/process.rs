//! Registry of spawned transcoder processes.
//!
//! Every child is registered by pid for as long as it runs. Teardown is
//! deterministic: termination signal, bounded wait, forced kill.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::process::Child;
use tracing::{debug, info, warn};

/// A registered child process.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: u32,
    pub label: String,
    pub started: Instant,
}

/// Pid-keyed set of live transcoder processes.
#[derive(Debug)]
pub struct ProcessRegistry {
    processes: Mutex<HashMap<u32, ProcessInfo>>,
    grace: Duration,
}

impl ProcessRegistry {
    /// A registry that waits `grace` between the termination signal and a
    /// forced kill.
    pub fn new(grace: Duration) -> Arc<Self> {
        Arc::new(Self {
            processes: Mutex::new(HashMap::new()),
            grace,
        })
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Track `pid` until the returned guard is dropped.
    pub fn register(self: &Arc<Self>, pid: u32, label: impl Into<String>) -> ProcessGuard {
        let label = label.into();
        debug!(pid, label = %label, "Registered transcoder process");
        self.lock().insert(
            pid,
            ProcessInfo {
                pid,
                label,
                started: Instant::now(),
            },
        );
        ProcessGuard {
            registry: Arc::clone(self),
            pid,
        }
    }

    /// Live processes, oldest first.
    pub fn list(&self) -> Vec<ProcessInfo> {
        let mut list: Vec<ProcessInfo> = self.lock().values().cloned().collect();
        list.sort_by_key(|p| p.started);
        list
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.lock().contains_key(&pid)
    }

    /// Stop a child owned by the caller: signal, wait up to the grace
    /// period, then kill.
    pub async fn terminate(&self, child: &mut Child) {
        let Some(pid) = child.id() else {
            return;
        };
        signal_terminate(pid, child);
        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(Ok(status)) => debug!(pid, %status, "Transcoder exited after termination signal"),
            Ok(Err(e)) => warn!(pid, error = %e, "Failed waiting for terminated transcoder"),
            Err(_) => {
                warn!(
                    pid,
                    grace_ms = self.grace.as_millis() as u64,
                    "Transcoder ignored termination; killing"
                );
                if let Err(e) = child.kill().await {
                    warn!(pid, error = %e, "Failed to kill transcoder");
                }
            }
        }
    }

    /// Host shutdown: signal every registered process, wait the grace
    /// period, then force-kill whatever is still registered.
    pub async fn terminate_all(&self) {
        let pids: Vec<u32> = self.lock().keys().copied().collect();
        if pids.is_empty() {
            return;
        }
        info!(count = pids.len(), "Terminating transcoder processes");
        for &pid in &pids {
            send_signal(pid, Signal::Terminate);
        }

        let deadline = Instant::now() + self.grace;
        while Instant::now() < deadline && !self.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        for pid in self.lock().keys().copied().collect::<Vec<_>>() {
            warn!(pid, "Transcoder still running after grace period; killing");
            send_signal(pid, Signal::Kill);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, ProcessInfo>> {
        self.processes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Deregisters its pid when dropped.
#[derive(Debug)]
pub struct ProcessGuard {
    registry: Arc<ProcessRegistry>,
    pid: u32,
}

impl ProcessGuard {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.pid);
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) {
    let sig = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid as libc::pid_t, sig) };
    if rc != 0 {
        debug!(pid, ?signal, "Signal delivery failed; process likely gone");
    }
}

#[cfg(not(unix))]
fn send_signal(pid: u32, signal: Signal) {
    debug!(pid, ?signal, "Process signals unsupported on this platform");
}

#[cfg(unix)]
fn signal_terminate(pid: u32, _child: &mut Child) {
    send_signal(pid, Signal::Terminate);
}

#[cfg(not(unix))]
fn signal_terminate(pid: u32, child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(pid, error = %e, "Failed to stop transcoder");
    }
}
