//! Application lifecycle state.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use tokio::sync::broadcast;

use crate::error::KernelError;

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;

/// Application state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ApplicationState {
    /// Initial state, not started.
    Created = 0,
    /// Running the startup sequence.
    Starting = 1,
    /// Startup completed.
    Running = 2,
    /// Running the shutdown sequence.
    ShuttingDown = 3,
    /// Stopped; may be started again.
    Stopped = 4,
}

impl From<u8> for ApplicationState {
    fn from(v: u8) -> Self {
        match v {
            0 => ApplicationState::Created,
            1 => ApplicationState::Starting,
            2 => ApplicationState::Running,
            3 => ApplicationState::ShuttingDown,
            4 => ApplicationState::Stopped,
            _ => ApplicationState::Created,
        }
    }
}

impl fmt::Display for ApplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ApplicationState::Created => "created",
            ApplicationState::Starting => "starting",
            ApplicationState::Running => "running",
            ApplicationState::ShuttingDown => "shutting down",
            ApplicationState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Shutdown signal for graceful shutdown.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    /// Create a new shutdown signal.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self { sender }
    }

    /// Trigger shutdown.
    pub fn trigger(&self) {
        let _ = self.sender.send(());
    }

    /// Subscribe to shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// State and completion flags of one application instance.
pub struct Lifecycle {
    state: AtomicU8,
    startup_complete: AtomicBool,
    shutdown_complete: AtomicBool,
    shutdown_signal: ShutdownSignal,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ApplicationState::Created as u8),
            startup_complete: AtomicBool::new(false),
            shutdown_complete: AtomicBool::new(false),
            shutdown_signal: ShutdownSignal::new(),
        }
    }

    pub fn state(&self) -> ApplicationState {
        ApplicationState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state() == ApplicationState::Running
    }

    pub fn startup_complete(&self) -> bool {
        self.startup_complete.load(Ordering::SeqCst)
    }

    pub fn shutdown_complete(&self) -> bool {
        self.shutdown_complete.load(Ordering::SeqCst)
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown_signal
    }

    /// Enter `Starting` from `Created` or `Stopped`.
    pub fn begin_start(&self) -> Result<(), KernelError> {
        let current = self.state();
        let allowed = matches!(current, ApplicationState::Created | ApplicationState::Stopped);
        if !allowed
            || self
                .state
                .compare_exchange(
                    current as u8,
                    ApplicationState::Starting as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_err()
        {
            return Err(KernelError::InvalidState {
                action: "start",
                state: self.state(),
            });
        }
        self.startup_complete.store(false, Ordering::SeqCst);
        self.shutdown_complete.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn mark_running(&self) {
        self.state
            .store(ApplicationState::Running as u8, Ordering::SeqCst);
        self.startup_complete.store(true, Ordering::SeqCst);
    }

    /// Enter `ShuttingDown` from `Starting` or `Running`. Returns false when
    /// there is nothing to shut down.
    pub fn begin_stop(&self) -> bool {
        for from in [ApplicationState::Running, ApplicationState::Starting] {
            if self
                .state
                .compare_exchange(
                    from as u8,
                    ApplicationState::ShuttingDown as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                self.shutdown_signal.trigger();
                return true;
            }
        }
        false
    }

    pub fn mark_stopped(&self) {
        self.state
            .store(ApplicationState::Stopped as u8, Ordering::SeqCst);
        self.shutdown_complete.store(true, Ordering::SeqCst);
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
