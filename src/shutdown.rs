// Graceful shutdown handling for signal trapping

use anyhow::Result;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Shutdown flags shared between signal threads and the supervisor
#[derive(Clone)]
pub struct ShutdownState {
    shutdown_requested: Arc<AtomicBool>,
    /// Set once running workers have been torn down
    cleanup_complete: Arc<AtomicBool>,
    requested: Arc<Notify>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self {
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            cleanup_complete: Arc::new(AtomicBool::new(false)),
            requested: Arc::new(Notify::new()),
        }
    }

    /// Safe to call from a signal thread
    pub fn request_shutdown(&self) {
        if !self.shutdown_requested.swap(true, Ordering::SeqCst) {
            log::info!("Shutdown requested");
        }
        self.requested.notify_waiters();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn mark_cleanup_complete(&self) {
        self.cleanup_complete.store(true, Ordering::SeqCst);
        log::info!("Cleanup complete");
    }

    pub fn is_cleanup_complete(&self) -> bool {
        self.cleanup_complete.load(Ordering::SeqCst)
    }

    /// Resolve once a shutdown has been requested
    pub async fn wait_for_shutdown(&self) {
        loop {
            // Registered before the flag check so a concurrent request is not missed
            let notified = self.requested.notified();
            if self.is_shutdown_requested() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of graceful shutdown cleanup
#[derive(Debug, Clone, Default)]
pub struct ShutdownResult {
    /// Workers that exited after the cooperative cancel
    pub agents_stopped: usize,
    /// Workers that had to be killed after the grace period
    pub agents_killed: usize,
    pub errors: Vec<String>,
}

impl ShutdownResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if shutdown was clean (no errors)
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Graceful shutdown handler
pub struct ShutdownHandler {
    state: ShutdownState,
}

impl ShutdownHandler {
    pub fn with_state(state: ShutdownState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &ShutdownState {
        &self.state
    }

    /// Run the cleanup and log its outcome
    pub async fn handle_shutdown<F, Fut>(&self, cleanup: F) -> ShutdownResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ShutdownResult>,
    {
        self.state.request_shutdown();
        log::info!("Starting graceful shutdown...");

        let result = cleanup().await;

        log::info!(
            "Shutdown complete: {} workers stopped, {} killed",
            result.agents_stopped,
            result.agents_killed
        );
        for error in &result.errors {
            log::warn!("Cleanup error: {}", error);
        }

        self.state.mark_cleanup_complete();
        result
    }
}

/// Register signal handlers for graceful shutdown
/// This sets up handlers for SIGINT (Ctrl+C), SIGTERM, and SIGHUP
#[cfg(unix)]
pub fn register_signal_handlers(state: ShutdownState) -> Result<()> {
    use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::thread;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])
        .map_err(|e| anyhow::anyhow!("Failed to register signal handlers: {}", e))?;

    thread::spawn(move || {
        for signal in signals.forever() {
            match signal {
                SIGINT => log::info!("Received SIGINT (Ctrl+C)"),
                SIGTERM => log::info!("Received SIGTERM"),
                SIGHUP => log::info!("Received SIGHUP"),
                _ => continue,
            }
            state.request_shutdown();
        }
    });

    log::info!("Signal handlers registered (SIGINT, SIGTERM, SIGHUP)");
    Ok(())
}

/// Register signal handlers for Windows
#[cfg(windows)]
pub fn register_signal_handlers(state: ShutdownState) -> Result<()> {
    ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C");
        state.request_shutdown();
    })
    .map_err(|e| anyhow::anyhow!("Failed to register Ctrl+C handler: {}", e))?;

    log::info!("Signal handler registered (Ctrl+C)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_shutdown_state_clone() {
        let state1 = ShutdownState::new();
        let state2 = state1.clone();

        state1.request_shutdown();
        // Both should reflect the change since they share Arc
        assert!(state2.is_shutdown_requested());
    }

    #[test]
    fn test_shutdown_result_is_clean() {
        let mut result = ShutdownResult::new();
        assert!(result.is_clean());

        result.errors.push("Agent a-1 did not exit after kill".to_string());
        assert!(!result.is_clean());
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_after_request() {
        let state = ShutdownState::new();
        state.request_shutdown();
        state.request_shutdown();
        state.wait_for_shutdown().await;
        assert!(!state.is_cleanup_complete());
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_resolves() {
        let state = ShutdownState::new();
        let trigger = state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.request_shutdown();
        });

        tokio::time::timeout(Duration::from_secs(2), state.wait_for_shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_handle_shutdown_marks_complete() {
        let handler = ShutdownHandler::with_state(ShutdownState::new());

        let result = handler
            .handle_shutdown(|| async {
                ShutdownResult {
                    agents_stopped: 2,
                    agents_killed: 1,
                    errors: vec![],
                }
            })
            .await;

        assert_eq!(result.agents_stopped, 2);
        assert_eq!(result.agents_killed, 1);
        assert!(handler.state().is_shutdown_requested());
        assert!(handler.state().is_cleanup_complete());
    }
}
