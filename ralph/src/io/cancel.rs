//! Cooperative cancellation for the loop and its agent subprocess.
//!
//! SIGINT/SIGTERM are watched on a dedicated thread that drives a small
//! current-thread tokio runtime. The first signal flips the shared
//! [`CancelToken`]; the executor notices it while waiting and kills the agent.
//! A second signal exits immediately.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::exit_codes;

/// Shared cancellation flag with a blocking, interruptible wait.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        let mut cancelled = flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *cancelled = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sleep for `duration` unless cancelled first. Returns true if cancelled.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let (cancelled, _) = cvar
            .wait_timeout_while(guard, duration, |cancelled| !*cancelled)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *cancelled
    }
}

/// Cancel `token` when the process receives SIGINT or SIGTERM.
///
/// Handlers are registered before this returns, so no signal can slip past
/// between registration and the watcher thread starting.
#[cfg(unix)]
pub fn watch_signals(token: CancelToken) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build signal runtime")?;
    let (mut sigint, mut sigterm) = runtime
        .block_on(async {
            Ok::<_, std::io::Error>((
                signal(SignalKind::interrupt())?,
                signal(SignalKind::terminate())?,
            ))
        })
        .context("register signal handlers")?;

    thread::Builder::new()
        .name("ralph-signals".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                let name = tokio::select! {
                    _ = sigint.recv() => "SIGINT",
                    _ = sigterm.recv() => "SIGTERM",
                };
                warn!(signal = name, "cancellation requested, stopping agent");
                token.cancel();

                tokio::select! {
                    _ = sigint.recv() => {}
                    _ = sigterm.recv() => {}
                }
                warn!("second signal received, exiting immediately");
                std::process::exit(exit_codes::INTERRUPTED);
            });
        })
        .context("spawn signal watcher")?;
    debug!("signal watcher installed");
    Ok(())
}

#[cfg(not(unix))]
pub fn watch_signals(token: CancelToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build signal runtime")?;
    thread::Builder::new()
        .name("ralph-signals".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("cancellation requested, stopping agent");
                    token.cancel();
                }
            });
        })
        .context("spawn signal watcher")?;
    Ok(())
}
