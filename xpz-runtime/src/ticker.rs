//! Periodic voice sweep task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::XpEngine;

/// Handle to a running voice sweep loop.
#[derive(Debug)]
pub struct VoiceTicker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<u64>,
}

impl VoiceTicker {
    /// Start sweeping every `period`. The first sweep runs immediately.
    ///
    /// Sweeps that fall behind are skipped, not bunched up.
    #[must_use]
    pub fn spawn(engine: Arc<XpEngine>, period: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut sweeps = 0u64;
            info!(period_ms = period.as_millis(), "Voice ticker started");
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match engine.voice_tick().await {
                            Ok(report) => debug!(?report, "Voice tick"),
                            Err(err) => warn!(error = %err, "Voice tick failed"),
                        }
                        sweeps += 1;
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            info!(sweeps, "Voice ticker stopped");
            sweeps
        });
        Self { shutdown, handle }
    }

    /// Start with the period from the engine's configuration.
    #[must_use]
    pub fn spawn_configured(engine: Arc<XpEngine>) -> Self {
        let period = Duration::from_secs(engine.config().voice.tick_interval_seconds);
        Self::spawn(engine, period)
    }

    /// Stop the loop and wait for it. Returns how many sweeps ran.
    ///
    /// An in-flight sweep finishes first.
    pub async fn shutdown(self) -> u64 {
        // Ignore the error: the task may already have exited.
        let _ = self.shutdown.send(true);
        self.handle.await.unwrap_or(0)
    }
}
