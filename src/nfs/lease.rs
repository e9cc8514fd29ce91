//! Lease renewal.
//!
//! A session's lease lapses unless the server sees a compound at least
//! once per lease period. Ordinary traffic renews it; when the client is
//! idle the renewer sends a SEQUENCE-only compound.

use crate::error::Result;
use crate::observability;
use async_trait::async_trait;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Something whose lease can be renewed.
#[async_trait]
pub trait Renewable: Send + Sync + 'static {
    /// Time since the last compound was answered.
    fn idle_for(&self) -> Duration;

    /// Send a compound that carries nothing but SEQUENCE.
    async fn renew(&self) -> Result<()>;
}

/// Background task that keeps one lease alive.
///
/// The task wakes three times per lease period and renews once the lease
/// is half spent, so activity at any point still leaves a full check
/// before expiry.
///
/// The task holds only a weak reference, so it never keeps its owner
/// alive; dropping the renewer also ends the task.
#[derive(Debug)]
pub struct LeaseRenewer {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    interval: Duration,
}

impl LeaseRenewer {
    /// Start keeping `target`'s lease of `interval` alive.
    pub fn spawn<R: Renewable>(target: Weak<R>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let tick = (interval / 3).max(Duration::from_secs(1));
        let threshold = interval / 2;

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + tick, tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {}
                }

                let Some(target) = target.upgrade() else {
                    break;
                };

                let idle = target.idle_for();
                if idle < threshold {
                    continue;
                }

                debug!(idle_secs = idle.as_secs(), "Renewing lease");
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    result = target.renew() => {
                        observability::record_lease_renewal(result.is_ok());
                        if let Err(e) = result {
                            warn!(error = %e, "Lease renewal failed");
                        }
                    }
                }
            }

            debug!("Lease renewer stopped");
        });

        Self {
            shutdown_tx,
            handle,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stop the task and wait until it has exited.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Lease renewer task failed");
        }
    }
}
