//! Sweeper lifecycle: start, shutdown, and the periodic loops.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::TierError;

use super::{Shared, TierState, TokenTiers};

impl TokenTiers {
    /// Spawn the background sweepers on the current tokio runtime.
    ///
    /// The L1 sweeper always runs; the expiration sweeper only when
    /// `l3_horizon_secs > 0`. Calling this while already running is a
    /// no-op. A stopped coordinator cannot be restarted.
    #[tracing::instrument(skip(self))]
    pub fn start(&self) -> Result<(), TierError> {
        let mut sweepers = self.sweepers.lock();

        match self.state() {
            TierState::Created => {}
            TierState::Running => return Ok(()),
            state => {
                return Err(TierError::Config(format!("Cannot start in state {}", state)));
            }
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TierError::Config(format!("No tokio runtime: {}", e)))?;

        let config = &self.shared.config;
        sweepers.push(runtime.spawn(sweeper_loop(
            Sweeper::L1,
            config.l1_sweep_interval(),
            self.shared.clone(),
            self.shutdown_tx.subscribe(),
        )));

        if config.expires_l3() {
            sweepers.push(runtime.spawn(sweeper_loop(
                Sweeper::Expiration,
                config.l3_sweep_interval(),
                self.shared.clone(),
                self.shutdown_tx.subscribe(),
            )));
        }

        let _ = self.state.send(TierState::Running);
        info!(
            sweepers = sweepers.len(),
            l1_sweep_secs = config.l1_sweep_secs,
            l3_horizon_secs = config.l3_horizon_secs,
            "Token tiers started"
        );
        Ok(())
    }

    /// Stop the sweepers and wait for them to exit.
    ///
    /// A tick already in progress finishes first. Safe to call more than
    /// once, and before `start`.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        let handles = {
            let mut sweepers = self.sweepers.lock();
            if self.state() == TierState::Stopped {
                return;
            }
            let _ = self.state.send(TierState::ShuttingDown);
            let _ = self.shutdown_tx.send(true);
            std::mem::take(&mut *sweepers)
        };

        info!(sweepers = handles.len(), "Shutting down token tiers");
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Sweeper task ended abnormally");
            }
        }

        let _ = self.state.send(TierState::Stopped);
        info!("Token tiers stopped");
    }
}

impl Drop for TokenTiers {
    fn drop(&mut self) {
        // Stops detached sweepers if shutdown() was never awaited
        let _ = self.shutdown_tx.send(true);
    }
}

#[derive(Debug, Clone, Copy)]
enum Sweeper {
    L1,
    Expiration,
}

async fn sweeper_loop(
    sweeper: Sweeper,
    period: Duration,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; sweeps start one period in
    ticker.tick().await;

    debug!(?sweeper, period_secs = period.as_secs(), "Sweeper started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match sweeper {
                    Sweeper::L1 => {
                        shared.sweep_l1().await;
                    }
                    Sweeper::Expiration => {
                        shared.sweep_expired().await;
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!(?sweeper, "Sweeper stopped");
}
