use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::RemoteClient;
use crate::probe::WriteReadSeriesProbe;

/// Drives the prober: recovers state once, then runs a test iteration
/// on every tick until cancelled.
pub struct Runner<C> {
    probe: WriteReadSeriesProbe<C>,
    run_interval: Duration,
    smoke_test: bool,
    cancel: CancellationToken,
}

impl<C: RemoteClient> Runner<C> {
    pub fn new(probe: WriteReadSeriesProbe<C>, run_interval: Duration, smoke_test: bool) -> Self {
        Self {
            probe,
            run_interval,
            smoke_test,
            cancel: CancellationToken::new(),
        }
    }

    /// Token cancelling the run loop, for signal handlers.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled. In smoke-test mode a single iteration runs
    /// and its result is returned directly.
    pub async fn run(mut self) -> Result<()> {
        self.probe
            .init(SystemTime::now())
            .await
            .context("recovering prober state")?;

        if self.smoke_test {
            info!("running a single smoke-test iteration");
            return self
                .probe
                .run(SystemTime::now())
                .await
                .context("smoke-test iteration failed");
        }

        let mut ticker = tokio::time::interval(self.run_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("runner stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    // Iteration failures are the signal this tool exists
                    // to produce; they never stop the loop.
                    if let Err(err) = self.probe.run(SystemTime::now()).await {
                        warn!(error = format!("{err:#}"), "test iteration failed");
                    }
                }
            }
        }
    }
}
