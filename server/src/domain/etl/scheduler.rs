//! Periodic ETL driver

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::rotation::{EtlError, RotationManager};

impl RotationManager {
    /// Run the ETL every `period` until shutdown is signalled
    ///
    /// The first run happens immediately when `run_on_start` is set, otherwise
    /// after one full period. A tick that lands while a run is still going is
    /// delayed rather than stacked.
    pub fn start_etl_task(
        self: &Arc<Self>,
        period: Duration,
        run_on_start: bool,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            if !run_on_start {
                interval.tick().await;
            }

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("ETL scheduler shutting down");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        match manager.run_job().await {
                            Ok(_) | Err(EtlError::AlreadyRunning) => {}
                            Err(e) => tracing::warn!(error = %e, "Scheduled ETL run failed"),
                        }
                    }
                }
            }
        })
    }
}
