//! Background task recording where workloads landed.
//!
//! The orchestrator pushes `(workload, node)` events at its own pace. The
//! observer appends each one to the decision log; correlation with the
//! submission record happens later, by workload name.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use carbon_core::PlacementEvent;

use crate::decision_log::DecisionLogger;

pub struct PlacementObserver {
    logger: Arc<DecisionLogger>,
}

impl PlacementObserver {
    pub fn new(logger: Arc<DecisionLogger>) -> Self {
        Self { logger }
    }

    /// Log events until the channel closes or shutdown fires.
    ///
    /// On shutdown the channel is closed to new events and whatever is
    /// already queued is still recorded. Returns the number of events
    /// recorded. Duplicate deliveries are recorded again.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<PlacementEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> u64 {
        info!("placement observer started");
        let mut observed = 0u64;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("placement event stream closed");
                        break;
                    };
                    self.logger.log_placement(&event);
                    observed += 1;
                }
                _ = shutdown.changed() => {
                    events.close();
                    while let Some(event) = events.recv().await {
                        self.logger.log_placement(&event);
                        observed += 1;
                    }
                    info!(observed, "placement observer shutting down");
                    break;
                }
            }
        }

        observed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carbon_core::ExperimentPhase;

    use crate::decision_log::{DecisionRecord, MemorySink};

    fn event(workload: &str, node: &str) -> PlacementEvent {
        PlacementEvent {
            workload: workload.to_string(),
            node: node.to_string(),
        }
    }

    #[tokio::test]
    async fn records_events_until_channel_closes() {
        let aware = Arc::new(MemorySink::new());
        let base = Arc::new(MemorySink::new());
        let logger = Arc::new(DecisionLogger::new(aware.clone(), base.clone()));
        let observer = PlacementObserver::new(logger.clone());

        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        tx.send(event("w-1", "vm1")).await.unwrap();
        tx.send(event("w-1", "vm1")).await.unwrap();
        tx.send(event("w-2", "vm3")).await.unwrap();
        drop(tx);

        let observed = observer.run(rx, shutdown_rx).await;
        assert_eq!(observed, 3);

        let records = aware.records();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| matches!(r, DecisionRecord::Placement(_))));
        assert!(base.records().is_empty());
    }

    #[tokio::test]
    async fn follows_active_sink() {
        let aware = Arc::new(MemorySink::new());
        let base = Arc::new(MemorySink::new());
        let logger = Arc::new(DecisionLogger::new(aware.clone(), base.clone()));
        logger.activate(ExperimentPhase::Baseline);

        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tx.send(event("w-9", "vm2")).await.unwrap();
        drop(tx);

        PlacementObserver::new(logger).run(rx, shutdown_rx).await;
        assert!(aware.records().is_empty());
        assert_eq!(base.records().len(), 1);
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let logger = Arc::new(DecisionLogger::new(
            Arc::new(MemorySink::new()),
            Arc::new(MemorySink::new()),
        ));
        let observer = PlacementObserver::new(logger);

        let (_tx, rx) = mpsc::channel::<PlacementEvent>(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { observer.run(rx, shutdown_rx).await });
        shutdown_tx.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn shutdown_records_queued_events() {
        let aware = Arc::new(MemorySink::new());
        let logger = Arc::new(DecisionLogger::new(aware.clone(), Arc::new(MemorySink::new())));
        let observer = PlacementObserver::new(logger);

        let (tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tx.send(event("w-1", "vm1")).await.unwrap();
        tx.send(event("w-2", "vm2")).await.unwrap();
        shutdown_tx.send(true).unwrap();

        // The sender is still alive, so only shutdown can end the run.
        assert_eq!(observer.run(rx, shutdown_rx).await, 2);
        assert_eq!(aware.records().len(), 2);
        assert!(tx.send(event("w-3", "vm3")).await.is_err());
    }
}
