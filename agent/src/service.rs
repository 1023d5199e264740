//! Agent service wiring
//!
//! `AgentService` owns the background tasks: a sampling loop that feeds
//! the monitoring service, a dispatcher task consuming anomalies from a
//! bounded channel, and a periodic persistence flush. Shutdown is
//! cooperative via a cancellation token; stopping drains the anomaly
//! channel and performs one final baseline save.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::baseline::BaselineStore;
use crate::config::AgentConfig;
use crate::dispatch::{
    AlertSink, DispatchRecord, FirewallController, ResponseDispatcher, ShutdownController,
};
use crate::error::{ActionResult, Result};
use crate::monitor::{HealthFlags, MonitoringService, MonitoringSnapshot, SnapshotHandle};
use crate::persist::PersistenceGateway;
use crate::sampler::Sampler;

/// Bounded anomaly queue between the sampling loop and the dispatcher
const ANOMALY_CHANNEL_CAPACITY: usize = 64;

/// Running agent: background tasks plus handles for readers
pub struct AgentService {
    snapshot: SnapshotHandle,
    dispatcher: Arc<ResponseDispatcher>,
    gateway: Arc<PersistenceGateway>,
    health: Arc<HealthFlags>,
    cancel: CancellationToken,
    sampling_task: JoinHandle<()>,
    dispatch_task: JoinHandle<()>,
    flush_task: JoinHandle<()>,
}

impl AgentService {
    /// Validate the configuration, load persisted baselines, and spawn
    /// the background tasks. The caller supplies the cancellation token
    /// so external triggers (signals, the shutdown controller) can stop
    /// the service.
    pub async fn start(
        config: AgentConfig,
        mut sampler: Box<dyn Sampler>,
        firewall: Arc<dyn FirewallController>,
        alerts: Arc<dyn AlertSink>,
        shutdowns: Arc<dyn ShutdownController>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;

        let health = Arc::new(HealthFlags::new());
        let gateway = Arc::new(PersistenceGateway::new(
            &config.persistence.baseline_path,
            config.monitoring.min_samples,
        ));

        let loaded = gateway.load().await;
        let mut monitor = MonitoringService::new(
            config.monitoring.clone(),
            config.response.block_tier,
            loaded,
            health.clone(),
        );
        let snapshot = monitor.snapshot_handle();

        let dispatcher = Arc::new(ResponseDispatcher::new(
            config.response.clone(),
            firewall,
            alerts,
            shutdowns,
            health.clone(),
        ));

        let (anomaly_tx, anomaly_rx) = mpsc::channel(ANOMALY_CHANNEL_CAPACITY);
        let dispatch_task = tokio::spawn(dispatcher.clone().run(anomaly_rx));

        let sample_interval = config.monitoring.sample_interval_duration();
        let sampling_cancel = cancel.clone();
        let loop_snapshot = snapshot.clone();
        let sampling_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(sample_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Sampling loop started");

            loop {
                tokio::select! {
                    _ = sampling_cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                for sample in sampler.collect().await {
                    match monitor.sample_and_update(sample) {
                        Ok(Some(anomaly)) => {
                            // A full queue means the dispatcher is far
                            // behind; dropping beats stalling the loop
                            if let Err(e) = anomaly_tx.try_send(anomaly) {
                                warn!(error = %e, "Anomaly queue full, dropping event");
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!(error = %e, "Sample rejected"),
                    }
                }

                let status = loop_snapshot.current().status_lines().join(" | ");
                debug!(%status, "Sampling cycle complete");
            }

            info!("Sampling loop stopped");
            // anomaly_tx drops here, which drains and stops the dispatcher
        });

        let flush_interval = config.persistence.flush_interval_duration();
        let flush_cancel = cancel.clone();
        let flush_gateway = gateway.clone();
        let flush_snapshot = snapshot.clone();
        let flush_health = health.clone();
        let flush_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(flush_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await; // the immediate first tick

            loop {
                tokio::select! {
                    _ = flush_cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                flush_baselines(&flush_gateway, &flush_snapshot, &flush_health).await;
            }
        });

        info!(
            baseline_path = %gateway.path().display(),
            sample_interval_secs = config.monitoring.sample_interval,
            "Agent service started"
        );

        Ok(Self {
            snapshot,
            dispatcher,
            gateway,
            health,
            cancel,
            sampling_task,
            dispatch_task,
            flush_task,
        })
    }

    /// The most recently published monitoring snapshot
    pub fn snapshot(&self) -> Arc<MonitoringSnapshot> {
        self.snapshot.current()
    }

    pub fn dispatcher(&self) -> &Arc<ResponseDispatcher> {
        &self.dispatcher
    }

    /// Block an address from an external threat feed through the
    /// dispatcher's validation and idempotence path
    pub async fn note_threat_address(&self, addr: &str) -> Result<DispatchRecord> {
        self.dispatcher.block_threat(addr).await
    }

    /// Resolves when the service has been asked to stop, by signal or by
    /// a dispatched shutdown action
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Stop the background tasks, drain in-flight dispatches, and write
    /// a final baseline save
    pub async fn stop(self) {
        info!("Stopping agent service");
        self.cancel.cancel();

        if let Err(e) = self.sampling_task.await {
            error!(error = %e, "Sampling task panicked");
        }
        // The sampling task owned the anomaly sender; the dispatcher
        // drains whatever is queued and exits
        if let Err(e) = self.dispatch_task.await {
            error!(error = %e, "Dispatch task panicked");
        }
        if let Err(e) = self.flush_task.await {
            error!(error = %e, "Flush task panicked");
        }

        flush_baselines(&self.gateway, &self.snapshot, &self.health).await;
        info!("Agent service stopped");
    }
}

/// Persist the baselines visible in the current snapshot. The snapshot
/// is immutable, so the save never races the sampling loop.
async fn flush_baselines(
    gateway: &PersistenceGateway,
    handle: &SnapshotHandle,
    health: &HealthFlags,
) {
    let snapshot = handle.current();
    let store = BaselineStore::from_map(snapshot.baselines.clone());

    match gateway.save(&store, &snapshot.suppressed).await {
        Ok(()) => health.set_persist_healthy(true),
        Err(e) => {
            health.set_persist_healthy(false);
            error!(error = %e, "Baseline flush failed, will retry next interval");
        }
    }
}

/// Shutdown controller that stops the agent through its cancellation
/// token instead of exec'ing a system command
pub struct SignalShutdown {
    token: CancellationToken,
}

impl SignalShutdown {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

#[async_trait]
impl ShutdownController for SignalShutdown {
    async fn shutdown(&self, reason: &str) -> ActionResult<()> {
        warn!(reason = %reason, "Shutdown action dispatched, stopping agent");
        self.token.cancel();
        Ok(())
    }
}
