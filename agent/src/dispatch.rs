//! Automated response dispatch
//!
//! Consumes anomaly events and executes configured actions through
//! injected capability interfaces. Each anomaly is dispatched at most
//! once; blocking is idempotent against the block list; transient
//! failures retry with bounded exponential backoff; a shutdown action
//! fires exactly once per process. No lock is held across an external
//! call: membership is checked, the lock released, the call made, and
//! the result recorded afterward.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ResponseConfig;
use crate::error::{ActionError, ActionResult, Result};
use crate::monitor::HealthFlags;
use crate::sample::MetricKind;
use crate::scorer::{Anomaly, AnomalySeverity};
use crate::validate::ValidatedAddress;

/// Dispatch records retained for reporting
const RECORD_CAP: usize = 256;

/// Anomaly ids remembered for at-most-once dispatch
const SEEN_CAP: usize = 1024;

/// Firewall capability; the agent never shells out directly
#[async_trait]
pub trait FirewallController: Send + Sync {
    async fn block(&self, addr: &ValidatedAddress) -> ActionResult<()>;
    async fn is_blocked(&self, addr: &ValidatedAddress) -> bool;
}

/// Alert delivery capability (email, webhook, log)
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, message: &str, severity: AnomalySeverity) -> ActionResult<()>;
}

/// Host shutdown capability
#[async_trait]
pub trait ShutdownController: Send + Sync {
    async fn shutdown(&self, reason: &str) -> ActionResult<()>;
}

/// Resolved automated action for one anomaly
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ResponseAction {
    BlockAddress(ValidatedAddress),
    SendAlert {
        message: String,
        severity: AnomalySeverity,
    },
    TriggerShutdown {
        reason: String,
    },
}

/// Lifecycle of one dispatched action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DispatchState {
    Pending,
    Dispatching,
    Applied,
    Failed,
}

/// Outcome record for one anomaly-triggered action
#[derive(Debug, Clone, Serialize)]
pub struct DispatchRecord {
    pub anomaly_id: Uuid,
    pub action: ResponseAction,
    pub state: DispatchState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Default)]
struct SeenAnomalies {
    set: HashSet<Uuid>,
    order: VecDeque<Uuid>,
}

impl SeenAnomalies {
    /// Returns false when the id was already seen
    fn insert(&mut self, id: Uuid) -> bool {
        if !self.set.insert(id) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > SEEN_CAP {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
        true
    }
}

/// Maps anomalies onto actions and executes them through injected
/// capabilities
pub struct ResponseDispatcher {
    config: ResponseConfig,
    firewall: Arc<dyn FirewallController>,
    alerts: Arc<dyn AlertSink>,
    shutdowns: Arc<dyn ShutdownController>,
    block_list: Mutex<HashMap<ValidatedAddress, DateTime<Utc>>>,
    seen: Mutex<SeenAnomalies>,
    records: Mutex<VecDeque<DispatchRecord>>,
    shutdown_dispatched: AtomicBool,
    health: Arc<HealthFlags>,
}

impl ResponseDispatcher {
    pub fn new(
        config: ResponseConfig,
        firewall: Arc<dyn FirewallController>,
        alerts: Arc<dyn AlertSink>,
        shutdowns: Arc<dyn ShutdownController>,
        health: Arc<HealthFlags>,
    ) -> Self {
        Self {
            config,
            firewall,
            alerts,
            shutdowns,
            block_list: Mutex::new(HashMap::new()),
            seen: Mutex::new(SeenAnomalies::default()),
            records: Mutex::new(VecDeque::new()),
            shutdown_dispatched: AtomicBool::new(false),
            health,
        }
    }

    /// Consume anomalies until the channel closes, letting in-flight
    /// dispatches finish; the service joins this task on shutdown.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Anomaly>) {
        info!("Response dispatcher started");
        while let Some(anomaly) = rx.recv().await {
            match self.dispatch(&anomaly).await {
                Ok(Some(record)) => {
                    debug!(
                        anomaly_id = %record.anomaly_id,
                        state = ?record.state,
                        attempts = record.attempts,
                        "Dispatch completed"
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Dispatch rejected");
                    if let Err(notify_err) = self
                        .alerts
                        .notify(
                            &format!("Automated response rejected: {}", e),
                            AnomalySeverity::Warning,
                        )
                        .await
                    {
                        error!(error = %notify_err, "Failed to report rejected dispatch");
                    }
                }
            }
        }
        info!("Response dispatcher drained and stopped");
    }

    /// Resolve and execute the configured action for an anomaly.
    ///
    /// Returns `Ok(None)` when no action is warranted or the anomaly was
    /// already dispatched. Invalid externally derived input yields a
    /// `ValidationError`; the anomaly stays recorded but no action runs.
    pub async fn dispatch(&self, anomaly: &Anomaly) -> Result<Option<DispatchRecord>> {
        if !self.seen.lock().unwrap().insert(anomaly.id) {
            debug!(anomaly_id = %anomaly.id, "Anomaly already dispatched");
            return Ok(None);
        }

        let action = match self.resolve(anomaly)? {
            Some(action) => action,
            None => return Ok(None),
        };

        let record = self.execute(anomaly.id, action).await;
        self.record(record.clone());

        match record.state {
            DispatchState::Applied => self.health.set_dispatch_healthy(true),
            DispatchState::Failed => {
                self.health.set_dispatch_healthy(false);
                let message = format!(
                    "Automated response failed after {} attempts: {}",
                    record.attempts,
                    record.last_error.as_deref().unwrap_or("unknown error"),
                );
                if let Err(e) = self.alerts.notify(&message, AnomalySeverity::Critical).await {
                    error!(error = %e, "Failed to report exhausted action");
                }
            }
            _ => {}
        }

        Ok(Some(record))
    }

    /// Block an address supplied by an external threat feed; same
    /// validation and idempotence path as anomaly-driven blocks.
    pub async fn block_threat(&self, input: &str) -> Result<DispatchRecord> {
        let addr = ValidatedAddress::parse(input)?;
        info!(address = %addr, "Blocking threat-feed address");
        let record = self.execute_block(Uuid::new_v4(), addr).await;
        self.record(record.clone());
        Ok(record)
    }

    /// Map an anomaly onto an action per the configured policy
    fn resolve(&self, anomaly: &Anomaly) -> Result<Option<ResponseAction>> {
        // Thermal danger is terminal regardless of score tiers
        if anomaly.kind == MetricKind::Temperature
            && anomaly.observed_value >= self.config.shutdown_temp
        {
            return Ok(Some(ResponseAction::TriggerShutdown {
                reason: format!(
                    "temperature {:.1}C at or above {:.1}C",
                    anomaly.observed_value, self.config.shutdown_temp
                ),
            }));
        }

        if anomaly.severity_score >= self.config.block_tier {
            if let Some(source) = &anomaly.source {
                let addr = ValidatedAddress::parse(source)?;
                return Ok(Some(ResponseAction::BlockAddress(addr)));
            }
        }

        if anomaly.severity == AnomalySeverity::Info
            || anomaly.severity_score >= self.config.alert_tier
        {
            return Ok(Some(ResponseAction::SendAlert {
                message: anomaly.describe(),
                severity: anomaly.severity,
            }));
        }

        Ok(None)
    }

    async fn execute(&self, anomaly_id: Uuid, action: ResponseAction) -> DispatchRecord {
        match action {
            ResponseAction::BlockAddress(addr) => self.execute_block(anomaly_id, addr).await,
            ResponseAction::SendAlert { message, severity } => {
                let alerts = self.alerts.clone();
                let (attempts, outcome) = self
                    .run_with_retry("send_alert", || {
                        let alerts = alerts.clone();
                        let message = message.clone();
                        async move { alerts.notify(&message, severity).await }
                    })
                    .await;
                finish(
                    anomaly_id,
                    ResponseAction::SendAlert { message, severity },
                    attempts,
                    outcome,
                )
            }
            ResponseAction::TriggerShutdown { reason } => {
                // The flag is set before the first attempt so a second
                // trigger cannot race the shutdown in progress
                if self.shutdown_dispatched.swap(true, Ordering::SeqCst) {
                    debug!("Shutdown already dispatched, ignoring trigger");
                    return applied_noop(
                        anomaly_id,
                        ResponseAction::TriggerShutdown { reason },
                    );
                }

                warn!(reason = %reason, "Dispatching shutdown");
                let shutdowns = self.shutdowns.clone();
                let (attempts, outcome) = self
                    .run_with_retry("shutdown", || {
                        let shutdowns = shutdowns.clone();
                        let reason = reason.clone();
                        async move { shutdowns.shutdown(&reason).await }
                    })
                    .await;
                finish(
                    anomaly_id,
                    ResponseAction::TriggerShutdown { reason },
                    attempts,
                    outcome,
                )
            }
        }
    }

    async fn execute_block(&self, anomaly_id: Uuid, addr: ValidatedAddress) -> DispatchRecord {
        // Check membership, then release the lock before any external call
        let already_blocked = {
            let block_list = self.block_list.lock().unwrap();
            block_list.contains_key(&addr)
        };

        if already_blocked {
            debug!(address = %addr, "Address already blocked, skipping firewall call");
            return applied_noop(anomaly_id, ResponseAction::BlockAddress(addr));
        }

        let firewall = self.firewall.clone();
        let call_addr = addr.clone();
        let (attempts, outcome) = self
            .run_with_retry("block_address", || {
                let firewall = firewall.clone();
                let addr = call_addr.clone();
                async move { firewall.block(&addr).await }
            })
            .await;

        if outcome.is_ok() {
            let mut block_list = self.block_list.lock().unwrap();
            block_list.insert(addr.clone(), Utc::now());
            info!(address = %addr, "Address blocked");
        }

        finish(anomaly_id, ResponseAction::BlockAddress(addr), attempts, outcome)
    }

    /// Run an action with a per-call timeout and bounded exponential
    /// backoff. A timeout counts as a failure, never as success.
    async fn run_with_retry<F, Fut>(&self, what: &str, mut op: F) -> (u32, ActionResult<()>)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ActionResult<()>>,
    {
        let retry = &self.config.retry;
        let mut attempts = 0u32;
        let mut last_error = String::new();

        while attempts < retry.max_attempts {
            attempts += 1;

            let outcome = match timeout(self.config.action_timeout_duration(), op()).await {
                Ok(result) => result,
                Err(_) => Err(ActionError::TimedOut {
                    seconds: self.config.action_timeout,
                }),
            };

            match outcome {
                Ok(()) => return (attempts, Ok(())),
                Err(e) => {
                    warn!(action = what, attempt = attempts, error = %e, "Action attempt failed");
                    last_error = e.to_string();
                    if attempts < retry.max_attempts {
                        tokio::time::sleep(retry.delay_before(attempts)).await;
                    }
                }
            }
        }

        (attempts, Err(ActionError::Exhausted { attempts, last_error }))
    }

    fn record(&self, record: DispatchRecord) {
        let mut records = self.records.lock().unwrap();
        if records.len() >= RECORD_CAP {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Currently blocked addresses with their insertion times
    pub fn block_list(&self) -> Vec<(ValidatedAddress, DateTime<Utc>)> {
        let block_list = self.block_list.lock().unwrap();
        block_list.iter().map(|(a, t)| (a.clone(), *t)).collect()
    }

    /// Recent dispatch outcomes, oldest first
    pub fn recent_records(&self) -> Vec<DispatchRecord> {
        self.records.lock().unwrap().iter().cloned().collect()
    }

    pub fn shutdown_dispatched(&self) -> bool {
        self.shutdown_dispatched.load(Ordering::SeqCst)
    }
}

fn applied_noop(anomaly_id: Uuid, action: ResponseAction) -> DispatchRecord {
    DispatchRecord {
        anomaly_id,
        action,
        state: DispatchState::Applied,
        attempts: 0,
        last_error: None,
        completed_at: Utc::now(),
    }
}

fn finish(
    anomaly_id: Uuid,
    action: ResponseAction,
    attempts: u32,
    outcome: ActionResult<()>,
) -> DispatchRecord {
    match outcome {
        Ok(()) => DispatchRecord {
            anomaly_id,
            action,
            state: DispatchState::Applied,
            attempts,
            last_error: None,
            completed_at: Utc::now(),
        },
        Err(e) => DispatchRecord {
            anomaly_id,
            action,
            state: DispatchState::Failed,
            attempts,
            last_error: Some(e.to_string()),
            completed_at: Utc::now(),
        },
    }
}

/// Firewall implementation that records intent in the log without
/// touching the host; deployments inject a real controller.
pub struct LogFirewall;

#[async_trait]
impl FirewallController for LogFirewall {
    async fn block(&self, addr: &ValidatedAddress) -> ActionResult<()> {
        info!(address = %addr, "Firewall block requested");
        Ok(())
    }

    async fn is_blocked(&self, _addr: &ValidatedAddress) -> bool {
        false
    }
}

/// Alert sink that writes alerts to the structured log
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, message: &str, severity: AnomalySeverity) -> ActionResult<()> {
        match severity {
            AnomalySeverity::Critical => error!(severity = %severity, "ALERT: {}", message),
            AnomalySeverity::Warning => warn!(severity = %severity, "ALERT: {}", message),
            AnomalySeverity::Info => info!(severity = %severity, "ALERT: {}", message),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use std::sync::atomic::AtomicU32;

    struct ScriptedFirewall {
        calls: AtomicU32,
        failures_before_success: AtomicU32,
    }

    impl ScriptedFirewall {
        fn new(failures_before_success: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures_before_success: AtomicU32::new(failures_before_success),
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FirewallController for ScriptedFirewall {
        async fn block(&self, _addr: &ValidatedAddress) -> ActionResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures_before_success.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_before_success.store(remaining - 1, Ordering::SeqCst);
                Err(ActionError::TimedOut { seconds: 1 })
            } else {
                Ok(())
            }
        }

        async fn is_blocked(&self, _addr: &ValidatedAddress) -> bool {
            false
        }
    }

    struct RecordingAlerts {
        messages: Mutex<Vec<(String, AnomalySeverity)>>,
    }

    impl RecordingAlerts {
        fn new() -> Self {
            Self {
                messages: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AlertSink for RecordingAlerts {
        async fn notify(&self, message: &str, severity: AnomalySeverity) -> ActionResult<()> {
            self.messages
                .lock()
                .unwrap()
                .push((message.to_string(), severity));
            Ok(())
        }
    }

    struct CountingShutdown {
        calls: AtomicU32,
    }

    impl CountingShutdown {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ShutdownController for CountingShutdown {
        async fn shutdown(&self, _reason: &str) -> ActionResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_response_config() -> ResponseConfig {
        ResponseConfig {
            alert_tier: 3.0,
            block_tier: 5.0,
            shutdown_temp: 80.0,
            action_timeout: 5,
            retry: RetryConfig {
                max_attempts: 5,
                base_delay: 0, // no sleeping in tests
                max_delay: 0,
                backoff_multiplier: 2.0,
            },
        }
    }

    fn anomaly(kind: MetricKind, value: f64, score: f64, source: Option<&str>) -> Anomaly {
        Anomaly {
            id: Uuid::new_v4(),
            kind,
            observed_value: value,
            baseline_mean: 10.0,
            baseline_stddev: 1.0,
            severity_score: score,
            severity: if score >= 5.0 {
                AnomalySeverity::Critical
            } else {
                AnomalySeverity::Warning
            },
            detected_at: Utc::now(),
            source: source.map(|s| s.to_string()),
        }
    }

    struct Harness {
        dispatcher: ResponseDispatcher,
        firewall: Arc<ScriptedFirewall>,
        alerts: Arc<RecordingAlerts>,
        shutdowns: Arc<CountingShutdown>,
    }

    fn harness(firewall_failures: u32) -> Harness {
        let firewall = Arc::new(ScriptedFirewall::new(firewall_failures));
        let alerts = Arc::new(RecordingAlerts::new());
        let shutdowns = Arc::new(CountingShutdown::new());
        let dispatcher = ResponseDispatcher::new(
            test_response_config(),
            firewall.clone(),
            alerts.clone(),
            shutdowns.clone(),
            Arc::new(HealthFlags::new()),
        );
        Harness {
            dispatcher,
            firewall,
            alerts,
            shutdowns,
        }
    }

    #[tokio::test]
    async fn test_block_is_idempotent() {
        let h = harness(0);
        let first = anomaly(MetricKind::Host("1.2.3.4".to_string()), 500.0, 9.0, Some("1.2.3.4"));
        let second = anomaly(MetricKind::Host("1.2.3.4".to_string()), 600.0, 9.5, Some("1.2.3.4"));

        let record = h.dispatcher.dispatch(&first).await.unwrap().unwrap();
        assert_eq!(record.state, DispatchState::Applied);

        let record = h.dispatcher.dispatch(&second).await.unwrap().unwrap();
        assert_eq!(record.state, DispatchState::Applied);
        assert_eq!(record.attempts, 0); // short-circuited

        // Exactly one underlying firewall call, two records
        assert_eq!(h.firewall.call_count(), 1);
        assert_eq!(h.dispatcher.block_list().len(), 1);
        assert_eq!(h.dispatcher.recent_records().len(), 2);
    }

    #[tokio::test]
    async fn test_same_anomaly_dispatched_at_most_once() {
        let h = harness(0);
        let a = anomaly(MetricKind::Host("1.2.3.4".to_string()), 500.0, 9.0, Some("1.2.3.4"));

        assert!(h.dispatcher.dispatch(&a).await.unwrap().is_some());
        assert!(h.dispatcher.dispatch(&a).await.unwrap().is_none());
        assert_eq!(h.firewall.call_count(), 1);
    }

    #[tokio::test]
    async fn test_injection_input_rejected_without_action() {
        let h = harness(0);
        let a = anomaly(
            MetricKind::Host("evil".to_string()),
            500.0,
            9.0,
            Some("1.2.3.4; rm -rf /"),
        );

        let result = h.dispatcher.dispatch(&a).await;
        assert!(result.is_err());
        assert_eq!(h.firewall.call_count(), 0);
        assert!(h.dispatcher.block_list().is_empty());
    }

    #[tokio::test]
    async fn test_retries_then_succeeds_below_cap() {
        // Firewall times out 3 times, then succeeds
        let h = harness(3);
        let a = anomaly(MetricKind::Host("1.2.3.4".to_string()), 500.0, 9.0, Some("1.2.3.4"));

        let record = h.dispatcher.dispatch(&a).await.unwrap().unwrap();
        assert_eq!(record.state, DispatchState::Applied);
        assert_eq!(record.attempts, 4); // three retries plus the success
        assert_eq!(h.firewall.call_count(), 4);
    }

    #[tokio::test]
    async fn test_exhausted_retries_mark_failed_and_report() {
        let h = harness(100); // never succeeds
        let a = anomaly(MetricKind::Host("1.2.3.4".to_string()), 500.0, 9.0, Some("1.2.3.4"));

        let record = h.dispatcher.dispatch(&a).await.unwrap().unwrap();
        assert_eq!(record.state, DispatchState::Failed);
        assert_eq!(record.attempts, 5); // the configured cap
        assert!(record.last_error.is_some());
        assert_eq!(h.firewall.call_count(), 5);

        // Exhaustion is surfaced to the alert sink
        let messages = h.alerts.messages.lock().unwrap();
        assert!(messages
            .iter()
            .any(|(m, s)| m.contains("failed") && *s == AnomalySeverity::Critical));

        // The address did not get marked blocked
        assert!(h.dispatcher.block_list().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_fires_exactly_once() {
        let h = harness(0);
        let first = anomaly(MetricKind::Temperature, 85.0, 6.0, None);
        let second = anomaly(MetricKind::Temperature, 90.0, 7.0, None);

        h.dispatcher.dispatch(&first).await.unwrap().unwrap();
        let record = h.dispatcher.dispatch(&second).await.unwrap().unwrap();

        assert_eq!(record.state, DispatchState::Applied);
        assert_eq!(record.attempts, 0); // short-circuited
        assert_eq!(h.shutdowns.calls.load(Ordering::SeqCst), 1);
        assert!(h.dispatcher.shutdown_dispatched());
    }

    #[tokio::test]
    async fn test_tier_mapping() {
        let h = harness(0);

        // Warning-tier score: alert only, even with a source
        let a = anomaly(MetricKind::Host("10.0.0.9".to_string()), 60.0, 4.0, Some("10.0.0.9"));
        h.dispatcher.dispatch(&a).await.unwrap().unwrap();
        assert_eq!(h.firewall.call_count(), 0);
        assert_eq!(h.alerts.messages.lock().unwrap().len(), 1);

        // Critical-tier score with a source: block
        let a = anomaly(MetricKind::Host("10.0.0.9".to_string()), 600.0, 9.0, Some("10.0.0.9"));
        let record = h.dispatcher.dispatch(&a).await.unwrap().unwrap();
        assert!(matches!(record.action, ResponseAction::BlockAddress(_)));
        assert_eq!(h.firewall.call_count(), 1);
    }

    #[tokio::test]
    async fn test_below_alert_tier_no_action() {
        let h = harness(0);
        let a = anomaly(MetricKind::Cpu, 12.0, 2.0, None);
        // Score below alert tier resolves to nothing, but the anomaly
        // counts as dispatched
        assert!(h.dispatcher.dispatch(&a).await.unwrap().is_none());
        assert!(h.alerts.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_device_down_info_anomaly_alerts() {
        let h = harness(0);
        let mut a = anomaly(MetricKind::Host("nas".to_string()), -1.0, 0.0, Some("nas"));
        a.severity = AnomalySeverity::Info;

        let record = h.dispatcher.dispatch(&a).await.unwrap().unwrap();
        assert!(matches!(record.action, ResponseAction::SendAlert { .. }));
        assert_eq!(h.alerts.messages.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_threat_feed_block_shares_idempotence() {
        let h = harness(0);

        let record = h.dispatcher.block_threat("203.0.113.7").await.unwrap();
        assert_eq!(record.state, DispatchState::Applied);

        let record = h.dispatcher.block_threat("203.0.113.7").await.unwrap();
        assert_eq!(record.attempts, 0); // already blocked
        assert_eq!(h.firewall.call_count(), 1);

        assert!(h.dispatcher.block_threat("not an address!").await.is_err());
    }

    #[tokio::test]
    async fn test_run_drains_channel_then_stops() {
        let h = harness(0);
        let dispatcher = Arc::new(h.dispatcher);
        let (tx, rx) = mpsc::channel(16);

        let task = tokio::spawn(dispatcher.clone().run(rx));

        tx.send(anomaly(
            MetricKind::Host("1.2.3.4".to_string()),
            500.0,
            9.0,
            Some("1.2.3.4"),
        ))
        .await
        .unwrap();
        drop(tx); // closing the channel drains and stops the task

        task.await.unwrap();
        assert_eq!(h.firewall.call_count(), 1);
    }
}
