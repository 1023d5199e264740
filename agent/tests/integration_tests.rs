//! Integration tests for the Vigil agent
//!
//! These tests drive the full service: scripted samplers feed the
//! monitoring loop, learned baselines flag injected spikes, and the
//! dispatcher executes responses against counting mock controllers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use vigil_agent::config::AgentConfig;
use vigil_agent::dispatch::{AlertSink, FirewallController, ShutdownController};
use vigil_agent::error::ActionResult;
use vigil_agent::sample::{MetricKind, MetricSample};
use vigil_agent::sampler::Sampler;
use vigil_agent::service::AgentService;
use vigil_agent::validate::ValidatedAddress;
use vigil_agent::{AnomalySeverity, PersistenceGateway};

fn create_test_config(temp_dir: &TempDir) -> AgentConfig {
    let mut config = AgentConfig::default();
    config.monitoring.sample_interval = 1;
    config.monitoring.learning_period = 0;
    config.monitoring.min_samples = 5;
    config.monitoring.monitored_hosts = vec![];
    config.persistence.baseline_path = temp_dir.path().join("baseline.json");
    config.persistence.flush_interval = 10;
    config.response.retry.base_delay = 0;
    config.response.retry.max_delay = 0;
    config
}

struct ScriptedSampler {
    cycles: Mutex<VecDeque<Vec<MetricSample>>>,
}

impl ScriptedSampler {
    fn new(cycles: Vec<Vec<MetricSample>>) -> Self {
        Self {
            cycles: Mutex::new(cycles.into()),
        }
    }
}

#[async_trait]
impl Sampler for ScriptedSampler {
    async fn collect(&mut self) -> Vec<MetricSample> {
        self.cycles.lock().unwrap().pop_front().unwrap_or_default()
    }
}

#[derive(Default)]
struct CountingFirewall {
    calls: AtomicU32,
}

#[async_trait]
impl FirewallController for CountingFirewall {
    async fn block(&self, _addr: &ValidatedAddress) -> ActionResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_blocked(&self, _addr: &ValidatedAddress) -> bool {
        false
    }
}

#[derive(Default)]
struct RecordingAlerts {
    messages: Mutex<Vec<(String, AnomalySeverity)>>,
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

#[derive(Default)]
struct CountingShutdown {
    calls: AtomicU32,
}

#[async_trait]
impl ShutdownController for CountingShutdown {
    async fn shutdown(&self, _reason: &str) -> ActionResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct TestHarness {
    service: AgentService,
    firewall: Arc<CountingFirewall>,
    alerts: Arc<RecordingAlerts>,
    shutdowns: Arc<CountingShutdown>,
}

async fn start_agent(config: AgentConfig, sampler: Box<dyn Sampler>) -> TestHarness {
    let firewall = Arc::new(CountingFirewall::default());
    let alerts = Arc::new(RecordingAlerts::default());
    let shutdowns = Arc::new(CountingShutdown::default());

    let service = AgentService::start(
        config,
        sampler,
        firewall.clone(),
        alerts.clone(),
        shutdowns.clone(),
        CancellationToken::new(),
    )
    .await
    .expect("service should start");

    TestHarness {
        service,
        firewall,
        alerts,
        shutdowns,
    }
}

fn host_cycle(host: &str, value: f64) -> Vec<MetricSample> {
    vec![MetricSample::new(MetricKind::Host(host.to_string()), value)]
}

#[tokio::test(start_paused = true)]
async fn test_learn_detect_and_block_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&temp_dir);

    // Five quiet cycles establish the baseline, then a massive spike
    let host = "10.0.0.8";
    let mut cycles: Vec<_> = (0..5).map(|_| host_cycle(host, 10.0)).collect();
    cycles.push(host_cycle(host, 100.0));

    let harness = start_agent(config, Box::new(ScriptedSampler::new(cycles))).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    harness.service.stop().await;

    // The spike scored above the block tier and carried a source address
    assert_eq!(harness.firewall.calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.shutdowns.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unlearned_metrics_never_trigger_actions() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = create_test_config(&temp_dir);
    config.monitoring.min_samples = 100; // never finishes learning

    let host = "10.0.0.8";
    let cycles: Vec<_> = vec![
        host_cycle(host, 10.0),
        host_cycle(host, 900.0),
        host_cycle(host, 10.0),
    ];

    let harness = start_agent(config, Box::new(ScriptedSampler::new(cycles))).await;

    tokio::time::sleep(Duration::from_secs(6)).await;
    harness.service.stop().await;

    assert_eq!(harness.firewall.calls.load(Ordering::SeqCst), 0);
    assert!(harness.alerts.messages.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_baselines_survive_restart() {
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&temp_dir);
    let baseline_path = config.persistence.baseline_path.clone();

    // First run: learn a CPU baseline, then stop (final flush persists)
    let cycles: Vec<_> = (0..6)
        .map(|_| vec![MetricSample::new(MetricKind::Cpu, 10.0)])
        .collect();
    let harness = start_agent(config.clone(), Box::new(ScriptedSampler::new(cycles))).await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    harness.service.stop().await;

    let gateway = PersistenceGateway::new(&baseline_path, 5);
    assert!(gateway.load().await.store.get(&MetricKind::Cpu).is_some());

    // Second run: the baseline is visible before any sample arrives
    let harness = start_agent(config, Box::new(ScriptedSampler::new(Vec::new()))).await;
    let snapshot = harness.service.snapshot();
    assert!(snapshot.baselines.get(&MetricKind::Cpu).unwrap().is_learned);
    harness.service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_device_down_produces_alert() {
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&temp_dir);

    let cycles = vec![host_cycle("nas", -1.0)];
    let harness = start_agent(config, Box::new(ScriptedSampler::new(cycles))).await;

    tokio::time::sleep(Duration::from_secs(3)).await;
    harness.service.stop().await;

    let messages = harness.alerts.messages.lock().unwrap();
    assert!(messages
        .iter()
        .any(|(_, severity)| *severity == AnomalySeverity::Info));
    // An unreachable host is not a blockable offender
    assert_eq!(harness.firewall.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_threat_feed_block_is_validated_and_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&temp_dir);

    let harness = start_agent(config, Box::new(ScriptedSampler::new(Vec::new()))).await;

    harness
        .service
        .note_threat_address("203.0.113.7")
        .await
        .unwrap();
    harness
        .service
        .note_threat_address("203.0.113.7")
        .await
        .unwrap();
    assert!(harness
        .service
        .note_threat_address("1.2.3.4; rm -rf /")
        .await
        .is_err());

    harness.service.stop().await;
    assert_eq!(harness.firewall.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_config_round_trips_through_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("agent.toml");

    let mut config = AgentConfig::default();
    config.monitoring.anomaly_threshold = 4.5;
    config.response.block_tier = 7.0;
    config.save_to_file(&path).unwrap();

    let loaded = AgentConfig::from_file(&path).unwrap();
    assert_eq!(loaded.monitoring.anomaly_threshold, 4.5);
    assert_eq!(loaded.response.block_tier, 7.0);
    loaded.validate().unwrap();
}
