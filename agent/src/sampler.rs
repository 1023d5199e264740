//! Metric collection
//!
//! `Sampler` is the seam between the monitoring loop and whatever
//! produces raw numbers. `SystemSampler` is the default implementation:
//! CPU, memory, disk utilization and network interface count through
//! sysinfo, plus a TCP reachability probe per monitored host. Other
//! metric kinds come from integrator-supplied samplers.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use sysinfo::{Components, Disks, Networks, System};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::sample::{MetricKind, MetricSample};

/// Port probed on monitored hosts; a refused connection still proves
/// the host is up
const PROBE_PORT: u16 = 80;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Value recorded for a host that did not answer the probe
pub const HOST_DOWN: f64 = -1.0;

/// Source of metric samples for one collection cycle
#[async_trait]
pub trait Sampler: Send {
    async fn collect(&mut self) -> Vec<MetricSample>;
}

/// Default sampler backed by sysinfo plus TCP host probes
pub struct SystemSampler {
    system: System,
    disks: Disks,
    components: Components,
    networks: Networks,
    monitored_hosts: Vec<String>,
}

impl SystemSampler {
    pub fn new(monitored_hosts: Vec<String>) -> Self {
        Self {
            system: System::new(),
            disks: Disks::new_with_refreshed_list(),
            components: Components::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            monitored_hosts,
        }
    }

    fn cpu_percent(&mut self) -> f64 {
        self.system.refresh_cpu();
        f64::from(self.system.global_cpu_info().cpu_usage())
    }

    fn ram_percent(&mut self) -> f64 {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return 0.0;
        }
        self.system.used_memory() as f64 / total as f64 * 100.0
    }

    fn disk_percent(&mut self) -> f64 {
        self.disks.refresh_list();
        let (mut total, mut available) = (0u64, 0u64);
        for disk in self.disks.list() {
            total += disk.total_space();
            available += disk.available_space();
        }
        if total == 0 {
            return 0.0;
        }
        (total - available) as f64 / total as f64 * 100.0
    }

    /// Active network interface count
    fn net_connections(&mut self) -> f64 {
        self.networks.refresh_list();
        self.networks.list().len() as f64
    }

    /// Highest component temperature, when the platform exposes sensors
    fn temperature(&mut self) -> Option<f64> {
        self.components.refresh_list();
        self.components
            .list()
            .iter()
            .map(|c| f64::from(c.temperature()))
            .filter(|t| t.is_finite())
            .fold(None, |max, t| match max {
                Some(m) if m >= t => Some(m),
                _ => Some(t),
            })
    }
}

#[async_trait]
impl Sampler for SystemSampler {
    async fn collect(&mut self) -> Vec<MetricSample> {
        let mut samples = vec![
            MetricSample::new(MetricKind::Cpu, self.cpu_percent()),
            MetricSample::new(MetricKind::Ram, self.ram_percent()),
            MetricSample::new(MetricKind::Disk, self.disk_percent()),
            MetricSample::new(MetricKind::NetConnections, self.net_connections()),
        ];

        if let Some(temp) = self.temperature() {
            samples.push(MetricSample::new(MetricKind::Temperature, temp));
        }

        for host in &self.monitored_hosts {
            let latency = probe_host(host, PROBE_PORT, PROBE_TIMEOUT).await;
            if latency < 0.0 {
                debug!(host = %host, "Host probe failed");
            }
            samples.push(MetricSample::new(
                MetricKind::Host(host.clone()),
                latency,
            ));
        }

        samples
    }
}

/// TCP reachability probe. Returns the connect latency in milliseconds;
/// a refused connection counts as reachable (the host answered), while
/// timeout or routing failure returns [`HOST_DOWN`].
pub async fn probe_host(host: &str, port: u16, limit: Duration) -> f64 {
    let started = Instant::now();
    match timeout(limit, TcpStream::connect((host, port))).await {
        Ok(Ok(_)) => started.elapsed().as_secs_f64() * 1000.0,
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
            started.elapsed().as_secs_f64() * 1000.0
        }
        Ok(Err(_)) | Err(_) => HOST_DOWN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_probe_reaches_listening_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let latency = probe_host("127.0.0.1", port, Duration::from_secs(1)).await;
        assert!(latency >= 0.0);
    }

    #[tokio::test]
    async fn test_probe_treats_refused_as_reachable() {
        // Bind then drop so the port is very likely closed
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let latency = probe_host("127.0.0.1", port, Duration::from_secs(1)).await;
        assert!(latency >= 0.0);
    }

    #[tokio::test]
    async fn test_probe_marks_unresolvable_host_down() {
        let latency = probe_host(
            "host.invalid",
            PROBE_PORT,
            Duration::from_millis(500),
        )
        .await;
        assert_eq!(latency, HOST_DOWN);
    }

    #[tokio::test]
    async fn test_system_sampler_emits_core_metrics() {
        let mut sampler = SystemSampler::new(Vec::new());
        let samples = sampler.collect().await;

        for kind in [
            MetricKind::Cpu,
            MetricKind::Ram,
            MetricKind::Disk,
            MetricKind::NetConnections,
        ] {
            let sample = samples
                .iter()
                .find(|s| s.kind == kind)
                .unwrap_or_else(|| panic!("missing {} sample", kind));
            assert!(sample.value.is_finite());
            assert!(sample.value >= 0.0);
        }
    }
}
