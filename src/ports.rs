use crate::config::Config;
use crate::executor::{ProbeExecutor, ProgressCounter, RetryPolicy};
use crate::scanner::{ScanKind, ScanSummary, Scanner, SharedState};
use crate::types::{PortRecord, ScanTarget};
use crate::{Result, ScanError};
use async_trait::async_trait;
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

lazy_static! {
    static ref RANGE_RE: Regex = Regex::new(r"^(\d+)-(\d+)$").expect("port range pattern");
}

/// Establishes (and immediately drops) a TCP connection.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str, port: u16, timeout: Duration) -> Result<()>;
}

pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16, limit: Duration) -> Result<()> {
        match timeout(limit, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => {
                drop(stream);
                Ok(())
            }
            Ok(Err(e)) => Err(ScanError::Network(e)),
            Err(_) => Err(ScanError::Timeout {
                operation: format!("TCP connect to {}:{}", host, port),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn len(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }

    pub fn ports(&self) -> Vec<u16> {
        (self.start..=self.end).collect()
    }
}

/// Parse an inclusive `N-M` range with `1 <= N <= M <= 65535`.
pub fn parse_port_range(range: &str) -> Result<PortRange> {
    let captures = RANGE_RE
        .captures(range.trim())
        .ok_or_else(|| ScanError::InvalidPortRange(format!("{} (must look like 1-65535)", range)))?;

    let bound = |index: usize| -> Result<u32> {
        captures[index]
            .parse::<u32>()
            .map_err(|_| ScanError::InvalidPortRange(format!("{} (port number too large)", range)))
    };
    let start = bound(1)?;
    let end = bound(2)?;

    if !(1 <= start && start <= end && end <= 65535) {
        return Err(ScanError::InvalidPortRange(format!(
            "{} (ports must satisfy 1 <= start <= end <= 65535)",
            range
        )));
    }

    Ok(PortRange {
        start: start as u16,
        end: end as u16,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortScanResult {
    pub current_open: BTreeSet<u16>,
    /// Open ports nobody has acknowledged yet
    pub new_ports: Vec<u16>,
}

/// Replace the open-port snapshot. Acknowledgments are never touched here.
pub fn merge_ports(record: &mut PortRecord, result: &PortScanResult) {
    record.current_open = result.current_open.clone();
}

pub struct PortScanner {
    range: String,
    timeout: Duration,
    executor: ProbeExecutor,
    connector: Arc<dyn Connector>,
}

impl PortScanner {
    pub fn new(config: &Config) -> Self {
        Self::with_connector(config, Arc::new(TcpConnector))
    }

    pub fn with_connector(config: &Config, connector: Arc<dyn Connector>) -> Self {
        Self {
            range: config.ports.range.clone(),
            timeout: config.port_timeout(),
            executor: ProbeExecutor::new(config.ports.concurrency, RetryPolicy::from_config(&config.retry)),
            connector,
        }
    }

    pub fn get_progress(&self) -> String {
        self.executor.progress().get_progress()
    }

    /// Sweep the configured range. Fails before probing if the range is invalid.
    pub async fn scan_host(&self, host: &str, acknowledged: &BTreeSet<u16>) -> Result<PortScanResult> {
        let range = parse_port_range(&self.range)?;
        let ports = range.ports();
        self.executor.progress().reset(ports.len() as u64);
        info!("Scanning {} ports ({}) on {}", ports.len(), self.range, host);

        let connector = &self.connector;
        let limit = self.timeout;
        let results = self
            .executor
            .run_all(&ports, move |port| {
                let port = *port;
                async move { connector.connect(host, port, limit).await }
            })
            .await;

        let mut current_open = BTreeSet::new();
        for (port, result) in ports.iter().zip(results) {
            match result {
                Ok(()) => {
                    current_open.insert(*port);
                }
                Err(e) if e.is_transient() => {}
                Err(e) => debug!("Port {} on {} failed: {}", port, host, e),
            }
        }

        let new_ports: Vec<u16> = current_open.difference(acknowledged).copied().collect();
        for port in &new_ports {
            warn!("New open port on {}: {}", host, port);
        }
        if new_ports.is_empty() {
            info!("No new open ports on {}", host);
        }

        Ok(PortScanResult { current_open, new_ports })
    }
}

#[async_trait]
impl Scanner for PortScanner {
    fn kind(&self) -> ScanKind {
        ScanKind::Ports
    }

    fn progress(&self) -> Arc<ProgressCounter> {
        self.executor.progress()
    }

    async fn scan(&self, target: &ScanTarget, state: &SharedState) -> Result<ScanSummary> {
        let acknowledged = state.lock().await.ports.acknowledged.clone();

        let result = self.scan_host(&target.host, &acknowledged).await?;

        merge_ports(&mut state.lock().await.ports, &result);
        Ok(ScanSummary::Ports {
            current_open: result.current_open.into_iter().collect(),
            new_ports: result.new_ports,
        })
    }
}
