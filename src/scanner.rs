use crate::acao::AcaoScanner;
use crate::config::Config;
use crate::executor::ProgressCounter;
use crate::fuzz::DirectoryFuzzer;
use crate::ports::PortScanner;
use crate::state::StateStore;
use crate::types::{Issue, ScanTarget, TargetState};
use crate::utils::time;
use crate::{Result, ScanError};
use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The per-target document, shared by the scanners of one run.
pub type SharedState = Arc<Mutex<TargetState>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanKind {
    Ports,
    Fuzz,
    Acao,
}

impl ScanKind {
    pub const ALL: [ScanKind; 3] = [ScanKind::Ports, ScanKind::Fuzz, ScanKind::Acao];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanKind::Ports => "ports",
            ScanKind::Fuzz => "fuzz",
            ScanKind::Acao => "acao",
        }
    }

    /// Parse `all` or a comma separated list such as `ports,acao`.
    pub fn parse_list(input: &str) -> Result<Vec<ScanKind>> {
        if input.trim().eq_ignore_ascii_case("all") {
            return Ok(Self::ALL.to_vec());
        }

        let mut kinds = Vec::new();
        for item in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let kind = item.parse::<ScanKind>()?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        if kinds.is_empty() {
            return Err(ScanError::InvalidInput("No scan types given".to_string()));
        }
        Ok(kinds)
    }
}

impl fmt::Display for ScanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanKind {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ports" => Ok(ScanKind::Ports),
            "fuzz" => Ok(ScanKind::Fuzz),
            // Names used by older state files and scripts
            "acao" | "acao-leak" | "acao-weak" => Ok(ScanKind::Acao),
            other => Err(ScanError::InvalidInput(format!(
                "Invalid scan type: {} (expected ports, fuzz, acao or all)",
                other
            ))),
        }
    }
}

/// What a single scanner found during one run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "scanner", rename_all = "lowercase")]
pub enum ScanSummary {
    Ports {
        current_open: Vec<u16>,
        new_ports: Vec<u16>,
    },
    Fuzz {
        found: Vec<String>,
        /// URLs recorded for the first time
        added: Vec<String>,
    },
    Acao {
        open: Vec<Issue>,
        new: usize,
        regressions: usize,
        resolved: usize,
    },
}

impl ScanSummary {
    pub fn kind(&self) -> ScanKind {
        match self {
            ScanSummary::Ports { .. } => ScanKind::Ports,
            ScanSummary::Fuzz { .. } => ScanKind::Fuzz,
            ScanSummary::Acao { .. } => ScanKind::Acao,
        }
    }

    pub fn warning_count(&self) -> usize {
        match self {
            ScanSummary::Ports { new_ports, .. } => new_ports.len(),
            ScanSummary::Fuzz { found, .. } => found.len(),
            ScanSummary::Acao { open, .. } => open.len(),
        }
    }
}

#[async_trait]
pub trait Scanner: Send + Sync {
    fn kind(&self) -> ScanKind;

    /// Shared probe counter, readable while `scan` runs
    fn progress(&self) -> Arc<ProgressCounter>;

    async fn scan(&self, target: &ScanTarget, state: &SharedState) -> Result<ScanSummary>;
}

#[derive(Debug)]
pub struct ScannerOutcome {
    pub kind: ScanKind,
    pub result: Result<ScanSummary>,
}

#[derive(Debug)]
pub struct TargetReport {
    pub target: ScanTarget,
    pub outcomes: Vec<ScannerOutcome>,
}

impl TargetReport {
    pub fn warnings(&self) -> usize {
        self.summaries().map(ScanSummary::warning_count).sum()
    }

    pub fn summaries(&self) -> impl Iterator<Item = &ScanSummary> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn errors(&self) -> Vec<(ScanKind, &ScanError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.kind, e)))
            .collect()
    }
}

/// Runs the selected scanners against targets and persists the results.
pub struct Orchestrator {
    config: Config,
    store: Arc<dyn StateStore>,
}

impl Orchestrator {
    pub fn new(config: Config, store: Arc<dyn StateStore>) -> Self {
        Self { config, store }
    }

    /// Build one scanner per kind. Scanners can be reused across targets.
    ///
    /// A scanner that cannot be built is replaced by one that reports the
    /// construction error for every target, so its siblings still run.
    pub fn scanners(&self, kinds: &[ScanKind]) -> Vec<Box<dyn Scanner>> {
        kinds
            .iter()
            .map(|kind| {
                let built: Result<Box<dyn Scanner>> = match kind {
                    ScanKind::Ports => Ok(Box::new(PortScanner::new(&self.config))),
                    ScanKind::Fuzz => DirectoryFuzzer::new(&self.config).map(|s| Box::new(s) as Box<dyn Scanner>),
                    ScanKind::Acao => AcaoScanner::new(&self.config).map(|s| Box::new(s) as Box<dyn Scanner>),
                };
                built.unwrap_or_else(|e| {
                    warn!("Cannot run {} scanner: {}", kind, e);
                    Box::new(UnavailableScanner::new(*kind, &e)) as Box<dyn Scanner>
                })
            })
            .collect()
    }

    /// Load the target's document, run every scanner concurrently and save once.
    ///
    /// A failing scanner is recorded in the report and does not stop the
    /// others; only loading or saving the document fails the whole target.
    pub async fn scan_target(&self, target: &ScanTarget, scanners: &[Box<dyn Scanner>]) -> Result<TargetReport> {
        let mut document = self.store.load(&target.raw).await?;
        let acknowledged = document.acknowledge_expected_ports(&self.config.ports.expected);
        if acknowledged > 0 {
            debug!("Auto-acknowledged {} expected ports on {}", acknowledged, target);
        }

        let state: SharedState = Arc::new(Mutex::new(document));
        info!("Scanning {} ({} scanners)", target, scanners.len());

        let outcomes = join_all(scanners.iter().map(|scanner| {
            let state = &state;
            async move {
                let result = scanner.scan(target, state).await;
                if let Err(e) = &result {
                    error!("Error in {} on {}: {}", scanner.kind(), target, e);
                }
                ScannerOutcome {
                    kind: scanner.kind(),
                    result,
                }
            }
        }))
        .await;

        let mut document = state.lock().await;
        document.last_scan = Some(time::now_utc());
        self.store.save(&target.raw, &document).await?;
        drop(document);

        Ok(TargetReport {
            target: target.clone(),
            outcomes,
        })
    }

    /// Scan targets one after another. A failed target does not stop the rest.
    pub async fn scan_targets(&self, targets: &[ScanTarget], kinds: &[ScanKind]) -> Vec<(ScanTarget, Result<TargetReport>)> {
        let scanners = self.scanners(kinds);
        let mut reports = Vec::with_capacity(targets.len());

        for target in targets {
            let report = self.scan_target(target, &scanners).await;
            if let Err(e) = &report {
                error!("Scan of {} failed: {}", target, e);
            }
            reports.push((target.clone(), report));
        }
        reports
    }
}

/// Stand-in for a scanner whose configuration was rejected.
struct UnavailableScanner {
    kind: ScanKind,
    reason: String,
    progress: Arc<ProgressCounter>,
}

impl UnavailableScanner {
    fn new(kind: ScanKind, error: &ScanError) -> Self {
        Self {
            kind,
            reason: error.to_string(),
            progress: ProgressCounter::new(),
        }
    }
}

#[async_trait]
impl Scanner for UnavailableScanner {
    fn kind(&self) -> ScanKind {
        self.kind
    }

    fn progress(&self) -> Arc<ProgressCounter> {
        Arc::clone(&self.progress)
    }

    async fn scan(&self, _target: &ScanTarget, _state: &SharedState) -> Result<ScanSummary> {
        Err(ScanError::ScannerUnavailable {
            kind: self.kind.to_string(),
            reason: self.reason.clone(),
        })
    }
}
