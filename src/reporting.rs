use crate::state::StateStore;
use crate::types::{Issue, IssueStatus, TargetState};
use crate::{Result, ScanError};
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

/// How much of a stored document a report shows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportView {
    /// Uncategorized ACAO issues only
    Critical,
    /// Everything that still needs a human decision
    #[default]
    Warnings,
    /// The whole document, with statuses
    All,
}

/// An ACAO issue with its position in the stored list, as used by `ack --issue`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexedIssue {
    pub index: usize,
    #[serde(flatten)]
    pub issue: Issue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetStatusReport {
    pub target: String,
    pub view: ReportView,
    pub last_scan: Option<DateTime<Utc>>,
    pub unacknowledged_ports: Vec<u16>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub open_ports: Vec<u16>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub acknowledged_ports: Vec<u16>,
    /// Fuzz URLs keyed by bucket (`issues`, `will_fix`, ...)
    pub fuzz: BTreeMap<String, Vec<String>>,
    pub acao: Vec<IndexedIssue>,
}

impl TargetStatusReport {
    pub fn build(target: &str, state: &TargetState, view: ReportView) -> Self {
        let indexed = |filter: &dyn Fn(&Issue) -> bool| -> Vec<IndexedIssue> {
            state
                .acao
                .issues
                .iter()
                .enumerate()
                .filter(|(_, issue)| filter(issue))
                .map(|(index, issue)| IndexedIssue {
                    index,
                    issue: issue.clone(),
                })
                .collect()
        };
        let uncategorized = |issue: &Issue| issue.status == IssueStatus::Uncategorized;

        let mut report = Self {
            target: target.to_string(),
            view,
            last_scan: state.last_scan,
            unacknowledged_ports: Vec::new(),
            open_ports: Vec::new(),
            acknowledged_ports: Vec::new(),
            fuzz: BTreeMap::new(),
            acao: Vec::new(),
        };

        match view {
            ReportView::Critical => {
                report.acao = indexed(&uncategorized);
            }
            ReportView::Warnings => {
                report.unacknowledged_ports = state.unacknowledged_ports();
                report.fuzz.insert("issues".to_string(), state.pending_fuzz());
                report.acao = indexed(&uncategorized);
            }
            ReportView::All => {
                report.unacknowledged_ports = state.unacknowledged_ports();
                report.open_ports = state.ports.current_open.iter().copied().collect();
                report.acknowledged_ports = state.ports.acknowledged.iter().copied().collect();
                let buckets = [
                    ("issues", &state.fuzz.issues),
                    ("will_fix", &state.fuzz.will_fix),
                    ("false_positive", &state.fuzz.false_positive),
                    ("wont_fix", &state.fuzz.wont_fix),
                ];
                for (name, urls) in buckets {
                    report.fuzz.insert(name.to_string(), urls.iter().cloned().collect());
                }
                report.acao = indexed(&|_| true);
            }
        }
        report
    }

    pub fn pending_fuzz(&self) -> &[String] {
        self.fuzz.get("issues").map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of items that still need attention
    pub fn attention_count(&self) -> usize {
        let open_issues = self.acao.iter().filter(|i| i.issue.status.is_open()).count();
        match self.view {
            ReportView::Critical => open_issues,
            _ => self.unacknowledged_ports.len() + self.pending_fuzz().len() + open_issues,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.attention_count() == 0
    }
}

pub struct ReportGenerator {
    store: Arc<dyn StateStore>,
}

impl ReportGenerator {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub async fn generate(&self, targets: &[String], view: ReportView) -> Result<Vec<TargetStatusReport>> {
        let mut reports = Vec::with_capacity(targets.len());
        for target in targets {
            let state = self.store.load(target).await?;
            debug!("Loaded state for {}: {} open ports", target, state.ports.current_open.len());
            reports.push(TargetStatusReport::build(target, &state, view));
        }
        Ok(reports)
    }

    pub fn to_json(reports: &[TargetStatusReport]) -> Result<String> {
        Ok(serde_json::to_string_pretty(reports)?)
    }

    /// Write the reports as JSON into `path`, creating parent directories.
    pub async fn write_json(reports: &[TargetStatusReport], path: &Path) -> Result<PathBuf> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ScanError::Reporting(format!("Failed to create output directory: {}", e)))?;
        }

        let json = Self::to_json(reports)?;
        fs::write(path, json)
            .await
            .map_err(|e| ScanError::Reporting(format!("Failed to write JSON report: {}", e)))?;

        info!("Wrote {} reports to {}", reports.len(), path.display());
        Ok(path.to_path_buf())
    }
}
