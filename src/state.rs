use crate::config::Config;
use crate::reconcile::acknowledge;
use crate::types::{IssueStatus, TargetState};
use crate::{Result, ScanError};
use async_trait::async_trait;
use log::{debug, error, info};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use tokio::fs;

/// Persistence for per-target documents, keyed by the raw target string.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, target: &str) -> Result<TargetState>;
    async fn save(&self, target: &str, state: &TargetState) -> Result<()>;
}

/// One pretty-printed JSON file per target, named by the MD5 of the target string.
pub struct JsonStateStore {
    dir: PathBuf,
}

impl JsonStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.state_dir())
    }

    pub fn state_file(&self, target: &str) -> PathBuf {
        let digest = md5::compute(target.as_bytes());
        self.dir.join(format!("{:x}.json", digest))
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn load(&self, target: &str) -> Result<TargetState> {
        let path = self.state_file(target);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state for {} yet ({})", target, path.display());
                return Ok(TargetState::default());
            }
            Err(e) => {
                return Err(ScanError::State(format!("Failed to read {}: {}", path.display(), e)));
            }
        };

        match serde_json::from_str(&content) {
            Ok(state) => Ok(state),
            Err(e) => {
                error!("Failed to load state {}: {}, starting from scratch", path.display(), e);
                Ok(TargetState::default())
            }
        }
    }

    async fn save(&self, target: &str, state: &TargetState) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ScanError::State(format!("Failed to create {}: {}", self.dir.display(), e)))?;

        let path = self.state_file(target);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(state)?;

        fs::write(&tmp, json)
            .await
            .map_err(|e| ScanError::State(format!("Failed to write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| ScanError::State(format!("Failed to replace {}: {}", path.display(), e)))?;

        debug!("Saved state for {} to {}", target, path.display());
        Ok(())
    }
}

/// In-process store, mostly useful for embedding and tests.
#[derive(Default)]
pub struct MemoryStateStore {
    documents: Mutex<HashMap<String, TargetState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, target: &str) -> Option<TargetState> {
        self.documents.lock().get(target).cloned()
    }

    pub fn insert(&self, target: &str, state: TargetState) {
        self.documents.lock().insert(target.to_string(), state);
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, target: &str) -> Result<TargetState> {
        Ok(self.get(target).unwrap_or_default())
    }

    async fn save(&self, target: &str, state: &TargetState) -> Result<()> {
        self.insert(target, state.clone());
        Ok(())
    }
}

fn triage_status(to: IssueStatus) -> Result<IssueStatus> {
    match to {
        IssueStatus::WillFix | IssueStatus::FalsePositive | IssueStatus::WontFix => Ok(to),
        other => Err(ScanError::InvalidInput(format!(
            "{} is not an acknowledgment status (use will_fix, false_positive or wont_fix)",
            other
        ))),
    }
}

impl TargetState {
    /// Acknowledge the configured expected ports. Returns how many were added.
    pub fn acknowledge_expected_ports(&mut self, expected: &[u16]) -> usize {
        expected
            .iter()
            .filter(|port| self.ports.acknowledged.insert(**port))
            .count()
    }

    pub fn acknowledge_port(&mut self, port: u16) -> bool {
        let added = self.ports.acknowledged.insert(port);
        if added {
            info!("Acknowledged port {}", port);
        }
        added
    }

    pub fn unacknowledged_ports(&self) -> Vec<u16> {
        self.ports
            .current_open
            .difference(&self.ports.acknowledged)
            .copied()
            .collect()
    }

    /// Exposed URLs still waiting for triage
    pub fn pending_fuzz(&self) -> Vec<String> {
        self.fuzz.issues.iter().cloned().collect()
    }

    /// Move a fuzz finding into one of the triage buckets.
    ///
    /// Pending URLs and URLs marked `will_fix` may be triaged.
    pub fn acknowledge_fuzz(&mut self, url: &str, to: IssueStatus) -> Result<()> {
        let to = triage_status(to)?;
        let fuzz = &mut self.fuzz;

        let from = if fuzz.issues.remove(url) {
            IssueStatus::Uncategorized
        } else if fuzz.will_fix.remove(url) {
            IssueStatus::WillFix
        } else if fuzz.false_positive.contains(url) {
            return Err(ScanError::InvalidTransition { from: IssueStatus::FalsePositive, to });
        } else if fuzz.wont_fix.contains(url) {
            return Err(ScanError::InvalidTransition { from: IssueStatus::WontFix, to });
        } else {
            return Err(ScanError::InvalidInput(format!("No fuzz finding {}", url)));
        };

        let bucket: &mut BTreeSet<String> = match to {
            IssueStatus::WillFix => &mut fuzz.will_fix,
            IssueStatus::FalsePositive => &mut fuzz.false_positive,
            _ => &mut fuzz.wont_fix,
        };
        bucket.insert(url.to_string());
        info!("Marked {} as {} (was {})", url, to, from);
        Ok(())
    }

    /// Triage the ACAO issue at `index` in the stored issue list.
    pub fn acknowledge_issue(&mut self, index: usize, to: IssueStatus) -> Result<()> {
        let count = self.acao.issues.len();
        let issue = self
            .acao
            .issues
            .get_mut(index)
            .ok_or_else(|| ScanError::InvalidInput(format!("No ACAO issue #{} ({} stored)", index, count)))?;

        acknowledge(issue, to)?;
        info!("Marked {} ({}) as {}", issue.url(), issue.detail, to);
        Ok(())
    }
}
