use crate::config::Config;
use crate::executor::{ProbeExecutor, ProgressCounter, RetryPolicy};
use crate::scanner::{ScanKind, ScanSummary, Scanner, SharedState};
use crate::types::{FuzzRecord, ScanTarget, Scheme};
use crate::utils::{http, wordlist};
use crate::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;

const FOUND_STATUSES: [StatusCode; 3] = [StatusCode::OK, StatusCode::MOVED_PERMANENTLY, StatusCode::FOUND];

/// A 200 page that is really a "not found" page in disguise
pub fn is_soft_404(body: &str) -> bool {
    let body = body.to_lowercase();
    body.contains("404") || body.contains("not found")
}

/// Every path to try: each word bare, then with each extension.
pub fn candidate_paths(words: &[String], extensions: &[String]) -> Vec<String> {
    let suffixes: Vec<&str> = std::iter::once("").chain(extensions.iter().map(String::as_str)).collect();
    words
        .iter()
        .flat_map(|word| {
            let word = word.trim_start_matches('/');
            suffixes.iter().map(move |ext| format!("/{}{}", word, ext))
        })
        .collect()
}

/// Union `found` into the record, skipping URLs a human already triaged.
///
/// Returns the URLs that were not known before.
pub fn merge_findings(record: &mut FuzzRecord, found: &[String]) -> Vec<String> {
    let mut added = Vec::new();
    for url in found {
        let triaged = record.will_fix.contains(url)
            || record.false_positive.contains(url)
            || record.wont_fix.contains(url);
        if !triaged && record.issues.insert(url.clone()) {
            added.push(url.clone());
        }
    }
    added
}

pub struct DirectoryFuzzer {
    wordlists: Vec<String>,
    extensions: Vec<String>,
    delay: Duration,
    client: Client,
    executor: ProbeExecutor,
}

impl DirectoryFuzzer {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            wordlists: config.fuzz.wordlist.clone(),
            extensions: config.fuzz.extensions.clone(),
            delay: config.fuzz_delay(),
            client: http::build_client(config.fuzz_timeout())?,
            executor: ProbeExecutor::new(config.fuzz.concurrency, RetryPolicy::from_config(&config.retry)),
        })
    }

    pub fn get_progress(&self) -> String {
        self.executor.progress().get_progress()
    }

    async fn probe_path(&self, url: String) -> Result<Option<StatusCode>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let response = http::reject_rate_limit(self.client.get(&url).send().await?)?;
        let status = response.status();
        if !FOUND_STATUSES.contains(&status) {
            return Ok(None);
        }

        if status == StatusCode::OK {
            let body = response.text().await?;
            if is_soft_404(&body) {
                debug!("Ignoring soft 404 at {}", url);
                return Ok(None);
            }
        }
        Ok(Some(status))
    }

    /// Enumerate paths on every viable scheme and return the exposed URLs.
    pub async fn fuzz_target(&self, target: &ScanTarget) -> Result<Vec<String>> {
        let words = wordlist::load_wordlists(&self.wordlists).await?;
        let paths = candidate_paths(&words, &self.extensions);

        let schemes = http::viable_schemes(&self.client, target, self.executor.retry_policy()).await;
        self.executor.progress().reset((paths.len() * schemes.len()) as u64);

        let mut found = Vec::new();
        for scheme in schemes {
            found.extend(self.fuzz_scheme(target, scheme, &paths).await);
        }

        if found.is_empty() {
            info!("No exposed files/dirs on {}", target);
        }
        Ok(found)
    }

    async fn fuzz_scheme(&self, target: &ScanTarget, scheme: Scheme, paths: &[String]) -> Vec<String> {
        let base = target.origin(scheme);
        info!("Fuzzing {} paths on {}", paths.len(), base);

        let base_ref = base.as_str();
        let results = self
            .executor
            .run_all(paths, |path| {
                let url = format!("{}{}", base_ref, path);
                self.probe_path(url)
            })
            .await;

        let mut found = Vec::new();
        for (path, result) in paths.iter().zip(results) {
            match result {
                Ok(Some(status)) => {
                    let url = format!("{}{}", base, path);
                    warn!("Exposed file/dir on {} (code: {})", url, status.as_u16());
                    found.push(url);
                }
                Ok(None) => {}
                Err(e) => debug!("Error fuzzing {}{}: {}", base, path, e),
            }
        }
        found
    }
}

#[async_trait]
impl Scanner for DirectoryFuzzer {
    fn kind(&self) -> ScanKind {
        ScanKind::Fuzz
    }

    fn progress(&self) -> Arc<ProgressCounter> {
        self.executor.progress()
    }

    async fn scan(&self, target: &ScanTarget, state: &SharedState) -> Result<ScanSummary> {
        let found = self.fuzz_target(target).await?;

        let added = merge_findings(&mut state.lock().await.fuzz, &found);
        debug!("{} of {} findings on {} are new", added.len(), found.len(), target);
        Ok(ScanSummary::Fuzz { found, added })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_soft_404_detection() {
        assert!(is_soft_404("<h1>Page Not Found</h1>"));
        assert!(is_soft_404("Error 404"));
        assert!(is_soft_404("NOT FOUND"));
        assert!(!is_soft_404("<h1>Admin panel</h1>"));
    }

    #[test]
    fn test_candidate_paths() {
        let words = vec!["admin".to_string(), "/backup".to_string()];
        let exts = vec![".bak".to_string()];
        assert_eq!(
            candidate_paths(&words, &exts),
            vec!["/admin", "/admin.bak", "/backup", "/backup.bak"]
        );
        assert_eq!(candidate_paths(&words, &[]), vec!["/admin", "/backup"]);
    }

    #[test]
    fn test_merge_is_union_and_respects_triage() {
        let mut record = FuzzRecord {
            issues: BTreeSet::from(["http://h/old".to_string()]),
            false_positive: BTreeSet::from(["http://h/fp".to_string()]),
            ..Default::default()
        };

        let added = merge_findings(
            &mut record,
            &["http://h/new".to_string(), "http://h/fp".to_string(), "http://h/new".to_string()],
        );

        assert_eq!(added, vec!["http://h/new"]);
        assert!(record.issues.contains("http://h/old"));
        assert!(record.issues.contains("http://h/new"));
        assert!(!record.issues.contains("http://h/fp"));
    }
}
