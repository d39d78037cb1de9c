//! Cross-origin (`Access-Control-Allow-Origin`) misconfiguration scanner.
//!
//! Every endpoint is probed with three kinds of `Origin` header: the
//! target's own origin, a fixed foreign origin, and a set of templated
//! look-alike origins. Each whitespace separated value of the returned
//! header is classified on its own by [`classify`]. Values that merely look
//! like a domain need one more request with a crafted origin before they
//! are reported as a broad reflection, see [`confirms_reflection`].

use crate::config::Config;
use crate::executor::{ProbeExecutor, ProgressCounter, RetryPolicy};
use crate::reconcile::{reconcile, ReconcilePolicy};
use crate::scanner::{ScanKind, ScanSummary, Scanner, SharedState};
use crate::types::{AcaoCategory, IssueKey, ScanTarget, Scheme};
use crate::utils::{http, time};
use crate::{Result, ScanError};
use async_trait::async_trait;
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use reqwest::header::{ACCESS_CONTROL_ALLOW_ORIGIN, ORIGIN};
use reqwest::Client;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use url::Url;

lazy_static! {
    static ref IPV4_RE: Regex = Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("ipv4 pattern");
}

/// Placeholder replaced by the target host in malicious origin templates
pub const DOMAIN_PLACEHOLDER: &str = "{domain}";

/// Outcome of classifying one returned header value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Finding { category: AcaoCategory, detail: String },
    /// Domain-like value, reported only if a crafted origin is reflected too
    Confirm(Confirmation),
    Discard,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Confirmation {
    pub candidate: String,
    pub candidate_host: String,
    pub crafted_origin: String,
}

/// Valid IPv4 literals appearing anywhere in `text`.
pub fn extract_ipv4(text: &str) -> Vec<Ipv4Addr> {
    IPV4_RE
        .find_iter(text)
        .filter_map(|m| m.as_str().parse::<Ipv4Addr>().ok())
        .collect()
}

/// Hostname of an absolute URL, lowercased, without IPv6 brackets.
fn url_host(value: &str) -> Option<String> {
    let url = Url::parse(value).ok()?;
    let host = url.host_str()?;
    Some(host.trim_start_matches('[').trim_end_matches(']').to_lowercase())
}

/// Classify one allow-origin value returned for a probe sent with `probed_origin`.
///
/// `own_origin` is set only for the probe carrying the target's own origin;
/// a templated origin that happens to name the target host is not one.
/// Rules are tried in order and the first match wins.
pub fn classify(probed_origin: &str, own_origin: bool, candidate: &str, target_host: &str) -> Verdict {
    let target_host = target_host.to_lowercase();
    let candidate_host = url_host(candidate);

    if candidate_host.as_deref() == Some(target_host.as_str()) {
        return Verdict::Discard;
    }

    if own_origin {
        let allowed = [
            target_host.clone(),
            format!("http://{}", target_host),
            format!("https://{}", target_host),
        ];
        if allowed.iter().any(|a| a == candidate) {
            return Verdict::Discard;
        }
        let category = if extract_ipv4(candidate).is_empty() {
            AcaoCategory::LeakedDomain
        } else {
            AcaoCategory::LeakedIp
        };
        return Verdict::Finding {
            category,
            detail: candidate.to_string(),
        };
    }

    if candidate == probed_origin {
        return Verdict::Finding {
            category: AcaoCategory::Arbitrary,
            detail: candidate.to_string(),
        };
    }

    let host = candidate_host.unwrap_or_else(|| candidate.to_string());
    if host.contains('.') {
        return Verdict::Confirm(Confirmation {
            candidate: candidate.to_string(),
            crafted_origin: format!("http://evil-{}", host),
            candidate_host: host,
        });
    }

    Verdict::Discard
}

/// Decide a pending confirmation from the values returned for the crafted origin.
pub fn confirms_reflection(confirmation: &Confirmation, values: &[String]) -> Option<(AcaoCategory, String)> {
    let reflected = values.iter().any(|v| {
        v.contains(&confirmation.crafted_origin) || v.contains(&confirmation.candidate_host)
    });
    reflected.then(|| {
        (
            AcaoCategory::BroadReflection,
            format!("{} (vulnerable to {})", confirmation.candidate, confirmation.crafted_origin),
        )
    })
}

/// One header-only request: which endpoint, over which scheme, with which `Origin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginProbe {
    pub scheme: Scheme,
    pub endpoint: String,
    pub origin: String,
    pub own_origin: bool,
}

pub struct AcaoScanner {
    endpoints: Vec<String>,
    malicious_origins: Vec<String>,
    arbitrary_origin: String,
    policy: ReconcilePolicy,
    client: Client,
    executor: ProbeExecutor,
}

impl AcaoScanner {
    pub fn new(config: &Config) -> Result<Self> {
        if config.acao.endpoints.is_empty() {
            return Err(ScanError::InvalidInput("acao.endpoints must not be empty".to_string()));
        }
        Ok(Self {
            endpoints: config.acao.endpoints.clone(),
            malicious_origins: config.acao.malicious_origins.clone(),
            arbitrary_origin: config.acao.arbitrary_origin.clone(),
            policy: config.acao.policy,
            client: http::build_client(config.acao_timeout())?,
            executor: ProbeExecutor::new(config.acao.concurrency, RetryPolicy::from_config(&config.retry)),
        })
    }

    pub fn get_progress(&self) -> String {
        self.executor.progress().get_progress()
    }

    /// Foreign origins to send: the arbitrary origin, then every malicious template.
    pub fn foreign_origins(&self, target: &ScanTarget) -> Vec<String> {
        std::iter::once(self.arbitrary_origin.clone())
            .chain(
                self.malicious_origins
                    .iter()
                    .map(|template| template.replace(DOMAIN_PLACEHOLDER, &target.host)),
            )
            .collect()
    }

    /// Own origin first, then the foreign ones, for every scheme and endpoint.
    pub fn plan(&self, target: &ScanTarget, schemes: &[Scheme]) -> Vec<OriginProbe> {
        let foreign = self.foreign_origins(target);
        let mut probes = Vec::new();
        for scheme in schemes {
            for endpoint in &self.endpoints {
                probes.push(OriginProbe {
                    scheme: *scheme,
                    endpoint: endpoint.clone(),
                    origin: target.origin(*scheme),
                    own_origin: true,
                });
                probes.extend(foreign.iter().map(|origin| OriginProbe {
                    scheme: *scheme,
                    endpoint: endpoint.clone(),
                    origin: origin.clone(),
                    own_origin: false,
                }));
            }
        }
        probes
    }

    /// Send a HEAD request with the probe's `Origin` and split the allow header into candidates.
    async fn allowed_origins(&self, target: &ScanTarget, probe: &OriginProbe) -> Result<Vec<String>> {
        let base = Url::parse(&target.origin(probe.scheme))
            .map_err(|e| ScanError::InvalidInput(format!("Bad base URL for {}: {}", target, e)))?;
        let url = base
            .join(&probe.endpoint)
            .map_err(|e| ScanError::InvalidInput(format!("Bad endpoint {}: {}", probe.endpoint, e)))?;

        debug!("HEAD {} with Origin: {}", url, probe.origin);
        let response = self
            .client
            .head(url)
            .header(ORIGIN, probe.origin.as_str())
            .send()
            .await?;
        let response = http::reject_rate_limit(response)?;

        let values = response
            .headers()
            .get_all(ACCESS_CONTROL_ALLOW_ORIGIN)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(str::split_whitespace)
            .map(str::to_string)
            .collect();
        Ok(values)
    }

    /// Probe every viable scheme and endpoint and return the distinct findings.
    pub async fn detect(&self, target: &ScanTarget) -> Result<Vec<IssueKey>> {
        let schemes = http::viable_schemes(&self.client, target, self.executor.retry_policy()).await;
        let probes = self.plan(target, &schemes);
        let progress = self.executor.progress();
        progress.reset(probes.len() as u64);

        let results = self
            .executor
            .run_all(&probes, |probe| {
                let probe = probe.clone();
                async move { self.allowed_origins(target, &probe).await }
            })
            .await;

        let mut detected = Detected::default();
        let mut pending: Vec<(OriginProbe, Confirmation)> = Vec::new();
        let mut pending_seen = HashSet::new();

        for (probe, result) in probes.iter().zip(results) {
            let values = match result {
                Ok(values) => values,
                Err(e) => {
                    debug!("No answer from {}{} with origin {}: {}", probe.scheme, probe.endpoint, probe.origin, e);
                    continue;
                }
            };

            for candidate in &values {
                match classify(&probe.origin, probe.own_origin, candidate, &target.host) {
                    Verdict::Finding { category, detail } => {
                        detected.push(target, probe, category, detail);
                    }
                    Verdict::Confirm(confirmation) => {
                        let dedup = (probe.scheme, probe.endpoint.clone(), confirmation.clone());
                        if pending_seen.insert(dedup) {
                            pending.push((probe.clone(), confirmation));
                        }
                    }
                    Verdict::Discard => {}
                }
            }
        }

        if !pending.is_empty() {
            progress.add_total(pending.len() as u64);
            let confirmations = self
                .executor
                .run_all(&pending, |(probe, confirmation)| {
                    let crafted = OriginProbe {
                        scheme: probe.scheme,
                        endpoint: probe.endpoint.clone(),
                        origin: confirmation.crafted_origin.clone(),
                        own_origin: false,
                    };
                    async move { self.allowed_origins(target, &crafted).await }
                })
                .await;

            for ((probe, confirmation), result) in pending.iter().zip(confirmations) {
                let values = result.unwrap_or_default();
                if let Some((category, detail)) = confirms_reflection(confirmation, &values) {
                    detected.push(target, probe, category, detail);
                } else {
                    debug!("{} was not reflected, discarding {}", confirmation.crafted_origin, confirmation.candidate);
                }
            }
        }

        if detected.keys.is_empty() {
            info!("No acao issues found on {}", target);
        }
        Ok(detected.keys)
    }
}

/// Findings in discovery order, without duplicate identities
#[derive(Default)]
struct Detected {
    keys: Vec<IssueKey>,
    seen: HashSet<IssueKey>,
}

impl Detected {
    fn push(&mut self, target: &ScanTarget, probe: &OriginProbe, category: AcaoCategory, detail: String) {
        let key = IssueKey {
            scheme: probe.scheme,
            hostname: target.host.clone(),
            endpoint: probe.endpoint.clone(),
            category,
            detail,
        };
        if self.seen.insert(key.clone()) {
            warn!(
                "ACAO issue ({}) on {}://{}{}: {}",
                key.category, key.scheme, key.hostname, key.endpoint, key.detail
            );
            self.keys.push(key);
        }
    }
}

#[async_trait]
impl Scanner for AcaoScanner {
    fn kind(&self) -> ScanKind {
        ScanKind::Acao
    }

    fn progress(&self) -> Arc<ProgressCounter> {
        self.executor.progress()
    }

    async fn scan(&self, target: &ScanTarget, state: &SharedState) -> Result<ScanSummary> {
        let detected = self.detect(target).await?;

        let mut document = state.lock().await;
        let outcome = reconcile(&document.acao.issues, &detected, self.policy, time::now_utc());
        document.acao.issues = outcome.issues.clone();
        drop(document);

        let open = outcome
            .issues
            .into_iter()
            .filter(|issue| issue.status.is_open() && detected.contains(&issue.key()))
            .collect();

        Ok(ScanSummary::Acao {
            open,
            new: outcome.new.len(),
            regressions: outcome.regressions.len(),
            resolved: outcome.resolved.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_origin_leaks_domain() {
        assert_eq!(
            classify("http://example.com", true, "http://evil.com", "example.com"),
            Verdict::Finding {
                category: AcaoCategory::LeakedDomain,
                detail: "http://evil.com".to_string()
            }
        );
    }

    #[test]
    fn test_own_origin_leaks_ip() {
        assert_eq!(
            classify("https://example.com", true, "http://10.0.0.12:8080", "example.com"),
            Verdict::Finding {
                category: AcaoCategory::LeakedIp,
                detail: "http://10.0.0.12:8080".to_string()
            }
        );
        // 999.1.1.1 matches the pattern but is not an address
        assert_eq!(
            classify("https://example.com", true, "http://999.1.1.1.example.net", "example.com"),
            Verdict::Finding {
                category: AcaoCategory::LeakedDomain,
                detail: "http://999.1.1.1.example.net".to_string()
            }
        );
    }

    #[test]
    fn test_own_host_and_allowed_forms_are_skipped() {
        assert_eq!(classify("http://example.com", true, "https://EXAMPLE.com", "example.com"), Verdict::Discard);
        assert_eq!(classify("http://example.com", true, "example.com", "example.com"), Verdict::Discard);
        assert_eq!(classify("http://evil.com", false, "https://example.com:8443", "example.com"), Verdict::Discard);
    }

    #[test]
    fn test_wildcard_for_own_origin_is_reported_as_leak() {
        assert_eq!(
            classify("http://example.com", true, "*", "example.com"),
            Verdict::Finding {
                category: AcaoCategory::LeakedDomain,
                detail: "*".to_string()
            }
        );
        assert_eq!(classify("http://evil.com", false, "*", "example.com"), Verdict::Discard);
    }

    #[test]
    fn test_exact_reflection_is_arbitrary() {
        assert_eq!(
            classify("http://evil.com", false, "http://evil.com", "example.com"),
            Verdict::Finding {
                category: AcaoCategory::Arbitrary,
                detail: "http://evil.com".to_string()
            }
        );
    }

    #[test]
    fn test_domain_like_value_needs_confirmation() {
        let verdict = classify("http://malicious-example.com", false, "https://partner.org", "example.com");
        assert_eq!(
            verdict,
            Verdict::Confirm(Confirmation {
                candidate: "https://partner.org".to_string(),
                candidate_host: "partner.org".to_string(),
                crafted_origin: "http://evil-partner.org".to_string(),
            })
        );
        assert_eq!(classify("http://evil.com", false, "null", "example.com"), Verdict::Discard);
    }

    #[test]
    fn test_confirmation() {
        let confirmation = Confirmation {
            candidate: "https://partner.org".to_string(),
            candidate_host: "partner.org".to_string(),
            crafted_origin: "http://evil-partner.org".to_string(),
        };

        assert_eq!(
            confirms_reflection(&confirmation, &["http://evil-partner.org".to_string()]),
            Some((
                AcaoCategory::BroadReflection,
                "https://partner.org (vulnerable to http://evil-partner.org)".to_string()
            ))
        );
        assert_eq!(confirms_reflection(&confirmation, &[]), None);
        assert_eq!(confirms_reflection(&confirmation, &["https://other.net".to_string()]), None);
    }

    #[test]
    fn test_template_naming_target_is_not_own_origin() {
        // e.g. a `https://{domain}` template
        assert_eq!(
            classify("https://example.com", false, "http://evil.com", "example.com"),
            Verdict::Confirm(Confirmation {
                candidate: "http://evil.com".to_string(),
                candidate_host: "evil.com".to_string(),
                crafted_origin: "http://evil-evil.com".to_string(),
            })
        );
        assert_eq!(
            classify("https://example.com", false, "https://example.com", "example.com"),
            Verdict::Discard
        );
    }

    fn scanner(templates: &[&str]) -> AcaoScanner {
        let mut config = Config::default();
        config.acao.endpoints = vec!["/".to_string(), "/api".to_string()];
        config.acao.malicious_origins = templates.iter().map(|t| t.to_string()).collect();
        AcaoScanner::new(&config).unwrap()
    }

    #[test]
    fn test_plan_flags_only_the_own_origin() {
        let target = crate::utils::target::validate_target("example.com").unwrap();
        let probes = scanner(&["http://{domain}", "http://malicious-{domain}"]).plan(&target, &[Scheme::Http]);

        assert_eq!(probes.len(), 2 * 4);
        let own: Vec<&OriginProbe> = probes.iter().filter(|p| p.own_origin).collect();
        assert_eq!(own.len(), 2);
        assert!(own.iter().all(|p| p.origin == "http://example.com"));
        // same text as the own origin, still a foreign probe
        assert!(probes
            .iter()
            .any(|p| !p.own_origin && p.origin == "http://example.com" && p.endpoint == "/api"));
        assert!(probes.iter().any(|p| p.origin == "http://malicious-example.com"));
    }

    #[test]
    fn test_extract_ipv4() {
        assert_eq!(
            extract_ipv4("http://192.168.0.1 and 300.1.1.1"),
            vec![Ipv4Addr::new(192, 168, 0, 1)]
        );
    }
}
