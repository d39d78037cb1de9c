//! MCH - Repeatable Network Misconfiguration Scanner
//!
//! This library probes a host for open TCP ports, exposed paths and weak
//! `Access-Control-Allow-Origin` handling, and keeps the findings in a
//! per-target document so that repeated runs only surface what changed.
//!
//! # Warning
//! Only scan hosts you own or are explicitly authorized to test.

pub mod acao;
pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod executor;
pub mod fuzz;
pub mod ports;
pub mod reconcile;
pub mod reporting;
pub mod scanner;
pub mod state;
pub mod utils;

pub use error::{Result, ScanError};

/// Common types shared by the scanners, the reconciler and the state store
pub mod types {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeSet;
    use std::fmt;
    use std::str::FromStr;

    /// A validated scan target.
    ///
    /// `raw` is kept verbatim because it keys the persisted document, while
    /// `host` is the bare hostname or IP literal used for probing.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ScanTarget {
        pub raw: String,
        pub host: String,
        pub port: Option<u16>,
    }

    impl ScanTarget {
        /// `host[:port]`, bracketing IPv6 literals.
        pub fn authority(&self) -> String {
            let host = if self.host.contains(':') {
                format!("[{}]", self.host)
            } else {
                self.host.clone()
            };
            match self.port {
                Some(port) => format!("{}:{}", host, port),
                None => host,
            }
        }

        /// The origin a browser would send for pages served by the target.
        pub fn origin(&self, scheme: Scheme) -> String {
            format!("{}://{}", scheme, self.authority())
        }
    }

    impl fmt::Display for ScanTarget {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.raw)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Scheme {
        Http,
        Https,
    }

    impl Scheme {
        pub const ALL: [Scheme; 2] = [Scheme::Http, Scheme::Https];

        pub fn as_str(&self) -> &'static str {
            match self {
                Scheme::Http => "http",
                Scheme::Https => "https",
            }
        }
    }

    impl fmt::Display for Scheme {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum IssueStatus {
        #[serde(alias = "uncategorised")]
        Uncategorized,
        #[serde(alias = "will-fix")]
        WillFix,
        #[serde(alias = "false-positive")]
        FalsePositive,
        #[serde(alias = "wont-fix")]
        WontFix,
        Resolved,
        Fixed,
    }

    impl IssueStatus {
        pub fn as_str(&self) -> &'static str {
            match self {
                IssueStatus::Uncategorized => "uncategorized",
                IssueStatus::WillFix => "will_fix",
                IssueStatus::FalsePositive => "false_positive",
                IssueStatus::WontFix => "wont_fix",
                IssueStatus::Resolved => "resolved",
                IssueStatus::Fixed => "fixed",
            }
        }

        /// Statuses that still need attention from a human.
        pub fn is_open(&self) -> bool {
            matches!(self, IssueStatus::Uncategorized | IssueStatus::WillFix)
        }
    }

    impl fmt::Display for IssueStatus {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    impl FromStr for IssueStatus {
        type Err = crate::ScanError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
                "uncategorized" => Ok(IssueStatus::Uncategorized),
                "will_fix" => Ok(IssueStatus::WillFix),
                "false_positive" => Ok(IssueStatus::FalsePositive),
                "wont_fix" => Ok(IssueStatus::WontFix),
                "resolved" => Ok(IssueStatus::Resolved),
                "fixed" => Ok(IssueStatus::Fixed),
                other => Err(crate::ScanError::InvalidInput(format!("Unknown issue status: {}", other))),
            }
        }
    }

    /// Kind of weak cross-origin policy detected on an endpoint
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum AcaoCategory {
        Arbitrary,
        LeakedIp,
        LeakedDomain,
        #[serde(alias = "broad-reflection")]
        BroadReflection,
    }

    impl AcaoCategory {
        pub fn as_str(&self) -> &'static str {
            match self {
                AcaoCategory::Arbitrary => "arbitrary",
                AcaoCategory::LeakedIp => "leaked_ip",
                AcaoCategory::LeakedDomain => "leaked_domain",
                AcaoCategory::BroadReflection => "broad_reflection",
            }
        }
    }

    impl fmt::Display for AcaoCategory {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    /// Identity of an ACAO issue. Two issues with equal keys are the same issue.
    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    pub struct IssueKey {
        pub scheme: Scheme,
        pub hostname: String,
        pub endpoint: String,
        pub category: AcaoCategory,
        pub detail: String,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Issue {
        pub scheme: Scheme,
        pub hostname: String,
        pub endpoint: String,
        #[serde(alias = "weak_type")]
        pub category: AcaoCategory,
        #[serde(default)]
        pub detail: String,
        pub status: IssueStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub first_seen: Option<DateTime<Utc>>,
    }

    impl Issue {
        pub fn new(key: IssueKey, first_seen: DateTime<Utc>) -> Self {
            Self {
                scheme: key.scheme,
                hostname: key.hostname,
                endpoint: key.endpoint,
                category: key.category,
                detail: key.detail,
                status: IssueStatus::Uncategorized,
                first_seen: Some(first_seen),
            }
        }

        pub fn key(&self) -> IssueKey {
            IssueKey {
                scheme: self.scheme,
                hostname: self.hostname.clone(),
                endpoint: self.endpoint.clone(),
                category: self.category,
                detail: self.detail.clone(),
            }
        }

        pub fn url(&self) -> String {
            format!("{}://{}{}", self.scheme, self.hostname, self.endpoint)
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct PortRecord {
        pub current_open: BTreeSet<u16>,
        pub acknowledged: BTreeSet<u16>,
    }

    /// Exposed URLs, partitioned by acknowledgment. The four sets are disjoint.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct FuzzRecord {
        pub issues: BTreeSet<String>,
        pub will_fix: BTreeSet<String>,
        pub false_positive: BTreeSet<String>,
        pub wont_fix: BTreeSet<String>,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct AcaoRecord {
        pub issues: Vec<Issue>,
    }

    /// Everything persisted for a single target
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct TargetState {
        pub ports: PortRecord,
        pub fuzz: FuzzRecord,
        pub acao: AcaoRecord,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub last_scan: Option<DateTime<Utc>>,
    }
}
