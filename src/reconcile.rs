//! Issue lifecycle.
//!
//! [`reconcile`] folds one run's detections into the persisted issue list.
//! Each prior issue is visited exactly once and its next status comes from
//! [`transition`]; identities seen for the first time are appended as
//! `uncategorized`. [`acknowledge`] applies the human-driven transitions.

use crate::types::{Issue, IssueKey, IssueStatus};
use crate::{Result, ScanError};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// What happens to issues that are no longer detected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePolicy {
    /// Move them to `resolved`, keeping the full history
    #[default]
    Resolve,
    /// Legacy behaviour: drop `uncategorized` issues, mark `wont_fix` as `fixed`
    Delete,
}

/// Effect of one reconciliation on a single prior issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Keep,
    /// Still present although a human closed it; status is left alone
    Persisting,
    /// Closed issue came back, reopened as `uncategorized`
    Reopen,
    Resolve,
    MarkFixed,
    Remove,
}

pub fn transition(status: IssueStatus, redetected: bool, policy: ReconcilePolicy) -> Transition {
    use IssueStatus::*;

    match (status, redetected) {
        (Uncategorized | WillFix, true) => Transition::Keep,
        (FalsePositive | WontFix, true) => Transition::Persisting,
        (Resolved | Fixed, true) => Transition::Reopen,
        (FalsePositive, false) => Transition::Keep,
        (Resolved | Fixed, false) => Transition::Keep,
        (Uncategorized, false) => match policy {
            ReconcilePolicy::Resolve => Transition::Resolve,
            ReconcilePolicy::Delete => Transition::Remove,
        },
        (WillFix, false) => match policy {
            ReconcilePolicy::Resolve => Transition::Resolve,
            ReconcilePolicy::Delete => Transition::Keep,
        },
        (WontFix, false) => match policy {
            ReconcilePolicy::Resolve => Transition::Resolve,
            ReconcilePolicy::Delete => Transition::MarkFixed,
        },
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub issues: Vec<Issue>,
    pub new: Vec<IssueKey>,
    /// Re-detected issues that had been closed, whether reopened or not
    pub regressions: Vec<IssueKey>,
    pub resolved: Vec<IssueKey>,
    pub removed: Vec<IssueKey>,
}

/// Merge `detected` identities into `prior` issues.
///
/// Prior order is preserved and new issues are appended in detection
/// order. Duplicate identities on either side collapse to their first
/// occurrence.
pub fn reconcile(
    prior: &[Issue],
    detected: &[IssueKey],
    policy: ReconcilePolicy,
    now: DateTime<Utc>,
) -> Reconciliation {
    let detected_set: HashSet<&IssueKey> = detected.iter().collect();
    let mut known: HashSet<IssueKey> = HashSet::with_capacity(prior.len());
    let mut outcome = Reconciliation::default();

    for issue in prior {
        let key = issue.key();
        if !known.insert(key.clone()) {
            debug!("Dropping duplicate stored issue {:?}", key);
            continue;
        }

        let mut issue = issue.clone();
        match transition(issue.status, detected_set.contains(&key), policy) {
            Transition::Keep => {}
            Transition::Persisting => {
                warn!(
                    "Issue marked {} is still present: {} {} ({})",
                    issue.status,
                    issue.url(),
                    issue.category,
                    issue.detail
                );
                outcome.regressions.push(key);
            }
            Transition::Reopen => {
                warn!(
                    "Previously {} issue re-detected: {} {} ({})",
                    issue.status,
                    issue.url(),
                    issue.category,
                    issue.detail
                );
                issue.status = IssueStatus::Uncategorized;
                outcome.regressions.push(key);
            }
            Transition::Resolve => {
                debug!("Marking {} ({}) as resolved", issue.url(), issue.detail);
                issue.status = IssueStatus::Resolved;
                outcome.resolved.push(key);
            }
            Transition::MarkFixed => {
                issue.status = IssueStatus::Fixed;
                outcome.resolved.push(key);
            }
            Transition::Remove => {
                debug!("Removing {} ({})", issue.url(), issue.detail);
                outcome.removed.push(key);
                continue;
            }
        }
        outcome.issues.push(issue);
    }

    for key in detected {
        if known.insert(key.clone()) {
            info!("New issue {} on {}://{}{}: {}", key.category, key.scheme, key.hostname, key.endpoint, key.detail);
            outcome.new.push(key.clone());
            outcome.issues.push(Issue::new(key.clone(), now));
        }
    }

    outcome
}

/// Human triage: only open issues can be moved, and only to a triage status.
pub fn acknowledge(issue: &mut Issue, to: IssueStatus) -> Result<()> {
    let target_allowed = matches!(to, IssueStatus::WillFix | IssueStatus::FalsePositive | IssueStatus::WontFix);
    if !issue.status.is_open() || !target_allowed {
        return Err(ScanError::InvalidTransition {
            from: issue.status,
            to,
        });
    }
    issue.status = to;
    Ok(())
}
