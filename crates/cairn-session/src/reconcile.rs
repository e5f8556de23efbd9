//! Breakpoint reconciliation between the local book and a backend
//!
//! [`plan`] is pure: it partitions the local set L and the backend set R
//! into `synced = L ∩ R`, `to_add = L \ R` and `to_remove = R \ L`, matching
//! entries one-to-one by [`Breakpoint::is_equivalent`]. [`resync`] applies a
//! plan against a backend.

use cairn_core::{collapse_duplicates, Breakpoint, Error};
use cairn_ports::DebugBackend;
use futures::future::join_all;
use tracing::{debug, info, warn};

/// A local breakpoint paired with the backend breakpoint it matched.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncedPair {
    pub local: Breakpoint,
    pub remote: Breakpoint,
}

impl SyncedPair {
    /// The local settings with the backend's id and bound location.
    pub fn merged(&self) -> Breakpoint {
        Breakpoint {
            id: self.remote.id,
            actual: self.remote.actual.clone().or_else(|| self.local.actual.clone()),
            error: None,
            ..self.local.clone()
        }
    }

    /// The backend holds different enabled state or ignore count.
    pub fn needs_change(&self) -> bool {
        self.local.enabled != self.remote.enabled
            || self.local.effective_ignore_count() != self.remote.effective_ignore_count()
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ResyncPlan {
    pub synced: Vec<SyncedPair>,
    pub to_add: Vec<Breakpoint>,
    pub to_remove: Vec<Breakpoint>,
}

/// Partition `local` against `remote`. Hidden local breakpoints are
/// excluded and local duplicates collapsed first.
pub fn plan(local: Vec<Breakpoint>, remote: Vec<Breakpoint>) -> ResyncPlan {
    let local = collapse_duplicates(local.into_iter().filter(|bp| !bp.hidden).collect());
    let mut unmatched: Vec<Option<Breakpoint>> = remote.into_iter().map(Some).collect();
    let mut result = ResyncPlan::default();

    for bp in local {
        let matched = unmatched
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|remote| bp.is_equivalent(remote)))
            .and_then(Option::take);
        match matched {
            Some(remote) => result.synced.push(SyncedPair { local: bp, remote }),
            None => result.to_add.push(bp),
        }
    }
    result.to_remove = unmatched.into_iter().flatten().collect();
    result
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ResyncOutcome {
    /// `synced ∪ added ∪ failed removals`.
    pub authoritative: Vec<Breakpoint>,
    /// Local breakpoints the backend refused, with `error` set.
    pub failed_adds: Vec<Breakpoint>,
    /// Backend breakpoints that could not be removed.
    pub failed_removals: Vec<Breakpoint>,
}

impl ResyncOutcome {
    /// What the book should hold afterwards: the authoritative set followed
    /// by the unresolved failed adds.
    pub fn book(&self) -> Vec<Breakpoint> {
        self.authoritative
            .iter()
            .chain(&self.failed_adds)
            .cloned()
            .collect()
    }
}

/// Reconcile `local` with `remote` on `backend`.
///
/// Adds are issued concurrently and failures are collected, not retried.
/// Removals follow. Synced pairs whose enabled state or ignore count drifted
/// are changed in place.
pub async fn resync(
    backend: &dyn DebugBackend,
    local: Vec<Breakpoint>,
    remote: Vec<Breakpoint>,
) -> ResyncOutcome {
    let ResyncPlan {
        synced,
        to_add,
        to_remove,
    } = plan(local, remote);
    info!(
        synced = synced.len(),
        add = to_add.len(),
        remove = to_remove.len(),
        backend = backend.name(),
        "Reconciling breakpoints"
    );

    let mut outcome = ResyncOutcome::default();

    let adds = join_all(to_add.iter().map(|bp| backend.set_breakpoint(bp))).await;
    let mut added = Vec::new();
    for (requested, result) in to_add.into_iter().zip(adds) {
        match result {
            Ok(created) => added.push(Breakpoint {
                condition: requested.condition.clone(),
                ignore_count: requested.ignore_count,
                enabled: requested.enabled,
                ..created
            }),
            Err(e) => {
                warn!(path = %requested.path, line = requested.line, "Breakpoint not set: {}", e);
                outcome.failed_adds.push(failed(requested, e));
            }
        }
    }

    for bp in to_remove {
        if let Err(e) = backend.clear_breakpoint(&bp).await {
            warn!(id = ?bp.id, "Breakpoint not removed: {}", e);
            outcome.failed_removals.push(bp);
        }
    }

    for pair in synced {
        let merged = pair.merged();
        if pair.needs_change() {
            match backend.change_breakpoint(&merged).await {
                Ok(_) => debug!(id = ?merged.id, "Adjusted synced breakpoint"),
                Err(e) => warn!(id = ?merged.id, "Breakpoint settings not applied: {}", e),
            }
        }
        outcome.authoritative.push(merged);
    }
    outcome.authoritative.extend(added);
    outcome
        .authoritative
        .extend(outcome.failed_removals.iter().cloned());
    outcome
}

fn failed(mut bp: Breakpoint, error: Error) -> Breakpoint {
    bp.id = None;
    bp.actual = None;
    bp.error = Some(match error {
        Error::BreakpointResolutionFailed { reason, .. } => reason,
        other => other.to_string(),
    });
    bp
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_testing::MockBackend;

    #[test]
    fn test_plan_partitions_one_to_one() {
        let local = vec![
            Breakpoint::new("/a.js", 5),
            Breakpoint::new("/a.js", 5).with_condition("x"),
            Breakpoint::new("/b.js", 10),
        ];
        let remote = vec![
            Breakpoint::new("/a.js", 5).with_id(1).with_condition("x"),
            Breakpoint::new("/a.js", 5).with_id(2).with_condition("x"),
            Breakpoint::new("/c.js", 20).with_id(3),
        ];

        let plan = plan(local, remote);
        // the two local /a.js:5 entries collapse into one carrying "x"
        assert_eq!(plan.synced.len(), 1);
        assert_eq!(plan.synced[0].remote.id, Some(1));
        assert_eq!(plan.to_add.len(), 1);
        assert_eq!(plan.to_add[0].path, "/b.js");
        let removed: Vec<_> = plan.to_remove.iter().map(|bp| bp.id).collect();
        assert_eq!(removed, vec![Some(2), Some(3)]);
    }

    #[test]
    fn test_plan_ignores_hidden_local() {
        let plan = plan(vec![Breakpoint::new("/a.js", 1).hidden()], Vec::new());
        assert!(plan.to_add.is_empty());
    }

    #[test]
    fn test_condition_difference_is_not_equivalent() {
        let plan = plan(
            vec![Breakpoint::new("/a.js", 5).with_condition("x > 1")],
            vec![Breakpoint::new("/a.js", 5).with_id(4)],
        );
        assert!(plan.synced.is_empty());
        assert_eq!(plan.to_add.len(), 1);
        assert_eq!(plan.to_remove.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_removal_stays_authoritative() {
        let remote = vec![
            Breakpoint::new("/c.js", 20).with_id(7),
            Breakpoint::new("/d.js", 2).with_id(8),
        ];
        let backend = MockBackend::new().with_remote(remote.clone());
        backend.fail_clear(7, Error::Backend("busy".to_string()));

        let outcome = resync(&backend, vec![Breakpoint::new("/a.js", 1)], remote).await;

        let ids = |list: &[Breakpoint]| list.iter().map(|bp| bp.id).collect::<Vec<_>>();
        assert_eq!(ids(&outcome.failed_removals), vec![Some(7)]);
        assert!(outcome.authoritative.iter().any(|bp| bp.id == Some(7)));
        assert!(outcome.authoritative.iter().all(|bp| bp.id != Some(8)));
        assert!(outcome.book().iter().any(|bp| bp.path == "/c.js"));
        let remaining = ids(&backend.remote_breakpoints());
        assert!(remaining.contains(&Some(7)));
        assert!(!remaining.contains(&Some(8)));
    }

    #[test]
    fn test_merged_keeps_local_settings() {
        let pair = SyncedPair {
            local: Breakpoint::new("/a.js", 5).with_ignore_count(3).disabled(),
            remote: Breakpoint::new("/a.js", 5).with_id(8),
        };
        let merged = pair.merged();
        assert_eq!(merged.id, Some(8));
        assert!(!merged.enabled);
        assert_eq!(merged.ignore_count, Some(3));
        assert!(pair.needs_change());
    }
}
