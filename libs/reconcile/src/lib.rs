//! Reconciliation primitives.
//!
//! Helpers shared by the load-balancer reconcilers to converge actual cloud
//! state toward desired cluster state. Key concepts:
//!
//! - **Desired state**: What the cloud should look like (from the cluster).
//! - **Actual state**: What the cloud currently holds (read fresh every pass).
//! - **Convergence**: The minimal set of mutations making actual match desired.
//!
//! # Invariants
//!
//! - All computations are pure and deterministic given the same inputs
//! - Membership is a set: duplicates and input order never matter
//! - "No change needed" is a success outcome, never an error

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Maximum number of items printed by [`TruncatedList`].
pub const TRUNCATED_LIST_LEN: usize = 10;

/// Outcome of an idempotent ensure operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceSyncStatus {
    /// The resource was created or mutated.
    Update,

    /// Observed state already matched desired state; nothing was written.
    Resync,
}

impl ResourceSyncStatus {
    /// Returns true if a mutation was issued.
    pub fn is_update(&self) -> bool {
        matches!(self, Self::Update)
    }

    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Resync => "resync",
        }
    }
}

impl fmt::Display for ResourceSyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set difference between desired and actual membership.
///
/// Both lists are sorted and free of duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    /// Present in desired, missing from actual.
    pub to_add: Vec<String>,

    /// Present in actual, missing from desired.
    pub to_remove: Vec<String>,
}

impl MembershipDiff {
    /// Compute `desired - actual` and `actual - desired`.
    pub fn compute<D, A>(desired: D, actual: A) -> Self
    where
        D: IntoIterator,
        D::Item: Into<String>,
        A: IntoIterator,
        A::Item: Into<String>,
    {
        let desired: BTreeSet<String> = desired.into_iter().map(Into::into).collect();
        let actual: BTreeSet<String> = actual.into_iter().map(Into::into).collect();

        Self {
            to_add: desired.difference(&actual).cloned().collect(),
            to_remove: actual.difference(&desired).cloned().collect(),
        }
    }

    /// Returns true if actual already matches desired.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Result of truncating a name set to a capacity limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Truncation {
    /// Names kept for this pass (lexicographically first `max`).
    pub kept: Vec<String>,

    /// Names dropped from this pass.
    pub dropped: Vec<String>,
}

impl Truncation {
    /// Returns true if any name was dropped.
    pub fn is_truncated(&self) -> bool {
        !self.dropped.is_empty()
    }
}

/// Deduplicate and sort `names`, then keep only the first `max`.
///
/// The sort is part of the contract: which names survive truncation is
/// observable, so it must not depend on input or hash iteration order.
pub fn truncate_sorted<I>(names: I, max: usize) -> Truncation
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    let mut kept: Vec<String> = names
        .into_iter()
        .map(Into::into)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let dropped = if kept.len() > max {
        kept.split_off(max)
    } else {
        Vec::new()
    };

    Truncation { kept, dropped }
}

/// Merge owned annotations into an existing annotation map.
///
/// Every key in `keys_to_remove` is deleted first, then `additions` is
/// overlaid. Keys outside both sets are preserved untouched.
pub fn merge_annotations(
    existing: &BTreeMap<String, String>,
    additions: &BTreeMap<String, String>,
    keys_to_remove: &[&str],
) -> BTreeMap<String, String> {
    let mut merged = existing.clone();
    for key in keys_to_remove {
        merged.remove(*key);
    }
    for (key, value) in additions {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Return `Some(desired)` only when it differs from `current`.
///
/// This is the patch-if-changed discipline: callers write back only when a
/// patch is returned.
pub fn patch_if_changed<T>(current: &T, desired: T) -> Option<T>
where
    T: PartialEq,
{
    if *current == desired {
        None
    } else {
        Some(desired)
    }
}

/// Display adapter printing at most [`TRUNCATED_LIST_LEN`] items.
///
/// Keeps log lines and event messages bounded when node lists are large.
pub struct TruncatedList<'a, T>(pub &'a [T]);

impl<T: fmt::Display> fmt::Display for TruncatedList<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self.0.len().min(TRUNCATED_LIST_LEN);
        f.write_str("[")?;
        for (i, item) in self.0[..shown].iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{item}")?;
        }
        f.write_str("]")?;
        if self.0.len() > shown {
            write!(f, " ...(and {} more)", self.0.len() - shown)?;
        }
        Ok(())
    }
}
