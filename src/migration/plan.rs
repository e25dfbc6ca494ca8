//! Run plans: which steps a single pass executes, and in what order.

use super::types::{MigrationDirection, MigrationError, MigrationStep};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::warn;

/// Ordered steps for one runner invocation.
///
/// Always rebuilt from the ledger at the start of a pass, never cached
/// between passes.
pub struct RunPlan {
    direction: MigrationDirection,
    steps: Vec<Arc<dyn MigrationStep>>,
}

impl RunPlan {
    /// Registered steps absent from the ledger, ascending.
    ///
    /// `steps` must already be sorted ascending (as returned by
    /// `MigrationRegistry::discover`).
    pub fn up(steps: &[Arc<dyn MigrationStep>], applied: &BTreeSet<i64>) -> Self {
        let known: BTreeSet<i64> = steps.iter().map(|s| s.version()).collect();
        for version in applied.difference(&known) {
            warn!(
                version,
                "Ledger records a version with no registered migration; ignoring"
            );
        }

        Self {
            direction: MigrationDirection::Up,
            steps: steps
                .iter()
                .filter(|s| !applied.contains(&s.version()))
                .cloned()
                .collect(),
        }
    }

    /// Applied steps with a version strictly greater than `target`, descending.
    ///
    /// Fails with [`MigrationError::UnknownVersion`] if any of those versions
    /// has no registered step, before anything is executed.
    pub fn down(
        steps: &[Arc<dyn MigrationStep>],
        applied: &BTreeSet<i64>,
        target: i64,
    ) -> Result<Self, MigrationError> {
        let by_version: HashMap<i64, &Arc<dyn MigrationStep>> =
            steps.iter().map(|s| (s.version(), s)).collect();

        let planned = applied
            .iter()
            .rev()
            .filter(|version| **version > target)
            .map(|version| {
                by_version
                    .get(version)
                    .map(|step| Arc::clone(step))
                    .ok_or(MigrationError::UnknownVersion(*version))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            direction: MigrationDirection::Down,
            steps: planned,
        })
    }

    pub fn direction(&self) -> MigrationDirection {
        self.direction
    }

    pub fn steps(&self) -> &[Arc<dyn MigrationStep>] {
        &self.steps
    }

    pub fn versions(&self) -> Vec<i64> {
        self.steps.iter().map(|s| s.version()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
