//! Migration registry for the compiled-in set of steps.

use super::types::{MigrationError, MigrationStep};
use std::sync::Arc;

/// Registry of all available migrations.
///
/// Steps are added from an explicit registration list; nothing is discovered
/// at runtime.
pub struct MigrationRegistry {
    migrations: Vec<Arc<dyn MigrationStep>>,
}

impl MigrationRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            migrations: Vec::new(),
        }
    }

    /// Register a migration.
    ///
    /// Duplicates are accepted here and reported by [`discover`](Self::discover).
    pub fn register(&mut self, migration: Arc<dyn MigrationStep>) {
        self.migrations.push(migration);
    }

    /// All registered steps, sorted ascending by version.
    ///
    /// Fails with [`MigrationError::DuplicateVersion`] if two steps declare the
    /// same version.
    pub fn discover(&self) -> Result<Vec<Arc<dyn MigrationStep>>, MigrationError> {
        let mut steps = self.migrations.clone();
        steps.sort_by_key(|step| step.version());

        if let Some(pair) = steps.windows(2).find(|w| w[0].version() == w[1].version()) {
            return Err(MigrationError::DuplicateVersion(pair[0].version()));
        }

        Ok(steps)
    }

    /// Find the step registered for a version.
    pub fn get(&self, version: i64) -> Option<Arc<dyn MigrationStep>> {
        self.migrations
            .iter()
            .find(|m| m.version() == version)
            .map(Arc::clone)
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

impl Default for MigrationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
