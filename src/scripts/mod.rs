//! Named raw-SQL scripts available to migration steps.
//!
//! Scripts are opaque to the runner: a step asks for one by name and it
//! either executes cleanly or fails the step.

use std::collections::HashMap;

/// Scripts compiled into the binary, keyed by file name.
const EMBEDDED_SCRIPTS: &[(&str, &str)] = &[
    (
        "0001_01_create_view_reviewer_statistics.sql",
        include_str!("sql/0001_01_create_view_reviewer_statistics.sql"),
    ),
    (
        "0001_07_create_index_tag_values_review.sql",
        include_str!("sql/0001_07_create_index_tag_values_review.sql"),
    ),
    (
        "0001_51_drop_view_reviewer_statistics.sql",
        include_str!("sql/0001_51_drop_view_reviewer_statistics.sql"),
    ),
    (
        "0001_57_drop_index_tag_values_review.sql",
        include_str!("sql/0001_57_drop_index_tag_values_review.sql"),
    ),
];

/// Lookup table of script name to SQL text.
#[derive(Debug, Clone, Default)]
pub struct ScriptCatalog {
    scripts: HashMap<String, String>,
}

impl ScriptCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog containing every script shipped with the migrator.
    pub fn embedded() -> Self {
        let mut catalog = Self::new();
        for (name, sql) in EMBEDDED_SCRIPTS {
            catalog.register(*name, *sql);
        }
        catalog
    }

    /// Add or replace a script. Returns the previous SQL for that name.
    pub fn register(&mut self, name: impl Into<String>, sql: impl Into<String>) -> Option<String> {
        self.scripts.insert(name.into(), sql.into())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.scripts.get(name).map(String::as_str)
    }

    /// Registered script names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.scripts.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
