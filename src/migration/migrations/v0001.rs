//! Initial migration - creates the review schema.
//!
//! Databases deployed before the migrator existed already contain the
//! `review` table. For those, this migration only removes the artifact left by
//! the old deployment process and is then recorded as applied.

use crate::db::Schema;
use crate::migration::types::{MigrationStep, StepError};
use async_trait::async_trait;
use sea_query::{Alias, ColumnDef, ForeignKey, Iden, Index, Table, TableCreateStatement};
use tracing::info;

/// Table left behind by the pre-migrator deployment tooling.
const LEGACY_REFACTOR_LOG: &str = "__refactor_log";

const CREATE_TAG_VALUES_INDEX_SCRIPT: &str = "0001_07_create_index_tag_values_review.sql";
const CREATE_STATISTICS_VIEW_SCRIPT: &str = "0001_01_create_view_reviewer_statistics.sql";
const DROP_STATISTICS_VIEW_SCRIPT: &str = "0001_51_drop_view_reviewer_statistics.sql";
const DROP_TAG_VALUES_INDEX_SCRIPT: &str = "0001_57_drop_index_tag_values_review.sql";

#[derive(Iden)]
pub enum Review {
    Table,
    Id,
    Team,
}

#[derive(Iden)]
pub enum Job {
    Table,
    Id,
    TeamName,
    ContentType,
    CreatedDate,
    ModifiedDate,
}

#[derive(Iden)]
pub enum TagValues {
    Table,
    TagShortCode,
    ReviewId,
    Value,
}

fn create_review() -> TableCreateStatement {
    Table::create()
        .table(Review::Table)
        .col(
            ColumnDef::new(Review::Id)
                .string_len(50)
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new(Review::Team).string_len(50).not_null())
        .to_owned()
}

fn create_job() -> TableCreateStatement {
    Table::create()
        .table(Job::Table)
        .col(
            ColumnDef::new(Job::Id)
                .string_len(50)
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new(Job::TeamName).string_len(50).not_null())
        .col(ColumnDef::new(Job::ContentType).small_integer().not_null())
        .col(
            ColumnDef::new(Job::CreatedDate)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(
            ColumnDef::new(Job::ModifiedDate)
                .timestamp_with_time_zone()
                .null(),
        )
        .to_owned()
}

// SQLite cannot add a constraint to an existing table, so the foreign key is
// declared with the table.
fn create_tag_values() -> TableCreateStatement {
    Table::create()
        .table(TagValues::Table)
        .col(ColumnDef::new(TagValues::TagShortCode).string_len(2).not_null())
        .col(ColumnDef::new(TagValues::ReviewId).string_len(50).not_null())
        .col(ColumnDef::new(TagValues::Value).boolean().not_null())
        .primary_key(
            Index::create()
                .col(TagValues::TagShortCode)
                .col(TagValues::ReviewId),
        )
        .foreign_key(
            ForeignKey::create()
                .name("fk_tag_values_to_review")
                .from(TagValues::Table, TagValues::ReviewId)
                .to(Review::Table, Review::Id),
        )
        .to_owned()
}

/// Initial migration establishing the review, job and tag value tables.
pub struct InitialSchemaMigration;

impl InitialSchemaMigration {
    /// Create a new initial schema migration.
    pub fn new() -> Self {
        Self
    }
}

impl Default for InitialSchemaMigration {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MigrationStep for InitialSchemaMigration {
    fn version(&self) -> i64 {
        1
    }

    fn description(&self) -> &str {
        "Create review, job and tag value tables"
    }

    async fn up(&self, schema: &mut Schema<'_>) -> Result<(), StepError> {
        let legacy_marker_present = schema.table_exists(&Review::Table.to_string()).await?;
        if legacy_marker_present {
            info!("Existing review schema found; cleaning up legacy deployment artifacts only");
            if schema.table_exists(LEGACY_REFACTOR_LOG).await? {
                schema.drop_table(Alias::new(LEGACY_REFACTOR_LOG)).await?;
            }
            return Ok(());
        }

        schema.create_table(&create_review()).await?;
        schema.create_table(&create_job()).await?;
        schema.create_table(&create_tag_values()).await?;

        schema.execute_script(CREATE_TAG_VALUES_INDEX_SCRIPT).await?;
        schema.execute_script(CREATE_STATISTICS_VIEW_SCRIPT).await?;

        Ok(())
    }

    async fn down(&self, schema: &mut Schema<'_>) -> Result<(), StepError> {
        schema.execute_script(DROP_STATISTICS_VIEW_SCRIPT).await?;
        schema.execute_script(DROP_TAG_VALUES_INDEX_SCRIPT).await?;

        schema.drop_table(TagValues::Table).await?;
        schema.drop_table(Job::Table).await?;
        schema.drop_table(Review::Table).await?;

        Ok(())
    }
}
