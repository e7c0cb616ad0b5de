// Postgres layer: schema bootstrap, membership reads, instance reads

//! # Storage Layer
//!
//! The core owns three tables: `processed_entities` (read/query only —
//! ingestion lives elsewhere), `group_calculation_logs` and
//! `group_memberships`. The schema is bootstrapped idempotently at startup,
//! the same way the message-bus adapter auto-provisions its streams.
//!
//! Two small read capabilities are defined here as traits so the
//! orchestrator can be tested without a database:
//!
//! - [`MembershipReader`]: current member ids of a group
//! - [`InstanceReader`]: one processed instance with its attribute bag

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{CalculationStatus, GroupCalculationLog, ProcessedEntity};
use crate::Result;

/// Create the core's tables and indexes if they do not exist yet
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS processed_entities (
            id UUID PRIMARY KEY,
            entity_definition_id TEXT NOT NULL,
            entity_type_name TEXT NOT NULL,
            source_id TEXT,
            attributes JSONB NOT NULL DEFAULT '{}'::jsonb,
            raw_record_identifier TEXT,
            processed_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
        "CREATE INDEX IF NOT EXISTS idx_processed_entities_entity_definition_id
            ON processed_entities (entity_definition_id)",
        "CREATE INDEX IF NOT EXISTS idx_processed_entities_entity_type_name
            ON processed_entities (entity_type_name)",
        "CREATE INDEX IF NOT EXISTS idx_processed_entities_source_id
            ON processed_entities (source_id)",
        "CREATE TABLE IF NOT EXISTS group_calculation_logs (
            group_definition_id TEXT PRIMARY KEY,
            entity_definition_id TEXT NOT NULL,
            calculated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            member_count INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            error_message TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_group_calculation_logs_entity_definition_id
            ON group_calculation_logs (entity_definition_id)",
        "CREATE INDEX IF NOT EXISTS idx_group_calculation_logs_status
            ON group_calculation_logs (status)",
        "CREATE TABLE IF NOT EXISTS group_memberships (
            group_definition_id TEXT NOT NULL
                REFERENCES group_calculation_logs (group_definition_id) ON DELETE CASCADE,
            processed_entity_instance_id UUID NOT NULL,
            PRIMARY KEY (group_definition_id, processed_entity_instance_id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_group_memberships_instance_id
            ON group_memberships (processed_entity_instance_id)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

/// Current member ids of a group
#[async_trait]
pub trait MembershipReader: Send + Sync {
    async fn members(&self, group_id: &str) -> Result<Vec<Uuid>>;
}

/// One processed instance by id, `None` when absent
#[async_trait]
pub trait InstanceReader: Send + Sync {
    async fn get_instance(&self, id: &Uuid) -> Result<Option<ProcessedEntity>>;
}

/// Intermediate row for the calculation log; status is parsed out of its
/// text column in one place
#[derive(sqlx::FromRow)]
struct CalculationLogRow {
    group_definition_id: String,
    entity_definition_id: String,
    calculated_at: DateTime<Utc>,
    member_count: i32,
    status: String,
    error_message: Option<String>,
}

impl TryFrom<CalculationLogRow> for GroupCalculationLog {
    type Error = crate::CohortError;

    fn try_from(row: CalculationLogRow) -> Result<Self> {
        Ok(GroupCalculationLog {
            group_definition_id: row.group_definition_id,
            entity_definition_id: row.entity_definition_id,
            calculated_at: row.calculated_at,
            member_count: row.member_count,
            status: CalculationStatus::parse(&row.status)?,
            error_message: row.error_message,
        })
    }
}

/// Read access to calculation logs and membership
#[derive(Clone)]
pub struct GroupStore {
    pool: PgPool,
}

impl GroupStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The latest calculation log row for a group, if any calculation ever
    /// ran
    pub async fn calculation_log(&self, group_id: &str) -> Result<Option<GroupCalculationLog>> {
        let row = sqlx::query_as::<_, CalculationLogRow>(
            "SELECT group_definition_id, entity_definition_id, calculated_at,
                    member_count, status, error_message
             FROM group_calculation_logs
             WHERE group_definition_id = $1",
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(GroupCalculationLog::try_from).transpose()
    }
}

#[async_trait]
impl MembershipReader for GroupStore {
    async fn members(&self, group_id: &str) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT processed_entity_instance_id FROM group_memberships
             WHERE group_definition_id = $1
             ORDER BY processed_entity_instance_id",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}

/// Instance reader backed by the `processed_entities` table
#[derive(Clone)]
pub struct PgInstanceReader {
    pool: PgPool,
}

impl PgInstanceReader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InstanceReader for PgInstanceReader {
    async fn get_instance(&self, id: &Uuid) -> Result<Option<ProcessedEntity>> {
        let instance = sqlx::query_as::<_, ProcessedEntity>(
            "SELECT id, entity_definition_id, entity_type_name, source_id,
                    attributes, raw_record_identifier, processed_at
             FROM processed_entities
             WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(instance)
    }
}
