// Group evaluator: transactional membership replacement with status logging

//! # Group Evaluator
//!
//! One calculation is one database transaction:
//!
//! 1. upsert the group's log row to CALCULATING
//! 2. delete the group's current membership
//! 3. compile the rule tree and run the resulting query
//! 4. batch-insert the member ids
//! 5. upsert the log to COMPLETED with the count, and commit
//!
//! Readers therefore see the previous membership or the new one, never a
//! mix. On any failure the transaction is dropped — membership deletes and
//! inserts roll back together — and the FAILED status with the captured
//! error message is written on a fresh connection so the failure stays
//! observable. FAILED groups keep no membership rows.
//!
//! After a successful commit the evaluator announces the change on
//! `GROUP.updated.<group-id>`; the event is advisory and publish failures
//! only log.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::compiler::{RuleCompiler, SqlValue};
use crate::engine::nats_bus::EventPublisher;
use crate::metadata::MetadataClient;
use crate::{CohortError, Result};

/// Batch size for membership inserts
const INSERT_CHUNK: usize = 1000;

/// Result of one completed calculation
#[derive(Debug, Clone, Serialize)]
pub struct CalculationOutcome {
    pub group_id: String,
    pub member_count: i32,
    pub calculated_at: DateTime<Utc>,
}

/// Runs group calculations against the processed-entity store
pub struct GroupEvaluator {
    pool: PgPool,
    metadata: Arc<dyn MetadataClient>,
    events: Arc<dyn EventPublisher>,
}

impl GroupEvaluator {
    pub fn new(
        pool: PgPool,
        metadata: Arc<dyn MetadataClient>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            pool,
            metadata,
            events,
        }
    }

    /// Calculate a group's membership and persist it atomically
    ///
    /// On success the group-update event is published in the background;
    /// on failure the FAILED status row is committed and the error is
    /// returned to the caller.
    pub async fn calculate(&self, group_id: &str) -> Result<CalculationOutcome> {
        match self.run_calculation(group_id).await {
            Ok(outcome) => {
                info!(
                    "group {} calculated: {} members",
                    group_id, outcome.member_count
                );

                let events = Arc::clone(&self.events);
                let group_id = group_id.to_string();
                tokio::spawn(async move {
                    if let Err(e) = events.publish_group_updated(&group_id).await {
                        warn!("failed to publish group update for {}: {}", group_id, e);
                    }
                });

                Ok(outcome)
            }
            Err(err) => {
                warn!("group {} calculation failed: {}", group_id, err);
                self.record_failure(group_id, &err).await;
                Err(err)
            }
        }
    }

    async fn run_calculation(&self, group_id: &str) -> Result<CalculationOutcome> {
        let group = self.metadata.get_group(group_id).await?;
        let calculated_at = Utc::now();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO group_calculation_logs
                 (group_definition_id, entity_definition_id, calculated_at,
                  member_count, status, error_message)
             VALUES ($1, $2, $3, 0, 'CALCULATING', NULL)
             ON CONFLICT (group_definition_id) DO UPDATE
             SET entity_definition_id = EXCLUDED.entity_definition_id,
                 calculated_at = EXCLUDED.calculated_at,
                 member_count = 0,
                 status = 'CALCULATING',
                 error_message = NULL",
        )
        .bind(&group.id)
        .bind(&group.entity_definition_id)
        .bind(calculated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM group_memberships WHERE group_definition_id = $1")
            .bind(&group.id)
            .execute(&mut *tx)
            .await?;

        let compiled = RuleCompiler::new(self.metadata.as_ref())
            .compile(&group)
            .await?;

        let mut query = sqlx::query_scalar::<_, Uuid>(&compiled.sql);
        for param in &compiled.params {
            query = match param {
                SqlValue::Text(v) => query.bind(v),
                SqlValue::Int(v) => query.bind(v),
                SqlValue::Float(v) => query.bind(v),
                SqlValue::Bool(v) => query.bind(v),
                SqlValue::Timestamp(v) => query.bind(v),
            };
        }
        let member_ids = query.fetch_all(&mut *tx).await?;

        for chunk in member_ids.chunks(INSERT_CHUNK) {
            sqlx::query(
                "INSERT INTO group_memberships
                     (group_definition_id, processed_entity_instance_id)
                 SELECT $1, unnest($2::uuid[])
                 ON CONFLICT DO NOTHING",
            )
            .bind(&group.id)
            .bind(chunk)
            .execute(&mut *tx)
            .await?;
        }

        let member_count = member_ids.len() as i32;

        sqlx::query(
            "UPDATE group_calculation_logs
             SET member_count = $2, status = 'COMPLETED', calculated_at = $3
             WHERE group_definition_id = $1",
        )
        .bind(&group.id)
        .bind(member_count)
        .bind(calculated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(CalculationOutcome {
            group_id: group.id,
            member_count,
            calculated_at,
        })
    }

    /// Commit the FAILED status so the failure is observable
    ///
    /// Runs on a fresh connection after the calculation transaction rolled
    /// back. Membership rows are cleared in the same small transaction:
    /// a FAILED group has no members.
    async fn record_failure(&self, group_id: &str, err: &CohortError) {
        let result: Result<()> = async {
            let mut tx = self.pool.begin().await?;

            sqlx::query("DELETE FROM group_memberships WHERE group_definition_id = $1")
                .bind(group_id)
                .execute(&mut *tx)
                .await?;

            sqlx::query(
                "INSERT INTO group_calculation_logs
                     (group_definition_id, entity_definition_id, calculated_at,
                      member_count, status, error_message)
                 VALUES ($1, '', $2, 0, 'FAILED', $3)
                 ON CONFLICT (group_definition_id) DO UPDATE
                 SET calculated_at = EXCLUDED.calculated_at,
                     member_count = 0,
                     status = 'FAILED',
                     error_message = EXCLUDED.error_message",
            )
            .bind(group_id)
            .bind(Utc::now())
            .bind(err.to_string())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(())
        }
        .await;

        if let Err(status_err) = result {
            warn!(
                "failed to record FAILED status for group {}: {}",
                group_id, status_err
            );
        }
    }
}
