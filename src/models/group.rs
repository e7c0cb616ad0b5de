// Group definitions, calculation logs and membership rows

//! # Group Model
//!
//! A group is a saved query: a rule tree over one primary entity type whose
//! evaluation produces the set of member instance ids. The evaluator records
//! each run in `group_calculation_logs` (one row per group, upserted) and
//! fully replaces the rows in `group_memberships` within the same
//! transaction.
//!
//! The log row is a small state machine: CALCULATING while a run is in
//! flight, then COMPLETED with the member count or FAILED with the captured
//! error message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CohortError, Result};

/// A saved group: primary entity type plus a rule tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDefinition {
    pub id: String,

    /// Primary entity type; every member is an instance of this type
    pub entity_definition_id: String,

    pub name: String,

    /// The raw rule tree JSON; parsed and validated at calculation time
    #[serde(default)]
    pub rules: serde_json::Value,
}

/// Status of the latest calculation for a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CalculationStatus {
    Calculating,
    Completed,
    Failed,
}

impl CalculationStatus {
    /// The uppercase tag stored in the `status` column
    pub fn as_str(&self) -> &'static str {
        match self {
            CalculationStatus::Calculating => "CALCULATING",
            CalculationStatus::Completed => "COMPLETED",
            CalculationStatus::Failed => "FAILED",
        }
    }

    pub fn parse(tag: &str) -> Result<Self> {
        match tag {
            "CALCULATING" => Ok(CalculationStatus::Calculating),
            "COMPLETED" => Ok(CalculationStatus::Completed),
            "FAILED" => Ok(CalculationStatus::Failed),
            other => Err(CohortError::Internal(format!(
                "unknown calculation status '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for CalculationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-group calculation log row
///
/// One row per group, keyed by the group definition id and upserted on every
/// calculation. `member_count` equals the number of membership rows whenever
/// the status is COMPLETED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupCalculationLog {
    pub group_definition_id: String,
    pub entity_definition_id: String,
    pub calculated_at: DateTime<Utc>,
    pub member_count: i32,
    pub status: CalculationStatus,
    pub error_message: Option<String>,
}

/// Current membership row: (group, instance)
///
/// Composite primary key; rows cascade away when the group's calculation
/// log row is deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMembership {
    pub group_definition_id: String,
    pub processed_entity_instance_id: Uuid,
}
