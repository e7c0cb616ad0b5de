// Cohort - automation core for a data-driven workflow platform
// Group evaluation, workflow orchestration, and durable action dispatch

//! # Cohort Library
//!
//! This is the main library crate for Cohort, the automation core of a
//! data-driven workflow platform. This file serves as the **library root**
//! and defines the public API that the server binary and external crates use.
//!
//! ## Core Components
//!
//! ### Domain Models
//! - [`GroupDefinition`]: A saved rule tree producing a set of entity instances
//! - [`RuleNode`]: The recursive, tag-discriminated rule tree
//! - [`WorkflowDefinition`]: An ordered action sequence with a trigger
//! - [`TaskMessage`]: The wire envelope published to action executors
//!
//! ### Rule Compiler & Group Evaluator
//!
//! [`RuleCompiler`] walks a rule tree, batch-fetches the attribute and
//! relationship definitions it references, and emits a single parameterized
//! SQL query over `processed_entities`. [`GroupEvaluator`] runs that query
//! inside one transaction, replaces the group's membership atomically, and
//! upserts the per-group calculation log:
//!
//! - **Atomic membership**: readers see the previous set or the new set,
//!   never a mix
//! - **Status tracking**: CALCULATING → COMPLETED | FAILED, with the error
//!   message captured on failure
//! - **Post-commit events**: each successful calculation publishes one
//!   `GROUP.updated.<group-id>` event
//!
//! ### Workflow Orchestrator
//!
//! [`WorkflowOrchestrator`] translates a trigger (manual API call or group
//! update event) into per-member, per-step [`TaskMessage`]s on the durable
//! `ACTIONS` stream. Executors consume `actions.<action-type>` subjects with
//! durable consumers and explicit acks.
//!
//! ### Storage & Messaging
//!
//! Postgres (via sqlx) holds processed entities, membership, and calculation
//! logs. NATS JetStream carries action tasks and group-update events with
//! file-backed streams that are auto-provisioned on first use.

// Core domain models (serde types, no I/O)
pub mod models;

// Engine implementations: rule compiler, evaluator, orchestrator, dispatch
pub mod engine;

// Read-only client for the metadata service
pub mod metadata;

// HTTP API surface (axum handlers under /api/v1)
pub mod api;

// HTTP server setup and graceful shutdown
pub mod server;

// Environment configuration
pub mod config;

// Re-export core domain types for easy access
pub use models::{
    ActionStep,
    ActionTemplate,
    AttributeDataType,
    AttributeDefinition,
    CalculationStatus,
    ConditionOperator,
    EntityDefinition,
    EntityRelationshipDefinition,
    GroupCalculationLog,
    GroupDefinition,
    GroupMembership,
    LogicalOperator,
    ProcessedEntity,
    RuleNode,
    TaskMessage,
    TriggerType,
    WorkflowDefinition,
};

// Re-export engine types for convenience
pub use engine::{
    compiler::{CompiledQuery, RuleCompiler, SqlValue},
    dispatch::{action_subject, run_executor, ActionExecutor},
    evaluator::{CalculationOutcome, GroupEvaluator},
    events::GroupUpdateRouter,
    nats_bus::{EventPublisher, NatsBus, TaskPublisher},
    orchestrator::WorkflowOrchestrator,
    storage::{ensure_schema, GroupStore, InstanceReader, MembershipReader, PgInstanceReader},
};

// Re-export the metadata client surface
pub use metadata::{HttpMetadataClient, MetadataClient};

// Re-export configuration and server types
pub use config::Config;
pub use server::{HttpServer, HttpServerBuilder};

use thiserror::Error;

/// Custom error types for Cohort operations
///
/// The variants mirror the error kinds the core distinguishes: validation of
/// rule trees and inputs, missing definitions, transport failures against the
/// metadata service or the message bus, database integrity failures, and
/// timeouts/cancellations.
#[derive(Error, Debug)]
pub enum CohortError {
    /// Malformed rule JSON, unknown operator, value-type mismatch,
    /// cross-entity condition without a relationship wrapper, and friends
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entity, attribute, relationship, group, workflow, action template,
    /// or processed instance absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Metadata HTTP or message-bus failure
    /// Uses anyhow::Error for flexible wrapping of NATS and HTTP errors
    #[error("Transport error: {0}")]
    Transport(#[from] anyhow::Error),

    /// Database constraint violation or transaction failure
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Timeout or cancellation
    #[error("Transient error: {0}")]
    Transient(String),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CohortError {
    /// Build a transport error from a plain message
    pub fn transport(msg: impl Into<String>) -> Self {
        CohortError::Transport(anyhow::anyhow!(msg.into()))
    }
}

impl From<sqlx::Error> for CohortError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => CohortError::NotFound("database row not found".into()),
            sqlx::Error::PoolTimedOut => CohortError::Transient("database pool timed out".into()),
            other => CohortError::Integrity(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for CohortError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CohortError::Transient(format!("metadata request timed out: {}", err))
        } else {
            CohortError::Transport(anyhow::Error::new(err))
        }
    }
}

impl From<std::io::Error> for CohortError {
    fn from(err: std::io::Error) -> Self {
        CohortError::Internal(err.to_string())
    }
}

/// Type alias for Results that use our custom error type
pub type Result<T> = std::result::Result<T, CohortError>;
