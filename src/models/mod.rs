// Core domain models for the automation core
// These are pure serde types with no I/O concerns

//! # Domain Models
//!
//! The model layer mirrors the platform's metadata vocabulary:
//!
//! - **Entities & attributes** ([`entity`]): typed entity definitions, their
//!   attributes, directed relationships between entity types, and the stored
//!   `processed_entities` instances with JSON attribute bags
//! - **Rules** ([`rule`]): the recursive, tag-discriminated rule tree that
//!   group definitions carry, plus the operator vocabulary
//! - **Groups** ([`group`]): group definitions, the per-group calculation
//!   log (CALCULATING → COMPLETED | FAILED) and membership rows
//! - **Workflows** ([`workflow`]): workflow definitions, action steps and
//!   templates, and the [`TaskMessage`] envelope published to executors
//!
//! All types (de)serialize with serde so the same structs travel over the
//! metadata HTTP API and the message bus.

pub mod entity;
pub mod group;
pub mod rule;
pub mod workflow;

pub use entity::{
    AttributeDataType, AttributeDefinition, EntityDefinition, EntityRelationshipDefinition,
    ProcessedEntity,
};
pub use group::{CalculationStatus, GroupCalculationLog, GroupDefinition, GroupMembership};
pub use rule::{ConditionOperator, LogicalOperator, RuleNode, MAX_RULE_DEPTH};
pub use workflow::{
    ActionStep, ActionTemplate, TaskMessage, TriggerType, WorkflowDefinition,
};
