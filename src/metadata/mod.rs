// Read-only client surface for the metadata service

//! # Metadata Client
//!
//! The automation core never owns definitions; it reads them from the
//! metadata service through this narrow surface. The trait is the seam the
//! engine is injected with, so the compiler, evaluator and orchestrator can
//! all be exercised in tests against an in-memory fake.
//!
//! Failures surface as two kinds: [`CohortError::NotFound`] when the
//! definition does not exist, and [`CohortError::Transport`] for everything
//! else (connection failures, non-404 statuses, undecodable bodies).
//!
//! [`CohortError::NotFound`]: crate::CohortError::NotFound
//! [`CohortError::Transport`]: crate::CohortError::Transport

mod client;

pub use client::HttpMetadataClient;

use async_trait::async_trait;

use crate::models::{
    ActionTemplate, AttributeDefinition, EntityDefinition, EntityRelationshipDefinition,
    GroupDefinition, WorkflowDefinition,
};
use crate::Result;

/// Read-only access to entity, group, workflow and action-template
/// definitions
#[async_trait]
pub trait MetadataClient: Send + Sync {
    async fn get_entity(&self, id: &str) -> Result<EntityDefinition>;

    /// Fetch one attribute definition; attributes are addressed by their
    /// owning entity plus their own id
    async fn get_attribute(&self, entity_id: &str, attribute_id: &str)
        -> Result<AttributeDefinition>;

    async fn get_relationship(&self, id: &str) -> Result<EntityRelationshipDefinition>;

    async fn get_group(&self, id: &str) -> Result<GroupDefinition>;

    async fn get_workflow(&self, id: &str) -> Result<WorkflowDefinition>;

    async fn get_action_template(&self, id: &str) -> Result<ActionTemplate>;

    /// All workflows, enabled or not; the orchestrator filters
    async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>>;
}
