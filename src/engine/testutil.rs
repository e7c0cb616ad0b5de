// In-memory fakes for the engine's injected capabilities

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::engine::nats_bus::{EventPublisher, TaskPublisher};
use crate::engine::storage::{InstanceReader, MembershipReader};
use crate::metadata::MetadataClient;
use crate::models::{
    ActionTemplate, AttributeDataType, AttributeDefinition, EntityDefinition,
    EntityRelationshipDefinition, GroupDefinition, ProcessedEntity, TaskMessage,
    WorkflowDefinition,
};
use crate::{CohortError, Result};

/// Metadata store backed by hash maps
#[derive(Default)]
pub struct FakeMetadata {
    pub entities: HashMap<String, EntityDefinition>,
    pub attributes: HashMap<(String, String), AttributeDefinition>,
    pub relationships: HashMap<String, EntityRelationshipDefinition>,
    pub groups: HashMap<String, GroupDefinition>,
    pub workflows: HashMap<String, WorkflowDefinition>,
    pub templates: HashMap<String, ActionTemplate>,
}

impl FakeMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entity(&mut self, id: &str, name: &str) -> &mut Self {
        self.entities.insert(
            id.to_string(),
            EntityDefinition {
                id: id.to_string(),
                name: name.to_string(),
            },
        );
        self
    }

    pub fn add_attribute(
        &mut self,
        entity_id: &str,
        id: &str,
        name: &str,
        data_type: AttributeDataType,
    ) -> &mut Self {
        self.attributes.insert(
            (entity_id.to_string(), id.to_string()),
            AttributeDefinition {
                id: id.to_string(),
                entity_id: entity_id.to_string(),
                name: name.to_string(),
                data_type,
            },
        );
        self
    }

    pub fn add_relationship(
        &mut self,
        id: &str,
        source_entity: &str,
        target_entity: &str,
        source_attr: &str,
        target_attr: &str,
    ) -> &mut Self {
        self.relationships.insert(
            id.to_string(),
            EntityRelationshipDefinition {
                id: id.to_string(),
                name: id.to_string(),
                source_entity_id: source_entity.to_string(),
                target_entity_id: target_entity.to_string(),
                source_attribute_id: source_attr.to_string(),
                target_attribute_id: target_attr.to_string(),
                cardinality: None,
            },
        );
        self
    }

    pub fn add_group(&mut self, id: &str, entity_id: &str, rules: serde_json::Value) -> &mut Self {
        self.groups.insert(
            id.to_string(),
            GroupDefinition {
                id: id.to_string(),
                entity_definition_id: entity_id.to_string(),
                name: id.to_string(),
                rules,
            },
        );
        self
    }

    pub fn add_workflow(&mut self, workflow: WorkflowDefinition) -> &mut Self {
        self.workflows.insert(workflow.id.clone(), workflow);
        self
    }

    pub fn add_template(&mut self, id: &str, action_type: &str, content: &str) -> &mut Self {
        self.templates.insert(
            id.to_string(),
            ActionTemplate {
                id: id.to_string(),
                name: id.to_string(),
                action_type: action_type.to_string(),
                content: content.to_string(),
            },
        );
        self
    }
}

#[async_trait]
impl MetadataClient for FakeMetadata {
    async fn get_entity(&self, id: &str) -> Result<EntityDefinition> {
        self.entities
            .get(id)
            .cloned()
            .ok_or_else(|| CohortError::NotFound(format!("entity '{}'", id)))
    }

    async fn get_attribute(
        &self,
        entity_id: &str,
        attribute_id: &str,
    ) -> Result<AttributeDefinition> {
        self.attributes
            .get(&(entity_id.to_string(), attribute_id.to_string()))
            .cloned()
            .ok_or_else(|| {
                CohortError::NotFound(format!(
                    "attribute '{}' on entity '{}'",
                    attribute_id, entity_id
                ))
            })
    }

    async fn get_relationship(&self, id: &str) -> Result<EntityRelationshipDefinition> {
        self.relationships
            .get(id)
            .cloned()
            .ok_or_else(|| CohortError::NotFound(format!("relationship '{}'", id)))
    }

    async fn get_group(&self, id: &str) -> Result<GroupDefinition> {
        self.groups
            .get(id)
            .cloned()
            .ok_or_else(|| CohortError::NotFound(format!("group '{}'", id)))
    }

    async fn get_workflow(&self, id: &str) -> Result<WorkflowDefinition> {
        self.workflows
            .get(id)
            .cloned()
            .ok_or_else(|| CohortError::NotFound(format!("workflow '{}'", id)))
    }

    async fn get_action_template(&self, id: &str) -> Result<ActionTemplate> {
        self.templates
            .get(id)
            .cloned()
            .ok_or_else(|| CohortError::NotFound(format!("action template '{}'", id)))
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>> {
        let mut all: Vec<_> = self.workflows.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }
}

/// Membership reader returning canned member lists
#[derive(Default)]
pub struct FakeMembers {
    pub members: HashMap<String, Vec<Uuid>>,
}

#[async_trait]
impl MembershipReader for FakeMembers {
    async fn members(&self, group_id: &str) -> Result<Vec<Uuid>> {
        Ok(self.members.get(group_id).cloned().unwrap_or_default())
    }
}

/// Instance reader over an in-memory map of attribute bags
#[derive(Default)]
pub struct FakeInstances {
    pub instances: HashMap<Uuid, ProcessedEntity>,
}

impl FakeInstances {
    pub fn add(&mut self, id: Uuid, entity_id: &str, attributes: serde_json::Value) {
        self.instances.insert(
            id,
            ProcessedEntity {
                id,
                entity_definition_id: entity_id.to_string(),
                entity_type_name: entity_id.to_string(),
                source_id: None,
                attributes,
                raw_record_identifier: None,
                processed_at: chrono::Utc::now(),
            },
        );
    }
}

#[async_trait]
impl InstanceReader for FakeInstances {
    async fn get_instance(&self, id: &Uuid) -> Result<Option<ProcessedEntity>> {
        Ok(self.instances.get(id).cloned())
    }
}

/// Publisher that records everything it is handed
#[derive(Default)]
pub struct RecordingBus {
    pub tasks: Mutex<Vec<TaskMessage>>,
    pub group_events: Mutex<Vec<String>>,
    /// When set, publishes fail with a transport error
    pub fail_publish: bool,
}

#[async_trait]
impl TaskPublisher for RecordingBus {
    async fn publish_task(&self, task: &TaskMessage) -> Result<()> {
        if self.fail_publish {
            return Err(CohortError::transport("bus unavailable"));
        }
        self.tasks.lock().unwrap().push(task.clone());
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for RecordingBus {
    async fn publish_group_updated(&self, group_id: &str) -> Result<()> {
        if self.fail_publish {
            return Err(CohortError::transport("bus unavailable"));
        }
        self.group_events.lock().unwrap().push(group_id.to_string());
        Ok(())
    }
}
