// Workflow definitions, action steps and the executor task envelope

//! # Workflow Model
//!
//! A workflow is an ordered sequence of action steps behind a trigger.
//! Manual workflows fire on an API call; `on_group_update` workflows fire
//! whenever the group named in their trigger config is recalculated.
//!
//! Expansion turns each step into [`TaskMessage`]s: one per group member
//! (carrying the member's attribute bag) or a single general task when no
//! members apply. The envelope is everything an executor needs to perform
//! the action without further lookups; the template content itself is
//! executor-specific and opaque to the core.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CohortError, Result};

/// How a workflow is triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    OnGroupUpdate,
}

/// A workflow: trigger plus an ordered action sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    pub trigger_type: TriggerType,

    /// Trigger parameters; for `on_group_update` this carries `group_id`
    #[serde(default)]
    pub trigger_config: serde_json::Value,

    /// The raw action sequence JSON, parsed with [`WorkflowDefinition::action_sequence`]
    #[serde(default)]
    pub actions: serde_json::Value,
}

fn default_enabled() -> bool {
    true
}

impl WorkflowDefinition {
    /// The group id this workflow subscribes to, when `on_group_update`
    pub fn trigger_group_id(&self) -> Option<&str> {
        self.trigger_config.get("group_id").and_then(|v| v.as_str())
    }

    /// Parse the ordered action sequence out of the raw `actions` JSON
    pub fn action_sequence(&self) -> Result<Vec<ActionStep>> {
        if self.actions.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(self.actions.clone()).map_err(|e| {
            CohortError::Validation(format!(
                "malformed action sequence on workflow '{}': {}",
                self.id, e
            ))
        })
    }
}

/// One element of a workflow's action sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionStep {
    pub action_template_id: String,

    /// Step parameters forwarded verbatim into the task envelope
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// An executor-typed template describing how to render one action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionTemplate {
    pub id: String,
    pub name: String,

    /// Executor routing tag, e.g. "email" or "webhook"
    pub action_type: String,

    /// Executor-specific payload; opaque to the core
    pub content: String,
}

/// Wire envelope published to executors on `actions.<action-type>`
///
/// Task ids are freshly generated per publish, so redelivered messages keep
/// their id while two distinct tasks never share one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: Uuid,
    pub workflow_id: String,
    pub action_template_id: String,
    pub action_type: String,
    pub template_content: String,

    /// Step parameters from the workflow's action sequence
    #[serde(default)]
    pub action_params: serde_json::Value,

    /// Member this task applies to; absent on general tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_instance_id: Option<Uuid>,

    /// The member's attribute bag at expansion time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_data: Option<serde_json::Value>,
}

impl TaskMessage {
    /// Build a per-member task carrying the instance's attribute bag
    pub fn for_instance(
        workflow_id: &str,
        template: &ActionTemplate,
        params: serde_json::Value,
        instance_id: Uuid,
        entity_data: serde_json::Value,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            workflow_id: workflow_id.to_string(),
            action_template_id: template.id.clone(),
            action_type: template.action_type.clone(),
            template_content: template.content.clone(),
            action_params: params,
            entity_instance_id: Some(instance_id),
            entity_data: Some(entity_data),
        }
    }

    /// Build a general task with no per-instance context
    pub fn general(workflow_id: &str, template: &ActionTemplate, params: serde_json::Value) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            workflow_id: workflow_id.to_string(),
            action_template_id: template.id.clone(),
            action_type: template.action_type.clone(),
            template_content: template.content.clone(),
            action_params: params,
            entity_instance_id: None,
            entity_data: None,
        }
    }
}
