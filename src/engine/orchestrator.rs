// Workflow orchestrator: trigger -> per-member, per-step task fan-out

//! # Workflow Orchestrator
//!
//! Translates a trigger into executor-bound tasks:
//!
//! - **Manual**: the caller names a workflow. When its trigger type is
//!   `on_group_update` the group's current members are loaded first;
//!   otherwise expansion runs with no per-instance context.
//! - **Event**: a `GROUP.updated.<group-id>` message arrives. Every enabled
//!   workflow subscribed to that group is expanded against the group's
//!   members.
//!
//! Expansion walks the action sequence in declared order. Each step loads
//! its template and publishes one task per member (carrying the member's
//! attribute bag), or exactly one general task when there are no members.
//! Per-step and per-member failures are logged and skipped; a single broken
//! template or unreadable instance never aborts the workflow.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::nats_bus::TaskPublisher;
use crate::engine::storage::{InstanceReader, MembershipReader};
use crate::metadata::MetadataClient;
use crate::models::{TaskMessage, TriggerType, WorkflowDefinition};
use crate::{CohortError, Result};

/// Expands triggered workflows into published tasks
pub struct WorkflowOrchestrator {
    metadata: Arc<dyn MetadataClient>,
    memberships: Arc<dyn MembershipReader>,
    instances: Arc<dyn InstanceReader>,
    tasks: Arc<dyn TaskPublisher>,
}

impl WorkflowOrchestrator {
    pub fn new(
        metadata: Arc<dyn MetadataClient>,
        memberships: Arc<dyn MembershipReader>,
        instances: Arc<dyn InstanceReader>,
        tasks: Arc<dyn TaskPublisher>,
    ) -> Self {
        Self {
            metadata,
            memberships,
            instances,
            tasks,
        }
    }

    /// Manual trigger: expand one workflow by id
    ///
    /// Returns the number of tasks published.
    pub async fn trigger_workflow(&self, workflow_id: &str) -> Result<usize> {
        let workflow = self.metadata.get_workflow(workflow_id).await?;

        if !workflow.enabled {
            warn!("manually triggering disabled workflow {}", workflow_id);
        }

        let members = match workflow.trigger_type {
            TriggerType::OnGroupUpdate => {
                let group_id = workflow.trigger_group_id().ok_or_else(|| {
                    CohortError::Validation(format!(
                        "workflow '{}' is group-triggered but names no group_id",
                        workflow_id
                    ))
                })?;
                Some(self.memberships.members(group_id).await?)
            }
            TriggerType::Manual => None,
        };

        self.expand(&workflow, members).await
    }

    /// Event trigger: expand every enabled workflow subscribed to the group
    pub async fn handle_group_update(&self, group_id: &str) -> Result<()> {
        let workflows = self.metadata.list_workflows().await?;
        let subscribed: Vec<WorkflowDefinition> = workflows
            .into_iter()
            .filter(|wf| {
                wf.enabled
                    && wf.trigger_type == TriggerType::OnGroupUpdate
                    && wf.trigger_group_id() == Some(group_id)
            })
            .collect();

        if subscribed.is_empty() {
            info!("group {} updated, no subscribed workflows", group_id);
            return Ok(());
        }

        for workflow in subscribed {
            let members = self.memberships.members(group_id).await?;
            match self.expand(&workflow, Some(members)).await {
                Ok(count) => info!(
                    "group {} update expanded workflow {}: {} tasks",
                    group_id, workflow.id, count
                ),
                Err(e) => warn!(
                    "group {} update failed to expand workflow {}: {}",
                    group_id, workflow.id, e
                ),
            }
        }

        Ok(())
    }

    /// Expand a workflow's action sequence into published tasks
    ///
    /// `members` is `None` for context-free manual runs; an empty member
    /// list behaves the same and yields one general task per step.
    async fn expand(
        &self,
        workflow: &WorkflowDefinition,
        members: Option<Vec<Uuid>>,
    ) -> Result<usize> {
        let steps = workflow.action_sequence()?;
        let mut published = 0;

        for (index, step) in steps.iter().enumerate() {
            let template = match self
                .metadata
                .get_action_template(&step.action_template_id)
                .await
            {
                Ok(template) => template,
                Err(e) => {
                    warn!(
                        "workflow {} step {}: template '{}' unavailable, skipping step: {}",
                        workflow.id, index, step.action_template_id, e
                    );
                    continue;
                }
            };

            match members.as_deref() {
                Some(ids) if !ids.is_empty() => {
                    for instance_id in ids {
                        let instance = match self.instances.get_instance(instance_id).await {
                            Ok(Some(instance)) => instance,
                            Ok(None) => {
                                warn!(
                                    "workflow {} step {}: instance {} not found, skipping",
                                    workflow.id, index, instance_id
                                );
                                continue;
                            }
                            Err(e) => {
                                warn!(
                                    "workflow {} step {}: failed to read instance {}: {}",
                                    workflow.id, index, instance_id, e
                                );
                                continue;
                            }
                        };

                        let task = TaskMessage::for_instance(
                            &workflow.id,
                            &template,
                            step.parameters.clone(),
                            *instance_id,
                            instance.attributes,
                        );
                        published += self.publish(&workflow.id, index, task).await;
                    }
                }
                _ => {
                    let task =
                        TaskMessage::general(&workflow.id, &template, step.parameters.clone());
                    published += self.publish(&workflow.id, index, task).await;
                }
            }
        }

        Ok(published)
    }

    /// Publish one task; failures are logged and the step continues, since
    /// redelivery durability lives on the executor side of the stream
    async fn publish(&self, workflow_id: &str, step_index: usize, task: TaskMessage) -> usize {
        match self.tasks.publish_task(&task).await {
            Ok(()) => 1,
            Err(e) => {
                warn!(
                    "workflow {} step {}: failed to publish task {}: {}",
                    workflow_id, step_index, task.task_id, e
                );
                0
            }
        }
    }
}
