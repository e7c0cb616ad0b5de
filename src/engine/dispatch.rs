// Action dispatch contract: subjects, streams, consumers, executor loop

//! # Action Dispatch Contract
//!
//! The delivery contract between the orchestrator and action executors:
//!
//! - **Subjects**: tasks are published to `actions.<action-type>` with the
//!   action type lowercased
//! - **Stream**: one durable, file-backed stream `ACTIONS` captures
//!   `actions.>`; it is auto-created on first use
//! - **Consumers**: each executor binds a durable consumer named
//!   `executor-<action-type>`, explicit acks, 30 s ack-wait
//!
//! Delivery is at-least-once; idempotence is the executor's concern. The
//! executor loop acks on success, terminates (dead-letters) envelopes that
//! do not parse, and naks transient failures so JetStream redelivers them.

use std::sync::Arc;

use async_nats::jetstream::AckKind;
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, error, warn};

use crate::engine::nats_bus::NatsBus;
use crate::models::TaskMessage;
use crate::Result;

/// Durable stream capturing every action subject
pub const ACTION_STREAM: &str = "ACTIONS";
pub const ACTION_SUBJECT_WILDCARD: &str = "actions.>";

/// Stream and subjects for group-update events
pub const GROUP_EVENT_STREAM: &str = "GROUP_EVENTS";
pub const GROUP_EVENT_SUBJECT_PREFIX: &str = "GROUP.updated.";
pub const GROUP_EVENT_SUBJECT_WILDCARD: &str = "GROUP.updated.>";
pub const GROUP_EVENT_ROUTER_DURABLE: &str = "group-update-router";

/// Redelivery window granted to executors before a task is retried
pub const EXECUTOR_ACK_WAIT_SECS: u64 = 30;

/// Publishing subject for an action type
pub fn action_subject(action_type: &str) -> String {
    format!("actions.{}", action_type.to_lowercase())
}

/// Durable consumer name for an executor of the given action type
pub fn executor_durable_name(action_type: &str) -> String {
    format!("executor-{}", action_type.to_lowercase())
}

/// Subject announcing a group's recalculation
pub fn group_updated_subject(group_id: &str) -> String {
    format!("{}{}", GROUP_EVENT_SUBJECT_PREFIX, group_id)
}

/// A concrete action sender (email, webhook, ...)
///
/// Executor internals are collaborators; the core only drives the delivery
/// loop around them.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// The action type this executor consumes, matching the template's
    /// `action_type` tag
    fn action_type(&self) -> &str;

    /// Perform one task. An `Err` is treated as transient and the task is
    /// redelivered.
    async fn execute(&self, task: &TaskMessage) -> Result<()>;
}

/// Consume an executor's subject until the message stream ends
///
/// Runs forever under normal operation; callers spawn it. Envelope parse
/// failures are terminated rather than redelivered, since no retry will
/// make an unparseable payload parse.
pub async fn run_executor(bus: &NatsBus, executor: Arc<dyn ActionExecutor>) -> Result<()> {
    let action_type = executor.action_type().to_string();
    let mut messages = bus.action_messages(&action_type).await?;

    while let Some(message) = messages.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!("executor '{}': message stream error: {}", action_type, e);
                continue;
            }
        };

        let task: TaskMessage = match serde_json::from_slice(&message.payload) {
            Ok(task) => task,
            Err(e) => {
                error!(
                    "executor '{}': unparseable task envelope, dead-lettering: {}",
                    action_type, e
                );
                if let Err(e) = message.ack_with(AckKind::Term).await {
                    warn!("executor '{}': failed to terminate message: {}", action_type, e);
                }
                continue;
            }
        };

        match executor.execute(&task).await {
            Ok(()) => {
                debug!(
                    "executor '{}': task {} completed",
                    action_type, task.task_id
                );
                if let Err(e) = message.ack().await {
                    warn!("executor '{}': failed to ack task {}: {}", action_type, task.task_id, e);
                }
            }
            Err(e) => {
                warn!(
                    "executor '{}': task {} failed, requesting redelivery: {}",
                    action_type, task.task_id, e
                );
                if let Err(e) = message.ack_with(AckKind::Nak(None)).await {
                    warn!("executor '{}': failed to nak task {}: {}", action_type, task.task_id, e);
                }
            }
        }
    }

    Ok(())
}
