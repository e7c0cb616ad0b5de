// Group-update event router: GROUP.updated.> -> orchestrator

//! # Group-Update Event Router
//!
//! A single durable consumer on `GROUP.updated.>`. Each message names the
//! recalculated group in its trailing subject segment; the router hands
//! that id to the orchestrator's event trigger. The events are advisory —
//! the consumer runs with no-ack delivery, the orchestrator's own failure
//! handling provides observability, and nothing here panics out of the
//! dispatch loop.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{info, warn};

use crate::engine::dispatch::GROUP_EVENT_SUBJECT_PREFIX;
use crate::engine::nats_bus::NatsBus;
use crate::engine::orchestrator::WorkflowOrchestrator;
use crate::Result;

/// Routes group-update events into workflow expansion
pub struct GroupUpdateRouter {
    bus: Arc<NatsBus>,
    orchestrator: Arc<WorkflowOrchestrator>,
}

impl GroupUpdateRouter {
    pub fn new(bus: Arc<NatsBus>, orchestrator: Arc<WorkflowOrchestrator>) -> Self {
        Self { bus, orchestrator }
    }

    /// Consume group-update events until the message stream ends
    ///
    /// Runs forever under normal operation; the binary spawns it.
    pub async fn run(&self) -> Result<()> {
        let mut messages = self.bus.group_update_messages().await?;
        info!("group-update router subscribed to {}>", GROUP_EVENT_SUBJECT_PREFIX);

        while let Some(message) = messages.next().await {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    warn!("group-update router: message stream error: {}", e);
                    continue;
                }
            };

            let subject = message.subject.as_str();
            let group_id = match parse_group_id(subject) {
                Some(group_id) => group_id,
                None => {
                    warn!("group-update router: unexpected subject '{}'", subject);
                    continue;
                }
            };

            if let Err(e) = self.orchestrator.handle_group_update(group_id).await {
                warn!(
                    "group-update router: expansion for group {} failed: {}",
                    group_id, e
                );
            }
        }

        Ok(())
    }
}

/// Extract the group id from a `GROUP.updated.<group-id>` subject
fn parse_group_id(subject: &str) -> Option<&str> {
    subject
        .strip_prefix(GROUP_EVENT_SUBJECT_PREFIX)
        .filter(|id| !id.is_empty())
}
