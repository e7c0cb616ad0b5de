// NATS JetStream adapter for action dispatch and group-update events

//! # Message Bus Adapter
//!
//! All durable messaging goes through this adapter:
//!
//! - **Action tasks** are published to `actions.<action-type>` subjects,
//!   captured by the file-backed `ACTIONS` stream
//! - **Group-update events** are published to `GROUP.updated.<group-id>`,
//!   captured by the `GROUP_EVENTS` stream
//!
//! Streams are auto-created on first use and remembered in a small
//! mutex-guarded cache so the ensure step costs one lookup per process
//! lifetime. Publishes await the JetStream acknowledgment, so a returned
//! `Ok` means the message is persisted, not merely sent.
//!
//! The two publish capabilities are traits ([`TaskPublisher`],
//! [`EventPublisher`]) so the evaluator and orchestrator can be exercised
//! against recording fakes in tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_nats::jetstream::{self, consumer, stream, Context};
use async_nats::Client;
use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::engine::dispatch::{
    action_subject, executor_durable_name, group_updated_subject, ACTION_STREAM,
    ACTION_SUBJECT_WILDCARD, EXECUTOR_ACK_WAIT_SECS, GROUP_EVENT_ROUTER_DURABLE,
    GROUP_EVENT_STREAM, GROUP_EVENT_SUBJECT_WILDCARD,
};
use crate::models::TaskMessage;
use crate::Result;

/// Durable task publishing toward executors
#[async_trait]
pub trait TaskPublisher: Send + Sync {
    async fn publish_task(&self, task: &TaskMessage) -> Result<()>;
}

/// Advisory group-update event publishing
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_group_updated(&self, group_id: &str) -> Result<()>;
}

/// JetStream-backed implementation of both publish capabilities
pub struct NatsBus {
    client: Client,
    jetstream: Context,
    stream_cache: Mutex<HashSet<String>>,
}

impl NatsBus {
    /// Connect to NATS; the client reconnects indefinitely on its own
    pub async fn connect(url: &str) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| anyhow::anyhow!("failed to connect to NATS at {}: {}", url, e))?;
        let jetstream = jetstream::new(client.clone());

        Ok(Self {
            client,
            jetstream,
            stream_cache: Mutex::new(HashSet::new()),
        })
    }

    /// Flush buffered publishes; called on shutdown
    pub async fn flush(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .map_err(|e| anyhow::anyhow!("failed to flush NATS client: {}", e))?;
        Ok(())
    }

    /// Create a file-backed stream capturing `subjects` unless it already
    /// exists (cached per process)
    async fn ensure_stream(&self, name: &str, subjects: Vec<String>) -> Result<()> {
        {
            let cache = self.stream_cache.lock().unwrap();
            if cache.contains(name) {
                return Ok(());
            }
        }

        self.jetstream
            .get_or_create_stream(stream::Config {
                name: name.to_string(),
                subjects,
                storage: stream::StorageType::File,
                num_replicas: 1,
                ..Default::default()
            })
            .await
            .map_err(|e| anyhow::anyhow!("failed to ensure stream {}: {}", name, e))?;

        let mut cache = self.stream_cache.lock().unwrap();
        cache.insert(name.to_string());
        Ok(())
    }

    async fn ensure_action_stream(&self) -> Result<()> {
        self.ensure_stream(ACTION_STREAM, vec![ACTION_SUBJECT_WILDCARD.to_string()])
            .await
    }

    async fn ensure_group_event_stream(&self) -> Result<()> {
        self.ensure_stream(
            GROUP_EVENT_STREAM,
            vec![GROUP_EVENT_SUBJECT_WILDCARD.to_string()],
        )
        .await
    }

    /// Publish and wait for the JetStream acknowledgment
    async fn publish_with_ack(&self, subject: String, payload: Vec<u8>) -> Result<()> {
        let ack = self
            .jetstream
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| anyhow::anyhow!("failed to publish to {}: {}", subject, e))?;

        let pub_ack = ack
            .await
            .map_err(|e| anyhow::anyhow!("no publish acknowledgment for {}: {}", subject, e))?;

        debug!(
            subject = %subject,
            stream = %pub_ack.stream,
            sequence = pub_ack.sequence,
            "published durable message"
        );
        Ok(())
    }

    /// Message stream for the group-update router: durable, no-ack
    /// (advisory events, no replay required)
    pub async fn group_update_messages(&self) -> Result<consumer::pull::Stream> {
        self.ensure_group_event_stream().await?;

        let stream = self
            .jetstream
            .get_stream(GROUP_EVENT_STREAM)
            .await
            .map_err(|e| anyhow::anyhow!("failed to get stream {}: {}", GROUP_EVENT_STREAM, e))?;

        let consumer = stream
            .create_consumer(consumer::pull::Config {
                durable_name: Some(GROUP_EVENT_ROUTER_DURABLE.to_string()),
                filter_subject: GROUP_EVENT_SUBJECT_WILDCARD.to_string(),
                deliver_policy: consumer::DeliverPolicy::New,
                ack_policy: consumer::AckPolicy::None,
                ..Default::default()
            })
            .await
            .map_err(|e| anyhow::anyhow!("failed to create group-update consumer: {}", e))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| anyhow::anyhow!("failed to get group-update messages: {}", e))?;
        Ok(messages)
    }

    /// Message stream for one executor: durable per action type, explicit
    /// acks with a generous redelivery window
    pub async fn action_messages(&self, action_type: &str) -> Result<consumer::pull::Stream> {
        self.ensure_action_stream().await?;

        let stream = self
            .jetstream
            .get_stream(ACTION_STREAM)
            .await
            .map_err(|e| anyhow::anyhow!("failed to get stream {}: {}", ACTION_STREAM, e))?;

        let consumer = stream
            .create_consumer(consumer::pull::Config {
                durable_name: Some(executor_durable_name(action_type)),
                filter_subject: action_subject(action_type),
                ack_policy: consumer::AckPolicy::Explicit,
                ack_wait: Duration::from_secs(EXECUTOR_ACK_WAIT_SECS),
                ..Default::default()
            })
            .await
            .map_err(|e| {
                anyhow::anyhow!("failed to create executor consumer for {}: {}", action_type, e)
            })?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| anyhow::anyhow!("failed to get action messages: {}", e))?;
        Ok(messages)
    }
}

#[async_trait]
impl TaskPublisher for NatsBus {
    async fn publish_task(&self, task: &TaskMessage) -> Result<()> {
        self.ensure_action_stream().await?;
        let payload = serde_json::to_vec(task)?;
        self.publish_with_ack(action_subject(&task.action_type), payload)
            .await
    }
}

#[async_trait]
impl EventPublisher for NatsBus {
    async fn publish_group_updated(&self, group_id: &str) -> Result<()> {
        self.ensure_group_event_stream().await?;
        let payload = serde_json::to_vec(&serde_json::json!({
            "group_id": group_id,
            "updated_at": Utc::now(),
        }))?;
        self.publish_with_ack(group_updated_subject(group_id), payload)
            .await
    }
}
