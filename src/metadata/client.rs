// HTTP implementation of the metadata client

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use super::MetadataClient;
use crate::models::{
    ActionTemplate, AttributeDefinition, EntityDefinition, EntityRelationshipDefinition,
    GroupDefinition, WorkflowDefinition,
};
use crate::{CohortError, Result};

/// Metadata client speaking JSON over HTTP
///
/// Holds its own reqwest client so connections are reused across calls.
/// Every call carries a bounded timeout; the metadata store is assumed
/// stable for the duration of one calculation, so nothing is cached here.
pub struct HttpMetadataClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpMetadataClient {
    /// Create a client against the given base URL (no trailing slash)
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(10))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(CohortError::from)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// GET a JSON document, mapping 404 to NotFound and everything else
    /// that goes wrong to Transport
    async fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("metadata fetch: {}", url);

        let response = self.http.get(&url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(CohortError::NotFound(what.to_string())),
            status if status.is_success() => Ok(response.json::<T>().await?),
            status => Err(CohortError::transport(format!(
                "metadata service returned {} for {}",
                status, url
            ))),
        }
    }
}

#[async_trait]
impl MetadataClient for HttpMetadataClient {
    async fn get_entity(&self, id: &str) -> Result<EntityDefinition> {
        self.get_json(
            &format!("/api/v1/entities/{}", id),
            &format!("entity '{}'", id),
        )
        .await
    }

    async fn get_attribute(
        &self,
        entity_id: &str,
        attribute_id: &str,
    ) -> Result<AttributeDefinition> {
        self.get_json(
            &format!("/api/v1/entities/{}/attributes/{}", entity_id, attribute_id),
            &format!("attribute '{}' on entity '{}'", attribute_id, entity_id),
        )
        .await
    }

    async fn get_relationship(&self, id: &str) -> Result<EntityRelationshipDefinition> {
        self.get_json(
            &format!("/api/v1/relationships/{}", id),
            &format!("relationship '{}'", id),
        )
        .await
    }

    async fn get_group(&self, id: &str) -> Result<GroupDefinition> {
        self.get_json(&format!("/api/v1/groups/{}", id), &format!("group '{}'", id))
            .await
    }

    async fn get_workflow(&self, id: &str) -> Result<WorkflowDefinition> {
        self.get_json(
            &format!("/api/v1/workflows/{}", id),
            &format!("workflow '{}'", id),
        )
        .await
    }

    async fn get_action_template(&self, id: &str) -> Result<ActionTemplate> {
        self.get_json(
            &format!("/api/v1/action-templates/{}", id),
            &format!("action template '{}'", id),
        )
        .await
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>> {
        self.get_json("/api/v1/workflows", "workflow list").await
    }
}
