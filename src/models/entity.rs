// Entity, attribute and relationship definitions plus stored instances

//! # Entity Model
//!
//! Entity definitions describe the *types* of processed instances the
//! platform stores. Attributes belong to exactly one entity definition and
//! carry a data type drawn from a closed set; relationships are first-class
//! directed edges between two entity definitions, keyed by id, and are used
//! only to join instances at query time.
//!
//! A [`ProcessedEntity`] is one materialized instance: an id, its entity
//! type, and a JSON attribute bag holding the instance's values by logical
//! attribute name. Ingestion of these rows is owned by an external path; the
//! automation core reads and queries them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CohortError, Result};

/// A type of processed entity instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub id: String,
    pub name: String,
}

/// The closed set of attribute data types
///
/// The data type drives the deterministic cast the rule compiler applies
/// when it projects an attribute out of the JSON bag. `decimal` and
/// `numeric` are accepted as aliases for `float`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeDataType {
    String,
    Integer,
    #[serde(alias = "decimal", alias = "numeric")]
    Float,
    Boolean,
    Date,
    DateTime,
}

impl AttributeDataType {
    /// Parse a data type tag as it appears in metadata or a rule's
    /// `value_type` override (case-insensitive)
    pub fn parse(tag: &str) -> Result<Self> {
        match tag.trim().to_lowercase().as_str() {
            "string" => Ok(AttributeDataType::String),
            "integer" => Ok(AttributeDataType::Integer),
            "float" | "decimal" | "numeric" => Ok(AttributeDataType::Float),
            "boolean" => Ok(AttributeDataType::Boolean),
            "date" => Ok(AttributeDataType::Date),
            "datetime" => Ok(AttributeDataType::DateTime),
            other => Err(CohortError::Validation(format!(
                "unknown attribute data type '{}'",
                other
            ))),
        }
    }
}

/// An attribute belonging to one entity definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub id: String,

    /// The entity definition this attribute belongs to
    pub entity_id: String,

    /// Logical name, used as the key into the instance attribute bag
    pub name: String,

    pub data_type: AttributeDataType,
}

/// A directed relationship between two entity definitions
///
/// A relationship is a *relation*, not an ownership edge: neither side owns
/// the other. The source attribute is the FK-side value on the source
/// entity's bag, the target attribute the PK-side value on the target's bag;
/// instances join where the two project to the same text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRelationshipDefinition {
    pub id: String,
    pub name: String,
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub source_attribute_id: String,
    pub target_attribute_id: String,

    /// Cardinality tag, e.g. "one-to-many"; informational at query time
    #[serde(default)]
    pub cardinality: Option<String>,
}

/// One stored entity instance with its JSON attribute bag
///
/// Maps directly onto the `processed_entities` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProcessedEntity {
    pub id: Uuid,
    pub entity_definition_id: String,
    pub entity_type_name: String,
    #[serde(default)]
    pub source_id: Option<String>,

    /// The attribute bag: values by logical attribute name
    pub attributes: serde_json::Value,

    #[serde(default)]
    pub raw_record_identifier: Option<String>,
    pub processed_at: DateTime<Utc>,
}
