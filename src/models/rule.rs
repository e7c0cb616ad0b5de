// Rule tree model for group definitions

//! # Rule Tree
//!
//! Group definitions carry a recursive, tag-discriminated rule tree. Each
//! node has a `type` field selecting one of four kinds:
//!
//! - **group**: AND/OR over child rules, all evaluated in the same entity
//!   context
//! - **condition**: leaf predicate on an attribute of the current entity
//! - **relationship_group**: existential quantification over related
//!   entities; children evaluate in the target entity's context
//! - **related_attribute_condition**: shorthand for an existential with a
//!   single leaf predicate
//!
//! The tree is materialized as a sum type so the compiler's exhaustive match
//! catches unknown node kinds statically; unknown `type` tags already fail
//! at deserialization. Trees nest arbitrarily, so depth is bounded
//! ([`MAX_RULE_DEPTH`]) to keep adversarial configs from exploding the SQL
//! or the stack.

use serde::{Deserialize, Serialize};

use crate::{CohortError, Result};

/// Maximum nesting depth a rule tree may have
pub const MAX_RULE_DEPTH: usize = 32;

/// One node of a group's rule tree
///
/// The on-wire JSON is flat objects with a `type` tag:
/// `{"type": "condition", "attribute_id": "...", "operator": "=", "value": "GOLD"}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleNode {
    /// Conjunction / disjunction over children in one entity context
    Group {
        /// Entity context; the root group defaults to the group
        /// definition's primary entity
        #[serde(default, skip_serializing_if = "Option::is_none")]
        entity_id: Option<String>,

        /// "AND" or "OR"; absent defaults to AND only for single-child
        /// groups
        #[serde(default, skip_serializing_if = "Option::is_none")]
        logical_operator: Option<String>,

        #[serde(default)]
        rules: Vec<RuleNode>,
    },

    /// Leaf predicate on an attribute of the current entity context
    Condition {
        attribute_id: String,

        /// Redundant display name carried by some authoring tools
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attribute_name: Option<String>,

        /// Optional explicit entity; must match the surrounding context
        #[serde(default, skip_serializing_if = "Option::is_none")]
        entity_id: Option<String>,

        operator: String,

        #[serde(default)]
        value: serde_json::Value,

        /// Overrides the attribute's declared data type for the cast
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value_type: Option<String>,
    },

    /// Existential quantification over entities related by a relationship;
    /// children evaluate against the relationship's target entity
    RelationshipGroup {
        relationship_id: String,
        related_entity_rules: Box<RuleNode>,
    },

    /// Sugar for an existential with a single leaf on the target entity
    RelatedAttributeCondition {
        relationship_id: String,
        attribute_id: String,
        operator: String,
        #[serde(default)]
        value: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value_type: Option<String>,
    },
}

impl RuleNode {
    /// Parse a rule tree from the raw JSON stored on a group definition
    pub fn parse(raw: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(raw.clone())
            .map_err(|e| CohortError::Validation(format!("malformed rule tree: {}", e)))
    }

    /// Depth of the tree, counting every node kind as one level
    pub fn depth(&self) -> usize {
        match self {
            RuleNode::Group { rules, .. } => {
                1 + rules.iter().map(RuleNode::depth).max().unwrap_or(0)
            }
            RuleNode::RelationshipGroup {
                related_entity_rules,
                ..
            } => 1 + related_entity_rules.depth(),
            RuleNode::Condition { .. } | RuleNode::RelatedAttributeCondition { .. } => 1,
        }
    }

    /// Normalize a parsed tree into a root group for the given primary
    /// entity
    ///
    /// A bare `condition` root is wrapped in a single-child AND group. A
    /// root group without an entity id inherits the primary entity; an
    /// explicit root entity id that differs from the group definition's is
    /// rejected. Anything else at the root is rejected.
    pub fn normalize_root(self, primary_entity_id: &str) -> Result<RuleNode> {
        let normalized = match self {
            RuleNode::Condition { .. } => RuleNode::Group {
                entity_id: Some(primary_entity_id.to_string()),
                logical_operator: Some("AND".to_string()),
                rules: vec![self],
            },
            RuleNode::Group {
                entity_id,
                logical_operator,
                rules,
            } => {
                if let Some(explicit) = &entity_id {
                    if explicit != primary_entity_id {
                        return Err(CohortError::Validation(format!(
                            "root rule entity '{}' does not match group entity '{}'",
                            explicit, primary_entity_id
                        )));
                    }
                }
                RuleNode::Group {
                    entity_id: Some(primary_entity_id.to_string()),
                    logical_operator,
                    rules,
                }
            }
            _ => {
                return Err(CohortError::Validation(
                    "root of a rule tree must be a group".to_string(),
                ))
            }
        };

        if normalized.depth() > MAX_RULE_DEPTH {
            return Err(CohortError::Validation(format!(
                "rule tree exceeds maximum depth of {}",
                MAX_RULE_DEPTH
            )));
        }

        Ok(normalized)
    }
}

/// Logical combinator for a group node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
}

impl LogicalOperator {
    /// Resolve the operator tag of a group with `child_count` children
    ///
    /// AND is the explicit default, but only for groups with at most one
    /// child; an absent or empty operator over several children is
    /// ambiguous and rejected.
    pub fn resolve(tag: Option<&str>, child_count: usize) -> Result<Self> {
        match tag.map(str::trim) {
            None | Some("") => {
                if child_count > 1 {
                    Err(CohortError::Validation(
                        "group with multiple rules must declare a logical operator".to_string(),
                    ))
                } else {
                    Ok(LogicalOperator::And)
                }
            }
            Some(s) if s.eq_ignore_ascii_case("and") => Ok(LogicalOperator::And),
            Some(s) if s.eq_ignore_ascii_case("or") => Ok(LogicalOperator::Or),
            Some(other) => Err(CohortError::Validation(format!(
                "unknown logical operator '{}'",
                other
            ))),
        }
    }

    /// SQL join keyword for this combinator
    pub fn sql(&self) -> &'static str {
        match self {
            LogicalOperator::And => "AND",
            LogicalOperator::Or => "OR",
        }
    }
}

/// The condition operator vocabulary
///
/// Parsed case-insensitively from the rule JSON; `contains` and
/// `does_not_contain` wrap the value with `%` wildcards at compile time,
/// `in`/`not in` take list values, and the null/boolean checks take no
/// right-hand value at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOperator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Like,
    NotLike,
    ILike,
    NotILike,
    Contains,
    DoesNotContain,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    IsTrue,
    IsFalse,
}

impl ConditionOperator {
    /// Parse an operator tag, normalizing case and inner whitespace
    pub fn parse(tag: &str) -> Result<Self> {
        let normalized = tag
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        match normalized.as_str() {
            "=" | "==" | "eq" => Ok(ConditionOperator::Eq),
            "!=" | "<>" | "ne" => Ok(ConditionOperator::Ne),
            ">" | "gt" => Ok(ConditionOperator::Gt),
            "<" | "lt" => Ok(ConditionOperator::Lt),
            ">=" | "gte" => Ok(ConditionOperator::Ge),
            "<=" | "lte" => Ok(ConditionOperator::Le),
            "like" => Ok(ConditionOperator::Like),
            "not like" => Ok(ConditionOperator::NotLike),
            "ilike" => Ok(ConditionOperator::ILike),
            "not ilike" => Ok(ConditionOperator::NotILike),
            "contains" => Ok(ConditionOperator::Contains),
            "does_not_contain" | "does not contain" => Ok(ConditionOperator::DoesNotContain),
            "in" => Ok(ConditionOperator::In),
            "not in" => Ok(ConditionOperator::NotIn),
            "is_null" | "is null" => Ok(ConditionOperator::IsNull),
            "is_not_null" | "is not null" => Ok(ConditionOperator::IsNotNull),
            "is_true" => Ok(ConditionOperator::IsTrue),
            "is_false" => Ok(ConditionOperator::IsFalse),
            other => Err(CohortError::Validation(format!(
                "unknown operator '{}'",
                other
            ))),
        }
    }

    /// SQL comparison symbol; only meaningful for the six comparison
    /// operators and the LIKE family
    pub fn sql_symbol(&self) -> &'static str {
        match self {
            ConditionOperator::Eq => "=",
            ConditionOperator::Ne => "!=",
            ConditionOperator::Gt => ">",
            ConditionOperator::Lt => "<",
            ConditionOperator::Ge => ">=",
            ConditionOperator::Le => "<=",
            ConditionOperator::Like | ConditionOperator::Contains => "LIKE",
            ConditionOperator::NotLike | ConditionOperator::DoesNotContain => "NOT LIKE",
            ConditionOperator::ILike => "ILIKE",
            ConditionOperator::NotILike => "NOT ILIKE",
            _ => "",
        }
    }

    /// Whether the operator consumes a right-hand value
    pub fn takes_value(&self) -> bool {
        !matches!(
            self,
            ConditionOperator::IsNull
                | ConditionOperator::IsNotNull
                | ConditionOperator::IsTrue
                | ConditionOperator::IsFalse
        )
    }
}
