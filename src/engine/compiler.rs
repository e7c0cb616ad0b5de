// Rule compiler: turns a group's rule tree into one parameterized SQL query

//! # Rule Compiler
//!
//! Compilation runs in three passes over a normalized rule tree:
//!
//! 1. **Collection**: walk the tree carrying the contextual entity id,
//!    recording every (attribute, entity) pair and every relationship the
//!    tree references. Relationship definitions are fetched during the walk
//!    because their target entity becomes the context for nested rules.
//! 2. **Batch fetch**: load every collected attribute definition. Any
//!    missing definition aborts the compile with NotFound; a relationship
//!    whose source entity differs from the context it is used in, or a
//!    condition naming a foreign entity without a relationship wrapper,
//!    aborts with a validation error. No SQL is emitted for invalid trees.
//! 3. **Emit**: generate the query. `processed_entities` aliases are
//!    numbered monotonically (`pe1`, `pe2`, ...), parameters are appended to
//!    a shared list so placeholders stay contiguous from `$1` in nesting
//!    order, and each relationship node becomes an EXISTS subquery joining
//!    the outer alias's attribute bag to the inner one.
//!
//! Leaf predicates project the attribute out of the JSON bag
//! (`(pe1.attributes->>'age')`) and apply a deterministic cast driven by the
//! attribute's declared data type or the leaf's `value_type` override.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate, Utc};

use crate::metadata::MetadataClient;
use crate::models::{
    AttributeDataType, AttributeDefinition, ConditionOperator, EntityRelationshipDefinition,
    GroupDefinition, LogicalOperator, RuleNode,
};
use crate::{CohortError, Result};

/// A typed SQL parameter collected during emission
///
/// The variants carry exactly the Rust types the evaluator binds through
/// sqlx, so the cast emitted next to the placeholder and the bound value
/// always agree.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

/// The compiled query: SQL text plus its parameters in placeholder order
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Definitions resolved for one compilation
struct ResolvedDefs {
    attributes: HashMap<(String, String), AttributeDefinition>,
    relationships: HashMap<String, EntityRelationshipDefinition>,
}

impl ResolvedDefs {
    fn attribute(&self, entity_id: &str, attribute_id: &str) -> Result<&AttributeDefinition> {
        self.attributes
            .get(&(entity_id.to_string(), attribute_id.to_string()))
            .ok_or_else(|| {
                CohortError::Internal(format!(
                    "attribute '{}' for entity '{}' missing after collection",
                    attribute_id, entity_id
                ))
            })
    }

    fn relationship(&self, id: &str) -> Result<&EntityRelationshipDefinition> {
        self.relationships.get(id).ok_or_else(|| {
            CohortError::Internal(format!("relationship '{}' missing after collection", id))
        })
    }
}

/// Alias and parameter bookkeeping for the emit pass
#[derive(Default)]
struct EmitState {
    alias_counter: usize,
    params: Vec<SqlValue>,
}

impl EmitState {
    fn next_alias(&mut self) -> String {
        self.alias_counter += 1;
        format!("pe{}", self.alias_counter)
    }

    /// Append a parameter and return its `$n` placeholder
    fn push(&mut self, value: SqlValue) -> String {
        self.params.push(value);
        format!("${}", self.params.len())
    }
}

/// Compiles rule trees against the metadata a [`MetadataClient`] provides
pub struct RuleCompiler<'a> {
    metadata: &'a dyn MetadataClient,
}

impl<'a> RuleCompiler<'a> {
    pub fn new(metadata: &'a dyn MetadataClient) -> Self {
        Self { metadata }
    }

    /// Compile a group's rule tree into a query selecting member ids
    pub async fn compile(&self, group: &GroupDefinition) -> Result<CompiledQuery> {
        let root = RuleNode::parse(&group.rules)?.normalize_root(&group.entity_definition_id)?;

        let defs = self.resolve(&root, &group.entity_definition_id).await?;

        let mut state = EmitState::default();
        let root_alias = state.next_alias();
        let entity_param = state.push(SqlValue::Text(group.entity_definition_id.clone()));
        let clause = emit_node(
            &root,
            &root_alias,
            &group.entity_definition_id,
            &defs,
            &mut state,
        )?;

        let sql = format!(
            "SELECT {alias}.id FROM processed_entities {alias} \
             WHERE {alias}.entity_definition_id = {param} AND ({clause})",
            alias = root_alias,
            param = entity_param,
            clause = clause,
        );

        Ok(CompiledQuery {
            sql,
            params: state.params,
        })
    }

    /// Collection pass plus batch fetch
    ///
    /// Walks the tree iteratively with an explicit worklist (the
    /// relationship fetches make recursion awkward in async), validating
    /// entity contexts as it goes.
    async fn resolve(&self, root: &RuleNode, root_entity: &str) -> Result<ResolvedDefs> {
        let mut wanted_attributes: BTreeSet<(String, String)> = BTreeSet::new();
        let mut relationships: HashMap<String, EntityRelationshipDefinition> = HashMap::new();

        let mut worklist: Vec<(&RuleNode, String)> = vec![(root, root_entity.to_string())];

        while let Some((node, ctx_entity)) = worklist.pop() {
            match node {
                RuleNode::Group { rules, .. } => {
                    for child in rules {
                        worklist.push((child, ctx_entity.clone()));
                    }
                }
                RuleNode::Condition {
                    attribute_id,
                    entity_id,
                    ..
                } => {
                    if let Some(explicit) = entity_id {
                        if explicit != &ctx_entity {
                            return Err(CohortError::Validation(format!(
                                "condition on entity '{}' inside context '{}' requires a \
                                 relationship group",
                                explicit, ctx_entity
                            )));
                        }
                    }
                    wanted_attributes.insert((ctx_entity.clone(), attribute_id.clone()));
                }
                RuleNode::RelationshipGroup {
                    relationship_id,
                    related_entity_rules,
                } => {
                    let rel = self
                        .fetch_relationship(relationship_id, &ctx_entity, &mut relationships)
                        .await?;
                    let target = rel.target_entity_id.clone();
                    worklist.push((related_entity_rules.as_ref(), target));
                }
                RuleNode::RelatedAttributeCondition {
                    relationship_id,
                    attribute_id,
                    ..
                } => {
                    let rel = self
                        .fetch_relationship(relationship_id, &ctx_entity, &mut relationships)
                        .await?;
                    wanted_attributes.insert((rel.target_entity_id.clone(), attribute_id.clone()));
                }
            }
        }

        // Join attributes for every relationship in play
        for rel in relationships.values() {
            wanted_attributes.insert((rel.source_entity_id.clone(), rel.source_attribute_id.clone()));
            wanted_attributes.insert((rel.target_entity_id.clone(), rel.target_attribute_id.clone()));
        }

        let mut attributes = HashMap::new();
        for (entity_id, attribute_id) in wanted_attributes {
            let attr = self.metadata.get_attribute(&entity_id, &attribute_id).await?;
            if attr.entity_id != entity_id {
                return Err(CohortError::Validation(format!(
                    "attribute '{}' belongs to entity '{}', not '{}'",
                    attribute_id, attr.entity_id, entity_id
                )));
            }
            attributes.insert((entity_id, attribute_id), attr);
        }

        Ok(ResolvedDefs {
            attributes,
            relationships,
        })
    }

    /// Fetch a relationship (once) and verify it starts at the current
    /// context entity
    async fn fetch_relationship(
        &self,
        relationship_id: &str,
        ctx_entity: &str,
        cache: &mut HashMap<String, EntityRelationshipDefinition>,
    ) -> Result<EntityRelationshipDefinition> {
        if !cache.contains_key(relationship_id) {
            let rel = self.metadata.get_relationship(relationship_id).await?;
            cache.insert(relationship_id.to_string(), rel);
        }
        let rel = &cache[relationship_id];

        if rel.source_entity_id != ctx_entity {
            return Err(CohortError::Validation(format!(
                "relationship '{}' starts at entity '{}' but is used in context '{}'",
                relationship_id, rel.source_entity_id, ctx_entity
            )));
        }

        Ok(rel.clone())
    }
}

/// Emit the boolean clause for one node
fn emit_node(
    node: &RuleNode,
    alias: &str,
    ctx_entity: &str,
    defs: &ResolvedDefs,
    state: &mut EmitState,
) -> Result<String> {
    match node {
        RuleNode::Group {
            logical_operator,
            rules,
            ..
        } => {
            let op = LogicalOperator::resolve(logical_operator.as_deref(), rules.len())?;
            if rules.is_empty() {
                return Ok("TRUE".to_string());
            }

            let mut clauses = Vec::with_capacity(rules.len());
            for child in rules {
                let clause = emit_node(child, alias, ctx_entity, defs, state)?;
                clauses.push(format!("({})", clause));
            }
            Ok(clauses.join(&format!(" {} ", op.sql())))
        }

        RuleNode::Condition {
            attribute_id,
            operator,
            value,
            value_type,
            ..
        } => {
            let attr = defs.attribute(ctx_entity, attribute_id)?;
            emit_predicate(alias, attr, operator, value, value_type.as_deref(), state)
        }

        RuleNode::RelationshipGroup {
            relationship_id,
            related_entity_rules,
        } => {
            let rel = defs.relationship(relationship_id)?.clone();
            let inner_alias = state.next_alias();
            let prelude = emit_exists_prelude(alias, &inner_alias, &rel, defs, state)?;
            let inner = emit_node(
                related_entity_rules,
                &inner_alias,
                &rel.target_entity_id,
                defs,
                state,
            )?;
            Ok(format!("EXISTS ({} AND ({}))", prelude, inner))
        }

        RuleNode::RelatedAttributeCondition {
            relationship_id,
            attribute_id,
            operator,
            value,
            value_type,
        } => {
            let rel = defs.relationship(relationship_id)?.clone();
            let inner_alias = state.next_alias();
            let prelude = emit_exists_prelude(alias, &inner_alias, &rel, defs, state)?;
            let attr = defs.attribute(&rel.target_entity_id, attribute_id)?;
            let predicate =
                emit_predicate(&inner_alias, attr, operator, value, value_type.as_deref(), state)?;
            Ok(format!("EXISTS ({} AND ({}))", prelude, predicate))
        }
    }
}

/// Emit the shared EXISTS scaffolding for a relationship: the inner scan
/// plus the bag-to-bag join
fn emit_exists_prelude(
    outer_alias: &str,
    inner_alias: &str,
    rel: &EntityRelationshipDefinition,
    defs: &ResolvedDefs,
    state: &mut EmitState,
) -> Result<String> {
    let source_attr = defs.attribute(&rel.source_entity_id, &rel.source_attribute_id)?;
    let target_attr = defs.attribute(&rel.target_entity_id, &rel.target_attribute_id)?;
    let entity_param = state.push(SqlValue::Text(rel.target_entity_id.clone()));

    Ok(format!(
        "SELECT 1 FROM processed_entities {inner} \
         WHERE {inner}.entity_definition_id = {param} \
         AND ({outer}.attributes->>'{src}') = ({inner}.attributes->>'{tgt}')",
        inner = inner_alias,
        outer = outer_alias,
        param = entity_param,
        src = source_attr.name,
        tgt = target_attr.name,
    ))
}

/// Emit one leaf predicate against the given alias
fn emit_predicate(
    alias: &str,
    attr: &AttributeDefinition,
    operator: &str,
    value: &serde_json::Value,
    value_type: Option<&str>,
    state: &mut EmitState,
) -> Result<String> {
    let op = ConditionOperator::parse(operator)?;
    let data_type = match value_type {
        Some(tag) => AttributeDataType::parse(tag)?,
        None => attr.data_type,
    };

    let projection = format!("({}.attributes->>'{}')", alias, attr.name);

    match op {
        ConditionOperator::IsNull => Ok(format!("{} IS NULL", projection)),
        ConditionOperator::IsNotNull => Ok(format!("{} IS NOT NULL", projection)),

        // Null-safe boolean checks; no parameter, no right-hand value
        ConditionOperator::IsTrue => Ok(format!("{}::boolean IS TRUE", projection)),
        ConditionOperator::IsFalse => Ok(format!("{}::boolean IS FALSE", projection)),

        ConditionOperator::In | ConditionOperator::NotIn => {
            let items = value.as_array().ok_or_else(|| {
                CohortError::Validation(format!(
                    "operator '{}' on '{}' requires a list value",
                    operator, attr.name
                ))
            })?;

            if items.is_empty() {
                // Vacuous membership test collapses to a constant
                return Ok(match op {
                    ConditionOperator::In => "FALSE".to_string(),
                    _ => "TRUE".to_string(),
                });
            }

            let placeholders: Vec<String> = items
                .iter()
                .map(|item| coerce_value(data_type, item, &attr.name).map(|v| state.push(v)))
                .collect::<Result<_>>()?;

            let keyword = if op == ConditionOperator::In {
                "IN"
            } else {
                "NOT IN"
            };
            Ok(format!(
                "{}{} {} ({})",
                projection,
                cast_suffix(data_type),
                keyword,
                placeholders.join(", ")
            ))
        }

        ConditionOperator::Contains | ConditionOperator::DoesNotContain => {
            let needle = string_value(value, &attr.name)?;
            let param = state.push(SqlValue::Text(format!("%{}%", needle)));
            Ok(format!("{} {} {}", projection, op.sql_symbol(), param))
        }

        ConditionOperator::Like
        | ConditionOperator::NotLike
        | ConditionOperator::ILike
        | ConditionOperator::NotILike => {
            let pattern = string_value(value, &attr.name)?;
            let param = state.push(SqlValue::Text(pattern));
            Ok(format!("{} {} {}", projection, op.sql_symbol(), param))
        }

        ConditionOperator::Eq
        | ConditionOperator::Ne
        | ConditionOperator::Gt
        | ConditionOperator::Lt
        | ConditionOperator::Ge
        | ConditionOperator::Le => {
            let param = state.push(coerce_value(data_type, value, &attr.name)?);
            Ok(format!(
                "{}{} {} {}",
                projection,
                cast_suffix(data_type),
                op.sql_symbol(),
                param
            ))
        }
    }
}

/// The cast applied to the text projected out of the JSON bag
fn cast_suffix(data_type: AttributeDataType) -> &'static str {
    match data_type {
        AttributeDataType::String => "",
        AttributeDataType::Integer => "::bigint",
        AttributeDataType::Float => "::numeric",
        AttributeDataType::Boolean => "::boolean",
        AttributeDataType::Date | AttributeDataType::DateTime => "::timestamptz",
    }
}

/// Coerce a rule value into the typed parameter matching the cast
fn coerce_value(
    data_type: AttributeDataType,
    value: &serde_json::Value,
    attr_name: &str,
) -> Result<SqlValue> {
    let mismatch = || {
        CohortError::Validation(format!(
            "value {} does not match {:?} type of attribute '{}'",
            value, data_type, attr_name
        ))
    };

    match data_type {
        AttributeDataType::String => value
            .as_str()
            .map(|s| SqlValue::Text(s.to_string()))
            .ok_or_else(mismatch),

        AttributeDataType::Integer => value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
            .map(SqlValue::Int)
            .ok_or_else(mismatch),

        AttributeDataType::Float => value
            .as_f64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
            .map(SqlValue::Float)
            .ok_or_else(mismatch),

        AttributeDataType::Boolean => value
            .as_bool()
            .or_else(|| match value.as_str() {
                Some("true") => Some(true),
                Some("false") => Some(false),
                _ => None,
            })
            .map(SqlValue::Bool)
            .ok_or_else(mismatch),

        AttributeDataType::Date | AttributeDataType::DateTime => {
            let text = value.as_str().ok_or_else(mismatch)?;
            parse_timestamp(text).ok_or_else(mismatch).map(SqlValue::Timestamp)
        }
    }
}

/// Accept RFC 3339 timestamps and bare dates (midnight UTC)
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}

fn string_value(value: &serde_json::Value, attr_name: &str) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| {
            CohortError::Validation(format!(
                "string operator on '{}' requires a string value, got {}",
                attr_name, value
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testutil::FakeMetadata;
    use serde_json::json;

    fn customer_metadata() -> FakeMetadata {
        let mut meta = FakeMetadata::new();
        meta.add_entity("ent-customer", "Customer")
            .add_attribute(
                "ent-customer",
                "attr-tier",
                "tier",
                AttributeDataType::String,
            )
            .add_attribute(
                "ent-customer",
                "attr-age",
                "age",
                AttributeDataType::Integer,
            )
            .add_attribute(
                "ent-customer",
                "attr-active",
                "active",
                AttributeDataType::Boolean,
            )
            .add_attribute(
                "ent-customer",
                "attr-signup",
                "signed_up_at",
                AttributeDataType::DateTime,
            )
            .add_attribute("ent-customer", "attr-id", "id", AttributeDataType::String);
        meta
    }

    fn order_customer_metadata() -> FakeMetadata {
        let mut meta = customer_metadata();
        meta.add_entity("ent-order", "Order")
            .add_attribute(
                "ent-order",
                "attr-customer-id",
                "customer_id",
                AttributeDataType::String,
            )
            .add_attribute(
                "ent-order",
                "attr-total",
                "total",
                AttributeDataType::Float,
            )
            .add_relationship(
                "rel-places",
                "ent-order",
                "ent-customer",
                "attr-customer-id",
                "attr-id",
            );
        meta
    }

    fn group(entity: &str, rules: serde_json::Value) -> GroupDefinition {
        GroupDefinition {
            id: "grp-test".to_string(),
            entity_definition_id: entity.to_string(),
            name: "test group".to_string(),
            rules,
        }
    }

    async fn compile(meta: &FakeMetadata, grp: &GroupDefinition) -> Result<CompiledQuery> {
        RuleCompiler::new(meta).compile(grp).await
    }

    fn placeholder_count(sql: &str) -> usize {
        sql.matches('$').count()
    }

    #[tokio::test]
    async fn single_string_condition() {
        let meta = customer_metadata();
        let grp = group(
            "ent-customer",
            json!({
                "type": "group",
                "entity_id": "ent-customer",
                "logical_operator": "AND",
                "rules": [{
                    "type": "condition",
                    "attribute_id": "attr-tier",
                    "attribute_name": "tier",
                    "operator": "=",
                    "value": "GOLD"
                }]
            }),
        );

        let compiled = compile(&meta, &grp).await.unwrap();

        assert!(compiled.sql.starts_with(
            "SELECT pe1.id FROM processed_entities pe1 WHERE pe1.entity_definition_id = $1"
        ));
        assert!(compiled.sql.contains("(pe1.attributes->>'tier') = $2"));
        assert_eq!(
            compiled.params,
            vec![
                SqlValue::Text("ent-customer".to_string()),
                SqlValue::Text("GOLD".to_string())
            ]
        );
        assert_eq!(placeholder_count(&compiled.sql), compiled.params.len());
    }

    #[tokio::test]
    async fn numeric_or_group_casts_to_bigint() {
        let meta = customer_metadata();
        let grp = group(
            "ent-customer",
            json!({
                "type": "group",
                "logical_operator": "OR",
                "rules": [
                    {"type": "condition", "attribute_id": "attr-age", "operator": "<", "value": 18},
                    {"type": "condition", "attribute_id": "attr-age", "operator": ">=", "value": 65}
                ]
            }),
        );

        let compiled = compile(&meta, &grp).await.unwrap();

        assert!(compiled.sql.contains("(pe1.attributes->>'age')::bigint < $2"));
        assert!(compiled.sql.contains("(pe1.attributes->>'age')::bigint >= $3"));
        assert!(compiled.sql.contains(") OR ("));
        assert_eq!(
            compiled.params[1..],
            [SqlValue::Int(18), SqlValue::Int(65)]
        );
    }

    #[tokio::test]
    async fn relationship_group_emits_exists_join() {
        let meta = order_customer_metadata();
        let grp = group(
            "ent-order",
            json!({
                "type": "group",
                "entity_id": "ent-order",
                "logical_operator": "AND",
                "rules": [{
                    "type": "relationship_group",
                    "relationship_id": "rel-places",
                    "related_entity_rules": {
                        "type": "group",
                        "logical_operator": "AND",
                        "rules": [{
                            "type": "condition",
                            "attribute_id": "attr-tier",
                            "operator": "=",
                            "value": "GOLD"
                        }]
                    }
                }]
            }),
        );

        let compiled = compile(&meta, &grp).await.unwrap();

        assert!(compiled
            .sql
            .contains("EXISTS (SELECT 1 FROM processed_entities pe2"));
        assert!(compiled
            .sql
            .contains("pe2.entity_definition_id = $2"));
        assert!(compiled
            .sql
            .contains("(pe1.attributes->>'customer_id') = (pe2.attributes->>'id')"));
        assert!(compiled.sql.contains("(pe2.attributes->>'tier') = $3"));
        assert_eq!(
            compiled.params,
            vec![
                SqlValue::Text("ent-order".to_string()),
                SqlValue::Text("ent-customer".to_string()),
                SqlValue::Text("GOLD".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn related_attribute_condition_compiles_to_same_exists_shape() {
        let meta = order_customer_metadata();
        let grp = group(
            "ent-order",
            json!({
                "type": "group",
                "logical_operator": "AND",
                "rules": [{
                    "type": "related_attribute_condition",
                    "relationship_id": "rel-places",
                    "attribute_id": "attr-tier",
                    "operator": "=",
                    "value": "GOLD"
                }]
            }),
        );

        let compiled = compile(&meta, &grp).await.unwrap();

        assert!(compiled
            .sql
            .contains("EXISTS (SELECT 1 FROM processed_entities pe2"));
        assert!(compiled.sql.contains("(pe2.attributes->>'tier') = $3"));
        assert_eq!(placeholder_count(&compiled.sql), compiled.params.len());
    }

    #[tokio::test]
    async fn empty_in_list_is_constant_false() {
        let meta = customer_metadata();
        let grp = group(
            "ent-customer",
            json!({
                "type": "group",
                "logical_operator": "AND",
                "rules": [{
                    "type": "condition",
                    "attribute_id": "attr-tier",
                    "operator": "in",
                    "value": []
                }]
            }),
        );

        let compiled = compile(&meta, &grp).await.unwrap();

        assert!(compiled.sql.contains("(FALSE)"));
        // Only the root entity parameter remains
        assert_eq!(compiled.params.len(), 1);
    }

    #[tokio::test]
    async fn empty_not_in_list_is_constant_true() {
        let meta = customer_metadata();
        let grp = group(
            "ent-customer",
            json!({
                "type": "group",
                "logical_operator": "AND",
                "rules": [{
                    "type": "condition",
                    "attribute_id": "attr-tier",
                    "operator": "not in",
                    "value": []
                }]
            }),
        );

        let compiled = compile(&meta, &grp).await.unwrap();
        assert!(compiled.sql.contains("(TRUE)"));
    }

    #[tokio::test]
    async fn in_list_binds_one_parameter_per_element() {
        let meta = customer_metadata();
        let grp = group(
            "ent-customer",
            json!({
                "type": "group",
                "logical_operator": "AND",
                "rules": [{
                    "type": "condition",
                    "attribute_id": "attr-tier",
                    "operator": "IN",
                    "value": ["GOLD", "SILVER", "BRONZE"]
                }]
            }),
        );

        let compiled = compile(&meta, &grp).await.unwrap();

        assert!(compiled
            .sql
            .contains("(pe1.attributes->>'tier') IN ($2, $3, $4)"));
        assert_eq!(compiled.params.len(), 4);
        assert_eq!(placeholder_count(&compiled.sql), 4);
    }

    #[tokio::test]
    async fn contains_wraps_value_in_wildcards() {
        let meta = customer_metadata();
        let grp = group(
            "ent-customer",
            json!({
                "type": "group",
                "logical_operator": "AND",
                "rules": [{
                    "type": "condition",
                    "attribute_id": "attr-tier",
                    "operator": "contains",
                    "value": "OL"
                }]
            }),
        );

        let compiled = compile(&meta, &grp).await.unwrap();

        assert!(compiled.sql.contains("(pe1.attributes->>'tier') LIKE $2"));
        assert_eq!(compiled.params[1], SqlValue::Text("%OL%".to_string()));
    }

    #[tokio::test]
    async fn boolean_check_emits_no_parameter() {
        let meta = customer_metadata();
        let grp = group(
            "ent-customer",
            json!({
                "type": "group",
                "logical_operator": "AND",
                "rules": [{
                    "type": "condition",
                    "attribute_id": "attr-active",
                    "operator": "is_true",
                    "value": null
                }]
            }),
        );

        let compiled = compile(&meta, &grp).await.unwrap();

        assert!(compiled
            .sql
            .contains("(pe1.attributes->>'active')::boolean IS TRUE"));
        assert_eq!(compiled.params.len(), 1);
    }

    #[tokio::test]
    async fn datetime_condition_binds_timestamp() {
        let meta = customer_metadata();
        let grp = group(
            "ent-customer",
            json!({
                "type": "group",
                "logical_operator": "AND",
                "rules": [{
                    "type": "condition",
                    "attribute_id": "attr-signup",
                    "operator": ">=",
                    "value": "2024-03-01"
                }]
            }),
        );

        let compiled = compile(&meta, &grp).await.unwrap();

        assert!(compiled
            .sql
            .contains("(pe1.attributes->>'signed_up_at')::timestamptz >= $2"));
        match &compiled.params[1] {
            SqlValue::Timestamp(ts) => assert_eq!(ts.to_rfc3339(), "2024-03-01T00:00:00+00:00"),
            other => panic!("expected timestamp param, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn value_type_override_wins_over_declared_type() {
        let meta = customer_metadata();
        let grp = group(
            "ent-customer",
            json!({
                "type": "group",
                "logical_operator": "AND",
                "rules": [{
                    "type": "condition",
                    "attribute_id": "attr-tier",
                    "operator": "=",
                    "value": "42",
                    "value_type": "integer"
                }]
            }),
        );

        let compiled = compile(&meta, &grp).await.unwrap();

        assert!(compiled.sql.contains("(pe1.attributes->>'tier')::bigint = $2"));
        assert_eq!(compiled.params[1], SqlValue::Int(42));
    }

    #[tokio::test]
    async fn cross_entity_condition_without_wrapper_fails_before_emit() {
        let meta = order_customer_metadata();
        let grp = group(
            "ent-order",
            json!({
                "type": "group",
                "logical_operator": "AND",
                "rules": [{
                    "type": "condition",
                    "attribute_id": "attr-tier",
                    "entity_id": "ent-customer",
                    "operator": "=",
                    "value": "GOLD"
                }]
            }),
        );

        assert!(matches!(
            compile(&meta, &grp).await,
            Err(CohortError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn missing_relationship_is_not_found() {
        let meta = customer_metadata();
        let grp = group(
            "ent-customer",
            json!({
                "type": "group",
                "logical_operator": "AND",
                "rules": [{
                    "type": "relationship_group",
                    "relationship_id": "rel-ghost",
                    "related_entity_rules": {"type": "group", "rules": []}
                }]
            }),
        );

        assert!(matches!(
            compile(&meta, &grp).await,
            Err(CohortError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn relationship_used_from_wrong_context_fails() {
        let meta = order_customer_metadata();
        // rel-places starts at ent-order, but this group is over ent-customer
        let grp = group(
            "ent-customer",
            json!({
                "type": "group",
                "logical_operator": "AND",
                "rules": [{
                    "type": "relationship_group",
                    "relationship_id": "rel-places",
                    "related_entity_rules": {"type": "group", "rules": []}
                }]
            }),
        );

        assert!(matches!(
            compile(&meta, &grp).await,
            Err(CohortError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn missing_attribute_is_not_found() {
        let meta = customer_metadata();
        let grp = group(
            "ent-customer",
            json!({
                "type": "group",
                "logical_operator": "AND",
                "rules": [{
                    "type": "condition",
                    "attribute_id": "attr-ghost",
                    "operator": "=",
                    "value": "x"
                }]
            }),
        );

        assert!(matches!(
            compile(&meta, &grp).await,
            Err(CohortError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_operator_is_rejected() {
        let meta = customer_metadata();
        let grp = group(
            "ent-customer",
            json!({
                "type": "group",
                "logical_operator": "AND",
                "rules": [{
                    "type": "condition",
                    "attribute_id": "attr-tier",
                    "operator": "between",
                    "value": "x"
                }]
            }),
        );

        assert!(matches!(
            compile(&meta, &grp).await,
            Err(CohortError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn value_type_mismatch_is_rejected() {
        let meta = customer_metadata();
        let grp = group(
            "ent-customer",
            json!({
                "type": "group",
                "logical_operator": "AND",
                "rules": [{
                    "type": "condition",
                    "attribute_id": "attr-age",
                    "operator": ">",
                    "value": "not-a-number"
                }]
            }),
        );

        assert!(matches!(
            compile(&meta, &grp).await,
            Err(CohortError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn bare_condition_root_compiles_via_wrapping() {
        let meta = customer_metadata();
        let grp = group(
            "ent-customer",
            json!({
                "type": "condition",
                "attribute_id": "attr-tier",
                "operator": "=",
                "value": "GOLD"
            }),
        );

        let compiled = compile(&meta, &grp).await.unwrap();
        assert!(compiled.sql.contains("(pe1.attributes->>'tier') = $2"));
    }

    #[tokio::test]
    async fn nested_relationships_number_aliases_monotonically() {
        let mut meta = order_customer_metadata();
        meta.add_entity("ent-region", "Region")
            .add_attribute(
                "ent-region",
                "attr-region-code",
                "code",
                AttributeDataType::String,
            )
            .add_attribute(
                "ent-customer",
                "attr-region-ref",
                "region_code",
                AttributeDataType::String,
            )
            .add_relationship(
                "rel-lives-in",
                "ent-customer",
                "ent-region",
                "attr-region-ref",
                "attr-region-code",
            );

        let grp = group(
            "ent-order",
            json!({
                "type": "group",
                "logical_operator": "AND",
                "rules": [{
                    "type": "relationship_group",
                    "relationship_id": "rel-places",
                    "related_entity_rules": {
                        "type": "group",
                        "logical_operator": "AND",
                        "rules": [{
                            "type": "relationship_group",
                            "relationship_id": "rel-lives-in",
                            "related_entity_rules": {
                                "type": "group",
                                "logical_operator": "AND",
                                "rules": [{
                                    "type": "condition",
                                    "attribute_id": "attr-region-code",
                                    "operator": "=",
                                    "value": "EU"
                                }]
                            }
                        }]
                    }
                }]
            }),
        );

        let compiled = compile(&meta, &grp).await.unwrap();

        assert!(compiled.sql.contains("processed_entities pe2"));
        assert!(compiled.sql.contains("processed_entities pe3"));
        assert!(compiled
            .sql
            .contains("(pe2.attributes->>'region_code') = (pe3.attributes->>'code')"));
        assert!(compiled.sql.contains("(pe3.attributes->>'code') = $4"));
        assert_eq!(placeholder_count(&compiled.sql), compiled.params.len());
    }

    #[tokio::test]
    async fn or_mixes_conditions_and_relationship_groups() {
        let meta = order_customer_metadata();
        let grp = group(
            "ent-order",
            json!({
                "type": "group",
                "logical_operator": "OR",
                "rules": [
                    {"type": "condition", "attribute_id": "attr-total", "operator": ">", "value": 100.0},
                    {
                        "type": "related_attribute_condition",
                        "relationship_id": "rel-places",
                        "attribute_id": "attr-tier",
                        "operator": "=",
                        "value": "GOLD"
                    }
                ]
            }),
        );

        let compiled = compile(&meta, &grp).await.unwrap();

        assert!(compiled
            .sql
            .contains("(pe1.attributes->>'total')::numeric > $2"));
        assert!(compiled.sql.contains(") OR (EXISTS"));
        assert_eq!(placeholder_count(&compiled.sql), compiled.params.len());
    }

    #[tokio::test]
    async fn group_without_operator_over_two_children_is_rejected() {
        let meta = customer_metadata();
        let grp = group(
            "ent-customer",
            json!({
                "type": "group",
                "rules": [
                    {"type": "condition", "attribute_id": "attr-tier", "operator": "=", "value": "A"},
                    {"type": "condition", "attribute_id": "attr-tier", "operator": "=", "value": "B"}
                ]
            }),
        );

        assert!(matches!(
            compile(&meta, &grp).await,
            Err(CohortError::Validation(_))
        ));
    }
}
