//! Builds parameterized SELECT (with eager relation subqueries), INSERT, UPDATE, DELETE
//! from compiled model definitions.

use crate::config::ScopeConfig;
use crate::error::AppError;
use crate::model::{ModelDefinition, ModelRegistry};
use crate::relation::{split_column, Modify, RelationDefinition, RelationExpression};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const MAIN_ALIAS: &str = "main";
const MAX_LIMIT: u32 = 1000;

/// Quote identifier for PostgreSQL (safe: only from model config).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified table name part by part.
fn quoted_path(s: &str) -> String {
    s.split('.').map(quoted).collect::<Vec<_>>().join(".")
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
    aliases: u32,
}

impl QueryBuf {
    /// Statement written by hand (identifiers must not come from user input).
    pub fn with_sql(sql: impl Into<String>, params: Vec<Value>) -> Self {
        QueryBuf {
            sql: sql.into(),
            params,
            aliases: 0,
        }
    }

    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
            aliases: 0,
        }
    }

    fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }

    fn next_alias(&mut self, prefix: &str) -> String {
        self.aliases += 1;
        format!("{}{}", prefix, self.aliases)
    }
}

/// SQL cast for a property, derived from its JSON schema, so text-typed params bind
/// against typed columns.
fn cast_for(schema: &Value) -> Option<&'static str> {
    match schema.get("format").and_then(Value::as_str) {
        Some("date-time") => return Some("timestamptz"),
        Some("date") => return Some("date"),
        Some("uuid") => return Some("uuid"),
        _ => {}
    }
    let ty = match schema.get("type") {
        Some(Value::String(s)) => s.as_str(),
        Some(Value::Array(list)) => list
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null")
            .unwrap_or(""),
        _ => "",
    };
    match ty {
        "integer" => Some("bigint"),
        "number" => Some("double precision"),
        "boolean" => Some("boolean"),
        "object" | "array" => Some("jsonb"),
        "string" => Some("text"),
        _ => None,
    }
}

fn placeholder(model: &ModelDefinition, property: &str, n: u32) -> String {
    model
        .properties
        .get(property)
        .and_then(cast_for)
        .map(|t| format!("${}::{}", n, t))
        .unwrap_or_else(|| format!("${}", n))
}

/// SELECT list for `alias`, every column aliased back to its property name.
/// Numeric columns are read as double precision so rows decode without a decimal type.
fn column_list(model: &ModelDefinition, alias: &str) -> Vec<String> {
    model
        .columns()
        .into_iter()
        .map(|(property, column)| {
            let is_number = model
                .properties
                .get(&property)
                .and_then(|s| s.get("type"))
                .and_then(Value::as_str)
                == Some("number");
            let expr = if is_number {
                format!("{}.{}::double precision", alias, quoted(&column))
            } else {
                format!("{}.{}", alias, quoted(&column))
            };
            format!("{} AS {}", expr, quoted(&property))
        })
        .collect()
}

#[derive(Default)]
struct Clauses {
    conditions: Vec<String>,
    order: Vec<String>,
    limit: Option<u32>,
}

impl Clauses {
    fn where_sql(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    fn order_sql(&self) -> String {
        if self.order.is_empty() {
            String::new()
        } else {
            format!(" ORDER BY {}", self.order.join(", "))
        }
    }

    fn restrict_limit(&mut self, limit: u32) {
        self.limit = Some(self.limit.map_or(limit, |l| l.min(limit)));
    }
}

/// Equality conditions on properties of `model`; unknown properties are ignored.
fn push_equalities<'a>(
    q: &mut QueryBuf,
    model: &ModelDefinition,
    alias: &str,
    filters: impl IntoIterator<Item = (&'a String, &'a Value)>,
    clauses: &mut Clauses,
) {
    for (property, value) in filters {
        if !model.properties.contains_key(property) {
            continue;
        }
        let column = format!("{}.{}", alias, quoted(&model.column(property)));
        if value.is_null() {
            clauses.conditions.push(format!("{} IS NULL", column));
        } else {
            let n = q.push_param(value.clone());
            clauses
                .conditions
                .push(format!("{} = {}", column, placeholder(model, property, n)));
        }
    }
}

fn apply_scope(q: &mut QueryBuf, model: &ModelDefinition, alias: &str, scope: &ScopeConfig, clauses: &mut Clauses) {
    push_equalities(q, model, alias, &scope.where_, clauses);
    if let Some(order_by) = &scope.order_by {
        let direction = if scope.desc { "DESC" } else { "ASC" };
        for property in order_by.to_vec() {
            clauses
                .order
                .push(format!("{}.{} {}", alias, quoted(&model.column(&property)), direction));
        }
    }
    if let Some(limit) = scope.limit {
        clauses.restrict_limit(limit);
    }
}

fn apply_modify(q: &mut QueryBuf, model: &ModelDefinition, alias: &str, modify: &Modify, clauses: &mut Clauses) {
    match modify {
        Modify::Scope(name) => match model.scopes.get(name) {
            Some(scope) => apply_scope(q, model, alias, scope, clauses),
            None => tracing::warn!(model = %model.name, scope = %name, "relation modifier names an unknown scope"),
        },
        Modify::Filter(filter) => push_equalities(q, model, alias, filter, clauses),
    }
}

fn relation_subquery(
    q: &mut QueryBuf,
    registry: &ModelRegistry,
    owner_alias: &str,
    relation: &RelationDefinition,
    node: &RelationExpression,
    eager_filters: Option<&BTreeMap<String, ScopeConfig>>,
) -> Result<String, AppError> {
    let related = registry
        .get(&relation.related)
        .ok_or_else(|| AppError::Internal(format!("unknown related model {}", relation.related)))?;
    let alias = q.next_alias("r");

    let mut select = column_list(related, &alias);
    for (child_name, child) in &node.children {
        let child_relation = related
            .relations
            .get(child_name)
            .ok_or_else(|| AppError::BadRequest(format!("Invalid child expression: {}", child_name)))?;
        let sub = relation_subquery(q, registry, &alias, child_relation, child, eager_filters)?;
        select.push(format!("{} AS {}", sub, quoted(child_name)));
    }

    let mut from = format!("{} {}", quoted_path(&related.table), alias);
    let mut clauses = Clauses::default();
    match &relation.join.through {
        Some(through) => {
            let t = q.next_alias("t");
            let on = through
                .to
                .iter()
                .zip(&relation.join.to)
                .map(|(tc, rc)| {
                    format!(
                        "{}.{} = {}.{}",
                        t,
                        quoted(split_column(tc).1),
                        alias,
                        quoted(split_column(rc).1)
                    )
                })
                .collect::<Vec<_>>()
                .join(" AND ");
            from.push_str(&format!(" JOIN {} {} ON {}", quoted_path(&through.table), t, on));
            for (tc, oc) in through.from.iter().zip(&relation.join.from) {
                clauses.conditions.push(format!(
                    "{}.{} = {}.{}",
                    t,
                    quoted(split_column(tc).1),
                    owner_alias,
                    quoted(split_column(oc).1)
                ));
            }
        }
        None => {
            for (oc, rc) in relation.join.from.iter().zip(&relation.join.to) {
                clauses.conditions.push(format!(
                    "{}.{} = {}.{}",
                    alias,
                    quoted(split_column(rc).1),
                    owner_alias,
                    quoted(split_column(oc).1)
                ));
            }
        }
    }

    if let Some(modify) = &relation.modify {
        apply_modify(q, related, &alias, modify, &mut clauses);
    }
    // A model scope wins over an action filter of the same name.
    for arg in &node.args {
        let scope = related
            .scopes
            .get(arg)
            .or_else(|| eager_filters.and_then(|filters| filters.get(arg)))
            .ok_or_else(|| AppError::BadRequest(format!("unknown eager modifier '{}' on {}", arg, related.name)))?;
        apply_scope(q, related, &alias, scope, &mut clauses);
    }
    if !relation.kind.is_to_many() {
        clauses.restrict_limit(1);
    }

    let limit = clauses.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let inner = format!(
        "SELECT {} FROM {}{}{}{}",
        select.join(", "),
        from,
        clauses.where_sql(),
        clauses.order_sql(),
        limit
    );
    Ok(if relation.kind.is_to_many() {
        format!("(SELECT COALESCE(json_agg(row_to_json(sub)), '[]'::json) FROM ({}) sub)", inner)
    } else {
        format!("(SELECT row_to_json(sub) FROM ({}) sub)", inner)
    })
}

/// Input of [`select`].
#[derive(Default)]
pub struct SelectQuery<'a> {
    /// (property, value) equality filters.
    pub filters: &'a [(String, Value)],
    /// Named scopes of the model; unknown names are rejected.
    pub scopes: &'a [String],
    pub eager: Option<&'a RelationExpression>,
    /// Named filters the eager expression may use on any relation node.
    pub eager_filters: Option<&'a BTreeMap<String, ScopeConfig>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// SELECT with eager relations as scalar subqueries: `row_to_json` for to-one relations,
/// `json_agg` for to-many relations, many-to-many joined through their through table.
pub fn select(registry: &ModelRegistry, model: &ModelDefinition, query: &SelectQuery<'_>) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::new();
    let mut select_parts = column_list(model, MAIN_ALIAS);
    if let Some(eager) = query.eager {
        for (name, child) in &eager.children {
            let relation = model
                .relations
                .get(name)
                .ok_or_else(|| AppError::BadRequest(format!("Invalid child expression: {}", name)))?;
            let sub = relation_subquery(&mut q, registry, MAIN_ALIAS, relation, child, query.eager_filters)?;
            select_parts.push(format!("{} AS {}", sub, quoted(name)));
        }
    }

    let mut clauses = Clauses::default();
    push_equalities(&mut q, model, MAIN_ALIAS, query.filters.iter().map(|(k, v)| (k, v)), &mut clauses);
    for name in query.scopes {
        let scope = model
            .scopes
            .get(name)
            .ok_or_else(|| AppError::BadRequest(format!("unknown scope '{}' on {}", name, model.name)))?;
        apply_scope(&mut q, model, MAIN_ALIAS, scope, &mut clauses);
    }
    if clauses.order.is_empty() {
        clauses.order = model
            .primary_key
            .iter()
            .map(|pk| format!("{}.{}", MAIN_ALIAS, quoted(&model.column(pk))))
            .collect();
    }
    if let Some(limit) = query.limit {
        clauses.restrict_limit(limit);
    }
    let limit_clause = clauses
        .limit
        .map(|n| format!(" LIMIT {}", n.min(MAX_LIMIT)))
        .unwrap_or_default();
    let offset_clause = query.offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();

    q.sql = format!(
        "SELECT {} FROM {} {}{}{}{}{}",
        select_parts.join(", "),
        quoted_path(&model.table),
        MAIN_ALIAS,
        clauses.where_sql(),
        clauses.order_sql(),
        limit_clause,
        offset_clause
    );
    Ok(q)
}

fn pk_filters(model: &ModelDefinition, id: &[Value]) -> Result<Vec<(String, Value)>, AppError> {
    if id.len() != model.primary_key.len() {
        return Err(AppError::BadRequest(format!(
            "{} expects {} id value(s)",
            model.name,
            model.primary_key.len()
        )));
    }
    Ok(model.primary_key.iter().cloned().zip(id.iter().cloned()).collect())
}

/// SELECT one row by primary key, with optional eager relations.
pub fn select_by_id(
    registry: &ModelRegistry,
    model: &ModelDefinition,
    id: &[Value],
    eager: Option<&RelationExpression>,
    eager_filters: Option<&BTreeMap<String, ScopeConfig>>,
) -> Result<QueryBuf, AppError> {
    let filters = pk_filters(model, id)?;
    select(
        registry,
        model,
        &SelectQuery {
            filters: &filters,
            eager,
            eager_filters,
            limit: Some(1),
            ..Default::default()
        },
    )
}

fn returning(model: &ModelDefinition) -> String {
    model
        .columns()
        .into_iter()
        .map(|(property, column)| format!("{} AS {}", quoted(&column), quoted(&property)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn pk_condition(q: &mut QueryBuf, model: &ModelDefinition, id: &[Value]) -> Result<String, AppError> {
    let filters = pk_filters(model, id)?;
    Ok(filters
        .into_iter()
        .map(|(property, value)| {
            let n = q.push_param(value);
            format!("{} = {}", quoted(&model.column(&property)), placeholder(model, &property, n))
        })
        .collect::<Vec<_>>()
        .join(" AND "))
}

/// INSERT of the properties present in `body`; omitted columns take their database default.
/// Relation keys are not columns and are skipped.
pub fn insert(model: &ModelDefinition, body: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let timestamps = model.has_capability("timestamps");
    let mut cols = Vec::new();
    let mut values = Vec::new();
    for (property, column) in model.columns() {
        match body.get(&property) {
            Some(value) => {
                let n = q.push_param(value.clone());
                cols.push(quoted(&column));
                values.push(placeholder(model, &property, n));
            }
            None if timestamps && (property == "createdAt" || property == "updatedAt") => {
                cols.push(quoted(&column));
                values.push("NOW()".to_string());
            }
            None => {}
        }
    }
    q.sql = if cols.is_empty() {
        format!(
            "INSERT INTO {} DEFAULT VALUES RETURNING {}",
            quoted_path(&model.table),
            returning(model)
        )
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            quoted_path(&model.table),
            cols.join(", "),
            values.join(", "),
            returning(model)
        )
    };
    q
}

/// UPDATE by primary key: SET only properties present in `body`. Primary key properties are never updated.
pub fn update(model: &ModelDefinition, id: &[Value], body: &Map<String, Value>) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    for (property, column) in model.columns() {
        if model.primary_key.contains(&property) {
            continue;
        }
        if let Some(value) = body.get(&property) {
            let n = q.push_param(value.clone());
            sets.push(format!("{} = {}", quoted(&column), placeholder(model, &property, n)));
        }
    }
    if model.has_capability("timestamps") && !body.contains_key("updatedAt") {
        sets.push(format!("{} = NOW()", quoted(&model.column("updatedAt"))));
    }
    let condition = pk_condition(&mut q, model, id)?;
    q.sql = if sets.is_empty() {
        format!(
            "SELECT {} FROM {} WHERE {}",
            returning(model),
            quoted_path(&model.table),
            condition
        )
    } else {
        format!(
            "UPDATE {} SET {} WHERE {} RETURNING {}",
            quoted_path(&model.table),
            sets.join(", "),
            condition,
            returning(model)
        )
    };
    Ok(q)
}

/// DELETE by primary key.
pub fn delete(model: &ModelDefinition, id: &[Value]) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::new();
    let condition = pk_condition(&mut q, model, id)?;
    q.sql = format!(
        "DELETE FROM {} WHERE {} RETURNING {}",
        quoted_path(&model.table),
        condition,
        returning(model)
    );
    Ok(q)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::blog;
    use serde_json::json;

    #[test]
    fn select_with_filters_and_scope() {
        let registry = blog();
        let user = registry.get("User").unwrap();
        let filters = vec![("name".to_string(), json!("ann"))];
        let q = select(
            &registry,
            user,
            &SelectQuery {
                filters: &filters,
                limit: Some(5000),
                offset: Some(10),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(
            q.sql,
            "SELECT main.\"id\" AS \"id\", main.\"name\" AS \"name\" FROM \"user\" main \
             WHERE main.\"name\" = $1::text ORDER BY main.\"id\" LIMIT 1000 OFFSET 10"
        );
        assert_eq!(q.params, vec![json!("ann")]);

        let scopes = vec!["ghost".to_string()];
        let err = select(&registry, user, &SelectQuery { scopes: &scopes, ..Default::default() });
        assert!(matches!(err, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn eager_subqueries_follow_relation_kind() {
        let registry = blog();
        let user = registry.get("User").unwrap();
        let eager = RelationExpression::parse_str("posts(latest).author").unwrap();
        let q = select(&registry, user, &SelectQuery { eager: Some(&eager), ..Default::default() }).unwrap();
        assert!(q.sql.contains("COALESCE(json_agg(row_to_json(sub)), '[]'::json)"));
        assert!(q.sql.contains("r1.\"author_id\" = main.\"id\""));
        assert!(q.sql.contains("ORDER BY r1.\"created_at\" DESC"));
        assert!(q.sql.contains("(SELECT row_to_json(sub) FROM (SELECT"));
        assert!(q.sql.contains("r2.\"id\" = r1.\"author_id\""));
        assert!(q.sql.contains(") AS \"posts\""));

        let bad = RelationExpression::parse_str("comments").unwrap();
        assert!(select(&registry, user, &SelectQuery { eager: Some(&bad), ..Default::default() }).is_err());
    }

    #[test]
    fn eager_modifiers_resolve_to_scopes_or_filters() {
        let registry = blog();
        let user = registry.get("User").unwrap();
        let eager = RelationExpression::parse_str("posts(newest)").unwrap();
        let err = select(&registry, user, &SelectQuery { eager: Some(&eager), ..Default::default() });
        assert!(matches!(err, Err(AppError::BadRequest(m)) if m.contains("newest")));

        let filters: BTreeMap<String, ScopeConfig> = [(
            "newest".to_string(),
            ScopeConfig {
                limit: Some(3),
                ..Default::default()
            },
        )]
        .into_iter()
        .collect();
        let q = select(
            &registry,
            user,
            &SelectQuery {
                eager: Some(&eager),
                eager_filters: Some(&filters),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(q.sql.contains("LIMIT 3"));
    }

    #[test]
    fn insert_and_update_maintain_timestamps() {
        let registry = blog();
        let post = registry.get("Post").unwrap();
        let body = json!({ "title": "hi", "authorId": 1, "author": { "id": 1 } });
        let q = insert(post, body.as_object().unwrap());
        assert!(q.sql.starts_with("INSERT INTO \"post\" ("));
        assert!(q.sql.contains("NOW()"));
        assert!(!q.sql.contains("\"author\""));
        assert_eq!(q.params.len(), 2);

        let q = update(post, &[json!(3)], json!({ "title": "x", "id": 9 }).as_object().unwrap()).unwrap();
        assert!(q.sql.starts_with("UPDATE \"post\" SET \"title\" = $1::text, \"updated_at\" = NOW() WHERE \"id\" = $2::bigint"));
        assert_eq!(q.params, vec![json!("x"), json!(3)]);
    }

    #[test]
    fn delete_checks_key_arity() {
        let registry = blog();
        let user = registry.get("User").unwrap();
        let q = delete(user, &[json!(1)]).unwrap();
        assert!(q.sql.starts_with("DELETE FROM \"user\" WHERE \"id\" = $1::bigint RETURNING"));
        assert!(delete(user, &[json!(1), json!(2)]).is_err());
    }
}
