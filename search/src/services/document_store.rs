use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, warn};

use toolhub_models::{FieldPredicate, FilterOperator, Record};

use crate::errors::{SearchError, StoreErrorKind};

/// Structured-record access. Results are unordered; the caller ranks them.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Record>, SearchError>;

    async fn search(
        &self,
        predicates: &[FieldPredicate],
        limit: usize,
    ) -> Result<Vec<Record>, SearchError>;

    /// Every record, for the seeder. Paged internally; order is by id.
    fn stream_all(&self) -> BoxStream<'_, Result<Record, SearchError>>;
}

pub struct PostgresDocumentStore {
    pool: PgPool,
    timeout: Duration,
}

const STREAM_PAGE_SIZE: i64 = 500;

const SELECT_COLUMNS: &str = "id, name, description, long_description, categories, \
     functionality, search_keywords, use_cases, interfaces, deployment, technical, pricing, url";

impl PostgresDocumentStore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub async fn connect(database_url: &str, timeout: Duration) -> Result<Self, SearchError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| SearchError::document_transport(e.to_string()))?;
        Ok(Self::new(pool, timeout))
    }

    async fn fetch(
        &self,
        sql: String,
        binds: Vec<BindValue>,
    ) -> Result<Vec<Record>, SearchError> {
        debug!("document query: {sql}");
        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = match bind {
                BindValue::Text(v) => query.bind(v),
                BindValue::TextArray(v) => query.bind(v),
                BindValue::Bool(v) => query.bind(v),
                BindValue::Float(v) => query.bind(v),
                BindValue::Int(v) => query.bind(v),
            };
        }

        let rows = tokio::time::timeout(self.timeout, query.fetch_all(&self.pool))
            .await
            .map_err(|_| SearchError::Timeout(self.timeout))?
            .map_err(map_sqlx_error)?;

        rows.iter().map(record_from_row).collect()
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Record>, SearchError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT {SELECT_COLUMNS} FROM tools WHERE id = ANY($1)");
        self.fetch(sql, vec![BindValue::TextArray(ids.to_vec())]).await
    }

    async fn search(
        &self,
        predicates: &[FieldPredicate],
        limit: usize,
    ) -> Result<Vec<Record>, SearchError> {
        let mut clauses = Vec::new();
        let mut binds = Vec::new();

        for predicate in predicates {
            match translate_predicate(predicate, binds.len() + 1) {
                Some((clause, bind)) => {
                    clauses.push(clause);
                    if let Some(bind) = bind {
                        binds.push(bind);
                    }
                }
                None => {
                    warn!("dropping untranslatable document predicate on {}", predicate.field)
                }
            }
        }

        let mut sql = format!("SELECT {SELECT_COLUMNS} FROM tools");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(&format!(" LIMIT {}", limit.max(1)));

        self.fetch(sql, binds).await
    }

    fn stream_all(&self) -> BoxStream<'_, Result<Record, SearchError>> {
        Box::pin(try_stream! {
            let mut after = String::new();
            loop {
                let sql = format!(
                    "SELECT {SELECT_COLUMNS} FROM tools WHERE id > $1 ORDER BY id LIMIT {STREAM_PAGE_SIZE}"
                );
                let records = self
                    .fetch(sql, vec![BindValue::Text(after.clone())])
                    .await?;
                let page_len = records.len();
                for record in records {
                    after = record.id.clone();
                    yield record;
                }
                if (page_len as i64) < STREAM_PAGE_SIZE {
                    break;
                }
            }
        })
    }
}

enum BindValue {
    Text(String),
    TextArray(Vec<String>),
    Bool(bool),
    Float(f64),
    #[allow(dead_code)]
    Int(i64),
}

/// Abstract predicate -> SQL clause + bind. Arrays live in JSONB columns, so
/// equality and `contains` on them both use the `?` element-membership
/// operator; `contains` on plain text becomes ILIKE.
fn translate_predicate(
    predicate: &FieldPredicate,
    bind_index: usize,
) -> Option<(String, Option<BindValue>)> {
    let column = map_field(&predicate.field)?;
    match predicate.op {
        FilterOperator::Eq => match (&column, &predicate.value) {
            (FieldExpr::Text(col), Value::String(s)) => Some((
                format!("{col} = ${bind_index}"),
                Some(BindValue::Text(s.clone())),
            )),
            (FieldExpr::JsonArray(col), Value::String(s)) => Some((
                format!("{col} ? ${bind_index}"),
                Some(BindValue::Text(s.clone())),
            )),
            (FieldExpr::JsonBool(expr), Value::Bool(flag)) => Some((
                format!("{expr} = ${bind_index}"),
                Some(BindValue::Bool(*flag)),
            )),
            (FieldExpr::Text(col), Value::Bool(flag)) => Some((
                format!("{col} = ${bind_index}"),
                Some(BindValue::Bool(*flag)),
            )),
            _ => None,
        },
        FilterOperator::Contains => match (&column, &predicate.value) {
            (FieldExpr::Text(col), Value::String(s)) => Some((
                format!("{col} ILIKE '%' || ${bind_index} || '%'"),
                Some(BindValue::Text(s.clone())),
            )),
            (FieldExpr::JsonArray(col), Value::String(s)) => Some((
                format!("{col} ? ${bind_index}"),
                Some(BindValue::Text(s.clone())),
            )),
            _ => None,
        },
        FilterOperator::Lt | FilterOperator::Lte | FilterOperator::Gt | FilterOperator::Gte => {
            let op = match predicate.op {
                FilterOperator::Lt => "<",
                FilterOperator::Lte => "<=",
                FilterOperator::Gt => ">",
                _ => ">=",
            };
            let value = predicate.value.as_f64()?;
            match column {
                FieldExpr::JsonNumber(expr) => Some((
                    format!("{expr} {op} ${bind_index}"),
                    Some(BindValue::Float(value)),
                )),
                _ => None,
            }
        }
    }
}

enum FieldExpr {
    Text(&'static str),
    JsonArray(&'static str),
    JsonBool(&'static str),
    JsonNumber(&'static str),
}

/// Closed field map of the abstract filter language onto the `tools` table.
fn map_field(field: &str) -> Option<FieldExpr> {
    match field {
        "id" => Some(FieldExpr::Text("id")),
        "name" => Some(FieldExpr::Text("name")),
        "description" => Some(FieldExpr::Text("description")),
        "url" => Some(FieldExpr::Text("url")),
        "category" | "categories" => Some(FieldExpr::JsonArray("categories")),
        "functionality" => Some(FieldExpr::JsonArray("functionality")),
        "interface" | "interfaces" => Some(FieldExpr::JsonArray("interfaces")),
        "deployment" => Some(FieldExpr::JsonArray("deployment")),
        "searchKeywords" => Some(FieldExpr::JsonArray("search_keywords")),
        "pricing.hasFreeTier" => Some(FieldExpr::JsonBool("(pricing->>'has_free_tier')::boolean")),
        "pricing.minPrice" => {
            Some(FieldExpr::JsonNumber("(pricing->'tiers'->0->>'price')::numeric"))
        }
        _ => None,
    }
}

fn map_sqlx_error(error: sqlx::Error) -> SearchError {
    let kind = match &error {
        sqlx::Error::RowNotFound => StoreErrorKind::NotFound,
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreErrorKind::SchemaMismatch
        }
        _ => StoreErrorKind::Transport,
    };
    SearchError::DocumentStore { kind, message: error.to_string() }
}

fn record_from_row(row: &PgRow) -> Result<Record, SearchError> {
    let json_vec = |column: &str| -> Result<Vec<String>, SearchError> {
        let value: Option<Value> = row.try_get(column).map_err(map_sqlx_error)?;
        match value {
            Some(value) => serde_json::from_value(value).map_err(|e| SearchError::DocumentStore {
                kind: StoreErrorKind::SchemaMismatch,
                message: format!("column {column}: {e}"),
            }),
            None => Ok(Vec::new()),
        }
    };
    let json_opt = |column: &str| -> Result<Option<Value>, SearchError> {
        row.try_get(column).map_err(map_sqlx_error)
    };

    let technical = match json_opt("technical")? {
        Some(value) => Some(serde_json::from_value(value).map_err(|e| {
            SearchError::DocumentStore {
                kind: StoreErrorKind::SchemaMismatch,
                message: format!("column technical: {e}"),
            }
        })?),
        None => None,
    };
    let pricing = match json_opt("pricing")? {
        Some(value) => Some(serde_json::from_value(value).map_err(|e| {
            SearchError::DocumentStore {
                kind: StoreErrorKind::SchemaMismatch,
                message: format!("column pricing: {e}"),
            }
        })?),
        None => None,
    };

    Ok(Record {
        id: row.try_get("id").map_err(map_sqlx_error)?,
        name: row.try_get("name").map_err(map_sqlx_error)?,
        description: row.try_get("description").map_err(map_sqlx_error)?,
        long_description: row.try_get("long_description").map_err(map_sqlx_error)?,
        categories: json_vec("categories")?,
        functionality: json_vec("functionality")?,
        search_keywords: json_vec("search_keywords")?,
        use_cases: json_vec("use_cases")?,
        interfaces: json_vec("interfaces")?,
        deployment: json_vec("deployment")?,
        technical,
        pricing,
        url: row.try_get("url").map_err(map_sqlx_error)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn free_tier_pushdown_translates_to_jsonb_bool() {
        let (clause, bind) =
            translate_predicate(&FieldPredicate::eq("pricing.hasFreeTier", true), 1).unwrap();
        assert_eq!(clause, "(pricing->>'has_free_tier')::boolean = $1");
        assert!(matches!(bind, Some(BindValue::Bool(true))));
    }

    #[test]
    fn category_equality_uses_membership() {
        let (clause, _) =
            translate_predicate(&FieldPredicate::eq("category", "ide"), 2).unwrap();
        assert_eq!(clause, "categories ? $2");
    }

    #[test]
    fn description_contains_uses_ilike() {
        let (clause, _) =
            translate_predicate(&FieldPredicate::contains("description", "editor"), 1).unwrap();
        assert_eq!(clause, "description ILIKE '%' || $1 || '%'");
    }

    #[test]
    fn unknown_field_is_dropped() {
        let predicate = FieldPredicate::eq("nonexistent", json!("x"));
        assert!(translate_predicate(&predicate, 1).is_none());
    }

    #[test]
    fn numeric_ops_only_apply_to_numeric_fields() {
        let ok = FieldPredicate {
            field: "pricing.minPrice".into(),
            op: FilterOperator::Lte,
            value: json!(10),
        };
        assert!(translate_predicate(&ok, 1).is_some());

        let bad = FieldPredicate {
            field: "name".into(),
            op: FilterOperator::Lte,
            value: json!(10),
        };
        assert!(translate_predicate(&bad, 1).is_none());
    }
}
