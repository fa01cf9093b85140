/// Record updates against tables in the tenant data database
///
/// Builds `UPDATE {table} SET a = ?, ... WHERE x = ? AND ...` with every
/// identifier validated and every value bound as a parameter.

use super::RecordStore;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool};
use sqlx::query::Query;

#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Tables owned by the engine itself; workflows never write to them
const ENGINE_TABLES: &[&str] = &["workflows", "workflow_executions", "jobs"];

fn validate_table(name: &str) -> Result<()> {
    validate_identifier("table", name)?;
    let lowered = name.to_ascii_lowercase();
    if lowered.starts_with("sqlite_") || ENGINE_TABLES.contains(&lowered.as_str()) {
        return Err(anyhow::anyhow!("Table {} is reserved", name));
    }
    Ok(())
}

/// Table and column names may only contain alphanumerics and underscores
fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(anyhow::anyhow!("Invalid {} name: {}", kind, name));
    }
    Ok(())
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn update_records(
        &self,
        table: &str,
        updates: &Map<String, Value>,
        filter: &Map<String, Value>,
    ) -> Result<u64> {
        validate_table(table)?;
        if updates.is_empty() || filter.is_empty() {
            return Err(anyhow::anyhow!("updates and filter must both be non-empty"));
        }

        let mut assignments = Vec::with_capacity(updates.len());
        for column in updates.keys() {
            validate_identifier("column", column)?;
            assignments.push(format!("{} = ?", column));
        }

        let mut predicates = Vec::with_capacity(filter.len());
        for column in filter.keys() {
            validate_identifier("column", column)?;
            predicates.push(format!("{} = ?", column));
        }

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            table,
            assignments.join(", "),
            predicates.join(" AND ")
        );
        tracing::debug!("📝 Record update: {}", sql);

        let mut query = sqlx::query(&sql);
        for value in updates.values() {
            query = bind_value(query, value);
        }
        for value in filter.values() {
            query = bind_value(query, value);
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
