//! Remote data-access contract consumed by the engine.
//!
//! Implementations own transport and authentication. They return untyped
//! JSON; the engine validates every response at the boundary
//! (see [`tabula_types::parse_display_payload`]).

use anyhow::Result;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Value, json};
use tabula_types::Filter;

/// Backend operations the engine performs.
#[async_trait]
pub trait DisplaySource: Send + Sync {
    /// Columns and rows of `form_id` narrowed by `filters`.
    async fn fetch_main_display(&self, form_id: i64, filters: &[Filter]) -> Result<Value>;

    /// Nested values opened by a top-level tree click. May be a single object or a list.
    async fn fetch_tree_branch(&self, form_id: i64, filters: &[Filter]) -> Result<Value>;

    /// Child rows correlated to the parent row identified by `primary_keys`.
    async fn fetch_sub_display(&self, form_id: i64, sub_order: i64, primary_keys: &IndexMap<String, Value>) -> Result<Value>;

    /// Insert/update/delete capabilities of the table behind `widget_id`.
    async fn fetch_table_meta(&self, widget_id: i64) -> Result<Value>;
}

/// A source with no data: every display is empty and tables are read-only.
pub struct NullSource;

#[async_trait]
impl DisplaySource for NullSource {
    async fn fetch_main_display(&self, _form_id: i64, _filters: &[Filter]) -> Result<Value> {
        Ok(empty_display())
    }

    async fn fetch_tree_branch(&self, _form_id: i64, _filters: &[Filter]) -> Result<Value> {
        Ok(Value::Array(Vec::new()))
    }

    async fn fetch_sub_display(&self, _form_id: i64, _sub_order: i64, _primary_keys: &IndexMap<String, Value>) -> Result<Value> {
        Ok(empty_display())
    }

    async fn fetch_table_meta(&self, widget_id: i64) -> Result<Value> {
        Ok(json!({ "tableId": widget_id }))
    }
}

fn empty_display() -> Value {
    json!({ "columns": [], "data": [] })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_types::{parse_display_payload, parse_table_meta};

    #[tokio::test]
    async fn null_source_yields_valid_empty_payloads() {
        let source = NullSource;
        let display = source.fetch_main_display(1, &[]).await.expect("display");
        let validated = parse_display_payload(&display).expect("valid payload");
        assert!(validated.payload.columns.is_empty());

        let meta = parse_table_meta(&source.fetch_table_meta(5).await.expect("meta")).expect("valid meta");
        assert_eq!(meta.table_id, 5);
        assert!(!meta.has_update_query);
    }
}
