//! JSON-file backend implementing [`DisplaySource`].
//!
//! Layout of a fixture file:
//!
//! ```json
//! {
//!   "forms": {
//!     "11": {
//!       "display": { "columns": [...], "data": [...] },
//!       "tree": { "5-A": [...] },
//!       "sub_orders": [0, 1],
//!       "subs": { "0": { "columns": [...], "data": [{ "parent": {"id": 1}, "primary_keys": {...}, "values": [...] }] } }
//!     }
//!   },
//!   "tables": { "3": { "tableId": 3, "hasUpdateQuery": true } }
//! }
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tabula_engine::DisplaySource;
use tabula_types::{Filter, scalar_text};
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
struct FixtureFile {
    #[serde(default)]
    forms: HashMap<i64, FixtureForm>,
    #[serde(default)]
    tables: HashMap<i64, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct FixtureForm {
    display: Value,
    #[serde(default)]
    tree: HashMap<String, Value>,
    #[serde(default)]
    sub_orders: Vec<i64>,
    #[serde(default)]
    subs: HashMap<i64, FixtureSub>,
}

#[derive(Debug, Default, Deserialize)]
struct FixtureSub {
    columns: Value,
    #[serde(default)]
    data: Vec<Value>,
}

/// Backend answering from a fixture file loaded into memory.
#[derive(Debug)]
pub struct FixtureSource {
    file: FixtureFile,
}

impl FixtureSource {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).with_context(|| format!("reading fixture {}", path.display()))?;
        Self::from_json(&data).with_context(|| format!("parsing fixture {}", path.display()))
    }

    pub fn from_json(data: &str) -> Result<Self> {
        Ok(Self {
            file: serde_json::from_str(data)?,
        })
    }

    /// Child views declared for `form_id`.
    pub fn sub_orders(&self, form_id: i64) -> Vec<i64> {
        self.file.forms.get(&form_id).map(|form| form.sub_orders.clone()).unwrap_or_default()
    }

    fn form(&self, form_id: i64) -> Result<&FixtureForm> {
        self.file.forms.get(&form_id).ok_or_else(|| anyhow!("form {form_id} is not in the fixture"))
    }
}

#[async_trait]
impl DisplaySource for FixtureSource {
    async fn fetch_main_display(&self, form_id: i64, filters: &[Filter]) -> Result<Value> {
        let form = self.form(form_id)?;
        let Some(display) = form.display.as_object() else {
            return Ok(form.display.clone());
        };
        let positions = filter_positions(display.get("columns"), filters);
        let data: Vec<Value> = match display.get("data") {
            Some(Value::Array(rows)) => rows.iter().filter(|row| row_matches(row, &positions)).cloned().collect(),
            _ => Vec::new(),
        };
        debug!(form_id, filter_count = filters.len(), rows = data.len(), "fixture main display");

        let mut narrowed = display.clone();
        narrowed.insert("data".to_string(), Value::Array(data));
        Ok(Value::Object(narrowed))
    }

    async fn fetch_tree_branch(&self, form_id: i64, filters: &[Filter]) -> Result<Value> {
        let form = self.form(form_id)?;
        let branch = filters
            .first()
            .and_then(|filter| form.tree.get(&filter.tree_key()))
            .cloned()
            .unwrap_or(Value::Null);
        Ok(branch)
    }

    async fn fetch_sub_display(&self, form_id: i64, sub_order: i64, primary_keys: &IndexMap<String, Value>) -> Result<Value> {
        let form = self.form(form_id)?;
        let sub = form
            .subs
            .get(&sub_order)
            .ok_or_else(|| anyhow!("form {form_id} has no sub view {sub_order}"))?;
        let parent: Map<String, Value> = primary_keys.iter().map(|(key, value)| (key.clone(), value.clone())).collect();
        let data: Vec<Value> = sub
            .data
            .iter()
            .filter(|row| row.get("parent").and_then(Value::as_object) == Some(&parent))
            .cloned()
            .collect();
        Ok(json!({ "columns": sub.columns, "data": data }))
    }

    async fn fetch_table_meta(&self, widget_id: i64) -> Result<Value> {
        self.file
            .tables
            .get(&widget_id)
            .cloned()
            .ok_or_else(|| anyhow!("no table metadata for widget {widget_id}"))
    }
}

/// `(value position, expected text)` for every filter whose column is present.
fn filter_positions(columns: Option<&Value>, filters: &[Filter]) -> Vec<(usize, String)> {
    let Some(Value::Array(columns)) = columns else {
        return Vec::new();
    };
    filters
        .iter()
        .filter_map(|filter| {
            columns
                .iter()
                .position(|column| column.get("table_column_id").and_then(Value::as_i64) == Some(filter.table_column_id))
                .map(|position| (position, filter.value.to_string()))
        })
        .collect()
}

fn row_matches(row: &Value, positions: &[(usize, String)]) -> bool {
    let values = match row {
        Value::Object(object) => object.get("values").and_then(Value::as_array),
        Value::Array(values) => Some(values),
        _ => None,
    };
    let Some(values) = values else {
        return positions.is_empty();
    };
    positions
        .iter()
        .all(|(position, expected)| values.get(*position).map(scalar_text).as_deref() == Some(expected.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEMO: &str = include_str!("../demos/orders.json");

    #[tokio::test]
    async fn main_display_is_narrowed_by_filters() {
        let source = FixtureSource::from_json(DEMO).expect("demo fixture");
        let all = source.fetch_main_display(11, &[]).await.expect("display");
        let narrowed = source.fetch_main_display(11, &[Filter::new(5, "North")]).await.expect("display");

        let count = |value: &Value| value["data"].as_array().map(Vec::len).unwrap_or_default();
        assert!(count(&narrowed) < count(&all));
        assert!(count(&narrowed) > 0);
    }

    #[tokio::test]
    async fn sub_display_matches_parent_keys() {
        let source = FixtureSource::from_json(DEMO).expect("demo fixture");
        let mut keys = IndexMap::new();
        keys.insert("id".to_string(), json!(1));
        let sub = source.fetch_sub_display(11, 0, &keys).await.expect("sub display");
        assert_eq!(sub["data"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn unknown_form_is_an_error() {
        let source = FixtureSource::from_json(DEMO).expect("demo fixture");
        assert!(source.fetch_main_display(999, &[]).await.is_err());
        assert_eq!(source.sub_orders(11), vec![0, 1]);
    }
}
