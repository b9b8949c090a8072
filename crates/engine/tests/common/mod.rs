#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Value, json};
use tabula_engine::{DisplaySource, EngineConfig, FormSession, SessionGuard};
use tabula_types::Filter;

/// Remote call as observed by [`ScriptedSource`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Main { form_id: i64, filters: Vec<Filter> },
    Branch { form_id: i64, filters: Vec<Filter> },
    Sub { form_id: i64, sub_order: i64, primary_keys: IndexMap<String, Value> },
    Meta { widget_id: i64 },
}

/// In-memory backend. Rows are `(id, region, status, owner)`; filters on table
/// columns 5 (region) and 7 (status) narrow the main display by equality.
pub struct ScriptedSource {
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<&'static str>>,
    branch: Mutex<Value>,
}

pub const ROWS: [(i64, &str, &str, &str); 5] = [
    (1, "A", "B", "alice"),
    (2, "A", "C", "bob"),
    (3, "B", "B", "carol"),
    (4, "A", "B", "dave"),
    (5, "C", "C", "erin"),
];

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            branch: Mutex::new(json!([{"label": "leaf"}])),
        })
    }

    /// Makes every call of `operation` (`main`, `branch`, `sub`, `meta`) fail until cleared.
    pub fn fail(&self, operation: &'static str) {
        self.failing.lock().expect("failing lock").insert(operation);
    }

    pub fn recover(&self, operation: &'static str) {
        self.failing.lock().expect("failing lock").remove(operation);
    }

    pub fn set_branch(&self, branch: Value) {
        *self.branch.lock().expect("branch lock") = branch;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| predicate(call)).count()
    }

    pub fn last_main_filters(&self) -> Option<Vec<Filter>> {
        self.calls().into_iter().rev().find_map(|call| match call {
            Call::Main { filters, .. } => Some(filters),
            _ => None,
        })
    }

    fn record(&self, call: Call) {
        self.calls.lock().expect("calls lock").push(call);
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        if self.failing.lock().expect("failing lock").contains(operation) {
            bail!("{operation} backend unavailable");
        }
        Ok(())
    }
}

pub fn columns() -> Value {
    json!([
        {"widget_column_id": 1, "table_column_id": 5, "column_name": "Region", "column_order": 1, "kind": "plain"},
        {"widget_column_id": 2, "table_column_id": 7, "column_name": "Status", "column_order": 2, "kind": "plain"},
        {"widget_column_id": 3, "table_column_id": 4, "combobox_column_id": 3, "column_name": "Owner",
         "column_order": 3, "kind": "combobox", "combobox_alias": "Owner login"}
    ])
}

fn matches(filters: &[Filter], region: &str, status: &str) -> bool {
    filters.iter().all(|filter| match filter.table_column_id {
        5 => filter.value.to_string() == region,
        7 => filter.value.to_string() == status,
        _ => true,
    })
}

#[async_trait]
impl DisplaySource for ScriptedSource {
    async fn fetch_main_display(&self, form_id: i64, filters: &[Filter]) -> Result<Value> {
        self.record(Call::Main {
            form_id,
            filters: filters.to_vec(),
        });
        self.check("main")?;
        let data: Vec<Value> = ROWS
            .iter()
            .filter(|(_, region, status, _)| matches(filters, region, status))
            .map(|(id, region, status, owner)| json!({"primary_keys": {"id": id}, "values": [region, status, owner]}))
            .collect();
        Ok(json!({"columns": columns(), "data": data}))
    }

    async fn fetch_tree_branch(&self, form_id: i64, filters: &[Filter]) -> Result<Value> {
        self.record(Call::Branch {
            form_id,
            filters: filters.to_vec(),
        });
        self.check("branch")?;
        Ok(self.branch.lock().expect("branch lock").clone())
    }

    async fn fetch_sub_display(&self, form_id: i64, sub_order: i64, primary_keys: &IndexMap<String, Value>) -> Result<Value> {
        self.record(Call::Sub {
            form_id,
            sub_order,
            primary_keys: primary_keys.clone(),
        });
        self.check("sub")?;
        let parent = primary_keys.get("id").cloned().unwrap_or(Value::Null);
        Ok(json!({
            "columns": [{"widget_column_id": 10, "table_column_id": 100, "column_name": "Line"}],
            "data": [{"primary_keys": {"parent": parent, "line": 1}, "values": [format!("order {sub_order}")]}]
        }))
    }

    async fn fetch_table_meta(&self, widget_id: i64) -> Result<Value> {
        self.record(Call::Meta { widget_id });
        self.check("meta")?;
        Ok(json!({"tableId": widget_id, "hasInsertQuery": true, "hasUpdateQuery": true, "hasDeleteQuery": false}))
    }
}

pub fn session(source: &Arc<ScriptedSource>) -> FormSession {
    let config = EngineConfig {
        viewer_offset_minutes: Some(0),
        ..EngineConfig::default()
    };
    FormSession::new(source.clone(), SessionGuard::new(), &config)
}

pub fn main_ids(session: &FormSession) -> Vec<i64> {
    session
        .filter()
        .main_view()
        .map(|snapshot| {
            snapshot
                .rows
                .iter()
                .filter_map(|row| row.primary_keys.get("id").and_then(Value::as_i64))
                .collect()
        })
        .unwrap_or_default()
}
