//! Boundary validation for remote display payloads.
//!
//! The backend returns loosely shaped JSON: identifiers may be numbers or
//! numeric strings, keys may be snake_case or camelCase, and individual
//! columns can be missing identity fields. These routines normalize all of
//! that into strict shapes. Column-level problems never reject the payload;
//! they degrade the column and are reported as [`SchemaIssue`]s so the caller
//! can log them.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{ColumnDescriptor, ColumnKind, DisplayPayload, Row, TableMeta, TreeBranch};

/// Payload-level failures. Any of these means the fetch produced nothing usable.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("display payload must be a JSON object, got {found}")]
    NotAnObject { found: &'static str },
    #[error("display payload has no `columns` array")]
    MissingColumns,
    #[error("table metadata is invalid: {0}")]
    TableMeta(#[from] serde_json::Error),
}

/// A column or row that was degraded during validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaIssue {
    #[error("column #{position} (widget column {widget_column_id}) is a combobox without combobox_column_id; treated as plain")]
    ComboboxWithoutId { position: usize, widget_column_id: i64 },
    #[error("column #{position} has no widget_column_id; kept hidden as {assigned}")]
    MissingWidgetColumnId { position: usize, assigned: i64 },
    #[error("column #{position} has unknown kind '{kind}'; treated as plain")]
    UnknownKind { position: usize, kind: String },
    #[error("column #{position} is not an object; kept hidden")]
    ColumnNotObject { position: usize },
    #[error("row #{row} has {actual} values for {expected} columns; padded with null")]
    RowPadded { row: usize, expected: usize, actual: usize },
    #[error("row #{row} is neither an object nor an array; kept empty")]
    RowMalformed { row: usize },
}

/// A validated payload together with the degradations applied to it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedPayload {
    pub payload: DisplayPayload,
    pub issues: Vec<SchemaIssue>,
}

/// Validates a `{ columns, data }` display payload.
///
/// `rows` is accepted as an alias of `data`, and a row may be given as a bare
/// array of values (no primary keys). Rows shorter than the column list are
/// padded with `null` so positional lookups stay total.
pub fn parse_display_payload(value: &Value) -> Result<ValidatedPayload, PayloadError> {
    let Value::Object(object) = value else {
        return Err(PayloadError::NotAnObject {
            found: json_kind(value),
        });
    };
    let Some(Value::Array(raw_columns)) = object.get("columns") else {
        return Err(PayloadError::MissingColumns);
    };

    let mut issues = Vec::new();
    let columns: Vec<ColumnDescriptor> = raw_columns
        .iter()
        .enumerate()
        .map(|(position, raw)| parse_column(position, raw, &mut issues))
        .collect();

    let raw_rows = match object.get("data").or_else(|| object.get("rows")) {
        Some(Value::Array(rows)) => rows.as_slice(),
        _ => &[],
    };
    let data = raw_rows
        .iter()
        .enumerate()
        .map(|(index, raw)| parse_row(index, raw, columns.len(), &mut issues))
        .collect();

    Ok(ValidatedPayload {
        payload: DisplayPayload { columns, data },
        issues,
    })
}

/// Normalizes a tree-branch response: a single object becomes a one-element list, `null` an empty one.
pub fn parse_tree_branch(value: &Value) -> TreeBranch {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

/// Validates table metadata (`tableId`, `hasInsertQuery`, ...; snake_case accepted).
pub fn parse_table_meta(value: &Value) -> Result<TableMeta, PayloadError> {
    Ok(serde_json::from_value(value.clone())?)
}

fn parse_column(position: usize, raw: &Value, issues: &mut Vec<SchemaIssue>) -> ColumnDescriptor {
    let Value::Object(object) = raw else {
        issues.push(SchemaIssue::ColumnNotObject { position });
        return hidden_placeholder(position);
    };

    let (widget_column_id, has_widget_id) = match int_field(object, &["widget_column_id", "widgetColumnId"]) {
        Some(id) => (id, true),
        None => {
            let assigned = placeholder_widget_id(position);
            issues.push(SchemaIssue::MissingWidgetColumnId { position, assigned });
            (assigned, false)
        }
    };

    let combobox_column_id = int_field(object, &["combobox_column_id", "comboboxColumnId"]);
    let mut kind = match text_field(object, &["kind", "column_kind", "columnKind"]) {
        Some(raw_kind) => raw_kind.parse::<ColumnKind>().unwrap_or_else(|_| {
            issues.push(SchemaIssue::UnknownKind { position, kind: raw_kind });
            ColumnKind::Plain
        }),
        None => ColumnKind::Plain,
    };
    if kind == ColumnKind::Combobox && combobox_column_id.is_none() {
        issues.push(SchemaIssue::ComboboxWithoutId {
            position,
            widget_column_id,
        });
        kind = ColumnKind::Plain;
    }

    ColumnDescriptor {
        widget_column_id,
        table_column_id: int_field(object, &["table_column_id", "tableColumnId"]),
        column_name: text_field(object, &["column_name", "columnName", "name"]).unwrap_or_default(),
        column_order: int_field(object, &["column_order", "columnOrder"]).unwrap_or(0),
        ref_column_order: int_field(object, &["ref_column_order", "refColumnOrder"]).unwrap_or(0),
        combobox_column_order: int_field(object, &["combobox_column_order", "comboboxColumnOrder"]).unwrap_or(0),
        combobox_column_id,
        kind,
        visible: has_widget_id && bool_field(object, &["visible", "is_visible", "isVisible"]).unwrap_or(true),
        read_only: bool_field(object, &["read_only", "readOnly"]).unwrap_or(false),
        combobox_alias: text_field(object, &["combobox_alias", "comboboxAlias"]).filter(|alias| !alias.trim().is_empty()),
        ref_column_name: text_field(object, &["ref_column_name", "refColumnName"]).filter(|name| !name.trim().is_empty()),
        data_type: text_field(object, &["data_type", "dataType", "column_type", "columnType"]),
    }
}

fn parse_row(index: usize, raw: &Value, column_count: usize, issues: &mut Vec<SchemaIssue>) -> Row {
    let (primary_keys, mut values) = match raw {
        Value::Object(object) => {
            let primary_keys = match object.get("primary_keys").or_else(|| object.get("primaryKeys")) {
                Some(Value::Object(keys)) => keys.iter().map(|(key, value)| (key.clone(), value.clone())).collect(),
                _ => IndexMap::new(),
            };
            let values = match object.get("values") {
                Some(Value::Array(values)) => values.clone(),
                _ => Vec::new(),
            };
            (primary_keys, values)
        }
        Value::Array(values) => (IndexMap::new(), values.clone()),
        _ => {
            issues.push(SchemaIssue::RowMalformed { row: index });
            (IndexMap::new(), Vec::new())
        }
    };

    if values.len() < column_count {
        if !values.is_empty() {
            issues.push(SchemaIssue::RowPadded {
                row: index,
                expected: column_count,
                actual: values.len(),
            });
        }
        values.resize(column_count, Value::Null);
    }

    Row { primary_keys, values }
}

fn placeholder_widget_id(position: usize) -> i64 {
    -(position as i64) - 1
}

fn hidden_placeholder(position: usize) -> ColumnDescriptor {
    ColumnDescriptor {
        widget_column_id: placeholder_widget_id(position),
        visible: false,
        ..ColumnDescriptor::default()
    }
}

fn field<'a>(object: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| object.get(*name)).filter(|value| !value.is_null())
}

fn int_field(object: &Map<String, Value>, names: &[&str]) -> Option<i64> {
    match field(object, names)? {
        Value::Number(number) => number.as_i64().or_else(|| number.as_f64().map(|float| float as i64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn bool_field(object: &Map<String, Value>, names: &[&str]) -> Option<bool> {
    match field(object, names)? {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => number.as_i64().map(|value| value != 0),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn text_field(object: &Map<String, Value>, names: &[&str]) -> Option<String> {
    match field(object, names)? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
