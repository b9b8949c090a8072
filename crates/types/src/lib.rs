use std::{fmt, str::FromStr};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod display;

pub use display::payload::{PayloadError, SchemaIssue, ValidatedPayload, parse_display_payload, parse_table_meta, parse_tree_branch};

/// Base subtracted from a combobox column id to form its synthetic identity.
pub const COMBOBOX_ID_BASE: i64 = -1_000_000;

/// Base subtracted from a column's position when it has no usable identity at all.
pub const UNBOUND_ID_BASE: i64 = -2_000_000;

/// Distinguishes direct table columns from label-driven combobox columns.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    /// A column backed by a real table column.
    #[default]
    Plain,
    /// A virtual, multi-valued column resolved through a combobox definition.
    Combobox,
}

impl FromStr for ColumnKind {
    type Err = ParseColumnKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" | "" => Ok(Self::Plain),
            "combobox" => Ok(Self::Combobox),
            _ => Err(ParseColumnKindError),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid column kind; expected 'plain' or 'combobox'")]
pub struct ParseColumnKindError;

/// Immutable description of one column delivered with a display payload.
///
/// Descriptors arrive in backend order. That order is significant: row values
/// are aligned to it positionally, so consumers must never reorder the list
/// they address values with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Widget-level column this descriptor belongs to; shared by combobox members.
    pub widget_column_id: i64,
    /// Backing table column. `None` for computed or pure label columns.
    #[serde(default)]
    pub table_column_id: Option<i64>,
    /// Human readable column name.
    #[serde(default)]
    pub column_name: String,
    #[serde(default)]
    pub column_order: i64,
    #[serde(default)]
    pub ref_column_order: i64,
    #[serde(default)]
    pub combobox_column_order: i64,
    #[serde(default)]
    pub combobox_column_id: Option<i64>,
    #[serde(default)]
    pub kind: ColumnKind,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub read_only: bool,
    /// Alias configured on the combobox entry; preferred as the header label.
    #[serde(default)]
    pub combobox_alias: Option<String>,
    /// Name of the referenced column, used when no alias exists.
    #[serde(default)]
    pub ref_column_name: Option<String>,
    /// Backend type name (for example `timestamptz`).
    #[serde(default)]
    pub data_type: Option<String>,
}

fn default_visible() -> bool {
    true
}

impl Default for ColumnDescriptor {
    fn default() -> Self {
        Self {
            widget_column_id: 0,
            table_column_id: None,
            column_name: String::new(),
            column_order: 0,
            ref_column_order: 0,
            combobox_column_order: 0,
            combobox_column_id: None,
            kind: ColumnKind::Plain,
            visible: true,
            read_only: false,
            combobox_alias: None,
            ref_column_name: None,
            data_type: None,
        }
    }
}

impl ColumnDescriptor {
    /// Creates a plain column bound to `table_column_id`.
    pub fn plain(widget_column_id: i64, table_column_id: i64, column_name: impl Into<String>) -> Self {
        Self {
            widget_column_id,
            table_column_id: Some(table_column_id),
            column_name: column_name.into(),
            ..Self::default()
        }
    }

    /// Creates a combobox column. `table_column_id` may be absent for label-only entries.
    pub fn combobox(widget_column_id: i64, table_column_id: Option<i64>, combobox_column_id: i64, column_name: impl Into<String>) -> Self {
        Self {
            widget_column_id,
            table_column_id,
            column_name: column_name.into(),
            combobox_column_id: Some(combobox_column_id),
            kind: ColumnKind::Combobox,
            ..Self::default()
        }
    }

    pub fn with_orders(mut self, column_order: i64, ref_column_order: i64, combobox_column_order: i64) -> Self {
        self.column_order = column_order;
        self.ref_column_order = ref_column_order;
        self.combobox_column_order = combobox_column_order;
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.combobox_alias = Some(alias.into());
        self
    }

    pub fn with_ref_column_name(mut self, name: impl Into<String>) -> Self {
        self.ref_column_name = Some(name.into());
        self
    }

    pub fn with_data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }

    pub fn is_combobox(&self) -> bool {
        self.kind == ColumnKind::Combobox
    }

    /// Temporal type of this column, when its backend type names one.
    pub fn canonical_type(&self) -> Option<CanonicalType> {
        self.data_type.as_deref().and_then(|name| name.parse().ok())
    }
}

/// Collision-free column identity used for addressing and filter keys.
///
/// Plain columns keep their `table_column_id`. Combobox columns map to
/// `-1_000_000 - combobox_column_id` so they can never alias a real column
/// id. Columns with neither identity fall back to `-2_000_000 - position`.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyntheticColumnId(pub i64);

impl SyntheticColumnId {
    /// Resolves the identity of `column`, which sits at `position` in the original column list.
    pub fn for_column(column: &ColumnDescriptor, position: usize) -> Self {
        match (column.kind, column.table_column_id, column.combobox_column_id) {
            (ColumnKind::Plain, Some(table_column_id), _) => Self(table_column_id),
            (ColumnKind::Combobox, _, Some(combobox_column_id)) => Self::from_combobox(combobox_column_id),
            (ColumnKind::Combobox, Some(table_column_id), None) => Self(table_column_id),
            (ColumnKind::Plain, None, Some(combobox_column_id)) => Self::from_combobox(combobox_column_id),
            (_, None, None) => Self(UNBOUND_ID_BASE - position as i64),
        }
    }

    pub fn from_combobox(combobox_column_id: i64) -> Self {
        Self(COMBOBOX_ID_BASE - combobox_column_id)
    }

    pub fn get(self) -> i64 {
        self.0
    }

    pub fn is_synthetic(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for SyntheticColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Temporal wire types the value codec understands.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalType {
    Date,
    Time,
    TimeTz,
    Timestamp,
    TimestampTz,
}

impl CanonicalType {
    /// True when the wire form carries a UTC offset.
    pub fn carries_offset(self) -> bool {
        matches!(self, Self::TimeTz | Self::TimestampTz)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::Time => "time",
            Self::TimeTz => "timetz",
            Self::Timestamp => "timestamp",
            Self::TimestampTz => "timestamptz",
        }
    }
}

impl FromStr for CanonicalType {
    type Err = ParseCanonicalTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "date" => Ok(Self::Date),
            "time" | "time without time zone" => Ok(Self::Time),
            "timetz" | "time with time zone" => Ok(Self::TimeTz),
            "timestamp" | "timestamp without time zone" | "datetime" => Ok(Self::Timestamp),
            "timestamptz" | "timestamp with time zone" => Ok(Self::TimestampTz),
            _ => Err(ParseCanonicalTypeError),
        }
    }
}

impl fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("not a temporal type; expected date, time, timetz, timestamp or timestamptz")]
pub struct ParseCanonicalTypeError;

/// Value side of a filter: the backend accepts either text or numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Number(serde_json::Number),
    Text(String),
}

impl FilterValue {
    /// Converts a scalar cell value into a filter value. Objects and arrays are rejected.
    pub fn from_scalar(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => Some(Self::Number(number.clone())),
            Value::String(text) => Some(Self::Text(text.clone())),
            Value::Bool(flag) => Some(Self::Text(flag.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(number) => write!(f, "{}", number),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

/// A single active filter as sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub table_column_id: i64,
    pub value: FilterValue,
}

impl Filter {
    pub fn new(table_column_id: i64, value: impl Into<FilterValue>) -> Self {
        Self {
            table_column_id,
            value: value.into(),
        }
    }

    /// Cache key of the tree branch opened by this filter: `"{table_column_id}-{value}"`.
    pub fn tree_key(&self) -> String {
        format!("{}-{}", self.table_column_id, self.value)
    }
}

/// Active filters keyed by column; at most one filter per column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSet {
    entries: IndexMap<i64, FilterValue>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding only `filter`.
    pub fn single(filter: Filter) -> Self {
        let mut set = Self::new();
        set.replace(filter);
        set
    }

    /// Inserts `filter`, replacing any filter already active on the same column.
    pub fn replace(&mut self, filter: Filter) {
        self.entries.insert(filter.table_column_id, filter.value);
    }

    /// Returns a copy of this set with `filter` merged in.
    pub fn with(&self, filter: Filter) -> Self {
        let mut next = self.clone();
        next.replace(filter);
        next
    }

    pub fn get(&self, table_column_id: i64) -> Option<&FilterValue> {
        self.entries.get(&table_column_id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Wire form of the set, in insertion order.
    pub fn to_filters(&self) -> Vec<Filter> {
        self.entries
            .iter()
            .map(|(table_column_id, value)| Filter {
                table_column_id: *table_column_id,
                value: value.clone(),
            })
            .collect()
    }
}

/// One data row. `values` is aligned to the original column list of its payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    #[serde(default)]
    pub primary_keys: IndexMap<String, Value>,
    #[serde(default)]
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(primary_keys: IndexMap<String, Value>, values: Vec<Value>) -> Self {
        Self { primary_keys, values }
    }

    /// Canonical serialization of the primary keys: keys sorted, joined as `k:v` with `|`.
    ///
    /// Returns `None` when the row carries no primary keys.
    pub fn primary_key_signature(&self) -> Option<String> {
        primary_key_signature(&self.primary_keys)
    }
}

/// See [`Row::primary_key_signature`].
pub fn primary_key_signature(primary_keys: &IndexMap<String, Value>) -> Option<String> {
    if primary_keys.is_empty() {
        return None;
    }
    let mut pairs: Vec<(&String, &Value)> = primary_keys.iter().collect();
    pairs.sort_by(|left, right| left.0.cmp(right.0));
    let signature = pairs
        .into_iter()
        .map(|(key, value)| format!("{}:{}", key, scalar_text(value)))
        .collect::<Vec<_>>()
        .join("|");
    Some(signature)
}

/// Plain text of a scalar: strings without quotes, everything else as compact JSON.
pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Column descriptors plus the row matrix returned for one form/filter combination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayPayload {
    pub columns: Vec<ColumnDescriptor>,
    #[serde(default)]
    pub data: Vec<Row>,
}

/// Lazily fetched nested values opened by a top-level tree click.
pub type TreeBranch = Vec<Value>;

/// Capabilities of the table behind a widget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMeta {
    #[serde(alias = "table_id")]
    pub table_id: i64,
    #[serde(default, alias = "has_insert_query")]
    pub has_insert_query: bool,
    #[serde(default, alias = "has_update_query")]
    pub has_update_query: bool,
    #[serde(default, alias = "has_delete_query")]
    pub has_delete_query: bool,
}
