//! Render plan derived from a display payload's column descriptors.
//!
//! The plan has three parts that are computed from the same input but must
//! not be confused with each other:
//!
//! - **render order**: the columns stably sorted by
//!   `(column_order, ref_column_order, combobox_column_order)`,
//! - **header groups**: visible columns folded by `widget_column_id`,
//! - **addressing**: `"{widget_column_id}:{synthetic_id}"` → index into
//!   [`Row::values`], computed from the original, unsorted column list.
//!
//! Every consumer resolves cell values through [`AddressingMap`]; positions in
//! the render order are never used as value indices.

use std::fmt;

use indexmap::IndexMap;
use serde::{Serialize, Serializer, ser::SerializeMap};
use serde_json::Value;
use tabula_types::{ColumnDescriptor, Row, SyntheticColumnId};
use tracing::warn;

/// Placeholder label for a member with neither an alias nor a referenced column name.
pub const MISSING_LABEL: &str = "—";

/// Addressing key of one column: its widget column and its synthetic identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressKey {
    pub widget_column_id: i64,
    pub synthetic_id: SyntheticColumnId,
}

impl AddressKey {
    pub fn new(widget_column_id: i64, synthetic_id: SyntheticColumnId) -> Self {
        Self {
            widget_column_id,
            synthetic_id,
        }
    }
}

impl fmt::Display for AddressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.widget_column_id, self.synthetic_id)
    }
}

/// One column as it appears in the render order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedColumn {
    /// Descriptor with its identity normalized: combobox columns carry their
    /// synthetic id in `table_column_id`.
    pub descriptor: ColumnDescriptor,
    pub synthetic_id: SyntheticColumnId,
    /// Index of this column in the original list, which is also its index in `Row::values`.
    pub position: usize,
    pub read_only: bool,
}

impl PlannedColumn {
    pub fn address(&self) -> AddressKey {
        AddressKey::new(self.descriptor.widget_column_id, self.synthetic_id)
    }

    /// Header label of this column inside its group.
    pub fn label(&self) -> &str {
        self.descriptor
            .combobox_alias
            .as_deref()
            .filter(|alias| !alias.trim().is_empty())
            .or_else(|| self.descriptor.ref_column_name.as_deref().filter(|name| !name.trim().is_empty()))
            .unwrap_or(MISSING_LABEL)
    }
}

/// Columns sharing one widget column, rendered under a single header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderGroup {
    /// The shared `widget_column_id`.
    pub id: i64,
    pub title: String,
    /// One label per member, in member order.
    pub labels: Vec<String>,
    /// Visible members, ordered by `(ref_column_order, combobox_column_order)`.
    pub members: Vec<PlannedColumn>,
    /// `column_order` of the first member seen in render order.
    pub column_order: i64,
}

/// Map from [`AddressKey`] to the index of the value in [`Row::values`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressingMap {
    entries: IndexMap<AddressKey, usize>,
}

impl AddressingMap {
    /// Builds the map from the original, unsorted column list.
    ///
    /// A key that occurs twice keeps its first position; the duplicate is logged.
    pub fn from_columns(columns: &[ColumnDescriptor]) -> Self {
        let mut entries = IndexMap::with_capacity(columns.len());
        for (position, column) in columns.iter().enumerate() {
            let key = AddressKey::new(column.widget_column_id, SyntheticColumnId::for_column(column, position));
            if let Some(existing) = entries.get(&key) {
                warn!(key = %key, first = existing, duplicate = position, "duplicate column address; keeping the first position and hiding the duplicate");
                continue;
            }
            entries.insert(key, position);
        }
        Self { entries }
    }

    pub fn position(&self, key: &AddressKey) -> Option<usize> {
        self.entries.get(key).copied()
    }

    /// The value addressed by `key` in `row`, if both the key and the cell exist.
    pub fn resolve<'a>(&self, row: &'a Row, key: &AddressKey) -> Option<&'a Value> {
        self.position(key).and_then(|position| row.values.get(position))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AddressKey, &usize)> {
        self.entries.iter()
    }
}

impl Serialize for AddressingMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, position) in &self.entries {
            map.serialize_entry(&key.to_string(), position)?;
        }
        map.end()
    }
}

/// Deterministic render and addressing plan for one display payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeaderPlan {
    /// Every column, hidden ones included, in render order.
    pub columns: Vec<PlannedColumn>,
    pub groups: Vec<HeaderGroup>,
    pub addressing: AddressingMap,
}

impl HeaderPlan {
    /// Builds the plan for `columns`. Pure: the same input always yields the same plan.
    ///
    /// A column whose address is already taken by an earlier column is hidden,
    /// since the addressing map resolves that address to the earlier slot.
    ///
    /// # Example
    /// ```rust
    /// use tabula_engine::HeaderPlan;
    /// use tabula_types::ColumnDescriptor;
    ///
    /// let columns = vec![
    ///     ColumnDescriptor::plain(2, 20, "Second").with_orders(2, 0, 0),
    ///     ColumnDescriptor::plain(1, 10, "First").with_orders(1, 0, 0),
    /// ];
    /// let plan = HeaderPlan::build(&columns);
    ///
    /// assert_eq!(plan.groups[0].title, "First");
    /// assert_eq!(plan.columns[0].position, 1);
    /// ```
    pub fn build(columns: &[ColumnDescriptor]) -> Self {
        let addressing = AddressingMap::from_columns(columns);
        let mut render_order: Vec<PlannedColumn> = columns
            .iter()
            .enumerate()
            .map(|(position, column)| plan_column(column, position, &addressing))
            .collect();
        render_order.sort_by_key(|planned| {
            (
                planned.descriptor.column_order,
                planned.descriptor.ref_column_order,
                planned.descriptor.combobox_column_order,
                planned.position,
            )
        });

        let groups = build_groups(&render_order);
        Self {
            columns: render_order,
            groups,
            addressing,
        }
    }

    /// Visible columns in render order.
    pub fn visible_columns(&self) -> impl Iterator<Item = &PlannedColumn> {
        self.columns.iter().filter(|planned| planned.descriptor.visible)
    }

    /// The planned column occupying `position` in the original list.
    pub fn column_at(&self, position: usize) -> Option<&PlannedColumn> {
        self.columns.iter().find(|planned| planned.position == position)
    }

    /// Value of `column` in `row`, resolved through the addressing map.
    pub fn resolve<'a>(&self, row: &'a Row, column: &PlannedColumn) -> Option<&'a Value> {
        self.addressing.resolve(row, &column.address())
    }
}

/// Read-only policy: hidden, combobox and unbound columns are never editable.
pub fn is_read_only(column: &ColumnDescriptor) -> bool {
    !column.visible || column.is_combobox() || column.table_column_id.is_none() || column.read_only
}

fn plan_column(column: &ColumnDescriptor, position: usize, addressing: &AddressingMap) -> PlannedColumn {
    let synthetic_id = SyntheticColumnId::for_column(column, position);
    let mut descriptor = column.clone();
    if addressing.position(&AddressKey::new(column.widget_column_id, synthetic_id)) != Some(position) {
        descriptor.visible = false;
    }
    let read_only = is_read_only(&descriptor);
    if descriptor.is_combobox() && descriptor.combobox_column_id.is_some() && descriptor.table_column_id.is_some() {
        descriptor.table_column_id = Some(synthetic_id.get());
    }
    PlannedColumn {
        read_only,
        descriptor,
        synthetic_id,
        position,
    }
}

fn build_groups(render_order: &[PlannedColumn]) -> Vec<HeaderGroup> {
    let mut folded: IndexMap<i64, (i64, Vec<&PlannedColumn>)> = IndexMap::new();
    for planned in render_order {
        folded
            .entry(planned.descriptor.widget_column_id)
            .or_insert_with(|| (planned.descriptor.column_order, Vec::new()))
            .1
            .push(planned);
    }

    let mut groups: Vec<HeaderGroup> = folded
        .into_iter()
        .filter_map(|(id, (column_order, mut members))| {
            members.retain(|planned| planned.descriptor.visible);
            if members.is_empty() {
                return None;
            }
            members.sort_by_key(|planned| (planned.descriptor.ref_column_order, planned.descriptor.combobox_column_order));

            let title = members
                .first()
                .map(|planned| planned.descriptor.column_name.trim())
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Column #{id}"));
            Some(HeaderGroup {
                id,
                title,
                labels: members.iter().map(|planned| planned.label().to_string()).collect(),
                members: members.into_iter().cloned().collect(),
                column_order,
            })
        })
        .collect();

    groups.sort_by_key(|group| (group.column_order, group.id));
    groups
}
