//! Serializable state handed to the presentation layer.

use indexmap::IndexMap;
use serde::Serialize;
use tabula_types::{FilterSet, Row, TableMeta, TreeBranch};
use tabula_util::ValueCodec;

use crate::header_plan::{AddressingMap, HeaderGroup, HeaderPlan, PlannedColumn};
use crate::navigator::{FilterPhase, SessionId, SubSelection};
use crate::search::{RowView, SearchMode};
use crate::snapshot::DisplaySnapshot;

/// Formats the cell of `column` in `row`, resolving the value through the addressing map.
///
/// Columns whose type names a temporal type go through the codec; everything
/// else through the fallback formatter. A missing value renders empty.
pub fn format_cell(plan: &HeaderPlan, row: &Row, column: &PlannedColumn, codec: &ValueCodec) -> String {
    plan.resolve(row, column)
        .map(|value| codec.display_value(value, column.descriptor.canonical_type()))
        .unwrap_or_default()
}

/// One rendered row. `cells` follow the group members left to right.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewRow {
    pub original_index: usize,
    pub row_key: Option<String>,
    pub cells: Vec<String>,
}

/// Header groups plus formatted rows of one display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableView {
    pub groups: Vec<HeaderGroup>,
    pub addressing: AddressingMap,
    pub rows: Vec<ViewRow>,
}

impl TableView {
    pub fn build(snapshot: &DisplaySnapshot, rows: &[RowView], codec: &ValueCodec) -> Self {
        let plan = snapshot.plan.as_ref();
        let rendered = rows
            .iter()
            .map(|view| ViewRow {
                original_index: view.original_index,
                row_key: view.row.primary_key_signature(),
                cells: plan
                    .groups
                    .iter()
                    .flat_map(|group| group.members.iter())
                    .map(|column| format_cell(plan, &view.row, column, codec))
                    .collect(),
            })
            .collect();
        Self {
            groups: plan.groups.clone(),
            addressing: plan.addressing.clone(),
            rows: rendered,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchSummary {
    pub enabled: bool,
    pub query: String,
    #[serde(flatten)]
    pub mode: SearchMode,
}

/// Everything the presentation layer renders for one form session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewModel {
    pub form_id: Option<i64>,
    pub session: SessionId,
    pub phase: FilterPhase,
    pub main: Option<TableView>,
    pub filters: FilterSet,
    pub tree_cache: IndexMap<String, TreeBranch>,
    pub expanded_key: Option<String>,
    pub sub_selection: SubSelection,
    pub sub_view: Option<TableView>,
    pub search: SearchSummary,
    pub table_meta: Option<TableMeta>,
    /// Message of the last failed operation, cleared by the next success.
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use serde_json::json;
    use tabula_types::ColumnDescriptor;

    #[test]
    fn cells_follow_group_member_order_and_skip_hidden_columns() {
        let columns = vec![
            ColumnDescriptor::plain(2, 20, "When").with_orders(2, 0, 0).with_data_type("date"),
            ColumnDescriptor::plain(1, 10, "Name").with_orders(1, 0, 0),
            ColumnDescriptor::plain(3, 30, "Hidden").with_visible(false),
        ];
        let mut keys = IndexMap::new();
        keys.insert("id".to_string(), json!(1));
        let snapshot = DisplaySnapshot::new(columns, vec![Row::new(keys, vec![json!("2024-03-09"), json!("Ada"), json!("x")])]);

        let view = TableView::build(&snapshot, &RowView::all(&snapshot), &ValueCodec::with_offset_minutes(0));
        assert_eq!(view.rows[0].cells, vec!["Ada".to_string(), "09.03.2024".to_string()]);
        assert_eq!(view.rows[0].row_key.as_deref(), Some("id:1"));
        assert_eq!(view.groups.len(), 2);
    }

    #[test]
    fn missing_cell_renders_empty() {
        let snapshot = DisplaySnapshot::new(vec![ColumnDescriptor::plain(1, 10, "Name")], vec![Row::default()]);
        let plan = snapshot.plan.as_ref();
        assert_eq!(format_cell(plan, &snapshot.rows[0], &plan.columns[0], &ValueCodec::with_offset_minutes(0)), "");
    }
}
