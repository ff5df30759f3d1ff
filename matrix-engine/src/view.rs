//! FILENAME: matrix-engine/src/view.rs
//! Matrix View - Renderable output for the presentation layer.
//!
//! The view is what collaborators consume: flattened row and column
//! descriptors, the column header bands and the current visible window.
//! Cell values are not stored here; they are resolved on demand.

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::definition::{path_key, Measure, NodePath};
use crate::hierarchy::{HierarchyTree, NodeId};
use crate::resolver::ColumnIndex;
use crate::virtualization::VisibleRange;

// ============================================================================
// ROW AND COLUMN DESCRIPTORS
// ============================================================================

/// Describes one flattened row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowDescriptor {
    /// Position in the flattened row sequence.
    pub index: usize,

    /// Node in the row tree.
    pub node: NodeId,

    pub label: String,

    /// Nesting depth (0 = outermost).
    pub level: usize,

    /// Indentation steps for the row header.
    pub indent: usize,

    pub path: NodePath,
    pub path_key: String,
    pub is_subtotal: bool,

    /// Drives the expand/collapse indicator.
    pub has_children: bool,
    pub is_expanded: bool,
}

/// Describes one flattened column (group or leaf).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    /// Position in the flattened column sequence.
    pub index: usize,

    /// Node in the column tree.
    pub node: NodeId,

    pub label: String,
    pub level: usize,
    pub path: NodePath,
    pub path_key: String,
    pub is_subtotal: bool,
    pub has_children: bool,
    pub is_expanded: bool,

    /// Set on leaf columns only.
    pub measure_index: Option<usize>,

    /// Value-vector ordinal. `None` for groups and for collapsed groups
    /// shown as leaves (their cells are aggregated).
    pub ordinal: Option<usize>,

    /// Position among the leaf columns, for leaves.
    pub leaf_index: Option<usize>,
}

impl ColumnDescriptor {
    pub fn is_leaf(&self) -> bool {
        self.leaf_index.is_some()
    }
}

/// One spanning entry of a column header row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderBand {
    pub label: String,
    pub path_key: String,
    pub level: usize,

    /// First leaf column covered.
    pub start: usize,

    /// Number of leaf columns covered.
    pub col_span: usize,

    /// Header rows covered; more than one when the band sits above no
    /// deeper level (shallow leaves and collapsed groups).
    pub row_span: usize,
}

pub fn row_descriptors(tree: &HierarchyTree, flat: &[NodeId]) -> Vec<RowDescriptor> {
    flat.iter()
        .enumerate()
        .map(|(index, &id)| {
            let node = &tree[id];
            RowDescriptor {
                index,
                node: id,
                label: node.value.clone(),
                level: node.level,
                indent: node.level,
                path: node.path.clone(),
                path_key: node.path_key(),
                is_subtotal: node.is_subtotal,
                has_children: node.has_children,
                is_expanded: node.is_expanded,
            }
        })
        .collect()
}

pub fn column_descriptors(tree: &HierarchyTree, flat: &[NodeId], index: &ColumnIndex) -> Vec<ColumnDescriptor> {
    let mut leaf_count = 0;
    flat.iter()
        .enumerate()
        .map(|(position, &id)| {
            let node = &tree[id];
            let key = node.path_key();
            let leaf_index = node.measure_index.map(|_| {
                leaf_count += 1;
                leaf_count - 1
            });
            let ordinal = match node.measure_index {
                Some(m) if !node.has_children => index.ordinal_by_key(&key, m),
                _ => None,
            };

            ColumnDescriptor {
                index: position,
                node: id,
                label: node.value.clone(),
                level: node.level,
                path: node.path.clone(),
                path_key: key,
                is_subtotal: node.is_subtotal,
                has_children: node.has_children,
                is_expanded: node.is_expanded,
                measure_index: node.measure_index,
                ordinal,
                leaf_index,
            }
        })
        .collect()
}

/// Header rows for the leaf columns: one row per column level, then a row
/// of measure names.
pub fn header_bands(leaves: &[&ColumnDescriptor], measures: &[Measure]) -> Vec<Vec<HeaderBand>> {
    let depth = leaves.iter().map(|c| c.path.len()).max().unwrap_or(0);
    let mut rows: Vec<Vec<HeaderBand>> = Vec::with_capacity(depth + 1);

    for level in 0..depth {
        let mut bands: Vec<HeaderBand> = Vec::new();
        for (position, leaf) in leaves.iter().enumerate() {
            if leaf.path.len() <= level {
                continue;
            }
            let key = path_key(&leaf.path[..=level]);
            if let Some(last) = bands.last_mut() {
                if last.path_key == key && last.start + last.col_span == position {
                    last.col_span += 1;
                    continue;
                }
            }
            bands.push(HeaderBand {
                label: leaf.path[level].clone(),
                path_key: key,
                level,
                start: position,
                col_span: 1,
                row_span: if leaf.path.len() == level + 1 { depth - level } else { 1 },
            });
        }
        rows.push(bands);
    }

    if !leaves.is_empty() {
        let measure_row = leaves
            .iter()
            .enumerate()
            .map(|(position, leaf)| HeaderBand {
                label: leaf
                    .measure_index
                    .and_then(|m| measures.get(m))
                    .map(|m| m.display_name.clone())
                    .unwrap_or_default(),
                path_key: leaf.path_key.clone(),
                level: depth,
                start: position,
                col_span: 1,
                row_span: 1,
            })
            .collect();
        rows.push(measure_row);
    }

    rows
}

// ============================================================================
// MAIN VIEW STRUCT
// ============================================================================

/// The complete renderable state of one update cycle.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixView {
    pub rows: Vec<RowDescriptor>,
    pub columns: Vec<ColumnDescriptor>,

    /// Indexes into `columns` of the leaf columns, in display order.
    pub leaf_columns: Vec<usize>,

    /// Column header rows, outermost first, measure names last.
    pub header_bands: Vec<Vec<HeaderBand>>,

    pub visible_range: VisibleRange,

    /// Incremented on every rebuild.
    pub version: u64,

    /// Row path key -> flattened row index. First occurrence wins.
    #[serde(skip)]
    row_positions: FxHashMap<String, usize>,
}

impl MatrixView {
    pub fn build(
        row_tree: &HierarchyTree,
        flat_rows: &[NodeId],
        column_tree: &HierarchyTree,
        flat_columns: &[NodeId],
        index: &ColumnIndex,
        measures: &[Measure],
    ) -> Self {
        let rows = row_descriptors(row_tree, flat_rows);
        let columns = column_descriptors(column_tree, flat_columns, index);
        let leaf_columns: Vec<usize> = columns.iter().filter(|c| c.is_leaf()).map(|c| c.index).collect();
        let leaves: Vec<&ColumnDescriptor> = leaf_columns.iter().map(|&i| &columns[i]).collect();
        let header_bands = header_bands(&leaves, measures);

        let mut row_positions = FxHashMap::default();
        for row in &rows {
            row_positions.entry(row.path_key.clone()).or_insert(row.index);
        }

        MatrixView {
            rows,
            columns,
            leaf_columns,
            header_bands,
            visible_range: VisibleRange::default(),
            version: 0,
            row_positions,
        }
    }

    pub fn row(&self, index: usize) -> Option<&RowDescriptor> {
        self.rows.get(index)
    }

    pub fn column(&self, index: usize) -> Option<&ColumnDescriptor> {
        self.columns.get(index)
    }

    /// Leaf column by its position among the leaves.
    pub fn leaf_column(&self, leaf_index: usize) -> Option<&ColumnDescriptor> {
        self.columns.get(*self.leaf_columns.get(leaf_index)?)
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_columns.len()
    }

    /// Displayed leaf columns in order.
    pub fn leaves(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.leaf_columns.iter().filter_map(|&i| self.columns.get(i))
    }

    pub fn header_row_count(&self) -> usize {
        self.header_bands.len()
    }

    /// Flattened index of a visible row.
    pub fn row_position(&self, row_key: &str) -> Option<usize> {
        self.row_positions.get(row_key).copied()
    }

    pub fn find_row(&self, row_key: &str) -> Option<&RowDescriptor> {
        self.rows.get(self.row_position(row_key)?)
    }

    /// Rows inside the visible window.
    pub fn visible_rows(&self) -> &[RowDescriptor] {
        let range = self.visible_range.rows();
        self.rows.get(range).unwrap_or(&[])
    }

    /// Leaf columns inside the visible window.
    pub fn visible_leaf_columns(&self) -> Vec<&ColumnDescriptor> {
        self.visible_range
            .columns()
            .filter_map(|leaf| self.leaf_column(leaf))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ExpandState, RawNode};

    fn columns() -> RawNode {
        RawNode::root(vec![
            RawNode::new("2023").with_children(vec![RawNode::new("H1"), RawNode::new("H2")]),
            RawNode::new("2024"),
        ])
    }

    fn measures() -> Vec<Measure> {
        vec![Measure::new("Revenue"), Measure::new("Cost")]
    }

    fn build(expand: &ExpandState) -> MatrixView {
        let rows = RawNode::root(vec![RawNode::new("North").with_children(vec![RawNode::new("Q1")])]);
        let cols = columns();
        let index = ColumnIndex::build(Some(&cols), 2);
        let row_tree = HierarchyTree::build(Some(&rows), &ExpandState::new());
        let column_tree = HierarchyTree::build_columns(Some(&cols), expand, 2);
        MatrixView::build(
            &row_tree,
            &row_tree.flatten(),
            &column_tree,
            &column_tree.flatten(),
            &index,
            &measures(),
        )
    }

    #[test]
    fn test_row_descriptors() {
        let view = build(&ExpandState::new());
        assert_eq!(view.rows.len(), 2);
        let q1 = view.find_row("North|Q1").expect("q1");
        assert_eq!((q1.index, q1.level, q1.indent), (1, 1, 1));
        assert!(view.rows[0].has_children && view.rows[0].is_expanded);
    }

    #[test]
    fn test_find_row_by_escaped_key() {
        let rows = RawNode::root(vec![
            RawNode::new("a|b"),
            RawNode::new("a").with_children(vec![RawNode::new("b")]),
        ]);
        let cols = columns();
        let index = ColumnIndex::build(Some(&cols), 1);
        let row_tree = HierarchyTree::build(Some(&rows), &ExpandState::new());
        let column_tree = HierarchyTree::build_columns(Some(&cols), &ExpandState::new(), 1);
        let view = MatrixView::build(
            &row_tree,
            &row_tree.flatten(),
            &column_tree,
            &column_tree.flatten(),
            &index,
            &measures(),
        );

        assert_eq!(view.row_position(&path_key(&["a|b"])), Some(0));
        assert_eq!(view.row_position("a|b"), Some(2));
        assert_eq!(view.find_row("a|b").map(|r| r.label.as_str()), Some("b"));
        assert_eq!(view.row_position("c"), None);
    }

    #[test]
    fn test_leaf_columns_carry_ordinals() {
        let view = build(&ExpandState::new());
        assert_eq!(view.leaf_count(), 6);

        let ordinals: Vec<Option<usize>> = view.leaves().map(|c| c.ordinal).collect();
        assert_eq!(ordinals, (0..6).map(Some).collect::<Vec<_>>());

        let group = view.columns.iter().find(|c| c.path_key == "2023").expect("group");
        assert!(!group.is_leaf());
        assert_eq!(group.ordinal, None);
    }

    #[test]
    fn test_header_bands() {
        let view = build(&ExpandState::new());
        assert_eq!(view.header_row_count(), 3);

        let top: Vec<(&str, usize, usize, usize)> = view.header_bands[0]
            .iter()
            .map(|b| (b.label.as_str(), b.start, b.col_span, b.row_span))
            .collect();
        assert_eq!(top, vec![("2023", 0, 4, 1), ("2024", 4, 2, 2)]);

        let second: Vec<(&str, usize)> = view.header_bands[1].iter().map(|b| (b.label.as_str(), b.col_span)).collect();
        assert_eq!(second, vec![("H1", 2), ("H2", 2)]);

        let names: Vec<&str> = view.header_bands[2].iter().map(|b| b.label.as_str()).collect();
        assert_eq!(names, ["Revenue", "Cost", "Revenue", "Cost", "Revenue", "Cost"]);
    }

    #[test]
    fn test_collapsed_column_group_has_no_ordinal() {
        let mut expand = ExpandState::new();
        expand.collapse("2023");
        let view = build(&expand);

        assert_eq!(view.leaf_count(), 4);
        let first = view.leaf_column(0).expect("leaf");
        assert_eq!(first.path_key, "2023");
        assert_eq!(first.ordinal, None);
        assert_eq!(view.leaf_column(2).and_then(|c| c.ordinal), Some(4));
        assert_eq!(view.header_bands[0][0].row_span, 1, "single column level once collapsed");
    }

    #[test]
    fn test_visible_slices() {
        let mut view = build(&ExpandState::new());
        view.visible_range = VisibleRange {
            start_row: 1,
            end_row: 1,
            start_column: 2,
            end_column: 3,
            total_rows: 2,
            total_columns: 6,
        };
        assert_eq!(view.visible_rows().len(), 1);
        assert_eq!(view.visible_rows()[0].label, "Q1");
        let cols: Vec<Option<usize>> = view.visible_leaf_columns().iter().map(|c| c.ordinal).collect();
        assert_eq!(cols, vec![Some(2), Some(3)]);
    }
}
