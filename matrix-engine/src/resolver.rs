//! FILENAME: matrix-engine/src/resolver.rs
//! Cell Resolver - Correlates a row node's raw value vector with the column axis.
//!
//! A row's `values[i]` belongs to the `i`-th entry of the column enumeration:
//! every raw column leaf in pre-order, fanned out over the measure list. The
//! enumeration runs over the full raw column tree regardless of expansion.
//!
//! The enumeration is materialised once per update as a [`ColumnIndex`], so a
//! lookup is a hash probe instead of a walk over every column leaf. Row nodes
//! get the same treatment through a [`RowIndex`].

use log::{trace, warn};
use rustc_hash::FxHashMap;
use serde::Serialize;
use smallvec::SmallVec;

use crate::definition::{path_key, Measure, NodePath, RawNode};
use crate::format::format_value;
use crate::hierarchy::find_raw;

// ============================================================================
// COLUMN INDEX
// ============================================================================

/// One entry of the column enumeration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnLeaf {
    pub path: NodePath,
    pub path_key: String,
    pub measure_index: usize,
    /// The raw column leaf (or one of its ancestors) is a producer subtotal.
    pub is_subtotal: bool,
}

/// `(columnPathKey, measureIndex) -> value-vector ordinal`, built once per update.
#[derive(Debug, Clone, Default)]
pub struct ColumnIndex {
    entries: Vec<ColumnLeaf>,
    by_key: FxHashMap<(String, usize), usize>,
}

impl ColumnIndex {
    pub fn build(raw_columns: Option<&RawNode>, measure_count: usize) -> Self {
        let mut index = ColumnIndex::default();
        if let Some(root) = raw_columns {
            let mut path = NodePath::new();
            for child in &root.children {
                index.collect(child, &mut path, false, measure_count);
            }
        }
        index
    }

    fn collect(&mut self, node: &RawNode, path: &mut NodePath, in_subtotal: bool, measure_count: usize) {
        path.push(node.label());
        let is_subtotal = in_subtotal || node.is_subtotal;

        if node.has_children() {
            for child in &node.children {
                self.collect(child, path, is_subtotal, measure_count);
            }
        } else {
            let key = path_key(path);
            for measure_index in 0..measure_count {
                let ordinal = self.entries.len();
                if self.by_key.contains_key(&(key.clone(), measure_index)) {
                    warn!("duplicate column path '{}' measure={}", key, measure_index);
                } else {
                    self.by_key.insert((key.clone(), measure_index), ordinal);
                }
                self.entries.push(ColumnLeaf {
                    path: path.clone(),
                    path_key: key.clone(),
                    measure_index,
                    is_subtotal,
                });
            }
        }

        path.pop();
    }

    /// Value-vector ordinal of a column leaf. First occurrence wins on duplicates.
    pub fn ordinal<S: AsRef<str>>(&self, column_path: &[S], measure_index: usize) -> Option<usize> {
        self.ordinal_by_key(&path_key(column_path), measure_index)
    }

    pub fn ordinal_by_key(&self, column_key: &str, measure_index: usize) -> Option<usize> {
        self.by_key.get(&(column_key.to_string(), measure_index)).copied()
    }

    pub fn get(&self, ordinal: usize) -> Option<&ColumnLeaf> {
        self.entries.get(ordinal)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &ColumnLeaf)> {
        self.entries.iter().enumerate()
    }

    /// Ordinals whose path starts with `prefix` (all ordinals for an empty
    /// prefix), optionally restricted to one measure.
    pub fn ordinals_under<S: AsRef<str>>(&self, prefix: &[S], measure_index: Option<usize>) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, leaf)| {
                leaf.path.len() >= prefix.len()
                    && leaf.path.iter().zip(prefix).all(|(a, b)| a == b.as_ref())
                    && measure_index.map_or(true, |m| leaf.measure_index == m)
            })
            .map(|(ordinal, _)| ordinal)
            .collect()
    }
}

// ============================================================================
// ROW INDEX
// ============================================================================

/// Child positions leading from the raw root to a node.
type ChildPositions = SmallVec<[usize; 4]>;

/// `rowPathKey -> raw row node`, built once per update.
///
/// Stores child positions rather than references so the index can live next
/// to the snapshot it describes. On duplicate keys the first node in
/// pre-order wins, which is the node a positional descent would find.
#[derive(Debug, Clone, Default)]
pub struct RowIndex {
    by_key: FxHashMap<String, ChildPositions>,
}

impl RowIndex {
    pub fn build(raw_rows: Option<&RawNode>) -> Self {
        let mut index = RowIndex::default();
        if let Some(root) = raw_rows {
            index.collect(&root.children, &mut NodePath::new(), &mut ChildPositions::new());
        }
        index
    }

    fn collect(&mut self, nodes: &[RawNode], path: &mut NodePath, positions: &mut ChildPositions) {
        for (position, node) in nodes.iter().enumerate() {
            path.push(node.label());
            positions.push(position);

            self.by_key
                .entry(path_key(path))
                .or_insert_with(|| positions.clone());
            self.collect(&node.children, path, positions);

            positions.pop();
            path.pop();
        }
    }

    /// Raw node for a row path key, read from the snapshot the index was built on.
    pub fn get<'a>(&self, raw_rows: Option<&'a RawNode>, row_key: &str) -> Option<&'a RawNode> {
        let positions = self.by_key.get(row_key)?;
        positions
            .iter()
            .try_fold(raw_rows?, |node, &position| node.children.get(position))
    }

    pub fn contains(&self, row_key: &str) -> bool {
        self.by_key.contains_key(row_key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

// ============================================================================
// CELLS
// ============================================================================

/// A resolved intersection. Computed on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub row_path: NodePath,
    pub column_path: NodePath,
    pub measure_index: usize,
    pub value: Option<f64>,
    pub formatted_value: String,
}

/// Resolves cells against one raw snapshot and its column index.
#[derive(Debug, Clone, Copy)]
pub struct CellResolver<'a> {
    rows: Option<&'a RawNode>,
    row_index: Option<&'a RowIndex>,
    columns: &'a ColumnIndex,
    measures: &'a [Measure],
    fallback_format: Option<&'a str>,
}

impl<'a> CellResolver<'a> {
    pub fn new(rows: Option<&'a RawNode>, columns: &'a ColumnIndex, measures: &'a [Measure]) -> Self {
        CellResolver {
            rows,
            row_index: None,
            columns,
            measures,
            fallback_format: None,
        }
    }

    /// Looks rows up through `index`, which must be built from the same rows.
    pub fn with_row_index(mut self, index: &'a RowIndex) -> Self {
        self.row_index = Some(index);
        self
    }

    /// Format used for measures without a format string of their own.
    pub fn with_fallback_format(mut self, format: Option<&'a str>) -> Self {
        self.fallback_format = format;
        self
    }

    pub fn columns(&self) -> &'a ColumnIndex {
        self.columns
    }

    pub fn measures(&self) -> &'a [Measure] {
        self.measures
    }

    pub fn raw_rows(&self) -> Option<&'a RawNode> {
        self.rows
    }

    /// Effective format string for a measure.
    pub fn measure_format(&self, measure_index: usize) -> Option<&'a str> {
        self.measures
            .get(measure_index)
            .and_then(|m| m.format_string.as_deref())
            .or(self.fallback_format)
    }

    pub fn fallback_format(&self) -> Option<&'a str> {
        self.fallback_format
    }

    /// Finds a raw row node: a hash probe with a row index, else a
    /// positional descent.
    pub fn find_row<S: AsRef<str>>(&self, row_path: &[S]) -> Option<&'a RawNode> {
        if row_path.is_empty() {
            return None;
        }
        match self.row_index {
            Some(index) => index.get(self.rows, &path_key(row_path)),
            None => find_raw(self.rows, row_path),
        }
    }

    /// Resolves one cell. `None` covers every "no data" outcome: unknown
    /// row, unknown column or measure, and a null value in the vector.
    pub fn resolve<R, C>(&self, row_path: &[R], column_path: &[C], measure_index: usize) -> Option<Cell>
    where
        R: AsRef<str>,
        C: AsRef<str>,
    {
        self.row(row_path)?.cell(column_path, measure_index)
    }

    /// Locates a row once so that many cells can be read from it.
    pub fn row<S: AsRef<str>>(&self, row_path: &[S]) -> Option<RowCursor<'a>> {
        let node = self.find_row(row_path)?;
        Some(RowCursor {
            resolver: *self,
            node,
            path: row_path.iter().map(|s| s.as_ref().to_string()).collect(),
        })
    }
}

/// A located row node bound to its resolver.
#[derive(Debug, Clone)]
pub struct RowCursor<'a> {
    resolver: CellResolver<'a>,
    node: &'a RawNode,
    path: NodePath,
}

impl<'a> RowCursor<'a> {
    pub fn node(&self) -> &'a RawNode {
        self.node
    }

    pub fn path(&self) -> &NodePath {
        &self.path
    }

    pub fn cell<S: AsRef<str>>(&self, column_path: &[S], measure_index: usize) -> Option<Cell> {
        let ordinal = self.resolver.columns.ordinal(column_path, measure_index)?;
        self.cell_at(ordinal)
    }

    /// Reads the cell at a value-vector ordinal.
    pub fn cell_at(&self, ordinal: usize) -> Option<Cell> {
        let leaf = self.resolver.columns.get(ordinal)?;
        let raw = match self.node.values.get(ordinal) {
            Some(raw) => raw.as_ref()?,
            None => {
                trace!(
                    "value vector too short row='{}' ordinal={} len={}",
                    path_key(&self.path),
                    ordinal,
                    self.node.values.len()
                );
                return None;
            }
        };

        let value = raw.as_number();
        let format = self.resolver.measure_format(leaf.measure_index);

        Some(Cell {
            row_path: self.path.clone(),
            column_path: leaf.path.clone(),
            measure_index: leaf.measure_index,
            value,
            formatted_value: format_value(value, format),
        })
    }

    /// Numeric value at an ordinal, `None` for missing or unparseable data.
    pub fn number_at(&self, ordinal: usize) -> Option<f64> {
        self.node.values.get(ordinal)?.as_ref()?.as_number()
    }
}
