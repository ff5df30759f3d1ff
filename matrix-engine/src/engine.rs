//! FILENAME: matrix-engine/src/engine.rs
//! Matrix Engine - Drives one synchronous update cycle.
//!
//! Pipeline, strictly ordered with no feedback between stages:
//! 1. Index the column enumeration (column path x measure -> vector ordinal)
//!    and the raw row nodes by path key
//! 2. Build both axis trees from the host's expand maps
//! 3. Sort row sibling groups
//! 4. Flatten both trees
//! 5. Window the flattened sequences
//! 6. Compute the enabled totals
//!
//! Cells are resolved on demand afterwards. The engine never owns the
//! host state: expand maps and the sort configuration are passed in on
//! every call and mutated only through the gesture methods below.

use log::{debug, warn};

use crate::definition::{Axis, MatrixData, MatrixSettings, MatrixState, RawNode, SortColumn};
use crate::hierarchy::{self, HierarchyTree, NodeId};
use crate::resolver::{Cell, CellResolver, ColumnIndex, RowIndex};
use crate::sorting::SortEngine;
use crate::totals::{TotalValue, TotalsAggregator, TotalsTable};
use crate::view::MatrixView;
use crate::virtualization::{Viewport, VirtualizationWindow, VisibleRange};

/// Owns the derived model of the latest snapshot.
#[derive(Debug, Clone, Default)]
pub struct MatrixEngine {
    data: MatrixData,
    settings: MatrixSettings,
    fallback_format: Option<String>,
    column_index: ColumnIndex,
    row_index: RowIndex,
    row_tree: HierarchyTree,
    column_tree: HierarchyTree,
    flat_rows: Vec<NodeId>,
    flat_columns: Vec<NodeId>,
    totals: TotalsTable,
    window: VirtualizationWindow,
    view: MatrixView,
    version: u64,
}

impl MatrixEngine {
    pub fn new() -> Self {
        MatrixEngine::default()
    }

    /// Runs a full rebuild for a new snapshot. The scroll position survives.
    pub fn update(
        &mut self,
        data: MatrixData,
        settings: MatrixSettings,
        state: &MatrixState,
        viewport: Viewport,
    ) -> &MatrixView {
        let (scroll_top, scroll_left) = self.window.scroll_position();
        self.window = VirtualizationWindow::new(&settings.virtualization);
        self.window.set_scroll_position(scroll_top, scroll_left);

        self.fallback_format = settings.values.fallback_format();
        self.data = data;
        self.settings = settings;

        self.rebuild(state, viewport);
        &self.view
    }

    /// Rebuilds the current snapshot after the host state changed.
    pub fn refresh(&mut self, state: &MatrixState) -> &MatrixView {
        let viewport = self.window.viewport();
        self.rebuild(state, viewport);
        &self.view
    }

    fn rebuild(&mut self, state: &MatrixState, viewport: Viewport) {
        let measures = &self.data.measures;
        let rows = self.data.rows.as_ref();
        let columns = self.data.columns.as_ref();

        let column_index = ColumnIndex::build(columns, measures.len());
        let row_index = RowIndex::build(rows);
        check_value_vectors(rows, column_index.len());

        let mut row_tree = HierarchyTree::build(rows, &state.rows);
        let column_tree = HierarchyTree::build_columns(columns, &state.columns, measures.len());

        let resolver = CellResolver::new(rows, &column_index, measures)
            .with_row_index(&row_index)
            .with_fallback_format(self.fallback_format.as_deref());
        let aggregator = TotalsAggregator::new(resolver, self.settings.totals.aggregation_type);
        SortEngine::new(aggregator, &state.sort).sort_tree(&mut row_tree);

        let flat_rows = row_tree.flatten();
        let flat_columns = column_tree.flatten();

        let mut view = MatrixView::build(
            &row_tree,
            &flat_rows,
            &column_tree,
            &flat_columns,
            &column_index,
            measures,
        );
        view.visible_range = self.window.update(view.rows.len(), view.leaf_count(), viewport);

        let totals = aggregator.calculate(&row_tree, &flat_rows, &column_tree, &self.settings.totals);

        self.version += 1;
        view.version = self.version;

        debug!(
            "update version={} rows={} cols={} leaves={} ordinals={} row_keys={}",
            self.version,
            flat_rows.len(),
            flat_columns.len(),
            view.leaf_count(),
            column_index.len(),
            row_index.len()
        );

        self.column_index = column_index;
        self.row_index = row_index;
        self.row_tree = row_tree;
        self.column_tree = column_tree;
        self.flat_rows = flat_rows;
        self.flat_columns = flat_columns;
        self.totals = totals;
        self.view = view;
    }

    // ------------------------------------------------------------------------
    // Model access
    // ------------------------------------------------------------------------

    pub fn view(&self) -> &MatrixView {
        &self.view
    }

    pub fn data(&self) -> &MatrixData {
        &self.data
    }

    pub fn settings(&self) -> &MatrixSettings {
        &self.settings
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn tree(&self, axis: Axis) -> &HierarchyTree {
        match axis {
            Axis::Rows => &self.row_tree,
            Axis::Columns => &self.column_tree,
        }
    }

    /// Flattened visible node sequence of an axis.
    pub fn flattened(&self, axis: Axis) -> &[NodeId] {
        match axis {
            Axis::Rows => &self.flat_rows,
            Axis::Columns => &self.flat_columns,
        }
    }

    pub fn column_index(&self) -> &ColumnIndex {
        &self.column_index
    }

    fn raw_axis(&self, axis: Axis) -> Option<&RawNode> {
        match axis {
            Axis::Rows => self.data.rows.as_ref(),
            Axis::Columns => self.data.columns.as_ref(),
        }
    }

    pub fn row_index(&self) -> &RowIndex {
        &self.row_index
    }

    pub fn resolver(&self) -> CellResolver<'_> {
        CellResolver::new(self.data.rows.as_ref(), &self.column_index, &self.data.measures)
            .with_row_index(&self.row_index)
            .with_fallback_format(self.fallback_format.as_deref())
    }

    pub fn aggregator(&self) -> TotalsAggregator<'_> {
        TotalsAggregator::new(self.resolver(), self.settings.totals.aggregation_type)
    }

    // ------------------------------------------------------------------------
    // Cells
    // ------------------------------------------------------------------------

    pub fn resolve<R, C>(&self, row_path: &[R], column_path: &[C], measure_index: usize) -> Option<Cell>
    where
        R: AsRef<str>,
        C: AsRef<str>,
    {
        self.resolver().resolve(row_path, column_path, measure_index)
    }

    /// Cell shown at a flattened row and a leaf column position. Data leaves
    /// read the raw vector; group rows and collapsed column groups fall back
    /// to the configured aggregation.
    pub fn cell(&self, row_index: usize, leaf_index: usize) -> Option<Cell> {
        let row = self.view.row(row_index)?;
        let column = self.view.leaf_column(leaf_index)?;
        let measure_index = column.measure_index?;

        let aggregator = self.aggregator();
        let cursor = aggregator.resolver().row(&row.path)?;

        if let Some(ordinal) = column.ordinal {
            let direct = cursor.cell_at(ordinal);
            if !cursor.node().has_children() || direct.as_ref().map_or(false, |c| c.value.is_some()) {
                return direct;
            }
        }

        if self.column_index.ordinals_under(&column.path, Some(measure_index)).is_empty() {
            return None;
        }
        let value = aggregator.aggregate(&row.path, &column.path, Some(measure_index))?;
        Some(Cell {
            row_path: row.path.clone(),
            column_path: column.path.clone(),
            measure_index,
            value: Some(value),
            formatted_value: aggregator.format_total(Some(value), Some(measure_index)),
        })
    }

    /// Cells of the current visible window, `[row][leaf column]`.
    pub fn visible_cells(&self) -> Vec<Vec<Option<Cell>>> {
        let range = self.view.visible_range;
        range
            .rows()
            .map(|r| range.columns().map(|c| self.cell(r, c)).collect::<Vec<_>>())
            .collect()
    }

    // ------------------------------------------------------------------------
    // Totals
    // ------------------------------------------------------------------------

    pub fn totals(&self) -> &TotalsTable {
        &self.totals
    }

    pub fn row_subtotal_at(&self, row_key: &str, ordinal: usize) -> Option<&TotalValue> {
        self.totals.row_subtotal(row_key, ordinal)
    }

    pub fn column_subtotal_at(&self, column_key: &str, row_key: &str, measure_index: usize) -> Option<&TotalValue> {
        let row_index = self.view.row_position(row_key)?;
        self.totals.column_subtotal(column_key, row_index, measure_index)
    }

    pub fn row_grand_total(&self, ordinal: usize) -> Option<&TotalValue> {
        self.totals.row_grand_total(ordinal)
    }

    pub fn column_grand_total(&self, row_index: usize, measure_index: usize) -> Option<&TotalValue> {
        self.totals.column_grand_total(row_index, measure_index)
    }

    pub fn grand_total(&self, measure_index: usize) -> Option<&TotalValue> {
        self.totals.grand_total(measure_index)
    }

    // ------------------------------------------------------------------------
    // Scrolling
    // ------------------------------------------------------------------------

    pub fn visible_range(&self) -> VisibleRange {
        self.view.visible_range
    }

    pub fn window(&self) -> &VirtualizationWindow {
        &self.window
    }

    pub fn scroll_to(&mut self, scroll_top: f64, scroll_left: f64) -> VisibleRange {
        self.view.visible_range = self.window.set_scroll_position(scroll_top, scroll_left);
        self.view.visible_range
    }

    pub fn resize(&mut self, viewport: Viewport) -> VisibleRange {
        self.view.visible_range = self.window.set_viewport(viewport);
        self.view.visible_range
    }

    // ------------------------------------------------------------------------
    // Gestures: mutate host state, then rebuild
    // ------------------------------------------------------------------------

    pub fn expand(&mut self, state: &mut MatrixState, axis: Axis, key: &str) -> &MatrixView {
        hierarchy::expand(state.expand_state_mut(axis), key);
        self.refresh(state)
    }

    pub fn collapse(&mut self, state: &mut MatrixState, axis: Axis, key: &str) -> &MatrixView {
        hierarchy::collapse(state.expand_state_mut(axis), key);
        self.refresh(state)
    }

    /// Returns the new expanded state of `key`.
    pub fn toggle(&mut self, state: &mut MatrixState, axis: Axis, key: &str) -> bool {
        let expanded = hierarchy::toggle(state.expand_state_mut(axis), self.raw_axis(axis), key);
        self.refresh(state);
        expanded
    }

    pub fn expand_all(&mut self, state: &mut MatrixState, axis: Axis, level: usize) -> &MatrixView {
        hierarchy::expand_all(state.expand_state_mut(axis), self.raw_axis(axis), level);
        self.refresh(state)
    }

    pub fn collapse_all(&mut self, state: &mut MatrixState, axis: Axis, level: usize) -> &MatrixView {
        hierarchy::collapse_all(state.expand_state_mut(axis), self.raw_axis(axis), level);
        self.refresh(state)
    }

    pub fn drill_down(&mut self, state: &mut MatrixState, axis: Axis, key: &str) -> &MatrixView {
        hierarchy::drill_down(state.expand_state_mut(axis), key);
        self.refresh(state)
    }

    pub fn drill_up(&mut self, state: &mut MatrixState, axis: Axis, key: &str) -> &MatrixView {
        hierarchy::drill_up(state.expand_state_mut(axis), key);
        self.refresh(state)
    }

    pub fn sort_by_column(&mut self, state: &mut MatrixState, column: SortColumn) -> &MatrixView {
        state.sort.add_sort_column(column);
        self.refresh(state)
    }

    pub fn remove_sort_column(&mut self, state: &mut MatrixState, column: &SortColumn) -> bool {
        let removed = state.sort.remove_sort_column(column);
        if removed {
            self.refresh(state);
        }
        removed
    }

    pub fn toggle_sort_direction(&mut self, state: &mut MatrixState) -> &MatrixView {
        state.sort.toggle_sort_direction();
        self.refresh(state)
    }

    pub fn clear_sort(&mut self, state: &mut MatrixState) -> &MatrixView {
        state.sort.clear_sort();
        self.refresh(state)
    }
}

/// Counts row nodes whose value vector disagrees with the column
/// enumeration. Such rows still resolve; missing ordinals read as no data.
fn check_value_vectors(rows: Option<&RawNode>, expected: usize) {
    fn count(nodes: &[RawNode], expected: usize) -> usize {
        nodes
            .iter()
            .map(|n| {
                let own = usize::from(!n.values.is_empty() && n.values.len() != expected);
                own + count(&n.children, expected)
            })
            .sum()
    }

    let mismatched = rows.map_or(0, |root| count(&root.children, expected));
    if mismatched > 0 {
        warn!("value vector length mismatch rows={} expected={}", mismatched, expected);
    }
}
