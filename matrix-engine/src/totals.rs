//! FILENAME: matrix-engine/src/totals.rs
//! Totals - Subtotals and grand totals over raw leaf values.
//!
//! Only raw data leaves contribute. A row node flagged `is_subtotal` (and its
//! whole subtree) is skipped when collecting the leaves under a group, and
//! column leaves under a subtotal column are skipped when aggregating across
//! columns, so producer-supplied subtotals are never counted twice.
//!
//! Layout of a [`TotalsTable`]:
//! - row subtotals: row group pathKey -> one value per column ordinal
//! - column subtotals: column group pathKey -> `[flattened row][measure]`
//! - row grand totals: one value per column ordinal (the bottom total row)
//! - column grand totals: `[flattened row][measure]` (the right total column)
//! - grand totals: one value per measure (the corner)

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use crate::definition::{path_key, AggregationType, RawNode, TotalsSettings};
use crate::format::format_value;
use crate::hierarchy::{HierarchyTree, NodeId};
use crate::resolver::CellResolver;

/// Format used for count-like aggregations regardless of the measure.
const COUNT_FORMAT: &str = "#,##0";

// ============================================================================
// ACCUMULATOR
// ============================================================================

/// Running state for one aggregation group.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    sum: f64,
    count: u64,
    min: Option<f64>,
    max: Option<f64>,
    distinct: FxHashSet<u64>,
}

impl Accumulator {
    pub fn new() -> Self {
        Accumulator::default()
    }

    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        // -0.0 and 0.0 are the same distinct value
        let normalized = if value == 0.0 { 0.0 } else { value };
        self.distinct.insert(normalized.to_bits());
    }

    pub fn merge(&mut self, other: &Accumulator) {
        if other.count == 0 {
            return;
        }
        self.sum += other.sum;
        self.count += other.count;
        if let Some(other_min) = other.min {
            self.min = Some(self.min.map_or(other_min, |m| m.min(other_min)));
        }
        if let Some(other_max) = other.max {
            self.max = Some(self.max.map_or(other_max, |m| m.max(other_max)));
        }
        self.distinct.extend(other.distinct.iter().copied());
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Final value. Empty groups yield 0 for sum and the counts, and no
    /// value for average, min and max.
    pub fn compute(&self, aggregation: AggregationType) -> Option<f64> {
        match aggregation {
            AggregationType::Sum => Some(self.sum),
            AggregationType::Count => Some(self.count as f64),
            AggregationType::DistinctCount => Some(self.distinct.len() as f64),
            AggregationType::Average => (self.count > 0).then(|| self.sum / self.count as f64),
            AggregationType::Min => self.min,
            AggregationType::Max => self.max,
        }
    }
}

// ============================================================================
// TOTALS TABLE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalValue {
    pub value: Option<f64>,
    pub formatted_value: String,
    pub is_subtotal: bool,
    pub is_grand_total: bool,
}

/// All totals of one update. Categories switched off in the settings stay
/// empty, so their lookups return `None` rather than zero.
#[derive(Debug, Clone, Default)]
pub struct TotalsTable {
    row_subtotals: FxHashMap<String, Vec<TotalValue>>,
    column_subtotals: FxHashMap<String, Vec<Vec<TotalValue>>>,
    row_grand_totals: Vec<TotalValue>,
    column_grand_totals: Vec<Vec<TotalValue>>,
    grand_totals: Vec<TotalValue>,
}

impl TotalsTable {
    /// Subtotal of a row group at one column ordinal.
    pub fn row_subtotal(&self, row_key: &str, ordinal: usize) -> Option<&TotalValue> {
        self.row_subtotals.get(row_key)?.get(ordinal)
    }

    /// The whole subtotal row of a row group, indexed by column ordinal.
    pub fn row_subtotal_values(&self, row_key: &str) -> Option<&[TotalValue]> {
        self.row_subtotals.get(row_key).map(Vec::as_slice)
    }

    /// Subtotal of a column group for one flattened row and measure.
    pub fn column_subtotal(&self, column_key: &str, row_index: usize, measure_index: usize) -> Option<&TotalValue> {
        self.column_subtotals.get(column_key)?.get(row_index)?.get(measure_index)
    }

    /// Bottom grand-total row at one column ordinal.
    pub fn row_grand_total(&self, ordinal: usize) -> Option<&TotalValue> {
        self.row_grand_totals.get(ordinal)
    }

    /// Right grand-total column for one flattened row and measure.
    pub fn column_grand_total(&self, row_index: usize, measure_index: usize) -> Option<&TotalValue> {
        self.column_grand_totals.get(row_index)?.get(measure_index)
    }

    /// Corner total for one measure.
    pub fn grand_total(&self, measure_index: usize) -> Option<&TotalValue> {
        self.grand_totals.get(measure_index)
    }

    pub fn row_subtotal_keys(&self) -> impl Iterator<Item = &str> {
        self.row_subtotals.keys().map(String::as_str)
    }

    pub fn column_subtotal_keys(&self) -> impl Iterator<Item = &str> {
        self.column_subtotals.keys().map(String::as_str)
    }
}

// ============================================================================
// AGGREGATOR
// ============================================================================

/// Aggregates raw values through a [`CellResolver`].
#[derive(Debug, Clone, Copy)]
pub struct TotalsAggregator<'a> {
    resolver: CellResolver<'a>,
    aggregation: AggregationType,
}

impl<'a> TotalsAggregator<'a> {
    pub fn new(resolver: CellResolver<'a>, aggregation: AggregationType) -> Self {
        TotalsAggregator { resolver, aggregation }
    }

    pub fn resolver(&self) -> &CellResolver<'a> {
        &self.resolver
    }

    pub fn aggregation(&self) -> AggregationType {
        self.aggregation
    }

    /// Raw rows contributing to `row_path`. A leaf contributes itself (even
    /// a producer subtotal, when addressed directly); a group contributes its
    /// non-subtotal leaves. The empty path addresses the whole axis.
    pub fn leaf_rows<S: AsRef<str>>(&self, row_path: &[S]) -> Vec<&'a RawNode> {
        let mut out = Vec::new();
        if row_path.is_empty() {
            if let Some(root) = self.resolver.raw_rows() {
                collect_leaves(&root.children, &mut out);
            }
        } else if let Some(node) = self.resolver.find_row(row_path) {
            if node.has_children() {
                collect_leaves(&node.children, &mut out);
            } else {
                out.push(node);
            }
        }
        out
    }

    /// Column ordinals under `prefix` that carry raw data (subtotal columns
    /// excluded), optionally for a single measure.
    pub fn data_ordinals<S: AsRef<str>>(&self, prefix: &[S], measure_index: Option<usize>) -> Vec<usize> {
        let columns = self.resolver.columns();
        columns
            .ordinals_under(prefix, measure_index)
            .into_iter()
            .filter(|&o| columns.get(o).map_or(false, |leaf| !leaf.is_subtotal))
            .collect()
    }

    pub fn accumulate(&self, rows: &[&RawNode], ordinals: &[usize]) -> Accumulator {
        let mut acc = Accumulator::new();
        for row in rows {
            for &ordinal in ordinals {
                if let Some(value) = row.values.get(ordinal).and_then(|v| v.as_ref()).and_then(|v| v.as_number()) {
                    acc.add(value);
                }
            }
        }
        acc
    }

    /// Aggregate of the leaf rows under `row_path` across the column leaves
    /// under `column_prefix`. `measure_index = None` mixes all measures.
    pub fn aggregate<R, C>(&self, row_path: &[R], column_prefix: &[C], measure_index: Option<usize>) -> Option<f64>
    where
        R: AsRef<str>,
        C: AsRef<str>,
    {
        let rows = self.leaf_rows(row_path);
        let ordinals = self.data_ordinals(column_prefix, measure_index);
        self.accumulate(&rows, &ordinals).compute(self.aggregation)
    }

    /// Value shown at an intersection: the raw value for a data leaf, else
    /// the producer's own value if present, else the aggregate.
    pub fn value_at<R, C>(&self, row_path: &[R], column_path: &[C], measure_index: usize) -> Option<f64>
    where
        R: AsRef<str>,
        C: AsRef<str>,
    {
        let row = self.resolver.row(row_path)?;
        let ordinal = self.resolver.columns().ordinal(column_path, measure_index);

        match ordinal {
            Some(o) if !row.node().has_children() => row.number_at(o),
            Some(o) => row
                .number_at(o)
                .or_else(|| self.aggregate(row_path, column_path, Some(measure_index))),
            None => {
                if self.resolver.columns().ordinals_under(column_path, Some(measure_index)).is_empty() {
                    return None;
                }
                self.aggregate(row_path, column_path, Some(measure_index))
            }
        }
    }

    /// Formats an aggregate. Counts ignore the measure's format.
    pub fn format_total(&self, value: Option<f64>, measure_index: Option<usize>) -> String {
        let format = match self.aggregation {
            AggregationType::Count | AggregationType::DistinctCount => Some(COUNT_FORMAT),
            _ => match measure_index {
                Some(m) => self.resolver.measure_format(m),
                None => self.resolver.fallback_format(),
            },
        };
        format_value(value, format)
    }

    fn total(&self, acc: &Accumulator, measure_index: Option<usize>, is_grand_total: bool) -> TotalValue {
        let value = acc.compute(self.aggregation);
        TotalValue {
            value,
            formatted_value: self.format_total(value, measure_index),
            is_subtotal: !is_grand_total,
            is_grand_total,
        }
    }

    /// Computes every enabled totals category for the built trees.
    /// `flat_rows` is the flattened row order; per-row totals follow it.
    pub fn calculate(
        &self,
        row_tree: &HierarchyTree,
        flat_rows: &[NodeId],
        column_tree: &HierarchyTree,
        settings: &TotalsSettings,
    ) -> TotalsTable {
        let columns = self.resolver.columns();
        let measure_count = self.resolver.measures().len();
        let mut table = TotalsTable::default();

        // Contributing leaves per flattened row, shared by the per-row categories.
        let row_leaves: Vec<Vec<&RawNode>> = flat_rows
            .iter()
            .map(|&id| self.leaf_rows(&row_tree[id].path))
            .collect();
        let measure_ordinals: Vec<Vec<usize>> = (0..measure_count)
            .map(|m| self.data_ordinals::<&str>(&[], Some(m)))
            .collect();

        if settings.show_row_subtotals {
            for (_, node) in row_tree.iter().filter(|(_, n)| n.has_children && !n.is_subtotal) {
                let leaves = self.leaf_rows(&node.path);
                let values: Vec<TotalValue> = (0..columns.len())
                    .map(|o| {
                        let measure = columns.get(o).map(|leaf| leaf.measure_index);
                        self.total(&self.accumulate(&leaves, &[o]), measure, false)
                    })
                    .collect();
                table.row_subtotals.insert(node.path_key(), values);
            }
        }

        if settings.show_column_subtotals {
            let mut seen = FxHashSet::default();
            for (_, node) in column_tree.iter().filter(|(_, n)| n.has_children && !n.is_subtotal) {
                let key = path_key(&node.path);
                if !seen.insert(key.clone()) {
                    continue;
                }
                let group_ordinals: Vec<Vec<usize>> = (0..measure_count)
                    .map(|m| self.data_ordinals(&node.path, Some(m)))
                    .collect();
                let values: Vec<Vec<TotalValue>> = row_leaves
                    .iter()
                    .map(|leaves| {
                        group_ordinals
                            .iter()
                            .enumerate()
                            .map(|(m, ordinals)| self.total(&self.accumulate(leaves, ordinals), Some(m), false))
                            .collect::<Vec<_>>()
                    })
                    .collect();
                table.column_subtotals.insert(key, values);
            }
        }

        let all_rows = self.leaf_rows::<&str>(&[]);

        if settings.show_row_grand_totals {
            table.row_grand_totals = (0..columns.len())
                .map(|o| {
                    let measure = columns.get(o).map(|leaf| leaf.measure_index);
                    self.total(&self.accumulate(&all_rows, &[o]), measure, true)
                })
                .collect();
        }

        if settings.show_column_grand_totals {
            table.column_grand_totals = row_leaves
                .iter()
                .map(|leaves| {
                    measure_ordinals
                        .iter()
                        .enumerate()
                        .map(|(m, ordinals)| self.total(&self.accumulate(leaves, ordinals), Some(m), true))
                        .collect::<Vec<_>>()
                })
                .collect();
        }

        if settings.show_row_grand_totals || settings.show_column_grand_totals {
            table.grand_totals = measure_ordinals
                .iter()
                .enumerate()
                .map(|(m, ordinals)| self.total(&self.accumulate(&all_rows, ordinals), Some(m), true))
                .collect();
        }

        debug!(
            "totals row_subtotals={} column_subtotals={} grand={}",
            table.row_subtotals.len(),
            table.column_subtotals.len(),
            table.grand_totals.len()
        );

        table
    }
}

fn collect_leaves<'a>(nodes: &'a [RawNode], out: &mut Vec<&'a RawNode>) {
    for node in nodes {
        if node.is_subtotal {
            continue;
        }
        if node.has_children() {
            collect_leaves(&node.children, out);
        } else {
            out.push(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ExpandState, Measure};
    use crate::resolver::ColumnIndex;

    fn rows() -> RawNode {
        RawNode::root(vec![RawNode::new("Region").with_children(vec![
            RawNode::new("North").with_children(vec![
                RawNode::new("Q1").with_values(vec![Some(100.0), Some(10.0)]),
                RawNode::new("Q2").with_values(vec![Some(50.0), Some(10.0)]),
            ]),
            RawNode::new("South").with_values(vec![Some(25.0), None]),
        ])])
    }

    fn columns() -> RawNode {
        RawNode::root(vec![RawNode::new("2024")])
    }

    fn measures() -> Vec<Measure> {
        vec![Measure::new("Revenue"), Measure::new("Units").with_format("0")]
    }

    #[test]
    fn test_accumulator_empty_policy() {
        let acc = Accumulator::new();
        assert_eq!(acc.compute(AggregationType::Sum), Some(0.0));
        assert_eq!(acc.compute(AggregationType::Count), Some(0.0));
        assert_eq!(acc.compute(AggregationType::DistinctCount), Some(0.0));
        assert_eq!(acc.compute(AggregationType::Average), None);
        assert_eq!(acc.compute(AggregationType::Min), None);
        assert_eq!(acc.compute(AggregationType::Max), None);
    }

    #[test]
    fn test_accumulator_functions() {
        let mut acc = Accumulator::new();
        for v in [4.0, -2.0, 4.0, 0.0, -0.0] {
            acc.add(v);
        }
        assert_eq!(acc.compute(AggregationType::Sum), Some(6.0));
        assert_eq!(acc.compute(AggregationType::Count), Some(5.0));
        assert_eq!(acc.compute(AggregationType::DistinctCount), Some(3.0));
        assert_eq!(acc.compute(AggregationType::Average), Some(1.2));
        assert_eq!(acc.compute(AggregationType::Min), Some(-2.0));
        assert_eq!(acc.compute(AggregationType::Max), Some(4.0));

        let mut other = Accumulator::new();
        other.add(10.0);
        acc.merge(&other);
        assert_eq!(acc.compute(AggregationType::Max), Some(10.0));
        assert_eq!(acc.count(), 6);
    }

    #[test]
    fn test_group_aggregate_sums_leaves() {
        let rows = rows();
        let index = ColumnIndex::build(Some(&columns()), 2);
        let measures = measures();
        let agg = TotalsAggregator::new(CellResolver::new(Some(&rows), &index, &measures), AggregationType::Sum);

        assert_eq!(agg.aggregate(&["Region", "North"], &["2024"], Some(0)), Some(150.0));
        assert_eq!(agg.aggregate(&["Region"], &["2024"], Some(0)), Some(175.0));
        assert_eq!(agg.aggregate::<_, &str>(&["Region"], &[], Some(1)), Some(20.0));
    }

    #[test]
    fn test_value_at_prefers_raw_then_aggregate() {
        let rows = rows();
        let index = ColumnIndex::build(Some(&columns()), 2);
        let measures = measures();
        let agg = TotalsAggregator::new(CellResolver::new(Some(&rows), &index, &measures), AggregationType::Sum);

        assert_eq!(agg.value_at(&["Region", "North", "Q1"], &["2024"], 0), Some(100.0));
        assert_eq!(agg.value_at(&["Region", "South"], &["2024"], 1), None, "null leaf stays null");
        assert_eq!(agg.value_at(&["Region", "North"], &["2024"], 0), Some(150.0));
        assert_eq!(agg.value_at(&["Region", "North"], &["1999"], 0), None);
    }

    #[test]
    fn test_subtotal_rows_are_not_double_counted() {
        let plain = rows();
        let mut with_subtotal = rows();
        with_subtotal.children[0]
            .children
            .push(RawNode::new("Total").subtotal().with_values(vec![Some(175.0), Some(20.0)]));

        let index = ColumnIndex::build(Some(&columns()), 2);
        let measures = measures();
        let a = TotalsAggregator::new(CellResolver::new(Some(&plain), &index, &measures), AggregationType::Sum);
        let b = TotalsAggregator::new(CellResolver::new(Some(&with_subtotal), &index, &measures), AggregationType::Sum);

        assert_eq!(
            a.aggregate::<&str, &str>(&[], &[], Some(0)),
            b.aggregate::<&str, &str>(&[], &[], Some(0))
        );
    }

    #[test]
    fn test_subtotal_columns_are_not_double_counted() {
        let cols = RawNode::root(vec![
            RawNode::new("2023"),
            RawNode::new("2024"),
            RawNode::new("Total").subtotal(),
        ]);
        let rows = RawNode::root(vec![RawNode::new("North").with_values(vec![Some(1.0), Some(2.0), Some(3.0)])]);
        let index = ColumnIndex::build(Some(&cols), 1);
        let measures = vec![Measure::new("Revenue")];
        let agg = TotalsAggregator::new(CellResolver::new(Some(&rows), &index, &measures), AggregationType::Sum);

        assert_eq!(agg.aggregate::<_, &str>(&["North"], &[], Some(0)), Some(3.0));
    }

    #[test]
    fn test_calculate_tables() {
        let rows = rows();
        let cols = columns();
        let index = ColumnIndex::build(Some(&cols), 2);
        let measures = measures();
        let agg = TotalsAggregator::new(CellResolver::new(Some(&rows), &index, &measures), AggregationType::Sum);

        let row_tree = HierarchyTree::build(Some(&rows), &ExpandState::new());
        let column_tree = HierarchyTree::build_columns(Some(&cols), &ExpandState::new(), 2);
        let flat = row_tree.flatten();
        let table = agg.calculate(&row_tree, &flat, &column_tree, &TotalsSettings::default());

        let north = table.row_subtotal("Region|North", 0).expect("north subtotal");
        assert_eq!(north.value, Some(150.0));
        assert_eq!(north.formatted_value, "150.00");
        assert!(north.is_subtotal);
        assert_eq!(table.row_subtotal("Region|North", 1).and_then(|t| t.value), Some(20.0));
        assert_eq!(table.row_subtotal("Region|North", 1).map(|t| t.formatted_value.as_str()), Some("20"));

        assert_eq!(table.row_grand_total(0).and_then(|t| t.value), Some(175.0));
        assert!(table.row_grand_total(0).map_or(false, |t| t.is_grand_total));

        // Flattened: Region, North, Q1, Q2, South
        assert_eq!(table.column_grand_total(2, 0).and_then(|t| t.value), Some(100.0));
        assert_eq!(table.column_grand_total(0, 1).and_then(|t| t.value), Some(20.0));
        assert_eq!(table.grand_total(0).and_then(|t| t.value), Some(175.0));
        assert!(table.column_subtotal("2024", 0, 0).is_none(), "flat column axis has no groups");
    }

    #[test]
    fn test_count_grand_total_counts_leaves() {
        let rows = rows();
        let index = ColumnIndex::build(Some(&columns()), 2);
        let measures = measures();
        let agg = TotalsAggregator::new(CellResolver::new(Some(&rows), &index, &measures), AggregationType::Count);

        let row_tree = HierarchyTree::build(Some(&rows), &ExpandState::new());
        let column_tree = HierarchyTree::build_columns(Some(&columns()), &ExpandState::new(), 2);
        let table = agg.calculate(&row_tree, &row_tree.flatten(), &column_tree, &TotalsSettings::default());

        let total = table.row_grand_total(0).expect("grand total");
        assert_eq!(total.value, Some(3.0));
        assert_eq!(total.formatted_value, "3");
    }

    #[test]
    fn test_disabled_categories_have_no_value() {
        let rows = rows();
        let index = ColumnIndex::build(Some(&columns()), 2);
        let measures = measures();
        let agg = TotalsAggregator::new(CellResolver::new(Some(&rows), &index, &measures), AggregationType::Sum);
        let settings = TotalsSettings {
            show_row_subtotals: false,
            show_column_subtotals: false,
            show_row_grand_totals: false,
            show_column_grand_totals: false,
            aggregation_type: AggregationType::Sum,
        };

        let row_tree = HierarchyTree::build(Some(&rows), &ExpandState::new());
        let column_tree = HierarchyTree::build_columns(Some(&columns()), &ExpandState::new(), 2);
        let table = agg.calculate(&row_tree, &row_tree.flatten(), &column_tree, &settings);

        assert!(table.row_subtotal("Region|North", 0).is_none());
        assert!(table.row_grand_total(0).is_none());
        assert!(table.column_grand_total(0, 0).is_none());
        assert!(table.grand_total(0).is_none());
    }

    #[test]
    fn test_column_subtotals_per_row_and_measure() {
        let cols = RawNode::root(vec![
            RawNode::new("2023").with_children(vec![RawNode::new("H1"), RawNode::new("H2")]),
        ]);
        let rows = RawNode::root(vec![RawNode::new("North").with_values(vec![Some(1.0), Some(2.0)])]);
        let index = ColumnIndex::build(Some(&cols), 1);
        let measures = vec![Measure::new("Revenue")];
        let agg = TotalsAggregator::new(CellResolver::new(Some(&rows), &index, &measures), AggregationType::Average);

        let row_tree = HierarchyTree::build(Some(&rows), &ExpandState::new());
        let column_tree = HierarchyTree::build_columns(Some(&cols), &ExpandState::new(), 1);
        let table = agg.calculate(&row_tree, &row_tree.flatten(), &column_tree, &TotalsSettings::default());

        let sub = table.column_subtotal("2023", 0, 0).expect("column subtotal");
        assert_eq!(sub.value, Some(1.5));
        assert_eq!(sub.formatted_value, "1.50");
    }
}
