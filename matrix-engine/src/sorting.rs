//! FILENAME: matrix-engine/src/sorting.rs
//! Sorting - Reorders sibling groups of a built tree.
//!
//! Each sibling group is sorted on its own; the tree shape never changes.
//! Producer subtotal nodes keep their slot inside the group and only the
//! data siblings around them move.
//!
//! Modes:
//! - Hierarchy: natural source order, reversed for descending
//! - Value: the value shown at one or more sort columns, later columns
//!   breaking ties of earlier ones. Missing values come first in both
//!   directions (lowest when ascending, highest when descending).

use std::cmp::Ordering;

use log::{debug, trace};

use crate::definition::{SortBy, SortColumn, SortConfiguration, SortDirection};
use crate::hierarchy::{HierarchyTree, NodeId};
use crate::totals::TotalsAggregator;

// ============================================================================
// SORT CONFIGURATION MUTATORS
// ============================================================================

impl SortConfiguration {
    pub fn toggle_sort_direction(&mut self) {
        self.sort_direction = self.sort_direction.toggled();
        trace!("toggle_sort_direction direction={:?}", self.sort_direction);
    }

    /// Adds a sort column and switches to value sorting. Without multi-column
    /// sort the new column replaces the list. Adding a column twice is a no-op.
    pub fn add_sort_column(&mut self, column: SortColumn) {
        if !self.multi_column_sort {
            self.sort_columns.clear();
        }
        if !self.sort_columns.contains(&column) {
            self.sort_columns.push(column);
        }
        self.sort_by = SortBy::Value;
        trace!("add_sort_column columns={}", self.sort_columns.len());
    }

    /// Removes a sort column. Falls back to hierarchy order once none remain.
    pub fn remove_sort_column(&mut self, column: &SortColumn) -> bool {
        let before = self.sort_columns.len();
        self.sort_columns.retain(|c| c != column);
        if self.sort_columns.is_empty() {
            self.sort_by = SortBy::Hierarchy;
        }
        trace!("remove_sort_column columns={}", self.sort_columns.len());
        self.sort_columns.len() != before
    }

    pub fn clear_sort(&mut self) {
        self.sort_by = SortBy::Hierarchy;
        self.sort_direction = SortDirection::Asc;
        self.sort_columns.clear();
        trace!("clear_sort");
    }

    /// Columns that take part in value sorting.
    pub fn active_sort_columns(&self) -> &[SortColumn] {
        if self.multi_column_sort {
            &self.sort_columns
        } else {
            &self.sort_columns[..self.sort_columns.len().min(1)]
        }
    }
}

// ============================================================================
// SORT ENGINE
// ============================================================================

/// Orders two sort values. `None` sorts first in either direction.
pub fn compare_sort_values(a: Option<f64>, b: Option<f64>, direction: SortDirection) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => match direction {
            SortDirection::Asc => x.total_cmp(&y),
            SortDirection::Desc => y.total_cmp(&x),
        },
    }
}

pub struct SortEngine<'a> {
    aggregator: TotalsAggregator<'a>,
    config: &'a SortConfiguration,
}

impl<'a> SortEngine<'a> {
    pub fn new(aggregator: TotalsAggregator<'a>, config: &'a SortConfiguration) -> Self {
        SortEngine { aggregator, config }
    }

    /// Sorts every sibling group of `tree` in place.
    pub fn sort_tree(&self, tree: &mut HierarchyTree) {
        let groups = tree.sibling_groups();
        debug!(
            "sort_rows by={:?} direction={:?} groups={}",
            self.config.sort_by,
            self.config.sort_direction,
            groups.len()
        );

        for parent in groups {
            let group = tree.siblings_under(parent).to_vec();
            if group.len() < 2 {
                continue;
            }
            let order = self.sort_group(tree, &group);
            tree.reorder_siblings(parent, order);
        }
    }

    /// Returns the sorted order of one sibling group.
    pub fn sort_group(&self, tree: &HierarchyTree, group: &[NodeId]) -> Vec<NodeId> {
        let slots: Vec<usize> = group
            .iter()
            .enumerate()
            .filter(|&(_, &id)| !tree[id].is_subtotal)
            .map(|(i, _)| i)
            .collect();
        let mut movable: Vec<NodeId> = slots.iter().map(|&i| group[i]).collect();

        let columns = self.config.active_sort_columns();
        if self.config.sort_by == SortBy::Value && !columns.is_empty() {
            self.sort_by_value(tree, &mut movable, columns);
        } else {
            self.sort_by_hierarchy(tree, &mut movable);
        }

        let mut order = group.to_vec();
        for (slot, id) in slots.into_iter().zip(movable) {
            order[slot] = id;
        }
        order
    }

    fn sort_by_hierarchy(&self, tree: &HierarchyTree, ids: &mut [NodeId]) {
        ids.sort_by_key(|&id| tree[id].source_index);
        if self.config.sort_direction == SortDirection::Desc {
            ids.reverse();
        }
    }

    fn sort_by_value(&self, tree: &HierarchyTree, ids: &mut Vec<NodeId>, columns: &[SortColumn]) {
        let direction = self.config.sort_direction;
        let mut keyed: Vec<(NodeId, Vec<Option<f64>>)> = ids
            .iter()
            .map(|&id| {
                let path = &tree[id].path;
                let keys = columns
                    .iter()
                    .map(|c| self.aggregator.value_at(path, &c.column_path, c.measure_index))
                    .collect();
                (id, keys)
            })
            .collect();

        // Vec::sort_by is stable: equal keys keep their incoming order.
        keyed.sort_by(|(_, a), (_, b)| {
            a.iter()
                .zip(b)
                .map(|(x, y)| compare_sort_values(*x, *y, direction))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });

        *ids = keyed.into_iter().map(|(id, _)| id).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{AggregationType, ExpandState, Measure, RawNode};
    use crate::resolver::{CellResolver, ColumnIndex};

    fn rows() -> RawNode {
        RawNode::root(vec![
            RawNode::new("A").with_values(vec![Some(3.0), Some(1.0)]),
            RawNode::new("B").with_values(vec![None, Some(1.0)]),
            RawNode::new("C").with_values(vec![Some(1.0), Some(2.0)]),
            RawNode::new("D").with_values(vec![Some(3.0), Some(0.0)]),
        ])
    }

    fn sorted_labels(rows: &RawNode, config: &SortConfiguration) -> Vec<String> {
        let cols = RawNode::root(vec![RawNode::new("X"), RawNode::new("Y")]);
        let index = ColumnIndex::build(Some(&cols), 1);
        let measures = vec![Measure::new("Revenue")];
        let aggregator = TotalsAggregator::new(CellResolver::new(Some(rows), &index, &measures), AggregationType::Sum);

        let mut tree = HierarchyTree::build(Some(rows), &ExpandState::new());
        SortEngine::new(aggregator, config).sort_tree(&mut tree);
        tree.flatten().into_iter().map(|id| tree[id].value.clone()).collect()
    }

    fn by_value(columns: &[&str], direction: SortDirection) -> SortConfiguration {
        let mut config = SortConfiguration::default();
        for c in columns {
            config.add_sort_column(SortColumn::new(&[*c], 0));
        }
        config.sort_direction = direction;
        config
    }

    #[test]
    fn test_hierarchy_order() {
        let rows = rows();
        assert_eq!(sorted_labels(&rows, &SortConfiguration::default()), ["A", "B", "C", "D"]);

        let mut desc = SortConfiguration::default();
        desc.toggle_sort_direction();
        assert_eq!(sorted_labels(&rows, &desc), ["D", "C", "B", "A"]);
    }

    #[test]
    fn test_value_sort_missing_first_both_directions() {
        let rows = rows();
        assert_eq!(sorted_labels(&rows, &by_value(&["X"], SortDirection::Asc)), ["B", "C", "A", "D"]);
        assert_eq!(sorted_labels(&rows, &by_value(&["X"], SortDirection::Desc)), ["B", "A", "D", "C"]);
    }

    #[test]
    fn test_multi_column_tie_break() {
        let rows = rows();
        // A and D tie on X; Y breaks the tie (D=0 < A=1).
        assert_eq!(
            sorted_labels(&rows, &by_value(&["X", "Y"], SortDirection::Asc)),
            ["B", "C", "D", "A"]
        );
    }

    #[test]
    fn test_equal_values_keep_source_order() {
        let rows = RawNode::root(vec![
            RawNode::new("P").with_values(vec![Some(5.0), None]),
            RawNode::new("Q").with_values(vec![Some(5.0), None]),
            RawNode::new("R").with_values(vec![Some(5.0), None]),
        ]);
        assert_eq!(sorted_labels(&rows, &by_value(&["X"], SortDirection::Asc)), ["P", "Q", "R"]);
        assert_eq!(sorted_labels(&rows, &by_value(&["X"], SortDirection::Desc)), ["P", "Q", "R"]);
    }

    #[test]
    fn test_subtotal_keeps_its_slot() {
        let rows = RawNode::root(vec![
            RawNode::new("A").with_values(vec![Some(1.0), None]),
            RawNode::new("B").with_values(vec![Some(2.0), None]),
            RawNode::new("Total").subtotal().with_values(vec![Some(3.0), None]),
        ]);
        assert_eq!(
            sorted_labels(&rows, &by_value(&["X"], SortDirection::Desc)),
            ["B", "A", "Total"]
        );
    }

    #[test]
    fn test_groups_sort_independently() {
        let rows = RawNode::root(vec![
            RawNode::new("G1").with_children(vec![
                RawNode::new("a").with_values(vec![Some(1.0), None]),
                RawNode::new("b").with_values(vec![Some(9.0), None]),
            ]),
            RawNode::new("G2").with_children(vec![RawNode::new("c").with_values(vec![Some(5.0), None])]),
        ]);
        // G1 aggregates to 10, G2 to 5: groups swap, children stay under their parent.
        assert_eq!(
            sorted_labels(&rows, &by_value(&["X"], SortDirection::Asc)),
            ["G2", "c", "G1", "a", "b"]
        );
    }

    #[test]
    fn test_configuration_mutators() {
        let mut config = SortConfiguration::default();
        let x = SortColumn::new(&["X"], 0);
        let y = SortColumn::new(&["Y"], 0);

        config.add_sort_column(x.clone());
        config.add_sort_column(x.clone());
        config.add_sort_column(y.clone());
        assert_eq!(config.sort_by, SortBy::Value);
        assert_eq!(config.sort_columns, vec![x.clone(), y.clone()]);

        assert!(config.remove_sort_column(&x));
        assert!(!config.remove_sort_column(&x));
        assert!(config.remove_sort_column(&y));
        assert_eq!(config.sort_by, SortBy::Hierarchy);

        config.multi_column_sort = false;
        config.add_sort_column(x.clone());
        config.add_sort_column(y.clone());
        assert_eq!(config.sort_columns, vec![y]);

        config.toggle_sort_direction();
        config.clear_sort();
        assert_eq!(config, SortConfiguration { multi_column_sort: false, ..SortConfiguration::default() });
    }

    #[test]
    fn test_compare_sort_values() {
        assert_eq!(compare_sort_values(None, Some(1.0), SortDirection::Asc), Ordering::Less);
        assert_eq!(compare_sort_values(None, Some(1.0), SortDirection::Desc), Ordering::Less);
        assert_eq!(compare_sort_values(Some(2.0), Some(1.0), SortDirection::Desc), Ordering::Less);
    }
}
