//! FILENAME: matrix-engine/src/hierarchy.rs
//! Hierarchy - Axis trees built from a raw snapshot and an expand map.
//!
//! Algorithm:
//! 1. Descend the raw axis; a node's path is its parent's path plus its label
//! 2. Look up the node's path key in the expand map (unseen: expanded iff it has children)
//! 3. Only descend into expanded nodes
//! 4. Column axis only: fan every leaf out into one copy per measure
//!
//! Trees live in an arena. Children are owned id lists; `parent` is a plain
//! back-index used for upward navigation only.

use std::ops::Index;

use log::{debug, trace, warn};
use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::definition::{path_key, split_path_key, ExpandState, NodePath, RawNode};

/// Index of a node inside its [`HierarchyTree`].
pub type NodeId = usize;

// ============================================================================
// TREE STRUCTURES
// ============================================================================

/// A node in a built axis tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HierarchyNode {
    /// Raw label, empty when the producer sent no value.
    pub value: String,

    /// Depth from the axis root (0 = top level).
    pub level: usize,

    /// Ancestor labels including this node; `path.len() == level + 1`.
    pub path: NodePath,

    /// Whether children are built and shown.
    pub is_expanded: bool,

    /// Synthetic aggregate node supplied by the producer.
    pub is_subtotal: bool,

    /// Whether the raw node has children (drives the expand indicator even
    /// when collapsed).
    pub has_children: bool,

    /// Column leaves only: which measure this copy displays.
    pub measure_index: Option<usize>,

    /// Position among the raw siblings (natural order).
    pub source_index: usize,

    pub children: Vec<NodeId>,

    pub parent: Option<NodeId>,
}

impl HierarchyNode {
    pub fn path_key(&self) -> String {
        path_key(&self.path)
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// One axis hierarchy: an arena of nodes plus the ordered top-level ids.
#[derive(Debug, Clone, Default)]
pub struct HierarchyTree {
    nodes: Vec<HierarchyNode>,
    roots: Vec<NodeId>,
}

impl HierarchyTree {
    /// Builds a row-style tree. The raw root is an unlabelled container; its
    /// children become the roots. An absent root yields an empty tree.
    pub fn build(raw_root: Option<&RawNode>, expand: &ExpandState) -> Self {
        let mut tree = HierarchyTree::default();
        if let Some(root) = raw_root {
            tree.roots = tree.build_level(&root.children, None, &NodePath::new(), 0, expand);
        }
        debug!("build_axis nodes={} roots={}", tree.nodes.len(), tree.roots.len());
        tree
    }

    /// Builds a column tree: same algorithm, then every leaf (including
    /// collapsed groups) fans out into one node per measure.
    pub fn build_columns(
        raw_root: Option<&RawNode>,
        expand: &ExpandState,
        measure_count: usize,
    ) -> Self {
        let tree = Self::build(raw_root, expand);
        let fanned = tree.fan_out_measures(measure_count);
        debug!(
            "build_columns nodes={} measures={}",
            fanned.nodes.len(),
            measure_count
        );
        fanned
    }

    /// Recursively builds one sibling group.
    fn build_level(
        &mut self,
        raw: &[RawNode],
        parent: Option<NodeId>,
        parent_path: &NodePath,
        level: usize,
        expand: &ExpandState,
    ) -> Vec<NodeId> {
        let mut ids = Vec::with_capacity(raw.len());
        let mut seen: FxHashSet<String> = FxHashSet::default();

        for (source_index, raw_node) in raw.iter().enumerate() {
            let value = raw_node.label();
            let mut path = parent_path.clone();
            path.push(value.clone());

            let key = path_key(&path);
            let has_children = raw_node.has_children();
            let is_expanded = expand.is_expanded(&key, has_children);
            if !seen.insert(key) {
                warn!("duplicate sibling path '{}'", path_key(&path));
            }

            let id = self.nodes.len();
            self.nodes.push(HierarchyNode {
                value,
                level,
                path: path.clone(),
                is_expanded,
                is_subtotal: raw_node.is_subtotal,
                has_children,
                measure_index: None,
                source_index,
                children: Vec::new(),
                parent,
            });

            if is_expanded {
                let children = self.build_level(&raw_node.children, Some(id), &path, level + 1, expand);
                self.nodes[id].children = children;
            }

            ids.push(id);
        }

        ids
    }

    /// Rebuilds the arena with every leaf replaced by per-measure copies.
    fn fan_out_measures(self, measure_count: usize) -> Self {
        let mut out = HierarchyTree::default();
        out.roots = out.fan_out_level(&self, &self.roots, None, measure_count);
        out
    }

    fn fan_out_level(
        &mut self,
        source: &HierarchyTree,
        ids: &[NodeId],
        parent: Option<NodeId>,
        measure_count: usize,
    ) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(ids.len() * measure_count.max(1));

        for &id in ids {
            let node = &source.nodes[id];

            if node.is_leaf() {
                for measure_index in 0..measure_count {
                    let mut copy = node.clone();
                    copy.measure_index = Some(measure_index);
                    copy.parent = parent;
                    out.push(self.nodes.len());
                    self.nodes.push(copy);
                }
            } else {
                let mut group = node.clone();
                group.children = Vec::new();
                group.parent = parent;
                let new_id = self.nodes.len();
                self.nodes.push(group);

                let children = self.fan_out_level(source, &node.children, Some(new_id), measure_count);
                self.nodes[new_id].children = children;
                out.push(new_id);
            }
        }

        out
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn get(&self, id: NodeId) -> Option<&HierarchyNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All built nodes in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &HierarchyNode)> {
        self.nodes.iter().enumerate()
    }

    pub fn parent(&self, id: NodeId) -> Option<&HierarchyNode> {
        self.nodes.get(id)?.parent.and_then(|p| self.nodes.get(p))
    }

    /// Members of one sibling group: the roots for `None`, else the children.
    pub fn siblings_under(&self, parent: Option<NodeId>) -> &[NodeId] {
        match parent {
            None => &self.roots,
            Some(id) => self.nodes.get(id).map(|n| n.children.as_slice()).unwrap_or(&[]),
        }
    }

    /// Replaces the order of one sibling group. `order` must be a
    /// permutation of the current group.
    pub(crate) fn reorder_siblings(&mut self, parent: Option<NodeId>, order: Vec<NodeId>) {
        debug_assert_eq!(order.len(), self.siblings_under(parent).len());
        match parent {
            None => self.roots = order,
            Some(id) => {
                if let Some(node) = self.nodes.get_mut(id) {
                    node.children = order;
                }
            }
        }
    }

    /// Every sibling group in the tree, outermost first.
    pub fn sibling_groups(&self) -> Vec<Option<NodeId>> {
        std::iter::once(None)
            .chain(
                self.nodes
                    .iter()
                    .enumerate()
                    .filter(|(_, n)| !n.children.is_empty())
                    .map(|(id, _)| Some(id)),
            )
            .collect()
    }

    /// Pre-order visible sequence: a node, then its children if expanded.
    /// Holds no iteration state; calling it twice yields the same output.
    pub fn flatten(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();

        while let Some(id) = stack.pop() {
            out.push(id);
            let node = &self.nodes[id];
            if node.is_expanded && !node.children.is_empty() {
                stack.extend(node.children.iter().rev().copied());
            }
        }

        out
    }

    /// Locates a built node by positional path comparison.
    pub fn find<S: AsRef<str>>(&self, path: &[S]) -> Option<NodeId> {
        let mut candidates = self.roots.as_slice();
        let mut found = None;

        for segment in path {
            let id = candidates
                .iter()
                .copied()
                .find(|&id| self.nodes[id].value == segment.as_ref())?;
            found = Some(id);
            candidates = &self.nodes[id].children;
        }

        found
    }

    /// Locates a fanned-out column leaf by path and measure.
    pub fn find_column<S: AsRef<str>>(&self, path: &[S], measure_index: usize) -> Option<NodeId> {
        let (last, prefix) = path.split_last()?;
        let candidates = if prefix.is_empty() {
            self.roots.as_slice()
        } else {
            self.siblings_under(Some(self.find(prefix)?))
        };

        candidates.iter().copied().find(|&id| {
            let node = &self.nodes[id];
            node.value == last.as_ref() && node.measure_index == Some(measure_index)
        })
    }
}

impl Index<NodeId> for HierarchyTree {
    type Output = HierarchyNode;

    fn index(&self, id: NodeId) -> &HierarchyNode {
        &self.nodes[id]
    }
}

// ============================================================================
// RAW NAVIGATION
// ============================================================================

/// Finds a raw node by path, descending from the root's children and
/// comparing segments positionally. Duplicate labels are tried in order.
pub fn find_raw<'a, S: AsRef<str>>(raw_root: Option<&'a RawNode>, path: &[S]) -> Option<&'a RawNode> {
    fn descend<'a, S: AsRef<str>>(nodes: &'a [RawNode], path: &[S]) -> Option<&'a RawNode> {
        let (head, rest) = path.split_first()?;
        nodes
            .iter()
            .filter(|n| n.label() == head.as_ref())
            .find_map(|n| if rest.is_empty() { Some(n) } else { descend(&n.children, rest) })
    }

    descend(&raw_root?.children, path)
}

/// Path keys of every expandable raw node at `level`.
pub fn expandable_keys_at_level(raw_root: Option<&RawNode>, level: usize) -> Vec<String> {
    fn collect(nodes: &[RawNode], path: &mut NodePath, depth: usize, level: usize, out: &mut Vec<String>) {
        for node in nodes {
            path.push(node.label());
            if depth == level {
                if node.has_children() {
                    out.push(path_key(path));
                }
            } else {
                collect(&node.children, path, depth + 1, level, out);
            }
            path.pop();
        }
    }

    let mut keys = Vec::new();
    if let Some(root) = raw_root {
        collect(&root.children, &mut NodePath::new(), 0, level, &mut keys);
    }
    keys
}

// ============================================================================
// EXPAND / COLLAPSE TRANSITIONS
// ============================================================================

pub fn expand(state: &mut ExpandState, key: &str) {
    trace!("expand '{}'", key);
    state.expand(key);
}

pub fn collapse(state: &mut ExpandState, key: &str) {
    trace!("collapse '{}'", key);
    state.collapse(key);
}

/// Flips a node and returns its new effective state. Leaves and unknown
/// keys stay collapsed and leave the expand map untouched.
pub fn toggle(state: &mut ExpandState, raw_root: Option<&RawNode>, key: &str) -> bool {
    let path = split_path_key(key);
    let has_children = find_raw(raw_root, &path).map_or(false, RawNode::has_children);
    if !has_children {
        trace!("toggle '{}' ignored, not expandable", key);
        return false;
    }
    let expanded = state.toggle(key, true);
    trace!("toggle '{}' expanded={}", key, expanded);
    expanded
}

pub fn expand_all(state: &mut ExpandState, raw_root: Option<&RawNode>, level: usize) {
    let keys = expandable_keys_at_level(raw_root, level);
    trace!("expand_all level={} keys={}", level, keys.len());
    for key in keys {
        state.expand(key);
    }
}

pub fn collapse_all(state: &mut ExpandState, raw_root: Option<&RawNode>, level: usize) {
    let keys = expandable_keys_at_level(raw_root, level);
    trace!("collapse_all level={} keys={}", level, keys.len());
    for key in keys {
        state.collapse(key);
    }
}

/// Reveals the level below a node.
pub fn drill_down(state: &mut ExpandState, key: &str) {
    expand(state, key);
}

/// Hides a node's level by collapsing its parent. No-op at the top level.
pub fn drill_up(state: &mut ExpandState, key: &str) {
    let mut path = split_path_key(key);
    path.pop();
    if !path.is_empty() {
        collapse(state, &path_key(&path));
    }
}
