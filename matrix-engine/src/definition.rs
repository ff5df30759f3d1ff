//! FILENAME: matrix-engine/src/definition.rs
//! Matrix Definition - The serializable inputs of one update cycle.
//!
//! This module contains every type the host hands to the engine:
//! - The raw cross-tab snapshot (row axis, column axis, measures)
//! - The per-update settings (totals, sorting defaults, value formats, scrolling)
//! - The durable host state that outlives a rebuild (expand maps, sort configuration)
//!
//! Everything here is plain data. Nothing in this module computes a view.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{MatrixError, MatrixResult};

/// Ordered ancestor labels of a node, including the node itself.
pub type NodePath = SmallVec<[String; 4]>;

/// Separator between path segments inside a path key.
pub const PATH_SEPARATOR: char = '|';

/// Escape character protecting separators that occur inside a raw label.
const PATH_ESCAPE: char = '\\';

// ============================================================================
// PATH KEYS
// ============================================================================

/// Joins path segments into the stable string identity of a node.
///
/// Segments are escaped so that a label containing `|` can never collide
/// with a deeper path: `["a|b"]` keys as `a\|b`, `["a", "b"]` as `a|b`.
pub fn path_key<S: AsRef<str>>(segments: &[S]) -> String {
    let mut key = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            key.push(PATH_SEPARATOR);
        }
        for c in segment.as_ref().chars() {
            if c == PATH_SEPARATOR || c == PATH_ESCAPE {
                key.push(PATH_ESCAPE);
            }
            key.push(c);
        }
    }
    key
}

/// Splits a path key back into its segments (inverse of [`path_key`]).
pub fn split_path_key(key: &str) -> NodePath {
    let mut segments = NodePath::new();
    let mut current = String::new();
    let mut chars = key.chars();

    while let Some(c) = chars.next() {
        if c == PATH_ESCAPE {
            if let Some(escaped) = chars.next() {
                current.push(escaped);
            }
        } else if c == PATH_SEPARATOR {
            segments.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    segments.push(current);
    segments
}

// ============================================================================
// RAW SNAPSHOT
// ============================================================================

/// Which of the two hierarchies an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Axis {
    Rows,
    Columns,
}

/// A scalar as delivered by the data producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl RawValue {
    pub fn text(s: impl Into<String>) -> Self {
        RawValue::Text(s.into())
    }

    /// Display label used as a path segment.
    pub fn label(&self) -> String {
        match self {
            RawValue::Number(n) => n.to_string(),
            RawValue::Bool(b) => b.to_string(),
            RawValue::Text(s) => s.clone(),
        }
    }

    /// Numeric coercion for cell values. Text is parsed from its leading
    /// numeric prefix; anything unparseable (and NaN) is `None`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            RawValue::Number(n) if n.is_nan() => None,
            RawValue::Number(n) => Some(*n),
            RawValue::Bool(_) => None,
            RawValue::Text(s) => parse_leading_number(s),
        }
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

fn parse_leading_number(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let end = s
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
        .map(|(i, c)| i + c.len_utf8())
        .last()?;

    (1..=end)
        .rev()
        .find_map(|n| s[..n].parse::<f64>().ok())
        .filter(|n| !n.is_nan())
}

/// One node of a raw axis hierarchy.
///
/// `values` is only meaningful on the row axis: entry `i` belongs to the
/// `i`-th column leaf in pre-order, each leaf fanned out over the measure
/// list (leaf 0 measure 0, leaf 0 measure 1, ..., leaf 1 measure 0, ...).
/// Producers must emit vectors in exactly that order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNode {
    #[serde(default)]
    pub value: Option<RawValue>,

    #[serde(default)]
    pub is_subtotal: bool,

    #[serde(default)]
    pub children: Vec<RawNode>,

    #[serde(default)]
    pub values: Vec<Option<RawValue>>,
}

impl RawNode {
    /// Creates a node labelled with `label`.
    pub fn new(label: impl Into<String>) -> Self {
        RawNode {
            value: Some(RawValue::Text(label.into())),
            ..RawNode::default()
        }
    }

    /// Creates an unlabelled container, the shape of an axis root.
    pub fn root(children: Vec<RawNode>) -> Self {
        RawNode {
            children,
            ..RawNode::default()
        }
    }

    pub fn with_children(mut self, children: Vec<RawNode>) -> Self {
        self.children = children;
        self
    }

    pub fn with_values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = Option<V>>,
        V: Into<RawValue>,
    {
        self.values = values.into_iter().map(|v| v.map(Into::into)).collect();
        self
    }

    pub fn subtotal(mut self) -> Self {
        self.is_subtotal = true;
        self
    }

    /// Path segment for this node; absent values label as the empty string.
    pub fn label(&self) -> String {
        self.value.as_ref().map(RawValue::label).unwrap_or_default()
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }
}

/// A numeric field displayed at every row/column intersection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measure {
    pub display_name: String,

    #[serde(default)]
    pub format_string: Option<String>,
}

impl Measure {
    pub fn new(display_name: impl Into<String>) -> Self {
        Measure {
            display_name: display_name.into(),
            format_string: None,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format_string = Some(format.into());
        self
    }
}

/// A complete data snapshot. Every update receives a new one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixData {
    #[serde(default)]
    pub rows: Option<RawNode>,

    #[serde(default)]
    pub columns: Option<RawNode>,

    /// Measure order defines value-vector indexing.
    #[serde(default)]
    pub measures: Vec<Measure>,
}

impl MatrixData {
    pub fn new(rows: Option<RawNode>, columns: Option<RawNode>, measures: Vec<Measure>) -> Self {
        MatrixData {
            rows,
            columns,
            measures,
        }
    }

    pub fn from_json(json: &str) -> MatrixResult<Self> {
        serde_json::from_str(json).map_err(MatrixError::Data)
    }
}

// ============================================================================
// SETTINGS
// ============================================================================

/// Aggregation applied to subtotals and grand totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum AggregationType {
    #[default]
    Sum,
    Average,
    Min,
    Max,
    Count,
    DistinctCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SortBy {
    #[default]
    Hierarchy,
    Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn toggled(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

/// Which totals are computed, and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TotalsSettings {
    pub show_row_subtotals: bool,
    pub show_column_subtotals: bool,
    pub show_row_grand_totals: bool,
    pub show_column_grand_totals: bool,
    pub aggregation_type: AggregationType,
}

impl Default for TotalsSettings {
    fn default() -> Self {
        TotalsSettings {
            show_row_subtotals: true,
            show_column_subtotals: true,
            show_row_grand_totals: true,
            show_column_grand_totals: true,
            aggregation_type: AggregationType::Sum,
        }
    }
}

/// Initial sort used when the host has no persisted configuration yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SortingSettings {
    pub sort_by: SortBy,
    pub sort_direction: SortDirection,
}

/// Fallback number format for measures that carry none.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValueSettings {
    pub number_format: Option<String>,
    pub decimal_places: Option<u8>,
}

impl ValueSettings {
    /// Explicit format wins over a bare decimal-place count.
    pub fn fallback_format(&self) -> Option<String> {
        self.number_format.clone().or_else(|| {
            self.decimal_places.map(|d| match d {
                0 => "#,##0".to_string(),
                d => format!("#,##0.{}", "0".repeat(d as usize)),
            })
        })
    }
}

/// Row/column extents and overscan for the visible window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualizationSettings {
    pub row_height: f64,
    pub column_width: f64,
    pub buffer_rows: usize,
    pub buffer_columns: usize,
}

impl Default for VirtualizationSettings {
    fn default() -> Self {
        VirtualizationSettings {
            row_height: 30.0,
            column_width: 100.0,
            buffer_rows: 5,
            buffer_columns: 2,
        }
    }
}

impl VirtualizationSettings {
    pub fn validate(&self) -> MatrixResult<()> {
        if !(self.row_height.is_finite() && self.row_height > 0.0) {
            return Err(MatrixError::InvalidArgument(format!(
                "row height must be positive, got {}",
                self.row_height
            )));
        }
        if !(self.column_width.is_finite() && self.column_width > 0.0) {
            return Err(MatrixError::InvalidArgument(format!(
                "column width must be positive, got {}",
                self.column_width
            )));
        }
        Ok(())
    }
}

/// All named options, supplied wholesale per update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatrixSettings {
    pub totals: TotalsSettings,
    pub sorting: SortingSettings,
    pub values: ValueSettings,
    pub virtualization: VirtualizationSettings,
}

impl MatrixSettings {
    pub fn from_json(json: &str) -> MatrixResult<Self> {
        let settings: MatrixSettings = serde_json::from_str(json).map_err(MatrixError::Config)?;
        settings.virtualization.validate()?;
        Ok(settings)
    }
}

// ============================================================================
// DURABLE HOST STATE
// ============================================================================

/// Expand/collapse decisions keyed by path key.
///
/// The only state that survives a rebuild. Entries are written solely by
/// explicit gestures; an absent key means "use the default for that node".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpandState {
    entries: FxHashMap<String, bool>,
}

impl ExpandState {
    pub fn new() -> Self {
        ExpandState::default()
    }

    pub fn get(&self, key: &str) -> Option<bool> {
        self.entries.get(key).copied()
    }

    /// Effective state of a node. Unseen keys default to expanded when the
    /// node has children; leaves never expand.
    pub fn is_expanded(&self, key: &str, has_children: bool) -> bool {
        has_children && self.get(key).unwrap_or(true)
    }

    pub fn set(&mut self, key: impl Into<String>, expanded: bool) {
        self.entries.insert(key.into(), expanded);
    }

    pub fn expand(&mut self, key: impl Into<String>) {
        self.set(key, true);
    }

    pub fn collapse(&mut self, key: impl Into<String>) {
        self.set(key, false);
    }

    /// Flips the effective state of `key` and returns the new state.
    /// `default_expanded` is what an unseen key currently means.
    pub fn toggle(&mut self, key: impl Into<String>, default_expanded: bool) -> bool {
        let key = key.into();
        let next = !self.get(&key).unwrap_or(default_expanded);
        self.entries.insert(key, next);
        next
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// A column to sort rows by: a column path plus the measure shown under it.
/// The path may name a leaf or a column group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortColumn {
    pub column_path: NodePath,
    #[serde(default)]
    pub measure_index: usize,
}

impl SortColumn {
    pub fn new<S: AsRef<str>>(column_path: &[S], measure_index: usize) -> Self {
        SortColumn {
            column_path: column_path.iter().map(|s| s.as_ref().to_string()).collect(),
            measure_index,
        }
    }
}

/// Persisted sort state, owned by the host across updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SortConfiguration {
    pub sort_by: SortBy,
    pub sort_direction: SortDirection,
    pub sort_columns: Vec<SortColumn>,
    pub multi_column_sort: bool,
}

impl Default for SortConfiguration {
    fn default() -> Self {
        SortConfiguration {
            sort_by: SortBy::Hierarchy,
            sort_direction: SortDirection::Asc,
            sort_columns: Vec::new(),
            multi_column_sort: true,
        }
    }
}

impl From<&SortingSettings> for SortConfiguration {
    fn from(settings: &SortingSettings) -> Self {
        SortConfiguration {
            sort_by: settings.sort_by,
            sort_direction: settings.sort_direction,
            ..SortConfiguration::default()
        }
    }
}

/// Everything the host persists between update cycles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatrixState {
    pub rows: ExpandState,
    pub columns: ExpandState,
    pub sort: SortConfiguration,
}

impl MatrixState {
    /// Fresh state seeded from the settings' sort defaults.
    pub fn for_settings(settings: &MatrixSettings) -> Self {
        MatrixState {
            rows: ExpandState::new(),
            columns: ExpandState::new(),
            sort: SortConfiguration::from(&settings.sorting),
        }
    }

    pub fn expand_state(&self, axis: Axis) -> &ExpandState {
        match axis {
            Axis::Rows => &self.rows,
            Axis::Columns => &self.columns,
        }
    }

    pub fn expand_state_mut(&mut self, axis: Axis) -> &mut ExpandState {
        match axis {
            Axis::Rows => &mut self.rows,
            Axis::Columns => &mut self.columns,
        }
    }

    pub fn from_json(json: &str) -> MatrixResult<Self> {
        serde_json::from_str(json).map_err(MatrixError::State)
    }

    pub fn to_json(&self) -> MatrixResult<String> {
        serde_json::to_string(self).map_err(MatrixError::State)
    }
}
