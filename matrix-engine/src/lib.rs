//! FILENAME: matrix-engine/src/lib.rs
//! Hierarchical data engine for expandable matrix (cross-tab) grids.
//!
//! Turns a raw nested cross-tab snapshot into navigable flattened views,
//! resolves cells by correlating row value vectors with the column axis,
//! computes subtotals and grand totals, sorts sibling groups, and windows
//! the result for a viewport. Painting, export and event wiring belong to
//! the host.
//!
//! Layers:
//! - `definition`: Serializable inputs (raw snapshot, settings, host state)
//! - `hierarchy`: Axis trees, flattening, expand/collapse transitions
//! - `resolver`: Column enumeration index and cell resolution
//! - `format`: Number formatting for cells and totals
//! - `totals`: Subtotal and grand-total aggregation
//! - `sorting`: Sibling-group ordering and sort configuration gestures
//! - `virtualization`: Visible index window for a scroll position
//! - `view`: Renderable descriptors and column header bands
//! - `engine`: The synchronous update cycle tying the layers together

pub mod definition;
pub mod engine;
pub mod error;
pub mod format;
pub mod hierarchy;
pub mod resolver;
pub mod sorting;
pub mod totals;
pub mod view;
pub mod virtualization;

pub use definition::*;
pub use engine::MatrixEngine;
pub use error::{MatrixError, MatrixResult};
pub use format::{format_number, format_value};
pub use hierarchy::{HierarchyNode, HierarchyTree, NodeId};
pub use resolver::{Cell, CellResolver, ColumnIndex, ColumnLeaf, RowCursor, RowIndex};
pub use sorting::{compare_sort_values, SortEngine};
pub use totals::{Accumulator, TotalValue, TotalsAggregator, TotalsTable};
pub use view::{ColumnDescriptor, HeaderBand, MatrixView, RowDescriptor};
pub use virtualization::{compute_visible_range, Viewport, VirtualizationWindow, VisibleRange};
