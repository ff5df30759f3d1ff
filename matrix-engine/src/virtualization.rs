//! FILENAME: matrix-engine/src/virtualization.rs
//! Virtualization - Which flattened rows and leaf columns must be materialised.
//!
//! Rows and columns have uniform extents, so the window is pure arithmetic:
//!   start = max(0, floor(offset / size) - buffer)
//!   end   = min(total - 1, ceil((offset + extent) / size) + buffer)
//! Bounds are inclusive. An empty axis yields an empty range.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::definition::VirtualizationSettings;

/// Visible area in layout units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Viewport { width, height }
    }
}

/// Inclusive index window over the flattened rows and leaf columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibleRange {
    pub start_row: usize,
    pub end_row: usize,
    pub start_column: usize,
    pub end_column: usize,
    pub total_rows: usize,
    pub total_columns: usize,
}

impl VisibleRange {
    pub fn row_count(&self) -> usize {
        if self.total_rows == 0 {
            0
        } else {
            self.end_row - self.start_row + 1
        }
    }

    pub fn column_count(&self) -> usize {
        if self.total_columns == 0 {
            0
        } else {
            self.end_column - self.start_column + 1
        }
    }

    pub fn contains_row(&self, row: usize) -> bool {
        self.total_rows > 0 && (self.start_row..=self.end_row).contains(&row)
    }

    pub fn contains_column(&self, column: usize) -> bool {
        self.total_columns > 0 && (self.start_column..=self.end_column).contains(&column)
    }

    pub fn rows(&self) -> std::ops::Range<usize> {
        self.start_row..self.start_row + self.row_count()
    }

    pub fn columns(&self) -> std::ops::Range<usize> {
        self.start_column..self.start_column + self.column_count()
    }
}

/// Computes the materialised window for one scroll position.
#[allow(clippy::too_many_arguments)]
pub fn compute_visible_range(
    viewport: Viewport,
    total_rows: usize,
    total_columns: usize,
    scroll_top: f64,
    scroll_left: f64,
    row_height: f64,
    column_width: f64,
    buffer_rows: usize,
    buffer_columns: usize,
) -> VisibleRange {
    debug_assert!(row_height > 0.0 && column_width > 0.0, "extents must be positive");

    let (start_row, end_row) = axis_range(total_rows, scroll_top, viewport.height, row_height, buffer_rows);
    let (start_column, end_column) =
        axis_range(total_columns, scroll_left, viewport.width, column_width, buffer_columns);

    VisibleRange {
        start_row,
        end_row,
        start_column,
        end_column,
        total_rows,
        total_columns,
    }
}

fn axis_range(total: usize, offset: f64, extent: f64, size: f64, buffer: usize) -> (usize, usize) {
    if total == 0 {
        return (0, 0);
    }

    let size = if size.is_finite() && size > 0.0 { size } else { 1.0 };
    let offset = if offset.is_finite() { offset.max(0.0) } else { 0.0 };
    let extent = if extent.is_finite() { extent.max(0.0) } else { 0.0 };

    // f64 -> usize casts saturate
    let first = (offset / size).floor() as usize;
    let last = ((offset + extent) / size).ceil() as usize;

    let end = last.saturating_add(buffer).min(total - 1);
    let start = first.saturating_sub(buffer).min(end);
    (start, end)
}

fn valid_extent(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

// ============================================================================
// WINDOW STATE
// ============================================================================

/// Scroll state plus the extents of the current flattened sequences.
#[derive(Debug, Clone)]
pub struct VirtualizationWindow {
    row_height: f64,
    column_width: f64,
    buffer_rows: usize,
    buffer_columns: usize,
    viewport: Viewport,
    scroll_top: f64,
    scroll_left: f64,
    total_rows: usize,
    total_columns: usize,
    range: VisibleRange,
}

impl Default for VirtualizationWindow {
    fn default() -> Self {
        VirtualizationWindow::new(&VirtualizationSettings::default())
    }
}

impl VirtualizationWindow {
    /// Invalid extents are replaced by the defaults.
    pub fn new(settings: &VirtualizationSettings) -> Self {
        let defaults = VirtualizationSettings::default();
        let row_height = if valid_extent(settings.row_height) {
            settings.row_height
        } else {
            warn!("invalid row height {}, using {}", settings.row_height, defaults.row_height);
            defaults.row_height
        };
        let column_width = if valid_extent(settings.column_width) {
            settings.column_width
        } else {
            warn!("invalid column width {}, using {}", settings.column_width, defaults.column_width);
            defaults.column_width
        };

        VirtualizationWindow {
            row_height,
            column_width,
            buffer_rows: settings.buffer_rows,
            buffer_columns: settings.buffer_columns,
            viewport: Viewport::default(),
            scroll_top: 0.0,
            scroll_left: 0.0,
            total_rows: 0,
            total_columns: 0,
            range: VisibleRange::default(),
        }
    }

    /// New extents and viewport after a rebuild. Scroll position is kept.
    pub fn update(&mut self, total_rows: usize, total_columns: usize, viewport: Viewport) -> VisibleRange {
        self.total_rows = total_rows;
        self.total_columns = total_columns;
        self.viewport = viewport;
        self.recompute()
    }

    pub fn set_viewport(&mut self, viewport: Viewport) -> VisibleRange {
        self.viewport = viewport;
        self.recompute()
    }

    pub fn set_scroll_position(&mut self, scroll_top: f64, scroll_left: f64) -> VisibleRange {
        self.scroll_top = if scroll_top.is_finite() { scroll_top.max(0.0) } else { 0.0 };
        self.scroll_left = if scroll_left.is_finite() { scroll_left.max(0.0) } else { 0.0 };
        self.recompute()
    }

    pub fn scroll_position(&self) -> (f64, f64) {
        (self.scroll_top, self.scroll_left)
    }

    pub fn set_row_height(&mut self, row_height: f64) -> VisibleRange {
        if valid_extent(row_height) {
            self.row_height = row_height;
        } else {
            warn!("ignoring invalid row height {}", row_height);
        }
        self.recompute()
    }

    pub fn set_column_width(&mut self, column_width: f64) -> VisibleRange {
        if valid_extent(column_width) {
            self.column_width = column_width;
        } else {
            warn!("ignoring invalid column width {}", column_width);
        }
        self.recompute()
    }

    fn recompute(&mut self) -> VisibleRange {
        self.range = compute_visible_range(
            self.viewport,
            self.total_rows,
            self.total_columns,
            self.scroll_top,
            self.scroll_left,
            self.row_height,
            self.column_width,
            self.buffer_rows,
            self.buffer_columns,
        );
        debug!(
            "visible_range rows={}..={} cols={}..={} total={}x{}",
            self.range.start_row,
            self.range.end_row,
            self.range.start_column,
            self.range.end_column,
            self.total_rows,
            self.total_columns
        );
        self.range
    }

    pub fn visible_range(&self) -> VisibleRange {
        self.range
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn row_height(&self) -> f64 {
        self.row_height
    }

    pub fn column_width(&self) -> f64 {
        self.column_width
    }

    pub fn total_height(&self) -> f64 {
        self.total_rows as f64 * self.row_height
    }

    pub fn total_width(&self) -> f64 {
        self.total_columns as f64 * self.column_width
    }

    pub fn is_row_visible(&self, row: usize) -> bool {
        self.range.contains_row(row)
    }

    pub fn is_column_visible(&self, column: usize) -> bool {
        self.range.contains_column(column)
    }

    /// Top edge of a row in layout units.
    pub fn row_offset(&self, row: usize) -> f64 {
        row as f64 * self.row_height
    }

    /// Left edge of a leaf column in layout units.
    pub fn column_offset(&self, column: usize) -> f64 {
        column as f64 * self.column_width
    }
}
