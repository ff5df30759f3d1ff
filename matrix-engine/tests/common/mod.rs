//! FILENAME: tests/common/mod.rs
//! Test harness and fixtures for matrix-engine integration tests.

#![allow(dead_code)]

use matrix_engine::{
    Axis, MatrixData, MatrixEngine, MatrixSettings, MatrixState, Measure, RawNode, Viewport,
};

/// Test harness owning an engine plus the host-side durable state.
pub struct TestHarness {
    pub engine: MatrixEngine,
    pub state: MatrixState,
    pub settings: MatrixSettings,
}

impl TestHarness {
    /// Harness with the regional sales fixture loaded.
    pub fn with_sales_data() -> Self {
        Self::with_data(SalesFixture::data(), MatrixSettings::default())
    }

    pub fn with_data(data: MatrixData, settings: MatrixSettings) -> Self {
        let state = MatrixState::for_settings(&settings);
        let mut engine = MatrixEngine::new();
        engine.update(data, settings.clone(), &state, Self::viewport());
        TestHarness { engine, state, settings }
    }

    pub fn viewport() -> Viewport {
        Viewport::new(800.0, 600.0)
    }

    /// Re-runs the update cycle with a fresh snapshot and the current state.
    pub fn update(&mut self, data: MatrixData) {
        self.engine
            .update(data, self.settings.clone(), &self.state, Self::viewport());
    }

    pub fn row_labels(&self) -> Vec<String> {
        self.engine.view().rows.iter().map(|r| r.label.clone()).collect()
    }

    pub fn row_keys(&self) -> Vec<String> {
        self.engine.view().rows.iter().map(|r| r.path_key.clone()).collect()
    }

    pub fn leaf_column_keys(&self) -> Vec<(String, Option<usize>)> {
        self.engine
            .view()
            .leaves()
            .map(|c| (c.path_key.clone(), c.measure_index))
            .collect()
    }

    pub fn toggle_row(&mut self, key: &str) -> bool {
        self.engine.toggle(&mut self.state, Axis::Rows, key)
    }

    pub fn collapse_row(&mut self, key: &str) {
        self.engine.collapse(&mut self.state, Axis::Rows, key);
    }
}

/// Region -> { North -> {Q1, Q2}, South } by Year -> {2023, 2024},
/// measured in Revenue and Expense.
///
/// Column enumeration (ordinal: column, measure):
/// 0: 2023 Revenue, 1: 2023 Expense, 2: 2024 Revenue, 3: 2024 Expense
pub struct SalesFixture;

impl SalesFixture {
    pub fn measures() -> Vec<Measure> {
        vec![
            Measure::new("Revenue"),
            Measure::new("Expense").with_format("$#,##0.00"),
        ]
    }

    pub fn columns() -> RawNode {
        RawNode::root(vec![RawNode::new("Year").with_children(vec![
            RawNode::new("2023"),
            RawNode::new("2024"),
        ])])
    }

    pub fn rows() -> RawNode {
        RawNode::root(vec![RawNode::new("Region").with_children(vec![
            RawNode::new("North").with_children(vec![
                RawNode::new("Q1").with_values(vec![Some(100.0), Some(40.0), Some(120.0), Some(50.0)]),
                RawNode::new("Q2").with_values(vec![Some(80.0), Some(30.0), Some(90.0), Some(35.0)]),
            ]),
            RawNode::new("South").with_values(vec![Some(60.0), Some(20.0), None, Some(25.0)]),
        ])])
    }

    pub fn data() -> MatrixData {
        MatrixData::new(Some(Self::rows()), Some(Self::columns()), Self::measures())
    }

    /// Same data with a producer subtotal row under Region.
    pub fn data_with_subtotal_row() -> MatrixData {
        let mut rows = Self::rows();
        rows.children[0].children.push(
            RawNode::new("Total")
                .subtotal()
                .with_values(vec![Some(240.0), Some(90.0), Some(210.0), Some(110.0)]),
        );
        MatrixData::new(Some(rows), Some(Self::columns()), Self::measures())
    }

    /// Rows x 1 column x 1 measure with a fixed value per row.
    pub fn flat(values: &[(&str, Option<f64>)]) -> MatrixData {
        let rows = RawNode::root(
            values
                .iter()
                .map(|(label, value)| RawNode::new(*label).with_values(vec![*value]))
                .collect(),
        );
        let columns = RawNode::root(vec![RawNode::new("Value")]);
        MatrixData::new(Some(rows), Some(columns), vec![Measure::new("Value")])
    }

    /// `count` leaf rows under `groups` groups, `width` leaf columns.
    pub fn wide(groups: usize, count: usize, width: usize) -> MatrixData {
        let columns = RawNode::root((0..width).map(|c| RawNode::new(format!("C{}", c))).collect());
        let rows = RawNode::root(
            (0..groups)
                .map(|g| {
                    RawNode::new(format!("G{}", g)).with_children(
                        (0..count)
                            .map(|r| {
                                RawNode::new(format!("R{}", r))
                                    .with_values((0..width).map(|c| Some(((g * count + r) * width + c) as f64)))
                            })
                            .collect(),
                    )
                })
                .collect(),
        );
        MatrixData::new(Some(rows), Some(columns), vec![Measure::new("Value")])
    }
}
