//! Column-oriented tables built row by row from event fields.

use std::collections::BTreeMap;

use polars::prelude::*;

/// A single field value captured from an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    U64(u64),
    I64(i64),
    F64(f64),
    Bool(bool),
    Str(String),
}

/// A column of typed values.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedColumn {
    U64(Vec<u64>),
    I64(Vec<i64>),
    F64(Vec<f64>),
    Bool(Vec<bool>),
    Str(Vec<String>),
}

impl TypedColumn {
    /// New column typed after `cell`, pre-filled with defaults for `rows` earlier rows.
    fn for_cell(cell: &Cell, rows: usize) -> Self {
        match cell {
            Cell::U64(_) => TypedColumn::U64(vec![0; rows]),
            Cell::I64(_) => TypedColumn::I64(vec![0; rows]),
            Cell::F64(_) => TypedColumn::F64(vec![0.0; rows]),
            Cell::Bool(_) => TypedColumn::Bool(vec![false; rows]),
            Cell::Str(_) => TypedColumn::Str(vec![String::new(); rows]),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TypedColumn::U64(v) => v.len(),
            TypedColumn::I64(v) => v.len(),
            TypedColumn::F64(v) => v.len(),
            TypedColumn::Bool(v) => v.len(),
            TypedColumn::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a value, coercing between numeric kinds when the column type was
    /// fixed by an earlier row. Incompatible values fall back to the column default.
    fn push(&mut self, cell: Cell) {
        match (self, cell) {
            (TypedColumn::U64(v), Cell::U64(x)) => v.push(x),
            (TypedColumn::U64(v), Cell::I64(x)) => v.push(x.max(0) as u64),
            (TypedColumn::I64(v), Cell::I64(x)) => v.push(x),
            (TypedColumn::I64(v), Cell::U64(x)) => v.push(i64::try_from(x).unwrap_or(i64::MAX)),
            (TypedColumn::F64(v), Cell::F64(x)) => v.push(x),
            (TypedColumn::F64(v), Cell::U64(x)) => v.push(x as f64),
            (TypedColumn::F64(v), Cell::I64(x)) => v.push(x as f64),
            (TypedColumn::Bool(v), Cell::Bool(x)) => v.push(x),
            (TypedColumn::Str(v), Cell::Str(x)) => v.push(x),
            (TypedColumn::Str(v), other) => v.push(other.to_string()),
            (col, _) => col.pad_to(col.len() + 1),
        }
    }

    fn pad_to(&mut self, rows: usize) {
        let padding = rows.saturating_sub(self.len());
        if padding == 0 {
            return;
        }
        match self {
            TypedColumn::U64(v) => v.extend(std::iter::repeat_n(0, padding)),
            TypedColumn::I64(v) => v.extend(std::iter::repeat_n(0, padding)),
            TypedColumn::F64(v) => v.extend(std::iter::repeat_n(0.0, padding)),
            TypedColumn::Bool(v) => v.extend(std::iter::repeat_n(false, padding)),
            TypedColumn::Str(v) => v.extend(std::iter::repeat_n(String::new(), padding)),
        }
    }

    fn to_column(&self, name: &str) -> Column {
        match self {
            TypedColumn::U64(v) => Column::new(name.into(), v),
            TypedColumn::I64(v) => Column::new(name.into(), v),
            TypedColumn::F64(v) => Column::new(name.into(), v),
            TypedColumn::Bool(v) => Column::new(name.into(), v),
            TypedColumn::Str(v) => Column::new(name.into(), v),
        }
    }
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cell::U64(x) => write!(f, "{x}"),
            Cell::I64(x) => write!(f, "{x}"),
            Cell::F64(x) => write!(f, "{x}"),
            Cell::Bool(x) => write!(f, "{x}"),
            Cell::Str(x) => f.write_str(x),
        }
    }
}

/// A table whose schema emerges from the rows recorded into it.
///
/// Columns are kept in name order so the DataFrame layout is stable across runs.
#[derive(Debug, Clone, Default)]
pub struct DynamicTable {
    pub columns: BTreeMap<String, TypedColumn>,
    pub row_count: usize,
}

impl DynamicTable {
    /// Append one row. Columns absent from `cells` receive their default value;
    /// columns seen for the first time are back-filled for earlier rows.
    pub fn push_row(&mut self, cells: impl IntoIterator<Item = (String, Cell)>) {
        let rows = self.row_count;
        for (name, cell) in cells {
            let col = self
                .columns
                .entry(name)
                .or_insert_with(|| TypedColumn::for_cell(&cell, rows));
            // A repeated field name in one event keeps the first value
            if col.len() == rows {
                col.push(cell);
            }
        }
        self.row_count += 1;
        for col in self.columns.values_mut() {
            col.pad_to(self.row_count);
        }
    }

    pub fn column(&self, name: &str) -> Option<&TypedColumn> {
        self.columns.get(name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Convert this table to a polars DataFrame.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let columns: Vec<Column> = self
            .columns
            .iter()
            .map(|(name, col)| col.to_column(name))
            .collect();
        DataFrame::new(columns)
    }
}
