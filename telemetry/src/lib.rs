//! Telemetry sink for market runs.
//!
//! A `tracing` subscriber turns every info-level event into a row of the table
//! named by the event's target. Tables convert to polars DataFrames and are
//! written out as one parquet file per log kind.
//!
//! # Usage
//!
//! ```ignore
//! // In engine code:
//! tracing::info!(target: "agent_cash_log", timestamp, round, task_id, agent_id, cash);
//!
//! // In a test:
//! let mut rec = telemetry::ScopedRecorder::new("data", "task-1", "baseline");
//! // ... run market ...
//! let cash = &rec.get()["agent_cash_log"];
//! ```

mod sink;
mod table;

pub use sink::{ScopedRecorder, save_parquet};
pub use table::{Cell, DynamicTable, TypedColumn};

use std::cell::RefCell;
use std::collections::HashMap;

use polars::prelude::DataFrame;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Record};
use tracing::{Event, Id, Metadata, Subscriber};

// === SCHEMA CONTRACT ===

/// Columns every market log row carries.
pub const KEY_COLUMNS: [&str; 3] = ["timestamp", "round", "task_id"];

/// Tracing targets the market engine emits, one table each.
pub const LOG_TABLES: [&str; 6] = [
    "trade_log",
    "agent_range_adjustment_log",
    "factory_range_optimization_log",
    "agent_cash_log",
    "agent_demand_removal_log",
    "factory_end_of_round_log",
];

/// Key columns absent from `table`. Empty for a well-formed log table.
pub fn missing_key_columns(table: &DynamicTable) -> Vec<&'static str> {
    KEY_COLUMNS
        .iter()
        .copied()
        .filter(|k| !table.has_column(k))
        .collect()
}

// === RECORDER ===

/// Collection of tables, keyed by tracing target.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    pub tables: HashMap<String, DynamicTable>,
}

impl Recorder {
    /// Rows recorded under `target`, zero if nothing was logged there.
    pub fn row_count(&self, target: &str) -> usize {
        self.tables.get(target).map_or(0, |t| t.row_count)
    }

    /// Convert all tables to polars DataFrames. Tables that fail to convert are skipped.
    pub fn to_dataframes(&self) -> HashMap<String, DataFrame> {
        self.tables
            .iter()
            .filter_map(|(name, table)| table.to_dataframe().ok().map(|df| (name.clone(), df)))
            .collect()
    }
}

thread_local! {
    static RECORDER: RefCell<Recorder> = RefCell::default();
}

/// Gathers the fields of one event before they become a row.
#[derive(Default)]
struct RowVisitor {
    cells: Vec<(String, Cell)>,
}

impl RowVisitor {
    fn put(&mut self, field: &Field, cell: Cell) {
        self.cells.push((field.name().to_string(), cell));
    }
}

impl Visit for RowVisitor {
    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Cell::U64(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Cell::I64(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, Cell::F64(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Cell::Bool(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Cell::Str(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, Cell::Str(format!("{value:?}")));
    }
}

// === SUBSCRIBER ===

/// Tracing subscriber that collects events into column-oriented tables.
///
/// Spans are ignored. Events land in a thread-local recorder, so they must be
/// emitted from the thread that later drains it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataFrameSubscriber {
    market_logs_only: bool,
}

impl DataFrameSubscriber {
    /// Subscriber that keeps only the targets listed in [`LOG_TABLES`].
    pub fn market_logs() -> Self {
        Self {
            market_logs_only: true,
        }
    }
}

impl Subscriber for DataFrameSubscriber {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.is_event()
            && *metadata.level() <= tracing::Level::INFO
            && (!self.market_logs_only || LOG_TABLES.contains(&metadata.target()))
    }

    fn new_span(&self, _span: &Attributes<'_>) -> Id {
        Id::from_u64(1)
    }

    fn record(&self, _span: &Id, _values: &Record<'_>) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event<'_>) {
        let mut visitor = RowVisitor::default();
        event.record(&mut visitor);
        let target = event.metadata().target();

        RECORDER.with(|r| {
            r.borrow_mut()
                .tables
                .entry(target.to_string())
                .or_default()
                .push_row(visitor.cells);
        });
    }

    fn enter(&self, _span: &Id) {}

    fn exit(&self, _span: &Id) {}
}

/// Install a market-log subscriber as the global default.
/// Later calls are no-ops once a global default exists.
pub fn install_subscriber() {
    let _ = tracing::subscriber::set_global_default(DataFrameSubscriber::market_logs());
}

/// Take everything recorded on this thread so far.
pub fn drain() -> Recorder {
    RECORDER.with(|r| std::mem::take(&mut *r.borrow_mut()))
}

/// Discard everything recorded on this thread.
pub fn clear() {
    RECORDER.with(|r| *r.borrow_mut() = Recorder::default());
}

/// Drain and convert to DataFrames in one step.
pub fn drain_to_dataframes() -> HashMap<String, DataFrame> {
    drain().to_dataframes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::subscriber::with_default;

    #[test]
    fn test_events_become_rows() {
        clear();

        with_default(DataFrameSubscriber::default(), || {
            tracing::info!(target: "agent_cash_log", timestamp = 10i64, round = 1u64, task_id = "t", cash = 99.5f64);
            tracing::info!(target: "agent_cash_log", timestamp = 11i64, round = 2u64, task_id = "t", cash = 80.0f64);
        });

        let recorder = drain();
        assert_eq!(recorder.row_count("agent_cash_log"), 2);

        let table = &recorder.tables["agent_cash_log"];
        assert!(missing_key_columns(table).is_empty(), "key columns should all be present");
        assert_eq!(
            table.column("cash"),
            Some(&TypedColumn::F64(vec![99.5, 80.0])),
            "cash values should match emission order"
        );
        assert_eq!(table.column("round"), Some(&TypedColumn::U64(vec![1, 2])));
    }

    #[test]
    fn test_market_logs_filter_drops_foreign_targets() {
        clear();

        with_default(DataFrameSubscriber::market_logs(), || {
            tracing::info!(target: "trade_log", round = 1u64);
            tracing::info!(target: "debug_probe", round = 1u64);
        });

        let recorder = drain();
        assert_eq!(recorder.row_count("trade_log"), 1);
        assert_eq!(recorder.row_count("debug_probe"), 0, "unknown targets should be filtered");
    }

    #[test]
    fn test_debug_level_is_ignored() {
        clear();

        with_default(DataFrameSubscriber::default(), || {
            tracing::debug!(target: "trade_log", round = 1u64);
        });

        assert!(drain().tables.is_empty());
    }

    #[test]
    fn test_missing_key_columns_reported() {
        let mut table = DynamicTable::default();
        table.push_row([("round".to_string(), Cell::U64(1))]);
        assert_eq!(missing_key_columns(&table), vec!["timestamp", "task_id"]);
    }
}
