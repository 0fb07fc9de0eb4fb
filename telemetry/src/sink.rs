//! Parquet output for recorded runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use polars::prelude::*;

use crate::{clear, drain_to_dataframes, install_subscriber};

fn io_err(e: std::io::Error) -> PolarsError {
    PolarsError::IO {
        error: e.into(),
        msg: None,
    }
}

/// Save all DataFrames as parquet files in `dir`, one `{name}.parquet` per table.
pub fn save_parquet(dfs: &mut HashMap<String, DataFrame>, dir: &Path) -> PolarsResult<()> {
    std::fs::create_dir_all(dir).map_err(io_err)?;
    for (name, df) in dfs.iter_mut() {
        let file = std::fs::File::create(dir.join(format!("{name}.parquet"))).map_err(io_err)?;
        ParquetWriter::new(file).finish(df)?;
    }
    Ok(())
}

/// Replace non-alphanumeric chars with `_` and truncate for use in directory names.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .take(60)
        .collect()
}

/// RAII guard around one recorded run.
///
/// Creation clears this thread's recorder and installs the subscriber. Drop writes
/// `{parent}/{task_id}_{run}/<table>.parquet` followed by a `_ready` sentinel.
/// Call [`ScopedRecorder::get`] after the run to inspect the tables first.
pub struct ScopedRecorder {
    run_dir: PathBuf,
    run_name: String,
    dfs: Option<HashMap<String, DataFrame>>,
}

impl ScopedRecorder {
    pub fn new(parent: impl Into<PathBuf>, task_id: &str, run: &str) -> Self {
        let run_name = format!("{}_{}", sanitize(task_id), sanitize(run));
        let run_dir = parent.into().join(&run_name);
        clear();
        install_subscriber();
        Self {
            run_dir,
            run_name,
            dfs: None,
        }
    }

    /// First call drains the thread-local recorder; later calls return the cached tables.
    pub fn get(&mut self) -> &HashMap<String, DataFrame> {
        self.dfs.get_or_insert_with(drain_to_dataframes)
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }
}

impl Drop for ScopedRecorder {
    fn drop(&mut self) {
        let mut dfs = self.dfs.take().unwrap_or_else(drain_to_dataframes);
        if dfs.is_empty() {
            return;
        }
        if let Err(e) = save_parquet(&mut dfs, &self.run_dir) {
            eprintln!("ScopedRecorder({}): failed to write parquet: {e}", self.run_name);
            return;
        }
        if let Err(e) = std::fs::File::create(self.run_dir.join("_ready")) {
            eprintln!("ScopedRecorder({}): failed to write _ready sentinel: {e}", self.run_name);
        }
    }
}
