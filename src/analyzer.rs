//! `analyzer dump` subcommand: merges per-thread trace files into the
//! tab-separated table described in SPEC_FULL.md §4.G.

use std::path::PathBuf;

use anyhow::{Context, Result};

const DEFAULT_OUTPUT: &str = "trace.data";

pub fn dump(output: Option<PathBuf>, inputs: Vec<PathBuf>) -> Result<()> {
    let output_path = output.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));

    let n = trace_core::reassemble(&inputs, &output_path)
        .with_context(|| format!("failed to reassemble into {}", output_path.display()))?;

    tracing::info!(
        traces = n,
        output = %output_path.display(),
        "analyzer: dump complete"
    );
    Ok(())
}
