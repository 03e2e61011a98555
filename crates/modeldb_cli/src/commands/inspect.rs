//! Inspect command implementation.

use super::{scan, ScannedFile};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Inspection result for one store file.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// File path.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// Number of instances per model type name.
    pub models: BTreeMap<String, usize>,
    /// Number of relation pairs.
    pub pairs: usize,
    /// Highest instance id seen.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_id: Option<u64>,
    /// Records that are not model or relation records.
    pub unrecognized: usize,
    /// Records that failed to parse.
    pub malformed: usize,
}

impl InspectResult {
    fn new(path: &Path, size: u64, scanned: &ScannedFile) -> Self {
        let mut models = BTreeMap::new();
        for record in &scanned.models {
            *models.entry(record.model.clone()).or_insert(0) += 1;
        }
        Self {
            path: path.display().to_string(),
            size,
            models,
            pairs: scanned.pairs.len(),
            max_id: scanned.models.iter().map(|record| record.id).max(),
            unrecognized: scanned.unrecognized,
            malformed: scanned.malformed.len(),
        }
    }

    /// Returns the total number of records.
    pub fn records(&self) -> usize {
        self.models.values().sum::<usize>() + self.pairs + self.unrecognized + self.malformed
    }
}

/// Runs the inspect command.
pub fn run(files: &[PathBuf], format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut results = Vec::with_capacity(files.len());
    for path in files {
        results.push(inspect(path)?);
    }

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        _ => {
            for result in &results {
                print_text_output(result);
            }
        }
    }

    Ok(())
}

/// Inspects a single store file.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let size = std::fs::metadata(path)
        .map_err(|e| format!("No store file at {}: {}", path.display(), e))?
        .len();
    let scanned = scan(path)?;
    Ok(InspectResult::new(path, size, &scanned))
}

fn print_text_output(result: &InspectResult) {
    println!("{}", result.path);
    println!("  Size:    {} bytes", result.size);
    println!("  Records: {}", result.records());
    if !result.models.is_empty() {
        println!("  Models:");
        for (model, count) in &result.models {
            println!("    {:<20} {}", model, count);
        }
    }
    if let Some(max_id) = result.max_id {
        println!("  Max id:  {}", max_id);
    }
    if result.pairs > 0 {
        println!("  Pairs:   {}", result.pairs);
    }
    if result.unrecognized > 0 {
        println!("  Unrecognized: {}", result.unrecognized);
    }
    if result.malformed > 0 {
        println!("  Malformed:    {}", result.malformed);
    }
    println!();
}
