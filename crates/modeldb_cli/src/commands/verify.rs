//! Verify command implementation.

use super::scan;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A relation store file together with the model store files it pairs.
#[derive(Debug, Clone)]
pub struct RelationFiles {
    /// The relation store file.
    pub pairs: PathBuf,
    /// The model store file of the A side.
    pub a: PathBuf,
    /// The model store file of the B side.
    pub b: PathBuf,
}

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of records checked.
    pub records_checked: usize,
    /// Number of valid records.
    pub valid_records: usize,
    /// Number of records that would be skipped or rejected on import.
    pub bad_records: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.bad_records == 0 && self.errors.is_empty()
    }

    fn bad(&mut self, error: String) {
        self.bad_records += 1;
        self.errors.push(error);
    }
}

/// Runs the verify command.
pub fn run(models: &[PathBuf], relation: Option<&RelationFiles>) -> Result<(), Box<dyn std::error::Error>> {
    let mut passed = true;

    for path in models {
        println!("Checking {}...", path.display());
        let result = verify_models(path)?;
        print_result(&result);
        passed &= result.is_ok();
    }

    if let Some(files) = relation {
        println!("Checking {}...", files.pairs.display());
        let result = verify_pairs(files)?;
        print_result(&result);
        passed &= result.is_ok();
    }

    println!();
    if passed {
        println!("✓ Verification passed");
        Ok(())
    } else {
        println!("✗ Verification failed");
        Err("Verification failed".into())
    }
}

/// Checks a model store file for malformed records and duplicate ids.
pub fn verify_models(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let scanned = scan(path)?;
    let mut result = VerifyResult::default();
    let mut seen = HashSet::new();

    for (line, message) in &scanned.malformed {
        result.records_checked += 1;
        result.bad(format!("Malformed record ending at line {}: {}", line, message));
    }
    if scanned.unrecognized > 0 || !scanned.pairs.is_empty() {
        let count = scanned.unrecognized + scanned.pairs.len();
        result.records_checked += count;
        result.bad_records += count;
        result
            .errors
            .push(format!("{} records are not model records", count));
    }
    for record in &scanned.models {
        result.records_checked += 1;
        if !seen.insert(record.id) {
            result.bad(format!("Duplicate id {}", record.id));
        } else {
            result.valid_records += 1;
        }
    }

    Ok(result)
}

/// Checks that every pair of a relation store file names existing instances.
pub fn verify_pairs(files: &RelationFiles) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let a_ids = ids_of(&files.a)?;
    let b_ids = ids_of(&files.b)?;
    let scanned = scan(&files.pairs)?;
    let mut result = VerifyResult::default();
    let mut seen = HashSet::new();

    for (line, message) in &scanned.malformed {
        result.records_checked += 1;
        result.bad(format!("Malformed pair ending at line {}: {}", line, message));
    }
    for pair in &scanned.pairs {
        result.records_checked += 1;
        if !a_ids.contains(&pair.a) {
            result.bad(format!("Pair ({}, {}) names unknown A id {}", pair.a, pair.b, pair.a));
        } else if !b_ids.contains(&pair.b) {
            result.bad(format!("Pair ({}, {}) names unknown B id {}", pair.a, pair.b, pair.b));
        } else if !seen.insert((pair.a, pair.b)) {
            // Duplicates collapse on import.
            result.errors.push(format!("Duplicate pair ({}, {})", pair.a, pair.b));
            result.valid_records += 1;
        } else {
            result.valid_records += 1;
        }
    }

    Ok(result)
}

fn ids_of(path: &Path) -> Result<HashSet<u64>, Box<dyn std::error::Error>> {
    Ok(scan(path)?.models.iter().map(|record| record.id).collect())
}

fn print_result(result: &VerifyResult) {
    println!("  Records checked: {}", result.records_checked);
    println!("  Valid records:   {}", result.valid_records);
    println!("  Bad records:     {}", result.bad_records);

    if !result.errors.is_empty() {
        println!("  Errors:");
        for error in result.errors.iter().take(10) {
            println!("    - {}", error);
        }
        if result.errors.len() > 10 {
            println!("    ... and {} more", result.errors.len() - 10);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_duplicate_ids() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "people.json",
            concat!(
                "{\"id\": 1, \"model\": \"person\", \"fields\": {}}\n",
                "{\"id\": 2, \"model\": \"person\", \"fields\": {}}\n",
                "{\"id\": 1, \"model\": \"person\", \"fields\": {}}\n",
            ),
        );

        let result = verify_models(&path).unwrap();
        assert_eq!(result.records_checked, 3);
        assert_eq!(result.valid_records, 2);
        assert_eq!(result.bad_records, 1);
        assert!(!result.is_ok());
    }

    #[test]
    fn test_pairs_resolve() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "people.json", "{\"id\": 1, \"model\": \"person\", \"fields\": {}}\n");
        let b = write(&dir, "groups.json", "{\"id\": 5, \"model\": \"group\", \"fields\": {}}\n");
        let pairs = write(
            &dir,
            "memberships.json",
            "{\"A\": 1, \"B\": 5}\n{\"A\": 2, \"B\": 5}\n{\"A\": 1, \"B\": 6}\n",
        );

        let result = verify_pairs(&RelationFiles { pairs, a, b }).unwrap();
        assert_eq!(result.records_checked, 3);
        assert_eq!(result.valid_records, 1);
        assert_eq!(result.bad_records, 2);
    }

    #[test]
    fn test_clean_files_pass() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "people.json", "{\"id\": 3, \"model\": \"person\", \"fields\": {}}\n");
        assert!(verify_models(&path).unwrap().is_ok());
    }
}
