//! CLI command implementations.

pub mod inspect;
pub mod verify;

use modeldb_core::store::{Record, RecordReader};
use modeldb_core::{ModelRecord, RelationRecord};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

/// The records of one exported store file, sorted by kind.
#[derive(Debug, Default)]
pub struct ScannedFile {
    /// Model instance records.
    pub models: Vec<ModelRecord>,
    /// Relation pair records.
    pub pairs: Vec<RelationRecord>,
    /// Well-formed JSON that is neither kind of record.
    pub unrecognized: usize,
    /// Line and message of every record that failed to parse.
    pub malformed: Vec<(usize, String)>,
}

/// Reads every record of `path`.
pub fn scan(path: &Path) -> Result<ScannedFile, Box<dyn std::error::Error>> {
    let file = File::open(path).map_err(|e| format!("Cannot open {}: {}", path.display(), e))?;
    let mut scanned = ScannedFile::default();

    for record in RecordReader::<_, serde_json::Value>::new(BufReader::new(file)) {
        match record? {
            Record::Parsed(value) => classify(&mut scanned, value),
            Record::Malformed { line, message } => {
                debug!("{}:{}: {}", path.display(), line, message);
                scanned.malformed.push((line, message));
            }
        }
    }

    Ok(scanned)
}

fn classify(scanned: &mut ScannedFile, value: serde_json::Value) {
    if value.get("model").is_some() {
        if let Ok(record) = serde_json::from_value::<ModelRecord>(value) {
            scanned.models.push(record);
            return;
        }
    } else if let Ok(pair) = serde_json::from_value::<RelationRecord>(value) {
        scanned.pairs.push(pair);
        return;
    }
    scanned.unrecognized += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_sorts_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mixed.json");
        fs::write(
            &path,
            concat!(
                "{\"id\": 1, \"model\": \"person\", \"fields\": {\"name\": \"ann\"}}\n",
                "{\"A\": 1, \"B\": 2}\n",
                "{\"id\": 2, \"model\": \"person\"}\n",
                "not json\n",
            ),
        )
        .unwrap();

        let scanned = scan(&path).unwrap();
        assert_eq!(scanned.models.len(), 1);
        assert_eq!(scanned.pairs, vec![RelationRecord { a: 1, b: 2 }]);
        assert_eq!(scanned.unrecognized, 1);
        assert_eq!(scanned.malformed.len(), 1);
    }

    #[test]
    fn test_scan_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(scan(&dir.path().join("absent.json")).is_err());
    }
}
