//! JSON record persistence.
//!
//! Stores export one JSON object per record. The reader is tolerant: a
//! record may span several lines, and a record that fails to parse is
//! reported as [`Record::Malformed`] and skipped rather than aborting the
//! import.

use crate::error::StoreResult;
use crate::lock::Lockable;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::marker::PhantomData;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::info;

/// An exported model instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    /// The instance id.
    pub id: u64,
    /// The model type name.
    pub model: String,
    /// Field values keyed by field name.
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// An exported relation pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationRecord {
    /// Id of the A-side instance.
    #[serde(rename = "A")]
    pub a: u64,
    /// Id of the B-side instance.
    #[serde(rename = "B")]
    pub b: u64,
}

/// Outcome of an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    /// Records added to the store.
    pub imported: usize,
    /// Records skipped because they could not be parsed or resolved.
    pub skipped: usize,
}

/// A store that can be saved to and loaded from a JSON record file.
pub trait Persistent: Lockable + Send + Sync {
    /// Returns the store name, used as the file stem.
    fn name(&self) -> &str;

    /// Writes every record to `path`, returning the number written.
    fn export_json(&self, path: &Path) -> StoreResult<usize>;

    /// Adds the records in `path` to the store.
    fn import_json(&self, path: &Path) -> StoreResult<ImportStats>;
}

/// One item produced by a [`RecordReader`].
#[derive(Debug)]
pub enum Record<T> {
    /// A well-formed record.
    Parsed(T),
    /// A record that could not be parsed.
    Malformed {
        /// Line on which the record ended.
        line: usize,
        /// Parser message.
        message: String,
    },
}

/// Reads JSON records, one or more lines each.
///
/// Lines are accumulated until they parse as a complete JSON value. Input
/// that can never become valid, or a blank line after an incomplete value,
/// yields [`Record::Malformed`] and reading resumes with the next line.
pub struct RecordReader<R, T> {
    lines: std::io::Lines<R>,
    buffer: String,
    line: usize,
    _record: PhantomData<fn() -> T>,
}

impl<R: BufRead, T: DeserializeOwned> RecordReader<R, T> {
    /// Creates a reader over `input`.
    pub fn new(input: R) -> Self {
        Self {
            lines: input.lines(),
            buffer: String::new(),
            line: 0,
            _record: PhantomData,
        }
    }

    fn finish(&mut self) -> Record<T> {
        let text = std::mem::take(&mut self.buffer);
        match serde_json::from_str::<T>(&text) {
            Ok(record) => Record::Parsed(record),
            Err(err) => Record::Malformed {
                line: self.line,
                message: err.to_string(),
            },
        }
    }
}

impl<R: BufRead, T: DeserializeOwned> Iterator for RecordReader<R, T> {
    type Item = StoreResult<Record<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some(line) = self.lines.next() else {
                if self.buffer.trim().is_empty() {
                    return None;
                }
                return Some(Ok(self.finish()));
            };
            let line = match line {
                Ok(line) => line,
                Err(err) => return Some(Err(err.into())),
            };
            self.line += 1;

            if line.trim().is_empty() {
                if self.buffer.trim().is_empty() {
                    continue;
                }
                return Some(Ok(self.finish()));
            }

            self.buffer.push_str(&line);
            self.buffer.push('\n');
            match serde_json::from_str::<serde_json::Value>(&self.buffer) {
                Ok(_) => return Some(Ok(self.finish())),
                Err(err) if err.is_eof() => continue,
                Err(err) => {
                    self.buffer.clear();
                    return Some(Ok(Record::Malformed {
                        line: self.line,
                        message: err.to_string(),
                    }));
                }
            }
        }
    }
}

/// Writes one record as a single line.
pub fn write_record<W: Write, T: Serialize>(output: &mut W, record: &T) -> StoreResult<()> {
    serde_json::to_writer(&mut *output, record)?;
    output.write_all(b"\n")?;
    Ok(())
}

/// Rate-limited progress logging for long exports and imports.
pub(crate) struct Progress<'a> {
    store: &'a str,
    action: &'static str,
    total: Option<usize>,
    interval: Duration,
    last: Instant,
}

impl<'a> Progress<'a> {
    pub(crate) fn new(
        store: &'a str,
        action: &'static str,
        total: Option<usize>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            action,
            total,
            interval,
            last: Instant::now(),
        }
    }

    pub(crate) fn tick(&mut self, done: usize) {
        if self.last.elapsed() < self.interval {
            return;
        }
        self.last = Instant::now();
        match self.total {
            Some(total) if total > 0 => {
                info!("{} {}: {}/{} ({}%)", self.action, self.store, done, total, done * 100 / total);
            }
            _ => info!("{} {}: {} records", self.action, self.store, done),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read_all(input: &str) -> Vec<Record<ModelRecord>> {
        RecordReader::new(Cursor::new(input))
            .collect::<StoreResult<Vec<_>>>()
            .unwrap()
    }

    fn parsed_ids(records: &[Record<ModelRecord>]) -> Vec<u64> {
        records
            .iter()
            .filter_map(|record| match record {
                Record::Parsed(record) => Some(record.id),
                Record::Malformed { .. } => None,
            })
            .collect()
    }

    #[test]
    fn single_line_records() {
        let input = concat!(
            r#"{"id":1,"model":"person","fields":{"name":"bob"}}"#,
            "\n",
            r#"{"id":2,"model":"person","fields":{}}"#,
            "\n"
        );
        let records = read_all(input);
        assert_eq!(parsed_ids(&records), vec![1, 2]);
    }

    #[test]
    fn multi_line_records() {
        let input = "{\n  \"id\": 3,\n  \"model\": \"person\",\n  \"fields\": {}\n}\n\n{\"id\":4,\"model\":\"person\",\"fields\":{}}\n";
        let records = read_all(input);
        assert_eq!(parsed_ids(&records), vec![3, 4]);
    }

    #[test]
    fn garbage_is_skipped() {
        let input = concat!(
            "this is not json\n",
            r#"{"id":5,"model":"person","fields":{}}"#,
            "\n",
            r#"{"id":"six","model":"person","fields":{}}"#,
            "\n",
            "{\"id\": 7,\n",
            "\n",
            r#"{"id":8,"model":"person","fields":{}}"#,
            "\n"
        );
        let records = read_all(input);
        assert_eq!(parsed_ids(&records), vec![5, 8]);
        assert_eq!(records.len(), 4);
    }

    #[test]
    fn truncated_tail_is_malformed() {
        let records = read_all("{\"id\": 9, \"model\"");
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], Record::Malformed { line: 1, .. }));
    }

    #[test]
    fn relation_record_uses_upper_case_keys() {
        let json = serde_json::to_string(&RelationRecord { a: 1, b: 2 }).unwrap();
        assert_eq!(json, r#"{"A":1,"B":2}"#);
    }

    #[test]
    fn write_record_appends_newline() {
        let mut out = Vec::new();
        write_record(&mut out, &RelationRecord { a: 3, b: 4 }).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{\"A\":3,\"B\":4}\n");
    }
}
