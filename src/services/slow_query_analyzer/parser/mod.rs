//! Profile dump parser
//!
//! Reads profiler output (NDJSON or a JSON array) and decodes each document
//! into a `QueryRecord`. Undecodable documents are counted, not fatal.

pub mod error;
pub mod profile_document;

pub use error::{ParseError, ParseResult};
pub use profile_document::ProfileDocumentDecoder;

use serde_json::Value;
use std::io::BufRead;

use crate::config::InputFormat;
use crate::services::slow_query_analyzer::models::QueryRecord;

/// Decoded input plus the number of documents that could not be decoded
#[derive(Debug, Default)]
pub struct ProfileBatch {
    pub records: Vec<QueryRecord>,
    pub malformed: u64,
}

impl ProfileBatch {
    fn push(&mut self, decoded: ParseResult<QueryRecord>, position: usize) {
        match decoded {
            Ok(record) => self.records.push(record),
            Err(e) => {
                tracing::debug!("Skipping profile document #{}: {}", position, e);
                self.malformed += 1;
            },
        }
    }
}

pub struct ProfileReader {
    decoder: ProfileDocumentDecoder,
}

impl ProfileReader {
    pub fn new(decoder: ProfileDocumentDecoder) -> Self {
        Self { decoder }
    }

    /// Read a whole dump
    ///
    /// Fails only on I/O errors or, for `JsonArray`, when the array itself
    /// is not valid JSON.
    pub fn read<R: BufRead>(&self, reader: R, format: InputFormat) -> ParseResult<ProfileBatch> {
        match format {
            InputFormat::Ndjson => self.read_ndjson(reader),
            InputFormat::JsonArray => self.read_json_array(reader),
        }
    }

    fn read_ndjson<R: BufRead>(&self, reader: R) -> ParseResult<ProfileBatch> {
        let mut batch = ProfileBatch::default();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let decoded = serde_json::from_str::<Value>(&line)
                .map_err(ParseError::from)
                .and_then(|doc| self.decoder.decode(&doc));
            batch.push(decoded, idx + 1);
        }
        Ok(batch)
    }

    fn read_json_array<R: BufRead>(&self, reader: R) -> ParseResult<ProfileBatch> {
        let docs: Vec<Value> = serde_json::from_reader(reader)?;
        let mut batch = ProfileBatch::default();
        for (idx, doc) in docs.iter().enumerate() {
            batch.push(self.decoder.decode(doc), idx + 1);
        }
        Ok(batch)
    }
}

impl Default for ProfileReader {
    fn default() -> Self {
        Self::new(ProfileDocumentDecoder::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ndjson_skips_blank_and_counts_bad_lines() {
        let input = r#"{"ns": "db.books", "millis": 10, "command": {"filter": {"a": 1}}}

not json
{"ns": "db.books", "millis": 12}
{"millis": 3}
"#;
        let batch = ProfileReader::default().read(input.as_bytes(), InputFormat::Ndjson).unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.malformed, 2);
    }

    #[test]
    fn test_json_array() {
        let input = r#"[
            {"ns": "db.books", "millis": 10},
            {"ns": "db.users", "millis": 20},
            42
        ]"#;
        let batch =
            ProfileReader::default().read(input.as_bytes(), InputFormat::JsonArray).unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.malformed, 1);
        assert_eq!(batch.records[1].namespace, "db.users");
    }

    #[test]
    fn test_invalid_json_array_is_fatal() {
        let result = ProfileReader::default().read("[{".as_bytes(), InputFormat::JsonArray);
        assert!(matches!(result, Err(ParseError::Json(_))));
    }
}
