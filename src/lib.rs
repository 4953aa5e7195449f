//! # Inventory Melt - cloud resource inventory toolkit
//!
//! Turns nested resource records from an inventory query into flat,
//! per-resource-type sheets, and carries the small runbook helpers that sit
//! around that report.
//!
//! ## Modules
//!
//! - **melt**: flatten nested records and group them into labelled sheets
//! - **lifecycle**: start/stop a database server and wait for the target state
//! - **snapshot**: plan full-copy snapshots for the disks of a VM
//! - **report**: build the notification that carries the report
//! - **config**: explicit TOML configuration for all of the above
//!
//! ## Quick Start
//!
//! ```rust
//! use inventory_melt::{melt_records, FlattenConfig};
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let records = vec![
//!     json!({"name": "d0", "type": "Microsoft.Compute/disks", "sku": {"name": "Premium_LRS"}}),
//!     json!({"name": "d1", "type": "Microsoft.Storage/disks"}),
//! ];
//!
//! let outcome = melt_records(&records, &FlattenConfig::default())?;
//!
//! // Both types end with "disks", so they share one sheet
//! assert_eq!(outcome.sheets.labels().collect::<Vec<_>>(), vec!["disks"]);
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use serde_json::Value;

pub mod config;
pub mod lifecycle;
pub mod melt;
pub mod report;
pub mod snapshot;

// Re-export commonly used types for convenience
pub use config::InventoryConfig;
pub use melt::{FlatRecord, FlattenConfig, FlattenError, Flattener, GroupedRecords, Sheets};

/// Counts and sheets produced by one melt run
#[derive(Debug, Default)]
pub struct MeltOutcome {
    pub sheets: Sheets,
    pub read: usize,
    pub flattened: usize,
    /// Records that could not be flattened
    pub malformed: usize,
    /// Records without a `type` field
    pub untyped: usize,
}

/// Main entry point: flatten a batch of records and group them into sheets
pub fn melt_records(records: &[Value], config: &FlattenConfig) -> Result<MeltOutcome> {
    let flattener = Flattener::new(config.clone()).context("Invalid flatten config")?;
    let batch = flattener.flatten_all(records);
    let flattened = batch.records.len();

    let grouped = GroupedRecords::from_records(batch.records);
    let untyped = grouped.skipped();

    Ok(MeltOutcome {
        sheets: grouped.into_sheets(),
        read: records.len(),
        flattened,
        malformed: batch.skipped,
        untyped,
    })
}

/// Parse inventory input into records
///
/// Accepts a JSON array of records, a single record, a query response with a
/// `data` array, or newline-delimited JSON.
pub fn parse_records(mut content: Vec<u8>, ndjson: bool) -> Result<Vec<Value>> {
    if !ndjson {
        // simd-json deserializes in place, so keep the original for the fallback
        let original = content.clone();
        match simd_json::serde::from_slice::<Value>(&mut content) {
            Ok(value) => return Ok(unwrap_document(value)),
            Err(err) => {
                tracing::debug!(error = %err, "simd-json rejected input, retrying with serde_json");
                content = original;
            }
        }

        match serde_json::from_slice::<Value>(&content) {
            Ok(value) => return Ok(unwrap_document(value)),
            // A complete first value followed by more input means several documents
            Err(_) if starts_with_complete_value(&content) => {
                tracing::debug!("input holds more than one JSON document, trying NDJSON");
            }
            Err(err) => return Err(err).context("Failed to parse JSON document"),
        }
    }

    let text = String::from_utf8(content).context("Input is not valid UTF-8")?;
    let mut records = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line)
            .context(format!("Failed to parse JSON on line {}", lineno + 1))?;
        records.push(value);
    }
    Ok(records)
}

fn starts_with_complete_value(content: &[u8]) -> bool {
    let mut stream = serde_json::Deserializer::from_slice(content).into_iter::<Value>();
    matches!(stream.next(), Some(Ok(_)))
}

fn unwrap_document(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(mut obj) if matches!(obj.get("data"), Some(Value::Array(_))) => {
            match obj.remove("data") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            }
        }
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_melt_records() {
        let records = vec![
            json!({"id": "1", "type": "Microsoft.Compute/disks", "properties": {"diskSizeGB": 32}}),
            json!({"id": "2", "type": "Microsoft.Storage/disks"}),
            json!({"id": "3"}),
            json!(42),
            json!({"id": "4", "type": "Microsoft.Network/virtualNetworks"}),
        ];

        let outcome = melt_records(&records, &FlattenConfig::default()).unwrap();
        assert_eq!(outcome.read, 5);
        assert_eq!(outcome.flattened, 4);
        assert_eq!(outcome.malformed, 1);
        assert_eq!(outcome.untyped, 1);
        assert_eq!(
            outcome.sheets.labels().collect::<Vec<_>>(),
            vec!["disks", "virtualNetworks"]
        );
        assert_eq!(
            outcome.sheets.get("disks").unwrap()[0].get("properties_diskSizeGB").unwrap(),
            32
        );
    }

    #[test]
    fn test_melt_empty_batch() {
        let outcome = melt_records(&[], &FlattenConfig::default()).unwrap();
        assert!(outcome.sheets.is_empty());
        assert_eq!(outcome.read, 0);
    }

    #[test]
    fn test_parse_array_and_object() {
        let records = parse_records(br#"[{"id": 1}, {"id": 2}]"#.to_vec(), false).unwrap();
        assert_eq!(records.len(), 2);

        let records = parse_records(br#"{"id": 1}"#.to_vec(), false).unwrap();
        assert_eq!(records, vec![json!({"id": 1})]);
    }

    #[test]
    fn test_parse_query_response() {
        let input = br#"{"totalRecords": 1, "count": 1, "data": [{"id": "x", "type": "t"}]}"#;
        let records = parse_records(input.to_vec(), false).unwrap();
        assert_eq!(records, vec![json!({"id": "x", "type": "t"})]);
    }

    #[test]
    fn test_parse_preserves_key_order() {
        let records = parse_records(br#"{"zeta": 1, "alpha": 2, "mid": 3}"#.to_vec(), false).unwrap();
        let keys: Vec<_> = records[0].as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_parse_ndjson() {
        let input = b"{\"id\": 1}\n\n{\"id\": 2}\n".to_vec();
        assert_eq!(parse_records(input.clone(), true).unwrap().len(), 2);
        // Falls back to NDJSON when the input is not one document
        assert_eq!(parse_records(input, false).unwrap().len(), 2);
    }

    #[test]
    fn test_parse_pretty_document_with_huge_integer() {
        let input = b"[\n {\"id\": \"a\", \"type\": \"t/x\", \"n\": 123456789012345678901234567890}\n]\n";
        let records = parse_records(input.to_vec(), false).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], "a");
        assert!(records[0]["n"].is_f64());
    }

    #[test]
    fn test_parse_malformed_document_points_at_error() {
        let err = parse_records(b"[\n {\"id\": 1},\n {\"id\": }\n]".to_vec(), false).unwrap_err();
        let message = format!("{:#}", err);

        assert!(message.starts_with("Failed to parse JSON document"));
        assert!(message.contains("line 3"));
    }

    #[test]
    fn test_parse_reports_bad_line() {
        let err = parse_records(b"{\"id\": 1}\n{oops\n".to_vec(), true).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
