use crate::melt::types::FlatRecord;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

/// Rectangular projection of flat records: one column per distinct key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    /// Columns are the union of keys in first-seen order; absent keys become null
    pub fn from_records(records: &[FlatRecord]) -> Self {
        let mut columns = Vec::new();
        let mut seen = HashSet::new();
        for record in records {
            for key in record.keys() {
                if seen.insert(key.as_str()) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|col| record.get(col).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Table { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
