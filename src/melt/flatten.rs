use crate::melt::types::{value_kind, FlatRecord, FlattenConfig, FlattenError};
use serde_json::{Map, Value};

/// Walks nested records and produces one flat record per input
///
/// Path keys are built by joining segments with the configured separator:
///
/// - a nested object extends the path with its key
/// - a non-empty array whose elements are all objects extends the path with
///   the element index; directly under the record root the key is dropped and
///   the path starts at the index
/// - anything else (scalars, null, empty or mixed arrays) is stored verbatim
///
/// When two paths produce the same key the later one in walk order wins.
#[derive(Debug, Clone)]
pub struct Flattener {
    config: FlattenConfig,
}

/// Result of flattening a batch of records
#[derive(Debug, Default)]
pub struct FlattenBatch {
    pub records: Vec<FlatRecord>,

    /// Records that failed to flatten and were left out
    pub skipped: usize,
}

impl Flattener {
    pub fn new(config: FlattenConfig) -> Result<Self, FlattenError> {
        if config.separator.is_empty() {
            return Err(FlattenError::InvalidSeparator);
        }
        Ok(Flattener { config })
    }

    pub fn config(&self) -> &FlattenConfig {
        &self.config
    }

    /// Flatten a single record
    pub fn flatten(&self, record: &Value) -> Result<FlatRecord, FlattenError> {
        let Value::Object(obj) = record else {
            return Err(FlattenError::Malformed {
                found: value_kind(record),
            });
        };

        let mut flat = Map::new();
        self.walk(obj, None, 0, &mut flat)?;
        Ok(flat)
    }

    /// Flatten every record, skipping the ones that fail
    pub fn flatten_all<'a, I>(&self, records: I) -> FlattenBatch
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let mut batch = FlattenBatch::default();
        for (idx, record) in records.into_iter().enumerate() {
            match self.flatten(record) {
                Ok(flat) => batch.records.push(flat),
                Err(err) => {
                    tracing::warn!(record = idx, error = %err, "skipping record");
                    batch.skipped += 1;
                }
            }
        }
        batch
    }

    fn walk(
        &self,
        obj: &Map<String, Value>,
        prefix: Option<&str>,
        depth: usize,
        flat: &mut FlatRecord,
    ) -> Result<(), FlattenError> {
        let sep = self.config.separator.as_str();

        for (key, value) in obj.iter() {
            let path = match prefix {
                Some(p) => format!("{}{}{}", p, sep, key),
                None => key.clone(),
            };

            match value {
                Value::Object(inner) => {
                    self.descend(inner, &path, depth, flat)?;
                }
                Value::Array(items) if is_record_list(items) => {
                    for (idx, item) in items.iter().enumerate() {
                        let item_path = match prefix {
                            Some(_) => format!("{}{}{}", path, sep, idx),
                            None => idx.to_string(),
                        };
                        if let Value::Object(inner) = item {
                            self.descend(inner, &item_path, depth, flat)?;
                        }
                    }
                }
                _ => {
                    flat.insert(path, value.clone());
                }
            }
        }

        Ok(())
    }

    fn descend(
        &self,
        obj: &Map<String, Value>,
        path: &str,
        depth: usize,
        flat: &mut FlatRecord,
    ) -> Result<(), FlattenError> {
        if depth >= self.config.max_depth {
            return Err(FlattenError::DepthExceeded {
                path: path.to_string(),
                max_depth: self.config.max_depth,
            });
        }
        self.walk(obj, Some(path), depth + 1, flat)
    }
}

impl Default for Flattener {
    fn default() -> Self {
        Flattener {
            config: FlattenConfig::default(),
        }
    }
}

/// Arrays are only expanded when non-empty and made entirely of objects
fn is_record_list(items: &[Value]) -> bool {
    !items.is_empty() && items.iter().all(Value::is_object)
}
