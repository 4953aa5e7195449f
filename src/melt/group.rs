//! Partition flat records by resource type and derive sheet labels
//!
//! Grouping is keyed on the full `type` string (e.g. `Microsoft.Compute/disks`).
//! Export uses the shorter label after the last `/`, so distinct types that share
//! a final segment are merged into one sheet.

use crate::melt::types::FlatRecord;
use serde_json::Value;
use std::collections::HashMap;

/// Field that decides which group a record belongs to
pub const DISCRIMINATOR: &str = "type";

/// Flat records grouped by their full type, in first-seen order
#[derive(Debug, Default, Clone)]
pub struct GroupedRecords {
    groups: Vec<(String, Vec<FlatRecord>)>,
    index: HashMap<String, usize>,
    skipped: usize,
}

/// Groups keyed by export label, ready for tabular output
#[derive(Debug, Default, Clone)]
pub struct Sheets {
    sheets: Vec<(String, Vec<FlatRecord>)>,
}

/// Field set on records listed per resource group
pub const RESOURCE_GROUP_FIELD: &str = "resource_group";

/// Tag a record with the resource group it was listed from
pub fn stamp_resource_group(record: &mut FlatRecord, resource_group: &str) {
    record.insert(
        RESOURCE_GROUP_FIELD.to_string(),
        Value::String(resource_group.to_string()),
    );
}

/// The last `/`-delimited segment of a type string
pub fn label_for(group_key: &str) -> &str {
    group_key.rsplit('/').next().unwrap_or(group_key)
}

impl GroupedRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group a batch of flat records by their `type` field
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = FlatRecord>,
    {
        let mut grouped = Self::new();
        for record in records {
            grouped.push(record);
        }
        grouped
    }

    /// Add one record; records without a string `type` are dropped
    pub fn push(&mut self, record: FlatRecord) {
        let Some(group_key) = record.get(DISCRIMINATOR).and_then(|t| t.as_str()) else {
            tracing::warn!(
                id = record.get("id").and_then(|v| v.as_str()).unwrap_or("<unknown>"),
                "resource without a type attribute, skipping"
            );
            self.skipped += 1;
            return;
        };
        let group_key = group_key.to_string();

        match self.index.get(&group_key) {
            Some(&pos) => self.groups[pos].1.push(record),
            None => {
                self.index.insert(group_key.clone(), self.groups.len());
                self.groups.push((group_key, vec![record]));
            }
        }
    }

    /// Full type strings in first-seen order
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(key, _)| key.as_str())
    }

    pub fn get(&self, group_key: &str) -> Option<&[FlatRecord]> {
        self.index
            .get(group_key)
            .map(|&pos| self.groups[pos].1.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[FlatRecord])> {
        self.groups
            .iter()
            .map(|(key, records)| (key.as_str(), records.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of records dropped for lacking a discriminator
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Re-key groups by label, concatenating groups whose labels collide
    pub fn into_sheets(self) -> Sheets {
        let mut sheets: Vec<(String, Vec<FlatRecord>)> = Vec::new();
        let mut owners: HashMap<String, (usize, String)> = HashMap::new();

        for (group_key, records) in self.groups {
            let label = label_for(&group_key).to_string();

            match owners.get(&label) {
                Some((pos, first_key)) => {
                    tracing::info!(
                        label = %label,
                        kept = %first_key,
                        merged = %group_key,
                        rows = records.len(),
                        "merging resource types sharing a sheet label"
                    );
                    sheets[*pos].1.extend(records);
                }
                None => {
                    owners.insert(label.clone(), (sheets.len(), group_key));
                    sheets.push((label, records));
                }
            }
        }

        Sheets { sheets }
    }
}

impl Sheets {
    /// Labels in first-seen order
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.sheets.iter().map(|(label, _)| label.as_str())
    }

    pub fn get(&self, label: &str) -> Option<&[FlatRecord]> {
        self.sheets
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, records)| records.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[FlatRecord])> {
        self.sheets
            .iter()
            .map(|(label, records)| (label.as_str(), records.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.sheets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }

    /// Total number of rows across all sheets
    pub fn row_count(&self) -> usize {
        self.sheets.iter().map(|(_, records)| records.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flat(value: Value) -> FlatRecord {
        match value {
            Value::Object(obj) => obj,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_label_for() {
        assert_eq!(label_for("Microsoft.Compute/disks"), "disks");
        assert_eq!(label_for("microsoft.network/networkinterfaces"), "networkinterfaces");
        assert_eq!(label_for("Microsoft.Sql/servers/databases"), "databases");
        assert_eq!(label_for("plain"), "plain");
        assert_eq!(label_for("trailing/"), "");
    }

    #[test]
    fn test_groups_in_first_seen_order() {
        let grouped = GroupedRecords::from_records(vec![
            flat(json!({"name": "vm1", "type": "Microsoft.Compute/virtualMachines"})),
            flat(json!({"name": "d0", "type": "Microsoft.Compute/disks"})),
            flat(json!({"name": "vm2", "type": "Microsoft.Compute/virtualMachines"})),
        ]);

        assert_eq!(
            grouped.types().collect::<Vec<_>>(),
            vec!["Microsoft.Compute/virtualMachines", "Microsoft.Compute/disks"]
        );
        let vms = grouped.get("Microsoft.Compute/virtualMachines").unwrap();
        assert_eq!(vms.len(), 2);
        assert_eq!(vms[0].get("name").unwrap(), "vm1");
        assert_eq!(vms[1].get("name").unwrap(), "vm2");
    }

    #[test]
    fn test_label_collision_merges() {
        let grouped = GroupedRecords::from_records(vec![
            flat(json!({"name": "a", "type": "Microsoft.Compute/disks"})),
            flat(json!({"name": "b", "type": "Microsoft.Storage/disks"})),
            flat(json!({"name": "c", "type": "Microsoft.Compute/disks"})),
        ]);
        assert_eq!(grouped.len(), 2);

        let sheets = grouped.into_sheets();
        assert_eq!(sheets.labels().collect::<Vec<_>>(), vec!["disks"]);

        let names: Vec<_> = sheets
            .get("disks")
            .unwrap()
            .iter()
            .map(|r| r.get("name").unwrap().as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a", "c", "b"]);
    }

    #[test]
    fn test_missing_type_is_skipped() {
        let grouped = GroupedRecords::from_records(vec![
            flat(json!({"name": "orphan"})),
            flat(json!({"name": "bad", "type": 7})),
            flat(json!({"name": "vnet", "type": "Microsoft.Network/virtualNetworks"})),
        ]);

        assert_eq!(grouped.skipped(), 2);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped.into_sheets().row_count(), 1);
    }

    #[test]
    fn test_stamp_resource_group_before_grouping() {
        let mut listed = Vec::new();
        for (rg, record) in [
            ("rg-web", json!({"name": "app", "type": "Microsoft.Web/sites"})),
            ("rg-data", json!({"name": "db", "type": "Microsoft.Web/sites", "resource_group": "stale"})),
        ] {
            let mut record = flat(record);
            stamp_resource_group(&mut record, rg);
            listed.push(record);
        }

        let grouped = GroupedRecords::from_records(listed);
        let sites = grouped.get("Microsoft.Web/sites").unwrap();
        assert_eq!(sites[0].get(RESOURCE_GROUP_FIELD).unwrap(), "rg-web");
        assert_eq!(sites[1].get(RESOURCE_GROUP_FIELD).unwrap(), "rg-data");
    }

    #[test]
    fn test_empty_input() {
        let grouped = GroupedRecords::from_records(Vec::new());
        assert!(grouped.is_empty());
        assert_eq!(grouped.skipped(), 0);
        assert!(grouped.into_sheets().is_empty());
    }
}
