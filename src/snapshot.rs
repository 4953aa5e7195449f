//! Snapshot planning for the disks attached to a virtual machine
//!
//! Disk and VM records are expected in flattened form, as produced by
//! [`crate::melt::Flattener`] over a resource graph projection.

use crate::melt::FlatRecord;
use chrono::{NaiveDateTime, Timelike};
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Flattened `properties.osType`; null on data disks
pub const OS_TYPE_FIELD: &str = "properties_osType";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot tags must be a JSON object of strings: {0}")]
    InvalidTags(String),

    #[error("no virtual machine named '{0}'")]
    VmNotFound(String),

    #[error("{count} virtual machines named '{name}'")]
    AmbiguousVm { name: String, count: usize },

    #[error("disk record is missing '{0}'")]
    MissingField(&'static str),

    #[error("no OS disk among {0} attached disks")]
    NoOsDisk(usize),

    #[error("more than one OS disk attached: '{first}' and '{second}'")]
    MultipleOsDisks { first: String, second: String },

    #[error("snapshot creation failed for disk '{disk}': {source}")]
    Client {
        disk: String,
        #[source]
        source: anyhow::Error,
    },
}

/// A managed disk attached to a VM
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Disk {
    pub id: String,
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub os_type: Option<String>,
}

impl Disk {
    pub fn from_record(record: &FlatRecord) -> Result<Self, SnapshotError> {
        Ok(Disk {
            id: required(record, "id")?,
            name: required(record, "name")?,
            resource_group: required(record, "resourceGroup")?,
            location: required(record, "location")?,
            os_type: record
                .get(OS_TYPE_FIELD)
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
    }
}

fn required(record: &FlatRecord, field: &'static str) -> Result<String, SnapshotError> {
    record
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or(SnapshotError::MissingField(field))
}

/// The disks of one VM, split by role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskSet {
    pub os_disk: Disk,
    pub data_disks: Vec<Disk>,
}

impl DiskSet {
    pub fn partition(records: &[FlatRecord]) -> Result<Self, SnapshotError> {
        let mut os_disk: Option<Disk> = None;
        let mut data_disks = Vec::new();

        for record in records {
            let disk = Disk::from_record(record)?;
            if disk.os_type.is_none() {
                data_disks.push(disk);
                continue;
            }
            if let Some(first) = &os_disk {
                return Err(SnapshotError::MultipleOsDisks {
                    first: first.name.clone(),
                    second: disk.name,
                });
            }
            os_disk = Some(disk);
        }

        let os_disk = os_disk.ok_or(SnapshotError::NoOsDisk(records.len()))?;
        Ok(DiskSet { os_disk, data_disks })
    }
}

/// Pick the single VM with the given name
pub fn select_vm<'a>(records: &'a [FlatRecord], name: &str) -> Result<&'a FlatRecord, SnapshotError> {
    let matches: Vec<&FlatRecord> = records
        .iter()
        .filter(|r| r.get("name").and_then(|v| v.as_str()) == Some(name))
        .collect();

    match matches.as_slice() {
        [vm] => Ok(*vm),
        [] => Err(SnapshotError::VmNotFound(name.to_string())),
        many => Err(SnapshotError::AmbiguousVm {
            name: name.to_string(),
            count: many.len(),
        }),
    }
}

pub fn parse_tags(raw: &str) -> Result<Map<String, Value>, SnapshotError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| SnapshotError::InvalidTags(e.to_string()))?;

    match value {
        Value::Object(tags) => {
            if let Some((key, _)) = tags.iter().find(|(_, v)| !v.is_string()) {
                return Err(SnapshotError::InvalidTags(format!("tag '{}' is not a string", key)));
            }
            Ok(tags)
        }
        other => Err(SnapshotError::InvalidTags(format!(
            "expected an object, found {}",
            crate::melt::types::value_kind(&other)
        ))),
    }
}

/// `{disk}_{date}_{hour}{minute}{second}`, time fields unpadded
pub fn snapshot_name(disk_name: &str, taken_at: NaiveDateTime) -> String {
    format!(
        "{}_{}_{}{}{}",
        disk_name,
        taken_at.date(),
        taken_at.hour(),
        taken_at.minute(),
        taken_at.second()
    )
}

/// A full-copy snapshot request for one disk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotRequest {
    pub resource_group: String,
    pub name: String,
    pub body: Value,
}

impl SnapshotRequest {
    pub fn for_disk(disk: &Disk, tags: &Map<String, Value>, taken_at: NaiveDateTime) -> Self {
        SnapshotRequest {
            resource_group: disk.resource_group.clone(),
            name: snapshot_name(&disk.name, taken_at),
            body: json!({
                "location": disk.location,
                "tags": tags,
                "creation_data": {
                    "create_option": "Copy",
                    "source_uri": disk.id,
                },
                "incremental": false,
            }),
        }
    }
}

/// Collaborator that creates snapshots through the compute API
pub trait SnapshotClient {
    /// Create the snapshot and wait for it, returning the created resource
    fn create(&mut self, request: &SnapshotRequest) -> anyhow::Result<Value>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotReport {
    pub os_snapshot: Value,
    pub data_snapshots: Vec<Value>,
}

/// Snapshot the OS disk, then every data disk in order
pub fn take_all<C: SnapshotClient>(
    client: &mut C,
    disks: &DiskSet,
    tags: &Map<String, Value>,
    taken_at: NaiveDateTime,
) -> Result<SnapshotReport, SnapshotError> {
    tracing::info!(disk = %disks.os_disk.name, "taking snapshot of OS disk");
    let os_snapshot = take_one(client, &disks.os_disk, tags, taken_at)?;

    tracing::info!(count = disks.data_disks.len(), "taking snapshots of data disks");
    let data_snapshots = disks
        .data_disks
        .iter()
        .map(|disk| take_one(client, disk, tags, taken_at))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SnapshotReport {
        os_snapshot,
        data_snapshots,
    })
}

fn take_one<C: SnapshotClient>(
    client: &mut C,
    disk: &Disk,
    tags: &Map<String, Value>,
    taken_at: NaiveDateTime,
) -> Result<Value, SnapshotError> {
    let request = SnapshotRequest::for_disk(disk, tags, taken_at);
    client.create(&request).map_err(|source| SnapshotError::Client {
        disk: disk.name.clone(),
        source,
    })
}
