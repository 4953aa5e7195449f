//! Inventory melting - flatten nested resource records and group them into sheets
//!
//! Each resource record coming out of an inventory query is flattened into a
//! single-level mapping, then records are grouped by resource type and keyed
//! by a short label suitable for a worksheet name.

pub mod types;
pub mod flatten;
pub mod group;
pub mod table;
pub mod writer;

pub use types::{FlatRecord, FlattenConfig, FlattenError};
pub use flatten::{FlattenBatch, Flattener};
pub use group::{label_for, stamp_resource_group, GroupedRecords, Sheets, DISCRIMINATOR, RESOURCE_GROUP_FIELD};
pub use table::Table;
pub use writer::{sanitize_sheet_name, SheetWriter, StreamWriter};
