// ABOUTME: Field Mapper - validates a sync target's field mapping against the live table schema
// ABOUTME: Produces the schema-ordered column layout used by every later sync step

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::store::ColumnInfo;
use super::transform::ValueTransform;
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteRecord;

/// Remote field holding the record identifier.
pub const ID_FIELD: &str = "Id";
/// Remote field holding the last modification timestamp.
pub const MODSTAMP_FIELD: &str = "SystemModstamp";

/// One (local column, remote field) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub local: String,
    pub remote: String,
}

impl FieldMapping {
    pub fn new(local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
        }
    }
}

/// Configuration of one sync run: which local table mirrors which remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    /// Local table, optionally schema-qualified (`crm.leads`)
    pub table: String,
    /// Remote object type (`Lead`, `Account`, `Invoice__c`, ...)
    pub object: String,
    pub fields: Vec<FieldMapping>,
}

impl SyncTarget {
    pub fn new<I, L, R>(table: impl Into<String>, object: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (L, R)>,
        L: Into<String>,
        R: Into<String>,
    {
        Self {
            table: table.into(),
            object: object.into(),
            fields: fields
                .into_iter()
                .map(|(local, remote)| FieldMapping::new(local, remote))
                .collect(),
        }
    }
}

/// A validated column: where its value comes from and how it is converted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedColumn {
    pub local: String,
    pub remote: String,
    pub type_tag: String,
    pub transform: ValueTransform,
}

/// Schema-ordered result of validating a [`SyncTarget`] against the live table.
///
/// Column order matches the table declaration, which the positional bulk-load path
/// relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLayout {
    pub table: String,
    pub object: String,
    pub columns: Vec<MappedColumn>,
    /// Local column mapped to the remote identifier
    pub id_column: String,
    /// Local column mapped to the remote modification timestamp
    pub modstamp_column: String,
}

impl ColumnLayout {
    pub fn local_columns(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.local.as_str()).collect()
    }

    pub fn remote_fields(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.remote.as_str()).collect()
    }

    /// Convert a remote record into a row in column order.
    ///
    /// Fields missing from the record are written as NULL. Lookup falls back to a
    /// case-insensitive match because the remote API echoes its canonical casing.
    pub fn transform_record(&self, record: &RemoteRecord) -> Vec<Value> {
        self.columns
            .iter()
            .map(|col| {
                let raw = lookup_field(record, &col.remote)
                    .cloned()
                    .unwrap_or(Value::Null);
                col.transform.apply(raw)
            })
            .collect()
    }
}

fn lookup_field<'r>(record: &'r RemoteRecord, field: &str) -> Option<&'r Value> {
    record.get(field).or_else(|| {
        record
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(field))
            .map(|(_, value)| value)
    })
}

/// Validate `target` against the live `schema` and build its column layout.
///
/// Fails with [`SyncError::Config`] when:
/// - the identifier or modstamp remote field is not mapped (or mapped twice)
/// - a remote field appears more than once
/// - a schema column has no mapping, or more than one
/// - a mapped local column does not exist in the schema
pub fn build_layout(target: &SyncTarget, schema: &[ColumnInfo]) -> SyncResult<ColumnLayout> {
    let id_column = required_local_column(target, ID_FIELD)?;
    let modstamp_column = required_local_column(target, MODSTAMP_FIELD)?;

    for (i, mapping) in target.fields.iter().enumerate() {
        if target.fields[..i]
            .iter()
            .any(|earlier| earlier.remote.eq_ignore_ascii_case(&mapping.remote))
        {
            return Err(SyncError::config(format!(
                "Remote field '{}' is mapped more than once for table '{}'",
                mapping.remote, target.table
            )));
        }
    }

    let mut columns = Vec::with_capacity(schema.len());
    for column in schema {
        let matching: Vec<&FieldMapping> = target
            .fields
            .iter()
            .filter(|m| m.local == column.name)
            .collect();
        match matching.as_slice() {
            [mapping] => columns.push(MappedColumn {
                local: column.name.clone(),
                remote: mapping.remote.clone(),
                type_tag: column.type_tag.clone(),
                transform: ValueTransform::for_type(&column.type_tag),
            }),
            [] => {
                return Err(SyncError::config(format!(
                    "Couldn't find a mapping for local column '{}' of table '{}'",
                    column.name, target.table
                )))
            }
            _ => {
                return Err(SyncError::config(format!(
                    "Local column '{}' of table '{}' is mapped {} times",
                    column.name,
                    target.table,
                    matching.len()
                )))
            }
        }
    }

    for mapping in &target.fields {
        if !schema.iter().any(|c| c.name == mapping.local) {
            return Err(SyncError::config(format!(
                "Field to be synced '{}' doesn't exist in table '{}'",
                mapping.local, target.table
            )));
        }
    }

    Ok(ColumnLayout {
        table: target.table.clone(),
        object: target.object.clone(),
        columns,
        id_column,
        modstamp_column,
    })
}

fn required_local_column(target: &SyncTarget, remote_field: &str) -> SyncResult<String> {
    let mut matching = target
        .fields
        .iter()
        .filter(|m| m.remote.eq_ignore_ascii_case(remote_field));
    match (matching.next(), matching.next()) {
        (Some(mapping), None) => Ok(mapping.local.clone()),
        (None, _) => Err(SyncError::config(format!(
            "Couldn't find local column synced to remote field '{}' for table '{}'",
            remote_field, target.table
        ))),
        (Some(_), Some(_)) => Err(SyncError::config(format!(
            "Remote field '{}' is mapped more than once for table '{}'",
            remote_field, target.table
        ))),
    }
}
