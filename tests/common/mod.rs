// ABOUTME: In-memory RemoteQuery and LocalStore used by the integration tests
// ABOUTME: The remote evaluates modstamp filters; the store parses CSV like COPY would

#![allow(dead_code)]

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use sfdc_replicator::remote::{QueryPage, RemoteQuery, RemoteRecord};
use sfdc_replicator::sync::upsert::sql_text;
use sfdc_replicator::sync::{
    BulkLoad, ColumnInfo, LocalStore, SyncOptions, SyncReport, SyncTarget, Synchronizer,
    UpsertStatement,
};
use sfdc_replicator::error::SyncResult;

pub const TABLE: &str = "leads";
pub const OBJECT: &str = "Lead";

/// `leads (id varchar, email text, revenue numeric, systemmodstamp timestamptz)`
pub fn lead_schema() -> Vec<ColumnInfo> {
    vec![
        ColumnInfo::new("id", "varchar"),
        ColumnInfo::new("email", "text"),
        ColumnInfo::new("revenue", "numeric"),
        ColumnInfo::new("systemmodstamp", "timestamptz"),
    ]
}

pub fn lead_target() -> SyncTarget {
    SyncTarget::new(
        TABLE,
        OBJECT,
        [
            ("id", "Id"),
            ("email", "Email"),
            ("revenue", "AnnualRevenue"),
            ("systemmodstamp", "SystemModstamp"),
        ],
    )
}

/// Midnight UTC on 2024-01-`day`.
pub fn day(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
}

/// A record as the REST API returns it.
pub fn lead(id: &str, email: &str, modstamp: DateTime<Utc>) -> RemoteRecord {
    let value = json!({
        "attributes": {"type": "Lead", "url": format!("/services/data/v59.0/sobjects/Lead/{}", id)},
        "Id": id,
        "Email": email,
        "AnnualRevenue": 1_000_000,
        "SystemModstamp": modstamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    });
    match value {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

fn record_modstamp(record: &RemoteRecord) -> Option<DateTime<Utc>> {
    record
        .get("SystemModstamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|ts| ts.with_timezone(&Utc))
}

/// Remote org holding one object's records.
///
/// `query` understands `... WHERE SystemModstamp <op> <datetime>`; the bulk export
/// returns datetimes as epoch milliseconds.
pub struct MemoryRemote {
    records: Mutex<Vec<RemoteRecord>>,
    page_size: usize,
    cursor: Mutex<Vec<RemoteRecord>>,
    /// Reported by `count` instead of the real number of records
    pub count_override: Mutex<Option<i64>>,
    pub queries: Mutex<Vec<String>>,
    pub query_calls: AtomicUsize,
    pub query_more_calls: AtomicUsize,
    pub bulk_calls: AtomicUsize,
    pub count_calls: AtomicUsize,
}

impl MemoryRemote {
    pub fn new(records: Vec<RemoteRecord>, page_size: usize) -> Self {
        Self {
            records: Mutex::new(records),
            page_size: page_size.max(1),
            cursor: Mutex::new(Vec::new()),
            count_override: Mutex::new(None),
            queries: Mutex::new(Vec::new()),
            query_calls: AtomicUsize::new(0),
            query_more_calls: AtomicUsize::new(0),
            bulk_calls: AtomicUsize::new(0),
            count_calls: AtomicUsize::new(0),
        }
    }

    /// Insert or replace a record by `Id`.
    pub fn put(&self, record: RemoteRecord) {
        let mut records = self.records.lock().unwrap();
        let id = record.get("Id").cloned();
        records.retain(|r| r.get("Id") != id.as_ref());
        records.push(record);
    }

    pub fn total_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
            + self.query_more_calls.load(Ordering::SeqCst)
            + self.bulk_calls.load(Ordering::SeqCst)
            + self.count_calls.load(Ordering::SeqCst)
    }

    fn matching(&self, soql: &str) -> Result<Vec<RemoteRecord>> {
        let mut records = self.records.lock().unwrap().clone();
        records.sort_by_key(record_modstamp);

        let filter = match soql.split_once(" WHERE ") {
            Some((_, filter)) => filter,
            None => return Ok(records),
        };

        let parts: Vec<&str> = filter.split_whitespace().collect();
        if parts.len() != 3 || parts[0] != "SystemModstamp" {
            bail!("Unsupported filter: {}", filter);
        }
        let bound = DateTime::parse_from_rfc3339(parts[2])
            .with_context(|| format!("Bad datetime literal {}", parts[2]))?
            .with_timezone(&Utc);

        Ok(records
            .into_iter()
            .filter(|r| match (record_modstamp(r), parts[1]) {
                (Some(ts), ">") => ts > bound,
                (Some(ts), ">=") => ts >= bound,
                _ => false,
            })
            .collect())
    }

    fn page_at(&self, offset: usize) -> QueryPage {
        let cursor = self.cursor.lock().unwrap();
        let end = (offset + self.page_size).min(cursor.len());
        let done = end >= cursor.len();
        QueryPage {
            total_size: cursor.len() as i64,
            done,
            next_records_url: if done {
                None
            } else {
                Some(format!("/services/data/v59.0/query/01gFAKE-{}", end))
            },
            records: cursor[offset.min(end)..end].to_vec(),
        }
    }
}

#[async_trait]
impl RemoteQuery for MemoryRemote {
    async fn query(&self, soql: &str) -> Result<QueryPage> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(soql.to_string());
        let matching = self.matching(soql)?;
        *self.cursor.lock().unwrap() = matching;
        Ok(self.page_at(0))
    }

    async fn query_more(&self, next_records_url: &str) -> Result<QueryPage> {
        self.query_more_calls.fetch_add(1, Ordering::SeqCst);
        let offset = next_records_url
            .rsplit('-')
            .next()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| anyhow!("Unknown cursor {}", next_records_url))?;
        Ok(self.page_at(offset))
    }

    async fn bulk_query(&self, _object: &str, soql: &str) -> Result<Vec<RemoteRecord>> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(soql.to_string());
        let records = self.matching(soql)?;
        Ok(records
            .into_iter()
            .map(|mut record| {
                record.remove("attributes");
                if let Some(ts) = record_modstamp(&record) {
                    record.insert("SystemModstamp".to_string(), json!(ts.timestamp_millis()));
                }
                record
            })
            .collect())
    }

    async fn count(&self, _object: &str) -> Result<i64> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(count) = *self.count_override.lock().unwrap() {
            return Ok(count);
        }
        Ok(self.records.lock().unwrap().len() as i64)
    }
}

/// One local table. Values are kept in their textual form, keyed by the key column.
pub struct MemoryStore {
    pub table: String,
    pub schema: Vec<ColumnInfo>,
    pub rows: BTreeMap<String, Vec<Option<String>>>,
    /// Fail the upsert with this zero-based index
    pub fail_upsert_at: Option<usize>,
    pub fail_replace: bool,
    pub upsert_calls: usize,
    pub replace_calls: usize,
}

impl MemoryStore {
    pub fn new(table: &str, schema: Vec<ColumnInfo>) -> Self {
        Self {
            table: table.to_string(),
            schema,
            rows: BTreeMap::new(),
            fail_upsert_at: None,
            fail_replace: false,
            upsert_calls: 0,
            replace_calls: 0,
        }
    }

    pub fn leads() -> Self {
        Self::new(TABLE, lead_schema())
    }

    fn column_index(&self, column: &str) -> Result<usize> {
        self.schema
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| anyhow!("column \"{}\" does not exist", column))
    }

    fn check_table(&self, table: &str) -> Result<()> {
        if table != self.table {
            bail!("relation \"{}\" does not exist", table);
        }
        Ok(())
    }

    /// Value of `column` in the row keyed `id`.
    pub fn value(&self, id: &str, column: &str) -> Option<String> {
        let index = self.column_index(column).ok()?;
        self.rows.get(id).and_then(|row| row[index].clone())
    }

    pub fn insert(&mut self, values: &[Option<&str>]) {
        let row: Vec<Option<String>> = values.iter().map(|v| v.map(str::to_string)).collect();
        let id = row[0].clone().unwrap_or_default();
        self.rows.insert(id, row);
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn table_schema(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        if table != self.table {
            return Ok(Vec::new());
        }
        Ok(self.schema.clone())
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        self.check_table(table)?;
        Ok(self.rows.len() as i64)
    }

    async fn max_timestamp(&self, table: &str, column: &str) -> Result<Option<DateTime<Utc>>> {
        self.check_table(table)?;
        let index = self.column_index(column)?;
        Ok(self
            .rows
            .values()
            .filter_map(|row| row[index].as_deref().and_then(parse_timestamp))
            .max())
    }

    async fn upsert_row(&mut self, statement: &UpsertStatement, row: &[Value]) -> Result<u64> {
        self.check_table(&statement.table)?;
        let call = self.upsert_calls;
        self.upsert_calls += 1;
        if self.fail_upsert_at == Some(call) {
            bail!("value too long for type character varying(80)");
        }

        let mut stored = vec![None; self.schema.len()];
        let mut key = None;
        for ((column, _), value) in statement.columns.iter().zip(row) {
            let index = self.column_index(column)?;
            stored[index] = sql_text(value);
            if *column == statement.key_column {
                key = stored[index].clone();
            }
        }
        let key = key.ok_or_else(|| anyhow!("null value in key column"))?;
        self.rows.insert(key, stored);
        Ok(1)
    }

    async fn replace_all(&mut self, load: &BulkLoad, payload: Vec<Bytes>) -> Result<u64> {
        self.check_table(&load.table)?;
        self.replace_calls += 1;
        if self.fail_replace {
            bail!("could not extend file: No space left on device");
        }

        let data: Vec<u8> = payload.iter().flat_map(|chunk| chunk.to_vec()).collect();
        let text = String::from_utf8(data)?;
        let mut records = parse_copy_csv(&text)?.into_iter();

        let headers: Vec<String> = records
            .next()
            .ok_or_else(|| anyhow!("missing CSV header"))?
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect();
        if headers != load.columns {
            bail!("CSV header {:?} does not match {:?}", headers, load.columns);
        }

        let key_index = 0;
        let mut loaded = BTreeMap::new();
        for record in records {
            let mut stored = vec![None; self.schema.len()];
            for (column, field) in load.columns.iter().zip(record) {
                let index = self.column_index(column)?;
                stored[index] = field;
            }
            let key = stored[key_index]
                .clone()
                .ok_or_else(|| anyhow!("null value in key column"))?;
            // A key too long for the column fails the whole load, like COPY does.
            if key.len() > 18 {
                bail!("value too long for type character varying(18)");
            }
            loaded.insert(key, stored);
        }

        let count = loaded.len() as u64;
        self.rows = loaded;
        Ok(count)
    }
}

/// Split CSV the way `COPY ... (FORMAT csv)` reads it: an unquoted empty field is
/// NULL, a quoted one is an empty string.
pub fn parse_copy_csv(text: &str) -> Result<Vec<Vec<Option<String>>>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut chars = text.chars().peekable();

    while chars.peek().is_some() {
        let field = if chars.peek() == Some(&'"') {
            chars.next();
            let mut value = String::new();
            loop {
                match chars.next() {
                    Some('"') if chars.peek() == Some(&'"') => {
                        chars.next();
                        value.push('"');
                    }
                    Some('"') => break,
                    Some(c) => value.push(c),
                    None => bail!("unterminated quoted field"),
                }
            }
            Some(value)
        } else {
            let mut value = String::new();
            while let Some(&c) = chars.peek() {
                if c == ',' || c == '\n' {
                    break;
                }
                value.push(c);
                chars.next();
            }
            if value.is_empty() {
                None
            } else {
                Some(value)
            }
        };
        record.push(field);

        match chars.next() {
            Some(',') => {}
            Some('\n') | None => records.push(std::mem::take(&mut record)),
            Some(c) => bail!("unexpected character {:?} after field", c),
        }
    }

    Ok(records)
}

/// Run `target` once with a fresh synchronizer.
pub async fn run_once(
    remote: &MemoryRemote,
    store: &mut MemoryStore,
    target: &SyncTarget,
    options: SyncOptions,
) -> SyncResult<SyncReport> {
    let mut synchronizer = Synchronizer::new(remote, store, options);
    synchronizer.run(target).await
}
