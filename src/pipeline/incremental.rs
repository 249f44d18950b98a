//! Incremental state tracking: high-water-mark source selection and
//! unique-key upserts into persisted rows.
//!
//! Persisted state is a list of JSON-object rows so that column sets can
//! evolve between runs. New columns are appended to every row (existing rows
//! get `null`); a column whose non-null values change JSON type is a
//! [`SchemaConflictError`].

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::errors::SchemaConflictError;
use crate::pipeline::normalize::parse_timestamp;

// ---

pub type Row = serde_json::Map<String, Value>;

/// Caller-selected execution mode for a dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Incremental,
    /// Ignore the checkpoint and replace persisted state instead of merging.
    FullRefresh,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::FullRefresh => "full_refresh",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Boolean,
    Number,
    String,
    Array,
    Object,
}

impl FieldType {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(Self::Boolean),
            Value::Number(_) => Some(Self::Number),
            Value::String(_) => Some(Self::String),
            Value::Array(_) => Some(Self::Array),
            Value::Object(_) => Some(Self::Object),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// Column name to type; `None` when only nulls have been seen.
pub type Schema = BTreeMap<String, Option<FieldType>>;

/// Result of merging new rows into persisted state.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub rows: Vec<Row>,
    /// Max ordering-key value across the merged set.
    pub checkpoint: Option<DateTime<Utc>>,
    pub added_columns: Vec<String>,
    pub inserted: usize,
    pub updated: usize,
}

/// Rows whose ordering key is strictly after `checkpoint`; all rows when
/// there is no checkpoint yet.
pub fn select_new_source<T, F>(
    rows: Vec<T>,
    checkpoint: Option<DateTime<Utc>>,
    ordering_key: F,
) -> Vec<T>
where
    F: Fn(&T) -> DateTime<Utc>,
{
    // ---
    match checkpoint {
        None => rows,
        Some(mark) => rows.into_iter().filter(|r| ordering_key(r) > mark).collect(),
    }
}

pub fn infer_schema(rows: &[Row]) -> Result<Schema, SchemaConflictError> {
    // ---
    let mut schema = Schema::new();
    for row in rows {
        for (field, value) in row {
            let seen = schema.entry(field.clone()).or_insert(None);
            match (*seen, FieldType::of(value)) {
                (_, None) => {}
                (None, Some(t)) => *seen = Some(t),
                (Some(a), Some(b)) if a == b => {}
                (Some(a), Some(b)) => {
                    return Err(SchemaConflictError {
                        field: field.clone(),
                        existing: a.name(),
                        incoming: b.name(),
                    })
                }
            }
        }
    }
    Ok(schema)
}

/// Upsert `new_rows` into `existing` by `unique_key`.
///
/// Matching rows are replaced in place, unmatched rows are appended in input
/// order; within `new_rows` the last row for a key wins. The returned rows
/// all carry the union of both column sets.
pub fn merge(
    existing: Vec<Row>,
    new_rows: Vec<Row>,
    unique_key: &[&str],
) -> Result<MergeOutcome, SchemaConflictError> {
    // ---
    let existing_schema = infer_schema(&existing)?;
    let new_schema = infer_schema(&new_rows)?;

    for (field, incoming) in &new_schema {
        if let (Some(Some(current)), Some(incoming)) = (existing_schema.get(field), incoming) {
            if current != incoming {
                return Err(SchemaConflictError {
                    field: field.clone(),
                    existing: current.name(),
                    incoming: incoming.name(),
                });
            }
        }
    }

    let added_columns: Vec<String> = if existing.is_empty() {
        Vec::new()
    } else {
        new_schema
            .keys()
            .filter(|f| !existing_schema.contains_key(*f))
            .cloned()
            .collect()
    };
    let columns: BTreeSet<String> = existing_schema
        .into_keys()
        .chain(new_schema.into_keys())
        .collect();

    let mut rows = existing;
    let mut slot_by_key: HashMap<String, usize> = rows
        .iter()
        .enumerate()
        .map(|(slot, row)| (row_key(row, unique_key), slot))
        .collect();
    let existing_len = rows.len();
    let mut inserted = 0;
    let mut updated = 0;

    for row in new_rows {
        let key = row_key(&row, unique_key);
        match slot_by_key.get(&key) {
            Some(&slot) => {
                if slot < existing_len {
                    updated += 1;
                }
                rows[slot] = row;
            }
            None => {
                slot_by_key.insert(key, rows.len());
                rows.push(row);
                inserted += 1;
            }
        }
    }

    for row in &mut rows {
        for column in &columns {
            if !row.contains_key(column) {
                row.insert(column.clone(), Value::Null);
            }
        }
    }

    Ok(MergeOutcome {
        rows,
        checkpoint: None,
        added_columns,
        inserted,
        updated,
    })
}

/// Merge and advance the checkpoint to the max `ordering_field` value.
pub fn merge_incremental(
    existing: Vec<Row>,
    new_rows: Vec<Row>,
    unique_key: &[&str],
    ordering_field: &str,
) -> Result<MergeOutcome, SchemaConflictError> {
    // ---
    let mut outcome = merge(existing, new_rows, unique_key)?;
    outcome.checkpoint = max_ordering_key(&outcome.rows, ordering_field);
    Ok(outcome)
}

pub fn max_ordering_key(rows: &[Row], ordering_field: &str) -> Option<DateTime<Utc>> {
    // ---
    rows.iter()
        .filter_map(|row| row.get(ordering_field)?.as_str())
        .filter_map(parse_timestamp)
        .max()
}

fn row_key(row: &Row, unique_key: &[&str]) -> String {
    // ---
    unique_key
        .iter()
        .map(|field| row.get(*field).unwrap_or(&Value::Null).to_string())
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

pub fn to_rows<T: Serialize>(items: &[T]) -> Result<Vec<Row>, serde_json::Error> {
    // ---
    items
        .iter()
        .map(|item| match serde_json::to_value(item)? {
            Value::Object(map) => Ok(map),
            other => Ok(Row::from_iter([("value".to_string(), other)])),
        })
        .collect()
}

pub fn from_rows<T: DeserializeOwned>(rows: &[Row]) -> Result<Vec<T>, serde_json::Error> {
    // ---
    rows.iter()
        .map(|row| serde_json::from_value(Value::Object(row.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn row(value: Value) -> Row {
        // ---
        match value {
            Value::Object(map) => map,
            _ => panic!("test rows must be objects"),
        }
    }

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_select_new_source_first_run_takes_all() {
        // ---
        let rows = vec![ts(1), ts(5), ts(7)];
        assert_eq!(select_new_source(rows.clone(), None, |t| *t), rows);
    }

    #[test]
    fn test_select_new_source_excludes_at_or_before_checkpoint() {
        // ---
        let rows = vec![ts(1), ts(5), ts(6), ts(7)];
        let selected = select_new_source(rows, Some(ts(5)), |t| *t);
        assert_eq!(selected, vec![ts(6), ts(7)]);
    }

    #[test]
    fn test_merge_replaces_and_appends() {
        // ---
        let existing = vec![
            row(json!({"id": "a", "v": 1})),
            row(json!({"id": "b", "v": 2})),
        ];
        let incoming = vec![
            row(json!({"id": "b", "v": 20})),
            row(json!({"id": "c", "v": 3})),
        ];

        let out = merge(existing, incoming, &["id"]).unwrap();
        assert_eq!(
            out.rows,
            vec![
                row(json!({"id": "a", "v": 1})),
                row(json!({"id": "b", "v": 20})),
                row(json!({"id": "c", "v": 3})),
            ]
        );
        assert_eq!((out.inserted, out.updated), (1, 1));
    }

    #[test]
    fn test_merge_last_incoming_row_wins() {
        // ---
        let incoming = vec![
            row(json!({"id": "c", "v": 1})),
            row(json!({"id": "c", "v": 2})),
        ];
        let out = merge(Vec::new(), incoming, &["id"]).unwrap();
        assert_eq!(out.rows, vec![row(json!({"id": "c", "v": 2}))]);
        assert_eq!(out.inserted, 1);
    }

    #[test]
    fn test_merge_composite_key() {
        // ---
        let existing = vec![row(json!({"d": "DEV1", "m": "temperature", "n": 1}))];
        let incoming = vec![
            row(json!({"d": "DEV1", "m": "humidity", "n": 2})),
            row(json!({"d": "DEV1", "m": "temperature", "n": 3})),
        ];
        let out = merge(existing, incoming, &["d", "m"]).unwrap();
        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.rows[0]["n"], json!(3));
    }

    #[test]
    fn test_schema_evolution_appends_new_columns() {
        // ---
        let existing = vec![row(json!({"a": "x", "b": 1}))];
        let incoming = vec![row(json!({"a": "y", "b": 2, "c": true}))];

        let out = merge(existing, incoming, &["a"]).unwrap();
        assert_eq!(out.added_columns, vec!["c".to_string()]);
        assert!(out.rows.iter().all(|r| r.contains_key("c")));
        assert_eq!(out.rows[0]["c"], Value::Null);
        assert_eq!(out.rows[1]["c"], json!(true));
    }

    #[test]
    fn test_incoming_rows_missing_columns_are_null_filled() {
        // ---
        let existing = vec![row(json!({"a": "x", "b": 1}))];
        let incoming = vec![row(json!({"a": "y"}))];
        let out = merge(existing, incoming, &["a"]).unwrap();
        assert_eq!(out.rows[1]["b"], Value::Null);
    }

    #[test]
    fn test_type_conflict_is_reported() {
        // ---
        let existing = vec![row(json!({"id": "a", "v": 1.5}))];
        let incoming = vec![row(json!({"id": "b", "v": "1.5"}))];
        assert_eq!(
            merge(existing, incoming, &["id"]),
            Err(SchemaConflictError {
                field: "v".into(),
                existing: "number",
                incoming: "string",
            })
        );
    }

    #[test]
    fn test_null_column_accepts_any_type() {
        // ---
        let existing = vec![row(json!({"id": "a", "v": null}))];
        let incoming = vec![row(json!({"id": "b", "v": "text"}))];
        assert!(merge(existing, incoming, &["id"]).is_ok());
    }

    #[test]
    fn test_checkpoint_advances_to_max() {
        // ---
        let existing = vec![row(json!({"id": "a", "ingested_at": ts(5).to_rfc3339()}))];
        let incoming = vec![
            row(json!({"id": "b", "ingested_at": ts(9).to_rfc3339()})),
            row(json!({"id": "c", "ingested_at": ts(7).to_rfc3339()})),
        ];
        let out = merge_incremental(existing, incoming, &["id"], "ingested_at").unwrap();
        assert_eq!(out.checkpoint, Some(ts(9)));
    }

    #[test]
    fn test_rows_roundtrip_through_typed_values() {
        // ---
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Item {
            id: String,
            n: u32,
        }
        let items = vec![Item { id: "a".into(), n: 1 }];
        let rows = to_rows(&items).unwrap();
        assert_eq!(rows[0]["id"], json!("a"));
        let back: Vec<Item> = from_rows(&rows).unwrap();
        assert_eq!(back, items);
    }
}
