//! Document store contract consumed by the engine.
//!
//! The engine never talks to a database directly: it reads and writes untyped
//! JSON documents through [`DocumentStore`], and converts them to typed records
//! at a single boundary ([`decode`] / [`encode`]). Two adapters ship with the
//! crate:
//!
//! - [`MemoryStore`] keeps everything in process memory.
//! - [`SqlStore`] persists documents in a SQL table through sea-orm.

use std::{cmp::Ordering, fmt};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::{EngineError, ResultEngine};

pub use memory::MemoryStore;
pub use sql::SqlStore;

mod memory;
mod sql;

pub const BANK_ACCOUNTS: &str = "bank_accounts";
pub const TRANSACTIONS: &str = "transactions";
pub const TRANSACTION_SPLITS: &str = "transaction_splits";

/// Untyped fields of a document.
pub type Fields = Map<String, Value>;

/// A stored document: its id plus its fields (the id is never part of the
/// fields).
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
    StartsWith(String, String),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    pub fn is_in<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn starts_with(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::StartsWith(field.into(), prefix.into())
    }

    /// Whether `doc` satisfies this filter. Adapters that cannot push a filter
    /// down to their backend apply it with this.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::Eq(field, value) => lookup(doc, field) == Some(value),
            Self::In(field, values) => lookup(doc, field).is_some_and(|v| values.contains(v)),
            Self::StartsWith(field, prefix) => lookup(doc, field)
                .and_then(Value::as_str)
                .is_some_and(|s| s.starts_with(prefix.as_str())),
        }
    }
}

fn lookup<'a>(doc: &'a Document, field: &str) -> Option<&'a Value> {
    doc.fields.get(field)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Filters (all must match) and an optional ordering. Without an ordering,
/// documents come back in insertion order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
}

impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Stable sort by the ordering field; missing values sort first.
    pub fn sort(&self, docs: &mut [Document]) {
        let Some(order) = &self.order_by else {
            return;
        };
        docs.sort_by(|a, b| {
            let ord = compare_values(a.get(&order.field), b.get(&order.field));
            match order.direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            }
        });
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

/// One write inside a [`WriteBatch`].
#[derive(Clone, Debug, PartialEq)]
pub enum BatchOp {
    /// Insert a document with a caller-chosen id.
    Add {
        collection: String,
        id: String,
        fields: Fields,
    },
    /// Shallow-merge `fields` into an existing document.
    Update {
        collection: String,
        id: String,
        fields: Fields,
    },
    Delete { collection: String, id: String },
}

/// A set of writes committed atomically: all of them land or none does.
#[derive(Clone, Debug)]
pub struct WriteBatch {
    limit: usize,
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ops: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }

    fn push(&mut self, op: BatchOp) -> ResultEngine<()> {
        if self.ops.len() >= self.limit {
            return Err(EngineError::BatchLimit(self.limit));
        }
        self.ops.push(op);
        Ok(())
    }

    pub fn add(&mut self, collection: &str, id: impl Into<String>, fields: Fields) -> ResultEngine<()> {
        self.push(BatchOp::Add {
            collection: collection.to_string(),
            id: id.into(),
            fields,
        })
    }

    pub fn update(
        &mut self,
        collection: &str,
        id: impl Into<String>,
        fields: Fields,
    ) -> ResultEngine<()> {
        self.push(BatchOp::Update {
            collection: collection.to_string(),
            id: id.into(),
            fields,
        })
    }

    pub fn delete(&mut self, collection: &str, id: impl Into<String>) -> ResultEngine<()> {
        self.push(BatchOp::Delete {
            collection: collection.to_string(),
            id: id.into(),
        })
    }
}

/// Persistence operations the engine relies on.
///
/// `update` is a shallow merge of top-level fields. `delete` of a missing
/// document is `KeyNotFound`. `commit` applies a [`WriteBatch`] atomically and
/// rejects batches larger than [`max_batch_ops`](DocumentStore::max_batch_ops).
#[async_trait]
pub trait DocumentStore: fmt::Debug + Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> ResultEngine<Option<Document>>;

    async fn query(&self, collection: &str, query: &Query) -> ResultEngine<Vec<Document>>;

    async fn add(&self, collection: &str, fields: Fields) -> ResultEngine<String>;

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> ResultEngine<()>;

    async fn delete(&self, collection: &str, id: &str) -> ResultEngine<()>;

    async fn commit(&self, batch: WriteBatch) -> ResultEngine<()>;

    fn max_batch_ops(&self) -> usize;

    /// A fresh batch sized for this store.
    fn batch(&self) -> WriteBatch {
        WriteBatch::new(self.max_batch_ops())
    }
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Typed record → document fields (the `id` field is stripped).
pub fn encode<T: Serialize>(record: &T) -> ResultEngine<Fields> {
    match serde_json::to_value(record)? {
        Value::Object(mut map) => {
            map.remove("id");
            Ok(map)
        }
        other => Err(EngineError::Store(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

/// Document → typed record. The document id is injected as `id`.
pub fn decode<T: DeserializeOwned>(collection: &str, doc: Document) -> ResultEngine<T> {
    let Document { id, mut fields } = doc;
    fields.insert("id".to_string(), Value::String(id.clone()));
    serde_json::from_value(Value::Object(fields)).map_err(|err| EngineError::MalformedDocument {
        collection: collection.to_string(),
        id,
        reason: err.to_string(),
    })
}

/// A document that failed to decode and was set aside.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Quarantined {
    pub collection: String,
    pub id: String,
    pub reason: String,
}

/// Decode every document, setting aside the ones that do not conform.
pub fn decode_all<T: DeserializeOwned>(
    collection: &str,
    docs: Vec<Document>,
) -> (Vec<T>, Vec<Quarantined>) {
    let mut records = Vec::with_capacity(docs.len());
    let mut quarantined = Vec::new();
    for doc in docs {
        match decode(collection, doc) {
            Ok(record) => records.push(record),
            Err(EngineError::MalformedDocument {
                collection,
                id,
                reason,
            }) => {
                tracing::warn!("quarantined malformed document {collection}/{id}: {reason}");
                quarantined.push(Quarantined {
                    collection,
                    id,
                    reason,
                });
            }
            Err(err) => quarantined.push(Quarantined {
                collection: collection.to_string(),
                id: String::new(),
                reason: err.to_string(),
            }),
        }
    }
    (records, quarantined)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(id: &str, value: Value) -> Document {
        match value {
            Value::Object(map) => Document::new(id, map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn filters_match_fields() {
        let d = doc("a", json!({"bank_account_id": "acc", "transaction_number": "TXN-2024-1234-0001"}));
        assert!(Filter::eq("bank_account_id", "acc").matches(&d));
        assert!(!Filter::eq("bank_account_id", "other").matches(&d));
        assert!(Filter::is_in("bank_account_id", ["x", "acc"]).matches(&d));
        assert!(Filter::starts_with("transaction_number", "TXN-2024-1234-").matches(&d));
        assert!(!Filter::starts_with("missing", "TXN").matches(&d));
    }

    #[test]
    fn batch_enforces_limit() {
        let mut batch = WriteBatch::new(2);
        batch.delete(TRANSACTIONS, "a").unwrap();
        batch.delete(TRANSACTIONS, "b").unwrap();
        assert_eq!(batch.delete(TRANSACTIONS, "c"), Err(EngineError::BatchLimit(2)));
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn ordering_is_stable_with_missing_first() {
        let mut docs = vec![
            doc("1", json!({"n": 2})),
            doc("2", json!({})),
            doc("3", json!({"n": 1})),
            doc("4", json!({"n": 2})),
        ];
        Query::new().order_by("n", Direction::Asc).sort(&mut docs);
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["2", "3", "1", "4"]);
    }

    #[test]
    fn malformed_documents_are_quarantined() {
        #[derive(serde::Deserialize)]
        struct Row {
            #[allow(dead_code)]
            id: String,
            #[allow(dead_code)]
            amount: i64,
        }

        let docs = vec![doc("ok", json!({"amount": 1})), doc("bad", json!({"amount": "x"}))];
        let (rows, quarantined): (Vec<Row>, _) = decode_all("rows", docs);
        assert_eq!(rows.len(), 1);
        assert_eq!(quarantined.len(), 1);
        assert_eq!(quarantined[0].id, "bad");
    }
}
