//! [`DocumentStore`] backed by a SQL database through sea-orm.
//!
//! Every document is a row of the `documents` table created by the
//! `migration` crate. Equality filters on string fields are pushed down with
//! SQLite's `json_extract`; everything else is evaluated in Rust on the rows
//! of the collection.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use sea_orm::{
    ActiveValue, ConnectionTrait, DatabaseConnection, QueryFilter, QueryOrder, QuerySelect,
    TransactionTrait, prelude::*, sea_query::Expr,
};
use serde_json::Value;

use crate::{EngineError, ResultEngine};

use super::{BatchOp, Document, DocumentStore, Fields, Filter, Query, WriteBatch, new_id};

const DEFAULT_BATCH_LIMIT: usize = 500;

mod documents {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "documents")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub collection: String,
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub seq: i64,
        #[sea_orm(column_type = "Text")]
        pub body: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

#[derive(Debug)]
pub struct SqlStore {
    database: DatabaseConnection,
    next_seq: AtomicI64,
    batch_limit: usize,
}

impl SqlStore {
    /// Wrap an already migrated connection.
    pub async fn new(database: DatabaseConnection) -> ResultEngine<Self> {
        Self::with_batch_limit(database, DEFAULT_BATCH_LIMIT).await
    }

    pub async fn with_batch_limit(
        database: DatabaseConnection,
        batch_limit: usize,
    ) -> ResultEngine<Self> {
        let max_seq: Option<Option<i64>> = documents::Entity::find()
            .select_only()
            .column_as(Expr::col(documents::Column::Seq).max(), "max_seq")
            .into_tuple()
            .one(&database)
            .await?;
        Ok(Self {
            database,
            next_seq: AtomicI64::new(max_seq.flatten().unwrap_or(0) + 1),
            batch_limit,
        })
    }

    fn seq(&self) -> i64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }
}

fn to_body(fields: &Fields) -> ResultEngine<String> {
    Ok(serde_json::to_string(fields)?)
}

fn to_document(model: documents::Model) -> ResultEngine<Document> {
    match serde_json::from_str::<Value>(&model.body) {
        Ok(Value::Object(fields)) => Ok(Document::new(model.id, fields)),
        Ok(_) => Err(EngineError::MalformedDocument {
            collection: model.collection,
            id: model.id,
            reason: "body is not a JSON object".to_string(),
        }),
        Err(err) => Err(EngineError::MalformedDocument {
            collection: model.collection,
            id: model.id,
            reason: err.to_string(),
        }),
    }
}

async fn find_one<C: ConnectionTrait>(
    conn: &C,
    collection: &str,
    id: &str,
) -> ResultEngine<Option<documents::Model>> {
    Ok(
        documents::Entity::find_by_id((collection.to_string(), id.to_string()))
            .one(conn)
            .await?,
    )
}

async fn insert<C: ConnectionTrait>(
    conn: &C,
    collection: &str,
    id: &str,
    seq: i64,
    fields: &Fields,
) -> ResultEngine<()> {
    let model = documents::ActiveModel {
        collection: ActiveValue::Set(collection.to_string()),
        id: ActiveValue::Set(id.to_string()),
        seq: ActiveValue::Set(seq),
        body: ActiveValue::Set(to_body(fields)?),
    };
    documents::Entity::insert(model)
        .exec_without_returning(conn)
        .await?;
    Ok(())
}

async fn merge<C: ConnectionTrait>(
    conn: &C,
    collection: &str,
    id: &str,
    fields: Fields,
) -> ResultEngine<()> {
    let model = find_one(conn, collection, id)
        .await?
        .ok_or_else(|| EngineError::KeyNotFound(format!("{collection}/{id}")))?;
    let mut doc = to_document(model)?;
    doc.fields.extend(fields);

    documents::Entity::update_many()
        .col_expr(documents::Column::Body, Expr::value(to_body(&doc.fields)?))
        .filter(documents::Column::Collection.eq(collection))
        .filter(documents::Column::Id.eq(id))
        .exec(conn)
        .await?;
    Ok(())
}

async fn remove<C: ConnectionTrait>(conn: &C, collection: &str, id: &str) -> ResultEngine<()> {
    let result = documents::Entity::delete_many()
        .filter(documents::Column::Collection.eq(collection))
        .filter(documents::Column::Id.eq(id))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        return Err(EngineError::KeyNotFound(format!("{collection}/{id}")));
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for SqlStore {
    async fn get(&self, collection: &str, id: &str) -> ResultEngine<Option<Document>> {
        find_one(&self.database, collection, id)
            .await?
            .map(to_document)
            .transpose()
    }

    async fn query(&self, collection: &str, query: &Query) -> ResultEngine<Vec<Document>> {
        let mut select =
            documents::Entity::find().filter(documents::Column::Collection.eq(collection));
        for filter in &query.filters {
            if let Filter::Eq(field, Value::String(value)) = filter {
                select = select.filter(Expr::cust_with_values(
                    "json_extract(body, ?) = ?",
                    [format!("$.{field}"), value.clone()],
                ));
            }
        }
        let models = select
            .order_by_asc(documents::Column::Seq)
            .order_by_asc(documents::Column::Id)
            .all(&self.database)
            .await?;

        let mut docs = Vec::with_capacity(models.len());
        for model in models {
            match to_document(model) {
                Ok(doc) if query.matches(&doc) => docs.push(doc),
                Ok(_) => {}
                Err(err) => tracing::warn!("skipping unreadable document: {err}"),
            }
        }
        query.sort(&mut docs);
        Ok(docs)
    }

    async fn add(&self, collection: &str, fields: Fields) -> ResultEngine<String> {
        let id = new_id();
        insert(&self.database, collection, &id, self.seq(), &fields).await?;
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> ResultEngine<()> {
        let db_tx = self.database.begin().await?;
        merge(&db_tx, collection, id, fields).await?;
        db_tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> ResultEngine<()> {
        remove(&self.database, collection, id).await
    }

    async fn commit(&self, batch: WriteBatch) -> ResultEngine<()> {
        if batch.len() > self.batch_limit {
            return Err(EngineError::BatchLimit(self.batch_limit));
        }

        // Dropping the transaction on an early return rolls it back.
        let db_tx = self.database.begin().await?;
        for op in batch.into_ops() {
            match op {
                BatchOp::Add {
                    collection,
                    id,
                    fields,
                } => {
                    if find_one(&db_tx, &collection, &id).await?.is_some() {
                        return Err(EngineError::Conflict(format!("{collection}/{id}")));
                    }
                    insert(&db_tx, &collection, &id, self.seq(), &fields).await?;
                }
                BatchOp::Update {
                    collection,
                    id,
                    fields,
                } => merge(&db_tx, &collection, &id, fields).await?,
                BatchOp::Delete { collection, id } => remove(&db_tx, &collection, &id).await?,
            }
        }
        db_tx.commit().await?;
        Ok(())
    }

    fn max_batch_ops(&self) -> usize {
        self.batch_limit
    }
}
