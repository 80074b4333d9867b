//! JSONB-backed collections. Each collection is a table
//! `(seq bigserial, id uuid primary key, doc jsonb)`; unique schema fields are
//! enforced by expression indexes named `<table>_<field>_unique`.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{types::Json, PgPool, Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

use super::{
    describe, Collection, Condition, Direction, Document, Filter, ReadQuery, Schema, StoreError,
    Update,
};

pub struct PgCollection {
    pool: PgPool,
    schema: &'static Schema,
}

impl PgCollection {
    pub fn new(pool: PgPool, schema: &'static Schema) -> Self {
        Self { pool, schema }
    }

    fn table(&self) -> &'static str {
        self.schema.collection
    }

    fn select<'a>(&self, columns: &str, filter: &Filter) -> QueryBuilder<'a, Postgres> {
        let mut qb = QueryBuilder::new(format!("SELECT {columns} FROM {} ", self.table()));
        push_where(&mut qb, filter);
        qb
    }

    fn convert(&self, err: sqlx::Error, doc: &Document) -> StoreError {
        if let sqlx::Error::Database(db) = &err {
            if db.code().as_deref() == Some("23505") {
                let field = db
                    .constraint()
                    .and_then(|c| c.strip_prefix(self.table()))
                    .and_then(|c| c.strip_prefix('_'))
                    .and_then(|c| c.strip_suffix("_unique"))
                    .unwrap_or("id")
                    .to_string();
                let value = describe(doc, &field);
                return StoreError::Duplicate { field, value };
            }
        }
        StoreError::Backend(anyhow::Error::new(err).context(format!("write {}", self.table())))
    }
}

fn doc_id(doc: &Document) -> Result<Uuid, StoreError> {
    doc.get("id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| StoreError::Validation(vec!["document id must be a uuid".into()]))
}

fn push_field(qb: &mut QueryBuilder<'_, Postgres>, field: &str) {
    qb.push("(doc -> ");
    qb.push_bind(field.to_string());
    qb.push(")");
}

fn push_eq(qb: &mut QueryBuilder<'_, Postgres>, field: &str, value: &Value) {
    if value.is_null() {
        qb.push("(");
        push_field(qb, field);
        qb.push(" IS NULL OR ");
        push_field(qb, field);
        qb.push(" = 'null'::jsonb)");
        return;
    }
    // Array fields match when they contain the value.
    qb.push("(");
    push_field(qb, field);
    qb.push(" = ");
    qb.push_bind(Json(value.clone()));
    qb.push(" OR (jsonb_typeof");
    push_field(qb, field);
    qb.push(" = 'array' AND ");
    push_field(qb, field);
    qb.push(" @> jsonb_build_array(");
    qb.push_bind(Json(value.clone()));
    qb.push(")))");
}

fn push_condition(qb: &mut QueryBuilder<'_, Postgres>, cond: &Condition) {
    match cond {
        Condition::Eq(f, v) => push_eq(qb, f, v),
        Condition::Ne(f, v) => {
            qb.push("NOT coalesce(");
            push_eq(qb, f, v);
            qb.push(", false)");
        }
        Condition::Cmp(f, op, v) => {
            qb.push("(jsonb_typeof");
            push_field(qb, f);
            qb.push(" = jsonb_typeof(");
            qb.push_bind(Json(v.clone()));
            qb.push(") AND ");
            push_field(qb, f);
            qb.push(" ");
            qb.push(op.to_sql());
            qb.push(" ");
            qb.push_bind(Json(v.clone()));
            qb.push(")");
        }
        Condition::In(_, vs) if vs.is_empty() => {
            qb.push("FALSE");
        }
        Condition::In(f, vs) => {
            qb.push("EXISTS (SELECT 1 FROM jsonb_array_elements(");
            qb.push_bind(Json(Value::Array(vs.clone())));
            qb.push(") AS e(v) WHERE e.v = ");
            push_field(qb, f);
            qb.push(")");
        }
    }
}

fn push_where(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    if filter.is_empty() {
        return;
    }
    qb.push(" WHERE ");
    for (i, cond) in filter.conditions().iter().enumerate() {
        if i > 0 {
            qb.push(" AND ");
        }
        push_condition(qb, cond);
    }
}

#[async_trait]
impl Collection for PgCollection {
    async fn insert(&self, doc: Document) -> Result<Document, StoreError> {
        (self.schema.validate)(&doc)?;
        let id = doc_id(&doc)?;
        let mut qb = QueryBuilder::new(format!("INSERT INTO {} (id, doc) VALUES (", self.table()));
        qb.push_bind(id);
        qb.push(", ");
        qb.push_bind(Json(doc.clone()));
        qb.push(")");
        qb.build()
            .execute(&self.pool)
            .await
            .map_err(|e| self.convert(e, &doc))?;
        debug!(collection = self.table(), %id, "document inserted");
        Ok(doc)
    }

    async fn find(&self, query: &ReadQuery) -> Result<Vec<Document>, StoreError> {
        let mut qb = self.select("doc", &query.filter);
        qb.push(" ORDER BY ");
        for key in &query.sort {
            push_field(&mut qb, &key.field);
            qb.push(match key.direction {
                Direction::Asc => " ASC NULLS FIRST, ",
                Direction::Desc => " DESC NULLS LAST, ",
            });
        }
        qb.push("seq ASC");
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ");
            qb.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }
        if query.skip > 0 {
            qb.push(" OFFSET ");
            qb.push_bind(i64::try_from(query.skip).unwrap_or(i64::MAX));
        }
        let rows: Vec<Json<Document>> = qb
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("find in {}", self.table()))?;
        Ok(rows.into_iter().map(|Json(doc)| doc).collect())
    }

    async fn find_one_and_update(
        &self,
        filter: &Filter,
        update: &Update,
    ) -> Result<Option<Document>, StoreError> {
        let mut tx = self.pool.begin().await.context("begin tx")?;
        let mut qb = self.select("doc", filter);
        qb.push(" ORDER BY seq LIMIT 1 FOR UPDATE");
        let current: Option<Json<Document>> = qb
            .build_query_scalar()
            .fetch_optional(&mut *tx)
            .await
            .with_context(|| format!("lock row in {}", self.table()))?;
        let Some(Json(mut doc)) = current else {
            return Ok(None);
        };

        update.apply(&mut doc);
        (self.schema.validate)(&doc)?;
        let id = doc_id(&doc)?;
        sqlx::query(&format!("UPDATE {} SET doc = $1 WHERE id = $2", self.table()))
            .bind(Json(doc.clone()))
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| self.convert(e, &doc))?;
        tx.commit().await.context("commit tx")?;
        Ok(Some(doc))
    }

    async fn update_many(&self, filter: &Filter, update: &Update) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await.context("begin tx")?;
        let mut qb = self.select("doc", filter);
        qb.push(" ORDER BY seq FOR UPDATE");
        let rows: Vec<Json<Document>> = qb
            .build_query_scalar()
            .fetch_all(&mut *tx)
            .await
            .with_context(|| format!("lock rows in {}", self.table()))?;

        let touched = rows.len() as u64;
        for Json(mut doc) in rows {
            update.apply(&mut doc);
            (self.schema.validate)(&doc)?;
            let id = doc_id(&doc)?;
            sqlx::query(&format!("UPDATE {} SET doc = $1 WHERE id = $2", self.table()))
                .bind(Json(doc.clone()))
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| self.convert(e, &doc))?;
        }
        tx.commit().await.context("commit tx")?;
        Ok(touched)
    }

    async fn find_one_and_delete(&self, filter: &Filter) -> Result<Option<Document>, StoreError> {
        let mut qb = QueryBuilder::new(format!(
            "DELETE FROM {table} WHERE id = (SELECT id FROM {table} ",
            table = self.table()
        ));
        push_where(&mut qb, filter);
        qb.push(" ORDER BY seq LIMIT 1 FOR UPDATE) RETURNING doc");
        let deleted: Option<Json<Document>> = qb
            .build_query_scalar()
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("delete from {}", self.table()))?;
        Ok(deleted.map(|Json(doc)| doc))
    }

    async fn delete_many(&self, filter: &Filter) -> Result<u64, StoreError> {
        let mut qb = QueryBuilder::new(format!("DELETE FROM {} ", self.table()));
        push_where(&mut qb, filter);
        let done = qb
            .build()
            .execute(&self.pool)
            .await
            .with_context(|| format!("delete from {}", self.table()))?;
        Ok(done.rows_affected())
    }

    async fn count(&self, filter: &Filter) -> Result<u64, StoreError> {
        let mut qb = self.select("count(*)", filter);
        let n: i64 = qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("count {}", self.table()))?;
        Ok(n.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CmpOp;
    use serde_json::json;

    #[test]
    fn where_clause_binds_fields_and_values() {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("SELECT doc FROM memes ");
        let filter = Filter::new()
            .cmp("views", CmpOp::Gte, 5)
            .ne("active", false)
            .is_in("id", vec![]);
        push_where(&mut qb, &filter);
        let sql = qb.sql();
        assert!(sql.contains(" WHERE (jsonb_typeof(doc -> $1) = jsonb_typeof($2) AND (doc -> $3) >= $4)"));
        assert!(sql.contains(" AND NOT coalesce("));
        assert!(sql.ends_with(" AND FALSE"));
    }

    #[test]
    fn eq_null_matches_missing_field() {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("");
        push_eq(&mut qb, "active", &json!(null));
        assert_eq!(qb.sql(), "((doc -> $1) IS NULL OR (doc -> $2) = 'null'::jsonb)");
    }
}
