use std::{collections::HashMap, marker::PhantomData, sync::Arc};

use anyhow::Context;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{
    schema::VERSION_KEY, Collection, Document, Filter, Projection, ReadQuery, Schema, StoreError,
    Update,
};

/// A typed document. The schema describes how its serialized form is stored.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + Sized {
    const SCHEMA: &'static Schema;

    fn id(&self) -> Uuid;

    /// Field-level validation messages, empty when the entity is valid.
    fn validate(&self) -> Result<(), Vec<String>>;
}

/// Schema validator for any entity: the document must deserialize and pass `Entity::validate`.
pub fn validate_document<T: Entity>(doc: &Document) -> Result<(), StoreError> {
    let entity: T = serde_json::from_value(Value::Object(doc.clone()))
        .map_err(|e| StoreError::Validation(vec![e.to_string()]))?;
    entity.validate().map_err(StoreError::Validation)
}

pub fn to_document<T: Serialize>(entity: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(entity).context("serialize document")? {
        Value::Object(doc) => Ok(doc),
        other => Err(anyhow::anyhow!("expected an object, got {other}").into()),
    }
}

fn from_document<T: Entity>(doc: Document) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::Object(doc))
        .with_context(|| format!("deserialize {} document", T::SCHEMA.collection))?)
}

/// Typed access to a collection. Every filter is cast through the schema and
/// combined with the model's default scope; every update bumps `__v`.
pub struct Model<T> {
    collection: Arc<dyn Collection>,
    scope: Filter,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for Model<T> {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
            scope: self.scope.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> Model<T> {
    pub fn new(collection: Arc<dyn Collection>) -> Self {
        Self {
            collection,
            scope: Filter::new(),
            _entity: PhantomData,
        }
    }

    /// Conditions added to every read and write.
    pub fn with_scope(mut self, scope: Filter) -> Self {
        self.scope = scope;
        self
    }

    fn scoped(&self, filter: Filter) -> Result<Filter, StoreError> {
        Ok(T::SCHEMA.cast_filter(filter)?.and(self.scope.clone()))
    }

    fn versioned(&self, update: Update) -> Result<Update, StoreError> {
        Ok(T::SCHEMA.cast_update(update)?.inc(VERSION_KEY, 1))
    }

    /// Serializes an entity without hidden fields.
    pub fn public(&self, entity: &T) -> Result<Document, StoreError> {
        let mut doc = to_document(entity)?;
        T::SCHEMA.strip(&mut doc);
        Ok(doc)
    }

    pub async fn create(&self, entity: &T) -> Result<T, StoreError> {
        let mut doc = to_document(entity)?;
        doc.insert(VERSION_KEY.to_string(), Value::from(0));
        let stored = self.collection.insert(doc).await?;
        from_document(stored)
    }

    /// Raw read used by list endpoints: projection applied, hidden fields stripped.
    pub async fn find(&self, query: ReadQuery) -> Result<Vec<Document>, StoreError> {
        let query = ReadQuery {
            filter: self.scoped(query.filter)?,
            ..query
        };
        let docs = self.collection.find(&query).await?;
        Ok(docs
            .into_iter()
            .map(|doc| {
                let mut doc = query.projection.apply(doc);
                T::SCHEMA.strip(&mut doc);
                doc
            })
            .collect())
    }

    pub async fn find_many(&self, filter: Filter) -> Result<Vec<T>, StoreError> {
        let query = ReadQuery::new(self.scoped(filter)?);
        self.collection
            .find(&query)
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }

    pub async fn find_one(&self, filter: Filter) -> Result<Option<T>, StoreError> {
        let query = ReadQuery {
            limit: Some(1),
            ..ReadQuery::new(self.scoped(filter)?)
        };
        self.collection
            .find(&query)
            .await?
            .into_iter()
            .next()
            .map(from_document)
            .transpose()
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<T>, StoreError> {
        self.find_one(Filter::by_id(id)).await
    }

    pub async fn find_one_and_update(
        &self,
        filter: Filter,
        update: Update,
    ) -> Result<Option<T>, StoreError> {
        let filter = self.scoped(filter)?;
        let update = self.versioned(update)?;
        self.collection
            .find_one_and_update(&filter, &update)
            .await?
            .map(from_document)
            .transpose()
    }

    pub async fn find_by_id_and_update(
        &self,
        id: Uuid,
        update: Update,
    ) -> Result<Option<T>, StoreError> {
        self.find_one_and_update(Filter::by_id(id), update).await
    }

    pub async fn update_many(&self, filter: Filter, update: Update) -> Result<u64, StoreError> {
        let filter = self.scoped(filter)?;
        let update = self.versioned(update)?;
        self.collection.update_many(&filter, &update).await
    }

    pub async fn find_one_and_delete(&self, filter: Filter) -> Result<Option<T>, StoreError> {
        let filter = self.scoped(filter)?;
        self.collection
            .find_one_and_delete(&filter)
            .await?
            .map(from_document)
            .transpose()
    }

    pub async fn find_by_id_and_delete(&self, id: Uuid) -> Result<Option<T>, StoreError> {
        self.find_one_and_delete(Filter::by_id(id)).await
    }

    pub async fn delete_many(&self, filter: Filter) -> Result<u64, StoreError> {
        let filter = self.scoped(filter)?;
        self.collection.delete_many(&filter).await
    }

    pub async fn count(&self, filter: Filter) -> Result<u64, StoreError> {
        let filter = self.scoped(filter)?;
        self.collection.count(&filter).await
    }

    /// Replaces the id (or id array) under `path` in each document with the
    /// referenced document restricted to `fields`. References outside the
    /// scope become `null`, or are dropped from arrays.
    pub async fn populate(
        &self,
        docs: &mut [Document],
        path: &str,
        fields: &[&str],
    ) -> Result<(), StoreError> {
        let mut ids: Vec<Value> = Vec::new();
        for doc in docs.iter() {
            match doc.get(path) {
                Some(Value::Array(items)) => ids.extend(items.iter().cloned()),
                Some(id @ Value::String(_)) => ids.push(id.clone()),
                _ => {}
            }
        }
        if ids.is_empty() {
            return Ok(());
        }
        ids.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
        ids.dedup();

        let query = ReadQuery {
            projection: Projection::Include(fields.iter().map(|f| f.to_string()).collect()),
            ..ReadQuery::new(Filter::new().is_in("id", ids))
        };
        let found: HashMap<String, Document> = self
            .find(query)
            .await?
            .into_iter()
            .filter_map(|d| {
                let id = d.get("id")?.as_str()?.to_string();
                Some((id, d))
            })
            .collect();
        let lookup = |v: &Value| v.as_str().and_then(|id| found.get(id)).cloned();

        for doc in docs.iter_mut() {
            let Some(slot) = doc.get_mut(path) else {
                continue;
            };
            let next = match &*slot {
                Value::Array(items) => Value::Array(
                    items.iter().filter_map(lookup).map(Value::Object).collect(),
                ),
                id @ Value::String(_) => lookup(id).map(Value::Object).unwrap_or(Value::Null),
                _ => continue,
            };
            *slot = next;
        }
        Ok(())
    }
}
