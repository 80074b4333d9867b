use std::cmp::Ordering;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    describe, filter::compare, Collection, Direction, Document, Filter, ReadQuery, Schema,
    SortKey, StoreError, Update,
};

/// In-process collection. Documents keep insertion order, which is also the
/// tiebreak order for equal sort keys.
pub struct MemoryCollection {
    schema: &'static Schema,
    docs: RwLock<Vec<Document>>,
}

impl MemoryCollection {
    pub fn new(schema: &'static Schema) -> Self {
        Self {
            schema,
            docs: RwLock::new(Vec::new()),
        }
    }

    fn check_unique(&self, docs: &[Document], candidate: &Document) -> Result<(), StoreError> {
        for field in self.schema.unique_fields() {
            let Some(value) = candidate.get(field).filter(|v| !v.is_null()) else {
                continue;
            };
            let clash = docs
                .iter()
                .filter(|d| d.get("id") != candidate.get("id"))
                .any(|d| d.get(field) == Some(value));
            if clash {
                return Err(StoreError::Duplicate {
                    field: field.to_string(),
                    value: describe(candidate, field),
                });
            }
        }
        Ok(())
    }
}

fn sort_docs(docs: &mut [Document], keys: &[SortKey]) {
    if keys.is_empty() {
        return;
    }
    // Stable sort keeps insertion order among equal keys.
    docs.sort_by(|a, b| {
        for key in keys {
            let ord = compare(
                a.get(&key.field).unwrap_or(&Value::Null),
                b.get(&key.field).unwrap_or(&Value::Null),
            );
            let ord = match key.direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

#[async_trait]
impl Collection for MemoryCollection {
    async fn insert(&self, doc: Document) -> Result<Document, StoreError> {
        (self.schema.validate)(&doc)?;
        let mut docs = self.docs.write().await;
        self.check_unique(&docs, &doc)?;
        docs.push(doc.clone());
        Ok(doc)
    }

    async fn find(&self, query: &ReadQuery) -> Result<Vec<Document>, StoreError> {
        let docs = self.docs.read().await;
        let mut found: Vec<Document> = docs
            .iter()
            .filter(|d| query.filter.matches(d))
            .cloned()
            .collect();
        sort_docs(&mut found, &query.sort);
        let skip = usize::try_from(query.skip).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        Ok(found.into_iter().skip(skip).take(limit).collect())
    }

    async fn find_one_and_update(
        &self,
        filter: &Filter,
        update: &Update,
    ) -> Result<Option<Document>, StoreError> {
        let mut docs = self.docs.write().await;
        let Some(pos) = docs.iter().position(|d| filter.matches(d)) else {
            return Ok(None);
        };
        let mut next = docs[pos].clone();
        update.apply(&mut next);
        (self.schema.validate)(&next)?;
        self.check_unique(&docs, &next)?;
        docs[pos] = next.clone();
        Ok(Some(next))
    }

    async fn update_many(&self, filter: &Filter, update: &Update) -> Result<u64, StoreError> {
        let mut docs = self.docs.write().await;
        // Staged on a copy so a failing document leaves every other one untouched.
        let mut staged = docs.clone();
        let mut touched = 0;
        for i in 0..staged.len() {
            if !filter.matches(&staged[i]) {
                continue;
            }
            let mut next = staged[i].clone();
            update.apply(&mut next);
            (self.schema.validate)(&next)?;
            self.check_unique(&staged, &next)?;
            staged[i] = next;
            touched += 1;
        }
        *docs = staged;
        Ok(touched)
    }

    async fn find_one_and_delete(&self, filter: &Filter) -> Result<Option<Document>, StoreError> {
        let mut docs = self.docs.write().await;
        Ok(docs
            .iter()
            .position(|d| filter.matches(d))
            .map(|pos| docs.remove(pos)))
    }

    async fn delete_many(&self, filter: &Filter) -> Result<u64, StoreError> {
        let mut docs = self.docs.write().await;
        let before = docs.len();
        docs.retain(|d| !filter.matches(d));
        Ok((before - docs.len()) as u64)
    }

    async fn count(&self, filter: &Filter) -> Result<u64, StoreError> {
        let docs = self.docs.read().await;
        Ok(docs.iter().filter(|d| filter.matches(d)).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Field, FieldKind};
    use serde_json::json;

    static FIELDS: &[Field] = &[
        Field::new("slug", FieldKind::String).unique(),
        Field::new("views", FieldKind::Number),
    ];

    static SCHEMA: Schema = Schema {
        collection: "things",
        fields: FIELDS,
        validate: |doc| match doc.get("views").and_then(Value::as_i64) {
            Some(v) if v < 0 => Err(StoreError::Validation(vec!["views must be positive".into()])),
            _ => Ok(()),
        },
    };

    fn doc(v: serde_json::Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn unique_fields_are_enforced() {
        let c = MemoryCollection::new(&SCHEMA);
        c.insert(doc(json!({"id": "1", "slug": "a"}))).await.unwrap();
        let err = c.insert(doc(json!({"id": "2", "slug": "a"}))).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { ref value, .. } if value == "a"));
    }

    #[tokio::test]
    async fn conditional_update_only_touches_matches() {
        let c = MemoryCollection::new(&SCHEMA);
        c.insert(doc(json!({"id": "1", "views": 0}))).await.unwrap();
        let f = Filter::new().eq("id", "1").eq("views", 1);
        let none = c.find_one_and_update(&f, &Update::new().inc("views", 1)).await.unwrap();
        assert!(none.is_none());
        let f = Filter::new().eq("id", "1");
        let some = c.find_one_and_update(&f, &Update::new().inc("views", 1)).await.unwrap();
        assert_eq!(some.unwrap()["views"], json!(1));
    }

    #[tokio::test]
    async fn validator_rejects_update_and_keeps_original() {
        let c = MemoryCollection::new(&SCHEMA);
        c.insert(doc(json!({"id": "1", "views": 0}))).await.unwrap();
        let f = Filter::new().eq("id", "1");
        let err = c.find_one_and_update(&f, &Update::new().inc("views", -1)).await;
        assert!(matches!(err, Err(StoreError::Validation(_))));
        assert_eq!(c.count(&Filter::new().eq("views", 0)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_many_is_all_or_nothing() {
        let c = MemoryCollection::new(&SCHEMA);
        c.insert(doc(json!({"id": "1", "views": 5}))).await.unwrap();
        c.insert(doc(json!({"id": "2", "views": 0}))).await.unwrap();
        let err = c
            .update_many(&Filter::new(), &Update::new().inc("views", -1))
            .await;
        assert!(matches!(err, Err(StoreError::Validation(_))));
        assert_eq!(c.count(&Filter::new().eq("views", 5)).await.unwrap(), 1);
        assert_eq!(c.count(&Filter::new().eq("views", 0)).await.unwrap(), 1);

        let n = c
            .update_many(&Filter::new(), &Update::new().inc("views", 1))
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(c.count(&Filter::new().eq("views", 6)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn find_sorts_stably_then_pages() {
        let c = MemoryCollection::new(&SCHEMA);
        for (id, views) in [("a", 1), ("b", 3), ("c", 1), ("d", 2)] {
            c.insert(doc(json!({"id": id, "views": views}))).await.unwrap();
        }
        let q = ReadQuery {
            sort: vec![SortKey { field: "views".into(), direction: Direction::Asc }],
            skip: 1,
            limit: Some(2),
            ..Default::default()
        };
        let ids: Vec<_> = c
            .find(&q)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d["id"].clone())
            .collect();
        assert_eq!(ids, vec![json!("c"), json!("d")]);
    }
}
