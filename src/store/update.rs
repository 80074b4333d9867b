use serde_json::Value;

use super::Document;

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Set(String, Value),
    Unset(String),
    Inc(String, i64),
    /// Appends to an array field, creating it when missing.
    Push(String, Value),
    /// Removes every occurrence of the value from an array field.
    Pull(String, Value),
}

/// Ordered list of field operators applied to a single document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    ops: Vec<Op>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.ops.push(Op::Set(field.to_string(), value.into()));
        self
    }

    pub fn unset(mut self, field: &str) -> Self {
        self.ops.push(Op::Unset(field.to_string()));
        self
    }

    pub fn inc(mut self, field: &str, by: i64) -> Self {
        self.ops.push(Op::Inc(field.to_string(), by));
        self
    }

    pub fn push(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.ops.push(Op::Push(field.to_string(), value.into()));
        self
    }

    pub fn pull(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.ops.push(Op::Pull(field.to_string(), value.into()));
        self
    }

    /// Every key of the map becomes a `Set`.
    pub fn set_all(mut self, fields: Document) -> Self {
        for (k, v) in fields {
            self.ops.push(Op::Set(k, v));
        }
        self
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn ops_mut(&mut self) -> &mut Vec<Op> {
        &mut self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn apply(&self, doc: &mut Document) {
        for op in &self.ops {
            match op {
                Op::Set(f, v) => {
                    doc.insert(f.clone(), v.clone());
                }
                Op::Unset(f) => {
                    doc.remove(f);
                }
                Op::Inc(f, by) => {
                    let current = doc.get(f).and_then(Value::as_i64).unwrap_or(0);
                    doc.insert(f.clone(), Value::from(current + by));
                }
                Op::Push(f, v) => match doc.get_mut(f) {
                    Some(Value::Array(items)) => items.push(v.clone()),
                    _ => {
                        doc.insert(f.clone(), Value::Array(vec![v.clone()]));
                    }
                },
                Op::Pull(f, v) => {
                    if let Some(Value::Array(items)) = doc.get_mut(f) {
                        items.retain(|i| i != v);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operators_apply_in_order() {
        let mut doc = json!({"likesCount": 1, "likes": ["a"], "slug": "x"})
            .as_object()
            .cloned()
            .unwrap();
        Update::new()
            .inc("likesCount", 1)
            .push("likes", "b")
            .pull("likes", "a")
            .unset("slug")
            .set("name", "y")
            .apply(&mut doc);
        assert_eq!(doc["likesCount"], json!(2));
        assert_eq!(doc["likes"], json!(["b"]));
        assert!(doc.get("slug").is_none());
        assert_eq!(doc["name"], json!("y"));
    }

    #[test]
    fn push_creates_missing_array_and_inc_starts_at_zero() {
        let mut doc = Document::new();
        Update::new().push("likedMemes", "m").inc("views", 1).apply(&mut doc);
        assert_eq!(doc["likedMemes"], json!(["m"]));
        assert_eq!(doc["views"], json!(1));
    }
}
