use serde_json::{Number, Value};
use uuid::Uuid;

use super::{
    filter::{Condition, Filter},
    timestamp,
    update::{Op, Update},
    Document, StoreError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Bool,
    Uuid,
    Timestamp,
    Array(&'static FieldKind),
}

#[derive(Debug)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    pub unique: bool,
    /// Never leaves the store through raw reads.
    pub hidden: bool,
}

impl Field {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind, unique: false, hidden: false }
    }

    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub const fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// Static description of a collection: field kinds drive casting, the
/// validator runs on every document before it is written.
pub struct Schema {
    pub collection: &'static str,
    pub fields: &'static [Field],
    pub validate: fn(&Document) -> Result<(), StoreError>,
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

pub const VERSION_KEY: &str = "__v";

impl Schema {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn unique_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().filter(|f| f.unique).map(|f| f.name)
    }

    pub fn is_hidden(&self, name: &str) -> bool {
        self.field(name).map(|f| f.hidden).unwrap_or(false)
    }

    /// Casts every condition value to the declared field kind. Unknown fields pass through.
    pub fn cast_filter(&self, filter: Filter) -> Result<Filter, StoreError> {
        let mut out = Filter::new();
        for cond in filter.into_conditions() {
            let cast = match cond {
                Condition::Eq(f, v) => {
                    let v = self.cast_element(&f, v)?;
                    Condition::Eq(f, v)
                }
                Condition::Ne(f, v) => {
                    let v = self.cast_element(&f, v)?;
                    Condition::Ne(f, v)
                }
                Condition::Cmp(f, op, v) => {
                    let v = self.cast_element(&f, v)?;
                    Condition::Cmp(f, op, v)
                }
                Condition::In(f, vs) => {
                    let vs = vs
                        .into_iter()
                        .map(|v| self.cast_element(&f, v))
                        .collect::<Result<Vec<_>, _>>()?;
                    Condition::In(f, vs)
                }
            };
            out.push(cast);
        }
        Ok(out)
    }

    pub fn cast_update(&self, mut update: Update) -> Result<Update, StoreError> {
        for op in update.ops_mut().iter_mut() {
            match op {
                Op::Set(f, v) => {
                    let kind = self.field(f).map(|d| d.kind);
                    *v = match kind {
                        Some(kind) => cast(f, kind, std::mem::take(v))?,
                        None => std::mem::take(v),
                    };
                }
                Op::Push(f, v) | Op::Pull(f, v) => {
                    *v = self.cast_element(f, std::mem::take(v))?;
                }
                Op::Unset(_) | Op::Inc(_, _) => {}
            }
        }
        Ok(update)
    }

    /// Casts a value compared against a field; array fields compare element-wise.
    fn cast_element(&self, field: &str, value: Value) -> Result<Value, StoreError> {
        match self.field(field).map(|d| d.kind) {
            Some(FieldKind::Array(inner)) if !value.is_array() => cast(field, *inner, value),
            Some(kind) => cast(field, kind, value),
            None => Ok(value),
        }
    }

    /// Removes hidden fields and the revision counter.
    pub fn strip(&self, doc: &mut Document) {
        doc.remove(VERSION_KEY);
        for f in self.fields.iter().filter(|f| f.hidden) {
            doc.remove(f.name);
        }
    }
}

fn cast(field: &str, kind: FieldKind, value: Value) -> Result<Value, StoreError> {
    if value.is_null() {
        return Ok(value);
    }
    let fail = |v: &Value| StoreError::Cast {
        path: field.to_string(),
        value: match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    };
    match kind {
        FieldKind::String => match value {
            Value::String(_) => Ok(value),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(fail(&other)),
        },
        FieldKind::Number => match &value {
            Value::Number(_) => Ok(value),
            Value::String(s) => parse_number(s.trim()).ok_or_else(|| fail(&value)),
            _ => Err(fail(&value)),
        },
        FieldKind::Bool => match &value {
            Value::Bool(_) => Ok(value),
            Value::String(s) if s == "true" || s == "1" => Ok(Value::Bool(true)),
            Value::String(s) if s == "false" || s == "0" => Ok(Value::Bool(false)),
            _ => Err(fail(&value)),
        },
        FieldKind::Uuid => match &value {
            Value::String(s) => Uuid::parse_str(s.trim())
                .map(|id| Value::String(id.to_string()))
                .map_err(|_| fail(&value)),
            _ => Err(fail(&value)),
        },
        FieldKind::Timestamp => match &value {
            Value::String(s) => timestamp::normalize(s.trim())
                .map(Value::String)
                .ok_or_else(|| fail(&value)),
            _ => Err(fail(&value)),
        },
        FieldKind::Array(inner) => match value {
            Value::Array(items) => items
                .into_iter()
                .map(|i| cast(field, *inner, i))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            single => cast(field, *inner, single).map(|v| Value::Array(vec![v])),
        },
    }
}

fn parse_number(s: &str) -> Option<Value> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::from(i));
    }
    s.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}
