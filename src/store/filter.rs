use std::cmp::Ordering;

use serde_json::Value;
use uuid::Uuid;

use super::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CmpOp {
    /// Maps the query-string operator keywords onto comparison operators.
    pub fn from_keyword(key: &str) -> Option<Self> {
        match key {
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            _ => None,
        }
    }

    pub fn to_sql(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }

    fn holds(self, ord: Ordering) -> bool {
        match self {
            Self::Gt => ord == Ordering::Greater,
            Self::Gte => ord != Ordering::Less,
            Self::Lt => ord == Ordering::Less,
            Self::Lte => ord != Ordering::Greater,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Equality; an array field matches when it contains the value.
    Eq(String, Value),
    Ne(String, Value),
    Cmp(String, CmpOp, Value),
    In(String, Vec<Value>),
}

impl Condition {
    pub fn field(&self) -> &str {
        match self {
            Self::Eq(f, _) | Self::Ne(f, _) | Self::Cmp(f, _, _) | Self::In(f, _) => f,
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        let current = doc.get(self.field()).unwrap_or(&Value::Null);
        match self {
            Self::Eq(_, v) => equals(current, v),
            Self::Ne(_, v) => !equals(current, v),
            Self::Cmp(_, op, v) => {
                // Comparisons only hold between values of the same kind.
                if rank(current) != rank(v) || current.is_null() {
                    return false;
                }
                op.holds(compare(current, v))
            }
            Self::In(_, values) => values.iter().any(|v| equals(current, v)),
        }
    }
}

/// A conjunction of conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: Uuid) -> Self {
        Self::new().eq("id", Value::String(id.to_string()))
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq(field.to_string(), value.into()));
        self
    }

    pub fn ne(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Ne(field.to_string(), value.into()));
        self
    }

    pub fn cmp(mut self, field: &str, op: CmpOp, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Cmp(field.to_string(), op, value.into()));
        self
    }

    pub fn is_in(mut self, field: &str, values: Vec<Value>) -> Self {
        self.conditions.push(Condition::In(field.to_string(), values));
        self
    }

    pub fn push(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    pub fn and(mut self, other: Filter) -> Self {
        self.conditions.extend(other.conditions);
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn into_conditions(self) -> Vec<Condition> {
        self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions.iter().all(|c| c.matches(doc))
    }
}

fn equals(current: &Value, expected: &Value) -> bool {
    if current == expected {
        return true;
    }
    match current {
        Value::Array(items) if !expected.is_array() => items.iter().any(|i| i == expected),
        Value::Number(a) => match (a.as_f64(), expected.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        _ => false,
    }
}

/// Type rank following Postgres jsonb ordering: null < string < number < bool < array < object.
fn rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::String(_) => 1,
        Value::Number(_) => 2,
        Value::Bool(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values, used by sorting and range conditions.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .unwrap_or_default()
            .partial_cmp(&b.as_f64().unwrap_or_default())
            .unwrap_or(Ordering::Equal),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => a.len().cmp(&b.len()).then_with(|| {
            a.iter()
                .zip(b)
                .map(|(x, y)| compare(x, y))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        }),
        _ => rank(a).cmp(&rank(b)),
    }
}
