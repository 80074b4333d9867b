use serde_json::{Map, Value};

/// Keeps only the allowed keys of a client-supplied object.
pub fn filter_fields(input: &Map<String, Value>, allowed: &[&str]) -> Map<String, Value> {
    input
        .iter()
        .filter(|(k, _)| allowed.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn drops_everything_not_allowed() {
        let body = obj(json!({"name": "x", "role": "admin", "email": "a@b.c"}));
        let out = filter_fields(&body, &["name", "email", "avatar"]);
        assert_eq!(Value::Object(out), json!({"name": "x", "email": "a@b.c"}));
        assert_eq!(body.len(), 3);
    }

    #[test]
    fn is_idempotent() {
        let body = obj(json!({"content": "hi", "user": "u", "meme": "m"}));
        let once = filter_fields(&body, &["content"]);
        assert_eq!(filter_fields(&once, &["content"]), once);
        assert!(filter_fields(&body, &[]).is_empty());
    }
}
