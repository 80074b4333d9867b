use serde::Deserialize;
use serde_json::{Map, Value};

pub const CREATE_FIELDS: &[&str] = &["name", "description", "category", "tags", "origin", "images"];
pub const UPDATE_FIELDS: &[&str] = &["category", "tags", "name", "description", "origin", "images"];

pub const MAX_IMAGES: usize = 5;

pub const LIST_LIMIT: &str = "15";
pub const LIST_SORT: &str = "-createdAt,-views,-likesCount,name,id";

pub const TRENDING_LIMIT: &str = "5";
pub const TRENDING_SORT: &str = "-views";
pub const TRENDING_FIELDS: &str = "name,origin,views";

/// Owner as shown on meme reads.
pub const OWNER_FIELDS: &[&str] = &["name", "pseudo", "avatar"];
/// Likers and comment authors.
pub const PROFILE_FIELDS: &[&str] = &["name", "avatar"];

#[derive(Debug, Deserialize)]
pub struct CreateMemeRequest {
    #[serde(default)]
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub origin: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

/// Multipart bodies send a single `tags` or `images` part as a plain string.
pub fn listify(fields: &mut Map<String, Value>, keys: &[&str]) {
    for key in keys {
        if let Some(value) = fields.get_mut(*key) {
            if value.is_string() {
                let single = std::mem::take(value);
                *value = Value::Array(vec![single]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn listify_wraps_single_strings_only() {
        let mut fields = json!({"tags": "dog", "images": ["a", "b"], "name": "x"})
            .as_object()
            .unwrap()
            .clone();
        listify(&mut fields, &["tags", "images"]);
        assert_eq!(fields["tags"], json!(["dog"]));
        assert_eq!(fields["images"], json!(["a", "b"]));
        assert_eq!(fields["name"], "x");
    }
}
