use serde_json::Value;

use super::QueryParams;
use crate::store::{
    schema::VERSION_KEY, CmpOp, Condition, Direction, Entity, Projection, ReadQuery, SortKey,
    StoreError,
};

/// Control parameters that never become data filters.
const RESERVED: [&str; 4] = ["page", "sort", "limit", "fields"];

const DEFAULT_SORT: &str = "name";
const DEFAULT_PAGE: u64 = 1;
const DEFAULT_LIMIT: u64 = 100;

/// Composes a read from untrusted query parameters. Each stage consumes the
/// builder, so a builder is used once and stages can run in any order.
#[derive(Debug)]
pub struct QueryFeatures {
    query: ReadQuery,
    params: QueryParams,
}

impl QueryFeatures {
    pub fn new(query: ReadQuery, params: QueryParams) -> Self {
        Self { query, params }
    }

    /// Builder over `T`'s collection. Hidden fields cannot be filtered or sorted on.
    pub fn for_entity<T: Entity>(query: ReadQuery, params: QueryParams) -> Result<Self, StoreError> {
        let sorted = params.get_str("sort").unwrap_or_default();
        let named = params
            .iter()
            .map(|(field, _)| field.as_str())
            .filter(|field| !RESERVED.contains(field))
            .chain(sorted.split(',').map(|f| f.trim().trim_start_matches('-')));
        for field in named {
            if T::SCHEMA.is_hidden(field) {
                return Err(StoreError::Cast {
                    path: "field".into(),
                    value: field.to_string(),
                });
            }
        }
        Ok(Self::new(query, params))
    }

    /// Equality and `gte|gt|lte|lt` range conditions, ANDed onto the base filter.
    pub fn filter(mut self) -> Self {
        for (field, value) in self.params.iter() {
            if RESERVED.contains(&field.as_str()) {
                continue;
            }
            match value {
                Value::Object(ops) if ops.keys().all(|k| CmpOp::from_keyword(k).is_some()) => {
                    for (op, bound) in ops {
                        if let Some(op) = CmpOp::from_keyword(op) {
                            self.query
                                .filter
                                .push(Condition::Cmp(field.clone(), op, bound.clone()));
                        }
                    }
                }
                Value::Array(values) => {
                    self.query
                        .filter
                        .push(Condition::In(field.clone(), values.clone()));
                }
                other => {
                    self.query
                        .filter
                        .push(Condition::Eq(field.clone(), other.clone()));
                }
            }
        }
        self
    }

    pub fn sort(mut self) -> Self {
        let raw = self
            .params
            .get_str("sort")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SORT.to_string());
        self.query.sort = raw
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty() && *f != "-")
            .map(|f| match f.strip_prefix('-') {
                Some(name) => SortKey { field: name.to_string(), direction: Direction::Desc },
                None => SortKey { field: f.to_string(), direction: Direction::Asc },
            })
            .collect();
        self
    }

    /// `fields=a,b` keeps only those fields; `fields=-a,-b` drops them.
    pub fn limit_fields(mut self) -> Self {
        let Some(raw) = self.params.get_str("fields") else {
            self.query.projection = Projection::default();
            return self;
        };
        let names: Vec<&str> = raw.split(',').map(str::trim).filter(|f| !f.is_empty()).collect();
        if names.is_empty() {
            self.query.projection = Projection::default();
        } else if names.iter().all(|f| f.starts_with('-')) {
            let mut excluded: Vec<String> =
                names.iter().map(|f| f.trim_start_matches('-').to_string()).collect();
            excluded.push(VERSION_KEY.to_string());
            self.query.projection = Projection::Exclude(excluded);
        } else {
            self.query.projection = Projection::Include(
                names
                    .iter()
                    .filter(|f| !f.starts_with('-'))
                    .map(|f| f.to_string())
                    .collect(),
            );
        }
        self
    }

    pub fn paginate(mut self) -> Self {
        let page = positive(self.params.get_str("page")).unwrap_or(DEFAULT_PAGE);
        let limit = positive(self.params.get_str("limit")).unwrap_or(DEFAULT_LIMIT);
        self.query.skip = (page - 1).saturating_mul(limit);
        self.query.limit = Some(limit);
        self
    }

    /// All four stages.
    pub fn apply_all(self) -> Self {
        self.filter().sort().limit_fields().paginate()
    }

    pub fn into_query(self) -> ReadQuery {
        self.query
    }
}

fn positive(raw: Option<String>) -> Option<u64> {
    raw?.trim().parse::<u64>().ok().filter(|n| *n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Filter;
    use serde_json::json;

    fn build(pairs: &[(&str, &str)]) -> ReadQuery {
        QueryFeatures::new(ReadQuery::default(), QueryParams::from_pairs(pairs.iter().copied()))
            .apply_all()
            .into_query()
    }

    #[test]
    fn reserved_keys_never_filter() {
        let q = build(&[("page", "2"), ("sort", "x"), ("limit", "3"), ("fields", "a")]);
        assert!(q.filter.is_empty());
    }

    #[test]
    fn range_operators_become_comparisons() {
        let q = build(&[("views[gte]", "5"), ("category", "Meme")]);
        assert!(q
            .filter
            .conditions()
            .contains(&Condition::Cmp("views".into(), CmpOp::Gte, json!("5"))));
        assert!(q
            .filter
            .conditions()
            .contains(&Condition::Eq("category".into(), json!("Meme"))));
    }

    #[test]
    fn unknown_operator_object_is_plain_equality() {
        let q = build(&[("views[where]", "1")]);
        assert_eq!(
            q.filter.conditions(),
            &[Condition::Eq("views".into(), json!({"where": "1"}))]
        );
    }

    #[test]
    fn base_filter_is_kept() {
        let q = QueryFeatures::new(
            ReadQuery::new(Filter::new().eq("meme", "m1")),
            QueryParams::from_pairs([("user", "u1")]),
        )
        .filter()
        .into_query();
        assert_eq!(q.filter.conditions().len(), 2);
        assert_eq!(q.filter.conditions()[0], Condition::Eq("meme".into(), json!("m1")));
    }

    #[test]
    fn sort_defaults_to_name_and_parses_descending() {
        assert_eq!(
            build(&[]).sort,
            vec![SortKey { field: "name".into(), direction: Direction::Asc }]
        );
        assert_eq!(
            build(&[("sort", "-views,name")]).sort,
            vec![
                SortKey { field: "views".into(), direction: Direction::Desc },
                SortKey { field: "name".into(), direction: Direction::Asc },
            ]
        );
    }

    #[test]
    fn projection_include_and_exclude() {
        assert_eq!(
            build(&[("fields", "name,origin")]).projection,
            Projection::Include(vec!["name".into(), "origin".into()])
        );
        assert_eq!(
            build(&[("fields", "-tags")]).projection,
            Projection::Exclude(vec!["tags".into(), VERSION_KEY.into()])
        );
        assert_eq!(build(&[]).projection, Projection::default());
    }

    #[test]
    fn hidden_fields_cannot_be_queried() {
        use crate::users::repo_types::User;

        let by_token = QueryParams::from_pairs([("passwordResetToken", "abc")]);
        let err = QueryFeatures::for_entity::<User>(ReadQuery::default(), by_token).unwrap_err();
        assert!(matches!(err, StoreError::Cast { ref value, .. } if value == "passwordResetToken"));

        let by_range = QueryParams::from_pairs([("passwordChangedAt[gte]", "2020-01-01")]);
        assert!(QueryFeatures::for_entity::<User>(ReadQuery::default(), by_range).is_err());

        let sorted = QueryParams::from_pairs([("sort", "name,-password")]);
        assert!(QueryFeatures::for_entity::<User>(ReadQuery::default(), sorted).is_err());

        let fine = QueryParams::from_pairs([("role", "admin"), ("sort", "-name")]);
        assert!(QueryFeatures::for_entity::<User>(ReadQuery::default(), fine).is_ok());
    }

    #[test]
    fn pagination_falls_back_on_garbage() {
        let q = build(&[("page", "3"), ("limit", "10")]);
        assert_eq!((q.skip, q.limit), (20, Some(10)));
        let q = build(&[("page", "abc"), ("limit", "0")]);
        assert_eq!((q.skip, q.limit), (0, Some(100)));
        let q = build(&[("page", "-2"), ("limit", "5")]);
        assert_eq!((q.skip, q.limit), (0, Some(5)));
    }
}
