//! DocumentStore port - 共有ドキュメントストアの抽象化
//!
//! The store is the only coordination medium between workers. It must offer
//! atomic single-document operations (`insert_if_absent`, `find_and_modify`,
//! conditional `remove`) and sorted queries; nothing here assumes a lock
//! manager.
//!
//! Documents are JSON objects keyed by a string `_id`.

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{Result, WardenError};

pub type Document = Map<String, Value>;

pub const ID_FIELD: &str = "_id";

/// A single field predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Equality. `Eq(Null)` also matches a missing field.
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
}

impl Condition {
    fn matches(&self, field: Option<&Value>) -> bool {
        let field = field.unwrap_or(&Value::Null);
        match self {
            Condition::Eq(expected) => values_equal(field, expected),
            Condition::Ne(expected) => !values_equal(field, expected),
            Condition::In(candidates) => candidates.iter().any(|c| values_equal(field, c)),
            Condition::Gt(bound) => ordered(field, bound, |o| o == Ordering::Greater),
            Condition::Gte(bound) => ordered(field, bound, |o| o != Ordering::Less),
            Condition::Lt(bound) => ordered(field, bound, |o| o == Ordering::Less),
            Condition::Lte(bound) => ordered(field, bound, |o| o != Ordering::Greater),
        }
    }
}

/// Range comparisons only apply between values of the same type class.
fn ordered(field: &Value, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    if field.is_null() || type_rank(field) != type_rank(bound) {
        return false;
    }
    accept(compare_values(field, bound))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    type_rank(a) == type_rank(b) && compare_values(a, b) == Ordering::Equal
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order over JSON values: null < number < string < object < array < bool.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y) {
                let ord = lk.cmp(rk).then_with(|| compare_values(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Conjunction of field predicates. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Condition)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self::all().eq(ID_FIELD, Value::String(id.into()))
    }

    pub fn with(mut self, field: impl Into<String>, condition: Condition) -> Self {
        self.clauses.push((field.into(), condition));
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Eq(value.into()))
    }

    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Ne(value.into()))
    }

    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Gt(value.into()))
    }

    pub fn gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Gte(value.into()))
    }

    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Lt(value.into()))
    }

    pub fn lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Lte(value.into()))
    }

    pub fn is_in(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.with(field, Condition::In(values))
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses
            .iter()
            .all(|(field, condition)| condition.matches(doc.get(field)))
    }
}

/// Field modifications applied atomically to one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    set: Document,
    inc: Vec<(String, i64)>,
    unset: Vec<String>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(field.into(), value.into());
        self
    }

    pub fn inc(mut self, field: impl Into<String>, by: i64) -> Self {
        self.inc.push((field.into(), by));
        self
    }

    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.unset.push(field.into());
        self
    }

    /// Applies `$set`, then `$inc`, then `$unset`. `_id` is immutable.
    pub fn apply(&self, doc: &mut Document) -> Result<()> {
        if self.set.contains_key(ID_FIELD) || self.unset.iter().any(|f| f == ID_FIELD) {
            return Err(WardenError::UnsupportedValue(vec![ID_FIELD.to_string()]));
        }
        for (field, value) in &self.set {
            doc.insert(field.clone(), value.clone());
        }
        for (field, by) in &self.inc {
            let next = match doc.get(field) {
                None | Some(Value::Null) => Value::from(*by),
                Some(Value::Number(n)) => match n.as_i64() {
                    Some(current) => Value::from(current.saturating_add(*by)),
                    None => Value::from(n.as_f64().unwrap_or_default() + *by as f64),
                },
                Some(_) => {
                    return Err(WardenError::Store(format!(
                        "cannot increment non-numeric field {field}"
                    )));
                }
            };
            doc.insert(field.clone(), next);
        }
        for field in &self.unset {
            doc.remove(field);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Filter + multi-key sort + skip/limit.
///
/// Without a sort the store returns documents in its natural order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    pub filter: Filter,
    pub sort: Vec<(String, SortOrder)>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl Criteria {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Compares two documents by the sort keys. Missing fields sort as null.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for (field, order) in &self.sort {
            let l = a.get(field).unwrap_or(&Value::Null);
            let r = b.get(field).unwrap_or(&Value::Null);
            let ord = match order {
                SortOrder::Ascending => compare_values(l, r),
                SortOrder::Descending => compare_values(r, l),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// Result of a query. Consumed once; re-run the query to start over.
#[derive(Debug)]
pub struct Cursor {
    docs: std::vec::IntoIter<Document>,
}

impl Cursor {
    pub fn new(docs: Vec<Document>) -> Self {
        Self {
            docs: docs.into_iter(),
        }
    }
}

impl Iterator for Cursor {
    type Item = Document;

    fn next(&mut self) -> Option<Document> {
        self.docs.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.docs.size_hint()
    }
}

impl ExactSizeIterator for Cursor {}

/// Outcome of `insert_if_absent`.
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted {
    /// The stored document: the new one, or the one that was already there.
    pub document: Document,
    pub inserted: bool,
}

/// DocumentStore は共有ストアへのアクセスを提供
///
/// # Atomicity
/// - 各メソッドは 1 ドキュメント単位で atomic
/// - `update` / `remove` は複数件に作用するが、件ごとの atomic のみ保証
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>>;

    /// Fails with `DuplicateResource` when the `_id` is taken.
    async fn insert(&self, collection: &str, doc: Document) -> Result<()>;

    /// Inserts unless a document with the same `_id` exists.
    async fn insert_if_absent(&self, collection: &str, doc: Document) -> Result<Upserted>;

    /// Applies `update` to every match; returns the number modified.
    async fn update(&self, collection: &str, filter: &Filter, update: &Update) -> Result<u64>;

    /// Atomically updates the first match (natural order) and returns it as
    /// modified, or `None` when nothing matched.
    async fn find_and_modify(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<Option<Document>>;

    /// Removes every match; returns the number removed.
    async fn remove(&self, collection: &str, filter: &Filter) -> Result<u64>;

    async fn query(&self, collection: &str, criteria: &Criteria) -> Result<Cursor>;

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64>;

    /// Inserts or fully replaces the document with the same `_id`.
    async fn save(&self, collection: &str, doc: Document) -> Result<()>;
}

pub fn document_id(doc: &Document) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}

/// Serializes a record into its stored form.
pub fn to_document<T: Serialize>(record: &T) -> Result<Document> {
    match serde_json::to_value(record)? {
        Value::Object(doc) => Ok(doc),
        other => Err(WardenError::Store(format!(
            "record serialized to a non-object value: {other}"
        ))),
    }
}

/// Rebuilds a record from its stored form.
pub fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn null_equality_matches_missing_and_null() {
        let filter = Filter::all().eq("missing_since", Value::Null);

        assert!(filter.matches(&doc(json!({"_id": "a"}))));
        assert!(filter.matches(&doc(json!({"_id": "a", "missing_since": null}))));
        assert!(!filter.matches(&doc(json!({"_id": "a", "missing_since": "2024-01-01T00:00:00Z"}))));
    }

    #[rstest]
    #[case(Condition::Gt(json!(0)), json!(1), true)]
    #[case(Condition::Gt(json!(0)), json!(0), false)]
    #[case(Condition::Gte(json!(0)), json!(0), true)]
    #[case(Condition::Lt(json!(5)), json!(4.5), true)]
    #[case(Condition::Lte(json!("b")), json!("a"), true)]
    #[case(Condition::Gt(json!(0)), json!("1"), false)]
    #[case(Condition::Ne(json!("q")), json!("r"), true)]
    #[case(Condition::In(vec![json!("a"), json!("b")]), json!("b"), true)]
    #[case(Condition::In(vec![json!("a")]), json!("c"), false)]
    fn conditions(#[case] condition: Condition, #[case] value: Value, #[case] expected: bool) {
        let filter = Filter::all().with("f", condition);

        assert_eq!(filter.matches(&doc(json!({"f": value}))), expected);
    }

    #[test]
    fn range_conditions_never_match_missing_fields() {
        let filter = Filter::all().lt("count", 10);

        assert!(!filter.matches(&doc(json!({"_id": "a"}))));
    }

    #[test]
    fn update_sets_increments_and_unsets() {
        let mut d = doc(json!({"_id": "q", "n": 2, "gone": true}));
        Update::new()
            .set("name", "worker")
            .inc("n", -1)
            .inc("fresh", 1)
            .unset("gone")
            .apply(&mut d)
            .unwrap();

        assert_eq!(
            Value::Object(d),
            json!({"_id": "q", "n": 1, "fresh": 1, "name": "worker"})
        );
    }

    #[test]
    fn update_refuses_to_touch_id_or_increment_text() {
        let mut d = doc(json!({"_id": "q", "label": "x"}));

        assert!(Update::new().set(ID_FIELD, "other").apply(&mut d).is_err());
        assert!(Update::new().inc("label", 1).apply(&mut d).is_err());
    }

    #[test]
    fn criteria_sorts_by_multiple_keys() {
        let criteria = Criteria::new(Filter::all())
            .sort_by("load", SortOrder::Ascending)
            .sort_by("name", SortOrder::Descending);
        let a = doc(json!({"load": 1, "name": "a"}));
        let b = doc(json!({"load": 1, "name": "b"}));
        let c = doc(json!({"load": 0, "name": "z"}));

        assert_eq!(criteria.compare(&a, &b), Ordering::Greater);
        assert_eq!(criteria.compare(&c, &a), Ordering::Less);
    }

    #[test]
    fn value_order_is_total_across_types() {
        let mut values = vec![json!(true), json!("s"), json!(null), json!([1]), json!(3), json!({"k": 1})];
        values.sort_by(compare_values);

        assert_eq!(
            values,
            vec![json!(null), json!(3), json!("s"), json!({"k": 1}), json!([1]), json!(true)]
        );
    }
}
