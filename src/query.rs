//! Query filter language and result pipeline.
//!
//! A [`Filter`] is a tree of logical (`$or`/`$and`) and field-level
//! operators, evaluated against a [`Document`] with [`Filter::matches`].
//! [`Query`] wraps a filter with a sort/skip/limit pipeline applied to the
//! matching set.

use std::cmp::Ordering;

use regex::Regex;

use crate::error::{DbError, Result};
use crate::value::{get_path, Document, Value};

/// A single field-level predicate.
#[derive(Debug, Clone)]
pub enum FieldOp {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    Regex(String),
    Exists(bool),
    Between(Value, Value),
}

/// A filter tree: either a logical combinator over sub-filters, or a leaf
/// binding a dot-path field to an operator.
#[derive(Debug, Clone)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Field(String, FieldOp),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Filter::Field(field.into(), FieldOp::Eq(value))
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(doc)),
            Filter::Field(path, op) => match_field(doc, path, op),
        }
    }

    /// If this filter (or one branch of a top-level `$and`) is a bare
    /// equality or `$in` on a single field, return it — the collection's
    /// query planner uses this to try an index lookup before scanning.
    pub fn indexable_leaf(&self) -> Option<(&str, IndexCandidate)> {
        match self {
            Filter::Field(path, FieldOp::Eq(v)) => Some((path.as_str(), IndexCandidate::Eq(v))),
            Filter::Field(path, FieldOp::In(vs)) => Some((path.as_str(), IndexCandidate::In(vs))),
            Filter::And(filters) => filters.iter().find_map(Filter::indexable_leaf),
            _ => None,
        }
    }
}

pub enum IndexCandidate<'a> {
    Eq(&'a Value),
    In(&'a [Value]),
}

fn match_field(doc: &Document, path: &str, op: &FieldOp) -> bool {
    let actual = get_path(doc, path);
    match op {
        FieldOp::Exists(expected) => actual.is_some() == *expected,
        FieldOp::Eq(v) => actual == Some(v),
        FieldOp::Ne(v) => actual != Some(v),
        FieldOp::Gt(v) => actual.map(|a| a > v).unwrap_or(false),
        FieldOp::Gte(v) => actual.map(|a| a >= v).unwrap_or(false),
        FieldOp::Lt(v) => actual.map(|a| a < v).unwrap_or(false),
        FieldOp::Lte(v) => actual.map(|a| a <= v).unwrap_or(false),
        FieldOp::In(values) => actual.map(|a| values.contains(a)).unwrap_or(false),
        FieldOp::Nin(values) => actual.map(|a| !values.contains(a)).unwrap_or(true),
        FieldOp::Between(lo, hi) => actual.map(|a| a >= lo && a <= hi).unwrap_or(false),
        FieldOp::Contains(needle) => actual
            .and_then(Value::as_str)
            .map(|s| s.contains(needle.as_str()))
            .unwrap_or(false),
        FieldOp::StartsWith(prefix) => actual
            .and_then(Value::as_str)
            .map(|s| s.starts_with(prefix.as_str()))
            .unwrap_or(false),
        FieldOp::EndsWith(suffix) => actual
            .and_then(Value::as_str)
            .map(|s| s.ends_with(suffix.as_str()))
            .unwrap_or(false),
        FieldOp::Regex(pattern) => {
            // A precompiled Regex is a planner-level optimization left for
            // a caller who runs the same filter repeatedly; matched here
            // for correctness regardless of how often it's reused.
            match Regex::new(pattern) {
                Ok(re) => actual.and_then(Value::as_str).map(|s| re.is_match(s)).unwrap_or(false),
                Err(_) => false,
            }
        }
    }
}

/// Ascending/descending sort direction for one field in a [`Query`]'s sort
/// spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct Query {
    pub filter: Option<Filter>,
    pub sort: Vec<(String, SortDirection)>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            filter: None,
            sort: Vec::new(),
            skip: 0,
            limit: None,
        }
    }
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, dir: SortDirection) -> Self {
        self.sort.push((field.into(), dir));
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

    /// Apply this query's filter, sort, skip and limit to an already-owned
    /// vector of documents.
    pub fn apply(&self, mut docs: Vec<Document>) -> Vec<Document> {
        if let Some(filter) = &self.filter {
            docs.retain(|d| filter.matches(d));
        }

        if !self.sort.is_empty() {
            docs.sort_by(|a, b| {
                for (field, dir) in &self.sort {
                    let av = get_path(a, field);
                    let bv = get_path(b, field);
                    let ord = compare_optional(av, bv);
                    let ord = if *dir == SortDirection::Desc { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let docs: Vec<Document> = docs.into_iter().skip(self.skip).collect();
        match self.limit {
            Some(n) => docs.into_iter().take(n).collect(),
            None => docs,
        }
    }
}

/// Compare two optional values with the type-rank total order, treating a
/// missing field as sorting before every present value (consistent with
/// `null`'s rank).
fn compare_optional(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.cmp(b),
    }
}

/// Parse a MongoDB-shaped filter expressed as `serde_json::Value` into a
/// [`Filter`] tree. Top-level `$or`/`$and` keys introduce logical
/// combinators; every other key is a field path, whose value is either a
/// literal (bare equality) or an object of `$operator: value` pairs.
pub fn parse_filter(json: &serde_json::Value) -> Result<Filter> {
    let obj = json
        .as_object()
        .ok_or_else(|| DbError::validation("filter must be a JSON object"))?;

    let mut clauses = Vec::new();
    for (key, value) in obj {
        match key.as_str() {
            "$or" => {
                let items = value
                    .as_array()
                    .ok_or_else(|| DbError::validation("$or requires an array"))?;
                let parsed: Result<Vec<Filter>> = items.iter().map(parse_filter).collect();
                clauses.push(Filter::Or(parsed?));
            }
            "$and" => {
                let items = value
                    .as_array()
                    .ok_or_else(|| DbError::validation("$and requires an array"))?;
                let parsed: Result<Vec<Filter>> = items.iter().map(parse_filter).collect();
                clauses.push(Filter::And(parsed?));
            }
            field => clauses.push(parse_field_clause(field, value)?),
        }
    }

    Ok(match clauses.len() {
        1 => clauses.into_iter().next().unwrap(),
        _ => Filter::And(clauses),
    })
}

fn parse_field_clause(field: &str, value: &serde_json::Value) -> Result<Filter> {
    match value.as_object() {
        None => Ok(Filter::Field(
            field.to_string(),
            FieldOp::Eq(crate::value::Value::from_json(value.clone())),
        )),
        Some(ops) if ops.keys().all(|k| !k.starts_with('$')) => Ok(Filter::Field(
            field.to_string(),
            FieldOp::Eq(crate::value::Value::from_json(value.clone())),
        )),
        Some(ops) => {
            let mut combined = Vec::new();
            for (op, arg) in ops {
                combined.push(Filter::Field(field.to_string(), parse_op(op, arg)?));
            }
            Ok(match combined.len() {
                1 => combined.into_iter().next().unwrap(),
                _ => Filter::And(combined),
            })
        }
    }
}

fn parse_op(op: &str, arg: &serde_json::Value) -> Result<FieldOp> {
    use crate::value::Value as V;
    let v = || V::from_json(arg.clone());
    let str_arg = || {
        arg.as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| DbError::validation(format!("{} requires a string argument", op)))
    };
    let arr_arg = || {
        arg.as_array()
            .map(|a| a.iter().cloned().map(V::from_json).collect::<Vec<_>>())
            .ok_or_else(|| DbError::validation(format!("{} requires an array argument", op)))
    };

    Ok(match op {
        "$eq" => FieldOp::Eq(v()),
        "$ne" => FieldOp::Ne(v()),
        "$gt" => FieldOp::Gt(v()),
        "$gte" => FieldOp::Gte(v()),
        "$lt" => FieldOp::Lt(v()),
        "$lte" => FieldOp::Lte(v()),
        "$in" => FieldOp::In(arr_arg()?),
        "$nin" => FieldOp::Nin(arr_arg()?),
        "$contains" => FieldOp::Contains(str_arg()?),
        "$startsWith" => FieldOp::StartsWith(str_arg()?),
        "$endsWith" => FieldOp::EndsWith(str_arg()?),
        "$regex" => FieldOp::Regex(str_arg()?),
        "$exists" => FieldOp::Exists(arg.as_bool().unwrap_or(true)),
        "$between" => {
            let pair = arr_arg()?;
            if pair.len() != 2 {
                return Err(DbError::validation("$between requires a two-element array"));
            }
            let mut iter = pair.into_iter();
            FieldOp::Between(iter.next().unwrap(), iter.next().unwrap())
        }
        other => return Err(DbError::validation(format!("unknown operator '{}'", other))),
    })
}
