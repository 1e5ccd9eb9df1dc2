//! Filter, projection and sort evaluation over BSON documents, used by the
//! in-memory store.

use bson::{Bson, Document};
use std::cmp::Ordering;

use crate::errors::GatewayError;

// Safety limits to prevent resource abuse
const MAX_PATH_DEPTH: usize = 32;
const MAX_IN_SET: usize = 1000;
const MAX_SORT_FIELDS: usize = 32;
const MAX_FILTER_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone)]
pub enum Filter {
    True,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    Not(Box<Filter>),
    Exists { path: String, exists: bool },
    In { path: String, values: Vec<Bson> },
    Nin { path: String, values: Vec<Bson> },
    Cmp { path: String, op: CmpOp, value: Bson },
    Regex { path: String, regex: regex::Regex },
}

fn unsupported(what: impl std::fmt::Display) -> GatewayError {
    GatewayError::Execution(format!("{what} is not supported by the in-memory store"))
}

fn bad_filter(what: impl std::fmt::Display) -> GatewayError {
    GatewayError::Execution(format!("invalid filter: {what}"))
}

/// Compiles a Mongo-style filter document.
///
/// # Errors
/// Returns an execution error for malformed or unsupported operators.
pub fn compile_filter(doc: &Document) -> Result<Filter, GatewayError> {
    compile_at(doc, 0)
}

fn compile_at(doc: &Document, depth: usize) -> Result<Filter, GatewayError> {
    if depth > MAX_FILTER_DEPTH {
        return Err(bad_filter("nested too deeply"));
    }
    let mut clauses = Vec::with_capacity(doc.len());
    for (key, value) in doc {
        match key.as_str() {
            "$and" | "$or" | "$nor" => {
                let Bson::Array(items) = value else {
                    return Err(bad_filter(format!("{key} expects an array")));
                };
                if items.is_empty() {
                    return Err(bad_filter(format!("{key} expects a non-empty array")));
                }
                let subs = items
                    .iter()
                    .map(|item| match item {
                        Bson::Document(d) => compile_at(d, depth + 1),
                        _ => Err(bad_filter(format!("{key} entries must be documents"))),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                clauses.push(match key.as_str() {
                    "$and" => Filter::And(subs),
                    "$or" => Filter::Or(subs),
                    _ => Filter::Nor(subs),
                });
            }
            k if k.starts_with('$') => return Err(unsupported(format!("top-level operator {k}"))),
            path => clauses.push(compile_field(path, value, depth)?),
        }
    }
    Ok(match clauses.len() {
        0 => Filter::True,
        1 => clauses.remove(0),
        _ => Filter::And(clauses),
    })
}

fn is_operator_doc(value: &Bson) -> bool {
    matches!(value, Bson::Document(d) if d.keys().next().is_some_and(|k| k.starts_with('$')))
}

fn compile_field(path: &str, value: &Bson, depth: usize) -> Result<Filter, GatewayError> {
    if path.split('.').count() > MAX_PATH_DEPTH {
        return Err(bad_filter(format!("path '{path}' is too deep")));
    }
    match value {
        Bson::RegularExpression(re) => Ok(Filter::Regex {
            path: path.to_string(),
            regex: build_regex(&re.pattern, &re.options)?,
        }),
        Bson::Document(ops) if is_operator_doc(value) => compile_operators(path, ops, depth),
        other => Ok(Filter::Cmp { path: path.to_string(), op: CmpOp::Eq, value: other.clone() }),
    }
}

fn compile_operators(path: &str, ops: &Document, depth: usize) -> Result<Filter, GatewayError> {
    let mut clauses = Vec::new();
    let options = match ops.get("$options") {
        Some(Bson::String(o)) => o.as_str(),
        Some(_) => return Err(bad_filter("$options must be a string")),
        None => "",
    };
    for (op, arg) in ops {
        let p = path.to_string();
        let clause = match op.as_str() {
            "$eq" => Filter::Cmp { path: p, op: CmpOp::Eq, value: arg.clone() },
            "$ne" => Filter::Cmp { path: p, op: CmpOp::Ne, value: arg.clone() },
            "$gt" => Filter::Cmp { path: p, op: CmpOp::Gt, value: arg.clone() },
            "$gte" => Filter::Cmp { path: p, op: CmpOp::Gte, value: arg.clone() },
            "$lt" => Filter::Cmp { path: p, op: CmpOp::Lt, value: arg.clone() },
            "$lte" => Filter::Cmp { path: p, op: CmpOp::Lte, value: arg.clone() },
            "$in" | "$nin" => {
                let Bson::Array(values) = arg else {
                    return Err(bad_filter(format!("{op} expects an array")));
                };
                let values: Vec<Bson> = values.iter().take(MAX_IN_SET).cloned().collect();
                if op == "$in" { Filter::In { path: p, values } } else { Filter::Nin { path: p, values } }
            }
            "$exists" => Filter::Exists { path: p, exists: truthy(arg) },
            "$regex" => {
                let regex = match arg {
                    Bson::String(pattern) => build_regex(pattern, options)?,
                    Bson::RegularExpression(re) => {
                        let opts = if options.is_empty() { re.options.as_str() } else { options };
                        build_regex(&re.pattern, opts)?
                    }
                    _ => return Err(bad_filter("$regex expects a string or regular expression")),
                };
                Filter::Regex { path: p, regex }
            }
            "$options" => continue,
            "$not" => {
                let inner = match arg {
                    Bson::Document(d) if is_operator_doc(arg) => compile_operators(path, d, depth + 1)?,
                    Bson::RegularExpression(re) => {
                        Filter::Regex { path: p, regex: build_regex(&re.pattern, &re.options)? }
                    }
                    _ => return Err(bad_filter("$not expects an operator document or regex")),
                };
                Filter::Not(Box::new(inner))
            }
            other => return Err(unsupported(format!("operator {other}"))),
        };
        clauses.push(clause);
    }
    Ok(match clauses.len() {
        0 => Filter::True,
        1 => clauses.remove(0),
        _ => Filter::And(clauses),
    })
}

fn build_regex(pattern: &str, options: &str) -> Result<regex::Regex, GatewayError> {
    let mut b = regex::RegexBuilder::new(pattern);
    for o in options.chars() {
        match o {
            'i' => b.case_insensitive(true),
            'm' => b.multi_line(true),
            's' => b.dot_matches_new_line(true),
            'x' => b.ignore_whitespace(true),
            'u' => b.unicode(true),
            other => return Err(bad_filter(format!("unknown regex option '{other}'"))),
        };
    }
    b.build().map_err(|e| bad_filter(format!("invalid regex: {e}")))
}

/// Truthiness as used by `$exists` and projection specs.
#[must_use]
pub fn truthy(v: &Bson) -> bool {
    match v {
        Bson::Boolean(b) => *b,
        Bson::Int32(i) => *i != 0,
        Bson::Int64(i) => *i != 0,
        Bson::Double(d) => *d != 0.0,
        Bson::Null | Bson::Undefined => false,
        _ => true,
    }
}

pub fn eval_filter(doc: &Document, filter: &Filter) -> bool {
    match filter {
        Filter::True => true,
        Filter::And(fs) => fs.iter().all(|f| eval_filter(doc, f)),
        Filter::Or(fs) => fs.iter().any(|f| eval_filter(doc, f)),
        Filter::Nor(fs) => !fs.iter().any(|f| eval_filter(doc, f)),
        Filter::Not(f) => !eval_filter(doc, f),
        Filter::Exists { path, exists } => get_path(doc, path).is_some() == *exists,
        Filter::In { path, values } => matches_any(get_path(doc, path), |v| is_in_set(v, values)),
        Filter::Nin { path, values } => !matches_any(get_path(doc, path), |v| is_in_set(v, values)),
        Filter::Cmp { path, op: CmpOp::Ne, value } => {
            !matches_any(get_path(doc, path), |v| bson_eq(v, value))
        }
        Filter::Cmp { path, op, value } => {
            if matches!(op, CmpOp::Eq) && matches!(value, Bson::Null) && get_path(doc, path).is_none() {
                return true;
            }
            matches_any(get_path(doc, path), |v| cmp_matches(v, *op, value))
        }
        Filter::Regex { path, regex } => matches_any(get_path(doc, path), |v| match v {
            Bson::String(s) => regex.is_match(s),
            _ => false,
        }),
    }
}

/// Applies `pred` to a field value, or to each element when the value is an array.
fn matches_any(v: Option<&Bson>, pred: impl Fn(&Bson) -> bool) -> bool {
    match v {
        None => false,
        Some(v @ Bson::Array(items)) => pred(v) || items.iter().any(&pred),
        Some(v) => pred(v),
    }
}

fn cmp_matches(v: &Bson, op: CmpOp, value: &Bson) -> bool {
    match op {
        CmpOp::Eq => bson_eq(v, value),
        CmpOp::Ne => !bson_eq(v, value),
        // range operators only compare within the same type bracket
        _ if !comparable(v, value) => false,
        CmpOp::Gt => compare_bson(v, value) == Ordering::Greater,
        CmpOp::Gte => compare_bson(v, value) != Ordering::Less,
        CmpOp::Lt => compare_bson(v, value) == Ordering::Less,
        CmpOp::Lte => compare_bson(v, value) != Ordering::Greater,
    }
}

fn comparable(a: &Bson, b: &Bson) -> bool {
    (is_num(a) && is_num(b)) || type_rank(a) == type_rank(b)
}

fn is_in_set(v: &Bson, set: &[Bson]) -> bool {
    set.iter().take(MAX_IN_SET).any(|x| match x {
        Bson::RegularExpression(re) => match (v, build_regex(&re.pattern, &re.options)) {
            (Bson::String(s), Ok(r)) => r.is_match(s),
            _ => false,
        },
        x => bson_eq(v, x),
    })
}

/// Equality with numeric values compared by magnitude, so `1 == 1.0`.
#[must_use]
pub fn bson_eq(a: &Bson, b: &Bson) -> bool {
    if is_num(a) && is_num(b) {
        return compare_bson(a, b) == Ordering::Equal;
    }
    a == b
}

pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    if path.is_empty() || path.len() > 1024 {
        return None;
    }
    let mut parts = path.split('.');
    let mut cur = doc.get(parts.next()?)?;
    for (segs, part) in parts.enumerate() {
        if segs + 1 >= MAX_PATH_DEPTH {
            return None;
        }
        cur = match cur {
            Bson::Document(d) => d.get(part)?,
            Bson::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

fn is_num(x: &Bson) -> bool {
    matches!(x, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_))
}

pub fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    use bson::Bson as T;
    #[allow(clippy::cast_precision_loss)]
    fn as_f64_num(x: &T) -> f64 {
        match x {
            T::Int32(i) => f64::from(*i),
            T::Int64(i) => *i as f64,
            T::Double(f) => *f,
            T::Decimal128(d) => d.to_string().parse::<f64>().unwrap_or(f64::NAN),
            _ => f64::NAN,
        }
    }
    if is_num(a) && is_num(b) {
        return as_f64_num(a).total_cmp(&as_f64_num(b));
    }
    match (a, b) {
        (T::String(x), T::String(y)) => x.cmp(y),
        (T::Boolean(x), T::Boolean(y)) => x.cmp(y),
        (T::DateTime(x), T::DateTime(y)) => x.cmp(y),
        (T::ObjectId(x), T::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (T::Array(x), T::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_bson(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

// Cross-type sort order used by the server.
fn type_rank(v: &Bson) -> u8 {
    use bson::Bson as T;
    match v {
        T::MinKey => 0,
        T::Null | T::Undefined => 1,
        T::Int32(_) | T::Int64(_) | T::Double(_) | T::Decimal128(_) => 2,
        T::Symbol(_) | T::String(_) => 3,
        T::Document(_) => 4,
        T::Array(_) => 5,
        T::Binary(_) => 6,
        T::ObjectId(_) => 7,
        T::Boolean(_) => 8,
        T::DateTime(_) => 9,
        T::Timestamp(_) => 10,
        T::RegularExpression(_) => 11,
        T::DbPointer(_) => 12,
        T::JavaScriptCode(_) | T::JavaScriptCodeWithScope(_) => 13,
        T::MaxKey => 255,
    }
}

/// Direction of each key in a `{field: 1 | -1}` sort document.
///
/// # Errors
/// Returns an execution error for directions other than `1` and `-1`.
pub fn sort_keys(sort: &Document) -> Result<Vec<(String, bool)>, GatewayError> {
    sort.iter()
        .take(MAX_SORT_FIELDS)
        .map(|(k, v)| match v {
            Bson::Int32(1) | Bson::Int64(1) => Ok((k.clone(), true)),
            Bson::Int32(-1) | Bson::Int64(-1) => Ok((k.clone(), false)),
            Bson::Double(d) if *d == 1.0 => Ok((k.clone(), true)),
            Bson::Double(d) if *d == -1.0 => Ok((k.clone(), false)),
            _ => Err(GatewayError::Execution(format!("invalid sort direction for '{k}'"))),
        })
        .collect()
}

pub fn compare_docs(a: &Document, b: &Document, keys: &[(String, bool)]) -> Ordering {
    for (field, ascending) in keys {
        let ord = match (get_path(a, field), get_path(b, field)) {
            (Some(x), Some(y)) => compare_bson(x, y),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return if *ascending { ord } else { ord.reverse() };
        }
    }
    Ordering::Equal
}

/// A compiled projection document.
#[derive(Debug, Clone)]
pub struct Projection {
    fields: Vec<String>,
    include: bool,
    keep_id: bool,
}

impl Projection {
    /// Compiles `{field: 1, ...}` (inclusion) or `{field: 0, ...}` (exclusion).
    ///
    /// # Errors
    /// Returns an execution error when inclusion and exclusion are mixed, or for
    /// expression projections.
    pub fn compile(spec: &Document) -> Result<Self, GatewayError> {
        let mut include: Option<bool> = None;
        let mut keep_id = true;
        let mut fields = Vec::new();
        for (k, v) in spec {
            if matches!(v, Bson::Document(_) | Bson::String(_) | Bson::Array(_)) {
                return Err(unsupported(format!("projection expression for '{k}'")));
            }
            let on = truthy(v);
            if k == "_id" {
                keep_id = on;
                continue;
            }
            match include {
                None => include = Some(on),
                Some(mode) if mode != on => {
                    return Err(GatewayError::Execution(format!(
                        "Cannot do {} on field {k} in {} projection",
                        if on { "inclusion" } else { "exclusion" },
                        if mode { "inclusion" } else { "exclusion" },
                    )));
                }
                Some(_) => {}
            }
            fields.push(k.clone());
        }
        // `{_id: 1}` on its own selects only `_id`
        let include = include.unwrap_or(keep_id && spec.contains_key("_id"));
        Ok(Self { fields, include, keep_id })
    }

    #[must_use]
    pub fn apply(&self, doc: &Document) -> Document {
        if self.include {
            let mut out = Document::new();
            if self.keep_id {
                if let Some(id) = doc.get("_id") {
                    out.insert("_id", id.clone());
                }
            }
            for f in &self.fields {
                if let Some(v) = get_path(doc, f) {
                    set_path(&mut out, f, v.clone());
                }
            }
            out
        } else {
            let mut out = doc.clone();
            if !self.keep_id {
                out.remove("_id");
            }
            for f in &self.fields {
                remove_path(&mut out, f);
            }
            out
        }
    }
}

fn set_path(doc: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(doc.get(head), Some(Bson::Document(_))) {
                doc.insert(head, Document::new());
            }
            if let Some(Bson::Document(child)) = doc.get_mut(head) {
                set_path(child, rest, value);
            }
        }
    }
}

fn remove_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(child)) = doc.get_mut(head) {
                remove_path(child, rest);
            }
        }
    }
}
