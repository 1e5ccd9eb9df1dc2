use bson::{Bson, Document};
use once_cell::sync::Lazy;
use regex::Regex;

use super::literal::parse_arguments;
use super::types::{
    CURSOR_MODIFIERS, CallSegment, FindSpec, Invocation, JsonDescriptor, QueryShape,
    SUPPORTED_METHODS,
};
use crate::errors::GatewayError;
use crate::utils::json::json_value_to_bson_document;

static DB_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^db\.(\w+)\.(.*)$").expect("db prefix pattern is valid"));

/// Trims the query and removes a single trailing statement terminator.
#[must_use]
pub fn strip_terminator(text: &str) -> &str {
    let t = text.trim();
    t.strip_suffix(';').unwrap_or(t).trim_end()
}

/// Classifies a raw query string without interpreting its arguments.
#[must_use]
pub fn classify(text: &str) -> QueryShape {
    let clean = strip_terminator(text);
    if let Some(caps) = DB_PREFIX.captures(clean) {
        return QueryShape::MethodCall { collection: caps[1].to_string(), rest: caps[2].to_string() };
    }
    // serde would also accept a JSON array for the struct
    if !clean.starts_with('{') {
        return QueryShape::Unrecognized;
    }
    match serde_json::from_str::<JsonDescriptor>(clean) {
        Ok(descriptor) => QueryShape::Descriptor(descriptor),
        Err(_) => QueryShape::Unrecognized,
    }
}

/// Interprets a raw query string into an executable invocation.
///
/// JSON descriptors always target `default_collection`.
///
/// # Errors
/// Returns a classification error describing why the query cannot run.
pub fn interpret(text: &str, default_collection: &str) -> Result<Invocation, GatewayError> {
    match classify(text) {
        QueryShape::MethodCall { collection, rest } => {
            let chain = split_call_chain(&rest).ok_or(GatewayError::InvalidMethodCall)?;
            method_invocation(collection, chain)
        }
        QueryShape::Descriptor(descriptor) => descriptor_invocation(descriptor, default_collection),
        QueryShape::Unrecognized => Err(GatewayError::Syntax),
    }
}

/// Splits `find({...}).sort({...}).limit(3)` into its `name(args)` segments.
///
/// Returns `None` when the text is not a well-formed call chain.
#[must_use]
pub fn split_call_chain(text: &str) -> Option<Vec<CallSegment>> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut i = 0;
    let mut out = Vec::new();
    loop {
        let name_start = i;
        while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_') {
            i += 1;
        }
        if i == name_start {
            return None;
        }
        let method = slice(text, &chars, name_start, i).to_string();
        i = skip_ws(&chars, i);
        if chars.get(i).map(|c| c.1) != Some('(') {
            return None;
        }
        let close = matching_paren(&chars, i)?;
        let args = slice(text, &chars, i + 1, close).trim().to_string();
        out.push(CallSegment { method, args });
        i = skip_ws(&chars, close + 1);
        match chars.get(i).map(|c| c.1) {
            None => return Some(out),
            Some('.') => i = skip_ws(&chars, i + 1),
            Some(_) => return None,
        }
    }
}

fn slice<'t>(text: &'t str, chars: &[(usize, char)], from: usize, to: usize) -> &'t str {
    let start = chars.get(from).map_or(text.len(), |c| c.0);
    let end = chars.get(to).map_or(text.len(), |c| c.0);
    &text[start..end]
}

fn skip_ws(chars: &[(usize, char)], mut i: usize) -> usize {
    while i < chars.len() && chars[i].1.is_whitespace() {
        i += 1;
    }
    i
}

/// Index of the `)` closing the `(` at `open`, skipping strings and regex literals.
fn matching_paren(chars: &[(usize, char)], open: usize) -> Option<usize> {
    let mut stack: Vec<char> = Vec::new();
    let mut prev_significant = '(';
    let mut i = open;
    while i < chars.len() {
        let c = chars[i].1;
        match c {
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop()? != expected {
                    return None;
                }
                if stack.is_empty() {
                    return Some(i);
                }
            }
            '"' | '\'' => i = skip_quoted(chars, i, c)?,
            // comments are whitespace and leave `prev_significant` alone
            '/' if matches!(chars.get(i + 1).map(|c| c.1), Some('/' | '*')) => {
                i = skip_comment(chars, i)? + 1;
                continue;
            }
            '/' if matches!(prev_significant, '(' | ',' | ':' | '[') => i = skip_quoted(chars, i, '/')?,
            _ => {}
        }
        if !c.is_whitespace() {
            prev_significant = c;
        }
        i += 1;
    }
    None
}

fn skip_quoted(chars: &[(usize, char)], start: usize, quote: char) -> Option<usize> {
    let mut i = start + 1;
    let mut in_class = false;
    while i < chars.len() {
        match chars[i].1 {
            '\\' => i += 1,
            '[' if quote == '/' => in_class = true,
            ']' if quote == '/' => in_class = false,
            c if c == quote && !in_class => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

fn skip_comment(chars: &[(usize, char)], start: usize) -> Option<usize> {
    let block = chars.get(start + 1).map(|c| c.1) == Some('*');
    let mut i = start + 2;
    while i < chars.len() {
        if block {
            if chars[i].1 == '*' && chars.get(i + 1).map(|c| c.1) == Some('/') {
                return Some(i + 1);
            }
        } else if chars[i].1 == '\n' {
            return Some(i);
        }
        i += 1;
    }
    if block { None } else { Some(chars.len() - 1) }
}

fn method_invocation(
    collection: String,
    chain: Vec<CallSegment>,
) -> Result<Invocation, GatewayError> {
    let mut segments = chain.into_iter();
    let head = segments.next().ok_or(GatewayError::InvalidMethodCall)?;
    let modifiers: Vec<CallSegment> = segments.collect();
    let args = arguments(&head)?;

    if head.method != "find" {
        if let Some(m) = modifiers.first() {
            return Err(GatewayError::UnsupportedOperation(format!(
                "cursor modifier '{}' can only follow find()",
                m.method
            )));
        }
    }

    match head.method.as_str() {
        "find" => {
            at_most(&head, &args, 2)?;
            let mut spec = FindSpec::new(collection);
            spec.filter = document_arg(&head, &args, 0)?.unwrap_or_default();
            spec.projection = document_arg(&head, &args, 1)?.filter(|p| !p.is_empty());
            for m in &modifiers {
                apply_modifier(&mut spec, m)?;
            }
            Ok(Invocation::Find(spec))
        }
        "findOne" => {
            at_most(&head, &args, 2)?;
            Ok(Invocation::FindOne {
                collection,
                filter: document_arg(&head, &args, 0)?.unwrap_or_default(),
                projection: document_arg(&head, &args, 1)?.filter(|p| !p.is_empty()),
            })
        }
        "aggregate" => {
            at_most(&head, &args, 2)?;
            let pipeline = match args.first() {
                None | Some(Bson::Null) => Vec::new(),
                Some(Bson::Array(stages)) => stages
                    .iter()
                    .map(|s| match s {
                        Bson::Document(d) => Ok(d.clone()),
                        _ => Err(GatewayError::InvalidArguments(
                            "aggregate pipeline stages must be documents".into(),
                        )),
                    })
                    .collect::<Result<_, _>>()?,
                Some(_) => {
                    return Err(GatewayError::InvalidArguments(
                        "aggregate expects an array of pipeline stages".into(),
                    ));
                }
            };
            Ok(Invocation::Aggregate { collection, pipeline })
        }
        "countDocuments" => {
            at_most(&head, &args, 1)?;
            Ok(Invocation::CountDocuments {
                collection,
                filter: document_arg(&head, &args, 0)?.unwrap_or_default(),
            })
        }
        "estimatedDocumentCount" => {
            at_most(&head, &args, 0)?;
            Ok(Invocation::EstimatedDocumentCount { collection })
        }
        "distinct" => {
            at_most(&head, &args, 2)?;
            let field = match args.first() {
                Some(Bson::String(f)) if !f.is_empty() => f.clone(),
                _ => {
                    return Err(GatewayError::InvalidArguments(
                        "distinct expects a field name as its first argument".into(),
                    ));
                }
            };
            Ok(Invocation::Distinct {
                collection,
                field,
                filter: document_arg(&head, &args, 1)?.unwrap_or_default(),
            })
        }
        other => Err(GatewayError::UnsupportedOperation(format!(
            "method '{other}' is not supported; use one of: {}",
            SUPPORTED_METHODS.join(", ")
        ))),
    }
}

fn arguments(segment: &CallSegment) -> Result<Vec<Bson>, GatewayError> {
    parse_arguments(&segment.args).map_err(|e| GatewayError::InvalidArguments(e.to_string()))
}

fn at_most(segment: &CallSegment, args: &[Bson], n: usize) -> Result<(), GatewayError> {
    if args.len() > n {
        return Err(GatewayError::InvalidArguments(format!(
            "{}() accepts at most {n} argument(s), got {}",
            segment.method,
            args.len()
        )));
    }
    Ok(())
}

fn document_arg(
    segment: &CallSegment,
    args: &[Bson],
    idx: usize,
) -> Result<Option<Document>, GatewayError> {
    match args.get(idx) {
        None | Some(Bson::Null) => Ok(None),
        Some(Bson::Document(d)) => Ok(Some(d.clone())),
        Some(_) => Err(GatewayError::InvalidArguments(format!(
            "argument {} of {}() must be a document",
            idx + 1,
            segment.method
        ))),
    }
}

fn count_arg(segment: &CallSegment, args: &[Bson]) -> Result<u64, GatewayError> {
    let n = match args {
        [Bson::Int32(i)] => i64::from(*i),
        [Bson::Int64(i)] => *i,
        #[allow(clippy::cast_possible_truncation)]
        [Bson::Double(d)] if d.fract() == 0.0 && d.is_finite() => *d as i64,
        _ => {
            return Err(GatewayError::InvalidArguments(format!(
                "{}() expects a single integer",
                segment.method
            )));
        }
    };
    u64::try_from(n).map_err(|_| {
        GatewayError::InvalidArguments(format!("{}() expects a non-negative integer", segment.method))
    })
}

fn apply_modifier(spec: &mut FindSpec, segment: &CallSegment) -> Result<(), GatewayError> {
    let args = arguments(segment)?;
    match segment.method.as_str() {
        "sort" => {
            at_most(segment, &args, 1)?;
            spec.sort = document_arg(segment, &args, 0)?.filter(|s| !s.is_empty());
        }
        "project" => {
            at_most(segment, &args, 1)?;
            spec.projection = document_arg(segment, &args, 0)?.filter(|p| !p.is_empty());
        }
        "skip" => spec.skip = Some(count_arg(segment, &args)?),
        "limit" => {
            let n = count_arg(segment, &args)?;
            // limit(0) means no limit
            spec.limit = if n == 0 { None } else { Some(i64::try_from(n).unwrap_or(i64::MAX)) };
        }
        other => {
            return Err(GatewayError::UnsupportedOperation(format!(
                "cursor modifier '{other}' is not supported; use one of: {}",
                CURSOR_MODIFIERS.join(", ")
            )));
        }
    }
    Ok(())
}

fn descriptor_invocation(
    descriptor: JsonDescriptor,
    default_collection: &str,
) -> Result<Invocation, GatewayError> {
    match descriptor.operation.as_deref() {
        Some("find") => {}
        Some(other) => {
            return Err(GatewayError::UnsupportedOperation(format!(
                "operation '{other}' is not supported in JSON queries; only 'find' is"
            )));
        }
        None => {
            return Err(GatewayError::UnsupportedOperation(
                "JSON queries must name an operation; only 'find' is supported".into(),
            ));
        }
    }
    let mut spec = FindSpec::new(default_collection);
    spec.filter = json_field(descriptor.filter, "filter")?.unwrap_or_default();
    spec.projection = json_field(descriptor.project, "project")?.filter(|p| !p.is_empty());
    Ok(Invocation::Find(spec))
}

fn json_field(
    value: Option<serde_json::Value>,
    name: &str,
) -> Result<Option<Document>, GatewayError> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => json_value_to_bson_document(&v)
            .map(Some)
            .map_err(|e| GatewayError::InvalidArguments(format!("{name}: {e}"))),
    }
}
