use bson::Document;
use serde::{Deserialize, Serialize};

/// Methods accepted after `db.<collection>.`.
pub const SUPPORTED_METHODS: &[&str] =
    &["find", "findOne", "aggregate", "countDocuments", "estimatedDocumentCount", "distinct"];

/// Cursor modifiers that may be chained onto `find(...)`.
pub const CURSOR_MODIFIERS: &[&str] = &["sort", "limit", "skip", "project"];

/// Collection queried by JSON descriptors when none is configured.
pub const DEFAULT_COLLECTION: &str = "books";

/// One `name(args)` segment of a method-call chain, arguments still unparsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSegment {
    pub method: String,
    pub args: String,
}

/// JSON form of a query: `{"operation": "find", "filter": {...}, "project": {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonDescriptor {
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub filter: Option<serde_json::Value>,
    #[serde(default)]
    pub project: Option<serde_json::Value>,
}

/// Result of classifying a raw query string.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryShape {
    /// `db.<collection>.<rest>`; `rest` is the method call text after the collection.
    MethodCall { collection: String, rest: String },
    /// A JSON document describing the operation.
    Descriptor(JsonDescriptor),
    /// Neither shape.
    Unrecognized,
}

/// Options of a `find` invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FindSpec {
    pub collection: String,
    pub filter: Document,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

impl FindSpec {
    #[must_use]
    pub fn new(collection: impl Into<String>) -> Self {
        Self { collection: collection.into(), ..Self::default() }
    }
}

/// A normalized, executable store operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "operation", rename_all = "camelCase")]
pub enum Invocation {
    Find(FindSpec),
    #[serde(rename_all = "camelCase")]
    FindOne {
        collection: String,
        filter: Document,
        #[serde(skip_serializing_if = "Option::is_none")]
        projection: Option<Document>,
    },
    Aggregate { collection: String, pipeline: Vec<Document> },
    CountDocuments { collection: String, filter: Document },
    EstimatedDocumentCount { collection: String },
    Distinct { collection: String, field: String, filter: Document },
}

impl Invocation {
    #[must_use]
    pub fn collection(&self) -> &str {
        match self {
            Self::Find(spec) => &spec.collection,
            Self::FindOne { collection, .. }
            | Self::Aggregate { collection, .. }
            | Self::CountDocuments { collection, .. }
            | Self::EstimatedDocumentCount { collection }
            | Self::Distinct { collection, .. } => collection,
        }
    }

    /// Shell name of the operation.
    #[must_use]
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Find(_) => "find",
            Self::FindOne { .. } => "findOne",
            Self::Aggregate { .. } => "aggregate",
            Self::CountDocuments { .. } => "countDocuments",
            Self::EstimatedDocumentCount { .. } => "estimatedDocumentCount",
            Self::Distinct { .. } => "distinct",
        }
    }
}
