use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document, doc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;

use super::eval::{Projection, bson_eq, compare_docs, compile_filter, eval_filter, get_path, sort_keys};
use super::{DocumentStore, Outcome};
use crate::errors::{ConfigError, GatewayError};
use crate::query::{FindSpec, Invocation};
use crate::utils::json::json_value_to_bson_document;
use crate::utils::num::{i64_to_usize, u64_to_usize_saturating, usize_to_u64};

/// Embedded store holding collections in memory.
///
/// Used for offline development of the documentation site and in tests. Executes the
/// same invocations as [`super::MongoStore`] with the same result shapes; aggregation
/// supports `$match`, `$project`, `$sort`, `$skip`, `$limit` and `$count`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a seed file of the form `{"<collection>": [{...}, ...], ...}`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not shaped as above.
    pub fn from_seed_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let value: serde_json::Value = serde_json::from_str(&text)?;
        let store = Self::from_seed(&value)?;
        log::info!("seeded in-memory store from {}", path.display());
        Ok(store)
    }

    /// Builds a store from a parsed seed document.
    ///
    /// # Errors
    /// Returns an error if the value is not an object of arrays of objects.
    pub fn from_seed(value: &serde_json::Value) -> Result<Self, ConfigError> {
        let obj = value
            .as_object()
            .ok_or_else(|| ConfigError::Seed("expected an object of collections".into()))?;
        let store = Self::new();
        for (name, docs) in obj {
            let items = docs
                .as_array()
                .ok_or_else(|| ConfigError::Seed(format!("collection '{name}' must be an array")))?;
            let docs = items
                .iter()
                .map(|v| {
                    json_value_to_bson_document(v)
                        .map_err(|e| ConfigError::Seed(format!("collection '{name}': {e}")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            store.insert_many(name, docs);
        }
        Ok(store)
    }

    /// Appends documents to a collection, assigning an `_id` where one is missing.
    pub fn insert_many(&self, collection: &str, docs: impl IntoIterator<Item = Document>) {
        let mut guard = self.collections.write();
        let target = guard.entry(collection.to_string()).or_default();
        for mut d in docs {
            if !d.contains_key("_id") {
                let mut with_id = doc! { "_id": ObjectId::new() };
                for (k, v) in d {
                    with_id.insert(k, v);
                }
                d = with_id;
            }
            target.push(d);
        }
    }

    fn snapshot(&self, collection: &str) -> Vec<Document> {
        self.collections.read().get(collection).cloned().unwrap_or_default()
    }

    fn filtered(&self, collection: &str, filter: &Document) -> Result<Vec<Document>, GatewayError> {
        let compiled = compile_filter(filter)?;
        let mut docs = self.snapshot(collection);
        docs.retain(|d| eval_filter(d, &compiled));
        Ok(docs)
    }

    fn find(&self, spec: &FindSpec) -> Result<Vec<Document>, GatewayError> {
        let projection = spec.projection.as_ref().map(Projection::compile).transpose()?;
        let mut docs = self.filtered(&spec.collection, &spec.filter)?;
        if let Some(sort) = &spec.sort {
            let keys = sort_keys(sort)?;
            docs.sort_by(|a, b| compare_docs(a, b, &keys));
        }
        let skip = spec.skip.map_or(0, u64_to_usize_saturating);
        let limit = spec.limit.and_then(i64_to_usize).unwrap_or(usize::MAX);
        let docs = docs.into_iter().skip(skip).take(limit);
        Ok(match projection {
            Some(p) => docs.map(|d| p.apply(&d)).collect(),
            None => docs.collect(),
        })
    }

    fn aggregate(&self, collection: &str, pipeline: &[Document]) -> Result<Vec<Document>, GatewayError> {
        let mut docs = self.snapshot(collection);
        for stage in pipeline {
            let mut entries = stage.iter();
            let (Some((name, arg)), None) = (entries.next(), entries.next()) else {
                return Err(GatewayError::Execution(
                    "A pipeline stage specification object must contain exactly one field.".into(),
                ));
            };
            docs = apply_stage(docs, name, arg)?;
        }
        Ok(docs)
    }

    fn distinct(&self, collection: &str, field: &str, filter: &Document) -> Result<Vec<Bson>, GatewayError> {
        let mut out: Vec<Bson> = Vec::new();
        let mut push = |v: &Bson| {
            if !out.iter().any(|seen| bson_eq(seen, v)) {
                out.push(v.clone());
            }
        };
        for d in self.filtered(collection, filter)? {
            match get_path(&d, field) {
                Some(Bson::Array(items)) => items.iter().for_each(&mut push),
                Some(v) => push(v),
                None => {}
            }
        }
        Ok(out)
    }
}

fn stage_count(name: &str, arg: &Bson) -> Result<usize, GatewayError> {
    let n = match arg {
        Bson::Int32(i) => Some(i64::from(*i)),
        Bson::Int64(i) => Some(*i),
        #[allow(clippy::cast_possible_truncation)]
        Bson::Double(d) if d.fract() == 0.0 => Some(*d as i64),
        _ => None,
    };
    n.and_then(i64_to_usize)
        .ok_or_else(|| GatewayError::Execution(format!("{name} requires a non-negative integer")))
}

fn apply_stage(mut docs: Vec<Document>, name: &str, arg: &Bson) -> Result<Vec<Document>, GatewayError> {
    let stage_doc = || match arg {
        Bson::Document(d) => Ok(d),
        _ => Err(GatewayError::Execution(format!("the {name} stage requires a document"))),
    };
    match name {
        "$match" => {
            let f = compile_filter(stage_doc()?)?;
            docs.retain(|d| eval_filter(d, &f));
            Ok(docs)
        }
        "$project" => {
            let p = Projection::compile(stage_doc()?)?;
            Ok(docs.iter().map(|d| p.apply(d)).collect())
        }
        "$sort" => {
            let keys = sort_keys(stage_doc()?)?;
            docs.sort_by(|a, b| compare_docs(a, b, &keys));
            Ok(docs)
        }
        "$skip" => Ok(docs.into_iter().skip(stage_count(name, arg)?).collect()),
        "$limit" => {
            let n = stage_count(name, arg)?;
            if n == 0 {
                return Err(GatewayError::Execution("the limit must be positive".into()));
            }
            docs.truncate(n);
            Ok(docs)
        }
        "$count" => match arg {
            Bson::String(field) if !field.is_empty() && !field.starts_with('$') => {
                if docs.is_empty() {
                    return Ok(Vec::new());
                }
                let n = usize_to_u64(docs.len());
                let value = match i32::try_from(n) {
                    Ok(small) => Bson::Int32(small),
                    Err(_) => Bson::Int64(i64::try_from(n).unwrap_or(i64::MAX)),
                };
                let mut out = Document::new();
                out.insert(field.clone(), value);
                Ok(vec![out])
            }
            _ => Err(GatewayError::Execution("the $count field must be a non-empty string".into())),
        },
        other => Err(GatewayError::Execution(format!(
            "pipeline stage {other} is not supported by the in-memory store"
        ))),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn execute(&self, invocation: &Invocation) -> Result<Outcome, GatewayError> {
        Ok(match invocation {
            Invocation::Find(spec) => Outcome::Documents(self.find(spec)?),
            Invocation::FindOne { collection, filter, projection } => {
                let mut spec = FindSpec::new(collection.as_str());
                spec.filter = filter.clone();
                spec.projection = projection.clone();
                spec.limit = Some(1);
                Outcome::Document(self.find(&spec)?.into_iter().next())
            }
            Invocation::Aggregate { collection, pipeline } => {
                Outcome::Documents(self.aggregate(collection, pipeline)?)
            }
            Invocation::CountDocuments { collection, filter } => {
                Outcome::Count(usize_to_u64(self.filtered(collection, filter)?.len()))
            }
            Invocation::EstimatedDocumentCount { collection } => {
                Outcome::Count(usize_to_u64(self.snapshot(collection).len()))
            }
            Invocation::Distinct { collection, field, filter } => {
                Outcome::Values(self.distinct(collection, field, filter)?)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        let s = MemoryStore::new();
        s.insert_many("books", [doc! { "_id": 1, "title": "Dune" }, doc! { "title": "Emma" }]);
        s
    }

    #[test]
    fn insert_assigns_missing_ids_first() {
        let s = store();
        let docs = s.snapshot("books");
        assert_eq!(docs[0].get_i32("_id").unwrap(), 1);
        assert_eq!(docs[1].keys().next().map(String::as_str), Some("_id"));
        assert!(docs[1].get_object_id("_id").is_ok());
    }

    #[test]
    fn missing_collection_is_empty() {
        assert!(store().snapshot("authors").is_empty());
    }

    #[test]
    fn seed_rejects_non_array_collections() {
        let err = MemoryStore::from_seed(&serde_json::json!({ "books": { "title": "x" } })).unwrap_err();
        assert!(matches!(err, ConfigError::Seed(_)));
    }

    #[test]
    fn multi_key_stage_is_rejected() {
        let err = store().aggregate("books", &[doc! { "$match": {}, "$limit": 1 }]).unwrap_err();
        assert!(matches!(err, GatewayError::Execution(_)));
    }
}
