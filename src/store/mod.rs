//! Document store backends the gateway executes invocations against.

pub mod eval;
mod memory;
mod mongo;

use async_trait::async_trait;
use bson::{Bson, Document};
use std::sync::Arc;

use crate::errors::GatewayError;
use crate::query::Invocation;
use crate::utils::json::document_to_json;
use crate::utils::num::usize_to_u64;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// Store handle shared by every request.
pub type SharedStore = Arc<dyn DocumentStore>;

/// Materialized result of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Documents(Vec<Document>),
    Document(Option<Document>),
    Values(Vec<Bson>),
    Count(u64),
}

impl Outcome {
    /// Number reported in the envelope's `count` field.
    #[must_use]
    pub fn count(&self) -> u64 {
        match self {
            Self::Documents(docs) => usize_to_u64(docs.len()),
            Self::Values(values) => usize_to_u64(values.len()),
            Self::Document(_) | Self::Count(_) => 1,
        }
    }

    /// Relaxed Extended JSON rendering of the result.
    #[must_use]
    pub fn into_json(self) -> serde_json::Value {
        match self {
            Self::Documents(docs) => docs.into_iter().map(document_to_json).collect(),
            Self::Document(Some(doc)) => document_to_json(doc),
            Self::Document(None) => serde_json::Value::Null,
            Self::Values(values) => values.into_iter().map(Bson::into_relaxed_extjson).collect(),
            Self::Count(n) => serde_json::Value::from(n),
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Backend name, for logs.
    fn backend(&self) -> &'static str;

    /// Liveness check.
    async fn ping(&self) -> Result<(), GatewayError>;

    /// Runs one invocation to completion and materializes its result.
    async fn execute(&self, invocation: &Invocation) -> Result<Outcome, GatewayError>;

    /// Releases backend resources. The store must not be used afterwards.
    async fn shutdown(&self) {}
}
