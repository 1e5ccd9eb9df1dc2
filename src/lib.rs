//! Query lab: a small HTTP gateway that runs MongoDB shell-style read queries for an
//! interactive documentation site.
//!
//! A query string is interpreted into an [`query::Invocation`] without evaluating any
//! code, executed against the attached [`store::DocumentStore`], and rendered as a
//! JSON envelope by the [`gateway`].

pub mod config;
pub mod errors;
pub mod gateway;
pub mod logger;
pub mod query;
pub mod store;
pub mod utils;

pub use errors::{ConfigError, GatewayError};
pub use gateway::{GatewayState, QueryResponse, SharedState};
pub use query::{Invocation, interpret};
pub use store::{DocumentStore, MemoryStore, MongoStore, Outcome, SharedStore};
