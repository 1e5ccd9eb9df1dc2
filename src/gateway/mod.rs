//! The execution gateway: owns the store slot, runs queries and renders envelopes.

mod handler;

pub use handler::{ExecuteRequest, HealthResponse, execute_query, health, router};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::errors::GatewayError;
use crate::logger::AUDIT_TARGET;
use crate::query::{DEFAULT_COLLECTION, interpret};
use crate::store::SharedStore;
use crate::utils::num::u128_to_u64_saturating;

pub type SharedState = Arc<GatewayState>;

/// Success envelope returned by the execute endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    pub result: serde_json::Value,
    pub count: u64,
}

/// Process-wide gateway state, passed explicitly to every handler.
///
/// The store slot is written at most once, after the backend has answered a liveness
/// check. Until then every execution fails with [`GatewayError::NotConnected`].
pub struct GatewayState {
    store: OnceCell<SharedStore>,
    default_collection: String,
}

impl Default for GatewayState {
    fn default() -> Self {
        Self::new(DEFAULT_COLLECTION)
    }
}

impl GatewayState {
    #[must_use]
    pub fn new(default_collection: impl Into<String>) -> Self {
        Self { store: OnceCell::new(), default_collection: default_collection.into() }
    }

    /// State with a store already attached.
    #[must_use]
    pub fn with_store(store: SharedStore, default_collection: impl Into<String>) -> Self {
        let state = Self::new(default_collection);
        // a fresh cell is always empty
        let _ = state.store.set(store);
        state
    }

    /// Fills the store slot. Returns the handle back if a store is already attached.
    ///
    /// # Errors
    /// Returns `Err(store)` when the slot was already filled.
    pub fn attach(&self, store: SharedStore) -> Result<(), SharedStore> {
        self.store.set(store)
    }

    #[must_use]
    pub fn store(&self) -> Option<&SharedStore> {
        self.store.get()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.store.get().is_some()
    }

    #[must_use]
    pub fn default_collection(&self) -> &str {
        &self.default_collection
    }

    /// Interprets and runs one query.
    ///
    /// # Errors
    /// Returns the gateway error to report to the caller.
    pub async fn execute(&self, query: Option<&str>) -> Result<QueryResponse, GatewayError> {
        let store = self.store().ok_or(GatewayError::NotConnected)?.clone();
        let query = query.map(str::trim).filter(|q| !q.is_empty()).ok_or(GatewayError::MissingQuery)?;
        let invocation = interpret(query, &self.default_collection)?;

        let collection = invocation.collection().to_string();
        let operation = invocation.operation();
        let started = Instant::now();
        // a panicking backend surfaces as a JoinError, reported as an internal fault
        let outcome = tokio::spawn(async move { store.execute(&invocation).await }).await??;
        let count = outcome.count();

        log::info!(
            target: AUDIT_TARGET,
            "{operation} on '{collection}' returned {count} in {}ms",
            u128_to_u64_saturating(started.elapsed().as_millis())
        );
        Ok(QueryResponse { success: true, result: outcome.into_json(), count })
    }

    /// Shuts down the attached store, if any.
    pub async fn shutdown(&self) {
        if let Some(store) = self.store() {
            store.shutdown().await;
        }
    }
}

/// Runs `connect` in the background and attaches the resulting store.
///
/// Requests served before the task completes see a not-connected gateway. A failed
/// connection is logged and leaves the gateway disconnected.
pub fn connect_in_background<F>(state: SharedState, connect: F) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = Result<SharedStore, GatewayError>> + Send + 'static,
{
    tokio::spawn(async move {
        match connect.await {
            Ok(store) => {
                let backend = store.backend();
                match state.attach(store) {
                    Ok(()) => log::info!("{backend} store attached"),
                    Err(_) => log::warn!("a store is already attached; dropping the new {backend} handle"),
                }
            }
            Err(e) => log::error!(
                "database connection error: {}",
                e.details().map_or_else(|| e.to_string(), str::to_string)
            ),
        }
    })
}
