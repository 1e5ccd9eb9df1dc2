use async_trait::async_trait;
use bson::{Document, doc};
use futures::TryStreamExt;
use mongodb::{Client, Collection, Database};

use super::{DocumentStore, Outcome};
use crate::errors::GatewayError;
use crate::query::Invocation;

/// Store backed by a live MongoDB deployment.
#[derive(Debug, Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    /// Connects to `uri`, selects `database` and waits for a successful ping.
    ///
    /// # Errors
    /// Returns an error if the URI is invalid or the deployment does not answer.
    pub async fn connect(uri: &str, database: &str) -> Result<Self, GatewayError> {
        let client = Client::with_uri_str(uri).await?;
        let store = Self { db: client.database(database), client };
        store.ping().await?;
        log::info!("connected to MongoDB database '{database}'");
        Ok(store)
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    fn backend(&self) -> &'static str {
        "mongodb"
    }

    async fn ping(&self) -> Result<(), GatewayError> {
        self.client.database("admin").run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    async fn execute(&self, invocation: &Invocation) -> Result<Outcome, GatewayError> {
        let coll = self.collection(invocation.collection());
        let outcome = match invocation {
            Invocation::Find(spec) => {
                let mut find = coll.find(spec.filter.clone());
                if let Some(projection) = &spec.projection {
                    find = find.projection(projection.clone());
                }
                if let Some(sort) = &spec.sort {
                    find = find.sort(sort.clone());
                }
                if let Some(skip) = spec.skip {
                    find = find.skip(skip);
                }
                if let Some(limit) = spec.limit {
                    find = find.limit(limit);
                }
                Outcome::Documents(find.await?.try_collect().await?)
            }
            Invocation::FindOne { filter, projection, .. } => {
                let mut find = coll.find_one(filter.clone());
                if let Some(projection) = projection {
                    find = find.projection(projection.clone());
                }
                Outcome::Document(find.await?)
            }
            Invocation::Aggregate { pipeline, .. } => {
                Outcome::Documents(coll.aggregate(pipeline.clone()).await?.try_collect().await?)
            }
            Invocation::CountDocuments { filter, .. } => {
                Outcome::Count(coll.count_documents(filter.clone()).await?)
            }
            Invocation::EstimatedDocumentCount { .. } => {
                Outcome::Count(coll.estimated_document_count().await?)
            }
            Invocation::Distinct { field, filter, .. } => {
                Outcome::Values(coll.distinct(field.as_str(), filter.clone()).await?)
            }
        };
        Ok(outcome)
    }

    async fn shutdown(&self) {
        self.client.clone().shutdown().await;
        log::info!("MongoDB client shut down");
    }
}
