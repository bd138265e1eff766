pub mod analytics;
pub mod annotations;
pub mod auth;
pub mod authz;
pub mod config;
pub mod error;
pub mod projects;
pub mod respond;
pub mod reviews;
pub mod samples;
pub mod store;
pub mod types;
pub mod users;
pub mod workflow;

use aws_sdk_dynamodb::Client as DynamoClient;
use std::sync::Arc;

pub use config::Config;

/// Shared application state
pub struct AppState {
    pub dynamo_client: DynamoClient,
    pub config: Config,
}

impl AppState {
    pub fn new(dynamo_client: DynamoClient, config: Config) -> Arc<Self> {
        Arc::new(Self {
            dynamo_client,
            config,
        })
    }
}
