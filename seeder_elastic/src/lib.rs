//! Elasticsearch sink for the receivable seeder.
mod bulk;
mod client;
mod error;

pub use self::client::{DEFAULT_TIMEOUT, ElasticsearchSink};
pub use self::error::{ElasticError, Result};
