//! Elasticsearch implementation of the bulk sink, over the REST API.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode, header::CONTENT_TYPE};
use seeder_core::sink::{
    BulkDocument, BulkItemResult, BulkSink, CollectionStatus, REJECTED_EXECUTION, Result,
    SinkError,
};
use serde_json::Value;
use snafu::{ResultExt, ensure};
use tracing::{debug, info};

use crate::{
    bulk::{BulkResponse, ErrorResponse, encode_bulk_body},
    error::{ClientSnafu, InvalidUrlSnafu, Result as ElasticResult},
};

const NDJSON: &str = "application/x-ndjson";
const ALREADY_EXISTS: &str = "resource_already_exists_exception";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ElasticsearchSink {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<(String, String)>,
}

impl ElasticsearchSink {
    /// Create a sink talking to the cluster at `base_url`.
    pub fn new(base_url: impl Into<String>) -> ElasticResult<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Create a sink whose requests time out after `timeout`.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> ElasticResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        ensure!(
            base_url.starts_with("http://") || base_url.starts_with("https://"),
            InvalidUrlSnafu { url: base_url }
        );

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context(ClientSnafu {})?;

        Ok(Self {
            client,
            base_url,
            credentials: None,
        })
    }

    /// Authenticate every request with basic auth.
    pub fn with_basic_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let request = self
            .client
            .request(method, format!("{}/{}", self.base_url, path));

        match &self.credentials {
            Some((username, password)) => request.basic_auth(username, Some(password)),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response> {
        request
            .send()
            .await
            .map_err(|err| SinkError::Unavailable {
                message: err.to_string(),
            })
    }
}

#[async_trait]
impl BulkSink for ElasticsearchSink {
    async fn ping(&self) -> Result<()> {
        let response = self.send(self.request(reqwest::Method::GET, "")).await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let info: Value = response.json().await.map_err(invalid_response)?;
        info!(
            url = %self.base_url,
            cluster = info["cluster_name"].as_str().unwrap_or_default(),
            version = info["version"]["number"].as_str().unwrap_or_default(),
            "connected to Elasticsearch"
        );

        Ok(())
    }

    async fn create_collection(&self, name: &str, mapping: &Value) -> Result<CollectionStatus> {
        let response = self
            .send(self.request(reqwest::Method::PUT, name).json(mapping))
            .await?;

        if response.status().is_success() {
            return Ok(CollectionStatus::Created);
        }

        match error_from_response(response).await {
            SinkError::Rejected { status: 400, message } if message.contains(ALREADY_EXISTS) => {
                debug!(index = name, "index already exists");
                Ok(CollectionStatus::AlreadyExists)
            }
            error => Err(error),
        }
    }

    async fn bulk_write(
        &self,
        collection: &str,
        documents: Vec<BulkDocument>,
    ) -> Result<Vec<BulkItemResult>> {
        let body = encode_bulk_body(collection, &documents).map_err(|err| SinkError::Internal {
            message: format!("failed to encode bulk body: {err}"),
        })?;

        let response = self
            .send(
                self.request(reqwest::Method::POST, "_bulk")
                    .header(CONTENT_TYPE, NDJSON)
                    .body(body),
            )
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let response: BulkResponse = response.json().await.map_err(invalid_response)?;
        Ok(response.into_results())
    }

    async fn refresh(&self, collection: &str) -> Result<()> {
        let response = self
            .send(self.request(reqwest::Method::POST, &format!("{collection}/_refresh")))
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        Ok(())
    }
}

/// Maps an unsuccessful response to a sink error.
async fn error_from_response(response: Response) -> SinkError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    classify(status, &body)
}

fn classify(status: StatusCode, body: &str) -> SinkError {
    let message = match serde_json::from_str::<ErrorResponse>(body) {
        Ok(response) => format!("{}: {}", response.error.error_type, response.error.reason),
        Err(_) => body.to_string(),
    };

    if status == StatusCode::TOO_MANY_REQUESTS || message.contains(REJECTED_EXECUTION) {
        return SinkError::Overloaded { message };
    }

    if status.is_server_error() {
        return SinkError::Unavailable { message };
    }

    SinkError::Rejected {
        status: status.as_u16(),
        message,
    }
}

fn invalid_response(err: reqwest::Error) -> SinkError {
    SinkError::InvalidResponse {
        message: err.to_string(),
    }
}
