//! Elasticsearch backend implementation.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use elasticsearch::auth::Credentials;
use elasticsearch::cert::CertificateValidation;
use elasticsearch::http::response::Response;
use elasticsearch::http::transport::{SingleNodeConnectionPool, TransportBuilder};
use elasticsearch::params::{Conflicts, Refresh};
use elasticsearch::{
    BulkParts, CreateParts, DeleteByQueryParts, Elasticsearch, SearchParts, UpdateParts,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::backends::{
    BulkResponse, IndexTemplate, SearchBackend, SearchResponse, VersionGuard, WriteOutcome,
    rejection,
};
use crate::error::{BackendError, StorageError, StorageResult};

const BACKEND_NAME: &str = "elasticsearch";

/// Credentials sent with every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ElasticsearchAuth {
    /// HTTP basic auth.
    #[allow(missing_docs)]
    Basic { username: String, password: String },
    /// `Authorization: Bearer <token>`.
    #[allow(missing_docs)]
    Bearer { token: String },
}

/// Connection and index-template settings.
///
/// Every field may be omitted in a config file; missing ones take the
/// [`Default`] values (one local node, 1 shard, 1 replica, `1s` refresh,
/// 10000-hit window, 30s timeout).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticsearchConfig {
    /// Node URLs. Only the first one is connected to.
    pub nodes: Vec<String>,
    /// Primary shards of each month index.
    pub number_of_shards: u32,
    /// Replicas of each month index.
    pub number_of_replicas: u32,
    /// Index refresh interval, e.g. `1s`.
    pub refresh_interval: String,
    /// `index.max_result_window` of the templates. Bounds how deep a
    /// `from`/`size` scan can page.
    pub max_result_window: u32,
    /// Transport timeout of every request.
    pub request_timeout_ms: u64,
    /// No credentials when `None`.
    pub auth: Option<ElasticsearchAuth>,
    /// Skips TLS certificate checks. Local clusters only.
    pub disable_certificate_validation: bool,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            nodes: vec!["http://localhost:9200".to_string()],
            number_of_shards: 1,
            number_of_replicas: 1,
            refresh_interval: "1s".to_string(),
            max_result_window: 10_000,
            request_timeout_ms: 30_000,
            auth: None,
            disable_certificate_validation: false,
        }
    }
}

/// Elasticsearch backend for labeling documents.
pub struct ElasticsearchBackend {
    /// The Elasticsearch client.
    client: Elasticsearch,
    /// Configuration.
    config: ElasticsearchConfig,
}

impl Debug for ElasticsearchBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticsearchBackend")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ElasticsearchBackend {
    /// Creates a new Elasticsearch backend with the given configuration.
    pub fn new(config: ElasticsearchConfig) -> StorageResult<Self> {
        let client = Self::build_client(&config)?;
        Ok(Self { client, config })
    }

    /// Builds the Elasticsearch client from configuration.
    fn build_client(config: &ElasticsearchConfig) -> StorageResult<Elasticsearch> {
        let url = config
            .nodes
            .first()
            .cloned()
            .unwrap_or_else(|| "http://localhost:9200".to_string());

        let parsed_url: elasticsearch::http::Url = url.parse().map_err(|e| {
            StorageError::Backend(BackendError::Transport {
                backend_name: BACKEND_NAME.to_string(),
                message: format!("Invalid URL {}: {}", url, e),
                source: None,
            })
        })?;

        let conn_pool = SingleNodeConnectionPool::new(parsed_url);

        let mut builder = TransportBuilder::new(conn_pool)
            .timeout(Duration::from_millis(config.request_timeout_ms));

        if config.disable_certificate_validation {
            builder = builder.cert_validation(CertificateValidation::None);
        }

        if let Some(ref auth) = config.auth {
            builder = match auth {
                ElasticsearchAuth::Basic { username, password } => {
                    builder.auth(Credentials::Basic(username.clone(), password.clone()))
                }
                ElasticsearchAuth::Bearer { token } => {
                    builder.auth(Credentials::Bearer(token.clone()))
                }
            };
        }

        let transport = builder
            .build()
            .map_err(|e| transport_error("Failed to build transport", e.into()))?;

        Ok(Elasticsearch::new(transport))
    }

    /// Returns the Elasticsearch client.
    pub(crate) fn client(&self) -> &Elasticsearch {
        &self.client
    }

    /// Returns the backend configuration.
    pub fn config(&self) -> &ElasticsearchConfig {
        &self.config
    }
}

/// Wraps a client-level failure (connect, timeout, broken body).
fn transport_error(context: &str, err: elasticsearch::Error) -> StorageError {
    StorageError::Backend(BackendError::Transport {
        backend_name: BACKEND_NAME.to_string(),
        message: format!("{}: {}", context, err),
        source: Some(Box::new(err)),
    })
}

/// Reads the body of a response, turning non-success statuses into
/// [`BackendError::Rejected`].
pub(crate) async fn read_json(response: Response, context: &str) -> StorageResult<Value> {
    let status = response.status_code();
    let body = response
        .json::<Value>()
        .await
        .map_err(|e| transport_error(context, e))?;

    if !status.is_success() {
        return Err(rejection(BACKEND_NAME, status.as_u16(), &body).into());
    }
    Ok(body)
}

fn is_missing_index(err: &StorageError) -> bool {
    matches!(
        err,
        StorageError::Backend(BackendError::Rejected { error_type, .. })
            if error_type == "index_not_found_exception"
    )
}

#[async_trait]
impl SearchBackend for ElasticsearchBackend {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn health_check(&self) -> StorageResult<()> {
        let response = self
            .client
            .cluster()
            .health(elasticsearch::cluster::ClusterHealthParts::None)
            .send()
            .await
            .map_err(|e| {
                StorageError::Backend(BackendError::Unavailable {
                    backend_name: BACKEND_NAME.to_string(),
                    message: format!("Health check failed: {}", e),
                })
            })?;

        let body = read_json(response, "Failed to read health response").await?;

        let cluster_status = body
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("unknown");

        if cluster_status == "red" {
            return Err(StorageError::Backend(BackendError::Unavailable {
                backend_name: BACKEND_NAME.to_string(),
                message: format!("Cluster status is red: {}", body),
            }));
        }

        tracing::debug!(status = cluster_status, "Elasticsearch cluster healthy");
        Ok(())
    }

    async fn initialize(&self, templates: &[IndexTemplate]) -> StorageResult<()> {
        for template in templates {
            super::schema::put_index_template(self, template).await?;
        }
        Ok(())
    }

    async fn create(&self, index: &str, id: &str, document: Value) -> StorageResult<WriteOutcome> {
        let response = self
            .client
            .create(CreateParts::IndexId(index, id))
            .body(document)
            .refresh(Refresh::True)
            .send()
            .await
            .map_err(|e| transport_error("Failed to create document", e))?;

        let body = read_json(response, "Failed to read create response").await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn update(
        &self,
        index: &str,
        id: &str,
        partial: Value,
        guard: Option<VersionGuard>,
    ) -> StorageResult<WriteOutcome> {
        let mut request = self
            .client
            .update(UpdateParts::IndexId(index, id))
            .body(json!({ "doc": partial }))
            .refresh(Refresh::True);

        if let Some(guard) = guard {
            request = request
                .if_seq_no(guard.seq_no)
                .if_primary_term(guard.primary_term);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error("Failed to update document", e))?;

        let body = read_json(response, "Failed to read update response").await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn search(&self, index_pattern: &str, body: Value) -> StorageResult<SearchResponse> {
        let response = self
            .client
            .search(SearchParts::Index(&[index_pattern]))
            .allow_no_indices(true)
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error("Failed to execute search", e))?;

        match read_json(response, "Failed to read search response").await {
            Ok(body) => SearchResponse::from_json(body),
            // An alias that was never created holds no documents
            Err(e) if is_missing_index(&e) => Ok(SearchResponse::default()),
            Err(e) => Err(e),
        }
    }

    async fn delete_by_query(&self, index_pattern: &str, body: Value) -> StorageResult<u64> {
        let response = self
            .client
            .delete_by_query(DeleteByQueryParts::Index(&[index_pattern]))
            .allow_no_indices(true)
            .conflicts(Conflicts::Proceed)
            .refresh(true)
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error("Failed to delete by query", e))?;

        match read_json(response, "Failed to read delete response").await {
            Ok(body) => Ok(body.get("deleted").and_then(Value::as_u64).unwrap_or(0)),
            Err(e) if is_missing_index(&e) => Ok(0),
            Err(e) => Err(e),
        }
    }

    async fn bulk(&self, lines: Vec<String>) -> StorageResult<BulkResponse> {
        let response = self
            .client
            .bulk(BulkParts::None)
            .body(lines)
            .refresh(Refresh::True)
            .send()
            .await
            .map_err(|e| transport_error("Failed to send bulk request", e))?;

        let body = read_json(response, "Failed to read bulk response").await?;
        BulkResponse::from_json(body)
    }
}
