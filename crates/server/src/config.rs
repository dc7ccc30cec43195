//! Server configuration.
//!
//! Every flag can also be set through its environment variable.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `ANNOLAB_BACKEND` | elasticsearch | `elasticsearch` or `memory` |
//! | `ANNOLAB_ES_NODES` | http://localhost:9200 | Comma-separated node URLs |
//! | `ANNOLAB_ES_USERNAME` / `ANNOLAB_ES_PASSWORD` | | Basic auth |
//! | `ANNOLAB_ES_BEARER_TOKEN` | | Bearer auth, exclusive with basic auth |
//! | `ANNOLAB_ES_REQUEST_TIMEOUT_MS` | 30000 | Backend request timeout |
//! | `ANNOLAB_ES_CONFIG_FILE` | | JSON file with further backend settings |
//! | `ANNOLAB_INDEX_*` | `lab_<collection>` | Index prefix per collection |
//! | `ANNOLAB_SEQUENCE_URI` | | Sequence service; in-process counters when unset |
//! | `ANNOLAB_SEQUENCE_NAMESPACE` | id_generator | Sequence namespace |
//! | `ANNOLAB_SEQUENCE_TIMEOUT_MS` | 1000 | Sequence call timeout |
//! | `ANNOLAB_BULK_BATCH_SIZE` | 10 | Documents per bulk request |
//! | `ANNOLAB_QUEUE_CAPACITY` | 1000 | Object expansion queue capacity |
//! | `ANNOLAB_SHUTDOWN_GRACE` | 10s | Wait for the worker on shutdown |
//! | `ANNOLAB_LOG_LEVEL` | info | Log level |

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use annolab_persistence::IndexPrefixes;
use annolab_persistence::bulk::DEFAULT_BATCH_SIZE;
use annolab_workflow::objects::DEFAULT_QUEUE_CAPACITY;
use annolab_workflow::sequence::SequenceConfig;
use clap::{Parser, ValueEnum};

#[cfg(feature = "elasticsearch")]
use annolab_persistence::backends::elasticsearch::{ElasticsearchAuth, ElasticsearchConfig};

/// Which search backend stores the documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// An Elasticsearch-compatible cluster.
    Elasticsearch,
    /// Process memory. Nothing survives a restart.
    Memory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Elasticsearch => write!(f, "elasticsearch"),
            BackendKind::Memory => write!(f, "memory"),
        }
    }
}

/// Configuration of the `annolab` binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "annolab")]
#[command(about = "Storage and workflow core of the annolab labeling backend")]
pub struct ServerConfig {
    /// Search backend.
    #[arg(long, value_enum, env = "ANNOLAB_BACKEND", default_value = "elasticsearch")]
    pub backend: BackendKind,

    /// Elasticsearch node URLs, comma-separated.
    #[arg(long, env = "ANNOLAB_ES_NODES", default_value = "http://localhost:9200")]
    pub es_nodes: String,

    /// Basic auth user.
    #[arg(long, env = "ANNOLAB_ES_USERNAME")]
    pub es_username: Option<String>,

    /// Basic auth password.
    #[arg(long, env = "ANNOLAB_ES_PASSWORD")]
    pub es_password: Option<String>,

    /// Bearer token.
    #[arg(long, env = "ANNOLAB_ES_BEARER_TOKEN")]
    pub es_bearer_token: Option<String>,

    /// Backend request timeout in milliseconds.
    #[arg(long, env = "ANNOLAB_ES_REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub es_request_timeout_ms: u64,

    /// JSON file with backend settings (shards, replicas, refresh interval).
    /// Flags above take precedence.
    #[arg(long, env = "ANNOLAB_ES_CONFIG_FILE")]
    pub es_config_file: Option<PathBuf>,

    /// Index prefix of annotations.
    #[arg(long, env = "ANNOLAB_INDEX_ANNOTATIONS", default_value = "lab_annotations")]
    pub index_annotations: String,

    /// Index prefix of labels.
    #[arg(long, env = "ANNOLAB_INDEX_LABELS", default_value = "lab_labels")]
    pub index_labels: String,

    /// Index prefix of label groups.
    #[arg(long, env = "ANNOLAB_INDEX_LABEL_GROUPS", default_value = "lab_label_groups")]
    pub index_label_groups: String,

    /// Index prefix of objects.
    #[arg(long, env = "ANNOLAB_INDEX_OBJECTS", default_value = "lab_objects")]
    pub index_objects: String,

    /// Index prefix of projects.
    #[arg(long, env = "ANNOLAB_INDEX_PROJECTS", default_value = "lab_projects")]
    pub index_projects: String,

    /// Index prefix of studies.
    #[arg(long, env = "ANNOLAB_INDEX_STUDIES", default_value = "lab_studies")]
    pub index_studies: String,

    /// Index prefix of tasks.
    #[arg(long, env = "ANNOLAB_INDEX_TASKS", default_value = "lab_tasks")]
    pub index_tasks: String,

    /// Alias name of the session collection.
    #[arg(long, env = "ANNOLAB_INDEX_SESSIONS", default_value = "lab_sessions")]
    pub index_sessions: String,

    /// Index prefix of label exports.
    #[arg(long, env = "ANNOLAB_INDEX_LABEL_EXPORTS", default_value = "lab_label_exports")]
    pub index_label_exports: String,

    /// Base URI of the sequence service.
    #[arg(long, env = "ANNOLAB_SEQUENCE_URI")]
    pub sequence_uri: Option<String>,

    /// Namespace of the sequence keys.
    #[arg(long, env = "ANNOLAB_SEQUENCE_NAMESPACE", default_value = "id_generator")]
    pub sequence_namespace: String,

    /// Sequence call timeout in milliseconds.
    #[arg(long, env = "ANNOLAB_SEQUENCE_TIMEOUT_MS", default_value = "1000")]
    pub sequence_timeout_ms: u64,

    /// Documents per bulk request.
    #[arg(long, env = "ANNOLAB_BULK_BATCH_SIZE", default_value = "10")]
    pub bulk_batch_size: usize,

    /// Capacity of the object expansion queue.
    #[arg(long, env = "ANNOLAB_QUEUE_CAPACITY", default_value = "1000")]
    pub queue_capacity: usize,

    /// How long shutdown waits for the object worker (e.g. `10s`, `1m`).
    #[arg(
        long,
        env = "ANNOLAB_SHUTDOWN_GRACE",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    pub shutdown_grace: Duration,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "ANNOLAB_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let prefixes = IndexPrefixes::default();
        Self {
            backend: BackendKind::Elasticsearch,
            es_nodes: "http://localhost:9200".to_string(),
            es_username: None,
            es_password: None,
            es_bearer_token: None,
            es_request_timeout_ms: 30_000,
            es_config_file: None,
            index_annotations: prefixes.annotations,
            index_labels: prefixes.labels,
            index_label_groups: prefixes.label_groups,
            index_objects: prefixes.objects,
            index_projects: prefixes.projects,
            index_studies: prefixes.studies,
            index_tasks: prefixes.tasks,
            index_sessions: prefixes.sessions,
            index_label_exports: prefixes.label_exports,
            sequence_uri: None,
            sequence_namespace: "id_generator".to_string(),
            sequence_timeout_ms: 1000,
            bulk_batch_size: DEFAULT_BATCH_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            shutdown_grace: Duration::from_secs(10),
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Node URLs, trimmed, without empty entries.
    pub fn nodes(&self) -> Vec<String> {
        self.es_nodes
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// The index prefix of every collection.
    pub fn index_prefixes(&self) -> IndexPrefixes {
        IndexPrefixes {
            annotations: self.index_annotations.clone(),
            labels: self.index_labels.clone(),
            label_groups: self.index_label_groups.clone(),
            objects: self.index_objects.clone(),
            projects: self.index_projects.clone(),
            studies: self.index_studies.clone(),
            tasks: self.index_tasks.clone(),
            sessions: self.index_sessions.clone(),
            label_exports: self.index_label_exports.clone(),
        }
    }

    /// Settings of the HTTP sequence generator, `None` without a URI.
    pub fn sequence_config(&self) -> Option<SequenceConfig> {
        self.sequence_uri.as_ref().map(|uri| SequenceConfig {
            base_uri: uri.clone(),
            namespace: self.sequence_namespace.clone(),
            timeout_ms: self.sequence_timeout_ms,
        })
    }

    /// Backend settings: the config file if any, overridden by the flags.
    #[cfg(feature = "elasticsearch")]
    pub fn elasticsearch_config(&self) -> anyhow::Result<ElasticsearchConfig> {
        let mut config = match &self.es_config_file {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    anyhow::anyhow!("cannot read {}: {}", path.display(), e)
                })?;
                serde_json::from_str::<ElasticsearchConfig>(&raw).map_err(|e| {
                    anyhow::anyhow!("invalid backend config in {}: {}", path.display(), e)
                })?
            }
            None => ElasticsearchConfig::default(),
        };

        config.nodes = self.nodes();
        config.request_timeout_ms = self.es_request_timeout_ms;
        config.auth = match (&self.es_username, &self.es_password, &self.es_bearer_token) {
            (Some(username), Some(password), None) => Some(ElasticsearchAuth::Basic {
                username: username.clone(),
                password: password.clone(),
            }),
            (None, None, Some(token)) => Some(ElasticsearchAuth::Bearer {
                token: token.clone(),
            }),
            _ => config.auth,
        };
        Ok(config)
    }

    /// Validates the configuration and returns every error found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.backend == BackendKind::Elasticsearch {
            if self.nodes().is_empty() {
                errors.push("At least one Elasticsearch node is required".to_string());
            }
            if self.es_username.is_some() != self.es_password.is_some() {
                errors.push("Username and password must be set together".to_string());
            }
            if self.es_bearer_token.is_some() && self.es_username.is_some() {
                errors.push("Basic and bearer auth are exclusive".to_string());
            }
            if self.es_request_timeout_ms == 0 {
                errors.push("Request timeout cannot be 0".to_string());
            }
            if cfg!(not(feature = "elasticsearch")) {
                errors.push(
                    "The elasticsearch backend requires the 'elasticsearch' feature".to_string(),
                );
            }
        }

        if let Err(prefix_errors) = self.index_prefixes().validate() {
            errors.extend(prefix_errors);
        }

        if let Some(uri) = &self.sequence_uri
            && !(uri.starts_with("http://") || uri.starts_with("https://"))
        {
            errors.push(format!("Sequence URI {:?} must be an http(s) URL", uri));
        }
        if self.sequence_namespace.is_empty() {
            errors.push("Sequence namespace cannot be empty".to_string());
        }
        if self.sequence_timeout_ms == 0 {
            errors.push("Sequence timeout cannot be 0".to_string());
        }

        if self.bulk_batch_size == 0 {
            errors.push("Bulk batch size cannot be 0".to_string());
        }
        if self.queue_capacity == 0 {
            errors.push("Queue capacity cannot be 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// A configuration for tests: memory backend, in-process sequence.
    pub fn for_testing() -> Self {
        Self {
            backend: BackendKind::Memory,
            queue_capacity: 16,
            shutdown_grace: Duration::from_secs(1),
            log_level: "debug".to_string(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.backend, BackendKind::Elasticsearch);
        assert_eq!(config.index_prefixes(), IndexPrefixes::default());
        assert!(config.sequence_config().is_none());
    }

    #[test]
    fn test_parse_flags() {
        let config = ServerConfig::try_parse_from([
            "annolab",
            "--backend",
            "memory",
            "--index-tasks",
            "qa_tasks",
            "--shutdown-grace",
            "1m 30s",
            "--sequence-uri",
            "http://seq:8000",
        ])
        .unwrap();

        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.index_prefixes().tasks, "qa_tasks");
        assert_eq!(config.shutdown_grace, Duration::from_secs(90));
        let sequence = config.sequence_config().unwrap();
        assert_eq!(sequence.base_uri, "http://seq:8000");
        assert_eq!(sequence.namespace, "id_generator");
    }

    #[test]
    fn test_bad_duration_rejected() {
        let result = ServerConfig::try_parse_from(["annolab", "--shutdown-grace", "soon"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_nodes_are_split() {
        let config = ServerConfig {
            es_nodes: "http://a:9200, http://b:9200,".to_string(),
            ..Default::default()
        };
        assert_eq!(config.nodes(), vec!["http://a:9200", "http://b:9200"]);
    }

    #[test]
    fn test_validate_valid() {
        assert!(ServerConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_validate_collects_errors() {
        let config = ServerConfig {
            backend: BackendKind::Memory,
            bulk_batch_size: 0,
            queue_capacity: 0,
            sequence_uri: Some("seq:8000".to_string()),
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("Bulk batch size")));
        assert!(errors.iter().any(|e| e.contains("Sequence URI")));
    }

    #[test]
    fn test_validate_overlapping_prefixes() {
        let config = ServerConfig {
            backend: BackendKind::Memory,
            index_labels: "lab_label".to_string(),
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("overlaps")));
    }

    #[test]
    fn test_validate_half_basic_auth() {
        let config = ServerConfig {
            es_username: Some("elastic".to_string()),
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("together")));
    }

    #[test]
    fn test_for_testing() {
        let config = ServerConfig::for_testing();
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.log_level, "debug");
    }

    #[cfg(feature = "elasticsearch")]
    #[test]
    fn test_elasticsearch_config_file_and_overrides() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"nodes": ["http://ignored:9200"], "number_of_shards": 3, "refresh_interval": "5s"}}"#
        )
        .unwrap();

        let config = ServerConfig {
            es_config_file: Some(file.path().to_path_buf()),
            es_bearer_token: Some("secret".to_string()),
            es_request_timeout_ms: 500,
            ..Default::default()
        };
        let es = config.elasticsearch_config().unwrap();

        assert_eq!(es.nodes, vec!["http://localhost:9200"]);
        assert_eq!(es.number_of_shards, 3);
        assert_eq!(es.refresh_interval, "5s");
        assert_eq!(es.request_timeout_ms, 500);
        assert!(matches!(es.auth, Some(ElasticsearchAuth::Bearer { ref token }) if token == "secret"));
    }

    #[cfg(feature = "elasticsearch")]
    #[test]
    fn test_elasticsearch_config_file_missing() {
        let config = ServerConfig {
            es_config_file: Some(PathBuf::from("/nonexistent/annolab.json")),
            ..Default::default()
        };
        assert!(config.elasticsearch_config().is_err());
    }
}
