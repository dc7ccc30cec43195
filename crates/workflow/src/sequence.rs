//! Monotonic counters for human-readable codes.
//!
//! Task codes (`TSK-<n>`) come from an external counter service keyed per
//! project. The service is called with
//! `PUT {base}/{namespace}/{key}/tap` and answers `{"last_insert_id": n}`.
//!
//! A request that times out may still have advanced the counter, so a retry
//! can skip a number. Codes are unique, not gapless.

use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SequenceError;

/// Counter key of a project's task codes.
pub fn task_sequence_key(project_id: &str) -> String {
    format!("task_{}", project_id)
}

/// Formats a task code.
pub fn task_code(n: u64) -> String {
    format!("TSK-{}", n)
}

/// Source of per-key monotonic numbers.
#[async_trait]
pub trait SequenceGenerator: Send + Sync + Debug {
    /// Advances the counter of `key` and returns its new value.
    async fn next(&self, key: &str) -> Result<u64, SequenceError>;
}

/// Configuration of [`HttpSequenceGenerator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceConfig {
    /// Base URI of the counter service.
    pub base_uri: String,

    /// Path segment before the key (default: `id_generator`).
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Request timeout in milliseconds (default: 1000).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_namespace() -> String {
    "id_generator".to_string()
}

fn default_timeout_ms() -> u64 {
    1000
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            base_uri: "http://localhost:8000".to_string(),
            namespace: default_namespace(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Deserialize)]
struct TapResponse {
    last_insert_id: u64,
}

/// [`SequenceGenerator`] over the HTTP counter service.
#[derive(Debug, Clone)]
pub struct HttpSequenceGenerator {
    client: reqwest::Client,
    config: SequenceConfig,
}

impl HttpSequenceGenerator {
    /// Builds the client. Nothing is sent until the first call.
    pub fn new(config: SequenceConfig) -> Result<Self, SequenceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SequenceError::Transport {
                message: e.to_string(),
            })?;
        Ok(Self { client, config })
    }

    /// URL that advances `key`.
    pub fn tap_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}/tap",
            self.config.base_uri.trim_end_matches('/'),
            self.config.namespace,
            key
        )
    }
}

#[async_trait]
impl SequenceGenerator for HttpSequenceGenerator {
    async fn next(&self, key: &str) -> Result<u64, SequenceError> {
        let url = self.tap_url(key);
        debug!(url = %url, "Tapping sequence");

        let response = self
            .client
            .put(&url)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SequenceError::Timeout {
                        timeout_ms: self.config.timeout_ms,
                    }
                } else {
                    SequenceError::Transport {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SequenceError::Status {
                status: status.as_u16(),
            });
        }

        let body: TapResponse =
            response
                .json()
                .await
                .map_err(|e| SequenceError::InvalidResponse {
                    message: e.to_string(),
                })?;
        Ok(body.last_insert_id)
    }
}

/// Process-local counters, for tests and the memory backend.
#[derive(Debug, Default)]
pub struct InMemorySequence {
    counters: Mutex<HashMap<String, u64>>,
}

impl InMemorySequence {
    /// Creates a generator with every counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `key`, zero if never tapped.
    pub fn current(&self, key: &str) -> u64 {
        self.counters.lock().get(key).copied().unwrap_or_default()
    }
}

#[async_trait]
impl SequenceGenerator for InMemorySequence {
    async fn next(&self, key: &str) -> Result<u64, SequenceError> {
        let mut counters = self.counters.lock();
        let counter = counters.entry(key.to_string()).or_default();
        *counter += 1;
        Ok(*counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accepts one connection, captures the request head and answers with
    /// `status` and `body`.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                request.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length || n == 0 {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            let reply = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();

            let text = String::from_utf8_lossy(&request).to_string();
            text.lines().next().unwrap_or_default().to_string()
        });

        (base, handle)
    }

    fn generator(base_uri: String, timeout_ms: u64) -> HttpSequenceGenerator {
        HttpSequenceGenerator::new(SequenceConfig {
            base_uri,
            timeout_ms,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_keys_and_codes() {
        assert_eq!(task_sequence_key("p-1"), "task_p-1");
        assert_eq!(task_code(42), "TSK-42");
    }

    #[test]
    fn test_tap_url() {
        let sequence = generator("http://counter:8000/".to_string(), 1000);
        assert_eq!(
            sequence.tap_url("task_p-1"),
            "http://counter:8000/id_generator/task_p-1/tap"
        );
    }

    #[tokio::test]
    async fn test_in_memory_counters_are_per_key() {
        let sequence = InMemorySequence::new();
        assert_eq!(sequence.next("a").await.unwrap(), 1);
        assert_eq!(sequence.next("a").await.unwrap(), 2);
        assert_eq!(sequence.next("b").await.unwrap(), 1);
        assert_eq!(sequence.current("a"), 2);
        assert_eq!(sequence.current("missing"), 0);
    }

    #[tokio::test]
    async fn test_http_tap_reads_last_insert_id() {
        let (base, server) = serve_once("200 OK", r#"{"last_insert_id": 17}"#).await;
        let sequence = generator(base, 5000);

        assert_eq!(sequence.next("task_p-1").await.unwrap(), 17);
        assert_eq!(
            server.await.unwrap(),
            "PUT /id_generator/task_p-1/tap HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let (base, server) = serve_once("503 Service Unavailable", "{}").await;
        let sequence = generator(base, 5000);

        let err = sequence.next("task_p-1").await.unwrap_err();
        assert!(matches!(err, SequenceError::Status { status: 503 }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_http_body_without_counter() {
        let (base, server) = serve_once("200 OK", r#"{"id": 3}"#).await;
        let sequence = generator(base, 5000);

        let err = sequence.next("task_p-1").await.unwrap_err();
        assert!(matches!(err, SequenceError::InvalidResponse { .. }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_http_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        // Accepts and never answers
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let sequence = generator(base, 100);
        let err = sequence.next("task_p-1").await.unwrap_err();
        assert!(matches!(err, SequenceError::Timeout { timeout_ms: 100 }));
        server.abort();
    }
}
