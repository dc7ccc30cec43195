//! Elasticsearch index templates.
//!
//! Shards are created on first write, so mappings are installed as templates
//! keyed by collection prefix. Dynamic mapping gives every string field its
//! `.keyword` sub-field; the template only pins the fields that must not be
//! text: timestamps as `epoch_millis` dates and the archive flag as boolean.

use elasticsearch::indices::IndicesPutTemplateParts;
use serde_json::{Value, json};

use crate::backends::IndexTemplate;
use crate::error::StorageResult;

use super::backend::{ElasticsearchBackend, ElasticsearchConfig, read_json};

/// Builds the body of a legacy index template.
pub fn create_template_body(config: &ElasticsearchConfig, template: &IndexTemplate) -> Value {
    let epoch_millis = json!({ "type": "date", "format": "epoch_millis" });

    json!({
        "index_patterns": [template.pattern],
        "settings": {
            "number_of_shards": config.number_of_shards,
            "number_of_replicas": config.number_of_replicas,
            "index.max_result_window": config.max_result_window,
            "refresh_interval": config.refresh_interval,
        },
        "mappings": {
            "properties": {
                "created": epoch_millis,
                "modified": epoch_millis,
                "time_inserted": epoch_millis,
                "archived": { "type": "boolean" },
            }
        }
    })
}

/// Installs (or replaces) one index template.
pub async fn put_index_template(
    backend: &ElasticsearchBackend,
    template: &IndexTemplate,
) -> StorageResult<()> {
    let body = create_template_body(backend.config(), template);

    let response = backend
        .client()
        .indices()
        .put_template(IndicesPutTemplateParts::Name(&template.name))
        .body(body)
        .send()
        .await
        .map_err(|e| {
            crate::error::StorageError::Backend(crate::error::BackendError::Transport {
                backend_name: "elasticsearch".to_string(),
                message: format!("Failed to create index template {}: {}", template.name, e),
                source: Some(Box::new(e)),
            })
        })?;

    read_json(response, "Failed to read template response").await?;

    tracing::info!(
        template = %template.name,
        pattern = %template.pattern,
        "Installed Elasticsearch index template"
    );

    Ok(())
}
