//! The set of collections the workflow runs on.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backends::{IndexTemplate, SearchBackend};
use crate::index::{IndexLayout, IndexResolver};
use crate::model::{
    Annotation, Label, LabelExport, LabelGroup, Object, Project, Session, Study, Task,
};
use crate::store::DocumentStore;

/// Index prefix of every collection.
///
/// A prefix must not be another prefix followed by `_`, or the wildcard of
/// the shorter one would read the other's shards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct IndexPrefixes {
    pub annotations: String,
    pub labels: String,
    pub label_groups: String,
    pub objects: String,
    pub projects: String,
    pub studies: String,
    pub tasks: String,
    /// Alias name, not a shard prefix.
    pub sessions: String,
    pub label_exports: String,
}

impl Default for IndexPrefixes {
    fn default() -> Self {
        Self {
            annotations: "lab_annotations".to_string(),
            labels: "lab_labels".to_string(),
            label_groups: "lab_label_groups".to_string(),
            objects: "lab_objects".to_string(),
            projects: "lab_projects".to_string(),
            studies: "lab_studies".to_string(),
            tasks: "lab_tasks".to_string(),
            sessions: "lab_sessions".to_string(),
            label_exports: "lab_label_exports".to_string(),
        }
    }
}

impl IndexPrefixes {
    fn entries(&self) -> [(&'static str, &str, IndexLayout); 9] {
        [
            ("annotations", &self.annotations, IndexLayout::MonthlyByType),
            ("labels", &self.labels, IndexLayout::Monthly),
            ("label_groups", &self.label_groups, IndexLayout::Monthly),
            ("objects", &self.objects, IndexLayout::Monthly),
            ("projects", &self.projects, IndexLayout::Monthly),
            ("studies", &self.studies, IndexLayout::Monthly),
            ("tasks", &self.tasks, IndexLayout::Monthly),
            ("sessions", &self.sessions, IndexLayout::Alias),
            ("label_exports", &self.label_exports, IndexLayout::Monthly),
        ]
    }

    /// Checks that prefixes are non-empty, lower-case and do not overlap.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let entries = self.entries();
        let mut errors = Vec::new();

        for (name, prefix, _) in &entries {
            if prefix.is_empty() {
                errors.push(format!("{} prefix must not be empty", name));
            } else if prefix.chars().any(|c| c.is_uppercase() || c == '*' || c == ',') {
                errors.push(format!("{} prefix {:?} is not a valid index name", name, prefix));
            }
        }

        for (name, prefix, _) in &entries {
            for (other_name, other, _) in &entries {
                if name != other_name
                    && !other.is_empty()
                    && (prefix == other || prefix.starts_with(&format!("{}_", other)))
                {
                    errors.push(format!(
                        "{} prefix {:?} overlaps {} prefix {:?}",
                        name, prefix, other_name, other
                    ));
                }
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// One index template per collection.
    pub fn templates(&self) -> Vec<IndexTemplate> {
        self.entries()
            .into_iter()
            .map(|(_, prefix, layout)| IndexTemplate {
                name: format!("{}_template", prefix),
                pattern: IndexResolver::new(prefix, layout).wildcard(),
            })
            .collect()
    }
}

/// One document store per collection, sharing a backend.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct Stores {
    pub annotations: DocumentStore<Annotation>,
    pub labels: DocumentStore<Label>,
    pub label_groups: DocumentStore<LabelGroup>,
    pub objects: DocumentStore<Object>,
    pub projects: DocumentStore<Project>,
    pub studies: DocumentStore<Study>,
    pub tasks: DocumentStore<Task>,
    pub sessions: DocumentStore<Session>,
    pub label_exports: DocumentStore<LabelExport>,
    backend: Arc<dyn SearchBackend>,
}

impl Stores {
    /// Builds every store over `backend`.
    pub fn new(backend: Arc<dyn SearchBackend>, prefixes: &IndexPrefixes) -> Self {
        let resolver = |prefix: &str, layout| IndexResolver::new(prefix, layout);
        Self {
            annotations: DocumentStore::new(
                backend.clone(),
                resolver(&prefixes.annotations, IndexLayout::MonthlyByType),
            ),
            labels: DocumentStore::new(backend.clone(), resolver(&prefixes.labels, IndexLayout::Monthly)),
            label_groups: DocumentStore::new(
                backend.clone(),
                resolver(&prefixes.label_groups, IndexLayout::Monthly),
            ),
            objects: DocumentStore::new(backend.clone(), resolver(&prefixes.objects, IndexLayout::Monthly)),
            projects: DocumentStore::new(
                backend.clone(),
                resolver(&prefixes.projects, IndexLayout::Monthly),
            ),
            studies: DocumentStore::new(backend.clone(), resolver(&prefixes.studies, IndexLayout::Monthly)),
            tasks: DocumentStore::new(backend.clone(), resolver(&prefixes.tasks, IndexLayout::Monthly)),
            sessions: DocumentStore::new(backend.clone(), resolver(&prefixes.sessions, IndexLayout::Alias)),
            label_exports: DocumentStore::new(
                backend.clone(),
                resolver(&prefixes.label_exports, IndexLayout::Monthly),
            ),
            backend,
        }
    }

    /// Sets the bulk batch size of every store.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.annotations = self.annotations.with_batch_size(batch_size);
        self.labels = self.labels.with_batch_size(batch_size);
        self.label_groups = self.label_groups.with_batch_size(batch_size);
        self.objects = self.objects.with_batch_size(batch_size);
        self.projects = self.projects.with_batch_size(batch_size);
        self.studies = self.studies.with_batch_size(batch_size);
        self.tasks = self.tasks.with_batch_size(batch_size);
        self.sessions = self.sessions.with_batch_size(batch_size);
        self.label_exports = self.label_exports.with_batch_size(batch_size);
        self
    }

    /// The shared backend.
    pub fn backend(&self) -> &Arc<dyn SearchBackend> {
        &self.backend
    }
}
