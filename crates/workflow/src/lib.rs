//! Annolab Workflow Services
//!
//! The labeling workflow on top of [`annolab_persistence`]: turning
//! assignment requests into tasks, keeping study status in line with task
//! status, and the supporting task, study, object and export operations.
//!
//! # Architecture
//!
//! - [`assignment`] - Assignment requests and their validation
//! - [`distributor`] - Task distribution under the `ALL` and `EQUALLY` strategies
//! - [`status`] - Study status derived from task tallies
//! - [`tasks`] - Task status changes, archiving, comments and guarded deletion
//! - [`studies`] - Removal of unassigned studies
//! - [`objects`] - Object expansion and its bounded queue
//! - [`annotations`] - Annotation listing with creator names, and saving a task's annotations
//! - [`stats`] - Label usage statistics and study assignees
//! - [`export`] - Label exports
//! - [`sequence`] - Task code generation
//! - [`collaborators`] - Identity, archive and blob seams
//! - [`error`] - Error types
//!
//! # Quick Start
//!
//! ```
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! use annolab_persistence::backends::memory::InMemoryBackend;
//! use annolab_persistence::model::TaskType;
//! use annolab_persistence::{CancelSignal, IndexPrefixes, Stores};
//! use annolab_workflow::assignment::{AssignmentRequest, SourceType, Strategy};
//! use annolab_workflow::collaborators::{InMemoryArchive, InMemoryBlobStore, InMemoryIdentity};
//! use annolab_workflow::sequence::InMemorySequence;
//! use annolab_workflow::Services;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let stores = Stores::new(Arc::new(InMemoryBackend::new()), &IndexPrefixes::default());
//! let services = Services::new(
//!     stores,
//!     Arc::new(InMemorySequence::new()),
//!     Arc::new(InMemoryIdentity::new()),
//!     Arc::new(InMemoryArchive::new()),
//!     Arc::new(InMemoryBlobStore::new()),
//! );
//!
//! let request = AssignmentRequest {
//!     project_id: "project-1".to_string(),
//!     assignee_ids: BTreeMap::from([(TaskType::Annotate, vec!["annotator-1".to_string()])]),
//!     source_type: SourceType::Selected,
//!     study_ids: vec!["study-1".to_string()],
//!     study_instance_uids: Vec::new(),
//!     search_query: None,
//!     strategy: Strategy::All,
//! };
//! let report = services
//!     .distributor
//!     .distribute(&request, "owner-1", &CancelSignal::never())
//!     .await?;
//! assert!(report.studies.is_empty());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use std::sync::Arc;

use annolab_persistence::Stores;

pub mod annotations;
pub mod assignment;
pub mod collaborators;
pub mod distributor;
pub mod error;
pub mod export;
pub mod objects;
pub mod sequence;
pub mod stats;
pub mod status;
pub mod studies;
pub mod tasks;

pub use annotations::{AnnotationCatalog, SaveAnnotationsRequest};
pub use assignment::{AssignmentRequest, SearchSpec, SourceType, Strategy};
pub use distributor::{DistributionReport, TaskDistributor};
pub use error::{BulkReportExt, SequenceError, WorkflowError, WorkflowResult};
pub use export::{ExportRequest, ExportService};
pub use objects::{ObjectDeclaration, ObjectExpander, ObjectExpansionQueue, ObjectExpansionWorker};
pub use sequence::{HttpSequenceGenerator, SequenceConfig, SequenceGenerator};
pub use stats::{LabelStats, StatsService};
pub use status::StatusPropagator;
pub use studies::StudyCleanup;
pub use tasks::TaskManager;

use collaborators::{ArchiveStore, BlobStore, IdentityLookup};

/// Every workflow service, wired over one [`Stores`] bundle.
#[derive(Debug, Clone)]
pub struct Services {
    /// Task distribution.
    pub distributor: TaskDistributor,
    /// Study status propagation.
    pub propagator: StatusPropagator,
    /// Task lifecycle.
    pub tasks: TaskManager,
    /// Study removal.
    pub studies: StudyCleanup,
    /// Object expansion, used by the queue worker.
    pub expander: ObjectExpander,
    /// Annotation listing and saving.
    pub annotations: AnnotationCatalog,
    /// Label statistics and study assignees.
    pub stats: StatsService,
    /// Label exports.
    pub exports: ExportService,
}

impl Services {
    /// Wires the services.
    pub fn new(
        stores: Stores,
        sequence: Arc<dyn SequenceGenerator>,
        identity: Arc<dyn IdentityLookup>,
        archive: Arc<dyn ArchiveStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let propagator = StatusPropagator::new(stores.tasks.clone(), stores.studies.clone());
        Self {
            distributor: TaskDistributor::new(
                stores.studies.clone(),
                stores.tasks.clone(),
                sequence,
                propagator.clone(),
            ),
            tasks: TaskManager::new(
                stores.tasks.clone(),
                stores.annotations.clone(),
                propagator.clone(),
            ),
            studies: StudyCleanup::new(
                stores.studies.clone(),
                stores.tasks.clone(),
                stores.objects.clone(),
                archive,
            ),
            expander: ObjectExpander::new(stores.objects.clone()),
            annotations: AnnotationCatalog::new(
                stores.annotations.clone(),
                stores.tasks.clone(),
                identity,
            ),
            stats: StatsService::new(stores.clone()),
            exports: ExportService::new(stores, blobs),
            propagator,
        }
    }
}

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
