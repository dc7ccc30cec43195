//! Entity models.
//!
//! Every entity is a plain serde struct implementing [`Document`](crate::store::Document),
//! with a typed patch whose fields are all optional. Enumerations serialize to
//! the upper-case strings stored in the indices.

#![allow(missing_docs)]

/// Declares a unit enum with a fixed wire string per variant.
macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        pub enum $name {
            $(
                #[doc = concat!("`", $wire, "`")]
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The stored string.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    other => Err(format!("unknown {} {:?}", stringify!($name), other)),
                }
            }
        }
    };
}

mod annotation;
mod label;
mod label_export;
mod label_group;
mod object;
mod project;
mod session;
mod study;
mod task;

pub use annotation::{Annotation, AnnotationEvent, AnnotationPatch, AnnotationType};
pub use label::{ChildrenSelectType, Label, LabelPatch, LabelScope, LabelType};
pub use label_export::{ExportStatus, LabelExport, LabelExportPatch};
pub use label_group::{LabelGroup, LabelGroupPatch};
pub use object::{MaskedMeta, Object, ObjectMeta, ObjectPatch, ObjectType};
pub use project::{LabelingType, Project, ProjectPatch, ProjectPerson, ProjectRole, Workflow};
pub use session::{Session, SessionItem, SessionItemType, SessionPatch};
pub use study::{DicomTags, Study, StudyPatch, StudyStatus};
pub use task::{Task, TaskPatch, TaskStatus, TaskType};

/// Free-form metadata object.
pub type Meta = serde_json::Map<String, serde_json::Value>;

pub(crate) fn require(value: &str, field: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} is required", field));
    }
    Ok(())
}
