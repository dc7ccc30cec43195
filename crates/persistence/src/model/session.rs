use serde::{Deserialize, Serialize};

use super::{Meta, require};
use crate::store::{Document, Patch};

wire_enum! {
    /// Kind of item a session points to.
    SessionItemType {
        Task => "TASK",
        Study => "STUDY",
    }
}

/// One entry of a viewer session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionItem {
    #[serde(rename = "type")]
    pub item_type: SessionItemType,
    pub id: String,
    #[serde(default)]
    pub meta: Option<Meta>,
}

/// A viewer session: an ordered list of tasks or studies.
///
/// Sessions live in a single alias index rather than month shards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub data: Vec<SessionItem>,
    pub created: i64,
}

impl Document for Session {
    const COLLECTION: &'static str = "sessions";
    type Patch = SessionPatch;

    fn id(&self) -> &str {
        &self.session_id
    }

    fn created_ms(&self) -> i64 {
        self.created
    }

    fn validate(&self) -> Result<(), String> {
        validate_items(&self.data)
    }
}

fn validate_items(items: &[SessionItem]) -> Result<(), String> {
    if items.is_empty() {
        return Err("session data must not be empty".to_string());
    }
    items.iter().try_for_each(|item| require(&item.id, "item id"))
}

/// Replaces the items of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<SessionItem>>,
}

impl Patch for SessionPatch {
    fn validate(&self) -> Result<(), String> {
        match &self.data {
            Some(items) => validate_items(items),
            None => Ok(()),
        }
    }
}
