use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::ItemState;

/// Opaque identifier assigned to an item at creation.
pub type ItemId = Uuid;

/// One ingested photo and its processing state.
///
/// The payload bytes live in the store next to the record; `payload_ref`
/// is the logical path they are served from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    pub label: String,
    pub state: ItemState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub payload_size: u64,
    pub payload_ref: String,
}

impl Item {
    pub fn new(label: String, payload_size: u64) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Self {
            id,
            label,
            state: ItemState::Uploaded,
            created_at: now,
            updated_at: now,
            payload_size,
            payload_ref: format!("/photos/{id}/image"),
        }
    }

    /// Move to `state` and bump `updated_at`.
    ///
    /// The wall clock may step backwards, so `updated_at` is clamped to
    /// never precede `created_at` or the previous update.
    pub fn set_state(&mut self, state: ItemState) {
        self.state = state;
        self.updated_at = Utc::now().max(self.updated_at).max(self.created_at);
    }
}

/// A payload handed to the workflow, before it becomes an [`Item`].
#[derive(Debug, Clone)]
pub struct Upload {
    /// Display name, usually the original filename.
    pub label: Option<String>,
    /// Declared MIME type, if the source supplied one.
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Upload {
    /// Build an upload whose content type is inferred from the label's extension.
    ///
    /// Unrecognised extensions leave the content type unset, so the upload
    /// is skipped as a non-image at the batch boundary.
    pub fn new(label: impl Into<String>, bytes: Vec<u8>) -> Self {
        let label = label.into();
        let content_type = image_type_for_upload(&label).map(str::to_string);
        Self {
            label: Some(label),
            content_type,
            bytes,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// True when the declared content type is `image/*`.
    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with("image/"))
    }
}

/// Infer the MIME type used to serve a payload from its label.
///
/// Falls back to JPEG for anything unrecognised.
pub fn content_type_for(label: &str) -> &'static str {
    let lower = label.to_ascii_lowercase();
    if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".gif") {
        "image/gif"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

/// Infer the MIME type of an incoming file from its label.
///
/// Unlike [`content_type_for`] there is no fallback: only known image
/// extensions are recognised.
pub fn image_type_for_upload(label: &str) -> Option<&'static str> {
    let (_, ext) = label.rsplit_once('.')?;
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

/// Label given to uploads that arrive without a usable name.
pub fn default_label() -> String {
    format!("unknown_{}", Utc::now().timestamp_millis())
}
