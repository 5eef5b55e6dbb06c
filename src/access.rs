//! Access layer over the [`Store`].
//!
//! The only component that validates input. Every mutation goes through
//! here so the event log and the engine's processing timers stay in step
//! with the records.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::FlowConfig;
use crate::engine::ProcessingTimers;
use crate::error::{FlowError, Result};
use crate::events::{ChangeSource, EventKind, EventLog, ItemEvent};
use crate::state_machine::{Item, ItemId, ItemState, Upload, default_label};
use crate::store::{StateCounts, StateUpdate, Store};

/// Size limits enforced on ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_payload_bytes: u64,
    pub max_batch_bytes: u64,
}

impl From<&FlowConfig> for UploadLimits {
    fn from(config: &FlowConfig) -> Self {
        Self {
            max_payload_bytes: config.max_payload_bytes,
            max_batch_bytes: config.max_batch_bytes,
        }
    }
}

/// Outcome of a multi-upload create.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub created: Vec<Item>,
    pub skipped: usize,
}

pub struct AccessLayer {
    store: Arc<Store>,
    timers: Arc<ProcessingTimers>,
    events: Arc<EventLog>,
    limits: UploadLimits,
}

impl AccessLayer {
    pub fn new(store: Arc<Store>, config: &FlowConfig) -> Self {
        Self {
            store,
            timers: Arc::new(ProcessingTimers::default()),
            events: Arc::new(EventLog::new(config.event_log_capacity)),
            limits: UploadLimits::from(config),
        }
    }

    /// Timing state shared with the transition engine.
    pub fn timers(&self) -> Arc<ProcessingTimers> {
        Arc::clone(&self.timers)
    }

    /// Ingest one payload. The new item starts in `UPLOADED`.
    pub fn create(&self, label: &str, payload: Vec<u8>) -> Result<Item> {
        if payload.is_empty() {
            return Err(FlowError::InvalidInput("payload is empty".into()));
        }
        let size = payload.len() as u64;
        if size > self.limits.max_payload_bytes {
            return Err(FlowError::InvalidInput(format!(
                "payload of {size} bytes exceeds limit of {} bytes",
                self.limits.max_payload_bytes
            )));
        }

        let label = if label.trim().is_empty() {
            default_label()
        } else {
            label.to_string()
        };
        let item = Item::new(label, size);
        self.store.insert(item.clone(), payload);
        self.events
            .record(item.id, &item.label, EventKind::Uploaded { size });
        info!(id = %item.id, label = %item.label, size, "uploaded item");
        Ok(item)
    }

    /// Ingest several uploads at once.
    ///
    /// Uploads that are empty, not `image/*`, or too large are skipped and
    /// counted. Fails with [`FlowError::EmptyBatch`] if nothing was created,
    /// and with [`FlowError::InvalidInput`] if the batch as a whole is over
    /// the size limit (nothing is created in that case).
    pub fn create_batch(&self, uploads: Vec<Upload>) -> Result<BatchReport> {
        if uploads.is_empty() {
            return Err(FlowError::InvalidInput("no uploads supplied".into()));
        }
        let total: u64 = uploads.iter().map(|u| u.bytes.len() as u64).sum();
        if total > self.limits.max_batch_bytes {
            return Err(FlowError::InvalidInput(format!(
                "batch of {total} bytes exceeds limit of {} bytes",
                self.limits.max_batch_bytes
            )));
        }

        let mut created = Vec::with_capacity(uploads.len());
        let mut skipped = 0;
        for upload in uploads {
            let label = upload.label.as_deref().unwrap_or_default();
            if !upload.is_image() {
                warn!(
                    label,
                    content_type = upload.content_type.as_deref().unwrap_or("none"),
                    "skipping non-image upload"
                );
                skipped += 1;
                continue;
            }
            match self.create(label, upload.bytes) {
                Ok(item) => created.push(item),
                Err(e) => {
                    warn!(label, error = %e, "skipping upload");
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            info!(created = created.len(), skipped, "batch ingested with skips");
        }
        if created.is_empty() {
            return Err(FlowError::EmptyBatch { skipped });
        }
        Ok(BatchReport { created, skipped })
    }

    pub fn list(&self) -> Vec<Item> {
        self.store.list_all()
    }

    pub fn list_by_state(&self, state: ItemState) -> Vec<Item> {
        self.store.list_by_state(state)
    }

    pub fn get(&self, id: &ItemId) -> Result<Item> {
        self.store.get(id).ok_or(FlowError::NotFound(*id))
    }

    /// Raw payload bytes. Use [`content_type_for`](crate::state_machine::content_type_for)
    /// on the label to pick a MIME type when serving them.
    pub fn get_payload(&self, id: &ItemId) -> Result<Arc<[u8]>> {
        self.store.get_payload(id).ok_or(FlowError::NotFound(*id))
    }

    /// Force an item into `state`, bypassing the engine.
    ///
    /// Overriding an item out of PROCESSING drops its timer, so an item that
    /// is later put back into PROCESSING waits a full duration again.
    pub fn set_state(&self, id: &ItemId, state: ItemState) -> Result<Item> {
        let (previous, item) = self
            .store
            .update_state(id, state)
            .ok_or(FlowError::NotFound(*id))?;
        if previous == ItemState::Processing {
            self.timers.remove(id);
        }
        self.events.record(
            item.id,
            &item.label,
            EventKind::StateChanged {
                from: previous,
                to: state,
                source: ChangeSource::Override,
            },
        );
        info!(id = %id, from = %previous, to = %state, "item state overridden");
        Ok(item)
    }

    /// Engine-side transition: applies only if the item is still in `from`.
    ///
    /// `Ok(None)` means the item moved concurrently and nothing was changed.
    pub(crate) fn advance(
        &self,
        id: &ItemId,
        from: ItemState,
        to: ItemState,
    ) -> Result<Option<Item>> {
        match self.store.update_state_if(id, from, to) {
            StateUpdate::Applied(item) => {
                self.events.record(
                    item.id,
                    &item.label,
                    EventKind::StateChanged {
                        from,
                        to,
                        source: ChangeSource::Engine,
                    },
                );
                info!(
                    id = %id,
                    label = %item.label,
                    from = %from,
                    to = %to,
                    "item state changed"
                );
                Ok(Some(item))
            }
            StateUpdate::Stale(_) => Ok(None),
            StateUpdate::Missing => Err(FlowError::NotFound(*id)),
        }
    }

    /// Remove an item, its payload and any processing timer.
    pub fn delete(&self, id: &ItemId) -> Result<Item> {
        let item = self.store.delete(id).ok_or(FlowError::NotFound(*id))?;
        self.timers.remove(id);
        self.events.record(item.id, &item.label, EventKind::Deleted);
        info!(id = %id, label = %item.label, "deleted item");
        Ok(item)
    }

    pub fn counts(&self) -> StateCounts {
        self.store.counts()
    }

    /// Chronological event log, oldest first.
    pub fn events(&self) -> Vec<ItemEvent> {
        self.events.snapshot()
    }

    /// Events with `seq >= cursor`.
    pub fn events_since(&self, cursor: u64) -> Vec<ItemEvent> {
        self.events.since(cursor)
    }
}
