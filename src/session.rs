use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::access::AccessLayer;
use crate::config::FlowConfig;
use crate::engine::TransitionEngine;
use crate::events::ItemEvent;
use crate::state_machine::{Item, Upload};
use crate::store::{StateCounts, Store};

/// What a finished session looked like.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    /// Final records, oldest upload first.
    pub items: Vec<Item>,
    pub skipped: usize,
    pub counts: StateCounts,
    pub events: Vec<ItemEvent>,
    pub sweeps: u64,
    pub elapsed_ms: u64,
    pub timed_out: bool,
}

/// Wires a store, access layer and transition engine together and drives
/// one batch of uploads until every item has settled.
pub struct Session {
    config: FlowConfig,
    access: Arc<AccessLayer>,
    engine: Arc<TransitionEngine>,
}

impl Session {
    pub fn new(config: FlowConfig) -> Self {
        let store = Arc::new(Store::new());
        let access = Arc::new(AccessLayer::new(store, &config));
        let engine = Arc::new(TransitionEngine::new(Arc::clone(&access), &config));
        Self {
            config,
            access,
            engine,
        }
    }

    pub fn access(&self) -> &Arc<AccessLayer> {
        &self.access
    }

    /// Ingest `uploads`, run the engine, and poll until every item is DONE or
    /// FAILED or the session timeout passes.
    ///
    /// `on_poll` is called after every poll with the current counts and the
    /// events recorded since the previous poll.
    pub async fn run<F>(&self, uploads: Vec<Upload>, mut on_poll: F) -> Result<SessionReport>
    where
        F: FnMut(&StateCounts, &[ItemEvent]),
    {
        let batch = self
            .access
            .create_batch(uploads)
            .context("no uploads were accepted")?;
        let started = Instant::now();
        let handle = Arc::clone(&self.engine).spawn();

        let mut cursor = 0;
        let mut timed_out = false;
        loop {
            let fresh = self.access.events_since(cursor);
            if let Some(last) = fresh.last() {
                cursor = last.seq + 1;
            }
            let counts = self.access.counts();
            on_poll(&counts, &fresh);

            if counts.is_settled() {
                break;
            }
            if started.elapsed() >= self.config.session_timeout() {
                warn!(
                    uploaded = counts.uploaded,
                    processing = counts.processing,
                    "session timed out before all items settled"
                );
                timed_out = true;
                break;
            }
            sleep(self.config.poll_interval()).await;
        }
        handle.stop().await;

        // Events recorded between the last poll and the engine stopping.
        let tail = self.access.events_since(cursor);
        if !tail.is_empty() {
            on_poll(&self.access.counts(), &tail);
        }

        let mut items: Vec<Item> = batch
            .created
            .iter()
            .filter_map(|item| self.access.get(&item.id).ok())
            .collect();
        items.sort_by_key(|item| item.created_at);
        self.verify_payloads(&items)?;

        Ok(SessionReport {
            items,
            skipped: batch.skipped,
            counts: self.access.counts(),
            events: self.access.events(),
            sweeps: self.engine.sweep_count(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            timed_out,
        })
    }

    // Every record must still point at a payload of the recorded size.
    fn verify_payloads(&self, items: &[Item]) -> Result<()> {
        for item in items {
            let payload = self
                .access
                .get_payload(&item.id)
                .with_context(|| format!("payload missing for {}", item.label))?;
            if payload.len() as u64 != item.payload_size {
                bail!(
                    "payload for {} is {} bytes, record says {}",
                    item.label,
                    payload.len(),
                    item.payload_size
                );
            }
        }
        Ok(())
    }

    /// Delete every item in the report. Returns how many were removed.
    pub fn cleanup(&self, report: &SessionReport) -> usize {
        let mut removed = 0;
        for item in &report.items {
            match self.access.delete(&item.id) {
                Ok(_) => removed += 1,
                Err(e) => debug!(id = %item.id, error = %e, "cleanup skipped item"),
            }
        }
        removed
    }
}
