//! Transition engine: the periodic sweep that moves items through
//! UPLOADED → PROCESSING → DONE | FAILED.
//!
//! Each sweep runs two passes in order. The first picks up every uploaded
//! item and starts a processing timer for it. The second finishes every
//! processing item whose timer has run out, drawing success or failure.
//! Items started in the first pass are never finished in the same sweep.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::access::AccessLayer;
use crate::config::{DurationPolicy, FlowConfig};
use crate::state_machine::{ItemId, ItemState, ProcessingOutcome, StateMachine, Transition};

/// When an item entered PROCESSING and how long it has to stay there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingTimer {
    pub started_at: DateTime<Utc>,
    pub required_ms: u64,
}

impl ProcessingTimer {
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        (now - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// Per-item timing metadata, kept outside the item records.
#[derive(Debug, Default)]
pub struct ProcessingTimers {
    timers: Mutex<HashMap<ItemId, ProcessingTimer>>,
}

impl ProcessingTimers {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ItemId, ProcessingTimer>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn start(&self, id: ItemId, timer: ProcessingTimer) {
        self.lock().insert(id, timer);
    }

    pub fn get(&self, id: &ItemId) -> Option<ProcessingTimer> {
        self.lock().get(id).copied()
    }

    pub fn remove(&self, id: &ItemId) -> Option<ProcessingTimer> {
        self.lock().remove(id)
    }

    /// Drop timers for items not in `live`. Returns how many were dropped.
    pub fn retain_only(&self, live: &HashSet<ItemId>) -> usize {
        let mut timers = self.lock();
        let before = timers.len();
        timers.retain(|id, _| live.contains(id));
        before - timers.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Items moved to PROCESSING.
    pub started: Vec<ItemId>,
    /// Items moved to DONE or FAILED.
    pub finished: Vec<(ItemId, ItemState)>,
    /// Processing items found without a timer; a timer was started for them.
    pub resumed: Vec<ItemId>,
    /// Stale timers dropped because their item is no longer processing.
    pub pruned: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty()
            && self.finished.is_empty()
            && self.resumed.is_empty()
            && self.pruned == 0
    }
}

#[derive(Debug, Clone, Copy)]
struct EngineSettings {
    interval: Duration,
    min_processing_ms: u64,
    max_extra_processing_ms: u64,
    failure_probability: f64,
    duration_policy: DurationPolicy,
}

pub struct TransitionEngine {
    access: Arc<AccessLayer>,
    timers: Arc<ProcessingTimers>,
    settings: EngineSettings,
    rng: Mutex<StdRng>,
    sweeps: AtomicU64,
}

impl TransitionEngine {
    pub fn new(access: Arc<AccessLayer>, config: &FlowConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        // NaN survives `clamp`; treat any non-finite probability as "never fail".
        let failure_probability = if config.failure_probability.is_finite() {
            config.failure_probability.clamp(0.0, 1.0)
        } else {
            warn!(
                value = config.failure_probability,
                "non-finite failure probability, using 0"
            );
            0.0
        };
        Self {
            timers: access.timers(),
            access,
            settings: EngineSettings {
                interval: config.sweep_interval(),
                min_processing_ms: config.min_processing_ms,
                max_extra_processing_ms: config.max_extra_processing_ms,
                failure_probability,
                duration_policy: config.duration_policy,
            },
            rng: Mutex::new(rng),
            sweeps: AtomicU64::new(0),
        }
    }

    /// Number of sweeps run so far.
    pub fn sweep_count(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now())
    }

    /// Run one sweep as if the clock read `now`.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        self.start_uploaded(now, &mut report);
        self.finish_processing(now, &mut report);
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        report
    }

    fn start_uploaded(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        let target = StateMachine::next(ItemState::Uploaded, Transition::Start)
            .unwrap_or(ItemState::Processing);

        for item in self.access.list_by_state(ItemState::Uploaded) {
            match self.access.advance(&item.id, ItemState::Uploaded, target) {
                Ok(Some(_)) => {
                    info!(id = %item.id, label = %item.label, "starting processing");
                    self.timers.start(item.id, self.new_timer(now));
                    report.started.push(item.id);
                }
                // Moved or deleted since the listing; nothing to do.
                Ok(None) | Err(_) => {}
            }
        }
    }

    fn finish_processing(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        let processing = self.access.list_by_state(ItemState::Processing);
        let live: HashSet<ItemId> = processing.iter().map(|item| item.id).collect();
        report.pruned = self.timers.retain_only(&live);
        let just_started: HashSet<ItemId> = report.started.iter().copied().collect();

        for item in processing {
            if just_started.contains(&item.id) {
                continue;
            }
            let Some(timer) = self.timers.get(&item.id) else {
                debug!(id = %item.id, "no processing timer, starting one now");
                self.timers.start(item.id, self.new_timer(now));
                report.resumed.push(item.id);
                continue;
            };

            let required_ms = match self.settings.duration_policy {
                DurationPolicy::Fixed => timer.required_ms,
                DurationPolicy::Resample => self.sample_required_ms(),
            };
            if timer.elapsed_ms(now) < required_ms {
                continue;
            }

            let outcome = self.draw_outcome();
            let Some(target) = StateMachine::next(ItemState::Processing, Transition::Finish(outcome))
            else {
                continue;
            };
            match self.access.advance(&item.id, ItemState::Processing, target) {
                Ok(Some(_)) => {
                    info!(id = %item.id, label = %item.label, to = %target, "completed processing");
                    report.finished.push((item.id, target));
                }
                Ok(None) => {}
                Err(e) => debug!(id = %item.id, error = %e, "item vanished mid-sweep"),
            }
            self.timers.remove(&item.id);
        }
    }

    fn new_timer(&self, now: DateTime<Utc>) -> ProcessingTimer {
        ProcessingTimer {
            started_at: now,
            required_ms: self.sample_required_ms(),
        }
    }

    /// `min + uniform[0, max_extra)`, saturating at `u64::MAX`.
    fn sample_required_ms(&self) -> u64 {
        let extra = self.settings.max_extra_processing_ms;
        if extra == 0 {
            return self.settings.min_processing_ms;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        self.settings
            .min_processing_ms
            .saturating_add(rng.gen_range(0..extra))
    }

    fn draw_outcome(&self) -> ProcessingOutcome {
        let p = self.settings.failure_probability;
        if p <= 0.0 {
            return ProcessingOutcome::Success;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        if rng.gen_bool(p) {
            ProcessingOutcome::Failure
        } else {
            ProcessingOutcome::Success
        }
    }

    /// Run sweeps on a fixed interval until the returned handle is stopped.
    ///
    /// The first sweep happens immediately. Missed ticks are skipped.
    pub fn spawn(self: Arc<Self>) -> EngineHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let interval = self.settings.interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.sweep();
                        if !report.is_empty() {
                            debug!(
                                started = report.started.len(),
                                finished = report.finished.len(),
                                resumed = report.resumed.len(),
                                pruned = report.pruned,
                                "sweep complete"
                            );
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(sweeps = self.sweep_count(), "transition engine stopped");
        });

        EngineHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running sweep loop.
pub struct EngineHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Signal the loop to exit and wait for it.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "transition engine task ended abnormally");
        }
    }
}
