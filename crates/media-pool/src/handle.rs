//! Per-handle playback task.
//!
//! Each pooled source gets one task that owns all `seek`/`play`/`pause`
//! calls on it. Intents arrive through a watch slot, so a burst of frame
//! ticks collapses into the most recent intent and at most one operation
//! is ever in flight for a handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cutline_common::clock::DriftMeasurement;
use cutline_project_model::AssetId;
use tokio::sync::watch;
use tracing::{debug, error, trace, warn};

use crate::source::{lock, MediaSource, ReadyState};

/// What the frame loop wants a handle to be doing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackIntent {
    /// Be at `source_secs`, playing or paused.
    Sync { source_secs: f64, play: bool },
    /// Stop advancing, wherever the handle is.
    Pause,
}

/// Load state of a pooled handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleState {
    Loading,
    Ready,
    /// Load failed; the handle is never retried until released.
    Unplayable(String),
    Released,
}

pub(crate) struct HandleShared {
    state: Mutex<HandleState>,
    applied: AtomicU64,
}

impl HandleShared {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HandleState::Loading),
            applied: AtomicU64::new(0),
        })
    }

    pub(crate) fn state(&self) -> HandleState {
        lock(&self.state).clone()
    }

    pub(crate) fn set_state(&self, state: HandleState) {
        *lock(&self.state) = state;
    }

    /// Number of intents fully applied so far.
    pub(crate) fn applied(&self) -> u64 {
        self.applied.load(Ordering::Acquire)
    }
}

pub(crate) async fn run_handle(
    asset_id: AssetId,
    source: Arc<dyn MediaSource>,
    shared: Arc<HandleShared>,
    mut intents: watch::Receiver<Option<PlaybackIntent>>,
    seek_threshold_ms: f64,
) {
    let loaded = tokio::select! {
        biased;
        result = source.load() => result,
        _ = closed(&mut intents) => {
            debug!(asset = %asset_id, "Handle released while loading");
            source.stop();
            shared.set_state(HandleState::Released);
            return;
        }
    };

    if let Err(e) = loaded {
        error!(asset = %asset_id, error = %e, "Media failed to load; clip marked unplayable");
        source.stop();
        shared.set_state(HandleState::Unplayable(e.to_string()));
        // Hold the slot open so the pool keeps reporting the failure.
        closed(&mut intents).await;
        shared.set_state(HandleState::Released);
        return;
    }

    shared.set_state(HandleState::Ready);
    debug!(asset = %asset_id, "Handle ready");

    // The last intent sent while loading is applied first.
    let pending = *intents.borrow_and_update();
    if let Some(intent) = pending {
        apply(&asset_id, source.as_ref(), intent, seek_threshold_ms).await;
        shared.applied.fetch_add(1, Ordering::AcqRel);
    }

    while intents.changed().await.is_ok() {
        let intent = *intents.borrow_and_update();
        if let Some(intent) = intent {
            apply(&asset_id, source.as_ref(), intent, seek_threshold_ms).await;
            shared.applied.fetch_add(1, Ordering::AcqRel);
        }
    }

    source.stop();
    shared.set_state(HandleState::Released);
    debug!(asset = %asset_id, "Handle stopped");
}

async fn apply(
    asset_id: &AssetId,
    source: &dyn MediaSource,
    intent: PlaybackIntent,
    threshold_ms: f64,
) {
    match intent {
        PlaybackIntent::Sync { source_secs, play } => {
            let drift = DriftMeasurement {
                expected_secs: source_secs,
                actual_secs: source.position_secs(),
            };
            if drift.exceeds_threshold_ms(threshold_ms) {
                trace!(asset = %asset_id, drift_ms = drift.drift_ms(), "Seeking to correct drift");
                if let Err(e) = source.seek(source_secs).await {
                    warn!(asset = %asset_id, error = %e, "Seek failed");
                }
            }

            if play && source.is_paused() {
                if source.ready_state() >= ReadyState::HaveEnoughData {
                    if let Err(e) = source.play().await {
                        warn!(asset = %asset_id, error = %e, "Play failed");
                    }
                } else {
                    trace!(asset = %asset_id, "Waiting for buffered data before playing");
                }
            } else if !play && !source.is_paused() {
                pause(asset_id, source).await;
            }
        }
        PlaybackIntent::Pause => {
            if !source.is_paused() {
                pause(asset_id, source).await;
            }
        }
    }
}

async fn pause(asset_id: &AssetId, source: &dyn MediaSource) {
    if let Err(e) = source.pause().await {
        warn!(asset = %asset_id, error = %e, "Pause failed");
    }
}

/// Resolves once every sender of the slot is gone.
async fn closed(intents: &mut watch::Receiver<Option<PlaybackIntent>>) {
    while intents.changed().await.is_ok() {}
}
