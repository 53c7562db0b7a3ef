//! The media pool.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use cutline_common::config::PoolConfig;
use cutline_common::error::{CutlineError, CutlineResult};
use cutline_project_model::{Asset, AssetId, EditPlan};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::handle::{run_handle, HandleShared, HandleState, PlaybackIntent};
use crate::source::{Frame, MediaSource, MediaSourceFactory};

/// Media state of an asset as seen by the compositor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaState {
    NotRequested,
    Loading,
    Visible,
    Hidden,
    Unplayable,
    Released,
}

/// Result of a [`MediaPool::sync`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Intent queued on the handle.
    Queued,
    /// Handle still loading; the intent is kept and applied once ready.
    NotReady,
    /// Handle failed to load.
    Unplayable,
    /// Asset was never acquired.
    NotResident,
}

struct PoolEntry {
    /// `None` when no source could be opened for the asset.
    source: Option<Arc<dyn MediaSource>>,
    intents: watch::Sender<Option<PlaybackIntent>>,
    shared: Arc<HandleShared>,
    visible: bool,
    last_visible_tick: u64,
}

/// Read-only access to a pooled source's frames.
#[derive(Clone)]
pub struct FrameReader {
    source: Arc<dyn MediaSource>,
}

impl FrameReader {
    /// The frame at the handle's current position.
    pub fn current(&self) -> Option<Frame> {
        self.source.current_frame()
    }

    /// Random-access frame for previews.
    pub async fn at(&self, secs: f64) -> CutlineResult<Option<Frame>> {
        self.source.frame_at(secs).await
    }
}

/// Pool of decodable handles, one per asset.
///
/// Owned by the frame loop. Every method returns without waiting on media;
/// slow work happens on per-handle tasks.
pub struct MediaPool {
    factory: Arc<dyn MediaSourceFactory>,
    config: PoolConfig,
    runtime: Handle,
    entries: HashMap<AssetId, PoolEntry>,
    released: HashSet<AssetId>,
    tick: u64,
}

impl MediaPool {
    /// Create a pool. Must be called from within a tokio runtime.
    pub fn new(factory: Arc<dyn MediaSourceFactory>, config: PoolConfig) -> CutlineResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| CutlineError::media(format!("media pool needs a tokio runtime: {e}")))?;
        Ok(Self {
            factory,
            config,
            runtime,
            entries: HashMap::new(),
            released: HashSet::new(),
            tick: 0,
        })
    }

    /// Ensure a handle exists for `asset`. Idempotent: a second call for a
    /// resident asset creates nothing and starts no new load.
    pub fn acquire(&mut self, asset: &Asset) {
        if self.entries.contains_key(&asset.id) {
            return;
        }
        self.make_room();

        let shared = HandleShared::new();
        let (tx, rx) = watch::channel(None);
        let source = match self.factory.open(asset) {
            Ok(source) => {
                self.runtime.spawn(run_handle(
                    asset.id.clone(),
                    source.clone(),
                    shared.clone(),
                    rx,
                    self.config.seek_threshold_ms as f64,
                ));
                Some(source)
            }
            Err(e) => {
                warn!(asset = %asset.id, error = %e, "No media source; clip marked unplayable");
                shared.set_state(HandleState::Unplayable(e.to_string()));
                None
            }
        };

        debug!(asset = %asset.id, kind = ?asset.kind, "Acquired media handle");
        self.released.remove(&asset.id);
        self.entries.insert(
            asset.id.clone(),
            PoolEntry {
                source,
                intents: tx,
                shared,
                visible: false,
                last_visible_tick: self.tick,
            },
        );
    }

    /// Ask a handle to be at `source_secs`, playing or paused.
    ///
    /// The handle seeks only when its position differs from `source_secs`
    /// by more than the seek threshold, starts playing only once enough
    /// data is buffered, and pauses when `should_play` is false. Never
    /// blocks the caller.
    pub fn sync(&mut self, asset_id: &AssetId, source_secs: f64, should_play: bool) -> SyncOutcome {
        let Some(entry) = self.entries.get_mut(asset_id) else {
            return SyncOutcome::NotResident;
        };
        entry.visible = true;
        entry.last_visible_tick = self.tick;

        match entry.shared.state() {
            HandleState::Unplayable(_) => SyncOutcome::Unplayable,
            HandleState::Released => SyncOutcome::NotResident,
            state => {
                entry.intents.send_replace(Some(PlaybackIntent::Sync {
                    source_secs,
                    play: should_play,
                }));
                if state == HandleState::Ready {
                    SyncOutcome::Queued
                } else {
                    SyncOutcome::NotReady
                }
            }
        }
    }

    /// Pause every resident handle not in `visible` and mark it hidden.
    /// Advances the pool's visibility tick.
    pub fn pause_all_except(&mut self, visible: &HashSet<AssetId>) {
        self.tick += 1;
        for (id, entry) in &mut self.entries {
            if visible.contains(id) {
                entry.visible = true;
                entry.last_visible_tick = self.tick;
                continue;
            }
            if *entry.intents.borrow() != Some(PlaybackIntent::Pause) {
                entry.intents.send_replace(Some(PlaybackIntent::Pause));
            }
            entry.visible = false;
        }
    }

    /// Stop a handle and drop it from the pool.
    pub fn release(&mut self, asset_id: &AssetId) {
        // Dropping the entry closes the intent slot; the handle task then
        // stops the source.
        if self.entries.remove(asset_id).is_some() {
            self.released.insert(asset_id.clone());
            debug!(asset = %asset_id, "Released media handle");
        }
    }

    /// Acquire every asset `plan` references and release the rest.
    pub fn reconcile(&mut self, plan: &EditPlan) {
        let wanted = plan.referenced_assets();
        let stale: Vec<AssetId> = self
            .entries
            .keys()
            .filter(|id| !wanted.contains(*id))
            .cloned()
            .collect();
        for id in &stale {
            self.release(id);
        }
        for id in &wanted {
            if let Some(asset) = plan.asset(id) {
                self.acquire(asset);
            }
        }
        info!(
            resident = self.entries.len(),
            released = stale.len(),
            "Media pool reconciled"
        );
    }

    /// Release every handle.
    pub fn release_all(&mut self) {
        let ids: Vec<AssetId> = self.entries.keys().cloned().collect();
        for id in &ids {
            self.release(id);
        }
    }

    /// Whether the asset's handle is loaded and usable.
    pub fn is_ready(&self, asset_id: &AssetId) -> bool {
        self.entries
            .get(asset_id)
            .is_some_and(|e| e.shared.state() == HandleState::Ready)
    }

    /// Current frame of a ready handle.
    pub fn frame(&self, asset_id: &AssetId) -> Option<Frame> {
        let entry = self.entries.get(asset_id)?;
        if entry.shared.state() != HandleState::Ready {
            return None;
        }
        entry.source.as_ref()?.current_frame()
    }

    /// Frame access for a ready handle.
    pub fn reader(&self, asset_id: &AssetId) -> Option<FrameReader> {
        let entry = self.entries.get(asset_id)?;
        if entry.shared.state() != HandleState::Ready {
            return None;
        }
        entry.source.clone().map(|source| FrameReader { source })
    }

    /// Media state of an asset.
    pub fn state(&self, asset_id: &AssetId) -> MediaState {
        match self.entries.get(asset_id) {
            None if self.released.contains(asset_id) => MediaState::Released,
            None => MediaState::NotRequested,
            Some(entry) => match entry.shared.state() {
                HandleState::Loading => MediaState::Loading,
                HandleState::Unplayable(_) => MediaState::Unplayable,
                HandleState::Released => MediaState::Released,
                HandleState::Ready if entry.visible => MediaState::Visible,
                HandleState::Ready => MediaState::Hidden,
            },
        }
    }

    /// Load failure message of an unplayable handle.
    pub fn failure(&self, asset_id: &AssetId) -> Option<String> {
        match self.entries.get(asset_id)?.shared.state() {
            HandleState::Unplayable(message) => Some(message),
            _ => None,
        }
    }

    /// Number of intents a handle has fully applied.
    pub fn applied_intents(&self, asset_id: &AssetId) -> u64 {
        self.entries
            .get(asset_id)
            .map_or(0, |e| e.shared.applied())
    }

    /// Number of resident handles.
    pub fn resident_count(&self) -> usize {
        self.entries.len()
    }

    /// Whether an asset has a resident handle.
    pub fn is_resident(&self, asset_id: &AssetId) -> bool {
        self.entries.contains_key(asset_id)
    }

    /// Evict the least recently visible hidden handle if the pool is full.
    fn make_room(&mut self) {
        if self.config.max_resident == 0 || self.entries.len() < self.config.max_resident {
            return;
        }
        let victim = self
            .entries
            .iter()
            .filter(|(_, e)| !e.visible)
            .min_by_key(|(_, e)| e.last_visible_tick)
            .map(|(id, _)| id.clone());
        match victim {
            Some(id) => {
                debug!(asset = %id, "Evicting hidden media handle");
                self.release(&id);
            }
            None => warn!(
                resident = self.entries.len(),
                max = self.config.max_resident,
                "Every resident handle is visible; exceeding pool limit"
            ),
        }
    }
}

impl Drop for MediaPool {
    fn drop(&mut self) {
        self.release_all();
    }
}
