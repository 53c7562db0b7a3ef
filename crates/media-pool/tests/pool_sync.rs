use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cutline_common::config::PoolConfig;
use cutline_common::error::{CutlineError, CutlineResult};
use cutline_media_pool::{
    Frame, MediaPool, MediaSource, MediaSourceFactory, MediaState, ReadyState, SyncOutcome,
};
use cutline_project_model::{Asset, AssetId};
use image::RgbaImage;
use tokio::sync::Notify;

/// Scripted source recording every call made on it.
#[derive(Default)]
struct FakeSource {
    position: Mutex<f64>,
    playing: AtomicBool,
    loaded: AtomicBool,
    fail_load: bool,
    /// Loaded but still short of playable data.
    buffering: AtomicBool,
    load_gate: Option<Arc<Notify>>,
    play_gate: Option<Arc<Notify>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    seeks: AtomicUsize,
    plays: AtomicUsize,
    pauses: AtomicUsize,
    stops: AtomicUsize,
}

impl FakeSource {
    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaSource for FakeSource {
    async fn load(&self) -> CutlineResult<()> {
        if let Some(gate) = &self.load_gate {
            gate.notified().await;
        }
        if self.fail_load {
            return Err(CutlineError::media("corrupt container"));
        }
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn ready_state(&self) -> ReadyState {
        if !self.loaded.load(Ordering::SeqCst) {
            ReadyState::HaveNothing
        } else if self.buffering.load(Ordering::SeqCst) {
            ReadyState::HaveMetadata
        } else {
            ReadyState::HaveEnoughData
        }
    }

    fn position_secs(&self) -> f64 {
        *self.position.lock().unwrap()
    }

    fn is_paused(&self) -> bool {
        !self.playing.load(Ordering::SeqCst)
    }

    async fn seek(&self, secs: f64) -> CutlineResult<()> {
        self.enter();
        tokio::task::yield_now().await;
        *self.position.lock().unwrap() = secs;
        self.seeks.fetch_add(1, Ordering::SeqCst);
        self.leave();
        Ok(())
    }

    async fn play(&self) -> CutlineResult<()> {
        self.enter();
        if let Some(gate) = &self.play_gate {
            gate.notified().await;
        }
        self.playing.store(true, Ordering::SeqCst);
        self.plays.fetch_add(1, Ordering::SeqCst);
        self.leave();
        Ok(())
    }

    async fn pause(&self) -> CutlineResult<()> {
        self.enter();
        self.playing.store(false, Ordering::SeqCst);
        self.pauses.fetch_add(1, Ordering::SeqCst);
        self.leave();
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn current_frame(&self) -> Option<Frame> {
        Some(Arc::new(RgbaImage::new(2, 2)))
    }
}

/// Hands out one shared fake per asset and counts how often it was asked.
#[derive(Default)]
struct FakeFactory {
    opened: AtomicUsize,
    sources: Mutex<Vec<(AssetId, Arc<FakeSource>)>>,
    template: Mutex<Option<Box<dyn Fn() -> FakeSource + Send>>>,
}

impl FakeFactory {
    fn with(template: impl Fn() -> FakeSource + Send + 'static) -> Arc<Self> {
        let factory = Self::default();
        *factory.template.lock().unwrap() = Some(Box::new(template));
        Arc::new(factory)
    }

    fn source(&self, id: &str) -> Arc<FakeSource> {
        self.sources
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(a, _)| a.as_str() == id)
            .map(|(_, s)| s.clone())
            .expect("source was opened")
    }
}

impl MediaSourceFactory for FakeFactory {
    fn open(&self, asset: &Asset) -> CutlineResult<Arc<dyn MediaSource>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let source = match self.template.lock().unwrap().as_ref() {
            Some(make) => Arc::new(make()),
            None => Arc::new(FakeSource::default()),
        };
        self.sources
            .lock()
            .unwrap()
            .push((asset.id.clone(), source.clone()));
        Ok(source)
    }
}

fn video(id: &str) -> Asset {
    Asset::video(id, format!("{id}.mp4"), 10_000, 1920, 1080, true)
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..2000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_acquire_twice_opens_and_loads_once() {
    let gate = Arc::new(Notify::new());
    let load_gate = gate.clone();
    let factory = FakeFactory::with(move || FakeSource {
        load_gate: Some(load_gate.clone()),
        ..Default::default()
    });
    let mut pool = MediaPool::new(factory.clone(), PoolConfig::default()).unwrap();

    let asset = video("a1");
    pool.acquire(&asset);
    pool.acquire(&asset);
    assert_eq!(pool.state(&asset.id), MediaState::Loading);

    gate.notify_one();
    wait_until(|| pool.is_ready(&asset.id)).await;
    pool.acquire(&asset);

    assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
    assert_eq!(pool.resident_count(), 1);
}

#[tokio::test]
async fn test_sync_within_threshold_does_not_seek() {
    let factory = Arc::new(FakeFactory::default());
    let mut pool = MediaPool::new(factory.clone(), PoolConfig::default()).unwrap();
    let asset = video("a1");
    pool.acquire(&asset);
    wait_until(|| pool.is_ready(&asset.id)).await;

    assert_eq!(pool.sync(&asset.id, 3.0, false), SyncOutcome::Queued);
    wait_until(|| pool.applied_intents(&asset.id) == 1).await;
    let source = factory.source("a1");
    assert_eq!(source.seeks.load(Ordering::SeqCst), 1);

    // 50 ms away: inside the 100 ms threshold.
    pool.sync(&asset.id, 3.05, false);
    wait_until(|| pool.applied_intents(&asset.id) == 2).await;
    assert_eq!(source.seeks.load(Ordering::SeqCst), 1);

    // 250 ms away: corrected.
    pool.sync(&asset.id, 3.25, false);
    wait_until(|| pool.applied_intents(&asset.id) == 3).await;
    assert_eq!(source.seeks.load(Ordering::SeqCst), 2);
    assert_eq!(source.position_secs(), 3.25);
}

#[tokio::test]
async fn test_sync_plays_and_pauses() {
    let factory = Arc::new(FakeFactory::default());
    let mut pool = MediaPool::new(factory.clone(), PoolConfig::default()).unwrap();
    let asset = video("a1");
    pool.acquire(&asset);
    wait_until(|| pool.is_ready(&asset.id)).await;
    let source = factory.source("a1");

    pool.sync(&asset.id, 0.0, true);
    wait_until(|| !source.is_paused()).await;
    assert_eq!(source.plays.load(Ordering::SeqCst), 1);

    pool.sync(&asset.id, 0.0, false);
    wait_until(|| source.is_paused()).await;
    assert_eq!(source.pauses.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_play_waits_for_enough_buffered_data() {
    let factory = FakeFactory::with(|| FakeSource {
        buffering: AtomicBool::new(true),
        ..Default::default()
    });
    let mut pool = MediaPool::new(factory.clone(), PoolConfig::default()).unwrap();
    let asset = video("a1");
    pool.acquire(&asset);
    wait_until(|| pool.is_ready(&asset.id)).await;
    let source = factory.source("a1");
    assert_eq!(source.ready_state(), ReadyState::HaveMetadata);

    pool.sync(&asset.id, 0.0, true);
    wait_until(|| pool.applied_intents(&asset.id) == 1).await;
    assert_eq!(source.plays.load(Ordering::SeqCst), 0);
    assert!(source.is_paused());

    source.buffering.store(false, Ordering::SeqCst);
    pool.sync(&asset.id, 0.0, true);
    wait_until(|| pool.applied_intents(&asset.id) == 2).await;
    assert_eq!(source.plays.load(Ordering::SeqCst), 1);
    assert!(!source.is_paused());
}

#[tokio::test]
async fn test_operations_on_one_handle_never_overlap() {
    let gate = Arc::new(Notify::new());
    let play_gate = gate.clone();
    let factory = FakeFactory::with(move || FakeSource {
        play_gate: Some(play_gate.clone()),
        ..Default::default()
    });
    let mut pool = MediaPool::new(factory.clone(), PoolConfig::default()).unwrap();
    let asset = video("a1");
    pool.acquire(&asset);
    wait_until(|| pool.is_ready(&asset.id)).await;
    let source = factory.source("a1");

    // First play blocks; later ticks pile up behind it.
    pool.sync(&asset.id, 0.0, true);
    wait_until(|| source.in_flight.load(Ordering::SeqCst) == 1).await;
    for i in 1..20 {
        pool.sync(&asset.id, i as f64, true);
        tokio::task::yield_now().await;
    }
    assert_eq!(source.seeks.load(Ordering::SeqCst), 0);

    gate.notify_one();
    wait_until(|| source.position_secs() == 19.0).await;

    assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
    // The queued ticks collapsed into the latest one.
    assert_eq!(source.seeks.load(Ordering::SeqCst), 1);
    assert!(pool.applied_intents(&asset.id) <= 2);
}

#[tokio::test]
async fn test_intent_sent_while_loading_is_applied_once_ready() {
    let gate = Arc::new(Notify::new());
    let load_gate = gate.clone();
    let factory = FakeFactory::with(move || FakeSource {
        load_gate: Some(load_gate.clone()),
        ..Default::default()
    });
    let mut pool = MediaPool::new(factory.clone(), PoolConfig::default()).unwrap();
    let asset = video("a1");
    pool.acquire(&asset);

    assert_eq!(pool.sync(&asset.id, 4.0, false), SyncOutcome::NotReady);
    assert!(pool.frame(&asset.id).is_none());

    gate.notify_one();
    wait_until(|| pool.applied_intents(&asset.id) == 1).await;
    assert_eq!(factory.source("a1").position_secs(), 4.0);
    assert!(pool.frame(&asset.id).is_some());
}

#[tokio::test]
async fn test_failed_load_marks_unplayable_without_retry() {
    let factory = FakeFactory::with(|| FakeSource {
        fail_load: true,
        ..Default::default()
    });
    let mut pool = MediaPool::new(factory.clone(), PoolConfig::default()).unwrap();
    let asset = video("broken");
    pool.acquire(&asset);

    wait_until(|| pool.state(&asset.id) == MediaState::Unplayable).await;
    assert!(pool.failure(&asset.id).unwrap().contains("corrupt container"));
    assert_eq!(pool.sync(&asset.id, 1.0, true), SyncOutcome::Unplayable);

    pool.acquire(&asset);
    assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_pause_all_except_hides_and_pauses_the_rest() {
    let factory = Arc::new(FakeFactory::default());
    let mut pool = MediaPool::new(factory.clone(), PoolConfig::default()).unwrap();
    let (a, b) = (video("a"), video("b"));
    pool.acquire(&a);
    pool.acquire(&b);
    wait_until(|| pool.is_ready(&a.id) && pool.is_ready(&b.id)).await;

    pool.sync(&a.id, 0.0, true);
    pool.sync(&b.id, 0.0, true);
    let (sa, sb) = (factory.source("a"), factory.source("b"));
    wait_until(|| !sa.is_paused() && !sb.is_paused()).await;

    let keep: HashSet<AssetId> = [a.id.clone()].into_iter().collect();
    pool.pause_all_except(&keep);
    wait_until(|| sb.is_paused()).await;

    assert!(!sa.is_paused());
    assert_eq!(pool.state(&a.id), MediaState::Visible);
    assert_eq!(pool.state(&b.id), MediaState::Hidden);
}

#[tokio::test]
async fn test_release_stops_the_source() {
    let factory = Arc::new(FakeFactory::default());
    let mut pool = MediaPool::new(factory.clone(), PoolConfig::default()).unwrap();
    let asset = video("a1");
    pool.acquire(&asset);
    wait_until(|| pool.is_ready(&asset.id)).await;
    let source = factory.source("a1");

    pool.release(&asset.id);
    assert_eq!(pool.state(&asset.id), MediaState::Released);
    wait_until(|| source.stops.load(Ordering::SeqCst) == 1).await;
    assert_eq!(pool.sync(&asset.id, 0.0, true), SyncOutcome::NotResident);

    // Re-acquiring after release starts a fresh handle.
    pool.acquire(&asset);
    assert_eq!(factory.opened.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_full_pool_evicts_least_recently_visible_hidden_handle() {
    let factory = Arc::new(FakeFactory::default());
    let config = PoolConfig {
        max_resident: 2,
        ..PoolConfig::default()
    };
    let mut pool = MediaPool::new(factory.clone(), config).unwrap();
    let (a, b, c) = (video("a"), video("b"), video("c"));

    pool.acquire(&a);
    pool.acquire(&b);
    pool.pause_all_except(&[a.id.clone()].into_iter().collect());
    pool.pause_all_except(&[b.id.clone()].into_iter().collect());
    pool.pause_all_except(&HashSet::new());

    pool.acquire(&c);
    assert_eq!(pool.resident_count(), 2);
    assert_eq!(pool.state(&a.id), MediaState::Released);
    assert!(pool.is_resident(&b.id));
    assert!(pool.is_resident(&c.id));
}
