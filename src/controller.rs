use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::likes::LikeBook;
use crate::session::{FeedDataSource, Page, PageOutcome};
use crate::storage::FeedSnapshot;
use crate::video::VideoRecord;
use crate::window::{Eviction, FeedWindow, WindowLimits};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    pub initial_batch: usize,
    pub batch_size: usize,
    pub load_threshold: usize,
    pub limits: WindowLimits,
    pub min_load_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            initial_batch: 5,
            batch_size: 3,
            load_threshold: 2,
            limits: WindowLimits::default(),
            min_load_interval: Duration::from_millis(1500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedPhase {
    Empty,
    Loading,
    Ready,
    LoadingMore,
    Exhausted,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Loaded { appended: usize },
    // The rendering layer must jump to `new_index` without animation before
    // drawing the new window.
    Evicted(Eviction),
    Exhausted,
    Failed { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadKind {
    Initial,
    More,
}

struct PendingLoad {
    request_id: u64,
    kind: LoadKind,
    // A retry arrived while this fetch was outstanding; discard its page and
    // start the new session once it lands.
    superseded: bool,
}

struct LoadResponse {
    request_id: u64,
    kind: LoadKind,
    page: Page,
}

pub struct FeedWindowController {
    data: Arc<FeedDataSource>,
    config: ControllerConfig,
    clock: Arc<dyn Clock>,
    window: FeedWindow,
    current_index: usize,
    has_more: bool,
    phase: FeedPhase,
    error: Option<String>,
    next_page: usize,
    last_load_at: Option<Instant>,
    pending: Option<PendingLoad>,
    next_request_id: u64,
    response_tx: Sender<LoadResponse>,
    response_rx: Receiver<LoadResponse>,
    alive: Arc<AtomicBool>,
    likes: LikeBook,
}

impl FeedWindowController {
    pub fn new(data: Arc<FeedDataSource>, config: ControllerConfig) -> Self {
        Self::with_clock(data, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        data: Arc<FeedDataSource>,
        config: ControllerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (response_tx, response_rx) = unbounded();
        Self {
            data,
            window: FeedWindow::new(config.limits),
            config,
            clock,
            current_index: 0,
            has_more: true,
            phase: FeedPhase::Empty,
            error: None,
            next_page: 0,
            last_load_at: None,
            pending: None,
            next_request_id: 0,
            response_tx,
            response_rx,
            alive: Arc::new(AtomicBool::new(true)),
            likes: LikeBook::default(),
        }
    }

    pub fn videos(&self) -> &[VideoRecord] {
        self.window.as_slice()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current(&self) -> Option<&VideoRecord> {
        self.window.get(self.current_index)
    }

    pub fn phase(&self) -> FeedPhase {
        self.phase
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_initial_loading(&self) -> bool {
        self.phase == FeedPhase::Loading
    }

    pub fn is_loading_more(&self) -> bool {
        self.phase == FeedPhase::LoadingMore
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> ControllerConfig {
        self.config
    }

    pub fn load_initial(&mut self) -> bool {
        if !self.is_alive() || self.pending.is_some() {
            return false;
        }
        self.phase = FeedPhase::Loading;
        self.error = None;
        self.next_page = 0;
        self.dispatch(LoadKind::Initial, 0, self.config.initial_batch);
        true
    }

    pub fn notify_visible_index_changed(&mut self, index: usize) -> bool {
        if self.window.is_empty() {
            self.current_index = 0;
            return false;
        }
        self.current_index = index.min(self.window.len() - 1);
        let remaining = self.window.len() - self.current_index;
        if remaining <= self.config.load_threshold && self.has_more && self.pending.is_none() {
            return self.load_more();
        }
        false
    }

    pub fn load_more(&mut self) -> bool {
        if !self.is_alive() || self.pending.is_some() {
            return false;
        }
        if self.phase != FeedPhase::Ready || !self.has_more {
            return false;
        }
        let now = self.clock.now();
        if let Some(last) = self.last_load_at {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.config.min_load_interval {
                debug!(?elapsed, "load_more throttled");
                return false;
            }
        }
        self.phase = FeedPhase::LoadingMore;
        self.dispatch(LoadKind::More, self.next_page, self.config.batch_size);
        true
    }

    pub fn retry(&mut self) -> bool {
        if !self.is_alive() {
            return false;
        }
        info!("feed retry");
        self.window.clear();
        self.current_index = 0;
        self.error = None;
        self.has_more = true;
        self.next_page = 0;
        self.last_load_at = None;
        self.likes.clear();
        self.phase = FeedPhase::Empty;
        self.data.reset();
        // The data source drops overlapping fetches, so page 0 waits for the
        // outstanding one.
        if let Some(pending) = self.pending.as_mut() {
            debug!(
                request_id = pending.request_id,
                kind = ?pending.kind,
                "retry held until pending load lands"
            );
            pending.superseded = true;
            self.phase = FeedPhase::Loading;
            return true;
        }
        self.load_initial()
    }

    pub fn teardown(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        self.pending = None;
    }

    pub fn poll(&mut self) -> Vec<FeedEvent> {
        let mut events = Vec::new();
        while let Ok(response) = self.response_rx.try_recv() {
            events.extend(self.apply(response));
        }
        events
    }

    pub fn wait(&mut self, timeout: Duration) -> Vec<FeedEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = self.poll();
        while self.pending.is_some() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.response_rx.recv_timeout(remaining) {
                Ok(response) => events.extend(self.apply(response)),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        events
    }

    pub fn toggle_like(&mut self, id: &str) -> bool {
        self.likes.toggle(id)
    }

    pub fn likes(&self) -> &LikeBook {
        &self.likes
    }

    pub fn snapshot(&self, len: usize) -> FeedSnapshot {
        let videos: Vec<VideoRecord> = self.window.as_slice().iter().take(len).cloned().collect();
        let current_index = if videos.is_empty() {
            0
        } else {
            self.current_index.min(videos.len() - 1)
        };
        FeedSnapshot::new(videos, current_index)
    }

    // Only honoured before anything has been loaded.
    pub fn restore(&mut self, snapshot: FeedSnapshot) -> bool {
        if self.phase != FeedPhase::Empty || !self.window.is_empty() {
            return false;
        }
        let mut videos = snapshot.videos;
        videos.truncate(self.config.limits.keep_count);
        if videos.is_empty() {
            return false;
        }
        self.current_index = snapshot.current_index.min(videos.len() - 1);
        self.window.replace(videos);
        true
    }

    fn dispatch(&mut self, kind: LoadKind, page: usize, limit: usize) {
        self.next_request_id += 1;
        let request_id = self.next_request_id;
        self.pending = Some(PendingLoad {
            request_id,
            kind,
            superseded: false,
        });
        self.last_load_at = Some(self.clock.now());
        debug!(request_id, ?kind, page, limit, "feed load dispatched");

        let data = self.data.clone();
        let alive = self.alive.clone();
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let page = data.fetch_page(page, limit);
            if alive.load(Ordering::SeqCst) {
                let _ = tx.send(LoadResponse {
                    request_id,
                    kind,
                    page,
                });
            }
        });
    }

    fn apply(&mut self, response: LoadResponse) -> Vec<FeedEvent> {
        if !self.is_alive() {
            return Vec::new();
        }
        let superseded = match &self.pending {
            Some(pending) if pending.request_id == response.request_id => pending.superseded,
            _ => {
                debug!(request_id = response.request_id, "stale feed response dropped");
                return Vec::new();
            }
        };
        self.pending = None;
        if superseded {
            debug!(request_id = response.request_id, "superseded by retry; starting over");
            self.dispatch(LoadKind::Initial, 0, self.config.initial_batch);
            return Vec::new();
        }

        match response.kind {
            LoadKind::Initial => self.apply_initial(response.page),
            LoadKind::More => self.apply_more(response.page),
        }
    }

    fn apply_initial(&mut self, page: Page) -> Vec<FeedEvent> {
        let message = match page.outcome {
            PageOutcome::Failed => Some("Failed to load videos. Check your connection."),
            PageOutcome::Busy => Some("Feed is still loading. Try again."),
            _ if page.is_empty() => Some("No videos available right now."),
            _ => None,
        };
        if let Some(message) = message {
            warn!(outcome = ?page.outcome, "initial feed load failed");
            self.window.clear();
            self.current_index = 0;
            self.phase = FeedPhase::Error;
            self.error = Some(message.to_string());
            return vec![FeedEvent::Failed {
                message: message.to_string(),
            }];
        }

        let appended = page.len();
        self.has_more =
            appended == self.config.initial_batch && page.outcome != PageOutcome::Exhausted;
        self.window.replace(page.into_videos());
        self.current_index = 0;
        self.next_page = 1;
        info!(appended, has_more = self.has_more, "feed loaded");

        let mut events = vec![FeedEvent::Loaded { appended }];
        if let Some(eviction) = self.window.evict(self.current_index) {
            self.current_index = eviction.new_index;
            events.push(FeedEvent::Evicted(eviction));
        }
        events.extend(self.settle());
        events
    }

    fn apply_more(&mut self, page: Page) -> Vec<FeedEvent> {
        if matches!(page.outcome, PageOutcome::Failed | PageOutcome::Busy) {
            debug!(outcome = ?page.outcome, "load_more produced nothing; keeping window");
            self.phase = FeedPhase::Ready;
            return Vec::new();
        }

        let upstream_short = page.outcome == PageOutcome::Exhausted;
        let appended = self.window.append(page.into_videos());
        self.has_more = appended >= self.config.batch_size && !upstream_short;
        self.next_page += 1;
        debug!(appended, len = self.window.len(), has_more = self.has_more, "feed extended");

        let mut events = Vec::new();
        if appended > 0 {
            events.push(FeedEvent::Loaded { appended });
        }
        if let Some(eviction) = self.window.evict(self.current_index) {
            debug!(removed = eviction.removed, new_index = eviction.new_index, "window evicted");
            self.current_index = eviction.new_index;
            events.push(FeedEvent::Evicted(eviction));
        }
        events.extend(self.settle());
        events
    }

    fn settle(&mut self) -> Option<FeedEvent> {
        if self.has_more {
            self.phase = FeedPhase::Ready;
            None
        } else {
            self.phase = FeedPhase::Exhausted;
            Some(FeedEvent::Exhausted)
        }
    }
}

impl Drop for FeedWindowController {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{fixture_records, StaticFeedSource};

    const WAIT: Duration = Duration::from_secs(5);

    fn controller(rows: usize) -> (Arc<StaticFeedSource>, Arc<ManualClock>, FeedWindowController) {
        let upstream = Arc::new(StaticFeedSource::new(fixture_records(rows)));
        let (clock, ctrl) = controller_over(upstream.clone(), ControllerConfig::default());
        (upstream, clock, ctrl)
    }

    fn controller_over(
        upstream: Arc<StaticFeedSource>,
        config: ControllerConfig,
    ) -> (Arc<ManualClock>, FeedWindowController) {
        let data = Arc::new(FeedDataSource::new(upstream));
        let clock = Arc::new(ManualClock::default());
        let ctrl = FeedWindowController::with_clock(data, config, clock.clone());
        (clock, ctrl)
    }

    #[test]
    fn initial_load_populates_window() {
        let (_, _, mut ctrl) = controller(20);
        assert!(ctrl.load_initial());
        assert!(ctrl.is_initial_loading());
        let events = ctrl.wait(WAIT);
        assert_eq!(events, vec![FeedEvent::Loaded { appended: 5 }]);
        assert_eq!(ctrl.videos().len(), 5);
        assert_eq!(ctrl.current_index(), 0);
        assert!(ctrl.has_more());
        assert_eq!(ctrl.phase(), FeedPhase::Ready);
    }

    #[test]
    fn proximity_triggers_load_more() {
        let (_, clock, mut ctrl) = controller(20);
        ctrl.load_initial();
        ctrl.wait(WAIT);
        clock.advance(Duration::from_secs(2));
        assert!(!ctrl.notify_visible_index_changed(1));
        assert!(ctrl.notify_visible_index_changed(3));
        assert!(ctrl.is_loading_more());
        ctrl.wait(WAIT);
        assert_eq!(ctrl.videos().len(), 8);
        assert_eq!(ctrl.current_index(), 3);
    }

    #[test]
    fn load_more_is_throttled() {
        let (upstream, clock, mut ctrl) = controller(40);
        ctrl.load_initial();
        ctrl.wait(WAIT);
        let calls = upstream.calls();

        // Initial load counts as the last attempt.
        assert!(!ctrl.load_more());
        clock.advance(Duration::from_millis(1600));
        assert!(ctrl.load_more());
        ctrl.wait(WAIT);
        clock.advance(Duration::from_millis(500));
        assert!(!ctrl.load_more());
        assert_eq!(upstream.calls(), calls + 1);
    }

    #[test]
    fn failed_initial_load_is_retryable() {
        let (upstream, _, mut ctrl) = controller(20);
        upstream.set_failing(true);
        ctrl.load_initial();
        let events = ctrl.wait(WAIT);
        assert!(matches!(events.as_slice(), [FeedEvent::Failed { .. }]));
        assert_eq!(ctrl.phase(), FeedPhase::Error);
        assert!(ctrl.error().is_some());
        assert!(!ctrl.load_more());

        upstream.set_failing(false);
        assert!(ctrl.retry());
        ctrl.wait(WAIT);
        assert_eq!(ctrl.phase(), FeedPhase::Ready);
        assert!(ctrl.error().is_none());
        assert_eq!(ctrl.videos()[0].id, "v1");
    }

    #[test]
    fn failed_load_more_keeps_window() {
        let (upstream, clock, mut ctrl) = controller(20);
        ctrl.load_initial();
        ctrl.wait(WAIT);
        upstream.set_failing(true);
        clock.advance(Duration::from_secs(2));
        assert!(ctrl.notify_visible_index_changed(4));
        let events = ctrl.wait(WAIT);
        assert!(events.is_empty());
        assert_eq!(ctrl.videos().len(), 5);
        assert!(ctrl.has_more());
        assert_eq!(ctrl.phase(), FeedPhase::Ready);
        assert!(ctrl.error().is_none());
    }

    #[test]
    fn teardown_discards_late_responses() {
        let (_, _, mut ctrl) = controller(20);
        ctrl.load_initial();
        ctrl.teardown();
        assert!(ctrl.wait(Duration::from_millis(200)).is_empty());
        assert!(ctrl.videos().is_empty());
        assert!(!ctrl.load_initial());
    }

    #[test]
    fn snapshot_round_trips_through_restore() {
        let (_, _, mut ctrl) = controller(20);
        ctrl.load_initial();
        ctrl.wait(WAIT);
        ctrl.notify_visible_index_changed(4);
        let snapshot = ctrl.snapshot(3);
        assert_eq!(snapshot.videos.len(), 3);
        assert_eq!(snapshot.current_index, 2);

        let (_, _, mut fresh) = controller(20);
        assert!(fresh.restore(snapshot));
        assert_eq!(fresh.videos().len(), 3);
        assert_eq!(fresh.current_index(), 2);
        assert_eq!(fresh.phase(), FeedPhase::Empty);
    }

    #[test]
    fn retry_clears_likes() {
        let (_, _, mut ctrl) = controller(20);
        ctrl.load_initial();
        ctrl.wait(WAIT);
        assert!(ctrl.toggle_like("v1"));
        ctrl.retry();
        ctrl.wait(WAIT);
        assert!(!ctrl.likes().is_liked("v1"));
    }

    #[test]
    fn initial_load_at_cap_evicts() {
        let upstream = Arc::new(StaticFeedSource::new(fixture_records(40)));
        let config = ControllerConfig {
            initial_batch: 15,
            ..ControllerConfig::default()
        };
        let (_, mut ctrl) = controller_over(upstream, config);
        ctrl.load_initial();
        let events = ctrl.wait(WAIT);
        assert_eq!(
            events,
            vec![
                FeedEvent::Loaded { appended: 15 },
                FeedEvent::Evicted(Eviction {
                    removed: 3,
                    previous_index: 0,
                    new_index: 0,
                }),
            ]
        );
        assert_eq!(ctrl.videos().len(), 12);
        assert_eq!(ctrl.videos()[0].id, "v4");
        assert_eq!(ctrl.current_index(), 0);
        assert_eq!(ctrl.phase(), FeedPhase::Ready);
    }

    #[test]
    fn all_duplicate_load_more_ends_feed() {
        let upstream = Arc::new(StaticFeedSource::new(fixture_records(5)).repeating());
        let (clock, mut ctrl) = controller_over(upstream, ControllerConfig::default());
        ctrl.load_initial();
        ctrl.wait(WAIT);
        assert!(ctrl.has_more());

        clock.advance(Duration::from_secs(2));
        assert!(ctrl.load_more());
        let events = ctrl.wait(WAIT);
        assert_eq!(events, vec![FeedEvent::Exhausted]);
        assert_eq!(ctrl.videos().len(), 5);
        assert!(!ctrl.has_more());
        assert_eq!(ctrl.phase(), FeedPhase::Exhausted);
    }

    #[test]
    fn eight_record_feed_ends_on_second_load() {
        let (_, clock, mut ctrl) = controller(8);
        ctrl.load_initial();
        ctrl.wait(WAIT);
        assert!(ctrl.has_more());

        clock.advance(Duration::from_secs(2));
        assert!(ctrl.notify_visible_index_changed(3));
        let events = ctrl.wait(WAIT);
        assert_eq!(
            events,
            vec![FeedEvent::Loaded { appended: 3 }, FeedEvent::Exhausted]
        );
        assert_eq!(ctrl.videos().len(), 8);
        assert!(!ctrl.has_more());
        assert_eq!(ctrl.phase(), FeedPhase::Exhausted);
    }

    #[test]
    fn retry_during_load_more_starts_clean() {
        let upstream = Arc::new(
            StaticFeedSource::new(fixture_records(20)).with_delay(Duration::from_millis(300)),
        );
        let (clock, mut ctrl) = controller_over(upstream, ControllerConfig::default());
        ctrl.load_initial();
        ctrl.wait(WAIT);

        clock.advance(Duration::from_secs(2));
        assert!(ctrl.notify_visible_index_changed(3));
        thread::sleep(Duration::from_millis(50));
        assert!(ctrl.retry());
        assert!(ctrl.is_initial_loading());
        assert!(ctrl.videos().is_empty());

        let events = ctrl.wait(WAIT);
        assert_eq!(events, vec![FeedEvent::Loaded { appended: 5 }]);
        assert_eq!(ctrl.phase(), FeedPhase::Ready);
        assert!(ctrl.error().is_none());
        let ids: Vec<_> = ctrl.videos().iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, ["v1", "v2", "v3", "v4", "v5"]);

        let cursor = ctrl.data.cursor();
        assert_eq!(cursor.offset(), 5);
        assert_eq!(cursor.seen_count(), 5);
    }
}
