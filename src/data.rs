use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rand::seq::SliceRandom;

use crate::feed_api;
use crate::video::{Batch, IdSource, VideoRecord};

pub trait FeedSource: Send + Sync {
    // `last_id: None` is the first call of a session.
    fn fetch_batch(&self, last_id: Option<u64>, limit: usize) -> Result<Batch>;
}

pub struct HttpFeedSource {
    client: Arc<feed_api::Client>,
}

impl HttpFeedSource {
    pub fn new(client: Arc<feed_api::Client>) -> Self {
        Self { client }
    }
}

impl FeedSource for HttpFeedSource {
    fn fetch_batch(&self, last_id: Option<u64>, limit: usize) -> Result<Batch> {
        self.client
            .load_feed(last_id, limit)
            .context("fetch feed batch")
    }
}

// Behaves like the production backend: random rows, cursor ignored.
#[derive(Default)]
pub struct MockFeedSource;

impl FeedSource for MockFeedSource {
    fn fetch_batch(&self, _last_id: Option<u64>, limit: usize) -> Result<Batch> {
        let mut rng = rand::thread_rng();
        let mut catalog = demo_catalog();
        catalog.shuffle(&mut rng);
        catalog.truncate(limit);
        Ok(Batch::from_records(catalog))
    }
}

fn demo_catalog() -> Vec<VideoRecord> {
    let rows: [(&str, &str, &str, i64, i64); 10] = [
        ("Lahav_Rabinovitz", "Guitar, Drums", "upload-put-test-vid+(1).mp4", 100, 234),
        ("Shay.Paz", "Sing", "lahav78_1.mp4", 50, 105),
        ("Eyaloss", "Piano, Guitar", "sharonnn123_3.mp4", 14300, 1200),
        ("Ben_Lulu82", "Bass", "lahav78_3.mp4", 87, 432),
        ("noa.keys", "Piano", "noa_keys_1.mp4", 640, 38),
        ("tomer_beats", "Drums, Cajón", "tomer_beats_2.mp4", 2210, 91),
        ("maya.strings", "Violin", "maya_strings_1.mp4", 305, 17),
        ("idan.sax", "Saxophone", "idan_sax_4.mp4", 78, 5),
        ("rotem_ukulele", "Ukulele, Sing", "rotem_uke_1.mp4", 1200, 66),
        ("gal.bass", "Bass, Guitar", "gal_bass_2.mp4", 433, 24),
    ];
    rows.iter()
        .enumerate()
        .map(|(idx, (user, instruments, file, likes, comments))| VideoRecord {
            id: format!("demo-{}", idx + 1),
            id_source: IdSource::Explicit,
            username: user.to_string(),
            description: instruments.to_string(),
            video_url: format!("https://groovi.s3.us-east-1.amazonaws.com/{file}"),
            like_count: *likes,
            comment_count: *comments,
        })
        .collect()
}

// `last_id` is read as a row offset.
pub struct StaticFeedSource {
    rows: Vec<VideoRecord>,
    repeating: bool,
    delay: Option<Duration>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl StaticFeedSource {
    pub fn new(rows: Vec<VideoRecord>) -> Self {
        Self {
            rows,
            repeating: false,
            delay: None,
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn repeating(mut self) -> Self {
        self.repeating = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FeedSource for StaticFeedSource {
    fn fetch_batch(&self, last_id: Option<u64>, limit: usize) -> Result<Batch> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("static feed: simulated outage"));
        }

        let start = if self.repeating {
            0
        } else {
            usize::try_from(last_id.unwrap_or(0)).unwrap_or(usize::MAX)
        };
        let start = start.min(self.rows.len());
        let end = start.saturating_add(limit).min(self.rows.len());
        Ok(Batch::from_records(self.rows[start..end].to_vec()))
    }
}

pub fn fixture_records(count: usize) -> Vec<VideoRecord> {
    (1..=count)
        .map(|n| VideoRecord {
            id: format!("v{n}"),
            id_source: IdSource::Explicit,
            username: format!("user{n}"),
            description: "Guitar".into(),
            video_url: format!("https://cdn.example.com/v{n}.mp4"),
            like_count: n as i64,
            comment_count: 0,
        })
        .collect()
}
