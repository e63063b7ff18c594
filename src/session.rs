use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::data::FeedSource;
use crate::video::VideoRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    // Rows requested per upstream call, independent of the caller's limit.
    pub request_batch: usize,
    pub max_attempts: usize,
    pub skip_ahead: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            request_batch: 5,
            max_attempts: 3,
            skip_ahead: 5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PaginationCursor {
    seen_ids: HashSet<String>,
    offset: u64,
    // Bumped by every reset; a fetch staged under an older epoch is discarded.
    epoch: u64,
}

impl PaginationCursor {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn seen_count(&self) -> usize {
        self.seen_ids.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    // May still be short when upstream kept returning duplicates.
    Complete,
    // Upstream returned a short batch.
    Exhausted,
    Failed,
    // Another fetch on this source was still outstanding.
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub videos: Vec<VideoRecord>,
    pub outcome: PageOutcome,
}

impl Page {
    fn empty(outcome: PageOutcome) -> Self {
        Self {
            videos: Vec::new(),
            outcome,
        }
    }

    pub fn len(&self) -> usize {
        self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.videos.is_empty()
    }

    pub fn into_videos(self) -> Vec<VideoRecord> {
        self.videos
    }
}

pub struct FeedDataSource {
    source: Arc<dyn FeedSource>,
    tuning: Pagination,
    cursor: Mutex<PaginationCursor>,
    in_flight: AtomicBool,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl FeedDataSource {
    pub fn new(source: Arc<dyn FeedSource>) -> Self {
        Self::with_pagination(source, Pagination::default())
    }

    pub fn with_pagination(source: Arc<dyn FeedSource>, tuning: Pagination) -> Self {
        Self {
            source,
            tuning,
            cursor: Mutex::new(PaginationCursor::default()),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn pagination(&self) -> Pagination {
        self.tuning
    }

    pub fn cursor(&self) -> PaginationCursor {
        self.cursor.lock().clone()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        let mut cursor = self.cursor.lock();
        let epoch = cursor.epoch.wrapping_add(1);
        *cursor = PaginationCursor {
            epoch,
            ..PaginationCursor::default()
        };
    }

    // Never fails: upstream errors produce an empty `Failed` page and leave
    // the cursor untouched.
    pub fn fetch_page(&self, page: usize, limit: usize) -> Page {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!(page, "fetch_page dropped: request already in flight");
            return Page::empty(PageOutcome::Busy);
        }
        let _guard = InFlight(&self.in_flight);

        if page == 0 {
            self.reset();
        }
        if limit == 0 {
            return Page::empty(PageOutcome::Complete);
        }

        let mut staged = self.cursor.lock().clone();
        let mut collected: Vec<VideoRecord> = Vec::with_capacity(limit);
        let mut outcome = PageOutcome::Complete;
        let mut attempt = 0;
        while collected.len() < limit && attempt < self.tuning.max_attempts {
            attempt += 1;
            let last_id = (staged.offset > 0).then_some(staged.offset);
            let batch = match self.source.fetch_batch(last_id, self.tuning.request_batch) {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(page, attempt, offset = staged.offset, "feed fetch failed: {err:#}");
                    return Page::empty(PageOutcome::Failed);
                }
            };

            let returned = batch.returned;
            let skipped = batch.skipped();
            if skipped > 0 {
                warn!(page, attempt, skipped, "feed rows without a usable id skipped");
            }
            let derived = batch.records.iter().filter(|r| r.has_derived_id()).count();
            if derived > 0 {
                warn!(page, attempt, derived, "feed rows keyed by a fallback id");
            }

            let mut fresh = 0usize;
            for record in batch.records {
                if staged.seen_ids.insert(record.id.clone()) {
                    fresh += 1;
                    collected.push(record);
                }
            }
            staged.offset += returned as u64;
            debug!(page, attempt, returned, fresh, offset = staged.offset, "feed batch");

            if returned < self.tuning.request_batch {
                outcome = PageOutcome::Exhausted;
                break;
            }
            if fresh == 0 {
                staged.offset += self.tuning.skip_ahead;
                debug!(page, attempt, offset = staged.offset, "batch fully seen, skipping ahead");
            }
        }
        collected.truncate(limit);

        let mut cursor = self.cursor.lock();
        if cursor.epoch == staged.epoch {
            *cursor = staged;
        } else {
            debug!(page, "session reset during fetch; cursor left as reset");
        }
        Page {
            videos: collected,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{fixture_records, StaticFeedSource};
    use crate::video::{records_from_payload, Batch};
    use anyhow::anyhow;
    use serde_json::{json, Value};
    use std::thread;
    use std::time::Duration;

    // Serves raw JSON rows through the real payload decoder.
    struct PayloadSource {
        rows: Vec<Value>,
    }

    impl FeedSource for PayloadSource {
        fn fetch_batch(&self, last_id: Option<u64>, limit: usize) -> anyhow::Result<Batch> {
            let start = (last_id.unwrap_or(0) as usize).min(self.rows.len());
            let end = (start + limit).min(self.rows.len());
            records_from_payload(Value::Array(self.rows[start..end].to_vec()))
                .ok_or_else(|| anyhow!("payload is not an array"))
        }
    }

    fn ids(page: &Page) -> Vec<&str> {
        page.videos.iter().map(|v| v.id.as_str()).collect()
    }

    fn source_with(rows: usize) -> (Arc<StaticFeedSource>, FeedDataSource) {
        let upstream = Arc::new(StaticFeedSource::new(fixture_records(rows)));
        let source = FeedDataSource::new(upstream.clone());
        (upstream, source)
    }

    #[test]
    fn first_page_advances_offset_by_rows_returned() {
        let (_, source) = source_with(20);
        let page = source.fetch_page(0, 5);
        assert_eq!(page.outcome, PageOutcome::Complete);
        assert_eq!(page.len(), 5);
        assert_eq!(source.cursor().offset(), 5);
        assert_eq!(source.cursor().seen_count(), 5);
    }

    #[test]
    fn surplus_is_truncated_and_marked_seen() {
        let (upstream, source) = source_with(20);
        source.fetch_page(0, 5);
        let second = source.fetch_page(1, 3);
        assert_eq!(ids(&second), ["v6", "v7", "v8"]);
        assert_eq!(source.cursor().offset(), 10);
        assert_eq!(source.cursor().seen_count(), 10);

        let third = source.fetch_page(2, 3);
        assert_eq!(ids(&third), ["v11", "v12", "v13"]);
        assert_eq!(upstream.calls(), 3);
    }

    #[test]
    fn undecodable_row_still_advances_cursor() {
        let rows = (1..=10)
            .map(|n| {
                if n == 3 {
                    json!({"username": "ghost"})
                } else {
                    json!({"id": n, "username": format!("user{n}")})
                }
            })
            .collect();
        let source = FeedDataSource::new(Arc::new(PayloadSource { rows }));

        let first = source.fetch_page(0, 4);
        assert_eq!(ids(&first), ["1", "2", "4", "5"]);
        assert_eq!(first.outcome, PageOutcome::Complete);
        assert_eq!(source.cursor().offset(), 5);

        let second = source.fetch_page(1, 4);
        assert_eq!(ids(&second), ["6", "7", "8", "9"]);
        assert_eq!(second.outcome, PageOutcome::Complete);
        assert_eq!(source.cursor().offset(), 10);
    }

    #[test]
    fn reset_during_fetch_wins() {
        let upstream = Arc::new(
            StaticFeedSource::new(fixture_records(20)).with_delay(Duration::from_millis(200)),
        );
        let source = Arc::new(FeedDataSource::new(upstream));
        source.fetch_page(0, 5);

        let background = {
            let source = source.clone();
            thread::spawn(move || source.fetch_page(1, 3))
        };
        thread::sleep(Duration::from_millis(50));
        source.reset();
        assert_eq!(background.join().unwrap().len(), 3);

        let cursor = source.cursor();
        assert_eq!(cursor.offset(), 0);
        assert_eq!(cursor.seen_count(), 0);
    }

    #[test]
    fn failure_commits_nothing() {
        let (upstream, source) = source_with(20);
        source.fetch_page(0, 5);
        let before = source.cursor();
        upstream.set_failing(true);
        let page = source.fetch_page(1, 3);
        assert_eq!(page.outcome, PageOutcome::Failed);
        assert!(page.is_empty());
        let after = source.cursor();
        assert_eq!(after.offset(), before.offset());
        assert_eq!(after.seen_count(), before.seen_count());
    }

    #[test]
    fn all_duplicate_batch_skips_ahead() {
        let upstream = Arc::new(StaticFeedSource::new(fixture_records(5)).repeating());
        let source = FeedDataSource::new(upstream.clone());
        source.fetch_page(0, 5);
        let page = source.fetch_page(1, 3);
        assert!(page.is_empty());
        assert_eq!(page.outcome, PageOutcome::Complete);
        // 5 from page 0, then three attempts of 5 rows + 5 skip each.
        assert_eq!(source.cursor().offset(), 5 + 3 * 10);
        assert_eq!(upstream.calls(), 4);
    }

    #[test]
    fn page_zero_starts_new_session() {
        let (_, source) = source_with(20);
        source.fetch_page(0, 5);
        source.fetch_page(1, 5);
        let again = source.fetch_page(0, 5);
        assert_eq!(again.videos[0].id, "v1");
        assert_eq!(source.cursor().offset(), 5);
    }

    #[test]
    fn reset_is_idempotent() {
        let (_, source) = source_with(20);
        source.fetch_page(0, 5);
        source.reset();
        let once = source.cursor();
        source.reset();
        let twice = source.cursor();
        assert_eq!(once.offset(), twice.offset());
        assert_eq!(once.seen_count(), 0);
        assert_eq!(twice.seen_count(), 0);
    }

    #[test]
    fn zero_limit_makes_no_request() {
        let (upstream, source) = source_with(20);
        assert!(source.fetch_page(0, 0).is_empty());
        assert_eq!(upstream.calls(), 0);
    }
}
