use anyhow::{ensure, Result};

use crate::video::VideoRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimits {
    pub max_size: usize,
    // Retained from the back when eviction runs.
    pub keep_count: usize,
}

impl Default for WindowLimits {
    fn default() -> Self {
        Self {
            max_size: 15,
            keep_count: 12,
        }
    }
}

impl WindowLimits {
    pub fn new(max_size: usize, keep_count: usize) -> Result<Self> {
        let limits = Self {
            max_size,
            keep_count,
        };
        limits.validate()?;
        Ok(limits)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.keep_count > 0, "window: keep_count must be positive");
        ensure!(
            self.keep_count <= self.max_size,
            "window: keep_count ({}) must not exceed max_size ({})",
            self.keep_count,
            self.max_size
        );
        Ok(())
    }
}

// The record at `new_index` is the one that sat at `previous_index`, unless
// the old index fell inside the dropped prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eviction {
    pub removed: usize,
    pub previous_index: usize,
    pub new_index: usize,
}

impl Eviction {
    pub fn scroll_offset(&self, item_height: f64) -> f64 {
        self.new_index as f64 * item_height
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeedWindow {
    items: Vec<VideoRecord>,
    limits: WindowLimits,
}

impl FeedWindow {
    pub fn new(limits: WindowLimits) -> Self {
        Self {
            items: Vec::new(),
            limits,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn as_slice(&self) -> &[VideoRecord] {
        &self.items
    }

    pub fn get(&self, index: usize) -> Option<&VideoRecord> {
        self.items.get(index)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn replace(&mut self, records: Vec<VideoRecord>) {
        self.items = records;
    }

    pub fn append(&mut self, records: Vec<VideoRecord>) -> usize {
        let added = records.len();
        self.items.extend(records);
        added
    }

    pub fn evict(&mut self, current_index: usize) -> Option<Eviction> {
        if self.items.len() < self.limits.max_size {
            return None;
        }
        let removed = self.items.len().saturating_sub(self.limits.keep_count);
        if removed == 0 {
            return None;
        }
        self.items.drain(..removed);
        Some(Eviction {
            removed,
            previous_index: current_index,
            new_index: current_index.saturating_sub(removed),
        })
    }
}
