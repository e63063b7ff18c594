use std::collections::HashSet;

use crate::video::VideoRecord;

// Keyed by id so a like survives window eviction.
#[derive(Debug, Clone, Default)]
pub struct LikeBook {
    liked: HashSet<String>,
}

impl LikeBook {
    pub fn toggle(&mut self, id: &str) -> bool {
        if self.liked.remove(id) {
            false
        } else {
            self.liked.insert(id.to_string());
            true
        }
    }

    pub fn is_liked(&self, id: &str) -> bool {
        self.liked.contains(id)
    }

    pub fn display_count(&self, record: &VideoRecord) -> i64 {
        record.like_count + i64::from(self.is_liked(&record.id))
    }

    pub fn clear(&mut self) {
        self.liked.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixture_records;

    #[test]
    fn toggle_round_trips() {
        let mut book = LikeBook::default();
        assert!(book.toggle("v1"));
        assert!(book.is_liked("v1"));
        assert!(!book.toggle("v1"));
        assert!(!book.is_liked("v1"));
    }

    #[test]
    fn display_count_includes_local_like() {
        let record = fixture_records(3).remove(2);
        let mut book = LikeBook::default();
        assert_eq!(book.display_count(&record), 3);
        book.toggle(&record.id);
        assert_eq!(book.display_count(&record), 4);
    }
}
