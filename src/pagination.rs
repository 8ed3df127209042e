use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_PAGE_INCREMENT;

/// "Load more" cursor. Holds no reference to the collection it pages over;
/// slicing clamps to whatever is currently available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationCursor {
    pub visible_count: usize,
    pub page_increment: usize,
}

impl PaginationCursor {
    pub fn new(page_increment: usize) -> Self {
        let page_increment = page_increment.max(1);
        Self {
            visible_count: page_increment,
            page_increment,
        }
    }

    pub fn with_visible(mut self, visible_count: usize) -> Self {
        self.visible_count = visible_count;
        self
    }

    pub fn advance(self, increment: usize) -> Self {
        Self {
            visible_count: self.visible_count.saturating_add(increment),
            ..self
        }
    }

    pub fn load_more(self) -> Self {
        self.advance(self.page_increment)
    }

    pub fn reset(self) -> Self {
        Self {
            visible_count: self.page_increment,
            ..self
        }
    }

    pub fn remaining(&self, total: usize) -> usize {
        total.saturating_sub(self.visible_count)
    }

    pub fn has_more(&self, total: usize) -> bool {
        self.remaining(total) > 0
    }

    pub fn visible_slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        let end = self.visible_count.min(items.len());
        &items[..end]
    }
}

impl Default for PaginationCursor {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_INCREMENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_in_increments() {
        let cursor = PaginationCursor::default().with_visible(0);
        let cursor = cursor.advance(12).advance(12);
        assert_eq!(cursor.visible_count, 24);
        assert_eq!(cursor.remaining(10), 0);
        assert!(!cursor.has_more(10));
        assert_eq!(cursor.remaining(30), 6);
    }

    #[test]
    fn reset_returns_to_page_increment() {
        let cursor = PaginationCursor::new(5).load_more().load_more();
        assert_eq!(cursor.visible_count, 15);
        assert_eq!(cursor.reset().visible_count, 5);
    }

    #[test]
    fn slicing_clamps_to_available_items() {
        let items: Vec<u32> = (0..7).collect();
        let cursor = PaginationCursor::new(12);
        assert_eq!(cursor.visible_slice(&items).len(), 7);
        assert_eq!(PaginationCursor::new(3).visible_slice(&items), &[0, 1, 2]);
        assert!(cursor.with_visible(0).visible_slice(&items).is_empty());
    }

    #[test]
    fn zero_increment_is_clamped() {
        let cursor = PaginationCursor::new(0);
        assert_eq!(cursor.page_increment, 1);
        assert_eq!(cursor.visible_count, 1);
    }
}
