use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::filters::FilterState;
use crate::ingestion::Language;
use crate::pagination::PaginationCursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    ExtraLarge,
    Large,
    #[default]
    Medium,
    Small,
    List,
}

impl ViewMode {
    pub const ALL: [ViewMode; 5] = [
        ViewMode::ExtraLarge,
        ViewMode::Large,
        ViewMode::Medium,
        ViewMode::Small,
        ViewMode::List,
    ];

    pub fn columns(&self) -> usize {
        match self {
            ViewMode::ExtraLarge => 1,
            ViewMode::Large => 2,
            ViewMode::Medium => 3,
            ViewMode::Small => 4,
            ViewMode::List => 1,
        }
    }

    /// `None` means the thumbnail spans the full row width.
    pub fn thumbnail_px(&self) -> Option<u32> {
        match self {
            ViewMode::ExtraLarge => Some(400),
            ViewMode::Large => Some(300),
            ViewMode::Medium => Some(200),
            ViewMode::Small => Some(120),
            ViewMode::List => None,
        }
    }

    pub fn rows<'a, T>(&self, items: &'a [T]) -> Vec<&'a [T]> {
        items.chunks(self.columns()).collect()
    }
}

/// Per-viewer state. Nothing here is shared between sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GallerySession {
    pub language: Language,
    pub filters: FilterState,
    pub cursor: PaginationCursor,
    pub favorites: BTreeSet<String>,
    pub view_mode: ViewMode,
}

impl GallerySession {
    pub fn new(language: Language, page_increment: usize) -> Self {
        Self {
            language,
            filters: FilterState::default(),
            cursor: PaginationCursor::new(page_increment),
            favorites: BTreeSet::new(),
            view_mode: ViewMode::default(),
        }
    }

    /// Returns true when the filters changed, in which case paging restarts.
    pub fn set_filters(&mut self, filters: FilterState) -> bool {
        if self.filters == filters {
            return false;
        }
        self.filters = filters;
        self.cursor = self.cursor.reset();
        true
    }

    pub fn clear_filters(&mut self) -> bool {
        self.set_filters(FilterState::default())
    }

    pub fn set_language(&mut self, language: Language) {
        if self.language != language {
            self.language = language;
            self.cursor = self.cursor.reset();
        }
    }

    pub fn load_more(&mut self) {
        self.cursor = self.cursor.load_more();
    }

    /// Returns whether the product is a favorite after the toggle.
    pub fn toggle_favorite(&mut self, product_id: &str) -> bool {
        if self.favorites.remove(product_id) {
            false
        } else {
            self.favorites.insert(product_id.to_string());
            true
        }
    }

    pub fn is_favorite(&self, product_id: &str) -> bool {
        self.favorites.contains(product_id)
    }

    pub fn set_view_mode(&mut self, view_mode: ViewMode) {
        self.view_mode = view_mode;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::SortOrder;

    #[test]
    fn changing_filters_resets_the_cursor() {
        let mut session = GallerySession::new(Language::Kurdish, 12);
        session.load_more();
        session.load_more();
        assert_eq!(session.cursor.visible_count, 36);

        assert!(session.set_filters(FilterState::default().with_search("lamp")));
        assert_eq!(session.cursor.visible_count, 12);

        session.load_more();
        assert!(!session.set_filters(FilterState::default().with_search("lamp")));
        assert_eq!(session.cursor.visible_count, 24);

        assert!(session.set_filters(
            FilterState::default()
                .with_search("lamp")
                .with_sort(SortOrder::Newest)
        ));
        assert_eq!(session.cursor.visible_count, 12);
        assert!(session.clear_filters());
        assert!(!session.clear_filters());
    }

    #[test]
    fn toggles_favorites() {
        let mut session = GallerySession::new(Language::Arabic, 12);
        assert!(session.toggle_favorite("7"));
        assert!(session.is_favorite("7"));
        assert!(!session.toggle_favorite("7"));
        assert!(!session.is_favorite("7"));
    }

    #[test]
    fn switching_language_restarts_paging() {
        let mut session = GallerySession::new(Language::Kurdish, 4);
        session.load_more();
        session.set_language(Language::Kurdish);
        assert_eq!(session.cursor.visible_count, 8);
        session.set_language(Language::Arabic);
        assert_eq!(session.cursor.visible_count, 4);
    }

    #[test]
    fn lays_out_rows_per_view_mode() {
        let items: Vec<u32> = (0..7).collect();
        assert_eq!(ViewMode::Small.rows(&items).len(), 2);
        assert_eq!(ViewMode::Medium.rows(&items).len(), 3);
        assert_eq!(ViewMode::List.rows(&items).len(), 7);
        assert_eq!(ViewMode::List.thumbnail_px(), None);
        for mode in ViewMode::ALL {
            assert!(mode.columns() >= 1);
        }
    }
}
