use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ingestion::{split_tokens, Attribute, Product};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    None,
    Newest,
    Oldest,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterState {
    pub search_text: String,
    pub selected_tags: BTreeSet<String>,
    pub selected_colors: BTreeSet<String>,
    pub selected_materials: BTreeSet<String>,
    pub sort: SortOrder,
}

impl FilterState {
    pub fn with_search(mut self, text: impl Into<String>) -> Self {
        self.search_text = text.into();
        self
    }

    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_selected(mut self, attribute: Attribute, values: &[&str]) -> Self {
        let target = self.selected_mut(attribute);
        target.extend(values.iter().map(|value| value.to_string()));
        self
    }

    pub fn selected(&self, attribute: Attribute) -> &BTreeSet<String> {
        match attribute {
            Attribute::Tag => &self.selected_tags,
            Attribute::Color => &self.selected_colors,
            Attribute::Material => &self.selected_materials,
        }
    }

    fn selected_mut(&mut self, attribute: Attribute) -> &mut BTreeSet<String> {
        match attribute {
            Attribute::Tag => &mut self.selected_tags,
            Attribute::Color => &mut self.selected_colors,
            Attribute::Material => &mut self.selected_materials,
        }
    }

    pub fn normalized_search(&self) -> Option<String> {
        let trimmed = self.search_text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_lowercase())
        }
    }

    pub fn is_active(&self) -> bool {
        self.normalized_search().is_some()
            || Attribute::ALL
                .iter()
                .any(|attribute| !self.selected(*attribute).is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub products: Vec<Product>,
    /// Search text was present and removed at least one product.
    pub search_narrowed: bool,
}

/// Search, then attribute filters, then sort. Each step is skipped when its
/// constraint is empty. The input slice is never modified.
pub fn apply(products: &[Product], state: &FilterState) -> FilterOutcome {
    let mut search_narrowed = false;
    let mut selected: Vec<&Product> = products.iter().collect();

    if let Some(needle) = state.normalized_search() {
        let before = selected.len();
        selected.retain(|product| matches_search(product, &needle));
        search_narrowed = selected.len() < before;
    }

    for attribute in Attribute::ALL {
        let wanted = state.selected(attribute);
        if wanted.is_empty() {
            continue;
        }
        selected.retain(|product| matches_any(product.field(attribute), wanted));
    }

    match state.sort {
        SortOrder::None => {}
        SortOrder::Newest => selected.sort_by(|a, b| b.position.cmp(&a.position)),
        SortOrder::Oldest => selected.sort_by_key(|product| product.position),
    }

    FilterOutcome {
        products: selected.into_iter().cloned().collect(),
        search_narrowed,
    }
}

/// Global substring test over every raw cell, not just the modeled fields.
pub fn matches_search(product: &Product, needle: &str) -> bool {
    product.searchable_text().to_lowercase().contains(needle)
}

/// Substring rather than set membership so "Red" also matches "Red, Dark Red".
fn matches_any(field: &str, wanted: &BTreeSet<String>) -> bool {
    wanted.iter().any(|value| field.contains(value.as_str()))
}

/// Sorted unique tokens of one attribute, for multi-select option lists.
pub fn option_values(products: &[Product], attribute: Attribute) -> Vec<String> {
    products
        .iter()
        .flat_map(|product| split_tokens(product.field(attribute)))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::{record, Language, RecordNormalizer};

    fn catalog() -> Vec<Product> {
        let normalizer = RecordNormalizer::default();
        let rows = vec![
            record(&[
                ("Title", "Oak chair"),
                ("Kurdish Colors", "Red, Dark Red"),
                ("Kurdish Materials", "Oak"),
                ("Kurdish Tags", "chair"),
            ]),
            record(&[
                ("Title", "Glass table"),
                ("Kurdish Colors", "Blue"),
                ("Kurdish Materials", "Glass, Steel"),
                ("Kurdish Tags", "table"),
            ]),
            record(&[
                ("Title", "Lamp"),
                ("Kurdish Colors", "White"),
                ("Kurdish Materials", "Steel"),
                ("Kurdish Tags", "light"),
                ("Note", "Ships with a RED cable"),
            ]),
        ];
        normalizer.normalize_all(&rows, Language::Kurdish).products
    }

    fn titles(products: &[Product]) -> Vec<&str> {
        products.iter().map(|p| p.title.as_str()).collect()
    }

    #[test]
    fn empty_state_is_identity() {
        let products = catalog();
        let outcome = apply(&products, &FilterState::default());
        assert_eq!(titles(&outcome.products), titles(&products));
        assert!(!outcome.search_narrowed);

        let blank = FilterState::default().with_search("   ");
        assert_eq!(apply(&products, &blank).products.len(), products.len());
    }

    #[test]
    fn search_matches_any_raw_cell_case_insensitively() {
        let products = catalog();
        let outcome = apply(&products, &FilterState::default().with_search("red"));
        assert_eq!(titles(&outcome.products), vec!["Oak chair", "Lamp"]);
        assert!(outcome.search_narrowed);

        let expected: Vec<&str> = products
            .iter()
            .filter(|p| p.searchable_text().to_lowercase().contains("red"))
            .map(|p| p.title.as_str())
            .collect();
        assert_eq!(titles(&outcome.products), expected);
    }

    #[test]
    fn search_ignores_surrounding_whitespace() {
        let products = catalog();
        let padded = FilterState::default().with_search("  Lamp\t");
        assert_eq!(padded.normalized_search().as_deref(), Some("lamp"));

        let plain = apply(&products, &FilterState::default().with_search("lamp"));
        for text in [" lamp", "lamp ", "  Lamp\t"] {
            let outcome = apply(&products, &FilterState::default().with_search(text));
            assert_eq!(titles(&outcome.products), titles(&plain.products), "{text:?}");
            assert!(outcome.search_narrowed);
        }
        assert_eq!(titles(&plain.products), vec!["Lamp"]);
    }

    #[test]
    fn search_that_keeps_everything_does_not_count_as_narrowing() {
        let products = catalog();
        let outcome = apply(&products, &FilterState::default().with_search("a"));
        assert_eq!(outcome.products.len(), 3);
        assert!(!outcome.search_narrowed);
    }

    #[test]
    fn attribute_filters_use_substring_any_match() {
        let products = catalog();
        let state = FilterState::default().with_selected(Attribute::Color, &["Dark Red", "Blue"]);
        assert_eq!(
            titles(&apply(&products, &state).products),
            vec!["Oak chair", "Glass table"]
        );

        let combined = state.with_selected(Attribute::Material, &["Steel"]);
        assert_eq!(titles(&apply(&products, &combined).products), vec!["Glass table"]);
    }

    #[test]
    fn newest_sort_is_idempotent() {
        let products = catalog();
        let newest = FilterState::default().with_sort(SortOrder::Newest);
        let once = apply(&products, &newest).products;
        let twice = apply(&once, &newest).products;
        assert_eq!(titles(&once), vec!["Lamp", "Glass table", "Oak chair"]);
        assert_eq!(titles(&once), titles(&twice));

        let oldest = apply(&once, &FilterState::default().with_sort(SortOrder::Oldest)).products;
        assert_eq!(titles(&oldest), titles(&products));
    }

    #[test]
    fn apply_does_not_mutate_input() {
        let products = catalog();
        let before = titles(&products).join("|");
        let _ = apply(
            &products,
            &FilterState::default()
                .with_search("lamp")
                .with_sort(SortOrder::Newest),
        );
        assert_eq!(titles(&products).join("|"), before);
    }

    #[test]
    fn collects_option_values() {
        let products = catalog();
        assert_eq!(
            option_values(&products, Attribute::Material),
            vec!["Glass".to_string(), "Oak".into(), "Steel".into()]
        );
    }

    #[test]
    fn reports_active_state() {
        assert!(!FilterState::default().is_active());
        assert!(FilterState::default().with_search("x").is_active());
        assert!(FilterState::default()
            .with_selected(Attribute::Tag, &["chair"])
            .is_active());
        assert!(!FilterState::default().with_sort(SortOrder::Newest).is_active());
    }
}
