use std::collections::BTreeMap;

use serde::Serialize;

use crate::analytics::{AnalyticsStore, Interaction, ProductStats};
use crate::config::PublicAppConfig;
use crate::ingestion::{Attribute, Language, Product};
use crate::media::MediaKind;
use crate::session::{GallerySession, ViewMode};
use crate::settings::{AppData, UpdateAppDataPayload};
use crate::{FeedStatus, Gallery};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryHealth {
    pub analytics_location: String,
    pub app_data_path: String,
    pub cached_sheets: usize,
    pub config: PublicAppConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCard {
    pub id: String,
    pub title: String,
    pub media_url: String,
    pub media: MediaKind,
    pub embed_url: Option<String>,
    pub tags: Vec<String>,
    pub colors: Vec<String>,
    pub materials: Vec<String>,
    pub extra_fields: Vec<(String, String)>,
    pub is_favorite: bool,
    pub stats: ProductStats,
}

impl ProductCard {
    pub fn from_product(product: &Product, session: &GallerySession, analytics: &AnalyticsStore) -> Self {
        let media = product.media_kind();
        let tokens = |attribute: Attribute| product.tokens(attribute).into_iter().collect::<Vec<_>>();
        Self {
            id: product.id.clone(),
            title: product.title.clone(),
            media_url: product.media_url.clone(),
            embed_url: media.embed_url(),
            media,
            tags: tokens(Attribute::Tag),
            colors: tokens(Attribute::Color),
            materials: tokens(Attribute::Material),
            extra_fields: product
                .extra_fields
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            is_favorite: session.is_favorite(&product.id),
            stats: analytics.product(&product.id),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryPage {
    pub status: FeedStatus,
    pub language: Language,
    pub items: Vec<ProductCard>,
    pub total_matches: usize,
    pub visible: usize,
    pub remaining: usize,
    pub has_more: bool,
    pub view_mode: ViewMode,
    pub columns: usize,
    pub thumbnail_px: Option<u32>,
    pub options: BTreeMap<Attribute, Vec<String>>,
}

pub async fn load_gallery_page(gallery: &Gallery, session: &GallerySession) -> GalleryPage {
    let feed = gallery.load_feed(session.language).await;
    gallery.page(&feed, session)
}

pub fn record_interaction(
    gallery: &Gallery,
    interaction: Interaction,
    product_id: Option<String>,
) -> Result<(), String> {
    gallery
        .record_interaction(interaction, product_id.as_deref())
        .map_err(|err| err.to_string())
}

pub fn gallery_health(gallery: &Gallery) -> GalleryHealth {
    gallery.health()
}

pub fn get_app_data(gallery: &Gallery) -> Result<AppData, String> {
    gallery.app_data().map_err(|err| err.to_string())
}

pub fn update_app_data(gallery: &Gallery, payload: UpdateAppDataPayload) -> Result<AppData, String> {
    gallery
        .update_app_data(payload)
        .map_err(|err| err.to_string())
}
