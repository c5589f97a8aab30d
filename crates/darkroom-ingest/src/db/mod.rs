//! Catalog persistence
//!
//! The pipeline talks to the catalog through three narrow traits:
//!
//! - [`GalleryRepository`]: parent gallery lookups
//! - [`AssetRepository`]: slug reservation and atomic publication of assets
//! - [`SiteRepository`]: site membership used by the admin site actions
//!
//! [`PgCatalog`] implements them on Postgres, [`MemoryCatalog`] in process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryCatalog;
pub use postgres::PgCatalog;

pub type GalleryId = i64;
pub type SiteId = i64;
pub type AssetId = Uuid;

pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub name: String,
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gallery {
    pub id: GalleryId,
    pub title: String,
    pub slug: String,
    pub is_public: bool,
    pub site_ids: Vec<SiteId>,
}

#[derive(Debug, Clone)]
pub struct NewGallery {
    pub title: String,
    pub slug: String,
    pub is_public: bool,
    pub site_ids: Vec<SiteId>,
}

/// A published photo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAsset {
    pub id: AssetId,
    pub slug: String,
    /// Storage key of the binary
    pub binary_ref: String,
    pub title: String,
    pub caption: String,
    pub is_public: bool,
    /// SHA-256 of the binary, hex encoded
    pub checksum: String,
    pub site_ids: Vec<SiteId>,
    pub gallery_ids: Vec<GalleryId>,
    pub created_at: DateTime<Utc>,
}

/// Result of trying to claim a slug for a new asset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// The slug was free and is now held by the caller
    Acquired(AssetId),
    /// The caller already held this pending reservation (a re-run)
    Resumed(AssetId),
    /// The caller's own asset is already published under this slug
    Published(AssetId),
    /// Another owner's asset or reservation holds the slug
    Taken,
}

/// Everything needed to turn a reservation into a visible asset
#[derive(Debug, Clone)]
pub struct PublishAsset {
    pub asset_id: AssetId,
    pub owner_key: String,
    pub binary_ref: String,
    pub title: String,
    pub caption: String,
    pub is_public: bool,
    pub checksum: String,
    pub site_id: SiteId,
    pub gallery_id: GalleryId,
}

#[async_trait]
pub trait GalleryRepository: Send + Sync {
    async fn find_gallery(&self, id: GalleryId) -> RepositoryResult<Option<Gallery>>;

    async fn create_gallery(&self, gallery: NewGallery) -> RepositoryResult<Gallery>;
}

#[async_trait]
pub trait AssetRepository: Send + Sync {
    /// Published asset by slug; pending reservations are invisible
    async fn find_asset_by_slug(&self, slug: &str) -> RepositoryResult<Option<MediaAsset>>;

    /// Atomically create a pending record for `slug` owned by `owner_key`
    async fn reserve_slug(&self, slug: &str, owner_key: &str) -> RepositoryResult<Reservation>;

    /// Drop a pending reservation held by `owner_key`
    ///
    /// Published assets and other owners' reservations are never touched.
    /// Returns whether a row was removed.
    async fn release_slug(&self, slug: &str, owner_key: &str) -> RepositoryResult<bool>;

    /// Mark the reservation published, then link the site, then the gallery,
    /// all in one atomic unit
    async fn publish_asset(&self, publish: PublishAsset) -> RepositoryResult<MediaAsset>;
}

#[async_trait]
pub trait SiteRepository: Send + Sync {
    async fn find_site(&self, id: SiteId) -> RepositoryResult<Option<Site>>;

    async fn create_site(&self, name: &str, domain: &str) -> RepositoryResult<Site>;

    /// Add (`member = true`) or remove the site on each gallery
    async fn set_gallery_sites(
        &self,
        site_id: SiteId,
        gallery_ids: &[GalleryId],
        member: bool,
    ) -> RepositoryResult<u64>;

    /// Add (`member = true`) or remove the site on each published asset
    async fn set_asset_sites(
        &self,
        site_id: SiteId,
        asset_ids: &[AssetId],
        member: bool,
    ) -> RepositoryResult<u64>;

    /// Distinct published assets contained in any of the galleries
    async fn assets_in_galleries(&self, gallery_ids: &[GalleryId]) -> RepositoryResult<Vec<AssetId>>;

    /// Published assets of the gallery that share no site with it, by title
    async fn orphaned_assets(&self, gallery_id: GalleryId) -> RepositoryResult<Vec<MediaAsset>>;
}

/// Everything the binary wires together
pub trait Catalog: GalleryRepository + AssetRepository + SiteRepository {}

impl<T: GalleryRepository + AssetRepository + SiteRepository> Catalog for T {}
