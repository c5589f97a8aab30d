//! Create gallery command

use darkroom_common::slug::{slugify, validate_slug, MAX_SLUG_LENGTH};
use serde::{Deserialize, Serialize};

use crate::db::{Gallery, GalleryRepository, NewGallery, RepositoryError, SiteId, SiteRepository};

/// Command to create a gallery, published on the given sites
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGalleryCommand {
    pub title: String,
    /// Derived from the title when absent
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default = "default_public")]
    pub is_public: bool,
    pub site_ids: Vec<SiteId>,
}

fn default_public() -> bool {
    true
}

#[derive(Debug, thiserror::Error)]
pub enum CreateGalleryError {
    #[error("Title cannot be empty")]
    EmptyTitle,

    #[error("Invalid slug: {0}")]
    InvalidSlug(#[from] darkroom_common::DarkroomError),

    #[error("Site {0} does not exist")]
    UnknownSite(SiteId),

    #[error("Gallery with slug '{0}' already exists")]
    DuplicateSlug(String),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl CreateGalleryCommand {
    pub fn slug(&self) -> String {
        self.slug.clone().unwrap_or_else(|| slugify(&self.title))
    }

    pub fn validate(&self) -> Result<(), CreateGalleryError> {
        if self.title.trim().is_empty() {
            return Err(CreateGalleryError::EmptyTitle);
        }
        validate_slug(&self.slug(), MAX_SLUG_LENGTH)?;
        Ok(())
    }
}

#[tracing::instrument(skip(repo, command), fields(title = %command.title))]
pub async fn handle<R>(repo: &R, command: CreateGalleryCommand) -> Result<Gallery, CreateGalleryError>
where
    R: GalleryRepository + SiteRepository + ?Sized,
{
    command.validate()?;

    for site_id in &command.site_ids {
        if repo.find_site(*site_id).await?.is_none() {
            return Err(CreateGalleryError::UnknownSite(*site_id));
        }
    }

    let slug = command.slug();
    let gallery = repo
        .create_gallery(NewGallery {
            title: command.title,
            slug: slug.clone(),
            is_public: command.is_public,
            site_ids: command.site_ids,
        })
        .await
        .map_err(|e| match e {
            RepositoryError::Conflict(_) => CreateGalleryError::DuplicateSlug(slug),
            other => other.into(),
        })?;

    tracing::info!(gallery_id = gallery.id, slug = %gallery.slug, "Gallery created");
    Ok(gallery)
}
