//! Site membership actions
//!
//! Galleries and photos are shown on the sites they belong to. These admin
//! actions move a selection on or off one site:
//!
//! | Action | Selection | Effect |
//! |---|---|---|
//! | `AddGalleriesToSite` | galleries | add the galleries |
//! | `RemoveGalleriesFromSite` | galleries | remove the galleries |
//! | `AddGalleryPhotosToSite` | galleries | add every photo in them |
//! | `RemoveGalleryPhotosFromSite` | galleries | remove every photo in them |
//! | `AddPhotosToSite` | photos | add the photos |
//! | `RemovePhotosFromSite` | photos | remove the photos |

use serde::{Deserialize, Serialize};

use crate::db::{
    AssetId, GalleryId, GalleryRepository, MediaAsset, RepositoryError, SiteId, SiteRepository,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SiteAction {
    AddGalleriesToSite,
    RemoveGalleriesFromSite,
    AddGalleryPhotosToSite,
    RemoveGalleryPhotosFromSite,
    AddPhotosToSite,
    RemovePhotosFromSite,
}

impl SiteAction {
    fn adds(self) -> bool {
        matches!(
            self,
            SiteAction::AddGalleriesToSite
                | SiteAction::AddGalleryPhotosToSite
                | SiteAction::AddPhotosToSite
        )
    }
}

impl std::str::FromStr for SiteAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add-galleries-to-site" => Ok(SiteAction::AddGalleriesToSite),
            "remove-galleries-from-site" => Ok(SiteAction::RemoveGalleriesFromSite),
            "add-gallery-photos-to-site" => Ok(SiteAction::AddGalleryPhotosToSite),
            "remove-gallery-photos-from-site" => Ok(SiteAction::RemoveGalleryPhotosFromSite),
            "add-photos-to-site" => Ok(SiteAction::AddPhotosToSite),
            "remove-photos-from-site" => Ok(SiteAction::RemovePhotosFromSite),
            other => Err(format!("unknown site action '{}'", other)),
        }
    }
}

/// What the action applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ids", rename_all = "snake_case")]
pub enum Selection {
    Galleries(Vec<GalleryId>),
    Photos(Vec<AssetId>),
}

impl Selection {
    fn len(&self) -> usize {
        match self {
            Selection::Galleries(ids) => ids.len(),
            Selection::Photos(ids) => ids.len(),
        }
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteCommand {
    pub action: SiteAction,
    pub site_id: SiteId,
    pub selection: Selection,
}

#[derive(Debug, thiserror::Error)]
pub enum SiteActionError {
    #[error("Nothing selected")]
    EmptySelection,

    #[error("Action {action:?} does not apply to {selection}")]
    WrongSelection { action: SiteAction, selection: &'static str },

    #[error("Site {0} does not exist")]
    UnknownSite(SiteId),

    #[error("Gallery {0} does not exist")]
    UnknownGallery(GalleryId),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl SiteCommand {
    pub fn validate(&self) -> Result<(), SiteActionError> {
        if self.selection.is_empty() {
            return Err(SiteActionError::EmptySelection);
        }

        let wants_galleries = !matches!(
            self.action,
            SiteAction::AddPhotosToSite | SiteAction::RemovePhotosFromSite
        );
        match (&self.selection, wants_galleries) {
            (Selection::Galleries(_), true) | (Selection::Photos(_), false) => Ok(()),
            (Selection::Galleries(_), false) => Err(SiteActionError::WrongSelection {
                action: self.action,
                selection: "galleries",
            }),
            (Selection::Photos(_), true) => Err(SiteActionError::WrongSelection {
                action: self.action,
                selection: "photos",
            }),
        }
    }
}

/// Outcome shown to the admin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReport {
    /// Membership rows actually added or removed
    pub affected: u64,
    pub message: String,
}

fn plural<'a>(count: usize, one: &'a str, many: &'a str) -> &'a str {
    if count == 1 {
        one
    } else {
        many
    }
}

#[tracing::instrument(skip(repo, command), fields(action = ?command.action, site_id = command.site_id))]
pub async fn handle<R>(repo: &R, command: SiteCommand) -> Result<ActionReport, SiteActionError>
where
    R: GalleryRepository + SiteRepository + ?Sized,
{
    command.validate()?;

    let site = repo
        .find_site(command.site_id)
        .await?
        .ok_or(SiteActionError::UnknownSite(command.site_id))?;
    let count = command.selection.len();
    let member = command.action.adds();

    let (affected, message) = match (&command.selection, command.action) {
        (Selection::Galleries(ids), SiteAction::AddGalleriesToSite | SiteAction::RemoveGalleriesFromSite) => {
            let affected = repo.set_gallery_sites(site.id, ids, member).await?;
            let message = if member {
                plural(
                    count,
                    "The gallery has been successfully added to",
                    "The galleries have been successfully added to",
                )
            } else {
                plural(
                    count,
                    "The gallery has been successfully removed from",
                    "The selected galleries have been successfully removed from",
                )
            };
            (affected, format!("{} {}", message, site.name))
        },
        (Selection::Galleries(ids), _) => {
            let titles = gallery_titles(repo, ids).await?;
            let photos = repo.assets_in_galleries(ids).await?;
            let affected = repo.set_asset_sites(site.id, &photos, member).await?;
            let lead = plural(count, "All photos of gallery", "All photos in the galleries");
            let verb = if member { "added to" } else { "removed from" };
            (
                affected,
                format!("{} {} have been successfully {} {}", lead, titles, verb, site.name),
            )
        },
        (Selection::Photos(ids), _) => {
            let affected = repo.set_asset_sites(site.id, ids, member).await?;
            let message = if member {
                plural(
                    count,
                    "The photo has been successfully added to",
                    "The selected photos have been successfully added to",
                )
            } else {
                plural(
                    count,
                    "The photo has been successfully removed from",
                    "The selected photos have been successfully removed from",
                )
            };
            (affected, format!("{} {}", message, site.name))
        },
    };

    tracing::info!(affected, "Site action applied");
    Ok(ActionReport { affected, message })
}

async fn gallery_titles<R>(repo: &R, ids: &[GalleryId]) -> Result<String, SiteActionError>
where
    R: GalleryRepository + ?Sized,
{
    let mut titles = Vec::with_capacity(ids.len());
    for id in ids {
        let gallery = repo
            .find_gallery(*id)
            .await?
            .ok_or(SiteActionError::UnknownGallery(*id))?;
        titles.push(format!("'{}'", gallery.title));
    }
    Ok(titles.join(", "))
}

/// Photos of a gallery that can never be displayed with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanReport {
    pub photos: Vec<MediaAsset>,
    /// Warning for the admin; `None` when there are no orphans
    pub warning: Option<String>,
}

/// Find the gallery's photos that share no site with the gallery
pub async fn orphaned_photos<R>(repo: &R, gallery_id: GalleryId) -> Result<OrphanReport, SiteActionError>
where
    R: SiteRepository + ?Sized,
{
    let photos = repo.orphaned_assets(gallery_id).await.map_err(|e| match e {
        RepositoryError::NotFound(_) => SiteActionError::UnknownGallery(gallery_id),
        other => other.into(),
    })?;

    let warning = (!photos.is_empty()).then(|| {
        let list = photos.iter().map(|p| p.title.as_str()).collect::<Vec<_>>().join(", ");
        let lead = plural(
            photos.len(),
            "The following photo does not belong to the same site(s) as the gallery, so will never be displayed",
            "The following photos do not belong to the same site(s) as the gallery, so will never be displayed",
        );
        format!("{}: {}.", lead, list)
    });

    if let Some(ref warning) = warning {
        tracing::warn!(gallery_id, "{}", warning);
    }

    Ok(OrphanReport { photos, warning })
}
