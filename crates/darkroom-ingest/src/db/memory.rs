use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    AssetId, AssetRepository, Gallery, GalleryId, GalleryRepository, MediaAsset, NewGallery,
    PublishAsset, RepositoryError, RepositoryResult, Reservation, Site, SiteId, SiteRepository,
};

#[derive(Debug, Clone)]
struct AssetRow {
    owner_key: String,
    published: bool,
    asset: MediaAsset,
}

#[derive(Debug, Default)]
struct State {
    next_site_id: SiteId,
    next_gallery_id: GalleryId,
    sites: BTreeMap<SiteId, Site>,
    galleries: BTreeMap<GalleryId, Gallery>,
    assets: HashMap<AssetId, AssetRow>,
    slugs: HashMap<String, AssetId>,
}

impl State {
    fn published(&self) -> impl Iterator<Item = &MediaAsset> {
        self.assets.values().filter(|r| r.published).map(|r| &r.asset)
    }
}

/// In-process catalog
///
/// A single lock guards every table, so each trait call is one critical
/// section. That gives the same check-and-create guarantees as the unique
/// constraints in Postgres.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: RwLock<State>,
}

fn add_unique<T: PartialEq + Copy>(list: &mut Vec<T>, value: T) -> bool {
    if list.contains(&value) {
        false
    } else {
        list.push(value);
        true
    }
}

fn remove_value<T: PartialEq>(list: &mut Vec<T>, value: &T) -> bool {
    let before = list.len();
    list.retain(|v| v != value);
    list.len() != before
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every published asset, ordered by slug
    pub async fn published_assets(&self) -> Vec<MediaAsset> {
        let state = self.state.read().await;
        let mut assets: Vec<MediaAsset> = state.published().cloned().collect();
        assets.sort_by(|a, b| a.slug.cmp(&b.slug));
        assets
    }

    /// Number of slug rows, pending reservations included
    pub async fn reserved_slug_count(&self) -> usize {
        self.state.read().await.slugs.len()
    }
}

#[async_trait]
impl GalleryRepository for MemoryCatalog {
    async fn find_gallery(&self, id: GalleryId) -> RepositoryResult<Option<Gallery>> {
        Ok(self.state.read().await.galleries.get(&id).cloned())
    }

    async fn create_gallery(&self, new: NewGallery) -> RepositoryResult<Gallery> {
        let mut state = self.state.write().await;

        if state.galleries.values().any(|g| g.slug == new.slug) {
            return Err(RepositoryError::Conflict(format!(
                "gallery slug '{}' already exists",
                new.slug
            )));
        }
        if let Some(missing) = new.site_ids.iter().find(|id| !state.sites.contains_key(id)) {
            return Err(RepositoryError::NotFound(format!("site {}", missing)));
        }

        state.next_gallery_id += 1;
        let gallery = Gallery {
            id: state.next_gallery_id,
            title: new.title,
            slug: new.slug,
            is_public: new.is_public,
            site_ids: new.site_ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect(),
        };
        state.galleries.insert(gallery.id, gallery.clone());
        Ok(gallery)
    }
}

#[async_trait]
impl AssetRepository for MemoryCatalog {
    async fn find_asset_by_slug(&self, slug: &str) -> RepositoryResult<Option<MediaAsset>> {
        let state = self.state.read().await;
        Ok(state
            .slugs
            .get(slug)
            .and_then(|id| state.assets.get(id))
            .filter(|row| row.published)
            .map(|row| row.asset.clone()))
    }

    async fn reserve_slug(&self, slug: &str, owner_key: &str) -> RepositoryResult<Reservation> {
        let mut state = self.state.write().await;

        if let Some(id) = state.slugs.get(slug).copied() {
            return Ok(match state.assets.get(&id) {
                Some(row) if row.owner_key == owner_key && row.published => Reservation::Published(id),
                Some(row) if row.owner_key == owner_key => Reservation::Resumed(id),
                _ => Reservation::Taken,
            });
        }

        let id = Uuid::new_v4();
        let row = AssetRow {
            owner_key: owner_key.to_string(),
            published: false,
            asset: MediaAsset {
                id,
                slug: slug.to_string(),
                binary_ref: String::new(),
                title: String::new(),
                caption: String::new(),
                is_public: false,
                checksum: String::new(),
                site_ids: Vec::new(),
                gallery_ids: Vec::new(),
                created_at: Utc::now(),
            },
        };
        state.slugs.insert(slug.to_string(), id);
        state.assets.insert(id, row);
        Ok(Reservation::Acquired(id))
    }

    async fn release_slug(&self, slug: &str, owner_key: &str) -> RepositoryResult<bool> {
        let mut state = self.state.write().await;

        let Some(id) = state.slugs.get(slug).copied() else {
            return Ok(false);
        };
        let releasable = state
            .assets
            .get(&id)
            .is_some_and(|row| !row.published && row.owner_key == owner_key);

        if releasable {
            state.slugs.remove(slug);
            state.assets.remove(&id);
        }
        Ok(releasable)
    }

    async fn publish_asset(&self, publish: PublishAsset) -> RepositoryResult<MediaAsset> {
        let mut state = self.state.write().await;

        if !state.sites.contains_key(&publish.site_id) {
            return Err(RepositoryError::NotFound(format!("site {}", publish.site_id)));
        }
        if !state.galleries.contains_key(&publish.gallery_id) {
            return Err(RepositoryError::NotFound(format!("gallery {}", publish.gallery_id)));
        }

        let row = state
            .assets
            .get_mut(&publish.asset_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("asset {}", publish.asset_id)))?;

        if row.owner_key != publish.owner_key {
            return Err(RepositoryError::Conflict(format!(
                "asset {} is reserved by another item",
                publish.asset_id
            )));
        }

        row.published = true;
        row.asset.binary_ref = publish.binary_ref;
        row.asset.title = publish.title;
        row.asset.caption = publish.caption;
        row.asset.is_public = publish.is_public;
        row.asset.checksum = publish.checksum;
        add_unique(&mut row.asset.site_ids, publish.site_id);
        add_unique(&mut row.asset.gallery_ids, publish.gallery_id);

        Ok(row.asset.clone())
    }
}

#[async_trait]
impl SiteRepository for MemoryCatalog {
    async fn find_site(&self, id: SiteId) -> RepositoryResult<Option<Site>> {
        Ok(self.state.read().await.sites.get(&id).cloned())
    }

    async fn create_site(&self, name: &str, domain: &str) -> RepositoryResult<Site> {
        let mut state = self.state.write().await;

        if state.sites.values().any(|s| s.domain == domain) {
            return Err(RepositoryError::Conflict(format!("site domain '{}' already exists", domain)));
        }

        state.next_site_id += 1;
        let site = Site {
            id: state.next_site_id,
            name: name.to_string(),
            domain: domain.to_string(),
        };
        state.sites.insert(site.id, site.clone());
        Ok(site)
    }

    async fn set_gallery_sites(
        &self,
        site_id: SiteId,
        gallery_ids: &[GalleryId],
        member: bool,
    ) -> RepositoryResult<u64> {
        let mut state = self.state.write().await;
        if !state.sites.contains_key(&site_id) {
            return Err(RepositoryError::NotFound(format!("site {}", site_id)));
        }

        let mut changed = 0;
        for id in gallery_ids {
            if let Some(gallery) = state.galleries.get_mut(id) {
                let touched = if member {
                    add_unique(&mut gallery.site_ids, site_id)
                } else {
                    remove_value(&mut gallery.site_ids, &site_id)
                };
                changed += u64::from(touched);
            }
        }
        Ok(changed)
    }

    async fn set_asset_sites(
        &self,
        site_id: SiteId,
        asset_ids: &[AssetId],
        member: bool,
    ) -> RepositoryResult<u64> {
        let mut state = self.state.write().await;
        if !state.sites.contains_key(&site_id) {
            return Err(RepositoryError::NotFound(format!("site {}", site_id)));
        }

        let mut changed = 0;
        for id in asset_ids {
            if let Some(row) = state.assets.get_mut(id).filter(|r| r.published) {
                let touched = if member {
                    add_unique(&mut row.asset.site_ids, site_id)
                } else {
                    remove_value(&mut row.asset.site_ids, &site_id)
                };
                changed += u64::from(touched);
            }
        }
        Ok(changed)
    }

    async fn assets_in_galleries(&self, gallery_ids: &[GalleryId]) -> RepositoryResult<Vec<AssetId>> {
        let state = self.state.read().await;
        let ids: BTreeSet<AssetId> = state
            .published()
            .filter(|a| a.gallery_ids.iter().any(|g| gallery_ids.contains(g)))
            .map(|a| a.id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn orphaned_assets(&self, gallery_id: GalleryId) -> RepositoryResult<Vec<MediaAsset>> {
        let state = self.state.read().await;
        let gallery = state
            .galleries
            .get(&gallery_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("gallery {}", gallery_id)))?;

        let mut orphans: Vec<MediaAsset> = state
            .published()
            .filter(|a| a.gallery_ids.contains(&gallery_id))
            .filter(|a| !a.site_ids.iter().any(|s| gallery.site_ids.contains(s)))
            .cloned()
            .collect();
        orphans.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(orphans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn catalog_with_gallery() -> (MemoryCatalog, Site, Gallery) {
        let catalog = MemoryCatalog::new();
        let site = catalog.create_site("Main", "example.com").await.unwrap();
        let gallery = catalog
            .create_gallery(NewGallery {
                title: "Summer".into(),
                slug: "summer".into(),
                is_public: true,
                site_ids: vec![site.id],
            })
            .await
            .unwrap();
        (catalog, site, gallery)
    }

    fn publish(id: AssetId, owner: &str, site: SiteId, gallery: GalleryId) -> PublishAsset {
        PublishAsset {
            asset_id: id,
            owner_key: owner.into(),
            binary_ref: "photos/summer-0/a.png".into(),
            title: "Summer 0".into(),
            caption: String::new(),
            is_public: true,
            checksum: "abc".into(),
            site_id: site,
            gallery_id: gallery,
        }
    }

    #[tokio::test]
    async fn test_reservation_lifecycle() {
        let (catalog, site, gallery) = catalog_with_gallery().await;

        let Reservation::Acquired(id) = catalog.reserve_slug("summer-0", "k1").await.unwrap() else {
            panic!("expected a fresh reservation");
        };
        assert_eq!(catalog.reserve_slug("summer-0", "k1").await.unwrap(), Reservation::Resumed(id));
        assert_eq!(catalog.reserve_slug("summer-0", "k2").await.unwrap(), Reservation::Taken);

        // pending rows are invisible
        assert!(catalog.find_asset_by_slug("summer-0").await.unwrap().is_none());

        let asset = catalog.publish_asset(publish(id, "k1", site.id, gallery.id)).await.unwrap();
        assert_eq!(asset.site_ids, vec![site.id]);
        assert_eq!(asset.gallery_ids, vec![gallery.id]);

        assert_eq!(catalog.reserve_slug("summer-0", "k1").await.unwrap(), Reservation::Published(id));
        assert_eq!(catalog.reserve_slug("summer-0", "k2").await.unwrap(), Reservation::Taken);
        assert!(!catalog.release_slug("summer-0", "k1").await.unwrap());
        assert!(catalog.find_asset_by_slug("summer-0").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_release_only_own_pending() {
        let (catalog, _, _) = catalog_with_gallery().await;
        catalog.reserve_slug("s", "owner").await.unwrap();

        assert!(!catalog.release_slug("s", "intruder").await.unwrap());
        assert!(catalog.release_slug("s", "owner").await.unwrap());
        assert_eq!(catalog.reserved_slug_count().await, 0);
        assert!(matches!(
            catalog.reserve_slug("s", "intruder").await.unwrap(),
            Reservation::Acquired(_)
        ));
    }

    #[tokio::test]
    async fn test_publish_requires_parents() {
        let (catalog, site, _) = catalog_with_gallery().await;
        let Reservation::Acquired(id) = catalog.reserve_slug("x", "k").await.unwrap() else {
            panic!("expected a fresh reservation");
        };

        let err = catalog.publish_asset(publish(id, "k", site.id, 999)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
        assert!(catalog.find_asset_by_slug("x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_orphaned_assets() {
        let (catalog, site, gallery) = catalog_with_gallery().await;
        let other = catalog.create_site("Other", "other.example.com").await.unwrap();

        let Reservation::Acquired(id) = catalog.reserve_slug("a", "k").await.unwrap() else {
            panic!("expected a fresh reservation");
        };
        catalog.publish_asset(publish(id, "k", site.id, gallery.id)).await.unwrap();
        assert!(catalog.orphaned_assets(gallery.id).await.unwrap().is_empty());

        catalog.set_asset_sites(other.id, &[id], true).await.unwrap();
        catalog.set_asset_sites(site.id, &[id], false).await.unwrap();
        let orphans = catalog.orphaned_assets(gallery.id).await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].id, id);
    }
}
