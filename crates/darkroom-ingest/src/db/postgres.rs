use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use uuid::Uuid;

use super::{
    AssetId, AssetRepository, Gallery, GalleryId, GalleryRepository, MediaAsset, NewGallery,
    PublishAsset, RepositoryError, RepositoryResult, Reservation, Site, SiteId, SiteRepository,
};
use crate::config::DatabaseConfig;

/// Create the connection pool
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(&config.url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

/// Apply the workspace migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

const GALLERY_SELECT: &str = r#"
    SELECT g.id, g.title, g.slug, g.is_public,
           COALESCE(
               array_agg(gs.site_id ORDER BY gs.site_id) FILTER (WHERE gs.site_id IS NOT NULL),
               '{}'
           ) AS site_ids
    FROM galleries g
    LEFT JOIN gallery_sites gs ON gs.gallery_id = g.id
"#;

const ASSET_SELECT: &str = r#"
    SELECT a.id, a.slug, a.binary_ref, a.title, a.caption, a.is_public, a.checksum, a.created_at,
           COALESCE(
               (SELECT array_agg(s.site_id ORDER BY s.site_id) FROM asset_sites s WHERE s.asset_id = a.id),
               '{}'
           ) AS site_ids,
           COALESCE(
               (SELECT array_agg(ga.gallery_id ORDER BY ga.gallery_id) FROM gallery_assets ga WHERE ga.asset_id = a.id),
               '{}'
           ) AS gallery_ids
    FROM media_assets a
"#;

#[derive(sqlx::FromRow)]
struct GalleryRow {
    id: i64,
    title: String,
    slug: String,
    is_public: bool,
    site_ids: Vec<i64>,
}

impl From<GalleryRow> for Gallery {
    fn from(row: GalleryRow) -> Self {
        Gallery {
            id: row.id,
            title: row.title,
            slug: row.slug,
            is_public: row.is_public,
            site_ids: row.site_ids,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AssetRow {
    id: Uuid,
    slug: String,
    binary_ref: String,
    title: String,
    caption: String,
    is_public: bool,
    checksum: String,
    created_at: DateTime<Utc>,
    site_ids: Vec<i64>,
    gallery_ids: Vec<i64>,
}

impl From<AssetRow> for MediaAsset {
    fn from(row: AssetRow) -> Self {
        MediaAsset {
            id: row.id,
            slug: row.slug,
            binary_ref: row.binary_ref,
            title: row.title,
            caption: row.caption,
            is_public: row.is_public,
            checksum: row.checksum,
            site_ids: row.site_ids,
            gallery_ids: row.gallery_ids,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SlugHolder {
    id: Uuid,
    owner_key: String,
    published: bool,
}

fn conflict_or_db(err: sqlx::Error, what: impl FnOnce() -> String) -> RepositoryError {
    match err.as_database_error() {
        Some(db) if db.is_unique_violation() => RepositoryError::Conflict(what()),
        _ => RepositoryError::Database(err),
    }
}

/// Postgres-backed catalog
#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn asset_by_id(&self, id: AssetId) -> RepositoryResult<MediaAsset> {
        let sql = format!("{ASSET_SELECT} WHERE a.id = $1");
        sqlx::query_as::<_, AssetRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(MediaAsset::from)
            .ok_or_else(|| RepositoryError::NotFound(format!("asset {}", id)))
    }

    async fn require_site(&self, site_id: SiteId) -> RepositoryResult<()> {
        if self.find_site(site_id).await?.is_none() {
            return Err(RepositoryError::NotFound(format!("site {}", site_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl GalleryRepository for PgCatalog {
    async fn find_gallery(&self, id: GalleryId) -> RepositoryResult<Option<Gallery>> {
        let sql = format!("{GALLERY_SELECT} WHERE g.id = $1 GROUP BY g.id");
        let row = sqlx::query_as::<_, GalleryRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Gallery::from))
    }

    async fn create_gallery(&self, new: NewGallery) -> RepositoryResult<Gallery> {
        let mut tx = self.pool.begin().await?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO galleries (title, slug, is_public) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(&new.title)
        .bind(&new.slug)
        .bind(new.is_public)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| conflict_or_db(e, || format!("gallery slug '{}' already exists", new.slug)))?;

        for site_id in &new.site_ids {
            sqlx::query(
                "INSERT INTO gallery_sites (gallery_id, site_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(id)
            .bind(site_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.find_gallery(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("gallery {}", id)))
    }
}

#[async_trait]
impl AssetRepository for PgCatalog {
    async fn find_asset_by_slug(&self, slug: &str) -> RepositoryResult<Option<MediaAsset>> {
        let sql = format!("{ASSET_SELECT} WHERE a.slug = $1 AND a.published");
        let row = sqlx::query_as::<_, AssetRow>(&sql)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(MediaAsset::from))
    }

    async fn reserve_slug(&self, slug: &str, owner_key: &str) -> RepositoryResult<Reservation> {
        // A holder can release between our insert and our lookup; try again then.
        for _ in 0..3 {
            let inserted: Option<Uuid> = sqlx::query_scalar(
                r#"
                INSERT INTO media_assets (id, slug, owner_key)
                VALUES ($1, $2, $3)
                ON CONFLICT (slug) DO NOTHING
                RETURNING id
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(slug)
            .bind(owner_key)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(id) = inserted {
                return Ok(Reservation::Acquired(id));
            }

            let holder: Option<SlugHolder> = sqlx::query_as(
                "SELECT id, owner_key, published FROM media_assets WHERE slug = $1",
            )
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;

            match holder {
                Some(h) if h.owner_key == owner_key && h.published => {
                    return Ok(Reservation::Published(h.id))
                },
                Some(h) if h.owner_key == owner_key => return Ok(Reservation::Resumed(h.id)),
                Some(_) => return Ok(Reservation::Taken),
                None => continue,
            }
        }

        Ok(Reservation::Taken)
    }

    async fn release_slug(&self, slug: &str, owner_key: &str) -> RepositoryResult<bool> {
        let result = sqlx::query(
            "DELETE FROM media_assets WHERE slug = $1 AND owner_key = $2 AND NOT published",
        )
        .bind(slug)
        .bind(owner_key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn publish_asset(&self, publish: PublishAsset) -> RepositoryResult<MediaAsset> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE media_assets
            SET published = TRUE,
                binary_ref = $3,
                title = $4,
                caption = $5,
                is_public = $6,
                checksum = $7,
                published_at = COALESCE(published_at, NOW())
            WHERE id = $1 AND owner_key = $2
            "#,
        )
        .bind(publish.asset_id)
        .bind(&publish.owner_key)
        .bind(&publish.binary_ref)
        .bind(&publish.title)
        .bind(&publish.caption)
        .bind(publish.is_public)
        .bind(&publish.checksum)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!(
                "reservation {} for {}",
                publish.asset_id, publish.owner_key
            )));
        }

        sqlx::query(
            "INSERT INTO asset_sites (asset_id, site_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(publish.asset_id)
        .bind(publish.site_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO gallery_assets (gallery_id, asset_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(publish.gallery_id)
        .bind(publish.asset_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.asset_by_id(publish.asset_id).await
    }
}

#[async_trait]
impl SiteRepository for PgCatalog {
    async fn find_site(&self, id: SiteId) -> RepositoryResult<Option<Site>> {
        let row: Option<(i64, String, String)> =
            sqlx::query_as("SELECT id, name, domain FROM sites WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(id, name, domain)| Site { id, name, domain }))
    }

    async fn create_site(&self, name: &str, domain: &str) -> RepositoryResult<Site> {
        let id: i64 = sqlx::query_scalar("INSERT INTO sites (name, domain) VALUES ($1, $2) RETURNING id")
            .bind(name)
            .bind(domain)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| conflict_or_db(e, || format!("site domain '{}' already exists", domain)))?;

        Ok(Site {
            id,
            name: name.to_string(),
            domain: domain.to_string(),
        })
    }

    async fn set_gallery_sites(
        &self,
        site_id: SiteId,
        gallery_ids: &[GalleryId],
        member: bool,
    ) -> RepositoryResult<u64> {
        self.require_site(site_id).await?;

        let result = if member {
            sqlx::query(
                r#"
                INSERT INTO gallery_sites (gallery_id, site_id)
                SELECT g.id, $1 FROM galleries g WHERE g.id = ANY($2)
                ON CONFLICT DO NOTHING
                "#,
            )
        } else {
            sqlx::query("DELETE FROM gallery_sites WHERE site_id = $1 AND gallery_id = ANY($2)")
        }
        .bind(site_id)
        .bind(gallery_ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn set_asset_sites(
        &self,
        site_id: SiteId,
        asset_ids: &[AssetId],
        member: bool,
    ) -> RepositoryResult<u64> {
        self.require_site(site_id).await?;

        let result = if member {
            sqlx::query(
                r#"
                INSERT INTO asset_sites (asset_id, site_id)
                SELECT a.id, $1 FROM media_assets a WHERE a.id = ANY($2) AND a.published
                ON CONFLICT DO NOTHING
                "#,
            )
        } else {
            sqlx::query("DELETE FROM asset_sites WHERE site_id = $1 AND asset_id = ANY($2)")
        }
        .bind(site_id)
        .bind(asset_ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn assets_in_galleries(&self, gallery_ids: &[GalleryId]) -> RepositoryResult<Vec<AssetId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT ga.asset_id
            FROM gallery_assets ga
            JOIN media_assets a ON a.id = ga.asset_id
            WHERE a.published AND ga.gallery_id = ANY($1)
            ORDER BY ga.asset_id
            "#,
        )
        .bind(gallery_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn orphaned_assets(&self, gallery_id: GalleryId) -> RepositoryResult<Vec<MediaAsset>> {
        if self.find_gallery(gallery_id).await?.is_none() {
            return Err(RepositoryError::NotFound(format!("gallery {}", gallery_id)));
        }

        let sql = format!(
            r#"{ASSET_SELECT}
            JOIN gallery_assets member ON member.asset_id = a.id AND member.gallery_id = $1
            WHERE a.published
              AND NOT EXISTS (
                  SELECT 1
                  FROM asset_sites s
                  JOIN gallery_sites gs ON gs.site_id = s.site_id AND gs.gallery_id = $1
                  WHERE s.asset_id = a.id
              )
            ORDER BY a.title"#
        );

        let rows = sqlx::query_as::<_, AssetRow>(&sql)
            .bind(gallery_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(MediaAsset::from).collect())
    }
}
