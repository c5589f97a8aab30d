//! Catalog and task-state store against a live Postgres
//!
//! Needs `DATABASE_URL`; run with `cargo test -- --ignored`.

mod helpers;

use anyhow::Result;
use darkroom_ingest::config::DatabaseConfig;
use darkroom_ingest::db::postgres::{create_pool, run_migrations};
use darkroom_ingest::db::{
    AssetRepository, GalleryRepository, NewGallery, PgCatalog, PublishAsset, Reservation,
    SiteRepository,
};
use darkroom_ingest::ingest::framework::{
    BatchRequest, PgTaskStateStore, SkipReason, TaskState, TaskStateStore,
};
use darkroom_ingest::ingest::{Pipeline, PipelineDeps};
use darkroom_ingest::storage::MemoryStorage;
use helpers::{entries, init_tracing, test_config, wait_complete};
use std::sync::Arc;
use uuid::Uuid;

async fn connect() -> Result<PgCatalog> {
    let pool = create_pool(&DatabaseConfig::from_env()).await?;
    run_migrations(&pool).await?;
    Ok(PgCatalog::new(pool))
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_pg_reservation_ownership() -> Result<()> {
    init_tracing();
    let catalog = connect().await?;
    let slug = format!("pg-{}", Uuid::new_v4().simple());

    let Reservation::Acquired(id) = catalog.reserve_slug(&slug, "owner").await? else {
        panic!("slug should be free");
    };
    assert_eq!(catalog.reserve_slug(&slug, "owner").await?, Reservation::Resumed(id));
    assert_eq!(catalog.reserve_slug(&slug, "intruder").await?, Reservation::Taken);
    assert!(catalog.find_asset_by_slug(&slug).await?.is_none());

    assert!(!catalog.release_slug(&slug, "intruder").await?);
    assert!(catalog.release_slug(&slug, "owner").await?);
    assert!(matches!(
        catalog.reserve_slug(&slug, "intruder").await?,
        Reservation::Acquired(_)
    ));
    catalog.release_slug(&slug, "intruder").await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_pg_published_reservation_reports_the_asset() -> Result<()> {
    init_tracing();
    let catalog = connect().await?;
    let unique = Uuid::new_v4().simple().to_string();
    let site = catalog
        .create_site("Published", &format!("{}.example.com", unique))
        .await?;
    let gallery = catalog
        .create_gallery(NewGallery {
            title: "Published".into(),
            slug: format!("published-{}", unique),
            is_public: false,
            site_ids: vec![site.id],
        })
        .await?;

    let slug = format!("pg-{}", unique);
    let Reservation::Acquired(id) = catalog.reserve_slug(&slug, "owner").await? else {
        panic!("slug should be free");
    };
    catalog
        .publish_asset(PublishAsset {
            asset_id: id,
            owner_key: "owner".into(),
            binary_ref: format!("photos/{}/a.png", slug),
            title: "Published 0".into(),
            caption: String::new(),
            is_public: false,
            checksum: String::new(),
            site_id: site.id,
            gallery_id: gallery.id,
        })
        .await?;

    assert_eq!(catalog.reserve_slug(&slug, "owner").await?, Reservation::Published(id));
    assert_eq!(catalog.reserve_slug(&slug, "intruder").await?, Reservation::Taken);
    assert!(!catalog.release_slug(&slug, "owner").await?);
    Ok(())
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_pg_pipeline_end_to_end() -> Result<()> {
    init_tracing();
    let catalog = Arc::new(connect().await?);
    let store = Arc::new(PgTaskStateStore::new(catalog.pool().clone()));
    let storage = Arc::new(MemoryStorage::new());

    let unique = Uuid::new_v4().simple().to_string();
    let site = catalog
        .create_site("Postgres", &format!("{}.example.com", unique))
        .await?;
    let gallery = catalog
        .create_gallery(NewGallery {
            title: "Pg".into(),
            slug: format!("pg-{}", unique),
            is_public: true,
            site_ids: vec![site.id],
        })
        .await?;

    let pipeline = Pipeline::start(
        PipelineDeps {
            galleries: catalog.clone(),
            assets: catalog.clone(),
            storage,
            store: store.clone(),
            validator: None,
        },
        &test_config(),
    );

    let request = BatchRequest {
        gallery_id: gallery.id,
        site_id: site.id,
        title_template: format!("Pg {}", unique),
        caption: String::new(),
        is_public: true,
    };
    let first = pipeline
        .coordinator
        .submit(request.clone(), entries(&["a.png", "b.png", "c.png"]))
        .await?;
    let progress = wait_complete(&pipeline, &first).await;
    assert_eq!((progress.completed, progress.failed, progress.total), (3, 0, 3));

    // same template again: every slug is already published
    let second = pipeline.coordinator.submit(request, entries(&["a.png"])).await?;
    wait_complete(&pipeline, &second).await;
    assert_eq!(
        store.group_states(second.group_id).await?,
        vec![(0, TaskState::Skipped { reason: SkipReason::DuplicateSlug })]
    );

    let photos = catalog.assets_in_galleries(&[gallery.id]).await?;
    assert_eq!(photos.len(), 3);
    assert!(catalog.orphaned_assets(gallery.id).await?.is_empty());
    assert!(catalog.find_gallery(gallery.id).await?.is_some());

    pipeline.shutdown().await?;
    Ok(())
}
