//! Image Repository
//!
//! Postgres storage for source images and collections.

use async_trait::async_trait;
use canopy_core::domain::job::TargetScope;
use canopy_core::domain::unit::SourceImage;
use canopy_core::dto::image::{Collection, CreateCollection};
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use super::{ImageRepository, RepoResult, RepositoryError, dedup_images};

pub struct PgImageRepository {
    pool: PgPool,
}

impl PgImageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImageRepository for PgImageRepository {
    async fn register(&self, urls: Vec<String>) -> RepoResult<Vec<SourceImage>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut images = Vec::with_capacity(urls.len());

        for url in urls {
            let image = SourceImage {
                id: Uuid::new_v4(),
                url,
            };
            sqlx::query("INSERT INTO source_images (id, url, created_at) VALUES ($1, $2, $3)")
                .bind(image.id)
                .bind(&image.url)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            images.push(image);
        }

        tx.commit().await?;
        Ok(images)
    }

    async fn create_collection(&self, req: CreateCollection) -> RepoResult<Collection> {
        let id = Uuid::new_v4();
        let images: Vec<Uuid> = {
            let mut seen = std::collections::HashSet::new();
            req.images.into_iter().filter(|i| seen.insert(*i)).collect()
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO collections (id, name, created_at) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(&req.name)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        for (position, image_id) in images.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO collection_images (collection_id, image_id, position)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(id)
            .bind(image_id)
            .bind(position as i32)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::from_insert(e, format!("image {}", image_id)))?;
        }

        tx.commit().await?;

        Ok(Collection {
            id,
            name: req.name,
            images,
        })
    }

    async fn expand(&self, target: &TargetScope) -> RepoResult<Vec<SourceImage>> {
        let explicit = sqlx::query_as::<_, (Uuid, String)>(
            r#"
            SELECT i.id, i.url
            FROM UNNEST($1::UUID[]) WITH ORDINALITY AS t(id, ord)
            JOIN source_images i ON i.id = t.id
            ORDER BY t.ord
            "#,
        )
        .bind(&target.images)
        .fetch_all(&self.pool)
        .await?;

        let from_collections = sqlx::query_as::<_, (Uuid, String)>(
            r#"
            SELECT i.id, i.url
            FROM UNNEST($1::UUID[]) WITH ORDINALITY AS t(id, ord)
            JOIN collection_images ci ON ci.collection_id = t.id
            JOIN source_images i ON i.id = ci.image_id
            ORDER BY t.ord, ci.position
            "#,
        )
        .bind(&target.collections)
        .fetch_all(&self.pool)
        .await?;

        Ok(dedup_images(
            explicit
                .into_iter()
                .chain(from_collections)
                .map(|(id, url)| SourceImage { id, url }),
        ))
    }
}
