use async_trait::async_trait;
use rusqlite::params;
use storefront_types::product::Product;
use storefront_types::review::{NewReview, ProductReview, ReviewRepository, ReviewStatus};
use tokio_rusqlite::Connection;
use typesafe_repository::IdentityOf;

pub struct SqliteReviewRepository {
    conn: Connection,
}

impl SqliteReviewRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS product_review (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    product_id INTEGER NOT NULL,
                    title TEXT NOT NULL,
                    body TEXT NOT NULL,
                    score INTEGER NOT NULL,
                    user_id INTEGER,
                    name TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'for_moderation',
                    created_at INTEGER NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS product_review_product_idx ON product_review(product_id, status)",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl ReviewRepository for SqliteReviewRepository {
    async fn add(&self, item: NewReview) -> anyhow::Result<ProductReview> {
        let item = NewReview {
            title: normalize_title(&item.title),
            body: normalize_body(&item.body),
            name: normalize_name(&item.name),
            score: clamp_score(item.score),
            ..item
        };
        Ok(self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO product_review (product_id, title, body, score, user_id, name, status, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        item.product_id,
                        item.title,
                        item.body,
                        item.score,
                        item.user_id,
                        item.name,
                        item.status.as_str(),
                        item.created_at
                    ],
                )?;
                let id = conn.last_insert_rowid();
                Ok(ProductReview {
                    id,
                    product_id: item.product_id,
                    title: item.title,
                    body: item.body,
                    score: item.score,
                    user_id: item.user_id,
                    name: item.name,
                    status: item.status,
                    created_at: item.created_at,
                })
            })
            .await?)
    }

    async fn list_for_product(
        &self,
        product_id: IdentityOf<Product>,
        status: ReviewStatus,
    ) -> anyhow::Result<Vec<ProductReview>> {
        let status_raw = status.as_str().to_string();
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, product_id, title, body, score, user_id, name, status, created_at
                     FROM product_review
                     WHERE product_id = ?1 AND status = ?2
                     ORDER BY created_at DESC, id DESC",
                )?;
                let items = stmt
                    .query_map(params![product_id, status_raw], |row| {
                        Ok(ProductReview {
                            id: row.get(0)?,
                            product_id: row.get(1)?,
                            title: row.get(2)?,
                            body: row.get(3)?,
                            score: row.get(4)?,
                            user_id: row.get(5)?,
                            name: row.get(6)?,
                            status: ReviewStatus::from_str(row.get::<_, String>(7)?.as_str()),
                            created_at: row.get(8)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?)
    }
}

fn truncate_chars(input: &str, max_len: usize) -> String {
    let trimmed = input.trim();
    match trimmed.char_indices().nth(max_len) {
        Some((end, _)) => trimmed[..end].to_string(),
        None => trimmed.to_string(),
    }
}

pub(crate) fn normalize_title(input: &str) -> String {
    truncate_chars(input, 255)
}

pub(crate) fn normalize_name(input: &str) -> String {
    truncate_chars(input, 255)
}

pub(crate) fn normalize_body(input: &str) -> String {
    truncate_chars(input, 2000)
}

pub(crate) fn clamp_score(value: i64) -> i64 {
    value.clamp(0, 5)
}
