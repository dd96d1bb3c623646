use actix::prelude::*;
use actix_broker::BrokerSubscribe;
use async_trait::async_trait;
use log_error::LogError;
use rusqlite::params;
use storefront_types::product::Product;
use storefront_types::signal::{ProductViewed, ViewHistory};
use storefront_types::user::Customer;
use time::OffsetDateTime;
use tokio_rusqlite::Connection;
use typesafe_repository::IdentityOf;

#[cfg(test)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewStats {
    pub views: u64,
    pub last_viewed: i64,
}

/// View counters per product and view history per customer.
#[derive(Clone)]
pub struct SqliteViewStore {
    conn: Connection,
}

impl SqliteViewStore {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS product_view (
                    product_id INTEGER PRIMARY KEY,
                    views INTEGER NOT NULL DEFAULT 0,
                    last_viewed INTEGER NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS user_product_view (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    product_id INTEGER NOT NULL,
                    viewed_at INTEGER NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS user_product_view_user_idx ON user_product_view(user_id, viewed_at)",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    pub async fn record(&self, product_id: IdentityOf<Product>, at: i64) -> anyhow::Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO product_view (product_id, views, last_viewed) VALUES (?1, 1, ?2)
                     ON CONFLICT(product_id) DO UPDATE SET views = views + 1, last_viewed = ?2",
                    params![product_id, at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn record_for_user(
        &self,
        user_id: IdentityOf<Customer>,
        product_id: IdentityOf<Product>,
        at: i64,
    ) -> anyhow::Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO user_product_view (user_id, product_id, viewed_at) VALUES (?1, ?2, ?3)",
                    params![user_id, product_id, at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn stats(&self, product_id: IdentityOf<Product>) -> anyhow::Result<Option<ViewStats>> {
        use rusqlite::OptionalExtension;
        Ok(self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT views, last_viewed FROM product_view WHERE product_id = ?1",
                        [product_id],
                        |row| {
                            Ok(ViewStats {
                                views: row.get(0)?,
                                last_viewed: row.get(1)?,
                            })
                        },
                    )
                    .optional()?)
            })
            .await?)
    }
}

#[async_trait]
impl ViewHistory for SqliteViewStore {
    async fn recently_viewed(
        &self,
        user_id: IdentityOf<Customer>,
        limit: usize,
    ) -> anyhow::Result<Vec<IdentityOf<Product>>> {
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT product_id FROM user_product_view WHERE user_id = ?1
                     GROUP BY product_id ORDER BY MAX(viewed_at) DESC, MAX(id) DESC LIMIT ?2",
                )?;
                let ids = stmt
                    .query_map(params![user_id, limit as i64], |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ids)
            })
            .await?)
    }
}

/// Listens for product views on the system broker and records them.
pub struct ProductViewTracker {
    store: SqliteViewStore,
}

impl ProductViewTracker {
    pub fn new(store: SqliteViewStore) -> Self {
        Self { store }
    }
}

impl Actor for ProductViewTracker {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Context<Self>) {
        log::info!("Product view tracker started");
        self.subscribe_system_async::<ProductViewed>(ctx);
    }
}

impl Handler<ProductViewed> for ProductViewTracker {
    type Result = ResponseActFuture<Self, ()>;

    fn handle(&mut self, msg: ProductViewed, _ctx: &mut Self::Context) -> Self::Result {
        let store = self.store.clone();
        let fut = async move {
            if msg.status != 200 {
                return;
            }
            let now = OffsetDateTime::now_utc().unix_timestamp();
            store
                .record(msg.product_id, now)
                .await
                .log_error("Unable to record product view");
            if let Some(user) = msg.user {
                store
                    .record_for_user(user.id, msg.product_id, now)
                    .await
                    .log_error("Unable to record user product view");
            }
        };
        Box::pin(fut.into_actor(self))
    }
}
