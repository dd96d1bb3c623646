use async_trait::async_trait;
use rusqlite::params;
use storefront_types::alert::{AlertStatus, NewProductAlert, ProductAlert, ProductAlertRepository};
use storefront_types::product::Product;
use storefront_types::user::Customer;
use tokio_rusqlite::Connection;
use typesafe_repository::IdentityOf;

pub struct SqliteProductAlertRepository {
    conn: Connection,
}

impl SqliteProductAlertRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS product_alert (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    product_id INTEGER NOT NULL,
                    user_id INTEGER,
                    email TEXT,
                    status TEXT NOT NULL DEFAULT 'active',
                    created_at INTEGER NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS product_alert_user_idx ON product_alert(user_id, product_id)",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl ProductAlertRepository for SqliteProductAlertRepository {
    async fn add(&self, alert: NewProductAlert) -> anyhow::Result<ProductAlert> {
        Ok(self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO product_alert (product_id, user_id, email, status, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        alert.product_id,
                        alert.user_id,
                        alert.email,
                        alert.status.as_str(),
                        alert.created_at
                    ],
                )?;
                Ok(ProductAlert {
                    id: conn.last_insert_rowid(),
                    product_id: alert.product_id,
                    user_id: alert.user_id,
                    email: alert.email,
                    status: alert.status,
                    created_at: alert.created_at,
                })
            })
            .await?)
    }

    async fn exists(
        &self,
        product_id: IdentityOf<Product>,
        user_id: IdentityOf<Customer>,
        status: AlertStatus,
    ) -> anyhow::Result<bool> {
        let status = status.as_str();
        Ok(self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM product_alert WHERE product_id = ?1 AND user_id = ?2 AND status = ?3",
                    params![product_id, user_id, status],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await?)
    }
}
