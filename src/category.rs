use async_trait::async_trait;
use rusqlite::{params, Params};
use storefront_types::category::{
    ancestors_in, descendants_in, ByParentId, BySlug, Category, CategoryRepository, Lineage,
    TopLevel,
};
use tokio_rusqlite::Connection;
use typesafe_repository::async_ops::{Get, List, Remove, Save, Select};
use typesafe_repository::prelude::*;

pub struct SqliteCategoryRepository {
    conn: Connection,
}

impl SqliteCategoryRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS category (
                    id INTEGER PRIMARY KEY,
                    parent_id INTEGER,
                    name TEXT NOT NULL,
                    slug TEXT NOT NULL,
                    description TEXT
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS category_slug_idx ON category(slug)",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS category_parent_idx ON category(parent_id)",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    async fn query<P>(&self, sql: &'static str, params: P) -> Result<Vec<Category>, anyhow::Error>
    where
        P: Params + Send + 'static,
    {
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(sql)?;
                let p = stmt
                    .query_map(params, row_to_category)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(p)
            })
            .await?)
    }
}

fn row_to_category(row: &rusqlite::Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        parent_id: row.get::<_, Option<IdentityOf<Category>>>(1)?,
        name: row.get(2)?,
        slug: row.get(3)?,
        description: row.get(4)?,
    })
}

impl Repository<Category> for SqliteCategoryRepository {
    type Error = anyhow::Error;
}

#[async_trait]
impl Select<Category, ByParentId> for SqliteCategoryRepository {
    async fn select(&self, ByParentId(id): &ByParentId) -> Result<Vec<Category>, Self::Error> {
        self.query(
            "SELECT id, parent_id, name, slug, description FROM category WHERE parent_id = ?1 ORDER BY name",
            [*id],
        )
        .await
    }
}

#[async_trait]
impl Select<Category, BySlug> for SqliteCategoryRepository {
    async fn select(&self, BySlug(slug): &BySlug) -> Result<Vec<Category>, Self::Error> {
        self.query(
            "SELECT id, parent_id, name, slug, description FROM category WHERE slug = ?1 ORDER BY id",
            [slug.clone()],
        )
        .await
    }
}

#[async_trait]
impl Select<Category, TopLevel> for SqliteCategoryRepository {
    async fn select(&self, _: &TopLevel) -> Result<Vec<Category>, Self::Error> {
        self.query(
            "SELECT id, parent_id, name, slug, description FROM category WHERE parent_id IS NULL ORDER BY name",
            [],
        )
        .await
    }
}

#[async_trait]
impl List<Category> for SqliteCategoryRepository {
    async fn list(&self) -> Result<Vec<Category>, Self::Error> {
        self.query(
            "SELECT id, parent_id, name, slug, description FROM category ORDER BY id",
            [],
        )
        .await
    }
}

#[async_trait]
impl Get<Category> for SqliteCategoryRepository {
    async fn get_one(&self, id: &IdentityOf<Category>) -> Result<Option<Category>, Self::Error> {
        Ok(self
            .query(
                "SELECT id, parent_id, name, slug, description FROM category WHERE id = ?1",
                [*id],
            )
            .await?
            .into_iter()
            .next())
    }
}

#[async_trait]
impl Save<Category> for SqliteCategoryRepository {
    async fn save(&self, c: Category) -> Result<(), Self::Error> {
        Ok(self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO category (id, parent_id, name, slug, description) VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(id) DO UPDATE SET parent_id=?2, name=?3, slug=?4, description=?5",
                    params![c.id, c.parent_id, c.name, c.slug, c.description],
                )?;
                Ok(())
            })
            .await?)
    }
}

#[async_trait]
impl Remove<Category> for SqliteCategoryRepository {
    async fn remove(&self, id: &IdentityOf<Category>) -> Result<(), Self::Error> {
        let id = *id;
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM category WHERE id = ?1", params![id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CategoryRepository for SqliteCategoryRepository {
    async fn ancestors(&self, id: &IdentityOf<Category>) -> Result<Lineage, Self::Error> {
        // UNION drops repeated rows, so a broken parent chain cannot loop forever
        let rows = self
            .query(
                "WITH RECURSIVE up(id, parent_id, name, slug, description) AS (
                    SELECT id, parent_id, name, slug, description FROM category WHERE id = ?1
                    UNION
                    SELECT c.id, c.parent_id, c.name, c.slug, c.description
                    FROM category c JOIN up ON c.id = up.parent_id
                )
                SELECT id, parent_id, name, slug, description FROM up",
                [*id],
            )
            .await?;
        Ok(match rows.iter().find(|c| &c.id == id) {
            Some(category) => ancestors_in(&rows, category),
            None => Lineage::default(),
        })
    }

    async fn descendants(&self, id: &IdentityOf<Category>) -> Result<Vec<Category>, Self::Error> {
        let rows = self
            .query(
                "WITH RECURSIVE down(id, parent_id, name, slug, description) AS (
                    SELECT id, parent_id, name, slug, description FROM category WHERE id = ?1
                    UNION
                    SELECT c.id, c.parent_id, c.name, c.slug, c.description
                    FROM category c JOIN down ON c.parent_id = down.id
                )
                SELECT id, parent_id, name, slug, description FROM down ORDER BY id",
                [*id],
            )
            .await?;
        Ok(match rows.iter().find(|c| &c.id == id) {
            Some(category) => descendants_in(&rows, category),
            None => vec![],
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use storefront_types::slugify;

    pub(crate) fn category(id: i64, name: &str, parent_id: Option<i64>) -> Category {
        Category {
            id,
            name: name.to_string(),
            slug: slugify(name),
            parent_id,
            description: None,
        }
    }

    pub(crate) async fn repo() -> SqliteCategoryRepository {
        let conn = Connection::open_in_memory().await.unwrap();
        let repo = SqliteCategoryRepository::init(conn).await.unwrap();
        for c in [
            category(1, "Books", None),
            category(2, "Fiction", Some(1)),
            category(3, "Sci-Fi", Some(2)),
            category(4, "Non-Fiction", Some(1)),
            category(5, "Clothing", None),
        ] {
            repo.save(c).await.unwrap();
        }
        repo
    }

    #[tokio::test]
    async fn ancestors_are_root_first() {
        let repo = repo().await;
        let lineage = repo.ancestors(&3).await.unwrap();
        assert_eq!(lineage.full_name(), "Books > Fiction > Sci-Fi");
        assert_eq!(lineage.category().map(|c| c.id), Some(3));
        assert!(repo.ancestors(&42).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn descendants_start_with_self() {
        let repo = repo().await;
        let ids = repo
            .descendants(&1)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2, 4, 3]);
        assert!(repo.descendants(&42).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn parent_cycles_terminate() {
        let repo = repo().await;
        repo.save(category(6, "Loop A", Some(7))).await.unwrap();
        repo.save(category(7, "Loop B", Some(6))).await.unwrap();
        let lineage = repo.ancestors(&6).await.unwrap();
        assert_eq!(lineage.iter().map(|c| c.id).collect::<Vec<_>>(), vec![7, 6]);
    }

    #[tokio::test]
    async fn selects_by_slug_and_parent() {
        let repo = repo().await;
        let found = repo.select(&BySlug("sci-fi".to_string())).await.unwrap();
        assert_eq!(found.iter().map(|c| c.id).collect::<Vec<_>>(), vec![3]);
        let children = repo.select(&ByParentId(1)).await.unwrap();
        assert_eq!(children.iter().map(|c| c.id).collect::<Vec<_>>(), vec![2, 4]);
        let top = repo.select(&TopLevel).await.unwrap();
        assert_eq!(top.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 5]);

        repo.remove(&5).await.unwrap();
        assert!(repo.get_one(&5).await.unwrap().is_none());
        assert_eq!(repo.list().await.unwrap().len(), 4);
    }
}
