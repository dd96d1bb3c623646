use anyhow::Context;
use async_trait::async_trait;
use itertools::Itertools;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Params};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use storefront_types::product::{Browsable, Product, ProductClass, ProductRepository, Structure};
use tokio_rusqlite::Connection;
use typesafe_repository::async_ops::{Get, Save, Select};
use typesafe_repository::prelude::*;

pub struct SqliteProductRepository {
    conn: Connection,
}

impl SqliteProductRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS product_class (
                    id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL,
                    slug TEXT NOT NULL,
                    requires_shipping INTEGER NOT NULL DEFAULT 1
                )",
                [],
            )?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS product (
                    id INTEGER PRIMARY KEY,
                    upc TEXT NOT NULL DEFAULT '',
                    title TEXT NOT NULL DEFAULT '',
                    slug TEXT NOT NULL DEFAULT '',
                    description TEXT,
                    structure TEXT NOT NULL DEFAULT 'standalone',
                    parent_id INTEGER,
                    product_class_id INTEGER,
                    price TEXT
                )",
                [],
            )?;
            conn.execute(
                "CREATE UNIQUE INDEX IF NOT EXISTS product_upc_idx ON product(upc) WHERE upc != ''",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS product_parent_idx ON product(parent_id)",
                [],
            )?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS product_category (
                    product_id INTEGER NOT NULL,
                    category_id INTEGER NOT NULL,
                    PRIMARY KEY (product_id, category_id)
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS product_category_category_idx ON product_category(category_id)",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

const PRODUCT_COLUMNS: &str = "p.id, p.upc, p.title, p.slug, p.description, p.structure, p.price, \
     p.parent_id, pc.id, pc.name, pc.slug, pc.requires_shipping";

fn row_to_product(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Product, Option<i64>)> {
    let price = row
        .get::<_, Option<String>>(6)?
        .as_deref()
        .map(Decimal::from_str)
        .transpose()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, err.into()))?;
    let product_class = match row.get::<_, Option<i64>>(8)? {
        Some(id) => Some(ProductClass {
            id,
            name: row.get(9)?,
            slug: row.get(10)?,
            requires_shipping: row.get(11)?,
        }),
        None => None,
    };
    let product = Product {
        id: row.get(0)?,
        upc: row.get(1)?,
        title: row.get(2)?,
        slug: row.get(3)?,
        description: row.get(4)?,
        structure: Structure::from_str(&row.get::<_, String>(5)?),
        parent: None,
        product_class,
        price,
        categories: vec![],
    };
    Ok((product, row.get(7)?))
}

fn select_rows<P: Params>(
    conn: &rusqlite::Connection,
    filter: &str,
    params: P,
) -> rusqlite::Result<Vec<(Product, Option<i64>)>> {
    let sql = format!(
        "SELECT {PRODUCT_COLUMNS} FROM product p
         LEFT JOIN product_class pc ON pc.id = p.product_class_id {filter}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, row_to_product)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn placeholders(n: usize) -> String {
    itertools::repeat_n("?", n).join(", ")
}

/// Loads products with their parents and category ids attached.
fn load_products<P: Params>(
    conn: &rusqlite::Connection,
    filter: &str,
    params: P,
) -> rusqlite::Result<Vec<Product>> {
    let rows = select_rows(conn, filter, params)?;
    if rows.is_empty() {
        return Ok(vec![]);
    }

    let parent_ids = rows.iter().filter_map(|(_, p)| *p).unique().collect::<Vec<_>>();
    let mut parents: HashMap<i64, Product> = HashMap::new();
    if !parent_ids.is_empty() {
        let filter = format!("WHERE p.id IN ({})", placeholders(parent_ids.len()));
        for (parent, _) in select_rows(conn, &filter, params_from_iter(parent_ids.iter()))? {
            parents.insert(parent.id, parent);
        }
    }

    let ids = rows.iter().map(|(p, _)| p.id).collect::<Vec<_>>();
    let mut categories: HashMap<i64, Vec<i64>> = HashMap::new();
    let mut stmt = conn.prepare(&format!(
        "SELECT product_id, category_id FROM product_category
         WHERE product_id IN ({}) ORDER BY category_id",
        placeholders(ids.len())
    ))?;
    let links = stmt.query_map(params_from_iter(ids.iter()), |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
    })?;
    for link in links {
        let (product_id, category_id) = link?;
        categories.entry(product_id).or_default().push(category_id);
    }

    Ok(rows
        .into_iter()
        .map(|(mut product, parent_id)| {
            product.parent = parent_id
                .and_then(|id| parents.get(&id).cloned())
                .map(Box::new);
            product.categories = categories.remove(&product.id).unwrap_or_default();
            product
        })
        .collect())
}

fn browsable_filter(by: &Browsable) -> String {
    if by.categories.is_empty() {
        "WHERE p.structure != 'child'".to_string()
    } else {
        format!(
            "WHERE p.structure != 'child' AND p.id IN (
                SELECT product_id FROM product_category WHERE category_id IN ({}))",
            placeholders(by.categories.len())
        )
    }
}

impl Repository<Product> for SqliteProductRepository {
    type Error = anyhow::Error;
}

#[async_trait]
impl Get<Product> for SqliteProductRepository {
    async fn get_one(&self, id: &IdentityOf<Product>) -> Result<Option<Product>, Self::Error> {
        let id = *id;
        Ok(self
            .conn
            .call(move |conn| Ok(load_products(conn, "WHERE p.id = ?1", [id])?.into_iter().next()))
            .await?)
    }
}

#[async_trait]
impl Save<Product> for SqliteProductRepository {
    async fn save(&self, p: Product) -> Result<(), Self::Error> {
        p.validate()
            .with_context(|| format!("Product {} is invalid", p.id))?;
        let id = p.id;
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO product (id, upc, title, slug, description, structure, parent_id, product_class_id, price)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(id) DO UPDATE SET upc=?2, title=?3, slug=?4, description=?5,
                        structure=?6, parent_id=?7, product_class_id=?8, price=?9",
                    params![
                        p.id,
                        Product::normalize_upc(Some(&p.upc)),
                        p.title,
                        p.slug(),
                        p.description,
                        p.structure.as_str(),
                        p.parent_id(),
                        p.product_class.as_ref().map(|c| c.id),
                        p.price.map(|d| d.to_string()),
                    ],
                )?;
                tx.execute(
                    "DELETE FROM product_category WHERE product_id = ?1",
                    params![p.id],
                )?;
                for category_id in p.categories.iter().unique() {
                    tx.execute(
                        "INSERT INTO product_category (product_id, category_id) VALUES (?1, ?2)",
                        params![p.id, category_id],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .with_context(|| format!("Unable to save product {id}"))
    }
}

#[async_trait]
impl Select<Product, Browsable> for SqliteProductRepository {
    async fn select(&self, by: &Browsable) -> Result<Vec<Product>, Self::Error> {
        let filter = format!("{} ORDER BY p.id DESC", browsable_filter(by));
        let categories = by.categories.clone();
        Ok(self
            .conn
            .call(move |conn| Ok(load_products(conn, &filter, params_from_iter(categories))?))
            .await?)
    }
}

#[async_trait]
impl ProductRepository for SqliteProductRepository {
    async fn save_class(&self, class: ProductClass) -> Result<(), Self::Error> {
        Ok(self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO product_class (id, name, slug, requires_shipping) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET name=?2, slug=?3, requires_shipping=?4",
                    params![class.id, class.name, class.slug, class.requires_shipping],
                )?;
                Ok(())
            })
            .await?)
    }

    async fn count_by(&self, by: &Browsable) -> Result<usize, Self::Error> {
        let sql = format!("SELECT COUNT(*) FROM product p {}", browsable_filter(by));
        let categories = by.categories.clone();
        Ok(self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(&sql, params_from_iter(categories), |row| row.get(0))?;
                Ok(count as usize)
            })
            .await?)
    }

    async fn select_page(
        &self,
        by: &Browsable,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Product>, Self::Error> {
        let n = by.categories.len();
        let filter = format!(
            "{} ORDER BY p.id DESC LIMIT ?{} OFFSET ?{}",
            browsable_filter(by),
            n + 1,
            n + 2
        );
        let mut values = by.categories.clone();
        values.push(limit as i64);
        values.push(offset as i64);
        Ok(self
            .conn
            .call(move |conn| Ok(load_products(conn, &filter, params_from_iter(values))?))
            .await?)
    }

    async fn get_many(&self, ids: &[IdentityOf<Product>]) -> Result<Vec<Product>, Self::Error> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let ids = ids.to_vec();
        let filter = format!("WHERE p.id IN ({})", placeholders(ids.len()));
        let values = ids.clone();
        let mut found: HashMap<i64, Product> = self
            .conn
            .call(move |conn| Ok(load_products(conn, &filter, params_from_iter(values))?))
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();
        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }
}
