use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite};

use shopkeep_core::domain::product::{Product, ProductId, ProductQuery};
use shopkeep_core::store::{ProductSearch, StoreError};

use super::{price_from_db, price_to_db, quantity_from_db, RepositoryError};
use crate::DbPool;

pub struct SqlProductRepository {
    pool: DbPool,
}

impl SqlProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query(
            "SELECT product_id, name, category, material, price, stock_quantity, description
             FROM products WHERE product_id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_product).transpose()
    }

    pub async fn save(&self, product: &Product) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO products
                 (product_id, name, category, material, price, stock_quantity, description)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(product_id) DO UPDATE SET
                 name = excluded.name,
                 category = excluded.category,
                 material = excluded.material,
                 price = excluded.price,
                 stock_quantity = excluded.stock_quantity,
                 description = excluded.description",
        )
        .bind(product.id.0)
        .bind(&product.name)
        .bind(&product.category)
        .bind(&product.material)
        .bind(price_to_db(product.price)?)
        .bind(i64::from(product.stock_quantity))
        .bind(&product.description)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn count(&self) -> Result<i64, RepositoryError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM products").fetch_one(&self.pool).await?)
    }

    /// Structured filters run in SQL; the free-text match runs in Rust so that
    /// case folding covers Vietnamese letters, which SQLite `LOWER` does not.
    pub async fn search_products(
        &self,
        query: &ProductQuery,
    ) -> Result<Vec<Product>, RepositoryError> {
        let text_filter =
            query.query.as_deref().map(str::trim).filter(|text| !text.is_empty()).is_some();

        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "SELECT product_id, name, category, material, price, stock_quantity, description
             FROM products WHERE 1 = 1",
        );
        if let Some(category) = &query.category {
            builder.push(" AND category = ").push_bind(category.clone());
        }
        if let Some(material) = &query.material {
            builder.push(" AND material = ").push_bind(material.clone());
        }
        if let Some(min_price) = query.min_price {
            builder.push(" AND price >= ").push_bind(price_to_db(min_price)?);
        }
        if let Some(max_price) = query.max_price {
            builder.push(" AND price <= ").push_bind(price_to_db(max_price)?);
        }
        if let Some(min_stock) = query.min_stock {
            builder.push(" AND stock_quantity >= ").push_bind(i64::from(min_stock));
        }
        match query.sort_by_price {
            Some(sort) => {
                builder.push(" ORDER BY price ").push(sort.as_sql()).push(", product_id ASC");
            }
            None => {
                builder.push(" ORDER BY product_id ASC");
            }
        }
        if !text_filter {
            builder.push(" LIMIT ").push_bind(i64::from(query.limit));
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        let mut products = Vec::with_capacity(rows.len());
        for row in &rows {
            let product = row_to_product(row)?;
            if query.matches(&product) {
                products.push(product);
            }
            if products.len() >= query.limit as usize {
                break;
            }
        }

        Ok(products)
    }
}

#[async_trait]
impl ProductSearch for SqlProductRepository {
    async fn search(&self, query: &ProductQuery) -> Result<Vec<Product>, StoreError> {
        self.search_products(query).await.map_err(StoreError::from)
    }
}

pub(crate) fn row_to_product(row: &sqlx::sqlite::SqliteRow) -> Result<Product, RepositoryError> {
    let decode = |error: sqlx::Error| RepositoryError::Decode(error.to_string());
    let stock: i64 = row.try_get("stock_quantity").map_err(decode)?;

    Ok(Product {
        id: ProductId(row.try_get("product_id").map_err(decode)?),
        name: row.try_get("name").map_err(decode)?,
        category: row.try_get("category").map_err(decode)?,
        material: row.try_get("material").map_err(decode)?,
        price: price_from_db(row.try_get("price").map_err(decode)?),
        stock_quantity: quantity_from_db("stock_quantity", stock)?,
        description: row.try_get("description").map_err(decode)?,
    })
}
