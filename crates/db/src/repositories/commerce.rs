use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqliteConnection};
use tracing::info;

use shopkeep_core::domain::cart::{Cart, CartLine};
use shopkeep_core::domain::customer::{CustomerId, CustomerProfile};
use shopkeep_core::domain::order::{Order, OrderId, OrderLine, OrderStatus};
use shopkeep_core::domain::product::ProductId;
use shopkeep_core::store::{CancelledOrder, CommerceStore, StoreError};

use super::{
    parse_timestamp, price_from_db, price_to_db, quantity_from_db, timestamp, RepositoryError,
    SqlCustomerRepository,
};
use crate::DbPool;

/// Carts and orders backed by SQLite. Every mutating operation runs in one
/// transaction; dropping the transaction on an early return rolls it back.
pub struct SqlCommerceStore {
    pool: DbPool,
    customers: SqlCustomerRepository,
}

impl SqlCommerceStore {
    pub fn new(pool: DbPool) -> Self {
        Self { customers: SqlCustomerRepository::new(pool.clone()), pool }
    }
}

fn db_error(error: sqlx::Error) -> StoreError {
    RepositoryError::from(error).into()
}

fn decode_error(error: sqlx::Error) -> StoreError {
    RepositoryError::Decode(error.to_string()).into()
}

struct StockRow {
    name: String,
    price: i64,
    stock: u32,
}

async fn product_stock(
    conn: &mut SqliteConnection,
    product_id: ProductId,
) -> Result<StockRow, StoreError> {
    let row = sqlx::query("SELECT name, price, stock_quantity FROM products WHERE product_id = ?")
        .bind(product_id.0)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error)?
        .ok_or_else(|| StoreError::not_found("product", product_id))?;

    let stock: i64 = row.try_get("stock_quantity").map_err(decode_error)?;
    Ok(StockRow {
        name: row.try_get("name").map_err(decode_error)?,
        price: row.try_get("price").map_err(decode_error)?,
        stock: quantity_from_db("stock_quantity", stock).map_err(StoreError::from)?,
    })
}

async fn cart_lines(
    conn: &mut SqliteConnection,
    customer_id: &CustomerId,
) -> Result<Vec<CartLine>, StoreError> {
    let rows = sqlx::query(
        "SELECT ci.product_id, p.name, ci.quantity, ci.price_at_time
         FROM carts c
         JOIN cart_items ci ON ci.cart_id = c.cart_id
         JOIN products p ON p.product_id = ci.product_id
         WHERE c.customer_id = ?
         ORDER BY ci.rowid ASC",
    )
    .bind(&customer_id.0)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_error)?;

    rows.iter()
        .map(|row| {
            let quantity: i64 = row.try_get("quantity").map_err(decode_error)?;
            Ok(CartLine {
                product_id: ProductId(row.try_get("product_id").map_err(decode_error)?),
                name: row.try_get("name").map_err(decode_error)?,
                quantity: quantity_from_db("quantity", quantity)?,
                unit_price: price_from_db(row.try_get("price_at_time").map_err(decode_error)?),
            })
        })
        .collect()
}

async fn ensure_cart(
    conn: &mut SqliteConnection,
    customer_id: &CustomerId,
) -> Result<i64, StoreError> {
    let now = timestamp(Utc::now());
    sqlx::query_scalar(
        "INSERT INTO carts (customer_id, created_at, updated_at) VALUES (?, ?, ?)
         ON CONFLICT(customer_id) DO UPDATE SET updated_at = excluded.updated_at
         RETURNING cart_id",
    )
    .bind(&customer_id.0)
    .bind(&now)
    .bind(&now)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_error)
}

async fn delete_cart(
    conn: &mut SqliteConnection,
    customer_id: &CustomerId,
) -> Result<(), StoreError> {
    sqlx::query(
        "DELETE FROM cart_items WHERE cart_id IN (SELECT cart_id FROM carts WHERE customer_id = ?)",
    )
    .bind(&customer_id.0)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;
    sqlx::query("DELETE FROM carts WHERE customer_id = ?")
        .bind(&customer_id.0)
        .execute(&mut *conn)
        .await
        .map_err(db_error)?;
    Ok(())
}

async fn load_orders(
    conn: &mut SqliteConnection,
    customer_id: &CustomerId,
    order_id: Option<OrderId>,
) -> Result<Vec<Order>, StoreError> {
    let order_rows = sqlx::query(
        "SELECT order_id, customer_id, order_date, status, total_amount
         FROM orders
         WHERE customer_id = ?1 AND (?2 IS NULL OR order_id = ?2)
         ORDER BY order_date DESC, order_id DESC",
    )
    .bind(&customer_id.0)
    .bind(order_id.map(|id| id.0))
    .fetch_all(&mut *conn)
    .await
    .map_err(db_error)?;

    let line_rows = sqlx::query(
        "SELECT oi.order_id, oi.product_id, p.name, oi.quantity, oi.price_at_time
         FROM order_items oi
         JOIN orders o ON o.order_id = oi.order_id
         JOIN products p ON p.product_id = oi.product_id
         WHERE o.customer_id = ?1 AND (?2 IS NULL OR o.order_id = ?2)
         ORDER BY oi.order_id ASC, oi.rowid ASC",
    )
    .bind(&customer_id.0)
    .bind(order_id.map(|id| id.0))
    .fetch_all(&mut *conn)
    .await
    .map_err(db_error)?;

    let mut lines_by_order: BTreeMap<i64, Vec<OrderLine>> = BTreeMap::new();
    for row in &line_rows {
        let quantity: i64 = row.try_get("quantity").map_err(decode_error)?;
        let line = OrderLine {
            product_id: ProductId(row.try_get("product_id").map_err(decode_error)?),
            product_name: row.try_get("name").map_err(decode_error)?,
            quantity: quantity_from_db("quantity", quantity)?,
            unit_price: price_from_db(row.try_get("price_at_time").map_err(decode_error)?),
        };
        let owner: i64 = row.try_get("order_id").map_err(decode_error)?;
        lines_by_order.entry(owner).or_default().push(line);
    }

    order_rows
        .iter()
        .map(|row| {
            let id: i64 = row.try_get("order_id").map_err(decode_error)?;
            let status: String = row.try_get("status").map_err(decode_error)?;
            let placed_at: String = row.try_get("order_date").map_err(decode_error)?;
            Ok(Order {
                id: OrderId(id),
                customer_id: CustomerId(row.try_get("customer_id").map_err(decode_error)?),
                status: OrderStatus::parse(&status).ok_or_else(|| {
                    StoreError::from(RepositoryError::Decode(format!(
                        "unknown order status `{status}`"
                    )))
                })?,
                placed_at: parse_timestamp("order_date", &placed_at)?,
                total_amount: price_from_db(row.try_get("total_amount").map_err(decode_error)?),
                lines: lines_by_order.remove(&id).unwrap_or_default(),
            })
        })
        .collect()
}

#[async_trait]
impl CommerceStore for SqlCommerceStore {
    async fn customer_profile(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Option<CustomerProfile>, StoreError> {
        self.customers.find_by_id(customer_id).await.map_err(StoreError::from)
    }

    async fn order_history(&self, customer_id: &CustomerId) -> Result<Vec<Order>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        load_orders(&mut conn, customer_id, None).await
    }

    async fn view_cart(&self, customer_id: &CustomerId) -> Result<Cart, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        let lines = cart_lines(&mut conn, customer_id).await?;
        Ok(Cart::new(customer_id.clone(), lines))
    }

    async fn add_to_cart(
        &self,
        customer_id: &CustomerId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart, StoreError> {
        if quantity == 0 {
            return Err(StoreError::Rejected("quantity must be greater than zero".to_string()));
        }

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let product = product_stock(&mut tx, product_id).await?;
        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT ci.quantity FROM cart_items ci
             JOIN carts c ON c.cart_id = ci.cart_id
             WHERE c.customer_id = ? AND ci.product_id = ?",
        )
        .bind(&customer_id.0)
        .bind(product_id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

        let existing = quantity_from_db("quantity", existing.unwrap_or(0))?;
        let requested = existing.saturating_add(quantity);
        if requested > product.stock {
            return Err(StoreError::InsufficientStock {
                product: product.name,
                available: product.stock,
                requested,
            });
        }

        let cart_id = ensure_cart(&mut tx, customer_id).await?;
        sqlx::query(
            "INSERT INTO cart_items (cart_id, product_id, quantity, price_at_time)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(cart_id, product_id) DO UPDATE SET quantity = excluded.quantity",
        )
        .bind(cart_id)
        .bind(product_id.0)
        .bind(i64::from(requested))
        .bind(product.price)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        let lines = cart_lines(&mut tx, customer_id).await?;
        tx.commit().await.map_err(db_error)?;

        Ok(Cart::new(customer_id.clone(), lines))
    }

    async fn update_cart_item(
        &self,
        customer_id: &CustomerId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let cart_id: Option<i64> = sqlx::query_scalar(
            "SELECT ci.cart_id FROM cart_items ci
             JOIN carts c ON c.cart_id = ci.cart_id
             WHERE c.customer_id = ? AND ci.product_id = ?",
        )
        .bind(&customer_id.0)
        .bind(product_id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

        let Some(cart_id) = cart_id else {
            return Err(StoreError::Rejected(format!("product {product_id} is not in the cart")));
        };

        if quantity == 0 {
            sqlx::query("DELETE FROM cart_items WHERE cart_id = ? AND product_id = ?")
                .bind(cart_id)
                .bind(product_id.0)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        } else {
            let product = product_stock(&mut tx, product_id).await?;
            if quantity > product.stock {
                return Err(StoreError::InsufficientStock {
                    product: product.name,
                    available: product.stock,
                    requested: quantity,
                });
            }
            sqlx::query("UPDATE cart_items SET quantity = ? WHERE cart_id = ? AND product_id = ?")
                .bind(i64::from(quantity))
                .bind(cart_id)
                .bind(product_id.0)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }

        sqlx::query("UPDATE carts SET updated_at = ? WHERE cart_id = ?")
            .bind(timestamp(Utc::now()))
            .bind(cart_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        let lines = cart_lines(&mut tx, customer_id).await?;
        tx.commit().await.map_err(db_error)?;

        Ok(Cart::new(customer_id.clone(), lines))
    }

    async fn clear_cart(&self, customer_id: &CustomerId) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let removed = cart_lines(&mut tx, customer_id).await?.len();
        delete_cart(&mut tx, customer_id).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(removed)
    }

    async fn place_order(&self, customer_id: &CustomerId) -> Result<Order, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let lines = cart_lines(&mut tx, customer_id).await?;
        if lines.is_empty() {
            return Err(StoreError::Rejected(
                "the cart is empty; add products before placing an order".to_string(),
            ));
        }

        for line in &lines {
            let updated = sqlx::query(
                "UPDATE products SET stock_quantity = stock_quantity - ?1
                 WHERE product_id = ?2 AND stock_quantity >= ?1",
            )
            .bind(i64::from(line.quantity))
            .bind(line.product_id.0)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

            if updated.rows_affected() == 0 {
                let product = product_stock(&mut tx, line.product_id).await?;
                return Err(StoreError::InsufficientStock {
                    product: product.name,
                    available: product.stock,
                    requested: line.quantity,
                });
            }
        }

        let cart = Cart::new(customer_id.clone(), lines);
        let placed_at = Utc::now();
        let order_id = sqlx::query(
            "INSERT INTO orders (customer_id, order_date, status, total_amount)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&customer_id.0)
        .bind(timestamp(placed_at))
        .bind(OrderStatus::Processing.as_str())
        .bind(price_to_db(cart.total)?)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?
        .last_insert_rowid();

        for line in &cart.lines {
            sqlx::query(
                "INSERT INTO order_items (order_id, product_id, quantity, price_at_time)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(order_id)
            .bind(line.product_id.0)
            .bind(i64::from(line.quantity))
            .bind(price_to_db(line.unit_price)?)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        delete_cart(&mut tx, customer_id).await?;
        tx.commit().await.map_err(db_error)?;

        info!(
            event_name = "store.order.placed",
            customer_id = %customer_id,
            order_id,
            lines = cart.lines.len(),
            total = %cart.total,
            "order placed"
        );

        Ok(Order {
            id: OrderId(order_id),
            customer_id: customer_id.clone(),
            status: OrderStatus::Processing,
            placed_at,
            total_amount: cart.total,
            lines: cart
                .lines
                .into_iter()
                .map(|line| OrderLine {
                    product_id: line.product_id,
                    product_name: line.name,
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                })
                .collect(),
        })
    }

    async fn cancel_order(
        &self,
        customer_id: &CustomerId,
        order_id: OrderId,
    ) -> Result<CancelledOrder, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let mut order = load_orders(&mut tx, customer_id, Some(order_id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::not_found("order", order_id))?;

        match order.status {
            OrderStatus::Delivered => {
                return Err(StoreError::Rejected(format!(
                    "order {order_id} has already been delivered and cannot be cancelled; \
                     use the returns policy instead"
                )))
            }
            OrderStatus::Cancelled => {
                return Err(StoreError::Rejected(format!("order {order_id} is already cancelled")))
            }
            OrderStatus::Processing | OrderStatus::Confirmed | OrderStatus::Shipping => {}
        }

        let mut restocked_units = 0u32;
        for line in &order.lines {
            sqlx::query(
                "UPDATE products SET stock_quantity = stock_quantity + ? WHERE product_id = ?",
            )
            .bind(i64::from(line.quantity))
            .bind(line.product_id.0)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
            restocked_units = restocked_units.saturating_add(line.quantity);
        }

        sqlx::query("UPDATE orders SET status = ? WHERE order_id = ?")
            .bind(OrderStatus::Cancelled.as_str())
            .bind(order_id.0)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;

        info!(
            event_name = "store.order.cancelled",
            customer_id = %customer_id,
            order_id = order_id.0,
            restocked_units,
            "order cancelled"
        );

        order.status = OrderStatus::Cancelled;
        Ok(CancelledOrder { order, restocked_units })
    }
}
