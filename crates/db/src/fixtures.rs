use std::collections::HashSet;

use chrono::{DateTime, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

use shopkeep_core::domain::customer::{CustomerId, CustomerProfile, LoyaltyTier};
use shopkeep_core::domain::order::{Order, OrderId, OrderLine, OrderStatus};
use shopkeep_core::domain::product::{Product, ProductId};

use crate::connection::DbPool;
use crate::repositories::{
    price_to_db, timestamp, InMemoryCommerceStore, RepositoryError, SqlCustomerRepository,
    SqlProductRepository,
};

/// Size of the seeded catalog, fixed products included.
pub const CATALOG_SIZE: usize = 100;

const GENERATOR_SEED: u64 = 20_250_401;

/// Hand-picked products referenced by demos and tests; ids 1..=10.
const FIXED_PRODUCTS: &[(i64, &str, &str, &str, i64, u32, &str)] = &[
    (
        1,
        "Nón Lá Cổ Điển",
        "Nón",
        "Lá cọ",
        112_000,
        45,
        "Nón lá truyền thống từ làng nghề Huế, phù hợp quà tặng.",
    ),
    (
        2,
        "Nón Thêu Hoa Sen",
        "Nón",
        "Vải",
        188_000,
        28,
        "Nón thêu hoa sen tinh tế, trang trí hoặc sử dụng.",
    ),
    (3, "Giỏ Đan Mây Huế", "Giỏ", "Mây", 250_000, 15, "Giỏ mây đan thủ công từ Huế, dùng đựng đồ."),
    (4, "Giỏ Tre Quà Tặng", "Giỏ", "Tre", 300_000, 20, "Giỏ tre đẹp, phù hợp làm quà tặng."),
    (
        5,
        "Khay Gỗ Truyền Thống",
        "Đồ Gia Dụng",
        "Gỗ",
        200_000,
        30,
        "Khay gỗ dùng trong gia đình, bền đẹp.",
    ),
    (
        6,
        "Hộp Mây Trang Trí",
        "Đồ Gia Dụng",
        "Mây",
        350_000,
        25,
        "Hộp mây thủ công, trang trí nhà cửa.",
    ),
    (
        7,
        "Tranh Thêu Phong Cảnh",
        "Tranh",
        "Vải",
        500_000,
        10,
        "Tranh thêu phong cảnh Việt Nam, treo tường.",
    ),
    (
        8,
        "Tranh Gỗ Đồng Quê",
        "Tranh",
        "Gỗ",
        800_000,
        8,
        "Tranh gỗ khắc đồng quê, nghệ thuật cao cấp.",
    ),
    (
        9,
        "Tượng Phật Gỗ",
        "Tượng",
        "Gỗ",
        1_000_000,
        5,
        "Tượng Phật gỗ thủ công, tâm linh và trang trí.",
    ),
    (
        10,
        "Tượng Đá Nghệ Thuật",
        "Tượng",
        "Đá",
        1_500_000,
        3,
        "Tượng đá chạm khắc, độc đáo và sang trọng.",
    ),
];

struct CategoryProfile {
    category: &'static str,
    materials: &'static [&'static str],
    price_range: (i64, i64),
    name_templates: &'static [&'static str],
}

const CATEGORY_PROFILES: &[CategoryProfile] = &[
    CategoryProfile {
        category: "Nón",
        materials: &["Lá cọ", "Vải"],
        price_range: (50_000, 200_000),
        name_templates: &["Nón Lá {style}", "Nón {material} {style}", "Nón Thêu {style}"],
    },
    CategoryProfile {
        category: "Giỏ",
        materials: &["Tre", "Mây", "Vải"],
        price_range: (100_000, 300_000),
        name_templates: &[
            "Giỏ Đan {material} {style}",
            "Giỏ {style} {material}",
            "Giỏ Quà {material} {style}",
        ],
    },
    CategoryProfile {
        category: "Đồ Gia Dụng",
        materials: &["Gỗ", "Tre", "Mây"],
        price_range: (150_000, 500_000),
        name_templates: &[
            "Khay {material} {style}",
            "Hộp {material} {style}",
            "Đĩa {material} {style}",
        ],
    },
    CategoryProfile {
        category: "Tranh",
        materials: &["Vải", "Gỗ"],
        price_range: (500_000, 2_000_000),
        name_templates: &[
            "Tranh Thêu {style}",
            "Tranh {material} {style}",
            "Tranh Phong Cảnh {style}",
        ],
    },
    CategoryProfile {
        category: "Tượng",
        materials: &["Gỗ", "Đá"],
        price_range: (500_000, 3_000_000),
        name_templates: &[
            "Tượng {material} {style}",
            "Tượng Phật {style}",
            "Tượng Nghệ Thuật {style}",
        ],
    },
];

const STYLES: &[&str] =
    &["Truyền Thống", "Huế", "Bắc Bộ", "Nam Bộ", "Hoa Văn", "Cổ Điển", "Hiện Đại"];
const ORIGINS: &[&str] = &["làng nghề Huế", "Bắc Kạn", "Phú Thọ", "Đồng Nai", "Hà Nội"];
const USE_CASES: &[&str] = &["quà tặng", "trang trí nhà cửa", "sử dụng hàng ngày", "lễ hội"];

fn pick<'a, T>(rng: &mut StdRng, items: &'a [T]) -> &'a T {
    &items[rng.gen_range(0..items.len())]
}

/// The full deterministic catalog: the fixed products followed by generated ones.
pub fn catalog() -> Vec<Product> {
    let mut products: Vec<Product> = FIXED_PRODUCTS
        .iter()
        .map(|&(id, name, category, material, price, stock, description)| Product {
            id: ProductId(id),
            name: name.to_string(),
            category: category.to_string(),
            material: material.to_string(),
            price: Decimal::from(price),
            stock_quantity: stock,
            description: description.to_string(),
        })
        .collect();

    let mut used_names: HashSet<String> =
        products.iter().map(|product| product.name.clone()).collect();
    let mut rng = StdRng::seed_from_u64(GENERATOR_SEED);

    for id in (FIXED_PRODUCTS.len() + 1)..=CATALOG_SIZE {
        let profile = pick(&mut rng, CATEGORY_PROFILES);
        let material = *pick(&mut rng, profile.materials);

        let mut name = String::new();
        for _ in 0..16 {
            let template = *pick(&mut rng, profile.name_templates);
            let style = *pick(&mut rng, STYLES);
            name = template.replace("{material}", material).replace("{style}", style);
            if !used_names.contains(&name) {
                break;
            }
        }
        if used_names.contains(&name) {
            name = format!("{name} {id}");
        }
        used_names.insert(name.clone());

        let (min_price, max_price) = profile.price_range;
        let price = rng.gen_range(min_price / 1_000..=max_price / 1_000) * 1_000;
        let stock = rng.gen_range(5..=50);
        let origin = *pick(&mut rng, ORIGINS);
        let use_case = *pick(&mut rng, USE_CASES);
        let description = format!(
            "Sản phẩm thủ công {} từ {}, chế tác tại {origin}. Phù hợp cho {use_case}.",
            name.to_lowercase(),
            material.to_lowercase()
        );

        products.push(Product {
            id: ProductId(id as i64),
            name,
            category: profile.category.to_string(),
            material: material.to_string(),
            price: Decimal::from(price),
            stock_quantity: stock,
            description,
        });
    }

    products
}

pub fn demo_customers() -> Vec<CustomerProfile> {
    [
        ("CUST001", "Nguyễn Văn An", LoyaltyTier::Gold),
        ("CUST002", "Trần Thị Bình", LoyaltyTier::Silver),
        ("CUST003", "Lê Minh Châu", LoyaltyTier::Standard),
    ]
    .into_iter()
    .map(|(id, name, tier)| CustomerProfile {
        id: CustomerId(id.to_string()),
        display_name: Some(name.to_string()),
        loyalty_tier: tier,
    })
    .collect()
}

fn seed_date(year: i32, month: u32, day: u32) -> Result<DateTime<Utc>, RepositoryError> {
    Utc.with_ymd_and_hms(year, month, day, 9, 0, 0)
        .single()
        .ok_or_else(|| RepositoryError::Decode(format!("invalid seed date {year}-{month}-{day}")))
}

/// Orders placed before the demo starts. Their stock is already accounted for.
pub fn historic_orders() -> Result<Vec<Order>, RepositoryError> {
    let line = |product_id: i64, name: &str, quantity: u32, unit_price: i64| OrderLine {
        product_id: ProductId(product_id),
        product_name: name.to_string(),
        quantity,
        unit_price: Decimal::from(unit_price),
    };
    let order = |id: i64, customer: &str, placed_at, status, lines: Vec<OrderLine>| {
        let total_amount =
            lines.iter().map(|line| line.unit_price * Decimal::from(line.quantity)).sum();
        Order {
            id: OrderId(id),
            customer_id: CustomerId(customer.to_string()),
            status,
            placed_at,
            total_amount,
            lines,
        }
    };

    Ok(vec![
        order(
            1,
            "CUST001",
            seed_date(2025, 4, 1)?,
            OrderStatus::Processing,
            vec![line(1, "Nón Lá Cổ Điển", 5, 112_000)],
        ),
        order(
            2,
            "CUST001",
            seed_date(2025, 4, 10)?,
            OrderStatus::Delivered,
            vec![line(4, "Giỏ Tre Quà Tặng", 2, 300_000)],
        ),
        order(
            3,
            "CUST002",
            seed_date(2025, 4, 15)?,
            OrderStatus::Shipping,
            vec![
                line(7, "Tranh Thêu Phong Cảnh", 1, 500_000),
                line(3, "Giỏ Đan Mây Huế", 2, 250_000),
            ],
        ),
    ])
}

pub struct StorefrontSeedDataset;

impl StorefrontSeedDataset {
    /// Writes the catalog, demo customers and historic orders. Re-running resets
    /// seeded rows to their initial values and leaves other rows alone.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let products = catalog();
        let product_repo = SqlProductRepository::new(pool.clone());
        for product in &products {
            product_repo.save(product).await?;
        }

        let customers = demo_customers();
        let customer_repo = SqlCustomerRepository::new(pool.clone());
        for customer in &customers {
            customer_repo.save(customer).await?;
        }

        let orders = historic_orders()?;
        let mut tx = pool.begin().await?;
        for order in &orders {
            sqlx::query(
                "INSERT INTO orders (order_id, customer_id, order_date, status, total_amount)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(order_id) DO UPDATE SET
                     customer_id = excluded.customer_id,
                     order_date = excluded.order_date,
                     status = excluded.status,
                     total_amount = excluded.total_amount",
            )
            .bind(order.id.0)
            .bind(&order.customer_id.0)
            .bind(timestamp(order.placed_at))
            .bind(order.status.as_str())
            .bind(price_to_db(order.total_amount)?)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM order_items WHERE order_id = ?")
                .bind(order.id.0)
                .execute(&mut *tx)
                .await?;
            for line in &order.lines {
                sqlx::query(
                    "INSERT INTO order_items (order_id, product_id, quantity, price_at_time)
                     VALUES (?, ?, ?, ?)",
                )
                .bind(order.id.0)
                .bind(line.product_id.0)
                .bind(i64::from(line.quantity))
                .bind(price_to_db(line.unit_price)?)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;

        Ok(SeedResult {
            products: products.len(),
            customers: customers.len(),
            orders: orders.len(),
        })
    }

    /// Loads the same dataset into an in-memory store.
    pub async fn load_in_memory(
        store: &InMemoryCommerceStore,
    ) -> Result<SeedResult, RepositoryError> {
        let products = catalog();
        let customers = demo_customers();
        let orders = historic_orders()?;
        let result = SeedResult {
            products: products.len(),
            customers: customers.len(),
            orders: orders.len(),
        };

        for product in products {
            store.insert_product(product).await;
        }
        for customer in customers {
            store.insert_customer(customer).await;
        }
        for order in orders {
            store.insert_order(order).await;
        }
        Ok(result)
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let product_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE product_id <= ?")
                .bind(CATALOG_SIZE as i64)
                .fetch_one(pool)
                .await?;
        checks.push(("catalog-size", product_count == CATALOG_SIZE as i64));

        let mut fixed_names_match = true;
        for &(id, name, ..) in FIXED_PRODUCTS {
            let stored: Option<String> =
                sqlx::query_scalar("SELECT name FROM products WHERE product_id = ?")
                    .bind(id)
                    .fetch_optional(pool)
                    .await?;
            fixed_names_match &= stored.as_deref() == Some(name);
        }
        checks.push(("fixed-products", fixed_names_match));

        let customer_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM customers WHERE customer_id IN ('CUST001', 'CUST002', 'CUST003')",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("demo-customers", customer_count == 3));

        let orders = historic_orders()?;
        let mut orders_match = true;
        for order in &orders {
            let status: Option<String> = sqlx::query_scalar(
                "SELECT status FROM orders WHERE order_id = ? AND customer_id = ?",
            )
            .bind(order.id.0)
            .bind(&order.customer_id.0)
            .fetch_optional(pool)
            .await?;
            orders_match &= status.as_deref() == Some(order.status.as_str());
        }
        checks.push(("historic-orders", orders_match));

        Ok(VerificationResult { all_present: checks.iter().all(|(_, ok)| *ok), checks })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedResult {
    pub products: usize,
    pub customers: usize,
    pub orders: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
