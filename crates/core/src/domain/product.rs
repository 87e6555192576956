use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Product categories carried by the store catalog.
pub const CATEGORIES: &[&str] = &["Nón", "Giỏ", "Đồ Gia Dụng", "Tranh", "Tượng"];

/// Materials carried by the store catalog.
pub const MATERIALS: &[&str] = &["Lá cọ", "Tre", "Gỗ", "Vải", "Mây", "Đá"];

pub const DEFAULT_SEARCH_LIMIT: u32 = 20;
pub const MAX_SEARCH_LIMIT: u32 = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub i64);

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub category: String,
    pub material: String,
    pub price: Decimal,
    pub stock_quantity: u32,
    pub description: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSort {
    Asc,
    Desc,
}

impl PriceSort {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Filters accepted by `search_products`. All fields are optional except the limit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductQuery {
    pub query: Option<String>,
    pub category: Option<String>,
    pub material: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub min_stock: Option<u32>,
    pub sort_by_price: Option<PriceSort>,
    pub limit: u32,
}

impl Default for ProductQuery {
    fn default() -> Self {
        Self {
            query: None,
            category: None,
            material: None,
            min_price: None,
            max_price: None,
            min_stock: None,
            sort_by_price: None,
            limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

impl ProductQuery {
    pub fn matches(&self, product: &Product) -> bool {
        if let Some(category) = &self.category {
            if !product.category.to_lowercase().eq(&category.to_lowercase()) {
                return false;
            }
        }
        if let Some(material) = &self.material {
            if !product.material.to_lowercase().eq(&material.to_lowercase()) {
                return false;
            }
        }
        if let Some(text) = self.query.as_deref().map(str::trim).filter(|text| !text.is_empty()) {
            let needle = text.to_lowercase();
            let in_name = product.name.to_lowercase().contains(&needle);
            let in_description = product.description.to_lowercase().contains(&needle);
            if !in_name && !in_description {
                return false;
            }
        }
        if self.min_price.is_some_and(|min| product.price < min) {
            return false;
        }
        if self.max_price.is_some_and(|max| product.price > max) {
            return false;
        }
        if self.min_stock.is_some_and(|min| product.stock_quantity < min) {
            return false;
        }
        true
    }
}

pub fn canonical_category(value: &str) -> Option<&'static str> {
    canonical(CATEGORIES, value)
}

pub fn canonical_material(value: &str) -> Option<&'static str> {
    canonical(MATERIALS, value)
}

fn canonical(allowed: &[&'static str], value: &str) -> Option<&'static str> {
    let needle = value.trim().to_lowercase();
    allowed.iter().copied().find(|candidate| candidate.to_lowercase() == needle)
}
