use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::customer::CustomerId;
use crate::domain::product::ProductId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u32,
    /// Price captured when the line was last written.
    pub unit_price: Decimal,
}

impl CartLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub customer_id: CustomerId,
    pub lines: Vec<CartLine>,
    pub total: Decimal,
}

impl Cart {
    pub fn new(customer_id: CustomerId, lines: Vec<CartLine>) -> Self {
        let total = lines.iter().map(CartLine::line_total).sum();
        Self { customer_id, lines, total }
    }

    pub fn empty(customer_id: CustomerId) -> Self {
        Self::new(customer_id, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line(&self, product_id: ProductId) -> Option<&CartLine> {
        self.lines.iter().find(|line| line.product_id == product_id)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{Cart, CartLine};
    use crate::domain::customer::CustomerId;
    use crate::domain::product::ProductId;

    #[test]
    fn total_sums_line_totals() {
        let cart = Cart::new(
            CustomerId("CUST001".to_string()),
            vec![
                CartLine {
                    product_id: ProductId(1),
                    name: "Nón lá".to_string(),
                    quantity: 2,
                    unit_price: Decimal::from(85_000),
                },
                CartLine {
                    product_id: ProductId(2),
                    name: "Tượng gỗ".to_string(),
                    quantity: 1,
                    unit_price: Decimal::from(420_000),
                },
            ],
        );

        assert_eq!(cart.total, Decimal::from(590_000));
        assert_eq!(cart.line(ProductId(2)).map(|line| line.quantity), Some(1));
        assert!(!cart.is_empty());
    }
}
