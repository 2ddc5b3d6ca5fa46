//! Inventory movements and products

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::money::option_minor_units;
use core_kernel::{BusinessId, Currency, MovementId, ProductId, UserId};

use crate::error::BillingError;

/// Kind of stock movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    /// Goods received
    In,
    /// Goods sold or shipped
    Out,
    /// Stock count correction, signed
    Adjust,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "IN",
            MovementType::Out => "OUT",
            MovementType::Adjust => "ADJUST",
        }
    }
}

/// A stocked product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub business_id: BusinessId,
    pub name: String,
    pub sku: Option<String>,
    pub currency: Currency,
    /// Unset means unknown, not free
    #[serde(default, with = "option_minor_units")]
    pub purchase_price_cents: Option<i64>,
    #[serde(default, with = "option_minor_units")]
    pub sale_price_cents: Option<i64>,
}

impl Product {
    pub fn new(business_id: BusinessId, name: impl Into<String>, currency: Currency) -> Self {
        Self {
            id: ProductId::new_v7(),
            business_id,
            name: name.into(),
            sku: None,
            currency,
            purchase_price_cents: None,
            sale_price_cents: None,
        }
    }

    pub fn with_prices(mut self, purchase: Option<i64>, sale: Option<i64>) -> Self {
        self.purchase_price_cents = purchase;
        self.sale_price_cents = sale;
        self
    }
}

/// A recorded stock movement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryMovement {
    pub id: MovementId,
    pub business_id: BusinessId,
    pub product_id: ProductId,
    pub movement_type: MovementType,
    /// Signed; only the sign of ADJUST carries meaning
    pub quantity: i64,
    /// Cost per unit captured with the movement, if known
    #[serde(default, with = "option_minor_units")]
    pub unit_cost_cents: Option<i64>,
    pub currency: Currency,
    pub occurred_on: NaiveDate,
    pub note: Option<String>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl InventoryMovement {
    pub fn new(
        product: &Product,
        movement_type: MovementType,
        quantity: i64,
        occurred_on: NaiveDate,
    ) -> Self {
        Self {
            id: MovementId::new_v7(),
            business_id: product.business_id,
            product_id: product.id,
            movement_type,
            quantity,
            unit_cost_cents: None,
            currency: product.currency,
            occurred_on,
            note: None,
            created_by: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_unit_cost(mut self, unit_cost_cents: i64) -> Self {
        self.unit_cost_cents = Some(unit_cost_cents);
        self
    }

    /// Unit cost with the product fallback for this movement type
    ///
    /// IN and ADJUST fall back to the purchase price, OUT to the sale price.
    pub fn effective_unit_cost(&self, product: &Product) -> Option<i64> {
        self.unit_cost_cents.or(match self.movement_type {
            MovementType::In | MovementType::Adjust => product.purchase_price_cents,
            MovementType::Out => product.sale_price_cents,
        })
    }

    /// `|quantity| × unit cost`
    ///
    /// # Errors
    ///
    /// `Validation` when no unit cost can be found, the cost is negative, the
    /// quantity is zero, an IN or OUT quantity is negative, or the product
    /// does not match.
    pub fn valuation_cents(&self, product: &Product) -> Result<i64, BillingError> {
        if product.id != self.product_id {
            return Err(BillingError::validation(format!(
                "movement {} is for product {}, not {}",
                self.id, self.product_id, product.id
            )));
        }
        if product.currency != self.currency {
            return Err(BillingError::validation(format!(
                "movement {} is in {} but product {} is priced in {}",
                self.id, self.currency, product.id, product.currency
            )));
        }
        if self.quantity == 0 {
            return Err(BillingError::validation(format!("movement {} has zero quantity", self.id)));
        }
        // Only ADJUST carries a sign; IN and OUT take their direction from the type.
        if self.quantity < 0 && self.movement_type != MovementType::Adjust {
            return Err(BillingError::validation(format!(
                "{} movement {} has negative quantity {}",
                self.movement_type.as_str(),
                self.id,
                self.quantity
            )));
        }
        let unit = self.effective_unit_cost(product).ok_or_else(|| {
            BillingError::validation(format!(
                "no unit cost for {} movement {} and product {} has no fallback price",
                self.movement_type.as_str(),
                self.id,
                product.id
            ))
        })?;
        if unit < 0 {
            return Err(BillingError::validation(format!("negative unit cost {} on movement {}", unit, self.id)));
        }
        self.quantity
            .unsigned_abs()
            .checked_mul(unit as u64)
            .and_then(|v| i64::try_from(v).ok())
            .ok_or_else(|| core_kernel::MoneyError::Overflow.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product() -> Product {
        Product::new(BusinessId::new(), "Walnut desk", Currency::EUR).with_prices(Some(12_000), Some(25_000))
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
    }

    #[test]
    fn test_fallback_price_by_direction() {
        let p = product();
        let inbound = InventoryMovement::new(&p, MovementType::In, 4, day());
        let outbound = InventoryMovement::new(&p, MovementType::Out, 2, day());

        assert_eq!(inbound.valuation_cents(&p).unwrap(), 48_000);
        assert_eq!(outbound.valuation_cents(&p).unwrap(), 50_000);
    }

    #[test]
    fn test_explicit_zero_cost_is_a_price() {
        let p = product();
        let gift = InventoryMovement::new(&p, MovementType::In, 1, day()).with_unit_cost(0);
        assert_eq!(gift.valuation_cents(&p).unwrap(), 0);
    }

    #[test]
    fn test_missing_price_is_rejected() {
        let p = product().with_prices(None, None);
        let m = InventoryMovement::new(&p, MovementType::Out, 1, day());
        assert!(matches!(m.valuation_cents(&p), Err(BillingError::Validation(_))));
    }

    #[test]
    fn test_negative_quantity_only_for_adjust() {
        let p = product();
        for kind in [MovementType::In, MovementType::Out] {
            let m = InventoryMovement::new(&p, kind, -5, day());
            assert!(matches!(m.valuation_cents(&p), Err(BillingError::Validation(_))));
        }
        let shrinkage = InventoryMovement::new(&p, MovementType::Adjust, -5, day());
        assert_eq!(shrinkage.valuation_cents(&p).unwrap(), 60_000);
    }

    #[test]
    fn test_zero_quantity_is_rejected() {
        let p = product();
        let m = InventoryMovement::new(&p, MovementType::Adjust, 0, day());
        assert!(matches!(m.valuation_cents(&p), Err(BillingError::Validation(_))));
    }
}
