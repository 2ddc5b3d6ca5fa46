//! Project pricing
//!
//! Resolves a unit price per service line from a three-tier waterfall
//! (project override, service default, day rate), applies the line discount,
//! multiplies by quantity and splits the project total into deposit and
//! balance.
//!
//! Each tier is an `Option<i64>`: `Some(0)` is a real, free price and wins the
//! waterfall; only `None` falls through. A line with no tier at all is priced
//! at zero and reported in [`ProjectPricing::missing_prices`] instead of
//! failing the computation.

use serde::{Deserialize, Serialize};
use tracing::debug;
use validator::Validate;

use core_kernel::money::{minor_units, option_minor_units};
use core_kernel::{apply_line_discount, distribute_percent, Currency, DiscountType, Money, MoneyError, ServiceId};

use crate::error::BillingError;

/// Billing cadence of a service line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingUnit {
    #[default]
    OneOff,
    Monthly,
}

/// Which tier of the waterfall produced a unit price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    ProjectOverride,
    ServiceDefault,
    DayRate,
    Missing,
}

/// Outcome of the price waterfall for one line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedUnitPrice {
    #[serde(with = "minor_units")]
    pub unit_price_cents: i64,
    pub source: PriceSource,
    pub missing_price: bool,
}

/// Picks the first tier that is present
pub fn resolve_unit_price(
    project_override: Option<i64>,
    service_default: Option<i64>,
    day_rate: Option<i64>,
) -> ResolvedUnitPrice {
    let tiers = [
        (project_override, PriceSource::ProjectOverride),
        (service_default, PriceSource::ServiceDefault),
        (day_rate, PriceSource::DayRate),
    ];

    tiers
        .into_iter()
        .find_map(|(price, source)| price.map(|p| (p, source)))
        .map(|(unit_price_cents, source)| ResolvedUnitPrice {
            unit_price_cents,
            source,
            missing_price: false,
        })
        .unwrap_or(ResolvedUnitPrice {
            unit_price_cents: 0,
            source: PriceSource::Missing,
            missing_price: true,
        })
}

/// A service line as attached to a project, before pricing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct PricingLineInput {
    pub service_id: Option<ServiceId>,
    pub label: String,
    /// Zero is billed as one; negative is rejected
    #[validate(range(min = 0, message = "quantity must not be negative"))]
    pub quantity: i64,
    #[serde(default, with = "option_minor_units")]
    #[validate(range(min = 0, message = "project price must not be negative"))]
    pub project_price_cents: Option<i64>,
    #[serde(default, with = "option_minor_units")]
    #[validate(range(min = 0, message = "service price must not be negative"))]
    pub service_price_cents: Option<i64>,
    #[serde(default, with = "option_minor_units")]
    #[validate(range(min = 0, message = "day rate must not be negative"))]
    pub day_rate_cents: Option<i64>,
    #[serde(default)]
    pub discount_type: DiscountType,
    #[serde(default)]
    pub discount_value: i64,
    #[serde(default)]
    pub billing_unit: BillingUnit,
}

impl PricingLineInput {
    pub fn new(label: impl Into<String>, quantity: i64) -> Self {
        Self {
            service_id: None,
            label: label.into(),
            quantity,
            project_price_cents: None,
            service_price_cents: None,
            day_rate_cents: None,
            discount_type: DiscountType::None,
            discount_value: 0,
            billing_unit: BillingUnit::OneOff,
        }
    }

    fn check(&self, index: usize) -> Result<(), BillingError> {
        self.validate()
            .map_err(|e| BillingError::validation(format!("line {} ({}): {}", index, self.label, e)))?;
        if self.discount_type == DiscountType::Percent && !(0..=100).contains(&self.discount_value) {
            return Err(BillingError::validation(format!(
                "line {} ({}): percent discount must be between 0 and 100, got {}",
                index, self.label, self.discount_value
            )));
        }
        Ok(())
    }
}

/// A priced line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLine {
    pub service_id: Option<ServiceId>,
    pub label: String,
    pub quantity: i64,
    /// Resolved price before discount
    #[serde(with = "minor_units")]
    pub unit_price_cents: i64,
    #[serde(with = "minor_units")]
    pub discounted_unit_cents: i64,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    #[serde(with = "minor_units")]
    pub line_total_cents: i64,
    pub billing_unit: BillingUnit,
    pub price_source: PriceSource,
    pub missing_price: bool,
}

/// A line that resolved to no price at all
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingPriceDiagnostic {
    pub line_index: usize,
    pub service_id: Option<ServiceId>,
    pub label: String,
}

/// Priced view of a project's service lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPricing {
    pub currency: Currency,
    pub deposit_percent: i64,
    pub lines: Vec<PriceLine>,
    #[serde(with = "minor_units")]
    pub total_cents: i64,
    #[serde(with = "minor_units")]
    pub deposit_cents: i64,
    #[serde(with = "minor_units")]
    pub balance_cents: i64,
    /// Share of `total_cents` coming from MONTHLY lines
    #[serde(with = "minor_units")]
    pub monthly_cents: i64,
    pub missing_prices: Vec<MissingPriceDiagnostic>,
}

impl ProjectPricing {
    pub fn has_missing_prices(&self) -> bool {
        !self.missing_prices.is_empty()
    }
}

/// Prices every line and splits the total into deposit and balance
///
/// # Errors
///
/// - `Validation` for a negative quantity or tier price, a percent discount
///   outside `0..=100`, or a deposit percent outside `0..=100`. Nothing is
///   computed when any line is invalid.
/// - `Money(Overflow)` if a line or the total leaves the `i64` range.
pub fn compute_project_pricing(
    lines: &[PricingLineInput],
    deposit_percent: i64,
    currency: Currency,
) -> Result<ProjectPricing, BillingError> {
    if !(0..=100).contains(&deposit_percent) {
        return Err(BillingError::validation(format!(
            "deposit percent must be between 0 and 100, got {}",
            deposit_percent
        )));
    }
    for (index, line) in lines.iter().enumerate() {
        line.check(index)?;
    }

    let mut priced = Vec::with_capacity(lines.len());
    let mut missing_prices = Vec::new();

    for (index, line) in lines.iter().enumerate() {
        let resolved = resolve_unit_price(
            line.project_price_cents,
            line.service_price_cents,
            line.day_rate_cents,
        );
        if resolved.missing_price {
            missing_prices.push(MissingPriceDiagnostic {
                line_index: index,
                service_id: line.service_id,
                label: line.label.clone(),
            });
        }

        let quantity = line.quantity.max(1);
        let discounted =
            apply_line_discount(resolved.unit_price_cents, line.discount_type, line.discount_value);
        let line_total = discounted.checked_mul(quantity).ok_or(MoneyError::Overflow)?;

        priced.push(PriceLine {
            service_id: line.service_id,
            label: line.label.clone(),
            quantity,
            unit_price_cents: resolved.unit_price_cents,
            discounted_unit_cents: discounted,
            discount_type: line.discount_type,
            discount_value: line.discount_value,
            line_total_cents: line_total,
            billing_unit: line.billing_unit,
            price_source: resolved.source,
            missing_price: resolved.missing_price,
        });
    }

    let amounts: Vec<(BillingUnit, Money)> = priced
        .iter()
        .map(|l| (l.billing_unit, Money::from_minor(l.line_total_cents, currency)))
        .collect();
    let total_cents = Money::sum(currency, amounts.iter().map(|(_, m)| m))?.amount_minor();
    let monthly_cents = Money::sum(
        currency,
        amounts.iter().filter(|(unit, _)| *unit == BillingUnit::Monthly).map(|(_, m)| m),
    )?
    .amount_minor();

    let deposit_cents = distribute_percent(total_cents, deposit_percent);
    let balance_cents = total_cents - deposit_cents;

    debug!(
        lines = priced.len(),
        total_cents,
        deposit_cents,
        missing = missing_prices.len(),
        "Computed project pricing"
    );

    Ok(ProjectPricing {
        currency,
        deposit_percent,
        lines: priced,
        total_cents,
        deposit_cents,
        balance_cents,
        monthly_cents,
        missing_prices,
    })
}
