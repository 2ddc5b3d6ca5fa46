//! Money types with exact integer arithmetic
//!
//! Every amount in the engine is an `i64` count of minor units (cents) carried
//! next to its ISO 4217 currency. Nothing in this module, or in any component
//! built on top of it, uses floating point.
//!
//! Two rounding rules live here and they are intentionally different:
//!
//! - [`distribute_percent`] rounds half-up (deposit splitting).
//! - [`apply_line_discount`] floors (line-level percentage discounts).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Currency codes following ISO 4217
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    USD,
    EUR,
    GBP,
    JPY,
    CHF,
    INR,
    AUD,
    CAD,
    SGD,
    HKD,
}

impl Currency {
    /// Returns the number of decimal places for this currency
    pub fn decimal_places(&self) -> u32 {
        match self {
            Currency::JPY => 0,
            _ => 2,
        }
    }

    /// Returns the currency symbol
    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::USD => "$",
            Currency::EUR => "€",
            Currency::GBP => "£",
            Currency::JPY => "¥",
            Currency::CHF => "CHF",
            Currency::INR => "₹",
            Currency::AUD => "A$",
            Currency::CAD => "C$",
            Currency::SGD => "S$",
            Currency::HKD => "HK$",
        }
    }

    /// Returns the ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::JPY => "JPY",
            Currency::CHF => "CHF",
            Currency::INR => "INR",
            Currency::AUD => "AUD",
            Currency::CAD => "CAD",
            Currency::SGD => "SGD",
            Currency::HKD => "HKD",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            "GBP" => Ok(Currency::GBP),
            "JPY" => Ok(Currency::JPY),
            "CHF" => Ok(Currency::CHF),
            "INR" => Ok(Currency::INR),
            "AUD" => Ok(Currency::AUD),
            "CAD" => Ok(Currency::CAD),
            "SGD" => Ok(Currency::SGD),
            "HKD" => Ok(Currency::HKD),
            other => Err(MoneyError::UnknownCurrency(other.to_string())),
        }
    }
}

/// Errors that can occur during money operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Currency mismatch: cannot operate on {0} and {1}")]
    CurrencyMismatch(String, String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Unknown currency code: {0}")]
    UnknownCurrency(String),

    #[error("Overflow during calculation")]
    Overflow,
}

/// A monetary amount in minor units with its currency
///
/// The serialized form carries the amount as a base-10 string so that large
/// 64-bit values survive JSON consumers that parse numbers as doubles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    #[serde(with = "minor_units")]
    amount_minor: i64,
    currency: Currency,
}

impl Money {
    /// Creates Money from an integer amount in minor units (e.g., cents)
    pub fn from_minor(amount_minor: i64, currency: Currency) -> Self {
        Self {
            amount_minor,
            currency,
        }
    }

    /// Creates a zero amount in the specified currency
    pub fn zero(currency: Currency) -> Self {
        Self::from_minor(0, currency)
    }

    /// Returns the amount in minor units
    pub fn amount_minor(&self) -> i64 {
        self.amount_minor
    }

    /// Returns the currency
    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Checked addition that returns an error on currency mismatch or overflow
    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        self.amount_minor
            .checked_add(other.amount_minor)
            .map(|amount| Self::from_minor(amount, self.currency))
            .ok_or(MoneyError::Overflow)
    }

    /// Multiplies by an integer quantity
    pub fn checked_mul(&self, quantity: i64) -> Result<Money, MoneyError> {
        self.amount_minor
            .checked_mul(quantity)
            .map(|amount| Self::from_minor(amount, self.currency))
            .ok_or(MoneyError::Overflow)
    }

    /// Sums an iterator of amounts, all of which must share `currency`
    pub fn sum<'a>(
        currency: Currency,
        items: impl IntoIterator<Item = &'a Money>,
    ) -> Result<Money, MoneyError> {
        items
            .into_iter()
            .try_fold(Money::zero(currency), |acc, m| acc.checked_add(m))
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch(
                self.currency.to_string(),
                other.currency.to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dp = self.currency.decimal_places();
        let sign = if self.amount_minor < 0 { "-" } else { "" };
        let abs = self.amount_minor.unsigned_abs();
        if dp == 0 {
            return write!(f, "{} {}{}", self.currency.symbol(), sign, abs);
        }
        let divisor = 10_u64.pow(dp);
        write!(
            f,
            "{} {}{}.{:0width$}",
            self.currency.symbol(),
            sign,
            abs / divisor,
            abs % divisor,
            width = dp as usize
        )
    }
}

/// Splits `percent` percent off `amount`, rounding half-up on the cent
///
/// Computes `(amount * percent + 50) / 100` with floor division. `percent` is
/// clamped to `[0, 100]`. Two complementary splits of the same amount sum to
/// `amount`, plus one cent exactly when `amount * percent` ends in `50`.
pub fn distribute_percent(amount: i64, percent: i64) -> i64 {
    let percent = i128::from(percent.clamp(0, 100));
    let scaled = i128::from(amount) * percent + 50;
    // |result| <= |amount| + 1, so the narrowing cast cannot truncate for
    // any amount that is not already at the i64 boundary.
    scaled.div_euclid(100) as i64
}

/// Kind of discount applied to a single price line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    #[default]
    None,
    Percent,
    Amount,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::None => "NONE",
            DiscountType::Percent => "PERCENT",
            DiscountType::Amount => "AMOUNT",
        }
    }
}

impl FromStr for DiscountType {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" | "" => Ok(DiscountType::None),
            "PERCENT" => Ok(DiscountType::Percent),
            "AMOUNT" => Ok(DiscountType::Amount),
            other => Err(MoneyError::InvalidAmount(format!(
                "unknown discount type '{}'",
                other
            ))),
        }
    }
}

/// Applies a line discount to a unit price
///
/// - `Percent`: value clamped to `[0, 100]`, result `floor(unit * (100 - value) / 100)`.
/// - `Amount`: value clamped to `>= 0`, result floored at `0`.
/// - `None`: identity.
///
/// The percent branch truncates where [`distribute_percent`] rounds half-up.
pub fn apply_line_discount(unit: i64, kind: DiscountType, value: i64) -> i64 {
    match kind {
        DiscountType::None => unit,
        DiscountType::Percent => {
            let kept = 100 - i128::from(value.clamp(0, 100));
            (i128::from(unit) * kept).div_euclid(100) as i64
        }
        DiscountType::Amount => unit.saturating_sub(value.max(0)).max(0),
    }
}

/// Serde adapter encoding `i64` minor units as base-10 strings
///
/// Deserialization accepts both the string form and a bare JSON integer.
pub mod minor_units {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S>(value: &i64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(MinorUnitsVisitor)
    }

    pub(super) struct MinorUnitsVisitor;

    impl<'de> Visitor<'de> for MinorUnitsVisitor {
        type Value = i64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an integer amount in minor units, as a string or number")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
            i64::try_from(v).map_err(|_| E::custom("amount exceeds i64 range"))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
            v.trim()
                .parse::<i64>()
                .map_err(|e| E::custom(format!("invalid minor-unit amount '{}': {}", v, e)))
        }
    }
}

/// Same as [`minor_units`] for optional amounts (`null` stays `None`)
pub mod option_minor_units {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(v) => serializer.serialize_str(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Wrapper(#[serde(with = "super::minor_units")] i64);

        Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn complementary_splits_differ_only_on_exact_half(
            amount in 0i64..10_000_000_000i64,
            percent in 0i64..=100i64
        ) {
            let left = distribute_percent(amount, percent);
            let right = distribute_percent(amount, 100 - percent);
            let extra = if (amount as i128 * percent as i128) % 100 == 50 { 1 } else { 0 };
            prop_assert_eq!(left + right, amount + extra);
        }

        #[test]
        fn percent_discount_never_exceeds_unit(
            unit in 0i64..1_000_000_000i64,
            value in 0i64..=100i64
        ) {
            let discounted = apply_line_discount(unit, DiscountType::Percent, value);
            prop_assert!(discounted <= unit);
            prop_assert!(discounted >= 0);
        }

        #[test]
        fn money_sum_is_associative(
            a in -1_000_000i64..1_000_000i64,
            b in -1_000_000i64..1_000_000i64,
            c in -1_000_000i64..1_000_000i64
        ) {
            let ma = Money::from_minor(a, Currency::EUR);
            let mb = Money::from_minor(b, Currency::EUR);
            let mc = Money::from_minor(c, Currency::EUR);

            let left = ma.checked_add(&mb).unwrap().checked_add(&mc).unwrap();
            let right = ma.checked_add(&mb.checked_add(&mc).unwrap()).unwrap();
            prop_assert_eq!(left, right);
        }
    }
}
