//! Integration tests for the Money module
//!
//! Exercises the public rounding rules through the crate root the way the
//! billing domain consumes them.

use core_kernel::{apply_line_discount, distribute_percent, Currency, DiscountType, Money, MoneyError};

mod rounding {
    use super::*;

    #[test]
    fn test_deposit_split_on_odd_total() {
        // 30% of 333 = 99.9 rounds to 100; the balance takes the rest.
        let deposit = distribute_percent(333, 30);
        assert_eq!(deposit, 100);
        assert_eq!(333 - deposit, 233);
    }

    #[test]
    fn test_deposit_and_discount_round_differently() {
        // 25% of 1002 is 250.5: deposits round it up, discounts truncate.
        assert_eq!(distribute_percent(1_002, 25), 251);
        assert_eq!(apply_line_discount(1_002, DiscountType::Percent, 75), 250);
    }

    #[test]
    fn test_discounted_line_total() {
        let unit = apply_line_discount(1_999, DiscountType::Percent, 10);
        assert_eq!(unit, 1_799);
        assert_eq!(unit * 3, 5_397);
    }

    #[test]
    fn test_negative_amounts_floor() {
        assert_eq!(distribute_percent(-1, 50), 0);
        assert_eq!(distribute_percent(-3, 50), -1);
        assert_eq!(apply_line_discount(-5, DiscountType::Percent, 50), -3);
    }
}

mod arithmetic {
    use super::*;

    #[test]
    fn test_sum_in_single_currency() {
        let items = [
            Money::from_minor(1_000, Currency::EUR),
            Money::from_minor(250, Currency::EUR),
            Money::from_minor(-50, Currency::EUR),
        ];
        let total = Money::sum(Currency::EUR, items.iter()).unwrap();
        assert_eq!(total.amount_minor(), 1_200);
    }

    #[test]
    fn test_sum_rejects_mixed_currencies() {
        let items = [
            Money::from_minor(1_000, Currency::EUR),
            Money::from_minor(250, Currency::GBP),
        ];
        let result = Money::sum(Currency::EUR, items.iter());
        assert!(matches!(result, Err(MoneyError::CurrencyMismatch(_, _))));
    }

    #[test]
    fn test_overflow_is_reported() {
        let big = Money::from_minor(i64::MAX, Currency::USD);
        assert_eq!(big.checked_add(&Money::from_minor(1, Currency::USD)), Err(MoneyError::Overflow));
        assert_eq!(big.checked_mul(2), Err(MoneyError::Overflow));
    }

    #[test]
    fn test_currency_parsing() {
        assert_eq!("eur".parse::<Currency>().unwrap(), Currency::EUR);
        assert!(matches!("XXX".parse::<Currency>(), Err(MoneyError::UnknownCurrency(_))));
        assert_eq!("percent".parse::<DiscountType>().unwrap(), DiscountType::Percent);
    }
}
