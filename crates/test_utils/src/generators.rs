//! Property-Based Test Generators
//!
//! Provides proptest strategies for generating billing data that respects
//! the engine's input contracts.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use core_kernel::{Currency, DiscountType, YearMonth};
use domain_billing::{BillingUnit, MovementType, PaymentMethod, PricingLineInput};

/// Strategy for generating valid Currency values
pub fn currency_strategy() -> impl Strategy<Value = Currency> {
    prop_oneof![
        Just(Currency::USD),
        Just(Currency::EUR),
        Just(Currency::GBP),
        Just(Currency::JPY),
        Just(Currency::CHF),
        Just(Currency::CAD),
    ]
}

/// Strategy for invoice and rule amounts in minor units
pub fn amount_cents_strategy() -> impl Strategy<Value = i64> {
    0i64..100_000_000i64
}

/// Strategy for strictly positive amounts, as payments require
pub fn positive_amount_cents_strategy() -> impl Strategy<Value = i64> {
    1i64..100_000_000i64
}

/// Strategy for deposit shares
pub fn deposit_percent_strategy() -> impl Strategy<Value = i64> {
    0i64..=100i64
}

/// Strategy for a recurring rule's billing day, including days that need clamping
pub fn day_of_month_strategy() -> impl Strategy<Value = u32> {
    1u32..=31u32
}

/// Strategy for calendar months between 2000 and 2099
pub fn year_month_strategy() -> impl Strategy<Value = YearMonth> {
    (2000i32..2100i32, 1u32..=12u32).prop_filter_map("valid month", |(y, m)| YearMonth::new(y, m).ok())
}

/// Strategy for payment timestamps in 2024
pub fn paid_at_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..366 * 24 * 3600).prop_map(|offset| {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(offset)
    })
}

pub fn payment_method_strategy() -> impl Strategy<Value = PaymentMethod> {
    prop_oneof![
        Just(PaymentMethod::BankTransfer),
        Just(PaymentMethod::Card),
        Just(PaymentMethod::Cash),
        Just(PaymentMethod::Check),
        Just(PaymentMethod::Other),
    ]
}

pub fn movement_type_strategy() -> impl Strategy<Value = MovementType> {
    prop_oneof![Just(MovementType::In), Just(MovementType::Out), Just(MovementType::Adjust)]
}

/// Strategy for a non-zero movement quantity with a sign that fits its type
pub fn movement_strategy() -> impl Strategy<Value = (MovementType, i64)> {
    (movement_type_strategy(), 1i64..1_000i64, any::<bool>()).prop_map(|(kind, qty, negative)| {
        let quantity = if kind == MovementType::Adjust && negative { -qty } else { qty };
        (kind, quantity)
    })
}

/// Strategy for a valid discount pair
pub fn discount_strategy() -> impl Strategy<Value = (DiscountType, i64)> {
    prop_oneof![
        Just((DiscountType::None, 0)),
        (0i64..=100i64).prop_map(|v| (DiscountType::Percent, v)),
        (0i64..200_000i64).prop_map(|v| (DiscountType::Amount, v)),
    ]
}

/// Strategy for one tier of the price waterfall, unset half the time
pub fn optional_price_strategy() -> impl Strategy<Value = Option<i64>> {
    prop::option::weighted(0.5, 0i64..500_000i64)
}

/// Strategy for a service line; some lines have no price at any tier
pub fn pricing_line_strategy() -> impl Strategy<Value = PricingLineInput> {
    (
        "[A-Z][a-z]{3,12}",
        0i64..20i64,
        optional_price_strategy(),
        optional_price_strategy(),
        optional_price_strategy(),
        discount_strategy(),
        prop_oneof![4 => Just(BillingUnit::OneOff), 1 => Just(BillingUnit::Monthly)],
    )
        .prop_map(|(label, quantity, project, service, day, (discount_type, discount_value), unit)| {
            PricingLineInput {
                project_price_cents: project,
                service_price_cents: service,
                day_rate_cents: day,
                discount_type,
                discount_value,
                billing_unit: unit,
                ..PricingLineInput::new(label, quantity)
            }
        })
}

/// Strategy for the lines of one project
pub fn pricing_lines_strategy(max: usize) -> impl Strategy<Value = Vec<PricingLineInput>> {
    prop::collection::vec(pricing_line_strategy(), 0..=max)
}

/// Strategy for a run of payments against one invoice
pub fn payment_amounts_strategy(max: usize) -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(1i64..5_000_000i64, 1..=max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, NaiveDate};
    use core_kernel::BusinessId;
    use domain_billing::{
        compute_project_pricing, derive, FinanceEntryType, Invoice, Payment, PaymentAggregate, PaymentStatus,
        RecurringRule,
    };

    proptest! {
        #[test]
        fn generated_lines_always_price(lines in pricing_lines_strategy(8), deposit in deposit_percent_strategy()) {
            let pricing = compute_project_pricing(&lines, deposit, Currency::EUR).unwrap();
            prop_assert_eq!(pricing.deposit_cents + pricing.balance_cents, pricing.total_cents);
            prop_assert!(pricing.monthly_cents <= pricing.total_cents);
        }

        #[test]
        fn movements_have_nonzero_quantity((kind, quantity) in movement_strategy()) {
            prop_assert!(quantity != 0);
            if kind != MovementType::Adjust {
                prop_assert!(quantity > 0);
            }
        }

        #[test]
        fn reconciliation_sums_every_payment(
            currency in currency_strategy(),
            total in amount_cents_strategy(),
            amounts in payment_amounts_strategy(6),
            paid_at in paid_at_strategy(),
            method in payment_method_strategy(),
        ) {
            let invoice = Invoice::new(BusinessId::new(), None, currency, total);
            let payments: Vec<Payment> = amounts
                .iter()
                .map(|&amount| Payment::new(&invoice, amount, paid_at, method))
                .collect();
            let summary = derive(&invoice, Some(&PaymentAggregate::from_payments(invoice.id, &payments)));

            let paid: i64 = amounts.iter().sum();
            prop_assert_eq!(summary.paid_cents, paid);
            prop_assert_eq!(summary.remaining_cents, (total - paid).max(0));
            prop_assert_eq!(summary.payment_count, amounts.len() as i64);
            prop_assert_eq!(summary.last_paid_at, Some(paid_at));
        }

        #[test]
        fn any_payment_moves_invoice_off_unpaid(
            total in amount_cents_strategy(),
            amount in positive_amount_cents_strategy(),
        ) {
            let invoice = Invoice::new(BusinessId::new(), None, Currency::EUR, total);
            let payment = Payment::new(&invoice, amount, Utc::now(), PaymentMethod::Card);
            let summary = derive(&invoice, Some(&PaymentAggregate::from_payments(invoice.id, [&payment])));
            prop_assert_ne!(summary.status, PaymentStatus::Unpaid);
        }

        #[test]
        fn occurrence_stays_inside_its_month(day in day_of_month_strategy(), month in year_month_strategy()) {
            let start = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
            let rule = RecurringRule::monthly(
                BusinessId::new(),
                FinanceEntryType::Expense,
                1_000,
                Currency::EUR,
                "rent",
                "Office rent",
                start,
                day,
            )
            .unwrap();
            let date = rule.occurrence_date(month).unwrap();
            prop_assert_eq!(YearMonth::from_date(date), month);
            prop_assert!(date.day() <= day);
        }

        #[test]
        fn generated_months_are_in_range(month in year_month_strategy()) {
            prop_assert!((1..=12).contains(&month.month()));
        }
    }
}
