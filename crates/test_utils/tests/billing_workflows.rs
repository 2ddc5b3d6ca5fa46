//! End-to-end billing workflows over the in-memory store
//!
//! These tests drive a project from pricing through collection, and a
//! business through a quarter of recurring costs and stock movements.

use core_kernel::Currency;
use domain_billing::{
    BillingBasisSource, InvoiceStatus, LedgerAccount, MovementType, PaymentInput, PaymentMethod,
    PaymentStatus, Quote,
};
use test_utils::{
    assert_entry_balanced, assert_invoice_summary_consistent, assert_occurrence_months,
    assert_one_occurrence_per_month, assert_pricing_split, assert_reverses, assert_summary_consistent,
    AmountFixtures, LineFixtures, ProjectFixtures, ServiceFixtures, TemporalFixtures, TestInvoiceBuilder,
    TestProjectBuilder, TestQuoteBuilder, TestRuleBuilder, TestStockBuilder,
};

mod project_to_cash {
    use super::*;

    #[tokio::test]
    async fn test_priced_project_is_quoted_invoiced_and_collected() {
        let (service, store) = ServiceFixtures::in_memory();
        let project = ProjectFixtures::branding_project();
        store.seed_project(project.clone()).await;

        let pricing = service
            .compute_project_pricing(project.business_id, project.project_id)
            .await
            .unwrap()
            .expect("project exists");
        assert_pricing_split(&pricing);
        assert_eq!(pricing.total_cents, ProjectFixtures::branding_total());

        let mut quote = Quote::from_pricing(project.business_id, project.project_id, None, &pricing);
        quote.send(TemporalFixtures::now()).unwrap();
        quote.sign(TemporalFixtures::now()).unwrap();
        store.seed_quote(quote.clone()).await;

        let deposit = TestInvoiceBuilder::for_project(&project)
            .with_total(quote.deposit_cents)
            .build();
        store.seed_invoice(deposit.clone()).await;

        let paid = service
            .record_payment(
                deposit.id,
                PaymentInput {
                    amount_cents: quote.deposit_cents,
                    paid_at: TemporalFixtures::paid_at(),
                    method: PaymentMethod::BankTransfer,
                    note: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(paid.status, PaymentStatus::Paid);
        assert_invoice_summary_consistent(&paid);

        let summary = service
            .compute_project_billing_summary(project.business_id, project.project_id)
            .await
            .unwrap()
            .expect("signed quote is a basis");
        assert_summary_consistent(&summary);
        assert_eq!(summary.source, BillingBasisSource::Quote);
        assert_eq!(summary.reference_quote_id, Some(quote.id));
        assert_eq!(summary.already_invoiced_cents, quote.deposit_cents);
        assert_eq!(summary.already_paid_cents, quote.deposit_cents);
        assert_eq!(summary.remaining_to_invoice_cents, quote.balance_cents);
        assert_eq!(summary.remaining_to_collect_cents, 0);

        let state = store.snapshot().await;
        assert_eq!(state.invoices[&deposit.id].status, InvoiceStatus::Paid);
        assert_eq!(state.live_finance_entries().count(), 1);
    }

    #[tokio::test]
    async fn test_unpriced_line_is_reported_not_fatal() {
        let (service, store) = ServiceFixtures::in_memory();
        let project = TestProjectBuilder::new()
            .with_line(LineFixtures::logo_package())
            .with_line(LineFixtures::unpriced())
            .build();
        store.seed_project(project.clone()).await;

        let summary = service
            .compute_project_billing_summary(project.business_id, project.project_id)
            .await
            .unwrap()
            .expect("pricing is a basis");

        assert_eq!(summary.source, BillingBasisSource::Pricing);
        assert_eq!(summary.total_cents, AmountFixtures::logo_package());
        assert_eq!(summary.missing_prices.len(), 1);
        assert_eq!(summary.missing_prices[0].line_index, 1);
    }

    #[tokio::test]
    async fn test_two_partial_payments_settle_an_invoice() {
        let (service, store) = ServiceFixtures::in_memory();
        let project = TestProjectBuilder::new().build();
        let quote = TestQuoteBuilder::for_project(&project)
            .with_total(10_000)
            .signed_at(TemporalFixtures::now())
            .build();
        let invoice = TestInvoiceBuilder::for_project(&project).with_total(10_000).build();
        store.seed_project(project).await;
        store.seed_quote(quote).await;
        store.seed_invoice(invoice.clone()).await;

        let input = |amount_cents| PaymentInput {
            amount_cents,
            paid_at: TemporalFixtures::paid_at(),
            method: PaymentMethod::Card,
            note: None,
        };
        let first = service.record_payment(invoice.id, input(4_000)).await.unwrap();
        assert_eq!(first.status, PaymentStatus::Partial);
        assert_eq!(first.remaining_cents, 6_000);

        let second = service.record_payment(invoice.id, input(6_000)).await.unwrap();
        assert_eq!(second.status, PaymentStatus::Paid);
        assert_eq!(second.payment_count, 2);
    }

    #[tokio::test]
    async fn test_pinned_quote_wins_and_stray_invoices_are_left_out() {
        let (service, store) = ServiceFixtures::in_memory();
        let mut project = TestProjectBuilder::new()
            .with_currency(Currency::GBP)
            .with_deposit_percent(50)
            .build();
        let pinned = TestQuoteBuilder::for_project(&project)
            .with_total(30_000)
            .signed_at(TemporalFixtures::paid_at())
            .build();
        let newer = TestQuoteBuilder::for_project(&project)
            .with_total(90_000)
            .signed_at(TemporalFixtures::now())
            .build();
        project.billing_quote_id = Some(pinned.id);

        let counted = TestInvoiceBuilder::for_project(&project).with_total(10_000).build();
        let voided = TestInvoiceBuilder::for_project(&project)
            .with_total(5_000)
            .with_status(InvoiceStatus::Cancelled)
            .build();
        let foreign = TestInvoiceBuilder::for_project(&project)
            .with_currency(Currency::EUR)
            .with_total(7_000)
            .build();
        store.seed_project(project.clone()).await;
        store.seed_quote(pinned.clone()).await;
        store.seed_quote(newer).await;
        for invoice in [counted.clone(), voided, foreign] {
            store.seed_invoice(invoice).await;
        }

        let summary = service
            .compute_project_billing_summary(project.business_id, project.project_id)
            .await
            .unwrap()
            .expect("pinned quote is a basis");

        assert_summary_consistent(&summary);
        assert_eq!(summary.currency, Currency::GBP);
        assert_eq!(summary.reference_quote_id, Some(pinned.id));
        assert_eq!(summary.total_cents, 30_000);
        assert_eq!(summary.already_invoiced_cents, 10_000);
        assert_eq!(summary.remaining_to_invoice_cents, 20_000);
        assert_eq!(summary.remaining_to_collect_cents, 10_000);
        assert_eq!(summary.invoices.len(), 1);
        assert_eq!(summary.invoices[0].invoice_id, counted.id);
    }

    #[tokio::test]
    async fn test_legacy_invoices_are_backfilled_once() {
        let (service, store) = ServiceFixtures::in_memory();
        let legacy = TestInvoiceBuilder::new()
            .legacy_paid_at(TemporalFixtures::paid_at())
            .build();
        let business = legacy.business_id;
        store.seed_invoice(legacy).await;
        store
            .seed_invoice(TestInvoiceBuilder::new().with_business(business).build())
            .await;

        let first = service.backfill_legacy_payments(business).await.unwrap();
        let second = service.backfill_legacy_payments(business).await.unwrap();

        assert_eq!((first.scanned, first.created), (1, 1));
        assert_eq!((second.scanned, second.created), (0, 0));
        assert_eq!(store.snapshot().await.live_payments().count(), 1);
    }
}

mod recurring_costs {
    use super::*;

    #[tokio::test]
    async fn test_generation_covers_current_month_through_horizon() {
        let (service, store) = ServiceFixtures::in_memory();
        let rule = TestRuleBuilder::new().on_day(31).build();
        store.seed_rule(rule.clone()).await;

        let report = service.generate_rule_occurrences(rule.id, Some(2)).await.unwrap();
        assert_eq!(report.created, 3);

        let state = store.snapshot().await;
        let occurrences = state.rule_occurrences(rule.id);
        assert_occurrence_months(
            &occurrences,
            &[
                TemporalFixtures::month(2024, 3),
                TemporalFixtures::month(2024, 4),
                TemporalFixtures::month(2024, 5),
            ],
        );
        assert_eq!(occurrences[1].date, TemporalFixtures::date(2024, 4, 30));
        assert_one_occurrence_per_month(state.finance_entries.values());
    }

    #[tokio::test]
    async fn test_rule_ending_mid_horizon_stops_there() {
        let (service, store) = ServiceFixtures::in_memory();
        let rule = TestRuleBuilder::new()
            .ending(TemporalFixtures::date(2024, 4, 15))
            .build();
        store.seed_rule(rule.clone()).await;

        let report = service.generate_rule_occurrences(rule.id, Some(3)).await.unwrap();

        assert_eq!(report.created, 2);
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test]
    async fn test_rule_starting_later_skips_earlier_months() {
        let (service, store) = ServiceFixtures::in_memory();
        let rule = TestRuleBuilder::new()
            .starting(TemporalFixtures::date(2024, 5, 1))
            .build();
        store.seed_rule(rule.clone()).await;

        let report = service.generate_rule_occurrences(rule.id, Some(3)).await.unwrap();

        assert_eq!((report.created, report.skipped), (2, 2));
        assert_occurrence_months(
            &store.snapshot().await.rule_occurrences(rule.id),
            &[TemporalFixtures::month(2024, 5), TemporalFixtures::month(2024, 6)],
        );
    }

    #[tokio::test]
    async fn test_toggled_off_rule_generates_nothing_until_reactivated() {
        let (service, store) = ServiceFixtures::in_memory();
        let rule = TestRuleBuilder::new().build();
        store.seed_rule(rule.clone()).await;

        let paused = service.toggle_recurring_rule(rule.id).await.unwrap();
        assert!(!paused.is_active);
        let idle = service.generate_rule_occurrences(rule.id, Some(1)).await.unwrap();
        assert_eq!(idle.created, 0);

        let resumed = service.toggle_recurring_rule(rule.id).await.unwrap();
        assert!(resumed.is_active);
        let report = service.generate_rule_occurrences(rule.id, Some(1)).await.unwrap();
        assert_eq!(report.created, 2);
    }

    #[tokio::test]
    async fn test_inactive_rule_stays_empty() {
        let (service, store) = ServiceFixtures::in_memory();
        let rule = TestRuleBuilder::new().inactive().build();
        store.seed_rule(rule.clone()).await;

        service.generate_rule_occurrences(rule.id, Some(3)).await.unwrap();

        assert!(store.snapshot().await.rule_occurrences(rule.id).is_empty());
    }

    #[tokio::test]
    async fn test_rules_for_several_businesses_stay_apart() {
        let (service, store) = ServiceFixtures::in_memory();
        let rent = TestRuleBuilder::new().build();
        let retainer = TestRuleBuilder::new().income().with_amount(80_000).on_day(5).build();
        store.seed_rule(rent.clone()).await;
        store.seed_rule(retainer.clone()).await;

        service.generate_rule_occurrences(rent.id, Some(1)).await.unwrap();
        service.generate_rule_occurrences(retainer.id, Some(1)).await.unwrap();
        service.generate_rule_occurrences(rent.id, Some(1)).await.unwrap();

        let state = store.snapshot().await;
        assert_eq!(state.rule_occurrences(rent.id).len(), 2);
        assert_eq!(state.rule_occurrences(retainer.id).len(), 2);
        assert!(state
            .rule_occurrences(retainer.id)
            .iter()
            .all(|e| e.business_id == retainer.business_id && e.amount_cents == 80_000));
    }
}

mod stock_ledger {
    use super::*;

    #[tokio::test]
    async fn test_receipt_then_sale_then_reversal() {
        let (service, store) = ServiceFixtures::in_memory();
        let stock = TestStockBuilder::new();
        let receipt = stock.movement(MovementType::In, 5);
        let sale = stock.movement(MovementType::Out, 2);

        let received = service
            .record_inventory_movement(&receipt, stock.product(), None)
            .await
            .unwrap();
        let sold = service
            .record_inventory_movement(&sale, stock.product(), None)
            .await
            .unwrap();
        assert_entry_balanced(&received.entry);
        assert_entry_balanced(&sold.entry);
        assert_eq!(
            received.entry.net_for(LedgerAccount::Inventory),
            5 * AmountFixtures::unit_cost()
        );
        assert_eq!(
            sold.entry.net_for(LedgerAccount::SalesRevenue),
            -2 * AmountFixtures::unit_sale()
        );

        let reversal = service
            .reverse_ledger_entry(sold.entry.id, "Order cancelled", None)
            .await
            .unwrap();
        assert_reverses(&sold.entry, &reversal);

        let state = store.snapshot().await;
        assert_eq!(state.ledger_entries.len(), 3);
        assert_eq!(state.movements.len(), 2);
    }

    #[tokio::test]
    async fn test_unpriced_product_without_captured_cost_is_rejected() {
        let (service, store) = ServiceFixtures::in_memory();
        let stock = TestStockBuilder::new().without_prices();
        let receipt = stock.movement(MovementType::In, 1);

        let result = service
            .record_inventory_movement(&receipt, stock.product(), None)
            .await;

        assert!(result.is_err());
        let state = store.snapshot().await;
        assert!(state.movements.is_empty());
        assert!(state.ledger_entries.is_empty());
    }
}
