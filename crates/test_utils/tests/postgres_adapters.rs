//! Postgres adapter tests
//!
//! Each test starts its own container, so they are ignored by default.
//! Run with `cargo test -p test_utils -- --ignored` on a host with Docker.

use core_kernel::{AdapterHealth, InsertOutcome};
use domain_billing::{
    BillingSettings, BillingStore, EntrySource, InvoiceStatus, LedgerAccount, MovementType, PaymentInput,
    PaymentMethod, PaymentStatus,
};
use test_utils::{
    assert_entry_balanced, assert_summary_consistent, db_test, AmountFixtures, ProjectFixtures,
    TemporalFixtures, TestInvoiceBuilder, TestQuoteBuilder, TestRuleBuilder, TestStockBuilder,
};

db_test!(test_migrations_apply_and_adapters_are_healthy, |db| {
    let service = db.service(BillingSettings::default());
    let health = service.health().await;
    assert_eq!(health.len(), 2);
    assert!(health.iter().all(|h| h.status == AdapterHealth::Healthy));
});

db_test!(test_project_round_trips_through_reads, |db| {
    let project = ProjectFixtures::branding_project();
    db.seed_project(&project).await.unwrap();
    let service = db.service(BillingSettings::default());

    let pricing = service
        .compute_project_pricing(project.business_id, project.project_id)
        .await
        .unwrap()
        .expect("seeded project");

    assert_eq!(pricing.total_cents, ProjectFixtures::branding_total());
    assert_eq!(pricing.lines.len(), 2);
    assert_eq!(pricing.lines[0].label, "Logo package");
});

db_test!(test_payments_settle_invoice_and_write_one_mirror, |db| {
    let project = ProjectFixtures::branding_project();
    let quote = TestQuoteBuilder::for_project(&project)
        .with_total(20_000)
        .signed_at(TemporalFixtures::now())
        .build();
    let invoice = TestInvoiceBuilder::for_project(&project).with_total(20_000).build();
    db.seed_project(&project).await.unwrap();
    db.seed_quote(&quote).await.unwrap();
    db.seed_invoice(&invoice).await.unwrap();
    let service = db.service(BillingSettings::default());

    for amount_cents in [5_000, 15_000] {
        service
            .record_payment(
                invoice.id,
                PaymentInput {
                    amount_cents,
                    paid_at: TemporalFixtures::paid_at(),
                    method: PaymentMethod::BankTransfer,
                    note: Some("wire".to_string()),
                },
            )
            .await
            .unwrap();
    }

    let summary = service
        .compute_project_billing_summary(project.business_id, project.project_id)
        .await
        .unwrap()
        .expect("quote basis");
    assert_summary_consistent(&summary);
    assert_eq!(summary.already_paid_cents, 20_000);
    assert_eq!(summary.invoices[0].status, PaymentStatus::Paid);
    assert_eq!(summary.invoices[0].payment_count, 2);

    let store = infra_db::PostgresBillingStore::new(db.pool.clone());
    let mut tx = store.begin().await.unwrap();
    let stored = tx.get_invoice(invoice.id).await.unwrap().unwrap();
    let mirror = tx
        .find_entry_by_source(&EntrySource::Invoice { invoice_id: invoice.id })
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(stored.status, InvoiceStatus::Paid);
    assert_eq!(mirror.map(|m| m.amount_cents), Some(20_000));
});

db_test!(test_legacy_backfill_is_idempotent, |db| {
    let invoice = TestInvoiceBuilder::new()
        .legacy_paid_at(TemporalFixtures::paid_at())
        .build();
    db.seed_invoice(&invoice).await.unwrap();
    let service = db.service(BillingSettings::default());

    let first = service.backfill_legacy_payments(invoice.business_id).await.unwrap();
    let again = service.ensure_legacy_payment_row(&invoice).await.unwrap();

    assert_eq!(first.created, 1);
    assert_eq!(again, InsertOutcome::AlreadyExists);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE invoice_id = $1")
        .bind(invoice.id.as_uuid())
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
});

db_test!(test_rule_generation_keeps_one_row_per_month, |db| {
    let rule = TestRuleBuilder::new().on_day(31).build();
    let store = infra_db::PostgresBillingStore::new(db.pool.clone());
    let mut tx = store.begin().await.unwrap();
    assert_eq!(tx.insert_rule(&rule).await.unwrap(), InsertOutcome::Created);
    tx.commit().await.unwrap();
    let service = db.service(BillingSettings::default());

    let first = service.generate_rule_occurrences(rule.id, Some(3)).await.unwrap();
    let second = service.generate_rule_occurrences(rule.id, Some(3)).await.unwrap();

    assert_eq!(first.created, 4);
    assert_eq!((second.created, second.existing), (0, 4));

    let rows: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM finance_entries WHERE recurring_rule_id = $1 AND deleted_at IS NULL",
    )
    .bind(rule.id.as_uuid())
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert_eq!(rows, 4);
});

db_test!(test_movement_posting_is_idempotent, |db| {
    let stock = TestStockBuilder::new();
    let sale = stock.movement(MovementType::Out, 3);
    let service = db.service(BillingSettings::default());

    let first = service
        .record_inventory_movement(&sale, stock.product(), None)
        .await
        .unwrap();
    let second = service
        .record_inventory_movement(&sale, stock.product(), None)
        .await
        .unwrap();

    assert_entry_balanced(&first.entry);
    assert_eq!(second.movement, InsertOutcome::AlreadyExists);
    assert_eq!(first.entry.id, second.entry.id);
    assert_eq!(
        second.entry.net_for(LedgerAccount::AccountsReceivable),
        3 * AmountFixtures::unit_sale()
    );

    let entries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ledger_entries WHERE business_id = $1")
        .bind(sale.business_id.as_uuid())
        .fetch_one(db.pool())
        .await
        .unwrap();
    let mirrors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM finance_entries WHERE inventory_movement_id = $1")
        .bind(sale.id.as_uuid())
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!((entries, mirrors), (1, 1));
});
