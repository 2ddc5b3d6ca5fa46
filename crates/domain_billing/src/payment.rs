//! Payment records
//!
//! Payments settle exactly one invoice and are soft-deleted rather than
//! removed. Per-invoice aggregates are what the reconciler consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use core_kernel::money::minor_units;
use core_kernel::{BusinessId, Currency, InvoiceId, PaymentId};

use crate::invoice::Invoice;

/// Payment method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Bank transfer
    #[default]
    BankTransfer,
    /// Card payment
    Card,
    /// Cash
    Cash,
    /// Check/cheque
    Check,
    /// Anything else, including backfilled rows
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Card => "card",
            PaymentMethod::Cash => "cash",
            PaymentMethod::Check => "check",
            PaymentMethod::Other => "other",
        }
    }
}

/// A payment record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Unique identifier
    pub id: PaymentId,
    /// Invoice being paid
    pub invoice_id: InvoiceId,
    /// Owning business
    pub business_id: BusinessId,
    /// Amount received
    #[serde(with = "minor_units")]
    pub amount_cents: i64,
    /// Currency of the amount
    pub currency: Currency,
    /// When the money arrived
    pub paid_at: DateTime<Utc>,
    /// Payment method
    pub method: PaymentMethod,
    /// Free-form note
    pub note: Option<String>,
    /// Row synthesised from an invoice's legacy `paid_at`
    pub is_legacy_backfill: bool,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Soft-delete timestamp
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// Creates a payment against an invoice
    ///
    /// # Arguments
    ///
    /// * `invoice` - Invoice being paid
    /// * `amount_cents` - Amount received in minor units
    /// * `paid_at` - When the money arrived
    /// * `method` - How it was paid
    pub fn new(invoice: &Invoice, amount_cents: i64, paid_at: DateTime<Utc>, method: PaymentMethod) -> Self {
        Self {
            id: PaymentId::new_v7(),
            invoice_id: invoice.id,
            business_id: invoice.business_id,
            amount_cents,
            currency: invoice.currency,
            paid_at,
            method,
            note: None,
            is_legacy_backfill: false,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    /// The payment row implied by a legacy paid invoice
    ///
    /// Returns `None` unless the invoice is PAID with a `paid_at`.
    pub fn legacy_backfill(invoice: &Invoice) -> Option<Self> {
        if !invoice.is_legacy_paid() {
            return None;
        }
        let paid_at = invoice.paid_at?;
        Some(Self {
            note: Some("Backfilled from invoice paid_at".to_string()),
            is_legacy_backfill: true,
            ..Self::new(invoice, invoice.total_cents, paid_at, PaymentMethod::Other)
        })
    }

    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn soft_delete(&mut self, at: DateTime<Utc>) {
        self.deleted_at.get_or_insert(at);
    }
}

/// Count, sum and latest date of the live payments of one invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAggregate {
    pub invoice_id: InvoiceId,
    pub count: i64,
    #[serde(with = "minor_units")]
    pub sum_cents: i64,
    pub last_paid_at: Option<DateTime<Utc>>,
}

impl PaymentAggregate {
    pub fn empty(invoice_id: InvoiceId) -> Self {
        Self {
            invoice_id,
            count: 0,
            sum_cents: 0,
            last_paid_at: None,
        }
    }

    /// Folds one payment in; soft-deleted rows are ignored
    pub fn include(&mut self, payment: &Payment) {
        if !payment.is_live() || payment.invoice_id != self.invoice_id {
            return;
        }
        self.count += 1;
        self.sum_cents = self.sum_cents.saturating_add(payment.amount_cents);
        self.last_paid_at = self.last_paid_at.max(Some(payment.paid_at));
    }

    pub fn from_payments<'a>(
        invoice_id: InvoiceId,
        payments: impl IntoIterator<Item = &'a Payment>,
    ) -> Self {
        let mut aggregate = Self::empty(invoice_id);
        for payment in payments {
            aggregate.include(payment);
        }
        aggregate
    }
}

/// Groups live payments by invoice
pub fn aggregate_by_invoice<'a>(
    payments: impl IntoIterator<Item = &'a Payment>,
) -> HashMap<InvoiceId, PaymentAggregate> {
    let mut by_invoice: HashMap<InvoiceId, PaymentAggregate> = HashMap::new();
    for payment in payments.into_iter().filter(|p| p.is_live()) {
        by_invoice
            .entry(payment.invoice_id)
            .or_insert_with(|| PaymentAggregate::empty(payment.invoice_id))
            .include(payment);
    }
    by_invoice
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn invoice() -> Invoice {
        Invoice::new(BusinessId::new(), None, Currency::EUR, 10_000)
    }

    #[test]
    fn test_aggregate_skips_deleted_rows() {
        let inv = invoice();
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let first = Payment::new(&inv, 3_000, t0, PaymentMethod::Card);
        let second = Payment::new(&inv, 3_000, t0 + Duration::days(3), PaymentMethod::Card);
        let mut withdrawn = Payment::new(&inv, 4_000, t0 + Duration::days(9), PaymentMethod::Cash);
        withdrawn.soft_delete(Utc::now());

        let aggregate = PaymentAggregate::from_payments(inv.id, [&first, &second, &withdrawn]);
        assert_eq!(aggregate.count, 2);
        assert_eq!(aggregate.sum_cents, 6_000);
        assert_eq!(aggregate.last_paid_at, Some(t0 + Duration::days(3)));
    }

    #[test]
    fn test_group_by_invoice() {
        let a = invoice();
        let b = invoice();
        let payments = vec![
            Payment::new(&a, 100, Utc::now(), PaymentMethod::Cash),
            Payment::new(&b, 250, Utc::now(), PaymentMethod::Cash),
            Payment::new(&a, 50, Utc::now(), PaymentMethod::Cash),
        ];

        let grouped = aggregate_by_invoice(&payments);
        assert_eq!(grouped[&a.id].sum_cents, 150);
        assert_eq!(grouped[&b.id].count, 1);
    }

    #[test]
    fn test_legacy_backfill_requires_paid_at() {
        let mut inv = invoice();
        assert!(Payment::legacy_backfill(&inv).is_none());

        let paid_at = Utc.with_ymd_and_hms(2021, 3, 2, 0, 0, 0).unwrap();
        inv.mark_paid(paid_at).unwrap();
        let row = Payment::legacy_backfill(&inv).unwrap();
        assert!(row.is_legacy_backfill);
        assert_eq!(row.amount_cents, 10_000);
        assert_eq!(row.paid_at, paid_at);
    }
}
