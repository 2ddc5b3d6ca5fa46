//! Invoice payment reconciliation
//!
//! Derives how much of an invoice has been paid from its live payment rows.
//! Invoices settled before payment rows existed have none, only a PAID status
//! and a `paid_at` on the invoice; those read as fully paid on that date, and
//! [`ensure_legacy_payment_row`] can materialise the missing row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use core_kernel::money::minor_units;
use core_kernel::{InsertOutcome, InvoiceId};

use crate::error::BillingError;
use crate::invoice::Invoice;
use crate::payment::{Payment, PaymentAggregate};
use crate::ports::BillingTx;

/// Derived payment status of an invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Unpaid,
    Partial,
    Paid,
}

/// Where the paid amount came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSource {
    /// Live payment rows
    Payments,
    /// The invoice's own `paid_at`, no rows
    LegacyBackfill,
    /// Nothing paid
    None,
}

/// Reconciled view of one invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicePaymentSummary {
    pub invoice_id: InvoiceId,
    #[serde(with = "minor_units")]
    pub total_cents: i64,
    #[serde(with = "minor_units")]
    pub paid_cents: i64,
    #[serde(with = "minor_units")]
    pub remaining_cents: i64,
    pub status: PaymentStatus,
    pub last_paid_at: Option<DateTime<Utc>>,
    pub payment_count: i64,
    pub source: PaymentSource,
}

/// UNPAID at or below zero, PAID at or above the total, PARTIAL in between
pub fn status_for(total_cents: i64, paid_cents: i64) -> PaymentStatus {
    if paid_cents <= 0 {
        PaymentStatus::Unpaid
    } else if paid_cents >= total_cents {
        PaymentStatus::Paid
    } else {
        PaymentStatus::Partial
    }
}

/// Reconciles one invoice against its payment aggregate
///
/// Pass `None` (or an empty aggregate) when the invoice has no live payments.
/// Overpayment reads as PAID with nothing remaining.
pub fn derive(invoice: &Invoice, aggregate: Option<&PaymentAggregate>) -> InvoicePaymentSummary {
    let aggregate = aggregate
        .filter(|a| a.invoice_id == invoice.id)
        .copied()
        .unwrap_or_else(|| PaymentAggregate::empty(invoice.id));

    let (paid_cents, last_paid_at, source) = if aggregate.count > 0 {
        (aggregate.sum_cents, aggregate.last_paid_at, PaymentSource::Payments)
    } else if invoice.is_legacy_paid() {
        (invoice.total_cents, invoice.paid_at, PaymentSource::LegacyBackfill)
    } else {
        (0, None, PaymentSource::None)
    };

    InvoicePaymentSummary {
        invoice_id: invoice.id,
        total_cents: invoice.total_cents,
        paid_cents,
        remaining_cents: invoice.total_cents.saturating_sub(paid_cents).max(0),
        status: status_for(invoice.total_cents, paid_cents),
        last_paid_at,
        payment_count: aggregate.count,
        source,
    }
}

/// Writes the backfill payment row for a legacy paid invoice
///
/// A no-op returning `AlreadyExists` when any live payment exists or a
/// concurrent writer created the row first.
///
/// # Errors
///
/// `Validation` if the invoice is not PAID with a `paid_at`.
#[instrument(skip(tx, invoice), fields(invoice_id = %invoice.id))]
pub async fn ensure_legacy_payment_row(
    tx: &mut dyn BillingTx,
    invoice: &Invoice,
) -> Result<InsertOutcome, BillingError> {
    let row = Payment::legacy_backfill(invoice).ok_or_else(|| {
        BillingError::validation(format!(
            "invoice {} is {} without paid_at, nothing to backfill",
            invoice.id,
            invoice.status.as_str()
        ))
    })?;

    let existing = tx.payment_aggregate(invoice.id).await?;
    if existing.count > 0 {
        debug!(count = existing.count, "Invoice already has payments");
        return Ok(InsertOutcome::AlreadyExists);
    }

    let outcome = tx.insert_legacy_payment(&row).await?;
    if outcome.is_created() {
        info!(payment_id = %row.id, amount_cents = row.amount_cents, "Backfilled legacy payment");
    }
    Ok(outcome)
}
