//! Project billing summary
//!
//! Combines the project's billing basis (a signed quote, or its priced
//! service lines) with what has been invoiced and collected so far.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use core_kernel::money::minor_units;
use core_kernel::{BusinessId, ClientId, Currency, InvoiceId, Money, ProjectId, QuoteId};

use crate::error::BillingError;
use crate::invoice::Invoice;
use crate::payment::PaymentAggregate;
use crate::pricing::{compute_project_pricing, MissingPriceDiagnostic};
use crate::project::ProjectBillingContext;
use crate::quote::Quote;
use crate::reconciliation::{derive, InvoicePaymentSummary};

/// Where the summary's totals come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingBasisSource {
    Quote,
    Pricing,
}

/// Project-level reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingSummary {
    pub business_id: BusinessId,
    pub project_id: ProjectId,
    pub client_id: Option<ClientId>,
    pub currency: Currency,
    pub source: BillingBasisSource,
    pub reference_quote_id: Option<QuoteId>,
    #[serde(with = "minor_units")]
    pub total_cents: i64,
    #[serde(with = "minor_units")]
    pub deposit_cents: i64,
    #[serde(with = "minor_units")]
    pub balance_cents: i64,
    #[serde(with = "minor_units")]
    pub already_invoiced_cents: i64,
    #[serde(with = "minor_units")]
    pub already_paid_cents: i64,
    #[serde(with = "minor_units")]
    pub remaining_to_invoice_cents: i64,
    #[serde(with = "minor_units")]
    pub remaining_to_collect_cents: i64,
    pub invoices: Vec<InvoicePaymentSummary>,
    pub missing_prices: Vec<MissingPriceDiagnostic>,
}

/// Picks the quote that serves as the billing basis
///
/// The project's `billing_quote_id` wins when it names a signed quote of this
/// project. Otherwise the most recently issued signed quote, ties broken by
/// the higher id.
pub fn select_reference_quote<'a>(
    project: &ProjectBillingContext,
    quotes: &'a [Quote],
) -> Option<&'a Quote> {
    let eligible = |q: &&Quote| q.is_signed() && q.project_id == project.project_id;

    let explicit = project
        .billing_quote_id
        .and_then(|id| quotes.iter().filter(eligible).find(|q| q.id == id));
    if explicit.is_some() {
        return explicit;
    }
    if let Some(id) = project.billing_quote_id {
        debug!(quote_id = %id, "billing_quote_id is not a signed quote of this project");
    }

    quotes
        .iter()
        .filter(eligible)
        .max_by(|a, b| a.issued_at.cmp(&b.issued_at).then_with(|| a.id.cmp(&b.id)))
}

/// Builds the summary from already-loaded records
///
/// `aggregates` holds one entry per invoice with live payments; invoices
/// missing from it have none. Returns `None` when the project has neither a
/// reference quote nor any service line.
///
/// # Errors
///
/// `Validation` from pricing the service lines, `Money(Overflow)` if sums
/// leave the `i64` range.
pub fn summarize(
    project: &ProjectBillingContext,
    quotes: &[Quote],
    invoices: &[Invoice],
    aggregates: &[PaymentAggregate],
) -> Result<Option<BillingSummary>, BillingError> {
    let reference = select_reference_quote(project, quotes);

    let (source, currency, total_cents, deposit_cents, balance_cents, missing_prices) = match reference {
        Some(quote) => (
            BillingBasisSource::Quote,
            quote.currency,
            quote.total_cents,
            quote.deposit_cents,
            quote.balance_cents,
            Vec::new(),
        ),
        None if project.service_lines.is_empty() => return Ok(None),
        None => {
            let pricing = compute_project_pricing(
                &project.service_lines,
                project.default_deposit_percent,
                project.currency,
            )?;
            (
                BillingBasisSource::Pricing,
                pricing.currency,
                pricing.total_cents,
                pricing.deposit_cents,
                pricing.balance_cents,
                pricing.missing_prices,
            )
        }
    };

    let by_invoice: HashMap<InvoiceId, &PaymentAggregate> =
        aggregates.iter().map(|a| (a.invoice_id, a)).collect();

    let mut invoice_summaries = Vec::new();
    let mut already_invoiced = Money::zero(currency);
    let mut already_paid = Money::zero(currency);
    for invoice in invoices.iter().filter(|i| !i.is_cancelled()) {
        if invoice.currency != currency {
            warn!(
                invoice_id = %invoice.id,
                invoice_currency = %invoice.currency,
                %currency,
                "Skipping invoice in a different currency"
            );
            continue;
        }
        let summary = derive(invoice, by_invoice.get(&invoice.id).copied());
        already_invoiced =
            already_invoiced.checked_add(&Money::from_minor(invoice.total_cents, currency))?;
        already_paid = already_paid.checked_add(&Money::from_minor(summary.paid_cents, currency))?;
        invoice_summaries.push(summary);
    }

    let already_invoiced = already_invoiced.amount_minor();
    let already_paid = already_paid.amount_minor();
    Ok(Some(BillingSummary {
        business_id: project.business_id,
        project_id: project.project_id,
        client_id: project.client_id,
        currency,
        source,
        reference_quote_id: reference.map(|q| q.id),
        total_cents,
        deposit_cents,
        balance_cents,
        already_invoiced_cents: already_invoiced,
        already_paid_cents: already_paid,
        remaining_to_invoice_cents: total_cents.saturating_sub(already_invoiced).max(0),
        remaining_to_collect_cents: already_invoiced.saturating_sub(already_paid).max(0),
        invoices: invoice_summaries,
        missing_prices,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::InvoiceStatus;
    use crate::payment::{Payment, PaymentMethod};
    use crate::pricing::PricingLineInput;
    use chrono::{Duration, Utc};

    fn project() -> ProjectBillingContext {
        ProjectBillingContext::new(BusinessId::new(), ProjectId::new(), Currency::EUR)
    }

    fn signed_quote(project: &ProjectBillingContext, total: i64, issued_days_ago: i64) -> Quote {
        let mut q = Quote::with_total(project.business_id, project.project_id, Currency::EUR, total, 30);
        q.sign(Utc::now() - Duration::days(issued_days_ago)).unwrap();
        q
    }

    #[test]
    fn test_explicit_billing_quote_wins() {
        let mut p = project();
        let older = signed_quote(&p, 5_000, 30);
        let newer = signed_quote(&p, 8_000, 1);
        p.billing_quote_id = Some(older.id);

        let quotes = [older.clone(), newer];
        assert_eq!(select_reference_quote(&p, &quotes).map(|q| q.id), Some(older.id));
    }

    #[test]
    fn test_unsigned_or_foreign_billing_quote_falls_back() {
        let mut p = project();
        let draft = Quote::with_total(p.business_id, p.project_id, Currency::EUR, 1_000, 0);
        let mut foreign = signed_quote(&project(), 9_000, 0);
        foreign.business_id = p.business_id;
        let signed = signed_quote(&p, 4_000, 10);

        p.billing_quote_id = Some(draft.id);
        let quotes = [draft.clone(), foreign.clone(), signed.clone()];
        assert_eq!(select_reference_quote(&p, &quotes).map(|q| q.id), Some(signed.id));

        p.billing_quote_id = Some(foreign.id);
        assert_eq!(select_reference_quote(&p, &quotes).map(|q| q.id), Some(signed.id));
    }

    #[test]
    fn test_latest_issued_quote_ties_broken_by_id() {
        let p = project();
        let at = Utc::now();
        let mut a = Quote::with_total(p.business_id, p.project_id, Currency::EUR, 1_000, 0);
        let mut b = Quote::with_total(p.business_id, p.project_id, Currency::EUR, 2_000, 0);
        a.sign(at).unwrap();
        b.sign(at).unwrap();

        let expected = a.id.max(b.id);
        let quotes = [a, b];
        assert_eq!(select_reference_quote(&p, &quotes).map(|q| q.id), Some(expected));
    }

    #[test]
    fn test_summary_from_quote() {
        let p = project();
        let quote = signed_quote(&p, 10_000, 1);

        let mut first = Invoice::new(p.business_id, Some(p.project_id), Currency::EUR, 3_000);
        first.status = InvoiceStatus::Sent;
        let mut cancelled = Invoice::new(p.business_id, Some(p.project_id), Currency::EUR, 7_000);
        cancelled.status = InvoiceStatus::Cancelled;
        let second = Invoice::new(p.business_id, Some(p.project_id), Currency::EUR, 4_000);

        let payments = [Payment::new(&first, 1_000, Utc::now(), PaymentMethod::Card)];
        let aggregate = PaymentAggregate::from_payments(first.id, &payments);

        let summary = summarize(&p, &[quote.clone()], &[first, cancelled, second], &[aggregate])
            .unwrap()
            .unwrap();

        assert_eq!(summary.source, BillingBasisSource::Quote);
        assert_eq!(summary.reference_quote_id, Some(quote.id));
        assert_eq!(summary.total_cents, 10_000);
        assert_eq!(summary.already_invoiced_cents, 7_000);
        assert_eq!(summary.already_paid_cents, 1_000);
        assert_eq!(summary.remaining_to_invoice_cents, 3_000);
        assert_eq!(summary.remaining_to_collect_cents, 6_000);
        assert_eq!(summary.invoices.len(), 2);
    }

    #[test]
    fn test_summary_from_pricing() {
        let mut p = project();
        p.default_deposit_percent = 50;
        p.service_lines = vec![PricingLineInput {
            service_price_cents: Some(1_005),
            ..PricingLineInput::new("Audit", 1)
        }];

        let summary = summarize(&p, &[], &[], &[]).unwrap().unwrap();
        assert_eq!(summary.source, BillingBasisSource::Pricing);
        assert_eq!(summary.total_cents, 1_005);
        assert_eq!(summary.deposit_cents, 503);
        assert_eq!(summary.remaining_to_invoice_cents, 1_005);
        assert_eq!(summary.remaining_to_collect_cents, 0);
    }

    #[test]
    fn test_no_basis_is_none() {
        assert!(summarize(&project(), &[], &[], &[]).unwrap().is_none());
    }

    #[test]
    fn test_over_invoicing_clamps_remaining() {
        let p = project();
        let quote = signed_quote(&p, 1_000, 1);
        let invoice = Invoice::new(p.business_id, Some(p.project_id), Currency::EUR, 1_500);

        let summary = summarize(&p, &[quote], &[invoice], &[]).unwrap().unwrap();
        assert_eq!(summary.remaining_to_invoice_cents, 0);
        assert_eq!(summary.remaining_to_collect_cents, 1_500);
    }
}
