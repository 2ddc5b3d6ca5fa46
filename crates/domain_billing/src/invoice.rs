//! Invoice lifecycle
//!
//! DRAFT → SENT → PAID, with CANCELLED reachable from DRAFT and SENT and
//! PAID → SENT when a payment reversal leaves the invoice short again.
//! Cancelled invoices are left out of every aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::money::minor_units;
use core_kernel::{BusinessId, ClientId, Currency, InvoiceId, ProjectId, QuoteId};

use crate::error::BillingError;

/// Invoice status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    /// Invoice is being drafted
    Draft,
    /// Invoice has been sent to the client
    Sent,
    /// Fully paid
    Paid,
    /// Voided
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Sent => "SENT",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Cancelled => "CANCELLED",
        }
    }
}

/// An invoice issued to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// Unique identifier
    pub id: InvoiceId,
    /// Owning business
    pub business_id: BusinessId,
    /// Project being billed, if any
    pub project_id: Option<ProjectId>,
    /// Client being billed
    pub client_id: Option<ClientId>,
    /// Quote this invoice was raised from
    pub quote_id: Option<QuoteId>,
    /// Invoice currency
    pub currency: Currency,
    /// Amount due
    #[serde(with = "minor_units")]
    pub total_cents: i64,
    /// Status
    pub status: InvoiceStatus,
    /// When the invoice was sent
    pub issued_at: Option<DateTime<Utc>>,
    /// Settlement date recorded on the invoice itself
    ///
    /// Invoices settled before payment rows existed carry only this field.
    pub paid_at: Option<DateTime<Utc>>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    /// Creates a draft invoice
    ///
    /// # Arguments
    ///
    /// * `business_id` - Owning business
    /// * `project_id` - Project being billed
    /// * `currency` - Invoice currency
    /// * `total_cents` - Amount due in minor units
    pub fn new(
        business_id: BusinessId,
        project_id: Option<ProjectId>,
        currency: Currency,
        total_cents: i64,
    ) -> Self {
        Self {
            id: InvoiceId::new_v7(),
            business_id,
            project_id,
            client_id: None,
            quote_id: None,
            currency,
            total_cents,
            status: InvoiceStatus::Draft,
            issued_at: None,
            paid_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == InvoiceStatus::Cancelled
    }

    /// True when the invoice was marked paid without payment rows
    pub fn is_legacy_paid(&self) -> bool {
        self.status == InvoiceStatus::Paid && self.paid_at.is_some()
    }

    /// Sends a draft invoice
    pub fn send(&mut self, at: DateTime<Utc>) -> Result<(), BillingError> {
        self.transition(InvoiceStatus::Sent)?;
        self.issued_at = Some(at);
        Ok(())
    }

    /// Marks the invoice as fully paid
    pub fn mark_paid(&mut self, at: DateTime<Utc>) -> Result<(), BillingError> {
        self.transition(InvoiceStatus::Paid)?;
        self.paid_at = Some(at);
        Ok(())
    }

    /// Reverts a paid invoice after a payment is withdrawn
    pub fn revert_to_sent(&mut self) -> Result<(), BillingError> {
        if self.status != InvoiceStatus::Paid {
            return Err(BillingError::invalid_transition(self.status, InvoiceStatus::Sent));
        }
        self.status = InvoiceStatus::Sent;
        self.paid_at = None;
        Ok(())
    }

    /// Cancels an unpaid invoice
    pub fn cancel(&mut self) -> Result<(), BillingError> {
        self.transition(InvoiceStatus::Cancelled)
    }

    fn transition(&mut self, to: InvoiceStatus) -> Result<(), BillingError> {
        use InvoiceStatus::*;
        let allowed = matches!(
            (self.status, to),
            (Draft, Sent) | (Draft, Paid) | (Sent, Paid) | (Draft, Cancelled) | (Sent, Cancelled)
        );
        if !allowed {
            return Err(BillingError::invalid_transition(self.status, to));
        }
        self.status = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(total: i64) -> Invoice {
        Invoice::new(BusinessId::new(), Some(ProjectId::new()), Currency::EUR, total)
    }

    #[test]
    fn test_happy_path() {
        let mut invoice = draft(10_000);
        let at = Utc::now();
        invoice.send(at).unwrap();
        assert_eq!(invoice.issued_at, Some(at));

        invoice.mark_paid(at).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert!(invoice.is_legacy_paid());
    }

    #[test]
    fn test_revert_clears_paid_at() {
        let mut invoice = draft(10_000);
        invoice.send(Utc::now()).unwrap();
        invoice.mark_paid(Utc::now()).unwrap();

        invoice.revert_to_sent().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Sent);
        assert!(invoice.paid_at.is_none());
    }

    #[test]
    fn test_paid_invoice_cannot_be_cancelled() {
        let mut invoice = draft(10_000);
        invoice.mark_paid(Utc::now()).unwrap();
        assert!(matches!(
            invoice.cancel(),
            Err(BillingError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_revert_requires_paid() {
        let mut invoice = draft(10_000);
        assert!(invoice.revert_to_sent().is_err());
        invoice.cancel().unwrap();
        assert!(invoice.is_cancelled());
        assert!(invoice.send(Utc::now()).is_err());
    }
}
