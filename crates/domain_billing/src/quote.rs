//! Quotes
//!
//! A quote is the priced offer sent to a client. Once signed it becomes the
//! authoritative billing basis of its project and can no longer change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::money::minor_units;
use core_kernel::{distribute_percent, BusinessId, ClientId, Currency, ProjectId, QuoteId};

use crate::error::BillingError;
use crate::pricing::ProjectPricing;

/// Quote status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteStatus {
    Draft,
    Sent,
    Signed,
    Rejected,
    Expired,
}

/// A quote issued for a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Unique identifier
    pub id: QuoteId,
    /// Owning business
    pub business_id: BusinessId,
    /// Project being quoted
    pub project_id: ProjectId,
    /// Client the quote is addressed to
    pub client_id: Option<ClientId>,
    /// Currency of every amount below
    pub currency: Currency,
    /// Quoted total
    #[serde(with = "minor_units")]
    pub total_cents: i64,
    /// Amount billed upfront
    #[serde(with = "minor_units")]
    pub deposit_cents: i64,
    /// Amount billed on delivery
    #[serde(with = "minor_units")]
    pub balance_cents: i64,
    /// Deposit share used to compute `deposit_cents`
    pub deposit_percent: i64,
    /// Lifecycle status
    pub status: QuoteStatus,
    /// When the quote was sent to the client
    pub issued_at: Option<DateTime<Utc>>,
    /// When the client accepted it
    pub signed_at: Option<DateTime<Utc>>,
}

impl Quote {
    /// Drafts a quote from a pricing result
    pub fn from_pricing(
        business_id: BusinessId,
        project_id: ProjectId,
        client_id: Option<ClientId>,
        pricing: &ProjectPricing,
    ) -> Self {
        Self {
            id: QuoteId::new_v7(),
            business_id,
            project_id,
            client_id,
            currency: pricing.currency,
            total_cents: pricing.total_cents,
            deposit_cents: pricing.deposit_cents,
            balance_cents: pricing.balance_cents,
            deposit_percent: pricing.deposit_percent,
            status: QuoteStatus::Draft,
            issued_at: None,
            signed_at: None,
        }
    }

    /// Drafts a quote from a bare total and deposit share
    pub fn with_total(
        business_id: BusinessId,
        project_id: ProjectId,
        currency: Currency,
        total_cents: i64,
        deposit_percent: i64,
    ) -> Self {
        let deposit_cents = distribute_percent(total_cents, deposit_percent);
        Self {
            id: QuoteId::new_v7(),
            business_id,
            project_id,
            client_id: None,
            currency,
            total_cents,
            deposit_cents,
            balance_cents: total_cents - deposit_cents,
            deposit_percent,
            status: QuoteStatus::Draft,
            issued_at: None,
            signed_at: None,
        }
    }

    pub fn is_signed(&self) -> bool {
        self.status == QuoteStatus::Signed
    }

    /// Marks the quote as sent
    pub fn send(&mut self, at: DateTime<Utc>) -> Result<(), BillingError> {
        match self.status {
            QuoteStatus::Draft | QuoteStatus::Sent => {
                self.status = QuoteStatus::Sent;
                self.issued_at.get_or_insert(at);
                Ok(())
            }
            QuoteStatus::Signed => Err(BillingError::conflict(format!("quote {} is signed", self.id))),
            other => Err(BillingError::invalid_transition(other, QuoteStatus::Sent)),
        }
    }

    /// Signs the quote; a signed quote can never be signed again
    ///
    /// # Errors
    ///
    /// - `Conflict` if the quote is already signed
    /// - `InvalidTransition` from REJECTED or EXPIRED
    /// - `Validation` if the amounts do not add up
    pub fn sign(&mut self, at: DateTime<Utc>) -> Result<(), BillingError> {
        match self.status {
            QuoteStatus::Signed => {
                Err(BillingError::conflict(format!("quote {} is already signed", self.id)))
            }
            QuoteStatus::Rejected | QuoteStatus::Expired => {
                Err(BillingError::invalid_transition(self.status, QuoteStatus::Signed))
            }
            QuoteStatus::Draft | QuoteStatus::Sent => {
                self.validate_amounts()?;
                self.status = QuoteStatus::Signed;
                self.issued_at.get_or_insert(at);
                self.signed_at = Some(at);
                Ok(())
            }
        }
    }

    /// Replaces the amounts of an unsigned quote
    pub fn reprice(&mut self, pricing: &ProjectPricing) -> Result<(), BillingError> {
        if self.is_signed() {
            return Err(BillingError::conflict(format!(
                "quote {} is signed and cannot be edited",
                self.id
            )));
        }
        self.currency = pricing.currency;
        self.total_cents = pricing.total_cents;
        self.deposit_cents = pricing.deposit_cents;
        self.balance_cents = pricing.balance_cents;
        self.deposit_percent = pricing.deposit_percent;
        Ok(())
    }

    /// Checks `deposit + balance == total`
    pub fn validate_amounts(&self) -> Result<(), BillingError> {
        let sum = self.deposit_cents.checked_add(self.balance_cents);
        if sum != Some(self.total_cents) {
            return Err(BillingError::validation(format!(
                "quote {}: deposit {} + balance {} != total {}",
                self.id, self.deposit_cents, self.balance_cents, self.total_cents
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> Quote {
        Quote::with_total(BusinessId::new(), ProjectId::new(), Currency::EUR, 10_000, 30)
    }

    #[test]
    fn test_with_total_splits_deposit() {
        let quote = draft();
        assert_eq!(quote.deposit_cents, 3_000);
        assert_eq!(quote.balance_cents, 7_000);
        assert!(quote.validate_amounts().is_ok());
    }

    #[test]
    fn test_sign_once() {
        let mut quote = draft();
        let at = Utc::now();
        quote.sign(at).unwrap();

        assert!(quote.is_signed());
        assert_eq!(quote.signed_at, Some(at));
        assert_eq!(quote.issued_at, Some(at));
        assert!(matches!(quote.sign(at), Err(BillingError::Conflict(_))));
    }

    #[test]
    fn test_signed_quote_is_immutable() {
        let mut quote = draft();
        quote.sign(Utc::now()).unwrap();

        let pricing = crate::pricing::compute_project_pricing(&[], 0, Currency::EUR).unwrap();
        assert!(matches!(quote.reprice(&pricing), Err(BillingError::Conflict(_))));
        assert!(matches!(quote.send(Utc::now()), Err(BillingError::Conflict(_))));
    }

    #[test]
    fn test_inconsistent_amounts_cannot_be_signed() {
        let mut quote = draft();
        quote.balance_cents += 1;
        assert!(matches!(quote.sign(Utc::now()), Err(BillingError::Validation(_))));
        assert_eq!(quote.status, QuoteStatus::Draft);
    }

    #[test]
    fn test_rejected_quote_cannot_be_signed() {
        let mut quote = draft();
        quote.status = QuoteStatus::Rejected;
        assert!(matches!(
            quote.sign(Utc::now()),
            Err(BillingError::InvalidTransition { .. })
        ));
    }
}
