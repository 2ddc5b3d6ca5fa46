//! Billing Domain - Reconciliation, Recurring Rules and Inventory Ledger
//!
//! This crate computes what a project is worth, what has been invoiced and
//! collected against it, keeps recurring finance entries in step with their
//! rules, and posts double-entry records for inventory movements.
//!
//! # Components
//!
//! - **Pricing**: per-line price waterfall, discounts, deposit split
//! - **Reconciliation**: payment status of one invoice, legacy backfill
//! - **Summary**: project totals against invoices and payments
//! - **Recurring**: monthly occurrence generation and rule-change cascades
//! - **Ledger**: balanced, idempotent postings per inventory movement
//!
//! All amounts are `i64` minor units. Write paths take a `&mut dyn BillingTx`
//! owned by the caller; [`BillingService`] opens and completes one per
//! operation.
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_billing::{BillingService, BillingSettings};
//!
//! let service = BillingService::new(reads, store, BillingSettings::default());
//! if let Some(summary) = service.compute_project_billing_summary(business_id, project_id).await? {
//!     println!("{} left to collect", summary.remaining_to_collect_cents);
//! }
//! ```

pub mod account;
pub mod error;
pub mod finance_entry;
pub mod inventory;
pub mod invoice;
pub mod ledger;
pub mod payment;
pub mod ports;
pub mod pricing;
pub mod project;
pub mod quote;
pub mod reconciliation;
pub mod recurring;
pub mod service;
pub mod summary;
pub mod transaction;

pub use account::{AccountType, LedgerAccount};
pub use error::BillingError;
pub use finance_entry::{EntrySource, FinanceEntry, FinanceEntryType};
pub use inventory::{InventoryMovement, MovementType, Product};
pub use invoice::{Invoice, InvoiceStatus};
pub use ledger::{post_for_movement, reverse_entry, validate_balance, LedgerEntry, PosterOptions, PostingCache};
pub use payment::{Payment, PaymentAggregate, PaymentMethod};
pub use ports::{BillingReadPort, BillingStore, BillingTx};
pub use pricing::{
    compute_project_pricing, resolve_unit_price, BillingUnit, MissingPriceDiagnostic, PriceLine, PriceSource,
    PricingLineInput, ProjectPricing,
};
pub use project::ProjectBillingContext;
pub use quote::{Quote, QuoteStatus};
pub use reconciliation::{derive, ensure_legacy_payment_row, InvoicePaymentSummary, PaymentSource, PaymentStatus};
pub use recurring::{
    apply_rule_change, generate_occurrences, CascadeMode, CascadeOptions, GenerationReport, RecurringRule,
    RuleChangeOutcome, RuleFrequency, RulePatch, MAX_HORIZON_MONTHS,
};
pub use service::{
    BackfillReport, BillingService, BillingSettings, OccurrenceOverride, PaymentInput, RecordedMovement,
};
pub use summary::{BillingBasisSource, BillingSummary};
pub use transaction::{EntryDraft, LedgerLine, LedgerSide, LedgerSource, LedgerSourceType};
