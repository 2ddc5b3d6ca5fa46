//! Billing service facade
//!
//! Entry point for callers that do not manage transactions themselves. Read
//! operations go straight to the [`BillingReadPort`]; every write operation
//! opens one [`BillingTx`], runs the engine inside it and commits, or rolls
//! back on the first error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

use core_kernel::{
    BusinessId, Clock, FinanceEntryId, HealthCheckResult, InsertOutcome, InvoiceId, LedgerEntryId,
    PaymentId, ProjectId, RecurringRuleId, SystemClock, Timezone, UserId, YearMonth,
};

use crate::error::BillingError;
use crate::finance_entry::{EntrySource, FinanceEntry, FinanceEntryType};
use crate::inventory::{InventoryMovement, Product};
use crate::invoice::{Invoice, InvoiceStatus};
use crate::ledger::{self, LedgerEntry, PosterOptions, PostingCache};
use crate::payment::{Payment, PaymentMethod};
use crate::ports::{BillingReadPort, BillingStore, BillingTx};
use crate::pricing::{self, BillingUnit, ProjectPricing};
use crate::reconciliation::{self, status_for, InvoicePaymentSummary, PaymentStatus};
use crate::recurring::{
    self, CascadeOptions, GenerationReport, RecurringRule, RuleChangeOutcome, RulePatch,
    MAX_HORIZON_MONTHS,
};
use crate::summary::{self, BillingSummary};

/// Engine settings supplied by the host application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingSettings {
    /// Months generated ahead when a cascade does not name a horizon
    pub default_horizon_months: u32,
    /// Write INCOME/EXPENSE mirrors for inventory movements
    pub mirror_inventory_finance: bool,
    /// Decides which calendar month is "current"
    pub timezone: Timezone,
    /// Entries memoised per request by the ledger poster
    pub dedup_cache_capacity: usize,
}

impl Default for BillingSettings {
    fn default() -> Self {
        Self {
            default_horizon_months: 12,
            mirror_inventory_finance: true,
            timezone: Timezone::default(),
            dedup_cache_capacity: 256,
        }
    }
}

impl BillingSettings {
    pub fn validate(&self) -> Result<(), BillingError> {
        if self.default_horizon_months > MAX_HORIZON_MONTHS {
            return Err(BillingError::validation(format!(
                "default horizon of {} months exceeds the maximum of {}",
                self.default_horizon_months, MAX_HORIZON_MONTHS
            )));
        }
        Ok(())
    }
}

/// A payment to record against an invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct PaymentInput {
    #[serde(with = "core_kernel::money::minor_units")]
    #[validate(range(min = 1, message = "payment amount must be positive"))]
    pub amount_cents: i64,
    pub paid_at: DateTime<Utc>,
    pub method: PaymentMethod,
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

/// Manual edit of one rule occurrence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct OccurrenceOverride {
    #[serde(default, with = "core_kernel::money::option_minor_units")]
    #[validate(range(min = 0))]
    pub amount_cents: Option<i64>,
    #[validate(length(min = 1, max = 120))]
    pub category: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub label: Option<String>,
}

/// Counts from a legacy payment sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillReport {
    pub scanned: usize,
    pub created: usize,
    pub existing: usize,
}

/// Outcome of recording a movement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedMovement {
    pub movement: InsertOutcome,
    pub entry: LedgerEntry,
}

/// Commits on success, rolls back on error
async fn finish<T>(tx: Box<dyn BillingTx>, result: Result<T, BillingError>) -> Result<T, BillingError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "Rollback failed");
            }
            Err(error)
        }
    }
}

/// Billing engine facade
pub struct BillingService {
    reads: Arc<dyn BillingReadPort>,
    store: Arc<dyn BillingStore>,
    settings: BillingSettings,
    clock: Arc<dyn Clock>,
}

impl BillingService {
    /// Creates a service on the wall clock
    pub fn new(reads: Arc<dyn BillingReadPort>, store: Arc<dyn BillingStore>, settings: BillingSettings) -> Self {
        Self {
            reads,
            store,
            settings,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &BillingSettings {
        &self.settings
    }

    /// Calendar month containing "now" in the configured timezone
    pub fn current_month(&self) -> YearMonth {
        self.settings.timezone.current_month(self.clock.now())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Prices the project's service lines
    ///
    /// `None` when the project does not exist for this business.
    #[instrument(skip(self), fields(%business_id, %project_id))]
    pub async fn compute_project_pricing(
        &self,
        business_id: BusinessId,
        project_id: ProjectId,
    ) -> Result<Option<ProjectPricing>, BillingError> {
        let Some(project) = self.reads.load_project(business_id, project_id).await? else {
            debug!("Project not found");
            return Ok(None);
        };
        let pricing = pricing::compute_project_pricing(
            &project.service_lines,
            project.default_deposit_percent,
            project.currency,
        )?;
        if pricing.has_missing_prices() {
            warn!(missing = pricing.missing_prices.len(), "Service lines without a price");
        }
        Ok(Some(pricing))
    }

    /// Project-level reconciliation of basis, invoices and payments
    ///
    /// `None` when the project is missing or has no billing basis.
    #[instrument(skip(self), fields(%business_id, %project_id))]
    pub async fn compute_project_billing_summary(
        &self,
        business_id: BusinessId,
        project_id: ProjectId,
    ) -> Result<Option<BillingSummary>, BillingError> {
        let Some(project) = self.reads.load_project(business_id, project_id).await? else {
            debug!("Project not found");
            return Ok(None);
        };
        let quotes = self.reads.list_project_quotes(business_id, project_id).await?;
        let invoices = self.reads.list_project_invoices(business_id, project_id).await?;

        let invoice_ids: Vec<InvoiceId> = invoices
            .iter()
            .filter(|i| !i.is_cancelled())
            .map(|i| i.id)
            .collect();
        let aggregates = if invoice_ids.is_empty() {
            Vec::new()
        } else {
            self.reads.payment_aggregates(&invoice_ids).await?
        };

        let summary = summary::summarize(&project, &quotes, &invoices, &aggregates)?;
        if summary.is_none() {
            debug!("Project has no billing basis");
        }
        Ok(summary)
    }

    /// Reconciles one invoice against its live payments
    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.id))]
    pub async fn compute_invoice_payment_summary(
        &self,
        invoice: &Invoice,
    ) -> Result<InvoicePaymentSummary, BillingError> {
        let aggregate = self
            .reads
            .payment_aggregates(&[invoice.id])
            .await?
            .into_iter()
            .find(|a| a.invoice_id == invoice.id);
        Ok(reconciliation::derive(invoice, aggregate.as_ref()))
    }

    /// Health of the read and write adapters
    pub async fn health(&self) -> Vec<HealthCheckResult> {
        vec![self.reads.health_check().await, self.store.health_check().await]
    }

    // ========================================================================
    // Payments
    // ========================================================================

    /// Materialises the payment row of a legacy paid invoice
    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.id))]
    pub async fn ensure_legacy_payment_row(&self, invoice: &Invoice) -> Result<InsertOutcome, BillingError> {
        let mut tx = self.store.begin().await?;
        let result = reconciliation::ensure_legacy_payment_row(tx.as_mut(), invoice).await;
        finish(tx, result).await
    }

    /// Backfills every legacy paid invoice of a business
    #[instrument(skip(self), fields(%business_id))]
    pub async fn backfill_legacy_payments(&self, business_id: BusinessId) -> Result<BackfillReport, BillingError> {
        let invoices = self.reads.list_legacy_paid_invoices(business_id).await?;
        let mut report = BackfillReport {
            scanned: invoices.len(),
            ..BackfillReport::default()
        };
        if invoices.is_empty() {
            return Ok(report);
        }

        let mut tx = self.store.begin().await?;
        let result = async {
            for invoice in &invoices {
                match reconciliation::ensure_legacy_payment_row(tx.as_mut(), invoice).await? {
                    InsertOutcome::Created => report.created += 1,
                    InsertOutcome::AlreadyExists => report.existing += 1,
                }
            }
            Ok::<_, BillingError>(report)
        }
        .await;
        let report = finish(tx, result).await?;
        info!(
            scanned = report.scanned,
            created = report.created,
            existing = report.existing,
            "Legacy payment backfill finished"
        );
        Ok(report)
    }

    /// Records a payment and settles the invoice once fully paid
    ///
    /// A fully paid invoice moves to PAID and gets an INCOME mirror keyed by
    /// its id.
    ///
    /// # Errors
    ///
    /// - `Validation` for a non-positive amount
    /// - `NotFound` for an unknown invoice
    /// - `InvalidTransition` for a cancelled invoice
    #[instrument(skip(self, input), fields(%invoice_id, amount_cents = input.amount_cents))]
    pub async fn record_payment(
        &self,
        invoice_id: InvoiceId,
        input: PaymentInput,
    ) -> Result<InvoicePaymentSummary, BillingError> {
        input.validate()?;
        let mut tx = self.store.begin().await?;
        let result = self.record_payment_in(tx.as_mut(), invoice_id, input).await;
        finish(tx, result).await
    }

    async fn record_payment_in(
        &self,
        tx: &mut dyn BillingTx,
        invoice_id: InvoiceId,
        input: PaymentInput,
    ) -> Result<InvoicePaymentSummary, BillingError> {
        let mut invoice = tx
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Invoice", invoice_id))?;
        if invoice.is_cancelled() {
            return Err(BillingError::invalid_transition(invoice.status, InvoiceStatus::Paid));
        }

        let mut payment = Payment::new(&invoice, input.amount_cents, input.paid_at, input.method);
        payment.note = input.note;
        tx.insert_payment(&payment).await?;

        let aggregate = tx.payment_aggregate(invoice_id).await?;
        let settled = status_for(invoice.total_cents, aggregate.sum_cents) == PaymentStatus::Paid;
        if settled && invoice.status != InvoiceStatus::Paid {
            let paid_at = aggregate.last_paid_at.unwrap_or(input.paid_at);
            invoice.mark_paid(paid_at)?;
            tx.update_invoice(&invoice).await?;
            self.ensure_invoice_mirror(tx, &invoice, paid_at).await?;
            info!(payment_id = %payment.id, "Invoice fully paid");
        } else {
            info!(payment_id = %payment.id, "Payment recorded");
        }
        Ok(reconciliation::derive(&invoice, Some(&aggregate)))
    }

    async fn ensure_invoice_mirror(
        &self,
        tx: &mut dyn BillingTx,
        invoice: &Invoice,
        paid_at: DateTime<Utc>,
    ) -> Result<InsertOutcome, BillingError> {
        let mirror = FinanceEntry::new(
            invoice.business_id,
            FinanceEntryType::Income,
            invoice.total_cents,
            invoice.currency,
            self.settings.timezone.local_date(paid_at),
            "invoices",
            format!("Invoice {}", invoice.id),
            EntrySource::Invoice { invoice_id: invoice.id },
        )
        .with_project(invoice.project_id);

        let outcome = tx.insert_finance_entry(&mirror).await?;
        if outcome == InsertOutcome::AlreadyExists {
            debug!("Invoice mirror already present");
        }
        Ok(outcome)
    }

    /// Soft-deletes a payment and reopens the invoice if it is no longer paid
    ///
    /// Reopening sets the invoice back to SENT and soft-deletes its unlocked
    /// finance mirror.
    #[instrument(skip(self), fields(%payment_id))]
    pub async fn delete_payment(&self, payment_id: PaymentId) -> Result<InvoicePaymentSummary, BillingError> {
        let mut tx = self.store.begin().await?;
        let result = self.delete_payment_in(tx.as_mut(), payment_id).await;
        finish(tx, result).await
    }

    async fn delete_payment_in(
        &self,
        tx: &mut dyn BillingTx,
        payment_id: PaymentId,
    ) -> Result<InvoicePaymentSummary, BillingError> {
        let payment = tx
            .get_payment(payment_id)
            .await?
            .filter(Payment::is_live)
            .ok_or_else(|| BillingError::not_found("Payment", payment_id))?;
        let now = self.clock.now();
        tx.soft_delete_payment(payment_id, now).await?;

        let mut invoice = tx
            .get_invoice(payment.invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Invoice", payment.invoice_id))?;
        let aggregate = tx.payment_aggregate(invoice.id).await?;

        let still_paid = status_for(invoice.total_cents, aggregate.sum_cents) == PaymentStatus::Paid;
        if invoice.status == InvoiceStatus::Paid && !still_paid {
            invoice.revert_to_sent()?;
            tx.update_invoice(&invoice).await?;

            let source = EntrySource::Invoice { invoice_id: invoice.id };
            match tx.find_entry_by_source(&source).await? {
                Some(mirror) if mirror.locked_from_rule => {
                    debug!(entry_id = %mirror.id, "Invoice mirror is locked, kept");
                }
                Some(mirror) => {
                    tx.soft_delete_finance_entry(mirror.id, now).await?;
                }
                None => {}
            }
            info!(invoice_id = %invoice.id, "Invoice reverted to SENT");
        }
        Ok(reconciliation::derive(&invoice, Some(&aggregate)))
    }

    // ========================================================================
    // Recurring rules
    // ========================================================================

    /// Patches a rule and cascades the change to its future occurrences
    #[instrument(skip(self, patch), fields(%rule_id, mode = ?options.mode()))]
    pub async fn apply_recurring_rule_change(
        &self,
        rule_id: RecurringRuleId,
        patch: RulePatch,
        options: CascadeOptions,
    ) -> Result<RuleChangeOutcome, BillingError> {
        let current = self.current_month();
        let mut tx = self.store.begin().await?;
        let result = async {
            let rule = load_rule(tx.as_mut(), rule_id).await?;
            recurring::apply_rule_change(
                tx.as_mut(),
                &rule,
                &patch,
                &options,
                current,
                self.settings.default_horizon_months,
            )
            .await
        }
        .await;
        finish(tx, result).await
    }

    /// Flips a rule between ACTIVE and INACTIVE
    ///
    /// Existing occurrences are kept either way; an inactive rule only stops
    /// generating new ones.
    #[instrument(skip(self), fields(%rule_id))]
    pub async fn toggle_recurring_rule(&self, rule_id: RecurringRuleId) -> Result<RecurringRule, BillingError> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let mut rule = load_rule(tx.as_mut(), rule_id).await?;
            let active = rule.toggle();
            tx.update_rule(&rule).await?;
            info!(active, "Recurring rule toggled");
            Ok::<_, BillingError>(rule)
        }
        .await;
        finish(tx, result).await
    }

    /// Generates a rule's occurrences from the current month over the horizon
    #[instrument(skip(self), fields(%rule_id))]
    pub async fn generate_rule_occurrences(
        &self,
        rule_id: RecurringRuleId,
        horizon_months: Option<u32>,
    ) -> Result<GenerationReport, BillingError> {
        let options = CascadeOptions {
            horizon_months,
            ..CascadeOptions::default()
        };
        let horizon = options.horizon(self.settings.default_horizon_months)?;
        let current = self.current_month();
        let until = current.add_months(i64::from(horizon))?;

        let mut tx = self.store.begin().await?;
        let result = async {
            let rule = load_rule(tx.as_mut(), rule_id).await?;
            recurring::generate_occurrences(tx.as_mut(), &rule, current, until).await
        }
        .await;
        finish(tx, result).await
    }

    /// Plans the single occurrence of a rule in `month`
    #[instrument(skip(self), fields(%rule_id, %month))]
    pub async fn plan_rule_occurrence(
        &self,
        rule_id: RecurringRuleId,
        month: YearMonth,
    ) -> Result<FinanceEntry, BillingError> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let rule = load_rule(tx.as_mut(), rule_id).await?;
            recurring::plan_occurrence(tx.as_mut(), &rule, month).await
        }
        .await;
        finish(tx, result).await
    }

    /// Manually edits a rule occurrence, locking it against cascades
    #[instrument(skip(self, edit), fields(%entry_id))]
    pub async fn override_occurrence(
        &self,
        entry_id: FinanceEntryId,
        edit: OccurrenceOverride,
    ) -> Result<FinanceEntry, BillingError> {
        edit.validate()?;
        let mut tx = self.store.begin().await?;
        let result = async {
            let mut entry = tx
                .get_finance_entry(entry_id)
                .await?
                .filter(FinanceEntry::is_live)
                .ok_or_else(|| BillingError::not_found("FinanceEntry", entry_id))?;
            entry.override_values(edit.amount_cents, edit.category, edit.label)?;
            tx.update_finance_entry(&entry).await?;
            Ok::<_, BillingError>(entry)
        }
        .await;
        finish(tx, result).await
    }

    /// Ensures a recurring rule for every priced MONTHLY service line
    ///
    /// Called when the project is invoiced; lines without a service are
    /// skipped.
    #[instrument(skip(self), fields(%business_id, %project_id))]
    pub async fn ensure_recurring_rules_for_project(
        &self,
        business_id: BusinessId,
        project_id: ProjectId,
        invoiced_at: DateTime<Utc>,
    ) -> Result<Vec<(RecurringRule, InsertOutcome)>, BillingError> {
        let project = self
            .reads
            .load_project(business_id, project_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Project", project_id))?;
        let pricing = pricing::compute_project_pricing(
            &project.service_lines,
            project.default_deposit_percent,
            project.currency,
        )?;

        let mut tx = self.store.begin().await?;
        let result = async {
            let mut rules = Vec::new();
            for line in pricing
                .lines
                .iter()
                .filter(|l| l.billing_unit == BillingUnit::Monthly && l.service_id.is_some())
            {
                rules.push(recurring::ensure_rule_for_monthly_line(tx.as_mut(), &project, line, invoiced_at).await?);
            }
            Ok::<_, BillingError>(rules)
        }
        .await;
        finish(tx, result).await
    }

    // ========================================================================
    // Inventory ledger
    // ========================================================================

    fn poster_options(&self) -> PosterOptions {
        PosterOptions {
            mirror_finance: self.settings.mirror_inventory_finance,
        }
    }

    /// Posts the ledger entry of an already recorded movement
    #[instrument(skip(self, movement, product), fields(movement_id = %movement.id))]
    pub async fn post_inventory_movement_ledger(
        &self,
        movement: &InventoryMovement,
        product: &Product,
        actor: Option<UserId>,
    ) -> Result<LedgerEntry, BillingError> {
        let mut cache = PostingCache::new(self.settings.dedup_cache_capacity);
        let mut tx = self.store.begin().await?;
        let result = ledger::post_for_movement(
            tx.as_mut(),
            &mut cache,
            movement,
            product,
            actor,
            self.poster_options(),
        )
        .await;
        finish(tx, result).await
    }

    /// Posts a batch of movements in one transaction
    ///
    /// A movement listed twice is posted once.
    #[instrument(skip(self, batch), fields(count = batch.len()))]
    pub async fn post_inventory_movements_ledger(
        &self,
        batch: &[(InventoryMovement, Product)],
        actor: Option<UserId>,
    ) -> Result<Vec<LedgerEntry>, BillingError> {
        let mut cache = PostingCache::new(self.settings.dedup_cache_capacity);
        let options = self.poster_options();
        let mut tx = self.store.begin().await?;
        let result = async {
            let mut entries = Vec::with_capacity(batch.len());
            for (movement, product) in batch {
                entries.push(ledger::post_for_movement(tx.as_mut(), &mut cache, movement, product, actor, options).await?);
            }
            Ok::<_, BillingError>(entries)
        }
        .await;
        finish(tx, result).await
    }

    /// Records a movement and posts its ledger entry atomically
    #[instrument(skip(self, movement, product), fields(movement_id = %movement.id))]
    pub async fn record_inventory_movement(
        &self,
        movement: &InventoryMovement,
        product: &Product,
        actor: Option<UserId>,
    ) -> Result<RecordedMovement, BillingError> {
        let mut cache = PostingCache::new(self.settings.dedup_cache_capacity);
        let mut tx = self.store.begin().await?;
        let result = async {
            let outcome = tx.insert_movement(movement).await?;
            if outcome == InsertOutcome::AlreadyExists {
                debug!("Movement already recorded");
            }
            let entry = ledger::post_for_movement(
                tx.as_mut(),
                &mut cache,
                movement,
                product,
                actor,
                self.poster_options(),
            )
            .await?;
            Ok::<_, BillingError>(RecordedMovement { movement: outcome, entry })
        }
        .await;
        finish(tx, result).await
    }

    /// Posts the reversal of a ledger entry
    #[instrument(skip(self, reason), fields(%entry_id))]
    pub async fn reverse_ledger_entry(
        &self,
        entry_id: LedgerEntryId,
        reason: &str,
        actor: Option<UserId>,
    ) -> Result<LedgerEntry, BillingError> {
        let on = self.settings.timezone.local_date(self.clock.now());
        let mut tx = self.store.begin().await?;
        let result = ledger::reverse_entry(tx.as_mut(), entry_id, reason, actor, on).await;
        finish(tx, result).await
    }
}

async fn load_rule(tx: &mut dyn BillingTx, rule_id: RecurringRuleId) -> Result<RecurringRule, BillingError> {
    tx.get_rule(rule_id)
        .await?
        .ok_or_else(|| BillingError::not_found("RecurringRule", rule_id))
}
