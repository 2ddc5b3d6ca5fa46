//! Billing Domain Ports
//!
//! Storage interfaces the billing engine runs against. Reads go through
//! [`BillingReadPort`] and never take locks; every write path runs inside one
//! [`BillingTx`] opened from a [`BillingStore`] and either commits as a whole
//! or rolls back.
//!
//! # Adapters
//!
//! - **Postgres**: `infra_db::adapters::billing`
//! - **In-memory**: [`mock::InMemoryBillingStore`], for tests (feature `mock`)
//!
//! # Idempotency
//!
//! Inserts keyed by a natural key (rule + month, movement id, invoice id)
//! report a duplicate as [`InsertOutcome::AlreadyExists`] instead of an error.
//! Only live rows (no `deleted_at`) take part in these keys.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use core_kernel::{
    BusinessId, DomainPort, FinanceEntryId, HealthCheckable, InsertOutcome, InvoiceId,
    LedgerEntryId, PaymentId, PortError, ProjectId, RecurringRuleId, ServiceId,
};

use crate::finance_entry::{EntrySource, FinanceEntry};
use crate::inventory::InventoryMovement;
use crate::invoice::Invoice;
use crate::ledger::LedgerEntry;
use crate::payment::{Payment, PaymentAggregate};
use crate::project::ProjectBillingContext;
use crate::quote::Quote;
use crate::recurring::RecurringRule;
use crate::transaction::LedgerSource;

/// Read side of billing storage
#[async_trait]
pub trait BillingReadPort: DomainPort + HealthCheckable {
    /// Loads the project with its priced service lines
    async fn load_project(
        &self,
        business_id: BusinessId,
        project_id: ProjectId,
    ) -> Result<Option<ProjectBillingContext>, PortError>;

    /// All quotes of a project, any status
    async fn list_project_quotes(
        &self,
        business_id: BusinessId,
        project_id: ProjectId,
    ) -> Result<Vec<Quote>, PortError>;

    /// All invoices of a project, cancelled ones included
    async fn list_project_invoices(
        &self,
        business_id: BusinessId,
        project_id: ProjectId,
    ) -> Result<Vec<Invoice>, PortError>;

    /// Live payment aggregates for many invoices in one query
    ///
    /// Invoices without live payments are absent from the result.
    async fn payment_aggregates(
        &self,
        invoice_ids: &[InvoiceId],
    ) -> Result<Vec<PaymentAggregate>, PortError>;

    async fn get_invoice(&self, invoice_id: InvoiceId) -> Result<Option<Invoice>, PortError>;

    /// PAID invoices with a `paid_at` and no live payment row
    async fn list_legacy_paid_invoices(
        &self,
        business_id: BusinessId,
    ) -> Result<Vec<Invoice>, PortError>;
}

/// Opens write transactions
#[async_trait]
pub trait BillingStore: DomainPort + HealthCheckable {
    async fn begin(&self) -> Result<Box<dyn BillingTx>, PortError>;
}

/// One unit of work against billing storage
///
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait BillingTx: Send {
    // ========================================================================
    // Invoices and payments
    // ========================================================================

    async fn get_invoice(&mut self, invoice_id: InvoiceId) -> Result<Option<Invoice>, PortError>;

    async fn update_invoice(&mut self, invoice: &Invoice) -> Result<(), PortError>;

    async fn insert_payment(&mut self, payment: &Payment) -> Result<InsertOutcome, PortError>;

    /// Inserts a backfill row, keyed by invoice among live legacy rows
    async fn insert_legacy_payment(&mut self, payment: &Payment) -> Result<InsertOutcome, PortError>;

    async fn get_payment(&mut self, payment_id: PaymentId) -> Result<Option<Payment>, PortError>;

    async fn soft_delete_payment(
        &mut self,
        payment_id: PaymentId,
        at: DateTime<Utc>,
    ) -> Result<(), PortError>;

    /// Aggregate of the invoice's live payments as seen by this transaction
    async fn payment_aggregate(&mut self, invoice_id: InvoiceId) -> Result<PaymentAggregate, PortError>;

    // ========================================================================
    // Finance entries
    // ========================================================================

    /// Create-if-absent on the entry's source key
    async fn insert_finance_entry(&mut self, entry: &FinanceEntry) -> Result<InsertOutcome, PortError>;

    /// Rewrites a live entry in place
    ///
    /// Moving it onto a key already held by another live entry is a
    /// `Conflict`.
    async fn update_finance_entry(&mut self, entry: &FinanceEntry) -> Result<(), PortError>;

    async fn soft_delete_finance_entry(
        &mut self,
        entry_id: FinanceEntryId,
        at: DateTime<Utc>,
    ) -> Result<(), PortError>;

    async fn get_finance_entry(&mut self, entry_id: FinanceEntryId) -> Result<Option<FinanceEntry>, PortError>;

    /// The live entry holding a keyed source
    async fn find_entry_by_source(&mut self, source: &EntrySource) -> Result<Option<FinanceEntry>, PortError>;

    /// Live occurrences of a rule, ordered by month
    async fn list_rule_occurrences(&mut self, rule_id: RecurringRuleId) -> Result<Vec<FinanceEntry>, PortError>;

    // ========================================================================
    // Recurring rules
    // ========================================================================

    async fn get_rule(&mut self, rule_id: RecurringRuleId) -> Result<Option<RecurringRule>, PortError>;

    /// Create-if-absent on `(project_id, service_id)`
    async fn insert_rule(&mut self, rule: &RecurringRule) -> Result<InsertOutcome, PortError>;

    async fn update_rule(&mut self, rule: &RecurringRule) -> Result<(), PortError>;

    async fn find_rule_for_service(
        &mut self,
        project_id: ProjectId,
        service_id: ServiceId,
    ) -> Result<Option<RecurringRule>, PortError>;

    // ========================================================================
    // Inventory and ledger
    // ========================================================================

    async fn insert_movement(&mut self, movement: &InventoryMovement) -> Result<InsertOutcome, PortError>;

    /// Create-if-absent on the entry's [`LedgerSource`], lines included
    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<InsertOutcome, PortError>;

    async fn get_ledger_entry(&mut self, entry_id: LedgerEntryId) -> Result<Option<LedgerEntry>, PortError>;

    async fn find_ledger_entry_by_source(
        &mut self,
        source: &LedgerSource,
    ) -> Result<Option<LedgerEntry>, PortError>;

    // ========================================================================
    // Completion
    // ========================================================================

    async fn commit(self: Box<Self>) -> Result<(), PortError>;

    async fn rollback(self: Box<Self>) -> Result<(), PortError>;
}

/// In-memory adapter for tests
#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;
    use tokio::sync::{Mutex, OwnedMutexGuard};

    use core_kernel::{HealthCheckResult, MovementId, QuoteId};

    /// Everything the in-memory store holds
    #[derive(Debug, Clone, Default)]
    pub struct BillingState {
        pub projects: HashMap<ProjectId, ProjectBillingContext>,
        pub quotes: HashMap<QuoteId, Quote>,
        pub invoices: HashMap<InvoiceId, Invoice>,
        pub payments: HashMap<PaymentId, Payment>,
        pub rules: HashMap<RecurringRuleId, RecurringRule>,
        pub finance_entries: HashMap<FinanceEntryId, FinanceEntry>,
        pub movements: HashMap<MovementId, InventoryMovement>,
        pub ledger_entries: HashMap<LedgerEntryId, LedgerEntry>,
    }

    impl BillingState {
        pub fn live_finance_entries(&self) -> impl Iterator<Item = &FinanceEntry> {
            self.finance_entries.values().filter(|e| e.is_live())
        }

        pub fn live_payments(&self) -> impl Iterator<Item = &Payment> {
            self.payments.values().filter(|p| p.is_live())
        }

        /// Live occurrences of a rule, ordered by month
        pub fn rule_occurrences(&self, rule_id: RecurringRuleId) -> Vec<FinanceEntry> {
            let mut rows: Vec<FinanceEntry> = self
                .live_finance_entries()
                .filter(|e| e.rule_id() == Some(rule_id))
                .cloned()
                .collect();
            rows.sort_by_key(|e| (e.occurrence_month(), e.id));
            rows
        }

        fn aggregate(&self, invoice_id: InvoiceId) -> PaymentAggregate {
            PaymentAggregate::from_payments(invoice_id, self.payments.values())
        }

        fn live_source_holder(&self, source: &EntrySource) -> Option<&FinanceEntry> {
            if !source.is_keyed() {
                return None;
            }
            self.live_finance_entries().find(|e| &e.source == source)
        }
    }

    /// Operations that can be made to fail
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum FailPoint {
        InsertFinanceEntry,
        InsertLedgerEntry,
        UpdateInvoice,
        Commit,
    }

    /// Transactional in-memory billing storage
    ///
    /// A transaction holds the store lock for its whole life and works on a
    /// copy of the state, which replaces the shared state on commit. Reads
    /// through [`BillingReadPort`] wait for open transactions to finish.
    #[derive(Debug, Clone, Default)]
    pub struct InMemoryBillingStore {
        state: Arc<Mutex<BillingState>>,
        faults: Arc<Mutex<HashSet<FailPoint>>>,
    }

    impl InMemoryBillingStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes `point` fail in every transaction opened afterwards
        pub async fn fail_on(&self, point: FailPoint) {
            self.faults.lock().await.insert(point);
        }

        pub async fn clear_faults(&self) {
            self.faults.lock().await.clear();
        }

        /// A copy of the committed state
        pub async fn snapshot(&self) -> BillingState {
            self.state.lock().await.clone()
        }

        pub async fn seed_project(&self, project: ProjectBillingContext) {
            self.state.lock().await.projects.insert(project.project_id, project);
        }

        pub async fn seed_quote(&self, quote: Quote) {
            self.state.lock().await.quotes.insert(quote.id, quote);
        }

        pub async fn seed_invoice(&self, invoice: Invoice) {
            self.state.lock().await.invoices.insert(invoice.id, invoice);
        }

        pub async fn seed_rule(&self, rule: RecurringRule) {
            self.state.lock().await.rules.insert(rule.id, rule);
        }
    }

    impl DomainPort for InMemoryBillingStore {}

    #[async_trait]
    impl HealthCheckable for InMemoryBillingStore {
        async fn health_check(&self) -> HealthCheckResult {
            HealthCheckResult::healthy("in-memory-billing", 0)
        }
    }

    #[async_trait]
    impl BillingReadPort for InMemoryBillingStore {
        async fn load_project(
            &self,
            business_id: BusinessId,
            project_id: ProjectId,
        ) -> Result<Option<ProjectBillingContext>, PortError> {
            let state = self.state.lock().await;
            Ok(state
                .projects
                .get(&project_id)
                .filter(|p| p.business_id == business_id)
                .cloned())
        }

        async fn list_project_quotes(
            &self,
            business_id: BusinessId,
            project_id: ProjectId,
        ) -> Result<Vec<Quote>, PortError> {
            let state = self.state.lock().await;
            let mut quotes: Vec<Quote> = state
                .quotes
                .values()
                .filter(|q| q.business_id == business_id && q.project_id == project_id)
                .cloned()
                .collect();
            quotes.sort_by_key(|q| q.id);
            Ok(quotes)
        }

        async fn list_project_invoices(
            &self,
            business_id: BusinessId,
            project_id: ProjectId,
        ) -> Result<Vec<Invoice>, PortError> {
            let state = self.state.lock().await;
            let mut invoices: Vec<Invoice> = state
                .invoices
                .values()
                .filter(|i| i.business_id == business_id && i.project_id == Some(project_id))
                .cloned()
                .collect();
            invoices.sort_by_key(|i| (i.created_at, i.id));
            Ok(invoices)
        }

        async fn payment_aggregates(
            &self,
            invoice_ids: &[InvoiceId],
        ) -> Result<Vec<PaymentAggregate>, PortError> {
            let state = self.state.lock().await;
            let wanted: HashSet<&InvoiceId> = invoice_ids.iter().collect();
            let mut aggregates: Vec<PaymentAggregate> =
                crate::payment::aggregate_by_invoice(state.payments.values())
                    .into_values()
                    .filter(|a| wanted.contains(&a.invoice_id))
                    .collect();
            aggregates.sort_by_key(|a| a.invoice_id);
            Ok(aggregates)
        }

        async fn get_invoice(&self, invoice_id: InvoiceId) -> Result<Option<Invoice>, PortError> {
            Ok(self.state.lock().await.invoices.get(&invoice_id).cloned())
        }

        async fn list_legacy_paid_invoices(
            &self,
            business_id: BusinessId,
        ) -> Result<Vec<Invoice>, PortError> {
            let state = self.state.lock().await;
            let mut invoices: Vec<Invoice> = state
                .invoices
                .values()
                .filter(|i| i.business_id == business_id && i.is_legacy_paid())
                .filter(|i| state.aggregate(i.id).count == 0)
                .cloned()
                .collect();
            invoices.sort_by_key(|i| i.id);
            Ok(invoices)
        }
    }

    #[async_trait]
    impl BillingStore for InMemoryBillingStore {
        async fn begin(&self) -> Result<Box<dyn BillingTx>, PortError> {
            let faults = self.faults.lock().await.clone();
            let guard = Arc::clone(&self.state).lock_owned().await;
            let working = guard.clone();
            Ok(Box::new(InMemoryTx {
                guard,
                working,
                faults,
            }))
        }
    }

    /// Transaction over a working copy of the state
    pub struct InMemoryTx {
        guard: OwnedMutexGuard<BillingState>,
        working: BillingState,
        faults: HashSet<FailPoint>,
    }

    impl InMemoryTx {
        fn check(&self, point: FailPoint) -> Result<(), PortError> {
            if self.faults.contains(&point) {
                return Err(PortError::internal(format!("injected failure at {:?}", point)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl BillingTx for InMemoryTx {
        async fn get_invoice(&mut self, invoice_id: InvoiceId) -> Result<Option<Invoice>, PortError> {
            Ok(self.working.invoices.get(&invoice_id).cloned())
        }

        async fn update_invoice(&mut self, invoice: &Invoice) -> Result<(), PortError> {
            self.check(FailPoint::UpdateInvoice)?;
            let slot = self
                .working
                .invoices
                .get_mut(&invoice.id)
                .ok_or_else(|| PortError::not_found("Invoice", invoice.id))?;
            *slot = invoice.clone();
            Ok(())
        }

        async fn insert_payment(&mut self, payment: &Payment) -> Result<InsertOutcome, PortError> {
            if self.working.payments.contains_key(&payment.id) {
                return Ok(InsertOutcome::AlreadyExists);
            }
            self.working.payments.insert(payment.id, payment.clone());
            Ok(InsertOutcome::Created)
        }

        async fn insert_legacy_payment(&mut self, payment: &Payment) -> Result<InsertOutcome, PortError> {
            let taken = self
                .working
                .live_payments()
                .any(|p| p.is_legacy_backfill && p.invoice_id == payment.invoice_id);
            if taken {
                return Ok(InsertOutcome::AlreadyExists);
            }
            self.insert_payment(payment).await
        }

        async fn get_payment(&mut self, payment_id: PaymentId) -> Result<Option<Payment>, PortError> {
            Ok(self.working.payments.get(&payment_id).cloned())
        }

        async fn soft_delete_payment(
            &mut self,
            payment_id: PaymentId,
            at: DateTime<Utc>,
        ) -> Result<(), PortError> {
            self.working
                .payments
                .get_mut(&payment_id)
                .ok_or_else(|| PortError::not_found("Payment", payment_id))?
                .soft_delete(at);
            Ok(())
        }

        async fn payment_aggregate(&mut self, invoice_id: InvoiceId) -> Result<PaymentAggregate, PortError> {
            Ok(self.working.aggregate(invoice_id))
        }

        async fn insert_finance_entry(&mut self, entry: &FinanceEntry) -> Result<InsertOutcome, PortError> {
            self.check(FailPoint::InsertFinanceEntry)?;
            if self.working.finance_entries.contains_key(&entry.id)
                || self.working.live_source_holder(&entry.source).is_some()
            {
                return Ok(InsertOutcome::AlreadyExists);
            }
            self.working.finance_entries.insert(entry.id, entry.clone());
            Ok(InsertOutcome::Created)
        }

        async fn update_finance_entry(&mut self, entry: &FinanceEntry) -> Result<(), PortError> {
            if let Some(holder) = self.working.live_source_holder(&entry.source) {
                if holder.id != entry.id {
                    return Err(PortError::conflict(format!(
                        "source {:?} is held by finance entry {}",
                        entry.source, holder.id
                    )));
                }
            }
            let slot = self
                .working
                .finance_entries
                .get_mut(&entry.id)
                .filter(|e| e.is_live())
                .ok_or_else(|| PortError::not_found("FinanceEntry", entry.id))?;
            *slot = entry.clone();
            Ok(())
        }

        async fn soft_delete_finance_entry(
            &mut self,
            entry_id: FinanceEntryId,
            at: DateTime<Utc>,
        ) -> Result<(), PortError> {
            self.working
                .finance_entries
                .get_mut(&entry_id)
                .ok_or_else(|| PortError::not_found("FinanceEntry", entry_id))?
                .soft_delete(at);
            Ok(())
        }

        async fn get_finance_entry(&mut self, entry_id: FinanceEntryId) -> Result<Option<FinanceEntry>, PortError> {
            Ok(self.working.finance_entries.get(&entry_id).cloned())
        }

        async fn find_entry_by_source(&mut self, source: &EntrySource) -> Result<Option<FinanceEntry>, PortError> {
            Ok(self.working.live_source_holder(source).cloned())
        }

        async fn list_rule_occurrences(&mut self, rule_id: RecurringRuleId) -> Result<Vec<FinanceEntry>, PortError> {
            Ok(self.working.rule_occurrences(rule_id))
        }

        async fn get_rule(&mut self, rule_id: RecurringRuleId) -> Result<Option<RecurringRule>, PortError> {
            Ok(self.working.rules.get(&rule_id).cloned())
        }

        async fn insert_rule(&mut self, rule: &RecurringRule) -> Result<InsertOutcome, PortError> {
            let key_taken = match (rule.project_id, rule.service_id) {
                (Some(project), Some(service)) => self
                    .working
                    .rules
                    .values()
                    .any(|r| r.project_id == Some(project) && r.service_id == Some(service)),
                _ => false,
            };
            if key_taken || self.working.rules.contains_key(&rule.id) {
                return Ok(InsertOutcome::AlreadyExists);
            }
            self.working.rules.insert(rule.id, rule.clone());
            Ok(InsertOutcome::Created)
        }

        async fn update_rule(&mut self, rule: &RecurringRule) -> Result<(), PortError> {
            let slot = self
                .working
                .rules
                .get_mut(&rule.id)
                .ok_or_else(|| PortError::not_found("RecurringRule", rule.id))?;
            *slot = rule.clone();
            Ok(())
        }

        async fn find_rule_for_service(
            &mut self,
            project_id: ProjectId,
            service_id: ServiceId,
        ) -> Result<Option<RecurringRule>, PortError> {
            Ok(self
                .working
                .rules
                .values()
                .find(|r| r.project_id == Some(project_id) && r.service_id == Some(service_id))
                .cloned())
        }

        async fn insert_movement(&mut self, movement: &InventoryMovement) -> Result<InsertOutcome, PortError> {
            if self.working.movements.contains_key(&movement.id) {
                return Ok(InsertOutcome::AlreadyExists);
            }
            self.working.movements.insert(movement.id, movement.clone());
            Ok(InsertOutcome::Created)
        }

        async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<InsertOutcome, PortError> {
            self.check(FailPoint::InsertLedgerEntry)?;
            let taken = self.working.ledger_entries.contains_key(&entry.id)
                || self.working.ledger_entries.values().any(|e| e.source == entry.source);
            if taken {
                return Ok(InsertOutcome::AlreadyExists);
            }
            self.working.ledger_entries.insert(entry.id, entry.clone());
            Ok(InsertOutcome::Created)
        }

        async fn get_ledger_entry(&mut self, entry_id: LedgerEntryId) -> Result<Option<LedgerEntry>, PortError> {
            Ok(self.working.ledger_entries.get(&entry_id).cloned())
        }

        async fn find_ledger_entry_by_source(
            &mut self,
            source: &LedgerSource,
        ) -> Result<Option<LedgerEntry>, PortError> {
            Ok(self
                .working
                .ledger_entries
                .values()
                .find(|e| &e.source == source)
                .cloned())
        }

        async fn commit(self: Box<Self>) -> Result<(), PortError> {
            self.check(FailPoint::Commit)?;
            let InMemoryTx { mut guard, working, .. } = *self;
            *guard = working;
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<(), PortError> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{FailPoint, InMemoryBillingStore};
    use super::*;
    use crate::finance_entry::FinanceEntryType;
    use core_kernel::{Currency, YearMonth};

    fn occurrence(rule_id: RecurringRuleId, month: YearMonth) -> FinanceEntry {
        FinanceEntry::new(
            BusinessId::new(),
            FinanceEntryType::Income,
            1_000,
            Currency::EUR,
            month.first_day(),
            "services",
            "Retainer",
            EntrySource::RecurringRule { rule_id, month },
        )
    }

    #[tokio::test]
    async fn test_keyed_insert_is_create_if_absent() {
        let store = InMemoryBillingStore::new();
        let rule_id = RecurringRuleId::new();
        let month = YearMonth::new(2024, 5).unwrap();

        let mut tx = store.begin().await.unwrap();
        let first = tx.insert_finance_entry(&occurrence(rule_id, month)).await.unwrap();
        let second = tx.insert_finance_entry(&occurrence(rule_id, month)).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(first, InsertOutcome::Created);
        assert_eq!(second, InsertOutcome::AlreadyExists);
        assert_eq!(store.snapshot().await.finance_entries.len(), 1);
    }

    #[tokio::test]
    async fn test_soft_deleted_key_can_be_reused() {
        let store = InMemoryBillingStore::new();
        let rule_id = RecurringRuleId::new();
        let month = YearMonth::new(2024, 5).unwrap();
        let original = occurrence(rule_id, month);

        let mut tx = store.begin().await.unwrap();
        tx.insert_finance_entry(&original).await.unwrap();
        tx.soft_delete_finance_entry(original.id, Utc::now()).await.unwrap();
        let again = tx.insert_finance_entry(&occurrence(rule_id, month)).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(again, InsertOutcome::Created);
        assert_eq!(store.snapshot().await.rule_occurrences(rule_id).len(), 1);
    }

    #[tokio::test]
    async fn test_update_onto_held_key_conflicts() {
        let store = InMemoryBillingStore::new();
        let rule_id = RecurringRuleId::new();
        let may = YearMonth::new(2024, 5).unwrap();
        let june = YearMonth::new(2024, 6).unwrap();
        let mut mover = occurrence(rule_id, may);

        let mut tx = store.begin().await.unwrap();
        tx.insert_finance_entry(&mover).await.unwrap();
        tx.insert_finance_entry(&occurrence(rule_id, june)).await.unwrap();

        mover.source = EntrySource::RecurringRule { rule_id, month: june };
        let result = tx.update_finance_entry(&mover).await;
        assert!(matches!(result, Err(PortError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_rollback_and_failed_commit_discard_writes() {
        let store = InMemoryBillingStore::new();
        let rule_id = RecurringRuleId::new();
        let month = YearMonth::new(2024, 5).unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_finance_entry(&occurrence(rule_id, month)).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(store.snapshot().await.finance_entries.is_empty());

        store.fail_on(FailPoint::Commit).await;
        let mut tx = store.begin().await.unwrap();
        tx.insert_finance_entry(&occurrence(rule_id, month)).await.unwrap();
        assert!(tx.commit().await.is_err());
        assert!(store.snapshot().await.finance_entries.is_empty());
    }
}
