//! PostgreSQL Billing Adapter
//!
//! Implements the billing domain ports on top of `repositories::billing`.
//!
//! - [`PostgresBillingReads`] answers `BillingReadPort` queries from pooled
//!   connections without locking.
//! - [`PostgresBillingStore`] opens a [`PgBillingTx`] per write operation.
//!   Invoices and rules are read `FOR UPDATE` inside a transaction so that
//!   concurrent payments on one invoice, or concurrent edits of one rule,
//!   run one after the other.
//!
//! # Error Handling
//!
//! Database errors are translated to `PortError` variants:
//! - `DatabaseError::DuplicateEntry` -> `PortError::Conflict`
//! - `DatabaseError::SerializationError` -> `PortError::Transformation`
//! - connection and pool errors -> `PortError::Connection`
//! - an update or soft delete that touches no row -> `PortError::NotFound`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, instrument};

use core_kernel::{
    BusinessId, Currency, DomainPort, FinanceEntryId, HealthCheckResult, HealthCheckable, InsertOutcome,
    InvoiceId, LedgerEntryId, PaymentId, PortError, ProjectId, RecurringRuleId, ServiceId, YearMonth,
};
use domain_billing::{
    BillingReadPort, BillingStore, BillingTx, EntrySource, FinanceEntry, InventoryMovement, Invoice, LedgerAccount,
    LedgerEntry, LedgerLine, LedgerSource, Payment, PaymentAggregate, PricingLineInput, ProjectBillingContext, Quote,
    RecurringRule,
};

use crate::error::DatabaseError;
use crate::repositories::billing::{
    self as repo, DbEntrySourceKind, FinanceEntryRow, InvoiceRow, LedgerEntryWithLines, PaymentAggregateRow,
    PaymentRow, ProjectRow, QuoteRow, RecurringRuleRow, ServiceLineRow,
};

// ============================================================================
// Row conversions
// ============================================================================

fn currency(value: &str) -> Result<Currency, DatabaseError> {
    Currency::from_str(value.trim()).map_err(|_| DatabaseError::bad_column("currency", value))
}

fn outcome(rows_affected: u64) -> InsertOutcome {
    if rows_affected == 0 {
        InsertOutcome::AlreadyExists
    } else {
        InsertOutcome::Created
    }
}

fn touched(rows_affected: u64, entity: &str, id: impl std::fmt::Display) -> Result<(), PortError> {
    if rows_affected == 0 {
        return Err(PortError::not_found(entity, id));
    }
    Ok(())
}

impl From<ServiceLineRow> for PricingLineInput {
    fn from(row: ServiceLineRow) -> Self {
        PricingLineInput {
            service_id: row.service_id.map(ServiceId::from),
            label: row.label,
            quantity: row.quantity,
            project_price_cents: row.project_price_cents,
            service_price_cents: row.service_price_cents,
            day_rate_cents: row.day_rate_cents,
            discount_type: row.discount_type.into(),
            discount_value: row.discount_value,
            billing_unit: row.billing_unit.into(),
        }
    }
}

fn project_context(row: ProjectRow, lines: Vec<ServiceLineRow>) -> Result<ProjectBillingContext, DatabaseError> {
    Ok(ProjectBillingContext {
        business_id: row.business_id.into(),
        project_id: row.id.into(),
        client_id: row.client_id.map(Into::into),
        currency: currency(&row.currency)?,
        billing_quote_id: row.billing_quote_id.map(Into::into),
        default_deposit_percent: row.default_deposit_percent,
        service_lines: lines.into_iter().map(PricingLineInput::from).collect(),
    })
}

impl TryFrom<QuoteRow> for Quote {
    type Error = DatabaseError;

    fn try_from(row: QuoteRow) -> Result<Self, Self::Error> {
        Ok(Quote {
            id: row.id.into(),
            business_id: row.business_id.into(),
            project_id: row.project_id.into(),
            client_id: row.client_id.map(Into::into),
            currency: currency(&row.currency)?,
            total_cents: row.total_cents,
            deposit_cents: row.deposit_cents,
            balance_cents: row.balance_cents,
            deposit_percent: row.deposit_percent,
            status: row.status.into(),
            issued_at: row.issued_at,
            signed_at: row.signed_at,
        })
    }
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = DatabaseError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        Ok(Invoice {
            id: row.id.into(),
            business_id: row.business_id.into(),
            project_id: row.project_id.map(Into::into),
            client_id: row.client_id.map(Into::into),
            quote_id: row.quote_id.map(Into::into),
            currency: currency(&row.currency)?,
            total_cents: row.total_cents,
            status: row.status.into(),
            issued_at: row.issued_at,
            paid_at: row.paid_at,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: row.id.into(),
            invoice_id: row.invoice_id.into(),
            business_id: row.business_id.into(),
            amount_cents: row.amount_cents,
            currency: currency(&row.currency)?,
            paid_at: row.paid_at,
            method: row.method.into(),
            note: row.note,
            is_legacy_backfill: row.is_legacy_backfill,
            created_at: row.created_at,
            deleted_at: row.deleted_at,
        })
    }
}

impl From<PaymentAggregateRow> for PaymentAggregate {
    fn from(row: PaymentAggregateRow) -> Self {
        PaymentAggregate {
            invoice_id: row.invoice_id.into(),
            count: row.payment_count,
            sum_cents: row.sum_cents,
            last_paid_at: row.last_paid_at,
        }
    }
}

fn entry_source(row: &FinanceEntryRow) -> Result<EntrySource, DatabaseError> {
    let missing = |column: &str| DatabaseError::bad_column(column, "NULL");
    Ok(match row.source_kind {
        DbEntrySourceKind::Manual => EntrySource::Manual,
        DbEntrySourceKind::RecurringRule => EntrySource::RecurringRule {
            rule_id: row.recurring_rule_id.ok_or_else(|| missing("recurring_rule_id"))?.into(),
            month: YearMonth::from_date(row.occurrence_month.ok_or_else(|| missing("occurrence_month"))?),
        },
        DbEntrySourceKind::InventoryMovement => EntrySource::InventoryMovement {
            movement_id: row.inventory_movement_id.ok_or_else(|| missing("inventory_movement_id"))?.into(),
        },
        DbEntrySourceKind::Invoice => EntrySource::Invoice {
            invoice_id: row.invoice_id.ok_or_else(|| missing("invoice_id"))?.into(),
        },
    })
}

impl TryFrom<FinanceEntryRow> for FinanceEntry {
    type Error = DatabaseError;

    fn try_from(row: FinanceEntryRow) -> Result<Self, Self::Error> {
        let source = entry_source(&row)?;
        Ok(FinanceEntry {
            id: row.id.into(),
            business_id: row.business_id.into(),
            project_id: row.project_id.map(Into::into),
            entry_type: row.entry_type.into(),
            amount_cents: row.amount_cents,
            currency: currency(&row.currency)?,
            date: row.entry_date,
            category: row.category,
            label: row.label,
            source,
            locked_from_rule: row.locked_from_rule,
            is_rule_override: row.is_rule_override,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }
}

impl TryFrom<RecurringRuleRow> for RecurringRule {
    type Error = DatabaseError;

    fn try_from(row: RecurringRuleRow) -> Result<Self, Self::Error> {
        let day_of_month =
            u32::try_from(row.day_of_month).map_err(|_| DatabaseError::bad_column("day_of_month", row.day_of_month))?;
        Ok(RecurringRule {
            id: row.id.into(),
            business_id: row.business_id.into(),
            project_id: row.project_id.map(Into::into),
            service_id: row.service_id.map(Into::into),
            entry_type: row.entry_type.into(),
            amount_cents: row.amount_cents,
            currency: currency(&row.currency)?,
            category: row.category,
            label: row.label,
            frequency: row.frequency.into(),
            start_date: row.start_date,
            day_of_month,
            end_date: row.end_date,
            is_active: row.is_active,
            last_invoiced_at: row.last_invoiced_at,
            next_run_at: row.next_run_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<LedgerEntryWithLines> for LedgerEntry {
    type Error = DatabaseError;

    fn try_from(row: LedgerEntryWithLines) -> Result<Self, Self::Error> {
        let LedgerEntryWithLines { entry, lines } = row;
        let lines = lines
            .into_iter()
            .map(|line| {
                let account = LedgerAccount::from_str(&line.account_code)
                    .map_err(|_| DatabaseError::bad_column("account_code", &line.account_code))?;
                Ok(LedgerLine {
                    id: line.id.into(),
                    account,
                    side: line.side.into(),
                    amount_cents: line.amount_cents,
                    memo: line.memo,
                })
            })
            .collect::<Result<Vec<_>, DatabaseError>>()?;

        Ok(LedgerEntry {
            id: entry.id.into(),
            business_id: entry.business_id.into(),
            date: entry.entry_date,
            memo: entry.memo,
            source: LedgerSource {
                source_type: entry.source_type.into(),
                source_id: entry.source_id,
            },
            actor: entry.actor.map(Into::into),
            currency: currency(&entry.currency)?,
            lines,
            created_at: entry.created_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, DatabaseError>
where
    T: TryFrom<R, Error = DatabaseError>,
{
    rows.into_iter().map(T::try_from).collect()
}

async fn ping(pool: &PgPool, adapter_id: &str) -> HealthCheckResult {
    let start = Instant::now();
    let result = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(_) => HealthCheckResult::healthy(adapter_id, latency_ms),
        Err(e) => HealthCheckResult::unhealthy(adapter_id, latency_ms, format!("Database error: {}", e)),
    }
}

// ============================================================================
// Read adapter
// ============================================================================

/// PostgreSQL-backed implementation of `BillingReadPort`
#[derive(Debug, Clone)]
pub struct PostgresBillingReads {
    pool: PgPool,
}

impl PostgresBillingReads {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<sqlx::pool::PoolConnection<Postgres>, PortError> {
        Ok(self.pool.acquire().await.map_err(DatabaseError::from)?)
    }
}

impl DomainPort for PostgresBillingReads {}

#[async_trait]
impl HealthCheckable for PostgresBillingReads {
    async fn health_check(&self) -> HealthCheckResult {
        ping(&self.pool, "postgres-billing-reads").await
    }
}

#[async_trait]
impl BillingReadPort for PostgresBillingReads {
    #[instrument(skip(self), fields(business_id = %business_id, project_id = %project_id))]
    async fn load_project(
        &self,
        business_id: BusinessId,
        project_id: ProjectId,
    ) -> Result<Option<ProjectBillingContext>, PortError> {
        let mut conn = self.conn().await?;
        let Some(row) = repo::fetch_project(&mut conn, *business_id.as_uuid(), *project_id.as_uuid()).await? else {
            return Ok(None);
        };
        let lines = repo::fetch_service_lines(&mut conn, row.id).await?;
        debug!(lines = lines.len(), "Loaded project service lines");
        Ok(Some(project_context(row, lines)?))
    }

    async fn list_project_quotes(
        &self,
        business_id: BusinessId,
        project_id: ProjectId,
    ) -> Result<Vec<Quote>, PortError> {
        let mut conn = self.conn().await?;
        let rows = repo::fetch_project_quotes(&mut conn, *business_id.as_uuid(), *project_id.as_uuid()).await?;
        Ok(convert_all(rows)?)
    }

    async fn list_project_invoices(
        &self,
        business_id: BusinessId,
        project_id: ProjectId,
    ) -> Result<Vec<Invoice>, PortError> {
        let mut conn = self.conn().await?;
        let rows = repo::fetch_project_invoices(&mut conn, *business_id.as_uuid(), *project_id.as_uuid()).await?;
        Ok(convert_all(rows)?)
    }

    #[instrument(skip(self, invoice_ids), fields(invoices = invoice_ids.len()))]
    async fn payment_aggregates(&self, invoice_ids: &[InvoiceId]) -> Result<Vec<PaymentAggregate>, PortError> {
        let ids: Vec<uuid::Uuid> = invoice_ids.iter().map(|id| *id.as_uuid()).collect();
        let mut conn = self.conn().await?;
        let rows = repo::fetch_payment_aggregates(&mut conn, &ids).await?;
        Ok(rows.into_iter().map(PaymentAggregate::from).collect())
    }

    async fn get_invoice(&self, invoice_id: InvoiceId) -> Result<Option<Invoice>, PortError> {
        let mut conn = self.conn().await?;
        let row = repo::fetch_invoice(&mut conn, *invoice_id.as_uuid(), false).await?;
        Ok(row.map(Invoice::try_from).transpose()?)
    }

    async fn list_legacy_paid_invoices(&self, business_id: BusinessId) -> Result<Vec<Invoice>, PortError> {
        let mut conn = self.conn().await?;
        let rows = repo::fetch_legacy_paid_invoices(&mut conn, *business_id.as_uuid()).await?;
        Ok(convert_all(rows)?)
    }
}

// ============================================================================
// Write adapter
// ============================================================================

/// PostgreSQL-backed implementation of `BillingStore`
#[derive(Debug, Clone)]
pub struct PostgresBillingStore {
    pool: PgPool,
}

impl PostgresBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl DomainPort for PostgresBillingStore {}

#[async_trait]
impl HealthCheckable for PostgresBillingStore {
    async fn health_check(&self) -> HealthCheckResult {
        ping(&self.pool, "postgres-billing-store").await
    }
}

#[async_trait]
impl BillingStore for PostgresBillingStore {
    async fn begin(&self) -> Result<Box<dyn BillingTx>, PortError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;
        Ok(Box::new(PgBillingTx { tx }))
    }
}

/// One database transaction
///
/// Dropping it without calling `commit` rolls back.
pub struct PgBillingTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl BillingTx for PgBillingTx {
    async fn get_invoice(&mut self, invoice_id: InvoiceId) -> Result<Option<Invoice>, PortError> {
        let row = repo::fetch_invoice(&mut self.tx, *invoice_id.as_uuid(), true).await?;
        Ok(row.map(Invoice::try_from).transpose()?)
    }

    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.id, status = ?invoice.status))]
    async fn update_invoice(&mut self, invoice: &Invoice) -> Result<(), PortError> {
        let rows = repo::update_invoice(&mut self.tx, invoice).await?;
        touched(rows, "Invoice", invoice.id)
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<InsertOutcome, PortError> {
        Ok(outcome(repo::insert_payment(&mut self.tx, payment).await?))
    }

    async fn insert_legacy_payment(&mut self, payment: &Payment) -> Result<InsertOutcome, PortError> {
        if !payment.is_legacy_backfill {
            return Err(PortError::validation("payment is not a legacy backfill row"));
        }
        Ok(outcome(repo::insert_payment(&mut self.tx, payment).await?))
    }

    async fn get_payment(&mut self, payment_id: PaymentId) -> Result<Option<Payment>, PortError> {
        let row = repo::fetch_payment(&mut self.tx, *payment_id.as_uuid()).await?;
        Ok(row.map(Payment::try_from).transpose()?)
    }

    async fn soft_delete_payment(&mut self, payment_id: PaymentId, at: DateTime<Utc>) -> Result<(), PortError> {
        let rows = repo::soft_delete_payment(&mut self.tx, *payment_id.as_uuid(), at).await?;
        touched(rows, "Payment", payment_id)
    }

    async fn payment_aggregate(&mut self, invoice_id: InvoiceId) -> Result<PaymentAggregate, PortError> {
        let row = repo::fetch_payment_aggregate(&mut self.tx, *invoice_id.as_uuid()).await?;
        Ok(row.into())
    }

    #[instrument(skip(self, entry), fields(entry_id = %entry.id, source = ?entry.source))]
    async fn insert_finance_entry(&mut self, entry: &FinanceEntry) -> Result<InsertOutcome, PortError> {
        let result = outcome(repo::insert_finance_entry(&mut self.tx, entry).await?);
        debug!(?result, "Finance entry insert");
        Ok(result)
    }

    async fn update_finance_entry(&mut self, entry: &FinanceEntry) -> Result<(), PortError> {
        let rows = repo::update_finance_entry(&mut self.tx, entry).await?;
        touched(rows, "FinanceEntry", entry.id)
    }

    async fn soft_delete_finance_entry(
        &mut self,
        entry_id: FinanceEntryId,
        at: DateTime<Utc>,
    ) -> Result<(), PortError> {
        let rows = repo::soft_delete_finance_entry(&mut self.tx, *entry_id.as_uuid(), at).await?;
        touched(rows, "FinanceEntry", entry_id)
    }

    async fn get_finance_entry(&mut self, entry_id: FinanceEntryId) -> Result<Option<FinanceEntry>, PortError> {
        let row = repo::fetch_finance_entry(&mut self.tx, *entry_id.as_uuid()).await?;
        Ok(row.map(FinanceEntry::try_from).transpose()?)
    }

    async fn find_entry_by_source(&mut self, source: &EntrySource) -> Result<Option<FinanceEntry>, PortError> {
        let row = repo::fetch_entry_by_source(&mut self.tx, source).await?;
        Ok(row.map(FinanceEntry::try_from).transpose()?)
    }

    async fn list_rule_occurrences(&mut self, rule_id: RecurringRuleId) -> Result<Vec<FinanceEntry>, PortError> {
        let rows = repo::fetch_rule_occurrences(&mut self.tx, *rule_id.as_uuid()).await?;
        Ok(convert_all(rows)?)
    }

    async fn get_rule(&mut self, rule_id: RecurringRuleId) -> Result<Option<RecurringRule>, PortError> {
        let row = repo::fetch_rule(&mut self.tx, *rule_id.as_uuid()).await?;
        Ok(row.map(RecurringRule::try_from).transpose()?)
    }

    async fn insert_rule(&mut self, rule: &RecurringRule) -> Result<InsertOutcome, PortError> {
        Ok(outcome(repo::insert_rule(&mut self.tx, rule).await?))
    }

    async fn update_rule(&mut self, rule: &RecurringRule) -> Result<(), PortError> {
        let rows = repo::update_rule(&mut self.tx, rule).await?;
        touched(rows, "RecurringRule", rule.id)
    }

    async fn find_rule_for_service(
        &mut self,
        project_id: ProjectId,
        service_id: ServiceId,
    ) -> Result<Option<RecurringRule>, PortError> {
        let row = repo::fetch_rule_for_service(&mut self.tx, *project_id.as_uuid(), *service_id.as_uuid()).await?;
        Ok(row.map(RecurringRule::try_from).transpose()?)
    }

    async fn insert_movement(&mut self, movement: &InventoryMovement) -> Result<InsertOutcome, PortError> {
        Ok(outcome(repo::insert_movement(&mut self.tx, movement).await?))
    }

    #[instrument(skip(self, entry), fields(entry_id = %entry.id, lines = entry.lines.len()))]
    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<InsertOutcome, PortError> {
        Ok(outcome(repo::insert_ledger_entry(&mut self.tx, entry).await?))
    }

    async fn get_ledger_entry(&mut self, entry_id: LedgerEntryId) -> Result<Option<LedgerEntry>, PortError> {
        let row = repo::fetch_ledger_entry(&mut self.tx, *entry_id.as_uuid()).await?;
        Ok(row.map(LedgerEntry::try_from).transpose()?)
    }

    async fn find_ledger_entry_by_source(&mut self, source: &LedgerSource) -> Result<Option<LedgerEntry>, PortError> {
        let row = repo::fetch_ledger_entry_by_source(&mut self.tx, source).await?;
        Ok(row.map(LedgerEntry::try_from).transpose()?)
    }

    async fn commit(self: Box<Self>) -> Result<(), PortError> {
        self.tx
            .commit()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), PortError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;
        Ok(())
    }
}
