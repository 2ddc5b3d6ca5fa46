//! Billing repository
//!
//! SQL for every table the billing engine touches. Functions take a
//! `&mut PgConnection` so the same query runs on a pooled connection for
//! reads and inside an open transaction for writes.
//!
//! Keyed inserts use `ON CONFLICT DO NOTHING` and return the affected row
//! count; zero means the key was already held by a live row.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use core_kernel::DiscountType;
use domain_billing::{
    BillingUnit, EntrySource, FinanceEntry, FinanceEntryType, Invoice, InvoiceStatus, InventoryMovement,
    LedgerEntry, LedgerSide, LedgerSource, LedgerSourceType, MovementType, Payment, PaymentMethod, QuoteStatus,
    RecurringRule, RuleFrequency,
};

use crate::error::DatabaseError;

/// Declares a Postgres enum type together with conversions to and from the
/// domain enum of the same variants
macro_rules! pg_enum {
    ($db:ident, $type_name:literal, $domain:ident { $($variant:ident),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
        #[sqlx(type_name = $type_name, rename_all = "snake_case")]
        pub enum $db {
            $($variant),+
        }

        impl From<$domain> for $db {
            fn from(value: $domain) -> Self {
                match value {
                    $($domain::$variant => $db::$variant),+
                }
            }
        }

        impl From<$db> for $domain {
            fn from(value: $db) -> Self {
                match value {
                    $($db::$variant => $domain::$variant),+
                }
            }
        }
    };
}

pg_enum!(DbQuoteStatus, "quote_status", QuoteStatus { Draft, Sent, Signed, Rejected, Expired });
pg_enum!(DbInvoiceStatus, "invoice_status", InvoiceStatus { Draft, Sent, Paid, Cancelled });
pg_enum!(DbPaymentMethod, "payment_method", PaymentMethod { BankTransfer, Card, Cash, Check, Other });
pg_enum!(DbFinanceEntryType, "finance_entry_type", FinanceEntryType { Income, Expense });
pg_enum!(DbBillingUnit, "billing_unit", BillingUnit { OneOff, Monthly });
pg_enum!(DbDiscountType, "discount_type", DiscountType { None, Percent, Amount });
pg_enum!(DbRuleFrequency, "rule_frequency", RuleFrequency { Monthly });
pg_enum!(DbMovementType, "movement_type", MovementType { In, Out, Adjust });
pg_enum!(DbLedgerSide, "ledger_side", LedgerSide { Debit, Credit });
pg_enum!(DbLedgerSourceType, "ledger_source_type", LedgerSourceType { InventoryMovement, Reversal });

/// Discriminant of a finance entry's origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "entry_source_kind", rename_all = "snake_case")]
pub enum DbEntrySourceKind {
    Manual,
    RecurringRule,
    InventoryMovement,
    Invoice,
}

// ============================================================================
// Row types
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct ProjectRow {
    pub id: Uuid,
    pub business_id: Uuid,
    pub client_id: Option<Uuid>,
    pub currency: String,
    pub billing_quote_id: Option<Uuid>,
    pub default_deposit_percent: i64,
}

/// A project service line joined with its catalog service
#[derive(Debug, Clone, FromRow)]
pub struct ServiceLineRow {
    pub service_id: Option<Uuid>,
    pub label: String,
    pub quantity: i64,
    pub project_price_cents: Option<i64>,
    pub service_price_cents: Option<i64>,
    pub day_rate_cents: Option<i64>,
    pub discount_type: DbDiscountType,
    pub discount_value: i64,
    pub billing_unit: DbBillingUnit,
}

#[derive(Debug, Clone, FromRow)]
pub struct QuoteRow {
    pub id: Uuid,
    pub business_id: Uuid,
    pub project_id: Uuid,
    pub client_id: Option<Uuid>,
    pub currency: String,
    pub total_cents: i64,
    pub deposit_cents: i64,
    pub balance_cents: i64,
    pub deposit_percent: i64,
    pub status: DbQuoteStatus,
    pub issued_at: Option<DateTime<Utc>>,
    pub signed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct InvoiceRow {
    pub id: Uuid,
    pub business_id: Uuid,
    pub project_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub quote_id: Option<Uuid>,
    pub currency: String,
    pub total_cents: i64,
    pub status: DbInvoiceStatus,
    pub issued_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub business_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub paid_at: DateTime<Utc>,
    pub method: DbPaymentMethod,
    pub note: Option<String>,
    pub is_legacy_backfill: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PaymentAggregateRow {
    pub invoice_id: Uuid,
    pub payment_count: i64,
    pub sum_cents: i64,
    pub last_paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct FinanceEntryRow {
    pub id: Uuid,
    pub business_id: Uuid,
    pub project_id: Option<Uuid>,
    pub entry_type: DbFinanceEntryType,
    pub amount_cents: i64,
    pub currency: String,
    pub entry_date: NaiveDate,
    pub category: String,
    pub label: String,
    pub source_kind: DbEntrySourceKind,
    pub recurring_rule_id: Option<Uuid>,
    pub occurrence_month: Option<NaiveDate>,
    pub inventory_movement_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub locked_from_rule: bool,
    pub is_rule_override: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct RecurringRuleRow {
    pub id: Uuid,
    pub business_id: Uuid,
    pub project_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub entry_type: DbFinanceEntryType,
    pub amount_cents: i64,
    pub currency: String,
    pub category: String,
    pub label: String,
    pub frequency: DbRuleFrequency,
    pub start_date: NaiveDate,
    pub day_of_month: i32,
    pub end_date: Option<NaiveDate>,
    pub is_active: bool,
    pub last_invoiced_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct LedgerEntryRow {
    pub id: Uuid,
    pub business_id: Uuid,
    pub entry_date: NaiveDate,
    pub memo: String,
    pub source_type: DbLedgerSourceType,
    pub source_id: Uuid,
    pub actor: Option<Uuid>,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct LedgerLineRow {
    pub id: Uuid,
    pub account_code: String,
    pub side: DbLedgerSide,
    pub amount_cents: i64,
    pub memo: Option<String>,
}

/// A ledger entry header with its lines in posting order
#[derive(Debug, Clone)]
pub struct LedgerEntryWithLines {
    pub entry: LedgerEntryRow,
    pub lines: Vec<LedgerLineRow>,
}

/// Column values encoding an [`EntrySource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceColumns {
    pub kind: DbEntrySourceKind,
    pub recurring_rule_id: Option<Uuid>,
    pub occurrence_month: Option<NaiveDate>,
    pub inventory_movement_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
}

impl From<&EntrySource> for SourceColumns {
    fn from(source: &EntrySource) -> Self {
        let empty = SourceColumns {
            kind: DbEntrySourceKind::Manual,
            recurring_rule_id: None,
            occurrence_month: None,
            inventory_movement_id: None,
            invoice_id: None,
        };
        match *source {
            EntrySource::Manual => empty,
            EntrySource::RecurringRule { rule_id, month } => SourceColumns {
                kind: DbEntrySourceKind::RecurringRule,
                recurring_rule_id: Some(*rule_id.as_uuid()),
                occurrence_month: Some(month.first_day()),
                ..empty
            },
            EntrySource::InventoryMovement { movement_id } => SourceColumns {
                kind: DbEntrySourceKind::InventoryMovement,
                inventory_movement_id: Some(*movement_id.as_uuid()),
                ..empty
            },
            EntrySource::Invoice { invoice_id } => SourceColumns {
                kind: DbEntrySourceKind::Invoice,
                invoice_id: Some(*invoice_id.as_uuid()),
                ..empty
            },
        }
    }
}

// ============================================================================
// Projects and quotes
// ============================================================================

pub async fn fetch_project(
    conn: &mut PgConnection,
    business_id: Uuid,
    project_id: Uuid,
) -> Result<Option<ProjectRow>, DatabaseError> {
    let row = sqlx::query_as::<_, ProjectRow>(
        r#"
        SELECT id, business_id, client_id, currency, billing_quote_id, default_deposit_percent
        FROM projects
        WHERE id = $1 AND business_id = $2
        "#,
    )
    .bind(project_id)
    .bind(business_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

/// Service lines of a project in display order, with catalog prices
pub async fn fetch_service_lines(
    conn: &mut PgConnection,
    project_id: Uuid,
) -> Result<Vec<ServiceLineRow>, DatabaseError> {
    let rows = sqlx::query_as::<_, ServiceLineRow>(
        r#"
        SELECT
            ps.service_id,
            ps.label,
            ps.quantity,
            ps.price_cents AS project_price_cents,
            s.price_cents AS service_price_cents,
            s.day_rate_cents,
            ps.discount_type,
            ps.discount_value,
            ps.billing_unit
        FROM project_services ps
        LEFT JOIN services s ON s.id = ps.service_id
        WHERE ps.project_id = $1
        ORDER BY ps.position, ps.id
        "#,
    )
    .bind(project_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

pub async fn fetch_project_quotes(
    conn: &mut PgConnection,
    business_id: Uuid,
    project_id: Uuid,
) -> Result<Vec<QuoteRow>, DatabaseError> {
    let rows = sqlx::query_as::<_, QuoteRow>(
        r#"
        SELECT id, business_id, project_id, client_id, currency, total_cents, deposit_cents,
               balance_cents, deposit_percent, status, issued_at, signed_at
        FROM quotes
        WHERE business_id = $1 AND project_id = $2
        ORDER BY id
        "#,
    )
    .bind(business_id)
    .bind(project_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

// ============================================================================
// Invoices
// ============================================================================

const INVOICE_COLUMNS: &str = "id, business_id, project_id, client_id, quote_id, currency, total_cents, \
                               status, issued_at, paid_at, created_at";

pub async fn fetch_project_invoices(
    conn: &mut PgConnection,
    business_id: Uuid,
    project_id: Uuid,
) -> Result<Vec<InvoiceRow>, DatabaseError> {
    let sql = format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices WHERE business_id = $1 AND project_id = $2 ORDER BY created_at, id"
    );
    let rows = sqlx::query_as::<_, InvoiceRow>(&sql)
        .bind(business_id)
        .bind(project_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

/// Loads an invoice, optionally taking a row lock for the rest of the
/// transaction
pub async fn fetch_invoice(
    conn: &mut PgConnection,
    invoice_id: Uuid,
    for_update: bool,
) -> Result<Option<InvoiceRow>, DatabaseError> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1{lock}");
    let row = sqlx::query_as::<_, InvoiceRow>(&sql)
        .bind(invoice_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

/// PAID invoices with a `paid_at` and no live payment row
pub async fn fetch_legacy_paid_invoices(
    conn: &mut PgConnection,
    business_id: Uuid,
) -> Result<Vec<InvoiceRow>, DatabaseError> {
    let sql = format!(
        r#"
        SELECT {INVOICE_COLUMNS}
        FROM invoices i
        WHERE i.business_id = $1
          AND i.status = 'paid'
          AND i.paid_at IS NOT NULL
          AND NOT EXISTS (
              SELECT 1 FROM payments p
              WHERE p.invoice_id = i.id AND p.deleted_at IS NULL
          )
        ORDER BY i.id
        "#
    );
    let rows = sqlx::query_as::<_, InvoiceRow>(&sql)
        .bind(business_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

pub async fn update_invoice(conn: &mut PgConnection, invoice: &Invoice) -> Result<u64, DatabaseError> {
    let result = sqlx::query(
        r#"
        UPDATE invoices
        SET status = $2, issued_at = $3, paid_at = $4, total_cents = $5
        WHERE id = $1
        "#,
    )
    .bind(invoice.id.as_uuid())
    .bind(DbInvoiceStatus::from(invoice.status))
    .bind(invoice.issued_at)
    .bind(invoice.paid_at)
    .bind(invoice.total_cents)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

// ============================================================================
// Payments
// ============================================================================

/// Inserts a payment; a legacy row collides with a live legacy row of the
/// same invoice
pub async fn insert_payment(conn: &mut PgConnection, payment: &Payment) -> Result<u64, DatabaseError> {
    let result = sqlx::query(
        r#"
        INSERT INTO payments (
            id, invoice_id, business_id, amount_cents, currency, paid_at, method,
            note, is_legacy_backfill, created_at, deleted_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(payment.id.as_uuid())
    .bind(payment.invoice_id.as_uuid())
    .bind(payment.business_id.as_uuid())
    .bind(payment.amount_cents)
    .bind(payment.currency.code())
    .bind(payment.paid_at)
    .bind(DbPaymentMethod::from(payment.method))
    .bind(payment.note.as_deref())
    .bind(payment.is_legacy_backfill)
    .bind(payment.created_at)
    .bind(payment.deleted_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn fetch_payment(conn: &mut PgConnection, payment_id: Uuid) -> Result<Option<PaymentRow>, DatabaseError> {
    let row = sqlx::query_as::<_, PaymentRow>(
        r#"
        SELECT id, invoice_id, business_id, amount_cents, currency, paid_at, method,
               note, is_legacy_backfill, created_at, deleted_at
        FROM payments
        WHERE id = $1
        "#,
    )
    .bind(payment_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

/// Stamps `deleted_at` once; later calls keep the first timestamp
pub async fn soft_delete_payment(
    conn: &mut PgConnection,
    payment_id: Uuid,
    at: DateTime<Utc>,
) -> Result<u64, DatabaseError> {
    let result = sqlx::query("UPDATE payments SET deleted_at = COALESCE(deleted_at, $2) WHERE id = $1")
        .bind(payment_id)
        .bind(at)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Live payment aggregates for many invoices in one round trip
///
/// Invoices without live payments produce no row.
pub async fn fetch_payment_aggregates(
    conn: &mut PgConnection,
    invoice_ids: &[Uuid],
) -> Result<Vec<PaymentAggregateRow>, DatabaseError> {
    if invoice_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query_as::<_, PaymentAggregateRow>(
        r#"
        SELECT
            invoice_id,
            COUNT(*)::BIGINT AS payment_count,
            COALESCE(SUM(amount_cents), 0)::BIGINT AS sum_cents,
            MAX(paid_at) AS last_paid_at
        FROM payments
        WHERE invoice_id = ANY($1) AND deleted_at IS NULL
        GROUP BY invoice_id
        ORDER BY invoice_id
        "#,
    )
    .bind(invoice_ids)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

/// Aggregate of one invoice's live payments, zero when there are none
pub async fn fetch_payment_aggregate(
    conn: &mut PgConnection,
    invoice_id: Uuid,
) -> Result<PaymentAggregateRow, DatabaseError> {
    let row = sqlx::query_as::<_, PaymentAggregateRow>(
        r#"
        SELECT
            $1::UUID AS invoice_id,
            COUNT(*)::BIGINT AS payment_count,
            COALESCE(SUM(amount_cents), 0)::BIGINT AS sum_cents,
            MAX(paid_at) AS last_paid_at
        FROM payments
        WHERE invoice_id = $1 AND deleted_at IS NULL
        "#,
    )
    .bind(invoice_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

// ============================================================================
// Finance entries
// ============================================================================

const FINANCE_ENTRY_COLUMNS: &str = "id, business_id, project_id, entry_type, amount_cents, currency, entry_date, \
                                     category, label, source_kind, recurring_rule_id, occurrence_month, \
                                     inventory_movement_id, invoice_id, locked_from_rule, is_rule_override, \
                                     created_at, updated_at, deleted_at";

/// Create-if-absent on the id and on the entry's live source key
pub async fn insert_finance_entry(conn: &mut PgConnection, entry: &FinanceEntry) -> Result<u64, DatabaseError> {
    let source = SourceColumns::from(&entry.source);
    let result = sqlx::query(
        r#"
        INSERT INTO finance_entries (
            id, business_id, project_id, entry_type, amount_cents, currency, entry_date,
            category, label, source_kind, recurring_rule_id, occurrence_month,
            inventory_movement_id, invoice_id, locked_from_rule, is_rule_override,
            created_at, updated_at, deleted_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(entry.id.as_uuid())
    .bind(entry.business_id.as_uuid())
    .bind(entry.project_id.map(Uuid::from))
    .bind(DbFinanceEntryType::from(entry.entry_type))
    .bind(entry.amount_cents)
    .bind(entry.currency.code())
    .bind(entry.date)
    .bind(&entry.category)
    .bind(&entry.label)
    .bind(source.kind)
    .bind(source.recurring_rule_id)
    .bind(source.occurrence_month)
    .bind(source.inventory_movement_id)
    .bind(source.invoice_id)
    .bind(entry.locked_from_rule)
    .bind(entry.is_rule_override)
    .bind(entry.created_at)
    .bind(entry.updated_at)
    .bind(entry.deleted_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Rewrites a live entry; moving onto a held key fails with `DuplicateEntry`
pub async fn update_finance_entry(conn: &mut PgConnection, entry: &FinanceEntry) -> Result<u64, DatabaseError> {
    let source = SourceColumns::from(&entry.source);
    let result = sqlx::query(
        r#"
        UPDATE finance_entries
        SET project_id = $2, entry_type = $3, amount_cents = $4, currency = $5, entry_date = $6,
            category = $7, label = $8, source_kind = $9, recurring_rule_id = $10,
            occurrence_month = $11, inventory_movement_id = $12, invoice_id = $13,
            locked_from_rule = $14, is_rule_override = $15, updated_at = $16
        WHERE id = $1 AND deleted_at IS NULL
        "#,
    )
    .bind(entry.id.as_uuid())
    .bind(entry.project_id.map(Uuid::from))
    .bind(DbFinanceEntryType::from(entry.entry_type))
    .bind(entry.amount_cents)
    .bind(entry.currency.code())
    .bind(entry.date)
    .bind(&entry.category)
    .bind(&entry.label)
    .bind(source.kind)
    .bind(source.recurring_rule_id)
    .bind(source.occurrence_month)
    .bind(source.inventory_movement_id)
    .bind(source.invoice_id)
    .bind(entry.locked_from_rule)
    .bind(entry.is_rule_override)
    .bind(entry.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn soft_delete_finance_entry(
    conn: &mut PgConnection,
    entry_id: Uuid,
    at: DateTime<Utc>,
) -> Result<u64, DatabaseError> {
    let result = sqlx::query(
        "UPDATE finance_entries SET deleted_at = COALESCE(deleted_at, $2), updated_at = $2 WHERE id = $1",
    )
    .bind(entry_id)
    .bind(at)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn fetch_finance_entry(
    conn: &mut PgConnection,
    entry_id: Uuid,
) -> Result<Option<FinanceEntryRow>, DatabaseError> {
    let sql = format!("SELECT {FINANCE_ENTRY_COLUMNS} FROM finance_entries WHERE id = $1");
    let row = sqlx::query_as::<_, FinanceEntryRow>(&sql)
        .bind(entry_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

/// The live entry holding a keyed source; manual sources never match
pub async fn fetch_entry_by_source(
    conn: &mut PgConnection,
    source: &EntrySource,
) -> Result<Option<FinanceEntryRow>, DatabaseError> {
    let live = format!("SELECT {FINANCE_ENTRY_COLUMNS} FROM finance_entries WHERE deleted_at IS NULL");
    let query = match *source {
        EntrySource::Manual => return Ok(None),
        EntrySource::RecurringRule { rule_id, month } => {
            let sql = format!("{live} AND source_kind = 'recurring_rule' AND recurring_rule_id = $1 AND occurrence_month = $2");
            sqlx::query_as::<_, FinanceEntryRow>(&sql)
                .bind(*rule_id.as_uuid())
                .bind(month.first_day())
                .fetch_optional(&mut *conn)
                .await?
        }
        EntrySource::InventoryMovement { movement_id } => {
            let sql = format!("{live} AND source_kind = 'inventory_movement' AND inventory_movement_id = $1");
            sqlx::query_as::<_, FinanceEntryRow>(&sql)
                .bind(*movement_id.as_uuid())
                .fetch_optional(&mut *conn)
                .await?
        }
        EntrySource::Invoice { invoice_id } => {
            let sql = format!("{live} AND source_kind = 'invoice' AND invoice_id = $1");
            sqlx::query_as::<_, FinanceEntryRow>(&sql)
                .bind(*invoice_id.as_uuid())
                .fetch_optional(&mut *conn)
                .await?
        }
    };
    Ok(query)
}

/// Live occurrences of a rule ordered by month
pub async fn fetch_rule_occurrences(
    conn: &mut PgConnection,
    rule_id: Uuid,
) -> Result<Vec<FinanceEntryRow>, DatabaseError> {
    let sql = format!(
        "SELECT {FINANCE_ENTRY_COLUMNS} FROM finance_entries \
         WHERE source_kind = 'recurring_rule' AND recurring_rule_id = $1 AND deleted_at IS NULL \
         ORDER BY occurrence_month, id"
    );
    let rows = sqlx::query_as::<_, FinanceEntryRow>(&sql)
        .bind(rule_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

// ============================================================================
// Recurring rules
// ============================================================================

const RULE_COLUMNS: &str = "id, business_id, project_id, service_id, entry_type, amount_cents, currency, \
                            category, label, frequency, start_date, day_of_month, end_date, is_active, \
                            last_invoiced_at, next_run_at, created_at, updated_at";

/// Loads a rule and locks it until the transaction ends
pub async fn fetch_rule(conn: &mut PgConnection, rule_id: Uuid) -> Result<Option<RecurringRuleRow>, DatabaseError> {
    let sql = format!("SELECT {RULE_COLUMNS} FROM recurring_rules WHERE id = $1 FOR UPDATE");
    let row = sqlx::query_as::<_, RecurringRuleRow>(&sql)
        .bind(rule_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

pub async fn fetch_rule_for_service(
    conn: &mut PgConnection,
    project_id: Uuid,
    service_id: Uuid,
) -> Result<Option<RecurringRuleRow>, DatabaseError> {
    let sql = format!("SELECT {RULE_COLUMNS} FROM recurring_rules WHERE project_id = $1 AND service_id = $2");
    let row = sqlx::query_as::<_, RecurringRuleRow>(&sql)
        .bind(project_id)
        .bind(service_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

fn day_of_month_column(rule: &RecurringRule) -> Result<i32, DatabaseError> {
    i32::try_from(rule.day_of_month).map_err(|_| DatabaseError::bad_column("day_of_month", rule.day_of_month))
}

/// Create-if-absent on the id and on `(project_id, service_id)`
pub async fn insert_rule(conn: &mut PgConnection, rule: &RecurringRule) -> Result<u64, DatabaseError> {
    let result = sqlx::query(
        r#"
        INSERT INTO recurring_rules (
            id, business_id, project_id, service_id, entry_type, amount_cents, currency,
            category, label, frequency, start_date, day_of_month, end_date, is_active,
            last_invoiced_at, next_run_at, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(rule.id.as_uuid())
    .bind(rule.business_id.as_uuid())
    .bind(rule.project_id.map(Uuid::from))
    .bind(rule.service_id.map(Uuid::from))
    .bind(DbFinanceEntryType::from(rule.entry_type))
    .bind(rule.amount_cents)
    .bind(rule.currency.code())
    .bind(&rule.category)
    .bind(&rule.label)
    .bind(DbRuleFrequency::from(rule.frequency))
    .bind(rule.start_date)
    .bind(day_of_month_column(rule)?)
    .bind(rule.end_date)
    .bind(rule.is_active)
    .bind(rule.last_invoiced_at)
    .bind(rule.next_run_at)
    .bind(rule.created_at)
    .bind(rule.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn update_rule(conn: &mut PgConnection, rule: &RecurringRule) -> Result<u64, DatabaseError> {
    let result = sqlx::query(
        r#"
        UPDATE recurring_rules
        SET entry_type = $2, amount_cents = $3, currency = $4, category = $5, label = $6,
            frequency = $7, start_date = $8, day_of_month = $9, end_date = $10, is_active = $11,
            last_invoiced_at = $12, next_run_at = $13, updated_at = $14
        WHERE id = $1
        "#,
    )
    .bind(rule.id.as_uuid())
    .bind(DbFinanceEntryType::from(rule.entry_type))
    .bind(rule.amount_cents)
    .bind(rule.currency.code())
    .bind(&rule.category)
    .bind(&rule.label)
    .bind(DbRuleFrequency::from(rule.frequency))
    .bind(rule.start_date)
    .bind(day_of_month_column(rule)?)
    .bind(rule.end_date)
    .bind(rule.is_active)
    .bind(rule.last_invoiced_at)
    .bind(rule.next_run_at)
    .bind(rule.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

// ============================================================================
// Inventory and ledger
// ============================================================================

pub async fn insert_movement(conn: &mut PgConnection, movement: &InventoryMovement) -> Result<u64, DatabaseError> {
    let result = sqlx::query(
        r#"
        INSERT INTO inventory_movements (
            id, business_id, product_id, movement_type, quantity, unit_cost_cents,
            currency, occurred_on, note, created_by, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(movement.id.as_uuid())
    .bind(movement.business_id.as_uuid())
    .bind(movement.product_id.as_uuid())
    .bind(DbMovementType::from(movement.movement_type))
    .bind(movement.quantity)
    .bind(movement.unit_cost_cents)
    .bind(movement.currency.code())
    .bind(movement.occurred_on)
    .bind(movement.note.as_deref())
    .bind(movement.created_by.map(Uuid::from))
    .bind(movement.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Inserts the entry header and, only when it was created, its lines
pub async fn insert_ledger_entry(conn: &mut PgConnection, entry: &LedgerEntry) -> Result<u64, DatabaseError> {
    let created = sqlx::query(
        r#"
        INSERT INTO ledger_entries (
            id, business_id, entry_date, memo, source_type, source_id, actor, currency, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(entry.id.as_uuid())
    .bind(entry.business_id.as_uuid())
    .bind(entry.date)
    .bind(&entry.memo)
    .bind(DbLedgerSourceType::from(entry.source.source_type))
    .bind(entry.source.source_id)
    .bind(entry.actor.map(Uuid::from))
    .bind(entry.currency.code())
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if created == 0 {
        return Ok(0);
    }

    for (position, line) in entry.lines.iter().enumerate() {
        let position = i32::try_from(position).map_err(|_| DatabaseError::bad_column("position", position))?;
        sqlx::query(
            r#"
            INSERT INTO ledger_lines (id, entry_id, position, account_code, side, amount_cents, memo)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(line.id.as_uuid())
        .bind(entry.id.as_uuid())
        .bind(position)
        .bind(line.account.code())
        .bind(DbLedgerSide::from(line.side))
        .bind(line.amount_cents)
        .bind(line.memo.as_deref())
        .execute(&mut *conn)
        .await?;
    }
    Ok(created)
}

const LEDGER_ENTRY_COLUMNS: &str =
    "id, business_id, entry_date, memo, source_type, source_id, actor, currency, created_at";

async fn with_lines(
    conn: &mut PgConnection,
    entry: Option<LedgerEntryRow>,
) -> Result<Option<LedgerEntryWithLines>, DatabaseError> {
    let Some(entry) = entry else {
        return Ok(None);
    };
    let lines = sqlx::query_as::<_, LedgerLineRow>(
        "SELECT id, account_code, side, amount_cents, memo FROM ledger_lines WHERE entry_id = $1 ORDER BY position",
    )
    .bind(entry.id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(Some(LedgerEntryWithLines { entry, lines }))
}

pub async fn fetch_ledger_entry(
    conn: &mut PgConnection,
    entry_id: Uuid,
) -> Result<Option<LedgerEntryWithLines>, DatabaseError> {
    let sql = format!("SELECT {LEDGER_ENTRY_COLUMNS} FROM ledger_entries WHERE id = $1");
    let entry = sqlx::query_as::<_, LedgerEntryRow>(&sql)
        .bind(entry_id)
        .fetch_optional(&mut *conn)
        .await?;
    with_lines(conn, entry).await
}

pub async fn fetch_ledger_entry_by_source(
    conn: &mut PgConnection,
    source: &LedgerSource,
) -> Result<Option<LedgerEntryWithLines>, DatabaseError> {
    let sql = format!("SELECT {LEDGER_ENTRY_COLUMNS} FROM ledger_entries WHERE source_type = $1 AND source_id = $2");
    let entry = sqlx::query_as::<_, LedgerEntryRow>(&sql)
        .bind(DbLedgerSourceType::from(source.source_type))
        .bind(source.source_id)
        .fetch_optional(&mut *conn)
        .await?;
    with_lines(conn, entry).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::{InvoiceId, RecurringRuleId, YearMonth};

    #[test]
    fn test_recurring_source_columns() {
        let rule_id = RecurringRuleId::new();
        let month = YearMonth::new(2024, 2).unwrap();
        let columns = SourceColumns::from(&EntrySource::RecurringRule { rule_id, month });

        assert_eq!(columns.kind, DbEntrySourceKind::RecurringRule);
        assert_eq!(columns.recurring_rule_id, Some(*rule_id.as_uuid()));
        assert_eq!(columns.occurrence_month, NaiveDate::from_ymd_opt(2024, 2, 1));
        assert!(columns.invoice_id.is_none());
    }

    #[test]
    fn test_manual_source_has_no_key() {
        let columns = SourceColumns::from(&EntrySource::Manual);
        assert_eq!(columns.kind, DbEntrySourceKind::Manual);
        assert!(columns.recurring_rule_id.is_none() && columns.inventory_movement_id.is_none());
    }

    #[test]
    fn test_invoice_source_columns() {
        let invoice_id = InvoiceId::new();
        let columns = SourceColumns::from(&EntrySource::Invoice { invoice_id });
        assert_eq!(columns.kind, DbEntrySourceKind::Invoice);
        assert_eq!(columns.invoice_id, Some(*invoice_id.as_uuid()));
    }

    #[test]
    fn test_enum_conversions_are_symmetric() {
        for status in [InvoiceStatus::Draft, InvoiceStatus::Sent, InvoiceStatus::Paid, InvoiceStatus::Cancelled] {
            assert_eq!(InvoiceStatus::from(DbInvoiceStatus::from(status)), status);
        }
        assert_eq!(DbDiscountType::from(DiscountType::Percent), DbDiscountType::Percent);
        assert_eq!(MovementType::from(DbMovementType::Adjust), MovementType::Adjust);
    }
}
