//! Double-entry ledger posting for inventory movements
//!
//! Each movement produces exactly one balanced ledger entry, keyed by the
//! movement id, inside the same transaction that records the movement.
//! Reposting returns the entry already on file. Entries are never edited;
//! corrections go through [`reverse_entry`].
//!
//! # Invariants
//!
//! - Debits equal credits within every entry (checked before any write)
//! - At most one entry per [`LedgerSource`]
//! - At most one live finance mirror per movement

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use core_kernel::{BusinessId, Currency, DedupCache, InsertOutcome, LedgerEntryId, MovementId, UserId};

use crate::account::LedgerAccount;
use crate::error::BillingError;
use crate::finance_entry::{EntrySource, FinanceEntry, FinanceEntryType};
use crate::inventory::{InventoryMovement, MovementType, Product};
use crate::ports::BillingTx;
use crate::transaction::{movement_accounts, EntryDraft, LedgerLine, LedgerSide, LedgerSource};

/// A posted, balanced ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub business_id: BusinessId,
    pub date: NaiveDate,
    pub memo: String,
    pub source: LedgerSource,
    pub actor: Option<UserId>,
    pub currency: Currency,
    pub lines: Vec<LedgerLine>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn total_debits(&self) -> i64 {
        side_total(&self.lines, LedgerSide::Debit)
    }

    pub fn total_credits(&self) -> i64 {
        side_total(&self.lines, LedgerSide::Credit)
    }

    /// Signed effect on `account`, positive on its debit side
    pub fn net_for(&self, account: LedgerAccount) -> i64 {
        self.lines
            .iter()
            .filter(|l| l.account == account)
            .map(|l| match l.side {
                LedgerSide::Debit => l.amount_cents,
                LedgerSide::Credit => -l.amount_cents,
            })
            .sum()
    }
}

fn side_total(lines: &[LedgerLine], side: LedgerSide) -> i64 {
    lines
        .iter()
        .filter(|l| l.side == side)
        .fold(0i64, |acc, l| acc.saturating_add(l.amount_cents))
}

/// Checks that debits equal credits
pub fn validate_balance(lines: &[LedgerLine]) -> Result<(), BillingError> {
    let mut debits: i128 = 0;
    let mut credits: i128 = 0;
    for line in lines {
        match line.side {
            LedgerSide::Debit => debits += i128::from(line.amount_cents),
            LedgerSide::Credit => credits += i128::from(line.amount_cents),
        }
    }

    if debits != credits {
        return Err(BillingError::UnbalancedEntry {
            debits: i64::try_from(debits).unwrap_or(i64::MAX),
            credits: i64::try_from(credits).unwrap_or(i64::MAX),
        });
    }
    Ok(())
}

/// Posting switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosterOptions {
    /// Also write an INCOME/EXPENSE finance entry for IN and OUT movements
    pub mirror_finance: bool,
}

impl Default for PosterOptions {
    fn default() -> Self {
        Self { mirror_finance: true }
    }
}

/// Request-scoped memo of entries already posted in this unit of work
pub type PostingCache = DedupCache<MovementId, LedgerEntry>;

/// Posts the ledger entry for an inventory movement
///
/// The amount is `|quantity| × unit cost`, where the unit cost falls back to
/// the product's purchase price (IN, ADJUST) or sale price (OUT). Posting the
/// same movement again returns the existing entry.
///
/// # Arguments
///
/// * `tx` - Transaction the movement was recorded in
/// * `cache` - Per-request memo short-circuiting repeated postings
/// * `movement` - The movement to post
/// * `product` - Product moved, for price fallback
/// * `actor` - User recorded on the entry
/// * `options` - Finance mirror switch
///
/// # Errors
///
/// - `Validation` when no unit cost can be determined
/// - `UnbalancedEntry` should the generated lines not balance
/// - `Port` on storage failure
#[instrument(
    skip(tx, cache, movement, product, options),
    fields(movement_id = %movement.id, movement_type = movement.movement_type.as_str())
)]
pub async fn post_for_movement(
    tx: &mut dyn BillingTx,
    cache: &mut PostingCache,
    movement: &InventoryMovement,
    product: &Product,
    actor: Option<UserId>,
    options: PosterOptions,
) -> Result<LedgerEntry, BillingError> {
    if let Some(entry) = cache.get(&movement.id) {
        debug!(entry_id = %entry.id, "Ledger entry served from request cache");
        return Ok(entry.clone());
    }

    let source = LedgerSource::movement(movement.id);
    if let Some(existing) = tx.find_ledger_entry_by_source(&source).await? {
        debug!(entry_id = %existing.id, "Movement already posted");
        if options.mirror_finance {
            ensure_finance_mirror(tx, movement, existing.total_debits()).await?;
        }
        cache.insert(movement.id, existing.clone());
        return Ok(existing);
    }

    let amount = movement.valuation_cents(product)?;
    let (debit, credit) = movement_accounts(movement.movement_type, movement.quantity);
    let memo = format!(
        "{} {} × {}",
        movement.movement_type.as_str(),
        movement.quantity.unsigned_abs(),
        product.name
    );

    let entry = EntryDraft::new(memo)
        .dated(movement.occurred_on)
        .with_source(source)
        .by(actor)
        .debit(debit, amount)
        .credit(credit, amount)
        .finalize(movement.business_id, movement.currency)?;

    let entry = match tx.insert_ledger_entry(&entry).await? {
        InsertOutcome::Created => {
            info!(entry_id = %entry.id, amount_cents = amount, "Posted ledger entry");
            entry
        }
        InsertOutcome::AlreadyExists => {
            warn!("Concurrent posting won the race, returning its entry");
            tx.find_ledger_entry_by_source(&source)
                .await?
                .ok_or_else(|| BillingError::not_found("LedgerEntry", movement.id))?
        }
    };

    if options.mirror_finance {
        ensure_finance_mirror(tx, movement, amount).await?;
    }
    cache.insert(movement.id, entry.clone());
    Ok(entry)
}

/// INCOME for OUT, EXPENSE for IN, nothing for ADJUST
async fn ensure_finance_mirror(
    tx: &mut dyn BillingTx,
    movement: &InventoryMovement,
    amount_cents: i64,
) -> Result<Option<InsertOutcome>, BillingError> {
    let entry_type = match movement.movement_type {
        MovementType::In => FinanceEntryType::Expense,
        MovementType::Out => FinanceEntryType::Income,
        MovementType::Adjust => return Ok(None),
    };
    let mirror = FinanceEntry::new(
        movement.business_id,
        entry_type,
        amount_cents,
        movement.currency,
        movement.occurred_on,
        "inventory",
        movement
            .note
            .clone()
            .unwrap_or_else(|| format!("Inventory {}", movement.movement_type.as_str())),
        EntrySource::InventoryMovement {
            movement_id: movement.id,
        },
    );

    let outcome = tx.insert_finance_entry(&mirror).await?;
    if outcome == InsertOutcome::AlreadyExists {
        debug!("Finance mirror already present");
    }
    Ok(Some(outcome))
}

/// Posts the mirror image of an entry
///
/// Keyed by the original entry id, so reversing twice returns the first
/// reversal.
#[instrument(skip(tx, reason), fields(%entry_id))]
pub async fn reverse_entry(
    tx: &mut dyn BillingTx,
    entry_id: LedgerEntryId,
    reason: &str,
    actor: Option<UserId>,
    on: NaiveDate,
) -> Result<LedgerEntry, BillingError> {
    let original = tx
        .get_ledger_entry(entry_id)
        .await?
        .ok_or_else(|| BillingError::not_found("LedgerEntry", entry_id))?;
    if original.source.source_type == crate::transaction::LedgerSourceType::Reversal {
        return Err(BillingError::validation(format!("{} is itself a reversal", entry_id)));
    }

    let source = LedgerSource::reversal_of(entry_id);
    if let Some(existing) = tx.find_ledger_entry_by_source(&source).await? {
        return Ok(existing);
    }

    let draft = original.lines.iter().fold(
        EntryDraft::new(format!("Reversal of {}: {}", entry_id, reason))
            .dated(on)
            .with_source(source)
            .by(actor),
        |draft, line| draft.line(line.reversed()),
    );
    let reversal = draft.finalize(original.business_id, original.currency)?;

    match tx.insert_ledger_entry(&reversal).await? {
        InsertOutcome::Created => {
            info!(reversal_id = %reversal.id, "Posted reversal");
            Ok(reversal)
        }
        InsertOutcome::AlreadyExists => tx
            .find_ledger_entry_by_source(&source)
            .await?
            .ok_or_else(|| BillingError::not_found("LedgerEntry", entry_id)),
    }
}
