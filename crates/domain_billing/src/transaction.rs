//! Ledger lines and the entry builder
//!
//! A ledger entry is assembled as an [`EntryDraft`] and only becomes a
//! [`LedgerEntry`](crate::ledger::LedgerEntry) once its lines balance.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use core_kernel::money::minor_units;
use core_kernel::{BusinessId, Currency, LedgerEntryId, LedgerLineId, MovementId, UserId};

use crate::account::LedgerAccount;
use crate::error::BillingError;
use crate::inventory::MovementType;
use crate::ledger::{validate_balance, LedgerEntry};

/// Side of a ledger line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerSide {
    Debit,
    Credit,
}

impl LedgerSide {
    pub fn opposite(&self) -> Self {
        match self {
            LedgerSide::Debit => LedgerSide::Credit,
            LedgerSide::Credit => LedgerSide::Debit,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerSide::Debit => "DEBIT",
            LedgerSide::Credit => "CREDIT",
        }
    }
}

/// A single debit or credit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerLine {
    /// Unique line identifier
    pub id: LedgerLineId,
    /// Account posted to
    pub account: LedgerAccount,
    /// Debit or credit
    pub side: LedgerSide,
    /// Amount, never negative
    #[serde(with = "minor_units")]
    pub amount_cents: i64,
    /// Optional description for this line
    pub memo: Option<String>,
}

impl LedgerLine {
    pub fn debit(account: LedgerAccount, amount_cents: i64) -> Self {
        Self {
            id: LedgerLineId::new_v7(),
            account,
            side: LedgerSide::Debit,
            amount_cents,
            memo: None,
        }
    }

    pub fn credit(account: LedgerAccount, amount_cents: i64) -> Self {
        Self {
            side: LedgerSide::Credit,
            ..Self::debit(account, amount_cents)
        }
    }

    /// Same account and amount on the other side
    pub fn reversed(&self) -> Self {
        Self {
            id: LedgerLineId::new_v7(),
            account: self.account,
            side: self.side.opposite(),
            amount_cents: self.amount_cents,
            memo: self.memo.clone(),
        }
    }
}

/// What a ledger entry was posted for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerSourceType {
    InventoryMovement,
    Reversal,
}

impl LedgerSourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerSourceType::InventoryMovement => "inventory_movement",
            LedgerSourceType::Reversal => "reversal",
        }
    }
}

/// Idempotency key of a ledger entry: at most one entry per source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerSource {
    pub source_type: LedgerSourceType,
    pub source_id: Uuid,
}

impl LedgerSource {
    pub fn movement(id: MovementId) -> Self {
        Self {
            source_type: LedgerSourceType::InventoryMovement,
            source_id: *id.as_uuid(),
        }
    }

    pub fn reversal_of(entry_id: LedgerEntryId) -> Self {
        Self {
            source_type: LedgerSourceType::Reversal,
            source_id: *entry_id.as_uuid(),
        }
    }
}

/// An entry under construction
#[derive(Debug, Clone)]
pub struct EntryDraft {
    memo: String,
    date: Option<NaiveDate>,
    source: Option<LedgerSource>,
    actor: Option<UserId>,
    lines: Vec<LedgerLine>,
}

impl EntryDraft {
    /// Starts a draft
    ///
    /// # Arguments
    ///
    /// * `memo` - Description of the entry
    pub fn new(memo: impl Into<String>) -> Self {
        Self {
            memo: memo.into(),
            date: None,
            source: None,
            actor: None,
            lines: Vec::new(),
        }
    }

    /// Sets the accounting date (defaults to today, UTC)
    pub fn dated(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_source(mut self, source: LedgerSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn by(mut self, actor: Option<UserId>) -> Self {
        self.actor = actor;
        self
    }

    pub fn debit(mut self, account: LedgerAccount, amount_cents: i64) -> Self {
        self.lines.push(LedgerLine::debit(account, amount_cents));
        self
    }

    pub fn credit(mut self, account: LedgerAccount, amount_cents: i64) -> Self {
        self.lines.push(LedgerLine::credit(account, amount_cents));
        self
    }

    pub fn line(mut self, line: LedgerLine) -> Self {
        self.lines.push(line);
        self
    }

    /// Checks the draft and turns it into an entry
    ///
    /// # Errors
    ///
    /// - `Validation` without a source, with fewer than two lines, or with a
    ///   negative line amount
    /// - `UnbalancedEntry` when debits and credits differ
    pub fn finalize(self, business_id: BusinessId, currency: Currency) -> Result<LedgerEntry, BillingError> {
        let source = self
            .source
            .ok_or_else(|| BillingError::validation("ledger entry has no source"))?;
        if self.lines.len() < 2 {
            return Err(BillingError::validation(format!(
                "ledger entry needs at least two lines, got {}",
                self.lines.len()
            )));
        }
        if let Some(line) = self.lines.iter().find(|l| l.amount_cents < 0) {
            return Err(BillingError::validation(format!(
                "negative amount {} on account {}",
                line.amount_cents,
                line.account.code()
            )));
        }
        validate_balance(&self.lines)?;

        Ok(LedgerEntry {
            id: LedgerEntryId::new_v7(),
            business_id,
            date: self.date.unwrap_or_else(|| Utc::now().date_naive()),
            memo: self.memo,
            source,
            actor: self.actor,
            currency,
            lines: self.lines,
            created_at: Utc::now(),
        })
    }
}

/// Fixed debit/credit accounts per movement
///
/// | movement   | debit            | credit           |
/// |------------|------------------|------------------|
/// | IN         | Inventory        | Accounts payable |
/// | OUT        | Accounts recv.   | Sales revenue    |
/// | ADJUST (+) | Inventory        | Inventory gains  |
/// | ADJUST (−) | Inventory losses | Inventory        |
pub fn movement_accounts(movement_type: MovementType, quantity: i64) -> (LedgerAccount, LedgerAccount) {
    match movement_type {
        MovementType::In => (LedgerAccount::Inventory, LedgerAccount::AccountsPayable),
        MovementType::Out => (LedgerAccount::AccountsReceivable, LedgerAccount::SalesRevenue),
        MovementType::Adjust if quantity >= 0 => (LedgerAccount::Inventory, LedgerAccount::InventoryGains),
        MovementType::Adjust => (LedgerAccount::InventoryLosses, LedgerAccount::Inventory),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> LedgerSource {
        LedgerSource::movement(MovementId::new())
    }

    #[test]
    fn test_balanced_draft_finalizes() {
        let entry = EntryDraft::new("Stock received")
            .with_source(source())
            .debit(LedgerAccount::Inventory, 4_800)
            .credit(LedgerAccount::AccountsPayable, 4_800)
            .finalize(BusinessId::new(), Currency::EUR)
            .unwrap();

        assert_eq!(entry.lines.len(), 2);
        assert_eq!(entry.total_debits(), 4_800);
    }

    #[test]
    fn test_unbalanced_draft_is_rejected() {
        let result = EntryDraft::new("Broken")
            .with_source(source())
            .debit(LedgerAccount::Inventory, 100)
            .credit(LedgerAccount::AccountsPayable, 90)
            .finalize(BusinessId::new(), Currency::EUR);

        assert!(matches!(
            result,
            Err(BillingError::UnbalancedEntry { debits: 100, credits: 90 })
        ));
    }

    #[test]
    fn test_single_line_is_rejected() {
        let result = EntryDraft::new("Lonely")
            .with_source(source())
            .debit(LedgerAccount::Inventory, 0)
            .finalize(BusinessId::new(), Currency::EUR);
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }

    #[test]
    fn test_adjustment_accounts_follow_sign() {
        assert_eq!(
            movement_accounts(MovementType::Adjust, 3),
            (LedgerAccount::Inventory, LedgerAccount::InventoryGains)
        );
        assert_eq!(
            movement_accounts(MovementType::Adjust, -3),
            (LedgerAccount::InventoryLosses, LedgerAccount::Inventory)
        );
    }
}
