//! Finance entries
//!
//! A finance entry is one line of the business's income/expense journal. Its
//! [`EntrySource`] is the natural key that makes automated writers
//! idempotent: at most one live entry exists per rule month, per inventory
//! movement and per invoice.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::money::minor_units;
use core_kernel::{
    BusinessId, Currency, FinanceEntryId, InvoiceId, MovementId, ProjectId, RecurringRuleId, YearMonth,
};

use crate::error::BillingError;

/// Direction of a finance entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinanceEntryType {
    Income,
    Expense,
}

impl FinanceEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinanceEntryType::Income => "INCOME",
            FinanceEntryType::Expense => "EXPENSE",
        }
    }
}

/// What produced a finance entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntrySource {
    /// Typed in by a user
    Manual,
    /// Generated by a recurring rule for one calendar month
    RecurringRule {
        rule_id: RecurringRuleId,
        month: YearMonth,
    },
    /// Mirror of an inventory movement
    InventoryMovement { movement_id: MovementId },
    /// Mirror of a fully paid invoice
    Invoice { invoice_id: InvoiceId },
}

impl EntrySource {
    /// True for sources that must be unique among live entries
    pub fn is_keyed(&self) -> bool {
        !matches!(self, EntrySource::Manual)
    }
}

/// A single income or expense line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinanceEntry {
    pub id: FinanceEntryId,
    pub business_id: BusinessId,
    pub project_id: Option<ProjectId>,
    pub entry_type: FinanceEntryType,
    #[serde(with = "minor_units")]
    pub amount_cents: i64,
    pub currency: Currency,
    pub date: NaiveDate,
    pub category: String,
    pub label: String,
    pub source: EntrySource,
    /// Manually edited; automated cascades leave it alone
    pub locked_from_rule: bool,
    /// Values differ from what the rule would generate
    pub is_rule_override: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FinanceEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        business_id: BusinessId,
        entry_type: FinanceEntryType,
        amount_cents: i64,
        currency: Currency,
        date: NaiveDate,
        category: impl Into<String>,
        label: impl Into<String>,
        source: EntrySource,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: FinanceEntryId::new_v7(),
            business_id,
            project_id: None,
            entry_type,
            amount_cents,
            currency,
            date,
            category: category.into(),
            label: label.into(),
            source,
            locked_from_rule: false,
            is_rule_override: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn with_project(mut self, project_id: Option<ProjectId>) -> Self {
        self.project_id = project_id;
        self
    }

    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn rule_id(&self) -> Option<RecurringRuleId> {
        match self.source {
            EntrySource::RecurringRule { rule_id, .. } => Some(rule_id),
            _ => None,
        }
    }

    pub fn occurrence_month(&self) -> Option<YearMonth> {
        match self.source {
            EntrySource::RecurringRule { month, .. } => Some(month),
            _ => None,
        }
    }

    /// Freezes a rule occurrence against cascades
    pub fn lock(&mut self) -> Result<(), BillingError> {
        if self.rule_id().is_none() {
            return Err(BillingError::validation(format!(
                "finance entry {} was not generated by a rule",
                self.id
            )));
        }
        self.locked_from_rule = true;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Applies a manual edit to a rule occurrence and locks it
    pub fn override_values(
        &mut self,
        amount_cents: Option<i64>,
        category: Option<String>,
        label: Option<String>,
    ) -> Result<(), BillingError> {
        if amount_cents.is_some_and(|a| a < 0) {
            return Err(BillingError::validation("amount must not be negative"));
        }
        self.lock()?;
        if let Some(amount) = amount_cents {
            self.amount_cents = amount;
        }
        if let Some(category) = category {
            self.category = category;
        }
        if let Some(label) = label {
            self.label = label;
        }
        self.is_rule_override = true;
        Ok(())
    }

    pub fn soft_delete(&mut self, at: DateTime<Utc>) {
        self.deleted_at.get_or_insert(at);
        self.updated_at = at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occurrence() -> FinanceEntry {
        let month = YearMonth::new(2024, 6).unwrap();
        FinanceEntry::new(
            BusinessId::new(),
            FinanceEntryType::Expense,
            4_900,
            Currency::EUR,
            month.clamp_day(15),
            "software",
            "Design tool seat",
            EntrySource::RecurringRule {
                rule_id: RecurringRuleId::new(),
                month,
            },
        )
    }

    #[test]
    fn test_override_locks_and_flags() {
        let mut entry = occurrence();
        entry
            .override_values(Some(5_900), None, Some("Design tool seat (annual uplift)".into()))
            .unwrap();

        assert!(entry.locked_from_rule);
        assert!(entry.is_rule_override);
        assert_eq!(entry.amount_cents, 5_900);
        assert_eq!(entry.category, "software");
    }

    #[test]
    fn test_manual_entries_cannot_be_locked() {
        let mut entry = occurrence();
        entry.source = EntrySource::Manual;
        assert!(matches!(entry.lock(), Err(BillingError::Validation(_))));
    }

    #[test]
    fn test_source_serialization_is_tagged() {
        let source = EntrySource::InventoryMovement {
            movement_id: MovementId::new(),
        };
        let json = serde_json::to_value(source).unwrap();
        assert_eq!(json["kind"], "inventory_movement");
    }
}
