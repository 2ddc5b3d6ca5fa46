//! Ledger accounts
//!
//! The engine posts to a small fixed chart. Codes are stored on every ledger
//! line as plain strings so reports can group by them without a join.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BillingError;

/// Types of accounts in the chart of accounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    /// Asset accounts (debit normal balance)
    Asset,
    /// Liability accounts (credit normal balance)
    Liability,
    /// Revenue accounts (credit normal balance)
    Revenue,
    /// Expense accounts (debit normal balance)
    Expense,
}

impl AccountType {
    /// Returns true if this account type has a debit normal balance
    pub fn is_debit_normal(&self) -> bool {
        matches!(self, AccountType::Asset | AccountType::Expense)
    }
}

/// The accounts inventory postings touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LedgerAccount {
    /// 1100
    AccountsReceivable,
    /// 1300
    Inventory,
    /// 2100
    AccountsPayable,
    /// 4000
    SalesRevenue,
    /// 6000
    InventoryLosses,
    /// 7000
    InventoryGains,
}

impl LedgerAccount {
    pub const ALL: [LedgerAccount; 6] = [
        LedgerAccount::AccountsReceivable,
        LedgerAccount::Inventory,
        LedgerAccount::AccountsPayable,
        LedgerAccount::SalesRevenue,
        LedgerAccount::InventoryLosses,
        LedgerAccount::InventoryGains,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            LedgerAccount::AccountsReceivable => "1100",
            LedgerAccount::Inventory => "1300",
            LedgerAccount::AccountsPayable => "2100",
            LedgerAccount::SalesRevenue => "4000",
            LedgerAccount::InventoryLosses => "6000",
            LedgerAccount::InventoryGains => "7000",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LedgerAccount::AccountsReceivable => "Accounts receivable",
            LedgerAccount::Inventory => "Inventory",
            LedgerAccount::AccountsPayable => "Accounts payable",
            LedgerAccount::SalesRevenue => "Sales revenue",
            LedgerAccount::InventoryLosses => "Inventory losses",
            LedgerAccount::InventoryGains => "Inventory gains",
        }
    }

    pub fn account_type(&self) -> AccountType {
        match self {
            LedgerAccount::AccountsReceivable | LedgerAccount::Inventory => AccountType::Asset,
            LedgerAccount::AccountsPayable => AccountType::Liability,
            LedgerAccount::SalesRevenue | LedgerAccount::InventoryGains => AccountType::Revenue,
            LedgerAccount::InventoryLosses => AccountType::Expense,
        }
    }
}

impl fmt::Display for LedgerAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.name())
    }
}

impl FromStr for LedgerAccount {
    type Err = BillingError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        LedgerAccount::ALL
            .into_iter()
            .find(|a| a.code() == code.trim())
            .ok_or_else(|| BillingError::validation(format!("unknown account code '{}'", code)))
    }
}

impl TryFrom<String> for LedgerAccount {
    type Error = BillingError;

    fn try_from(code: String) -> Result<Self, Self::Error> {
        code.parse()
    }
}

impl From<LedgerAccount> for String {
    fn from(account: LedgerAccount) -> String {
        account.code().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for account in LedgerAccount::ALL {
            assert_eq!(account.code().parse::<LedgerAccount>().unwrap(), account);
        }
        assert!("9999".parse::<LedgerAccount>().is_err());
    }

    #[test]
    fn test_normal_balances() {
        assert!(LedgerAccount::Inventory.account_type().is_debit_normal());
        assert!(LedgerAccount::InventoryLosses.account_type().is_debit_normal());
        assert!(!LedgerAccount::SalesRevenue.account_type().is_debit_normal());
        assert!(!LedgerAccount::AccountsPayable.account_type().is_debit_normal());
    }

    #[test]
    fn test_serializes_as_code() {
        let json = serde_json::to_string(&LedgerAccount::Inventory).unwrap();
        assert_eq!(json, "\"1300\"");
    }
}
