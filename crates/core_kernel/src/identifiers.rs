//! Strongly-typed identifiers for domain entities
//!
//! Using newtype wrappers around UUIDs provides type safety and prevents
//! accidental mixing of different identifier types (a payment id can never be
//! passed where an invoice id is expected).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        /// Ordered by the underlying UUID bytes, which is what tie-breaks use.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates a new time-ordered identifier (v7)
            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }

            /// Returns the underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                // Strip prefix if present
                let uuid_str = s.strip_prefix(concat!($prefix, "-")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(uuid_str)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        }
    };
}

// Tenancy and sales
define_id!(BusinessId, "BIZ");
define_id!(ClientId, "CLI");
define_id!(ProjectId, "PRJ");
define_id!(ServiceId, "SVC");
define_id!(QuoteId, "QTE");

// Invoicing
define_id!(InvoiceId, "INV");
define_id!(PaymentId, "PAY");

// Recurring finance
define_id!(RecurringRuleId, "RRL");
define_id!(FinanceEntryId, "FIN");

// Inventory and ledger
define_id!(ProductId, "PRD");
define_id!(MovementId, "MVT");
define_id!(LedgerEntryId, "LED");
define_id!(LedgerLineId, "LDL");

// Actors
define_id!(UserId, "USR");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoice_id_display() {
        let id = InvoiceId::new();
        assert!(id.to_string().starts_with("INV-"));
    }

    #[test]
    fn test_id_parsing_with_and_without_prefix() {
        let original = RecurringRuleId::new_v7();
        let parsed: RecurringRuleId = original.to_string().parse().unwrap();
        assert_eq!(original, parsed);

        let bare: RecurringRuleId = original.as_uuid().to_string().parse().unwrap();
        assert_eq!(original, bare);
    }

    #[test]
    fn test_uuid_conversion() {
        let uuid = Uuid::new_v4();
        let movement = MovementId::from(uuid);
        let back: Uuid = movement.into();
        assert_eq!(uuid, back);
    }

    #[test]
    fn test_serializes_as_bare_uuid() {
        let id = PaymentId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));
    }
}
