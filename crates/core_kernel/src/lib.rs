//! Core Kernel - Foundational types shared by every billing-engine crate
//!
//! - Money in integer minor units and the two rounding rules
//! - Calendar months for recurring occurrences
//! - Strongly-typed identifiers
//! - Port abstractions, an injectable clock and the request-scoped dedup cache

pub mod cache;
pub mod calendar;
pub mod clock;
pub mod identifiers;
pub mod money;
pub mod ports;

pub use cache::DedupCache;
pub use calendar::{CalendarError, Timezone, YearMonth};
pub use clock::{Clock, FixedClock, SystemClock};
pub use identifiers::{
    BusinessId, ClientId, FinanceEntryId, InvoiceId, LedgerEntryId, LedgerLineId, MovementId,
    PaymentId, ProductId, ProjectId, QuoteId, RecurringRuleId, ServiceId, UserId,
};
pub use money::{apply_line_discount, distribute_percent, Currency, DiscountType, Money, MoneyError};
pub use ports::{AdapterHealth, DomainPort, HealthCheckResult, HealthCheckable, InsertOutcome, PortError};
