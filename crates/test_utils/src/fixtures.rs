//! Pre-built Test Fixtures
//!
//! Provides ready-to-use test data for the billing engine. These fixtures
//! are consistent and predictable so assertions can use literal amounts.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::sync::Arc;

use core_kernel::{BusinessId, Currency, FixedClock, ProjectId, ServiceId, YearMonth};
use domain_billing::ports::mock::InMemoryBillingStore;
use domain_billing::{BillingService, BillingSettings, BillingUnit, PricingLineInput, ProjectBillingContext};

/// Amounts in minor units
pub struct AmountFixtures;

impl AmountFixtures {
    /// A design day: 650.00
    pub fn day_rate() -> i64 {
        65_000
    }

    /// Catalogue price of a one-off logo package: 1,200.00
    pub fn logo_package() -> i64 {
        120_000
    }

    /// Monthly hosting fee: 49.00
    pub fn hosting_monthly() -> i64 {
        4_900
    }

    /// Office rent: 1,500.00
    pub fn rent() -> i64 {
        150_000
    }

    /// Purchase price of one stocked item: 120.00
    pub fn unit_cost() -> i64 {
        12_000
    }

    /// Sale price of one stocked item: 250.00
    pub fn unit_sale() -> i64 {
        25_000
    }
}

/// Fixture for calendar data
pub struct TemporalFixtures;

impl TemporalFixtures {
    /// The fixed "now" used by fixture services: 15 March 2024, 09:00 UTC
    pub fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).unwrap()
    }

    /// The month containing [`Self::now`]
    pub fn current_month() -> YearMonth {
        YearMonth::new(2024, 3).unwrap()
    }

    /// A payment timestamp inside the current month
    pub fn paid_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 14, 30, 0).unwrap()
    }

    /// First of January 2024
    pub fn year_start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    /// Shorthand for a calendar date
    pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    /// Shorthand for a calendar month
    pub fn month(year: i32, month: u32) -> YearMonth {
        YearMonth::new(year, month).unwrap()
    }
}

/// Fixture for identifiers shared across a test
pub struct IdFixtures;

impl IdFixtures {
    pub fn business_id() -> BusinessId {
        BusinessId::new()
    }

    pub fn project_id() -> ProjectId {
        ProjectId::new()
    }

    pub fn service_id() -> ServiceId {
        ServiceId::new()
    }
}

/// Fixture for service lines as attached to projects
pub struct LineFixtures;

impl LineFixtures {
    /// Catalogue-priced one-off line
    pub fn logo_package() -> PricingLineInput {
        PricingLineInput {
            service_id: Some(IdFixtures::service_id()),
            service_price_cents: Some(AmountFixtures::logo_package()),
            ..PricingLineInput::new("Logo package", 1)
        }
    }

    /// Day-rate line priced by quantity
    pub fn design_days(days: i64) -> PricingLineInput {
        PricingLineInput {
            day_rate_cents: Some(AmountFixtures::day_rate()),
            ..PricingLineInput::new("Design days", days)
        }
    }

    /// Monthly hosting line
    pub fn hosting() -> PricingLineInput {
        PricingLineInput {
            service_id: Some(IdFixtures::service_id()),
            project_price_cents: Some(AmountFixtures::hosting_monthly()),
            billing_unit: BillingUnit::Monthly,
            ..PricingLineInput::new("Hosting", 1)
        }
    }

    /// Line with no price at any tier
    pub fn unpriced() -> PricingLineInput {
        PricingLineInput::new("Workshop", 1)
    }
}

/// Fixture for project billing contexts
pub struct ProjectFixtures;

impl ProjectFixtures {
    /// A EUR project with a logo package and three design days, 30% deposit
    ///
    /// Prices to 1,200.00 + 3 × 650.00 = 3,150.00.
    pub fn branding_project() -> ProjectBillingContext {
        let mut project = ProjectBillingContext::new(
            IdFixtures::business_id(),
            IdFixtures::project_id(),
            Currency::EUR,
        );
        project.default_deposit_percent = 30;
        project.service_lines = vec![LineFixtures::logo_package(), LineFixtures::design_days(3)];
        project
    }

    /// Total of [`Self::branding_project`] in minor units
    pub fn branding_total() -> i64 {
        AmountFixtures::logo_package() + 3 * AmountFixtures::day_rate()
    }
}

/// An in-memory service pinned to [`TemporalFixtures::now`]
pub struct ServiceFixtures;

impl ServiceFixtures {
    pub fn in_memory() -> (BillingService, InMemoryBillingStore) {
        Self::in_memory_with(BillingSettings::default())
    }

    pub fn in_memory_with(settings: BillingSettings) -> (BillingService, InMemoryBillingStore) {
        let store = InMemoryBillingStore::new();
        let service = Self::over(&store, settings);
        (service, store)
    }

    /// A service sharing `store` with the caller
    pub fn over(store: &InMemoryBillingStore, settings: BillingSettings) -> BillingService {
        BillingService::new(Arc::new(store.clone()), Arc::new(store.clone()), settings)
            .with_clock(Arc::new(FixedClock::new(TemporalFixtures::now())))
    }
}
