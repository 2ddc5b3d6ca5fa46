//! Test Data Builders
//!
//! Provides builder patterns for constructing billing records with sensible
//! defaults. Tests set only the fields they care about.

use chrono::{DateTime, NaiveDate, Utc};

use core_kernel::{BusinessId, Currency, ProjectId};
use domain_billing::{
    FinanceEntryType, InventoryMovement, Invoice, InvoiceStatus, MovementType, PricingLineInput, Product,
    ProjectBillingContext, Quote, QuoteStatus, RecurringRule,
};

use crate::fixtures::{AmountFixtures, IdFixtures, TemporalFixtures};

/// Builder for project billing contexts
pub struct TestProjectBuilder {
    context: ProjectBillingContext,
}

impl Default for TestProjectBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestProjectBuilder {
    /// Creates an EUR project with no lines and no deposit
    pub fn new() -> Self {
        Self {
            context: ProjectBillingContext::new(IdFixtures::business_id(), IdFixtures::project_id(), Currency::EUR),
        }
    }

    pub fn with_business(mut self, business_id: BusinessId) -> Self {
        self.context.business_id = business_id;
        self
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.context.currency = currency;
        self
    }

    pub fn with_deposit_percent(mut self, percent: i64) -> Self {
        self.context.default_deposit_percent = percent;
        self
    }

    pub fn with_line(mut self, line: PricingLineInput) -> Self {
        self.context.service_lines.push(line);
        self
    }

    pub fn build(self) -> ProjectBillingContext {
        self.context
    }
}

/// Builder for quotes of a project
pub struct TestQuoteBuilder {
    business_id: BusinessId,
    project_id: ProjectId,
    currency: Currency,
    total_cents: i64,
    deposit_percent: i64,
    signed_at: Option<DateTime<Utc>>,
}

impl TestQuoteBuilder {
    /// Draft quote for `project` with the project's currency
    pub fn for_project(project: &ProjectBillingContext) -> Self {
        Self {
            business_id: project.business_id,
            project_id: project.project_id,
            currency: project.currency,
            total_cents: AmountFixtures::logo_package(),
            deposit_percent: project.default_deposit_percent,
            signed_at: None,
        }
    }

    pub fn with_total(mut self, total_cents: i64) -> Self {
        self.total_cents = total_cents;
        self
    }

    pub fn with_deposit_percent(mut self, percent: i64) -> Self {
        self.deposit_percent = percent;
        self
    }

    /// Sends and signs the quote at `at`
    pub fn signed_at(mut self, at: DateTime<Utc>) -> Self {
        self.signed_at = Some(at);
        self
    }

    pub fn build(self) -> Quote {
        let mut quote = Quote::with_total(
            self.business_id,
            self.project_id,
            self.currency,
            self.total_cents,
            self.deposit_percent,
        );
        if let Some(at) = self.signed_at {
            quote.issued_at = Some(at);
            quote.signed_at = Some(at);
            quote.status = QuoteStatus::Signed;
        }
        quote
    }
}

/// Builder for invoices
pub struct TestInvoiceBuilder {
    business_id: BusinessId,
    project_id: Option<ProjectId>,
    currency: Currency,
    total_cents: i64,
    status: InvoiceStatus,
    paid_at: Option<DateTime<Utc>>,
}

impl Default for TestInvoiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestInvoiceBuilder {
    /// A sent EUR invoice for a fresh business, not attached to a project
    pub fn new() -> Self {
        Self {
            business_id: IdFixtures::business_id(),
            project_id: None,
            currency: Currency::EUR,
            total_cents: AmountFixtures::logo_package(),
            status: InvoiceStatus::Sent,
            paid_at: None,
        }
    }

    /// A sent invoice billing `project`
    pub fn for_project(project: &ProjectBillingContext) -> Self {
        Self {
            business_id: project.business_id,
            project_id: Some(project.project_id),
            currency: project.currency,
            ..Self::new()
        }
    }

    pub fn with_business(mut self, business_id: BusinessId) -> Self {
        self.business_id = business_id;
        self
    }

    pub fn with_total(mut self, total_cents: i64) -> Self {
        self.total_cents = total_cents;
        self
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }

    pub fn with_status(mut self, status: InvoiceStatus) -> Self {
        self.status = status;
        self
    }

    /// Marked paid on the invoice itself, with no payment rows
    pub fn legacy_paid_at(mut self, at: DateTime<Utc>) -> Self {
        self.status = InvoiceStatus::Paid;
        self.paid_at = Some(at);
        self
    }

    pub fn build(self) -> Invoice {
        let mut invoice = Invoice::new(self.business_id, self.project_id, self.currency, self.total_cents);
        invoice.status = self.status;
        if self.status != InvoiceStatus::Draft {
            invoice.issued_at = Some(TemporalFixtures::now());
        }
        invoice.paid_at = self.paid_at;
        invoice
    }
}

/// Builder for monthly recurring rules
pub struct TestRuleBuilder {
    business_id: BusinessId,
    entry_type: FinanceEntryType,
    amount_cents: i64,
    currency: Currency,
    category: String,
    label: String,
    start_date: NaiveDate,
    day_of_month: u32,
    end_date: Option<NaiveDate>,
    is_active: bool,
}

impl Default for TestRuleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRuleBuilder {
    /// Office rent due on the 1st from January 2024, open-ended
    pub fn new() -> Self {
        Self {
            business_id: IdFixtures::business_id(),
            entry_type: FinanceEntryType::Expense,
            amount_cents: AmountFixtures::rent(),
            currency: Currency::EUR,
            category: "rent".to_string(),
            label: "Office rent".to_string(),
            start_date: TemporalFixtures::year_start(),
            day_of_month: 1,
            end_date: None,
            is_active: true,
        }
    }

    pub fn with_business(mut self, business_id: BusinessId) -> Self {
        self.business_id = business_id;
        self
    }

    pub fn income(mut self) -> Self {
        self.entry_type = FinanceEntryType::Income;
        self
    }

    pub fn with_amount(mut self, amount_cents: i64) -> Self {
        self.amount_cents = amount_cents;
        self
    }

    pub fn starting(mut self, start_date: NaiveDate) -> Self {
        self.start_date = start_date;
        self
    }

    pub fn on_day(mut self, day_of_month: u32) -> Self {
        self.day_of_month = day_of_month;
        self
    }

    pub fn ending(mut self, end_date: NaiveDate) -> Self {
        self.end_date = Some(end_date);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Builds the rule
    ///
    /// # Panics
    ///
    /// Panics if the day of month or amount is out of range
    pub fn build(self) -> RecurringRule {
        let mut rule = RecurringRule::monthly(
            self.business_id,
            self.entry_type,
            self.amount_cents,
            self.currency,
            self.category,
            self.label,
            self.start_date,
            self.day_of_month,
        )
        .expect("test rule must be valid")
        .with_end_date(self.end_date);
        rule.is_active = self.is_active;
        rule
    }
}

/// Builder for a product and its movements
pub struct TestStockBuilder {
    product: Product,
}

impl Default for TestStockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestStockBuilder {
    /// An EUR product priced at the fixture purchase and sale prices
    pub fn new() -> Self {
        let product = Product::new(IdFixtures::business_id(), "Walnut desk", Currency::EUR)
            .with_prices(Some(AmountFixtures::unit_cost()), Some(AmountFixtures::unit_sale()));
        Self { product }
    }

    pub fn with_business(mut self, business_id: BusinessId) -> Self {
        self.product.business_id = business_id;
        self
    }

    pub fn without_prices(mut self) -> Self {
        self.product = self.product.with_prices(None, None);
        self
    }

    pub fn product(&self) -> &Product {
        &self.product
    }

    /// A movement of this product dated inside the fixture month
    pub fn movement(&self, movement_type: MovementType, quantity: i64) -> InventoryMovement {
        InventoryMovement::new(
            &self.product,
            movement_type,
            quantity,
            TemporalFixtures::date(2024, 3, 12),
        )
    }

    pub fn build(self) -> Product {
        self.product
    }
}
