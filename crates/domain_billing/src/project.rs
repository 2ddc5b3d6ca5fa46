//! Billing view of a project

use serde::{Deserialize, Serialize};

use core_kernel::{BusinessId, ClientId, Currency, ProjectId, QuoteId};

use crate::pricing::PricingLineInput;

/// Everything the engine needs to know about a project to bill it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectBillingContext {
    pub business_id: BusinessId,
    pub project_id: ProjectId,
    pub client_id: Option<ClientId>,
    pub currency: Currency,
    /// Quote explicitly chosen as the billing basis
    pub billing_quote_id: Option<QuoteId>,
    /// Deposit share applied when pricing from service lines
    pub default_deposit_percent: i64,
    pub service_lines: Vec<PricingLineInput>,
}

impl ProjectBillingContext {
    pub fn new(business_id: BusinessId, project_id: ProjectId, currency: Currency) -> Self {
        Self {
            business_id,
            project_id,
            client_id: None,
            currency,
            billing_quote_id: None,
            default_deposit_percent: 0,
            service_lines: Vec::new(),
        }
    }
}
