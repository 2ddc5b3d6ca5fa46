//! Command definitions and dispatch

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use tracing::info;

use core_kernel::{AdapterHealth, BusinessId, ProjectId, RecurringRuleId};
use domain_billing::BillingService;

#[derive(Debug, Parser)]
#[command(name = "billing-engine")]
#[command(about = "Reconciliation, recurring billing and inventory ledger operations")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Apply pending database migrations
    Migrate,
    /// Check database connectivity of the read and write adapters
    Health,
    /// Price a project's service lines
    Pricing {
        #[arg(long)]
        business: BusinessId,
        #[arg(long)]
        project: ProjectId,
    },
    /// Reconcile a project's basis against its invoices and payments
    Summary {
        #[arg(long)]
        business: BusinessId,
        #[arg(long)]
        project: ProjectId,
    },
    /// Create payment rows for invoices marked paid before payments existed
    BackfillLegacyPayments {
        #[arg(long)]
        business: BusinessId,
    },
    /// Fill a recurring rule's occurrences up to the horizon
    GenerateOccurrences {
        #[arg(long)]
        rule: RecurringRuleId,
        /// Months ahead of the current month, at most 36
        #[arg(long)]
        horizon: Option<u32>,
    },
    /// Flip a recurring rule between active and inactive
    ToggleRule {
        #[arg(long)]
        rule: RecurringRuleId,
    },
}

fn print_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

/// Runs every command except `Migrate`, which needs the pool itself
///
/// Results are written to `out` as JSON. Missing projects print `null`.
pub async fn execute<W: Write>(command: &Command, service: &BillingService, out: &mut W) -> Result<()> {
    match command {
        Command::Migrate => bail!("migrate is handled before the service is built"),
        Command::Health => {
            let results = service.health().await;
            print_json(out, &results)?;
            if results.iter().any(|r| r.status != AdapterHealth::Healthy) {
                bail!("one or more adapters are unhealthy");
            }
        }
        Command::Pricing { business, project } => {
            let pricing = service.compute_project_pricing(*business, *project).await?;
            print_json(out, &pricing)?;
        }
        Command::Summary { business, project } => {
            let summary = service.compute_project_billing_summary(*business, *project).await?;
            print_json(out, &summary)?;
        }
        Command::BackfillLegacyPayments { business } => {
            let report = service.backfill_legacy_payments(*business).await?;
            info!(scanned = report.scanned, created = report.created, "Legacy backfill finished");
            print_json(out, &report)?;
        }
        Command::GenerateOccurrences { rule, horizon } => {
            let report = service.generate_rule_occurrences(*rule, *horizon).await?;
            print_json(out, &report)?;
        }
        Command::ToggleRule { rule } => {
            let rule = service.toggle_recurring_rule(*rule).await?;
            print_json(out, &rule)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use core_kernel::Currency;
    use domain_billing::ports::mock::InMemoryBillingStore;
    use chrono::NaiveDate;
    use domain_billing::{
        BillingSettings, FinanceEntryType, PricingLineInput, ProjectBillingContext, RecurringRule,
    };
    use std::sync::Arc;

    fn service(store: &InMemoryBillingStore) -> BillingService {
        BillingService::new(Arc::new(store.clone()), Arc::new(store.clone()), BillingSettings::default())
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_prefixed_ids() {
        let business = BusinessId::new();
        let project = ProjectId::new();
        let cli = Cli::try_parse_from([
            "billing-engine".to_string(),
            "summary".to_string(),
            "--business".to_string(),
            business.to_string(),
            "--project".to_string(),
            project.as_uuid().to_string(),
        ])
        .unwrap();

        match cli.command {
            Command::Summary { business: b, project: p } => {
                assert_eq!(b, business);
                assert_eq!(p, project);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pricing_prints_json() {
        let store = InMemoryBillingStore::new();
        let mut project = ProjectBillingContext::new(BusinessId::new(), ProjectId::new(), Currency::EUR);
        project.service_lines = vec![PricingLineInput {
            service_price_cents: Some(2_500),
            ..PricingLineInput::new("Design", 2)
        }];
        let (business, project_id) = (project.business_id, project.project_id);
        store.seed_project(project).await;

        let mut out = Vec::new();
        let command = Command::Pricing { business, project: project_id };
        execute(&command, &service(&store), &mut out).await.unwrap();

        let printed: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(printed["total_cents"], "5000");
    }

    #[tokio::test]
    async fn test_summary_of_unknown_project_prints_null() {
        let store = InMemoryBillingStore::new();
        let mut out = Vec::new();
        let command = Command::Summary {
            business: BusinessId::new(),
            project: ProjectId::new(),
        };
        execute(&command, &service(&store), &mut out).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap().trim(), "null");
    }

    #[tokio::test]
    async fn test_toggle_rule_prints_new_state() {
        let store = InMemoryBillingStore::new();
        let rule = RecurringRule::monthly(
            BusinessId::new(),
            FinanceEntryType::Expense,
            150_000,
            Currency::EUR,
            "rent",
            "Office rent",
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            1,
        )
        .unwrap();
        let rule_id = rule.id;
        store.seed_rule(rule).await;

        let mut out = Vec::new();
        execute(&Command::ToggleRule { rule: rule_id }, &service(&store), &mut out)
            .await
            .unwrap();

        let printed: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(printed["is_active"], false);
        assert!(!store.snapshot().await.rules[&rule_id].is_active);
    }

    #[tokio::test]
    async fn test_health_reports_in_memory_adapters() {
        let store = InMemoryBillingStore::new();
        let mut out = Vec::new();
        execute(&Command::Health, &service(&store), &mut out).await.unwrap();

        let printed: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(printed.as_array().map(Vec::len), Some(2));
    }
}
