//! Recurring finance rules
//!
//! A rule describes a monthly income or expense (a retainer, a subscription)
//! and deterministically produces one finance entry per calendar month. The
//! `(rule_id, month)` pair is the occurrence's natural key, so generation is
//! create-if-absent and can be repeated safely.
//!
//! Editing a rule may cascade to its future occurrences:
//!
//! - **Recalculate**: drop every future occurrence and generate afresh.
//! - **ApplyToFuture** (default): shift each future occurrence by the change
//!   of start month, update it in place and fill the gaps. Deactivating the
//!   rule instead drops its future occurrences.
//! - **PatchOnly**: change the rule, leave occurrences alone.
//!
//! Occurrences locked by a manual edit are never touched by any of them.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

use core_kernel::money::minor_units;
use core_kernel::{
    BusinessId, Currency, InsertOutcome, ProjectId, RecurringRuleId, ServiceId, YearMonth,
};

use crate::error::BillingError;
use crate::finance_entry::{EntrySource, FinanceEntry, FinanceEntryType};
use crate::ports::BillingTx;
use crate::pricing::{BillingUnit, PriceLine};
use crate::project::ProjectBillingContext;

/// Longest cascade horizon, in months
pub const MAX_HORIZON_MONTHS: u32 = 36;

/// Rule frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleFrequency {
    #[default]
    Monthly,
}

/// A recurring income or expense definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringRule {
    pub id: RecurringRuleId,
    pub business_id: BusinessId,
    /// Project and service the rule was created from, if any
    pub project_id: Option<ProjectId>,
    pub service_id: Option<ServiceId>,
    pub entry_type: FinanceEntryType,
    #[serde(with = "minor_units")]
    pub amount_cents: i64,
    pub currency: Currency,
    pub category: String,
    pub label: String,
    pub frequency: RuleFrequency,
    pub start_date: NaiveDate,
    /// 1..=31, clamped to the length of each month
    pub day_of_month: u32,
    pub end_date: Option<NaiveDate>,
    pub is_active: bool,
    pub last_invoiced_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecurringRule {
    /// Creates an active monthly rule
    ///
    /// # Errors
    ///
    /// `Validation` for a day of month outside `1..=31` or a negative amount
    #[allow(clippy::too_many_arguments)]
    pub fn monthly(
        business_id: BusinessId,
        entry_type: FinanceEntryType,
        amount_cents: i64,
        currency: Currency,
        category: impl Into<String>,
        label: impl Into<String>,
        start_date: NaiveDate,
        day_of_month: u32,
    ) -> Result<Self, BillingError> {
        if !(1..=31).contains(&day_of_month) {
            return Err(BillingError::validation(format!(
                "day_of_month must be between 1 and 31, got {}",
                day_of_month
            )));
        }
        if amount_cents < 0 {
            return Err(BillingError::validation("rule amount must not be negative"));
        }
        let now = Utc::now();
        Ok(Self {
            id: RecurringRuleId::new_v7(),
            business_id,
            project_id: None,
            service_id: None,
            entry_type,
            amount_cents,
            currency,
            category: category.into(),
            label: label.into(),
            frequency: RuleFrequency::Monthly,
            start_date,
            day_of_month,
            end_date: None,
            is_active: true,
            last_invoiced_at: None,
            next_run_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_end_date(mut self, end_date: Option<NaiveDate>) -> Self {
        self.end_date = end_date;
        self
    }

    pub fn for_service(mut self, project_id: ProjectId, service_id: ServiceId) -> Self {
        self.project_id = Some(project_id);
        self.service_id = Some(service_id);
        self
    }

    pub fn start_month(&self) -> YearMonth {
        YearMonth::from_date(self.start_date)
    }

    /// Date of the occurrence in `month`, or `None` outside `[start_date, end_date]`
    pub fn occurrence_date(&self, month: YearMonth) -> Option<NaiveDate> {
        let date = month.clamp_day(self.day_of_month);
        let after_end = self.end_date.is_some_and(|end| date > end);
        (date >= self.start_date && !after_end).then_some(date)
    }

    /// First occurrence date in `month` or the month after
    pub fn next_occurrence_from(&self, month: YearMonth) -> Option<NaiveDate> {
        let first = month.max(self.start_month());
        let second = first.succ().ok()?;
        first.through(second).find_map(|m| self.occurrence_date(m))
    }

    pub fn activate(&mut self) {
        self.is_active = true;
        self.updated_at = Utc::now();
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.updated_at = Utc::now();
    }

    /// Flips ACTIVE ⇄ INACTIVE and returns the new state
    pub fn toggle(&mut self) -> bool {
        if self.is_active {
            self.deactivate();
        } else {
            self.activate();
        }
        self.is_active
    }

    /// The finance entry this rule produces for `month` on `date`
    pub fn build_occurrence(&self, month: YearMonth, date: NaiveDate) -> FinanceEntry {
        FinanceEntry::new(
            self.business_id,
            self.entry_type,
            self.amount_cents,
            self.currency,
            date,
            self.category.clone(),
            self.label.clone(),
            EntrySource::RecurringRule {
                rule_id: self.id,
                month,
            },
        )
        .with_project(self.project_id)
    }
}

fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Partial update of a rule
///
/// `end_date` distinguishes "leave as is" (`None`) from "clear"
/// (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct RulePatch {
    #[serde(default, with = "core_kernel::money::option_minor_units")]
    #[validate(range(min = 0, message = "amount must not be negative"))]
    pub amount_cents: Option<i64>,
    #[serde(default)]
    #[validate(length(min = 1, max = 120))]
    pub category: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, max = 200))]
    pub label: Option<String>,
    #[serde(default)]
    pub entry_type: Option<FinanceEntryType>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    #[validate(range(min = 1, max = 31))]
    pub day_of_month: Option<u32>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub end_date: Option<Option<NaiveDate>>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl RulePatch {
    /// The rule with this patch applied
    ///
    /// # Errors
    ///
    /// `Validation` if a field is out of range or the resulting end date
    /// precedes the start date.
    pub fn apply_to(&self, rule: &RecurringRule) -> Result<RecurringRule, BillingError> {
        self.validate()?;

        let mut updated = rule.clone();
        if let Some(amount) = self.amount_cents {
            updated.amount_cents = amount;
        }
        if let Some(category) = &self.category {
            updated.category = category.clone();
        }
        if let Some(label) = &self.label {
            updated.label = label.clone();
        }
        if let Some(entry_type) = self.entry_type {
            updated.entry_type = entry_type;
        }
        if let Some(start) = self.start_date {
            updated.start_date = start;
        }
        if let Some(day) = self.day_of_month {
            updated.day_of_month = day;
        }
        if let Some(end) = self.end_date {
            updated.end_date = end;
        }
        if let Some(active) = self.is_active {
            updated.is_active = active;
        }

        if let Some(end) = updated.end_date {
            if end < updated.start_date {
                return Err(BillingError::validation(format!(
                    "end_date {} precedes start_date {}",
                    end, updated.start_date
                )));
            }
        }
        Ok(updated)
    }
}

/// How a rule change reaches existing occurrences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeMode {
    PatchOnly,
    ApplyToFuture,
    Recalculate,
}

/// Caller-supplied cascade flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeOptions {
    /// Unset means `true`
    #[serde(default)]
    pub apply_to_future: Option<bool>,
    #[serde(default)]
    pub recalculate_future: bool,
    /// Unset means the configured default
    #[serde(default)]
    pub horizon_months: Option<u32>,
}

impl CascadeOptions {
    pub fn recalculate() -> Self {
        Self {
            recalculate_future: true,
            ..Self::default()
        }
    }

    pub fn patch_only() -> Self {
        Self {
            apply_to_future: Some(false),
            ..Self::default()
        }
    }

    pub fn mode(&self) -> CascadeMode {
        if self.recalculate_future {
            CascadeMode::Recalculate
        } else if self.apply_to_future.unwrap_or(true) {
            CascadeMode::ApplyToFuture
        } else {
            CascadeMode::PatchOnly
        }
    }

    /// Effective horizon, bounded by [`MAX_HORIZON_MONTHS`]
    pub fn horizon(&self, default_horizon: u32) -> Result<u32, BillingError> {
        let horizon = self.horizon_months.unwrap_or(default_horizon);
        if horizon > MAX_HORIZON_MONTHS {
            return Err(BillingError::validation(format!(
                "horizon of {} months exceeds the maximum of {}",
                horizon, MAX_HORIZON_MONTHS
            )));
        }
        Ok(horizon)
    }
}

/// Counts from one generation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub created: usize,
    /// Months already holding a live occurrence
    pub existing: usize,
    /// Months outside the rule's date window
    pub skipped: usize,
}

/// Result of a rule change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleChangeOutcome {
    pub updated_rule: RecurringRule,
    pub mode: CascadeMode,
    /// Occurrences created, updated or soft-deleted
    pub occurrences_touched: usize,
}

/// Creates the missing occurrences of `rule` for every month in `[from, to]`
///
/// Months before `start_date` or after `end_date` are skipped, months that
/// already hold a live occurrence are left as they are. Inactive rules
/// generate nothing.
///
/// # Errors
///
/// `Validation` if the range spans more than [`MAX_HORIZON_MONTHS`].
#[instrument(skip(tx, rule), fields(rule_id = %rule.id, %from, %to))]
pub async fn generate_occurrences(
    tx: &mut dyn BillingTx,
    rule: &RecurringRule,
    from: YearMonth,
    to: YearMonth,
) -> Result<GenerationReport, BillingError> {
    let mut report = GenerationReport::default();
    if !rule.is_active {
        debug!("Rule inactive, nothing generated");
        return Ok(report);
    }
    if from.months_until(to) > i64::from(MAX_HORIZON_MONTHS) {
        return Err(BillingError::validation(format!(
            "cannot generate more than {} months at once ({} to {})",
            MAX_HORIZON_MONTHS, from, to
        )));
    }

    for month in from.through(to) {
        let Some(date) = rule.occurrence_date(month) else {
            report.skipped += 1;
            continue;
        };
        match tx.insert_finance_entry(&rule.build_occurrence(month, date)).await? {
            InsertOutcome::Created => report.created += 1,
            InsertOutcome::AlreadyExists => report.existing += 1,
        }
    }

    debug!(
        created = report.created,
        existing = report.existing,
        skipped = report.skipped,
        "Generated occurrences"
    );
    Ok(report)
}

/// Applies `patch` to `rule` and cascades it to future occurrences
///
/// "Future" is every occurrence month from `current` onward. The horizon
/// comes from `options`, falling back to `default_horizon`.
///
/// # Errors
///
/// - `Validation` for an invalid patch or a horizon beyond 36 months
/// - `Port` for storage failures; the caller rolls the transaction back
#[instrument(skip(tx, rule, patch), fields(rule_id = %rule.id, %current, mode = ?options.mode()))]
pub async fn apply_rule_change(
    tx: &mut dyn BillingTx,
    rule: &RecurringRule,
    patch: &RulePatch,
    options: &CascadeOptions,
    current: YearMonth,
    default_horizon: u32,
) -> Result<RuleChangeOutcome, BillingError> {
    let horizon = options.horizon(default_horizon)?;
    let mode = options.mode();
    let mut updated = patch.apply_to(rule)?;
    let until = current.add_months(i64::from(horizon))?;
    let now = Utc::now();

    updated.next_run_at = if updated.is_active {
        updated.next_occurrence_from(current)
    } else {
        None
    };
    updated.updated_at = now;

    let mut touched = 0;
    match mode {
        CascadeMode::PatchOnly => {
            tx.update_rule(&updated).await?;
        }
        CascadeMode::Recalculate => {
            touched += soft_delete_future(tx, rule, current, now).await?;
            tx.update_rule(&updated).await?;
            touched += generate_occurrences(tx, &updated, current, until).await?.created;
        }
        // Only the switch from active to inactive drops the future.
        CascadeMode::ApplyToFuture if rule.is_active && !updated.is_active => {
            touched += soft_delete_future(tx, rule, current, now).await?;
            tx.update_rule(&updated).await?;
        }
        CascadeMode::ApplyToFuture => {
            touched += shift_future(tx, rule, &updated, current, now).await?;
            tx.update_rule(&updated).await?;
            touched += generate_occurrences(tx, &updated, current, until).await?.created;
        }
    }

    info!(occurrences_touched = touched, "Applied recurring rule change");
    Ok(RuleChangeOutcome {
        updated_rule: updated,
        mode,
        occurrences_touched: touched,
    })
}

fn is_future_unlocked(entry: &FinanceEntry, current: YearMonth) -> bool {
    !entry.locked_from_rule && entry.occurrence_month().is_some_and(|m| m >= current)
}

async fn soft_delete_future(
    tx: &mut dyn BillingTx,
    rule: &RecurringRule,
    current: YearMonth,
    now: DateTime<Utc>,
) -> Result<usize, BillingError> {
    let occurrences = tx.list_rule_occurrences(rule.id).await?;
    let mut deleted = 0;
    for entry in occurrences.iter().filter(|e| is_future_unlocked(e, current)) {
        tx.soft_delete_finance_entry(entry.id, now).await?;
        deleted += 1;
    }
    debug!(deleted, "Soft-deleted future occurrences");
    Ok(deleted)
}

/// Moves each future unlocked occurrence by the change of start month
async fn shift_future(
    tx: &mut dyn BillingTx,
    old: &RecurringRule,
    new: &RecurringRule,
    current: YearMonth,
    now: DateTime<Utc>,
) -> Result<usize, BillingError> {
    let delta = old.start_month().months_until(new.start_month());
    let occurrences = tx.list_rule_occurrences(old.id).await?;

    let (mut movers, fixed): (Vec<FinanceEntry>, Vec<FinanceEntry>) = occurrences
        .into_iter()
        .partition(|e| is_future_unlocked(e, current));
    let mut occupied: HashSet<YearMonth> = fixed.iter().filter_map(|e| e.occurrence_month()).collect();

    // Move away from the direction of travel first so a mover never lands on
    // a row that has not moved yet.
    movers.sort_by_key(|e| e.occurrence_month());
    if delta > 0 {
        movers.reverse();
    }

    let mut touched = 0;
    for mut entry in movers {
        let Some(old_month) = entry.occurrence_month() else {
            continue;
        };
        let new_month = old_month.add_months(delta)?;
        let target = new.occurrence_date(new_month);

        match target {
            Some(date) if !occupied.contains(&new_month) => {
                entry.source = EntrySource::RecurringRule {
                    rule_id: new.id,
                    month: new_month,
                };
                entry.date = date;
                entry.amount_cents = new.amount_cents;
                entry.currency = new.currency;
                entry.entry_type = new.entry_type;
                entry.category = new.category.clone();
                entry.label = new.label.clone();
                entry.updated_at = now;
                tx.update_finance_entry(&entry).await?;
                occupied.insert(new_month);
            }
            Some(_) => {
                warn!(%old_month, %new_month, entry_id = %entry.id, "Target month is held by another occurrence");
                tx.soft_delete_finance_entry(entry.id, now).await?;
            }
            None => {
                tx.soft_delete_finance_entry(entry.id, now).await?;
            }
        }
        touched += 1;
    }
    debug!(delta, touched, "Shifted future occurrences");
    Ok(touched)
}

/// Creates or refreshes the rule behind a MONTHLY service line
///
/// Called the first time the line is invoiced: the rule starts on the
/// invoicing date and bills the line total every month. Later invoicing only
/// bumps `last_invoiced_at`.
#[instrument(skip(tx, project, line), fields(project_id = %project.project_id))]
pub async fn ensure_rule_for_monthly_line(
    tx: &mut dyn BillingTx,
    project: &ProjectBillingContext,
    line: &PriceLine,
    invoiced_at: DateTime<Utc>,
) -> Result<(RecurringRule, InsertOutcome), BillingError> {
    if line.billing_unit != BillingUnit::Monthly {
        return Err(BillingError::validation(format!("line '{}' is not billed monthly", line.label)));
    }
    let service_id = line
        .service_id
        .ok_or_else(|| BillingError::validation(format!("line '{}' has no service", line.label)))?;

    if let Some(mut rule) = tx.find_rule_for_service(project.project_id, service_id).await? {
        rule.last_invoiced_at = Some(invoiced_at);
        rule.updated_at = Utc::now();
        tx.update_rule(&rule).await?;
        return Ok((rule, InsertOutcome::AlreadyExists));
    }

    let start = invoiced_at.date_naive();
    let mut rule = RecurringRule::monthly(
        project.business_id,
        FinanceEntryType::Income,
        line.line_total_cents,
        project.currency,
        "services",
        line.label.clone(),
        start,
        start.day(),
    )?
    .for_service(project.project_id, service_id);
    rule.last_invoiced_at = Some(invoiced_at);
    rule.next_run_at = rule.next_occurrence_from(YearMonth::from_date(start));

    match tx.insert_rule(&rule).await? {
        InsertOutcome::Created => {
            info!(rule_id = %rule.id, %service_id, "Created recurring rule for monthly line");
            Ok((rule, InsertOutcome::Created))
        }
        InsertOutcome::AlreadyExists => {
            let existing = tx
                .find_rule_for_service(project.project_id, service_id)
                .await?
                .ok_or_else(|| BillingError::not_found("RecurringRule", service_id))?;
            Ok((existing, InsertOutcome::AlreadyExists))
        }
    }
}

/// Plans the single occurrence of `rule` in `month`
///
/// # Errors
///
/// - `Conflict` ("already planned") if the month holds a live occurrence
/// - `Validation` if the rule is inactive or `month` is outside its window
pub async fn plan_occurrence(
    tx: &mut dyn BillingTx,
    rule: &RecurringRule,
    month: YearMonth,
) -> Result<FinanceEntry, BillingError> {
    if !rule.is_active {
        return Err(BillingError::validation(format!("rule {} is inactive", rule.id)));
    }
    let date = rule.occurrence_date(month).ok_or_else(|| {
        BillingError::validation(format!("{} is outside the window of rule {}", month, rule.id))
    })?;

    let entry = rule.build_occurrence(month, date);
    match tx.insert_finance_entry(&entry).await? {
        InsertOutcome::Created => Ok(entry),
        InsertOutcome::AlreadyExists => Err(BillingError::conflict(format!(
            "rule {} is already planned for {}",
            rule.id, month
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ym(y: i32, m: u32) -> YearMonth {
        YearMonth::new(y, m).unwrap()
    }

    fn rule(start: NaiveDate, day: u32) -> RecurringRule {
        RecurringRule::monthly(
            BusinessId::new(),
            FinanceEntryType::Expense,
            2_000,
            Currency::EUR,
            "rent",
            "Studio rent",
            start,
            day,
        )
        .unwrap()
    }

    #[test]
    fn test_occurrence_dates_respect_window() {
        let r = rule(date(2024, 1, 20), 10).with_end_date(Some(date(2024, 4, 5)));

        // Jan 10 precedes the start date.
        assert_eq!(r.occurrence_date(ym(2024, 1)), None);
        assert_eq!(r.occurrence_date(ym(2024, 2)), Some(date(2024, 2, 10)));
        assert_eq!(r.occurrence_date(ym(2024, 3)), Some(date(2024, 3, 10)));
        // Apr 10 follows the end date.
        assert_eq!(r.occurrence_date(ym(2024, 4)), None);
    }

    #[test]
    fn test_next_occurrence_skips_first_month_when_needed() {
        let r = rule(date(2024, 1, 20), 10);
        assert_eq!(r.next_occurrence_from(ym(2023, 6)), Some(date(2024, 2, 10)));
    }

    #[test]
    fn test_mode_resolution() {
        assert_eq!(CascadeOptions::default().mode(), CascadeMode::ApplyToFuture);
        assert_eq!(CascadeOptions::patch_only().mode(), CascadeMode::PatchOnly);
        assert_eq!(CascadeOptions::recalculate().mode(), CascadeMode::Recalculate);

        let both = CascadeOptions {
            apply_to_future: Some(false),
            recalculate_future: true,
            horizon_months: None,
        };
        assert_eq!(both.mode(), CascadeMode::Recalculate);
    }

    #[test]
    fn test_horizon_bound() {
        assert_eq!(CascadeOptions::default().horizon(12).unwrap(), 12);
        let long = CascadeOptions {
            horizon_months: Some(37),
            ..CascadeOptions::default()
        };
        assert!(matches!(long.horizon(12), Err(BillingError::Validation(_))));
    }

    #[test]
    fn test_patch_rejects_end_before_start() {
        let r = rule(date(2024, 3, 1), 1);
        let patch = RulePatch {
            end_date: Some(Some(date(2024, 2, 1))),
            ..RulePatch::default()
        };
        assert!(matches!(patch.apply_to(&r), Err(BillingError::Validation(_))));
    }

    #[test]
    fn test_patch_can_clear_end_date() {
        let r = rule(date(2024, 3, 1), 1).with_end_date(Some(date(2024, 12, 31)));
        let patch: RulePatch = serde_json::from_str(r#"{"end_date": null}"#).unwrap();
        assert_eq!(patch.end_date, Some(None));
        assert_eq!(patch.apply_to(&r).unwrap().end_date, None);

        let untouched: RulePatch = serde_json::from_str("{}").unwrap();
        assert_eq!(untouched.apply_to(&r).unwrap().end_date, Some(date(2024, 12, 31)));
    }

    #[test]
    fn test_patch_validates_day_of_month() {
        let r = rule(date(2024, 3, 1), 1);
        let patch = RulePatch {
            day_of_month: Some(32),
            ..RulePatch::default()
        };
        assert!(matches!(patch.apply_to(&r), Err(BillingError::Validation(_))));
    }

    #[test]
    fn test_toggle() {
        let mut r = rule(date(2024, 3, 1), 1);
        assert!(!r.toggle());
        assert!(r.toggle());
    }
}
