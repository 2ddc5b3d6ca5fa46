//! Custom Test Assertions
//!
//! Assertion helpers over reconciliation and ledger invariants, with
//! failure messages that name the amounts involved.

use std::collections::HashMap;

use core_kernel::{RecurringRuleId, YearMonth};
use domain_billing::{
    BillingSummary, FinanceEntry, InvoicePaymentSummary, LedgerEntry, PaymentStatus, ProjectPricing,
};

/// Asserts that an entry's debits equal its credits and every line is positive
pub fn assert_entry_balanced(entry: &LedgerEntry) {
    assert!(!entry.lines.is_empty(), "Ledger entry {} has no lines", entry.id);
    for line in &entry.lines {
        assert!(
            line.amount_cents > 0,
            "Ledger entry {} has a non-positive line of {} on {}",
            entry.id,
            line.amount_cents,
            line.account.code()
        );
    }
    assert_eq!(
        entry.total_debits(),
        entry.total_credits(),
        "Ledger entry {} is unbalanced: debits={}, credits={}",
        entry.id,
        entry.total_debits(),
        entry.total_credits()
    );
}

/// Asserts that `reversal` cancels `original` account by account
pub fn assert_reverses(original: &LedgerEntry, reversal: &LedgerEntry) {
    assert_entry_balanced(reversal);
    for line in &original.lines {
        assert_eq!(
            original.net_for(line.account) + reversal.net_for(line.account),
            0,
            "Reversal {} does not cancel account {} of entry {}",
            reversal.id,
            line.account.code(),
            original.id
        );
    }
}

/// Asserts deposit and balance add up to the total
pub fn assert_pricing_split(pricing: &ProjectPricing) {
    assert_eq!(
        pricing.deposit_cents + pricing.balance_cents,
        pricing.total_cents,
        "Deposit {} + balance {} != total {}",
        pricing.deposit_cents,
        pricing.balance_cents,
        pricing.total_cents
    );
}

/// Asserts the arithmetic identities of a project summary
pub fn assert_summary_consistent(summary: &BillingSummary) {
    assert_eq!(
        summary.deposit_cents + summary.balance_cents,
        summary.total_cents,
        "Summary basis split does not add up"
    );
    assert_eq!(
        summary.remaining_to_invoice_cents,
        (summary.total_cents - summary.already_invoiced_cents).max(0),
        "remaining_to_invoice: total={}, invoiced={}",
        summary.total_cents,
        summary.already_invoiced_cents
    );
    assert_eq!(
        summary.remaining_to_collect_cents,
        (summary.already_invoiced_cents - summary.already_paid_cents).max(0),
        "remaining_to_collect: invoiced={}, paid={}",
        summary.already_invoiced_cents,
        summary.already_paid_cents
    );
    for invoice in &summary.invoices {
        assert_invoice_summary_consistent(invoice);
    }
}

/// Asserts status and remaining amount agree with the paid amount
pub fn assert_invoice_summary_consistent(summary: &InvoicePaymentSummary) {
    assert_eq!(
        summary.remaining_cents,
        (summary.total_cents - summary.paid_cents).max(0),
        "Invoice {} remaining is off: total={}, paid={}",
        summary.invoice_id,
        summary.total_cents,
        summary.paid_cents
    );
    let expected = if summary.paid_cents <= 0 {
        PaymentStatus::Unpaid
    } else if summary.paid_cents >= summary.total_cents {
        PaymentStatus::Paid
    } else {
        PaymentStatus::Partial
    };
    assert_eq!(summary.status, expected, "Invoice {} status", summary.invoice_id);
}

/// Asserts that no month holds two live occurrences of the same rule
pub fn assert_one_occurrence_per_month<'a>(entries: impl IntoIterator<Item = &'a FinanceEntry>) {
    let mut seen: HashMap<(RecurringRuleId, YearMonth), usize> = HashMap::new();
    for entry in entries.into_iter().filter(|e| e.is_live()) {
        if let (Some(rule_id), Some(month)) = (entry.rule_id(), entry.occurrence_month()) {
            *seen.entry((rule_id, month)).or_default() += 1;
        }
    }
    for ((rule_id, month), count) in seen {
        assert_eq!(count, 1, "Rule {} has {} live occurrences in {}", rule_id, count, month);
    }
}

/// Asserts the months covered by `entries`, in order
pub fn assert_occurrence_months(entries: &[FinanceEntry], expected: &[YearMonth]) {
    let months: Vec<YearMonth> = entries.iter().filter_map(FinanceEntry::occurrence_month).collect();
    assert_eq!(months, expected, "Occurrence months differ");
}
