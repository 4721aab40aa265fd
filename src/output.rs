//! Serializes bank balances, drift reports and correction summaries to CSV.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::{
    domain::{Direction, Money},
    engine::{CorrectionAction, CorrectionSummary, DriftReport, Severity, Subject, Tables},
};

/// One row per vault: id, label, capital, inflows, outflows, balanced.
#[derive(Debug, Serialize)]
struct BankCsv<'a> {
    bank: &'static str,
    label: &'a str,
    current_capital: Decimal,
    historical_inflows: Decimal,
    historical_outflows: Decimal,
    balanced: bool,
}

#[derive(Debug, Serialize)]
struct DriftCsv {
    subject: String,
    kind: String,
    stored: Decimal,
    recomputed: Decimal,
    gap: Decimal,
    severity: &'static str,
}

#[derive(Debug, Serialize)]
struct SummaryCsv {
    outcome: &'static str,
    subject: String,
    action: &'static str,
    amount: Option<Decimal>,
    detail: String,
}

pub fn print_banks(tables: &Tables, writer: impl std::io::Write) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for bank in tables.banks.values() {
        wtr.serialize(BankCsv {
            bank: bank.id.key(),
            label: &bank.label,
            current_capital: bank.current_capital.into(),
            historical_inflows: bank.historical_inflows.into(),
            historical_outflows: bank.historical_outflows.into(),
            balanced: bank.is_balanced(),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn print_drift(report: &DriftReport, writer: impl std::io::Write) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for entry in &report.entries {
        wtr.serialize(DriftCsv {
            subject: entry.subject.to_string(),
            kind: entry.kind.to_string(),
            stored: entry.stored.into(),
            recomputed: entry.recomputed.into(),
            gap: entry.gap().into(),
            severity: match entry.severity {
                Severity::Rescan => "rescan",
                Severity::Confirmed => "confirmed",
            },
        })?;
    }
    wtr.flush()?;
    Ok(())
}

fn describe(action: &CorrectionAction) -> (Subject, &'static str, Option<Money>, String) {
    match action {
        CorrectionAction::ReplayedAggregate {
            bank,
            direction,
            amount,
        } => {
            let side = match direction {
                Direction::Inflow => "inflows",
                Direction::Outflow => "outflows",
            };
            (
                Subject::Bank(*bank),
                "replayed_aggregate",
                Some(*amount),
                side.to_owned(),
            )
        }
        CorrectionAction::AdjustmentMovement {
            bank,
            movement,
            kind,
            amount,
        } => (
            Subject::Bank(*bank),
            "adjustment_movement",
            Some(*amount),
            format!("{kind:?} #{}", u64::from(*movement)),
        ),
        CorrectionAction::RecomputedDistribution { sale } => (
            Subject::Sale(*sale),
            "recomputed_distribution",
            None,
            String::new(),
        ),
        CorrectionAction::SynthesizedInstallment {
            sale,
            installment,
            amount,
        } => (
            Subject::Sale(*sale),
            "synthesized_installment",
            Some(*amount),
            format!("installment #{}", u64::from(*installment)),
        ),
        CorrectionAction::RaisedAmountPaid { sale, from, to } => (
            Subject::Sale(*sale),
            "raised_amount_paid",
            Some(*to - *from),
            format!("{from} -> {to}"),
        ),
        CorrectionAction::RealignedCredited { sale } => (
            Subject::Sale(*sale),
            "realigned_credited",
            None,
            String::new(),
        ),
        CorrectionAction::RecomputedRemaining { sale, from, to } => (
            Subject::Sale(*sale),
            "recomputed_remaining",
            Some(*to - *from),
            format!("{from} -> {to}"),
        ),
        CorrectionAction::RealignedPaymentState { sale, from, to } => (
            Subject::Sale(*sale),
            "realigned_payment_state",
            None,
            format!("{from:?} -> {to:?}"),
        ),
        CorrectionAction::RealignedDistributorDebt {
            distributor,
            from,
            to,
        } => (
            Subject::Distributor(*distributor),
            "realigned_debt",
            Some(*to - *from),
            format!("{from} -> {to}"),
        ),
    }
}

/// Applied actions first, then skipped subjects and failures.
pub fn print_summary(summary: &CorrectionSummary, writer: impl std::io::Write) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for action in &summary.applied {
        let (subject, name, amount, detail) = describe(action);
        wtr.serialize(SummaryCsv {
            outcome: "applied",
            subject: subject.to_string(),
            action: name,
            amount: amount.map(Decimal::from),
            detail,
        })?;
    }
    let skipped = summary
        .stale
        .iter()
        .map(|s| ("stale", s))
        .chain(summary.deferred.iter().map(|s| ("deferred", s)));
    for (outcome, subject) in skipped {
        wtr.serialize(SummaryCsv {
            outcome,
            subject: subject.to_string(),
            action: "none",
            amount: None,
            detail: String::new(),
        })?;
    }
    for error in &summary.uncorrectable {
        wtr.serialize(SummaryCsv {
            outcome: "uncorrectable",
            subject: String::new(),
            action: "none",
            amount: None,
            detail: error.to_string(),
        })?;
    }
    wtr.flush()?;
    Ok(())
}
