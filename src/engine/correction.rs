//! Closes the drift found by a reconciliation scan.
//!
//! Each subject is corrected in its own unit of work. Before touching it the
//! engine recomputes the subject's drift under the write lock and skips it as
//! stale if that no longer matches the report. Corrections never edit or
//! delete a movement: bank gaps are closed with `adjustment-*` movements or by
//! replaying an aggregate update the log already proves happened.

use tracing::{info, warn};

use crate::{
    domain::{
        BankId, Direction, Distribution, DistributorId, Installment, InstallmentId, Links, Money,
        MovementId, MovementKind, PaymentState, SaleId,
    },
    engine::{
        EngineConfig,
        allocator::legs_between,
        distribution::compute_full_distribution,
        errors::LedgerError,
        reconciliation::{DriftEntry, DriftReport, Severity, Subject, movement_totals, subject_drift},
        store::{MovementDraft, Store, UnitOfWork},
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrectionAction {
    /// A bank aggregate missed updates the movement log records; applied them.
    ReplayedAggregate {
        bank: BankId,
        direction: Direction,
        amount: Money,
    },
    AdjustmentMovement {
        bank: BankId,
        movement: MovementId,
        kind: MovementKind,
        amount: Money,
    },
    RecomputedDistribution {
        sale: SaleId,
    },
    SynthesizedInstallment {
        sale: SaleId,
        installment: InstallmentId,
        amount: Money,
    },
    RaisedAmountPaid {
        sale: SaleId,
        from: Money,
        to: Money,
    },
    RealignedCredited {
        sale: SaleId,
    },
    RecomputedRemaining {
        sale: SaleId,
        from: Money,
        to: Money,
    },
    RealignedPaymentState {
        sale: SaleId,
        from: PaymentState,
        to: PaymentState,
    },
    RealignedDistributorDebt {
        distributor: DistributorId,
        from: Money,
        to: Money,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrectionSummary {
    /// Drift entries in the report this run consumed.
    pub detected: Vec<DriftEntry>,
    pub applied: Vec<CorrectionAction>,
    /// Subjects whose drift changed since the scan; rescan before correcting.
    pub stale: Vec<Subject>,
    /// Subjects with only below-threshold drift.
    pub deferred: Vec<Subject>,
    /// `UncorrectableDrift` errors, left for manual review.
    pub uncorrectable: Vec<LedgerError>,
}

impl CorrectionSummary {
    /// True when the run had nothing to do.
    pub fn is_empty(&self) -> bool {
        self.detected.is_empty()
            && self.applied.is_empty()
            && self.stale.is_empty()
            && self.uncorrectable.is_empty()
    }
}

enum Outcome {
    Applied(Vec<CorrectionAction>),
    Stale,
}

fn uncorrectable(subject: Subject, reason: impl Into<String>) -> LedgerError {
    LedgerError::UncorrectableDrift {
        subject: subject.to_string(),
        reason: reason.into(),
    }
}

fn adjustment(
    uow: &mut UnitOfWork<'_>,
    bank: BankId,
    kind: MovementKind,
    amount: Money,
    concept: &str,
) -> CorrectionAction {
    let movement = uow.append_movement(MovementDraft {
        bank,
        kind,
        amount,
        concept: format!("adjustment: {concept}"),
        links: Links::default().with_reference("reconciliation"),
    });
    CorrectionAction::AdjustmentMovement {
        bank,
        movement: movement.id,
        kind,
        amount,
    }
}

fn correct_bank(uow: &mut UnitOfWork<'_>, id: BankId) -> Result<Vec<CorrectionAction>, LedgerError> {
    let bank = uow.bank(id)?.clone();
    let (logged_in, logged_out) = movement_totals(uow.tables(), id);
    let mut actions = Vec::new();
    let mut capital = bank.current_capital;
    let mut inflows = bank.historical_inflows;
    let mut outflows = bank.historical_outflows;

    // Historical totals first: the log is trusted, but totals only ever grow.
    let gap = logged_in - inflows;
    if gap.is_positive() {
        inflows += gap;
        capital += gap;
        actions.push(CorrectionAction::ReplayedAggregate {
            bank: id,
            direction: Direction::Inflow,
            amount: gap,
        });
    } else if gap.is_negative() {
        actions.push(adjustment(
            uow,
            id,
            MovementKind::AdjustmentCredit,
            gap.abs(),
            "inflows recorded without a movement",
        ));
    }

    let gap = logged_out - outflows;
    if gap.is_positive() {
        outflows += gap;
        capital -= gap;
        actions.push(CorrectionAction::ReplayedAggregate {
            bank: id,
            direction: Direction::Outflow,
            amount: gap,
        });
    } else if gap.is_negative() {
        actions.push(adjustment(
            uow,
            id,
            MovementKind::AdjustmentDebit,
            gap.abs(),
            "outflows recorded without a movement",
        ));
    }

    // Whatever capital drift is left is explained by a new adjustment movement.
    let gap = capital - (inflows - outflows);
    if gap.is_positive() {
        inflows += gap;
        actions.push(adjustment(
            uow,
            id,
            MovementKind::AdjustmentCredit,
            gap,
            "capital above recorded flows",
        ));
    } else if gap.is_negative() {
        outflows += gap.abs();
        actions.push(adjustment(
            uow,
            id,
            MovementKind::AdjustmentDebit,
            gap.abs(),
            "capital below recorded flows",
        ));
    }

    if capital.is_negative() && !id.may_overdraw() {
        return Err(uncorrectable(
            Subject::Bank(id),
            format!("corrected capital would be negative ({capital})"),
        ));
    }
    uow.update_bank(id, |b| {
        b.current_capital = capital;
        b.historical_inflows = inflows;
        b.historical_outflows = outflows;
    })?;
    Ok(actions)
}

fn correct_sale(uow: &mut UnitOfWork<'_>, id: SaleId) -> Result<Vec<CorrectionAction>, LedgerError> {
    let subject = Subject::Sale(id);
    let sale = uow.sale(id)?.clone();
    let full = compute_full_distribution(
        sale.quantity,
        sale.unit_sale_price,
        sale.unit_cost_price,
        sale.unit_freight,
    )
    .map_err(|e| uncorrectable(subject, e.to_string()))?;
    if full.total != sale.total_price {
        return Err(uncorrectable(
            subject,
            format!(
                "stored total {} differs from unit price × quantity {}",
                sale.total_price, full.total
            ),
        ));
    }

    let mut actions = Vec::new();
    let mut updated = sale.clone();
    if updated.full != full.distribution {
        updated.full = full.distribution;
        actions.push(CorrectionAction::RecomputedDistribution { sale: id });
    }

    let installed: Money = uow.tables().installments_for(id).map(|i| i.amount).sum();
    if sale.amount_paid > sale.total_price || installed > sale.total_price {
        return Err(uncorrectable(subject, "more paid than the sale is worth"));
    }
    if installed < sale.amount_paid {
        let amount = sale.amount_paid - installed;
        let timestamp = uow.now();
        let installment = uow.append_installment(Installment {
            id: InstallmentId::from(0),
            sale: id,
            amount,
            proportion: amount.proportion_of(sale.total_price),
            legs: legs_between(&updated.full, sale.total_price, installed, sale.amount_paid)?,
            cumulative_paid: sale.amount_paid,
            resulting_state: PaymentState::for_amounts(sale.amount_paid, sale.total_price),
            timestamp,
            synthetic: true,
        });
        let count = uow.tables().installments_for(id).count();
        updated.installment_count = u32::try_from(count).unwrap_or(u32::MAX);
        updated.first_installment_at.get_or_insert(timestamp);
        updated.last_installment_at = Some(timestamp);
        actions.push(CorrectionAction::SynthesizedInstallment {
            sale: id,
            installment: installment.id,
            amount,
        });
    } else if installed > sale.amount_paid {
        updated.amount_paid = installed;
        actions.push(CorrectionAction::RaisedAmountPaid {
            sale: id,
            from: sale.amount_paid,
            to: installed,
        });
    }

    let credited: Distribution = uow.tables().installments_for(id).map(|i| i.legs).sum();
    if updated.credited != credited {
        updated.credited = credited;
        actions.push(CorrectionAction::RealignedCredited { sale: id });
    }

    let remaining_before = updated.amount_remaining;
    let state_before = updated.payment_state;
    updated.set_paid(updated.amount_paid);
    if updated.amount_remaining != remaining_before {
        actions.push(CorrectionAction::RecomputedRemaining {
            sale: id,
            from: remaining_before,
            to: updated.amount_remaining,
        });
    }
    if updated.payment_state != state_before {
        actions.push(CorrectionAction::RealignedPaymentState {
            sale: id,
            from: state_before,
            to: updated.payment_state,
        });
    }

    // Leg postings are left to `LedgerWriter::apply_distribution` or manual review.
    let owed = credited - uow.tables().reversed_for(id);
    let posted = uow.tables().posted_for(id);
    if owed != posted {
        return Err(uncorrectable(
            subject,
            format!(
                "installments net of returns credit {owed:?} but the vaults received {posted:?}"
            ),
        ));
    }

    uow.update_sale(id, |s| *s = updated)?;
    Ok(actions)
}

fn correct_distributor(
    uow: &mut UnitOfWork<'_>,
    id: DistributorId,
) -> Result<Vec<CorrectionAction>, LedgerError> {
    let stored = uow.distributor(id)?.outstanding_debt;
    let outstanding: Money = uow
        .tables()
        .purchase_orders
        .values()
        .filter(|o| o.distributor == id)
        .map(|o| o.amount_remaining)
        .sum();
    if outstanding.is_negative() {
        return Err(uncorrectable(
            Subject::Distributor(id),
            "purchase orders are overpaid",
        ));
    }
    uow.update_distributor(id, |d| d.outstanding_debt = outstanding)?;
    Ok(vec![CorrectionAction::RealignedDistributorDebt {
        distributor: id,
        from: stored,
        to: outstanding,
    }])
}

pub struct CorrectionEngine<'s, S> {
    store: &'s S,
    config: EngineConfig,
}

impl<'s, S: Store> CorrectionEngine<'s, S> {
    pub fn new(store: &'s S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Applies the minimal corrections for `report`. Safe to re-run: on a
    /// store that scans clean the summary is empty.
    pub fn apply(&self, report: &DriftReport) -> CorrectionSummary {
        let mut summary = CorrectionSummary {
            detected: report.entries.clone(),
            ..CorrectionSummary::default()
        };

        for (subject, reported) in report.by_subject() {
            if reported.iter().all(|e| e.severity == Severity::Rescan) {
                summary.deferred.push(subject);
                continue;
            }
            let threshold = self.config.rescan_threshold;
            let result = self.store.write(|uow| {
                if subject_drift(uow.tables(), subject, threshold) != reported {
                    return Ok(Outcome::Stale);
                }
                let actions = match subject {
                    Subject::Bank(id) => correct_bank(uow, id)?,
                    Subject::Sale(id) => correct_sale(uow, id)?,
                    Subject::Distributor(id) => correct_distributor(uow, id)?,
                };
                Ok::<_, LedgerError>(Outcome::Applied(actions))
            });

            match result {
                Ok(Outcome::Applied(actions)) => {
                    info!(%subject, actions = actions.len(), "corrected drift");
                    summary.applied.extend(actions);
                }
                Ok(Outcome::Stale) => {
                    warn!(%subject, "drift changed since the scan, skipping");
                    summary.stale.push(subject);
                }
                Err(error @ LedgerError::UncorrectableDrift { .. }) => {
                    warn!(%subject, %error, "drift left for manual review");
                    summary.uncorrectable.push(error);
                }
                Err(error) => {
                    warn!(%subject, %error, "correction failed");
                    summary
                        .uncorrectable
                        .push(uncorrectable(subject, error.to_string()));
                }
            }
        }
        summary
    }
}
