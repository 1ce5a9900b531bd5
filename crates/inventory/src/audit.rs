//! Per-lot quality gate and the entry-order status rollup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{AuditRecordId, DomainError, DomainResult, EntryOrderId, LotId, UserId};

use crate::lot::{AuditStatus, ProductLot};
use crate::packaging::{Packaging, PackagingCondition, PackagingKind};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Passed,
    Failed,
}

impl From<AuditResult> for AuditStatus {
    fn from(value: AuditResult) -> Self {
        match value {
            AuditResult::Passed => AuditStatus::Passed,
            AuditResult::Failed => AuditStatus::Failed,
        }
    }
}

/// Packaging as observed by the reviewer, replacing what was declared.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagingCorrection {
    pub kind: PackagingKind,
    pub condition: PackagingCondition,
}

/// One audit verdict as submitted by a reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSubmission {
    pub lot_id: LotId,
    pub result: AuditResult,
    pub notes: Option<String>,
    pub correction: Option<PackagingCorrection>,
}

/// Amounts written off by a failed audit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub quantity: i64,
    pub weight: i64,
}

/// Immutable record of one audit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    id: AuditRecordId,
    lot_id: LotId,
    entry_order_id: EntryOrderId,
    reviewer: UserId,
    result: AuditResult,
    notes: Option<String>,
    previous_packaging: Packaging,
    corrected_packaging: Option<Packaging>,
    discrepancy: Option<Discrepancy>,
    recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn id(&self) -> AuditRecordId {
        self.id
    }

    pub fn lot_id(&self) -> LotId {
        self.lot_id
    }

    pub fn entry_order_id(&self) -> EntryOrderId {
        self.entry_order_id
    }

    pub fn reviewer(&self) -> UserId {
        self.reviewer
    }

    pub fn result(&self) -> AuditResult {
        self.result
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn previous_packaging(&self) -> Packaging {
        self.previous_packaging
    }

    pub fn corrected_packaging(&self) -> Option<Packaging> {
        self.corrected_packaging
    }

    pub fn discrepancy(&self) -> Option<Discrepancy> {
        self.discrepancy
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }
}

impl ProductLot {
    /// Move a pending lot to its terminal audit status.
    ///
    /// A failed lot loses its remaining amounts. A passed lot may carry a
    /// packaging correction, which re-derives the packaging code.
    pub fn audit(
        &mut self,
        reviewer: UserId,
        submission: &AuditSubmission,
        recorded_at: DateTime<Utc>,
    ) -> DomainResult<AuditRecord> {
        if submission.lot_id != self.id {
            return Err(DomainError::invariant("lot_id mismatch"));
        }
        if self.audit_status.is_terminal() {
            return Err(DomainError::already_audited(format!(
                "lot {} is already {:?}",
                self.id, self.audit_status
            )));
        }

        let previous_packaging = self.packaging;
        let mut corrected_packaging = None;
        let mut discrepancy = None;

        match submission.result {
            AuditResult::Failed => {
                if submission.correction.is_some() {
                    return Err(DomainError::validation(
                        "a packaging correction only applies to a passed audit",
                    ));
                }
                discrepancy = Some(Discrepancy {
                    quantity: self.remaining_quantity,
                    weight: self.remaining_weight,
                });
                self.remaining_quantity = 0;
                self.remaining_weight = 0;
            }
            AuditResult::Passed => {
                if let Some(correction) = submission.correction {
                    let packaging = Packaging::new(correction.kind, correction.condition);
                    self.packaging = packaging;
                    corrected_packaging = Some(packaging);
                }
            }
        }

        self.audit_status = submission.result.into();
        self.revision += 1;

        Ok(AuditRecord {
            id: AuditRecordId::new(),
            lot_id: self.id,
            entry_order_id: self.entry_order_id,
            reviewer,
            result: submission.result,
            notes: submission
                .notes
                .as_ref()
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            previous_packaging,
            corrected_packaging,
            discrepancy,
            recorded_at,
        })
    }
}

/// Fold child lot statuses into the entry order's status.
///
/// Any failure fails the order; all passed passes it; anything else (including
/// no lots at all) is pending. Pure, so recomputing is always safe.
pub fn aggregate_audit_status<I>(statuses: I) -> AuditStatus
where
    I: IntoIterator<Item = AuditStatus>,
{
    let mut seen_any = false;
    let mut all_passed = true;
    for status in statuses {
        seen_any = true;
        match status {
            AuditStatus::Failed => return AuditStatus::Failed,
            AuditStatus::Pending => all_passed = false,
            AuditStatus::Passed => {}
        }
    }
    if seen_any && all_passed {
        AuditStatus::Passed
    } else {
        AuditStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lot::tests::draft;
    use proptest::prelude::*;
    use stockroom_core::{Entity, ErrorKind, ProductId};

    fn lot(quantity: i64) -> ProductLot {
        ProductLot::receive(EntryOrderId::new(), draft(ProductId::new(), quantity, quantity * 10), Utc::now())
            .unwrap()
    }

    fn submission(lot: &ProductLot, result: AuditResult) -> AuditSubmission {
        AuditSubmission {
            lot_id: *lot.id(),
            result,
            notes: None,
            correction: None,
        }
    }

    #[test]
    fn failed_audit_zeroes_remaining_and_records_discrepancy() {
        let mut l = lot(30);
        let mut sub = submission(&l, AuditResult::Failed);
        sub.notes = Some("  crushed cartons ".to_string());

        let record = l.audit(UserId::new(), &sub, Utc::now()).unwrap();

        assert_eq!(l.audit_status(), AuditStatus::Failed);
        assert_eq!(l.remaining_quantity(), 0);
        assert_eq!(l.remaining_weight(), 0);
        assert_eq!(record.discrepancy(), Some(Discrepancy { quantity: 30, weight: 300 }));
        assert_eq!(record.notes(), Some("crushed cartons"));
    }

    #[test]
    fn passed_audit_applies_packaging_correction() {
        let mut l = lot(10);
        let mut sub = submission(&l, AuditResult::Passed);
        sub.correction = Some(PackagingCorrection {
            kind: PackagingKind::Pallet,
            condition: PackagingCondition::Damaged,
        });

        let record = l.audit(UserId::new(), &sub, Utc::now()).unwrap();

        assert_eq!(l.audit_status(), AuditStatus::Passed);
        assert_eq!(l.packaging().code.0, 12);
        assert_eq!(record.previous_packaging().code.0, 21);
        assert_eq!(record.corrected_packaging().map(|p| p.code.0), Some(12));
        assert_eq!(l.remaining_quantity(), 10);
    }

    #[test]
    fn terminal_lots_cannot_be_audited_again() {
        let mut l = lot(10);
        l.audit(UserId::new(), &submission(&l, AuditResult::Passed), Utc::now())
            .unwrap();
        let err = l
            .audit(UserId::new(), &submission(&l, AuditResult::Failed), Utc::now())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyAudited);
        assert_eq!(l.remaining_quantity(), 10);
    }

    #[test]
    fn correction_on_failed_audit_is_rejected_without_side_effects() {
        let mut l = lot(10);
        let mut sub = submission(&l, AuditResult::Failed);
        sub.correction = Some(PackagingCorrection {
            kind: PackagingKind::Bag,
            condition: PackagingCondition::Normal,
        });
        assert_eq!(l.audit(UserId::new(), &sub, Utc::now()).unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(l.audit_status(), AuditStatus::Pending);
        assert_eq!(l.remaining_quantity(), 10);
    }

    #[test]
    fn rollup_rules() {
        use AuditStatus::*;
        assert_eq!(aggregate_audit_status([Passed, Passed]), Passed);
        assert_eq!(aggregate_audit_status([Passed, Pending]), Pending);
        assert_eq!(aggregate_audit_status([Pending, Failed, Passed]), Failed);
        assert_eq!(aggregate_audit_status(std::iter::empty()), Pending);
    }

    fn status_strategy() -> impl Strategy<Value = AuditStatus> {
        prop_oneof![
            Just(AuditStatus::Pending),
            Just(AuditStatus::Passed),
            Just(AuditStatus::Failed),
        ]
    }

    proptest! {
        /// Property: the rollup is idempotent and order-independent.
        #[test]
        fn rollup_is_idempotent(statuses in prop::collection::vec(status_strategy(), 0..12)) {
            let first = aggregate_audit_status(statuses.iter().copied());
            let second = aggregate_audit_status(statuses.iter().copied());
            prop_assert_eq!(first, second);

            let mut reversed = statuses.clone();
            reversed.reverse();
            prop_assert_eq!(first, aggregate_audit_status(reversed));
        }
    }
}
