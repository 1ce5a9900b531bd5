//! Lot quality gate: audit submission and the entry-order rollup.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use stockroom_auth::{Actor, Permission, RolePolicy};
use stockroom_core::{DomainError, DomainResult, Entity, EntryOrderId, LotId, StockRecordId, UserId};
use stockroom_events::EventBus;
use stockroom_inventory::events::{EntryOrderAuditStatusChanged, LotAudited, StockReleased};
use stockroom_inventory::{
    AuditRecord, AuditResult, AuditStatus, AuditSubmission, InventoryEvent, ProductLot,
    StockStatus, aggregate_audit_status,
};

use crate::ledger::require;
use crate::publisher::{EventPublisher, JsonEnvelope, Outbox};
use crate::store::{TransactionalStore, WarehouseState};

/// Audit one lot. Nothing is written unless the audit itself succeeds.
///
/// A passed lot releases its quarantined stock; a failed lot's stock stays
/// quarantined for good.
pub(crate) fn audit_lot_in(
    state: &mut WarehouseState,
    reviewer: UserId,
    submission: &AuditSubmission,
    at: DateTime<Utc>,
    outbox: &mut Outbox,
) -> DomainResult<AuditRecord> {
    let lot_id = submission.lot_id;
    let mut lot: ProductLot = state.lots.lot(lot_id)?.clone();
    let record = lot.audit(reviewer, submission, at)?;

    let quarantined: Vec<StockRecordId> = if record.result() == AuditResult::Passed {
        state
            .ledger
            .stock_for_lot(lot_id)
            .filter(|r| r.status() == StockStatus::Quarantined)
            .map(|r| *r.id())
            .collect()
    } else {
        Vec::new()
    };

    outbox.inventory(
        InventoryEvent::LotAudited(LotAudited {
            lot_id,
            entry_order_id: lot.entry_order_id(),
            result: record.result(),
            packaging_code: lot.packaging().code,
            occurred_at: at,
        }),
        lot.revision(),
    )?;
    *state.lots.lot_mut(lot_id)? = lot;

    for stock_id in quarantined {
        let stock = state.ledger.stock_mut(stock_id)?;
        stock.release_quarantine()?;
        outbox.inventory(
            InventoryEvent::StockReleased(StockReleased {
                stock_record_id: stock_id,
                lot_id,
                occurred_at: at,
            }),
            stock.revision(),
        )?;
    }

    state.lots.push_audit(record.clone());
    Ok(record)
}

/// Re-fold an entry order's status from its lots and store it.
///
/// Pure over the lot statuses, so running it again without new audits
/// changes nothing and emits nothing.
pub(crate) fn recompute_order_status_in(
    state: &mut WarehouseState,
    order_id: EntryOrderId,
    at: DateTime<Utc>,
    outbox: &mut Outbox,
) -> DomainResult<AuditStatus> {
    let status = aggregate_audit_status(
        state
            .lots
            .lots_of_order(order_id)?
            .into_iter()
            .map(|lot| lot.audit_status()),
    );

    let order = state.lots.entry_order_mut(order_id)?;
    if order.set_audit_status(status) {
        outbox.inventory(
            InventoryEvent::EntryOrderAuditStatusChanged(EntryOrderAuditStatusChanged {
                entry_order_id: order_id,
                status,
                occurred_at: at,
            }),
            order.revision(),
        )?;
    }
    Ok(status)
}

/// A batch item that was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditFailure {
    /// Position of the item in the submitted batch.
    pub index: usize,
    pub lot_id: LotId,
    pub error: DomainError,
}

/// Outcome of a batch: applied records, rejected items, and the final status
/// of every entry order the batch touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditBatchReport {
    pub records: Vec<AuditRecord>,
    pub failures: Vec<AuditFailure>,
    pub order_statuses: BTreeMap<EntryOrderId, AuditStatus>,
}

impl AuditBatchReport {
    pub fn succeeded(&self) -> usize {
        self.records.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct AuditService<S, B> {
    store: S,
    publisher: EventPublisher<B>,
    policy: RolePolicy,
}

impl<S, B> AuditService<S, B>
where
    S: TransactionalStore,
    B: EventBus<JsonEnvelope>,
{
    pub fn new(store: S, publisher: EventPublisher<B>, policy: RolePolicy) -> Self {
        Self {
            store,
            publisher,
            policy,
        }
    }

    pub fn submit_audit(&self, actor: &Actor, submission: AuditSubmission) -> DomainResult<AuditRecord> {
        require(&self.policy, actor, &Permission::AUDIT_LOTS)?;
        let at = Utc::now();

        let (record, order_status, outbox) = self.store.transaction(|state| {
            let mut outbox = Outbox::new();
            let record = audit_lot_in(state, actor.id, &submission, at, &mut outbox)?;
            let order_status = recompute_order_status_in(state, record.entry_order_id(), at, &mut outbox)?;
            Ok((record, order_status, outbox))
        })?;
        self.publisher.publish_all(outbox);

        tracing::info!(
            lot_id = %record.lot_id(),
            entry_order_id = %record.entry_order_id(),
            result = ?record.result(),
            ?order_status,
            "lot audited"
        );
        Ok(record)
    }

    /// Apply many audits in one pass.
    ///
    /// Each item applies fully or not at all, and a rejected item does not
    /// stop the others. Entry-order statuses are recomputed once per distinct
    /// order after every item has been tried.
    pub fn submit_audit_batch(
        &self,
        actor: &Actor,
        submissions: Vec<AuditSubmission>,
    ) -> DomainResult<AuditBatchReport> {
        require(&self.policy, actor, &Permission::AUDIT_LOTS)?;
        let at = Utc::now();

        let (report, outbox) = self.store.transaction(|state| {
            let mut outbox = Outbox::new();
            let mut report = AuditBatchReport::default();
            let mut touched = Vec::new();

            for (index, submission) in submissions.iter().enumerate() {
                let mut item_outbox = Outbox::new();
                match audit_lot_in(state, actor.id, submission, at, &mut item_outbox) {
                    Ok(record) => {
                        if !touched.contains(&record.entry_order_id()) {
                            touched.push(record.entry_order_id());
                        }
                        outbox.extend(item_outbox);
                        report.records.push(record);
                    }
                    Err(error) => {
                        tracing::warn!(index, lot_id = %submission.lot_id, %error, "audit item rejected");
                        report.failures.push(AuditFailure {
                            index,
                            lot_id: submission.lot_id,
                            error,
                        });
                    }
                }
            }

            for order_id in touched {
                let status = recompute_order_status_in(state, order_id, at, &mut outbox)?;
                report.order_statuses.insert(order_id, status);
            }
            Ok((report, outbox))
        })?;
        self.publisher.publish_all(outbox);

        tracing::info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            orders = report.order_statuses.len(),
            "audit batch applied"
        );
        Ok(report)
    }

    pub fn audit_records_for(&self, lot_id: LotId) -> DomainResult<Vec<AuditRecord>> {
        self.store.read(|state| {
            state.lots.lot(lot_id)?;
            Ok(state.lots.audits_for(lot_id).cloned().collect())
        })
    }

    pub fn entry_order_status(&self, order_id: EntryOrderId) -> DomainResult<AuditStatus> {
        self.store
            .read(|state| Ok(state.lots.entry_order(order_id)?.audit_status()))
    }
}
