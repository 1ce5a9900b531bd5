//! Departure fulfillment orchestration.
//!
//! Workflow commands run the `DepartureRequest` aggregate inside a store
//! transaction and publish its events after commit. Dispatch is the one
//! multi-entity unit of work:
//!
//! ```text
//! dispatch(request)
//!   ↓
//! 1. Plan every line against a read snapshot (no writes)
//!   ↓
//! 2. Open a transaction
//!   ↓
//! 3. Check the request is still at the planned version and APPROVED, and
//!    that the plan covers exactly its lines
//!   ↓
//! 4. Apply each planned draw in plan order (revision-checked)
//!   ↓
//! 5. Append one Allocation per (line, stock record) and mark DISPATCHED
//!   ↓
//! 6. Commit, then publish
//! ```
//!
//! Any failure in steps 3-5 rolls the whole transaction back. Conflicts are
//! retried by starting again from step 1, never by patching a stale plan.

use chrono::Utc;

use stockroom_auth::{Actor, Permission, RolePolicy};
use stockroom_core::{
    AggregateRoot, DepartureRequestId, DomainError, DomainResult, ErrorKind, ExpectedVersion,
    ProductId, StockRecordId,
};
use stockroom_departures::{
    ApproveRequest, DepartureCommand, DepartureRequest, EditLines, LineDraft, MarkDispatched,
    RejectRequest, RequestRevision, SubmitRequest,
};
use stockroom_events::{EventBus, execute};
use stockroom_inventory::{Allocation, AllocationPlan, CellFilter};

use crate::ledger::{consume_in, require};
use crate::planner::{AllocationPlanner, DispatchPlan};
use crate::publisher::{EventPublisher, JsonEnvelope, Outbox};
use crate::retry::RetryPolicy;
use crate::store::{TransactionalStore, WarehouseState};

/// A committed dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub request_id: DepartureRequestId,
    pub allocations: Vec<Allocation>,
    /// Plan-then-apply attempts it took.
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchDispatchEntry {
    pub request_id: DepartureRequestId,
    pub result: DomainResult<DispatchOutcome>,
}

/// Per-request results of a batch dispatch, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchDispatchReport {
    pub entries: Vec<BatchDispatchEntry>,
}

impl BatchDispatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &DispatchOutcome> {
        self.entries.iter().filter_map(|e| e.result.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = (DepartureRequestId, &DomainError)> {
        self.entries
            .iter()
            .filter_map(|e| e.result.as_ref().err().map(|err| (e.request_id, err)))
    }
}

/// A planned draw that no longer fits the record is a lost race, not bad input.
fn as_conflict(record_id: StockRecordId, err: DomainError) -> DomainError {
    match err.kind() {
        ErrorKind::InsufficientStock | ErrorKind::InvalidTransition | ErrorKind::NotFound => {
            DomainError::conflict(format!("stock record {record_id} changed since planning: {err}"))
        }
        _ => err,
    }
}

/// A plan must draw exactly each line's quantity, of its product, within its
/// weight bound and cell filter. Plans built by the planner always do.
fn check_plan_matches(
    state: &WarehouseState,
    request: &DepartureRequest,
    plan: &DispatchPlan,
) -> DomainResult<()> {
    let lines = request.lines();
    if plan.lines.len() != lines.len() {
        return Err(DomainError::validation(format!(
            "plan covers {} lines but request {} has {}",
            plan.lines.len(),
            plan.request_id,
            lines.len()
        )));
    }

    for (line, planned) in lines.iter().zip(&plan.lines) {
        let line_no = line.line_no;
        if planned.line_no != line_no || planned.plan.product_id != line.product_id {
            return Err(DomainError::validation(format!(
                "plan line {} does not match request line {line_no}",
                planned.line_no
            )));
        }
        let (quantity, weight) = (planned.plan.total_quantity(), planned.plan.total_weight());
        if quantity != line.quantity {
            return Err(DomainError::validation(format!(
                "line {line_no} plans {quantity} units, request asks for {}",
                line.quantity
            )));
        }
        if weight > line.weight {
            return Err(DomainError::validation(format!(
                "line {line_no} plans {weight} g, over its {} g bound",
                line.weight
            )));
        }

        for draw in &planned.plan.draws {
            if draw.quantity <= 0 || draw.weight < 0 {
                return Err(DomainError::validation(format!(
                    "line {line_no} has a non-positive draw from {}",
                    draw.stock_record_id
                )));
            }
            let record = state.ledger.stock(draw.stock_record_id).map_err(|_| {
                DomainError::validation(format!(
                    "line {line_no} draws from unknown stock record {}",
                    draw.stock_record_id
                ))
            })?;
            if record.product_id() != line.product_id
                || record.lot_id() != draw.lot_id
                || record.cell_id() != draw.cell_id
            {
                return Err(DomainError::validation(format!(
                    "stock record {} does not hold line {line_no}'s product",
                    draw.stock_record_id
                )));
            }
            if let Some(filter) = &line.cell_filter {
                if !filter.matches(state.ledger.cell(record.cell_id())?) {
                    return Err(DomainError::validation(format!(
                        "stock record {} lies outside line {line_no}'s cell filter",
                        draw.stock_record_id
                    )));
                }
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct FulfillmentService<S, B> {
    store: S,
    planner: AllocationPlanner<S>,
    publisher: EventPublisher<B>,
    policy: RolePolicy,
    retry: RetryPolicy,
}

impl<S, B> FulfillmentService<S, B>
where
    S: TransactionalStore + Clone,
    B: EventBus<JsonEnvelope>,
{
    pub fn new(store: S, publisher: EventPublisher<B>, policy: RolePolicy, retry: RetryPolicy) -> Self {
        Self {
            planner: AllocationPlanner::new(store.clone()),
            store,
            publisher,
            policy,
            retry,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run one workflow command against a stored request.
    fn run(&self, request_id: DepartureRequestId, command: DepartureCommand) -> DomainResult<DepartureRequest> {
        let (request, outbox) = self.store.transaction(|state| {
            let request = state.departures.request_mut(request_id)?;
            let events = execute(request, &command)?;
            let mut outbox = Outbox::new();
            outbox.departure(request_id, request.version(), &events)?;
            Ok((request.clone(), outbox))
        })?;
        self.publisher.publish_all(outbox);
        Ok(request)
    }

    /// Create a PENDING request.
    pub fn submit(&self, actor: &Actor, lines: Vec<LineDraft>) -> DomainResult<DepartureRequest> {
        require(&self.policy, actor, &Permission::EDIT_DEPARTURES)?;
        let request_id = DepartureRequestId::new();
        let mut request = DepartureRequest::empty(request_id);
        let events = execute(
            &mut request,
            &DepartureCommand::SubmitRequest(SubmitRequest {
                request_id,
                requester: actor.id,
                lines,
                occurred_at: Utc::now(),
            }),
        )?;

        let mut outbox = Outbox::new();
        outbox.departure(request_id, request.version(), &events)?;
        let stored = request.clone();
        self.store.transaction(|state| {
            state.departures.insert_request(stored);
            Ok(())
        })?;
        self.publisher.publish_all(outbox);

        tracing::info!(%request_id, lines = request.lines().len(), "departure request submitted");
        Ok(request)
    }

    pub fn approve(
        &self,
        actor: &Actor,
        request_id: DepartureRequestId,
        comments: Option<String>,
    ) -> DomainResult<DepartureRequest> {
        require(&self.policy, actor, &Permission::APPROVE_DEPARTURES)?;
        let request = self.run(
            request_id,
            DepartureCommand::ApproveRequest(ApproveRequest {
                request_id,
                reviewer: actor.id,
                comments,
                occurred_at: Utc::now(),
            }),
        )?;
        tracing::info!(%request_id, reviewer = %actor.id, "departure request approved");
        Ok(request)
    }

    /// Cancel a request at any point before dispatch.
    pub fn reject(
        &self,
        actor: &Actor,
        request_id: DepartureRequestId,
        reason: impl Into<String>,
    ) -> DomainResult<DepartureRequest> {
        require(&self.policy, actor, &Permission::APPROVE_DEPARTURES)?;
        let request = self.run(
            request_id,
            DepartureCommand::RejectRequest(RejectRequest {
                request_id,
                reviewer: actor.id,
                reason: reason.into(),
                occurred_at: Utc::now(),
            }),
        )?;
        tracing::info!(%request_id, reviewer = %actor.id, "departure request rejected");
        Ok(request)
    }

    pub fn request_revision(
        &self,
        actor: &Actor,
        request_id: DepartureRequestId,
        reason: impl Into<String>,
    ) -> DomainResult<DepartureRequest> {
        require(&self.policy, actor, &Permission::APPROVE_DEPARTURES)?;
        let request = self.run(
            request_id,
            DepartureCommand::RequestRevision(RequestRevision {
                request_id,
                reviewer: actor.id,
                reason: reason.into(),
                occurred_at: Utc::now(),
            }),
        )?;
        tracing::info!(%request_id, reviewer = %actor.id, "revision requested");
        Ok(request)
    }

    /// Replace every line. Only legal under revision; sends the request back
    /// to PENDING for a fresh review.
    pub fn edit_line_items(
        &self,
        actor: &Actor,
        request_id: DepartureRequestId,
        lines: Vec<LineDraft>,
    ) -> DomainResult<DepartureRequest> {
        require(&self.policy, actor, &Permission::EDIT_DEPARTURES)?;
        let request = self.run(
            request_id,
            DepartureCommand::EditLines(EditLines {
                request_id,
                editor: actor.id,
                lines,
                occurred_at: Utc::now(),
            }),
        )?;
        tracing::info!(%request_id, lines = request.lines().len(), "departure lines edited");
        Ok(request)
    }

    /// Read-only FIFO plan for an arbitrary product amount.
    pub fn plan_allocation(
        &self,
        product_id: ProductId,
        quantity: i64,
        max_weight: Option<i64>,
        filter: Option<&CellFilter>,
    ) -> DomainResult<AllocationPlan> {
        self.planner.plan(product_id, quantity, max_weight, filter)
    }

    /// Plan every line of an approved request. Writes nothing.
    pub fn plan_dispatch(&self, request_id: DepartureRequestId) -> DomainResult<DispatchPlan> {
        self.planner.plan_request(request_id)
    }

    /// Apply a plan as one all-or-nothing transaction.
    ///
    /// Fails with `AllocationConflict` if the request or any planned record
    /// moved since the plan was made; nothing is written in that case.
    pub fn apply_dispatch(&self, actor: &Actor, plan: &DispatchPlan) -> DomainResult<DispatchOutcome> {
        require(&self.policy, actor, &Permission::DISPATCH_DEPARTURES)?;
        let request_id = plan.request_id;
        let at = Utc::now();

        let (allocations, outbox) = self.store.transaction(|state| {
            let request = state.departures.request(request_id)?;
            ExpectedVersion::Exact(plan.request_version).check(request.version())?;
            if !request.is_dispatch_allowed() {
                return Err(DomainError::invalid_transition(format!(
                    "request {request_id} is {:?}; only approved requests can be dispatched",
                    request.status()
                )));
            }
            check_plan_matches(state, request, plan)?;

            let mut outbox = Outbox::new();
            let mut allocations = Vec::with_capacity(plan.draw_count());
            for line in &plan.lines {
                for draw in &line.plan.draws {
                    let applied = consume_in(
                        state,
                        draw.stock_record_id,
                        draw.quantity,
                        draw.weight,
                        ExpectedVersion::Exact(draw.expected_revision),
                        at,
                        &mut outbox,
                    )
                    .map_err(|e| as_conflict(draw.stock_record_id, e))?;
                    allocations.push(Allocation::new(request_id, line.line_no, draw, applied.depleted, at));
                }
            }

            let request = state.departures.request_mut(request_id)?;
            let events = execute(
                request,
                &DepartureCommand::MarkDispatched(MarkDispatched {
                    request_id,
                    dispatcher: actor.id,
                    allocation_ids: allocations.iter().map(Allocation::id).collect(),
                    occurred_at: at,
                }),
            )?;
            outbox.departure(request_id, request.version(), &events)?;

            for allocation in &allocations {
                state.departures.push_allocation(allocation.clone());
            }
            state.check_invariants_around(allocations.iter().map(Allocation::stock_record_id))?;
            Ok((allocations, outbox))
        })?;
        self.publisher.publish_all(outbox);

        tracing::info!(
            %request_id,
            dispatcher = %actor.id,
            allocations = allocations.len(),
            "departure request dispatched"
        );
        Ok(DispatchOutcome {
            request_id,
            allocations,
            attempts: 1,
        })
    }

    /// Plan and apply, re-planning from scratch on conflicts up to the
    /// configured number of attempts.
    pub fn dispatch(&self, actor: &Actor, request_id: DepartureRequestId) -> DomainResult<DispatchOutcome> {
        require(&self.policy, actor, &Permission::DISPATCH_DEPARTURES)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .plan_dispatch(request_id)
                .and_then(|plan| self.apply_dispatch(actor, &plan));

            match result {
                Ok(outcome) => {
                    return Ok(DispatchOutcome {
                        attempts: attempt,
                        ..outcome
                    });
                }
                Err(err) if err.is_retryable() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::warn!(%request_id, attempt, ?delay, error = %err, "dispatch conflict; re-planning");
                    std::thread::sleep(delay);
                }
                Err(err) => {
                    tracing::warn!(%request_id, attempt, error = %err, "dispatch failed");
                    return Err(err);
                }
            }
        }
    }

    /// Dispatch each request independently; one failure never affects another.
    pub fn batch_dispatch(&self, actor: &Actor, request_ids: &[DepartureRequestId]) -> BatchDispatchReport {
        let entries = request_ids
            .iter()
            .map(|&request_id| BatchDispatchEntry {
                request_id,
                result: self.dispatch(actor, request_id),
            })
            .collect();
        let report = BatchDispatchReport { entries };
        tracing::info!(
            requested = request_ids.len(),
            succeeded = report.succeeded().count(),
            "batch dispatch finished"
        );
        report
    }

    pub fn get_request(&self, request_id: DepartureRequestId) -> DomainResult<DepartureRequest> {
        self.store
            .read(|state| state.departures.request(request_id).cloned())
    }

    pub fn allocations_for(&self, request_id: DepartureRequestId) -> DomainResult<Vec<Allocation>> {
        self.store.read(|state| {
            state.departures.request(request_id)?;
            Ok(state.departures.allocations_for(request_id).cloned().collect())
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use stockroom_auth::Role;
    use stockroom_departures::WorkflowStatus;
    use stockroom_events::InMemoryEventBus;

    use crate::store::InMemoryWarehouseStore;

    type TestService = FulfillmentService<Arc<InMemoryWarehouseStore>, Arc<InMemoryEventBus<JsonEnvelope>>>;

    fn service() -> (TestService, Arc<InMemoryEventBus<JsonEnvelope>>) {
        let bus = Arc::new(InMemoryEventBus::new());
        let service = FulfillmentService::new(
            Arc::new(InMemoryWarehouseStore::default()),
            EventPublisher::new(bus.clone()),
            RolePolicy::default(),
            RetryPolicy::no_retry(),
        );
        (service, bus)
    }

    fn lines() -> Vec<LineDraft> {
        vec![LineDraft {
            product_id: ProductId::new(),
            quantity: 3,
            weight: 30,
            cell_filter: None,
        }]
    }

    #[test]
    fn lost_races_become_conflicts() {
        let record = StockRecordId::new();
        let drained = DomainError::InsufficientStock {
            record: record.to_string(),
            requested_quantity: 5,
            requested_weight: 50,
            available_quantity: 1,
            available_weight: 10,
        };
        assert_eq!(as_conflict(record, drained).kind(), ErrorKind::AllocationConflict);
        assert_eq!(
            as_conflict(record, DomainError::invalid_transition("held")).kind(),
            ErrorKind::AllocationConflict
        );
        assert_eq!(
            as_conflict(record, DomainError::validation("bad")).kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn workflow_commands_are_capability_gated() {
        let (service, _bus) = service();
        let operator = Actor::with_role(Role::WAREHOUSE_OPERATOR);
        let requester = Actor::with_role(Role::REQUESTER);

        let err = service.submit(&operator, lines()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        let request = service.submit(&requester, lines()).unwrap();
        let err = service.approve(&requester, request.id_typed(), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        let err = service.reject(&operator, request.id_typed(), "no").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(
            service.get_request(request.id_typed()).unwrap().status(),
            WorkflowStatus::Pending
        );
    }

    #[test]
    fn workflow_events_carry_request_sequence() {
        let (service, bus) = service();
        let sub = bus.subscribe();
        let requester = Actor::with_role(Role::REQUESTER);
        let manager = Actor::with_role(Role::WAREHOUSE_MANAGER);

        let request = service.submit(&requester, lines()).unwrap();
        service
            .request_revision(&manager, request.id_typed(), "check weights")
            .unwrap();

        let got = sub.drain();
        let seen: Vec<_> = got
            .iter()
            .map(|e| (e.event_type().to_string(), e.sequence_number()))
            .collect();
        assert_eq!(
            seen,
            vec![
                ("departures.request.submitted".to_string(), 1),
                ("departures.request.revision_requested".to_string(), 2),
            ]
        );
    }

    #[test]
    fn unknown_request_is_not_found() {
        let (service, _bus) = service();
        let manager = Actor::with_role(Role::WAREHOUSE_MANAGER);
        let err = service
            .approve(&manager, DepartureRequestId::new(), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            service.allocations_for(DepartureRequestId::new()).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}
