//! End-to-end tests over the in-memory engine.
//!
//! Tests: entry order → audit → shelving → request workflow → dispatch
//!
//! Verifies:
//! - FIFO planning and dispatch keep records, cells and lots in step
//! - A dispatch is all-or-nothing, including on mid-way conflicts
//! - Conflicts are retried by re-planning
//! - Events reach the bus only after commit

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::NaiveDate;

    use stockroom_auth::{Actor, Role, RolePolicy};
    use stockroom_core::{
        CellId, DomainError, DomainResult, Entity, EntryOrderId, ErrorKind, ExpectedVersion, LotId, ProductId,
        StockRecordId, WarehouseId,
    };
    use stockroom_departures::{LineDraft, WorkflowStatus};
    use stockroom_events::{EventBus, InMemoryEventBus};
    use stockroom_inventory::{
        AuditResult, AuditStatus, AuditSubmission, Cell, CellCoordinate, CellFilter, CellStatus, LotDraft,
        PackagingCondition, PackagingKind, Placement, StockStatus,
    };

    use crate::config::EngineConfig;
    use crate::engine::{Engine, InMemoryEngine};
    use crate::publisher::JsonEnvelope;
    use crate::store::{InMemoryWarehouseStore, TransactionalStore, WarehouseState};

    const GRAMS_PER_UNIT: i64 = 10;

    fn manager() -> Actor {
        Actor::with_role(Role::WAREHOUSE_MANAGER)
    }

    fn requester() -> Actor {
        Actor::with_role(Role::REQUESTER)
    }

    fn inspector() -> Actor {
        Actor::with_role(Role::QUALITY_INSPECTOR)
    }

    fn engine() -> InMemoryEngine {
        stockroom_observability::init_for_tests();
        Engine::in_memory(&EngineConfig::default())
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn draft(product_id: ProductId, quantity: i64, expires_on: Option<NaiveDate>) -> LotDraft {
        LotDraft {
            lot_id: LotId::new(),
            product_id,
            quantity,
            packaging_units: quantity,
            weight: quantity * GRAMS_PER_UNIT,
            volume: quantity * 100,
            manufactured_on: None,
            expires_on,
            packaging_kind: PackagingKind::Box,
            packaging_condition: PackagingCondition::Normal,
        }
    }

    fn placement(quantity: i64) -> Placement {
        Placement {
            quantity,
            packaging_units: quantity,
            weight: quantity * GRAMS_PER_UNIT,
            volume: quantity * 100,
        }
    }

    fn add_cell<S, B>(engine: &Engine<S, B>, capacity: i64) -> CellId
    where
        S: TransactionalStore + Clone,
        B: EventBus<JsonEnvelope> + Clone,
    {
        let cell = Cell::new(
            CellId::new(),
            WarehouseId::new(),
            CellCoordinate { aisle: 1, bay: 1, level: 1 },
            capacity,
        )
        .unwrap();
        let id = *cell.id();
        engine.ledger.register_cell(&manager(), cell).unwrap();
        id
    }

    struct Shelved {
        lot_id: LotId,
        record_id: StockRecordId,
        cell_id: CellId,
    }

    /// Receive, pass and shelve one lot into its own cell.
    fn shelve<S, B>(engine: &Engine<S, B>, product_id: ProductId, quantity: i64, expires_on: Option<NaiveDate>) -> Shelved
    where
        S: TransactionalStore + Clone,
        B: EventBus<JsonEnvelope> + Clone,
    {
        let cell_id = add_cell(engine, quantity);
        let lot = draft(product_id, quantity, expires_on);
        let lot_id = lot.lot_id;
        engine
            .ledger
            .record_entry_order(&manager(), EntryOrderId::new(), vec![lot])
            .unwrap();
        engine
            .audits
            .submit_audit(&inspector(), passed(lot_id))
            .unwrap();
        let record = engine
            .ledger
            .create_stock(&manager(), lot_id, cell_id, placement(quantity))
            .unwrap();
        Shelved {
            lot_id,
            record_id: *record.id(),
            cell_id,
        }
    }

    fn passed(lot_id: LotId) -> AuditSubmission {
        AuditSubmission {
            lot_id,
            result: AuditResult::Passed,
            notes: None,
            correction: None,
        }
    }

    fn line(product_id: ProductId, quantity: i64) -> LineDraft {
        LineDraft {
            product_id,
            quantity,
            weight: quantity * GRAMS_PER_UNIT,
            cell_filter: None,
        }
    }

    fn approved_request<S, B>(engine: &Engine<S, B>, lines: Vec<LineDraft>) -> stockroom_core::DepartureRequestId
    where
        S: TransactionalStore + Clone,
        B: EventBus<JsonEnvelope> + Clone,
    {
        let request = engine.fulfillment.submit(&requester(), lines).unwrap();
        let id = request.id_typed();
        engine.fulfillment.approve(&manager(), id, None).unwrap();
        id
    }

    #[test]
    fn single_lot_plan_and_dispatch() {
        let engine = engine();
        let product = ProductId::new();
        let shelved = shelve(&engine, product, 100, None);

        let plan = engine.planner.plan(product, 60, None, None).unwrap();
        assert_eq!(plan.draws.len(), 1);
        assert_eq!(plan.draws[0].cell_id, shelved.cell_id);
        assert_eq!(plan.draws[0].quantity, 60);

        let request_id = approved_request(&engine, vec![line(product, 60)]);
        let outcome = engine.fulfillment.dispatch(&manager(), request_id).unwrap();
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.allocations.len(), 1);

        let record = engine.ledger.get_stock(shelved.record_id).unwrap();
        assert_eq!(record.quantity(), 40);
        assert_eq!(record.status(), StockStatus::Available);
        assert_eq!(engine.ledger.get_cell(shelved.cell_id).unwrap().current_usage(), 40);
        assert_eq!(engine.ledger.get_product_lot(shelved.lot_id).unwrap().remaining_quantity(), 40);

        let request = engine.fulfillment.get_request(request_id).unwrap();
        assert_eq!(request.status(), WorkflowStatus::Dispatched);
        assert_eq!(request.allocation_ids().len(), 1);
        assert_eq!(engine.fulfillment.allocations_for(request_id).unwrap(), outcome.allocations);
    }

    #[test]
    fn earliest_expiry_is_drawn_first() {
        let engine = engine();
        let product = ProductId::new();
        let later = shelve(&engine, product, 50, Some(date(2024, 6, 1)));
        let earlier = shelve(&engine, product, 50, Some(date(2024, 1, 1)));

        let plan = engine.planner.plan(product, 70, None, None).unwrap();
        let draws: Vec<_> = plan.draws.iter().map(|d| (d.stock_record_id, d.quantity)).collect();
        assert_eq!(draws, vec![(earlier.record_id, 50), (later.record_id, 20)]);
        assert!(plan.draws[0].would_deplete);

        let request_id = approved_request(&engine, vec![line(product, 70)]);
        engine.fulfillment.dispatch(&manager(), request_id).unwrap();

        let emptied = engine.ledger.get_stock(earlier.record_id).unwrap();
        assert_eq!(emptied.status(), StockStatus::Depleted);
        let emptied_cell = engine.ledger.get_cell(earlier.cell_id).unwrap();
        assert_eq!(emptied_cell.current_usage(), 0);
        assert_eq!(emptied_cell.status(), CellStatus::Available);
        assert_eq!(engine.ledger.get_stock(later.record_id).unwrap().quantity(), 30);
    }

    #[test]
    fn failed_lot_is_never_planned() {
        let engine = engine();
        let product = ProductId::new();
        let good = shelve(&engine, product, 20, None);

        let cell_id = add_cell(&engine, 30);
        let bad = draft(product, 30, Some(date(2020, 1, 1)));
        let bad_id = bad.lot_id;
        let order_id = EntryOrderId::new();
        engine.ledger.record_entry_order(&manager(), order_id, vec![bad]).unwrap();
        // Shelved while pending, so it sits in quarantine.
        engine
            .ledger
            .create_stock(&manager(), bad_id, cell_id, placement(30))
            .unwrap();

        engine
            .audits
            .submit_audit(
                &inspector(),
                AuditSubmission {
                    lot_id: bad_id,
                    result: AuditResult::Failed,
                    notes: Some("crushed".into()),
                    correction: None,
                },
            )
            .unwrap();

        let lot = engine.ledger.get_product_lot(bad_id).unwrap();
        assert_eq!(lot.remaining_quantity(), 0);
        assert_eq!(lot.audit_status(), AuditStatus::Failed);
        assert_eq!(engine.audits.entry_order_status(order_id).unwrap(), AuditStatus::Failed);

        let plan = engine.planner.plan(product, 20, None, None).unwrap();
        assert_eq!(plan.draws.len(), 1);
        assert_eq!(plan.draws[0].stock_record_id, good.record_id);

        let err = engine.planner.plan(product, 21, None, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientInventory);
    }

    #[test]
    fn short_stock_fails_dispatch_without_side_effects() {
        let engine = engine();
        let product = ProductId::new();
        let shelved = shelve(&engine, product, 30, None);
        let request_id = approved_request(&engine, vec![line(product, 50)]);

        let err = engine.fulfillment.dispatch(&manager(), request_id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientInventory);

        let request = engine.fulfillment.get_request(request_id).unwrap();
        assert_eq!(request.status(), WorkflowStatus::Approved);
        assert!(engine.fulfillment.allocations_for(request_id).unwrap().is_empty());
        assert_eq!(engine.ledger.get_stock(shelved.record_id).unwrap().quantity(), 30);
    }

    #[test]
    fn edits_only_allowed_under_revision() {
        let engine = engine();
        let product = ProductId::new();
        let request_id = approved_request(&engine, vec![line(product, 5)]);

        let err = engine
            .fulfillment
            .edit_line_items(&requester(), request_id, vec![line(product, 6)])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStateForEdit);

        let author = requester();
        let request = engine.fulfillment.submit(&author, vec![line(product, 5)]).unwrap();
        let id = request.id_typed();
        engine.fulfillment.request_revision(&manager(), id, "split the pallet").unwrap();

        let err = engine
            .fulfillment
            .edit_line_items(&requester(), id, vec![line(product, 1)])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        let edited = engine
            .fulfillment
            .edit_line_items(&author, id, vec![line(product, 4), line(product, 2)])
            .unwrap();
        assert_eq!(edited.status(), WorkflowStatus::Pending);
        assert_eq!(edited.lines().len(), 2);
        assert!(edited.review().is_none());
    }

    #[test]
    fn conflict_mid_dispatch_rolls_back_every_line() {
        let engine = engine();
        let (p1, p2, p3) = (ProductId::new(), ProductId::new(), ProductId::new());
        let s1 = shelve(&engine, p1, 10, None);
        let s2 = shelve(&engine, p2, 10, None);
        let s3 = shelve(&engine, p3, 10, None);
        let request_id = approved_request(&engine, vec![line(p1, 5), line(p2, 5), line(p3, 5)]);

        let plan = engine.fulfillment.plan_dispatch(request_id).unwrap();
        assert_eq!(plan.draw_count(), 3);

        // Someone else picks from line 3's record after planning.
        engine
            .ledger
            .consume(&manager(), s3.record_id, 1, GRAMS_PER_UNIT, ExpectedVersion::Any)
            .unwrap();

        let err = engine.fulfillment.apply_dispatch(&manager(), &plan).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AllocationConflict);

        for s in [&s1, &s2] {
            assert_eq!(engine.ledger.get_stock(s.record_id).unwrap().quantity(), 10);
            assert_eq!(engine.ledger.get_cell(s.cell_id).unwrap().current_usage(), 10);
            assert_eq!(engine.ledger.get_product_lot(s.lot_id).unwrap().remaining_quantity(), 10);
        }
        assert_eq!(engine.ledger.get_stock(s3.record_id).unwrap().quantity(), 9);
        assert!(engine.fulfillment.allocations_for(request_id).unwrap().is_empty());
        assert_eq!(
            engine.fulfillment.get_request(request_id).unwrap().status(),
            WorkflowStatus::Approved
        );

        // A fresh plan goes through.
        let outcome = engine.fulfillment.dispatch(&manager(), request_id).unwrap();
        assert_eq!(outcome.allocations.len(), 3);
        assert_eq!(engine.ledger.get_stock(s3.record_id).unwrap().quantity(), 4);
    }

    #[test]
    fn stale_request_version_is_a_conflict() {
        let engine = engine();
        let product = ProductId::new();
        shelve(&engine, product, 10, None);
        let request_id = approved_request(&engine, vec![line(product, 5)]);
        let plan = engine.fulfillment.plan_dispatch(request_id).unwrap();

        engine.fulfillment.dispatch(&manager(), request_id).unwrap();

        let err = engine.fulfillment.apply_dispatch(&manager(), &plan).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AllocationConflict);
    }

    #[test]
    fn plan_that_disagrees_with_request_lines_is_rejected() {
        let engine = engine();
        let product = ProductId::new();
        let shelved = shelve(&engine, product, 10, None);
        let other = shelve(&engine, ProductId::new(), 10, None);
        let request_id = approved_request(&engine, vec![line(product, 5)]);
        let plan = engine.fulfillment.plan_dispatch(request_id).unwrap();

        let mut short = plan.clone();
        short.lines[0].plan.draws[0].quantity = 1;
        short.lines[0].plan.draws[0].weight = GRAMS_PER_UNIT;

        let mut heavy = plan.clone();
        heavy.lines[0].plan.draws[0].weight = 500;

        let mut foreign = plan.clone();
        foreign.lines[0].plan.draws[0].stock_record_id = other.record_id;
        foreign.lines[0].plan.draws[0].lot_id = other.lot_id;
        foreign.lines[0].plan.draws[0].cell_id = other.cell_id;
        foreign.lines[0].plan.draws[0].expected_revision =
            engine.ledger.get_stock(other.record_id).unwrap().revision();

        let mut missing_line = plan.clone();
        missing_line.lines.clear();

        for forged in [short, heavy, foreign, missing_line] {
            let err = engine.fulfillment.apply_dispatch(&manager(), &forged).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }

        assert_eq!(
            engine.fulfillment.get_request(request_id).unwrap().status(),
            WorkflowStatus::Approved
        );
        assert!(engine.fulfillment.allocations_for(request_id).unwrap().is_empty());
        for s in [&shelved, &other] {
            assert_eq!(engine.ledger.get_stock(s.record_id).unwrap().quantity(), 10);
        }

        engine.fulfillment.apply_dispatch(&manager(), &plan).unwrap();
    }

    #[test]
    fn dispatch_requires_approval() {
        let engine = engine();
        let product = ProductId::new();
        shelve(&engine, product, 10, None);
        let request = engine.fulfillment.submit(&requester(), vec![line(product, 5)]).unwrap();

        let err = engine.fulfillment.dispatch(&manager(), request.id_typed()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);

        let err = engine.fulfillment.dispatch(&requester(), request.id_typed()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[test]
    fn lines_for_one_product_share_records_without_double_counting() {
        let engine = engine();
        let product = ProductId::new();
        let shelved = shelve(&engine, product, 10, None);
        let request_id = approved_request(&engine, vec![line(product, 6), line(product, 4)]);

        let outcome = engine.fulfillment.dispatch(&manager(), request_id).unwrap();
        assert_eq!(outcome.allocations.len(), 2);
        assert!(outcome.allocations[1].depleted_record());

        let record = engine.ledger.get_stock(shelved.record_id).unwrap();
        assert_eq!(record.status(), StockStatus::Depleted);

        let over = approved_request(&engine, vec![line(product, 1)]);
        let err = engine.fulfillment.dispatch(&manager(), over).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientInventory);
    }

    #[test]
    fn cell_filter_restricts_candidates() {
        let engine = engine();
        let product = ProductId::new();
        let first = shelve(&engine, product, 10, Some(date(2024, 1, 1)));
        let second = shelve(&engine, product, 10, Some(date(2024, 2, 1)));

        let filter = CellFilter::cells(vec![second.cell_id]);
        let request = engine
            .fulfillment
            .submit(
                &requester(),
                vec![LineDraft {
                    cell_filter: Some(filter),
                    ..line(product, 5)
                }],
            )
            .unwrap();
        engine.fulfillment.approve(&manager(), request.id_typed(), None).unwrap();

        let outcome = engine.fulfillment.dispatch(&manager(), request.id_typed()).unwrap();
        assert_eq!(outcome.allocations[0].stock_record_id(), second.record_id);
        assert_eq!(engine.ledger.get_stock(first.record_id).unwrap().quantity(), 10);
    }

    #[test]
    fn batch_dispatch_isolates_failures() {
        let engine = engine();
        let product = ProductId::new();
        shelve(&engine, product, 10, None);
        let fits = approved_request(&engine, vec![line(product, 8)]);
        let too_big = approved_request(&engine, vec![line(product, 5)]);
        let pending = engine.fulfillment.submit(&requester(), vec![line(product, 1)]).unwrap();

        let report = engine
            .fulfillment
            .batch_dispatch(&manager(), &[fits, too_big, pending.id_typed()]);

        assert_eq!(report.entries.len(), 3);
        assert_eq!(report.succeeded().count(), 1);
        let failed: Vec<_> = report.failed().map(|(id, e)| (id, e.kind())).collect();
        assert_eq!(
            failed,
            vec![
                (too_big, ErrorKind::InsufficientInventory),
                (pending.id_typed(), ErrorKind::InvalidTransition),
            ]
        );
        assert_eq!(
            engine.fulfillment.get_request(fits).unwrap().status(),
            WorkflowStatus::Dispatched
        );
    }

    #[test]
    fn events_follow_commit() {
        let engine = engine();
        let product = ProductId::new();
        shelve(&engine, product, 10, None);
        let short = approved_request(&engine, vec![line(product, 50)]);
        let ok = approved_request(&engine, vec![line(product, 5)]);
        let sub = engine.subscribe();

        engine.fulfillment.dispatch(&manager(), short).unwrap_err();
        assert!(sub.drain().is_empty());

        engine.fulfillment.dispatch(&manager(), ok).unwrap();
        let types: Vec<String> = sub.drain().iter().map(|e| e.event_type().to_string()).collect();
        assert_eq!(types, vec!["inventory.stock.consumed", "departures.request.dispatched"]);
    }

    #[test]
    fn rejection_is_terminal() {
        let engine = engine();
        let product = ProductId::new();
        let request_id = approved_request(&engine, vec![line(product, 1)]);

        let err = engine.fulfillment.reject(&manager(), request_id, "   ").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        engine.fulfillment.reject(&manager(), request_id, "customer cancelled").unwrap();
        let err = engine.fulfillment.approve(&manager(), request_id, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        let err = engine.fulfillment.dispatch(&manager(), request_id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[test]
    fn store_reads_see_committed_tables() {
        let engine = engine();
        let product = ProductId::new();
        let shelved = shelve(&engine, product, 10, None);
        let request_id = approved_request(&engine, vec![line(product, 4)]);
        engine.fulfillment.dispatch(&manager(), request_id).unwrap();

        let (remaining, usage, allocated) = engine
            .store()
            .read(|state| {
                Ok((
                    state.ledger().stock(shelved.record_id)?.quantity(),
                    state.ledger().cell(shelved.cell_id)?.current_usage(),
                    state.departures().allocations_for(request_id).count(),
                ))
            })
            .unwrap();
        assert_eq!((remaining, usage, allocated), (6, 6, 1));
        engine.store().read(|state| state.check_invariants()).unwrap();
    }

    type Interference = Box<dyn FnOnce(&mut WarehouseState) -> DomainResult<()> + Send>;

    /// Commits a competing write just before the next transaction runs.
    #[derive(Clone, Default)]
    struct RacingStore {
        inner: Arc<InMemoryWarehouseStore>,
        pending: Arc<Mutex<Vec<Interference>>>,
    }

    impl RacingStore {
        fn race_next(&self, f: impl FnOnce(&mut WarehouseState) -> DomainResult<()> + Send + 'static) {
            self.pending.lock().unwrap().push(Box::new(f));
        }
    }

    impl std::fmt::Debug for RacingStore {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RacingStore").finish_non_exhaustive()
        }
    }

    impl TransactionalStore for RacingStore {
        fn read<R>(&self, f: impl FnOnce(&WarehouseState) -> DomainResult<R>) -> DomainResult<R> {
            self.inner.read(f)
        }

        fn transaction<R>(
            &self,
            f: impl FnOnce(&mut WarehouseState) -> DomainResult<R>,
        ) -> DomainResult<R> {
            let racer = self.pending.lock().map_err(|_| DomainError::invariant("poisoned"))?.pop();
            if let Some(racer) = racer {
                self.inner.transaction(racer)?;
            }
            self.inner.transaction(f)
        }
    }

    fn racing_engine(max_attempts: u32) -> (Engine<RacingStore, Arc<InMemoryEventBus<JsonEnvelope>>>, RacingStore) {
        stockroom_observability::init_for_tests();
        let store = RacingStore::default();
        let config = EngineConfig {
            dispatch_max_attempts: max_attempts,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 1,
            ..EngineConfig::default()
        };
        let engine = Engine::new(store.clone(), Arc::new(InMemoryEventBus::new()), RolePolicy::default(), &config);
        (engine, store)
    }

    fn steal(record_id: StockRecordId) -> impl FnOnce(&mut WarehouseState) -> DomainResult<()> + Send + 'static {
        move |state: &mut WarehouseState| {
            state.ledger.stock_mut(record_id)?.hold()?;
            Ok(())
        }
    }

    #[test]
    fn dispatch_replans_after_a_lost_race() {
        let (engine, store) = racing_engine(3);
        let product = ProductId::new();
        let first = shelve(&engine, product, 10, Some(date(2024, 1, 1)));
        let second = shelve(&engine, product, 10, Some(date(2024, 2, 1)));
        let request_id = approved_request(&engine, vec![line(product, 5)]);

        // The planned record goes on hold between planning and applying.
        store.race_next(steal(first.record_id));
        let outcome = engine.fulfillment.dispatch(&manager(), request_id).unwrap();

        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.allocations[0].stock_record_id(), second.record_id);
        assert_eq!(engine.ledger.get_stock(first.record_id).unwrap().quantity(), 10);
        assert_eq!(engine.ledger.get_stock(second.record_id).unwrap().quantity(), 5);
    }

    #[test]
    fn dispatch_gives_up_after_max_attempts() {
        let (engine, store) = racing_engine(1);
        let product = ProductId::new();
        let first = shelve(&engine, product, 10, Some(date(2024, 1, 1)));
        shelve(&engine, product, 10, Some(date(2024, 2, 1)));
        let request_id = approved_request(&engine, vec![line(product, 5)]);

        store.race_next(steal(first.record_id));
        let err = engine.fulfillment.dispatch(&manager(), request_id).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AllocationConflict);
        assert_eq!(
            engine.fulfillment.get_request(request_id).unwrap().status(),
            WorkflowStatus::Approved
        );
    }
}
