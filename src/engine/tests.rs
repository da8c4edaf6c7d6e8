use super::*;
use crate::lifecycle::{ComplaintStatus, RefundStatus};
use crate::limits::*;

const H: Ms = 3_600_000; // 1 hour in ms
const M: Ms = 60_000; // 1 minute in ms
/// 2035-05-07T00:00:00Z
const DAY: Ms = 2_062_108_800_000;
/// 2020-01-01T00:00:00Z, safely in the past.
const PAST: Ms = 1_577_836_800_000;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("reservd_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn open_engine(path: PathBuf, policy: ReservationPolicy) -> Engine {
    Engine::new(path, Arc::new(NotifyHub::new()), policy).unwrap()
}

fn test_engine(name: &str) -> Engine {
    open_engine(test_wal_path(name), ReservationPolicy::default())
}

async fn equipment(engine: &Engine, capacity: u32) -> Ulid {
    let id = Ulid::new();
    engine
        .register_resource(id, ResourceKind::Equipment, capacity, Some("Light kit".into()))
        .await
        .unwrap();
    id
}

async fn studio(engine: &Engine) -> Ulid {
    let id = Ulid::new();
    engine
        .register_resource(id, ResourceKind::Slot, 1, Some("Studio A".into()))
        .await
        .unwrap();
    id
}

async fn book(
    engine: &Engine,
    resource_id: Ulid,
    window: Span,
    quantity: u32,
) -> Result<Reservation, EngineError> {
    engine
        .reserve(
            Ulid::new(),
            resource_id,
            window,
            quantity,
            CustomerInfo::new("cust-42", 10_000),
            Some("desk".into()),
        )
        .await
}

// ── Resources ────────────────────────────────────────────

#[tokio::test]
async fn register_and_list_resources() {
    let engine = test_engine("register_list.wal");
    let kit = equipment(&engine, 4).await;
    let room = studio(&engine).await;

    let info = engine.resource_info(kit).await.unwrap();
    assert_eq!(info.kind, ResourceKind::Equipment);
    assert_eq!(info.capacity, 4);
    assert_eq!(info.name.as_deref(), Some("Light kit"));

    let all = engine.list_resources().await;
    assert_eq!(all.len(), 2);
    let mut expected = vec![kit, room];
    expected.sort();
    assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), expected);
}

#[tokio::test]
async fn register_rejects_duplicates_and_bad_capacity() {
    let engine = test_engine("register_reject.wal");
    let kit = equipment(&engine, 2).await;
    assert!(matches!(
        engine.register_resource(kit, ResourceKind::Equipment, 2, None).await,
        Err(EngineError::AlreadyExists(id)) if id == kit
    ));
    assert!(matches!(
        engine.register_resource(Ulid::new(), ResourceKind::Slot, 2, None).await,
        Err(EngineError::InvalidCapacity(2))
    ));
    assert!(matches!(
        engine.register_resource(Ulid::new(), ResourceKind::Equipment, 0, None).await,
        Err(EngineError::InvalidCapacity(0))
    ));
    assert!(matches!(
        engine
            .register_resource(Ulid::new(), ResourceKind::Equipment, MAX_CAPACITY + 1, None)
            .await,
        Err(EngineError::LimitExceeded(_))
    ));
    let long_name = "x".repeat(MAX_NAME_LEN + 1);
    assert!(matches!(
        engine
            .register_resource(Ulid::new(), ResourceKind::Equipment, 1, Some(long_name))
            .await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert_eq!(engine.list_resources().await.len(), 1);
}

#[tokio::test]
async fn capacity_cannot_drop_below_committed_peak() {
    let engine = test_engine("capacity_below_usage.wal");
    let kit = equipment(&engine, 4).await;
    book(&engine, kit, Span::new(DAY, DAY + 2 * H), 2).await.unwrap();
    book(&engine, kit, Span::new(DAY + H, DAY + 3 * H), 1).await.unwrap();

    assert!(matches!(
        engine.update_resource(kit, 2, None).await,
        Err(EngineError::CapacityBelowUsage { capacity: 2, peak: 3 })
    ));
    engine.update_resource(kit, 3, Some("Light kit v2".into())).await.unwrap();
    let info = engine.resource_info(kit).await.unwrap();
    assert_eq!(info.capacity, 3);
    assert_eq!(info.name.as_deref(), Some("Light kit v2"));

    let room = studio(&engine).await;
    assert!(matches!(
        engine.update_resource(room, 2, None).await,
        Err(EngineError::InvalidCapacity(2))
    ));
    assert!(matches!(
        engine.update_resource(Ulid::new(), 2, None).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn cancelled_reservations_do_not_pin_capacity() {
    let engine = test_engine("capacity_after_cancel.wal");
    let kit = equipment(&engine, 3).await;
    let r = book(&engine, kit, Span::new(DAY, DAY + H), 3).await.unwrap();
    engine.cancel(r.id, "customer called", None).await.unwrap();
    engine.update_resource(kit, 1, None).await.unwrap();
    assert_eq!(engine.resource_info(kit).await.unwrap().capacity, 1);
}

// ── Reserving ────────────────────────────────────────────

#[tokio::test]
async fn scenario_a_capacity_two_rejects_third_unit() {
    let engine = test_engine("scenario_a.wal");
    let kit = equipment(&engine, 2).await;
    let w = Span::new(DAY + 10 * H, DAY + 12 * H);

    book(&engine, kit, w, 2).await.unwrap();
    match book(&engine, kit, w, 1).await {
        Err(EngineError::ResourceUnavailable { resource_id, requested, available }) => {
            assert_eq!(resource_id, kit);
            assert_eq!(requested, 1);
            assert_eq!(available, 0);
        }
        other => panic!("expected ResourceUnavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_b_cancel_frees_identical_window() {
    let engine = test_engine("scenario_b.wal");
    let kit = equipment(&engine, 1).await;
    let w = Span::new(DAY + 9 * H, DAY + 11 * H);

    let first = book(&engine, kit, w, 1).await.unwrap();
    assert!(book(&engine, kit, w, 1).await.is_err());
    engine.cancel(first.id, "double booked by phone", None).await.unwrap();
    book(&engine, kit, w, 1).await.unwrap();
}

#[tokio::test]
async fn scenario_c_overlapping_studio_windows() {
    let engine = test_engine("scenario_c.wal");
    let room = studio(&engine).await;

    book(&engine, room, Span::new(DAY + 10 * H, DAY + 12 * H), 1).await.unwrap();
    assert!(matches!(
        book(&engine, room, Span::new(DAY + 11 * H, DAY + 13 * H), 1).await,
        Err(EngineError::ResourceUnavailable { .. })
    ));
    // Half-open windows: the next session may start exactly at 12:00.
    book(&engine, room, Span::new(DAY + 12 * H, DAY + 13 * H), 1).await.unwrap();
}

#[tokio::test]
async fn reservation_starts_pending_with_timeline() {
    let engine = test_engine("starts_pending.wal");
    let kit = equipment(&engine, 5).await;
    let r = book(&engine, kit, Span::new(DAY, DAY + 4 * H), 2).await.unwrap();

    assert_eq!(r.status, ReservationStatus::Pending);
    assert_eq!(r.payment_status, PaymentStatus::Pending);
    assert_eq!(r.quantity, 2);
    assert_eq!(r.customer_ref, "cust-42");
    assert_eq!(r.amount, 10_000);
    assert_eq!(r.timeline.len(), 1);
    assert_eq!(r.timeline[0].event, "created");
    assert_eq!(r.timeline[0].actor.as_deref(), Some("desk"));
    assert_eq!(engine.available_quantity(kit, Span::new(DAY, DAY + H)).await.unwrap(), 3);
}

#[tokio::test]
async fn auto_confirm_policy() {
    let engine = open_engine(
        test_wal_path("auto_confirm.wal"),
        ReservationPolicy { auto_confirm: true },
    );
    let room = studio(&engine).await;
    let r = book(&engine, room, Span::new(DAY, DAY + H), 1).await.unwrap();
    assert_eq!(r.status, ReservationStatus::Confirmed);
    let events: Vec<&str> = r.timeline.iter().map(|e| e.event.as_str()).collect();
    assert_eq!(events, vec!["created", "confirmed"]);
    assert!(engine.policy().auto_confirm);
}

#[tokio::test]
async fn reserve_validates_input() {
    let engine = test_engine("reserve_validation.wal");
    let kit = equipment(&engine, 3).await;
    let room = studio(&engine).await;
    let w = Span::new(DAY, DAY + H);

    assert!(matches!(
        book(&engine, kit, Span { start: DAY, end: DAY }, 1).await,
        Err(EngineError::InvalidWindow { .. })
    ));
    assert!(matches!(
        book(&engine, kit, Span::new(0, H), 1).await,
        Err(EngineError::LimitExceeded("timestamp out of range"))
    ));
    assert!(matches!(
        book(&engine, kit, Span::new(DAY, DAY + MAX_WINDOW_DURATION_MS + 1), 1).await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(matches!(
        book(&engine, kit, w, 0).await,
        Err(EngineError::InvalidQuantity { requested: 0, capacity: 3 })
    ));
    assert!(matches!(
        book(&engine, kit, w, 4).await,
        Err(EngineError::InvalidQuantity { requested: 4, capacity: 3 })
    ));
    assert!(matches!(
        book(&engine, room, w, 2).await,
        Err(EngineError::InvalidQuantity { requested: 2, .. })
    ));
    assert!(matches!(
        book(&engine, Ulid::new(), w, 1).await,
        Err(EngineError::NotFound(_))
    ));

    let id = Ulid::new();
    engine
        .reserve(id, kit, w, 1, CustomerInfo::new("a", 0), None)
        .await
        .unwrap();
    assert!(matches!(
        engine.reserve(id, kit, w, 1, CustomerInfo::new("a", 0), None).await,
        Err(EngineError::AlreadyExists(dup)) if dup == id
    ));
    // Nothing but the one good reservation reached the log.
    assert_eq!(engine.wal_appends_since_compact().await, 3);
}

#[tokio::test]
async fn reservation_code_format_and_lookup() {
    let engine = test_engine("reservation_code.wal");
    let kit = equipment(&engine, 10).await;
    let mut codes = std::collections::HashSet::new();
    for i in 0..10 {
        let r = book(&engine, kit, Span::new(DAY + 9 * H + i * M, DAY + 10 * H), 1)
            .await
            .unwrap();
        assert!(r.code.starts_with("R20350507-"), "{}", r.code);
        assert_eq!(r.code.len(), "R20350507-".len() + 6);
        assert!(r.code[10..].chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(codes.insert(r.code.clone()), "duplicate code {}", r.code);

        let found = engine.reservation_by_code(&r.code).await.unwrap();
        assert_eq!(found.reservation.id, r.id);
    }
    assert!(matches!(
        engine.reservation_by_code("R20350507-NOPE00").await,
        Err(EngineError::CodeNotFound(_))
    ));
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exactly_one_winner_for_last_unit() {
    let engine = Arc::new(test_engine("last_unit.wal"));
    let room = studio(&engine).await;
    let w = Span::new(DAY + 14 * H, DAY + 16 * H);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move { book(&eng, room, w, 1).await }));
    }

    let mut won = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => won += 1,
            Err(EngineError::ResourceUnavailable { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(won, 1);
    assert_eq!(engine.available_quantity(room, w).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_never_exceed_capacity() {
    let engine = Arc::new(test_engine("never_exceed.wal"));
    let kit = equipment(&engine, 5).await;

    let mut handles = Vec::new();
    for i in 0..40 {
        let eng = engine.clone();
        // Staggered windows so some overlap and some do not.
        let start = DAY + (i % 4) * H;
        handles.push(tokio::spawn(async move {
            book(&eng, kit, Span::new(start, start + 2 * H), 1 + (i % 2) as u32).await
        }));
    }
    for h in handles {
        let _ = h.await.unwrap();
    }

    let infos = engine.reservations_for_resource(kit).await.unwrap();
    assert!(!infos.is_empty());
    // Load peaks at some reservation's start; check every one of them.
    for info in &infos {
        let t = info.reservation.window.start;
        let load: u32 = infos
            .iter()
            .filter(|o| o.reservation.is_active() && o.reservation.window.contains_instant(t))
            .map(|o| o.reservation.quantity)
            .sum();
        assert!(load <= 5, "overbooked at {t}: {load}");
    }
    let free = engine.availability(kit, Span::new(DAY, DAY + 6 * H)).await.unwrap();
    assert!(free.iter().all(|w| w.free <= 5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn group_commit_batches_appends() {
    let path = test_wal_path("group_commit_batch.wal");
    let engine = Arc::new(open_engine(path.clone(), ReservationPolicy::default()));

    let n = 20;
    let mut handles = Vec::new();
    for i in 0..n {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.register_resource(Ulid::new(), ResourceKind::Equipment, 2, Some(format!("Kit {i}")))
                .await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(engine.list_resources().await.len(), n);

    let engine2 = open_engine(path, ReservationPolicy::default());
    assert_eq!(engine2.list_resources().await.len(), n);
}

// ── Lifecycle ────────────────────────────────────────────

#[tokio::test]
async fn cancellation_is_not_repeatable() {
    let engine = test_engine("cancel_twice.wal");
    let kit = equipment(&engine, 2).await;
    let w = Span::new(DAY, DAY + 2 * H);
    let r = book(&engine, kit, w, 2).await.unwrap();
    engine.confirm(r.id, None).await.unwrap();
    assert_eq!(engine.available_quantity(kit, w).await.unwrap(), 0);

    let cancelled = engine.cancel(r.id, "weather", Some("ops".into())).await.unwrap();
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);
    assert_eq!(engine.available_quantity(kit, w).await.unwrap(), 2);

    assert!(matches!(
        engine.cancel(r.id, "again", None).await,
        Err(EngineError::InvalidTransition { entity: "reservation", from: "cancelled", to: "cancelled" })
    ));
    assert_eq!(engine.available_quantity(kit, w).await.unwrap(), 2);
    let last = engine.reservation(r.id).await.unwrap().reservation.timeline;
    assert_eq!(last.last().unwrap().detail.as_deref(), Some("weather"));
}

#[tokio::test]
async fn cancel_requires_reason() {
    let engine = test_engine("cancel_reason.wal");
    let room = studio(&engine).await;
    let r = book(&engine, room, Span::new(DAY, DAY + H), 1).await.unwrap();

    assert!(matches!(
        engine
            .transition_reservation(r.id, ReservationStatus::Cancelled, None, None)
            .await,
        Err(EngineError::ReasonRequired)
    ));
    assert!(matches!(
        engine.cancel(r.id, "   ", None).await,
        Err(EngineError::ReasonRequired)
    ));
    assert_eq!(
        engine.reservation(r.id).await.unwrap().reservation.status,
        ReservationStatus::Pending
    );
}

#[tokio::test]
async fn transition_graph_enforced() {
    let engine = test_engine("transition_graph.wal");
    let room = studio(&engine).await;
    let r = book(&engine, room, Span::new(DAY, DAY + H), 1).await.unwrap();

    assert!(matches!(
        engine.complete(r.id, None).await,
        Err(EngineError::InvalidTransition { from: "pending", to: "completed", .. })
    ));
    engine.confirm(r.id, None).await.unwrap();
    assert!(matches!(
        engine
            .transition_reservation(r.id, ReservationStatus::Pending, None, None)
            .await,
        Err(EngineError::InvalidTransition { .. })
    ));
    let done = engine.complete(r.id, Some("front-desk".into())).await.unwrap();
    assert_eq!(done.status, ReservationStatus::Completed);
    let events: Vec<&str> = done.timeline.iter().map(|e| e.event.as_str()).collect();
    assert_eq!(events, vec!["created", "confirmed", "completed"]);

    // Completed reservations release capacity.
    book(&engine, room, Span::new(DAY, DAY + H), 1).await.unwrap();
    assert!(matches!(
        engine.confirm(Ulid::new(), None).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn payment_status_is_independent() {
    let engine = test_engine("payment.wal");
    let room = studio(&engine).await;
    let paid = book(&engine, room, Span::new(DAY, DAY + H), 1).await.unwrap();
    let r = engine.update_payment(paid.id, PaymentStatus::Paid, None).await.unwrap();
    assert_eq!(r.payment_status, PaymentStatus::Paid);
    assert_eq!(r.status, ReservationStatus::Pending);
    assert!(matches!(
        engine.update_payment(paid.id, PaymentStatus::Failed, None).await,
        Err(EngineError::InvalidTransition { entity: "payment", .. })
    ));

    let failed = book(&engine, room, Span::new(DAY + H, DAY + 2 * H), 1).await.unwrap();
    let r = engine.update_payment(failed.id, PaymentStatus::Failed, None).await.unwrap();
    assert_eq!(r.payment_status, PaymentStatus::Failed);
    assert_eq!(r.status, ReservationStatus::Pending);
    assert_eq!(r.timeline.last().unwrap().event, "payment_failed");
}

// ── Overdue ──────────────────────────────────────────────

#[tokio::test]
async fn overdue_is_derived_on_read() {
    let engine = test_engine("overdue_read.wal");
    let kit = equipment(&engine, 3).await;
    let room = studio(&engine).await;

    let late = book(&engine, kit, Span::new(PAST, PAST + H), 1).await.unwrap();
    let returned = book(&engine, kit, Span::new(PAST, PAST + H), 1).await.unwrap();
    let cancelled = book(&engine, kit, Span::new(PAST, PAST + H), 1).await.unwrap();
    let session = book(&engine, room, Span::new(PAST, PAST + H), 1).await.unwrap();
    let upcoming = book(&engine, kit, Span::new(DAY, DAY + H), 1).await.unwrap();

    engine.confirm(returned.id, None).await.unwrap();
    engine.complete(returned.id, None).await.unwrap();
    engine.cancel(cancelled.id, "no show", None).await.unwrap();

    assert!(engine.reservation(late.id).await.unwrap().overdue);
    assert!(!engine.reservation(returned.id).await.unwrap().overdue);
    assert!(!engine.reservation(cancelled.id).await.unwrap().overdue);
    assert!(!engine.reservation(session.id).await.unwrap().overdue);
    assert!(!engine.reservation(upcoming.id).await.unwrap().overdue);

    let overdue = engine.overdue_reservations(now_ms()).await;
    assert_eq!(overdue.len(), 1);
    assert_eq!(overdue[0].reservation.id, late.id);
}

#[tokio::test]
async fn overdue_uses_supplied_clock() {
    let engine = test_engine("overdue_clock.wal");
    let kit = equipment(&engine, 2).await;
    let early = book(&engine, kit, Span::new(DAY, DAY + H), 1).await.unwrap();
    let later = book(&engine, kit, Span::new(DAY + H, DAY + 2 * H), 1).await.unwrap();
    engine.confirm(later.id, None).await.unwrap();

    // Exactly at the end is not yet overdue.
    assert!(engine.overdue_reservations(DAY + H).await.is_empty());
    let ids: Vec<Ulid> = engine
        .overdue_reservations(DAY + 3 * H)
        .await
        .into_iter()
        .map(|info| info.reservation.id)
        .collect();
    assert_eq!(ids, vec![early.id, later.id]);
}

// ── Availability ─────────────────────────────────────────

#[tokio::test]
async fn availability_segments_through_engine() {
    let engine = test_engine("availability_segments.wal");
    let kit = equipment(&engine, 3).await;
    book(&engine, kit, Span::new(DAY + 2 * H, DAY + 6 * H), 1).await.unwrap();
    book(&engine, kit, Span::new(DAY + 4 * H, DAY + 8 * H), 2).await.unwrap();

    let windows = engine.availability(kit, Span::new(DAY, DAY + 10 * H)).await.unwrap();
    let frees: Vec<(Ms, Ms, u32)> = windows
        .iter()
        .map(|w| (w.span.start - DAY, w.span.end - DAY, w.free))
        .collect();
    assert_eq!(
        frees,
        vec![(0, 2 * H, 3), (2 * H, 4 * H, 2), (4 * H, 6 * H, 0), (6 * H, 8 * H, 1), (8 * H, 10 * H, 3)]
    );
    assert_eq!(
        engine.available_quantity(kit, Span::new(DAY + 6 * H, DAY + 7 * H)).await.unwrap(),
        1
    );
    assert!(matches!(
        engine
            .availability(kit, Span::new(DAY, DAY + MAX_QUERY_WINDOW_MS + 1))
            .await,
        Err(EngineError::LimitExceeded(_))
    ));
}

// ── Bulk ─────────────────────────────────────────────────

#[tokio::test]
async fn scenario_d_bulk_cancel_isolates_failures() {
    let engine = test_engine("scenario_d.wal");
    let kit = equipment(&engine, 5).await;
    let w = Span::new(DAY + 8 * H, DAY + 18 * H);

    let mut ids = Vec::new();
    for _ in 0..5 {
        let r = book(&engine, kit, w, 1).await.unwrap();
        engine.confirm(r.id, None).await.unwrap();
        ids.push(r.id);
    }
    engine.complete(ids[2], None).await.unwrap();
    assert_eq!(engine.available_quantity(kit, w).await.unwrap(), 1);

    let report = engine
        .bulk_transition(&ids, ReservationStatus::Cancelled, Some("studio flooded".into()), None)
        .await
        .unwrap();
    assert_eq!(report.total(), 5);
    assert_eq!(report.succeeded, vec![ids[0], ids[1], ids[3], ids[4]]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, ids[2]);
    assert_eq!(report.failed[0].error.code(), "InvalidTransition");

    assert_eq!(engine.available_quantity(kit, w).await.unwrap(), 5);
    assert_eq!(
        engine.reservation(ids[2]).await.unwrap().reservation.status,
        ReservationStatus::Completed
    );
}

#[tokio::test]
async fn bulk_reports_unknown_ids_and_missing_reason() {
    let engine = test_engine("bulk_errors.wal");
    let room = studio(&engine).await;
    let r = book(&engine, room, Span::new(DAY, DAY + H), 1).await.unwrap();
    let ghost = Ulid::new();

    let report = engine
        .bulk_transition(&[r.id, ghost], ReservationStatus::Cancelled, None, None)
        .await
        .unwrap();
    assert!(report.succeeded.is_empty());
    let codes: Vec<&str> = report.failed.iter().map(|f| f.error.code()).collect();
    assert_eq!(codes, vec!["ReasonRequired", "NotFound"]);

    let report = engine
        .bulk_transition(&[r.id, ghost], ReservationStatus::Confirmed, None, None)
        .await
        .unwrap();
    assert_eq!(report.succeeded, vec![r.id]);
    assert_eq!(report.failed.len(), 1);
}

#[tokio::test]
async fn bulk_batch_size_is_capped() {
    let engine = test_engine("bulk_cap.wal");
    let ids: Vec<Ulid> = (0..=MAX_BULK_SIZE).map(|_| Ulid::new()).collect();
    assert!(matches!(
        engine
            .bulk_transition(&ids, ReservationStatus::Confirmed, None, None)
            .await,
        Err(EngineError::LimitExceeded("bulk batch too large"))
    ));
}

// ── Refunds ──────────────────────────────────────────────

#[tokio::test]
async fn refund_happy_path() {
    let engine = test_engine("refund_happy.wal");
    let room = studio(&engine).await;
    let r = book(&engine, room, Span::new(DAY, DAY + H), 1).await.unwrap();
    let refund_id = Ulid::new();

    let refund = engine
        .request_refund(refund_id, r.id, 8_000, Some("cust-42".into()))
        .await
        .unwrap();
    assert_eq!(refund.status, RefundStatus::Requested);
    assert_eq!(refund.requested_amount, 8_000);

    let approved = engine
        .approve_refund(refund_id, 5_000, Some("partial, late notice".into()), Some("admin".into()))
        .await
        .unwrap();
    assert_eq!(approved.approved_amount, Some(5_000));
    assert_eq!(approved.admin_notes.as_deref(), Some("partial, late notice"));

    let done = engine
        .complete_refund(refund_id, "txn-8842".into(), Some("admin".into()))
        .await
        .unwrap();
    assert_eq!(done.status, RefundStatus::Completed);
    assert_eq!(done.transaction_ref.as_deref(), Some("txn-8842"));
    let events: Vec<&str> = done.timeline.iter().map(|e| e.event.as_str()).collect();
    assert_eq!(events, vec!["requested", "approved", "completed"]);

    assert_eq!(engine.refund_for_reservation(r.id).await.unwrap(), done);
    let timeline = engine.reservation(r.id).await.unwrap().reservation.timeline;
    assert!(timeline.iter().any(|e| e.event == "refund_requested"));
}

#[tokio::test]
async fn refund_amounts_are_bounded() {
    let engine = test_engine("refund_bounds.wal");
    let room = studio(&engine).await;
    let r = book(&engine, room, Span::new(DAY, DAY + H), 1).await.unwrap();

    assert!(matches!(
        engine.request_refund(Ulid::new(), r.id, 0, None).await,
        Err(EngineError::InvalidAmount(0))
    ));
    assert!(matches!(
        engine.request_refund(Ulid::new(), r.id, 12_000, None).await,
        Err(EngineError::AmountExceeded { amount: 12_000, limit: 10_000 })
    ));

    let refund_id = Ulid::new();
    engine.request_refund(refund_id, r.id, 8_000, None).await.unwrap();
    assert!(matches!(
        engine.request_refund(Ulid::new(), r.id, 1_000, None).await,
        Err(EngineError::RefundExists(id)) if id == r.id
    ));
    assert!(matches!(
        engine.approve_refund(refund_id, 9_000, None, None).await,
        Err(EngineError::AmountExceeded { amount: 9_000, limit: 8_000 })
    ));
    assert!(matches!(
        engine.complete_refund(refund_id, "txn-1".into(), None).await,
        Err(EngineError::InvalidTransition { entity: "refund", from: "requested", to: "completed" })
    ));
    engine.approve_refund(refund_id, 8_000, None, None).await.unwrap();
    assert!(matches!(
        engine.complete_refund(refund_id, "  ".into(), None).await,
        Err(EngineError::TransactionRefRequired)
    ));
}

#[tokio::test]
async fn rejected_refund_is_terminal() {
    let engine = test_engine("refund_rejected.wal");
    let room = studio(&engine).await;
    let r = book(&engine, room, Span::new(DAY, DAY + H), 1).await.unwrap();
    let refund_id = Ulid::new();
    engine.request_refund(refund_id, r.id, 2_000, None).await.unwrap();

    let rejected = engine
        .reject_refund(refund_id, Some("outside policy".into()), None)
        .await
        .unwrap();
    assert_eq!(rejected.status, RefundStatus::Rejected);
    assert!(matches!(
        engine.approve_refund(refund_id, 1_000, None, None).await,
        Err(EngineError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn cancelled_reservation_is_not_refundable() {
    let engine = test_engine("refund_cancelled.wal");
    let room = studio(&engine).await;
    let r = book(&engine, room, Span::new(DAY, DAY + H), 1).await.unwrap();
    engine.cancel(r.id, "changed plans", None).await.unwrap();
    assert!(matches!(
        engine.request_refund(Ulid::new(), r.id, 1_000, None).await,
        Err(EngineError::NotRefundable(id)) if id == r.id
    ));
    assert!(matches!(
        engine.request_refund(Ulid::new(), Ulid::new(), 1_000, None).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Complaints ───────────────────────────────────────────

#[tokio::test]
async fn complaint_workflow() {
    let engine = test_engine("complaint_flow.wal");
    let id = Ulid::new();
    let opened = engine
        .open_complaint(
            id,
            "R20350507-ABC123".into(),
            Priority::High,
            Some("mic stand broken".into()),
            Some("cust-42".into()),
        )
        .await
        .unwrap();
    assert_eq!(opened.status, ComplaintStatus::Pending);
    assert_eq!(opened.timeline[0].event, "opened");

    let escalated = engine
        .escalate_complaint(id, Some("repeat issue".into()), Some("support".into()))
        .await
        .unwrap();
    assert_eq!(escalated.status, ComplaintStatus::Escalated);

    let assigned = engine
        .assign_complaint(id, "ops-lead".into(), Some("support".into()))
        .await
        .unwrap();
    assert_eq!(assigned.assigned_to.as_deref(), Some("ops-lead"));
    assert_eq!(assigned.status, ComplaintStatus::Escalated);

    engine
        .transition_complaint(id, ComplaintStatus::InProgress, None, Some("ops-lead".into()))
        .await
        .unwrap();
    let resolved = engine
        .transition_complaint(id, ComplaintStatus::Resolved, Some("replaced stand".into()), None)
        .await
        .unwrap();
    let events: Vec<&str> = resolved.timeline.iter().map(|e| e.event.as_str()).collect();
    assert_eq!(events, vec!["opened", "escalated", "assigned", "in_progress", "resolved"]);

    assert!(matches!(
        engine.transition_complaint(id, ComplaintStatus::Closed, None, None).await,
        Err(EngineError::InvalidTransition { entity: "complaint", from: "resolved", to: "closed" })
    ));
    assert!(matches!(
        engine.assign_complaint(id, "someone".into(), None).await,
        Err(EngineError::InvalidTransition { to: "assigned", .. })
    ));
    assert_eq!(engine.complaint(id).await.unwrap(), resolved);
}

#[tokio::test]
async fn complaint_ids_are_unique() {
    let engine = test_engine("complaint_dup.wal");
    let id = Ulid::new();
    engine
        .open_complaint(id, "kit-7".into(), Priority::Low, None, None)
        .await
        .unwrap();
    assert!(matches!(
        engine.open_complaint(id, "kit-7".into(), Priority::Low, None, None).await,
        Err(EngineError::AlreadyExists(_))
    ));
    assert!(matches!(
        engine
            .transition_complaint(Ulid::new(), ComplaintStatus::InProgress, None, None)
            .await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Change feed ──────────────────────────────────────────

#[tokio::test]
async fn mutations_are_published_per_resource() {
    let engine = test_engine("change_feed.wal");
    let room = studio(&engine).await;
    let other = studio(&engine).await;
    let mut rx = engine.notify.subscribe(Topic::Resource(room));
    let mut other_rx = engine.notify.subscribe(Topic::Resource(other));
    let mut complaints_rx = engine.notify.subscribe(Topic::Complaints);

    let r = book(&engine, room, Span::new(DAY, DAY + H), 1).await.unwrap();
    engine.confirm(r.id, None).await.unwrap();
    engine
        .open_complaint(Ulid::new(), r.code.clone(), Priority::Medium, None, None)
        .await
        .unwrap();

    assert!(matches!(rx.try_recv().unwrap(), Event::ReservationCreated { id, .. } if id == r.id));
    assert!(matches!(
        rx.try_recv().unwrap(),
        Event::ReservationTransitioned { to: ReservationStatus::Confirmed, .. }
    ));
    assert!(other_rx.try_recv().is_err());
    assert!(matches!(complaints_rx.try_recv().unwrap(), Event::ComplaintOpened { .. }));
}

// ── Durability ───────────────────────────────────────────

/// Build a little of everything and return (resource, reservation, refund, complaint).
async fn populate(engine: &Engine) -> (Ulid, Ulid, Ulid, Ulid) {
    let kit = equipment(engine, 4).await;
    let r = book(engine, kit, Span::new(DAY, DAY + 3 * H), 2).await.unwrap();
    engine.confirm(r.id, Some("desk".into())).await.unwrap();
    engine.update_payment(r.id, PaymentStatus::Paid, None).await.unwrap();
    let cancelled = book(engine, kit, Span::new(DAY + H, DAY + 2 * H), 1).await.unwrap();
    engine.cancel(cancelled.id, "duplicate", None).await.unwrap();

    let refund_id = Ulid::new();
    engine.request_refund(refund_id, r.id, 3_000, None).await.unwrap();
    engine.approve_refund(refund_id, 2_500, Some("goodwill".into()), None).await.unwrap();

    let complaint_id = Ulid::new();
    engine
        .open_complaint(complaint_id, r.code.clone(), Priority::Urgent, Some("late pickup".into()), None)
        .await
        .unwrap();
    engine.assign_complaint(complaint_id, "ops".into(), None).await.unwrap();
    (kit, r.id, refund_id, complaint_id)
}

async fn assert_same_state(a: &Engine, b: &Engine, ids: (Ulid, Ulid, Ulid, Ulid)) {
    let (kit, reservation, refund, complaint) = ids;
    assert_eq!(a.list_resources().await, b.list_resources().await);
    assert_eq!(
        a.reservations_for_resource(kit).await.unwrap(),
        b.reservations_for_resource(kit).await.unwrap()
    );
    let code = a.reservation(reservation).await.unwrap().reservation.code;
    assert_eq!(b.reservation_by_code(&code).await.unwrap().reservation.id, reservation);
    assert_eq!(a.refund(refund).await.unwrap(), b.refund(refund).await.unwrap());
    assert_eq!(
        b.refund_for_reservation(reservation).await.unwrap().id,
        refund
    );
    assert_eq!(a.complaint(complaint).await.unwrap(), b.complaint(complaint).await.unwrap());
    assert_eq!(
        a.available_quantity(kit, Span::new(DAY, DAY + 3 * H)).await.unwrap(),
        b.available_quantity(kit, Span::new(DAY, DAY + 3 * H)).await.unwrap()
    );
}

#[tokio::test]
async fn wal_replay_restores_everything() {
    let path = test_wal_path("replay_all.wal");
    let engine = open_engine(path.clone(), ReservationPolicy::default());
    let ids = populate(&engine).await;

    let replayed = open_engine(path, ReservationPolicy::default());
    assert_same_state(&engine, &replayed, ids).await;

    // Invariants keep holding after replay: the refund slot is still taken.
    assert!(matches!(
        replayed.request_refund(Ulid::new(), ids.1, 100, None).await,
        Err(EngineError::RefundExists(_))
    ));
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact_state.wal");
    let engine = open_engine(path.clone(), ReservationPolicy::default());
    let ids = populate(&engine).await;
    assert_eq!(engine.wal_appends_since_compact().await, 10);

    // 1 resource + 2 reservations + 1 refund + 1 complaint
    assert_eq!(engine.compact_wal().await.unwrap(), 5);
    assert_eq!(engine.wal_appends_since_compact().await, 0);

    let replayed = open_engine(path.clone(), ReservationPolicy::default());
    assert_same_state(&engine, &replayed, ids).await;

    // Appends after compaction land after the snapshot.
    engine.complete(ids.1, None).await.unwrap();
    engine
        .complete_refund(ids.2, "txn-77".into(), None)
        .await
        .unwrap();
    let again = open_engine(path, ReservationPolicy::default());
    assert_same_state(&engine, &again, ids).await;
    assert_eq!(
        again.reservation(ids.1).await.unwrap().reservation.status,
        ReservationStatus::Completed
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn compaction_under_concurrent_writes_loses_nothing() {
    let path = test_wal_path("compact_concurrent.wal");
    let engine = Arc::new(open_engine(path.clone(), ReservationPolicy::default()));
    let kit = equipment(&engine, 1_000).await;

    let mut handles = Vec::new();
    for i in 0..50 {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            book(&eng, kit, Span::new(DAY + i * M, DAY + i * M + H), 1).await
        }));
    }
    let compactor = {
        let eng = engine.clone();
        tokio::spawn(async move { eng.compact_wal().await })
    };
    for h in handles {
        h.await.unwrap().unwrap();
    }
    compactor.await.unwrap().unwrap();

    let replayed = open_engine(path, ReservationPolicy::default());
    assert_eq!(replayed.reservations_for_resource(kit).await.unwrap().len(), 50);
}

#[tokio::test]
async fn wal_append_counter() {
    let engine = test_engine("append_counter.wal");
    assert_eq!(engine.wal_appends_since_compact().await, 0);
    let room = studio(&engine).await;
    let r = book(&engine, room, Span::new(DAY, DAY + H), 1).await.unwrap();
    engine.confirm(r.id, None).await.unwrap();
    // Rejected transitions never reach the log.
    let _ = engine.confirm(r.id, None).await;
    assert_eq!(engine.wal_appends_since_compact().await, 3);
}
