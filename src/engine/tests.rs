use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use tokio_test::assert_ok;
use ulid::Ulid;

use super::*;
use crate::model::AppointmentStatus::*;
use crate::notify::NoticeKind;

const H: Ms = 3_600_000; // 1 hour in ms
const M: Ms = 60_000; // 1 minute in ms

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("bookd_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn test_engine(name: &str) -> Engine {
    Engine::new(test_wal_path(name), Arc::new(NotifyHub::new())).unwrap()
}

fn customer(id: Ulid) -> Actor {
    Actor::new(id, Role::Customer)
}

fn staff_actor() -> Actor {
    Actor::new(Ulid::new(), Role::Staff)
}

struct Seeded {
    service: Ulid,
    shift: Ulid,
    staff: Ulid,
    slot: Ulid,
    /// Slot window is `[base, base + H)`; the shift runs `[base - H, base + 8H)`.
    base: Ms,
}

async fn seed_at(engine: &Engine, capacity: u32, base: Ms) -> Seeded {
    let service = Ulid::new();
    let shift = Ulid::new();
    let staff = Ulid::new();
    let slot = Ulid::new();

    engine
        .define_service(service, "Haircut".into(), H)
        .await
        .unwrap();
    engine
        .publish_shift(shift, staff, Window::new(base - H, base + 8 * H))
        .await
        .unwrap();
    engine
        .publish_slot(slot, shift, service, Window::new(base, base + H), capacity)
        .await
        .unwrap();

    Seeded {
        service,
        shift,
        staff,
        slot,
        base,
    }
}

/// Seed a slot starting tomorrow, safely bookable with the real clock.
async fn seed(engine: &Engine, capacity: u32) -> Seeded {
    seed_at(engine, capacity, now_ms() + 24 * H).await
}

// ── Catalog boundary ─────────────────────────────────────

#[tokio::test]
async fn publish_slot_and_find() {
    let engine = test_engine("publish_find.wal");
    let s = seed(&engine, 3).await;

    let found = engine
        .find_slots(s.staff, s.service, Window::new(s.base - H, s.base + 2 * H))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, s.slot);
    assert_eq!(found[0].capacity, 3);
    assert_eq!(found[0].remaining, 3);
    assert!(found[0].active);
}

#[tokio::test]
async fn publish_slot_unknown_service_fails() {
    let engine = test_engine("unknown_service.wal");
    let s = seed(&engine, 1).await;

    let result = engine
        .publish_slot(
            Ulid::new(),
            s.shift,
            Ulid::new(),
            Window::new(s.base + H, s.base + 2 * H),
            1,
        )
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn publish_slot_unknown_shift_fails() {
    let engine = test_engine("unknown_shift.wal");
    let s = seed(&engine, 1).await;

    let result = engine
        .publish_slot(
            Ulid::new(),
            Ulid::new(),
            s.service,
            Window::new(s.base + H, s.base + 2 * H),
            1,
        )
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn publish_slot_outside_shift_fails() {
    let engine = test_engine("outside_shift.wal");
    let s = seed(&engine, 1).await;

    // Shift ends at base + 8H; this slot spills past it.
    let result = engine
        .publish_slot(
            Ulid::new(),
            s.shift,
            s.service,
            Window::new(s.base + 8 * H, s.base + 9 * H),
            1,
        )
        .await;
    assert!(matches!(result, Err(EngineError::NoCoveringShift { .. })));
}

#[tokio::test]
async fn publish_slot_duration_mismatch_fails() {
    let engine = test_engine("duration_mismatch.wal");
    let s = seed(&engine, 1).await;

    // The service takes a full hour; this slot is 30 minutes.
    let result = engine
        .publish_slot(
            Ulid::new(),
            s.shift,
            s.service,
            Window::new(s.base + H, s.base + H + 30 * M),
            1,
        )
        .await;
    assert!(matches!(
        result,
        Err(EngineError::DurationMismatch { expected, got }) if expected == H && got == 30 * M
    ));
}

#[tokio::test]
async fn publish_slot_duplicate_id_fails() {
    let engine = test_engine("dup_slot.wal");
    let s = seed(&engine, 1).await;

    let result = engine
        .publish_slot(
            s.slot,
            s.shift,
            s.service,
            Window::new(s.base + H, s.base + 2 * H),
            1,
        )
        .await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn publish_slot_zero_capacity_fails() {
    let engine = test_engine("zero_capacity.wal");
    let s = seed(&engine, 1).await;

    let result = engine
        .publish_slot(
            Ulid::new(),
            s.shift,
            s.service,
            Window::new(s.base + H, s.base + 2 * H),
            0,
        )
        .await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}

#[tokio::test]
async fn define_service_duplicate_fails() {
    let engine = test_engine("dup_service.wal");
    let id = Ulid::new();
    engine.define_service(id, "Cut".into(), H).await.unwrap();
    let result = engine.define_service(id, "Cut again".into(), H).await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn define_service_bad_inputs_fail() {
    let engine = test_engine("bad_service.wal");
    let too_long = "x".repeat(crate::limits::MAX_NAME_LEN + 1);
    assert!(matches!(
        engine.define_service(Ulid::new(), too_long, H).await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(matches!(
        engine.define_service(Ulid::new(), "Cut".into(), 0).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn revoke_shift_deactivates_slots() {
    let engine = test_engine("revoke_shift.wal");
    let s = seed(&engine, 1).await;

    engine.revoke_shift(s.shift).await.unwrap();

    // No new reservations on the orphaned slot.
    let cust = Ulid::new();
    let result = engine
        .book(Ulid::new(), s.slot, cust, None, customer(cust))
        .await;
    assert!(matches!(result, Err(EngineError::SlotInactive(_))));

    // And it disappears from the picker.
    let found = engine
        .find_slots(s.staff, s.service, Window::new(s.base - H, s.base + 2 * H))
        .await
        .unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn revoke_shift_leaves_existing_appointments() {
    let engine = test_engine("revoke_shift_existing.wal");
    let s = seed(&engine, 1).await;

    let cust = Ulid::new();
    let appt = Ulid::new();
    engine
        .book(appt, s.slot, cust, None, customer(cust))
        .await
        .unwrap();

    engine.revoke_shift(s.shift).await.unwrap();

    let info = engine.get_appointment(&appt).await.unwrap();
    assert_eq!(info.status, Pending);
    // The appointment can still travel its lifecycle.
    assert_ok!(engine.confirm(appt, staff_actor()).await);
}

#[tokio::test]
async fn revoke_unknown_shift_fails() {
    let engine = test_engine("revoke_unknown_shift.wal");
    let result = engine.revoke_shift(Ulid::new()).await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

// ── Booking ──────────────────────────────────────────────

#[tokio::test]
async fn book_happy_path() {
    let engine = test_engine("book_happy.wal");
    let s = seed(&engine, 2).await;

    let cust = Ulid::new();
    let appt = Ulid::new();
    engine
        .book(appt, s.slot, cust, Some("first visit".into()), customer(cust))
        .await
        .unwrap();

    let info = engine.get_appointment(&appt).await.unwrap();
    assert_eq!(info.status, Pending);
    assert_eq!(info.customer_id, cust);
    assert_eq!(info.staff_id, s.staff);
    assert_eq!(info.service_id, s.service);
    assert_eq!(info.note.as_deref(), Some("first visit"));

    assert_eq!(engine.capacity_remaining(&s.slot).await.unwrap(), 1);

    let trail = engine.list_history(&appt).unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].status, Pending);
    assert_eq!(trail[0].actor, Some(cust));

    let inbox = engine.notify.mailbox(&cust);
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, NoticeKind::Created);
    assert_eq!(engine.notify.mailbox(&s.staff).len(), 1);
}

#[tokio::test]
async fn book_full_slot_rejected() {
    let engine = test_engine("book_full.wal");
    let s = seed(&engine, 1).await;

    let a = Ulid::new();
    engine
        .book(Ulid::new(), s.slot, a, None, customer(a))
        .await
        .unwrap();

    let b = Ulid::new();
    let result = engine.book(Ulid::new(), s.slot, b, None, customer(b)).await;
    assert!(matches!(result, Err(EngineError::SlotFull(_))));
    assert_eq!(engine.capacity_remaining(&s.slot).await.unwrap(), 0);
}

#[tokio::test]
async fn book_unknown_slot_fails() {
    let engine = test_engine("book_unknown_slot.wal");
    let cust = Ulid::new();
    let result = engine
        .book(Ulid::new(), Ulid::new(), cust, None, customer(cust))
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn book_revoked_slot_fails() {
    let engine = test_engine("book_revoked.wal");
    let s = seed(&engine, 1).await;

    engine.revoke_slot(s.slot).await.unwrap();

    let cust = Ulid::new();
    let result = engine.book(Ulid::new(), s.slot, cust, None, customer(cust)).await;
    // Distinct from NotFound so the caller can offer re-selection.
    assert!(matches!(result, Err(EngineError::SlotInactive(_))));
}

#[tokio::test]
async fn book_started_slot_fails() {
    let engine = test_engine("book_started.wal");
    // Slot window started two hours ago.
    let s = seed_at(&engine, 1, now_ms() - 2 * H).await;

    let cust = Ulid::new();
    let result = engine.book(Ulid::new(), s.slot, cust, None, customer(cust)).await;
    assert!(matches!(result, Err(EngineError::SlotExpired(_))));
}

#[tokio::test]
async fn book_for_someone_else_unauthorized() {
    let engine = test_engine("book_other.wal");
    let s = seed(&engine, 1).await;

    let result = engine
        .book(Ulid::new(), s.slot, Ulid::new(), None, customer(Ulid::new()))
        .await;
    assert!(matches!(result, Err(EngineError::Unauthorized(_))));
    // The failed attempt must not consume capacity.
    assert_eq!(engine.capacity_remaining(&s.slot).await.unwrap(), 1);
}

#[tokio::test]
async fn staff_books_on_customers_behalf() {
    let engine = test_engine("book_behalf.wal");
    let s = seed(&engine, 1).await;

    let cust = Ulid::new();
    let appt = Ulid::new();
    let by = staff_actor();
    engine.book(appt, s.slot, cust, None, by).await.unwrap();

    let info = engine.get_appointment(&appt).await.unwrap();
    assert_eq!(info.customer_id, cust);
    let trail = engine.list_history(&appt).unwrap();
    assert_eq!(trail[0].actor, Some(by.id));
}

#[tokio::test]
async fn book_duplicate_id_fails_without_leaking_capacity() {
    let engine = test_engine("book_dup_id.wal");
    let s = seed(&engine, 2).await;

    let cust = Ulid::new();
    let appt = Ulid::new();
    engine.book(appt, s.slot, cust, None, customer(cust)).await.unwrap();

    let result = engine.book(appt, s.slot, cust, None, customer(cust)).await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
    assert_eq!(engine.capacity_remaining(&s.slot).await.unwrap(), 1);
}

#[tokio::test]
async fn book_note_too_long_fails() {
    let engine = test_engine("book_long_note.wal");
    let s = seed(&engine, 1).await;

    let cust = Ulid::new();
    let note = "x".repeat(crate::limits::MAX_NOTE_LEN + 1);
    let result = engine
        .book(Ulid::new(), s.slot, cust, Some(note), customer(cust))
        .await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}

#[tokio::test]
async fn book_is_not_idempotent() {
    let engine = test_engine("book_not_idempotent.wal");
    let s = seed(&engine, 2).await;

    let cust = Ulid::new();
    engine
        .book(Ulid::new(), s.slot, cust, None, customer(cust))
        .await
        .unwrap();
    engine
        .book(Ulid::new(), s.slot, cust, None, customer(cust))
        .await
        .unwrap();

    // Two calls, two capacity units.
    assert_eq!(engine.capacity_remaining(&s.slot).await.unwrap(), 0);
    assert_eq!(engine.list_appointments_for_customer(&cust).await.len(), 2);
}

#[tokio::test]
async fn canceled_capacity_is_rebookable() {
    let engine = test_engine("rebook_after_cancel.wal");
    let s = seed(&engine, 1).await;

    // A takes the only unit; B is turned away.
    let a = Ulid::new();
    let appt_a = Ulid::new();
    engine.book(appt_a, s.slot, a, None, customer(a)).await.unwrap();

    let b = Ulid::new();
    let denied = engine.book(Ulid::new(), s.slot, b, None, customer(b)).await;
    assert!(matches!(denied, Err(EngineError::SlotFull(_))));

    // A cancels; the unit is free again.
    engine.cancel(appt_a, customer(a)).await.unwrap();
    assert_eq!(engine.capacity_remaining(&s.slot).await.unwrap(), 1);
    assert_eq!(engine.get_appointment(&appt_a).await.unwrap().status, Canceled);

    // Now B gets in.
    let appt_b = Ulid::new();
    engine.book(appt_b, s.slot, b, None, customer(b)).await.unwrap();
    assert_eq!(engine.capacity_remaining(&s.slot).await.unwrap(), 0);
    assert_eq!(engine.get_appointment(&appt_b).await.unwrap().status, Pending);
}

// ── Status transitions ───────────────────────────────────

#[tokio::test]
async fn confirm_flow() {
    let engine = test_engine("confirm_flow.wal");
    let s = seed(&engine, 1).await;

    let cust = Ulid::new();
    let appt = Ulid::new();
    engine.book(appt, s.slot, cust, None, customer(cust)).await.unwrap();

    let by = staff_actor();
    engine.confirm(appt, by).await.unwrap();

    let info = engine.get_appointment(&appt).await.unwrap();
    assert_eq!(info.status, Confirmed);

    let trail = engine.list_history(&appt).unwrap();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[0].status, Pending);
    assert_eq!(trail[1].status, Confirmed);
    assert_eq!(trail[1].actor, Some(by.id));

    // Confirming never touches occupancy.
    assert_eq!(engine.capacity_remaining(&s.slot).await.unwrap(), 0);

    // A second confirm is a state machine violation, not a silent success.
    let again = engine.confirm(appt, staff_actor()).await;
    assert!(matches!(
        again,
        Err(EngineError::InvalidTransition { from: Confirmed, to: Confirmed })
    ));
}

#[tokio::test]
async fn confirm_by_customer_unauthorized() {
    let engine = test_engine("confirm_customer.wal");
    let s = seed(&engine, 1).await;

    let cust = Ulid::new();
    let appt = Ulid::new();
    engine.book(appt, s.slot, cust, None, customer(cust)).await.unwrap();

    let result = engine.confirm(appt, customer(cust)).await;
    assert!(matches!(result, Err(EngineError::Unauthorized(_))));
    assert_eq!(engine.get_appointment(&appt).await.unwrap().status, Pending);
}

#[tokio::test]
async fn cancel_releases_capacity() {
    let engine = test_engine("cancel_release.wal");
    let s = seed(&engine, 2).await;

    let cust = Ulid::new();
    let appt = Ulid::new();
    engine.book(appt, s.slot, cust, None, customer(cust)).await.unwrap();
    assert_eq!(engine.capacity_remaining(&s.slot).await.unwrap(), 1);

    engine.cancel(appt, customer(cust)).await.unwrap();
    assert_eq!(engine.capacity_remaining(&s.slot).await.unwrap(), 2);
}

#[tokio::test]
async fn cancel_of_confirmed_releases_capacity() {
    let engine = test_engine("cancel_confirmed.wal");
    let s = seed(&engine, 1).await;

    let cust = Ulid::new();
    let appt = Ulid::new();
    engine.book(appt, s.slot, cust, None, customer(cust)).await.unwrap();
    engine.confirm(appt, staff_actor()).await.unwrap();

    engine.cancel(appt, staff_actor()).await.unwrap();
    assert_eq!(engine.get_appointment(&appt).await.unwrap().status, Canceled);
    assert_eq!(engine.capacity_remaining(&s.slot).await.unwrap(), 1);
}

#[tokio::test]
async fn cancel_by_other_customer_unauthorized() {
    let engine = test_engine("cancel_other.wal");
    let s = seed(&engine, 1).await;

    let cust = Ulid::new();
    let appt = Ulid::new();
    engine.book(appt, s.slot, cust, None, customer(cust)).await.unwrap();

    let result = engine.cancel(appt, customer(Ulid::new())).await;
    assert!(matches!(result, Err(EngineError::Unauthorized(_))));
    assert_eq!(engine.get_appointment(&appt).await.unwrap().status, Pending);
}

#[tokio::test]
async fn cancel_terminal_is_invalid_not_silent() {
    let engine = test_engine("cancel_twice.wal");
    let s = seed(&engine, 1).await;

    let cust = Ulid::new();
    let appt = Ulid::new();
    engine.book(appt, s.slot, cust, None, customer(cust)).await.unwrap();
    engine.cancel(appt, customer(cust)).await.unwrap();

    let again = engine.cancel(appt, customer(cust)).await;
    assert!(matches!(
        again,
        Err(EngineError::InvalidTransition { from: Canceled, to: Canceled })
    ));
    // The failed retry must not release a second unit.
    assert_eq!(engine.capacity_remaining(&s.slot).await.unwrap(), 1);
    assert_eq!(engine.list_history(&appt).unwrap().len(), 2);
}

#[tokio::test]
async fn mark_missed_before_window_end_rejected() {
    let engine = test_engine("missed_early.wal");
    let s = seed(&engine, 1).await;

    let cust = Ulid::new();
    let appt = Ulid::new();
    engine.book(appt, s.slot, cust, None, customer(cust)).await.unwrap();

    let result = engine.mark_missed(appt, staff_actor()).await;
    assert!(matches!(
        result,
        Err(EngineError::WindowNotElapsed { ends_at }) if ends_at == s.base + H
    ));
    assert_eq!(engine.get_appointment(&appt).await.unwrap().status, Pending);
}

#[tokio::test]
async fn mark_missed_flow() {
    let engine = test_engine("missed_flow.wal");
    let s = seed(&engine, 1).await;

    // Book while the window is still in the future, then judge the no-show
    // from a vantage point after the window has ended.
    let cust = Ulid::new();
    let appt = Ulid::new();
    engine
        .book_at(appt, s.slot, cust, None, customer(cust), s.base - 2 * H)
        .await
        .unwrap();

    let by = staff_actor();
    engine
        .mark_missed_at(appt, by, s.base + H + M)
        .await
        .unwrap();

    let info = engine.get_appointment(&appt).await.unwrap();
    assert_eq!(info.status, Missed);
    assert_eq!(engine.capacity_remaining(&s.slot).await.unwrap(), 1);

    let trail = engine.list_history(&appt).unwrap();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[1].status, Missed);

    // Terminal: nothing moves out of missed.
    let result = engine.cancel(appt, customer(cust)).await;
    assert!(matches!(result, Err(EngineError::InvalidTransition { from: Missed, .. })));
}

#[tokio::test]
async fn mark_missed_by_customer_unauthorized() {
    let engine = test_engine("missed_customer.wal");
    let s = seed(&engine, 1).await;

    let cust = Ulid::new();
    let appt = Ulid::new();
    engine.book(appt, s.slot, cust, None, customer(cust)).await.unwrap();

    let result = engine.mark_missed(appt, customer(cust)).await;
    assert!(matches!(result, Err(EngineError::Unauthorized(_))));
}

#[tokio::test]
async fn transitions_on_unknown_appointment_fail() {
    let engine = test_engine("unknown_appt.wal");
    let id = Ulid::new();
    assert!(matches!(
        engine.confirm(id, staff_actor()).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        engine.cancel(id, staff_actor()).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        engine.mark_missed(id, staff_actor()).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test]
async fn concurrent_bookers_admit_exactly_capacity() {
    let engine = Arc::new(test_engine("race_capacity.wal"));
    let s = seed(&engine, 3).await;

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let engine = engine.clone();
            let slot = s.slot;
            tokio::spawn(async move {
                let cust = Ulid::new();
                engine.book(Ulid::new(), slot, cust, None, customer(cust)).await
            })
        })
        .collect();

    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let admitted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(admitted, 3);
    for r in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(r, Err(EngineError::SlotFull(_))));
    }
    assert_eq!(engine.capacity_remaining(&s.slot).await.unwrap(), 0);
}

#[tokio::test]
async fn distinct_slots_do_not_contend() {
    let engine = Arc::new(test_engine("race_distinct.wal"));
    let s1 = seed(&engine, 1).await;
    let s2 = seed(&engine, 1).await;

    let mut tasks = Vec::new();
    for slot in [s1.slot, s2.slot] {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            let cust = Ulid::new();
            engine.book(Ulid::new(), slot, cust, None, customer(cust)).await
        }));
    }

    for r in join_all(tasks).await {
        assert_ok!(r.unwrap());
    }
    assert_eq!(engine.capacity_remaining(&s1.slot).await.unwrap(), 0);
    assert_eq!(engine.capacity_remaining(&s2.slot).await.unwrap(), 0);
}

// ── Compensation & durability ────────────────────────────

#[tokio::test]
async fn ledger_failure_releases_reservation() {
    let engine = test_engine("ledger_failure.wal");
    let s = seed(&engine, 1).await;

    engine.sever_ledger().await;

    let cust = Ulid::new();
    let appt = Ulid::new();
    let result = engine.book(appt, s.slot, cust, None, customer(cust)).await;
    assert!(matches!(result, Err(EngineError::Storage(_))));

    // The compensating release restored the claimed unit, and no
    // appointment state leaked out of the failed operation.
    assert_eq!(engine.capacity_remaining(&s.slot).await.unwrap(), 1);
    assert!(matches!(
        engine.get_appointment(&appt).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(engine.list_history(&appt).is_err());
    assert!(engine.notify.mailbox(&cust).is_empty());
}

#[tokio::test]
async fn ledger_failure_leaves_status_untouched() {
    let engine = test_engine("ledger_failure_status.wal");
    let s = seed(&engine, 1).await;

    let cust = Ulid::new();
    let appt = Ulid::new();
    engine.book(appt, s.slot, cust, None, customer(cust)).await.unwrap();

    engine.sever_ledger().await;

    let result = engine.confirm(appt, staff_actor()).await;
    assert!(matches!(result, Err(EngineError::Storage(_))));
    assert_eq!(engine.get_appointment(&appt).await.unwrap().status, Pending);
    assert_eq!(engine.list_history(&appt).unwrap().len(), 1);
}

#[tokio::test]
async fn replay_restores_state() {
    let path = test_wal_path("replay_full.wal");

    let service = Ulid::new();
    let shift = Ulid::new();
    let staff = Ulid::new();
    let slot = Ulid::new();
    let cust = Ulid::new();
    let appt_a = Ulid::new();
    let appt_b = Ulid::new();
    let base = now_ms() + 24 * H;

    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        engine.define_service(service, "Massage".into(), H).await.unwrap();
        engine
            .publish_shift(shift, staff, Window::new(base - H, base + 8 * H))
            .await
            .unwrap();
        engine
            .publish_slot(slot, shift, service, Window::new(base, base + H), 2)
            .await
            .unwrap();

        engine.book(appt_a, slot, cust, None, customer(cust)).await.unwrap();
        engine.confirm(appt_a, staff_actor()).await.unwrap();
        engine.book(appt_b, slot, cust, None, customer(cust)).await.unwrap();
        engine.cancel(appt_b, customer(cust)).await.unwrap();
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();

    // Catalog and slot state came back, including occupancy.
    assert_eq!(engine.capacity_remaining(&slot).await.unwrap(), 1);
    let summary = engine.slot_summary(&slot).await.unwrap();
    assert_eq!(summary.capacity, 2);
    assert!(summary.active);

    // Appointment statuses and trails came back.
    assert_eq!(engine.get_appointment(&appt_a).await.unwrap().status, Confirmed);
    assert_eq!(engine.get_appointment(&appt_b).await.unwrap().status, Canceled);
    assert_eq!(engine.list_history(&appt_a).unwrap().len(), 2);
    assert_eq!(engine.list_history(&appt_b).unwrap().len(), 2);
    assert_eq!(engine.list_appointments_for_customer(&cust).await.len(), 2);

    // And the revived engine still takes bookings.
    let c2 = Ulid::new();
    assert_ok!(engine.book(Ulid::new(), slot, c2, None, customer(c2)).await);
    assert_eq!(engine.capacity_remaining(&slot).await.unwrap(), 0);
}

#[tokio::test]
async fn replay_preserves_revocation() {
    let path = test_wal_path("replay_revoked.wal");
    let base = now_ms() + 24 * H;

    let slot;
    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        let s = seed_at(&engine, 1, base).await;
        engine.revoke_slot(s.slot).await.unwrap();
        slot = s.slot;
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    let cust = Ulid::new();
    let result = engine.book(Ulid::new(), slot, cust, None, customer(cust)).await;
    assert!(matches!(result, Err(EngineError::SlotInactive(_))));
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn find_slots_filters_and_sorts() {
    let engine = test_engine("find_filters.wal");
    let base = now_ms() + 24 * H;

    let service = Ulid::new();
    let other_service = Ulid::new();
    let shift = Ulid::new();
    let staff = Ulid::new();
    engine.define_service(service, "Cut".into(), H).await.unwrap();
    engine
        .define_service(other_service, "Shave".into(), H)
        .await
        .unwrap();
    engine
        .publish_shift(shift, staff, Window::new(base, base + 10 * H))
        .await
        .unwrap();

    let late = Ulid::new();
    let early = Ulid::new();
    let shaved = Ulid::new();
    let revoked = Ulid::new();
    engine
        .publish_slot(late, shift, service, Window::new(base + 4 * H, base + 5 * H), 1)
        .await
        .unwrap();
    engine
        .publish_slot(early, shift, service, Window::new(base + H, base + 2 * H), 1)
        .await
        .unwrap();
    engine
        .publish_slot(shaved, shift, other_service, Window::new(base + 2 * H, base + 3 * H), 1)
        .await
        .unwrap();
    engine
        .publish_slot(revoked, shift, service, Window::new(base + 6 * H, base + 7 * H), 1)
        .await
        .unwrap();
    engine.revoke_slot(revoked).await.unwrap();

    let found = engine
        .find_slots(staff, service, Window::new(base, base + 10 * H))
        .await
        .unwrap();
    // Other service and revoked slot excluded; sorted by start.
    assert_eq!(found.iter().map(|s| s.id).collect::<Vec<_>>(), vec![early, late]);

    // Range clamps: only the early slot fits below base + 3H.
    let found = engine
        .find_slots(staff, service, Window::new(base, base + 3 * H))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, early);

    // Unknown staff: empty, not an error.
    let found = engine
        .find_slots(Ulid::new(), service, Window::new(base, base + 10 * H))
        .await
        .unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn find_slots_query_window_limit() {
    let engine = test_engine("find_window_limit.wal");
    let result = engine
        .find_slots(
            Ulid::new(),
            Ulid::new(),
            Window::new(0, crate::limits::MAX_QUERY_WINDOW_MS + 1),
        )
        .await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}

#[tokio::test]
async fn list_appointments_in_booking_order() {
    let engine = test_engine("list_order.wal");
    let s = seed(&engine, 3).await;

    let cust = Ulid::new();
    let other = Ulid::new();
    let first = Ulid::new();
    let second = Ulid::new();
    engine.book(first, s.slot, cust, None, customer(cust)).await.unwrap();
    engine.book(second, s.slot, cust, None, customer(cust)).await.unwrap();
    engine
        .book(Ulid::new(), s.slot, other, None, customer(other))
        .await
        .unwrap();

    let mine = engine.list_appointments_for_customer(&cust).await;
    assert_eq!(mine.iter().map(|a| a.id).collect::<Vec<_>>(), vec![first, second]);
}

#[tokio::test]
async fn list_history_unknown_appointment_fails() {
    let engine = test_engine("history_unknown.wal");
    assert!(matches!(
        engine.list_history(&Ulid::new()),
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn slot_summary_unknown_fails() {
    let engine = test_engine("summary_unknown.wal");
    assert!(matches!(
        engine.slot_summary(&Ulid::new()).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Notices ──────────────────────────────────────────────

#[tokio::test]
async fn lifecycle_notices_reach_both_parties() {
    let engine = test_engine("notices_lifecycle.wal");
    let s = seed(&engine, 1).await;

    let cust = Ulid::new();
    let appt = Ulid::new();
    let mut rx = engine.notify.subscribe(cust);

    engine.book(appt, s.slot, cust, None, customer(cust)).await.unwrap();
    engine.confirm(appt, staff_actor()).await.unwrap();
    engine.cancel(appt, customer(cust)).await.unwrap();

    let kinds: Vec<NoticeKind> = engine.notify.mailbox(&cust).iter().map(|n| n.kind).collect();
    assert_eq!(
        kinds,
        vec![NoticeKind::Created, NoticeKind::Confirmed, NoticeKind::Canceled]
    );
    assert_eq!(engine.notify.mailbox(&s.staff).len(), 3);

    // Broadcast subscribers see the same stream.
    assert_eq!(rx.recv().await.unwrap().kind, NoticeKind::Created);
    assert_eq!(rx.recv().await.unwrap().kind, NoticeKind::Confirmed);
    assert_eq!(rx.recv().await.unwrap().kind, NoticeKind::Canceled);
}

// ── Vertical scenario ────────────────────────────────────

#[tokio::test]
async fn vertical_salon_day() {
    let engine = test_engine("vertical_salon.wal");
    let base = now_ms() + 24 * H;

    // Two chairs, two services.
    let cut = Ulid::new();
    let color = Ulid::new();
    engine.define_service(cut, "Cut".into(), H).await.unwrap();
    engine.define_service(color, "Color".into(), 2 * H).await.unwrap();

    let alex = Ulid::new();
    let bo = Ulid::new();
    let alex_shift = Ulid::new();
    let bo_shift = Ulid::new();
    engine
        .publish_shift(alex_shift, alex, Window::new(base, base + 8 * H))
        .await
        .unwrap();
    engine
        .publish_shift(bo_shift, bo, Window::new(base + 2 * H, base + 10 * H))
        .await
        .unwrap();

    // Alex: two cut slots and one group color slot (capacity 2).
    let alex_cut_9 = Ulid::new();
    let alex_cut_10 = Ulid::new();
    let alex_color = Ulid::new();
    engine
        .publish_slot(alex_cut_9, alex_shift, cut, Window::new(base, base + H), 1)
        .await
        .unwrap();
    engine
        .publish_slot(alex_cut_10, alex_shift, cut, Window::new(base + H, base + 2 * H), 1)
        .await
        .unwrap();
    engine
        .publish_slot(alex_color, alex_shift, color, Window::new(base + 2 * H, base + 4 * H), 2)
        .await
        .unwrap();

    // Bo: one cut slot.
    let bo_cut = Ulid::new();
    engine
        .publish_slot(bo_cut, bo_shift, cut, Window::new(base + 2 * H, base + 3 * H), 1)
        .await
        .unwrap();

    // Customers pick from the board.
    let dana = Ulid::new();
    let eli = Ulid::new();
    let fern = Ulid::new();

    let board = engine
        .find_slots(alex, cut, Window::new(base, base + 8 * H))
        .await
        .unwrap();
    assert_eq!(board.len(), 2);

    // Dana takes Alex at opening; Eli wants the same chair and is refused,
    // then settles for the next hour.
    let dana_appt = Ulid::new();
    engine.book(dana_appt, alex_cut_9, dana, None, customer(dana)).await.unwrap();
    assert!(matches!(
        engine.book(Ulid::new(), alex_cut_9, eli, None, customer(eli)).await,
        Err(EngineError::SlotFull(_))
    ));
    let eli_appt = Ulid::new();
    engine.book(eli_appt, alex_cut_10, eli, None, customer(eli)).await.unwrap();

    // The color slot seats two.
    engine
        .book(Ulid::new(), alex_color, dana, None, customer(dana))
        .await
        .unwrap();
    let fern_color = Ulid::new();
    engine
        .book(fern_color, alex_color, fern, Some("roots only".into()), customer(fern))
        .await
        .unwrap();
    assert_eq!(engine.capacity_remaining(&alex_color).await.unwrap(), 0);

    // Front desk confirms the morning.
    let desk = staff_actor();
    engine.confirm(dana_appt, desk).await.unwrap();
    engine.confirm(eli_appt, desk).await.unwrap();

    // Eli calls off; the chair opens up again.
    engine.cancel(eli_appt, customer(eli)).await.unwrap();
    assert_eq!(engine.capacity_remaining(&alex_cut_10).await.unwrap(), 1);

    // Fern never shows for color (judged after the window closed). Dana's
    // seat is still claimed, so exactly one unit comes back.
    engine
        .mark_missed_at(fern_color, desk, base + 4 * H + M)
        .await
        .unwrap();
    assert_eq!(engine.capacity_remaining(&alex_color).await.unwrap(), 1);

    // Paper trail for the day.
    assert_eq!(
        engine
            .list_history(&dana_appt)
            .unwrap()
            .iter()
            .map(|e| e.status)
            .collect::<Vec<_>>(),
        vec![Pending, Confirmed]
    );
    assert_eq!(
        engine
            .list_history(&eli_appt)
            .unwrap()
            .iter()
            .map(|e| e.status)
            .collect::<Vec<_>>(),
        vec![Pending, Confirmed, Canceled]
    );
    assert_eq!(
        engine
            .list_history(&fern_color)
            .unwrap()
            .iter()
            .map(|e| e.status)
            .collect::<Vec<_>>(),
        vec![Pending, Missed]
    );

    // Dana's view of the day: one cut, one color.
    assert_eq!(engine.list_appointments_for_customer(&dana).await.len(), 2);
}
