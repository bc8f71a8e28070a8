use ulid::Ulid;

use crate::catalog::{ServiceSpec, Shift};
use crate::limits::*;
use crate::model::*;
use crate::notify::{Notice, NoticeKind};

use super::{Engine, EngineError};

pub(super) fn validate_window(window: &Window) -> Result<(), EngineError> {
    if window.start >= window.end {
        return Err(EngineError::LimitExceeded("window start must precede end"));
    }
    if window.start < MIN_VALID_TIMESTAMP_MS || window.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

fn check_transition(from: AppointmentStatus, to: AppointmentStatus) -> Result<(), EngineError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition { from, to })
    }
}

fn lifecycle_notice(
    kind: NoticeKind,
    appointment_id: Ulid,
    customer_id: Ulid,
    staff_id: Ulid,
    at: Ms,
) -> Notice {
    let message = match kind {
        NoticeKind::Created => format!("appointment {appointment_id} booked"),
        NoticeKind::Confirmed => format!("appointment {appointment_id} confirmed"),
        NoticeKind::Canceled => format!("appointment {appointment_id} canceled"),
        NoticeKind::Missed => format!("appointment {appointment_id} marked as missed"),
    };
    Notice {
        kind,
        appointment_id,
        customer_id,
        staff_id,
        message,
        occurred_at: at,
    }
}

impl Engine {
    // ── Catalog boundary (driven by the schedule publisher) ──

    pub async fn define_service(
        &self,
        id: Ulid,
        name: String,
        duration: Ms,
    ) -> Result<(), EngineError> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("service name length"));
        }
        if duration <= 0 {
            return Err(EngineError::LimitExceeded("service duration must be positive"));
        }
        if self.catalog.service_count() >= MAX_SERVICES_PER_STORE {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        if self.catalog.contains_service(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ServiceDefined {
            id,
            name: name.clone(),
            duration,
        };
        self.wal_append(&event).await?;
        self.catalog.insert_service(ServiceSpec { id, name, duration });
        Ok(())
    }

    pub async fn publish_shift(
        &self,
        id: Ulid,
        staff_id: Ulid,
        window: Window,
    ) -> Result<(), EngineError> {
        validate_window(&window)?;
        if window.duration_ms() > MAX_SHIFT_DURATION_MS {
            return Err(EngineError::LimitExceeded("shift too long"));
        }
        if self.catalog.shift_count() >= MAX_SHIFTS_PER_STORE {
            return Err(EngineError::LimitExceeded("too many shifts"));
        }
        if self.catalog.contains_shift(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ShiftPublished { id, staff_id, window };
        self.wal_append(&event).await?;
        self.catalog.insert_shift(Shift {
            id,
            staff_id,
            window,
            active: true,
        });
        Ok(())
    }

    /// Revoking a shift deactivates the slots carved from it. Appointments
    /// already booked on those slots are unaffected.
    pub async fn revoke_shift(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.catalog.contains_shift(&id) {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::ShiftRevoked { id };
        self.wal_append(&event).await?;
        self.catalog.revoke_shift(&id);
        self.slots.revoke_for_shift(&id).await;
        Ok(())
    }

    pub async fn publish_slot(
        &self,
        id: Ulid,
        shift_id: Ulid,
        service_id: Ulid,
        window: Window,
        capacity: u32,
    ) -> Result<(), EngineError> {
        validate_window(&window)?;
        if capacity == 0 || capacity > MAX_SLOT_CAPACITY {
            return Err(EngineError::LimitExceeded("slot capacity out of range"));
        }
        if self.slots.len() >= MAX_SLOTS_PER_STORE {
            return Err(EngineError::LimitExceeded("too many slots"));
        }
        if self.slots.contains(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let service = self
            .catalog
            .service(&service_id)
            .ok_or(EngineError::NotFound(service_id))?;
        if window.duration_ms() != service.duration {
            return Err(EngineError::DurationMismatch {
                expected: service.duration,
                got: window.duration_ms(),
            });
        }
        let shift = self
            .catalog
            .shift(&shift_id)
            .ok_or(EngineError::NotFound(shift_id))?;
        if !self.catalog.shift_covers(&shift_id, &window) {
            return Err(EngineError::NoCoveringShift { window });
        }

        let event = Event::SlotPublished {
            id,
            shift_id,
            staff_id: shift.staff_id,
            service_id,
            window,
            capacity,
        };
        self.wal_append(&event).await?;
        self.slots.insert(SlotState::new(
            id,
            shift_id,
            shift.staff_id,
            service_id,
            window,
            capacity,
        ));
        Ok(())
    }

    pub async fn revoke_slot(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.slots.contains(&id) {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::SlotRevoked { id };
        self.wal_append(&event).await?;
        self.slots.revoke(&id).await
    }

    // ── Appointment lifecycle ────────────────────────────────

    /// Book one capacity unit of a slot for a customer. Customers book
    /// only for themselves; staff and admins may book on a customer's
    /// behalf. Not idempotent: every successful call claims a fresh unit.
    pub async fn book(
        &self,
        id: Ulid,
        slot_id: Ulid,
        customer_id: Ulid,
        note: Option<String>,
        actor: Actor,
    ) -> Result<(), EngineError> {
        self.book_at(id, slot_id, customer_id, note, actor, now_ms())
            .await
    }

    pub(crate) async fn book_at(
        &self,
        id: Ulid,
        slot_id: Ulid,
        customer_id: Ulid,
        note: Option<String>,
        actor: Actor,
        now: Ms,
    ) -> Result<(), EngineError> {
        if let Some(ref n) = note
            && n.len() > MAX_NOTE_LEN {
                return Err(EngineError::LimitExceeded("note too long"));
            }
        if actor.role == Role::Customer && actor.id != customer_id {
            return Err(EngineError::Unauthorized(
                "customers may only book for themselves",
            ));
        }
        if self.contains_appointment(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        // Admission happens here: the claim is atomic per slot, and losers
        // of a race for the last unit get SlotFull immediately.
        let reservation = match self.slots.try_reserve(&slot_id, now).await {
            Ok(r) => {
                metrics::counter!(crate::observability::RESERVATIONS_TOTAL).increment(1);
                r
            }
            Err(e) => {
                if matches!(e, EngineError::SlotFull(_)) {
                    metrics::counter!(crate::observability::RESERVATIONS_REJECTED_TOTAL)
                        .increment(1);
                }
                return Err(e);
            }
        };

        let event = Event::AppointmentBooked {
            id,
            slot_id,
            customer_id,
            staff_id: reservation.staff_id,
            service_id: reservation.service_id,
            window: reservation.window,
            note: note.clone(),
            actor: actor.id,
            at: now,
        };
        if let Err(e) = self.wal_append(&event).await {
            // Compensating action: a claim must not outlive a failed append.
            if let Err(release_err) = self.slots.release(&slot_id).await {
                tracing::warn!("book {id}: release after ledger failure failed: {release_err}");
            }
            return Err(e);
        }

        self.insert_appointment(AppointmentState {
            id,
            slot_id,
            customer_id,
            staff_id: reservation.staff_id,
            service_id: reservation.service_id,
            window: reservation.window,
            status: AppointmentStatus::Pending,
            note,
            created_at: now,
            updated_at: now,
            created_by: actor.id,
            updated_by: actor.id,
        });
        self.history
            .append(id, AppointmentStatus::Pending, Some(actor.id), now);
        self.notify.send(&lifecycle_notice(
            NoticeKind::Created,
            id,
            customer_id,
            reservation.staff_id,
            now,
        ));
        Ok(())
    }

    /// Staff acknowledgement of a pending appointment. No slot effect.
    pub async fn confirm(&self, id: Ulid, actor: Actor) -> Result<(), EngineError> {
        if !actor.role.is_store_side() {
            return Err(EngineError::Unauthorized("only staff may confirm"));
        }
        let mut guard = self.appointment_write(&id).await?;
        check_transition(guard.status, AppointmentStatus::Confirmed)?;

        let now = now_ms();
        let event = Event::AppointmentConfirmed {
            id,
            actor: actor.id,
            at: now,
        };
        self.wal_append(&event).await?;

        guard.status = AppointmentStatus::Confirmed;
        guard.updated_at = now;
        guard.updated_by = actor.id;
        let (customer_id, staff_id) = (guard.customer_id, guard.staff_id);
        drop(guard);

        self.history
            .append(id, AppointmentStatus::Confirmed, Some(actor.id), now);
        self.notify.send(&lifecycle_notice(
            NoticeKind::Confirmed,
            id,
            customer_id,
            staff_id,
            now,
        ));
        Ok(())
    }

    /// Cancel a non-terminal appointment and hand its capacity unit back.
    pub async fn cancel(&self, id: Ulid, actor: Actor) -> Result<(), EngineError> {
        let mut guard = self.appointment_write(&id).await?;
        if actor.role == Role::Customer && actor.id != guard.customer_id {
            return Err(EngineError::Unauthorized(
                "customers may only cancel their own appointments",
            ));
        }
        check_transition(guard.status, AppointmentStatus::Canceled)?;

        let now = now_ms();
        let event = Event::AppointmentCanceled {
            id,
            actor: actor.id,
            at: now,
        };
        self.wal_append(&event).await?;

        guard.status = AppointmentStatus::Canceled;
        guard.updated_at = now;
        guard.updated_by = actor.id;
        let (customer_id, staff_id, slot_id) = (guard.customer_id, guard.staff_id, guard.slot_id);
        drop(guard);

        self.history
            .append(id, AppointmentStatus::Canceled, Some(actor.id), now);
        // Slot bookkeeping never blocks the committed status change.
        if let Err(e) = self.slots.release(&slot_id).await {
            tracing::warn!("cancel {id}: slot release failed: {e}");
        }
        self.notify.send(&lifecycle_notice(
            NoticeKind::Canceled,
            id,
            customer_id,
            staff_id,
            now,
        ));
        Ok(())
    }

    /// Record a no-show. Only allowed once the slot window has ended.
    pub async fn mark_missed(&self, id: Ulid, actor: Actor) -> Result<(), EngineError> {
        self.mark_missed_at(id, actor, now_ms()).await
    }

    pub(crate) async fn mark_missed_at(
        &self,
        id: Ulid,
        actor: Actor,
        now: Ms,
    ) -> Result<(), EngineError> {
        if !actor.role.is_store_side() {
            return Err(EngineError::Unauthorized("only staff may mark missed"));
        }
        let mut guard = self.appointment_write(&id).await?;
        check_transition(guard.status, AppointmentStatus::Missed)?;
        if !guard.window.has_ended(now) {
            return Err(EngineError::WindowNotElapsed {
                ends_at: guard.window.end,
            });
        }

        let event = Event::AppointmentMissed {
            id,
            actor: actor.id,
            at: now,
        };
        self.wal_append(&event).await?;

        guard.status = AppointmentStatus::Missed;
        guard.updated_at = now;
        guard.updated_by = actor.id;
        let (customer_id, staff_id, slot_id) = (guard.customer_id, guard.staff_id, guard.slot_id);
        drop(guard);

        self.history
            .append(id, AppointmentStatus::Missed, Some(actor.id), now);
        if let Err(e) = self.slots.release(&slot_id).await {
            tracing::warn!("mark_missed {id}: slot release failed: {e}");
        }
        self.notify.send(&lifecycle_notice(
            NoticeKind::Missed,
            id,
            customer_id,
            staff_id,
            now,
        ));
        Ok(())
    }
}
