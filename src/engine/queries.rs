use ulid::Ulid;

use crate::limits::MAX_QUERY_WINDOW_MS;
use crate::model::*;

use super::{Engine, EngineError};

fn summarize(slot: &SlotState) -> SlotSummary {
    SlotSummary {
        id: slot.id,
        staff_id: slot.staff_id,
        service_id: slot.service_id,
        window: slot.window,
        capacity: slot.capacity,
        remaining: slot.remaining(),
        active: slot.active,
    }
}

fn info_of(appt: &AppointmentState) -> AppointmentInfo {
    AppointmentInfo {
        id: appt.id,
        slot_id: appt.slot_id,
        customer_id: appt.customer_id,
        staff_id: appt.staff_id,
        service_id: appt.service_id,
        window: appt.window,
        status: appt.status,
        note: appt.note.clone(),
        created_at: appt.created_at,
        updated_at: appt.updated_at,
    }
}

impl Engine {
    /// Active slots for a (staff, service) pair whose window lies inside
    /// `range`, sorted by start. The `remaining` column is a display
    /// snapshot; admission is decided by `book` alone.
    pub async fn find_slots(
        &self,
        staff_id: Ulid,
        service_id: Ulid,
        range: Window,
    ) -> Result<Vec<SlotSummary>, EngineError> {
        if range.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }

        let mut out = Vec::new();
        for id in self.slots.ids() {
            if let Some(slot) = self.slots.get(&id) {
                let guard = slot.read().await;
                if guard.staff_id == staff_id
                    && guard.service_id == service_id
                    && guard.active
                    && range.contains(&guard.window)
                {
                    out.push(summarize(&guard));
                }
            }
        }
        out.sort_by_key(|s| s.window.start);
        Ok(out)
    }

    pub async fn slot_summary(&self, id: &Ulid) -> Result<SlotSummary, EngineError> {
        let slot = self.slots.get(id).ok_or(EngineError::NotFound(*id))?;
        let guard = slot.read().await;
        Ok(summarize(&guard))
    }

    /// Display-only snapshot of a slot's free units; admission is always
    /// decided inside `book`.
    pub async fn capacity_remaining(&self, slot_id: &Ulid) -> Result<u32, EngineError> {
        self.slots.capacity_remaining(slot_id).await
    }

    pub async fn get_appointment(&self, id: &Ulid) -> Result<AppointmentInfo, EngineError> {
        let appt = self.appointment(id).ok_or(EngineError::NotFound(*id))?;
        let guard = appt.read().await;
        Ok(info_of(&guard))
    }

    /// A customer's appointments in booking order.
    pub async fn list_appointments_for_customer(&self, customer_id: &Ulid) -> Vec<AppointmentInfo> {
        let mut out = Vec::new();
        for id in self.appointments_of(customer_id) {
            if let Some(appt) = self.appointment(&id) {
                let guard = appt.read().await;
                out.push(info_of(&guard));
            }
        }
        out
    }

    /// Full transition trail for an appointment, oldest first.
    pub fn list_history(&self, appointment_id: &Ulid) -> Result<Vec<HistoryEntry>, EngineError> {
        if !self.contains_appointment(appointment_id) {
            return Err(EngineError::NotFound(*appointment_id));
        }
        Ok(self.history.list_for(appointment_id))
    }
}
