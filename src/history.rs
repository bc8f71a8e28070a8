use dashmap::DashMap;
use ulid::Ulid;

use crate::model::{AppointmentStatus, HistoryEntry, Ms};

/// Append-only transition log, one trail per appointment.
///
/// The in-memory trail is rebuilt from the event ledger at startup; the
/// ledger append that precedes every `append` here is the durable step, so
/// this structure itself never fails. No update or delete is exposed —
/// replaying a trail oldest-first reconstructs the appointment's status.
pub struct HistoryLog {
    entries: DashMap<Ulid, Vec<HistoryEntry>>,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryLog {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn append(&self, appointment_id: Ulid, status: AppointmentStatus, actor: Option<Ulid>, at: Ms) {
        self.entries
            .entry(appointment_id)
            .or_default()
            .push(HistoryEntry {
                appointment_id,
                status,
                actor,
                at,
            });
    }

    /// Full trail for one appointment, oldest first. Empty if unknown.
    pub fn list_for(&self, appointment_id: &Ulid) -> Vec<HistoryEntry> {
        self.entries
            .get(appointment_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn len_for(&self, appointment_id: &Ulid) -> usize {
        self.entries
            .get(appointment_id)
            .map(|e| e.value().len())
            .unwrap_or(0)
    }
}
