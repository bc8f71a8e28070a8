use dashmap::DashMap;
use ulid::Ulid;

use crate::model::{Ms, Window};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub id: Ulid,
    pub name: String,
    pub duration: Ms,
}

/// A staff member's published working window. Slots are carved from these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shift {
    pub id: Ulid,
    pub staff_id: Ulid,
    pub window: Window,
    pub active: bool,
}

/// Schedule catalog: which services exist (and how long they take), and
/// when each staff member works. Read-only from the engine's perspective
/// except through the publish/revoke boundary operations, which is why the
/// maps live here rather than inside the engine state.
pub struct Catalog {
    services: DashMap<Ulid, ServiceSpec>,
    shifts: DashMap<Ulid, Shift>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
            shifts: DashMap::new(),
        }
    }

    // ── Services ─────────────────────────────────────────────

    pub fn insert_service(&self, spec: ServiceSpec) {
        self.services.insert(spec.id, spec);
    }

    pub fn service(&self, id: &Ulid) -> Option<ServiceSpec> {
        self.services.get(id).map(|e| e.value().clone())
    }

    pub fn contains_service(&self, id: &Ulid) -> bool {
        self.services.contains_key(id)
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    // ── Shifts ───────────────────────────────────────────────

    pub fn insert_shift(&self, shift: Shift) {
        self.shifts.insert(shift.id, shift);
    }

    pub fn shift(&self, id: &Ulid) -> Option<Shift> {
        self.shifts.get(id).map(|e| e.value().clone())
    }

    pub fn contains_shift(&self, id: &Ulid) -> bool {
        self.shifts.contains_key(id)
    }

    pub fn shift_count(&self) -> usize {
        self.shifts.len()
    }

    /// Mark a shift revoked. Returns the shift so the caller can cascade
    /// to the slots carved from it.
    pub fn revoke_shift(&self, id: &Ulid) -> Option<Shift> {
        self.shifts.get_mut(id).map(|mut e| {
            e.active = false;
            e.value().clone()
        })
    }

    /// True if `shift_id` is an active shift whose window fully contains
    /// `window`. The slot-publication validity check; the slot's staff is
    /// always the shift's staff.
    pub fn shift_covers(&self, shift_id: &Ulid, window: &Window) -> bool {
        self.shifts
            .get(shift_id)
            .is_some_and(|s| s.active && s.window.contains(window))
    }
}
