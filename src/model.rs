use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as Ms
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Ms,
    pub end: Ms,
}

impl Window {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Window start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains(&self, other: &Window) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn has_started(&self, now: Ms) -> bool {
        self.start <= now
    }

    pub fn has_ended(&self, now: Ms) -> bool {
        self.end <= now
    }
}

/// Who is acting. Roles are resolved by the identity collaborator upstream;
/// the engine only ever authorizes against the role value it is handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Customer,
    Staff,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Staff => "staff",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "customer" => Some(Role::Customer),
            "staff" => Some(Role::Staff),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Staff and admins share the store-side privileges.
    pub fn is_store_side(self) -> bool {
        matches!(self, Role::Staff | Role::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Ulid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Ulid, role: Role) -> Self {
        Self { id, role }
    }
}

/// Appointment lifecycle. `Pending` is the only entry state; `Canceled`
/// and `Missed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Canceled,
    Missed,
}

impl AppointmentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AppointmentStatus::Canceled | AppointmentStatus::Missed)
    }

    /// The full transition matrix. Exhaustive on purpose: a new status
    /// cannot be added without this match forcing a decision.
    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        match (self, next) {
            (Pending, Confirmed) => true,
            (Pending, Canceled) | (Confirmed, Canceled) => true,
            (Pending, Missed) | (Confirmed, Missed) => true,
            (Pending, Pending) | (Confirmed, Confirmed) | (Confirmed, Pending) => false,
            (Canceled, _) | (Missed, _) => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Canceled => "canceled",
            AppointmentStatus::Missed => "missed",
        }
    }

    pub fn parse(s: &str) -> Option<AppointmentStatus> {
        match s {
            "pending" => Some(AppointmentStatus::Pending),
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "canceled" => Some(AppointmentStatus::Canceled),
            "missed" => Some(AppointmentStatus::Missed),
            _ => None,
        }
    }
}

/// One bookable interval for a (staff, service) pair, carved from a shift.
/// Occupancy only ever moves through `SlotStore::try_reserve`/`release`.
#[derive(Debug, Clone)]
pub struct SlotState {
    pub id: Ulid,
    pub shift_id: Ulid,
    pub staff_id: Ulid,
    pub service_id: Ulid,
    pub window: Window,
    pub capacity: u32,
    pub occupancy: u32,
    pub active: bool,
}

impl SlotState {
    pub fn new(
        id: Ulid,
        shift_id: Ulid,
        staff_id: Ulid,
        service_id: Ulid,
        window: Window,
        capacity: u32,
    ) -> Self {
        Self {
            id,
            shift_id,
            staff_id,
            service_id,
            window,
            capacity,
            occupancy: 0,
            active: true,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.capacity - self.occupancy
    }
}

/// One customer's claim on one unit of a slot's capacity. Slot, staff,
/// service and customer references are fixed at creation; only status and
/// the audit columns change afterwards.
#[derive(Debug, Clone)]
pub struct AppointmentState {
    pub id: Ulid,
    pub slot_id: Ulid,
    pub customer_id: Ulid,
    pub staff_id: Ulid,
    pub service_id: Ulid,
    /// Copy of the slot window at booking time, so listings and the
    /// mark-missed guard never depend on a slot lookup.
    pub window: Window,
    pub status: AppointmentStatus,
    pub note: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
    pub created_by: Ulid,
    pub updated_by: Ulid,
}

/// Immutable audit record; one per accepted transition, creation included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub appointment_id: Ulid,
    pub status: AppointmentStatus,
    /// Nullable shape: the actor may since have been removed upstream.
    pub actor: Option<Ulid>,
    pub at: Ms,
}

/// The ledger record format — flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ServiceDefined {
        id: Ulid,
        name: String,
        duration: Ms,
    },
    ShiftPublished {
        id: Ulid,
        staff_id: Ulid,
        window: Window,
    },
    ShiftRevoked {
        id: Ulid,
    },
    SlotPublished {
        id: Ulid,
        shift_id: Ulid,
        staff_id: Ulid,
        service_id: Ulid,
        window: Window,
        capacity: u32,
    },
    SlotRevoked {
        id: Ulid,
    },
    AppointmentBooked {
        id: Ulid,
        slot_id: Ulid,
        customer_id: Ulid,
        staff_id: Ulid,
        service_id: Ulid,
        window: Window,
        note: Option<String>,
        actor: Ulid,
        at: Ms,
    },
    AppointmentConfirmed {
        id: Ulid,
        actor: Ulid,
        at: Ms,
    },
    AppointmentCanceled {
        id: Ulid,
        actor: Ulid,
        at: Ms,
    },
    AppointmentMissed {
        id: Ulid,
        actor: Ulid,
        at: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

/// What `find_slots` hands to the caller: enough to render a picker.
/// `remaining` is a display snapshot, never an admission input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSummary {
    pub id: Ulid,
    pub staff_id: Ulid,
    pub service_id: Ulid,
    pub window: Window,
    pub capacity: u32,
    pub remaining: u32,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentInfo {
    pub id: Ulid,
    pub slot_id: Ulid,
    pub customer_id: Ulid,
    pub staff_id: Ulid,
    pub service_id: Ulid,
    pub window: Window,
    pub status: AppointmentStatus,
    pub note: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}
