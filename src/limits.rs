//! Hard input bounds. Every externally supplied value is checked against
//! one of these before it reaches the ledger.

use crate::model::Ms;

/// Highest slot capacity a store may publish.
pub const MAX_SLOT_CAPACITY: u32 = 500;

/// Service and staff names (matches the catalog column width).
pub const MAX_NAME_LEN: usize = 150;

/// Customer note attached to a booking.
pub const MAX_NOTE_LEN: usize = 2000;

/// Longest shift a staff member can be scheduled for.
pub const MAX_SHIFT_DURATION_MS: Ms = 24 * 3_600_000;

/// Longest window a slot query may scan.
pub const MAX_QUERY_WINDOW_MS: Ms = 92 * 24 * 3_600_000;

pub const MAX_SERVICES_PER_STORE: usize = 10_000;
pub const MAX_SHIFTS_PER_STORE: usize = 100_000;
pub const MAX_SLOTS_PER_STORE: usize = 1_000_000;

/// Retained notices per recipient; oldest are dropped past this.
pub const MAX_MAILBOX_NOTICES: usize = 256;

pub const MAX_STORES: usize = 1024;
pub const MAX_STORE_NAME_LEN: usize = 256;

// Sanity range for incoming timestamps: 2000-01-01 .. 2100-01-01 in unix ms.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
