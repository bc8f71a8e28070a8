use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::{Ms, SlotState, Window};

use super::EngineError;

pub type SharedSlot = Arc<RwLock<SlotState>>;

/// A successful claim on one capacity unit, with the slot facts the
/// engine needs to build the appointment row.
#[derive(Debug, Clone, Copy)]
pub struct Reservation {
    pub slot_id: Ulid,
    pub staff_id: Ulid,
    pub service_id: Ulid,
    pub window: Window,
}

/// Holds slot capacity state and the only safe primitives for claiming and
/// releasing a capacity unit. Each slot has its own lock: the write scope
/// inside `try_reserve`/`release` is the atomicity boundary, and distinct
/// slots never block each other. No history or notification side effects
/// happen here.
pub struct SlotStore {
    slots: DashMap<Ulid, SharedSlot>,
    by_shift: DashMap<Ulid, Vec<Ulid>>,
}

impl Default for SlotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotStore {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            by_shift: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, id: &Ulid) -> bool {
        self.slots.contains_key(id)
    }

    pub fn get(&self, id: &Ulid) -> Option<SharedSlot> {
        self.slots.get(id).map(|e| e.value().clone())
    }

    pub fn ids(&self) -> Vec<Ulid> {
        self.slots.iter().map(|e| *e.key()).collect()
    }

    pub fn insert(&self, slot: SlotState) {
        self.by_shift.entry(slot.shift_id).or_default().push(slot.id);
        self.slots.insert(slot.id, Arc::new(RwLock::new(slot)));
    }

    /// Atomically claim one capacity unit. Exactly `capacity` concurrent
    /// calls can succeed on a slot; every later caller sees `SlotFull`.
    pub async fn try_reserve(&self, slot_id: &Ulid, now: Ms) -> Result<Reservation, EngineError> {
        let slot = self.get(slot_id).ok_or(EngineError::NotFound(*slot_id))?;
        let mut guard = slot.write().await;
        if !guard.active {
            return Err(EngineError::SlotInactive(*slot_id));
        }
        if guard.window.has_started(now) {
            return Err(EngineError::SlotExpired(*slot_id));
        }
        if guard.occupancy >= guard.capacity {
            return Err(EngineError::SlotFull(*slot_id));
        }
        guard.occupancy += 1;
        Ok(Reservation {
            slot_id: *slot_id,
            staff_id: guard.staff_id,
            service_id: guard.service_id,
            window: guard.window,
        })
    }

    /// Give back one capacity unit. Paired 1:1 with a prior successful
    /// `try_reserve`; an unpaired release is clamped at zero and logged,
    /// occupancy never goes negative.
    pub async fn release(&self, slot_id: &Ulid) -> Result<(), EngineError> {
        let slot = self.get(slot_id).ok_or(EngineError::NotFound(*slot_id))?;
        let mut guard = slot.write().await;
        if guard.occupancy == 0 {
            tracing::warn!("release on empty slot {slot_id}");
            return Ok(());
        }
        guard.occupancy -= 1;
        Ok(())
    }

    /// Read-only occupancy snapshot for display; eventually consistent
    /// with concurrent reservations, never an admission input.
    pub async fn capacity_remaining(&self, slot_id: &Ulid) -> Result<u32, EngineError> {
        let slot = self.get(slot_id).ok_or(EngineError::NotFound(*slot_id))?;
        let guard = slot.read().await;
        Ok(guard.remaining())
    }

    /// Deactivate one slot. Existing appointments are unaffected; no new
    /// reservations are accepted afterwards.
    pub async fn revoke(&self, slot_id: &Ulid) -> Result<(), EngineError> {
        let slot = self.get(slot_id).ok_or(EngineError::NotFound(*slot_id))?;
        let mut guard = slot.write().await;
        guard.active = false;
        Ok(())
    }

    /// Ids of the slots carved from one shift.
    pub fn shift_slot_ids(&self, shift_id: &Ulid) -> Vec<Ulid> {
        self.by_shift
            .get(shift_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Deactivate every slot carved from a revoked shift.
    pub async fn revoke_for_shift(&self, shift_id: &Ulid) {
        for id in self.shift_slot_ids(shift_id) {
            if let Some(slot) = self.get(&id) {
                slot.write().await.active = false;
            }
        }
    }
}
