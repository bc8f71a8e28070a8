mod error;
mod mutations;
mod queries;
mod store;
#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use store::{Reservation, SharedSlot, SlotStore};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::catalog::{Catalog, ServiceSpec, Shift};
use crate::history::HistoryLog;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedAppointment = Arc<RwLock<AppointmentState>>;

// ── Group-commit ledger channel ──────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    #[cfg(test)]
    Shutdown,
}

/// Background task that owns the ledger and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                #[cfg(test)]
                let mut shutdown = false;

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        #[cfg(test)]
                        Ok(WalCommand::Shutdown) => {
                            shutdown = true;
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &mut batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(&mut batch, &result);

                #[cfg(test)]
                if shutdown {
                    return;
                }
            }
            #[cfg(test)]
            WalCommand::Shutdown => return,
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// The appointment engine for one store: sole writer of appointment status
/// and sole caller of slot occupancy mutations. Every accepted mutation is
/// appended to the ledger before it is applied in memory.
pub struct Engine {
    pub(crate) catalog: Catalog,
    pub(crate) slots: SlotStore,
    appointments: DashMap<Ulid, SharedAppointment>,
    /// Customer id → appointment ids, in booking order.
    by_customer: DashMap<Ulid, Vec<Ulid>>,
    pub(crate) history: HistoryLog,
    pub notify: Arc<NotifyHub>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            catalog: Catalog::new(),
            slots: SlotStore::new(),
            appointments: DashMap::new(),
            by_customer: DashMap::new(),
            history: HistoryLog::new(),
            notify,
            wal_tx,
        };

        // Replay events — we're the sole owner of the slot/appointment Arcs
        // here, so try_write always succeeds instantly (no contention).
        // Never use blocking_write because this may run inside an async
        // context (e.g. lazy store creation).
        for event in &events {
            engine.apply_replay(event);
        }

        Ok(engine)
    }

    fn apply_replay(&self, event: &Event) {
        match event {
            Event::ServiceDefined { id, name, duration } => {
                self.catalog.insert_service(ServiceSpec {
                    id: *id,
                    name: name.clone(),
                    duration: *duration,
                });
            }
            Event::ShiftPublished { id, staff_id, window } => {
                self.catalog.insert_shift(Shift {
                    id: *id,
                    staff_id: *staff_id,
                    window: *window,
                    active: true,
                });
            }
            Event::ShiftRevoked { id } => {
                self.catalog.revoke_shift(id);
                for slot_id in self.slots.shift_slot_ids(id) {
                    if let Some(slot) = self.slots.get(&slot_id) {
                        slot.try_write().expect("replay: uncontended write").active = false;
                    }
                }
            }
            Event::SlotPublished {
                id,
                shift_id,
                staff_id,
                service_id,
                window,
                capacity,
            } => {
                self.slots.insert(SlotState::new(
                    *id, *shift_id, *staff_id, *service_id, *window, *capacity,
                ));
            }
            Event::SlotRevoked { id } => {
                if let Some(slot) = self.slots.get(id) {
                    slot.try_write().expect("replay: uncontended write").active = false;
                }
            }
            Event::AppointmentBooked {
                id,
                slot_id,
                customer_id,
                staff_id,
                service_id,
                window,
                note,
                actor,
                at,
            } => {
                if let Some(slot) = self.slots.get(slot_id) {
                    slot.try_write().expect("replay: uncontended write").occupancy += 1;
                }
                self.insert_appointment(AppointmentState {
                    id: *id,
                    slot_id: *slot_id,
                    customer_id: *customer_id,
                    staff_id: *staff_id,
                    service_id: *service_id,
                    window: *window,
                    status: AppointmentStatus::Pending,
                    note: note.clone(),
                    created_at: *at,
                    updated_at: *at,
                    created_by: *actor,
                    updated_by: *actor,
                });
                self.history
                    .append(*id, AppointmentStatus::Pending, Some(*actor), *at);
            }
            Event::AppointmentConfirmed { id, actor, at } => {
                self.replay_transition(id, AppointmentStatus::Confirmed, *actor, *at, false);
            }
            Event::AppointmentCanceled { id, actor, at } => {
                self.replay_transition(id, AppointmentStatus::Canceled, *actor, *at, true);
            }
            Event::AppointmentMissed { id, actor, at } => {
                self.replay_transition(id, AppointmentStatus::Missed, *actor, *at, true);
            }
        }
    }

    fn replay_transition(
        &self,
        id: &Ulid,
        status: AppointmentStatus,
        actor: Ulid,
        at: Ms,
        releases_slot: bool,
    ) {
        let Some(appt) = self.appointments.get(id).map(|e| e.value().clone()) else {
            return;
        };
        let mut guard = appt.try_write().expect("replay: uncontended write");
        guard.status = status;
        guard.updated_at = at;
        guard.updated_by = actor;
        if releases_slot
            && let Some(slot) = self.slots.get(&guard.slot_id) {
                let mut slot_guard = slot.try_write().expect("replay: uncontended write");
                slot_guard.occupancy = slot_guard.occupancy.saturating_sub(1);
            }
        drop(guard);
        self.history.append(*id, status, Some(actor), at);
    }

    /// Write an event to the ledger via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("ledger writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("ledger writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    pub(super) fn insert_appointment(&self, appt: AppointmentState) {
        self.by_customer
            .entry(appt.customer_id)
            .or_default()
            .push(appt.id);
        self.appointments
            .insert(appt.id, Arc::new(RwLock::new(appt)));
    }

    pub(super) fn appointment(&self, id: &Ulid) -> Option<SharedAppointment> {
        self.appointments.get(id).map(|e| e.value().clone())
    }

    pub(super) fn contains_appointment(&self, id: &Ulid) -> bool {
        self.appointments.contains_key(id)
    }

    pub(super) fn appointments_of(&self, customer_id: &Ulid) -> Vec<Ulid> {
        self.by_customer
            .get(customer_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Load an appointment and take its write lock.
    pub(super) async fn appointment_write(
        &self,
        id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<AppointmentState>, EngineError> {
        let appt = self.appointment(id).ok_or(EngineError::NotFound(*id))?;
        Ok(appt.write_owned().await)
    }

    /// Shut down the ledger writer so subsequent appends fail; simulates
    /// storage becoming unavailable mid-flight.
    #[cfg(test)]
    pub(crate) async fn sever_ledger(&self) {
        let _ = self.wal_tx.send(WalCommand::Shutdown).await;
        // Wait for the writer task to exit and drop its receiver.
        while !self.wal_tx.is_closed() {
            tokio::task::yield_now().await;
        }
    }
}
