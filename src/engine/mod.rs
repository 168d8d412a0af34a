mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{free_ranges, merge_overlapping, subtract_ranges};
pub use error::{EngineError, ErrorKind};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// block on the first append, drain whatever else is immediately queued,
/// write the whole batch with a single fsync, then ack every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Flush the batch before serving the non-append command.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break, // channel drained
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
            .record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even after an append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// One tenant's booking state: per-room locked states plus the flat
/// registries, durably backed by the WAL.
pub struct Engine {
    pub rooms: DashMap<Ulid, SharedRoomState>,
    pub categories: DashMap<Ulid, Category>,
    pub pets: DashMap<Ulid, Pet>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold this shared across check + append + apply; compaction
    /// holds it exclusively while it snapshots state and queues the Compact
    /// command. Every acked append is therefore either in the snapshot or
    /// ordered after the Compact in the writer channel.
    pub(super) compact_gate: RwLock<()>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: booking id → room id.
    pub(super) booking_to_room: DashMap<Ulid, Ulid>,
    /// Category → rooms index for the set-difference availability query.
    pub(super) rooms_in_category: DashMap<Ulid, Vec<Ulid>>,
}

/// Apply a room-scoped event to a RoomState (no locking — caller holds the
/// write lock). Room moves are handled at the Engine level, not here.
fn apply_to_room(rs: &mut RoomState, event: &Event, booking_index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BookingCreated { booking } => {
            booking_index.insert(booking.id, booking.room_id);
            rs.insert_booking(booking.clone());
        }
        Event::BookingUpdated { booking } => {
            rs.remove_booking(booking.id);
            booking_index.insert(booking.id, booking.room_id);
            rs.insert_booking(booking.clone());
        }
        Event::BookingDeleted { id, .. } => {
            rs.remove_booking(*id);
            booking_index.remove(id);
        }
        Event::RoomUpdated { category_id, number, area, description, .. } => {
            rs.room.category_id = *category_id;
            rs.room.number = number.clone();
            rs.room.area = *area;
            rs.room.description = description.clone();
        }
        Event::RoomVisibilityChanged { visible, .. } => {
            rs.room.visible = *visible;
        }
        // Registry and room create/delete events live at the map level.
        _ => {}
    }
}

/// Extract the owning room id from a room-scoped event.
fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingCreated { booking } | Event::BookingUpdated { booking } => {
            Some(booking.room_id)
        }
        Event::BookingDeleted { room_id, .. } => Some(*room_id),
        Event::RoomUpdated { id, .. } | Event::RoomVisibilityChanged { id, .. } => Some(*id),
        _ => None,
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            categories: DashMap::new(),
            pets: DashMap::new(),
            wal_tx,
            compact_gate: RwLock::new(()),
            notify,
            booking_to_room: DashMap::new(),
            rooms_in_category: DashMap::new(),
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds. Never blocking_write here: replay may run inside an async
        // context (lazy tenant creation).
        for event in &events {
            engine.replay_event(event);
        }

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::CategoryCreated { category } => {
                self.categories.insert(category.id, category.clone());
            }
            Event::CategoryUpdated { id, name, description } => {
                if let Some(mut cat) = self.categories.get_mut(id) {
                    cat.name = name.clone();
                    cat.description = description.clone();
                }
            }
            Event::CategoryDeleted { id } => {
                self.categories.remove(id);
                self.rooms_in_category.remove(id);
            }
            Event::PetRegistered { pet } => {
                self.pets.insert(pet.id, pet.clone());
            }
            Event::PetRemoved { id } => {
                self.pets.remove(id);
            }
            Event::RoomCreated { room } => {
                self.rooms_in_category.entry(room.category_id).or_default().push(room.id);
                self.rooms.insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
            }
            Event::RoomDeleted { id } => {
                if let Some((_, rs)) = self.rooms.remove(id) {
                    let guard = rs.try_read().expect("replay: uncontended read");
                    self.unindex_room(*id, guard.room.category_id);
                    for b in &guard.bookings {
                        self.booking_to_room.remove(&b.id);
                    }
                }
            }
            Event::RoomUpdated { id, category_id, .. } => {
                if let Some(entry) = self.rooms.get(id) {
                    let rs_arc = entry.value().clone();
                    drop(entry);
                    let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                    if guard.room.category_id != *category_id {
                        self.unindex_room(*id, guard.room.category_id);
                        self.rooms_in_category.entry(*category_id).or_default().push(*id);
                    }
                    apply_to_room(&mut guard, event, &self.booking_to_room);
                }
            }
            Event::BookingUpdated { booking } => {
                // A room move shows up as an index mismatch.
                let old_room = self.booking_to_room.get(&booking.id).map(|e| *e.value());
                if let Some(old_room) = old_room
                    && old_room != booking.room_id
                    && let Some(entry) = self.rooms.get(&old_room) {
                        let rs_arc = entry.value().clone();
                        drop(entry);
                        let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                        guard.remove_booking(booking.id);
                    }
                if let Some(entry) = self.rooms.get(&booking.room_id) {
                    let rs_arc = entry.value().clone();
                    drop(entry);
                    let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                    apply_to_room(&mut guard, event, &self.booking_to_room);
                }
            }
            other => {
                if let Some(room_id) = event_room_id(other)
                    && let Some(entry) = self.rooms.get(&room_id) {
                        let rs_arc = entry.value().clone();
                        drop(entry);
                        let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                        apply_to_room(&mut guard, other, &self.booking_to_room);
                    }
            }
        }
    }

    pub(super) fn unindex_room(&self, room_id: Ulid, category_id: Ulid) {
        if let Some(mut rooms) = self.rooms_in_category.get_mut(&category_id) {
            rooms.retain(|r| r != &room_id);
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room_state(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_room.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call, for single-room events. The
    /// caller holds the room's write lock, so the availability check it ran
    /// is still valid when the event lands.
    pub(super) async fn persist_and_apply(
        &self,
        room_id: Ulid,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.booking_to_room);
        self.notify.send(room_id, event);
        Ok(())
    }

    /// Lookup booking → room, get room state, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<RoomState>), EngineError> {
        let room_id = self
            .room_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.write_owned().await;
        Ok((room_id, guard))
    }
}
