//! Write-path operations. Every booking mutation runs check-then-persist
//! under the owning room's write lock, so availability cannot be invalidated
//! between the check and the WAL ack.

use ulid::Ulid;

use crate::limits;
use crate::model::*;

use super::conflict::{check_room_available, future_stay_bookings, today, validate_range};
use super::{Engine, EngineError, WalCommand};

fn validate_text(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.is_empty() {
        return Err(EngineError::LimitExceeded(what));
    }
    if value.chars().count() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn validate_opt_text(
    value: &Option<String>,
    max: usize,
    what: &'static str,
) -> Result<(), EngineError> {
    if let Some(v) = value
        && v.chars().count() > max {
            return Err(EngineError::LimitExceeded(what));
        }
    Ok(())
}

fn validate_money(value: i64, what: &'static str) -> Result<(), EngineError> {
    if !(0..=limits::MAX_MONEY).contains(&value) {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

impl Engine {
    // ── Categories ────────────────────────────────────────

    pub async fn create_category(&self, category: Category) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        validate_text(&category.name, limits::MAX_NAME_LEN, "category name")?;
        validate_opt_text(&category.description, limits::MAX_DESCRIPTION_LEN, "category description")?;
        if self.categories.len() >= limits::MAX_CATEGORIES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many categories"));
        }
        if self.categories.contains_key(&category.id) {
            return Err(EngineError::AlreadyExists(category.id));
        }
        self.wal_append(&Event::CategoryCreated { category: category.clone() }).await?;
        self.categories.insert(category.id, category);
        Ok(())
    }

    pub async fn update_category(&self, id: Ulid, patch: CategoryPatch) -> Result<Category, EngineError> {
        let _gate = self.compact_gate.read().await;
        let current = self
            .categories
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(id))?;
        let name = patch.name.unwrap_or(current.name);
        let description = patch.description.or(current.description);
        validate_text(&name, limits::MAX_NAME_LEN, "category name")?;
        validate_opt_text(&description, limits::MAX_DESCRIPTION_LEN, "category description")?;
        self.wal_append(&Event::CategoryUpdated {
            id,
            name: name.clone(),
            description: description.clone(),
        })
        .await?;
        let updated = Category { id, name, description };
        self.categories.insert(id, updated.clone());
        Ok(updated)
    }

    /// Categories with rooms cannot be deleted.
    pub async fn delete_category(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        if !self.categories.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let occupied = self
            .rooms_in_category
            .get(&id)
            .map(|rooms| !rooms.is_empty())
            .unwrap_or(false);
        if occupied {
            return Err(EngineError::HasDependents(id));
        }
        self.wal_append(&Event::CategoryDeleted { id }).await?;
        self.categories.remove(&id);
        self.rooms_in_category.remove(&id);
        Ok(())
    }

    // ── Pets ──────────────────────────────────────────────

    pub async fn register_pet(&self, pet: Pet) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        validate_text(&pet.name, limits::MAX_NAME_LEN, "pet name")?;
        if self.pets.len() >= limits::MAX_PETS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many pets"));
        }
        if self.pets.contains_key(&pet.id) {
            return Err(EngineError::AlreadyExists(pet.id));
        }
        self.wal_append(&Event::PetRegistered { pet: pet.clone() }).await?;
        self.pets.insert(pet.id, pet);
        Ok(())
    }

    /// Pets referenced by any booking (cancelled included, they are still
    /// history) cannot be removed.
    pub async fn remove_pet(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        if !self.pets.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        for entry in self.rooms.iter() {
            let rs = entry.value().read().await;
            if rs.bookings.iter().any(|b| b.pet_ids.contains(&id)) {
                return Err(EngineError::HasDependents(id));
            }
        }
        self.wal_append(&Event::PetRemoved { id }).await?;
        self.pets.remove(&id);
        Ok(())
    }

    // ── Rooms ─────────────────────────────────────────────

    pub async fn create_room(&self, room: Room) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        validate_text(&room.number, limits::MAX_NAME_LEN, "room number")?;
        validate_opt_text(&room.description, limits::MAX_DESCRIPTION_LEN, "room description")?;
        if self.rooms.len() >= limits::MAX_ROOMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if !self.categories.contains_key(&room.category_id) {
            return Err(EngineError::NotFound(room.category_id));
        }
        if self.rooms.contains_key(&room.id) {
            return Err(EngineError::AlreadyExists(room.id));
        }
        self.wal_append(&Event::RoomCreated { room: room.clone() }).await?;
        self.rooms_in_category.entry(room.category_id).or_default().push(room.id);
        self.rooms.insert(
            room.id,
            std::sync::Arc::new(tokio::sync::RwLock::new(RoomState::new(room))),
        );
        Ok(())
    }

    pub async fn update_room(&self, id: Ulid, patch: RoomPatch) -> Result<Room, EngineError> {
        let _gate = self.compact_gate.read().await;
        let rs = self.get_room_state(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        let category_id = patch.category_id.unwrap_or(guard.room.category_id);
        let number = patch.number.clone().unwrap_or_else(|| guard.room.number.clone());
        let area = patch.area.or(guard.room.area);
        let description = patch.description.clone().or_else(|| guard.room.description.clone());
        validate_text(&number, limits::MAX_NAME_LEN, "room number")?;
        validate_opt_text(&description, limits::MAX_DESCRIPTION_LEN, "room description")?;
        if !self.categories.contains_key(&category_id) {
            return Err(EngineError::NotFound(category_id));
        }

        let old_category = guard.room.category_id;
        let event = Event::RoomUpdated { id, category_id, number, area, description };
        self.wal_append(&event).await?;
        if old_category != category_id {
            self.unindex_room(id, old_category);
            self.rooms_in_category.entry(category_id).or_default().push(id);
        }
        super::apply_to_room(&mut guard, &event, &self.booking_to_room);
        self.notify.send(id, &event);
        Ok(guard.room.clone())
    }

    /// Hiding fails while the room has future (or ongoing) non-cancelled stay
    /// bookings. Unhiding is unconditional.
    pub async fn set_room_visibility(&self, id: Ulid, visible: bool) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        let rs = self.get_room_state(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        if !visible && !future_stay_bookings(&guard, today()).is_empty() {
            return Err(EngineError::OpenBookings(id));
        }
        if guard.room.visible == visible {
            return Ok(());
        }
        let event = Event::RoomVisibilityChanged { id, visible };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Rooms with any booking history cannot be deleted.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        let rs = self.get_room_state(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.write().await;
        if !guard.bookings.is_empty() {
            return Err(EngineError::HasDependents(id));
        }
        let category_id = guard.room.category_id;
        self.wal_append(&Event::RoomDeleted { id }).await?;
        drop(guard);
        self.unindex_room(id, category_id);
        self.rooms.remove(&id);
        self.notify.drop_room(&id);
        Ok(())
    }

    // ── Bookings ──────────────────────────────────────────

    fn validate_booking_fields(&self, booking: &Booking) -> Result<(), EngineError> {
        if booking.kind == BookingKind::Closing && booking.stop_reason.is_none() {
            return Err(EngineError::ClosingWithoutReason);
        }
        if booking.pet_ids.is_empty() {
            return Err(EngineError::EmptyPets(booking.id));
        }
        if booking.pet_ids.len() > limits::MAX_PETS_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many pets on booking"));
        }
        validate_money(booking.price, "price")?;
        validate_money(booking.amount, "amount")?;
        validate_money(booking.prepayment, "prepayment")?;
        validate_opt_text(&booking.comment, limits::MAX_COMMENT_LEN, "comment")?;
        validate_opt_text(&booking.cancel_reason, limits::MAX_COMMENT_LEN, "cancel reason")?;
        validate_opt_text(&booking.file_url, limits::MAX_FILE_URL_LEN, "file url")?;
        for pet_id in &booking.pet_ids {
            if !self.pets.contains_key(pet_id) {
                return Err(EngineError::NotFound(*pet_id));
            }
        }
        Ok(())
    }

    pub async fn create_booking(&self, new: NewBooking) -> Result<Booking, EngineError> {
        let _gate = self.compact_gate.read().await;
        validate_range(&new.range)?;

        let status = BookingStatus::on_create(new.status, new.prepaid, new.kind);
        let booking = Booking {
            id: new.id,
            kind: new.kind,
            range: new.range,
            check_in_time: new.check_in_time,
            check_out_time: new.check_out_time,
            status,
            stop_reason: new.stop_reason,
            cancel_reason: new.cancel_reason,
            price: new.price,
            amount: new.amount,
            prepayment: new.prepayment,
            prepaid: new.prepaid,
            comment: new.comment,
            file_url: new.file_url,
            room_id: new.room_id,
            pet_ids: new.pet_ids,
        };
        self.validate_booking_fields(&booking)?;
        if booking.status == BookingStatus::Cancelled && booking.cancel_reason.is_none() {
            return Err(EngineError::CancelWithoutReason(booking.id));
        }
        if self.booking_to_room.contains_key(&booking.id) {
            return Err(EngineError::AlreadyExists(booking.id));
        }

        let rs = self
            .get_room_state(&booking.room_id)
            .ok_or(EngineError::NotFound(booking.room_id))?;
        let mut guard = rs.write().await;
        if !guard.room.visible {
            return Err(EngineError::HiddenRoom(booking.room_id));
        }
        if guard.bookings.len() >= limits::MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings in room"));
        }
        if !booking.is_cancelled() {
            check_room_available(&guard, &booking.range, None)?;
        }
        let event = Event::BookingCreated { booking: booking.clone() };
        self.persist_and_apply(booking.room_id, &mut guard, &event).await?;
        Ok(booking)
    }

    pub async fn update_booking(&self, id: Ulid, patch: BookingPatch) -> Result<Booking, EngineError> {
        let _gate = self.compact_gate.read().await;
        let current_room = self
            .room_for_booking(&id)
            .ok_or(EngineError::NotFound(id))?;
        let target_room = patch.room_id.unwrap_or(current_room);

        if target_room == current_room {
            let rs = self
                .get_room_state(&current_room)
                .ok_or(EngineError::NotFound(current_room))?;
            let mut guard = rs.write().await;
            let merged = self.merge_and_check(&guard, &guard, id, &patch)?;
            let event = Event::BookingUpdated { booking: merged.clone() };
            self.persist_and_apply(current_room, &mut guard, &event).await?;
            return Ok(merged);
        }

        // Room move: take both write locks in id order so concurrent moves
        // cannot deadlock.
        let src = self
            .get_room_state(&current_room)
            .ok_or(EngineError::NotFound(current_room))?;
        let dst = self
            .get_room_state(&target_room)
            .ok_or(EngineError::NotFound(target_room))?;
        let (mut src_guard, mut dst_guard) = if current_room < target_room {
            let s = src.write().await;
            let d = dst.write().await;
            (s, d)
        } else {
            let d = dst.write().await;
            let s = src.write().await;
            (s, d)
        };

        if !dst_guard.room.visible {
            return Err(EngineError::HiddenRoom(target_room));
        }
        if dst_guard.bookings.len() >= limits::MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings in room"));
        }
        let merged = self.merge_and_check(&src_guard, &dst_guard, id, &patch)?;

        let event = Event::BookingUpdated { booking: merged.clone() };
        self.wal_append(&event).await?;
        src_guard.remove_booking(id);
        dst_guard.insert_booking(merged.clone());
        self.booking_to_room.insert(id, target_room);
        self.notify.send(current_room, &event);
        self.notify.send(target_room, &event);
        Ok(merged)
    }

    /// Merge the patch into the stored booking and run every update guard.
    /// `src` holds the booking today; `dst` is where it will live (same state
    /// for in-place updates). The availability check excludes the booking
    /// itself so a no-op update never self-conflicts.
    fn merge_and_check(
        &self,
        src: &RoomState,
        dst: &RoomState,
        id: Ulid,
        patch: &BookingPatch,
    ) -> Result<Booking, EngineError> {
        let current = src.get_booking(id).ok_or(EngineError::NotFound(id))?;
        if let Some(kind) = patch.kind
            && kind != current.kind {
                return Err(EngineError::KindChange(id));
            }
        if current.is_cancelled()
            && patch.status.is_some_and(|s| s != BookingStatus::Cancelled)
        {
            return Err(EngineError::CancelledIsTerminal(id));
        }

        let mut merged = current.merged(patch);
        merged.room_id = dst.room.id;
        validate_range(&merged.range)?;
        self.validate_booking_fields(&merged)?;

        if merged.status == BookingStatus::Cancelled
            && !current.is_cancelled()
            && merged.cancel_reason.is_none()
        {
            return Err(EngineError::CancelWithoutReason(id));
        }
        // Prepayment confirms an otherwise tentative booking.
        if merged.status == BookingStatus::Initial && merged.prepaid {
            merged.status = BookingStatus::Confirmed;
        }

        if !merged.is_cancelled() {
            check_room_available(dst, &merged.range, Some(id))?;
        }
        Ok(merged)
    }

    pub async fn delete_booking(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        let (room_id, mut guard) = self.resolve_booking_write(&id).await?;
        if guard.get_booking(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::BookingDeleted { id, room_id };
        self.persist_and_apply(room_id, &mut guard, &event).await
    }

    // ── WAL compaction ────────────────────────────────────

    /// Rewrite the WAL as a minimal snapshot of live state. Registry events
    /// go first so replay never sees a dangling reference.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Exclusive gate: no append can be queued between reading the state
        // and the Compact command entering the writer channel, so the
        // snapshot misses nothing and later appends land in the new file.
        let gate = self.compact_gate.write().await;
        let mut events = Vec::new();
        for entry in self.categories.iter() {
            events.push(Event::CategoryCreated { category: entry.value().clone() });
        }
        for entry in self.pets.iter() {
            events.push(Event::PetRegistered { pet: entry.value().clone() });
        }
        let room_states: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        for rs in room_states {
            let guard = rs.read().await;
            events.push(Event::RoomCreated { room: guard.room.clone() });
            for booking in &guard.bookings {
                events.push(Event::BookingCreated { booking: booking.clone() });
            }
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        drop(gate);
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = tokio::sync::oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
