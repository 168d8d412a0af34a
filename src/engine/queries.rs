//! Read-path operations. Queries take the room read lock, so they see a
//! consistent snapshot but never block each other.

use ulid::Ulid;

use crate::model::*;

use super::conflict::{
    blocking_in, check_room_available, crossing_in, future_stay_bookings, today, validate_range,
    validate_window,
};
use super::{availability, Engine, EngineError};

impl Engine {
    // ── Registries ────────────────────────────────────────

    pub fn get_category(&self, id: &Ulid) -> Result<Category, EngineError> {
        self.categories
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(*id))
    }

    pub fn list_categories(&self) -> Vec<Category> {
        let mut all: Vec<_> = self.categories.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|c| c.id);
        all
    }

    pub fn get_pet(&self, id: &Ulid) -> Result<Pet, EngineError> {
        self.pets
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(*id))
    }

    pub fn list_pets(&self) -> Vec<Pet> {
        let mut all: Vec<_> = self.pets.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|p| p.id);
        all
    }

    pub fn list_pets_for_owner(&self, owner_id: &Ulid) -> Result<Vec<Pet>, EngineError> {
        let mut found: Vec<_> = self
            .pets
            .iter()
            .filter(|e| e.value().owner_id.as_ref() == Some(owner_id))
            .map(|e| e.value().clone())
            .collect();
        if found.is_empty() {
            return Err(EngineError::NotFound(*owner_id));
        }
        found.sort_by_key(|p| p.id);
        Ok(found)
    }

    // ── Rooms ─────────────────────────────────────────────

    pub async fn get_room(&self, id: &Ulid) -> Result<Room, EngineError> {
        let rs = self.get_room_state(id).ok_or(EngineError::NotFound(*id))?;
        let guard = rs.read().await;
        Ok(guard.room.clone())
    }

    /// `visible`: `Some(true)` lists only visible rooms, `Some(false)` only
    /// hidden, `None` all.
    pub async fn list_rooms(&self, visible: Option<bool>) -> Vec<Room> {
        let states: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut all = Vec::with_capacity(states.len());
        for rs in states {
            let guard = rs.read().await;
            if visible.is_none_or(|v| guard.room.visible == v) {
                all.push(guard.room.clone());
            }
        }
        all.sort_by_key(|r| r.id);
        all
    }

    // ── Bookings ──────────────────────────────────────────

    pub async fn get_booking(&self, id: &Ulid) -> Result<Booking, EngineError> {
        let room_id = self.room_for_booking(id).ok_or(EngineError::NotFound(*id))?;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        guard
            .get_booking(*id)
            .cloned()
            .ok_or(EngineError::NotFound(*id))
    }

    pub async fn list_bookings_for_room(&self, room_id: &Ulid) -> Result<Vec<Booking>, EngineError> {
        let rs = self
            .get_room_state(room_id)
            .ok_or(EngineError::NotFound(*room_id))?;
        let guard = rs.read().await;
        Ok(guard.bookings.clone())
    }

    /// Bookings whose range touches the window, boundary days inclusive.
    pub async fn list_bookings_in_window(&self, window: &StayRange) -> Result<Vec<Booking>, EngineError> {
        validate_window(window)?;
        let states: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut found = Vec::new();
        for rs in states {
            let guard = rs.read().await;
            found.extend(
                guard
                    .near(window)
                    .filter(|b| b.range.touches_window(window))
                    .cloned(),
            );
        }
        found.sort_by_key(|b| (b.range.check_in, b.id));
        Ok(found)
    }

    pub async fn list_bookings_for_pet(&self, pet_id: &Ulid) -> Result<Vec<Booking>, EngineError> {
        if !self.pets.contains_key(pet_id) {
            return Err(EngineError::NotFound(*pet_id));
        }
        let states: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut found = Vec::new();
        for rs in states {
            let guard = rs.read().await;
            found.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| b.pet_ids.contains(pet_id))
                    .cloned(),
            );
        }
        found.sort_by_key(|b| (b.range.check_in, b.id));
        Ok(found)
    }

    pub async fn list_bookings_for_owner(&self, owner_id: &Ulid) -> Result<Vec<Booking>, EngineError> {
        let pets = self.list_pets_for_owner(owner_id)?;
        let pet_ids: Vec<Ulid> = pets.into_iter().map(|p| p.id).collect();
        let states: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut found = Vec::new();
        for rs in states {
            let guard = rs.read().await;
            found.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| b.pet_ids.iter().any(|p| pet_ids.contains(p)))
                    .cloned(),
            );
        }
        found.sort_by_key(|b| (b.range.check_in, b.id));
        Ok(found)
    }

    /// Non-cancelled stay bookings in the room with a checkout today or
    /// later. This is the same set the hide-room guard inspects.
    pub async fn list_future_bookings(&self, room_id: &Ulid) -> Result<Vec<Booking>, EngineError> {
        let rs = self
            .get_room_state(room_id)
            .ok_or(EngineError::NotFound(*room_id))?;
        let guard = rs.read().await;
        Ok(future_stay_bookings(&guard, today())
            .into_iter()
            .cloned()
            .collect())
    }

    // ── Availability Guard queries ────────────────────────

    /// `Ok` when the range is bookable, `RoomUnavailable` when a blocking
    /// booking exists. `exclude` makes this the for-update variant: the named
    /// booking's own range does not count against it.
    pub async fn check_available(
        &self,
        room_id: &Ulid,
        range: &StayRange,
        exclude: Option<Ulid>,
    ) -> Result<(), EngineError> {
        validate_range(range)?;
        let rs = self
            .get_room_state(room_id)
            .ok_or(EngineError::NotFound(*room_id))?;
        let guard = rs.read().await;
        check_room_available(&guard, range, exclude)
    }

    pub async fn list_blocking(
        &self,
        room_id: &Ulid,
        range: &StayRange,
    ) -> Result<Vec<Booking>, EngineError> {
        validate_range(range)?;
        let rs = self
            .get_room_state(room_id)
            .ok_or(EngineError::NotFound(*room_id))?;
        let guard = rs.read().await;
        Ok(blocking_in(&guard, range).into_iter().cloned().collect())
    }

    pub async fn list_crossing(
        &self,
        room_id: &Ulid,
        range: &StayRange,
    ) -> Result<Vec<Booking>, EngineError> {
        validate_range(range)?;
        let rs = self
            .get_room_state(room_id)
            .ok_or(EngineError::NotFound(*room_id))?;
        let guard = rs.read().await;
        Ok(crossing_in(&guard, range).into_iter().cloned().collect())
    }

    /// Visible rooms of the category with no blocking booking in the range.
    pub async fn list_available_rooms(
        &self,
        category_id: &Ulid,
        range: &StayRange,
    ) -> Result<Vec<Room>, EngineError> {
        validate_range(range)?;
        if !self.categories.contains_key(category_id) {
            return Err(EngineError::NotFound(*category_id));
        }
        let room_ids: Vec<Ulid> = self
            .rooms_in_category
            .get(category_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut free = Vec::new();
        for room_id in room_ids {
            let Some(rs) = self.get_room_state(&room_id) else {
                continue;
            };
            let guard = rs.read().await;
            if guard.room.visible && blocking_in(&guard, range).is_empty() {
                free.push(guard.room.clone());
            }
        }
        free.sort_by_key(|r| r.id);
        Ok(free)
    }

    /// Maximal free sub-ranges of the window for one room.
    pub async fn list_free_ranges(
        &self,
        room_id: &Ulid,
        window: &StayRange,
    ) -> Result<Vec<StayRange>, EngineError> {
        validate_window(window)?;
        let rs = self
            .get_room_state(room_id)
            .ok_or(EngineError::NotFound(*room_id))?;
        let guard = rs.read().await;
        Ok(availability::free_ranges(&guard, window))
    }

    #[cfg(test)]
    pub(crate) async fn booking_count(&self, room_id: &Ulid) -> usize {
        match self.get_room_state(room_id) {
            Some(rs) => rs.read().await.bookings.len(),
            None => 0,
        }
    }
}
