use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Closed pair of calendar dates `[check_in, check_out]`. A booking occupies
/// the nights `[check_in, check_out)`; `check_in == check_out` is a legal
/// zero-night booking (day visit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StayRange {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl StayRange {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        debug_assert!(check_in <= check_out, "check_in must not be after check_out");
        Self { check_in, check_out }
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub fn is_zero_night(&self) -> bool {
        self.check_in == self.check_out
    }

    /// Blocking predicate: would two bookings with these ranges collide?
    ///
    /// Normal ranges conflict on half-open intersection, so a checkout on day
    /// N and a check-in on day N coexist (same-day turnover). A zero-night
    /// range conflicts whenever its day lies inside the other range, boundary
    /// days included.
    pub fn blocks(&self, other: &StayRange) -> bool {
        match (self.is_zero_night(), other.is_zero_night()) {
            (false, false) => {
                self.check_in < other.check_out && other.check_in < self.check_out
            }
            (true, false) => {
                other.check_in <= self.check_in && self.check_in <= other.check_out
            }
            (false, true) => {
                self.check_in <= other.check_in && other.check_in <= self.check_out
            }
            (true, true) => self.check_in == other.check_in,
        }
    }

    /// Crossing predicate: blocks, or touches end-to-end. Strictly looser
    /// than `blocks` — used for informational listings only, never to reject
    /// a write.
    pub fn crosses(&self, other: &StayRange) -> bool {
        self.blocks(other)
            || self.check_in == other.check_out
            || self.check_out == other.check_in
    }

    /// Inclusive-touch window test for calendar views: shares at least one
    /// calendar day with `window`. Not a conflict predicate.
    pub fn touches_window(&self, window: &StayRange) -> bool {
        self.check_in <= window.check_out && self.check_out >= window.check_in
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingKind {
    /// A guest stay.
    Stay,
    /// Blocks the room for maintenance or another non-guest reason.
    Closing,
}

impl BookingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingKind::Stay => "stay",
            BookingKind::Closing => "closing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stay" => Some(BookingKind::Stay),
            "closing" => Some(BookingKind::Closing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Initial,
    Confirmed,
    /// Terminal — a cancelled booking is inert for conflicts and cannot be
    /// moved to another status.
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Initial => "initial",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initial" => Some(BookingStatus::Initial),
            "confirmed" => Some(BookingStatus::Confirmed),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    /// Status assigned at creation when the caller supplies none.
    pub fn on_create(explicit: Option<BookingStatus>, prepaid: bool, kind: BookingKind) -> BookingStatus {
        if let Some(status) = explicit {
            return status;
        }
        if prepaid || kind == BookingKind::Closing {
            BookingStatus::Confirmed
        } else {
            BookingStatus::Initial
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    Cleaning,
    Repair,
    Other,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Cleaning => "cleaning",
            StopReason::Repair => "repair",
            StopReason::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cleaning" => Some(StopReason::Cleaning),
            "repair" => Some(StopReason::Repair),
            "other" => Some(StopReason::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PetSpecies {
    Dog,
    Cat,
    Exotic,
}

impl PetSpecies {
    pub fn as_str(&self) -> &'static str {
        match self {
            PetSpecies::Dog => "dog",
            PetSpecies::Cat => "cat",
            PetSpecies::Exotic => "exotic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dog" => Some(PetSpecies::Dog),
            "cat" => Some(PetSpecies::Cat),
            "exotic" => Some(PetSpecies::Exotic),
            _ => None,
        }
    }
}

/// The central entity. Clock times are metadata only and never enter the
/// interval logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub kind: BookingKind,
    pub range: StayRange,
    pub check_in_time: Option<NaiveTime>,
    pub check_out_time: Option<NaiveTime>,
    pub status: BookingStatus,
    pub stop_reason: Option<StopReason>,
    pub cancel_reason: Option<String>,
    pub price: i64,
    pub amount: i64,
    pub prepayment: i64,
    pub prepaid: bool,
    pub comment: Option<String>,
    pub file_url: Option<String>,
    pub room_id: Ulid,
    pub pet_ids: Vec<Ulid>,
}

impl Booking {
    pub fn is_cancelled(&self) -> bool {
        self.status == BookingStatus::Cancelled
    }

    /// Field-by-field merge: a `Some` in the patch replaces the field, `None`
    /// keeps the current value. Pet set and room id are whole-value
    /// replacements. Kind is intentionally not mergeable and the id never
    /// changes. Pure — validation and status recomputation happen in the
    /// engine, after the merge.
    pub fn merged(&self, patch: &BookingPatch) -> Booking {
        Booking {
            id: self.id,
            kind: self.kind,
            range: StayRange {
                check_in: patch.check_in.unwrap_or(self.range.check_in),
                check_out: patch.check_out.unwrap_or(self.range.check_out),
            },
            check_in_time: patch.check_in_time.or(self.check_in_time),
            check_out_time: patch.check_out_time.or(self.check_out_time),
            status: patch.status.unwrap_or(self.status),
            stop_reason: patch.stop_reason.or(self.stop_reason),
            cancel_reason: patch.cancel_reason.clone().or_else(|| self.cancel_reason.clone()),
            price: patch.price.unwrap_or(self.price),
            amount: patch.amount.unwrap_or(self.amount),
            prepayment: patch.prepayment.unwrap_or(self.prepayment),
            prepaid: patch.prepaid.unwrap_or(self.prepaid),
            comment: patch.comment.clone().or_else(|| self.comment.clone()),
            file_url: patch.file_url.clone().or_else(|| self.file_url.clone()),
            room_id: patch.room_id.unwrap_or(self.room_id),
            pet_ids: patch.pet_ids.clone().unwrap_or_else(|| self.pet_ids.clone()),
        }
    }
}

/// Creation payload. `status: None` means "compute it".
#[derive(Debug, Clone, PartialEq)]
pub struct NewBooking {
    pub id: Ulid,
    pub kind: BookingKind,
    pub range: StayRange,
    pub check_in_time: Option<NaiveTime>,
    pub check_out_time: Option<NaiveTime>,
    pub status: Option<BookingStatus>,
    pub stop_reason: Option<StopReason>,
    pub cancel_reason: Option<String>,
    pub price: i64,
    pub amount: i64,
    pub prepayment: i64,
    pub prepaid: bool,
    pub comment: Option<String>,
    pub file_url: Option<String>,
    pub room_id: Ulid,
    pub pet_ids: Vec<Ulid>,
}

/// Partial update; absent fields retain the persisted value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingPatch {
    pub kind: Option<BookingKind>,
    pub check_in: Option<NaiveDate>,
    pub check_out: Option<NaiveDate>,
    pub check_in_time: Option<NaiveTime>,
    pub check_out_time: Option<NaiveTime>,
    pub status: Option<BookingStatus>,
    pub stop_reason: Option<StopReason>,
    pub cancel_reason: Option<String>,
    pub price: Option<i64>,
    pub amount: Option<i64>,
    pub prepayment: Option<i64>,
    pub prepaid: Option<bool>,
    pub comment: Option<String>,
    pub file_url: Option<String>,
    pub room_id: Option<Ulid>,
    pub pet_ids: Option<Vec<Ulid>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub category_id: Ulid,
    pub number: String,
    pub area: Option<f64>,
    pub description: Option<String>,
    pub visible: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomPatch {
    pub category_id: Option<Ulid>,
    pub number: Option<String>,
    pub area: Option<f64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: Ulid,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pet {
    pub id: Ulid,
    pub name: String,
    pub species: PetSpecies,
    pub owner_id: Option<Ulid>,
}

/// One room plus its bookings, sorted by `range.check_in`. The whole struct
/// lives behind one `RwLock`; the write lock is the per-room mutual exclusion
/// for check-then-persist sequences.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self { room, bookings: Vec::new() }
    }

    /// Insert maintaining sort order by check-in date.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.range.check_in, |b| b.range.check_in)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        if let Some(pos) = self.bookings.iter().position(|b| b.id == id) {
            Some(self.bookings.remove(pos))
        } else {
            None
        }
    }

    pub fn get_booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Bookings that could possibly block or cross `query`. Binary search
    /// skips everything checking in after the query checkout (neither
    /// predicate reaches past a shared boundary day).
    pub fn near(&self, query: &StayRange) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.range.check_in <= query.check_out);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.range.check_out >= query.check_in)
    }
}

/// The WAL record format. Registry events are applied at the map level;
/// booking and room events are applied to the owning `RoomState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    CategoryCreated { category: Category },
    CategoryUpdated { id: Ulid, name: String, description: Option<String> },
    CategoryDeleted { id: Ulid },
    PetRegistered { pet: Pet },
    PetRemoved { id: Ulid },
    RoomCreated { room: Room },
    RoomUpdated {
        id: Ulid,
        category_id: Ulid,
        number: String,
        area: Option<f64>,
        description: Option<String>,
    },
    RoomVisibilityChanged { id: Ulid, visible: bool },
    RoomDeleted { id: Ulid },
    BookingCreated { booking: Booking },
    /// Carries the fully merged booking; replaces the stored one and, on a
    /// room move, relocates it.
    BookingUpdated { booking: Booking },
    BookingDeleted { id: Ulid, room_id: Ulid },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn r(a: NaiveDate, b: NaiveDate) -> StayRange {
        StayRange::new(a, b)
    }

    fn test_room() -> Room {
        Room {
            id: Ulid::new(),
            category_id: Ulid::new(),
            number: "1".into(),
            area: None,
            description: None,
            visible: true,
        }
    }

    fn test_booking(room_id: Ulid, check_in: NaiveDate, check_out: NaiveDate) -> Booking {
        Booking {
            id: Ulid::new(),
            kind: BookingKind::Stay,
            range: StayRange::new(check_in, check_out),
            check_in_time: None,
            check_out_time: None,
            status: BookingStatus::Confirmed,
            stop_reason: None,
            cancel_reason: None,
            price: 100,
            amount: 100,
            prepayment: 0,
            prepaid: false,
            comment: None,
            file_url: None,
            room_id,
            pet_ids: vec![Ulid::new()],
        }
    }

    #[test]
    fn range_basics() {
        let s = r(d(2024, 1, 1), d(2024, 1, 10));
        assert_eq!(s.nights(), 9);
        assert!(!s.is_zero_night());
        assert!(r(d(2024, 1, 5), d(2024, 1, 5)).is_zero_night());
    }

    #[test]
    fn blocks_plain_overlap() {
        let a = r(d(2024, 1, 1), d(2024, 1, 10));
        let b = r(d(2024, 1, 5), d(2024, 1, 15));
        assert!(a.blocks(&b));
        assert!(b.blocks(&a));
    }

    #[test]
    fn blocks_containment() {
        let outer = r(d(2024, 1, 1), d(2024, 1, 31));
        let inner = r(d(2024, 1, 10), d(2024, 1, 12));
        assert!(outer.blocks(&inner));
        assert!(inner.blocks(&outer));
    }

    #[test]
    fn adjacency_is_not_blocking() {
        // Same-day turnover: one checks out the day the other checks in.
        let a = r(d(2024, 1, 1), d(2024, 1, 5));
        let b = r(d(2024, 1, 5), d(2024, 1, 10));
        assert!(!a.blocks(&b));
        assert!(!b.blocks(&a));
    }

    #[test]
    fn adjacency_is_crossing() {
        let a = r(d(2024, 1, 1), d(2024, 1, 5));
        let b = r(d(2024, 1, 5), d(2024, 1, 10));
        assert!(a.crosses(&b));
        assert!(b.crosses(&a));
    }

    #[test]
    fn zero_night_blocks_inclusive_boundaries() {
        let stay = r(d(2024, 1, 1), d(2024, 1, 5));
        // A zero-night booking collides anywhere inside, boundary days included.
        for day in 1..=5 {
            let point = r(d(2024, 1, day), d(2024, 1, day));
            assert!(point.blocks(&stay), "day {day}");
            assert!(stay.blocks(&point), "day {day}");
        }
        let outside = r(d(2024, 1, 6), d(2024, 1, 6));
        assert!(!outside.blocks(&stay));
        assert!(!stay.blocks(&outside));
    }

    #[test]
    fn zero_night_pair() {
        let a = r(d(2024, 1, 3), d(2024, 1, 3));
        let b = r(d(2024, 1, 3), d(2024, 1, 3));
        let c = r(d(2024, 1, 4), d(2024, 1, 4));
        assert!(a.blocks(&b));
        assert!(!a.blocks(&c));
    }

    #[test]
    fn disjoint_with_gap_neither_blocks_nor_crosses() {
        let a = r(d(2024, 1, 1), d(2024, 1, 5));
        let b = r(d(2024, 1, 7), d(2024, 1, 10));
        assert!(!a.blocks(&b));
        assert!(!a.crosses(&b));
    }

    #[test]
    fn crossing_is_superset_of_blocking() {
        // Exhaustive over a small grid of date pairs.
        let base = d(2024, 1, 1);
        let days: Vec<NaiveDate> = (0..8).map(|i| base + chrono::Days::new(i)).collect();
        for &a in &days {
            for &b in &days {
                if a > b {
                    continue;
                }
                for &c in &days {
                    for &e in &days {
                        if c > e {
                            continue;
                        }
                        let x = r(a, b);
                        let y = r(c, e);
                        if x.blocks(&y) {
                            assert!(x.crosses(&y), "{x:?} vs {y:?}");
                        }
                        assert_eq!(x.blocks(&y), y.blocks(&x), "{x:?} vs {y:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn booking_sort_order() {
        let room = test_room();
        let mut rs = RoomState::new(room.clone());
        for day in [20, 5, 12] {
            rs.insert_booking(test_booking(room.id, d(2024, 1, day), d(2024, 1, day + 2)));
        }
        let starts: Vec<NaiveDate> = rs.bookings.iter().map(|b| b.range.check_in).collect();
        assert_eq!(starts, vec![d(2024, 1, 5), d(2024, 1, 12), d(2024, 1, 20)]);
    }

    #[test]
    fn remove_booking_by_id() {
        let room = test_room();
        let mut rs = RoomState::new(room.clone());
        let b = test_booking(room.id, d(2024, 1, 1), d(2024, 1, 3));
        let id = b.id;
        rs.insert_booking(b);
        assert!(rs.remove_booking(id).is_some());
        assert!(rs.bookings.is_empty());
        assert!(rs.remove_booking(id).is_none());
    }

    #[test]
    fn near_skips_disjoint_bookings() {
        let room = test_room();
        let mut rs = RoomState::new(room.clone());
        rs.insert_booking(test_booking(room.id, d(2024, 1, 1), d(2024, 1, 3)));
        rs.insert_booking(test_booking(room.id, d(2024, 1, 10), d(2024, 1, 12)));
        rs.insert_booking(test_booking(room.id, d(2024, 2, 1), d(2024, 2, 5)));

        let query = r(d(2024, 1, 9), d(2024, 1, 15));
        let hits: Vec<_> = rs.near(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].range.check_in, d(2024, 1, 10));
    }

    #[test]
    fn near_includes_touching_bookings() {
        // A booking checking out exactly on the query check-in day is still a
        // candidate — the crossing predicate wants it.
        let room = test_room();
        let mut rs = RoomState::new(room.clone());
        rs.insert_booking(test_booking(room.id, d(2024, 1, 1), d(2024, 1, 5)));
        let query = r(d(2024, 1, 5), d(2024, 1, 8));
        assert_eq!(rs.near(&query).count(), 1);
    }

    #[test]
    fn merge_keeps_unset_fields() {
        let current = test_booking(Ulid::new(), d(2024, 1, 1), d(2024, 1, 10));
        let patch = BookingPatch {
            price: Some(500),
            ..Default::default()
        };
        let next = current.merged(&patch);
        assert_eq!(next.price, 500);
        assert_eq!(next.range, current.range);
        assert_eq!(next.status, current.status);
        assert_eq!(next.pet_ids, current.pet_ids);
        assert_eq!(next.comment, current.comment);
    }

    #[test]
    fn merge_replaces_pet_set_wholesale() {
        let current = test_booking(Ulid::new(), d(2024, 1, 1), d(2024, 1, 10));
        let new_pets = vec![Ulid::new(), Ulid::new()];
        let patch = BookingPatch {
            pet_ids: Some(new_pets.clone()),
            ..Default::default()
        };
        assert_eq!(current.merged(&patch).pet_ids, new_pets);
    }

    #[test]
    fn merge_moves_dates_independently() {
        let current = test_booking(Ulid::new(), d(2024, 1, 1), d(2024, 1, 10));
        let patch = BookingPatch {
            check_out: Some(d(2024, 1, 20)),
            ..Default::default()
        };
        let next = current.merged(&patch);
        assert_eq!(next.range.check_in, d(2024, 1, 1));
        assert_eq!(next.range.check_out, d(2024, 1, 20));
    }

    #[test]
    fn status_on_create_rules() {
        use BookingKind::*;
        use BookingStatus::*;
        assert_eq!(BookingStatus::on_create(None, true, Stay), Confirmed);
        assert_eq!(BookingStatus::on_create(None, false, Stay), Initial);
        assert_eq!(BookingStatus::on_create(None, false, Closing), Confirmed);
        assert_eq!(BookingStatus::on_create(Some(Initial), true, Closing), Initial);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            booking: test_booking(Ulid::new(), d(2024, 3, 1), d(2024, 3, 4)),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
