use chrono::NaiveDate;
use ulid::Ulid;

/// Coarse classification used for wire-level error mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    Storage,
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Date-range conflict: the room has a blocking booking in the range.
    RoomUnavailable(Ulid),
    DatesInverted { check_in: NaiveDate, check_out: NaiveDate },
    ClosingWithoutReason,
    CancelWithoutReason(Ulid),
    CancelledIsTerminal(Ulid),
    HiddenRoom(Ulid),
    /// Hide-room guard: future non-cancelled stay bookings exist.
    OpenBookings(Ulid),
    /// Delete guard: rooms in the category, bookings in the room, or
    /// bookings referencing the pet.
    HasDependents(Ulid),
    EmptyPets(Ulid),
    KindChange(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::AlreadyExists(_)
            | EngineError::RoomUnavailable(_)
            | EngineError::DatesInverted { .. }
            | EngineError::ClosingWithoutReason
            | EngineError::CancelWithoutReason(_)
            | EngineError::CancelledIsTerminal(_)
            | EngineError::HiddenRoom(_)
            | EngineError::OpenBookings(_)
            | EngineError::HasDependents(_)
            | EngineError::EmptyPets(_) => ErrorKind::Conflict,
            EngineError::KindChange(_) | EngineError::LimitExceeded(_) => ErrorKind::Validation,
            EngineError::WalError(_) => ErrorKind::Storage,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::RoomUnavailable(id) => {
                write!(f, "room with id={id} is not available for current dates")
            }
            EngineError::DatesInverted { check_in, check_out } => {
                write!(f, "check-in date {check_in} is after check-out date {check_out}")
            }
            EngineError::ClosingWithoutReason => {
                write!(f, "reason of stop cannot be empty when booking kind is closing")
            }
            EngineError::CancelWithoutReason(id) => {
                write!(f, "cannot cancel booking {id} without a cancel reason")
            }
            EngineError::CancelledIsTerminal(id) => {
                write!(f, "booking {id} is cancelled and cannot change status")
            }
            EngineError::HiddenRoom(id) => {
                write!(f, "cannot take bookings for hidden room {id}")
            }
            EngineError::OpenBookings(id) => {
                write!(f, "room with id={id} has opened bookings")
            }
            EngineError::HasDependents(id) => {
                write!(f, "cannot delete {id}: dependent records exist")
            }
            EngineError::EmptyPets(id) => {
                write!(f, "booking {id} must reference at least one pet")
            }
            EngineError::KindChange(id) => {
                write!(f, "booking kind is immutable (booking {id})")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
