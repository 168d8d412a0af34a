use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Reject inverted, out-of-window, or over-long ranges before any read.
/// A zero-night range (check_in == check_out) is legal.
pub(crate) fn validate_range(range: &StayRange) -> Result<(), EngineError> {
    use crate::limits::*;
    if range.check_in > range.check_out {
        return Err(EngineError::DatesInverted {
            check_in: range.check_in,
            check_out: range.check_out,
        });
    }
    if range.check_in < min_bookable_date() || range.check_out > max_bookable_date() {
        return Err(EngineError::LimitExceeded("date outside supported calendar window"));
    }
    if range.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

pub(crate) fn validate_window(window: &StayRange) -> Result<(), EngineError> {
    use crate::limits::*;
    if window.check_in > window.check_out {
        return Err(EngineError::DatesInverted {
            check_in: window.check_in,
            check_out: window.check_out,
        });
    }
    if window.nights() > MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

/// Non-cancelled bookings whose ranges block `range`. Cancelled bookings are
/// inert for conflict purposes.
pub(crate) fn blocking_in<'a>(rs: &'a RoomState, range: &StayRange) -> Vec<&'a Booking> {
    rs.near(range)
        .filter(|b| !b.is_cancelled() && b.range.blocks(range))
        .collect()
}

/// Non-cancelled bookings whose ranges cross `range` (blocking or touching
/// end-to-end). Informational only.
pub(crate) fn crossing_in<'a>(rs: &'a RoomState, range: &StayRange) -> Vec<&'a Booking> {
    rs.near(range)
        .filter(|b| !b.is_cancelled() && b.range.crosses(range))
        .collect()
}

/// The Availability Guard core: fails with a Conflict naming the room when
/// any non-cancelled booking (other than `exclude`, the booking being
/// edited) blocks `range`.
pub(crate) fn check_room_available(
    rs: &RoomState,
    range: &StayRange,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    let conflict = blocking_in(rs, range)
        .into_iter()
        .any(|b| Some(b.id) != exclude);
    if conflict {
        return Err(EngineError::RoomUnavailable(rs.room.id));
    }
    Ok(())
}

/// The hide-room guard query: non-cancelled stay bookings with a checkout
/// today or later.
pub(crate) fn future_stay_bookings<'a>(rs: &'a RoomState, today: NaiveDate) -> Vec<&'a Booking> {
    rs.bookings
        .iter()
        .filter(|b| {
            b.kind == BookingKind::Stay && !b.is_cancelled() && b.range.check_out >= today
        })
        .collect()
}
