use chrono::NaiveDate;

pub const MAX_ROOMS_PER_TENANT: usize = 10_000;
pub const MAX_BOOKINGS_PER_ROOM: usize = 10_000;
pub const MAX_CATEGORIES_PER_TENANT: usize = 1_000;
pub const MAX_PETS_PER_TENANT: usize = 100_000;
pub const MAX_PETS_PER_BOOKING: usize = 10;

/// Longest single stay, in nights.
pub const MAX_STAY_NIGHTS: i64 = 365;

/// Widest window a range query (calendar, free-ranges) may ask for, in days.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 3_660;

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 250;
pub const MAX_COMMENT_LEN: usize = 150;
pub const MAX_FILE_URL_LEN: usize = 250;

/// Money fields are integer currency units in `0..=MAX_MONEY`.
pub const MAX_MONEY: i64 = 999_999;

pub const MAX_TENANT_NAME_LEN: usize = 256;
pub const MAX_TENANTS: usize = 64;

/// Earliest calendar date a booking may reference.
pub fn min_bookable_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).expect("valid calendar date")
}

/// Latest calendar date a booking may reference.
pub fn max_bookable_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2100, 12, 31).expect("valid calendar date")
}
