use chrono::NaiveDate;

use crate::model::*;

// ── Free-range algorithm ──────────────────────────────────────────
//
// Occupied nights are half-open `[check_in, check_out)` day intervals;
// zero-night bookings occupy no nights and never appear here. The free
// ranges of a window are the window minus the merged occupied intervals.

/// Maximal sub-ranges of `window` where the room has no occupied night.
pub fn free_ranges(rs: &RoomState, window: &StayRange) -> Vec<StayRange> {
    let mut occupied: Vec<StayRange> = rs
        .near(window)
        .filter(|b| !b.is_cancelled() && !b.range.is_zero_night())
        .map(|b| StayRange::new(
            b.range.check_in.max(window.check_in),
            b.range.check_out.min(window.check_out),
        ))
        .filter(|r| !r.is_zero_night())
        .collect();
    occupied.sort_by_key(|r| r.check_in);
    let occupied = merge_overlapping(&occupied);
    subtract_ranges(&[*window], &occupied)
}

/// Merge sorted overlapping/adjacent date ranges into disjoint ranges.
pub fn merge_overlapping(sorted: &[StayRange]) -> Vec<StayRange> {
    let mut merged: Vec<StayRange> = Vec::new();
    for &range in sorted {
        if let Some(last) = merged.last_mut()
            && range.check_in <= last.check_out {
                last.check_out = last.check_out.max(range.check_out);
                continue;
            }
        merged.push(range);
    }
    merged
}

/// Subtract sorted `to_remove` from sorted `base`, both half-open in days.
pub fn subtract_ranges(base: &[StayRange], to_remove: &[StayRange]) -> Vec<StayRange> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.check_in;
        let current_end = b.check_out;

        while ri < to_remove.len() && to_remove[ri].check_out <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].check_in < current_end {
            let r = &to_remove[j];
            if r.check_in > current_start {
                result.push(StayRange::new(current_start, r.check_in));
            }
            current_start = current_start.max(r.check_out);
            j += 1;
        }

        if current_start < current_end {
            result.push(StayRange::new(current_start, current_end));
        }
    }

    result
}
