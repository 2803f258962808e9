//! Seat accounting and booking-window rules.
//!
//! Everything in here is a pure function over already-loaded rows so the
//! database layer in `actions` only has to fetch, decide and write.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use uuid::Uuid;

use crate::models::CourseSchedule;

pub const DEFAULT_CANCELLATION_HOURS: i64 = 24;
/// Upper bound for `CANCELLATION_HOURS` and reminder offsets: one year.
pub const MAX_WINDOW_HOURS: i64 = 24 * 366;
pub const MAX_NOTES_LEN: usize = 500;
/// Length limit of the VARCHAR(255) name, e-mail and reference columns.
pub const MAX_TEXT_LEN: usize = 255;
pub const VOUCHER_PREFIX: &str = "CRS-";
const VOUCHER_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNPQRSTUVWXYZ123456789";
const VOUCHER_LEN: usize = 8;

/// A business-rule violation. Always reported to the client as a bad request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BookingRule {
    #[error("Schedule not found or inactive")]
    ScheduleUnavailable,
    #[error("Course has started")]
    CourseStarted,
    #[error("Already registered")]
    AlreadyRegistered,
    #[error("No available seats")]
    NoSeatsAvailable,
    #[error("Cannot cancel less than {0} hours before start")]
    CancellationWindowPassed(i64),
    #[error("Seats ({seats}) < current bookings ({bookings})")]
    SeatsBelowBookings { seats: i32, bookings: i64 },
    #[error("Booking is cancelled")]
    BookingCancelled,
    #[error("There is another course in the selected time slot (schedule {0})")]
    SlotTaken(i32),
}

/// Checks whether a new booking may be taken on `schedule`.
///
/// `booking_count` is the number of non-cancelled bookings already on the
/// schedule and `already_registered` whether the caller holds one of them.
pub fn check_can_book(
    schedule: Option<&CourseSchedule>,
    booking_count: i64,
    already_registered: bool,
    now: NaiveDateTime,
) -> Result<(), BookingRule> {
    let schedule = match schedule {
        Some(s) if s.is_active => s,
        _ => return Err(BookingRule::ScheduleUnavailable),
    };

    if schedule.start_time <= now {
        return Err(BookingRule::CourseStarted);
    }

    if already_registered {
        return Err(BookingRule::AlreadyRegistered);
    }

    if remaining_seats(schedule.available_seats, booking_count) <= 0 {
        return Err(BookingRule::NoSeatsAvailable);
    }

    Ok(())
}

pub fn remaining_seats(available_seats: i32, booking_count: i64) -> i64 {
    available_seats as i64 - booking_count
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelDecision {
    AlreadyCancelled,
    Cancel,
}

pub fn check_can_cancel(
    is_cancelled: bool,
    start_time: NaiveDateTime,
    now: NaiveDateTime,
    window_hours: i64,
) -> Result<CancelDecision, BookingRule> {
    if is_cancelled {
        return Ok(CancelDecision::AlreadyCancelled);
    }

    // A window reaching past the calendar covers every start time
    let deadline = Duration::try_hours(window_hours).and_then(|window| now.checked_add_signed(window));
    match deadline {
        Some(deadline) if start_time >= deadline => {}
        _ => return Err(BookingRule::CancellationWindowPassed(window_hours)),
    }

    Ok(CancelDecision::Cancel)
}

pub fn check_seat_update(new_seats: i32, current_bookings: i64) -> Result<(), BookingRule> {
    if (new_seats as i64) < current_bookings {
        return Err(BookingRule::SeatsBelowBookings { seats: new_seats, bookings: current_bookings });
    }
    Ok(())
}

/// `[start, end)` of a schedule, or `None` when the end falls off the calendar.
pub fn schedule_slot(start: NaiveDateTime, duration_hours: i32) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let end = start.checked_add_signed(Duration::try_hours(duration_hours as i64)?)?;
    Some((start, end))
}

/// Rejects a slot overlapping any of `taken` (`(schedule id, start, end)`).
/// Back-to-back courses sharing a boundary do not overlap.
pub fn check_slot_free(
    start: NaiveDateTime,
    end: NaiveDateTime,
    taken: &[(i32, NaiveDateTime, NaiveDateTime)],
) -> Result<(), BookingRule> {
    match taken.iter().find(|(_, other_start, other_end)| *other_start < end && start < *other_end) {
        Some((id, _, _)) => Err(BookingRule::SlotTaken(*id)),
        None => Ok(()),
    }
}

/// Seat count for a new schedule: non-positive requests fall back to the plan capacity.
pub fn seats_for_new_schedule(requested: Option<i32>, plan_capacity: i32) -> i32 {
    match requested {
        Some(seats) if seats > 0 => seats,
        _ => plan_capacity.max(0),
    }
}

pub fn truncate_notes(notes: Option<String>) -> Option<String> {
    notes.map(|n| {
        if n.chars().count() > MAX_NOTES_LEN {
            n.chars().take(MAX_NOTES_LEN).collect()
        } else {
            n
        }
    })
}

pub fn generate_voucher_code() -> String {
    // v4 UUIDs are filled from the OS CSPRNG; bytes 6 and 8 carry version bits
    let random = Uuid::new_v4();
    let src = random.as_bytes();
    let mut bytes = [0u8; VOUCHER_LEN];
    for (dst, idx) in bytes.iter_mut().zip([0, 1, 2, 3, 4, 5, 10, 11]) {
        *dst = src[idx];
    }
    voucher_from_bytes(&bytes)
}

fn voucher_from_bytes(bytes: &[u8; VOUCHER_LEN]) -> String {
    let body: String = bytes
        .iter()
        .map(|b| VOUCHER_ALPHABET[*b as usize % VOUCHER_ALPHABET.len()] as char)
        .collect();
    format!("{}{}", VOUCHER_PREFIX, body)
}

/// `[first day of month, first day of next month)` for the calendar views.
pub fn month_window(year: i32, month: u32) -> Option<(NaiveDateTime, NaiveDateTime)> {
    if !(1900..=2100).contains(&year) || !(1..=12).contains(&month) {
        return None;
    }
    let from = NaiveDate::from_ymd_opt(year, month, 1)?;
    let to = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((from.and_hms_opt(0, 0, 0)?, to.and_hms_opt(0, 0, 0)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn schedule(start_time: NaiveDateTime, available_seats: i32) -> CourseSchedule {
        CourseSchedule {
            id: 1,
            course_plan_id: 1,
            start_time,
            created_by_user_id: 1,
            created_date: at(2025, 1, 1, 0),
            available_seats,
            is_active: true,
        }
    }

    #[test]
    fn booking_allowed_with_free_seats() {
        let s = schedule(at(2025, 5, 10, 9), 3);
        assert_eq!(check_can_book(Some(&s), 2, false, at(2025, 5, 1, 9)), Ok(()));
    }

    #[test]
    fn booking_rejected_when_bookings_reach_seat_count() {
        let s = schedule(at(2025, 5, 10, 9), 3);
        assert_eq!(
            check_can_book(Some(&s), 3, false, at(2025, 5, 1, 9)),
            Err(BookingRule::NoSeatsAvailable)
        );
    }

    #[test]
    fn booking_rejected_for_second_active_registration() {
        let s = schedule(at(2025, 5, 10, 9), 10);
        assert_eq!(
            check_can_book(Some(&s), 1, true, at(2025, 5, 1, 9)),
            Err(BookingRule::AlreadyRegistered)
        );
    }

    #[test]
    fn registration_reported_before_capacity() {
        let s = schedule(at(2025, 5, 10, 9), 1);
        assert_eq!(
            check_can_book(Some(&s), 1, true, at(2025, 5, 1, 9)),
            Err(BookingRule::AlreadyRegistered)
        );
    }

    #[test]
    fn booking_rejected_for_missing_or_inactive_schedule() {
        let now = at(2025, 5, 1, 9);
        assert_eq!(check_can_book(None, 0, false, now), Err(BookingRule::ScheduleUnavailable));

        let mut s = schedule(at(2025, 5, 10, 9), 5);
        s.is_active = false;
        assert_eq!(check_can_book(Some(&s), 0, false, now), Err(BookingRule::ScheduleUnavailable));
    }

    #[test]
    fn booking_rejected_once_course_started() {
        let s = schedule(at(2025, 5, 10, 9), 5);
        assert_eq!(check_can_book(Some(&s), 0, false, at(2025, 5, 10, 9)), Err(BookingRule::CourseStarted));
        assert_eq!(check_can_book(Some(&s), 0, false, at(2025, 5, 10, 10)), Err(BookingRule::CourseStarted));
    }

    #[test]
    fn cancellation_allowed_outside_window() {
        let start = at(2025, 5, 10, 9);
        assert_eq!(
            check_can_cancel(false, start, at(2025, 5, 9, 9), DEFAULT_CANCELLATION_HOURS),
            Ok(CancelDecision::Cancel)
        );
    }

    #[test]
    fn cancellation_rejected_inside_window() {
        let start = at(2025, 5, 10, 9);
        assert_eq!(
            check_can_cancel(false, start, at(2025, 5, 9, 10), DEFAULT_CANCELLATION_HOURS),
            Err(BookingRule::CancellationWindowPassed(24))
        );
        assert_eq!(
            check_can_cancel(false, start, at(2025, 5, 10, 8), 2),
            Err(BookingRule::CancellationWindowPassed(2))
        );
    }

    #[test]
    fn oversized_window_rejects_without_overflow() {
        let start = at(2025, 5, 10, 9);
        assert_eq!(
            check_can_cancel(false, start, at(2025, 5, 1, 9), i64::MAX),
            Err(BookingRule::CancellationWindowPassed(i64::MAX))
        );
        assert_eq!(
            check_can_cancel(false, start, at(2025, 5, 1, 9), 10_000_000_000),
            Err(BookingRule::CancellationWindowPassed(10_000_000_000))
        );
    }

    #[test]
    fn cancelling_twice_is_a_no_op() {
        let start = at(2025, 5, 10, 9);
        assert_eq!(
            check_can_cancel(true, start, at(2025, 5, 10, 8), DEFAULT_CANCELLATION_HOURS),
            Ok(CancelDecision::AlreadyCancelled)
        );
    }

    #[test]
    fn seats_cannot_drop_below_bookings() {
        assert_eq!(check_seat_update(5, 5), Ok(()));
        assert_eq!(
            check_seat_update(4, 5),
            Err(BookingRule::SeatsBelowBookings { seats: 4, bookings: 5 })
        );
        assert_eq!(
            BookingRule::SeatsBelowBookings { seats: 4, bookings: 5 }.to_string(),
            "Seats (4) < current bookings (5)"
        );
    }

    #[test]
    fn overlapping_slots_are_rejected() {
        let taken = [(4, at(2025, 5, 10, 9), at(2025, 5, 10, 13))];

        assert_eq!(
            check_slot_free(at(2025, 5, 10, 12), at(2025, 5, 10, 16), &taken),
            Err(BookingRule::SlotTaken(4))
        );
        assert_eq!(
            check_slot_free(at(2025, 5, 10, 7), at(2025, 5, 10, 18), &taken),
            Err(BookingRule::SlotTaken(4))
        );
        assert_eq!(check_slot_free(at(2025, 5, 10, 13), at(2025, 5, 10, 15), &taken), Ok(()));
        assert_eq!(check_slot_free(at(2025, 5, 10, 5), at(2025, 5, 10, 9), &taken), Ok(()));
        assert_eq!(check_slot_free(at(2025, 5, 10, 5), at(2025, 5, 10, 9), &[]), Ok(()));
    }

    #[test]
    fn slot_end_is_checked() {
        assert_eq!(schedule_slot(at(2025, 5, 10, 9), 4), Some((at(2025, 5, 10, 9), at(2025, 5, 10, 13))));
        assert_eq!(schedule_slot(NaiveDateTime::MAX, 1), None);
    }

    #[test]
    fn new_schedule_falls_back_to_plan_capacity() {
        assert_eq!(seats_for_new_schedule(Some(6), 12), 6);
        assert_eq!(seats_for_new_schedule(Some(0), 12), 12);
        assert_eq!(seats_for_new_schedule(None, 12), 12);
        assert_eq!(seats_for_new_schedule(Some(-3), -1), 0);
    }

    #[test]
    fn notes_are_truncated_by_characters() {
        let long = "é".repeat(600);
        let truncated = truncate_notes(Some(long)).unwrap();
        assert_eq!(truncated.chars().count(), MAX_NOTES_LEN);
        assert_eq!(truncate_notes(Some("short".to_string())), Some("short".to_string()));
        assert_eq!(truncate_notes(None), None);
    }

    #[test]
    fn voucher_codes_use_restricted_alphabet() {
        for _ in 0..50 {
            let code = generate_voucher_code();
            assert_eq!(code.len(), VOUCHER_PREFIX.len() + VOUCHER_LEN);
            assert!(code.starts_with(VOUCHER_PREFIX));
            assert!(code[VOUCHER_PREFIX.len()..].bytes().all(|b| VOUCHER_ALPHABET.contains(&b)));
            assert!(!code[VOUCHER_PREFIX.len()..].contains('O'));
            assert!(!code[VOUCHER_PREFIX.len()..].contains('0'));
        }
    }

    #[test]
    fn voucher_maps_bytes_modulo_alphabet() {
        assert_eq!(voucher_from_bytes(&[0, 1, 2, 33, 34, 35, 255, 24]), "CRS-ABC9ABSZ");
    }

    #[test]
    fn month_window_spans_whole_month() {
        assert_eq!(month_window(2025, 5), Some((at(2025, 5, 1, 0), at(2025, 6, 1, 0))));
        assert_eq!(month_window(2025, 12), Some((at(2025, 12, 1, 0), at(2026, 1, 1, 0))));
    }

    #[test]
    fn month_window_rejects_out_of_range_input() {
        assert_eq!(month_window(1899, 5), None);
        assert_eq!(month_window(2101, 5), None);
        assert_eq!(month_window(2025, 0), None);
        assert_eq!(month_window(2025, 13), None);
    }
}
