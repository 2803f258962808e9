use std::collections::{HashMap, HashSet};

use diesel::prelude::*;
use chrono::{Duration, NaiveDateTime, Utc};
use crate::error::ServiceError;
use crate::models::{self, AttendanceStatus, PaymentStatus};
use crate::rules::{self, CancelDecision};
use crate::schema::{course_bookings, course_notifications, course_participants, course_plans, course_products, course_schedules};

type DbResult<T> = Result<T, ServiceError>;

fn now_utc() -> NaiveDateTime {
    Utc::now().naive_utc()
}

pub fn list_course_plans(conn: &mut PgConnection, include_non_public: bool) -> DbResult<Vec<models::CoursePlan>> {
    let mut query = course_plans::table
        .select(models::CoursePlan::as_select())
        .order(course_plans::name.asc())
        .into_boxed();

    if !include_non_public {
        query = query.filter(course_plans::is_public.eq(true));
    }

    Ok(query.load(conn)?)
}

pub fn get_course_plan(conn: &mut PgConnection, plan_id: i32) -> DbResult<models::CoursePlan> {
    course_plans::table
        .find(plan_id)
        .select(models::CoursePlan::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ServiceError::not_found("Course plan"))
}

/// Non-cancelled booking counts keyed by schedule id. Schedules without bookings are absent.
pub fn booking_counts(conn: &mut PgConnection, schedule_ids: &[i32]) -> DbResult<HashMap<i32, i64>> {
    if schedule_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<(i32, i64)> = course_bookings::table
        .filter(course_bookings::course_schedule_id.eq_any(schedule_ids.to_vec()))
        .filter(course_bookings::is_cancelled.eq(false))
        .group_by(course_bookings::course_schedule_id)
        .select((course_bookings::course_schedule_id, diesel::dsl::count(course_bookings::id)))
        .load(conn)?;

    Ok(rows.into_iter().collect())
}

pub fn count_active_bookings(conn: &mut PgConnection, schedule_id: i32) -> DbResult<i64> {
    let count = course_bookings::table
        .filter(course_bookings::course_schedule_id.eq(schedule_id))
        .filter(course_bookings::is_cancelled.eq(false))
        .count()
        .get_result(conn)?;
    Ok(count)
}

pub fn is_user_registered(conn: &mut PgConnection, schedule_id: i32, user_id: i32) -> DbResult<bool> {
    let existing: Option<i32> = course_bookings::table
        .filter(course_bookings::course_schedule_id.eq(schedule_id))
        .filter(course_bookings::user_id.eq(user_id))
        .filter(course_bookings::is_cancelled.eq(false))
        .select(course_bookings::id)
        .first(conn)
        .optional()?;
    Ok(existing.is_some())
}

/// Schedule ids the user holds a non-cancelled booking on.
pub fn registered_schedule_ids(conn: &mut PgConnection, user_id: i32) -> DbResult<HashSet<i32>> {
    let ids: Vec<i32> = course_bookings::table
        .filter(course_bookings::user_id.eq(user_id))
        .filter(course_bookings::is_cancelled.eq(false))
        .select(course_bookings::course_schedule_id)
        .load(conn)?;
    Ok(ids.into_iter().collect())
}

pub fn list_schedules(
    conn: &mut PgConnection,
    from: NaiveDateTime,
    to: NaiveDateTime,
    include_inactive: bool,
    user_id: Option<i32>,
) -> DbResult<Vec<models::ScheduleView>> {
    let mut query = course_schedules::table
        .inner_join(course_plans::table)
        .filter(course_schedules::start_time.ge(from))
        .filter(course_schedules::start_time.lt(to))
        .select((models::CourseSchedule::as_select(), models::CoursePlan::as_select()))
        .order(course_schedules::start_time.asc())
        .into_boxed();

    if !include_inactive {
        query = query.filter(course_schedules::is_active.eq(true));
    }

    let rows: Vec<(models::CourseSchedule, models::CoursePlan)> = query.load(conn)?;

    let ids: Vec<i32> = rows.iter().map(|(s, _)| s.id).collect();
    let counts = booking_counts(conn, &ids)?;
    let registered = match user_id {
        Some(uid) => registered_schedule_ids(conn, uid)?,
        None => HashSet::new(),
    };

    Ok(rows
        .iter()
        .map(|(schedule, plan)| {
            let count = counts.get(&schedule.id).copied().unwrap_or(0);
            models::ScheduleView::new(schedule, plan, count, registered.contains(&schedule.id))
        })
        .collect())
}

pub fn get_schedule(
    conn: &mut PgConnection,
    schedule_id: i32,
    user_id: Option<i32>,
) -> DbResult<models::ScheduleView> {
    let (schedule, plan): (models::CourseSchedule, models::CoursePlan) = course_schedules::table
        .inner_join(course_plans::table)
        .filter(course_schedules::id.eq(schedule_id))
        .select((models::CourseSchedule::as_select(), models::CoursePlan::as_select()))
        .first(conn)
        .optional()?
        .ok_or_else(|| ServiceError::not_found("Course schedule"))?;

    let count = count_active_bookings(conn, schedule_id)?;
    let registered = match user_id {
        Some(uid) => is_user_registered(conn, schedule_id, uid)?,
        None => false,
    };

    Ok(models::ScheduleView::new(&schedule, &plan, count, registered))
}

/// Fails when an active schedule other than `exclude` overlaps `start` for `duration_hours`.
fn ensure_slot_free(
    conn: &mut PgConnection,
    start: NaiveDateTime,
    duration_hours: i32,
    exclude: Option<i32>,
) -> DbResult<()> {
    let out_of_range = || ServiceError::Validation("start_time is out of range".to_string());
    let (start, end) = rules::schedule_slot(start, duration_hours).ok_or_else(out_of_range)?;

    // Only schedules starting within the longest plan duration before `start` can reach into the slot
    let longest: Option<i32> = course_plans::table
        .select(diesel::dsl::max(course_plans::duration_hours))
        .get_result(conn)?;
    let earliest = Duration::try_hours(longest.unwrap_or(0) as i64)
        .and_then(|d| start.checked_sub_signed(d))
        .ok_or_else(out_of_range)?;

    let mut query = course_schedules::table
        .inner_join(course_plans::table)
        .filter(course_schedules::is_active.eq(true))
        .filter(course_schedules::start_time.lt(end))
        .filter(course_schedules::start_time.gt(earliest))
        .select((course_schedules::id, course_schedules::start_time, course_plans::duration_hours))
        .into_boxed();

    if let Some(id) = exclude {
        query = query.filter(course_schedules::id.ne(id));
    }

    let rows: Vec<(i32, NaiveDateTime, i32)> = query.load(conn)?;
    let taken: Vec<(i32, NaiveDateTime, NaiveDateTime)> = rows
        .into_iter()
        .filter_map(|(id, other_start, hours)| rules::schedule_slot(other_start, hours).map(|(s, e)| (id, s, e)))
        .collect();

    Ok(rules::check_slot_free(start, end, &taken)?)
}

pub fn create_schedule(
    conn: &mut PgConnection,
    created_by: i32,
    form: &models::ScheduleRequest,
) -> DbResult<models::CourseSchedule> {
    conn.transaction(|conn| {
        let plan = course_plans::table
            .find(form.course_plan_id)
            .select(models::CoursePlan::as_select())
            .first(conn)
            .optional()?
            .ok_or_else(|| ServiceError::Validation(format!("Invalid course plan id: {}", form.course_plan_id)))?;

        let is_active = form.is_active.unwrap_or(true);
        if is_active {
            ensure_slot_free(conn, form.start_time, plan.duration_hours, None)?;
        }

        let new_schedule = models::NewCourseSchedule {
            course_plan_id: plan.id,
            start_time: form.start_time,
            created_by_user_id: created_by,
            created_date: now_utc(),
            available_seats: rules::seats_for_new_schedule(form.available_seats, plan.max_capacity),
            is_active,
        };

        let schedule = diesel::insert_into(course_schedules::table)
            .values(&new_schedule)
            .returning(models::CourseSchedule::as_returning())
            .get_result(conn)?;

        log::info!("Created schedule {} for plan '{}' at {}", schedule.id, plan.name, schedule.start_time);
        Ok(schedule)
    })
}

pub fn update_schedule(
    conn: &mut PgConnection,
    schedule_id: i32,
    form: &models::ScheduleRequest,
) -> DbResult<models::CourseSchedule> {
    conn.transaction(|conn| {
        // Lock so a concurrent booking cannot slip in between the count and the update
        let existing = course_schedules::table
            .find(schedule_id)
            .select(models::CourseSchedule::as_select())
            .for_update()
            .first(conn)
            .optional()?
            .ok_or_else(|| ServiceError::not_found("Course schedule"))?;

        let plan = course_plans::table
            .find(form.course_plan_id)
            .select(models::CoursePlan::as_select())
            .first(conn)
            .optional()?
            .ok_or_else(|| ServiceError::Validation(format!("Invalid course plan id: {}", form.course_plan_id)))?;

        let seats = form.available_seats.unwrap_or(existing.available_seats);
        let current_bookings = count_active_bookings(conn, schedule_id)?;
        rules::check_seat_update(seats, current_bookings)?;

        let is_active = form.is_active.unwrap_or(existing.is_active);
        if is_active {
            ensure_slot_free(conn, form.start_time, plan.duration_hours, Some(schedule_id))?;
        }

        let changes = models::CourseScheduleChangeset {
            course_plan_id: plan.id,
            start_time: form.start_time,
            available_seats: seats,
            is_active,
        };

        let updated = diesel::update(course_schedules::table.find(schedule_id))
            .set(&changes)
            .returning(models::CourseSchedule::as_returning())
            .get_result(conn)?;

        Ok(updated)
    })
}

/// Soft delete: the schedule disappears from public calendars but keeps its bookings.
pub fn deactivate_schedule(conn: &mut PgConnection, schedule_id: i32) -> DbResult<()> {
    let updated = diesel::update(course_schedules::table.find(schedule_id))
        .set(course_schedules::is_active.eq(false))
        .execute(conn)?;

    if updated == 0 {
        return Err(ServiceError::not_found("Course schedule"));
    }

    log::info!("Marked schedule {} as inactive", schedule_id);
    Ok(())
}

pub fn create_booking(
    conn: &mut PgConnection,
    user_id: i32,
    contact_email: Option<String>,
    form: &models::CreateBookingRequest,
    now: NaiveDateTime,
) -> DbResult<models::Booking> {
    conn.transaction(|conn| {
        // Lock the schedule row so the seat check and the insert are atomic
        let schedule: Option<models::CourseSchedule> = course_schedules::table
            .find(form.course_schedule_id)
            .select(models::CourseSchedule::as_select())
            .for_update()
            .first(conn)
            .optional()?;

        let booking_count = count_active_bookings(conn, form.course_schedule_id)?;
        let already_registered = is_user_registered(conn, form.course_schedule_id, user_id)?;

        rules::check_can_book(schedule.as_ref(), booking_count, already_registered, now)?;

        let new_booking = models::NewBooking {
            course_schedule_id: form.course_schedule_id,
            user_id,
            booking_time: now,
            is_cancelled: false,
            voucher_code: rules::generate_voucher_code(),
            payment_status: PaymentStatus::Pending,
            notes: rules::truncate_notes(form.notes.clone()),
            contact_email,
        };

        let booking = diesel::insert_into(course_bookings::table)
            .values(&new_booking)
            .returning(models::Booking::as_returning())
            .get_result(conn)?;

        log::info!("Created booking {} for user {} on schedule {}", booking.id, user_id, form.course_schedule_id);
        Ok(booking)
    })
}

fn into_views(rows: Vec<(models::Booking, models::CourseSchedule, models::CoursePlan)>) -> Vec<models::BookingView> {
    rows.into_iter()
        .map(|(booking, schedule, plan)| models::BookingView::new(booking, schedule, plan))
        .collect()
}

pub fn get_booking(conn: &mut PgConnection, booking_id: i32) -> DbResult<models::BookingView> {
    let row = course_bookings::table
        .inner_join(course_schedules::table.inner_join(course_plans::table))
        .filter(course_bookings::id.eq(booking_id))
        .select((
            models::Booking::as_select(),
            models::CourseSchedule::as_select(),
            models::CoursePlan::as_select(),
        ))
        .first::<(models::Booking, models::CourseSchedule, models::CoursePlan)>(conn)
        .optional()?
        .ok_or_else(|| ServiceError::not_found("Booking"))?;

    Ok(models::BookingView::new(row.0, row.1, row.2))
}

pub fn bookings_for_user(conn: &mut PgConnection, user_id: i32) -> DbResult<Vec<models::BookingView>> {
    let rows = course_bookings::table
        .inner_join(course_schedules::table.inner_join(course_plans::table))
        .filter(course_bookings::user_id.eq(user_id))
        .order(course_bookings::booking_time.desc())
        .select((
            models::Booking::as_select(),
            models::CourseSchedule::as_select(),
            models::CoursePlan::as_select(),
        ))
        .load(conn)?;

    Ok(into_views(rows))
}

pub fn bookings_for_schedule(conn: &mut PgConnection, schedule_id: i32) -> DbResult<Vec<models::BookingView>> {
    let rows = course_bookings::table
        .inner_join(course_schedules::table.inner_join(course_plans::table))
        .filter(course_bookings::course_schedule_id.eq(schedule_id))
        .order(course_bookings::booking_time.asc())
        .select((
            models::Booking::as_select(),
            models::CourseSchedule::as_select(),
            models::CoursePlan::as_select(),
        ))
        .load(conn)?;

    Ok(into_views(rows))
}

/// Bookings whose course starts inside `[from, to)`.
///
/// With `user_id` only that user's non-cancelled bookings are returned;
/// without it (admin view) cancelled bookings are included too.
pub fn bookings_in_window(
    conn: &mut PgConnection,
    from: NaiveDateTime,
    to: NaiveDateTime,
    user_id: Option<i32>,
) -> DbResult<Vec<models::BookingView>> {
    let mut query = course_bookings::table
        .inner_join(course_schedules::table.inner_join(course_plans::table))
        .filter(course_schedules::start_time.ge(from))
        .filter(course_schedules::start_time.lt(to))
        .order(course_schedules::start_time.asc())
        .select((
            models::Booking::as_select(),
            models::CourseSchedule::as_select(),
            models::CoursePlan::as_select(),
        ))
        .into_boxed();

    if let Some(uid) = user_id {
        query = query
            .filter(course_bookings::user_id.eq(uid))
            .filter(course_bookings::is_cancelled.eq(false));
    }

    Ok(into_views(query.load(conn)?))
}

/// Active bookings on schedules starting exactly at `start_time`.
pub fn bookings_starting_at(conn: &mut PgConnection, start_time: NaiveDateTime) -> DbResult<Vec<models::BookingView>> {
    let rows = course_bookings::table
        .inner_join(course_schedules::table.inner_join(course_plans::table))
        .filter(course_schedules::start_time.eq(start_time))
        .filter(course_schedules::is_active.eq(true))
        .filter(course_bookings::is_cancelled.eq(false))
        .order((course_schedules::id.asc(), course_bookings::booking_time.asc()))
        .select((
            models::Booking::as_select(),
            models::CourseSchedule::as_select(),
            models::CoursePlan::as_select(),
        ))
        .load(conn)?;

    Ok(into_views(rows))
}

pub fn cancel_booking(
    conn: &mut PgConnection,
    booking_id: i32,
    now: NaiveDateTime,
    window_hours: i64,
) -> DbResult<(models::Booking, CancelDecision)> {
    conn.transaction(|conn| {
        let (booking, start_time): (models::Booking, NaiveDateTime) = course_bookings::table
            .inner_join(course_schedules::table)
            .filter(course_bookings::id.eq(booking_id))
            .select((models::Booking::as_select(), course_schedules::start_time))
            .for_update()
            .first(conn)
            .optional()?
            .ok_or_else(|| ServiceError::not_found("Booking"))?;

        let decision = rules::check_can_cancel(booking.is_cancelled, start_time, now, window_hours)?;
        if decision == CancelDecision::AlreadyCancelled {
            return Ok((booking, decision));
        }

        let updated = diesel::update(course_bookings::table.find(booking_id))
            .set(course_bookings::is_cancelled.eq(true))
            .returning(models::Booking::as_returning())
            .get_result(conn)?;

        log::info!("Cancelled booking {}", booking_id);
        Ok((updated, decision))
    })
}

pub fn update_payment(
    conn: &mut PgConnection,
    booking_id: i32,
    status: PaymentStatus,
    reference: Option<String>,
) -> DbResult<models::Booking> {
    diesel::update(course_bookings::table.find(booking_id))
        .set((
            course_bookings::payment_status.eq(status),
            course_bookings::payment_reference.eq(reference),
        ))
        .returning(models::Booking::as_returning())
        .get_result(conn)
        .optional()?
        .ok_or_else(|| ServiceError::not_found("Booking"))
}

pub fn mark_voucher_sent(conn: &mut PgConnection, booking_id: i32, sent_at: NaiveDateTime) -> DbResult<()> {
    diesel::update(course_bookings::table.find(booking_id))
        .set(course_bookings::voucher_sent_date.eq(Some(sent_at)))
        .execute(conn)?;
    Ok(())
}

pub fn list_participants(conn: &mut PgConnection, booking_id: i32) -> DbResult<Vec<models::Participant>> {
    Ok(course_participants::table
        .filter(course_participants::booking_id.eq(booking_id))
        .order(course_participants::added_date.asc())
        .select(models::Participant::as_select())
        .load(conn)?)
}

pub fn add_participant(
    conn: &mut PgConnection,
    booking: &models::Booking,
    added_by: i32,
    form: &models::NewParticipantRequest,
) -> DbResult<models::Participant> {
    if booking.is_cancelled {
        return Err(rules::BookingRule::BookingCancelled.into());
    }

    let new_participant = models::NewParticipant {
        booking_id: booking.id,
        added_date: now_utc(),
        added_by_user_id: added_by,
        participant_name: form.participant_name.trim().to_string(),
        email: form.email.as_ref().map(|e| e.trim().to_string()).filter(|e| !e.is_empty()),
        attendance_status: AttendanceStatus::Registered,
        notes: rules::truncate_notes(form.notes.clone()),
    };

    Ok(diesel::insert_into(course_participants::table)
        .values(&new_participant)
        .returning(models::Participant::as_returning())
        .get_result(conn)?)
}

pub fn update_attendance(
    conn: &mut PgConnection,
    participant_id: i32,
    status: AttendanceStatus,
) -> DbResult<models::Participant> {
    diesel::update(course_participants::table.find(participant_id))
        .set(course_participants::attendance_status.eq(status))
        .returning(models::Participant::as_returning())
        .get_result(conn)
        .optional()?
        .ok_or_else(|| ServiceError::not_found("Participant"))
}

pub fn record_notification(conn: &mut PgConnection, notification: &models::NewNotification) -> DbResult<models::Notification> {
    Ok(diesel::insert_into(course_notifications::table)
        .values(notification)
        .returning(models::Notification::as_returning())
        .get_result(conn)?)
}

pub fn list_course_events(conn: &mut PgConnection) -> DbResult<Vec<models::CourseEvent>> {
    let products: Vec<models::CourseProduct> = course_products::table
        .order(course_products::product_name.asc())
        .select(models::CourseProduct::as_select())
        .load(conn)?;

    Ok(products.into_iter().map(models::CourseEvent::from).collect())
}
