use std::sync::LazyLock;

use actix_web::{delete, error, get, post, put, web, HttpResponse};
use chrono::Utc;
use regex::Regex;

use crate::actions;
use crate::caller::Caller;
use crate::config::AppConfig;
use crate::error::ServiceError;
use crate::models::{self, ApiResponse, AttendanceStatus, CartResponse, SuccessResponse};
use crate::queue::{NotificationQueueService, ReminderOutcome};
use crate::rules::{self, BookingRule, CancelDecision};
use crate::DbPool;

type HandlerResult = Result<HttpResponse, ServiceError>;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern should compile"));
static PRODUCT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("product id pattern should compile"));

fn month_window(query: &models::MonthQuery) -> Result<(chrono::NaiveDateTime, chrono::NaiveDateTime), ServiceError> {
    rules::month_window(query.year, query.month)
        .ok_or_else(|| ServiceError::Validation("Invalid year or month".to_string()))
}

/// Answers malformed JSON bodies with the same `{ "message" }` shape as every other error.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let detail = err.to_string();
        let response = match err {
            error::JsonPayloadError::ContentType => {
                HttpResponse::UnsupportedMediaType().body("Unsupported Media Type")
            }
            error::JsonPayloadError::Deserialize(ref err) => {
                HttpResponse::BadRequest().json(ApiResponse { message: err.to_string() })
            }
            _ => HttpResponse::BadRequest().json(ApiResponse { message: detail }),
        };
        error::InternalError::from_response(err, response).into()
    })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_plans)
        .service(get_plan)
        .service(list_schedules)
        .service(get_schedule)
        .service(create_schedule)
        .service(update_schedule)
        .service(delete_schedule)
        .service(schedule_bookings)
        .service(create_booking)
        .service(month_bookings)
        // must come before /bookings/{id}
        .service(my_bookings)
        .service(get_booking)
        .service(cancel_booking)
        .service(admin_cancel_booking)
        .service(update_payment)
        .service(list_participants)
        .service(add_participant)
        .service(update_attendance)
        .service(send_reminder)
        .service(organizers_report)
        .service(list_events)
        .service(add_to_cart);
}

#[get("/plans")]
async fn list_plans(pool: web::Data<DbPool>, caller: Option<Caller>) -> HandlerResult {
    let include_non_public = caller.map(|c| c.is_admin).unwrap_or(false);
    let plans = web::block(move || {
        let mut conn = pool.get()?;
        actions::list_course_plans(&mut conn, include_non_public)
    })
    .await??;

    Ok(HttpResponse::Ok().json(plans))
}

#[get("/plans/{id}")]
async fn get_plan(pool: web::Data<DbPool>, caller: Option<Caller>, path: web::Path<i32>) -> HandlerResult {
    let plan_id = path.into_inner();
    let plan = web::block(move || {
        let mut conn = pool.get()?;
        actions::get_course_plan(&mut conn, plan_id)
    })
    .await??;

    if !plan.is_public && !caller.map(|c| c.is_admin).unwrap_or(false) {
        return Err(ServiceError::not_found("Course plan"));
    }

    Ok(HttpResponse::Ok().json(plan))
}

#[get("/schedules")]
async fn list_schedules(
    pool: web::Data<DbPool>,
    caller: Option<Caller>,
    query: web::Query<models::MonthQuery>,
) -> HandlerResult {
    let (from, to) = month_window(&query)?;
    let include_inactive = query.include_inactive && caller.as_ref().map(|c| c.is_admin).unwrap_or(false);
    let user_id = caller.map(|c| c.user_id);

    let schedules = web::block(move || {
        let mut conn = pool.get()?;
        actions::list_schedules(&mut conn, from, to, include_inactive, user_id)
    })
    .await??;

    Ok(HttpResponse::Ok().json(schedules))
}

#[get("/schedules/{id}")]
async fn get_schedule(pool: web::Data<DbPool>, caller: Option<Caller>, path: web::Path<i32>) -> HandlerResult {
    let schedule_id = path.into_inner();
    let user_id = caller.map(|c| c.user_id);

    let schedule = web::block(move || {
        let mut conn = pool.get()?;
        actions::get_schedule(&mut conn, schedule_id, user_id)
    })
    .await??;

    Ok(HttpResponse::Ok().json(schedule))
}

#[post("/admin/schedules")]
async fn create_schedule(
    pool: web::Data<DbPool>,
    caller: Caller,
    form: web::Json<models::ScheduleRequest>,
) -> HandlerResult {
    caller.require_admin()?;

    let schedule = web::block(move || {
        let mut conn = pool.get()?;
        actions::create_schedule(&mut conn, caller.user_id, &form)
    })
    .await??;

    Ok(HttpResponse::Created().json(schedule))
}

#[put("/admin/schedules/{id}")]
async fn update_schedule(
    pool: web::Data<DbPool>,
    caller: Caller,
    path: web::Path<i32>,
    form: web::Json<models::ScheduleRequest>,
) -> HandlerResult {
    caller.require_admin()?;
    let schedule_id = path.into_inner();

    let schedule = web::block(move || {
        let mut conn = pool.get()?;
        actions::update_schedule(&mut conn, schedule_id, &form)
    })
    .await??;

    Ok(HttpResponse::Ok().json(schedule))
}

#[delete("/admin/schedules/{id}")]
async fn delete_schedule(pool: web::Data<DbPool>, caller: Caller, path: web::Path<i32>) -> HandlerResult {
    caller.require_admin()?;
    let schedule_id = path.into_inner();

    web::block(move || {
        let mut conn = pool.get()?;
        actions::deactivate_schedule(&mut conn, schedule_id)
    })
    .await??;

    Ok(HttpResponse::Ok().json(SuccessResponse { success: true, message: "Course schedule deactivated".to_string() }))
}

#[get("/admin/schedules/{id}/bookings")]
async fn schedule_bookings(pool: web::Data<DbPool>, caller: Caller, path: web::Path<i32>) -> HandlerResult {
    caller.require_admin()?;
    let schedule_id = path.into_inner();

    let bookings = web::block(move || {
        let mut conn = pool.get()?;
        actions::bookings_for_schedule(&mut conn, schedule_id)
    })
    .await??;

    Ok(HttpResponse::Ok().json(bookings))
}

#[post("/bookings")]
async fn create_booking(
    pool: web::Data<DbPool>,
    queue_service: web::Data<NotificationQueueService>,
    caller: Caller,
    form: web::Json<models::CreateBookingRequest>,
) -> HandlerResult {
    let contact_email = caller.email.filter(|e| e.chars().count() <= rules::MAX_TEXT_LEN);
    let booking = web::block(move || {
        let mut conn = pool.get()?;
        actions::create_booking(&mut conn, caller.user_id, contact_email, &form, Utc::now().naive_utc())
    })
    .await??;

    // Confirmation goes out in the background; a broker outage must not fail the booking
    let booking_id = booking.id;
    let queue_service_clone = queue_service.clone();
    tokio::spawn(async move {
        if let Err(e) = queue_service_clone.send_booking_confirmation(booking_id).await {
            log::error!("Failed to send booking confirmation for booking {}: {:?}", booking_id, e);
        }
    });

    Ok(HttpResponse::Created().json(booking))
}

#[get("/bookings")]
async fn month_bookings(
    pool: web::Data<DbPool>,
    caller: Caller,
    query: web::Query<models::MonthQuery>,
) -> HandlerResult {
    let (from, to) = month_window(&query)?;
    let user_filter = if caller.is_admin { None } else { Some(caller.user_id) };

    let bookings = web::block(move || {
        let mut conn = pool.get()?;
        actions::bookings_in_window(&mut conn, from, to, user_filter)
    })
    .await??;

    Ok(HttpResponse::Ok().json(bookings))
}

#[get("/bookings/mine")]
async fn my_bookings(pool: web::Data<DbPool>, caller: Caller) -> HandlerResult {
    let bookings = web::block(move || {
        let mut conn = pool.get()?;
        actions::bookings_for_user(&mut conn, caller.user_id)
    })
    .await??;

    Ok(HttpResponse::Ok().json(bookings))
}

#[get("/bookings/{id}")]
async fn get_booking(pool: web::Data<DbPool>, caller: Caller, path: web::Path<i32>) -> HandlerResult {
    let booking_id = path.into_inner();

    let booking = web::block(move || {
        let mut conn = pool.get()?;
        let view = actions::get_booking(&mut conn, booking_id)?;
        caller.require_owner_or_admin(view.booking.user_id, "view this booking")?;
        Ok::<_, ServiceError>(view)
    })
    .await??;

    Ok(HttpResponse::Ok().json(booking))
}

fn cancel_response(decision: CancelDecision) -> HttpResponse {
    let message = match decision {
        CancelDecision::AlreadyCancelled => "Booking was already cancelled",
        CancelDecision::Cancel => "Booking cancelled successfully",
    };
    HttpResponse::Ok().json(SuccessResponse { success: true, message: message.to_string() })
}

#[post("/bookings/{id}/cancel")]
async fn cancel_booking(
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
    caller: Caller,
    path: web::Path<i32>,
) -> HandlerResult {
    let booking_id = path.into_inner();
    let window_hours = config.cancellation_hours;

    let decision = web::block(move || {
        let mut conn = pool.get()?;
        let view = actions::get_booking(&mut conn, booking_id)?;
        caller.require_owner_or_admin(view.booking.user_id, "cancel this booking")?;
        let (_, decision) = actions::cancel_booking(&mut conn, booking_id, Utc::now().naive_utc(), window_hours)?;
        Ok::<_, ServiceError>(decision)
    })
    .await??;

    Ok(cancel_response(decision))
}

#[post("/admin/bookings/cancel")]
async fn admin_cancel_booking(
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
    caller: Caller,
    form: web::Json<models::CancelBookingRequest>,
) -> HandlerResult {
    caller.require_admin()?;
    let booking_id = form.booking_id;
    let window_hours = config.cancellation_hours;

    let (_, decision) = web::block(move || {
        let mut conn = pool.get()?;
        actions::cancel_booking(&mut conn, booking_id, Utc::now().naive_utc(), window_hours)
    })
    .await??;

    Ok(cancel_response(decision))
}

#[put("/admin/bookings/{id}/payment")]
async fn update_payment(
    pool: web::Data<DbPool>,
    caller: Caller,
    path: web::Path<i32>,
    form: web::Json<models::PaymentUpdateRequest>,
) -> HandlerResult {
    caller.require_admin()?;
    let booking_id = path.into_inner();
    let form = form.into_inner();
    let reference = form.payment_reference.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
    if reference.as_ref().is_some_and(|r| r.chars().count() > rules::MAX_TEXT_LEN) {
        return Err(ServiceError::Validation(format!("payment_reference must be at most {} characters", rules::MAX_TEXT_LEN)));
    }

    let booking = web::block(move || {
        let mut conn = pool.get()?;
        actions::update_payment(&mut conn, booking_id, form.payment_status, reference)
    })
    .await??;

    Ok(HttpResponse::Ok().json(booking))
}

#[get("/bookings/{id}/participants")]
async fn list_participants(pool: web::Data<DbPool>, caller: Caller, path: web::Path<i32>) -> HandlerResult {
    let booking_id = path.into_inner();

    let participants = web::block(move || {
        let mut conn = pool.get()?;
        let view = actions::get_booking(&mut conn, booking_id)?;
        caller.require_owner_or_admin(view.booking.user_id, "view participants of this booking")?;
        actions::list_participants(&mut conn, booking_id)
    })
    .await??;

    Ok(HttpResponse::Ok().json(participants))
}

fn validate_participant(form: &models::NewParticipantRequest) -> Result<(), ServiceError> {
    let name = form.participant_name.trim();
    if name.is_empty() {
        return Err(ServiceError::Validation("participant_name is required".to_string()));
    }
    if name.chars().count() > rules::MAX_TEXT_LEN {
        return Err(ServiceError::Validation(format!("participant_name must be at most {} characters", rules::MAX_TEXT_LEN)));
    }
    if let Some(email) = form.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
        if email.chars().count() > rules::MAX_TEXT_LEN {
            return Err(ServiceError::Validation(format!("email must be at most {} characters", rules::MAX_TEXT_LEN)));
        }
        if !EMAIL_RE.is_match(email) {
            return Err(ServiceError::Validation("email is not a valid address".to_string()));
        }
    }
    Ok(())
}

#[post("/bookings/{id}/participants")]
async fn add_participant(
    pool: web::Data<DbPool>,
    caller: Caller,
    path: web::Path<i32>,
    form: web::Json<models::NewParticipantRequest>,
) -> HandlerResult {
    validate_participant(&form)?;
    let booking_id = path.into_inner();

    let participant = web::block(move || {
        let mut conn = pool.get()?;
        let view = actions::get_booking(&mut conn, booking_id)?;
        caller.require_owner_or_admin(view.booking.user_id, "add participants to this booking")?;
        actions::add_participant(&mut conn, &view.booking, caller.user_id, &form)
    })
    .await??;

    Ok(HttpResponse::Created().json(participant))
}

#[put("/admin/participants/{id}/status")]
async fn update_attendance(
    pool: web::Data<DbPool>,
    caller: Caller,
    path: web::Path<i32>,
    form: web::Json<models::AttendanceUpdateRequest>,
) -> HandlerResult {
    caller.require_admin()?;
    let status: AttendanceStatus = form.status.parse().map_err(ServiceError::Validation)?;
    let participant_id = path.into_inner();

    let participant = web::block(move || {
        let mut conn = pool.get()?;
        actions::update_attendance(&mut conn, participant_id, status)
    })
    .await??;

    Ok(HttpResponse::Ok().json(participant))
}

#[post("/admin/bookings/{id}/reminder")]
async fn send_reminder(
    pool: web::Data<DbPool>,
    queue_service: web::Data<NotificationQueueService>,
    caller: Caller,
    path: web::Path<i32>,
    form: web::Json<models::ReminderRequest>,
) -> HandlerResult {
    caller.require_admin()?;
    if !(0..=rules::MAX_WINDOW_HOURS).contains(&form.hours_before_course) {
        return Err(ServiceError::Validation(format!(
            "hours_before_course must be between 0 and {}",
            rules::MAX_WINDOW_HOURS
        )));
    }
    let booking_id = path.into_inner();

    let view = web::block(move || {
        let mut conn = pool.get()?;
        actions::get_booking(&mut conn, booking_id)
    })
    .await??;

    if view.booking.is_cancelled {
        return Err(BookingRule::BookingCancelled.into());
    }
    if view.schedule.start_time <= Utc::now().naive_utc() {
        return Err(BookingRule::CourseStarted.into());
    }

    let outcome = queue_service.schedule_course_reminder(booking_id, form.hours_before_course).await;
    if let Err(e) = &outcome {
        log::error!("Failed to queue reminder for booking {}: {:?}", booking_id, e);
    }

    Ok(HttpResponse::Ok().json(reminder_response(outcome.ok())))
}

fn reminder_response(outcome: Option<ReminderOutcome>) -> SuccessResponse {
    let (success, message) = match outcome {
        Some(ReminderOutcome::Sent) => (true, "Reminder sent".to_string()),
        Some(ReminderOutcome::Scheduled { remind_at }) => (true, format!("Reminder scheduled for {}", remind_at)),
        Some(ReminderOutcome::NotDelivered) => (false, "Reminder could not be delivered".to_string()),
        None => (false, "Reminder could not be queued".to_string()),
    };
    SuccessResponse { success, message }
}

#[post("/admin/reports")]
async fn organizers_report(
    queue_service: web::Data<NotificationQueueService>,
    config: web::Data<AppConfig>,
    caller: Caller,
    form: web::Json<models::OrganizersReportRequest>,
) -> HandlerResult {
    caller.require_admin()?;
    let report_type = form.report_type.trim();
    if report_type.is_empty() {
        return Err(ServiceError::Validation("report_type is required".to_string()));
    }
    if config.organizer_emails.is_empty() {
        return Err(ServiceError::Validation("No organizer e-mail addresses are configured".to_string()));
    }

    let response = match queue_service
        .send_organizers_report(&config.organizer_emails, form.course_start_time, report_type)
        .await
    {
        Ok((delivered, count)) => SuccessResponse {
            success: delivered,
            message: format!("{} report with {} bookings {}", report_type, count, if delivered { "sent" } else { "not delivered" }),
        },
        Err(e) => {
            log::error!("Failed to build {} report for {}: {:?}", report_type, form.course_start_time, e);
            SuccessResponse { success: false, message: "Report could not be sent".to_string() }
        }
    };

    Ok(HttpResponse::Ok().json(response))
}

#[get("/events")]
async fn list_events(pool: web::Data<DbPool>) -> HandlerResult {
    let events = web::block(move || {
        let mut conn = pool.get()?;
        actions::list_course_events(&mut conn)
    })
    .await??;

    Ok(HttpResponse::Ok().json(events))
}

#[post("/events/{product_id}/cart")]
async fn add_to_cart(config: web::Data<AppConfig>, _caller: Caller, path: web::Path<String>) -> HandlerResult {
    let product_id = path.into_inner();
    if !PRODUCT_ID_RE.is_match(&product_id) {
        return Err(ServiceError::Validation("Invalid product id".to_string()));
    }

    Ok(HttpResponse::Ok().json(CartResponse {
        success: true,
        cart_url: format!("{}?ProductId={}&Quantity=1", config.cart_url_base, product_id),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caller::{USER_ID_HEADER, USER_ROLES_HEADER};
    use actix_web::{http::StatusCode, test, App};
    use diesel::{r2d2::ConnectionManager, PgConnection};

    fn test_config() -> AppConfig {
        AppConfig::from_lookup(|key| match key {
            "DATABASE_URL" => Some("postgres://invalid".to_string()),
            _ => None,
        })
        .unwrap()
    }

    // Never connects; handlers that reach the database would fail, so tests stop before that point
    fn unchecked_pool() -> DbPool {
        r2d2::Pool::builder()
            .max_size(1)
            .build_unchecked(ConnectionManager::<PgConnection>::new("postgres://invalid"))
    }

    macro_rules! test_app {
        () => {{
            let config = test_config();
            let pool = unchecked_pool();
            let queue_service = NotificationQueueService::new(pool.clone(), config.amqp.clone());
            test::init_service(
                App::new()
                    .app_data(web::Data::new(pool))
                    .app_data(web::Data::new(queue_service))
                    .app_data(web::Data::new(config))
                    .app_data(json_config())
                    .configure(configure),
            )
            .await
        }};
    }

    async fn message_of(resp: actix_web::dev::ServiceResponse) -> String {
        let body: ApiResponse = test::read_body_json(resp).await;
        body.message
    }

    #[actix_web::test]
    async fn invalid_month_is_rejected() {
        let app = test_app!();

        let req = test::TestRequest::get().uri("/schedules?year=2025&month=13").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(message_of(resp).await, "Invalid year or month");

        let req = test::TestRequest::get().uri("/schedules?year=1800&month=1").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn booking_requires_identity() {
        let app = test_app!();

        let req = test::TestRequest::post()
            .uri("/bookings")
            .set_json(serde_json::json!({ "course_schedule_id": 1 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(message_of(resp).await, "You must be logged in");
    }

    #[actix_web::test]
    async fn admin_routes_reject_plain_users() {
        let app = test_app!();

        let req = test::TestRequest::delete()
            .uri("/admin/schedules/3")
            .insert_header((USER_ID_HEADER, "9"))
            .insert_header((USER_ROLES_HEADER, "Registered Users"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(message_of(resp).await, "Administrator access required");
    }

    #[actix_web::test]
    async fn unknown_attendance_status_is_rejected() {
        let app = test_app!();

        let req = test::TestRequest::put()
            .uri("/admin/participants/4/status")
            .insert_header((USER_ID_HEADER, "1"))
            .insert_header((USER_ROLES_HEADER, "Administrators"))
            .set_json(serde_json::json!({ "status": "Maybe" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(message_of(resp).await, "Unknown attendance status 'maybe'");
    }

    #[actix_web::test]
    async fn negative_reminder_offset_is_rejected() {
        let app = test_app!();

        let req = test::TestRequest::post()
            .uri("/admin/bookings/4/reminder")
            .insert_header((USER_ID_HEADER, "1"))
            .insert_header((USER_ROLES_HEADER, "SuperUser"))
            .set_json(serde_json::json!({ "hours_before_course": -2 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn reminder_offset_beyond_a_year_is_rejected() {
        let app = test_app!();

        let req = test::TestRequest::post()
            .uri("/admin/bookings/4/reminder")
            .insert_header((USER_ID_HEADER, "1"))
            .insert_header((USER_ROLES_HEADER, "Administrators"))
            .set_json(serde_json::json!({ "hours_before_course": 10_000_000_000i64 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(message_of(resp).await, "hours_before_course must be between 0 and 8784");
    }

    #[::core::prelude::v1::test]
    fn reminder_response_reflects_delivery() {
        let sent = reminder_response(Some(ReminderOutcome::Sent));
        assert!(sent.success);
        assert_eq!(sent.message, "Reminder sent");

        let undelivered = reminder_response(Some(ReminderOutcome::NotDelivered));
        assert!(!undelivered.success);
        assert_eq!(undelivered.message, "Reminder could not be delivered");

        let remind_at = chrono::NaiveDate::from_ymd_opt(2025, 5, 9).unwrap().and_hms_opt(9, 0, 0).unwrap();
        let scheduled = reminder_response(Some(ReminderOutcome::Scheduled { remind_at }));
        assert!(scheduled.success);
        assert_eq!(scheduled.message, "Reminder scheduled for 2025-05-09 09:00:00");

        assert!(!reminder_response(None).success);
    }

    #[actix_web::test]
    async fn report_needs_configured_recipients() {
        let app = test_app!();

        let req = test::TestRequest::post()
            .uri("/admin/reports")
            .insert_header((USER_ID_HEADER, "1"))
            .insert_header((USER_ROLES_HEADER, "Administrators"))
            .set_json(serde_json::json!({ "course_start_time": "2025-05-10T09:00:00", "report_type": "Participants" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(message_of(resp).await, "No organizer e-mail addresses are configured");
    }

    #[actix_web::test]
    async fn participant_fields_are_validated() {
        let app = test_app!();

        for body in [
            serde_json::json!({ "participant_name": "   " }),
            serde_json::json!({ "participant_name": "Anna", "email": "not-an-address" }),
            serde_json::json!({ "participant_name": "A".repeat(256) }),
            serde_json::json!({ "participant_name": "Anna", "email": format!("{}@example.com", "a".repeat(250)) }),
        ] {
            let req = test::TestRequest::post()
                .uri("/bookings/5/participants")
                .insert_header((USER_ID_HEADER, "3"))
                .set_json(body)
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[actix_web::test]
    async fn overlong_participant_name_is_a_bad_request() {
        let app = test_app!();

        let req = test::TestRequest::post()
            .uri("/bookings/5/participants")
            .insert_header((USER_ID_HEADER, "3"))
            .set_json(serde_json::json!({ "participant_name": "é".repeat(256) }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(message_of(resp).await, "participant_name must be at most 255 characters");
    }

    #[actix_web::test]
    async fn overlong_payment_reference_is_a_bad_request() {
        let app = test_app!();

        let req = test::TestRequest::put()
            .uri("/admin/bookings/5/payment")
            .insert_header((USER_ID_HEADER, "1"))
            .insert_header((USER_ROLES_HEADER, "Administrators"))
            .set_json(serde_json::json!({ "payment_status": "Paid", "payment_reference": "R".repeat(256) }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(message_of(resp).await, "payment_reference must be at most 255 characters");
    }

    #[actix_web::test]
    async fn malformed_json_gets_a_message() {
        let app = test_app!();

        let req = test::TestRequest::post()
            .uri("/bookings")
            .insert_header((USER_ID_HEADER, "3"))
            .insert_header(("content-type", "application/json"))
            .set_payload("{\"course_schedule_id\": \"x\"}")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn cart_url_points_at_the_product() {
        let app = test_app!();

        let req = test::TestRequest::post()
            .uri("/events/1234/cart")
            .insert_header((USER_ID_HEADER, "3"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["cart_url"], "/AddToCart.aspx?ProductId=1234&Quantity=1");
    }

    #[actix_web::test]
    async fn cart_rejects_odd_product_ids() {
        let app = test_app!();

        let req = test::TestRequest::post()
            .uri("/events/a%20b/cart")
            .insert_header((USER_ID_HEADER, "3"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
