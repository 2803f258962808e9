use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use crate::schema::{course_bookings, course_notifications, course_participants, course_plans, course_products, course_schedules};
use chrono::{Duration, NaiveDateTime};
use diesel::{deserialize::{self, FromSql}, pg::{Pg, PgValue}, serialize::{self, Output, ToSql}, sql_types::Text, AsChangeset, Insertable, Selectable};

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = course_plans)]
pub struct CoursePlan {
    pub id: i32,
    pub name: String,
    pub duration_hours: i32,
    pub description: Option<String>,
    pub max_capacity: i32,
    pub price_cents: i64,
    pub is_public: bool,
    pub prerequisite_ids: Option<String>,
    pub course_category: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = course_schedules)]
pub struct CourseSchedule {
    pub id: i32,
    pub course_plan_id: i32,
    pub start_time: NaiveDateTime,
    pub created_by_user_id: i32,
    pub created_date: NaiveDateTime,
    pub available_seats: i32,
    pub is_active: bool,
}

impl CourseSchedule {
    pub fn end_time(&self, plan: &CoursePlan) -> NaiveDateTime {
        self.start_time + Duration::hours(plan.duration_hours as i64)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = course_schedules)]
pub struct NewCourseSchedule {
    pub course_plan_id: i32,
    pub start_time: NaiveDateTime,
    pub created_by_user_id: i32,
    pub created_date: NaiveDateTime,
    pub available_seats: i32,
    pub is_active: bool,
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = course_schedules)]
pub struct CourseScheduleChangeset {
    pub course_plan_id: i32,
    pub start_time: NaiveDateTime,
    pub available_seats: i32,
    pub is_active: bool,
}

/// Calendar row: a schedule joined with its plan and seat accounting.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleView {
    pub id: i32,
    pub course_plan_id: i32,
    pub course_plan_name: String,
    pub course_plan_category: Option<String>,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub available_seats: i32,
    pub is_active: bool,
    pub booking_count: i64,
    pub remaining_seats: i64,
    pub is_user_registered: bool,
}

impl ScheduleView {
    pub fn new(schedule: &CourseSchedule, plan: &CoursePlan, booking_count: i64, is_user_registered: bool) -> Self {
        Self {
            id: schedule.id,
            course_plan_id: schedule.course_plan_id,
            course_plan_name: plan.name.clone(),
            course_plan_category: plan.course_category.clone(),
            start_time: schedule.start_time,
            end_time: schedule.end_time(plan),
            available_seats: schedule.available_seats,
            is_active: schedule.is_active,
            booking_count,
            remaining_seats: crate::rules::remaining_seats(schedule.available_seats, booking_count),
            is_user_registered,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = crate::schema::sql_types::PaymentStatus)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
}

impl ToSql<crate::schema::sql_types::PaymentStatus, Pg> for PaymentStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let s = match *self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Refunded => "REFUNDED",
        };
        <str as ToSql<Text, Pg>>::to_sql(s, out)
    }
}

impl FromSql<crate::schema::sql_types::PaymentStatus, Pg> for PaymentStatus {
    fn from_sql(bytes: PgValue) -> deserialize::Result<Self> {
        match <String as FromSql<Text, Pg>>::from_sql(bytes)?.as_str() {
            "PENDING" => Ok(PaymentStatus::Pending),
            "PAID" => Ok(PaymentStatus::Paid),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            s => Err(format!("Unrecognized payment status: {}", s).into()),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = course_bookings)]
pub struct Booking {
    pub id: i32,
    pub course_schedule_id: i32,
    pub user_id: i32,
    pub booking_time: NaiveDateTime,
    pub is_cancelled: bool,
    pub voucher_code: String,
    pub voucher_sent_date: Option<NaiveDateTime>,
    pub payment_status: PaymentStatus,
    pub payment_reference: Option<String>,
    pub notes: Option<String>,
    pub contact_email: Option<String>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = course_bookings)]
pub struct NewBooking {
    pub course_schedule_id: i32,
    pub user_id: i32,
    pub booking_time: NaiveDateTime,
    pub is_cancelled: bool,
    pub voucher_code: String,
    pub payment_status: PaymentStatus,
    pub notes: Option<String>,
    pub contact_email: Option<String>,
}

/// A booking with the schedule and plan it refers to.
#[derive(Debug, Clone, Serialize)]
pub struct BookingView {
    #[serde(flatten)]
    pub booking: Booking,
    pub schedule: CourseSchedule,
    pub course_plan: CoursePlan,
    pub end_time: NaiveDateTime,
}

impl BookingView {
    pub fn new(booking: Booking, schedule: CourseSchedule, course_plan: CoursePlan) -> Self {
        let end_time = schedule.end_time(&course_plan);
        Self { booking, schedule, course_plan, end_time }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = crate::schema::sql_types::AttendanceStatus)]
pub enum AttendanceStatus {
    Registered,
    Attended,
    NoShow,
    Excused,
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttendanceStatus::Registered => "Registered",
            AttendanceStatus::Attended => "Attended",
            AttendanceStatus::NoShow => "NoShow",
            AttendanceStatus::Excused => "Excused",
        };
        f.write_str(s)
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "registered" => Ok(AttendanceStatus::Registered),
            "attended" => Ok(AttendanceStatus::Attended),
            "noshow" | "no_show" | "no-show" => Ok(AttendanceStatus::NoShow),
            "excused" => Ok(AttendanceStatus::Excused),
            other => Err(format!("Unknown attendance status '{}'", other)),
        }
    }
}

impl ToSql<crate::schema::sql_types::AttendanceStatus, Pg> for AttendanceStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let s = match *self {
            AttendanceStatus::Registered => "REGISTERED",
            AttendanceStatus::Attended => "ATTENDED",
            AttendanceStatus::NoShow => "NO_SHOW",
            AttendanceStatus::Excused => "EXCUSED",
        };
        <str as ToSql<Text, Pg>>::to_sql(s, out)
    }
}

impl FromSql<crate::schema::sql_types::AttendanceStatus, Pg> for AttendanceStatus {
    fn from_sql(bytes: PgValue) -> deserialize::Result<Self> {
        match <String as FromSql<Text, Pg>>::from_sql(bytes)?.as_str() {
            "REGISTERED" => Ok(AttendanceStatus::Registered),
            "ATTENDED" => Ok(AttendanceStatus::Attended),
            "NO_SHOW" => Ok(AttendanceStatus::NoShow),
            "EXCUSED" => Ok(AttendanceStatus::Excused),
            s => Err(format!("Unrecognized attendance status: {}", s).into()),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = course_participants)]
pub struct Participant {
    pub id: i32,
    pub booking_id: i32,
    pub added_date: NaiveDateTime,
    pub added_by_user_id: i32,
    pub participant_name: String,
    pub email: Option<String>,
    pub attendance_status: AttendanceStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = course_participants)]
pub struct NewParticipant {
    pub booking_id: i32,
    pub added_date: NaiveDateTime,
    pub added_by_user_id: i32,
    pub participant_name: String,
    pub email: Option<String>,
    pub attendance_status: AttendanceStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = crate::schema::sql_types::NotificationType)]
pub enum NotificationType {
    BookingConfirmation,
    CourseReminder,
    OrganizersReport,
}

impl NotificationType {
    pub fn template(&self) -> &'static str {
        match self {
            NotificationType::BookingConfirmation => "booking-confirmation",
            NotificationType::CourseReminder => "course-reminder",
            NotificationType::OrganizersReport => "organizers-report",
        }
    }
}

impl ToSql<crate::schema::sql_types::NotificationType, Pg> for NotificationType {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let s = match *self {
            NotificationType::BookingConfirmation => "BOOKING_CONFIRMATION",
            NotificationType::CourseReminder => "COURSE_REMINDER",
            NotificationType::OrganizersReport => "ORGANIZERS_REPORT",
        };
        <str as ToSql<Text, Pg>>::to_sql(s, out)
    }
}

impl FromSql<crate::schema::sql_types::NotificationType, Pg> for NotificationType {
    fn from_sql(bytes: PgValue) -> deserialize::Result<Self> {
        match <String as FromSql<Text, Pg>>::from_sql(bytes)?.as_str() {
            "BOOKING_CONFIRMATION" => Ok(NotificationType::BookingConfirmation),
            "COURSE_REMINDER" => Ok(NotificationType::CourseReminder),
            "ORGANIZERS_REPORT" => Ok(NotificationType::OrganizersReport),
            s => Err(format!("Unrecognized notification type: {}", s).into()),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = course_notifications)]
pub struct Notification {
    pub id: i32,
    pub booking_id: Option<i32>,
    pub notification_type: NotificationType,
    pub recipients: String,
    pub sent_date: NaiveDateTime,
    pub template_used: String,
    pub is_delivery_successful: bool,
    pub error_log: Option<String>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = course_notifications)]
pub struct NewNotification {
    pub booking_id: Option<i32>,
    pub notification_type: NotificationType,
    pub recipients: String,
    pub sent_date: NaiveDateTime,
    pub template_used: String,
    pub is_delivery_successful: bool,
    pub error_log: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = course_products)]
pub struct CourseProduct {
    pub product_id: String,
    pub product_name: String,
    pub sku: String,
    pub site_price_cents: i64,
    pub inventory_count: i32,
    pub product_link: String,
}

/// A shop product whose SKU encodes when the course runs.
#[derive(Debug, Clone, Serialize)]
pub struct CourseEvent {
    pub product_id: String,
    pub product_name: String,
    pub sku: String,
    pub site_price_cents: i64,
    pub inventory_count: i32,
    pub product_link: String,
    pub start_date: Option<NaiveDateTime>,
    pub duration_hours: Option<u32>,
}

impl From<CourseProduct> for CourseEvent {
    fn from(product: CourseProduct) -> Self {
        let parsed = crate::sku::parse_sku(&product.sku);
        Self {
            product_id: product.product_id,
            product_name: product.product_name,
            sku: product.sku,
            site_price_cents: product.site_price_cents,
            inventory_count: product.inventory_count,
            product_link: product.product_link,
            start_date: parsed.start,
            duration_hours: parsed.duration_hours,
        }
    }
}

// Request/Response models for API
#[derive(Debug, Clone, Deserialize)]
pub struct MonthQuery {
    pub year: i32,
    pub month: u32,
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleRequest {
    pub course_plan_id: i32,
    pub start_time: NaiveDateTime,
    pub available_seats: Option<i32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBookingRequest {
    pub course_schedule_id: i32,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelBookingRequest {
    pub booking_id: i32,
}

#[derive(Debug, Deserialize)]
pub struct PaymentUpdateRequest {
    pub payment_status: PaymentStatus,
    pub payment_reference: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewParticipantRequest {
    pub participant_name: String,
    pub email: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AttendanceUpdateRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ReminderRequest {
    pub hours_before_course: i64,
}

#[derive(Debug, Deserialize)]
pub struct OrganizersReportRequest {
    pub course_start_time: NaiveDateTime,
    pub report_type: String,
}

#[derive(Debug, Serialize)]
pub struct CartResponse {
    pub success: bool,
    pub cart_url: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub message: String,
}
