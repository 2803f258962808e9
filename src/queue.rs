use amqprs::{
    callbacks::{DefaultChannelCallback, DefaultConnectionCallback},
    channel::{BasicAckArguments, BasicConsumeArguments, BasicNackArguments, BasicPublishArguments, Channel, ExchangeDeclareArguments, QueueBindArguments, QueueDeclareArguments},
    connection::{Connection, OpenConnectionArguments},
    consumer::AsyncConsumer,
    BasicProperties,
    Deliver,
    FieldTable,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use chrono::{Duration, NaiveDateTime, Utc};
use log::{error, info, warn};
use uuid::Uuid;
use crate::actions;
use crate::config::AmqpConfig;
use crate::models::{BookingView, NewNotification, NotificationType};
use crate::DbPool;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

const NOTIFICATION_EXCHANGE: &str = "course.notifications";
const OUTBOUND_QUEUE: &str = "notifications.outbound";
const OUTBOUND_ROUTING_KEY: &str = "outbound";
const REMINDER_QUEUE: &str = "course.reminders";
const REMINDER_TIMER_QUEUE: &str = "course.reminder.timer";

/// Message handed to the external mailer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundNotification {
    pub notification_type: NotificationType,
    pub template: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub payload: serde_json::Value,
}

// Parked on the timer queue until its TTL runs out, then dead-lettered to the reminder queue
#[derive(Debug, Serialize, Deserialize)]
struct ReminderMessage {
    booking_id: i32,
    remind_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderSchedule {
    /// Reminder goes out now.
    Immediate,
    /// Reminder is parked until `remind_at`.
    Delayed { remind_at: NaiveDateTime, delay_ms: i64 },
}

/// What happened to a reminder request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderOutcome {
    Sent,
    NotDelivered,
    Scheduled { remind_at: NaiveDateTime },
}

/// When a reminder `hours_before` the course start should fire, seen from `now`.
///
/// An offset reaching past the representable calendar lands before `now`,
/// so it is sent immediately.
pub fn plan_reminder(start_time: NaiveDateTime, hours_before: i64, now: NaiveDateTime) -> ReminderSchedule {
    let remind_at = Duration::try_hours(hours_before).and_then(|offset| start_time.checked_sub_signed(offset));
    match remind_at {
        Some(remind_at) if remind_at > now => ReminderSchedule::Delayed {
            remind_at,
            delay_ms: (remind_at - now).num_milliseconds(),
        },
        _ => ReminderSchedule::Immediate,
    }
}

pub fn booking_confirmation(view: &BookingView) -> OutboundNotification {
    booking_notification(NotificationType::BookingConfirmation, format!("Booking confirmed: {}", view.course_plan.name), view)
}

pub fn course_reminder(view: &BookingView) -> OutboundNotification {
    booking_notification(NotificationType::CourseReminder, format!("Reminder: {} starts soon", view.course_plan.name), view)
}

fn booking_notification(kind: NotificationType, subject: String, view: &BookingView) -> OutboundNotification {
    OutboundNotification {
        notification_type: kind,
        template: kind.template().to_string(),
        recipients: view.booking.contact_email.iter().cloned().collect(),
        subject,
        payload: serde_json::json!({
            "booking_id": view.booking.id,
            "voucher_code": view.booking.voucher_code,
            "course_name": view.course_plan.name,
            "start_time": view.schedule.start_time,
            "end_time": view.end_time,
            "payment_status": view.booking.payment_status,
        }),
    }
}

pub fn organizers_report(
    recipients: &[String],
    course_start_time: NaiveDateTime,
    report_type: &str,
    bookings: &[BookingView],
) -> OutboundNotification {
    let rows: Vec<serde_json::Value> = bookings
        .iter()
        .map(|v| {
            serde_json::json!({
                "booking_id": v.booking.id,
                "schedule_id": v.schedule.id,
                "course_name": v.course_plan.name,
                "user_id": v.booking.user_id,
                "contact_email": v.booking.contact_email,
                "voucher_code": v.booking.voucher_code,
                "payment_status": v.booking.payment_status,
                "notes": v.booking.notes,
            })
        })
        .collect();

    OutboundNotification {
        notification_type: NotificationType::OrganizersReport,
        template: NotificationType::OrganizersReport.template().to_string(),
        recipients: recipients.to_vec(),
        subject: format!("{} report for courses starting {}", report_type, course_start_time),
        payload: serde_json::json!({
            "report_type": report_type,
            "course_start_time": course_start_time,
            "booking_count": rows.len(),
            "bookings": rows,
        }),
    }
}

fn record_attempt(
    db_pool: &DbPool,
    booking_id: Option<i32>,
    notification: &OutboundNotification,
    outcome: &Result<()>,
) {
    let record = NewNotification {
        booking_id,
        notification_type: notification.notification_type,
        recipients: notification.recipients.join(","),
        sent_date: Utc::now().naive_utc(),
        template_used: notification.template.clone(),
        is_delivery_successful: outcome.is_ok(),
        error_log: outcome.as_ref().err().map(|e| e.to_string()),
    };

    let result = db_pool
        .get()
        .map_err(crate::error::ServiceError::from)
        .and_then(|mut conn| actions::record_notification(&mut conn, &record));

    if let Err(e) = result {
        error!("Failed to record {:?} notification for booking {:?}: {:?}", notification.notification_type, booking_id, e);
    }
}

// Consumer for reminders whose timer has expired
struct ReminderConsumer {
    service: NotificationQueueService,
}

#[async_trait::async_trait]
impl AsyncConsumer for ReminderConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let message = match serde_json::from_slice::<ReminderMessage>(&content) {
            Ok(message) => message,
            Err(e) => {
                error!("Error deserializing reminder message: {:?}", e);
                // Malformed, do not requeue
                if let Err(e) = channel.basic_nack(BasicNackArguments::new(deliver.delivery_tag(), false, false)).await {
                    error!("Error rejecting message: {:?}", e);
                }
                return;
            }
        };

        match self.service.deliver_reminder(message.booking_id).await {
            Ok(()) => {
                if let Err(e) = channel.basic_ack(BasicAckArguments::new(deliver.delivery_tag(), false)).await {
                    error!("Error acknowledging message: {:?}", e);
                }
            }
            Err(e) => {
                error!("Failed to process reminder for booking {}: {:?}", message.booking_id, e);
                if let Err(e) = channel.basic_nack(BasicNackArguments::new(deliver.delivery_tag(), false, true)).await {
                    error!("Error rejecting message: {:?}", e);
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct NotificationQueueService {
    db_pool: DbPool,
    amqp: AmqpConfig,
    connection: Option<Arc<Connection>>,
}

impl NotificationQueueService {
    pub fn new(db_pool: DbPool, amqp: AmqpConfig) -> Self {
        Self {
            db_pool,
            amqp,
            connection: None,
        }
    }

    pub async fn initialize(&mut self) -> Result<()> {
        info!("Connecting to RabbitMQ at {}:{}", self.amqp.host, self.amqp.port);

        let connection = Connection::open(&OpenConnectionArguments::new(
            &self.amqp.host,
            self.amqp.port,
            &self.amqp.user,
            &self.amqp.password,
        )).await?;

        connection
            .register_callback(DefaultConnectionCallback)
            .await?;

        let setup_channel = connection.open_channel(None).await?;
        setup_channel
            .register_callback(DefaultChannelCallback)
            .await?;

        setup_channel
            .exchange_declare(
                ExchangeDeclareArguments::new(NOTIFICATION_EXCHANGE, "direct")
                    .durable(true)
                    .finish(),
            )
            .await?;

        setup_channel
            .queue_declare(
                QueueDeclareArguments::new(OUTBOUND_QUEUE)
                    .durable(true)
                    .finish(),
            )
            .await?;

        setup_channel
            .queue_bind(
                QueueBindArguments::new(OUTBOUND_QUEUE, NOTIFICATION_EXCHANGE, OUTBOUND_ROUTING_KEY)
                    .finish(),
            )
            .await?;

        setup_channel
            .queue_declare(
                QueueDeclareArguments::new(REMINDER_QUEUE)
                    .durable(true)
                    .finish(),
            )
            .await?;

        // Expired timer messages are routed through the default exchange to the reminder queue
        let mut args = FieldTable::new();
        args.insert(
            "x-dead-letter-exchange".try_into()?,
            "".into()
        );
        args.insert(
            "x-dead-letter-routing-key".try_into()?,
            REMINDER_QUEUE.into()
        );

        setup_channel
            .queue_declare(
                QueueDeclareArguments::new(REMINDER_TIMER_QUEUE)
                    .durable(true)
                    .arguments(args)
                    .finish(),
            )
            .await?;

        self.connection = Some(Arc::new(connection));

        let _ = setup_channel.close().await;

        info!("Connected to RabbitMQ and declared notification queues");

        Ok(())
    }

    async fn get_fresh_channel(&self) -> Result<Channel> {
        if let Some(connection) = &self.connection {
            let channel = connection.open_channel(None).await?;
            channel.register_callback(DefaultChannelCallback).await?;
            Ok(channel)
        } else {
            Err("RabbitMQ connection not initialized".into())
        }
    }

    // Retries once with backoff; the last error is handed back so the caller can record it
    async fn safe_queue_operation<F, Fut>(&self, operation: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let max_retries = 2;
        let mut delay_ms = 25;

        for attempt in 1..=max_retries {
            match operation().await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    if attempt < max_retries {
                        warn!("Queue operation failed (attempt {}/{}), retrying: {:?}", attempt, max_retries, e);
                        tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                        delay_ms *= 2;
                    } else {
                        error!("Queue operation failed after {} attempts, giving up: {:?}", max_retries, e);
                        return Err(e);
                    }
                }
            }
        }

        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, content: Vec<u8>, expiration_ms: Option<i64>) -> Result<()> {
        let operation = || {
            let content = content.clone();
            async move {
                let channel = self.get_fresh_channel().await?;

                let mut properties = BasicProperties::default();
                properties.with_delivery_mode(2); // persistent
                if let Some(ttl) = expiration_ms {
                    properties.with_expiration(&ttl.max(1).to_string());
                }

                let args = BasicPublishArguments::new(exchange, routing_key);
                channel.basic_publish(properties.finish(), content, args).await?;

                let _ = channel.close().await;
                Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
            }
        };

        self.safe_queue_operation(operation).await
    }

    /// Publishes to the outbound queue and records the attempt.
    async fn dispatch(&self, booking_id: Option<i32>, notification: &OutboundNotification) -> bool {
        let outcome: Result<()> = if notification.recipients.is_empty() {
            Err("no recipient address".into())
        } else {
            match serde_json::to_vec(notification) {
                Ok(content) => self.publish(NOTIFICATION_EXCHANGE, OUTBOUND_ROUTING_KEY, content, None).await,
                Err(e) => Err(e.into()),
            }
        };

        if let Err(e) = &outcome {
            warn!("{:?} for booking {:?} not delivered: {}", notification.notification_type, booking_id, e);
        }

        let delivered = outcome.is_ok();
        let db_pool = self.db_pool.clone();
        let notification = notification.clone();
        let recorded = tokio::task::spawn_blocking(move || record_attempt(&db_pool, booking_id, &notification, &outcome)).await;
        if let Err(e) = recorded {
            error!("Notification bookkeeping task failed: {:?}", e);
        }
        delivered
    }

    async fn load_booking(&self, booking_id: i32) -> Result<BookingView> {
        let db_pool = self.db_pool.clone();
        let view = tokio::task::spawn_blocking(move || {
            let mut conn = db_pool.get()?;
            actions::get_booking(&mut conn, booking_id)
        })
        .await??;
        Ok(view)
    }

    pub async fn send_booking_confirmation(&self, booking_id: i32) -> Result<bool> {
        let view = self.load_booking(booking_id).await?;
        let delivered = self.dispatch(Some(booking_id), &booking_confirmation(&view)).await;

        if delivered {
            let db_pool = self.db_pool.clone();
            tokio::task::spawn_blocking(move || {
                let mut conn = db_pool.get()?;
                actions::mark_voucher_sent(&mut conn, booking_id, Utc::now().naive_utc())
            })
            .await??;
            info!("Sent booking confirmation with voucher for booking {}", booking_id);
        }

        Ok(delivered)
    }

    /// Parks a reminder until `hours_before` the course start, or sends it now when that moment has passed.
    pub async fn schedule_course_reminder(&self, booking_id: i32, hours_before: i64) -> Result<ReminderOutcome> {
        let view = self.load_booking(booking_id).await?;
        let now = Utc::now().naive_utc();

        if view.booking.is_cancelled {
            return Err(format!("Booking {} is cancelled", booking_id).into());
        }
        if view.schedule.start_time <= now {
            return Err(format!("Course for booking {} has already started", booking_id).into());
        }

        match plan_reminder(view.schedule.start_time, hours_before, now) {
            ReminderSchedule::Immediate => {
                if self.dispatch(Some(booking_id), &course_reminder(&view)).await {
                    Ok(ReminderOutcome::Sent)
                } else {
                    Ok(ReminderOutcome::NotDelivered)
                }
            }
            ReminderSchedule::Delayed { remind_at, delay_ms } => {
                let message = ReminderMessage { booking_id, remind_at };
                let content = serde_json::to_vec(&message)?;
                if let Err(e) = self.publish("", REMINDER_TIMER_QUEUE, content, Some(delay_ms)).await {
                    let failed: Result<()> = Err(e.to_string().into());
                    let db_pool = self.db_pool.clone();
                    let notification = course_reminder(&view);
                    tokio::task::spawn_blocking(move || record_attempt(&db_pool, Some(booking_id), &notification, &failed)).await?;
                    return Err(e);
                }
                info!("Parked reminder for booking {} until {} ({} ms)", booking_id, remind_at, delay_ms);
                Ok(ReminderOutcome::Scheduled { remind_at })
            }
        }
    }

    // Called when a parked reminder comes due
    async fn deliver_reminder(&self, booking_id: i32) -> Result<()> {
        let view = match self.load_booking(booking_id).await {
            Ok(view) => view,
            Err(e) => {
                warn!("Dropping reminder for booking {}: {}", booking_id, e);
                return Ok(());
            }
        };

        let now = Utc::now().naive_utc();
        if view.booking.is_cancelled || view.schedule.start_time <= now {
            info!("Skipping reminder for booking {}: cancelled or already started", booking_id);
            return Ok(());
        }

        self.dispatch(Some(booking_id), &course_reminder(&view)).await;
        Ok(())
    }

    pub async fn send_organizers_report(
        &self,
        recipients: &[String],
        course_start_time: NaiveDateTime,
        report_type: &str,
    ) -> Result<(bool, usize)> {
        let db_pool = self.db_pool.clone();
        let bookings = tokio::task::spawn_blocking(move || {
            let mut conn = db_pool.get()?;
            actions::bookings_starting_at(&mut conn, course_start_time)
        })
        .await??;

        let report = organizers_report(recipients, course_start_time, report_type, &bookings);
        let delivered = self.dispatch(None, &report).await;
        Ok((delivered, bookings.len()))
    }

    pub async fn start_consuming_reminders(&self) -> Result<()> {
        if let Some(connection) = &self.connection {
            let channel = connection.open_channel(None).await?;
            channel.register_callback(DefaultChannelCallback).await?;

            let consumer_tag = format!("course_reminder_consumer_{}", Uuid::new_v4());
            let args = BasicConsumeArguments::new(REMINDER_QUEUE, &consumer_tag)
                .manual_ack(true)
                .finish();

            let consumer = ReminderConsumer { service: self.clone() };

            tokio::spawn(async move {
                match channel.basic_consume(consumer, args).await {
                    Ok(_) => {
                        info!("Reminder consumer started on queue {}", REMINDER_QUEUE);
                        // Keep the channel alive for the consumer
                        loop {
                            tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                        }
                    },
                    Err(e) => {
                        error!("Failed to start reminder consumer: {:?}", e);
                    }
                }
            });
        } else {
            return Err("RabbitMQ connection not initialized".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Booking, CoursePlan, CourseSchedule, PaymentStatus};
    use chrono::NaiveDate;

    fn at(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 5, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn view(contact_email: Option<&str>) -> BookingView {
        let plan = CoursePlan {
            id: 2,
            name: "Draft beer basics".to_string(),
            duration_hours: 4,
            description: None,
            max_capacity: 10,
            price_cents: 1500000,
            is_public: true,
            prerequisite_ids: None,
            course_category: None,
        };
        let schedule = CourseSchedule {
            id: 5,
            course_plan_id: 2,
            start_time: at(10, 9),
            created_by_user_id: 1,
            created_date: at(1, 9),
            available_seats: 10,
            is_active: true,
        };
        let booking = Booking {
            id: 11,
            course_schedule_id: 5,
            user_id: 42,
            booking_time: at(2, 9),
            is_cancelled: false,
            voucher_code: "CRS-K7QW2ZPA".to_string(),
            voucher_sent_date: None,
            payment_status: PaymentStatus::Paid,
            payment_reference: Some("INV-1".to_string()),
            notes: Some("vegetarian".to_string()),
            contact_email: contact_email.map(str::to_owned),
        };
        BookingView::new(booking, schedule, plan)
    }

    #[test]
    fn reminder_in_the_future_is_delayed() {
        assert_eq!(
            plan_reminder(at(10, 9), 24, at(8, 9)),
            ReminderSchedule::Delayed { remind_at: at(9, 9), delay_ms: 24 * 3600 * 1000 }
        );
    }

    #[test]
    fn huge_offsets_do_not_overflow() {
        assert_eq!(plan_reminder(at(10, 9), 10_000_000_000, at(1, 9)), ReminderSchedule::Immediate);
        assert_eq!(plan_reminder(at(10, 9), i64::MAX, at(1, 9)), ReminderSchedule::Immediate);
    }

    #[test]
    fn overdue_reminder_goes_out_immediately() {
        assert_eq!(plan_reminder(at(10, 9), 24, at(9, 10)), ReminderSchedule::Immediate);
        assert_eq!(plan_reminder(at(10, 9), 0, at(10, 9)), ReminderSchedule::Immediate);
    }

    #[test]
    fn confirmation_carries_voucher_and_recipient() {
        let n = booking_confirmation(&view(Some("anna@example.com")));

        assert_eq!(n.notification_type, NotificationType::BookingConfirmation);
        assert_eq!(n.template, "booking-confirmation");
        assert_eq!(n.recipients, vec!["anna@example.com"]);
        assert_eq!(n.payload["voucher_code"], "CRS-K7QW2ZPA");
        assert_eq!(n.payload["end_time"], "2025-05-10T13:00:00");
    }

    #[test]
    fn reminder_without_contact_has_no_recipients() {
        let n = course_reminder(&view(None));
        assert_eq!(n.notification_type, NotificationType::CourseReminder);
        assert!(n.recipients.is_empty());
    }

    #[test]
    fn organizers_report_lists_bookings() {
        let recipients = vec!["org@example.com".to_string()];
        let report = organizers_report(&recipients, at(10, 9), "Participants", &[view(Some("a@example.com")), view(None)]);

        assert_eq!(report.recipients, recipients);
        assert_eq!(report.payload["booking_count"], 2);
        assert_eq!(report.payload["bookings"][0]["voucher_code"], "CRS-K7QW2ZPA");
        assert_eq!(report.payload["bookings"][1]["contact_email"], serde_json::Value::Null);
        assert!(report.subject.starts_with("Participants report"));
    }

    #[test]
    fn outbound_message_round_trips_through_json() {
        let n = booking_confirmation(&view(Some("anna@example.com")));
        let decoded: OutboundNotification = serde_json::from_slice(&serde_json::to_vec(&n).unwrap()).unwrap();
        assert_eq!(decoded.subject, n.subject);
        assert_eq!(decoded.notification_type, n.notification_type);
    }
}
