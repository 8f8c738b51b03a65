use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{error, info};

use volja_commerce::{SendGridClient, SendGridError};
use volja_core::notification::NotificationDispatch;
use volja_storage::{NewNotificationLog, NotificationLogRepository, NotificationStatus};

/// Sends dispatches through the email provider and records every attempt.
#[derive(Clone)]
pub struct Notifier {
    mailer: SendGridClient,
    log: NotificationLogRepository,
}

impl Notifier {
    pub fn new(mailer: SendGridClient, log: NotificationLogRepository) -> Self {
        Self { mailer, log }
    }

    pub async fn send(
        &self,
        event_msg_id: Option<&str>,
        dispatch: &NotificationDispatch,
        now: DateTime<Utc>,
    ) -> Result<(), SendGridError> {
        let result = self.mailer.send(dispatch).await;
        let (status, label) = match &result {
            Ok(()) => (NotificationStatus::Sent, "sent"),
            Err(_) => (NotificationStatus::Failed, "failed"),
        };
        let error_text = result.as_ref().err().map(ToString::to_string);

        counter!(
            "notifications_sent_total",
            "template" => dispatch.template.clone(),
            "result" => label
        )
        .increment(1);

        if let Err(err) = self
            .log
            .record(NewNotificationLog {
                event_msg_id,
                recipient: &dispatch.to,
                channel: &dispatch.channel,
                template: &dispatch.template,
                status,
                error: error_text.as_deref(),
                created_at: now,
            })
            .await
        {
            error!(stage = "notification", error = %err, "failed to record notification attempt");
        }

        match &result {
            Ok(()) => info!(
                stage = "notification",
                to = %dispatch.to,
                template = %dispatch.template,
                attachments = dispatch.attachments.len(),
                "notification sent"
            ),
            Err(err) => error!(
                stage = "notification",
                to = %dispatch.to,
                template = %dispatch.template,
                error = %err,
                "notification failed"
            ),
        }

        result
    }
}
