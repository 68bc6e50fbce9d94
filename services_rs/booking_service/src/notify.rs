use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;

/// Payload posted when a booking is paid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookingConfirmation {
    pub booking_reference: String,
    pub route_name: String,
    pub departure_time: DateTime<Utc>,
    pub number_of_seats: i32,
    pub total_amount: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("notification service answered {0}")]
    Status(reqwest::StatusCode),
}

/// Outbound confirmation channel. Sending never blocks or fails the caller.
pub trait Notifier: Send + Sync {
    fn booking_confirmed(&self, recipient: &str, confirmation: BookingConfirmation);
}

/// Used when no notification service is configured.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn booking_confirmed(&self, _recipient: &str, confirmation: BookingConfirmation) {
        tracing::info!(
            booking_reference = %confirmation.booking_reference,
            "notification dispatch disabled; confirmation not sent"
        );
    }
}

#[derive(Clone)]
pub struct HttpNotifier {
    http: Client,
    base_url: String,
    internal_secret: Option<String>,
    service_id: String,
}

#[derive(Serialize)]
struct EmailRequest<'a> {
    to: &'a str,
    template: &'static str,
    data: &'a BookingConfirmation,
}

impl HttpNotifier {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        internal_secret: Option<String>,
        service_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            internal_secret,
            service_id: service_id.into(),
        }
    }

    pub async fn deliver(
        &self,
        recipient: &str,
        confirmation: &BookingConfirmation,
    ) -> Result<(), NotifyError> {
        let url = format!(
            "{}/internal/notifications/email",
            self.base_url.trim_end_matches('/')
        );
        let mut req = self.http.post(url).json(&EmailRequest {
            to: recipient,
            template: "booking_confirmation",
            data: confirmation,
        });
        if let Some(secret) = self.internal_secret.as_deref() {
            req = req.header("X-Internal-Secret", secret);
        }
        let caller = self.service_id.trim();
        if !caller.is_empty() {
            req = req.header("X-Internal-Service-Id", caller);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status));
        }
        Ok(())
    }
}

impl Notifier for HttpNotifier {
    fn booking_confirmed(&self, recipient: &str, confirmation: BookingConfirmation) {
        let notifier = self.clone();
        let recipient = recipient.to_string();
        tokio::spawn(async move {
            if let Err(e) = notifier.deliver(&recipient, &confirmation).await {
                tracing::warn!(
                    error = %e,
                    booking_reference = %confirmation.booking_reference,
                    "booking confirmation notification failed"
                );
            }
        });
    }
}
