//! Booking lifecycle: reserve, pay, cancel and complete.
//!
//! Authorization here is limited to owner equality and role membership on the identity
//! the gateway forwarded. Every seat or state change is delegated to the [`LedgerStore`]
//! as one atomic unit.

use crate::domain::{
    Booking, BookingStatus, ContactInfo, Passenger, Payment, PaymentDraft, PaymentMethod,
    ReservationDraft, StopSnapshot,
};
use crate::error::LifecycleError;
use crate::notify::{BookingConfirmation, Notifier};
use crate::store::LedgerStore;
use busline_common::identity::Requester;
use std::collections::HashSet;
use std::sync::Arc;

const MAX_NAME_LEN: usize = 120;
const MAX_SPECIAL_REQUESTS_LEN: usize = 1000;

/// Reservation request as received from a client, before stop resolution.
#[derive(Debug, Clone, Default)]
pub struct CreateBooking {
    pub schedule_id: String,
    pub departure_stop_id: Option<String>,
    pub arrival_stop_id: Option<String>,
    pub passengers: Vec<Passenger>,
    pub contact_info: ContactInfo,
    pub special_requests: Option<String>,
}

pub struct BookingLifecycle {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
    max_seats: usize,
}

impl BookingLifecycle {
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Arc<dyn Notifier>, max_seats: usize) -> Self {
        Self {
            store,
            notifier,
            max_seats: max_seats.max(1),
        }
    }

    pub async fn create(
        &self,
        req: CreateBooking,
        requester: &Requester,
    ) -> Result<Booking, LifecycleError> {
        let schedule_id = req.schedule_id.trim().to_string();
        if schedule_id.is_empty() {
            return Err(LifecycleError::validation("schedule_id", "schedule_id required"));
        }
        let passengers = self.validate_passengers(req.passengers)?;
        let contact_info = validate_contact(req.contact_info)?;
        let special_requests = normalize_special_requests(req.special_requests)?;

        let schedule = self
            .store
            .schedule(&schedule_id)
            .await?
            .ok_or(LifecycleError::NotFound("schedule"))?;
        schedule.ensure_bookable()?;

        let (departure_stop, arrival_stop) = self
            .resolve_stops(
                &schedule_id,
                req.departure_stop_id.as_deref(),
                req.arrival_stop_id.as_deref(),
            )
            .await?;

        let booking = self
            .store
            .reserve(ReservationDraft {
                schedule_id,
                user_id: requester.user_id.clone(),
                departure_stop,
                arrival_stop,
                passengers,
                contact_info,
                special_requests,
            })
            .await?;
        tracing::info!(
            booking_id = %booking.id,
            booking_reference = %booking.booking_reference,
            schedule_id = %booking.schedule_id,
            seats = booking.number_of_seats,
            total_amount = booking.total_amount,
            "booking reserved"
        );
        Ok(booking)
    }

    pub async fn cancel(
        &self,
        booking_id: &str,
        requester: &Requester,
    ) -> Result<Booking, LifecycleError> {
        let current = self.owned_booking(booking_id, requester, true).await?;
        if !current.booking_status.is_cancellable() {
            return Err(LifecycleError::InvalidState(
                "cannot cancel this booking".to_string(),
            ));
        }
        let booking = self.store.cancel(&current.id).await?;
        tracing::info!(
            booking_id = %booking.id,
            booking_reference = %booking.booking_reference,
            schedule_id = %booking.schedule_id,
            seats = booking.number_of_seats,
            "booking cancelled; seats returned"
        );
        Ok(booking)
    }

    pub async fn complete_payment(
        &self,
        booking_id: &str,
        method: PaymentMethod,
        details: Option<serde_json::Value>,
        requester: &Requester,
    ) -> Result<(Payment, Booking), LifecycleError> {
        let current = self.owned_booking(booking_id, requester, false).await?;
        let (payment, booking) = self
            .store
            .record_payment(&current.id, PaymentDraft { method, details })
            .await?;
        tracing::info!(
            booking_id = %booking.id,
            booking_reference = %booking.booking_reference,
            payment_id = %payment.id,
            transaction_id = %payment.transaction_id,
            amount = payment.amount,
            "booking paid"
        );
        self.send_confirmation(&booking).await;
        Ok((payment, booking))
    }

    /// Marks a confirmed booking completed once the trip is over.
    pub async fn complete(
        &self,
        booking_id: &str,
        requester: &Requester,
    ) -> Result<Booking, LifecycleError> {
        if !requester.is_admin() {
            return Err(LifecycleError::Forbidden);
        }
        let booking = self
            .store
            .transition(booking_id, BookingStatus::Confirmed, BookingStatus::Completed)
            .await?;
        tracing::info!(
            booking_id = %booking.id,
            booking_reference = %booking.booking_reference,
            "booking completed"
        );
        Ok(booking)
    }

    pub async fn booking_by_reference(
        &self,
        reference: &str,
    ) -> Result<(Booking, Vec<Payment>), LifecycleError> {
        let booking = self
            .store
            .booking_by_reference(reference)
            .await?
            .ok_or(LifecycleError::NotFound("booking"))?;
        let payments = self.store.payments_for_booking(&booking.id).await?;
        Ok((booking, payments))
    }

    pub async fn bookings_for(&self, requester: &Requester) -> Result<Vec<Booking>, LifecycleError> {
        self.store.bookings_for_user(&requester.user_id).await
    }

    pub async fn payment_history(
        &self,
        requester: &Requester,
    ) -> Result<Vec<Payment>, LifecycleError> {
        self.store.payments_for_user(&requester.user_id).await
    }

    pub async fn payment(
        &self,
        payment_id: &str,
        requester: &Requester,
    ) -> Result<Payment, LifecycleError> {
        let payment = self
            .store
            .payment(payment_id)
            .await?
            .ok_or(LifecycleError::NotFound("payment"))?;
        self.owned_booking(&payment.booking_id, requester, true)
            .await?;
        Ok(payment)
    }

    async fn owned_booking(
        &self,
        booking_id: &str,
        requester: &Requester,
        admin_allowed: bool,
    ) -> Result<Booking, LifecycleError> {
        let booking = self
            .store
            .booking(booking_id)
            .await?
            .ok_or(LifecycleError::NotFound("booking"))?;
        if requester.owns(&booking.user_id) || (admin_allowed && requester.is_admin()) {
            Ok(booking)
        } else {
            Err(LifecycleError::Forbidden)
        }
    }

    fn validate_passengers(
        &self,
        passengers: Vec<Passenger>,
    ) -> Result<Vec<Passenger>, LifecycleError> {
        if passengers.is_empty() {
            return Err(LifecycleError::validation(
                "passengers",
                "at least one passenger required",
            ));
        }
        if passengers.len() > self.max_seats {
            return Err(LifecycleError::validation(
                "passengers",
                format!("at most {} passengers per booking", self.max_seats),
            ));
        }

        let mut seats = HashSet::new();
        let mut out = Vec::with_capacity(passengers.len());
        for mut p in passengers {
            p.full_name = p.full_name.trim().to_string();
            if p.full_name.is_empty() {
                return Err(LifecycleError::validation(
                    "passengers.full_name",
                    "passenger name required",
                ));
            }
            if p.full_name.chars().count() > MAX_NAME_LEN {
                return Err(LifecycleError::validation(
                    "passengers.full_name",
                    format!("passenger name too long (max {MAX_NAME_LEN} characters)"),
                ));
            }
            p.id_number = trimmed(p.id_number);
            p.seat_number = trimmed(p.seat_number).map(|s| s.to_ascii_uppercase());
            if let Some(seat) = p.seat_number.as_deref() {
                if !seats.insert(seat.to_string()) {
                    return Err(LifecycleError::validation(
                        "passengers.seat_number",
                        format!("seat {seat} requested twice"),
                    ));
                }
            }
            out.push(p);
        }
        Ok(out)
    }

    async fn resolve_stops(
        &self,
        schedule_id: &str,
        departure_stop_id: Option<&str>,
        arrival_stop_id: Option<&str>,
    ) -> Result<(Option<StopSnapshot>, Option<StopSnapshot>), LifecycleError> {
        let departure = match departure_stop_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => Some(
                self.store
                    .route_stop(schedule_id, id)
                    .await?
                    .ok_or_else(|| {
                        LifecycleError::validation("departure_stop", "stop is not on this route")
                    })?
                    .pickup(),
            ),
            None => None,
        };
        let arrival = match arrival_stop_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => Some(
                self.store
                    .route_stop(schedule_id, id)
                    .await?
                    .ok_or_else(|| {
                        LifecycleError::validation("arrival_stop", "stop is not on this route")
                    })?
                    .dropoff(),
            ),
            None => None,
        };
        if let (Some(dep), Some(arr)) = (&departure, &arrival) {
            if arr.stop_order <= dep.stop_order {
                return Err(LifecycleError::validation(
                    "arrival_stop",
                    "arrival stop must come after departure stop",
                ));
            }
        }
        Ok((departure, arrival))
    }

    async fn send_confirmation(&self, booking: &Booking) {
        let Some(email) = booking.contact_info.email.as_deref() else {
            return;
        };
        let trip = match self.store.trip_summary(&booking.schedule_id).await {
            Ok(Some(trip)) => trip,
            Ok(None) => {
                tracing::warn!(booking_id = %booking.id, "trip summary missing; confirmation skipped");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, booking_id = %booking.id, "trip summary lookup failed; confirmation skipped");
                return;
            }
        };
        self.notifier.booking_confirmed(
            email,
            BookingConfirmation {
                booking_reference: booking.booking_reference.clone(),
                route_name: trip.route_name,
                departure_time: trip.departure_time,
                number_of_seats: booking.number_of_seats,
                total_amount: booking.total_amount,
            },
        );
    }
}

fn trimmed(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn validate_contact(contact: ContactInfo) -> Result<ContactInfo, LifecycleError> {
    let email = trimmed(contact.email);
    if let Some(e) = email.as_deref() {
        let valid = e
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
        if !valid || e.len() > 254 {
            return Err(LifecycleError::validation(
                "contact_info.email",
                "invalid email address",
            ));
        }
    }
    Ok(ContactInfo {
        email,
        phone: trimmed(contact.phone),
    })
}

fn normalize_special_requests(raw: Option<String>) -> Result<Option<String>, LifecycleError> {
    let v = trimmed(raw);
    if v.as_ref()
        .is_some_and(|s| s.chars().count() > MAX_SPECIAL_REQUESTS_LEN)
    {
        return Err(LifecycleError::validation(
            "special_requests",
            "special requests too long",
        ));
    }
    Ok(v)
}
