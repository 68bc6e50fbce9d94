use super::{LedgerStore, StoreResult};
use crate::domain::{
    new_booking_reference, normalize_reference, Booking, BookingStatus, Payment, PaymentDraft,
    PaymentStatus, ReservationDraft, RouteStop, ScheduleInventory, TripSummary,
};
use crate::error::LifecycleError;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    schedules: HashMap<String, ScheduleInventory>,
    trips: HashMap<String, TripSummary>,
    stops: HashMap<(String, String), RouteStop>,
    bookings: HashMap<String, Booking>,
    payments: Vec<Payment>,
}

/// Single-lock store; every operation observes and mutates state under one guard.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_schedule(&self, inventory: ScheduleInventory, trip: TripSummary) {
        let mut inner = self.inner.lock().await;
        inner.trips.insert(inventory.id.clone(), trip);
        inner.schedules.insert(inventory.id.clone(), inventory);
    }

    pub async fn add_stop(&self, schedule_id: &str, stop: RouteStop) {
        let mut inner = self.inner.lock().await;
        inner
            .stops
            .insert((schedule_id.to_string(), stop.station_id.clone()), stop);
    }

    pub async fn available_seats(&self, schedule_id: &str) -> Option<i32> {
        let inner = self.inner.lock().await;
        inner.schedules.get(schedule_id).map(|s| s.available_seats)
    }

    pub async fn payment_count(&self) -> usize {
        self.inner.lock().await.payments.len()
    }
}

#[async_trait::async_trait]
impl LedgerStore for MemoryStore {
    async fn schedule(&self, schedule_id: &str) -> StoreResult<Option<ScheduleInventory>> {
        Ok(self.inner.lock().await.schedules.get(schedule_id).cloned())
    }

    async fn route_stop(
        &self,
        schedule_id: &str,
        station_id: &str,
    ) -> StoreResult<Option<RouteStop>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .stops
            .get(&(schedule_id.to_string(), station_id.to_string()))
            .cloned())
    }

    async fn trip_summary(&self, schedule_id: &str) -> StoreResult<Option<TripSummary>> {
        Ok(self.inner.lock().await.trips.get(schedule_id).cloned())
    }

    async fn reserve(&self, draft: ReservationDraft) -> StoreResult<Booking> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let schedule = inner
            .schedules
            .get_mut(&draft.schedule_id)
            .ok_or(LifecycleError::NotFound("schedule"))?;
        schedule.ensure_bookable()?;

        let mut next = schedule.clone();
        next.debit(draft.seats())?;
        let booking = draft.into_booking(
            Uuid::new_v4().to_string(),
            new_booking_reference(),
            next.base_price,
            Utc::now(),
        )?;
        *schedule = next;
        inner.bookings.insert(booking.id.clone(), booking.clone());
        Ok(booking)
    }

    async fn cancel(&self, booking_id: &str) -> StoreResult<Booking> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let booking = inner
            .bookings
            .get_mut(booking_id)
            .ok_or(LifecycleError::NotFound("booking"))?;
        if !booking.booking_status.is_cancellable() {
            return Err(LifecycleError::InvalidState(
                "cannot cancel this booking".to_string(),
            ));
        }
        let schedule = inner
            .schedules
            .get_mut(&booking.schedule_id)
            .ok_or(LifecycleError::NotFound("schedule"))?;

        let mut next = schedule.clone();
        next.credit(booking.number_of_seats)?;
        *schedule = next;
        booking.booking_status = BookingStatus::Cancelled;
        Ok(booking.clone())
    }

    async fn transition(
        &self,
        booking_id: &str,
        from: BookingStatus,
        to: BookingStatus,
    ) -> StoreResult<Booking> {
        let mut inner = self.inner.lock().await;
        let booking = inner
            .bookings
            .get_mut(booking_id)
            .ok_or(LifecycleError::NotFound("booking"))?;
        if booking.booking_status != from {
            return Err(LifecycleError::InvalidState(format!(
                "booking is {}",
                booking.booking_status
            )));
        }
        booking.booking_status = to;
        Ok(booking.clone())
    }

    async fn record_payment(
        &self,
        booking_id: &str,
        draft: PaymentDraft,
    ) -> StoreResult<(Payment, Booking)> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let booking = inner
            .bookings
            .get_mut(booking_id)
            .ok_or(LifecycleError::NotFound("booking"))?;
        if booking.payment_status == PaymentStatus::Paid {
            return Err(LifecycleError::AlreadyPaid);
        }
        if booking.booking_status != BookingStatus::Reserved {
            return Err(LifecycleError::InvalidState(format!(
                "booking is {}",
                booking.booking_status
            )));
        }
        let payment = draft.into_payment(booking, Utc::now());
        booking.payment_status = PaymentStatus::Paid;
        booking.booking_status = BookingStatus::Confirmed;
        let booking = booking.clone();
        inner.payments.push(payment.clone());
        Ok((payment, booking))
    }

    async fn booking(&self, booking_id: &str) -> StoreResult<Option<Booking>> {
        Ok(self.inner.lock().await.bookings.get(booking_id).cloned())
    }

    async fn booking_by_reference(&self, reference: &str) -> StoreResult<Option<Booking>> {
        let reference = normalize_reference(reference);
        let inner = self.inner.lock().await;
        Ok(inner
            .bookings
            .values()
            .find(|b| b.booking_reference == reference)
            .cloned())
    }

    async fn bookings_for_user(&self, user_id: &str) -> StoreResult<Vec<Booking>> {
        let inner = self.inner.lock().await;
        let mut out: Vec<Booking> = inner
            .bookings
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.booked_at.cmp(&a.booked_at));
        Ok(out)
    }

    async fn payment(&self, payment_id: &str) -> StoreResult<Option<Payment>> {
        let inner = self.inner.lock().await;
        Ok(inner.payments.iter().find(|p| p.id == payment_id).cloned())
    }

    async fn payments_for_booking(&self, booking_id: &str) -> StoreResult<Vec<Payment>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .payments
            .iter()
            .filter(|p| p.booking_id == booking_id)
            .cloned()
            .collect())
    }

    async fn payments_for_user(&self, user_id: &str) -> StoreResult<Vec<Payment>> {
        let inner = self.inner.lock().await;
        let mut out: Vec<Payment> = inner
            .payments
            .iter()
            .filter(|p| {
                inner
                    .bookings
                    .get(&p.booking_id)
                    .is_some_and(|b| b.user_id == user_id)
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }
}
