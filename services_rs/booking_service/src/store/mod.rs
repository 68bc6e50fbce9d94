//! Persistence seam for the booking lifecycle.
//!
//! Every method that changes seat inventory or booking state is a single all-or-nothing
//! unit: either all of its writes land or none do.

#[cfg(test)]
pub mod memory;
pub mod postgres;

use crate::domain::{
    Booking, BookingStatus, Payment, PaymentDraft, ReservationDraft, RouteStop,
    ScheduleInventory, TripSummary,
};
use crate::error::LifecycleError;

pub type StoreResult<T> = Result<T, LifecycleError>;

#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    async fn schedule(&self, schedule_id: &str) -> StoreResult<Option<ScheduleInventory>>;

    /// Looks up a station on the route the schedule runs.
    async fn route_stop(&self, schedule_id: &str, station_id: &str)
        -> StoreResult<Option<RouteStop>>;

    async fn trip_summary(&self, schedule_id: &str) -> StoreResult<Option<TripSummary>>;

    /// Debits the schedule by the passenger count and inserts the booking. Fails with
    /// `CapacityExceeded` without writing anything when the debit is refused.
    async fn reserve(&self, draft: ReservationDraft) -> StoreResult<Booking>;

    /// Flips a reserved or confirmed booking to cancelled and credits its seats back.
    async fn cancel(&self, booking_id: &str) -> StoreResult<Booking>;

    /// Moves a booking between two statuses that do not touch inventory.
    async fn transition(
        &self,
        booking_id: &str,
        from: BookingStatus,
        to: BookingStatus,
    ) -> StoreResult<Booking>;

    /// Inserts a completed payment and marks the reserved, unpaid booking paid and
    /// confirmed.
    async fn record_payment(
        &self,
        booking_id: &str,
        draft: PaymentDraft,
    ) -> StoreResult<(Payment, Booking)>;

    async fn booking(&self, booking_id: &str) -> StoreResult<Option<Booking>>;

    async fn booking_by_reference(&self, reference: &str) -> StoreResult<Option<Booking>>;

    async fn bookings_for_user(&self, user_id: &str) -> StoreResult<Vec<Booking>>;

    async fn payment(&self, payment_id: &str) -> StoreResult<Option<Payment>>;

    async fn payments_for_booking(&self, booking_id: &str) -> StoreResult<Vec<Payment>>;

    async fn payments_for_user(&self, user_id: &str) -> StoreResult<Vec<Payment>>;
}
