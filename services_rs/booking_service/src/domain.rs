use crate::error::LifecycleError;
use chrono::{DateTime, NaiveDate, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            pub fn parse(raw: &str) -> Option<Self> {
                match raw.trim() {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(ScheduleStatus {
    Scheduled => "scheduled",
    Boarding => "boarding",
    Departed => "departed",
    Arrived => "arrived",
    Delayed => "delayed",
    Cancelled => "cancelled",
});

string_enum!(BookingStatus {
    Reserved => "reserved",
    Confirmed => "confirmed",
    Cancelled => "cancelled",
    Completed => "completed",
});

string_enum!(PaymentStatus {
    Pending => "pending",
    Paid => "paid",
    Failed => "failed",
    Refunded => "refunded",
});

string_enum!(TransactionStatus {
    Pending => "pending",
    Completed => "completed",
    Failed => "failed",
    Refunded => "refunded",
});

string_enum!(PaymentMethod {
    Cash => "cash",
    CreditCard => "credit_card",
    DebitCard => "debit_card",
    BankTransfer => "bank_transfer",
    EWallet => "e_wallet",
});

impl ScheduleStatus {
    /// Trips that have not left yet can still sell seats.
    pub fn accepts_bookings(self) -> bool {
        matches!(self, Self::Scheduled | Self::Boarding | Self::Delayed)
    }

    pub fn can_transition_to(self, next: ScheduleStatus) -> bool {
        use ScheduleStatus::*;
        matches!(
            (self, next),
            (Scheduled, Boarding | Delayed | Cancelled)
                | (Delayed, Scheduled | Boarding | Cancelled)
                | (Boarding, Departed | Delayed | Cancelled)
                | (Departed, Arrived)
        )
    }
}

impl BookingStatus {
    pub fn is_cancellable(self) -> bool {
        matches!(self, Self::Reserved | Self::Confirmed)
    }
}

/// Seat counter of one schedule. All mutation goes through [`debit`](Self::debit) and
/// [`credit`](Self::credit).
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleInventory {
    pub id: String,
    pub capacity: i32,
    pub available_seats: i32,
    pub status: ScheduleStatus,
    pub base_price: i64,
    pub is_active: bool,
}

impl ScheduleInventory {
    pub fn ensure_bookable(&self) -> Result<(), LifecycleError> {
        if !self.is_active {
            return Err(LifecycleError::InvalidState(
                "schedule is no longer offered".to_string(),
            ));
        }
        if !self.status.accepts_bookings() {
            return Err(LifecycleError::InvalidState(format!(
                "schedule is {} and not open for booking",
                self.status
            )));
        }
        Ok(())
    }

    pub fn debit(&mut self, seats: i32) -> Result<i32, LifecycleError> {
        if seats <= 0 {
            return Err(LifecycleError::validation("passengers", "seat count must be positive"));
        }
        if self.available_seats < seats {
            return Err(LifecycleError::CapacityExceeded {
                requested: seats,
                available: self.available_seats,
            });
        }
        self.available_seats -= seats;
        Ok(self.available_seats)
    }

    pub fn credit(&mut self, seats: i32) -> Result<i32, LifecycleError> {
        if seats <= 0 || self.available_seats + seats > self.capacity {
            return Err(LifecycleError::storage(
                "seat credit refused",
                format!(
                    "credit of {seats} would exceed capacity of schedule {}",
                    self.id
                ),
            ));
        }
        self.available_seats += seats;
        Ok(self.available_seats)
    }
}

/// A station on a route with its incremental pickup and dropoff prices.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteStop {
    pub station_id: String,
    pub stop_name: String,
    pub stop_order: i32,
    pub pickup_price: i64,
    pub dropoff_price: i64,
}

impl RouteStop {
    pub fn pickup(&self) -> StopSnapshot {
        self.snapshot(self.pickup_price)
    }

    pub fn dropoff(&self) -> StopSnapshot {
        self.snapshot(self.dropoff_price)
    }

    fn snapshot(&self, price: i64) -> StopSnapshot {
        StopSnapshot {
            station_id: self.station_id.clone(),
            stop_name: self.stop_name.clone(),
            stop_order: self.stop_order,
            price,
        }
    }
}

/// Pickup or dropoff point copied from the route when the booking is made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopSnapshot {
    pub station_id: String,
    pub stop_name: String,
    pub stop_order: i32,
    pub price: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passenger {
    pub full_name: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub id_number: Option<String>,
    #[serde(default)]
    pub seat_number: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactInfo {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Booking {
    pub id: String,
    pub booking_reference: String,
    pub user_id: String,
    pub schedule_id: String,
    pub departure_stop: Option<StopSnapshot>,
    pub arrival_stop: Option<StopSnapshot>,
    pub total_amount: i64,
    pub number_of_seats: i32,
    pub payment_status: PaymentStatus,
    pub booking_status: BookingStatus,
    pub contact_info: ContactInfo,
    pub passengers: Vec<Passenger>,
    pub special_requests: Option<String>,
    pub booked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: String,
    pub booking_id: String,
    pub amount: i64,
    pub payment_method: PaymentMethod,
    pub payment_status: TransactionStatus,
    pub transaction_id: String,
    pub payment_details: Option<serde_json::Value>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Validated input for a reservation; the store prices it and debits seats atomically.
#[derive(Debug, Clone)]
pub struct ReservationDraft {
    pub schedule_id: String,
    pub user_id: String,
    pub departure_stop: Option<StopSnapshot>,
    pub arrival_stop: Option<StopSnapshot>,
    pub passengers: Vec<Passenger>,
    pub contact_info: ContactInfo,
    pub special_requests: Option<String>,
}

impl ReservationDraft {
    pub fn seats(&self) -> i32 {
        self.passengers.len() as i32
    }

    pub fn into_booking(
        self,
        id: String,
        booking_reference: String,
        base_price: i64,
        booked_at: DateTime<Utc>,
    ) -> Result<Booking, LifecycleError> {
        let seats = self.seats();
        Ok(Booking {
            id,
            booking_reference,
            user_id: self.user_id,
            schedule_id: self.schedule_id,
            departure_stop: self.departure_stop,
            arrival_stop: self.arrival_stop,
            total_amount: fare_total(base_price, seats)?,
            number_of_seats: seats,
            payment_status: PaymentStatus::Pending,
            booking_status: BookingStatus::Reserved,
            contact_info: self.contact_info,
            passengers: self.passengers,
            special_requests: self.special_requests,
            booked_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PaymentDraft {
    pub method: PaymentMethod,
    pub details: Option<serde_json::Value>,
}

impl PaymentDraft {
    pub fn into_payment(self, booking: &Booking, paid_at: DateTime<Utc>) -> Payment {
        Payment {
            id: uuid::Uuid::new_v4().to_string(),
            booking_id: booking.id.clone(),
            amount: booking.total_amount,
            payment_method: self.method,
            payment_status: TransactionStatus::Completed,
            transaction_id: new_transaction_id(paid_at),
            payment_details: self.details,
            paid_at: Some(paid_at),
            created_at: paid_at,
        }
    }
}

/// Route and departure details carried in confirmation notifications.
#[derive(Debug, Clone, Serialize)]
pub struct TripSummary {
    pub route_name: String,
    pub departure_time: DateTime<Utc>,
}

// Pickup and dropoff prices are kept in the snapshots but not added to the fare.
pub fn fare_total(base_price: i64, seats: i32) -> Result<i64, LifecycleError> {
    base_price
        .checked_mul(i64::from(seats))
        .ok_or_else(|| LifecycleError::validation("passengers", "total amount overflows"))
}

pub const BOOKING_REFERENCE_LEN: usize = 8;

pub fn new_booking_reference() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..BOOKING_REFERENCE_LEN].to_ascii_uppercase()
}

pub fn normalize_reference(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

pub fn new_transaction_id(at: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("TXN_{}_{suffix}", at.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inventory(available: i32) -> ScheduleInventory {
        ScheduleInventory {
            id: "s-1".to_string(),
            capacity: 40,
            available_seats: available,
            status: ScheduleStatus::Scheduled,
            base_price: 200_000,
            is_active: true,
        }
    }

    #[test]
    fn debit_refuses_oversell_and_leaves_count() {
        let mut inv = inventory(2);
        let err = inv.debit(3).expect_err("oversell");
        assert!(matches!(
            err,
            LifecycleError::CapacityExceeded {
                requested: 3,
                available: 2
            }
        ));
        assert_eq!(inv.available_seats, 2);
        assert_eq!(inv.debit(2).expect("debit"), 0);
    }

    #[test]
    fn credit_never_exceeds_capacity() {
        let mut inv = inventory(39);
        let err = inv.credit(2).expect_err("over capacity");
        match err {
            LifecycleError::Storage(detail) => {
                assert!(detail.starts_with("seat credit refused: "), "{detail}");
                assert!(detail.contains("schedule s-1"), "{detail}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(inv.available_seats, 39);
        assert!(matches!(inv.credit(0), Err(LifecycleError::Storage(_))));
        assert_eq!(inv.credit(1).expect("credit"), 40);
    }

    #[test]
    fn bookable_statuses() {
        let mut inv = inventory(10);
        assert!(inv.ensure_bookable().is_ok());
        inv.status = ScheduleStatus::Departed;
        assert!(matches!(
            inv.ensure_bookable(),
            Err(LifecycleError::InvalidState(_))
        ));
        inv.status = ScheduleStatus::Delayed;
        inv.is_active = false;
        assert!(inv.ensure_bookable().is_err());
    }

    #[test]
    fn schedule_transitions() {
        use ScheduleStatus::*;
        assert!(Scheduled.can_transition_to(Boarding));
        assert!(Boarding.can_transition_to(Departed));
        assert!(Departed.can_transition_to(Arrived));
        assert!(Delayed.can_transition_to(Scheduled));
        assert!(!Departed.can_transition_to(Cancelled));
        assert!(!Arrived.can_transition_to(Scheduled));
        assert!(!Cancelled.can_transition_to(Scheduled));
        assert!(!Scheduled.can_transition_to(Arrived));
    }

    #[test]
    fn booking_status_guards() {
        assert!(BookingStatus::Reserved.is_cancellable());
        assert!(BookingStatus::Confirmed.is_cancellable());
        assert!(!BookingStatus::Cancelled.is_cancellable());
        assert!(!BookingStatus::Completed.is_cancellable());
    }

    #[test]
    fn enum_text_matches_serde() {
        assert_eq!(PaymentMethod::parse("e_wallet"), Some(PaymentMethod::EWallet));
        assert_eq!(
            serde_json::to_value(PaymentMethod::EWallet).unwrap(),
            serde_json::json!("e_wallet")
        );
        assert_eq!(
            serde_json::from_value::<PaymentMethod>(serde_json::json!("credit_card")).unwrap(),
            PaymentMethod::CreditCard
        );
        assert_eq!(BookingStatus::parse("bogus"), None);
    }

    #[test]
    fn references_and_transaction_ids() {
        let r = new_booking_reference();
        assert_eq!(r.len(), BOOKING_REFERENCE_LEN);
        assert!(r.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        assert_eq!(normalize_reference(" ab12cd34 "), "AB12CD34");

        let at = Utc::now();
        let txn = new_transaction_id(at);
        let prefix = format!("TXN_{}_", at.timestamp_millis());
        assert!(txn.starts_with(&prefix));
        assert_eq!(txn.len(), prefix.len() + 9);
    }

    #[test]
    fn fare_is_base_price_times_seats() {
        assert_eq!(fare_total(200_000, 3).unwrap(), 600_000);
        assert!(fare_total(i64::MAX, 2).is_err());
    }
}
