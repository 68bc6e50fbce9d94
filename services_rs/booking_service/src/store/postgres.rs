use super::{LedgerStore, StoreResult};
use crate::db::{self, json_text, row_dt, row_dt_opt, row_json, table_name, ts};
use crate::domain::{
    new_booking_reference, normalize_reference, Booking, BookingStatus, ContactInfo, Payment,
    PaymentDraft, PaymentMethod, PaymentStatus, ReservationDraft, RouteStop, ScheduleInventory,
    TransactionStatus, TripSummary,
};
use crate::error::LifecycleError;
use crate::inventory;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{PgConnection, Row};
use uuid::Uuid;

const BOOKING_COLUMNS: &str = "id,booking_reference,user_id,schedule_id,departure_stop,arrival_stop,\
     total_amount,number_of_seats,payment_status,booking_status,contact_info,passengers,\
     special_requests,booked_at";
const PAYMENT_COLUMNS: &str =
    "id,booking_id,amount,payment_method,payment_status,transaction_id,payment_details,paid_at,created_at";
const REFERENCE_ATTEMPTS: u32 = 10;

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    db_schema: Option<String>,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool, db_schema: Option<String>) -> Self {
        Self { pool, db_schema }
    }

    fn table(&self, name: &str) -> String {
        table_name(&self.db_schema, name)
    }

    async fn begin(&self) -> StoreResult<sqlx::Transaction<'static, sqlx::Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| LifecycleError::storage("db begin tx failed", e))
    }

    /// Debits the schedule and inserts the booking, drawing a fresh reference whenever the
    /// drawn one is already taken. Collisions never abort the transaction.
    async fn reserve_with(
        &self,
        draft: ReservationDraft,
        mut next_reference: impl FnMut() -> String + Send,
    ) -> StoreResult<Booking> {
        let schedules = self.table("schedules");
        let bookings = self.table("bookings");
        let mut tx = self.begin().await?;

        let debited =
            inventory::debit(&mut tx, &schedules, &draft.schedule_id, draft.seats()).await?;
        let mut booking = draft.into_booking(
            Uuid::new_v4().to_string(),
            next_reference(),
            debited.base_price,
            Utc::now(),
        )?;

        let sql = format!(
            "INSERT INTO {bookings} ({BOOKING_COLUMNS}) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14) \
             ON CONFLICT (booking_reference) DO NOTHING"
        );
        let mut inserted = false;
        for attempt in 1..=REFERENCE_ATTEMPTS {
            if attempt > 1 {
                booking.booking_reference = next_reference();
            }
            let res = sqlx::query(&sql)
                .bind(&booking.id)
                .bind(&booking.booking_reference)
                .bind(&booking.user_id)
                .bind(&booking.schedule_id)
                .bind(booking.departure_stop.as_ref().and_then(json_text))
                .bind(booking.arrival_stop.as_ref().and_then(json_text))
                .bind(booking.total_amount)
                .bind(booking.number_of_seats)
                .bind(booking.payment_status.as_str())
                .bind(booking.booking_status.as_str())
                .bind(json_text(&booking.contact_info))
                .bind(json_text(&booking.passengers).unwrap_or_else(|| "[]".to_string()))
                .bind(&booking.special_requests)
                .bind(ts(booking.booked_at))
                .execute(&mut *tx)
                .await
                .map_err(|e| LifecycleError::storage("db booking insert failed", e))?;
            if res.rows_affected() == 1 {
                inserted = true;
                break;
            }
            tracing::debug!(attempt, "booking reference collision; drawing another");
        }
        if !inserted {
            return Err(LifecycleError::storage(
                "db booking reference space exhausted",
                REFERENCE_ATTEMPTS,
            ));
        }

        tx.commit()
            .await
            .map_err(|e| LifecycleError::storage("db reserve commit failed", e))?;
        Ok(booking)
    }

    async fn fetch_booking(
        &self,
        conn: &mut PgConnection,
        booking_id: &str,
    ) -> StoreResult<Option<Booking>> {
        let bookings = self.table("bookings");
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM {bookings} WHERE id=$1");
        let row = sqlx::query(&sql)
            .bind(booking_id)
            .fetch_optional(conn)
            .await
            .map_err(|e| LifecycleError::storage("db booking lookup failed", e))?;
        row.as_ref().map(booking_from_row).transpose()
    }

    /// Explains why a guarded booking update matched no row.
    async fn diagnose_booking(
        &self,
        conn: &mut PgConnection,
        booking_id: &str,
    ) -> StoreResult<Booking> {
        self.fetch_booking(conn, booking_id)
            .await?
            .ok_or(LifecycleError::NotFound("booking"))
    }
}

fn decode_err(e: impl std::fmt::Display) -> LifecycleError {
    LifecycleError::storage("db row decode failed", e)
}

fn booking_from_row(row: &PgRow) -> StoreResult<Booking> {
    let payment_status: String = row.try_get("payment_status").map_err(decode_err)?;
    let booking_status: String = row.try_get("booking_status").map_err(decode_err)?;
    Ok(Booking {
        id: row.try_get("id").map_err(decode_err)?,
        booking_reference: row.try_get("booking_reference").map_err(decode_err)?,
        user_id: row.try_get("user_id").map_err(decode_err)?,
        schedule_id: row.try_get("schedule_id").map_err(decode_err)?,
        departure_stop: row_json(row, "departure_stop").map_err(decode_err)?,
        arrival_stop: row_json(row, "arrival_stop").map_err(decode_err)?,
        total_amount: row.try_get("total_amount").map_err(decode_err)?,
        number_of_seats: row.try_get("number_of_seats").map_err(decode_err)?,
        payment_status: PaymentStatus::parse(&payment_status)
            .ok_or_else(|| decode_err(format!("payment_status {payment_status:?}")))?,
        booking_status: BookingStatus::parse(&booking_status)
            .ok_or_else(|| decode_err(format!("booking_status {booking_status:?}")))?,
        contact_info: row_json::<ContactInfo>(row, "contact_info")
            .map_err(decode_err)?
            .unwrap_or_default(),
        passengers: row_json(row, "passengers")
            .map_err(decode_err)?
            .unwrap_or_default(),
        special_requests: row.try_get("special_requests").map_err(decode_err)?,
        booked_at: row_dt(row, "booked_at").map_err(decode_err)?,
    })
}

fn payment_from_row(row: &PgRow) -> StoreResult<Payment> {
    let method: String = row.try_get("payment_method").map_err(decode_err)?;
    let status: String = row.try_get("payment_status").map_err(decode_err)?;
    Ok(Payment {
        id: row.try_get("id").map_err(decode_err)?,
        booking_id: row.try_get("booking_id").map_err(decode_err)?,
        amount: row.try_get("amount").map_err(decode_err)?,
        payment_method: PaymentMethod::parse(&method)
            .ok_or_else(|| decode_err(format!("payment_method {method:?}")))?,
        payment_status: TransactionStatus::parse(&status)
            .ok_or_else(|| decode_err(format!("payment_status {status:?}")))?,
        transaction_id: row.try_get("transaction_id").map_err(decode_err)?,
        payment_details: row_json(row, "payment_details").map_err(decode_err)?,
        paid_at: row_dt_opt(row, "paid_at"),
        created_at: row_dt(row, "created_at").map_err(decode_err)?,
    })
}

#[async_trait::async_trait]
impl LedgerStore for PgLedgerStore {
    async fn schedule(&self, schedule_id: &str) -> StoreResult<Option<ScheduleInventory>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| LifecycleError::storage("db acquire failed", e))?;
        inventory::load(&mut conn, &self.table("schedules"), schedule_id).await
    }

    async fn route_stop(
        &self,
        schedule_id: &str,
        station_id: &str,
    ) -> StoreResult<Option<RouteStop>> {
        let schedules = self.table("schedules");
        let route_stops = self.table("route_stops");
        let stations = self.table("stations");
        let sql = format!(
            "SELECT rs.station_id,st.station_name,rs.stop_order,rs.pickup_price,rs.dropoff_price \
             FROM {schedules} s \
             JOIN {route_stops} rs ON rs.route_id = s.route_id \
             JOIN {stations} st ON st.id = rs.station_id \
             WHERE s.id=$1 AND rs.station_id=$2"
        );
        let row = sqlx::query(&sql)
            .bind(schedule_id)
            .bind(station_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LifecycleError::storage("db route stop lookup failed", e))?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(RouteStop {
            station_id: row.try_get("station_id").map_err(decode_err)?,
            stop_name: row.try_get("station_name").map_err(decode_err)?,
            stop_order: row.try_get("stop_order").map_err(decode_err)?,
            pickup_price: row.try_get("pickup_price").map_err(decode_err)?,
            dropoff_price: row.try_get("dropoff_price").map_err(decode_err)?,
        }))
    }

    async fn trip_summary(&self, schedule_id: &str) -> StoreResult<Option<TripSummary>> {
        let schedules = self.table("schedules");
        let routes = self.table("routes");
        let sql = format!(
            "SELECT r.route_name,s.departure_time FROM {schedules} s \
             JOIN {routes} r ON r.id = s.route_id WHERE s.id=$1"
        );
        let row = sqlx::query(&sql)
            .bind(schedule_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LifecycleError::storage("db trip summary lookup failed", e))?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(TripSummary {
            route_name: row.try_get("route_name").map_err(decode_err)?,
            departure_time: row_dt(&row, "departure_time").map_err(decode_err)?,
        }))
    }

    async fn reserve(&self, draft: ReservationDraft) -> StoreResult<Booking> {
        self.reserve_with(draft, new_booking_reference).await
    }

    async fn cancel(&self, booking_id: &str) -> StoreResult<Booking> {
        let schedules = self.table("schedules");
        let bookings = self.table("bookings");
        let mut tx = self.begin().await?;

        let sql = format!(
            "UPDATE {bookings} SET booking_status='cancelled' \
             WHERE id=$1 AND booking_status IN ('reserved','confirmed') \
             RETURNING {BOOKING_COLUMNS}"
        );
        let updated = sqlx::query(&sql)
            .bind(booking_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| LifecycleError::storage("db booking cancel failed", e))?;
        let booking = match updated {
            Some(row) => booking_from_row(&row)?,
            None => {
                self.diagnose_booking(&mut tx, booking_id).await?;
                return Err(LifecycleError::InvalidState(
                    "cannot cancel this booking".to_string(),
                ));
            }
        };

        inventory::credit(&mut tx, &schedules, &booking.schedule_id, booking.number_of_seats)
            .await?;
        tx.commit()
            .await
            .map_err(|e| LifecycleError::storage("db cancel commit failed", e))?;
        Ok(booking)
    }

    async fn transition(
        &self,
        booking_id: &str,
        from: BookingStatus,
        to: BookingStatus,
    ) -> StoreResult<Booking> {
        let bookings = self.table("bookings");
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| LifecycleError::storage("db acquire failed", e))?;
        let sql = format!(
            "UPDATE {bookings} SET booking_status=$1 WHERE id=$2 AND booking_status=$3 \
             RETURNING {BOOKING_COLUMNS}"
        );
        let updated = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(booking_id)
            .bind(from.as_str())
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| LifecycleError::storage("db booking transition failed", e))?;
        match updated {
            Some(row) => booking_from_row(&row),
            None => {
                let current = self.diagnose_booking(&mut conn, booking_id).await?;
                Err(LifecycleError::InvalidState(format!(
                    "booking is {}",
                    current.booking_status
                )))
            }
        }
    }

    async fn record_payment(
        &self,
        booking_id: &str,
        draft: PaymentDraft,
    ) -> StoreResult<(Payment, Booking)> {
        let bookings = self.table("bookings");
        let payments = self.table("payments");
        let mut tx = self.begin().await?;

        let sql = format!(
            "UPDATE {bookings} SET payment_status='paid',booking_status='confirmed' \
             WHERE id=$1 AND payment_status<>'paid' AND booking_status='reserved' \
             RETURNING {BOOKING_COLUMNS}"
        );
        let updated = sqlx::query(&sql)
            .bind(booking_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| LifecycleError::storage("db booking payment flip failed", e))?;
        let booking = match updated {
            Some(row) => booking_from_row(&row)?,
            None => {
                let current = self.diagnose_booking(&mut tx, booking_id).await?;
                if current.payment_status == PaymentStatus::Paid {
                    return Err(LifecycleError::AlreadyPaid);
                }
                return Err(LifecycleError::InvalidState(format!(
                    "booking is {}",
                    current.booking_status
                )));
            }
        };

        let payment = draft.into_payment(&booking, Utc::now());
        let sql = format!(
            "INSERT INTO {payments} ({PAYMENT_COLUMNS}) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)"
        );
        sqlx::query(&sql)
            .bind(&payment.id)
            .bind(&payment.booking_id)
            .bind(payment.amount)
            .bind(payment.payment_method.as_str())
            .bind(payment.payment_status.as_str())
            .bind(&payment.transaction_id)
            .bind(payment.payment_details.as_ref().and_then(json_text))
            .bind(payment.paid_at.map(ts))
            .bind(ts(payment.created_at))
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if db::is_unique_violation(&e) {
                    LifecycleError::AlreadyPaid
                } else {
                    LifecycleError::storage("db payment insert failed", e)
                }
            })?;

        tx.commit()
            .await
            .map_err(|e| LifecycleError::storage("db payment commit failed", e))?;
        Ok((payment, booking))
    }

    async fn booking(&self, booking_id: &str) -> StoreResult<Option<Booking>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| LifecycleError::storage("db acquire failed", e))?;
        self.fetch_booking(&mut conn, booking_id).await
    }

    async fn booking_by_reference(&self, reference: &str) -> StoreResult<Option<Booking>> {
        let bookings = self.table("bookings");
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM {bookings} WHERE booking_reference=$1");
        let row = sqlx::query(&sql)
            .bind(normalize_reference(reference))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LifecycleError::storage("db booking reference lookup failed", e))?;
        row.as_ref().map(booking_from_row).transpose()
    }

    async fn bookings_for_user(&self, user_id: &str) -> StoreResult<Vec<Booking>> {
        let bookings = self.table("bookings");
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM {bookings} WHERE user_id=$1 ORDER BY booked_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LifecycleError::storage("db user bookings query failed", e))?;
        rows.iter().map(booking_from_row).collect()
    }

    async fn payment(&self, payment_id: &str) -> StoreResult<Option<Payment>> {
        let payments = self.table("payments");
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM {payments} WHERE id=$1");
        let row = sqlx::query(&sql)
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LifecycleError::storage("db payment lookup failed", e))?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn payments_for_booking(&self, booking_id: &str) -> StoreResult<Vec<Payment>> {
        let payments = self.table("payments");
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM {payments} WHERE booking_id=$1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(booking_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LifecycleError::storage("db booking payments query failed", e))?;
        rows.iter().map(payment_from_row).collect()
    }

    async fn payments_for_user(&self, user_id: &str) -> StoreResult<Vec<Payment>> {
        let payments = self.table("payments");
        let bookings = self.table("bookings");
        let cols = PAYMENT_COLUMNS
            .split(',')
            .map(|c| format!("p.{c}"))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT {cols} FROM {payments} p JOIN {bookings} b ON b.id = p.booking_id \
             WHERE b.user_id=$1 ORDER BY p.created_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LifecycleError::storage("db user payments query failed", e))?;
        rows.iter().map(payment_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ContactInfo, Passenger};
    use std::sync::Arc;

    // Runs against a real database only when one is provided.
    async fn test_store() -> Option<PgLedgerStore> {
        let url = std::env::var("BOOKING_TEST_DB_URL").ok()?;
        let pool = db::connect(&url).await.expect("connect test db");
        let schema = format!("booking_test_{}", Uuid::new_v4().simple());
        let db_schema = Some(schema);
        db::ensure_schema(&pool, &db_schema)
            .await
            .expect("ensure schema");
        Some(PgLedgerStore::new(pool, db_schema))
    }

    async fn seed_schedule(store: &PgLedgerStore, available: i32) -> String {
        let id = Uuid::new_v4().to_string();
        let sql = format!(
            "INSERT INTO {} (id,route_id,bus_id,driver_id,departure_time,arrival_time,base_price,capacity,available_seats,status,is_active,created_at) \
             VALUES ($1,'r-1','b-1','d-1',$2,$3,200000,40,$4,'scheduled',1,$2)",
            store.table("schedules")
        );
        let now = Utc::now();
        sqlx::query(&sql)
            .bind(&id)
            .bind(ts(now))
            .bind(ts(now + chrono::Duration::hours(3)))
            .bind(available)
            .execute(&store.pool)
            .await
            .expect("seed schedule");
        id
    }

    fn draft(schedule_id: &str, seats: usize) -> ReservationDraft {
        ReservationDraft {
            schedule_id: schedule_id.to_string(),
            user_id: "u-1".to_string(),
            departure_stop: None,
            arrival_stop: None,
            passengers: (0..seats)
                .map(|i| Passenger {
                    full_name: format!("Rider {i}"),
                    date_of_birth: None,
                    id_number: None,
                    seat_number: None,
                })
                .collect(),
            contact_info: ContactInfo::default(),
            special_requests: None,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn last_seats_are_never_oversold() {
        let Some(store) = test_store().await else {
            return;
        };
        let store = Arc::new(store);
        let schedule_id = seed_schedule(&store, 3).await;

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            let schedule_id = schedule_id.clone();
            handles.push(tokio::spawn(async move {
                store.reserve(draft(&schedule_id, 1)).await
            }));
        }
        let mut ok = 0;
        let mut refused = 0;
        for h in handles {
            match h.await.expect("join") {
                Ok(_) => ok += 1,
                Err(LifecycleError::CapacityExceeded { .. }) => refused += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!((ok, refused), (3, 1));
        let inv = store.schedule(&schedule_id).await.unwrap().unwrap();
        assert_eq!(inv.available_seats, 0);
    }

    #[tokio::test]
    async fn cancel_credits_once_and_payment_is_single() {
        let Some(store) = test_store().await else {
            return;
        };
        let schedule_id = seed_schedule(&store, 40).await;

        let booking = store.reserve(draft(&schedule_id, 3)).await.expect("reserve");
        assert_eq!(booking.total_amount, 600_000);
        let (payment, paid) = store
            .record_payment(
                &booking.id,
                PaymentDraft {
                    method: PaymentMethod::Cash,
                    details: None,
                },
            )
            .await
            .expect("pay");
        assert_eq!(payment.amount, 600_000);
        assert_eq!(paid.booking_status, BookingStatus::Confirmed);

        let again = store
            .record_payment(
                &booking.id,
                PaymentDraft {
                    method: PaymentMethod::Cash,
                    details: None,
                },
            )
            .await;
        assert!(matches!(again, Err(LifecycleError::AlreadyPaid)));
        assert_eq!(store.payments_for_booking(&booking.id).await.unwrap().len(), 1);

        store.cancel(&booking.id).await.expect("cancel");
        assert!(matches!(
            store.cancel(&booking.id).await,
            Err(LifecycleError::InvalidState(_))
        ));
        let inv = store.schedule(&schedule_id).await.unwrap().unwrap();
        assert_eq!(inv.available_seats, 40);
    }

    #[tokio::test]
    async fn taken_reference_is_redrawn_inside_the_same_reservation() {
        let Some(store) = test_store().await else {
            return;
        };
        let schedule_id = seed_schedule(&store, 10).await;

        let mut fixed = ["TAKEN001".to_string()].into_iter();
        let first = store
            .reserve_with(draft(&schedule_id, 1), move || {
                fixed.next().unwrap_or_else(new_booking_reference)
            })
            .await
            .expect("first reserve");
        assert_eq!(first.booking_reference, "TAKEN001");

        let mut draws = ["TAKEN001".to_string(), "FRESH002".to_string()].into_iter();
        let second = store
            .reserve_with(draft(&schedule_id, 2), move || {
                draws.next().unwrap_or_else(new_booking_reference)
            })
            .await
            .expect("collision is retried, not surfaced");
        assert_eq!(second.booking_reference, "FRESH002");

        let inv = store.schedule(&schedule_id).await.unwrap().unwrap();
        assert_eq!(inv.available_seats, 7);
        let stored = store
            .booking_by_reference("fresh002")
            .await
            .unwrap()
            .expect("stored booking");
        assert_eq!(stored.id, second.id);
    }
}
