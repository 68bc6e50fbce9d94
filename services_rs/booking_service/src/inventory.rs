//! Atomic seat debit and credit against the schedules table.
//!
//! Both operations are a single conditional `UPDATE`; the row is only written when the
//! bound still holds at commit time, so concurrent reservations can never oversell. When
//! nothing is updated, a follow-up read explains why.

use crate::domain::{ScheduleInventory, ScheduleStatus};
use crate::error::LifecycleError;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};

const INVENTORY_COLUMNS: &str = "id,capacity,available_seats,status,base_price,is_active";
const BOOKABLE_STATUSES: &str = "('scheduled','boarding','delayed')";

pub(crate) fn inventory_from_row(row: &PgRow) -> Result<ScheduleInventory, LifecycleError> {
    let raw_status: String = row
        .try_get("status")
        .map_err(|e| LifecycleError::storage("db schedule status decode failed", e))?;
    let status = ScheduleStatus::parse(&raw_status).ok_or_else(|| {
        LifecycleError::storage("db schedule status unknown", raw_status.as_str())
    })?;
    let decode = |e: sqlx::Error| LifecycleError::storage("db schedule row decode failed", e);
    Ok(ScheduleInventory {
        id: row.try_get("id").map_err(decode)?,
        capacity: row.try_get("capacity").map_err(decode)?,
        available_seats: row.try_get("available_seats").map_err(decode)?,
        status,
        base_price: row.try_get("base_price").map_err(decode)?,
        is_active: row.try_get::<i32, _>("is_active").map_err(decode)? != 0,
    })
}

pub async fn load(
    conn: &mut PgConnection,
    schedules: &str,
    schedule_id: &str,
) -> Result<Option<ScheduleInventory>, LifecycleError> {
    let sql = format!("SELECT {INVENTORY_COLUMNS} FROM {schedules} WHERE id=$1");
    let row = sqlx::query(&sql)
        .bind(schedule_id)
        .fetch_optional(conn)
        .await
        .map_err(|e| LifecycleError::storage("db schedule lookup failed", e))?;
    row.as_ref().map(inventory_from_row).transpose()
}

/// Takes `seats` out of the schedule. Only active schedules in a bookable status with
/// enough free seats are touched.
pub async fn debit(
    conn: &mut PgConnection,
    schedules: &str,
    schedule_id: &str,
    seats: i32,
) -> Result<ScheduleInventory, LifecycleError> {
    if seats <= 0 {
        return Err(LifecycleError::validation(
            "passengers",
            "seat count must be positive",
        ));
    }
    let sql = format!(
        "UPDATE {schedules} SET available_seats = available_seats - $1 \
         WHERE id=$2 AND available_seats >= $1 AND is_active=1 AND status IN {BOOKABLE_STATUSES} \
         RETURNING {INVENTORY_COLUMNS}"
    );
    let updated = sqlx::query(&sql)
        .bind(seats)
        .bind(schedule_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| LifecycleError::storage("db seat debit failed", e))?;
    if let Some(row) = updated {
        return inventory_from_row(&row);
    }

    let current = load(conn, schedules, schedule_id)
        .await?
        .ok_or(LifecycleError::NotFound("schedule"))?;
    current.ensure_bookable()?;
    Err(LifecycleError::CapacityExceeded {
        requested: seats,
        available: current.available_seats,
    })
}

/// Returns `seats` to the schedule, refusing to push the count past capacity.
pub async fn credit(
    conn: &mut PgConnection,
    schedules: &str,
    schedule_id: &str,
    seats: i32,
) -> Result<ScheduleInventory, LifecycleError> {
    let sql = format!(
        "UPDATE {schedules} SET available_seats = available_seats + $1 \
         WHERE id=$2 AND $1 > 0 AND available_seats + $1 <= capacity \
         RETURNING {INVENTORY_COLUMNS}"
    );
    let updated = sqlx::query(&sql)
        .bind(seats)
        .bind(schedule_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| LifecycleError::storage("db seat credit failed", e))?;
    if let Some(row) = updated {
        return inventory_from_row(&row);
    }

    let mut current = load(conn, schedules, schedule_id)
        .await?
        .ok_or(LifecycleError::NotFound("schedule"))?;
    // Surfaces the same invariant error the in-process counter raises.
    current.credit(seats)?;
    Err(LifecycleError::storage(
        "db seat credit not applied",
        schedule_id,
    ))
}
