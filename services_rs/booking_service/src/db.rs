use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

pub fn table_name(schema: &Option<String>, name: &str) -> String {
    match schema {
        Some(s) => format!("{s}.{name}"),
        None => name.to_string(),
    }
}

pub async fn connect(db_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(db_url)
        .await
}

pub async fn ensure_schema(pool: &PgPool, db_schema: &Option<String>) -> Result<(), sqlx::Error> {
    if let Some(schema) = db_schema {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))
            .execute(pool)
            .await?;
    }

    let stations = table_name(db_schema, "stations");
    let companies = table_name(db_schema, "bus_companies");
    let buses = table_name(db_schema, "buses");
    let routes = table_name(db_schema, "routes");
    let route_stops = table_name(db_schema, "route_stops");
    let schedules = table_name(db_schema, "schedules");
    let bookings = table_name(db_schema, "bookings");
    let payments = table_name(db_schema, "payments");

    let ddls = [
        format!(
            "CREATE TABLE IF NOT EXISTS {stations} (\
             id VARCHAR(36) PRIMARY KEY,\
             station_code VARCHAR(32) NOT NULL UNIQUE,\
             station_name VARCHAR(160) NOT NULL,\
             city VARCHAR(120) NOT NULL,\
             province VARCHAR(120) NOT NULL,\
             address TEXT,\
             contact_number VARCHAR(32),\
             latitude DOUBLE PRECISION,\
             longitude DOUBLE PRECISION,\
             facilities TEXT,\
             is_active INTEGER NOT NULL DEFAULT 1\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {companies} (\
             id VARCHAR(36) PRIMARY KEY,\
             company_name VARCHAR(160) NOT NULL,\
             company_code VARCHAR(32) NOT NULL UNIQUE,\
             logo_url VARCHAR(512),\
             contact_number VARCHAR(32),\
             email VARCHAR(160),\
             address TEXT,\
             is_active INTEGER NOT NULL DEFAULT 1,\
             created_at TEXT NOT NULL\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {buses} (\
             id VARCHAR(36) PRIMARY KEY,\
             bus_number VARCHAR(32) NOT NULL UNIQUE,\
             license_plate VARCHAR(32) NOT NULL UNIQUE,\
             company_id VARCHAR(36) NOT NULL,\
             type_name VARCHAR(64),\
             seat_capacity INTEGER NOT NULL,\
             driver_id VARCHAR(64),\
             amenities TEXT,\
             is_active INTEGER NOT NULL DEFAULT 1,\
             created_at TEXT NOT NULL\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {routes} (\
             id VARCHAR(36) PRIMARY KEY,\
             route_code VARCHAR(32) NOT NULL UNIQUE,\
             route_name VARCHAR(160) NOT NULL,\
             departure_station_id VARCHAR(36) NOT NULL,\
             arrival_station_id VARCHAR(36) NOT NULL,\
             distance_km DOUBLE PRECISION,\
             estimated_duration_min INTEGER,\
             is_active INTEGER NOT NULL DEFAULT 1,\
             created_at TEXT NOT NULL\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {route_stops} (\
             route_id VARCHAR(36) NOT NULL,\
             station_id VARCHAR(36) NOT NULL,\
             stop_order INTEGER NOT NULL,\
             distance_from_start DOUBLE PRECISION,\
             time_from_start_min INTEGER,\
             pickup_price BIGINT NOT NULL DEFAULT 0,\
             dropoff_price BIGINT NOT NULL DEFAULT 0,\
             PRIMARY KEY (route_id, station_id)\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {schedules} (\
             id VARCHAR(36) PRIMARY KEY,\
             route_id VARCHAR(36) NOT NULL,\
             bus_id VARCHAR(36) NOT NULL,\
             driver_id VARCHAR(64) NOT NULL,\
             departure_time TEXT NOT NULL,\
             arrival_time TEXT NOT NULL,\
             base_price BIGINT NOT NULL,\
             capacity INTEGER NOT NULL,\
             available_seats INTEGER NOT NULL,\
             status VARCHAR(16) NOT NULL DEFAULT 'scheduled',\
             actual_departure_time TEXT,\
             actual_arrival_time TEXT,\
             is_active INTEGER NOT NULL DEFAULT 1,\
             created_at TEXT NOT NULL,\
             CONSTRAINT schedules_seat_bounds CHECK (available_seats >= 0 AND available_seats <= capacity)\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {bookings} (\
             id VARCHAR(36) PRIMARY KEY,\
             booking_reference VARCHAR(16) NOT NULL UNIQUE,\
             user_id VARCHAR(64) NOT NULL,\
             schedule_id VARCHAR(36) NOT NULL,\
             departure_stop TEXT,\
             arrival_stop TEXT,\
             total_amount BIGINT NOT NULL,\
             number_of_seats INTEGER NOT NULL,\
             payment_status VARCHAR(16) NOT NULL DEFAULT 'pending',\
             booking_status VARCHAR(16) NOT NULL DEFAULT 'reserved',\
             contact_info TEXT,\
             passengers TEXT NOT NULL,\
             special_requests TEXT,\
             booked_at TEXT NOT NULL\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {payments} (\
             id VARCHAR(36) PRIMARY KEY,\
             booking_id VARCHAR(36) NOT NULL,\
             amount BIGINT NOT NULL,\
             payment_method VARCHAR(16) NOT NULL,\
             payment_status VARCHAR(16) NOT NULL DEFAULT 'pending',\
             transaction_id VARCHAR(64) NOT NULL,\
             payment_details TEXT,\
             paid_at TEXT,\
             created_at TEXT NOT NULL\
             )"
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_stations_city ON {stations}(city)"),
        format!("CREATE INDEX IF NOT EXISTS idx_buses_company ON {buses}(company_id)"),
        format!("CREATE INDEX IF NOT EXISTS idx_schedules_departure ON {schedules}(departure_time)"),
        format!("CREATE INDEX IF NOT EXISTS idx_bookings_user ON {bookings}(user_id, booked_at)"),
        format!("CREATE INDEX IF NOT EXISTS idx_bookings_schedule ON {bookings}(schedule_id)"),
        format!("CREATE INDEX IF NOT EXISTS idx_payments_booking ON {payments}(booking_id)"),
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS uq_payments_completed_booking \
             ON {payments}(booking_id) WHERE payment_status = 'completed'"
        ),
    ];

    for ddl in ddls {
        sqlx::query(&ddl).execute(pool).await?;
    }
    Ok(())
}

/// Fixed-width UTC text so stored timestamps compare and sort lexically.
pub fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_db_dt(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(&s.replace('Z', "+00:00"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn row_dt(row: &PgRow, col: &str) -> Result<DateTime<Utc>, String> {
    let raw: String = row.try_get(col).map_err(|e| format!("{col}: {e}"))?;
    parse_db_dt(&raw).ok_or_else(|| format!("{col}: invalid timestamp {raw:?}"))
}

pub fn row_dt_opt(row: &PgRow, col: &str) -> Option<DateTime<Utc>> {
    row.try_get::<Option<String>, _>(col)
        .ok()
        .flatten()
        .and_then(|s| parse_db_dt(&s))
}

/// Decodes an embedded JSON text column; NULL maps to `None`.
pub fn row_json<T: DeserializeOwned>(row: &PgRow, col: &str) -> Result<Option<T>, String> {
    let raw: Option<String> = row.try_get(col).map_err(|e| format!("{col}: {e}"))?;
    match raw.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => serde_json::from_str(s)
            .map(Some)
            .map_err(|e| format!("{col}: {e}")),
    }
}

pub fn json_text<T: serde::Serialize>(value: &T) -> Option<String> {
    serde_json::to_string(value).ok()
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_name_honors_schema() {
        assert_eq!(table_name(&None, "bookings"), "bookings");
        assert_eq!(
            table_name(&Some("busline".to_string()), "bookings"),
            "busline.bookings"
        );
    }

    #[test]
    fn db_timestamps_accept_z_and_offsets() {
        let a = parse_db_dt("2026-05-01T08:30:00Z").expect("z");
        let b = parse_db_dt("2026-05-01T15:30:00+07:00").expect("offset");
        assert_eq!(a, b);
        assert!(parse_db_dt("").is_none());
        assert!(parse_db_dt("yesterday").is_none());
    }

    #[test]
    fn stored_timestamps_sort_lexically() {
        let early = parse_db_dt("2026-05-01T08:30:00Z").unwrap();
        let late = parse_db_dt("2026-05-01T08:30:00.5Z").unwrap();
        assert!(ts(early) < ts(late));
        assert_eq!(ts(early), "2026-05-01T08:30:00.000000Z");
        assert_eq!(parse_db_dt(&ts(late)), Some(late));
    }
}
