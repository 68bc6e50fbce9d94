//! Stations, companies, buses, routes and schedules.
//!
//! Read endpoints are open to any gateway-verified caller; writes check roles on the
//! forwarded identity. Seat counts on schedules are only ever written here at creation
//! time; afterwards they belong to the booking lifecycle.

use crate::db::{self, json_text, parse_db_dt, ts};
use crate::domain::ScheduleStatus;
use crate::error::{ApiError, ApiJson, ApiResult};
use crate::models::*;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use busline_common::identity::{Requester, ROLE_ADMIN, ROLE_BUS_MANAGER};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

const MANAGER_ROLES: &[&str] = &[ROLE_BUS_MANAGER, ROLE_ADMIN];
const MAX_BUS_SEATS: i32 = 100;

fn require_roles(requester: &Requester, roles: &[&str]) -> ApiResult<()> {
    if requester.has_any_role(roles) {
        Ok(())
    } else {
        Err(ApiError::forbidden("access denied"))
    }
}

fn required(field: &str, raw: &str, max_len: usize) -> ApiResult<String> {
    let v = raw.trim();
    if v.is_empty() {
        return Err(ApiError::invalid_field(field, format!("{field} required")));
    }
    if v.chars().count() > max_len {
        return Err(ApiError::invalid_field(field, format!("{field} too long")));
    }
    Ok(v.to_string())
}

fn optional(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn normalize_limit(raw: Option<i64>, default: i64, min: i64, max: i64) -> i64 {
    raw.unwrap_or(default).clamp(min, max)
}

fn parse_iso8601(field: &str, raw: &str) -> ApiResult<DateTime<Utc>> {
    parse_db_dt(raw).ok_or_else(|| {
        ApiError::invalid_field(field, "invalid date format; use ISO8601 with offset")
    })
}

fn json_list(row: &PgRow, col: &str) -> Vec<String> {
    db::row_json::<Vec<String>>(row, col)
        .ok()
        .flatten()
        .unwrap_or_default()
}

fn unique_or_db(context: &'static str, conflict: &'static str) -> impl Fn(sqlx::Error) -> ApiError {
    move |e| {
        if db::is_unique_violation(&e) {
            ApiError::bad_request(conflict)
        } else {
            ApiError::db(context, e)
        }
    }
}

// Stations

const STATION_COLUMNS: &str = "id,station_code,station_name,city,province,address,contact_number,\
     latitude,longitude,facilities,is_active";

fn row_to_station(r: &PgRow) -> StationOut {
    StationOut {
        id: r.try_get("id").unwrap_or_default(),
        station_code: r.try_get("station_code").unwrap_or_default(),
        station_name: r.try_get("station_name").unwrap_or_default(),
        city: r.try_get("city").unwrap_or_default(),
        province: r.try_get("province").unwrap_or_default(),
        address: db::row_json(r, "address").ok().flatten(),
        contact_number: r.try_get("contact_number").unwrap_or(None),
        latitude: r.try_get("latitude").unwrap_or(None),
        longitude: r.try_get("longitude").unwrap_or(None),
        facilities: json_list(r, "facilities"),
        is_active: r.try_get::<i32, _>("is_active").unwrap_or(0) != 0,
    }
}

pub async fn search_stations(
    State(state): State<AppState>,
    Query(params): Query<StationSearchParams>,
) -> ApiResult<axum::Json<StationSearchOut>> {
    let q = params.q.unwrap_or_default().trim().to_lowercase();
    let city = params.city.unwrap_or_default().trim().to_lowercase();
    if q.is_empty() && city.is_empty() {
        return Err(ApiError::bad_request("q or city required"));
    }
    let limit = normalize_limit(params.limit, 20, 1, 100);

    let stations = state.table("stations");
    let sql = format!(
        "SELECT {STATION_COLUMNS} FROM {stations} WHERE is_active=1 \
         AND ($1 = '' OR LOWER(city) LIKE $2 OR LOWER(station_name) LIKE $2 OR LOWER(province) LIKE $2) \
         AND ($3 = '' OR LOWER(city) = $3) \
         ORDER BY city ASC, station_name ASC LIMIT $4"
    );
    let rows = sqlx::query(&sql)
        .bind(&q)
        .bind(format!("%{q}%"))
        .bind(&city)
        .bind(limit)
        .fetch_all(&state.pool)
        .await
        .map_err(|e| ApiError::db("db search_stations failed", e))?;

    let count = rows.len();
    let mut grouped: BTreeMap<String, Vec<StationOut>> = BTreeMap::new();
    for r in &rows {
        let station = row_to_station(r);
        grouped.entry(station.city.clone()).or_default().push(station);
    }
    let data = grouped
        .into_iter()
        .map(|(city, stations)| CityGroupOut { city, stations })
        .collect();
    Ok(axum::Json(StationSearchOut { count, data }))
}

pub async fn list_cities(State(state): State<AppState>) -> ApiResult<axum::Json<Vec<CityOut>>> {
    let stations = state.table("stations");
    let sql = format!(
        "SELECT city, COUNT(*) AS station_count FROM {stations} WHERE is_active=1 \
         GROUP BY city ORDER BY city ASC"
    );
    let rows = sqlx::query(&sql)
        .fetch_all(&state.pool)
        .await
        .map_err(|e| ApiError::db("db list_cities failed", e))?;
    Ok(axum::Json(
        rows.iter()
            .map(|r| CityOut {
                city: r.try_get("city").unwrap_or_default(),
                station_count: r.try_get("station_count").unwrap_or(0),
            })
            .collect(),
    ))
}

pub async fn stations_by_city(
    Path(city): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<Vec<StationOut>>> {
    let city = city.trim().to_lowercase();
    let stations = state.table("stations");
    let sql = format!(
        "SELECT {STATION_COLUMNS} FROM {stations} WHERE is_active=1 AND LOWER(city)=$1 \
         ORDER BY station_name ASC"
    );
    let rows = sqlx::query(&sql)
        .bind(&city)
        .fetch_all(&state.pool)
        .await
        .map_err(|e| ApiError::db("db stations_by_city failed", e))?;
    Ok(axum::Json(rows.iter().map(row_to_station).collect()))
}

pub async fn station_detail(
    Path(station_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<StationOut>> {
    let stations = state.table("stations");
    let sql = format!("SELECT {STATION_COLUMNS} FROM {stations} WHERE id=$1");
    let row = sqlx::query(&sql)
        .bind(station_id.trim())
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| ApiError::db("db station_detail failed", e))?
        .ok_or_else(|| ApiError::not_found("station not found"))?;
    Ok(axum::Json(row_to_station(&row)))
}

pub async fn create_station(
    State(state): State<AppState>,
    requester: Requester,
    ApiJson(body): ApiJson<StationIn>,
) -> ApiResult<(StatusCode, axum::Json<StationOut>)> {
    require_roles(&requester, &[ROLE_ADMIN])?;
    let out = StationOut {
        id: Uuid::new_v4().to_string(),
        station_code: required("station_code", &body.station_code, 32)?.to_ascii_uppercase(),
        station_name: required("station_name", &body.station_name, 160)?,
        city: required("city", &body.city, 120)?,
        province: required("province", &body.province, 120)?,
        address: body.address,
        contact_number: optional(body.contact_number),
        latitude: body.latitude.filter(|v| (-90.0..=90.0).contains(v)),
        longitude: body.longitude.filter(|v| (-180.0..=180.0).contains(v)),
        facilities: body
            .facilities
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect(),
        is_active: true,
    };

    let stations = state.table("stations");
    let sql = format!(
        "INSERT INTO {stations} ({STATION_COLUMNS}) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,1)"
    );
    sqlx::query(&sql)
        .bind(&out.id)
        .bind(&out.station_code)
        .bind(&out.station_name)
        .bind(&out.city)
        .bind(&out.province)
        .bind(out.address.as_ref().and_then(json_text))
        .bind(&out.contact_number)
        .bind(out.latitude)
        .bind(out.longitude)
        .bind(json_text(&out.facilities))
        .execute(&state.pool)
        .await
        .map_err(unique_or_db("db create_station failed", "station code already exists"))?;

    tracing::info!(station_id = %out.id, station_code = %out.station_code, "station created");
    Ok((StatusCode::CREATED, axum::Json(out)))
}

// Companies and buses

const COMPANY_COLUMNS: &str =
    "id,company_name,company_code,logo_url,contact_number,email,address,is_active,created_at";
const BUS_COLUMNS: &str = "id,bus_number,license_plate,company_id,type_name,seat_capacity,\
     driver_id,amenities,is_active,created_at";

fn row_to_company(r: &PgRow) -> CompanyOut {
    CompanyOut {
        id: r.try_get("id").unwrap_or_default(),
        company_name: r.try_get("company_name").unwrap_or_default(),
        company_code: r.try_get("company_code").unwrap_or_default(),
        logo_url: r.try_get("logo_url").unwrap_or(None),
        contact_number: r.try_get("contact_number").unwrap_or(None),
        email: r.try_get("email").unwrap_or(None),
        address: r.try_get("address").unwrap_or(None),
        is_active: r.try_get::<i32, _>("is_active").unwrap_or(0) != 0,
        created_at: db::row_dt_opt(r, "created_at"),
    }
}

fn row_to_bus(r: &PgRow) -> BusOut {
    BusOut {
        id: r.try_get("id").unwrap_or_default(),
        bus_number: r.try_get("bus_number").unwrap_or_default(),
        license_plate: r.try_get("license_plate").unwrap_or_default(),
        company_id: r.try_get("company_id").unwrap_or_default(),
        type_name: r.try_get("type_name").unwrap_or(None),
        seat_capacity: r.try_get("seat_capacity").unwrap_or(0),
        driver_id: r.try_get("driver_id").unwrap_or(None),
        amenities: json_list(r, "amenities"),
        is_active: r.try_get::<i32, _>("is_active").unwrap_or(0) != 0,
        created_at: db::row_dt_opt(r, "created_at"),
    }
}

pub async fn list_companies(
    State(state): State<AppState>,
) -> ApiResult<axum::Json<Vec<CompanyOut>>> {
    let companies = state.table("bus_companies");
    let sql = format!(
        "SELECT {COMPANY_COLUMNS} FROM {companies} WHERE is_active=1 ORDER BY company_name ASC"
    );
    let rows = sqlx::query(&sql)
        .fetch_all(&state.pool)
        .await
        .map_err(|e| ApiError::db("db list_companies failed", e))?;
    Ok(axum::Json(rows.iter().map(row_to_company).collect()))
}

pub async fn create_company(
    State(state): State<AppState>,
    requester: Requester,
    ApiJson(body): ApiJson<CompanyIn>,
) -> ApiResult<(StatusCode, axum::Json<CompanyOut>)> {
    require_roles(&requester, &[ROLE_ADMIN])?;
    let email = optional(body.email);
    if email.as_deref().is_some_and(|e| !e.contains('@')) {
        return Err(ApiError::invalid_field("email", "invalid email address"));
    }
    let out = CompanyOut {
        id: Uuid::new_v4().to_string(),
        company_name: required("company_name", &body.company_name, 160)?,
        company_code: required("company_code", &body.company_code, 32)?.to_ascii_uppercase(),
        logo_url: optional(body.logo_url),
        contact_number: optional(body.contact_number),
        email,
        address: optional(body.address),
        is_active: true,
        created_at: Some(Utc::now()),
    };

    let companies = state.table("bus_companies");
    let sql = format!(
        "INSERT INTO {companies} ({COMPANY_COLUMNS}) VALUES ($1,$2,$3,$4,$5,$6,$7,1,$8)"
    );
    sqlx::query(&sql)
        .bind(&out.id)
        .bind(&out.company_name)
        .bind(&out.company_code)
        .bind(&out.logo_url)
        .bind(&out.contact_number)
        .bind(&out.email)
        .bind(&out.address)
        .bind(out.created_at.map(ts))
        .execute(&state.pool)
        .await
        .map_err(unique_or_db("db create_company failed", "company code already exists"))?;

    tracing::info!(company_id = %out.id, company_code = %out.company_code, "company created");
    Ok((StatusCode::CREATED, axum::Json(out)))
}

pub async fn company_buses(
    Path(company_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<Vec<BusOut>>> {
    let buses = state.table("buses");
    let sql = format!(
        "SELECT {BUS_COLUMNS} FROM {buses} WHERE company_id=$1 AND is_active=1 ORDER BY bus_number ASC"
    );
    let rows = sqlx::query(&sql)
        .bind(company_id.trim())
        .fetch_all(&state.pool)
        .await
        .map_err(|e| ApiError::db("db company_buses failed", e))?;
    Ok(axum::Json(rows.iter().map(row_to_bus).collect()))
}

pub async fn create_bus(
    State(state): State<AppState>,
    requester: Requester,
    ApiJson(body): ApiJson<BusIn>,
) -> ApiResult<(StatusCode, axum::Json<BusOut>)> {
    require_roles(&requester, MANAGER_ROLES)?;
    if !(1..=MAX_BUS_SEATS).contains(&body.seat_capacity) {
        return Err(ApiError::invalid_field(
            "seat_capacity",
            format!("seat_capacity must be between 1 and {MAX_BUS_SEATS}"),
        ));
    }
    let company_id = required("company_id", &body.company_id, 36)?;

    let companies = state.table("bus_companies");
    let exists = sqlx::query(&format!(
        "SELECT 1 FROM {companies} WHERE id=$1 AND is_active=1"
    ))
    .bind(&company_id)
    .fetch_optional(&state.pool)
    .await
    .map_err(|e| ApiError::db("db company lookup failed", e))?
    .is_some();
    if !exists {
        return Err(ApiError::invalid_field("company_id", "company not found"));
    }

    let out = BusOut {
        id: Uuid::new_v4().to_string(),
        bus_number: required("bus_number", &body.bus_number, 32)?,
        license_plate: required("license_plate", &body.license_plate, 32)?.to_ascii_uppercase(),
        company_id,
        type_name: optional(body.type_name),
        seat_capacity: body.seat_capacity,
        driver_id: optional(body.driver_id),
        amenities: body
            .amenities
            .into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect(),
        is_active: true,
        created_at: Some(Utc::now()),
    };

    let buses = state.table("buses");
    let sql = format!("INSERT INTO {buses} ({BUS_COLUMNS}) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,1,$9)");
    sqlx::query(&sql)
        .bind(&out.id)
        .bind(&out.bus_number)
        .bind(&out.license_plate)
        .bind(&out.company_id)
        .bind(&out.type_name)
        .bind(out.seat_capacity)
        .bind(&out.driver_id)
        .bind(json_text(&out.amenities))
        .bind(out.created_at.map(ts))
        .execute(&state.pool)
        .await
        .map_err(unique_or_db(
            "db create_bus failed",
            "bus number or license plate already exists",
        ))?;

    tracing::info!(bus_id = %out.id, company_id = %out.company_id, seats = out.seat_capacity, "bus created");
    Ok((StatusCode::CREATED, axum::Json(out)))
}

// Routes

const ROUTE_COLUMNS: &str = "id,route_code,route_name,departure_station_id,arrival_station_id,\
     distance_km,estimated_duration_min,is_active";

fn row_to_route(r: &PgRow) -> RouteOut {
    RouteOut {
        id: r.try_get("id").unwrap_or_default(),
        route_code: r.try_get("route_code").unwrap_or_default(),
        route_name: r.try_get("route_name").unwrap_or_default(),
        departure_station_id: r.try_get("departure_station_id").unwrap_or_default(),
        arrival_station_id: r.try_get("arrival_station_id").unwrap_or_default(),
        distance_km: r.try_get("distance_km").unwrap_or(None),
        estimated_duration_min: r.try_get("estimated_duration_min").unwrap_or(None),
        is_active: r.try_get::<i32, _>("is_active").unwrap_or(0) != 0,
        stops: Vec::new(),
    }
}

async fn attach_stops(state: &AppState, routes: &mut [RouteOut]) -> ApiResult<()> {
    if routes.is_empty() {
        return Ok(());
    }
    let route_stops = state.table("route_stops");
    let stations = state.table("stations");
    let ids: Vec<String> = routes.iter().map(|r| r.id.clone()).collect();
    let sql = format!(
        "SELECT rs.route_id,rs.station_id,st.station_name,st.city,rs.stop_order,\
         rs.distance_from_start,rs.time_from_start_min,rs.pickup_price,rs.dropoff_price \
         FROM {route_stops} rs LEFT JOIN {stations} st ON st.id = rs.station_id \
         WHERE rs.route_id = ANY($1) ORDER BY rs.route_id, rs.stop_order ASC"
    );
    let rows = sqlx::query(&sql)
        .bind(&ids)
        .fetch_all(&state.pool)
        .await
        .map_err(|e| ApiError::db("db route stops query failed", e))?;

    let mut by_route: HashMap<String, Vec<RouteStopOut>> = HashMap::new();
    for r in rows {
        let route_id: String = r.try_get("route_id").unwrap_or_default();
        by_route.entry(route_id).or_default().push(RouteStopOut {
            station_id: r.try_get("station_id").unwrap_or_default(),
            station_name: r.try_get("station_name").unwrap_or(None),
            city: r.try_get("city").unwrap_or(None),
            stop_order: r.try_get("stop_order").unwrap_or(0),
            distance_from_start: r.try_get("distance_from_start").unwrap_or(None),
            time_from_start_min: r.try_get("time_from_start_min").unwrap_or(None),
            pickup_price: r.try_get("pickup_price").unwrap_or(0),
            dropoff_price: r.try_get("dropoff_price").unwrap_or(0),
        });
    }
    for route in routes.iter_mut() {
        route.stops = by_route.remove(&route.id).unwrap_or_default();
    }
    Ok(())
}

pub async fn list_routes(State(state): State<AppState>) -> ApiResult<axum::Json<Vec<RouteOut>>> {
    let routes = state.table("routes");
    let sql = format!(
        "SELECT {ROUTE_COLUMNS} FROM {routes} WHERE is_active=1 ORDER BY route_name ASC"
    );
    let rows = sqlx::query(&sql)
        .fetch_all(&state.pool)
        .await
        .map_err(|e| ApiError::db("db list_routes failed", e))?;
    let mut out: Vec<RouteOut> = rows.iter().map(row_to_route).collect();
    attach_stops(&state, &mut out).await?;
    Ok(axum::Json(out))
}

pub async fn popular_routes(
    State(state): State<AppState>,
) -> ApiResult<axum::Json<Vec<PopularRouteOut>>> {
    let routes = state.table("routes");
    let schedules = state.table("schedules");
    let bookings = state.table("bookings");
    let cols = ROUTE_COLUMNS
        .split(',')
        .map(|c| format!("r.{c}"))
        .collect::<Vec<_>>()
        .join(",");
    let sql = format!(
        "SELECT {cols}, COALESCE(SUM(b.number_of_seats), 0)::BIGINT AS booked_seats \
         FROM {routes} r \
         LEFT JOIN {schedules} s ON s.route_id = r.id \
         LEFT JOIN {bookings} b ON b.schedule_id = s.id AND b.booking_status <> 'cancelled' \
         WHERE r.is_active=1 \
         GROUP BY {cols} \
         ORDER BY booked_seats DESC, r.route_name ASC LIMIT 10"
    );
    let rows = sqlx::query(&sql)
        .fetch_all(&state.pool)
        .await
        .map_err(|e| ApiError::db("db popular_routes failed", e))?;

    let mut routes_out: Vec<RouteOut> = rows.iter().map(row_to_route).collect();
    attach_stops(&state, &mut routes_out).await?;
    let out = routes_out
        .into_iter()
        .zip(rows.iter())
        .map(|(route, r)| PopularRouteOut {
            route,
            booked_seats: r.try_get("booked_seats").unwrap_or(0),
        })
        .collect();
    Ok(axum::Json(out))
}

/// Orders the stop list and adds the terminal stations when the caller left them out.
fn normalize_stops(
    departure_station_id: &str,
    arrival_station_id: &str,
    mut stops: Vec<RouteStopIn>,
) -> ApiResult<Vec<RouteStopIn>> {
    let mut seen_stations = HashSet::new();
    let mut seen_orders = HashSet::new();
    for s in stops.iter_mut() {
        s.station_id = s.station_id.trim().to_string();
        if s.station_id.is_empty() {
            return Err(ApiError::invalid_field("stops", "station_id required"));
        }
        if s.pickup_price < 0 || s.dropoff_price < 0 {
            return Err(ApiError::invalid_field("stops", "stop prices must be >= 0"));
        }
        if !seen_stations.insert(s.station_id.clone()) || !seen_orders.insert(s.stop_order) {
            return Err(ApiError::invalid_field(
                "stops",
                "stations and stop orders must be unique",
            ));
        }
    }
    stops.sort_by_key(|s| s.stop_order);

    if !seen_stations.contains(departure_station_id) {
        let order = stops.first().map(|s| s.stop_order - 1).unwrap_or(0);
        stops.insert(0, terminal_stop(departure_station_id, order));
    }
    if !seen_stations.contains(arrival_station_id) {
        let order = stops.last().map(|s| s.stop_order + 1).unwrap_or(1);
        stops.push(terminal_stop(arrival_station_id, order));
    }
    let first = stops.first().map(|s| s.station_id.as_str());
    let last = stops.last().map(|s| s.station_id.as_str());
    if first != Some(departure_station_id) || last != Some(arrival_station_id) {
        return Err(ApiError::invalid_field(
            "stops",
            "route must start at its departure station and end at its arrival station",
        ));
    }
    Ok(stops)
}

fn terminal_stop(station_id: &str, stop_order: i32) -> RouteStopIn {
    RouteStopIn {
        station_id: station_id.to_string(),
        stop_order,
        distance_from_start: None,
        time_from_start_min: None,
        pickup_price: 0,
        dropoff_price: 0,
    }
}

pub async fn create_route(
    State(state): State<AppState>,
    requester: Requester,
    ApiJson(body): ApiJson<RouteIn>,
) -> ApiResult<(StatusCode, axum::Json<RouteOut>)> {
    require_roles(&requester, MANAGER_ROLES)?;
    let route_code = required("route_code", &body.route_code, 32)?.to_ascii_uppercase();
    let route_name = required("route_name", &body.route_name, 160)?;
    let departure_station_id = required("departure_station_id", &body.departure_station_id, 36)?;
    let arrival_station_id = required("arrival_station_id", &body.arrival_station_id, 36)?;
    if departure_station_id == arrival_station_id {
        return Err(ApiError::invalid_field(
            "arrival_station_id",
            "departure and arrival stations must differ",
        ));
    }
    if body.distance_km.is_some_and(|d| d < 0.0) {
        return Err(ApiError::invalid_field("distance_km", "distance must be >= 0"));
    }
    let stops = normalize_stops(&departure_station_id, &arrival_station_id, body.stops)?;

    let stations = state.table("stations");
    let station_ids: Vec<String> = stops.iter().map(|s| s.station_id.clone()).collect();
    let known: i64 = sqlx::query(&format!(
        "SELECT COUNT(*) AS n FROM {stations} WHERE id = ANY($1) AND is_active=1"
    ))
    .bind(&station_ids)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| ApiError::db("db route station check failed", e))?
    .try_get("n")
    .unwrap_or(0);
    if known != station_ids.len() as i64 {
        return Err(ApiError::invalid_field("stops", "unknown or inactive station"));
    }

    let id = Uuid::new_v4().to_string();
    let routes = state.table("routes");
    let route_stops = state.table("route_stops");
    let mut tx = state
        .pool
        .begin()
        .await
        .map_err(|e| ApiError::db("db begin tx failed", e))?;
    sqlx::query(&format!(
        "INSERT INTO {routes} ({ROUTE_COLUMNS},created_at) VALUES ($1,$2,$3,$4,$5,$6,$7,1,$8)"
    ))
    .bind(&id)
    .bind(&route_code)
    .bind(&route_name)
    .bind(&departure_station_id)
    .bind(&arrival_station_id)
    .bind(body.distance_km)
    .bind(body.estimated_duration_min)
    .bind(ts(Utc::now()))
    .execute(&mut *tx)
    .await
    .map_err(unique_or_db("db create_route failed", "route code already exists"))?;

    let stop_sql = format!(
        "INSERT INTO {route_stops} (route_id,station_id,stop_order,distance_from_start,time_from_start_min,pickup_price,dropoff_price) \
         VALUES ($1,$2,$3,$4,$5,$6,$7)"
    );
    for s in &stops {
        sqlx::query(&stop_sql)
            .bind(&id)
            .bind(&s.station_id)
            .bind(s.stop_order)
            .bind(s.distance_from_start)
            .bind(s.time_from_start_min)
            .bind(s.pickup_price)
            .bind(s.dropoff_price)
            .execute(&mut *tx)
            .await
            .map_err(|e| ApiError::db("db insert route stop failed", e))?;
    }
    tx.commit()
        .await
        .map_err(|e| ApiError::db("db create_route commit failed", e))?;

    tracing::info!(route_id = %id, route_code = %route_code, stops = stops.len(), "route created");
    let mut out = vec![RouteOut {
        id,
        route_code,
        route_name,
        departure_station_id,
        arrival_station_id,
        distance_km: body.distance_km,
        estimated_duration_min: body.estimated_duration_min,
        is_active: true,
        stops: Vec::new(),
    }];
    attach_stops(&state, &mut out).await?;
    let route = out
        .pop()
        .ok_or_else(|| ApiError::internal("route vanished after insert"))?;
    Ok((StatusCode::CREATED, axum::Json(route)))
}

// Schedules

fn schedule_select(state: &AppState) -> String {
    let schedules = state.table("schedules");
    let routes = state.table("routes");
    let stations = state.table("stations");
    let buses = state.table("buses");
    let companies = state.table("bus_companies");
    format!(
        "SELECT s.id,s.route_id,r.route_name,ds.city AS departure_city,arr.city AS arrival_city,\
         s.bus_id,b.bus_number,c.company_name,s.driver_id,s.departure_time,s.arrival_time,\
         s.base_price,s.capacity,s.available_seats,s.status,s.actual_departure_time,\
         s.actual_arrival_time,s.is_active \
         FROM {schedules} s \
         LEFT JOIN {routes} r ON r.id = s.route_id \
         LEFT JOIN {stations} ds ON ds.id = r.departure_station_id \
         LEFT JOIN {stations} arr ON arr.id = r.arrival_station_id \
         LEFT JOIN {buses} b ON b.id = s.bus_id \
         LEFT JOIN {companies} c ON c.id = b.company_id"
    )
}

fn row_to_schedule(r: &PgRow) -> ApiResult<ScheduleOut> {
    let raw_status: String = r.try_get("status").unwrap_or_default();
    let status = ScheduleStatus::parse(&raw_status).ok_or_else(|| {
        tracing::error!(status = %raw_status, "unknown schedule status in db");
        ApiError::internal("database error")
    })?;
    let dt = |col: &str| {
        db::row_dt(r, col).map_err(|e| {
            tracing::error!(error = %e, "db schedule timestamp decode failed");
            ApiError::internal("database error")
        })
    };
    Ok(ScheduleOut {
        id: r.try_get("id").unwrap_or_default(),
        route_id: r.try_get("route_id").unwrap_or_default(),
        route_name: r.try_get("route_name").unwrap_or(None),
        departure_city: r.try_get("departure_city").unwrap_or(None),
        arrival_city: r.try_get("arrival_city").unwrap_or(None),
        bus_id: r.try_get("bus_id").unwrap_or_default(),
        bus_number: r.try_get("bus_number").unwrap_or(None),
        company_name: r.try_get("company_name").unwrap_or(None),
        driver_id: r.try_get("driver_id").unwrap_or_default(),
        departure_time: dt("departure_time")?,
        arrival_time: dt("arrival_time")?,
        base_price: r.try_get("base_price").unwrap_or(0),
        capacity: r.try_get("capacity").unwrap_or(0),
        available_seats: r.try_get("available_seats").unwrap_or(0),
        status,
        actual_departure_time: db::row_dt_opt(r, "actual_departure_time"),
        actual_arrival_time: db::row_dt_opt(r, "actual_arrival_time"),
        is_active: r.try_get::<i32, _>("is_active").unwrap_or(0) != 0,
    })
}

async fn fetch_schedule(state: &AppState, schedule_id: &str) -> ApiResult<ScheduleOut> {
    let sql = format!("{} WHERE s.id=$1", schedule_select(state));
    let row = sqlx::query(&sql)
        .bind(schedule_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| ApiError::db("db schedule lookup failed", e))?
        .ok_or_else(|| ApiError::not_found("schedule not found"))?;
    row_to_schedule(&row)
}

/// UTC day window `[date, date + 1)` as stored-timestamp bounds.
fn day_window(raw: &str) -> ApiResult<(String, String)> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        ApiError::invalid_field("departure_date", "departure_date must be YYYY-MM-DD")
    })?;
    let start = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| ApiError::invalid_field("departure_date", "invalid date"))?
        .and_utc();
    Ok((ts(start), ts(start + Duration::days(1))))
}

pub async fn search_schedules(
    State(state): State<AppState>,
    Query(params): Query<ScheduleSearchParams>,
) -> ApiResult<axum::Json<ScheduleListOut>> {
    let departure_city = optional(params.departure_city);
    let arrival_city = optional(params.arrival_city);
    let departure_date = optional(params.departure_date);
    let (Some(departure_city), Some(arrival_city), Some(departure_date)) =
        (departure_city, arrival_city, departure_date)
    else {
        return Err(ApiError::bad_request(
            "departure_city, arrival_city and departure_date are required",
        ));
    };
    let passengers = params.passengers.unwrap_or(1);
    if passengers < 1 {
        return Err(ApiError::invalid_field("passengers", "passengers must be >= 1"));
    }
    let (from, to) = day_window(&departure_date)?;

    let sql = format!(
        "{} WHERE s.status='scheduled' AND s.is_active=1 AND s.available_seats >= $1 \
         AND s.departure_time >= $2 AND s.departure_time < $3 \
         AND LOWER(ds.city)=LOWER($4) AND LOWER(arr.city)=LOWER($5) \
         ORDER BY s.departure_time ASC",
        schedule_select(&state)
    );
    let rows = sqlx::query(&sql)
        .bind(passengers)
        .bind(&from)
        .bind(&to)
        .bind(&departure_city)
        .bind(&arrival_city)
        .fetch_all(&state.pool)
        .await
        .map_err(|e| ApiError::db("db search_schedules failed", e))?;

    let schedules = rows.iter().map(row_to_schedule).collect::<ApiResult<Vec<_>>>()?;
    Ok(axum::Json(ScheduleListOut {
        count: schedules.len(),
        schedules,
    }))
}

pub async fn schedule_detail(
    Path(schedule_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<ScheduleOut>> {
    Ok(axum::Json(fetch_schedule(&state, schedule_id.trim()).await?))
}

pub async fn create_schedule(
    State(state): State<AppState>,
    requester: Requester,
    ApiJson(body): ApiJson<ScheduleIn>,
) -> ApiResult<(StatusCode, axum::Json<ScheduleOut>)> {
    require_roles(&requester, MANAGER_ROLES)?;
    let route_id = required("route_id", &body.route_id, 36)?;
    let bus_id = required("bus_id", &body.bus_id, 36)?;
    let driver_id = required("driver_id", &body.driver_id, 64)?;
    let departure_time = parse_iso8601("departure_time", &body.departure_time)?;
    let arrival_time = parse_iso8601("arrival_time", &body.arrival_time)?;
    if arrival_time <= departure_time {
        return Err(ApiError::invalid_field(
            "arrival_time",
            "arrival_time must be after departure_time",
        ));
    }
    if body.base_price <= 0 {
        return Err(ApiError::invalid_field("base_price", "base_price must be > 0"));
    }

    let routes = state.table("routes");
    let route_ok = sqlx::query(&format!(
        "SELECT 1 FROM {routes} WHERE id=$1 AND is_active=1"
    ))
    .bind(&route_id)
    .fetch_optional(&state.pool)
    .await
    .map_err(|e| ApiError::db("db route lookup failed", e))?
    .is_some();
    if !route_ok {
        return Err(ApiError::invalid_field("route_id", "route not found"));
    }

    let buses = state.table("buses");
    let capacity: i32 = sqlx::query(&format!(
        "SELECT seat_capacity FROM {buses} WHERE id=$1 AND is_active=1"
    ))
    .bind(&bus_id)
    .fetch_optional(&state.pool)
    .await
    .map_err(|e| ApiError::db("db bus lookup failed", e))?
    .ok_or_else(|| ApiError::invalid_field("bus_id", "bus not found"))?
    .try_get("seat_capacity")
    .unwrap_or(0);
    if capacity < 1 {
        return Err(ApiError::invalid_field("bus_id", "bus has no seats"));
    }

    let id = Uuid::new_v4().to_string();
    let schedules = state.table("schedules");
    let sql = format!(
        "INSERT INTO {schedules} (id,route_id,bus_id,driver_id,departure_time,arrival_time,base_price,capacity,available_seats,status,is_active,created_at) \
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$8,'scheduled',1,$9)"
    );
    sqlx::query(&sql)
        .bind(&id)
        .bind(&route_id)
        .bind(&bus_id)
        .bind(&driver_id)
        .bind(ts(departure_time))
        .bind(ts(arrival_time))
        .bind(body.base_price)
        .bind(capacity)
        .bind(ts(Utc::now()))
        .execute(&state.pool)
        .await
        .map_err(|e| ApiError::db("db create_schedule failed", e))?;

    tracing::info!(schedule_id = %id, route_id = %route_id, capacity, "schedule created");
    let out = fetch_schedule(&state, &id).await?;
    Ok((StatusCode::CREATED, axum::Json(out)))
}

pub async fn update_schedule_status(
    Path(schedule_id): Path<String>,
    State(state): State<AppState>,
    requester: Requester,
    ApiJson(body): ApiJson<ScheduleStatusIn>,
) -> ApiResult<axum::Json<ScheduleOut>> {
    require_roles(&requester, MANAGER_ROLES)?;
    let schedule_id = schedule_id.trim().to_string();
    let current = fetch_schedule(&state, &schedule_id).await?;
    let next = body.status;
    if !current.status.can_transition_to(next) {
        return Err(ApiError::invalid_field(
            "status",
            format!("cannot move schedule from {} to {next}", current.status),
        ));
    }

    let now = ts(Utc::now());
    let stamp = match next {
        ScheduleStatus::Departed => ",actual_departure_time=$4",
        ScheduleStatus::Arrived => ",actual_arrival_time=$4",
        _ => "",
    };
    let schedules = state.table("schedules");
    let sql = format!(
        "UPDATE {schedules} SET status=$1{stamp} WHERE id=$2 AND status=$3"
    );
    let mut q = sqlx::query(&sql)
        .bind(next.as_str())
        .bind(&schedule_id)
        .bind(current.status.as_str());
    if !stamp.is_empty() {
        q = q.bind(&now);
    }
    let res = q
        .execute(&state.pool)
        .await
        .map_err(|e| ApiError::db("db update_schedule_status failed", e))?;
    if res.rows_affected() == 0 {
        return Err(ApiError::bad_request("schedule status changed concurrently"));
    }

    tracing::info!(schedule_id = %schedule_id, from = %current.status, to = %next, "schedule status changed");
    Ok(axum::Json(fetch_schedule(&state, &schedule_id).await?))
}

pub async fn deactivate_schedule(
    Path(schedule_id): Path<String>,
    State(state): State<AppState>,
    requester: Requester,
) -> ApiResult<StatusCode> {
    require_roles(&requester, &[ROLE_ADMIN])?;
    let schedules = state.table("schedules");
    let res = sqlx::query(&format!("UPDATE {schedules} SET is_active=0 WHERE id=$1"))
        .bind(schedule_id.trim())
        .execute(&state.pool)
        .await
        .map_err(|e| ApiError::db("db deactivate_schedule failed", e))?;
    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("schedule not found"));
    }
    tracing::info!(schedule_id = %schedule_id.trim(), "schedule deactivated");
    Ok(StatusCode::NO_CONTENT)
}
