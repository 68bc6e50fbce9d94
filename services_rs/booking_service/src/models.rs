use crate::domain::{Booking, ContactInfo, Passenger, Payment, PaymentMethod, ScheduleStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Lifecycle

#[derive(Debug, Deserialize)]
pub struct BookingIn {
    pub schedule_id: String,
    #[serde(default, alias = "departure_stop_id")]
    pub departure_stop: Option<String>,
    #[serde(default, alias = "arrival_stop_id")]
    pub arrival_stop: Option<String>,
    #[serde(default)]
    pub passengers: Vec<Passenger>,
    #[serde(default)]
    pub contact_info: Option<ContactInfo>,
    #[serde(default)]
    pub special_requests: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BookingOut {
    pub booking: Booking,
}

#[derive(Debug, Serialize)]
pub struct BookingDetailOut {
    pub booking: Booking,
    pub payments: Vec<Payment>,
}

#[derive(Debug, Serialize)]
pub struct BookingListOut {
    pub bookings: Vec<Booking>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct PaymentIn {
    pub booking_id: String,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub payment_details: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct PaymentOut {
    pub payment: Payment,
    pub booking: Booking,
}

#[derive(Debug, Serialize)]
pub struct PaymentListOut {
    pub payments: Vec<Payment>,
}

// Stations

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub ward: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StationIn {
    pub station_code: String,
    pub station_name: String,
    pub city: String,
    pub province: String,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub contact_number: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub facilities: Vec<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct StationOut {
    pub id: String,
    pub station_code: String,
    pub station_name: String,
    pub city: String,
    pub province: String,
    pub address: Option<Address>,
    pub contact_number: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub facilities: Vec<String>,
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct StationSearchParams {
    pub q: Option<String>,
    pub city: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CityGroupOut {
    pub city: String,
    pub stations: Vec<StationOut>,
}

#[derive(Debug, Serialize)]
pub struct StationSearchOut {
    pub count: usize,
    pub data: Vec<CityGroupOut>,
}

#[derive(Debug, Serialize)]
pub struct CityOut {
    pub city: String,
    pub station_count: i64,
}

// Companies and buses

#[derive(Debug, Deserialize)]
pub struct CompanyIn {
    pub company_name: String,
    pub company_code: String,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub contact_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct CompanyOut {
    pub id: String,
    pub company_name: String,
    pub company_code: String,
    pub logo_url: Option<String>,
    pub contact_number: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub is_active: bool,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct BusIn {
    pub bus_number: String,
    pub license_plate: String,
    pub company_id: String,
    #[serde(default)]
    pub type_name: Option<String>,
    pub seat_capacity: i32,
    #[serde(default)]
    pub driver_id: Option<String>,
    #[serde(default)]
    pub amenities: Vec<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct BusOut {
    pub id: String,
    pub bus_number: String,
    pub license_plate: String,
    pub company_id: String,
    pub type_name: Option<String>,
    pub seat_capacity: i32,
    pub driver_id: Option<String>,
    pub amenities: Vec<String>,
    pub is_active: bool,
    pub created_at: Option<DateTime<Utc>>,
}

// Routes

#[derive(Debug, Deserialize)]
pub struct RouteStopIn {
    pub station_id: String,
    pub stop_order: i32,
    #[serde(default)]
    pub distance_from_start: Option<f64>,
    #[serde(default)]
    pub time_from_start_min: Option<i32>,
    #[serde(default)]
    pub pickup_price: i64,
    #[serde(default)]
    pub dropoff_price: i64,
}

#[derive(Debug, Deserialize)]
pub struct RouteIn {
    pub route_code: String,
    pub route_name: String,
    pub departure_station_id: String,
    pub arrival_station_id: String,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub estimated_duration_min: Option<i32>,
    #[serde(default)]
    pub stops: Vec<RouteStopIn>,
}

#[derive(Debug, Serialize, Clone)]
pub struct RouteStopOut {
    pub station_id: String,
    pub station_name: Option<String>,
    pub city: Option<String>,
    pub stop_order: i32,
    pub distance_from_start: Option<f64>,
    pub time_from_start_min: Option<i32>,
    pub pickup_price: i64,
    pub dropoff_price: i64,
}

#[derive(Debug, Serialize, Clone)]
pub struct RouteOut {
    pub id: String,
    pub route_code: String,
    pub route_name: String,
    pub departure_station_id: String,
    pub arrival_station_id: String,
    pub distance_km: Option<f64>,
    pub estimated_duration_min: Option<i32>,
    pub is_active: bool,
    pub stops: Vec<RouteStopOut>,
}

#[derive(Debug, Serialize)]
pub struct PopularRouteOut {
    #[serde(flatten)]
    pub route: RouteOut,
    pub booked_seats: i64,
}

// Schedules

#[derive(Debug, Deserialize)]
pub struct ScheduleIn {
    pub route_id: String,
    pub bus_id: String,
    pub driver_id: String,
    pub departure_time: String,
    pub arrival_time: String,
    pub base_price: i64,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleStatusIn {
    pub status: ScheduleStatus,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleSearchParams {
    pub departure_city: Option<String>,
    pub arrival_city: Option<String>,
    pub departure_date: Option<String>, // YYYY-MM-DD
    pub passengers: Option<i32>,
}

#[derive(Debug, Serialize, Clone)]
pub struct ScheduleOut {
    pub id: String,
    pub route_id: String,
    pub route_name: Option<String>,
    pub departure_city: Option<String>,
    pub arrival_city: Option<String>,
    pub bus_id: String,
    pub bus_number: Option<String>,
    pub company_name: Option<String>,
    pub driver_id: String,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    pub base_price: i64,
    pub capacity: i32,
    pub available_seats: i32,
    pub status: ScheduleStatus,
    pub actual_departure_time: Option<DateTime<Utc>>,
    pub actual_arrival_time: Option<DateTime<Utc>>,
    pub is_active: bool,
}

#[derive(Debug, Serialize)]
pub struct ScheduleListOut {
    pub schedules: Vec<ScheduleOut>,
    pub count: usize,
}
