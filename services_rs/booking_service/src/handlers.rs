use crate::error::{ApiError, ApiJson, ApiResult};
use crate::lifecycle::CreateBooking;
use crate::models::*;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use busline_common::identity::Requester;

#[derive(Debug, serde::Serialize)]
pub struct HealthOut {
    pub status: &'static str,
    pub env: String,
    pub service: &'static str,
    pub version: &'static str,
}

pub async fn health(State(state): State<AppState>) -> axum::Json<HealthOut> {
    axum::Json(HealthOut {
        status: "ok",
        env: state.env_name.clone(),
        service: "Booking API",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn path_id(raw: &str, what: &str) -> ApiResult<String> {
    let id = raw.trim();
    if id.is_empty() || id.len() > 64 {
        return Err(ApiError::bad_request(format!("invalid {what}")));
    }
    Ok(id.to_string())
}

pub async fn create_booking(
    State(state): State<AppState>,
    requester: Requester,
    ApiJson(body): ApiJson<BookingIn>,
) -> ApiResult<(StatusCode, axum::Json<BookingOut>)> {
    let req = CreateBooking {
        schedule_id: body.schedule_id,
        departure_stop_id: body.departure_stop,
        arrival_stop_id: body.arrival_stop,
        passengers: body.passengers,
        contact_info: body.contact_info.unwrap_or_default(),
        special_requests: body.special_requests,
    };
    let booking = state.lifecycle.create(req, &requester).await?;
    Ok((StatusCode::CREATED, axum::Json(BookingOut { booking })))
}

pub async fn my_bookings(
    State(state): State<AppState>,
    requester: Requester,
) -> ApiResult<axum::Json<BookingListOut>> {
    let bookings = state.lifecycle.bookings_for(&requester).await?;
    Ok(axum::Json(BookingListOut {
        count: bookings.len(),
        bookings,
    }))
}

pub async fn booking_by_reference(
    Path(reference): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<BookingDetailOut>> {
    let reference = path_id(&reference, "booking reference")?;
    let (booking, payments) = state.lifecycle.booking_by_reference(&reference).await?;
    Ok(axum::Json(BookingDetailOut { booking, payments }))
}

pub async fn cancel_booking(
    Path(booking_id): Path<String>,
    State(state): State<AppState>,
    requester: Requester,
) -> ApiResult<axum::Json<BookingOut>> {
    let booking_id = path_id(&booking_id, "booking id")?;
    let booking = state.lifecycle.cancel(&booking_id, &requester).await?;
    Ok(axum::Json(BookingOut { booking }))
}

pub async fn complete_booking(
    Path(booking_id): Path<String>,
    State(state): State<AppState>,
    requester: Requester,
) -> ApiResult<axum::Json<BookingOut>> {
    let booking_id = path_id(&booking_id, "booking id")?;
    let booking = state.lifecycle.complete(&booking_id, &requester).await?;
    Ok(axum::Json(BookingOut { booking }))
}

pub async fn create_payment(
    State(state): State<AppState>,
    requester: Requester,
    ApiJson(body): ApiJson<PaymentIn>,
) -> ApiResult<axum::Json<PaymentOut>> {
    let booking_id = body.booking_id.trim();
    if booking_id.is_empty() {
        return Err(ApiError::invalid_field("booking_id", "booking_id required"));
    }
    let (payment, booking) = state
        .lifecycle
        .complete_payment(
            booking_id,
            body.payment_method,
            body.payment_details,
            &requester,
        )
        .await?;
    Ok(axum::Json(PaymentOut { payment, booking }))
}

pub async fn payment_history(
    State(state): State<AppState>,
    requester: Requester,
) -> ApiResult<axum::Json<PaymentListOut>> {
    let payments = state.lifecycle.payment_history(&requester).await?;
    Ok(axum::Json(PaymentListOut { payments }))
}

pub async fn payment_detail(
    Path(payment_id): Path<String>,
    State(state): State<AppState>,
    requester: Requester,
) -> ApiResult<axum::Json<crate::domain::Payment>> {
    let payment_id = path_id(&payment_id, "payment id")?;
    let payment = state.lifecycle.payment(&payment_id, &requester).await?;
    Ok(axum::Json(payment))
}
