//! Verified caller identity forwarded by the gateway.
//!
//! The gateway authenticates end users and forwards `x-auth-user-id` and a comma separated
//! `x-auth-roles` list. These headers are honored only on requests that already passed
//! [`GatewayAuthLayer`](crate::gateway_auth::GatewayAuthLayer).

use crate::gateway_auth::GatewayVerified;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::collections::BTreeSet;

pub const USER_ID_HEADER: &str = "x-auth-user-id";
pub const ROLES_HEADER: &str = "x-auth-roles";

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_BUS_MANAGER: &str = "bus_manager";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Requester {
    pub user_id: String,
    pub roles: BTreeSet<String>,
}

impl Requester {
    pub fn new(user_id: impl Into<String>, roles: &[&str]) -> Self {
        Self {
            user_id: user_id.into(),
            roles: roles.iter().map(|r| r.to_ascii_lowercase()).collect(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        roles.iter().any(|r| self.has_role(r))
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ROLE_ADMIN)
    }

    pub fn owns(&self, owner_id: &str) -> bool {
        !self.user_id.is_empty() && self.user_id == owner_id
    }

    fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let user_id = headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty() && s.len() <= 64)?
            .to_string();
        let roles = headers
            .get(ROLES_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .split(',')
            .map(|r| r.trim().to_ascii_lowercase())
            .filter(|r| !r.is_empty())
            .collect();
        Some(Self { user_id, roles })
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    detail: &'a str,
}

fn unauthorized(detail: &'static str) -> Response {
    (StatusCode::UNAUTHORIZED, axum::Json(ErrorBody { detail })).into_response()
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Requester
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if parts.extensions.get::<GatewayVerified>().is_none() {
            return Err(unauthorized("gateway verification missing"));
        }
        Requester::from_headers(&parts.headers).ok_or_else(|| unauthorized("authentication required"))
    }
}
