use axum::http::{header::HeaderName, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use subtle::ConstantTimeEq;
use tower::{Layer, Service};

/// Marker inserted once a request has passed the gateway check. Identity headers are only
/// read from requests carrying this extension.
#[derive(Clone, Debug)]
pub struct GatewayVerified {
    pub caller: Option<String>,
}

/// Verifies that a request was forwarded by the authenticating gateway (shared secret plus
/// optional caller allowlist).
#[derive(Clone)]
pub struct GatewayAuthLayer {
    required: bool,
    secret: Option<String>,
    secret_header: HeaderName,
    caller_header: HeaderName,
    allowed_callers: Vec<String>,
}

impl GatewayAuthLayer {
    pub fn new(required: bool, secret: Option<String>) -> Self {
        Self {
            required,
            secret,
            secret_header: HeaderName::from_static("x-gateway-secret"),
            caller_header: HeaderName::from_static("x-gateway-caller"),
            allowed_callers: Vec::new(),
        }
    }

    pub fn with_allowed_callers(mut self, callers: Vec<String>) -> Self {
        let mut out: Vec<String> = Vec::new();
        for raw in callers {
            let caller = raw.trim().to_ascii_lowercase();
            if caller.is_empty() || out.contains(&caller) {
                continue;
            }
            out.push(caller);
        }
        self.allowed_callers = out;
        self
    }
}

impl<S> Layer<S> for GatewayAuthLayer {
    type Service = GatewayAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GatewayAuthService {
            inner,
            check: GatewayCheck {
                required: self.required,
                secret: self.secret.clone(),
                secret_header: self.secret_header.clone(),
                caller_header: self.caller_header.clone(),
                allowed_callers: self.allowed_callers.clone(),
            },
        }
    }
}

#[derive(Clone)]
struct GatewayCheck {
    required: bool,
    secret: Option<String>,
    secret_header: HeaderName,
    caller_header: HeaderName,
    allowed_callers: Vec<String>,
}

impl GatewayCheck {
    fn header_value<B>(req: &Request<B>, name: &HeaderName) -> String {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .unwrap_or("")
            .to_string()
    }

    fn verify<B>(&self, req: &Request<B>) -> Result<GatewayVerified, (StatusCode, &'static str)> {
        let caller = Self::header_value(req, &self.caller_header).to_ascii_lowercase();
        let caller = (!caller.is_empty()).then_some(caller);

        if !self.required {
            return Ok(GatewayVerified { caller });
        }

        let Some(secret) = self.secret.as_deref().filter(|s| !s.trim().is_empty()) else {
            return Err((
                StatusCode::SERVICE_UNAVAILABLE,
                "gateway auth not configured",
            ));
        };

        let provided = Self::header_value(req, &self.secret_header);
        if provided.is_empty() || provided.as_bytes().ct_eq(secret.as_bytes()).unwrap_u8() != 1 {
            return Err((StatusCode::UNAUTHORIZED, "gateway auth required"));
        }

        if !self.allowed_callers.is_empty() {
            let allowed = caller
                .as_deref()
                .is_some_and(|c| self.allowed_callers.iter().any(|a| a == c));
            if !allowed {
                return Err((StatusCode::UNAUTHORIZED, "gateway caller not allowed"));
            }
        }

        Ok(GatewayVerified { caller })
    }
}

#[derive(Clone)]
pub struct GatewayAuthService<S> {
    inner: S,
    check: GatewayCheck,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    detail: &'a str,
}

impl<S, B> Service<Request<B>> for GatewayAuthService<S>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let verdict = self.check.verify(&req);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match verdict {
                Ok(verified) => {
                    req.extensions_mut().insert(verified);
                    inner.call(req).await
                }
                Err((status, detail)) => {
                    tracing::warn!(status = %status, detail, "gateway check rejected request");
                    Ok((status, axum::Json(ErrorBody { detail })).into_response())
                }
            }
        })
    }
}
