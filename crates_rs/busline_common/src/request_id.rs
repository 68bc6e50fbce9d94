use axum::http::{header::HeaderName, HeaderValue, Request};
use axum::response::Response;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use uuid::Uuid;

const MAX_INBOUND_LEN: usize = 128;

/// Correlation id attached to every request as an extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accepts a caller supplied id only when it is short, printable ASCII.
    fn from_inbound(raw: &str) -> Option<Self> {
        let v = raw.trim();
        if v.is_empty() || v.len() > MAX_INBOUND_LEN {
            return None;
        }
        if !v.bytes().all(|b| b.is_ascii_graphic()) {
            return None;
        }
        Some(Self(v.to_string()))
    }
}

#[derive(Clone)]
pub struct RequestIdLayer {
    header: HeaderName,
}

impl RequestIdLayer {
    pub fn new(header_name: HeaderName) -> Self {
        Self {
            header: header_name,
        }
    }

    pub fn x_request_id() -> Self {
        Self::new(HeaderName::from_static("x-request-id"))
    }
}

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService {
            inner,
            header: self.header.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RequestIdService<S> {
    inner: S,
    header: HeaderName,
}

impl<S, B> Service<Request<B>> for RequestIdService<S>
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
        let header = self.header.clone();

        let rid = req
            .headers()
            .get(&header)
            .and_then(|v| v.to_str().ok())
            .and_then(RequestId::from_inbound)
            .unwrap_or_else(RequestId::generate);

        req.extensions_mut().insert(rid.clone());

        let mut inner = self.inner.clone();
        Box::pin(async move {
            let mut resp = inner.call(req).await?;
            if let Ok(v) = HeaderValue::from_str(rid.as_str()) {
                resp.headers_mut().insert(header, v);
            }
            Ok(resp)
        })
    }
}
