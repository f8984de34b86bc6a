//! Tower layer running the admission gateway in front of an Axum service.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, HeaderValue, Request, Response, StatusCode},
};
use tower::{Layer, Service};

use crate::decision::DenyReason;
use crate::gateway::{AdmissionGateway, AdmitResult};
use crate::key::{Key, RequestParts};
use crate::storage::{current_timestamp_ms, Storage};

/// Tower layer for admission control.
///
/// Every request goes through [`AdmissionGateway::admit`] with its URI path.
/// Admitted requests carry their [`AdmitResult`] as a request extension and
/// get `X-RateLimit-*` headers on the response.
pub struct AdmissionLayer<S, K> {
    gateway: Arc<AdmissionGateway<S, K>>,
}

impl<S, K> AdmissionLayer<S, K> {
    /// Create a layer owning `gateway`.
    pub fn new(gateway: AdmissionGateway<S, K>) -> Self {
        Self::from_shared(Arc::new(gateway))
    }

    /// Create a layer over a gateway shared with other components, for
    /// example a task that calls [`AdmissionGateway::flush`].
    pub fn from_shared(gateway: Arc<AdmissionGateway<S, K>>) -> Self {
        Self { gateway }
    }
}

impl<S, K> Clone for AdmissionLayer<S, K> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
        }
    }
}

impl<S, K, Inner> Layer<Inner> for AdmissionLayer<S, K> {
    type Service = AdmissionService<S, K, Inner>;

    fn layer(&self, inner: Inner) -> Self::Service {
        AdmissionService {
            inner,
            gateway: self.gateway.clone(),
        }
    }
}

/// The admission service.
pub struct AdmissionService<S, K, Inner> {
    inner: Inner,
    gateway: Arc<AdmissionGateway<S, K>>,
}

impl<S, K, Inner: Clone> Clone for AdmissionService<S, K, Inner> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            gateway: self.gateway.clone(),
        }
    }
}

impl<S, K, Inner> Service<Request<Body>> for AdmissionService<S, K, Inner>
where
    S: Storage,
    K: Key<RequestParts> + Send + Sync + 'static,
    Inner: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    Inner::Future: Send,
{
    type Response = Response<Body>;
    type Error = Inner::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let gateway = self.gateway.clone();
        // The clone is not ready; keep the one `poll_ready` was called on.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let parts = request_parts(&request);
            let path = request.uri().path().to_owned();
            let result = gateway.admit(&path, &parts, current_timestamp_ms()).await;

            if !result.allowed {
                return Ok(denied_response(&result));
            }

            let headers = result.to_headers();
            request.extensions_mut().insert(result);
            let mut response = inner.call(request).await?;
            insert_headers(&mut response, headers);
            Ok(response)
        })
    }
}

/// Copy what key extractors need out of an Axum request.
///
/// The peer address comes from [`ConnectInfo`] when the server was started
/// with `into_make_service_with_connect_info`.
pub fn request_parts(request: &Request<Body>) -> RequestParts {
    let mut parts = RequestParts::new(request.method().as_str(), request.uri().path());

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        parts = parts.with_client_ip(addr.ip());
    }
    for (name, value) in request.headers() {
        if let Ok(value) = value.to_str() {
            parts = parts.with_header(name.as_str(), value);
        }
    }
    parts
}

fn insert_headers(response: &mut Response<Body>, headers: Vec<(&'static str, String)>) {
    let map = response.headers_mut();
    for (name, value) in headers {
        if let Ok(value) = HeaderValue::from_str(&value) {
            map.insert(name, value);
        }
    }
}

/// 429 for rate limited callers, 503 for everything the caller cannot fix.
fn denied_response(result: &AdmitResult) -> Response<Body> {
    let status = match result.reason {
        Some(DenyReason::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
        Some(DenyReason::KeyUnavailable) => StatusCode::BAD_REQUEST,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    let body = serde_json::to_vec(result).unwrap_or_default();

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    insert_headers(&mut response, result.to_headers());
    response
}
