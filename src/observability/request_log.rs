//! Request logging with response body capture.
//!
//! # Data Flow
//! ```text
//! Request
//!     → record method, path, request id, start time
//!     → inner service (rest of the pipeline)
//!         Err(e)      → log error, return e unchanged
//!         Ok(response) → drain body frames into a buffer
//!                      → log status, elapsed, bytes
//!                      → replay buffer (+ trailers / body error) as the body
//! Future dropped before completion → log abandonment
//! ```
//!
//! # Design Decisions
//! - The client sees exactly the bytes the inner service produced
//! - A body stream error is replayed after the bytes received before it
//! - Responses tagged with `FailureCause` log at error level

use std::fmt::Display;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes, HttpBody};
use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Method, Request, Response, StatusCode};
use axum::BoxError;
use futures_util::future::BoxFuture;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use tower::{Layer, Service};

use crate::error::FailureCause;
use crate::http::request::X_REQUEST_ID;
use crate::observability::metrics;
use crate::security::ClientAddr;

/// Layer that logs every request passing through it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLoggingLayer;

impl<S> Layer<S> for RequestLoggingLayer {
    type Service = RequestLogging<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLogging { inner }
    }
}

#[derive(Debug, Clone)]
pub struct RequestLogging<S> {
    inner: S,
}

/// What the logger knows about a request before it runs.
struct RequestContext {
    method: Method,
    path: String,
    request_id: String,
    tcp_peer: Option<SocketAddr>,
    started: Instant,
}

impl RequestContext {
    fn new<B>(request: &Request<B>) -> Self {
        Self {
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            request_id: request
                .headers()
                .get(X_REQUEST_ID)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-")
                .to_string(),
            tcp_peer: request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
            started: Instant::now(),
        }
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Logs the request as abandoned unless it completes first.
struct InFlight<'a> {
    context: &'a RequestContext,
    completed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        if std::thread::panicking() {
            tracing::error!(
                request_id = %self.context.request_id,
                method = %self.context.method,
                path = %self.context.path,
                elapsed_ms = self.context.elapsed().as_millis() as u64,
                "Request aborted by panic"
            );
        } else {
            tracing::warn!(
                request_id = %self.context.request_id,
                method = %self.context.method,
                path = %self.context.path,
                elapsed_ms = self.context.elapsed().as_millis() as u64,
                "Request abandoned by client"
            );
        }
    }
}

/// An inner response body, drained.
struct Captured {
    data: Bytes,
    trailers: Option<HeaderMap>,
    error: Option<BoxError>,
}

impl Captured {
    async fn drain<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let mut body = std::pin::pin!(body);
        let mut data = Vec::new();
        let mut trailers = None;
        let mut error = None;

        while let Some(frame) = body.frame().await {
            match frame {
                Ok(frame) => match frame.into_data() {
                    Ok(chunk) => data.extend_from_slice(&chunk),
                    Err(frame) => {
                        if let Ok(t) = frame.into_trailers() {
                            trailers = Some(t);
                        }
                    }
                },
                Err(e) => {
                    error = Some(e.into());
                    break;
                }
            }
        }

        Self {
            data: Bytes::from(data),
            trailers,
            error,
        }
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    /// Rebuild a body yielding the same frames.
    fn replay(self) -> Body {
        if self.trailers.is_none() && self.error.is_none() {
            return Body::from(self.data);
        }
        let mut frames: Vec<Result<Frame<Bytes>, BoxError>> = Vec::with_capacity(2);
        if !self.data.is_empty() {
            frames.push(Ok(Frame::data(self.data)));
        }
        if let Some(trailers) = self.trailers {
            frames.push(Ok(Frame::trailers(trailers)));
        }
        if let Some(error) = self.error {
            frames.push(Err(error));
        }
        Body::new(StreamBody::new(futures_util::stream::iter(frames)))
    }
}

fn log_completed(
    context: &RequestContext,
    status: StatusCode,
    bytes: usize,
    client: Option<&ClientAddr>,
    cause: Option<&FailureCause>,
) {
    let elapsed = context.elapsed();
    let elapsed_ms = elapsed.as_millis() as u64;
    metrics::record_request(context.method.as_str(), status.as_u16(), elapsed);
    // Resolved client key; absent only if the request never reached header resolution
    let client = client.map(|c| c.ip.to_string()).unwrap_or_else(|| "-".to_string());

    match cause {
        Some(FailureCause(error)) => tracing::error!(
            request_id = %context.request_id,
            method = %context.method,
            path = %context.path,
            client = %client,
            status = status.as_u16(),
            elapsed_ms,
            bytes,
            error = %error,
            "Request failed"
        ),
        None if status == StatusCode::TOO_MANY_REQUESTS => tracing::warn!(
            request_id = %context.request_id,
            method = %context.method,
            path = %context.path,
            client = %client,
            status = status.as_u16(),
            elapsed_ms,
            bytes,
            "Request throttled"
        ),
        None => tracing::info!(
            request_id = %context.request_id,
            method = %context.method,
            path = %context.path,
            client = %client,
            tcp_peer = ?context.tcp_peer,
            status = status.as_u16(),
            elapsed_ms,
            bytes,
            "Request completed"
        ),
    }
}

fn log_failed(context: &RequestContext, error: &dyn Display) {
    let elapsed = context.elapsed();
    metrics::record_request(context.method.as_str(), StatusCode::INTERNAL_SERVER_ERROR.as_u16(), elapsed);
    tracing::error!(
        request_id = %context.request_id,
        method = %context.method,
        path = %context.path,
        elapsed_ms = elapsed.as_millis() as u64,
        error = %error,
        "Request failed"
    );
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RequestLogging<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Display + Send + 'static,
    ReqBody: Send + 'static,
    ResBody: HttpBody<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError>,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        // Use the service that was driven to readiness
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let context = RequestContext::new(&request);

        Box::pin(async move {
            let mut in_flight = InFlight {
                context: &context,
                completed: false,
            };

            let response = match inner.call(request).await {
                Ok(response) => response,
                Err(err) => {
                    in_flight.completed = true;
                    log_failed(&context, &err);
                    return Err(err);
                }
            };

            let (parts, body) = response.into_parts();
            let captured = Captured::drain(body).await;
            in_flight.completed = true;

            match &captured.error {
                Some(error) => log_failed(&context, error),
                None => log_completed(
                    &context,
                    parts.status,
                    captured.len(),
                    parts.extensions.get::<ClientAddr>(),
                    parts.extensions.get::<FailureCause>(),
                ),
            }

            Ok(Response::from_parts(parts, captured.replay()))
        })
    }
}
