//! Fixed-window rate limiting keyed by client address.
//!
//! # Data Flow
//! ```text
//! Request (ClientAddr resolved by headers.rs)
//!     → RateLimiter::acquire(client ip)
//!         → per-key entry lock: roll window, admit / enqueue / reject
//!         → queued: wait for release or window end (no lock held)
//!     → admitted: next stage
//!     → rejected: 429 + Retry-After
//! ```
//!
//! # Design Decisions
//! - Rollover is lazy: computed on access, no timer per key
//! - A rollover releases queued waiters oldest-first, each release
//!   counting against the new window
//! - `count < permit_limit` implies the queue is empty
//! - Idle keys are reclaimed by a periodic sweep

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::error::GatewayError;
use crate::observability::metrics;
use crate::security::headers::ClientAddr;

/// Counter state for one client key.
struct WindowState {
    window_start: Instant,
    count: u32,
    queue: VecDeque<oneshot::Sender<()>>,
    last_seen: Instant,
}

impl WindowState {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
            queue: VecDeque::new(),
            last_seen: now,
        }
    }

    fn window_end(&self, window: Duration) -> Instant {
        self.window_start + window
    }

    /// Start a new window if the current one has elapsed, releasing queued
    /// waiters into it.
    fn roll(&mut self, now: Instant, window: Duration, permit_limit: u32) {
        if now < self.window_end(window) {
            return;
        }
        self.window_start = now;
        self.count = 0;
        while self.count < permit_limit {
            let Some(waiter) = self.queue.pop_front() else {
                break;
            };
            // A waiter that went away takes no slot
            if waiter.send(()).is_ok() {
                self.count += 1;
            }
        }
    }
}

/// Result of one admission attempt.
pub(crate) enum Attempt {
    Admitted,
    Queued {
        release: oneshot::Receiver<()>,
        deadline: Instant,
    },
    Rejected {
        retry_after: Duration,
    },
}

/// Shared fixed-window limiter.
pub struct RateLimiter {
    states: DashMap<IpAddr, WindowState>,
    permit_limit: u32,
    window: Duration,
    queue_limit: usize,
}

impl RateLimiter {
    pub fn new(permit_limit: u32, window: Duration, queue_limit: usize) -> Self {
        Self {
            states: DashMap::new(),
            permit_limit,
            window,
            queue_limit,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.permit_limit, config.window(), config.queue_limit as usize)
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Number of client keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.states.len()
    }

    /// Number of waiters queued for `key`.
    pub fn queued(&self, key: &IpAddr) -> usize {
        self.states
            .get(key)
            .map(|s| s.queue.iter().filter(|w| !w.is_closed()).count())
            .unwrap_or(0)
    }

    pub(crate) fn attempt(&self, key: IpAddr, now: Instant) -> Attempt {
        let mut state = self.states.entry(key).or_insert_with(|| WindowState::new(now));
        state.last_seen = now;
        state.roll(now, self.window, self.permit_limit);

        if state.count < self.permit_limit {
            state.count += 1;
            return Attempt::Admitted;
        }

        state.queue.retain(|w| !w.is_closed());
        if state.queue.len() < self.queue_limit {
            let (tx, rx) = oneshot::channel();
            state.queue.push_back(tx);
            return Attempt::Queued {
                release: rx,
                deadline: state.window_end(self.window),
            };
        }

        Attempt::Rejected {
            retry_after: state.window_end(self.window).saturating_duration_since(now),
        }
    }

    /// Roll the window for `key` and return the end of the current window.
    fn roll_key(&self, key: &IpAddr, now: Instant) -> Instant {
        match self.states.get_mut(key) {
            Some(mut state) => {
                state.roll(now, self.window, self.permit_limit);
                state.window_end(self.window)
            }
            None => now + self.window,
        }
    }

    /// Admit a request for `key`, waiting in the queue if allowed.
    pub async fn acquire(&self, key: IpAddr) -> Result<(), GatewayError> {
        let (mut release, mut deadline) = match self.attempt(key, Instant::now()) {
            Attempt::Admitted => return Ok(()),
            Attempt::Rejected { retry_after } => {
                metrics::record_rate_limited("rejected");
                return Err(GatewayError::Throttled { retry_after });
            }
            Attempt::Queued { release, deadline } => {
                metrics::record_rate_limited("queued");
                tracing::debug!(client = %key, "Request queued for next window");
                (release, deadline)
            }
        };

        loop {
            tokio::select! {
                biased;
                released = &mut release => {
                    return match released {
                        Ok(()) => Ok(()),
                        // Sender dropped without a release: state was discarded
                        Err(_) => Err(GatewayError::Throttled { retry_after: self.window }),
                    };
                }
                _ = tokio::time::sleep_until(deadline) => {
                    deadline = self.roll_key(&key, Instant::now());
                }
            }
        }
    }

    /// Drop keys idle for at least one window with nobody queued.
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.states.len();
        self.states.retain(|_, state| {
            state.queue.retain(|w| !w.is_closed());
            !(state.queue.is_empty() && now.saturating_duration_since(state.last_seen) >= self.window)
        });
        let removed = before.saturating_sub(self.states.len());
        metrics::set_rate_limit_keys(self.states.len());
        removed
    }

    /// Run `sweep` once per window until shutdown.
    pub fn spawn_sweeper(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.window);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::debug!("Rate limit sweeper stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = self.sweep(Instant::now());
                        if removed > 0 {
                            tracing::debug!(removed, remaining = self.tracked_keys(), "Swept idle rate limit keys");
                        }
                    }
                }
            }
        })
    }
}

/// Key a request by its resolved client address.
pub fn client_key(request: &Request<Body>) -> IpAddr {
    if let Some(client) = request.extensions().get::<ClientAddr>() {
        return client.ip;
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Stage: fixed-window admission per client.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = client_key(&request);
    match limiter.acquire(key).await {
        Ok(()) => next.run(request).await,
        Err(err) => {
            tracing::warn!(client = %key, path = %request.uri().path(), "Rate limit exceeded");
            err.into_response()
        }
    }
}
