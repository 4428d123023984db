use super::Stage;
use crate::http::error::Error;
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Sliding-window request log per client address.
///
/// A client may make `max` requests in any `window`-long interval; the request that would be
/// one too many is refused and not recorded.
pub struct RateLimiter {
    max: usize,
    window: Duration,
    hits: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            max,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn check(&self, origin: IpAddr, now: Instant) -> Result<(), Error> {
        let mut hits = self.hits.lock().unwrap_or_else(PoisonError::into_inner);
        let requests = hits.entry(origin).or_default();
        expire(requests, now, self.window);

        if requests.len() >= self.max {
            log::debug!("rate limit exceeded for {}", origin);
            return Err(Error::status(
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests, please try again later.",
            ));
        }

        requests.push_back(now);
        Ok(())
    }

    /// Forget clients with no requests left inside the window. Returns how many were dropped.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut hits = self.hits.lock().unwrap_or_else(PoisonError::into_inner);
        let before = hits.len();
        hits.retain(|_, requests| {
            expire(requests, now, self.window);
            !requests.is_empty()
        });
        before - hits.len()
    }

    pub fn tracked(&self) -> usize {
        self.hits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn expire(requests: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = requests.front() {
        if now.saturating_duration_since(oldest) < window {
            break;
        }
        requests.pop_front();
    }
}

/// Periodically sweeps idle clients out of `limiter`. Runs until the process exits.
pub async fn sweep_forever(limiter: Arc<RateLimiter>) -> anyhow::Result<()> {
    // `interval` panics on a zero period.
    let mut interval = tokio::time::interval(limiter.window().max(Duration::from_secs(1)));
    loop {
        interval.tick().await;
        let dropped = limiter.sweep(Instant::now());
        if dropped > 0 {
            log::debug!("rate limiter forgot {} idle clients", dropped);
        }
    }
}

/// The pipeline stage in front of a shared [`RateLimiter`], keyed on the peer address.
pub struct RateLimit {
    limiter: Arc<RateLimiter>,
}

impl RateLimit {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl Stage for RateLimit {
    async fn before(&self, req: &mut Request<Body>) -> Result<(), Error> {
        // Without connect info (e.g. in tests) every request shares one bucket.
        let origin = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

        self.limiter.check(origin, Instant::now())
    }
}
