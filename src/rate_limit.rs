//! Request-rate limiting for the HTTP adapter.

use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{num::NonZeroU32, sync::Arc};
use tracing::warn;

/// General per-process request budget.
pub const REQUESTS_PER_MINUTE: u32 = 120;

/// Tighter budget for request-submission routes.
pub const SUBMIT_REQUESTS_PER_MINUTE: u32 = 30;

#[derive(Clone)]
pub struct RateLimitState {
    general: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    submit: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl RateLimitState {
    pub fn new() -> Self {
        let general_quota =
            Quota::per_minute(NonZeroU32::new(REQUESTS_PER_MINUTE).expect("nonzero quota"));
        let submit_quota =
            Quota::per_minute(NonZeroU32::new(SUBMIT_REQUESTS_PER_MINUTE).expect("nonzero quota"));
        Self {
            general: Arc::new(RateLimiter::direct(general_quota)),
            submit: Arc::new(RateLimiter::direct(submit_quota)),
        }
    }

    fn limiter_for(&self, path: &str, method: &axum::http::Method) -> &RateLimiter<NotKeyed, InMemoryState, DefaultClock> {
        if path.starts_with("/requests") && method == axum::http::Method::POST {
            &self.submit
        } else {
            &self.general
        }
    }
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn rate_limit_middleware(
    axum::extract::State(state): axum::extract::State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = request.uri().path();
    let limiter = state.limiter_for(path, request.method());

    if limiter.check().is_err() {
        warn!("Rate limit exceeded for {}", path);
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quotas_start_open() {
        let state = RateLimitState::new();
        assert!(state.general.check().is_ok());
        assert!(state.submit.check().is_ok());
    }

    #[test]
    fn test_submit_quota_exhausts_before_general() {
        let state = RateLimitState::new();
        let mut rejected = false;
        for _ in 0..SUBMIT_REQUESTS_PER_MINUTE + 5 {
            if state.submit.check().is_err() {
                rejected = true;
                break;
            }
        }
        assert!(rejected);
    }
}
