use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::Settings;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Per-client-IP request budget: at most `max_requests` in each fixed
/// `window`, counted from the client's first request of that window.
#[derive(Clone)]
pub struct ClientRateLimit {
    window: Duration,
    max_requests: u32,
    clients: Arc<Mutex<HashMap<IpAddr, Window>>>,
}

impl ClientRateLimit {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests: max_requests.max(1),
            clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.rate_limit_window(), settings.rate_limit_max_requests)
    }

    /// Take one request from `ip`'s budget. On refusal, how long until its
    /// window ends.
    pub fn check(&self, ip: IpAddr) -> Result<(), Duration> {
        let now = Instant::now();
        let mut clients = self.clients.lock();
        clients.retain(|_, w| now.duration_since(w.started) < self.window);

        let window = clients.entry(ip).or_insert(Window { started: now, count: 0 });
        if window.count >= self.max_requests {
            return Err((window.started + self.window).saturating_duration_since(now));
        }
        window.count += 1;
        Ok(())
    }

    /// Clients with an open window
    pub fn tracked_clients(&self) -> usize {
        self.clients.lock().len()
    }
}

fn client_ip(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// axum middleware answering 429 once a client is over budget
pub async fn limit_by_ip(State(limit): State<ClientRateLimit>, request: Request, next: Next) -> Response {
    let ip = client_ip(&request);
    match limit.check(ip) {
        Ok(()) => next.run(request).await,
        Err(wait) => {
            tracing::warn!(
                ip = %ip,
                path = %request.uri().path(),
                event = "rate_limit_exceeded",
                "Rate limit exceeded"
            );
            let retry_after = wait.as_secs().max(1).to_string();
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after)],
                Json(json!({
                    "error": "Too many requests",
                    "message": "You have exceeded the rate limit. Please try again later."
                })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware, routing::get, Router};
    use tower::ServiceExt;

    fn app(limit: ClientRateLimit) -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(limit, limit_by_ip))
    }

    fn request_from(ip: [u8; 4]) -> Request {
        let mut request = axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((ip, 4000))));
        request
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_is_per_ip_and_window() {
        let limit = ClientRateLimit::new(Duration::from_secs(60), 2);
        let a = IpAddr::from([10, 0, 0, 1]);
        let b = IpAddr::from([10, 0, 0, 2]);
        assert!(limit.check(a).is_ok());
        assert!(limit.check(a).is_ok());
        assert_eq!(limit.check(a).unwrap_err(), Duration::from_secs(60));
        assert!(limit.check(b).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_spread_over_a_window_are_capped() {
        let limit = ClientRateLimit::new(Duration::from_millis(1000), 2);
        let ip = IpAddr::from([10, 0, 0, 3]);

        assert!(limit.check(ip).is_ok());
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(limit.check(ip).is_ok());
        tokio::time::advance(Duration::from_millis(300)).await;
        assert_eq!(limit.check(ip).unwrap_err(), Duration::from_millis(100));

        // A new window starts once the old one is over
        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(limit.check(ip).is_ok());
        assert!(limit.check(ip).is_ok());
        assert!(limit.check(ip).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_windows_are_pruned() {
        let limit = ClientRateLimit::new(Duration::from_secs(1), 5);
        for last in 1..=3u8 {
            limit.check(IpAddr::from([10, 0, 1, last])).unwrap();
        }
        assert_eq!(limit.tracked_clients(), 3);

        tokio::time::advance(Duration::from_secs(2)).await;
        limit.check(IpAddr::from([10, 0, 2, 1])).unwrap();
        assert_eq!(limit.tracked_clients(), 1);
    }

    #[tokio::test]
    async fn test_zero_max_still_allows_one() {
        let limit = ClientRateLimit::new(Duration::from_secs(60), 0);
        let ip = IpAddr::from([127, 0, 0, 1]);
        assert!(limit.check(ip).is_ok());
        assert!(limit.check(ip).is_err());
    }

    #[tokio::test]
    async fn test_over_budget_gets_429() {
        let app = app(ClientRateLimit::new(Duration::from_secs(900), 3));

        for _ in 0..3 {
            let response = app.clone().oneshot(request_from([192, 168, 1, 7])).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app.clone().oneshot(request_from([192, 168, 1, 7])).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "Too many requests");

        let other = app.oneshot(request_from([192, 168, 1, 8])).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }
}
