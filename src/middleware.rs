//! Client-IP injection for the rate limiter.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Make sure every request carries an X-Forwarded-For header, so the rate
/// limiter keys on the same client IP with or without a proxy in front.
/// An existing header wins; otherwise the socket peer address is filled in.
pub async fn inject_client_ip(mut request: Request<Body>, next: Next) -> Response {
    let forwarded = request
        .headers()
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .map(|raw| raw.split(',').next().unwrap_or("").trim().to_string())
        .filter(|ip| !ip.is_empty());

    match forwarded {
        Some(ip) => debug!("Client ip {} (forwarded header)", ip),
        None => match request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0)
        {
            Some(addr) => {
                let ip = addr.ip().to_string();
                if let Ok(value) = HeaderValue::from_str(&ip) {
                    request.headers_mut().insert(FORWARDED_FOR, value);
                }
                debug!("Client ip {} (socket peer)", ip);
            }
            None => debug!("Client ip unavailable"),
        },
    }

    next.run(request).await
}
